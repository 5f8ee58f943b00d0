//! Variable scopes that `$name` placeholders are evaluated against.

use crate::models::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A source of named values for template evaluation.
pub trait Scope {
    /// Resolve a top-level name, `None` if it is not bound.
    fn lookup(&self, name: &str) -> Option<Value>;
}

/// An owned set of named values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars {
    values: BTreeMap<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Vars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Vars::new();
        for (k, v) in iter {
            vars.insert(k, v);
        }
        vars
    }
}

impl Scope for Vars {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
}

impl Scope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Scope for BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Scope for serde_json::Map<String, serde_json::Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned().map(Value::from_json)
    }
}

/// The empty scope.
impl Scope for () {
    fn lookup(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Two-level scope: names resolve in `locals` first, then in `globals`.
#[derive(Clone, Copy)]
pub struct Layered<'a> {
    pub locals: &'a dyn Scope,
    pub globals: &'a dyn Scope,
}

impl<'a> Layered<'a> {
    pub fn new(locals: &'a dyn Scope, globals: &'a dyn Scope) -> Self {
        Self { locals, globals }
    }
}

impl Scope for Layered<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.locals
            .lookup(name)
            .or_else(|| self.globals.lookup(name))
    }
}
