//! Recording in-memory provider for integration tests.

#![allow(dead_code)]

use db_session::db::{Connection, Cursor, Provider};
use db_session::error::{ErrorKind, ProviderError, ProviderResult};
use db_session::sql::{Arguments, ParamStyle};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Events from every provider sharing the log, in the order they happened.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Events of one kind ("commit", "rollback", ...), as provider names.
    pub fn of(&self, kind: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| {
                let (name, rest) = e.split_once(':')?;
                (rest == kind || rest.starts_with(&format!("{} ", kind))).then(|| name.to_string())
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

struct MockState {
    name: String,
    log: EventLog,
    responses: Mutex<VecDeque<Cursor>>,
    fail_connect: bool,
    fail_commit: bool,
    fail_rollback: bool,
    fail_execute: Option<ErrorKind>,
    connects: AtomicUsize,
    releases: AtomicUsize,
    executed: Mutex<Vec<(String, Arguments)>>,
    limits: Mutex<Vec<usize>>,
    rows_read: AtomicUsize,
}

/// A provider whose connections record what they are asked to do.
#[derive(Clone)]
pub struct MockProvider {
    state: Arc<MockState>,
    style: ParamStyle,
}

impl MockProvider {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            state: Arc::new(MockState {
                name: name.to_string(),
                log: log.clone(),
                responses: Mutex::new(VecDeque::new()),
                fail_connect: false,
                fail_commit: false,
                fail_rollback: false,
                fail_execute: None,
                connects: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                executed: Mutex::new(Vec::new()),
                limits: Mutex::new(Vec::new()),
                rows_read: AtomicUsize::new(0),
            }),
            style: ParamStyle::Qmark,
        }
    }

    fn configure(self, f: impl FnOnce(&mut MockState)) -> Self {
        let mut state = Arc::try_unwrap(self.state)
            .ok()
            .expect("configure before sharing the provider");
        f(&mut state);
        Self {
            state: Arc::new(state),
            style: self.style,
        }
    }

    pub fn with_style(mut self, style: ParamStyle) -> Self {
        self.style = style;
        self
    }

    pub fn failing_connect(self) -> Self {
        self.configure(|s| s.fail_connect = true)
    }

    pub fn failing_commit(self) -> Self {
        self.configure(|s| s.fail_commit = true)
    }

    pub fn failing_rollback(self) -> Self {
        self.configure(|s| s.fail_rollback = true)
    }

    pub fn failing_execute(self, kind: ErrorKind) -> Self {
        self.configure(|s| s.fail_execute = Some(kind))
    }

    /// Queue the cursor returned by the next `execute`.
    pub fn respond(&self, cursor: Cursor) {
        self.state.responses.lock().unwrap().push_back(cursor);
    }

    /// Queue a result set.
    pub fn respond_rows(&self, columns: &[&str], rows: Vec<Vec<db_session::Value>>) {
        self.respond(Cursor::with_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        ));
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Every statement executed through this provider, with its arguments.
    pub fn executed(&self) -> Vec<(String, Arguments)> {
        self.state.executed.lock().unwrap().clone()
    }

    /// Row limits passed to `query`, in call order.
    pub fn limits(&self) -> Vec<usize> {
        self.state.limits.lock().unwrap().clone()
    }

    /// Rows handed out by `query` after applying its limit.
    pub fn rows_read(&self) -> usize {
        self.state.rows_read.load(Ordering::SeqCst)
    }

    pub fn last_sql(&self) -> Option<String> {
        self.executed().last().map(|(sql, _)| sql.clone())
    }

    pub fn shared(&self) -> Arc<dyn Provider> {
        Arc::new(self.clone())
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn param_style(&self) -> ParamStyle {
        self.style
    }

    fn connect(&self) -> ProviderResult<Box<dyn Connection>> {
        if self.state.fail_connect {
            return Err(ProviderError::new(ErrorKind::Operational, "connection refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.log.push(format!("{}:connect", self.state.name));
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }

    fn release(&self, _connection: Box<dyn Connection>) -> ProviderResult<()> {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        self.state.log.push(format!("{}:release", self.state.name));
        Ok(())
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

impl Connection for MockConnection {
    fn execute(&mut self, sql: &str, args: &Arguments) -> ProviderResult<Cursor> {
        self.state
            .log
            .push(format!("{}:execute {}", self.state.name, sql));
        self.state
            .executed
            .lock()
            .unwrap()
            .push((sql.to_string(), args.clone()));
        if let Some(kind) = self.state.fail_execute {
            return Err(ProviderError::new(kind, "statement failed"));
        }
        Ok(self
            .state
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Cursor::with_outcome(1, Some(1))))
    }

    fn query(&mut self, sql: &str, args: &Arguments, limit: usize) -> ProviderResult<Cursor> {
        self.state.limits.lock().unwrap().push(limit);
        let mut cursor = self.execute(sql, args)?;
        cursor.truncate(limit);
        self.state
            .rows_read
            .fetch_add(cursor.remaining(), Ordering::SeqCst);
        Ok(cursor)
    }

    fn commit(&mut self) -> ProviderResult<()> {
        self.state.log.push(format!("{}:commit", self.state.name));
        if self.state.fail_commit {
            return Err(ProviderError::new(ErrorKind::Internal, "disk full"));
        }
        Ok(())
    }

    fn rollback(&mut self) -> ProviderResult<()> {
        self.state.log.push(format!("{}:rollback", self.state.name));
        if self.state.fail_rollback {
            return Err(ProviderError::new(ErrorKind::Operational, "connection lost"));
        }
        Ok(())
    }
}
