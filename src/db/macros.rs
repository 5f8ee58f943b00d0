//! Scope construction macro.

/// Build a [`Vars`](crate::models::Vars) scope.
///
/// `name = expr` binds an expression; a bare `name` binds a clone of the
/// local variable with that name, so placeholders can refer to locals the
/// way they read in the template.
///
/// # Example
///
/// ```ignore
/// let id = 7;
/// let scope = vars!(id, name = "bob");
/// db.execute("update users set name = $name where id = $id", &scope)?;
/// ```
#[macro_export]
macro_rules! vars {
    () => {
        $crate::models::Vars::new()
    };
    (@value $name:ident = $value:expr) => {
        $value
    };
    (@value $name:ident) => {
        ::std::clone::Clone::clone(&$name)
    };
    ($($name:ident $(= $value:expr)?),+ $(,)?) => {{
        let mut vars = $crate::models::Vars::new();
        $(
            vars.insert(stringify!($name), $crate::vars!(@value $name $(= $value)?));
        )+
        vars
    }};
}

pub use vars;

#[cfg(test)]
mod tests {
    use crate::models::{Scope, Value};

    #[test]
    fn test_vars_empty() {
        let scope = vars!();
        assert!(scope.is_empty());
    }

    #[test]
    fn test_vars_explicit_and_captured() {
        let id: i64 = 7;
        let name = String::from("bob");
        let scope = vars!(id, name, active = true);
        assert_eq!(scope.lookup("id"), Some(Value::Int(7)));
        assert_eq!(scope.lookup("name"), Some(Value::Text("bob".into())));
        assert_eq!(scope.lookup("active"), Some(Value::Bool(true)));
        // captured by clone
        assert_eq!(name, "bob");
    }
}
