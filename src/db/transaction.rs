//! Unit-of-work coordination.
//!
//! A unit of work is everything one thread did through its open handles since
//! the last boundary. [`auto_commit`] and [`auto_rollback`] end it: they act on
//! every open handle of the current thread and always leave the thread with
//! an empty execution context, connections returned to their providers.

use crate::db::context::{self, ContextEntry};
use crate::error::DbError;
use tracing::{debug, info, warn};

/// Commit every open handle of the current thread in acquisition order.
///
/// If the first commit fails nothing has been committed yet, so every other
/// handle is rolled back and the error carries the commit failure followed
/// by any rollback failures. Once the first commit succeeds the remaining
/// handles are committed regardless of each other's failures, which are
/// reported together as a partial commit.
pub fn auto_commit() -> Result<(), DbError> {
    let entries = context::take_context();
    if entries.is_empty() {
        return Ok(());
    }

    let result = commit_in_order(&entries);
    context::release_entries(entries);
    result
}

fn commit_in_order(entries: &[ContextEntry]) -> Result<(), DbError> {
    let Some((first, rest)) = entries.split_first() else {
        return Ok(());
    };

    if let Err(err) = first.commit() {
        warn!(
            handle_id = %first.handle_id,
            database = %first.label,
            error = %err,
            "First commit failed, rolling back remaining handles"
        );
        let mut errors = vec![err];
        errors.extend(rollback_each(rest));
        return Err(DbError::Commit {
            errors,
            partial: false,
        });
    }

    let errors: Vec<DbError> = rest
        .iter()
        .filter_map(|entry| {
            entry.commit().err().inspect(|e| {
                warn!(
                    handle_id = %entry.handle_id,
                    database = %entry.label,
                    error = %e,
                    "Commit failed after an earlier handle committed"
                );
            })
        })
        .collect();

    if errors.is_empty() {
        info!(handles = entries.len(), "Unit of work committed");
        Ok(())
    } else {
        Err(DbError::Commit {
            errors,
            partial: true,
        })
    }
}

fn rollback_each(entries: &[ContextEntry]) -> Vec<DbError> {
    entries
        .iter()
        .filter_map(|entry| {
            entry.rollback().err().inspect(|e| {
                warn!(
                    handle_id = %entry.handle_id,
                    database = %entry.label,
                    error = %e,
                    "Rollback failed"
                );
            })
        })
        .collect()
}

/// Roll back every open handle of the current thread.
pub fn auto_rollback() -> Result<(), DbError> {
    let entries = context::take_context();
    if entries.is_empty() {
        return Ok(());
    }

    let errors = rollback_each(&entries);
    context::release_entries(entries);

    if errors.is_empty() {
        debug!("Unit of work rolled back");
        Ok(())
    } else {
        Err(DbError::Rollback { errors })
    }
}

/// Rolls the unit of work back if the work panics.
struct PanicGuard;

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Err(e) = auto_rollback() {
                warn!(error = %e, "Rollback after panic failed");
            }
        }
    }
}

/// Run `work` as one unit of work.
///
/// On success every handle is committed and a commit failure is returned in
/// place of the result. On failure the unit is committed when `allowed`
/// accepts the error and rolled back otherwise; either way the work's own
/// error is returned unchanged and bookkeeping failures are only logged.
pub fn with_transaction<T, E, F, A>(work: F, allowed: A) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    A: Fn(&E) -> bool,
    E: From<DbError>,
{
    let guard = PanicGuard;
    let outcome = work();
    drop(guard);

    match outcome {
        Ok(value) => {
            auto_commit()?;
            Ok(value)
        }
        Err(err) => {
            let finished = if allowed(&err) {
                auto_commit()
            } else {
                auto_rollback()
            };
            if let Err(e) = finished {
                warn!(error = %e, "Failed to end unit of work after an error");
            }
            Err(err)
        }
    }
}

/// Error types that may carry a [`DbError`].
pub trait UnitOfWorkError: From<DbError> {
    fn as_db_error(&self) -> Option<&DbError>;
}

impl UnitOfWorkError for DbError {
    fn as_db_error(&self) -> Option<&DbError> {
        Some(self)
    }
}

/// Hooks into a web framework's error handling.
pub trait WebLayer<E> {
    /// Redirects end a request normally, so they commit.
    fn is_redirect(&self, err: &E) -> bool;

    /// The framework's 404 error, raised in place of `RowNotFound`.
    fn not_found(&self, err: E) -> E;
}

/// Run `work` as a request-scoped unit of work.
///
/// Behaves like [`with_transaction`] where only redirects reported by `web`
/// are allowed to commit. A `RowNotFound` failure becomes the web layer's
/// not-found error; without a web layer it propagates.
pub fn db_session<T, E, F>(web: Option<&dyn WebLayer<E>>, work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: UnitOfWorkError,
{
    let result = with_transaction(work, |err| web.is_some_and(|w| w.is_redirect(err)));
    match (result, web) {
        (Err(err), Some(web)) if matches!(err.as_db_error(), Some(DbError::RowNotFound)) => {
            Err(web.not_found(err))
        }
        (result, _) => result,
    }
}
