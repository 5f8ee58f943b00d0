//! Per-thread execution context registry.
//!
//! Every thread that touches a [`Database`] gets its own execution context:
//! a map from database handle to the connection that thread uses for it.
//! The first operation on a handle opens a connection and stamps it with the
//! next acquisition sequence number. Connections are never shared between
//! threads, so the work a thread does through several handles forms one unit
//! of work that the transaction coordinator commits or rolls back as a whole.
//! A thread that exits with its unit of work still open has its connections
//! released when its thread-locals are torn down.

use crate::db::Database;
use crate::db::provider::{Connection, Provider};
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};
use uuid::Uuid;

/// A connection owned by one thread's execution context.
pub type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// Lock a connection. A panic mid-statement leaves the connection usable
/// for rollback, so poisoning is ignored.
pub(crate) fn lock_connection(connection: &SharedConnection) -> MutexGuard<'_, Box<dyn Connection>> {
    connection.lock().unwrap_or_else(|e| e.into_inner())
}

/// One open handle in an execution context.
pub(crate) struct ContextEntry {
    pub(crate) handle_id: Uuid,
    pub(crate) label: String,
    pub(crate) connection: SharedConnection,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) sequence: u64,
    pub(crate) acquired_at: DateTime<Utc>,
}

impl ContextEntry {
    pub(crate) fn commit(&self) -> DbResult<()> {
        lock_connection(&self.connection)
            .commit()
            .map_err(DbError::from)
    }

    pub(crate) fn rollback(&self) -> DbResult<()> {
        lock_connection(&self.connection)
            .rollback()
            .map_err(DbError::from)
    }

    /// Hand the connection back to its provider.
    pub(crate) fn release(self) -> DbResult<()> {
        let Self {
            handle_id,
            connection,
            provider,
            ..
        } = self;
        match Arc::try_unwrap(connection) {
            Ok(mutex) => {
                let connection = mutex.into_inner().unwrap_or_else(|e| e.into_inner());
                provider.release(connection).map_err(DbError::from)?;
                debug!(handle_id = %handle_id, provider = provider.name(), "Connection released");
                Ok(())
            }
            Err(_) => {
                // Still borrowed by an operation on this thread; the last
                // user drops it.
                warn!(handle_id = %handle_id, "Connection released while in use");
                Ok(())
            }
        }
    }
}

/// Metadata about an open handle (for listing without consuming).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HandleMetadata {
    pub handle_id: Uuid,
    pub label: String,
    pub provider: String,
    /// Acquisition order within the thread's unit of work
    pub sequence: u64,
    pub acquired_at: DateTime<Utc>,
    /// Seconds since the connection was acquired
    pub duration_secs: i64,
}

#[derive(Default)]
struct ExecutionContext {
    entries: HashMap<Uuid, ContextEntry>,
    next_sequence: u64,
}

static REGISTRY: LazyLock<Mutex<HashMap<ThreadId, ExecutionContext>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<ThreadId, ExecutionContext>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reclaims a thread's context when the thread exits with its unit of work
/// still open. The thread id is captured while the thread is alive, since
/// `thread::current()` is unavailable during thread-local teardown.
struct ContextReaper(ThreadId);

impl Drop for ContextReaper {
    fn drop(&mut self) {
        let entries = take_context_of(self.0);
        if entries.is_empty() {
            return;
        }
        // Releasing abandons the open transactions; providers roll them back.
        warn!(
            handles = entries.len(),
            "Thread exited with open connections, releasing them"
        );
        release_entries(entries);
    }
}

thread_local! {
    static REAPER: ContextReaper = ContextReaper(thread::current().id());
}

/// The current thread's connection for `db`, opening one on first use.
pub fn get_or_create_connection(db: &Database) -> DbResult<SharedConnection> {
    let thread_id = thread::current().id();

    if let Some(entry) = registry()
        .get(&thread_id)
        .and_then(|ctx| ctx.entries.get(&db.id()))
    {
        return Ok(Arc::clone(&entry.connection));
    }

    // Opening may block on the pool, so it happens outside the registry lock.
    // Only this thread inserts into its own context, so nobody can race us.
    let provider = Arc::clone(db.provider());
    let connection: SharedConnection = Arc::new(Mutex::new(provider.connect()?));

    let mut registry = registry();
    let ctx = registry.entry(thread_id).or_default();
    let sequence = ctx.next_sequence;
    ctx.next_sequence += 1;
    ctx.entries.insert(
        db.id(),
        ContextEntry {
            handle_id: db.id(),
            label: db.label().to_string(),
            connection: Arc::clone(&connection),
            provider,
            sequence,
            acquired_at: Utc::now(),
        },
    );

    drop(registry);
    // Touching the reaper registers its destructor for this thread. It fails
    // only while the thread is already tearing down.
    let _ = REAPER.try_with(|_| ());

    debug!(
        handle_id = %db.id(),
        database = %db.label(),
        sequence,
        "Connection acquired"
    );

    Ok(connection)
}

/// Release the current thread's connection for `db`. No-op if it has none.
pub fn release(db: &Database) -> DbResult<()> {
    let thread_id = thread::current().id();
    let entry = {
        let mut registry = registry();
        let Some(ctx) = registry.get_mut(&thread_id) else {
            return Ok(());
        };
        let entry = ctx.entries.remove(&db.id());
        if ctx.entries.is_empty() {
            registry.remove(&thread_id);
        }
        entry
    };
    match entry {
        Some(entry) => entry.release(),
        None => Ok(()),
    }
}

/// Remove the current thread's whole context, entries ordered by sequence.
pub(crate) fn take_context() -> Vec<ContextEntry> {
    take_context_of(thread::current().id())
}

fn take_context_of(thread_id: ThreadId) -> Vec<ContextEntry> {
    let ctx = registry().remove(&thread_id);
    let mut entries: Vec<ContextEntry> = ctx
        .map(|ctx| ctx.entries.into_values().collect())
        .unwrap_or_default();
    entries.sort_by_key(|entry| entry.sequence);
    entries
}

/// Release taken entries to their providers. Failures are logged and
/// returned in order.
pub(crate) fn release_entries(entries: Vec<ContextEntry>) -> Vec<DbError> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let handle_id = entry.handle_id;
            entry.release().err().inspect(|e| {
                warn!(handle_id = %handle_id, error = %e, "Failed to release connection");
            })
        })
        .collect()
}

/// Release every connection of the current thread and clear its context.
///
/// Open transactions are abandoned; providers roll them back. Every entry is
/// released even if some fail; the first failure is returned.
pub fn release_all() -> DbResult<()> {
    match release_entries(take_context()).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Handles the current thread has open, in acquisition order.
pub fn open_handles() -> Vec<HandleMetadata> {
    let thread_id = thread::current().id();
    let now = Utc::now();
    let registry = registry();
    let mut handles: Vec<HandleMetadata> = registry
        .get(&thread_id)
        .map(|ctx| {
            ctx.entries
                .values()
                .map(|entry| HandleMetadata {
                    handle_id: entry.handle_id,
                    label: entry.label.clone(),
                    provider: entry.provider.name().to_string(),
                    sequence: entry.sequence,
                    acquired_at: entry.acquired_at,
                    duration_secs: (now - entry.acquired_at).num_seconds(),
                })
                .collect()
        })
        .unwrap_or_default();
    handles.sort_by_key(|h| h.sequence);
    handles
}

/// Number of handles the current thread has open.
pub fn open_count() -> usize {
    let thread_id = thread::current().id();
    registry()
        .get(&thread_id)
        .map_or(0, |ctx| ctx.entries.len())
}

/// True if the current thread has an open connection for `db`.
pub fn is_open(db: &Database) -> bool {
    let thread_id = thread::current().id();
    registry()
        .get(&thread_id)
        .is_some_and(|ctx| ctx.entries.contains_key(&db.id()))
}
