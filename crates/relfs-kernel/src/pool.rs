//! Bounded pool of SQLite connections.
//!
//! Every query runs on a blocking worker with a checked-out connection. A
//! semaphore bounds how many run at once; callers wait for a permit up to the
//! acquire timeout. Each call carries its own deadline: when it passes, the
//! running statement is interrupted and the caller gets [`BackendError::Timeout`].
//!
//! The blocking task hands its connection back to the pool itself, so a caller
//! that stops waiting (timeout or a dropped future) never strands a connection
//! or leaves a statement pending on it.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::DatabaseConfig;
use crate::quote::{quote_identifier, quote_literal};

/// Errors from the database layer.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("connection pool closed")]
    Closed,

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error("database config: {0}")]
    Config(String),
}

impl BackendError {
    /// True when the statement referenced a schema, table or column that no
    /// longer exists. Navigation treats this as "not found" rather than an
    /// outage: the catalog changed between two calls.
    pub fn is_missing_object(&self) -> bool {
        match self {
            BackendError::Sqlite(e) => {
                let msg = e.to_string();
                msg.contains("no such table")
                    || msg.contains("no such column")
                    || msg.contains("unknown database")
            }
            _ => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A fixed set of connections opened against the same main database with the
/// same attachments.
pub struct ConnectionPool {
    idle: Arc<Mutex<Vec<Connection>>>,
    permits: Arc<Semaphore>,
    size: usize,
    query_timeout: Duration,
    acquire_timeout: Duration,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl ConnectionPool {
    /// Open `pool_size` connections and attach every configured database to
    /// each of them.
    ///
    /// Failure here means the database is unreachable; the caller should not
    /// mount.
    pub fn open(config: &DatabaseConfig) -> BackendResult<Self> {
        if config.pool_size == 0 {
            return Err(BackendError::Config("pool_size must be at least 1".into()));
        }

        let mut conns = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            conns.push(Self::connect(config)?);
        }

        tracing::info!(
            path = %config.path.display(),
            pool_size = config.pool_size,
            attachments = config.attach.len(),
            "opened connection pool"
        );

        Ok(Self {
            idle: Arc::new(Mutex::new(conns)),
            permits: Arc::new(Semaphore::new(config.pool_size)),
            size: config.pool_size,
            query_timeout: config.query_timeout(),
            acquire_timeout: config.acquire_timeout(),
        })
    }

    fn connect(config: &DatabaseConfig) -> BackendResult<Connection> {
        let conn = Connection::open_with_flags(&config.path, OpenFlags::default())?;
        conn.busy_timeout(config.busy_timeout())?;

        for attachment in &config.attach {
            let path = attachment.path.to_str().ok_or_else(|| {
                BackendError::Config(format!(
                    "attachment {} has a non UTF-8 path",
                    attachment.name
                ))
            })?;
            conn.execute_batch(&format!(
                "ATTACH DATABASE {} AS {}",
                quote_literal(path),
                quote_identifier(&attachment.name)
            ))?;
        }

        Ok(conn)
    }

    /// Number of connections in the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` against a pooled connection on a blocking worker.
    pub async fn run<T, F>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| BackendError::PoolExhausted)?
        .map_err(|_| BackendError::Closed)?;

        let conn = self.idle.lock().pop().ok_or(BackendError::PoolExhausted)?;
        let interrupt = conn.get_interrupt_handle();
        let running = Arc::new(Mutex::new(true));

        let idle = Arc::clone(&self.idle);
        let task_running = Arc::clone(&running);
        let task = tokio::task::spawn_blocking(move || {
            // The connection goes back before the permit is released, even
            // when `f` panics; the panic then surfaces as a join error.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&conn)));
            *task_running.lock() = false;
            idle.lock().push(conn);
            drop(permit);
            outcome.unwrap_or_else(|payload| panic::resume_unwind(payload))
        });

        match tokio::time::timeout(self.query_timeout, task).await {
            Ok(Ok(result)) => result.map_err(BackendError::from),
            Ok(Err(join)) => Err(BackendError::Join(join.to_string())),
            Err(_) => {
                // Holding the flag keeps the connection from being handed to
                // another caller while it is interrupted.
                let still_running = running.lock();
                if *still_running {
                    interrupt.interrupt();
                }
                tracing::warn!(timeout = ?self.query_timeout, "query interrupted");
                Err(BackendError::Timeout(self.query_timeout))
            }
        }
    }
}
