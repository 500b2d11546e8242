use std::{ops::Deref, path::Path, sync::{Arc, Mutex}, time::Duration};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rusqlite::Connection;

use crate::{model::error::{Error, Result}, tools::log::{log_info, LogServiceType}};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct PoolInner {
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

/// Fixed size pool of SQLite connections. Checkout waits for a free permit.
#[derive(Clone)]
pub struct SqlitePool {
    inner: Arc<PoolInner>,
}

impl SqlitePool {
    pub async fn open(path: &Path, size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let connection = Connection::open(path).await.map_err(|_| Error::CannotOpenDatabase)?;
            connection.call(|conn| {
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
                Ok(())
            }).await?;
            connections.push(connection);
        }
        log_info(LogServiceType::Database, format!("Opened {} connection(s) to {:?}", size, path));
        Ok(Self::from_connections(connections))
    }

    /// Single connection: every in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().await.map_err(|_| Error::CannotOpenDatabase)?;
        Ok(Self::from_connections(vec![connection]))
    }

    fn from_connections(connections: Vec<Connection>) -> Self {
        let size = connections.len();
        Self {
            inner: Arc::new(PoolInner { idle: Mutex::new(connections), permits: Arc::new(Semaphore::new(size)) }),
        }
    }

    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub async fn get(&self) -> Result<PooledConnection> {
        let permit = self.inner.permits.clone().acquire_owned().await.map_err(|_| Error::PoolClosed)?;
        let connection = self.inner.idle.lock().map_err(|_| Error::PoolClosed)?.pop().ok_or(Error::PoolClosed)?;
        Ok(PooledConnection { connection, pool: self.inner.clone(), _permit: permit })
    }
}

/// Connection checked out of a [`SqlitePool`], handed back on drop.
pub struct PooledConnection {
    connection: Connection,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // the permit field drops after this body, so the connection is back before a waiter wakes
        if let Ok(mut idle) = self.pool.idle.lock() {
            idle.push(self.connection.clone());
        }
    }
}
