//! Small SQLite connection pool.
//!
//! SQLite in WAL mode handles concurrent readers plus one writer, so a pool
//! of real connections (rather than one Mutex-guarded connection) keeps
//! long-running scans from stalling unrelated work. Acquisition is bounded:
//! when all connections are busy past the timeout the caller gets
//! `PoolExhausted` instead of a hang.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{Result, StoreError};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

impl Pool {
    /// Open a pool against `path`, pre-opening `min` connections and allowing
    /// up to `max` concurrently checked-out.
    pub fn open(path: impl AsRef<Path>, min: usize, max: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let max = max.max(1);
        let min = min.min(max);

        let mut idle = Vec::with_capacity(min);
        for _ in 0..min {
            idle.push(open_connection(&path)?);
        }
        debug!(path = %path.display(), min, max, "store pool opened");

        Ok(Self {
            inner: Arc::new(PoolInner {
                path,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(max)),
            }),
        })
    }

    /// Check out a connection. Waits up to the acquire timeout, then fails
    /// with [`StoreError::PoolExhausted`].
    pub async fn acquire(&self) -> Result<PooledConn> {
        let permit = tokio::time::timeout(
            ACQUIRE_TIMEOUT,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::PoolExhausted)?
        .map_err(|_| StoreError::PoolExhausted)?;

        let existing = self.inner.idle.lock().unwrap().pop();
        let conn = match existing {
            Some(c) => c,
            None => open_connection(&self.inner.path)?,
        };

        Ok(PooledConn {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// A checked-out connection. Returns to the idle set on drop.
pub struct PooledConn {
    conn: Option<Connection>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn").finish_non_exhaustive()
    }
}

impl std::ops::Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl std::ops::DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.idle.lock().unwrap().push(conn);
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("t.db"), 1, 2).unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);

        // Both connections returned; a third acquire succeeds immediately.
        let c = pool.acquire().await.unwrap();
        c.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("t.db"), 1, 1).unwrap();

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, StoreError::PoolExhausted));
        drop(held);
    }
}
