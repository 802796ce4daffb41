use tracing::info;

use crate::error::Result;
use crate::pool::{Pool, PooledConn};
use crate::schema;

/// Handle to the agent's database. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Open the store and run the (idempotent) schema migration.
    pub async fn open(path: &str, pool_min: usize, pool_max: usize) -> Result<Self> {
        let pool = Pool::open(path, pool_min, pool_max)?;
        let store = Self { pool };
        {
            let conn = store.conn().await?;
            schema::init_db(&conn)?;
        }
        info!(path, "store opened");
        Ok(store)
    }

    pub(crate) async fn conn(&self) -> Result<PooledConn> {
        self.pool.acquire().await
    }

    pub(crate) fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// On-disk store in a temp dir — one per test, dropped with the dir.
    pub async fn open_test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap(), 1, 4).await.unwrap();
        (dir, store)
    }
}
