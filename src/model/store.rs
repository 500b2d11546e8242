use std::path::Path;

use crate::model::store::sql::migrate_database;
use crate::tools::log::{log_info, LogServiceType};

use self::pool::SqlitePool;

use super::error::{Result, Error};

pub mod pool;
pub mod sql;


#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

// Constructor
impl SqliteStore {
	pub async fn new(db_path: &Path, pool_size: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| Error::CannotOpenDatabase)?;
        }
        let pool = SqlitePool::open(db_path, pool_size).await?;
        Self::with_pool(pool).await
	}

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::in_memory().await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let connection = pool.get().await?;
        let version = migrate_database(&connection).await?;
        log_info(LogServiceType::Database, format!("Current Database version: {}", version));
        drop(connection);
		Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
