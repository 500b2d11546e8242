pub mod identities;
pub mod attendance;

use tokio_rusqlite::Connection;

use crate::tools::log::{log_info, LogServiceType};

use super::Result;


pub async fn migrate_database(connection: &Connection) -> Result<usize> {
    let version = connection.call( |conn| {
        let version = conn.query_row(
            "SELECT user_version FROM pragma_user_version;",
            [],
            |row| {
                let version: usize = row.get(0)?;
                Ok(version)
            })?;

            if version < 1 {
                let initial = String::from_utf8_lossy(include_bytes!("001 - INITIAL.sql"));
                conn.execute_batch(&initial)?;

                conn.pragma_update(None, "user_version", 1)?;
            }

            Ok(version)
    }).await?;

    if version < 1 {
        log_info(LogServiceType::Database, "Update SQL to version 1".to_string());
    }
    Ok(version)
}
