use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::{domain::attendance::{is_duplicate, AttendanceChange, AttendanceRecord}, model::store::SqliteStore, tools::clock::{from_millis, UtcDate}};

use super::super::Result;


const RECORD_QUERY: &str = "SELECT a.id, a.identity_id, i.display_name, a.timestamp FROM attendance AS a
    LEFT JOIN identities AS i ON a.identity_id = i.identity_id";

fn record_from_row(row: &Row) -> rusqlite::Result<AttendanceRecord> {
    let millis: i64 = row.get(3)?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        display_name: row.get(2)?,
        timestamp: from_millis(millis).unwrap_or_default(),
    })
}

/// Whether row `id` exists and was recorded inside `[from, to)`.
fn check_day(tx: &Transaction, id: i64, (from, to): (i64, i64)) -> rusqlite::Result<AttendanceChange> {
    let timestamp: Option<i64> = tx.query_row("SELECT timestamp FROM attendance WHERE id = ?1", [id], |row| row.get(0)).optional()?;
    Ok(match timestamp {
        None => AttendanceChange::Missing,
        Some(timestamp) if timestamp < from || timestamp >= to => AttendanceChange::OutsideDay,
        Some(_) => AttendanceChange::Applied,
    })
}


/// Attendance object store
impl SqliteStore {
    /// Appends a record unless the identity already has one inside the duplicate window.
    ///
    /// Check and insert share one immediate transaction so two concurrent calls cannot both pass.
    /// Returns `false` for a duplicate.
    pub async fn add_attendance(&self, identity_id: &str, now: UtcDate) -> Result<bool> {
        let id = identity_id.to_string();
        let connection = self.pool().get().await?;
        let accepted = connection.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let last: Option<i64> = tx.query_row(
                "SELECT MAX(timestamp) FROM attendance WHERE identity_id = ?1",
                [&id],
                |row| row.get::<_, Option<i64>>(0),
            ).optional()?.flatten();
            if is_duplicate(last.and_then(from_millis), now) {
                return Ok(false);
            }
            tx.execute("INSERT INTO attendance (identity_id, timestamp) VALUES (?1, ?2)", params![id, now.timestamp_millis()])?;
            tx.commit()?;
            Ok(true)
        }).await?;
        Ok(accepted)
    }

    /// Records newest first, joined with the identity name, optionally limited to `[from, to)` in millis.
    pub async fn get_attendance(&self, range: Option<(i64, i64)>) -> Result<Vec<AttendanceRecord>> {
        let connection = self.pool().get().await?;
        let records = connection.call(move |conn| {
            let (from, to) = range.unwrap_or((i64::MIN, i64::MAX));
            let mut query = conn.prepare(&format!("{} WHERE a.timestamp >= ?1 AND a.timestamp < ?2 ORDER BY a.timestamp DESC, a.id DESC", RECORD_QUERY))?;
            let rows = query.query_map(params![from, to], record_from_row)?;
            let records: Vec<AttendanceRecord> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        }).await?;
        Ok(records)
    }

    pub async fn get_attendance_record(&self, id: i64) -> Result<Option<AttendanceRecord>> {
        let connection = self.pool().get().await?;
        let record = connection.call(move |conn| {
            let record = conn.query_row(&format!("{} WHERE a.id = ?1", RECORD_QUERY), [id], record_from_row).optional()?;
            Ok(record)
        }).await?;
        Ok(record)
    }

    /// Reassigns record `id` to `identity_id`, and moves it to `timestamp` when given.
    /// Only applied when the stored record lies inside `day` (`[from, to)` in millis).
    pub async fn update_attendance(&self, id: i64, identity_id: &str, timestamp: Option<UtcDate>, day: (i64, i64)) -> Result<AttendanceChange> {
        let identity_id = identity_id.to_string();
        let timestamp = timestamp.map(|t| t.timestamp_millis());
        let connection = self.pool().get().await?;
        let change = connection.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let change = check_day(&tx, id, day)?;
            if change == AttendanceChange::Applied {
                tx.execute("UPDATE attendance SET identity_id = ?1, timestamp = COALESCE(?2, timestamp) WHERE id = ?3", params![identity_id, timestamp, id])?;
                tx.commit()?;
            }
            Ok(change)
        }).await?;
        Ok(change)
    }

    /// Deletes record `id` when it lies inside `day`.
    pub async fn delete_attendance(&self, id: i64, day: (i64, i64)) -> Result<AttendanceChange> {
        let connection = self.pool().get().await?;
        let change = connection.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let change = check_day(&tx, id, day)?;
            if change == AttendanceChange::Applied {
                tx.execute("DELETE FROM attendance WHERE id = ?1", [id])?;
                tx.commit()?;
            }
            Ok(change)
        }).await?;
        Ok(change)
    }
}
