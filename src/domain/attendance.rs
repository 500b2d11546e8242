use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DUPLICATE_WINDOW_SECONDS: i64 = 5 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub identity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceForAdd {
    pub identity_id: String,
}

/// Correction of an existing record. Without `timestamp` the recorded time is kept.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceForUpdate {
    pub identity_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of an edit or delete of one record, only records of the current day may change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttendanceChange {
    Applied,
    Missing,
    OutsideDay,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AttendanceQuery {
    /// UTC day, `YYYY-MM-DD`
    pub date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceOutcome {
    pub success: bool,
    pub message: String,
}

impl AttendanceOutcome {
    pub fn logged() -> Self {
        Self { success: true, message: "Attendance logged".to_string() }
    }
    pub fn duplicate() -> Self {
        Self { success: false, message: "Duplicate prevented".to_string() }
    }
}

/// True when a new record at `now` would land inside the duplicate window of `last`.
pub fn is_duplicate(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last {
        Some(last) => now.signed_duration_since(last).num_milliseconds() < DUPLICATE_WINDOW_SECONDS * 1000,
        None => false,
    }
}
