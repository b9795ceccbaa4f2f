use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {ms}")))
}

pub(crate) fn opt_from_millis(ms: Option<i64>) -> StorageResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

/// Current time truncated to the stored precision.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
