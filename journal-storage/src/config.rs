use serde::{Deserialize, Serialize};

/// Resource caps for the journal database.
///
/// DuckDB defaults to most of system RAM and every core, far more than a
/// journal needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// DuckDB `memory_limit` value, e.g. `"256MB"`.
    pub memory_limit: String,
    pub threads: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_limit: "256MB".to_string(),
            threads: 2,
        }
    }
}
