/// Identifiers handed to us by the orchestration layer are BIGSERIAL keys.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
