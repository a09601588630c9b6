/// All user primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Generation tasks and images are keyed by UUID v7.
pub type TaskId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
