//! Dedup bookkeeping models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Failed capture attempts for one identifier.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CaptureAttemptDbModel {
    pub namespace: String,
    pub identifier: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

/// An identifier that exhausted its capture attempts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeadLetterDbModel {
    pub namespace: String,
    pub identifier: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
}
