//! Capture spec database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::database::time::now_ms;
use crate::domain::CaptureSpec;

/// Stored capture spec, keyed by `(name, capture_type)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CaptureSpecDbModel {
    pub name: String,
    pub capture_type: String,
    /// JSON-encoded [`CaptureSpec`].
    pub spec: String,
    pub active: bool,
    pub updated_at: i64,
}

impl CaptureSpecDbModel {
    pub fn from_spec(spec: &CaptureSpec) -> Result<Self> {
        Ok(Self {
            name: spec.name.clone(),
            capture_type: spec.capture_type.clone(),
            spec: serde_json::to_string(spec)?,
            active: true,
            updated_at: now_ms(),
        })
    }

    /// Decode the stored JSON.
    ///
    /// The row's key columns win over whatever the JSON says.
    pub fn to_spec(&self) -> Result<CaptureSpec> {
        let mut spec: CaptureSpec = serde_json::from_str(&self.spec)?;
        spec.name.clone_from(&self.name);
        spec.capture_type.clone_from(&self.capture_type);
        Ok(spec)
    }
}
