//! Dedup value objects.

use serde::{Deserialize, Serialize};

/// Per-spec dedup configuration.
///
/// Items expanded from a spec that carries a policy get a [`DedupKey`]
/// built from the namespace and the item's address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupPolicy {
    /// Namespace the identifiers are tracked under.
    pub namespace: String,
    /// Clear the namespace once per local day.
    #[serde(default)]
    pub daily_reset: bool,
}

/// Identifier of one externally captured entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub namespace: String,
    pub identifier: String,
}

impl DedupKey {
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}
