//! Work items: concrete fetch targets produced by expansion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::capture_spec::{CaptureSpec, DataType, FieldSelection};
use super::value_objects::DedupKey;

/// Where a work item is fetched from.
///
/// Anything that does not look like a network URL is kept as an opaque
/// identifier and is only understood by a source-specific fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Address {
    Url(String),
    Identifier(String),
}

impl Address {
    /// Classify a raw address string.
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with("http") || raw.starts_with("ftp") {
            Self::Url(raw)
        } else {
            Self::Identifier(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(s) | Self::Identifier(s) => s,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, Self::Url(_))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete fetch target.
///
/// Carries everything the executor needs so a step never has to reload
/// the capture spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub spec_name: String,
    pub address: Address,
    pub bucket: String,
    /// Destination key, unique within a queue.
    pub destination: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub fields: FieldSelection,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub pagination: Option<String>,
    #[serde(default)]
    pub dedup: Option<DedupKey>,
    /// Data produced by expansion (the date, row or list element behind this item).
    #[serde(default)]
    pub aux_data: serde_json::Map<String, serde_json::Value>,
    /// 1-based page number while following pagination.
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

impl WorkItem {
    /// Build an item for `spec`, inheriting its storage and processing metadata.
    pub fn from_spec(
        spec: &CaptureSpec,
        address: impl Into<String>,
        file_name: &str,
        aux_data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let address = Address::classify(address);
        let dedup = spec
            .dedup
            .as_ref()
            .map(|policy| DedupKey::new(policy.namespace.clone(), address.as_str()));

        Self {
            spec_name: spec.name.clone(),
            address,
            bucket: spec.bucket.clone(),
            destination: format!("{}{}", spec.key, file_name),
            data_type: spec.data_type.clone(),
            fields: spec.fields.clone(),
            headers: spec.headers.clone(),
            params: spec.params.clone(),
            pagination: spec.pagination.clone(),
            dedup,
            aux_data,
            page: 1,
        }
    }

    /// The item for the following page of this item's response.
    ///
    /// The continuation keeps the queue slot of the original item, writes to
    /// a page-suffixed destination, and is not dedup-tracked on its own.
    pub fn next_page(&self, address: impl Into<String>) -> Self {
        let page = self.page + 1;
        let destination = match self.destination.rsplit_once('.') {
            Some((stem, ext)) if !ext.contains('/') => format!("{stem}_p{page}.{ext}"),
            _ => format!("{}_p{page}", self.destination),
        };

        Self {
            address: Address::classify(address),
            destination,
            dedup: None,
            page,
            // Query params belong to the first request; continuation links carry their own.
            params: BTreeMap::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DedupPolicy, ParameterSpec};

    fn spec() -> CaptureSpec {
        CaptureSpec {
            name: "camara-proposicoes".into(),
            capture_type: "daily".into(),
            url: "https://api/{id}".into(),
            bucket: "brutos".into(),
            key: "camara/proposicoes/".into(),
            data_type: DataType::Json,
            fields: FieldSelection::default(),
            headers: BTreeMap::new(),
            params: BTreeMap::from([("itens".to_string(), "100".to_string())]),
            parallel_batches: 1,
            dedup: Some(DedupPolicy {
                namespace: "proposicoes".into(),
                daily_reset: false,
            }),
            depends_on: None,
            pagination: Some("links_next".into()),
            parameters: vec![ParameterSpec::Static],
        }
    }

    #[test]
    fn test_address_classification() {
        assert!(Address::classify("https://x").is_url());
        assert!(Address::classify("ftp://x").is_url());
        assert!(!Address::classify("2019-01-01_s1_some-article").is_url());
    }

    #[test]
    fn test_from_spec_inherits_metadata() {
        let item = WorkItem::from_spec(&spec(), "https://api/7", "camara-proposicoes_7.json", Default::default());

        assert_eq!(item.destination, "camara/proposicoes/camara-proposicoes_7.json");
        assert_eq!(item.bucket, "brutos");
        assert_eq!(item.dedup, Some(DedupKey::new("proposicoes", "https://api/7")));
        assert_eq!(item.pagination.as_deref(), Some("links_next"));
        assert_eq!(item.page, 1);
    }

    #[test]
    fn test_next_page() {
        let item = WorkItem::from_spec(&spec(), "https://api/7", "p.json", Default::default());
        let next = item.next_page("https://api/7?pagina=2");

        assert_eq!(next.destination, "camara/proposicoes/p_p2.json");
        assert_eq!(next.page, 2);
        assert!(next.dedup.is_none());
        assert!(next.params.is_empty());
        assert_eq!(next.address.as_str(), "https://api/7?pagina=2");

        let third = next.next_page("https://api/7?pagina=3");
        assert_eq!(third.destination, "camara/proposicoes/p_p2_p3.json");
    }
}
