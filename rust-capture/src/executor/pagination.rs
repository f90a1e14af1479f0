//! Pagination continuation detection.
//!
//! A detector inspects a parsed response and, when more data follows,
//! returns the work item for the next page.

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::domain::WorkItem;

pub trait PaginationDetector: Send + Sync {
    fn name(&self) -> &str;

    fn next_page(&self, body: &Value, current: &WorkItem) -> Option<WorkItem>;
}

/// Registry of pagination detectors, built once at startup.
#[derive(Default)]
pub struct PaginationRegistry {
    detectors: Vec<Arc<dyn PaginationDetector>>,
}

impl PaginationRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Registry with the built-in detectors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LinksNext));
        registry.register(Arc::new(NoPagination));
        registry
    }

    /// Register a detector. A later registration under the same name wins.
    pub fn register(&mut self, detector: Arc<dyn PaginationDetector>) {
        self.detectors.retain(|d| d.name() != detector.name());
        self.detectors.push(detector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PaginationDetector>> {
        self.detectors.iter().find(|d| d.name() == name).cloned()
    }
}

/// Follows `links: [{rel: "next", href}]`, as used by parliamentary open
/// data APIs.
pub struct LinksNext;

impl PaginationDetector for LinksNext {
    fn name(&self) -> &str {
        "links_next"
    }

    fn next_page(&self, body: &Value, current: &WorkItem) -> Option<WorkItem> {
        body.get("links")?
            .as_array()?
            .iter()
            .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))
            .and_then(|link| link.get("href"))
            .and_then(Value::as_str)
            .filter(|href| !href.is_empty())
            .map(|href| current.next_page(resolve(current.address.as_str(), href)))
    }
}

/// Resolve a possibly relative link against the page it was found on.
fn resolve(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// Never continues.
pub struct NoPagination;

impl PaginationDetector for NoPagination {
    fn name(&self) -> &str {
        "none"
    }

    fn next_page(&self, _body: &Value, _current: &WorkItem) -> Option<WorkItem> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Address;
    use serde_json::json;

    fn item() -> WorkItem {
        WorkItem {
            spec_name: "camara-votacoes".into(),
            address: Address::classify("https://api/votacoes?pagina=1"),
            bucket: "b".into(),
            destination: "votacoes/v.json".into(),
            data_type: Default::default(),
            fields: Default::default(),
            headers: Default::default(),
            params: Default::default(),
            pagination: Some("links_next".into()),
            dedup: None,
            aux_data: Default::default(),
            page: 1,
        }
    }

    #[test]
    fn test_links_next() {
        let body = json!({"dados": [], "links": [
            {"rel": "self", "href": "https://api/votacoes?pagina=1"},
            {"rel": "next", "href": "https://api/votacoes?pagina=2"},
            {"rel": "last", "href": "https://api/votacoes?pagina=9"}
        ]});

        let next = LinksNext.next_page(&body, &item()).unwrap();
        assert_eq!(next.address.as_str(), "https://api/votacoes?pagina=2");
        assert_eq!(next.destination, "votacoes/v_p2.json");
    }

    #[test]
    fn test_relative_next_link() {
        let body = json!({"links": [{"rel": "next", "href": "/votacoes?pagina=3"}]});
        let next = LinksNext.next_page(&body, &item()).unwrap();
        assert_eq!(next.address.as_str(), "https://api/votacoes?pagina=3");
    }

    #[test]
    fn test_links_without_next() {
        let body = json!({"links": [{"rel": "self", "href": "x"}]});
        assert!(LinksNext.next_page(&body, &item()).is_none());
        assert!(LinksNext.next_page(&json!({"dados": []}), &item()).is_none());
        assert!(LinksNext.next_page(&json!([1]), &item()).is_none());
    }

    #[test]
    fn test_registry() {
        let registry = PaginationRegistry::with_defaults();
        assert!(registry.get("links_next").is_some());
        assert!(registry.get("none").unwrap().next_page(&json!({}), &item()).is_none());
        assert!(registry.get("cursor").is_none());
    }
}
