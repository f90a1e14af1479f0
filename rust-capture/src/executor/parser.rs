//! Response parsers for sources whose bodies are not plain JSON or XML.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::transform::Record;
use crate::{Error, Result};

/// Turns a raw response body into records.
pub trait ResponseParser: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, body: &[u8], address: &str) -> Result<Vec<Record>>;
}

/// Registry of response parsers, built once at startup.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn ResponseParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registry with the built-in parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NdjsonParser));
        registry.register(Arc::new(TextParser));
        registry
    }

    /// Register a parser. A later registration under the same name wins.
    pub fn register(&mut self, parser: Arc<dyn ResponseParser>) {
        self.parsers.retain(|p| p.name() != parser.name());
        self.parsers.push(parser);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResponseParser>> {
        self.parsers.iter().find(|p| p.name() == name).cloned()
    }
}

/// One record per non-empty line of newline-delimited JSON.
pub struct NdjsonParser;

impl ResponseParser for NdjsonParser {
    fn name(&self) -> &str {
        "ndjson"
    }

    fn parse(&self, body: &[u8], _address: &str) -> Result<Vec<Record>> {
        body.split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .enumerate()
            .map(|(n, line)| match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(Error::application(None, format!("line {} is not an object", n + 1))),
                Err(e) => Err(Error::application(None, format!("line {}: {e}", n + 1))),
            })
            .collect()
    }
}

/// The whole body as a single `{"text": ...}` record, for documents that
/// are archived as-is (HTML articles, plain text).
pub struct TextParser;

impl ResponseParser for TextParser {
    fn name(&self) -> &str {
        "text"
    }

    fn parse(&self, body: &[u8], _address: &str) -> Result<Vec<Record>> {
        let mut record = Map::new();
        record.insert(
            "text".into(),
            Value::String(String::from_utf8_lossy(body).into_owned()),
        );
        Ok(vec![record])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndjson() {
        let records = NdjsonParser
            .parse(b"{\"a\":1}\n\n{\"a\":2}\n", "u")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], 2);

        assert!(NdjsonParser.parse(b"[1]", "u").is_err());
    }

    #[test]
    fn test_text() {
        let records = TextParser.parse("<p>olá</p>".as_bytes(), "u").unwrap();
        assert_eq!(records[0]["text"], "<p>olá</p>");
    }

    #[test]
    fn test_registry() {
        let registry = ParserRegistry::with_defaults();
        assert!(registry.get("ndjson").is_some());
        assert!(registry.get("text").is_some());
        assert!(registry.get("html").is_none());
    }
}
