//! Response decoding and field selection.

use std::collections::HashSet;

use bytes::Bytes;
use serde_json::{Map, Value};

use super::parser::ParserRegistry;
use super::xml::xml_to_json;
use crate::domain::{DataType, FieldSelection};
use crate::{Error, Result};

/// Field holding the address the record was fetched from.
pub const API_URL_FIELD: &str = "api_url";
/// Field holding the local capture time.
pub const CAPTURE_DATE_FIELD: &str = "capture_date";
/// Format of [`CAPTURE_DATE_FIELD`].
pub const CAPTURE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type Record = Map<String, Value>;

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A document tree that field selection applies to.
    Tree(Value),
    /// Records produced directly by a response parser.
    Records(Vec<Record>),
}

impl Decoded {
    /// The document tree, when there is one to inspect for pagination.
    pub fn tree(&self) -> Option<&Value> {
        match self {
            Self::Tree(value) => Some(value),
            Self::Records(_) => None,
        }
    }
}

/// Decode `body` according to the item's data type.
pub fn decode(
    body: &[u8],
    data_type: &DataType,
    parsers: &ParserRegistry,
    address: &str,
) -> Result<Decoded> {
    match data_type {
        DataType::Json => serde_json::from_slice(body)
            .map(Decoded::Tree)
            .map_err(|e| Error::application(None, format!("malformed JSON: {e}"))),
        DataType::Xml => xml_to_json(body).map(Decoded::Tree),
        DataType::Module(name) => {
            let parser = parsers.get(name).ok_or_else(|| {
                Error::config(format!("unknown response parser '{name}'"))
            })?;
            parser.parse(body, address).map(Decoded::Records)
        }
    }
}

/// Walk `path` into `tree`. Array steps take numeric keys.
pub fn select_path<'a>(tree: &'a Value, path: &[String]) -> Result<&'a Value> {
    let mut node = tree;
    for key in path {
        let next = match node {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        node = next.ok_or_else(|| {
            Error::application(None, format!("response has no data at path {path:?} (missing '{key}')"))
        })?;
    }
    Ok(node)
}

/// Records at the selected node: an array of objects, a single object, or
/// nothing for `null`.
pub fn as_records(node: &Value) -> Result<Vec<Record>> {
    match node {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![map.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(Error::application(
                    None,
                    format!("expected a list of objects, found element {other}"),
                )),
            })
            .collect(),
        other => Err(Error::application(
            None,
            format!("expected records at data path, found {other}"),
        )),
    }
}

/// Remove `keys` at every object depth. Arrays are left as they are.
pub fn exclude_keys(record: Record, keys: &HashSet<&str>) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| !keys.contains(key.as_str()))
        .map(|(key, value)| match value {
            Value::Object(inner) => (key, Value::Object(exclude_keys(inner, keys))),
            other => (key, other),
        })
        .collect()
}

/// Promote child records found at `records_keys` to the top level. Each
/// child inherits the parent's keys except the ones naming the path.
/// Parents without records at the path are dropped.
pub fn promote_records(records: Vec<Record>, records_keys: &[String]) -> Vec<Record> {
    let mut promoted = Vec::new();

    for parent in records {
        let mut node = Some(Value::Object(parent.clone()));
        for key in records_keys {
            node = node.and_then(|n| match n {
                Value::Object(mut map) => map.remove(key),
                _ => None,
            });
        }

        let children = match node {
            Some(Value::Array(children)) => children,
            Some(Value::Object(child)) => vec![Value::Object(child)],
            _ => continue,
        };

        for child in children {
            let Value::Object(mut child) = child else {
                continue;
            };
            for (key, value) in &parent {
                if !records_keys.contains(key) {
                    child.insert(key.clone(), value.clone());
                }
            }
            promoted.push(child);
        }
    }

    promoted
}

/// Add the originating address and capture time to every record.
pub fn annotate(records: &mut [Record], address: &str, capture_date: &str) {
    for record in records {
        record.insert(API_URL_FIELD.into(), Value::String(address.to_string()));
        record.insert(CAPTURE_DATE_FIELD.into(), Value::String(capture_date.to_string()));
    }
}

/// Apply the full field selection to a decoded body.
pub fn transform(
    decoded: Decoded,
    fields: &FieldSelection,
    address: &str,
    capture_date: &str,
) -> Result<Vec<Record>> {
    let tree = match decoded {
        Decoded::Records(mut records) => {
            annotate(&mut records, address, capture_date);
            return Ok(records);
        }
        Decoded::Tree(tree) => tree,
    };

    let mut records = as_records(select_path(&tree, &fields.data_path)?)?;
    annotate(&mut records, address, capture_date);

    if let Some(keys) = &fields.exclude_keys {
        let keys: HashSet<&str> = keys.iter().map(String::as_str).collect();
        records = records.into_iter().map(|r| exclude_keys(r, &keys)).collect();
    }

    if let Some(records_keys) = &fields.records_keys {
        records = promote_records(records, records_keys);
    }

    Ok(records)
}

/// Serialize records as newline-delimited JSON.
pub fn to_ndjson(records: &[Record]) -> Result<Bytes> {
    let mut out = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        serde_json::to_writer(&mut out, record)?;
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_select_path() {
        let tree = json!({"dados": {"lista": [{"id": 1}, {"id": 2}]}});
        let node = select_path(&tree, &["dados".into(), "lista".into(), "1".into()]).unwrap();
        assert_eq!(node, &json!({"id": 2}));

        let err = select_path(&tree, &["dados".into(), "nope".into()]).unwrap_err();
        assert!(matches!(err, Error::Application { .. }));
    }

    #[test]
    fn test_as_records_shapes() {
        assert_eq!(as_records(&json!(null)).unwrap().len(), 0);
        assert_eq!(as_records(&json!({"a": 1})).unwrap().len(), 1);
        assert_eq!(as_records(&json!([{"a": 1}, {"a": 2}])).unwrap().len(), 2);
        assert!(as_records(&json!([1, 2])).is_err());
        assert!(as_records(&json!("x")).is_err());
    }

    #[test]
    fn test_exclude_keys_recurses_into_objects() {
        let keys = HashSet::from(["uri"]);
        let out = exclude_keys(
            record(json!({"id": 1, "uri": "x", "partido": {"sigla": "A", "uri": "y"}, "lista": [{"uri": "z"}]})),
            &keys,
        );
        assert_eq!(
            Value::Object(out),
            json!({"id": 1, "partido": {"sigla": "A"}, "lista": [{"uri": "z"}]})
        );
    }

    #[test]
    fn test_promote_records_inherits_root_keys() {
        let records = vec![
            record(json!({"votacao": 10, "votos": {"voto": [{"dep": "a"}, {"dep": "b"}]}})),
            record(json!({"votacao": 11})),
        ];
        let out = promote_records(records, &["votos".into(), "voto".into()]);
        assert_eq!(out.len(), 2);
        assert_eq!(Value::Object(out[1].clone()), json!({"dep": "b", "votacao": 10}));
    }

    #[test]
    fn test_transform_json_pipeline() {
        let tree = json!({"dados": [{"id": 1, "uri": "u"}, {"id": 2, "uri": "u"}]});
        let fields = FieldSelection {
            data_path: vec!["dados".into()],
            exclude_keys: Some(vec!["uri".into()]),
            records_keys: None,
        };

        let out = transform(Decoded::Tree(tree), &fields, "https://api", "2024-03-10 12:00:00").unwrap();
        assert_eq!(
            Value::Object(out[0].clone()),
            json!({"id": 1, "api_url": "https://api", "capture_date": "2024-03-10 12:00:00"})
        );
    }

    #[test]
    fn test_ndjson_has_no_trailing_newline() {
        let records = vec![record(json!({"a": 1})), record(json!({"b": "ç"}))];
        let bytes = to_ndjson(&records).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), "{\"a\":1}\n{\"b\":\"ç\"}");
        assert!(to_ndjson(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_dispatch() {
        let parsers = ParserRegistry::with_defaults();
        assert!(matches!(
            decode(br#"{"a": 1}"#, &DataType::Json, &parsers, "u").unwrap(),
            Decoded::Tree(_)
        ));
        assert!(matches!(
            decode(b"<a>1</a>", &DataType::Xml, &parsers, "u").unwrap(),
            Decoded::Tree(_)
        ));
        assert!(matches!(
            decode(b"{", &DataType::Json, &parsers, "u"),
            Err(Error::Application { .. })
        ));
        assert!(matches!(
            decode(b"x", &DataType::Module("nope".into()), &parsers, "u"),
            Err(Error::Configuration(_))
        ));
    }
}
