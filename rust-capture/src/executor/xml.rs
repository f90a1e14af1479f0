//! XML to JSON conversion.
//!
//! Documents become nested objects keyed by element name. Attributes are
//! merged in as keys, repeated children become arrays, text-only elements
//! become strings and empty elements become `null`. Text next to attributes
//! or children is kept under `text`. Every key is stripped of characters
//! that are not alphanumeric, so `@id` becomes `id` and `ns:tag` becomes
//! `nstag`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

use crate::{Error, Result};

const TEXT_KEY: &str = "text";

#[derive(Default)]
struct Node {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

/// Strip every non-alphanumeric character from `key`.
pub fn sanitize_key(key: &str) -> String {
    key.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn malformed(e: impl std::fmt::Display) -> Error {
    Error::application(None, format!("malformed XML: {e}"))
}

fn open(start: &BytesStart<'_>) -> Result<Node> {
    let mut node = Node {
        name: sanitize_key(&String::from_utf8_lossy(start.name().as_ref())),
        ..Default::default()
    };

    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = sanitize_key(&String::from_utf8_lossy(attr.key.as_ref()));
        let value = attr.unescape_value().map_err(malformed)?;
        insert_child(&mut node.fields, key, Value::String(value.into_owned()));
    }

    Ok(node)
}

/// Insert under `key`, turning repeated keys into arrays.
fn insert_child(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

fn close(node: Node) -> (String, Value) {
    let text = node.text.trim();
    let value = if node.fields.is_empty() {
        if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        }
    } else {
        let mut fields = node.fields;
        if !text.is_empty() {
            insert_child(&mut fields, TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        Value::Object(fields)
    };
    (node.name, value)
}

/// Convert an XML document into a JSON value.
pub fn xml_to_json(input: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(input).map_err(malformed)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root = Map::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(open(&start)?),
            Event::Empty(start) => {
                let (name, value) = close(open(&start)?);
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag"))?;
                let (name, value) = close(node);
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Event::Text(t) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&t.unescape().map_err(malformed)?);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unclosed element"));
    }
    if root.is_empty() {
        return Err(malformed("document has no root element"));
    }
    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_document() {
        let doc = br#"<?xml version="1.0"?>
            <ListaParlamentarEmExercicio>
              <Parlamentares>
                <Parlamentar><Codigo>1</Codigo><Nome>Ana</Nome></Parlamentar>
                <Parlamentar><Codigo>2</Codigo><Nome>Rui</Nome></Parlamentar>
              </Parlamentares>
            </ListaParlamentarEmExercicio>"#;

        let value = xml_to_json(doc).unwrap();
        assert_eq!(
            value,
            json!({"ListaParlamentarEmExercicio": {"Parlamentares": {"Parlamentar": [
                {"Codigo": "1", "Nome": "Ana"},
                {"Codigo": "2", "Nome": "Rui"}
            ]}}})
        );
    }

    #[test]
    fn test_attributes_text_and_empty() {
        let doc = br#"<root><item id="7" tipo-x="a">texto &amp; mais</item><vazio/><nada></nada></root>"#;
        let value = xml_to_json(doc).unwrap();
        assert_eq!(
            value,
            json!({"root": {
                "item": {"id": "7", "tipox": "a", "text": "texto & mais"},
                "vazio": null,
                "nada": null
            }})
        );
    }

    #[test]
    fn test_keys_are_sanitized() {
        assert_eq!(sanitize_key("@id"), "id");
        assert_eq!(sanitize_key("soap:Body"), "soapBody");
        assert_eq!(sanitize_key("data_hora"), "datahora");
        assert_eq!(sanitize_key("ação"), "ação");
    }

    #[test]
    fn test_cdata() {
        let value = xml_to_json(b"<a><![CDATA[<b>raw</b>]]></a>").unwrap();
        assert_eq!(value, json!({"a": "<b>raw</b>"}));
    }

    #[test]
    fn test_malformed() {
        assert!(xml_to_json(b"<a><b></a>").is_err());
        assert!(xml_to_json(b"").is_err());
        assert!(xml_to_json(b"<a>").is_err());
    }
}
