//! Capture specifications.
//!
//! A [`CaptureSpec`] is the declarative description of one capture job:
//! where to fetch from, where to store, which fields to keep, and how to
//! expand the description into concrete work items. The `parameters` list
//! is a tagged union on `type`; the tag selects the expansion strategy.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::value_objects::DedupPolicy;
use crate::{Error, Result};

fn default_parallel_batches() -> u32 {
    1
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

/// Expansion strategy, fixed by the spec's parameter tags.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    Range,
    DateWindow,
    ExternalList,
    QueryResult,
    Static,
    PaginationDelegate,
}

/// Symbolic or explicit end of a date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EndDate {
    Now,
    Yesterday,
    Explicit(String),
}

impl From<String> for EndDate {
    fn from(value: String) -> Self {
        match value.as_str() {
            "now" => Self::Now,
            "yesterday" => Self::Yesterday,
            _ => Self::Explicit(value),
        }
    }
}

impl From<EndDate> for String {
    fn from(value: EndDate) -> Self {
        match value {
            EndDate::Now => "now".to_string(),
            EndDate::Yesterday => "yesterday".to_string(),
            EndDate::Explicit(s) => s,
        }
    }
}

/// One entry of a spec's `parameters` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterSpec {
    /// One item per integer in `[from, to]`, substituted for `{name}`.
    #[serde(alias = "from_to")]
    Range { name: String, from: i64, to: i64 },

    /// One item per day in `[end + offset_days, end)` (swapped when negative span).
    #[serde(alias = "date_start_end")]
    DateWindow {
        end_date: EndDate,
        #[serde(default = "default_date_format")]
        date_format: String,
        #[serde(default, alias = "timedelta")]
        offset_days: i64,
    },

    /// One item per element of the invocation's external list.
    ExternalList { url_param: String },

    /// One item per row returned by a read-only query.
    #[serde(alias = "bigquery", alias = "athena_query")]
    Query {
        query: String,
        #[serde(default)]
        query_config: BTreeMap<String, String>,
        url_params: Vec<String>,
    },

    /// Exactly one item: the spec's own address.
    #[serde(alias = "empty")]
    Static,

    /// Defer to a registered expansion module.
    #[serde(alias = "external_module")]
    Delegate {
        module: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl ParameterSpec {
    pub fn kind(&self) -> CaptureKind {
        match self {
            Self::Range { .. } => CaptureKind::Range,
            Self::DateWindow { .. } => CaptureKind::DateWindow,
            Self::ExternalList { .. } => CaptureKind::ExternalList,
            Self::Query { .. } => CaptureKind::QueryResult,
            Self::Static => CaptureKind::Static,
            Self::Delegate { .. } => CaptureKind::PaginationDelegate,
        }
    }
}

/// How a fetched response body is decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Json,
    Xml,
    /// Decoded by a registered response parser.
    Module(String),
}

/// Field-selection rules applied to decoded responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection {
    /// Path of keys into the decoded body where the records live.
    #[serde(default)]
    pub data_path: Vec<String>,
    /// Keys removed from every record, at any object depth.
    #[serde(default)]
    pub exclude_keys: Option<Vec<String>>,
    /// Path inside each record to child records that are promoted to the top
    /// level, inheriting the parent's remaining keys.
    #[serde(default)]
    pub records_keys: Option<Vec<String>>,
}

/// Dependency of one capture job on another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOn {
    pub name: String,
    #[serde(default, alias = "wait")]
    pub wait_seconds: u64,
}

/// Declarative description of one capture job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub name: String,
    pub capture_type: String,
    /// Address template with `{placeholder}`s.
    pub url: String,
    #[serde(default)]
    pub bucket: String,
    /// Destination prefix; file names are appended to it.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(flatten)]
    pub fields: FieldSelection,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query-string parameters sent with every request.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default = "default_parallel_batches")]
    pub parallel_batches: u32,
    #[serde(default)]
    pub dedup: Option<DedupPolicy>,
    #[serde(default, alias = "dependence")]
    pub depends_on: Option<DependsOn>,
    /// Name of the registered pagination detector, if the source paginates.
    #[serde(default)]
    pub pagination: Option<String>,
    pub parameters: Vec<ParameterSpec>,
}

impl CaptureSpec {
    /// Expansion strategy of this spec.
    pub fn kind(&self) -> Result<CaptureKind> {
        self.parameters
            .first()
            .map(ParameterSpec::kind)
            .ok_or_else(|| Error::config(format!("capture spec '{}' has no parameters", self.name)))
    }

    /// Check the structural invariants of the spec.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("capture spec name must not be empty"));
        }
        if self.capture_type.trim().is_empty() {
            return Err(Error::config(format!(
                "capture spec '{}' has an empty capture_type",
                self.name
            )));
        }

        let kind = self.kind()?;
        let mixed: HashSet<CaptureKind> = self.parameters.iter().map(|p| p.kind()).collect();
        if mixed.len() > 1 {
            return Err(Error::config(format!(
                "capture spec '{}' mixes parameter kinds; expected only '{}'",
                self.name, kind
            )));
        }

        if self
            .depends_on
            .as_ref()
            .is_some_and(|dep| dep.name == self.name)
        {
            return Err(Error::config(format!(
                "capture spec '{}' depends on itself",
                self.name
            )));
        }

        if self
            .dedup
            .as_ref()
            .is_some_and(|policy| policy.namespace.trim().is_empty())
        {
            return Err(Error::config(format!(
                "capture spec '{}' has an empty dedup namespace",
                self.name
            )));
        }

        Ok(())
    }

    /// Number of queue partitions requested, never below one.
    pub fn partitions(&self) -> usize {
        self.parallel_batches.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CaptureSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_range_spec() {
        let spec = parse(
            r#"{
                "name": "camara-deputados",
                "capture_type": "historical",
                "url": "https://dadosabertos.camara.leg.br/api/v2/deputados?idLegislatura={id}",
                "bucket": "brutos",
                "key": "camara/deputados/",
                "data_path": ["dados"],
                "exclude_keys": ["uri"],
                "parameters": [{"type": "range", "name": "id", "from": 2018, "to": 2020}]
            }"#,
        );

        assert_eq!(spec.kind().unwrap(), CaptureKind::Range);
        assert_eq!(spec.fields.data_path, vec!["dados".to_string()]);
        assert_eq!(spec.data_type, DataType::Json);
        assert_eq!(spec.partitions(), 1);
        spec.validate().unwrap();
    }

    #[test]
    fn test_legacy_tags_are_accepted() {
        let spec = parse(
            r#"{
                "name": "dou",
                "capture_type": "daily",
                "url": "https://example/{start_date}",
                "parameters": [{"type": "date_start_end", "end_date": "yesterday", "timedelta": -2}]
            }"#,
        );

        match &spec.parameters[0] {
            ParameterSpec::DateWindow {
                end_date,
                date_format,
                offset_days,
            } => {
                assert_eq!(*end_date, EndDate::Yesterday);
                assert_eq!(date_format, "%Y-%m-%d");
                assert_eq!(*offset_days, -2);
            }
            other => panic!("unexpected parameter {other:?}"),
        }

        let spec = parse(
            r#"{"name": "s", "capture_type": "live", "url": "https://x", "parameters": [{"type": "empty"}]}"#,
        );
        assert_eq!(spec.kind().unwrap(), CaptureKind::Static);
    }

    #[test]
    fn test_module_data_type() {
        let spec = parse(
            r#"{"name": "s", "capture_type": "live", "url": "https://x",
                "data_type": {"module": "gazette_article"},
                "parameters": [{"type": "static"}]}"#,
        );
        assert_eq!(spec.data_type, DataType::Module("gazette_article".into()));
    }

    #[test]
    fn test_validate_rejects_mixed_kinds() {
        let mut spec = parse(
            r#"{"name": "s", "capture_type": "live", "url": "https://x", "parameters": [{"type": "static"}]}"#,
        );
        spec.parameters.push(ParameterSpec::Range {
            name: "id".into(),
            from: 1,
            to: 2,
        });
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_empty_parameters() {
        let spec = parse(r#"{"name": "s", "capture_type": "live", "url": "https://x", "parameters": []}"#);
        assert!(spec.kind().is_err());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_dependency_alias() {
        let spec = parse(
            r#"{"name": "b", "capture_type": "daily", "url": "https://x",
                "dependence": {"name": "a", "wait": 60},
                "parameters": [{"type": "static"}]}"#,
        );
        assert_eq!(
            spec.depends_on,
            Some(DependsOn {
                name: "a".into(),
                wait_seconds: 60
            })
        );
    }
}
