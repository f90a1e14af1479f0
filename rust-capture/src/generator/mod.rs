//! Work item generation.
//!
//! Expands a [`CaptureSpec`] into the ordered list of [`WorkItem`]s a capture
//! run will fetch. Expansion has no side effects beyond reading external
//! sources (query stores, delegate indexes); persisting the result and any
//! updated spec is the caller's job.

pub mod date_window;
pub mod delegate;
pub mod query;
pub mod range;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{CaptureSpec, ParameterSpec, WorkItem, template};
use crate::{Error, Result};

pub use delegate::{DailyIndexModule, ExpansionModule, ModuleOutput, ModuleRegistry};
pub use query::{QuerySource, SqliteQuerySource};

/// Per-invocation inputs to expansion.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Local calendar day the run belongs to.
    pub today: NaiveDate,
    /// Caller-supplied values for `external_list` parameters.
    pub external_list: Vec<String>,
}

impl InvocationContext {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            external_list: Vec::new(),
        }
    }

    pub fn with_external_list(mut self, list: Vec<String>) -> Self {
        self.external_list = list;
        self
    }
}

/// An expanded fetch target before it is bound to a spec.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub address: String,
    /// File name appended to the spec's destination prefix.
    pub file_name: String,
    pub aux_data: Map<String, Value>,
}

impl Target {
    pub fn new(address: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            file_name: file_name.into(),
            aux_data: Map::new(),
        }
    }
}

/// Output of [`WorkItemGenerator::expand`].
#[derive(Debug, Clone)]
pub struct Expansion {
    /// Items in expansion order; the queue assigns indices in this order.
    pub items: Vec<WorkItem>,
    /// The spec to persist for the next run.
    pub updated_spec: CaptureSpec,
    pub spec_changed: bool,
}

impl Expansion {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Expands capture specs using the registered strategies.
pub struct WorkItemGenerator {
    modules: Arc<ModuleRegistry>,
    query_source: Option<Arc<dyn QuerySource>>,
}

impl WorkItemGenerator {
    pub fn new(modules: Arc<ModuleRegistry>, query_source: Option<Arc<dyn QuerySource>>) -> Self {
        Self {
            modules,
            query_source,
        }
    }

    pub async fn expand(&self, spec: &CaptureSpec, ctx: &InvocationContext) -> Result<Expansion> {
        spec.validate()?;

        let mut targets = Vec::new();
        let mut updated_spec = spec.clone();
        let mut spec_changed = false;

        for (index, parameter) in spec.parameters.iter().enumerate() {
            match parameter {
                ParameterSpec::Range { name, from, to } => {
                    targets.extend(range::expand(&spec.name, &spec.url, name, *from, *to)?);
                }
                ParameterSpec::DateWindow {
                    end_date,
                    date_format,
                    offset_days,
                } => {
                    targets.extend(date_window::expand(
                        &spec.name,
                        &spec.url,
                        end_date,
                        date_format,
                        *offset_days,
                        ctx.today,
                    )?);
                }
                ParameterSpec::ExternalList { url_param } => {
                    targets.extend(expand_external_list(
                        &spec.name,
                        &spec.url,
                        url_param,
                        &ctx.external_list,
                    )?);
                }
                ParameterSpec::Query {
                    query,
                    query_config,
                    url_params,
                } => {
                    let source = self.query_source.as_deref().ok_or_else(|| {
                        Error::config(format!(
                            "capture spec '{}' needs a query source but none is configured",
                            spec.name
                        ))
                    })?;
                    targets.extend(
                        query::expand(source, &spec.name, &spec.url, query, query_config, url_params)
                            .await?,
                    );
                }
                ParameterSpec::Static => {
                    if targets.is_empty() {
                        targets.push(Target::new(spec.url.clone(), format!("{}.json", spec.name)));
                    }
                }
                ParameterSpec::Delegate { module, params } => {
                    let expansion_module = self.modules.get(module).ok_or_else(|| {
                        Error::config(format!(
                            "capture spec '{}' references unknown expansion module '{}'",
                            spec.name, module
                        ))
                    })?;

                    let output = expansion_module.expand(spec, params, ctx).await?;
                    targets.extend(output.targets);

                    if let Some(new_params) = output.params.filter(|p| p != params) {
                        updated_spec.parameters[index] = ParameterSpec::Delegate {
                            module: module.clone(),
                            params: new_params,
                        };
                        spec_changed = true;
                    }
                }
            }
        }

        let items = build_items(spec, targets);
        info!(
            spec = %spec.name,
            capture_type = %spec.capture_type,
            items = items.len(),
            spec_changed,
            "Expanded capture spec"
        );

        Ok(Expansion {
            items,
            updated_spec,
            spec_changed,
        })
    }
}

fn expand_external_list(
    spec_name: &str,
    url_template: &str,
    url_param: &str,
    list: &[String],
) -> Result<Vec<Target>> {
    list.iter()
        .map(|element| {
            let address = template::render(url_template, &[(url_param, element.as_str())])?;
            let mut target = Target::new(address, format!("{spec_name}_{element}.json"));
            target
                .aux_data
                .insert(url_param.to_string(), Value::String(element.clone()));
            Ok(target)
        })
        .collect()
}

/// Bind targets to the spec. Targets whose destination was already
/// produced are dropped so destinations stay unique within a run.
pub fn build_items(spec: &CaptureSpec, targets: Vec<Target>) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(targets.len());

    for target in targets {
        if !seen.insert(target.file_name.clone()) {
            debug!(spec = %spec.name, file = %target.file_name, "Dropping target with duplicate destination");
            continue;
        }
        items.push(WorkItem::from_spec(
            spec,
            target.address,
            &target.file_name,
            target.aux_data,
        ));
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    fn spec(value: Value) -> CaptureSpec {
        serde_json::from_value(value).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn generator() -> WorkItemGenerator {
        WorkItemGenerator::new(Arc::new(ModuleRegistry::new()), None)
    }

    #[tokio::test]
    async fn test_static_yields_exactly_one_item() {
        let spec = spec(json!({
            "name": "senado-agenda", "capture_type": "live",
            "url": "https://legis.senado.leg.br/agenda", "key": "senado/",
            "parameters": [{"type": "static"}, {"type": "static"}]
        }));

        let expansion = generator()
            .expand(&spec, &InvocationContext::new(today()))
            .await
            .unwrap();
        assert_eq!(expansion.items.len(), 1);
        assert_eq!(expansion.items[0].destination, "senado/senado-agenda.json");
        assert!(!expansion.spec_changed);
    }

    #[tokio::test]
    async fn test_external_list() {
        let spec = spec(json!({
            "name": "votos", "capture_type": "daily",
            "url": "https://api/votacoes/{id}/votos",
            "parameters": [{"type": "external_list", "url_param": "id"}]
        }));
        let ctx = InvocationContext::new(today()).with_external_list(vec!["1".into(), "2".into(), "1".into()]);

        let expansion = generator().expand(&spec, &ctx).await.unwrap();
        let addresses: Vec<&str> = expansion.items.iter().map(|i| i.address.as_str()).collect();
        assert_eq!(addresses, vec!["https://api/votacoes/1/votos", "https://api/votacoes/2/votos"]);
    }

    #[tokio::test]
    async fn test_query_without_source_is_config_error() {
        let spec = spec(json!({
            "name": "q", "capture_type": "daily", "url": "https://api/{id}",
            "parameters": [{"type": "query", "query": "SELECT 1", "url_params": ["id"]}]
        }));
        let err = generator()
            .expand(&spec, &InvocationContext::new(today()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    struct StaticRows;

    #[async_trait]
    impl QuerySource for StaticRows {
        async fn fetch_rows(&self, query: &str) -> Result<Vec<Vec<String>>> {
            assert_eq!(query, "SELECT id FROM votacoes WHERE dia = '2024-03-09'");
            Ok(vec![vec!["10".into()], vec!["11".into()]])
        }
    }

    #[tokio::test]
    async fn test_query_rows() {
        let spec = spec(json!({
            "name": "votos", "capture_type": "daily", "url": "https://api/{id}",
            "parameters": [{
                "type": "athena_query",
                "query": "SELECT id FROM votacoes WHERE dia = '{dia}'",
                "query_config": {"dia": "2024-03-09"},
                "url_params": ["id"]
            }]
        }));
        let generator = WorkItemGenerator::new(Arc::new(ModuleRegistry::new()), Some(Arc::new(StaticRows)));

        let expansion = generator
            .expand(&spec, &InvocationContext::new(today()))
            .await
            .unwrap();
        assert_eq!(expansion.items.len(), 2);
        assert_eq!(expansion.items[1].destination, "votos_11.json");
    }

    struct CursorModule;

    #[async_trait]
    impl ExpansionModule for CursorModule {
        fn name(&self) -> &str {
            "cursor"
        }

        async fn expand(
            &self,
            _spec: &CaptureSpec,
            params: &Value,
            _ctx: &InvocationContext,
        ) -> Result<ModuleOutput> {
            let page = params["page"].as_i64().unwrap_or(0);
            Ok(ModuleOutput {
                targets: vec![Target::new(format!("https://idx/{page}"), format!("p{page}.json"))],
                params: Some(json!({"page": page + 1})),
            })
        }
    }

    #[tokio::test]
    async fn test_delegate_updates_spec() {
        let spec = spec(json!({
            "name": "idx", "capture_type": "daily", "url": "",
            "parameters": [{"type": "external_module", "module": "cursor", "params": {"page": 3}}]
        }));
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(CursorModule));
        let generator = WorkItemGenerator::new(Arc::new(registry), None);

        let expansion = generator
            .expand(&spec, &InvocationContext::new(today()))
            .await
            .unwrap();
        assert_eq!(expansion.items[0].address.as_str(), "https://idx/3");
        assert!(expansion.spec_changed);
        assert_eq!(
            expansion.updated_spec.parameters[0],
            ParameterSpec::Delegate {
                module: "cursor".into(),
                params: json!({"page": 4})
            }
        );
        // The input spec itself is never modified.
        assert_eq!(spec.parameters[0], ParameterSpec::Delegate {
            module: "cursor".into(),
            params: json!({"page": 3})
        });
    }

    #[tokio::test]
    async fn test_unknown_module_is_config_error() {
        let spec = spec(json!({
            "name": "idx", "capture_type": "daily", "url": "",
            "parameters": [{"type": "delegate", "module": "nope"}]
        }));
        let err = generator()
            .expand(&spec, &InvocationContext::new(today()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
