//! Collector config and component list importers.
//!
//! Both are pure functions over YAML text. A collector config is walked for
//! the components it declares and the ones its `service` section uses; a
//! component list names components directly and may carry hand-pinned modules.

use super::components::{Category, ComponentReference, ModuleCoordinate};
use super::error::ConfigError;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use tracing::warn;

/// Pipeline keys and the category their entries belong to.
const PIPELINE_KEYS: [(&str, Category); 3] = [
    ("receivers", Category::Receiver),
    ("processors", Category::Processor),
    ("exporters", Category::Exporter),
];

/// Extract the components referenced by a collector configuration.
///
/// Instance qualifiers collapse (`otlp/traces` and `otlp/metrics` are one
/// `otlp` receiver). Components used by `service` but not declared in their
/// section are added with a warning, except pipeline receivers and exporters
/// that are declared connectors.
pub fn extract(document: &str) -> Result<BTreeSet<ComponentReference>, ConfigError> {
    let root: Value = serde_yaml::from_str(document)?;
    let root = match root {
        Value::Null => return Ok(BTreeSet::new()),
        Value::Mapping(m) => m,
        _ => return Err(ConfigError::InvalidSection("<document>".to_string())),
    };

    let mut references = BTreeSet::new();
    for category in Category::CONFIG_SECTIONS {
        for id in section_ids(&root, category.section())? {
            references.insert(ComponentReference::from_config_id(category, &id)?);
        }
    }

    let Some(service) = mapping_at(&root, "service")? else {
        return Ok(references);
    };

    let connectors: BTreeSet<String> = references
        .iter()
        .filter(|r| r.category == Category::Connector)
        .map(|r| r.name.clone())
        .collect();

    for id in string_list(service.get("extensions"), "service.extensions")? {
        add_undeclared(&mut references, Category::Extension, &id)?;
    }

    if let Some(pipelines) = mapping_at(service, "pipelines")? {
        for (pipeline, body) in pipelines {
            let pipeline = pipeline.as_str().unwrap_or_default();
            let body = match body {
                Value::Null => continue,
                Value::Mapping(m) => m,
                _ => {
                    return Err(ConfigError::InvalidSection(format!(
                        "service.pipelines.{pipeline}"
                    )))
                }
            };
            for (key, category) in PIPELINE_KEYS {
                let context = format!("service.pipelines.{pipeline}.{key}");
                for id in string_list(body.get(key), &context)? {
                    let reference = ComponentReference::from_config_id(category, &id)?;
                    if category != Category::Processor && connectors.contains(&reference.name) {
                        continue;
                    }
                    add_undeclared(&mut references, category, &id)?;
                }
            }
        }
    }

    Ok(references)
}

fn add_undeclared(
    references: &mut BTreeSet<ComponentReference>,
    category: Category,
    id: &str,
) -> Result<(), ConfigError> {
    let reference = ComponentReference::from_config_id(category, id)?;
    if !references.contains(&reference) {
        warn!(%category, name = %reference.name, "component used by service but not declared");
        references.insert(reference);
    }
    Ok(())
}

/// The mapping under `key`, treating an explicit null as absent.
fn mapping_at<'a>(parent: &'a Mapping, key: &str) -> Result<Option<&'a Mapping>, ConfigError> {
    match parent.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Mapping(m)) => Ok(Some(m)),
        Some(_) => Err(ConfigError::InvalidSection(key.to_string())),
    }
}

/// Component ids (mapping keys) of a top-level config section.
fn section_ids(root: &Mapping, section: &str) -> Result<Vec<String>, ConfigError> {
    let Some(mapping) = mapping_at(root, section)? else {
        return Ok(Vec::new());
    };
    mapping
        .keys()
        .map(|k| match k {
            Value::String(s) => Ok(s.clone()),
            other => Err(ConfigError::InvalidComponentId(scalar_text(other))),
        })
        .collect()
}

/// A sequence of strings, treating absent or null as empty.
fn string_list(value: Option<&Value>, context: &str) -> Result<Vec<String>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ConfigError::InvalidComponentId(scalar_text(other))),
            })
            .collect(),
        Some(_) => Err(ConfigError::InvalidSection(context.to_string())),
    }
}

fn scalar_text(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// A parsed component list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentList {
    pub references: BTreeSet<ComponentReference>,
    /// Hand-pinned modules, in document order.
    pub pins: Vec<(Category, ModuleCoordinate)>,
}

impl ComponentList {
    pub fn from_references(references: BTreeSet<ComponentReference>) -> Self {
        Self {
            references,
            pins: Vec::new(),
        }
    }
}

/// Parse a component list:
///
/// ```yaml
/// receivers: [otlp, "hostmetrics@contrib"]
/// exporters: [debug]
/// modules:
///   exporters: ["github.com/example/myexporter v1.2.3"]
/// ```
pub fn parse_component_list(document: &str) -> Result<ComponentList, ConfigError> {
    let root: Value = serde_yaml::from_str(document)?;
    let root = match root {
        Value::Null => return Ok(ComponentList::default()),
        Value::Mapping(m) => m,
        _ => return Err(ConfigError::InvalidSection("<document>".to_string())),
    };

    let mut list = ComponentList::default();
    for (key, value) in &root {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::UnknownSection(scalar_text(key)))?;

        if key == "modules" {
            let Some(modules) = mapping_at(&root, key)? else {
                continue;
            };
            for (section, entries) in modules {
                let section = section.as_str().unwrap_or_default();
                let category = Category::from_section(section)
                    .ok_or_else(|| ConfigError::UnknownSection(section.to_string()))?;
                for gomod in string_list(Some(entries), &format!("modules.{section}"))? {
                    list.pins.push((category, gomod.parse()?));
                }
            }
            continue;
        }

        let category = Category::from_section(key)
            .ok_or_else(|| ConfigError::UnknownSection(key.to_string()))?;
        for entry in string_list(Some(value), key)? {
            list.references
                .insert(ComponentReference::from_list_entry(category, &entry)?);
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::components::Namespace;

    const CONFIG: &str = r#"
receivers:
  otlp/traces:
    protocols: { grpc: {} }
  otlp/metrics:
  hostmetrics:
    collection_interval: 10s
processors:
  batch:
exporters:
  debug:
  otlphttp/backend:
    endpoint: https://example.com
connectors:
  spanmetrics:
extensions:
  health_check:
service:
  extensions: [health_check, pprof]
  pipelines:
    traces:
      receivers: [otlp/traces]
      processors: [batch, memory_limiter]
      exporters: [spanmetrics, otlphttp/backend]
    metrics:
      receivers: [spanmetrics, hostmetrics]
      exporters: [debug]
"#;

    fn names(refs: &BTreeSet<ComponentReference>, category: Category) -> Vec<&str> {
        refs.iter()
            .filter(|r| r.category == category)
            .map(|r| r.name.as_str())
            .collect()
    }

    #[test]
    fn test_extract_collapses_instances() {
        let refs = extract(CONFIG).unwrap();
        assert_eq!(names(&refs, Category::Receiver), vec!["hostmetrics", "otlp"]);
        assert_eq!(names(&refs, Category::Exporter), vec!["debug", "otlphttp"]);
        assert_eq!(names(&refs, Category::Connector), vec!["spanmetrics"]);
    }

    #[test]
    fn test_extract_adds_undeclared_service_components() {
        let refs = extract(CONFIG).unwrap();
        assert_eq!(names(&refs, Category::Extension), vec!["health_check", "pprof"]);
        assert_eq!(names(&refs, Category::Processor), vec!["batch", "memory_limiter"]);
    }

    #[test]
    fn test_connectors_in_pipelines_are_not_receivers() {
        let refs = extract(CONFIG).unwrap();
        assert!(!refs.contains(&ComponentReference::new(Category::Receiver, "spanmetrics")));
        assert!(!refs.contains(&ComponentReference::new(Category::Exporter, "spanmetrics")));
    }

    #[test]
    fn test_extract_is_idempotent() {
        let doubled = format!("{CONFIG}\n");
        assert_eq!(extract(CONFIG).unwrap(), extract(&doubled).unwrap());
        assert_eq!(extract(CONFIG).unwrap(), extract(CONFIG).unwrap());
    }

    #[test]
    fn test_null_and_invalid_sections() {
        assert!(extract("").unwrap().is_empty());
        assert!(extract("receivers:\nexporters: ~\n").unwrap().is_empty());
        assert!(matches!(
            extract("receivers: [otlp]\n"),
            Err(ConfigError::InvalidSection(s)) if s == "receivers"
        ));
        assert!(matches!(extract("- a\n- b\n"), Err(ConfigError::InvalidSection(_))));
        assert!(matches!(
            extract("receivers: {\"bad-name\": {}}\n"),
            Err(ConfigError::InvalidComponentId(_))
        ));
    }

    #[test]
    fn test_parse_component_list() {
        let list = parse_component_list(
            r#"
receivers: [otlp, "hostmetrics@contrib", otlp/second]
exporters: [debug]
processors:
modules:
  exporters: ["github.com/example/myexporter v1.2.3"]
"#,
        )
        .unwrap();
        assert_eq!(list.references.len(), 3);
        let hostmetrics = ComponentReference::new(Category::Receiver, "hostmetrics")
            .in_namespace(Namespace::Contrib);
        assert!(list.references.contains(&hostmetrics));
        assert_eq!(
            list.pins,
            vec![(
                Category::Exporter,
                ModuleCoordinate::new("github.com/example/myexporter", "v1.2.3")
            )]
        );
    }

    #[test]
    fn test_component_list_rejects_unknown_sections() {
        assert!(matches!(
            parse_component_list("widgets: [a]\n"),
            Err(ConfigError::UnknownSection(s)) if s == "widgets"
        ));
        assert!(matches!(
            parse_component_list("receivers: otlp\n"),
            Err(ConfigError::InvalidSection(_))
        ));
    }
}
