use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;

use agent_protocol::{
    DocumentContent, DocumentInfo, DocumentState, DocumentType, PluginConfiguration, PluginState,
};
use anyhow::{bail, Context};
use regex::{Captures, Regex};
use serde_json::Value;

/// Where a document's plugins write, and which message they belong to.
#[derive(Debug, Clone)]
pub struct ParserInfo {
    pub orchestration_dir: PathBuf,
    pub message_id: String,
    pub document_id: String,
}

/// Turns document content into the ordered plugin list of a new state.
pub trait DocumentInitializer: Send + Sync {
    fn initialize(
        &self,
        document_type: DocumentType,
        content: &DocumentContent,
        info: DocumentInfo,
        parser_info: &ParserInfo,
        parameters: &BTreeMap<String, Value>,
    ) -> anyhow::Result<DocumentState>;
}

/// Handles schema 1.x `runtimeConfig` and schema 2.x `mainSteps` content,
/// resolving `{{ name }}` parameter references.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepInitializer;

struct Step<'a> {
    id: &'a str,
    name: &'a str,
    properties: &'a Value,
}

impl DocumentInitializer for StepInitializer {
    fn initialize(
        &self,
        document_type: DocumentType,
        content: &DocumentContent,
        info: DocumentInfo,
        parser_info: &ParserInfo,
        parameters: &BTreeMap<String, Value>,
    ) -> anyhow::Result<DocumentState> {
        let steps = steps(content)?;
        let resolved = resolve_parameters(content, parameters);

        let mut seen = HashSet::new();
        let mut plugins = Vec::with_capacity(steps.len());
        for step in steps {
            if step.id.trim().is_empty() {
                bail!("step for {} has no name", step.name);
            }
            if !seen.insert(step.id) {
                bail!("duplicate step {}", step.id);
            }
            let properties = substitute(step.properties, &resolved)
                .with_context(|| format!("step {}", step.id))?;
            let orchestration_directory = parser_info
                .orchestration_dir
                .join(directory_name(step.id));
            plugins.push(PluginState {
                id: step.id.to_string(),
                name: step.name.to_string(),
                configuration: PluginConfiguration {
                    properties,
                    orchestration_directory: orchestration_directory.display().to_string(),
                    message_id: parser_info.message_id.clone(),
                    plugin_id: step.id.to_string(),
                    plugin_name: step.name.to_string(),
                },
                ..PluginState::default()
            });
        }

        tracing::debug!(
            event = "document.initialized",
            document_id = %parser_info.document_id,
            plugins = plugins.len(),
            schema = %content.schema_version,
        );
        Ok(DocumentState {
            document_information: info,
            document_type: Some(document_type),
            instance_plugins_information: plugins,
            cancel_information: None,
        })
    }
}

fn steps(content: &DocumentContent) -> anyhow::Result<Vec<Step<'_>>> {
    let version = content.schema_version.trim();
    let steps: Vec<Step<'_>> = if version.starts_with("1.") {
        content
            .runtime_config
            .iter()
            .map(|(name, config)| Step {
                id: name,
                name,
                properties: &config.properties,
            })
            .collect()
    } else if version.starts_with("2.") {
        content
            .main_steps
            .iter()
            .map(|step| Step {
                id: &step.name,
                name: &step.action,
                properties: &step.inputs,
            })
            .collect()
    } else {
        bail!("unsupported document schema version {version:?}");
    };
    if steps.is_empty() {
        bail!("document has no steps");
    }
    Ok(steps)
}

/// Caller values win over declared defaults.
fn resolve_parameters(
    content: &DocumentContent,
    parameters: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut resolved: BTreeMap<String, Value> = content
        .parameters
        .iter()
        .filter_map(|(name, declaration)| {
            declaration
                .get("default")
                .map(|default| (name.clone(), default.clone()))
        })
        .collect();
    for (name, value) in parameters {
        resolved.insert(name.clone(), value.clone());
    }
    resolved
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.:-]+)\s*\}\}").expect("placeholder regex")
    })
}

fn substitute(value: &Value, parameters: &BTreeMap<String, Value>) -> anyhow::Result<Value> {
    match value {
        Value::String(text) => substitute_string(text, parameters),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match substitute(item, parameters)? {
                    // A list parameter referenced as a list element is spliced in.
                    Value::Array(inner) if is_single_placeholder(item) => out.extend(inner),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, parameters)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn is_single_placeholder(value: &Value) -> bool {
    value.as_str().is_some_and(|text| {
        placeholder()
            .find(text.trim())
            .is_some_and(|found| found.as_str() == text.trim())
    })
}

fn substitute_string(text: &str, parameters: &BTreeMap<String, Value>) -> anyhow::Result<Value> {
    let trimmed = text.trim();
    if let Some(captures) = placeholder().captures(trimmed) {
        if captures.get(0).map(|whole| whole.as_str()) == Some(trimmed) {
            let name = &captures[1];
            return parameters
                .get(name)
                .cloned()
                .with_context(|| format!("parameter {name} is not defined"));
        }
    }

    let mut missing = None;
    let replaced = placeholder().replace_all(text, |captures: &Captures<'_>| {
        let name = &captures[1];
        match parameters.get(name) {
            Some(value) => render(value),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    if let Some(name) = missing {
        bail!("parameter {name} is not defined");
    }
    Ok(Value::String(replaced.into_owned()))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

fn directory_name(id: &str) -> String {
    id.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        .collect()
}

/// Applies `rewrite` to every string inside `value`.
pub fn map_strings(value: &mut Value, rewrite: &mut dyn FnMut(&mut String)) {
    match value {
        Value::String(text) => rewrite(text),
        Value::Array(items) => {
            for item in items {
                map_strings(item, rewrite);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                map_strings(item, rewrite);
            }
        }
        _ => {}
    }
}
