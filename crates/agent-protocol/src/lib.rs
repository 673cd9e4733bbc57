use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod channel;
pub mod model;

pub use model::{
    AdditionalInfo, AgentInfo, CancelCommandInfo, DocumentInfo, DocumentState, DocumentType,
    PluginConfiguration, PluginState, ResultStatus,
};

pub const SEND_COMMAND_TOPIC_PREFIX: &str = "aws.ssm.sendCommand.";
pub const SEND_COMMAND_OFFLINE_TOPIC_PREFIX: &str = "aws.ssm.sendCommand.offline.";
pub const CANCEL_COMMAND_TOPIC_PREFIX: &str = "aws.ssm.cancelCommand.";
pub const CANCEL_COMMAND_OFFLINE_TOPIC_PREFIX: &str = "aws.ssm.cancelCommand.offline.";

/// Plugin name whose `properties` carry an embedded logging configuration,
/// including credentials.
pub const CLOUD_WATCH_PLUGIN: &str = "aws:cloudWatch";

/// A message as delivered by the management channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
    pub message_id: String,
    pub topic: String,
    pub payload: String,
    pub destination: String,
    #[serde(default)]
    pub created_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SendCommandPayload {
    #[serde(default, alias = "parameters")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(alias = "documentContent")]
    pub document_content: DocumentContent,
    #[serde(default, rename = "CommandId", alias = "commandId")]
    pub command_id: String,
    #[serde(default, alias = "documentName")]
    pub document_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelPayload {
    #[serde(rename = "CancelMessageId", alias = "cancelMessageId")]
    pub cancel_message_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub runtime_config: RuntimeConfig,
    #[serde(default)]
    pub main_steps: Vec<StepConfig>,
}

/// Schema 1.2 plugin table. The cloud-watch entry is split out so its
/// credential-bearing properties can be addressed directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(
        rename = "aws:cloudWatch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cloud_watch: Option<PluginConfig>,
    #[serde(flatten)]
    pub plugins: BTreeMap<String, PluginConfig>,
}

impl RuntimeConfig {
    pub fn is_empty(&self) -> bool {
        self.cloud_watch.is_none() && self.plugins.is_empty()
    }

    /// Plugins in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PluginConfig)> {
        self.plugins
            .iter()
            .map(|(name, config)| (name.as_str(), config))
            .chain(
                self.cloud_watch
                    .iter()
                    .map(|config| (CLOUD_WATCH_PLUGIN, config)),
            )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    #[serde(default)]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub action: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureReason {
    InternalHandlerException,
}

/// Incremental or final outcome of a document, sent back upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentResult {
    pub message_id: String,
    #[serde(default)]
    pub document_name: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub last_plugin: String,
    #[serde(default)]
    pub plugin_results: Vec<PluginResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<String>,
    #[serde(default)]
    pub runtime_status_counts: BTreeMap<String, u32>,
}

impl DocumentResult {
    /// A reply that carries only a document status, no plugin detail.
    pub fn document_level(
        message_id: impl Into<String>,
        status: ResultStatus,
        debug_info: impl Into<String>,
    ) -> Self {
        let debug_info = debug_info.into();
        Self {
            message_id: message_id.into(),
            document_name: String::new(),
            status,
            last_plugin: String::new(),
            plugin_results: Vec::new(),
            debug_info: if debug_info.is_empty() {
                None
            } else {
                Some(debug_info)
            },
            runtime_status_counts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResult {
    pub plugin_id: String,
    pub plugin_name: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub start_date_time: Option<String>,
    #[serde(default)]
    pub end_date_time: Option<String>,
}

impl PluginResult {
    pub fn from_state(plugin: &PluginState) -> Self {
        Self {
            plugin_id: plugin.id.clone(),
            plugin_name: plugin.name.clone(),
            status: plugin.status.unwrap_or(ResultStatus::Pending),
            code: plugin.code,
            output: plugin.output.clone(),
            start_date_time: plugin.start_date_time.clone(),
            end_date_time: plugin.end_date_time.clone(),
        }
    }
}
