use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::{
    CANCEL_COMMAND_OFFLINE_TOPIC_PREFIX, CANCEL_COMMAND_TOPIC_PREFIX,
    SEND_COMMAND_OFFLINE_TOPIC_PREFIX, SEND_COMMAND_TOPIC_PREFIX,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    Pending,
    InProgress,
    Success,
    SuccessAndReboot,
    Failed,
    Cancelled,
    TimedOut,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pending => "Pending",
            ResultStatus::InProgress => "InProgress",
            ResultStatus::Success => "Success",
            ResultStatus::SuccessAndReboot => "SuccessAndReboot",
            ResultStatus::Failed => "Failed",
            ResultStatus::Cancelled => "Cancelled",
            ResultStatus::TimedOut => "TimedOut",
        }
    }

    /// `SuccessAndReboot` pauses a document; it is not terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResultStatus::Success
                | ResultStatus::Failed
                | ResultStatus::Cancelled
                | ResultStatus::TimedOut
        )
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentType {
    SendCommand,
    SendCommandOffline,
    CancelCommand,
    CancelCommandOffline,
}

impl DocumentType {
    pub fn from_topic(topic: &str) -> Option<Self> {
        if topic.starts_with(SEND_COMMAND_OFFLINE_TOPIC_PREFIX) {
            Some(DocumentType::SendCommandOffline)
        } else if topic.starts_with(SEND_COMMAND_TOPIC_PREFIX) {
            Some(DocumentType::SendCommand)
        } else if topic.starts_with(CANCEL_COMMAND_OFFLINE_TOPIC_PREFIX) {
            Some(DocumentType::CancelCommandOffline)
        } else if topic.starts_with(CANCEL_COMMAND_TOPIC_PREFIX) {
            Some(DocumentType::CancelCommand)
        } else {
            None
        }
    }

    pub fn is_send(self) -> bool {
        matches!(
            self,
            DocumentType::SendCommand | DocumentType::SendCommandOffline
        )
    }

    pub fn is_cancel(self) -> bool {
        matches!(
            self,
            DocumentType::CancelCommand | DocumentType::CancelCommandOffline
        )
    }
}

/// Full persisted record of one command instance.
///
/// A default value stands for "no prior state": a missing or unreadable
/// state file reads back as `DocumentState::default()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentState {
    #[serde(default)]
    pub document_information: DocumentInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    #[serde(default)]
    pub instance_plugins_information: Vec<PluginState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_information: Option<CancelCommandInfo>,
}

impl DocumentState {
    pub fn is_empty(&self) -> bool {
        self.document_information.document_status.is_none()
    }

    pub fn status(&self) -> Option<ResultStatus> {
        self.document_information.document_status
    }

    pub fn plugin(&self, id: &str) -> Option<&PluginState> {
        self.instance_plugins_information
            .iter()
            .find(|plugin| plugin.id == id)
    }

    /// Replaces the plugin with the same id in place, or appends it.
    pub fn upsert_plugin(&mut self, plugin: PluginState) {
        match self
            .instance_plugins_information
            .iter_mut()
            .find(|existing| existing.id == plugin.id)
        {
            Some(existing) => *existing = plugin,
            None => self.instance_plugins_information.push(plugin),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DocumentInfo {
    #[serde(rename = "DocumentID")]
    pub document_id: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "MessageID")]
    pub message_id: String,
    #[serde(rename = "InstanceID")]
    pub instance_id: String,
    pub document_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_status: Option<ResultStatus>,
    pub created_date: String,
    #[serde(rename = "RunID")]
    pub run_id: String,
    pub additional_info: AdditionalInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AdditionalInfo {
    pub agent: AgentInfo,
    pub date_time: String,
    pub runtime_status_counts: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentInfo {
    pub name: String,
    pub version: String,
    pub lang: String,
    pub os: String,
    pub os_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginState {
    #[serde(rename = "Id")]
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
    pub code: i32,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<String>,
    pub configuration: PluginConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginConfiguration {
    pub properties: Value,
    pub orchestration_directory: String,
    #[serde(rename = "MessageId")]
    pub message_id: String,
    pub plugin_id: String,
    pub plugin_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct CancelCommandInfo {
    #[serde(rename = "CancelMessageID")]
    pub cancel_message_id: String,
    #[serde(rename = "CancelCommandID")]
    pub cancel_command_id: String,
    pub payload: String,
    pub debug_info: String,
}
