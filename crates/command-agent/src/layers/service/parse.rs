use std::path::Path;
use std::sync::OnceLock;

use agent_protocol::{
    AdditionalInfo, AgentInfo, CancelCommandInfo, CancelPayload, DocumentInfo, DocumentState,
    DocumentType, InboundMessage, ResultStatus, SendCommandPayload,
};
use anyhow::{bail, Context};

use super::compat::ManagedInstanceCompat;
use super::scrub;
use crate::layers::document::{DocumentInitializer, ParserInfo};
use crate::layers::state::is_plain_name;
use crate::shared::time;

pub const AGENT_NAME: &str = "command-agent";
const UPDATE_PLUGINS: &[&str] = &["aws:updateAgent", "aws:updateSsmAgent"];

pub fn validate(message: &InboundMessage) -> anyhow::Result<()> {
    let fields = [
        ("MessageId", &message.message_id),
        ("Topic", &message.topic),
        ("Payload", &message.payload),
        ("Destination", &message.destination),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            bail!("{name} is missing");
        }
    }
    if !is_plain_name(&message.destination) {
        bail!("Destination {:?} is not a valid instance id", message.destination);
    }
    Ok(())
}

/// Document ids name the state files, so they must be one plain path
/// component.
fn checked_document_id(id: &str) -> anyhow::Result<String> {
    if !is_plain_name(id) {
        bail!("command id {id:?} is not a valid document id");
    }
    Ok(id.to_string())
}

/// Message ids look like `aws.ssm.<command id>.<instance id>`.
pub fn command_id_from_message_id(message_id: &str) -> anyhow::Result<String> {
    match message_id.split('.').nth(2) {
        Some(command_id) => checked_document_id(command_id),
        None => bail!("cannot derive a command id from message id {message_id:?}"),
    }
}

pub fn new_document_info(
    message: &InboundMessage,
    command_id: &str,
    document_name: &str,
) -> DocumentInfo {
    let now = time::now();
    DocumentInfo {
        document_id: command_id.to_string(),
        command_id: command_id.to_string(),
        message_id: message.message_id.clone(),
        instance_id: message.destination.clone(),
        document_name: document_name.to_string(),
        document_status: Some(ResultStatus::Pending),
        created_date: message.created_date.clone().unwrap_or_else(|| now.clone()),
        run_id: now.clone(),
        additional_info: AdditionalInfo {
            agent: agent_info().clone(),
            date_time: now,
            runtime_status_counts: Default::default(),
        },
    }
}

/// Builds the state of a send document with its plugins initialized.
/// `orchestration_root` is the per-instance orchestration directory.
pub fn parse_send_command(
    message: &InboundMessage,
    document_type: DocumentType,
    orchestration_root: &Path,
    initializer: &dyn DocumentInitializer,
    compat: &ManagedInstanceCompat,
) -> anyhow::Result<DocumentState> {
    let payload: SendCommandPayload = serde_json::from_str(&message.payload)
        .context("Encountered error while parsing input - internal error")?;
    let command_id = match command_id_from_message_id(&message.message_id) {
        Ok(command_id) => command_id,
        Err(_) if !payload.command_id.is_empty() => checked_document_id(&payload.command_id)?,
        Err(err) => return Err(err),
    };
    scrub::log_payload(&message.message_id, &payload);

    let info = new_document_info(message, &command_id, &payload.document_name);
    let parser_info = ParserInfo {
        orchestration_dir: orchestration_root.join(&command_id),
        message_id: info.message_id.clone(),
        document_id: info.document_id.clone(),
    };
    let mut state = initializer.initialize(
        document_type,
        &payload.document_content,
        info,
        &parser_info,
        &payload.parameters,
    )?;
    compat.apply(&mut state)?;
    Ok(state)
}

/// Builds the state of a cancel document. Its id is the command id of the
/// cancel message itself; the target is derived from `CancelMessageId`.
pub fn parse_cancel_command(
    message: &InboundMessage,
    document_type: DocumentType,
) -> anyhow::Result<DocumentState> {
    let payload: CancelPayload =
        serde_json::from_str(&message.payload).context("invalid cancel payload")?;
    let command_id = command_id_from_message_id(&message.message_id)?;
    let cancel_command_id = command_id_from_message_id(&payload.cancel_message_id)?;
    Ok(DocumentState {
        document_information: new_document_info(message, &command_id, ""),
        document_type: Some(document_type),
        instance_plugins_information: Vec::new(),
        cancel_information: Some(CancelCommandInfo {
            cancel_message_id: payload.cancel_message_id,
            debug_info: format!("Command {cancel_command_id} is yet to be cancelled"),
            cancel_command_id,
            payload: message.payload.clone(),
        }),
    })
}

/// Update plugins hand message deletion to the process they start.
pub fn is_update_plugin(state: &DocumentState) -> bool {
    state
        .instance_plugins_information
        .iter()
        .any(|plugin| UPDATE_PLUGINS.contains(&plugin.name.as_str()))
}

pub fn agent_info() -> &'static AgentInfo {
    static INFO: OnceLock<AgentInfo> = OnceLock::new();
    INFO.get_or_init(|| AgentInfo {
        name: AGENT_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        lang: "en-US".to_string(),
        os: std::env::consts::OS.to_string(),
        os_version: std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|release| release.trim().to_string())
            .unwrap_or_default(),
    })
}
