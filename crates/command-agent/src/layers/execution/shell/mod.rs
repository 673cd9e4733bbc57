mod output;
mod process;
mod script;
mod stream;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_protocol::{DocumentResult, PluginState, ResultStatus};
use anyhow::{bail, Context};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::{document_result, DocumentFileStore, ExecutionEngine};
use crate::shared::time;

use self::output::plugin_output;
use self::script::{run_script, ScriptStep, StepEnd};

pub const RUN_SHELL_SCRIPT_PLUGIN: &str = "aws:runShellScript";
/// Exit code a script uses to ask for a reboot before the next plugin.
pub const REBOOT_EXIT_CODE: i32 = 3010;

#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub default_timeout: Duration,
    pub max_output_bytes: usize,
}

/// Runs `aws:runShellScript` plugins in document order. Every other plugin
/// name is recorded as failed.
pub struct ShellEngine {
    settings: ShellSettings,
}

impl ShellEngine {
    pub fn new(settings: ShellSettings) -> Self {
        Self { settings }
    }
}

impl ExecutionEngine for ShellEngine {
    fn run(
        &self,
        cancel: CancellationToken,
        store: DocumentFileStore,
    ) -> mpsc::Receiver<DocumentResult> {
        let (tx, rx) = mpsc::channel(16);
        let settings = self.settings.clone();
        tokio::spawn(async move {
            if let Err(err) = run_document(&settings, &cancel, &store, &tx).await {
                tracing::error!(
                    event = "engine.failed",
                    document_id = %store.key().document_id,
                    error = %format!("{err:#}"),
                );
            }
        });
        rx
    }
}

async fn run_document(
    settings: &ShellSettings,
    cancel: &CancellationToken,
    store: &DocumentFileStore,
    tx: &mpsc::Sender<DocumentResult>,
) -> anyhow::Result<()> {
    let state = store.load().await?;
    if state.is_empty() {
        bail!("no persisted state for document {}", store.key().document_id);
    }

    let mut last_plugin = String::new();
    for mut plugin in state.instance_plugins_information {
        match plugin.status {
            Some(status) if status.is_terminal() => continue,
            // The reboot this plugin asked for has happened.
            Some(ResultStatus::SuccessAndReboot) => {
                plugin.status = Some(ResultStatus::Success);
                store.save_plugin(plugin).await?;
                continue;
            }
            _ => {}
        }

        plugin.start_date_time = Some(time::now());
        let outcome = if cancel.is_cancelled() {
            PluginOutcome::cancelled()
        } else {
            plugin.status = Some(ResultStatus::InProgress);
            store.save_plugin(plugin.clone()).await?;
            run_plugin(settings, &plugin, cancel).await
        };
        plugin.status = Some(outcome.status);
        plugin.code = outcome.code;
        plugin.output = outcome.output;
        plugin.end_date_time = Some(time::now());
        tracing::info!(
            event = "engine.plugin_finished",
            document_id = %store.key().document_id,
            plugin_id = %plugin.id,
            status = %outcome.status,
            code = outcome.code,
        );
        last_plugin = plugin.id.clone();
        store.save_plugin(plugin).await?;

        let current = store.load().await?;
        let progress = if outcome.status == ResultStatus::SuccessAndReboot {
            ResultStatus::SuccessAndReboot
        } else {
            ResultStatus::InProgress
        };
        if tx
            .send(document_result(&current, progress, &last_plugin))
            .await
            .is_err()
        {
            tracing::debug!(event = "engine.result_dropped", plugin_id = %last_plugin);
        }
        if outcome.status == ResultStatus::SuccessAndReboot {
            break;
        }
    }

    let mut current = store.load().await?;
    let (status, counts) = aggregate(&current.instance_plugins_information);
    let mut info = current.document_information.clone();
    info.document_status = Some(status);
    info.additional_info.runtime_status_counts = counts;
    info.additional_info.date_time = time::now();
    store.save_info(info.clone()).await?;
    current.document_information = info;
    if tx
        .send(document_result(&current, status, &last_plugin))
        .await
        .is_err()
    {
        tracing::debug!(event = "engine.result_dropped", plugin_id = %last_plugin);
    }
    Ok(())
}

/// Overall document status and per-status plugin counts.
fn aggregate(plugins: &[PluginState]) -> (ResultStatus, BTreeMap<String, u32>) {
    let mut counts = BTreeMap::new();
    for plugin in plugins {
        let status = plugin.status.unwrap_or(ResultStatus::Pending);
        *counts.entry(status.as_str().to_string()).or_insert(0) += 1;
    }
    let has = |status: ResultStatus| plugins.iter().any(|plugin| plugin.status == Some(status));
    let status = [
        ResultStatus::SuccessAndReboot,
        ResultStatus::Failed,
        ResultStatus::TimedOut,
        ResultStatus::Cancelled,
    ]
    .into_iter()
    .find(|status| has(*status))
    .unwrap_or(ResultStatus::Success);
    (status, counts)
}

struct PluginOutcome {
    status: ResultStatus,
    code: i32,
    output: String,
}

impl PluginOutcome {
    fn cancelled() -> Self {
        Self {
            status: ResultStatus::Cancelled,
            code: -1,
            output: "execution cancelled before start".to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            code: 1,
            output: message.into(),
        }
    }
}

async fn run_plugin(
    settings: &ShellSettings,
    plugin: &PluginState,
    cancel: &CancellationToken,
) -> PluginOutcome {
    if plugin.name != RUN_SHELL_SCRIPT_PLUGIN {
        return PluginOutcome::failed(format!(
            "plugin {} is not supported by this agent",
            plugin.name
        ));
    }
    match run_shell_plugin(settings, plugin, cancel).await {
        Ok(outcome) => outcome,
        Err(err) => PluginOutcome::failed(format!("{err:#}")),
    }
}

async fn run_shell_plugin(
    settings: &ShellSettings,
    plugin: &PluginState,
    cancel: &CancellationToken,
) -> anyhow::Result<PluginOutcome> {
    let inputs = script_inputs(&plugin.configuration.properties)?;
    let base = Path::new(&plugin.configuration.orchestration_directory);
    if base.as_os_str().is_empty() {
        bail!("plugin {} has no orchestration directory", plugin.id);
    }

    let mut outputs = Vec::new();
    let mut outcome = PluginOutcome {
        status: ResultStatus::Success,
        code: 0,
        output: String::new(),
    };
    for (index, input) in inputs.iter().enumerate() {
        let output_dir = if inputs.len() == 1 {
            base.to_path_buf()
        } else {
            base.join(index.to_string())
        };
        let step = ScriptStep {
            commands: &input.commands,
            working_dir: input.working_directory.as_deref(),
            timeout: input.timeout.unwrap_or(settings.default_timeout),
            output_dir,
            max_output_bytes: settings.max_output_bytes,
        };
        let run = run_script(step, cancel).await?;
        outputs.push(plugin_output(&run.stdout, &run.stderr));
        let (status, code) = match run.end {
            StepEnd::Exited(Some(0)) => (ResultStatus::Success, 0),
            StepEnd::Exited(Some(REBOOT_EXIT_CODE)) => {
                (ResultStatus::SuccessAndReboot, REBOOT_EXIT_CODE)
            }
            StepEnd::Exited(Some(code)) => (ResultStatus::Failed, code),
            StepEnd::Exited(None) => (ResultStatus::Failed, -1),
            StepEnd::Cancelled => (ResultStatus::Cancelled, -1),
            StepEnd::TimedOut => (ResultStatus::TimedOut, -1),
        };
        outcome.status = status;
        outcome.code = code;
        if status != ResultStatus::Success {
            break;
        }
    }
    outcome.output = outputs.join("\n");
    Ok(outcome)
}

#[derive(Debug, PartialEq)]
struct ScriptInput {
    commands: String,
    working_directory: Option<PathBuf>,
    timeout: Option<Duration>,
}

/// Accepts a single input object (schema 2.x) or a list of them (1.2).
fn script_inputs(properties: &Value) -> anyhow::Result<Vec<ScriptInput>> {
    match properties {
        Value::Array(items) if !items.is_empty() => items.iter().map(script_input).collect(),
        Value::Object(_) => Ok(vec![script_input(properties)?]),
        _ => bail!("runShellScript expects an object or a non-empty list of objects"),
    }
}

fn script_input(value: &Value) -> anyhow::Result<ScriptInput> {
    let commands = match value.get("runCommand") {
        Some(Value::String(line)) => line.clone(),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| line.as_str().context("runCommand entries must be strings"))
            .collect::<anyhow::Result<Vec<_>>>()?
            .join("\n"),
        _ => bail!("runCommand is missing"),
    };
    let working_directory = value
        .get("workingDirectory")
        .map(scalar)
        .and_then(Value::as_str)
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from);
    let timeout = match value.get("timeoutSeconds").map(scalar) {
        None | Some(Value::Null) => None,
        Some(Value::Number(number)) => number.as_u64().map(Duration::from_secs),
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(Duration::from_secs(
            text.trim()
                .parse()
                .with_context(|| format!("invalid timeoutSeconds {text:?}"))?,
        )),
        Some(other) => bail!("invalid timeoutSeconds {other}"),
    };
    Ok(ScriptInput {
        commands,
        working_directory,
        timeout,
    })
}

/// Parameters arrive as single-element lists; unwrap those.
fn scalar(value: &Value) -> &Value {
    match value {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}
