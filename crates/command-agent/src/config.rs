use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::layers::execution::ShellSettings;
use crate::layers::service::compat::{ManagedInstanceCompat, DEFAULT_INCOMPATIBLE_DOCUMENTS};
use crate::layers::service::ProcessorSettings;
use crate::layers::state::FaultPolicy;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AgentConfig {
    #[serde(default = "default_data_root")]
    pub(crate) data_root: PathBuf,
    #[serde(default)]
    pub(crate) instance_id: String,
    #[serde(default = "default_orchestration_root")]
    pub(crate) orchestration_root: String,
    #[serde(default)]
    pub(crate) pools: PoolConfig,
    #[serde(default)]
    pub(crate) store: StoreConfig,
    #[serde(default)]
    pub(crate) retention: RetentionConfig,
    #[serde(default)]
    pub(crate) transport: TransportConfig,
    #[serde(default)]
    pub(crate) execution: ExecutionConfig,
    #[serde(default)]
    pub(crate) platform: PlatformConfig,
}

impl AgentConfig {
    pub(crate) fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub(crate) fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.instance_id.trim().is_empty() {
            bail!("instance_id must be set");
        }
        if self.orchestration_root.trim().is_empty() {
            bail!("orchestration_root must not be empty");
        }
        let pools = &self.pools;
        for (name, size) in [
            ("pools.send_workers", pools.send_workers),
            ("pools.send_queue", pools.send_queue),
            ("pools.cancel_workers", pools.cancel_workers),
            ("pools.cancel_queue", pools.cancel_queue),
        ] {
            if size == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.retention.interval_secs == 0 {
            bail!("retention.interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub(crate) fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            orchestration_root: self.orchestration_root.clone(),
            send_workers: self.pools.send_workers,
            send_queue: self.pools.send_queue,
            cancel_workers: self.pools.cancel_workers,
            cancel_queue: self.pools.cancel_queue,
            max_transport_errors: self.transport.max_errors,
            compat: ManagedInstanceCompat {
                managed_instance: self.platform.managed_instance,
                region: self.platform.region.clone(),
                incompatible_documents: self.platform.incompatible_documents.clone(),
            },
        }
    }

    pub(crate) fn shell_settings(&self) -> anyhow::Result<ShellSettings> {
        Ok(ShellSettings {
            default_timeout: Duration::from_secs(self.execution.default_timeout_secs),
            max_output_bytes: usize::try_from(self.execution.max_output_bytes)
                .context("execution.max_output_bytes does not fit in memory")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct PoolConfig {
    pub(crate) send_workers: usize,
    pub(crate) send_queue: usize,
    pub(crate) cancel_workers: usize,
    pub(crate) cancel_queue: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            send_workers: 5,
            send_queue: 64,
            cancel_workers: 3,
            cancel_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct StoreConfig {
    pub(crate) fault_policy: FaultPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct RetentionConfig {
    pub(crate) hours: u64,
    pub(crate) interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            hours: 14 * 24,
            interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct TransportConfig {
    pub(crate) max_errors: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { max_errors: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ExecutionConfig {
    pub(crate) default_timeout_secs: u64,
    pub(crate) max_output_bytes: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3600,
            max_output_bytes: 2500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct PlatformConfig {
    pub(crate) managed_instance: bool,
    pub(crate) region: Option<String>,
    pub(crate) incompatible_documents: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            managed_instance: false,
            region: None,
            incompatible_documents: DEFAULT_INCOMPATIBLE_DOCUMENTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_orchestration_root() -> String {
    "orchestration".to_string()
}
