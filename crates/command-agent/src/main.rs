mod cli;
mod config;
mod layers;
mod shared;
#[cfg(test)]
mod test_utils;

use crate::cli::Args;
use crate::config::AgentConfig;
use crate::layers::document::StepInitializer;
use crate::layers::execution::ShellEngine;
use crate::layers::service::logging::init_tracing;
use crate::layers::service::{spawn_accept_loop, ChannelTransport, Processor};
use crate::layers::state::retention::spawn_periodic_sweep;
use crate::layers::state::{LockRegistry, RetentionSweeper, StateStore, StoreLayout, SweepSchedule};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _file_guard = init_tracing(&args.log_dir, args.log_to_stderr)?;

    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let layout = StoreLayout::new(&config.data_root);
    std::fs::create_dir_all(layout.document_root(&config.instance_id)).with_context(|| {
        format!("failed to create data root {}", config.data_root.display())
    })?;

    let store = Arc::new(StateStore::new(
        layout.clone(),
        Arc::new(LockRegistry::new()),
        config.store.fault_policy,
    ));
    let transport = ChannelTransport::new();
    let processor = Processor::start(
        store,
        Arc::new(transport.clone()),
        Arc::new(ShellEngine::new(config.shell_settings()?)),
        Arc::new(StepInitializer),
        config.processor_settings(),
    );

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    spawn_accept_loop(listener, Arc::clone(&processor), transport);
    tracing::info!(
        event = "agent.started",
        listen_addr = %args.listen_addr,
        instance_id = %config.instance_id,
        data_root = %config.data_root.display(),
    );

    processor.recover(&config.instance_id).await;

    spawn_periodic_sweep(
        Arc::new(RetentionSweeper::new(layout)),
        SweepSchedule {
            instance_id: config.instance_id.clone(),
            orchestration_root: config.orchestration_root.clone(),
            retention_hours: config.retention.hours,
            interval: Duration::from_secs(config.retention.interval_secs),
        },
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(event = "agent.stopping");
    processor.shutdown();
    Ok(())
}
