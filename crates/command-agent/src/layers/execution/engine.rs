use std::sync::Arc;

use agent_protocol::{
    DocumentInfo, DocumentResult, DocumentState, PluginResult, PluginState, ResultStatus,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::layers::state::{DocumentKey, Stage, StateStore};

/// Runs the plugins of one document.
///
/// `run` returns immediately; results stream through the receiver in the
/// order they are produced and the channel closes when execution ends.
/// Implementations persist plugin progress through the given store handle.
pub trait ExecutionEngine: Send + Sync {
    fn run(&self, cancel: CancellationToken, store: DocumentFileStore)
        -> mpsc::Receiver<DocumentResult>;
}

/// Store handle bound to a single document in a single stage.
#[derive(Clone)]
pub struct DocumentFileStore {
    store: Arc<StateStore>,
    key: DocumentKey,
    stage: Stage,
}

impl DocumentFileStore {
    pub fn new(store: Arc<StateStore>, key: DocumentKey, stage: Stage) -> Self {
        Self { store, key, stage }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub async fn load(&self) -> anyhow::Result<DocumentState> {
        self.store.read(&self.key, self.stage).await
    }

    pub async fn save_plugin(&self, plugin: PluginState) -> anyhow::Result<()> {
        self.store
            .write_plugin_state(&self.key, self.stage, plugin)
            .await
    }

    pub async fn save_info(&self, info: DocumentInfo) -> anyhow::Result<()> {
        self.store.write_info(&self.key, self.stage, info).await
    }
}

/// Builds the reply for a document from its persisted state.
pub fn document_result(
    state: &DocumentState,
    status: ResultStatus,
    last_plugin: &str,
) -> DocumentResult {
    let info = &state.document_information;
    DocumentResult {
        message_id: info.message_id.clone(),
        document_name: info.document_name.clone(),
        status,
        last_plugin: last_plugin.to_string(),
        plugin_results: state
            .instance_plugins_information
            .iter()
            .map(PluginResult::from_state)
            .collect(),
        debug_info: None,
        runtime_status_counts: info.additional_info.runtime_status_counts.clone(),
    }
}
