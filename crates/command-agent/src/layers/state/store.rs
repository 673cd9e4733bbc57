use agent_protocol::{DocumentInfo, DocumentState, PluginState};
use anyhow::Context;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::locks::{LockMode, LockRegistry};
use super::paths::{Stage, StoreLayout};

/// What the store does when the file system misbehaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the failure and carry on with a zero value.
    #[default]
    IgnoreAndLog,
    /// Return the failure to the caller.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub document_id: String,
    pub instance_id: String,
}

impl DocumentKey {
    pub fn new(document_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn of(info: &DocumentInfo) -> Self {
        Self::new(info.document_id.clone(), info.instance_id.clone())
    }
}

/// File-backed document state, one JSON file per document per stage.
///
/// Every operation on a document goes through that document's lock from
/// the shared [`LockRegistry`], so read-modify-write sequences never
/// interleave with another writer of the same document.
pub struct StateStore {
    layout: StoreLayout,
    locks: Arc<LockRegistry>,
    fault_policy: FaultPolicy,
}

impl StateStore {
    pub fn new(layout: StoreLayout, locks: Arc<LockRegistry>, fault_policy: FaultPolicy) -> Self {
        Self {
            layout,
            locks,
            fault_policy,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    #[cfg(test)]
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Reads the document; an absent file yields `DocumentState::default()`.
    pub async fn read(&self, key: &DocumentKey, stage: Stage) -> anyhow::Result<DocumentState> {
        let _lock = self.locks.acquire(&key.document_id, LockMode::Read).await;
        let path = self.path(key, stage);
        let state = load_state(&path).await;
        self.absorb(state, "read", &path)
    }

    // No production caller yet; kept with the rest of the store surface.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn read_info(&self, key: &DocumentKey, stage: Stage) -> anyhow::Result<DocumentInfo> {
        Ok(self.read(key, stage).await?.document_information)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn read_plugin_state(
        &self,
        key: &DocumentKey,
        stage: Stage,
        plugin_id: &str,
    ) -> anyhow::Result<Option<PluginState>> {
        let state = self.read(key, stage).await?;
        Ok(state.plugin(plugin_id).cloned())
    }

    /// Overwrites the document unconditionally.
    pub async fn write(
        &self,
        key: &DocumentKey,
        stage: Stage,
        state: &DocumentState,
    ) -> anyhow::Result<()> {
        let _lock = self.locks.acquire(&key.document_id, LockMode::Write).await;
        let path = self.path(key, stage);
        let result = save_state(&path, state).await;
        self.absorb(result, "write", &path)
    }

    /// Inserts or replaces one plugin entry by id, keeping its position.
    pub async fn write_plugin_state(
        &self,
        key: &DocumentKey,
        stage: Stage,
        plugin: PluginState,
    ) -> anyhow::Result<()> {
        let _lock = self.locks.acquire(&key.document_id, LockMode::Write).await;
        let path = self.path(key, stage);
        let mut state = self.absorb(load_state(&path).await, "read", &path)?;
        state.upsert_plugin(plugin);
        let result = save_state(&path, &state).await;
        self.absorb(result, "write", &path)
    }

    pub async fn write_info(
        &self,
        key: &DocumentKey,
        stage: Stage,
        info: DocumentInfo,
    ) -> anyhow::Result<()> {
        let _lock = self.locks.acquire(&key.document_id, LockMode::Write).await;
        let path = self.path(key, stage);
        let mut state = self.absorb(load_state(&path).await, "read", &path)?;
        state.document_information = info;
        let result = save_state(&path, &state).await;
        self.absorb(result, "write", &path)
    }

    /// Relocates the document file between stage directories. Reaching
    /// `Completed` ends the document's life, so its lock entry is dropped.
    pub async fn move_stage(&self, key: &DocumentKey, from: Stage, to: Stage) -> anyhow::Result<()> {
        let lock = self.locks.acquire(&key.document_id, LockMode::Write).await;
        let source = self.path(key, from);
        let destination = self.path(key, to);
        let result = relocate(&source, &destination).await;
        match &result {
            Ok(()) => tracing::debug!(
                document_id = %key.document_id,
                from = %from,
                to = %to,
                "moved document state"
            ),
            Err(err) => tracing::debug!(
                document_id = %key.document_id,
                from = %from,
                to = %to,
                error = %err,
                "moving document state failed"
            ),
        }
        drop(lock);
        if to == Stage::Completed {
            self.locks.forget(&key.document_id);
        }
        self.absorb(result, "move", &source)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn remove(&self, key: &DocumentKey, stage: Stage) -> anyhow::Result<()> {
        let _lock = self.locks.acquire(&key.document_id, LockMode::Write).await;
        let path = self.path(key, stage);
        let result = tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete {}", path.display()));
        if result.is_ok() {
            tracing::debug!(path = %path.display(), "deleted document state");
        }
        self.absorb(result, "remove", &path)
    }

    pub async fn exists(&self, key: &DocumentKey, stage: Stage) -> bool {
        let _lock = self.locks.acquire(&key.document_id, LockMode::Read).await;
        tokio::fs::try_exists(self.path(key, stage))
            .await
            .unwrap_or(false)
    }

    /// A document staged in Pending or Current is still executing.
    pub async fn is_currently_executing(&self, key: &DocumentKey) -> bool {
        if key.document_id.is_empty() {
            return false;
        }
        self.exists(key, Stage::Pending).await || self.exists(key, Stage::Current).await
    }

    /// Document ids staged in `stage`, sorted.
    pub async fn list(&self, instance_id: &str, stage: Stage) -> anyhow::Result<Vec<String>> {
        let dir = self.layout.state_dir(instance_id, stage);
        let result = list_documents(&dir).await;
        self.absorb(result, "list", &dir)
    }

    fn path(&self, key: &DocumentKey, stage: Stage) -> PathBuf {
        self.layout
            .state_file(&key.document_id, &key.instance_id, stage)
    }

    fn absorb<T: Default>(
        &self,
        result: anyhow::Result<T>,
        operation: &'static str,
        path: &Path,
    ) -> anyhow::Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => match self.fault_policy {
                FaultPolicy::IgnoreAndLog => {
                    tracing::error!(
                        operation,
                        path = %path.display(),
                        error = %format!("{err:#}"),
                        "document state i/o failed"
                    );
                    Ok(T::default())
                }
                FaultPolicy::FailFast => Err(err),
            },
        }
    }
}

async fn load_state(path: &Path) -> anyhow::Result<DocumentState> {
    let payload = match tokio::fs::read(path).await {
        Ok(payload) => payload,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no document state on disk");
            return Ok(DocumentState::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let state = serde_json::from_slice(&payload)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::trace!(path = %path.display(), "loaded document state");
    Ok(state)
}

async fn save_state(path: &Path, state: &DocumentState) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} has no file name", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let payload = serde_json::to_vec_pretty(state)?;
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!(path = %path.display(), "overwriting document state");
    }
    let staging = parent.join(format!(".{file_name}.tmp"));
    tokio::fs::write(&staging, payload)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    restrict_permissions(&staging).await?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("failed to restrict {}", path.display()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

async fn relocate(source: &Path, destination: &Path) -> anyhow::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::rename(source, destination).await.with_context(|| {
        format!(
            "failed to move {} to {}",
            source.display(),
            destination.display()
        )
    })
}

async fn list_documents(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("failed to list {}", dir.display())),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
