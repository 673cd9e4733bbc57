use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agent_protocol::{
    DocumentInfo, DocumentResult, DocumentState, DocumentType, FailureReason, ResultStatus,
};
use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::layers::execution::engine::document_result;
use crate::layers::execution::{DocumentFileStore, ExecutionEngine};
use crate::layers::service::transport::Transport;

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("{prefix}-{nanos}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn sample_state(
    document_id: &str,
    instance_id: &str,
    document_type: DocumentType,
) -> DocumentState {
    DocumentState {
        document_information: DocumentInfo {
            document_id: document_id.to_string(),
            command_id: document_id.to_string(),
            message_id: format!("aws.ssm.{document_id}.{instance_id}"),
            instance_id: instance_id.to_string(),
            document_name: "AWS-RunShellScript".to_string(),
            document_status: Some(ResultStatus::Pending),
            ..DocumentInfo::default()
        },
        document_type: Some(document_type),
        ..DocumentState::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportCall {
    Acknowledge(String),
    Fail(String, FailureReason),
    Delete(String),
    Reply(String, ResultStatus),
}

/// Records successful transport calls in order.
#[derive(Default)]
pub(crate) struct FakeTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_acknowledge: AtomicBool,
}

impl FakeTransport {
    pub(crate) fn fail_acknowledge(&self, fail: bool) {
        self.fail_acknowledge.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) async fn wait_for(&self, done: impl Fn(&[TransportCall]) -> bool) {
        eventually(|| done(&self.calls()), "transport calls").await;
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn acknowledge(&self, message_id: &str) -> anyhow::Result<()> {
        if self.fail_acknowledge.load(Ordering::SeqCst) {
            bail!("acknowledge rejected");
        }
        self.record(TransportCall::Acknowledge(message_id.to_string()));
        Ok(())
    }

    async fn fail_message(&self, message_id: &str, reason: FailureReason) -> anyhow::Result<()> {
        self.record(TransportCall::Fail(message_id.to_string(), reason));
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> anyhow::Result<()> {
        self.record(TransportCall::Delete(message_id.to_string()));
        Ok(())
    }

    async fn send_response(&self, result: &DocumentResult) -> anyhow::Result<()> {
        self.record(TransportCall::Reply(result.message_id.clone(), result.status));
        Ok(())
    }
}

/// Engine that finishes with a fixed status, or waits for cancellation
/// and reports `Cancelled`.
pub(crate) struct ScriptedEngine {
    outcome: Option<ResultStatus>,
    runs: AtomicUsize,
}

impl ScriptedEngine {
    pub(crate) fn finishing(status: ResultStatus) -> Self {
        Self {
            outcome: Some(status),
            runs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn until_cancelled() -> Self {
        Self {
            outcome: None,
            runs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_started(&self, runs: usize) {
        eventually(|| self.runs() >= runs, "engine start").await;
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn run(
        &self,
        cancel: CancellationToken,
        store: DocumentFileStore,
    ) -> mpsc::Receiver<DocumentResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let status = match outcome {
                Some(status) => status,
                None => {
                    cancel.cancelled().await;
                    ResultStatus::Cancelled
                }
            };
            let Ok(mut state) = store.load().await else {
                return;
            };
            state.document_information.document_status = Some(status);
            let _ = store.save_info(state.document_information.clone()).await;
            let _ = tx.send(document_result(&state, status, "step")).await;
        });
        rx
    }
}
