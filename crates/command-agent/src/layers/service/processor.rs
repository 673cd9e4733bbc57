use std::path::PathBuf;
use std::sync::Arc;

use agent_protocol::{
    DocumentResult, DocumentState, DocumentType, FailureReason, InboundMessage, ResultStatus,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::compat::ManagedInstanceCompat;
use super::parse::{self, is_update_plugin};
use super::policy::StopPolicy;
use super::transport::Transport;
use crate::layers::document::DocumentInitializer;
use crate::layers::execution::{
    DocumentFileStore, ExecutionEngine, WorkHandler, WorkItem, WorkKind, WorkerPool,
};
use crate::layers::state::{DocumentKey, Stage, StateStore};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub orchestration_root: String,
    pub send_workers: usize,
    pub send_queue: usize,
    pub cancel_workers: usize,
    pub cancel_queue: usize,
    pub max_transport_errors: usize,
    pub compat: ManagedInstanceCompat,
}

/// Drives each inbound message from validation to deletion.
///
/// Documents move through the store stages Pending -> Current -> Completed.
/// Send documents run on the send pool and cancel documents on the cancel
/// pool, both keyed by message id.
pub struct Processor {
    store: Arc<StateStore>,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn ExecutionEngine>,
    initializer: Arc<dyn DocumentInitializer>,
    send_pool: WorkerPool,
    cancel_pool: WorkerPool,
    stop_policy: StopPolicy,
    settings: ProcessorSettings,
}

impl Processor {
    pub fn start(
        store: Arc<StateStore>,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn ExecutionEngine>,
        initializer: Arc<dyn DocumentInitializer>,
        settings: ProcessorSettings,
    ) -> Arc<Self> {
        let (send_pool, send_queue) = WorkerPool::new("send", settings.send_queue);
        let (cancel_pool, cancel_queue) = WorkerPool::new("cancel", settings.cancel_queue);
        let processor = Arc::new(Self {
            store,
            transport,
            engine,
            initializer,
            send_pool,
            cancel_pool,
            stop_policy: StopPolicy::new(settings.max_transport_errors),
            settings,
        });
        let handler: Arc<dyn WorkHandler> = processor.clone();
        send_queue.spawn(processor.settings.send_workers, Arc::clone(&handler));
        cancel_queue.spawn(processor.settings.cancel_workers, handler);
        processor
    }

    pub fn is_healthy(&self) -> bool {
        self.stop_policy.is_healthy()
    }

    pub fn shutdown(&self) {
        self.send_pool.shutdown();
        self.cancel_pool.shutdown();
    }

    /// Whether the document this message would create is already staged.
    pub async fn is_in_flight(&self, message: &InboundMessage) -> bool {
        let Ok(command_id) = parse::command_id_from_message_id(&message.message_id) else {
            return false;
        };
        self.store
            .is_currently_executing(&DocumentKey::new(command_id, message.destination.clone()))
            .await
    }

    pub async fn process_message(&self, message: InboundMessage) {
        let message_id = message.message_id.clone();
        tracing::debug!(event = "message.processing", id = %message_id);

        if let Err(err) = parse::validate(&message) {
            tracing::error!(event = "message.invalid", id = %message_id, error = %err);
            return;
        }

        let state = match DocumentType::from_topic(&message.topic) {
            Some(document_type) if document_type.is_send() => {
                match self.parse_send(&message, document_type) {
                    Ok(state) => state,
                    Err(err) => {
                        let reason = format!("{err:#}");
                        tracing::error!(event = "message.parse_failed", id = %message_id, error = %reason);
                        self.reply(&DocumentResult::document_level(
                            message_id.as_str(),
                            ResultStatus::Failed,
                            reason,
                        ))
                        .await;
                        return;
                    }
                }
            }
            Some(document_type) => match parse::parse_cancel_command(&message, document_type) {
                Ok(state) => state,
                Err(err) => {
                    tracing::error!(
                        event = "message.parse_failed",
                        id = %message_id,
                        error = %format!("{err:#}"),
                    );
                    self.fail(&message_id).await;
                    return;
                }
            },
            None => {
                tracing::error!(
                    event = "message.unexpected_topic",
                    id = %message_id,
                    topic = %message.topic,
                );
                self.fail(&message_id).await;
                return;
            }
        };

        let key = DocumentKey::of(&state.document_information);
        if let Err(err) = self.store.write(&key, Stage::Pending, &state).await {
            tracing::error!(
                event = "message.persist_failed",
                id = %message_id,
                error = %format!("{err:#}"),
            );
            self.fail(&message_id).await;
            return;
        }

        if let Err(err) = self.transport.acknowledge(&message_id).await {
            self.stop_policy.record_error("acknowledge", &err);
            return;
        }
        self.stop_policy.reset();
        tracing::info!(event = "message.acknowledged", id = %message_id, document_id = %key.document_id);

        self.reply(&DocumentResult::document_level(
            message_id.as_str(),
            ResultStatus::InProgress,
            "",
        ))
        .await;

        self.execute_pending_document(state).await;
    }

    /// Moves a Pending document to Current and hands it to its pool.
    pub async fn execute_pending_document(&self, state: DocumentState) {
        let key = DocumentKey::of(&state.document_information);
        if let Err(err) = self
            .store
            .move_stage(&key, Stage::Pending, Stage::Current)
            .await
        {
            tracing::error!(
                event = "document.move_failed",
                document_id = %key.document_id,
                error = %format!("{err:#}"),
            );
            return;
        }
        self.dispatch(state);
    }

    fn dispatch(&self, state: DocumentState) {
        let message_id = state.document_information.message_id.clone();
        let (pool, kind) = match state.document_type {
            Some(document_type) if document_type.is_send() => {
                (&self.send_pool, WorkKind::SendCommand)
            }
            Some(document_type) if document_type.is_cancel() => {
                (&self.cancel_pool, WorkKind::CancelCommand)
            }
            other => {
                tracing::error!(
                    event = "document.unexpected_type",
                    id = %message_id,
                    document_type = ?other,
                );
                return;
            }
        };
        let item = WorkItem {
            key: message_id.clone(),
            kind,
            document: state,
        };
        if let Err(err) = pool.submit(item) {
            tracing::error!(event = "document.submit_failed", id = %message_id, error = %err);
        }
    }

    /// Resumes documents left behind by a previous run.
    pub async fn recover(&self, instance_id: &str) {
        let mut staged = Vec::new();
        for stage in [Stage::Pending, Stage::Current] {
            match self.store.list(instance_id, stage).await {
                Ok(ids) => staged.push((stage, ids)),
                Err(err) => {
                    tracing::error!(event = "recover.list_failed", stage = %stage, error = %err);
                }
            }
        }
        // Listed up front so documents promoted to Current below are not resumed twice.
        for (stage, ids) in staged {
            for document_id in ids {
                let key = DocumentKey::new(document_id, instance_id);
                let state = match self.store.read(&key, stage).await {
                    Ok(state) if !state.is_empty() => state,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::error!(
                            event = "recover.read_failed",
                            document_id = %key.document_id,
                            error = %err,
                        );
                        continue;
                    }
                };
                tracing::info!(
                    event = "recover.document",
                    document_id = %key.document_id,
                    stage = %stage,
                );
                match stage {
                    Stage::Pending => self.execute_pending_document(state).await,
                    _ => self.dispatch(state),
                }
            }
        }
    }

    async fn process_send_command(&self, state: DocumentState, cancel: CancellationToken) {
        let key = DocumentKey::of(&state.document_information);
        let message_id = state.document_information.message_id.clone();
        let handle = DocumentFileStore::new(Arc::clone(&self.store), key.clone(), Stage::Current);

        let mut results = self.engine.run(cancel, handle.clone());
        while let Some(result) = results.recv().await {
            tracing::info!(
                event = "document.reply",
                id = %message_id,
                plugin = %result.last_plugin,
                status = %result.status,
            );
            self.reply(&result).await;
        }

        let current = match handle.load().await {
            Ok(current) => current,
            Err(err) => {
                tracing::error!(
                    event = "document.reload_failed",
                    id = %message_id,
                    error = %format!("{err:#}"),
                );
                return;
            }
        };
        if current.status() == Some(ResultStatus::SuccessAndReboot) {
            tracing::info!(event = "document.awaiting_reboot", id = %message_id);
            return;
        }

        self.complete(&key, &message_id).await;
        if is_update_plugin(&current) {
            tracing::debug!(event = "message.delete_skipped", id = %message_id);
            return;
        }
        self.delete(&message_id).await;
    }

    async fn process_cancel_command(&self, mut state: DocumentState) {
        let key = DocumentKey::of(&state.document_information);
        let message_id = state.document_information.message_id.clone();
        let Some(cancel) = state.cancel_information.as_mut() else {
            tracing::error!(event = "cancel.missing_information", id = %message_id);
            return;
        };

        let status = if self.send_pool.cancel(&cancel.cancel_message_id) {
            cancel.debug_info = format!("Command {} cancelled", cancel.cancel_command_id);
            ResultStatus::Success
        } else {
            tracing::debug!(
                event = "cancel.not_found",
                target = %cancel.cancel_message_id,
                "job not found, possibly completed"
            );
            cancel.debug_info = format!("Command {} couldn't be cancelled", cancel.cancel_command_id);
            ResultStatus::Failed
        };
        state.document_information.document_status = Some(status);
        tracing::info!(event = "cancel.finished", id = %message_id, status = %status);

        if let Err(err) = self.store.write(&key, Stage::Current, &state).await {
            tracing::error!(
                event = "document.persist_failed",
                id = %message_id,
                error = %format!("{err:#}"),
            );
        }
        self.complete(&key, &message_id).await;
        self.delete(&message_id).await;
    }

    fn parse_send(
        &self,
        message: &InboundMessage,
        document_type: DocumentType,
    ) -> anyhow::Result<DocumentState> {
        let orchestration_root: PathBuf = self
            .store
            .layout()
            .orchestration_dir(&message.destination, &self.settings.orchestration_root);
        parse::parse_send_command(
            message,
            document_type,
            &orchestration_root,
            self.initializer.as_ref(),
            &self.settings.compat,
        )
    }

    async fn complete(&self, key: &DocumentKey, message_id: &str) {
        if let Err(err) = self
            .store
            .move_stage(key, Stage::Current, Stage::Completed)
            .await
        {
            tracing::error!(
                event = "document.move_failed",
                id = %message_id,
                error = %format!("{err:#}"),
            );
        }
    }

    async fn reply(&self, result: &DocumentResult) {
        if let Err(err) = self.transport.send_response(result).await {
            self.stop_policy.record_error("reply", &err);
        }
    }

    async fn fail(&self, message_id: &str) {
        if let Err(err) = self
            .transport
            .fail_message(message_id, FailureReason::InternalHandlerException)
            .await
        {
            self.stop_policy.record_error("fail", &err);
        }
    }

    async fn delete(&self, message_id: &str) {
        match self.transport.delete_message(message_id).await {
            Ok(()) => tracing::info!(event = "message.deleted", id = %message_id),
            Err(err) => {
                self.stop_policy.record_error("delete", &err);
            }
        }
    }
}

#[async_trait]
impl WorkHandler for Processor {
    async fn handle(&self, item: WorkItem, cancel: CancellationToken) {
        match item.kind {
            WorkKind::SendCommand => self.process_send_command(item.document, cancel).await,
            WorkKind::CancelCommand => self.process_cancel_command(item.document).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::document::StepInitializer;
    use crate::layers::state::{FaultPolicy, LockRegistry, StoreLayout};
    use crate::test_utils::{temp_dir, FakeTransport, ScriptedEngine, TransportCall};
    use agent_protocol::InboundMessage;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    struct Harness {
        root: PathBuf,
        store: Arc<StateStore>,
        transport: Arc<FakeTransport>,
        engine: Arc<ScriptedEngine>,
        processor: Arc<Processor>,
    }

    impl Harness {
        fn new(prefix: &str, engine: ScriptedEngine) -> Self {
            Self::with_transport(prefix, engine, FakeTransport::default())
        }

        fn with_transport(prefix: &str, engine: ScriptedEngine, transport: FakeTransport) -> Self {
            let root = temp_dir(prefix);
            let store = Arc::new(StateStore::new(
                StoreLayout::new(&root),
                Arc::new(LockRegistry::new()),
                FaultPolicy::IgnoreAndLog,
            ));
            let transport = Arc::new(transport);
            let engine = Arc::new(engine);
            let processor = Processor::start(
                Arc::clone(&store),
                transport.clone(),
                engine.clone(),
                Arc::new(StepInitializer),
                settings(),
            );
            Self {
                root,
                store,
                transport,
                engine,
                processor,
            }
        }

        fn state_file(&self, document_id: &str, stage: Stage) -> PathBuf {
            self.store
                .layout()
                .state_file(document_id, "i-1", stage)
        }

        async fn stored(&self, document_id: &str, stage: Stage) -> DocumentState {
            self.store
                .read(&DocumentKey::new(document_id, "i-1"), stage)
                .await
                .unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.processor.shutdown();
            std::fs::remove_dir_all(&self.root).ok();
        }
    }

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            orchestration_root: "orchestration".to_string(),
            send_workers: 2,
            send_queue: 8,
            cancel_workers: 1,
            cancel_queue: 8,
            max_transport_errors: 3,
            compat: ManagedInstanceCompat::default(),
        }
    }

    fn send_message(command_id: &str, action: &str) -> InboundMessage {
        let payload = json!({
            "DocumentName": "AWS-RunShellScript",
            "Parameters": {"commands": ["echo hi"]},
            "DocumentContent": {
                "schemaVersion": "2.2",
                "mainSteps": [{
                    "action": action,
                    "name": "step",
                    "inputs": {"runCommand": ["{{ commands }}"]}
                }]
            }
        });
        InboundMessage {
            message_id: format!("aws.ssm.{command_id}.i-1"),
            topic: "aws.ssm.sendCommand.i-1".to_string(),
            payload: payload.to_string(),
            destination: "i-1".to_string(),
            created_date: None,
        }
    }

    fn cancel_message(command_id: &str, target: &str) -> InboundMessage {
        InboundMessage {
            message_id: format!("aws.ssm.{command_id}.i-1"),
            topic: "aws.ssm.cancelCommand.i-1".to_string(),
            payload: json!({"CancelMessageId": format!("aws.ssm.{target}.i-1")}).to_string(),
            destination: "i-1".to_string(),
            created_date: None,
        }
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..200 {
            if path.is_file() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn successful_send_ends_completed_and_deleted() {
        let h = Harness::new("agent-proc-success", ScriptedEngine::finishing(ResultStatus::Success));
        h.processor.process_message(send_message("c1", "aws:runShellScript")).await;

        h.transport
            .wait_for(|calls| calls.contains(&TransportCall::Delete("aws.ssm.c1.i-1".to_string())))
            .await;
        let calls = h.transport.calls();
        assert_eq!(calls[0], TransportCall::Acknowledge("aws.ssm.c1.i-1".to_string()));
        assert_eq!(
            calls[1],
            TransportCall::Reply("aws.ssm.c1.i-1".to_string(), ResultStatus::InProgress)
        );
        assert!(calls.contains(&TransportCall::Reply(
            "aws.ssm.c1.i-1".to_string(),
            ResultStatus::Success
        )));

        assert!(h.state_file("c1", Stage::Completed).is_file());
        assert!(!h.state_file("c1", Stage::Current).exists());
        assert!(!h.state_file("c1", Stage::Pending).exists());
        let completed = h.stored("c1", Stage::Completed).await;
        assert_eq!(completed.status(), Some(ResultStatus::Success));
        assert!(!h.store.locks().contains("c1"));
    }

    #[tokio::test]
    async fn failed_acknowledge_leaves_document_pending() {
        let transport = FakeTransport::default();
        transport.fail_acknowledge(true);
        let h = Harness::with_transport(
            "agent-proc-ack-fail",
            ScriptedEngine::finishing(ResultStatus::Success),
            transport,
        );

        h.processor.process_message(send_message("c1", "aws:runShellScript")).await;

        assert!(h.state_file("c1", Stage::Pending).is_file());
        assert!(!h.state_file("c1", Stage::Current).exists());
        assert_eq!(h.transport.calls(), Vec::new());
        assert_eq!(h.engine.runs(), 0);
    }

    #[tokio::test]
    async fn intake_persists_pending_send_document() {
        let transport = FakeTransport::default();
        transport.fail_acknowledge(true);
        let h = Harness::with_transport(
            "agent-proc-intake",
            ScriptedEngine::finishing(ResultStatus::Success),
            transport,
        );
        let message = InboundMessage {
            message_id: "aws.ssm.c1.i-1".to_string(),
            topic: "aws.ssm.sendCommand.i-1".to_string(),
            payload: json!({
                "commandId": "c1",
                "documentContent": {
                    "schemaVersion": "2.2",
                    "mainSteps": [{"action": "aws:runShellScript", "name": "s", "inputs": {"runCommand": ["echo"]}}]
                },
                "parameters": {}
            })
            .to_string(),
            destination: "i-1".to_string(),
            created_date: None,
        };

        h.processor.process_message(message).await;

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(h.state_file("c1", Stage::Pending)).unwrap())
                .unwrap();
        assert_eq!(raw["DocumentType"], "SendCommand");
        assert_eq!(raw["DocumentInformation"]["DocumentStatus"], "Pending");
        assert_eq!(raw["DocumentInformation"]["DocumentID"], "c1");
        let pending = h.stored("c1", Stage::Pending).await;
        assert_eq!(pending.document_type, Some(DocumentType::SendCommand));
        assert_eq!(pending.instance_plugins_information.len(), 1);
    }

    #[tokio::test]
    async fn command_id_outside_state_dir_is_refused() {
        let h = Harness::new("agent-proc-traversal", ScriptedEngine::finishing(ResultStatus::Success));
        let mut message = send_message("c1", "aws:runShellScript");
        message.message_id = "odd".to_string();
        let mut payload: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
        payload["CommandId"] = json!("../../../../escaped");
        message.payload = payload.to_string();

        h.processor.process_message(message).await;

        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::Reply("odd".to_string(), ResultStatus::Failed)]
        );
        assert!(!h.root.join("escaped").exists());
        assert_eq!(h.engine.runs(), 0);
    }

    #[tokio::test]
    async fn reboot_keeps_document_current_without_delete() {
        let h = Harness::new(
            "agent-proc-reboot",
            ScriptedEngine::finishing(ResultStatus::SuccessAndReboot),
        );
        h.processor.process_message(send_message("c1", "aws:runShellScript")).await;

        h.transport
            .wait_for(|calls| {
                calls.contains(&TransportCall::Reply(
                    "aws.ssm.c1.i-1".to_string(),
                    ResultStatus::SuccessAndReboot,
                ))
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.state_file("c1", Stage::Current).is_file());
        assert!(!h.state_file("c1", Stage::Completed).exists());
        assert!(!h
            .transport
            .calls()
            .iter()
            .any(|call| matches!(call, TransportCall::Delete(_))));
    }

    #[tokio::test]
    async fn update_plugin_skips_message_delete() {
        let h = Harness::new("agent-proc-update", ScriptedEngine::finishing(ResultStatus::Success));
        h.processor.process_message(send_message("c1", "aws:updateSsmAgent")).await;

        wait_for_file(&h.state_file("c1", Stage::Completed)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!h
            .transport
            .calls()
            .iter()
            .any(|call| matches!(call, TransportCall::Delete(_))));
    }

    #[tokio::test]
    async fn cancel_of_unknown_command_fails() {
        let h = Harness::new("agent-proc-cancel-miss", ScriptedEngine::finishing(ResultStatus::Success));
        h.processor.process_message(cancel_message("k1", "c9")).await;

        h.transport
            .wait_for(|calls| calls.contains(&TransportCall::Delete("aws.ssm.k1.i-1".to_string())))
            .await;
        let completed = h.stored("k1", Stage::Completed).await;
        assert_eq!(completed.status(), Some(ResultStatus::Failed));
        assert_eq!(
            completed.cancel_information.unwrap().debug_info,
            "Command c9 couldn't be cancelled"
        );
    }

    #[tokio::test]
    async fn cancel_reaches_running_command() {
        let h = Harness::new("agent-proc-cancel-hit", ScriptedEngine::until_cancelled());
        h.processor.process_message(send_message("c1", "aws:runShellScript")).await;
        h.engine.wait_started(1).await;

        h.processor.process_message(cancel_message("k1", "c1")).await;

        h.transport
            .wait_for(|calls| {
                calls.contains(&TransportCall::Delete("aws.ssm.k1.i-1".to_string()))
                    && calls.contains(&TransportCall::Delete("aws.ssm.c1.i-1".to_string()))
            })
            .await;
        let cancel = h.stored("k1", Stage::Completed).await;
        assert_eq!(cancel.status(), Some(ResultStatus::Success));
        assert_eq!(
            cancel.cancel_information.unwrap().debug_info,
            "Command c1 cancelled"
        );
        let command = h.stored("c1", Stage::Completed).await;
        assert_eq!(command.status(), Some(ResultStatus::Cancelled));
    }

    #[tokio::test]
    async fn invalid_message_is_dropped_silently() {
        let h = Harness::new("agent-proc-invalid", ScriptedEngine::finishing(ResultStatus::Success));
        let mut message = send_message("c1", "aws:runShellScript");
        message.destination.clear();
        h.processor.process_message(message).await;

        assert!(h.transport.calls().is_empty());
        assert!(!h.state_file("c1", Stage::Pending).exists());
    }

    #[tokio::test]
    async fn unknown_topic_fails_message() {
        let h = Harness::new("agent-proc-topic", ScriptedEngine::finishing(ResultStatus::Success));
        let mut message = send_message("c1", "aws:runShellScript");
        message.topic = "aws.ssm.somethingElse.i-1".to_string();
        h.processor.process_message(message).await;

        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::Fail(
                "aws.ssm.c1.i-1".to_string(),
                FailureReason::InternalHandlerException
            )]
        );
    }

    #[tokio::test]
    async fn malformed_send_payload_replies_failed() {
        let h = Harness::new("agent-proc-bad-send", ScriptedEngine::finishing(ResultStatus::Success));
        let mut message = send_message("c1", "aws:runShellScript");
        message.payload = "{broken".to_string();
        h.processor.process_message(message).await;

        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::Reply(
                "aws.ssm.c1.i-1".to_string(),
                ResultStatus::Failed
            )]
        );
        assert!(!h.state_file("c1", Stage::Pending).exists());
    }

    #[tokio::test]
    async fn malformed_cancel_payload_fails_message() {
        let h = Harness::new("agent-proc-bad-cancel", ScriptedEngine::finishing(ResultStatus::Success));
        let mut message = cancel_message("k1", "c1");
        message.payload = "[]".to_string();
        h.processor.process_message(message).await;

        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::Fail(
                "aws.ssm.k1.i-1".to_string(),
                FailureReason::InternalHandlerException
            )]
        );
    }

    #[tokio::test]
    async fn staged_documents_are_in_flight() {
        let h = Harness::new("agent-proc-in-flight", ScriptedEngine::until_cancelled());
        let message = send_message("c1", "aws:runShellScript");
        assert!(!h.processor.is_in_flight(&message).await);
        h.processor.process_message(message.clone()).await;
        h.engine.wait_started(1).await;
        assert!(h.processor.is_in_flight(&message).await);
    }

    #[tokio::test]
    async fn recover_resumes_pending_and_current_documents() {
        let h = Harness::new("agent-proc-recover", ScriptedEngine::finishing(ResultStatus::Success));
        let pending = parse::parse_send_command(
            &send_message("p1", "aws:runShellScript"),
            DocumentType::SendCommand,
            Path::new("/tmp/orchestration"),
            &StepInitializer,
            &ManagedInstanceCompat::default(),
        )
        .unwrap();
        let mut current = pending.clone();
        current.document_information.document_id = "r1".to_string();
        current.document_information.message_id = "aws.ssm.r1.i-1".to_string();
        h.store
            .write(&DocumentKey::new("p1", "i-1"), Stage::Pending, &pending)
            .await
            .unwrap();
        h.store
            .write(&DocumentKey::new("r1", "i-1"), Stage::Current, &current)
            .await
            .unwrap();

        h.processor.recover("i-1").await;

        wait_for_file(&h.state_file("p1", Stage::Completed)).await;
        wait_for_file(&h.state_file("r1", Stage::Completed)).await;
        assert_eq!(h.engine.runs(), 2);
    }

    #[tokio::test]
    async fn repeated_transport_failures_make_processor_unhealthy() {
        let transport = FakeTransport::default();
        transport.fail_acknowledge(true);
        let h = Harness::with_transport(
            "agent-proc-stop",
            ScriptedEngine::finishing(ResultStatus::Success),
            transport,
        );
        for index in 0..3 {
            assert!(h.processor.is_healthy());
            h.processor
                .process_message(send_message(&format!("c{index}"), "aws:runShellScript"))
                .await;
        }
        assert!(!h.processor.is_healthy());
    }
}
