use std::net::SocketAddr;
use std::sync::Arc;

use agent_protocol::channel::{AgentFrame, ChannelFrame, MAX_FRAME_LENGTH};
use agent_protocol::{DocumentResult, FailureReason};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::processor::Processor;
use super::transport::Transport;

const OUTBOUND_CAPACITY: usize = 256;

/// Transport over the TCP management channel. Outbound frames go to every
/// connected session.
#[derive(Clone)]
pub struct ChannelTransport {
    outbound: broadcast::Sender<AgentFrame>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self { outbound }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentFrame> {
        self.outbound.subscribe()
    }

    fn publish(&self, frame: AgentFrame) -> anyhow::Result<()> {
        self.outbound
            .send(frame)
            .map(|_| ())
            .map_err(|_| anyhow!("no management channel connected"))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn acknowledge(&self, message_id: &str) -> anyhow::Result<()> {
        self.publish(AgentFrame::Acknowledge {
            message_id: message_id.to_string(),
        })
    }

    async fn fail_message(&self, message_id: &str, reason: FailureReason) -> anyhow::Result<()> {
        self.publish(AgentFrame::Fail {
            message_id: message_id.to_string(),
            reason,
        })
    }

    async fn delete_message(&self, message_id: &str) -> anyhow::Result<()> {
        self.publish(AgentFrame::Delete {
            message_id: message_id.to_string(),
        })
    }

    async fn send_response(&self, result: &DocumentResult) -> anyhow::Result<()> {
        self.publish(AgentFrame::Reply {
            result: result.clone(),
        })
    }
}

fn channel_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn spawn_accept_loop(
    listener: TcpListener,
    processor: Arc<Processor>,
    transport: ChannelTransport,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let processor = Arc::clone(&processor);
                    let outbound = transport.subscribe();
                    tokio::spawn(async move {
                        tracing::info!(event = "channel.connected", peer = %addr);
                        if let Err(err) = handle_connection(stream, addr, processor, outbound).await
                        {
                            tracing::error!(peer = %addr, error = %err, "connection handler failed");
                        }
                        tracing::info!(event = "channel.closed", peer = %addr);
                    });
                }
                Err(err) => {
                    tracing::error!(error = %err, "listener accept failed");
                }
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    processor: Arc<Processor>,
    mut outbound: broadcast::Receiver<AgentFrame>,
) -> anyhow::Result<()> {
    let (mut sink, mut inbound) = Framed::new(stream, channel_codec()).split();
    loop {
        tokio::select! {
            frame = inbound.next() => {
                let Some(frame) = frame else {
                    break;
                };
                let bytes = frame.context("frame read")?;
                let message = match serde_json::from_slice::<ChannelFrame>(&bytes) {
                    Ok(ChannelFrame::Message(message)) => message,
                    Err(err) => {
                        tracing::warn!(peer = %addr, error = %err, "invalid channel frame");
                        continue;
                    }
                };
                tracing::info!(
                    event = "message.received",
                    id = %message.message_id,
                    topic = %message.topic,
                    peer = %addr,
                );
                if !processor.is_healthy() {
                    tracing::warn!(event = "message.skipped_unhealthy", id = %message.message_id);
                    continue;
                }
                if processor.is_in_flight(&message).await {
                    tracing::info!(event = "message.skipped_in_flight", id = %message.message_id);
                    continue;
                }
                let processor = Arc::clone(&processor);
                tokio::spawn(async move { processor.process_message(message).await });
            }
            frame = outbound.recv() => match frame {
                Ok(frame) => {
                    let payload = serde_json::to_vec(&frame)?;
                    sink.send(Bytes::from(payload)).await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(peer = %addr, skipped, "channel session lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::document::StepInitializer;
    use crate::layers::service::compat::ManagedInstanceCompat;
    use crate::layers::service::processor::ProcessorSettings;
    use crate::layers::state::{FaultPolicy, LockRegistry, StateStore, StoreLayout};
    use crate::test_utils::{temp_dir, ScriptedEngine};
    use agent_protocol::{InboundMessage, ResultStatus};
    use std::time::Duration;

    #[tokio::test]
    async fn transport_without_sessions_reports_error() {
        let transport = ChannelTransport::new();
        assert!(transport.acknowledge("m1").await.is_err());
        let mut session = transport.subscribe();
        transport.delete_message("m1").await.expect("delete");
        assert_eq!(
            session.recv().await.expect("frame"),
            AgentFrame::Delete {
                message_id: "m1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn channel_session_receives_processing_frames() {
        let root = temp_dir("agent-server");
        let store = Arc::new(StateStore::new(
            StoreLayout::new(&root),
            Arc::new(LockRegistry::new()),
            FaultPolicy::IgnoreAndLog,
        ));
        let transport = ChannelTransport::new();
        let processor = Processor::start(
            store,
            Arc::new(transport.clone()),
            Arc::new(ScriptedEngine::finishing(ResultStatus::Success)),
            Arc::new(StepInitializer),
            ProcessorSettings {
                orchestration_root: "orchestration".to_string(),
                send_workers: 1,
                send_queue: 4,
                cancel_workers: 1,
                cancel_queue: 4,
                max_transport_errors: 0,
                compat: ManagedInstanceCompat::default(),
            },
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        spawn_accept_loop(listener, Arc::clone(&processor), transport);

        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut framed = Framed::new(stream, channel_codec());
        // Let the session subscribe before the first frame is published.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let message = ChannelFrame::Message(InboundMessage {
            message_id: "aws.ssm.c1.i-1".to_string(),
            topic: "aws.ssm.sendCommand.i-1".to_string(),
            payload: serde_json::json!({
                "DocumentContent": {
                    "schemaVersion": "2.2",
                    "mainSteps": [{"action": "aws:runShellScript", "name": "s", "inputs": {}}]
                }
            })
            .to_string(),
            destination: "i-1".to_string(),
            created_date: None,
        });
        framed
            .send(Bytes::from(serde_json::to_vec(&message).unwrap()))
            .await
            .expect("send");

        let mut frames = Vec::new();
        while frames.len() < 4 {
            let bytes = tokio::time::timeout(Duration::from_secs(5), framed.next())
                .await
                .expect("frame in time")
                .expect("open")
                .expect("read");
            frames.push(serde_json::from_slice::<AgentFrame>(&bytes).expect("frame"));
        }
        assert!(matches!(&frames[0], AgentFrame::Acknowledge { message_id } if message_id == "aws.ssm.c1.i-1"));
        assert!(matches!(&frames[1], AgentFrame::Reply { result } if result.status == ResultStatus::InProgress));
        assert!(matches!(&frames[2], AgentFrame::Reply { result } if result.status == ResultStatus::Success));
        assert!(matches!(&frames[3], AgentFrame::Delete { .. }));

        processor.shutdown();
        std::fs::remove_dir_all(&root).ok();
    }
}
