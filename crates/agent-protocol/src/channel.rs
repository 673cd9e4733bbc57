use crate::{DocumentResult, FailureReason, InboundMessage};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHANNEL_ADDR: &str = "127.0.0.1:19320";

/// Upper bound for one length-delimited frame. Replies carry plugin output,
/// so both ends must agree on a limit above the codec default.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Frames sent by the management channel to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelFrame {
    Message(InboundMessage),
}

/// Frames sent by the agent back to the management channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Acknowledge {
        message_id: String,
    },
    Fail {
        message_id: String,
        reason: FailureReason,
    },
    Delete {
        message_id: String,
    },
    Reply {
        result: DocumentResult,
    },
}
