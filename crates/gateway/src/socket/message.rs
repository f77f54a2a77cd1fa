//! WebSocket wire format

use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;
use websift_common::{
    agent::{ConversationHistory, Document, Message, Role, StreamEvent},
    errors::{AppError, CLIENT_ERROR_MESSAGE},
};

/// Reply to a turn without usable content
pub const NO_CONTENT_MESSAGE: &str = "No content provided";

const MESSAGE_ID_LEN: usize = 7;
const MESSAGE_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// One inbound frame
#[derive(Debug, Deserialize, Validate)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub content: String,

    /// `[role, text]` pairs, oldest first
    #[serde(default)]
    pub history: Vec<(String, String)>,

    /// Accepted for compatibility; every turn takes the web search path
    #[serde(default)]
    pub focus: Option<String>,

    #[serde(default)]
    pub copilot: Option<serde_json::Value>,
}

/// What to do with an inbound frame
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Query {
        content: String,
        history: ConversationHistory,
    },
    /// Valid frame of a type this server does not handle
    Ignored(String),
    /// Reply with this error text and start nothing
    Rejected(&'static str),
}

pub fn parse_inbound(text: &str) -> Inbound {
    let mut message: InboundMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable frame");
            return Inbound::Rejected(CLIENT_ERROR_MESSAGE);
        }
    };

    message.content = message.content.trim().to_string();
    if message.validate().is_err() {
        return Inbound::Rejected(NO_CONTENT_MESSAGE);
    }
    if message.kind != "message" {
        return Inbound::Ignored(message.kind);
    }
    if message.focus.as_deref().is_some_and(|f| f != "webSearch") || message.copilot.is_some() {
        tracing::debug!(
            focus = ?message.focus,
            copilot = ?message.copilot,
            "Unsupported modes requested, answering with web search"
        );
    }

    Inbound::Query {
        history: into_history(message.history),
        content: message.content,
    }
}

/// Map `[role, text]` pairs onto conversation turns
pub fn into_history(pairs: Vec<(String, String)>) -> ConversationHistory {
    pairs
        .into_iter()
        .map(|(role, text)| Message::new(Role::from_label(&role), text))
        .collect()
}

/// One outbound frame
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    Sources {
        data: Vec<Document>,
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Message {
        data: String,
        #[serde(rename = "messageId")]
        message_id: String,
    },
    MessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Error {
        data: String,
    },
}

impl OutboundMessage {
    pub fn from_event(event: StreamEvent, message_id: &str) -> Self {
        let message_id = message_id.to_string();
        match event {
            StreamEvent::Sources(data) => OutboundMessage::Sources { data, message_id },
            StreamEvent::ResponseChunk(data) => OutboundMessage::Message { data, message_id },
            StreamEvent::End => OutboundMessage::MessageEnd { message_id },
            StreamEvent::Error(data) => OutboundMessage::Error { data },
        }
    }

    pub fn error(data: &str) -> Self {
        OutboundMessage::Error {
            data: data.to_string(),
        }
    }

    pub fn to_text(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Short random id tagging every frame of one answer
pub fn message_id() -> String {
    let mut rng = rand::thread_rng();
    (0..MESSAGE_ID_LEN)
        .map(|_| MESSAGE_ID_CHARSET[rng.gen_range(0..MESSAGE_ID_CHARSET.len())] as char)
        .collect()
}
