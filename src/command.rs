//! Outbound commands.
//!
//! Commands travel over the same connection as inbound events, as JSON
//! text frames of the shape:
//!
//! ```text
//! {"type": "authenticate" | "subscribe" | "unsubscribe" | "message",
//!  "channel": "<topic>",
//!  "data": {...}}
//! ```

use serde::Serialize;

use crate::events::EventCategory;

/// Channel used by `authenticate`.
pub const AUTH_CHANNEL: &str = "auth";

/// A subscribable subject: a category plus the id of one thing in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Which category of events.
    pub category: EventCategory,
    /// Identifier within the category (project id, chat id, ...).
    pub id: String,
}

impl Topic {
    /// Build a topic.
    pub fn new(category: EventCategory, id: impl Into<String>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.id)
    }
}

/// Parses `kind:id`, e.g. `chat:c1`.
impl std::str::FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <kind>:<id>, got '{s}'"))?;
        if id.is_empty() {
            return Err(format!("missing id in '{s}'"));
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Body of a `message` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessagePayload {
    /// Post a chat message.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        /// Target chat.
        chat_id: String,
        /// Message text.
        content: String,
    },
    /// Type into a remote terminal.
    #[serde(rename_all = "camelCase")]
    TerminalInput {
        /// Target terminal session.
        session_id: String,
        /// Raw input, including any newline.
        input: String,
    },
    /// Share this client's cursor with collaborators.
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        /// File the cursor is in.
        file_path: String,
        /// Zero-based line.
        line: u32,
        /// Zero-based column.
        column: u32,
    },
}

/// A command sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Connection-level authentication.
    Authenticate {
        /// Bearer credential.
        token: String,
    },
    /// Start receiving events for a topic.
    Subscribe {
        /// Topic to join.
        topic: Topic,
    },
    /// Stop receiving events for a topic.
    Unsubscribe {
        /// Topic to leave.
        topic: Topic,
    },
    /// Application message on a topic.
    Message {
        /// Topic the message belongs to.
        topic: Topic,
        /// Typed body.
        payload: MessagePayload,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireData<'a> {
    Token { token: &'a str },
    Id { id: &'a str },
    Payload(&'a MessagePayload),
}

#[derive(Serialize)]
struct WireCommand<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    channel: &'a str,
    data: WireData<'a>,
}

impl OutboundCommand {
    /// Wire `type` value.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Message { .. } => "message",
        }
    }

    /// Wire `channel` value.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => AUTH_CHANNEL,
            Self::Subscribe { topic } | Self::Unsubscribe { topic } | Self::Message { topic, .. } => {
                topic.category.as_str()
            }
        }
    }

    fn wire(&self) -> WireCommand<'_> {
        let data = match self {
            Self::Authenticate { token } => WireData::Token { token },
            Self::Subscribe { topic } | Self::Unsubscribe { topic } => WireData::Id { id: &topic.id },
            Self::Message { payload, .. } => WireData::Payload(payload),
        };
        WireCommand {
            kind: self.kind(),
            channel: self.channel(),
            data,
        }
    }

    /// Encode as the JSON text of a frame.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.wire())
    }
}
