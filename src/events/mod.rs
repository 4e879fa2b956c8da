//! Inbound event model.
//!
//! Every inbound text frame is first parsed into an [`Envelope`]
//! (`type`, `timestamp`, optional `id`). The `type` tag is classified into
//! an [`EventTag`], and the same raw frame is decoded a second time into
//! the payload struct for that category. The two phases keep a malformed
//! field in one category from affecting any other.
//!
//! # Wire format
//!
//! ```text
//! {"type": "chat.message", "timestamp": "2024-01-01T00:00:00Z", "id": "opt",
//!  "chatId": "c1", "action": "messageAdded", "messageId": "m1"}
//! ```

pub mod payloads;

pub use payloads::*;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Generic outer shape of every inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    /// Event-type tag, e.g. `chat.message`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the backend emitted the event.
    pub timestamp: DateTime<Utc>,
    /// Optional correlation identifier.
    #[serde(default)]
    pub id: Option<String>,
}

/// Subject of events; also the channel name for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Project list changes.
    Project,
    /// Chat messages and streaming.
    Chat,
    /// File events.
    File,
    /// Remote-terminal output.
    Terminal,
    /// Collaboration cursors and presence.
    Collaboration,
    /// System notices.
    System,
}

impl EventCategory {
    /// Every category, in routing-table order.
    pub const ALL: [Self; 6] = [
        Self::Project,
        Self::Chat,
        Self::File,
        Self::Terminal,
        Self::Collaboration,
        Self::System,
    ];

    /// Wire name (`project`, `chat`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Chat => "chat",
            Self::File => "file",
            Self::Terminal => "terminal",
            Self::Collaboration => "collaboration",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// A recognized `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    /// `project.*`
    Project(ProjectAction),
    /// `chat.*`
    Chat(ChatKind),
    /// `file.*`
    File(FileAction),
    /// `terminal.*`
    Terminal(TerminalKind),
    /// `collaboration.*`
    Collaboration(CollaborationKind),
    /// `system.*`
    System(SystemLevel),
    /// `heartbeat`
    Heartbeat,
    /// `ack`
    Ack,
}

impl EventTag {
    /// Classify a wire tag. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        let parsed = match tag {
            "project.update" => Self::Project(ProjectAction::Update),
            "project.create" => Self::Project(ProjectAction::Create),
            "project.delete" => Self::Project(ProjectAction::Delete),
            "chat.update" => Self::Chat(ChatKind::Update),
            "chat.message" => Self::Chat(ChatKind::Message),
            "chat.stream.start" => Self::Chat(ChatKind::StreamStart),
            "chat.stream.data" => Self::Chat(ChatKind::StreamData),
            "chat.stream.end" => Self::Chat(ChatKind::StreamEnd),
            "file.change" => Self::File(FileAction::Change),
            "file.create" => Self::File(FileAction::Create),
            "file.update" => Self::File(FileAction::Update),
            "file.delete" => Self::File(FileAction::Delete),
            "terminal.output" => Self::Terminal(TerminalKind::Output),
            "terminal.command" => Self::Terminal(TerminalKind::Command),
            "terminal.clear" => Self::Terminal(TerminalKind::Clear),
            "collaboration.join" => Self::Collaboration(CollaborationKind::Join),
            "collaboration.leave" => Self::Collaboration(CollaborationKind::Leave),
            "collaboration.cursor" => Self::Collaboration(CollaborationKind::Cursor),
            "collaboration.selection" => Self::Collaboration(CollaborationKind::Selection),
            "system.notification" => Self::System(SystemLevel::Notification),
            "system.error" => Self::System(SystemLevel::Error),
            "system.warning" => Self::System(SystemLevel::Warning),
            "heartbeat" => Self::Heartbeat,
            "ack" => Self::Ack,
            _ => return None,
        };
        Some(parsed)
    }

    /// Category this tag is published on; `None` for heartbeat and ack.
    pub fn category(self) -> Option<EventCategory> {
        match self {
            Self::Project(_) => Some(EventCategory::Project),
            Self::Chat(_) => Some(EventCategory::Chat),
            Self::File(_) => Some(EventCategory::File),
            Self::Terminal(_) => Some(EventCategory::Terminal),
            Self::Collaboration(_) => Some(EventCategory::Collaboration),
            Self::System(_) => Some(EventCategory::System),
            Self::Heartbeat | Self::Ack => None,
        }
    }
}

/// A decoded event: tag-derived kind, envelope metadata and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event<K, P> {
    /// Kind derived from the `type` tag.
    pub kind: K,
    /// Envelope timestamp.
    pub timestamp: DateTime<Utc>,
    /// Envelope correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Category fields.
    pub payload: P,
}

/// Project event.
pub type ProjectEvent = Event<ProjectAction, ProjectPayload>;
/// Chat event.
pub type ChatEvent = Event<ChatKind, ChatPayload>;
/// File event.
pub type FileEvent = Event<FileAction, FilePayload>;
/// Terminal event.
pub type TerminalEvent = Event<TerminalKind, TerminalPayload>;
/// Collaboration event.
pub type CollaborationEvent = Event<CollaborationKind, CollaborationPayload>;
/// System event.
pub type SystemEvent = Event<SystemLevel, SystemPayload>;
/// Heartbeat.
pub type HeartbeatEvent = Event<(), HeartbeatPayload>;
/// Acknowledgement of an outbound command.
pub type AckEvent = Event<(), AckPayload>;

/// One case per `type` category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "category", content = "event", rename_all = "lowercase")]
pub enum TypedEvent {
    /// `project.*`
    Project(ProjectEvent),
    /// `chat.*`
    Chat(ChatEvent),
    /// `file.*`
    File(FileEvent),
    /// `terminal.*`
    Terminal(TerminalEvent),
    /// `collaboration.*`
    Collaboration(CollaborationEvent),
    /// `system.*`
    System(SystemEvent),
    /// `heartbeat`
    Heartbeat(HeartbeatEvent),
    /// `ack`
    #[serde(rename = "ack")]
    Acknowledgement(AckEvent),
}

impl TypedEvent {
    /// Output category, or `None` for internally consumed events.
    pub fn category(&self) -> Option<EventCategory> {
        match self {
            Self::Project(_) => Some(EventCategory::Project),
            Self::Chat(_) => Some(EventCategory::Chat),
            Self::File(_) => Some(EventCategory::File),
            Self::Terminal(_) => Some(EventCategory::Terminal),
            Self::Collaboration(_) => Some(EventCategory::Collaboration),
            Self::System(_) => Some(EventCategory::System),
            Self::Heartbeat(_) | Self::Acknowledgement(_) => None,
        }
    }

    /// Envelope correlation id.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Project(e) => e.id.as_deref(),
            Self::Chat(e) => e.id.as_deref(),
            Self::File(e) => e.id.as_deref(),
            Self::Terminal(e) => e.id.as_deref(),
            Self::Collaboration(e) => e.id.as_deref(),
            Self::System(e) => e.id.as_deref(),
            Self::Heartbeat(e) => e.id.as_deref(),
            Self::Acknowledgement(e) => e.id.as_deref(),
        }
    }
}

/// Why a frame could not be turned into a [`TypedEvent`].
#[derive(Debug)]
pub enum DecodeError {
    /// The frame is not a valid envelope.
    Envelope(serde_json::Error),
    /// The envelope's tag is not recognized.
    UnknownTag(String),
    /// The envelope decoded but the category payload did not.
    Payload {
        /// The envelope tag.
        tag: String,
        /// Underlying error.
        source: serde_json::Error,
    },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Envelope(e) => write!(f, "malformed envelope: {e}"),
            Self::UnknownTag(tag) => write!(f, "unknown event type '{tag}'"),
            Self::Payload { tag, source } => write!(f, "malformed '{tag}' payload: {source}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Envelope(e) | Self::Payload { source: e, .. } => Some(e),
            Self::UnknownTag(_) => None,
        }
    }
}

impl From<DecodeError> for ConnectionError {
    fn from(err: DecodeError) -> Self {
        Self::DecodeFailed(err.to_string())
    }
}

/// Decode the envelope only.
pub fn decode_envelope(raw: &str) -> Result<Envelope, DecodeError> {
    serde_json::from_str(raw).map_err(DecodeError::Envelope)
}

/// Decode a raw frame into a typed event (both phases).
pub fn decode(raw: &str) -> Result<TypedEvent, DecodeError> {
    let envelope = decode_envelope(raw)?;
    let Some(tag) = EventTag::parse(&envelope.event_type) else {
        return Err(DecodeError::UnknownTag(envelope.event_type));
    };
    decode_tagged(raw, tag, envelope)
}

/// Second phase: decode the payload for an already-classified envelope.
pub fn decode_tagged(raw: &str, tag: EventTag, envelope: Envelope) -> Result<TypedEvent, DecodeError> {
    let event = match tag {
        EventTag::Project(kind) => TypedEvent::Project(typed(raw, kind, envelope)?),
        EventTag::Chat(kind) => TypedEvent::Chat(typed(raw, kind, envelope)?),
        EventTag::File(kind) => TypedEvent::File(typed(raw, kind, envelope)?),
        EventTag::Terminal(kind) => TypedEvent::Terminal(typed(raw, kind, envelope)?),
        EventTag::Collaboration(kind) => TypedEvent::Collaboration(typed(raw, kind, envelope)?),
        EventTag::System(kind) => TypedEvent::System(typed(raw, kind, envelope)?),
        EventTag::Heartbeat => TypedEvent::Heartbeat(typed(raw, (), envelope)?),
        EventTag::Ack => TypedEvent::Acknowledgement(typed(raw, (), envelope)?),
    };
    Ok(event)
}

fn typed<K, P: DeserializeOwned>(raw: &str, kind: K, envelope: Envelope) -> Result<Event<K, P>, DecodeError> {
    let payload = serde_json::from_str(raw).map_err(|source| DecodeError::Payload {
        tag: envelope.event_type.clone(),
        source,
    })?;
    Ok(Event {
        kind,
        timestamp: envelope.timestamp,
        id: envelope.id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TAGS: [&str; 24] = [
        "project.update",
        "project.create",
        "project.delete",
        "chat.update",
        "chat.message",
        "chat.stream.start",
        "chat.stream.data",
        "chat.stream.end",
        "file.change",
        "file.create",
        "file.update",
        "file.delete",
        "terminal.output",
        "terminal.command",
        "terminal.clear",
        "collaboration.join",
        "collaboration.leave",
        "collaboration.cursor",
        "collaboration.selection",
        "system.notification",
        "system.error",
        "system.warning",
        "heartbeat",
        "ack",
    ];

    #[test]
    fn test_every_known_tag_parses() {
        for tag in ALL_TAGS {
            assert!(EventTag::parse(tag).is_some(), "{tag}");
        }
        assert!(EventTag::parse("chat.typing").is_none());
        assert!(EventTag::parse("").is_none());
    }

    #[test]
    fn test_tag_prefix_matches_category() {
        for tag in ALL_TAGS {
            let parsed = EventTag::parse(tag).expect("known");
            match parsed.category() {
                Some(category) => assert!(tag.starts_with(category.as_str()), "{tag}"),
                None => assert!(tag == "heartbeat" || tag == "ack"),
            }
        }
    }

    #[test]
    fn test_envelope_requires_type_and_timestamp() {
        assert!(decode_envelope(r#"{"timestamp":"2024-01-01T00:00:00Z"}"#).is_err());
        assert!(decode_envelope(r#"{"type":"heartbeat"}"#).is_err());
        assert!(decode_envelope(r#"{"type":"heartbeat","timestamp":"yesterday"}"#).is_err());

        let env = decode_envelope(r#"{"type":"heartbeat","timestamp":"2024-01-01T00:00:00Z","id":"x"}"#)
            .expect("valid");
        assert_eq!(env.event_type, "heartbeat");
        assert_eq!(env.id.as_deref(), Some("x"));
    }

    #[test]
    fn test_decode_chat_message() {
        let raw = r#"{"type":"chat.message","timestamp":"2024-01-01T00:00:00Z","chatId":"c1","action":"messageAdded","messageId":"m1"}"#;
        let TypedEvent::Chat(event) = decode(raw).expect("valid") else {
            panic!("expected chat event");
        };
        assert_eq!(event.kind, ChatKind::Message);
        assert_eq!(event.payload.chat_id, "c1");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_decode_terminal_output() {
        let raw = r#"{"type":"terminal.output","timestamp":"2024-01-01T00:00:00.250Z","sessionId":"s9","outputKind":"command","content":"ls -la"}"#;
        let TypedEvent::Terminal(event) = decode(raw).expect("valid") else {
            panic!("expected terminal event");
        };
        assert_eq!(event.kind, TerminalKind::Output);
        assert_eq!(event.payload.session_id, "s9");
        assert_eq!(event.payload.output_kind, OutputKind::Command);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = decode(r#"{"type":"weather.update","timestamp":"2024-01-01T00:00:00Z"}"#)
            .expect_err("unknown");
        assert!(matches!(err, DecodeError::UnknownTag(ref t) if t == "weather.update"));
    }

    #[test]
    fn test_decode_payload_failure_keeps_tag() {
        let err = decode(r#"{"type":"file.create","timestamp":"2024-01-01T00:00:00Z"}"#)
            .expect_err("missing path");
        assert!(matches!(err, DecodeError::Payload { ref tag, .. } if tag == "file.create"));
        let converted: ConnectionError = err.into();
        assert!(matches!(converted, ConnectionError::DecodeFailed(_)));
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("chat".parse::<EventCategory>(), Ok(EventCategory::Chat));
        assert!("weather".parse::<EventCategory>().is_err());
    }

    #[test]
    fn test_typed_event_serializes_with_category() {
        let event = decode(r#"{"type":"system.warning","timestamp":"2024-01-01T00:00:00Z","message":"disk low"}"#)
            .expect("valid");
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["category"], "system");
        assert_eq!(json["event"]["kind"], "warning");
        assert_eq!(json["event"]["payload"]["message"], "disk low");
    }
}
