//! Category-specific payloads and tag-derived kinds.
//!
//! Payload structs are decoded from the same raw frame as the envelope, so
//! they ignore `type`, `timestamp` and `id` along with any field they do
//! not know. Unknown enum values fall back to an `Other` variant instead
//! of failing the whole message.

use serde::{Deserialize, Serialize};

// ============================================================================
// Kinds (the part of the `type` tag after the category)
// ============================================================================

/// `project.*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectAction {
    /// `project.update`
    Update,
    /// `project.create`
    Create,
    /// `project.delete`
    Delete,
}

/// `chat.*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatKind {
    /// `chat.update`
    Update,
    /// `chat.message`
    Message,
    /// `chat.stream.start`
    StreamStart,
    /// `chat.stream.data`
    StreamData,
    /// `chat.stream.end`
    StreamEnd,
}

/// `file.*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    /// `file.change`
    Change,
    /// `file.create`
    Create,
    /// `file.update`
    Update,
    /// `file.delete`
    Delete,
}

/// `terminal.*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    /// `terminal.output`
    Output,
    /// `terminal.command`
    Command,
    /// `terminal.clear`
    Clear,
}

/// `collaboration.*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationKind {
    /// `collaboration.join`
    Join,
    /// `collaboration.leave`
    Leave,
    /// `collaboration.cursor`
    Cursor,
    /// `collaboration.selection`
    Selection,
}

/// `system.*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemLevel {
    /// `system.notification`
    Notification,
    /// `system.error`
    Error,
    /// `system.warning`
    Warning,
}

// ============================================================================
// Payloads
// ============================================================================

/// Fields of a project event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    /// Project identifier.
    pub project_id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Filesystem path on the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Lifecycle status reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Names of fields that changed (updates only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

/// What happened to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatAction {
    /// A message was appended.
    MessageAdded,
    /// A message was edited.
    MessageUpdated,
    /// A message was removed.
    MessageDeleted,
    /// The chat's status changed (e.g. running, idle).
    StatusChanged,
    /// Anything this client does not know yet.
    #[serde(other)]
    Other,
}

/// Fields of a chat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Chat identifier.
    pub chat_id: String,
    /// What happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ChatAction>,
    /// Affected message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Author role (`user`, `assistant`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Full message text, or the chunk for `chat.stream.data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Fields of a file event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    /// Path of the affected file.
    pub path: String,
    /// Owning project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Previous path when the change is a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// Size in bytes after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Stream a terminal chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// Echo of the command that was run.
    Command,
}

/// Fields of a terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalPayload {
    /// Terminal session identifier.
    pub session_id: String,
    /// Which stream the content belongs to.
    #[serde(default)]
    pub output_kind: OutputKind,
    /// Output text (empty for `terminal.clear`).
    #[serde(default)]
    pub content: String,
}

/// A position in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Zero-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
}

/// A selected range in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    /// Start of the selection.
    pub start: CursorPosition,
    /// End of the selection.
    pub end: CursorPosition,
}

/// Fields of a collaboration event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationPayload {
    /// Collaborator identifier.
    pub user_id: String,
    /// Collaborator display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// File the cursor or selection is in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Cursor position (`collaboration.cursor`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    /// Selection (`collaboration.selection`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionRange>,
}

/// Fields of a system event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPayload {
    /// Human-readable message.
    pub message: String,
    /// Short title for banners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Heartbeats carry nothing beyond the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {}

/// Fields of an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Outcome reported by the backend (`ok`, `error`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Failure detail, when the command was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
