//! Domain records and tool input DTOs
//!
//! Records are what the mailbox and calendar clients return; input types
//! are annotated with `JsonSchema` for automatic tool schema generation.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Mailbox address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    /// Display name, e.g. `Jane Doe`
    pub display_name: Option<String>,
    /// Address, e.g. `jane@example.com`
    pub address: String,
}

/// Attachment metadata; content is fetched only on request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    /// Filename from Content-Disposition or Content-Type `name`
    pub filename: String,
    /// MIME content type (e.g., `application/pdf`)
    pub content_type: String,
    /// Decoded size in bytes
    pub size_bytes: usize,
    /// `Content-ID` without angle brackets, for inline parts
    pub content_id: Option<String>,
}

/// Attachment metadata with its decoded content
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentContent {
    /// Metadata of the attachment
    pub attachment: AttachmentMeta,
    /// Base64 (standard alphabet) encoded content
    pub content_base64: String,
}

/// Parsed message
///
/// `id` and `sequence_id` are only meaningful within `folder`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Folder-scoped UID as a decimal string
    pub id: String,
    /// Message sequence number at fetch time
    pub sequence_id: u32,
    /// `Message-ID` header without angle brackets
    pub canonical_message_id: Option<String>,
    /// Decoded subject (empty when absent)
    pub subject: String,
    /// From addresses
    pub from: Vec<EmailAddress>,
    /// To addresses
    pub to: Vec<EmailAddress>,
    /// Cc addresses
    pub cc: Vec<EmailAddress>,
    /// Bcc addresses
    pub bcc: Vec<EmailAddress>,
    /// Date header, falling back to the server arrival time
    pub timestamp: DateTime<Utc>,
    /// First text/plain body part
    pub plain_body: Option<String>,
    /// First text/html body part, sanitized
    pub html_body: Option<String>,
    /// Attachment metadata in MIME order
    pub attachments: Vec<AttachmentMeta>,
    /// IMAP flags (`\Seen`, `\Flagged`, keywords)
    pub flags: BTreeSet<String>,
    /// Folder the message was fetched from
    pub folder: String,
}

/// Discovered calendar collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarCollection {
    /// Trailing path segment of `location_url`
    pub id: String,
    /// `displayname` property, falling back to `id`
    pub display_name: String,
    /// `calendar-description` property
    pub description: Option<String>,
    /// Absolute collection URL
    pub location_url: String,
    /// `calendar-color` property
    pub color: Option<String>,
}

/// Parsed calendar event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventRecord {
    /// `UID` property
    pub id: String,
    /// `SUMMARY` property
    pub summary: String,
    /// `DESCRIPTION` property
    pub description: Option<String>,
    /// `DTSTART` as local wall-clock time
    pub start: NaiveDateTime,
    /// `DTEND` as local wall-clock time
    pub end: NaiveDateTime,
    /// `LOCATION` property
    pub location: Option<String>,
    /// `ORGANIZER` address without `mailto:`
    pub organizer: Option<String>,
    /// `STATUS` property, `CONFIRMED` when absent
    pub status: String,
    /// Id of the calendar the event came from
    pub calendar_id: String,
}

/// Input for `auth_get_url`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AuthUrlInput {
    /// Opaque state echoed back on the redirect
    pub state: Option<String>,
}

/// Input for `auth_exchange_code`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExchangeCodeInput {
    /// Authorization code from the redirect (single-use)
    pub code: String,
}

/// Input for `mail_list_messages`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListMessagesInput {
    /// Folder to list; defaults to `INBOX`
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Maximum messages to return (0..=100)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Number of newest messages to skip
    #[serde(default)]
    pub offset: usize,
    /// Only messages on or after this date (`YYYY-MM-DD`)
    pub since: Option<String>,
    /// Only unseen messages
    #[serde(default)]
    pub unread_only: bool,
}

/// Input for `mail_get_message`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetMessageInput {
    /// Folder-scoped message id
    pub id: String,
    /// Folder the id belongs to; defaults to `INBOX`
    #[serde(default = "default_folder")]
    pub folder: String,
}

/// Input for `mail_get_attachment`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetAttachmentInput {
    /// Folder-scoped message id
    pub id: String,
    /// Folder the id belongs to; defaults to `INBOX`
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Zero-based position in the message's attachment list
    pub index: usize,
}

/// Input for `mail_search_messages`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchMessagesInput {
    /// Free text matched against subject or body
    pub query: Option<String>,
    /// Folder to search; defaults to `INBOX`
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Sender filter
    pub from: Option<String>,
    /// Subject filter
    pub subject: Option<String>,
    /// Range start (`YYYY-MM-DD`, inclusive)
    pub start_date: Option<String>,
    /// Range end (`YYYY-MM-DD`, exclusive)
    pub end_date: Option<String>,
    /// Maximum messages to return (0..=100)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Input for `calendar_fetch_events`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FetchEventsInput {
    /// Restrict to one calendar id from `calendar_list`
    pub calendar_id: Option<String>,
    /// Range start (`YYYY-MM-DD` or RFC 3339)
    pub start_date: String,
    /// Range end (`YYYY-MM-DD` or RFC 3339)
    pub end_date: String,
}

fn default_folder() -> String {
    "INBOX".to_owned()
}

fn default_limit() -> usize {
    20
}
