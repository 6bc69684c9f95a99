//! Wire and domain types shared across the bot runtime: the raw frames read
//! off the gateway websocket, the parsed [`Message`] handlers operate on, and
//! the error classification used to decide retry vs. terminal disposition.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A frame as received from the upstream gateway, before parsing.
///
/// The receiver never interprets `payload`; it only timestamps it.
/// `attempt_count` is zero for every frame the receiver hands to the queue
/// and only grows when the dead letter queue replays it.
#[derive(Debug, Clone)]
pub struct RawEnvelope {
    pub payload: String,
    pub enqueued_at_ms: u64,
    pub attempt_count: u32,
}

impl RawEnvelope {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            enqueued_at_ms: now_ms(),
            attempt_count: 0,
        }
    }

    /// Build an envelope carrying a prior attempt count, for the dead
    /// letter queue's replay path.
    pub fn with_attempt_count(payload: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            payload: payload.into(),
            enqueued_at_ms: now_ms(),
            attempt_count,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An attachment reference carried on an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub content_type: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A reference to a message being replied to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub id: i64,
    pub author: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// A reaction (emoji) applied to a prior message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub target_author: String,
    pub target_timestamp: i64,
}

/// A parsed inbound message, ready for routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub source: String,
    pub timestamp: i64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub quote: Option<Quote>,
    #[serde(default)]
    pub reaction: Option<Reaction>,
}

impl Message {
    /// `true` when this message is the group context, rather than a 1:1 DM.
    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }
}

/// Raw wire shape of a gateway envelope, as delivered over the websocket.
///
/// Mirrors the subset of the upstream JSON-RPC notification this runtime
/// cares about; unknown fields are ignored by `serde`'s default behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEnvelope {
    pub envelope: WireInner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireInner {
    pub source: Option<String>,
    #[serde(rename = "sourceNumber")]
    pub source_number: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(rename = "dataMessage")]
    pub data_message: Option<WireDataMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDataMessage {
    pub message: Option<String>,
    #[serde(rename = "groupInfo")]
    pub group_info: Option<WireGroupInfo>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
    pub quote: Option<WireQuote>,
    pub reaction: Option<WireReaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireGroupInfo {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAttachment {
    pub id: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireQuote {
    pub id: i64,
    pub author: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireReaction {
    pub emoji: String,
    #[serde(rename = "targetAuthor")]
    pub target_author: String,
    #[serde(rename = "targetSentTimestamp")]
    pub target_timestamp: i64,
}

/// Resource names used as rate-limiter and circuit-breaker keys, matching
/// the upstream REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Accounts,
    Attachments,
    Contacts,
    Devices,
    General,
    Groups,
    Identities,
    Messages,
    Profiles,
    Reactions,
    Receipts,
    Search,
    StickerPacks,
}

impl Resource {
    pub const ALL: [Resource; 13] = [
        Resource::Accounts,
        Resource::Attachments,
        Resource::Contacts,
        Resource::Devices,
        Resource::General,
        Resource::Groups,
        Resource::Identities,
        Resource::Messages,
        Resource::Profiles,
        Resource::Reactions,
        Resource::Receipts,
        Resource::Search,
        Resource::StickerPacks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Accounts => "accounts",
            Resource::Attachments => "attachments",
            Resource::Contacts => "contacts",
            Resource::Devices => "devices",
            Resource::General => "general",
            Resource::Groups => "groups",
            Resource::Identities => "identities",
            Resource::Messages => "messages",
            Resource::Profiles => "profiles",
            Resource::Reactions => "reactions",
            Resource::Receipts => "receipts",
            Resource::Search => "search",
            Resource::StickerPacks => "sticker_packs",
        }
    }
}

/// Error classification shared by the resilience and DLQ layers.
///
/// `Handler.Internal` from the spec's taxonomy is represented by
/// `Transient.Network` at this layer: handlers that want to mark an error
/// terminal do so explicitly by returning `ErrorKind::Terminal*` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    TransientUpstream5xx,
    TransientRateLimited,
    TransientBreakerOpen,
    TerminalAuth,
    TerminalConfig,
    TerminalClientRequest,
    TerminalUnparseable,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork
                | ErrorKind::TransientUpstream5xx
                | ErrorKind::TransientRateLimited
                | ErrorKind::TransientBreakerOpen
        )
    }

    pub fn is_fatal_to_application(self) -> bool {
        matches!(self, ErrorKind::TerminalAuth | ErrorKind::TerminalConfig)
    }

    /// Classify an HTTP status code from a resource call.
    pub fn from_status(status: u16) -> ErrorKind {
        match status {
            401 | 403 => ErrorKind::TerminalAuth,
            429 => ErrorKind::TransientRateLimited,
            500..=599 => ErrorKind::TransientUpstream5xx,
            400..=499 => ErrorKind::TerminalClientRequest,
            _ => ErrorKind::TransientNetwork,
        }
    }
}

/// Parse a raw gateway frame into a [`Message`].
///
/// Returns `None` for frames that are well-formed JSON but carry no
/// `dataMessage` (receipts, typing indicators, sync messages) — these are
/// not errors, just nothing for the router to act on.
pub fn parse_envelope(raw: &RawEnvelope) -> Result<Option<Message>, ParseError> {
    let wire: WireEnvelope =
        serde_json::from_str(&raw.payload).map_err(|e| ParseError(e.to_string()))?;
    let inner = wire.envelope;
    let source = inner
        .source
        .or(inner.source_number)
        .ok_or_else(|| ParseError("missing source".into()))?;
    let timestamp = inner
        .timestamp
        .ok_or_else(|| ParseError("missing timestamp".into()))?;
    let Some(data) = inner.data_message else {
        return Ok(None);
    };
    Ok(Some(Message {
        source,
        timestamp,
        group_id: data.group_info.map(|g| g.group_id),
        text: data.message,
        attachments: data
            .attachments
            .into_iter()
            .map(|a| Attachment {
                id: a.id,
                content_type: a.content_type,
                filename: a.filename,
                size: a.size,
            })
            .collect(),
        quote: data.quote.map(|q| Quote {
            id: q.id,
            author: q.author,
            text: q.text,
        }),
        reaction: data.reaction.map(|r| Reaction {
            emoji: r.emoji,
            target_author: r.target_author,
            target_timestamp: r.target_timestamp,
        }),
    }))
}

/// A frame that could not be parsed into a [`Message`]. Always
/// [`ErrorKind::TerminalUnparseable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable envelope: {}", self.0)
    }
}

impl std::error::Error for ParseError {}
