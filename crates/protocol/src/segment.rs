//! The platform-neutral message model.
//!
//! A [`Message`] is an ordered list of [`Segment`]s. Each segment carries a
//! `kind` tag (`"text"`, `"image"`, `"reply"`, ...) and a string-keyed
//! attribute map whose recognized keys are kind-specific — this mirrors the
//! CQ-code / OneBot segment shape platform A speaks natively, so platform A
//! segments round-trip without lossy re-typing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known segment kinds. Anything else is passed through as an opaque
/// kind string and translated to a `[kind]` text marker (spec.md §4.3).
pub mod kind {
    pub const TEXT: &str = "text";
    pub const IMAGE: &str = "image";
    pub const VIDEO: &str = "video";
    pub const VOICE: &str = "record";
    pub const FILE: &str = "file";
    pub const STICKER: &str = "sticker";
    pub const ANIMATION: &str = "animation";
    pub const FACE: &str = "face";
    pub const MENTION: &str = "mention";
    pub const REPLY: &str = "reply";
    pub const FORWARD: &str = "forward";
    pub const NODE: &str = "node";
    pub const CARD: &str = "card";
    pub const MUSIC: &str = "music";
    pub const SHARE: &str = "share";
}

/// One element of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Segment {
    pub fn new(kind: impl Into<String>) -> Self {
        Segment {
            kind: kind.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn text(s: impl Into<String>) -> Self {
        Segment::new(kind::TEXT).with("text", s)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn is(&self, k: &str) -> bool {
        self.kind == k
    }
}

/// An ordered sequence of segments — the unit of forwarding. Empty sequences
/// are valid (pure notice events carry none).
pub type Message = Vec<Segment>;

/// Which side of the bridge an identifier or event originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Platform {
    A,
    B,
}

impl Platform {
    pub fn other(self) -> Platform {
        match self {
            Platform::A => Platform::B,
            Platform::B => Platform::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::A => "A",
            Platform::B => "B",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Platform::A),
            "B" => Ok(Platform::B),
            other => Err(format!("unknown platform {other:?}")),
        }
    }
}

/// Group vs. private (1:1) conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    Group,
    Private,
}

/// A translated or source message carried across the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub platform: Platform,
    pub conversation_id: String,
    pub user_id: String,
    pub message_id: String,
    pub segments: Message,
    pub raw_text: String,
    /// Whatever display name the source event carried inline (platform B's
    /// `from.first_name`/`last_name`/`username`); `None` when the source
    /// protocol doesn't attach one (platform A messages carry only a bare
    /// numeric id — a richer name requires a separate profile fetch, out
    /// of scope for this event's parse step).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    /// Platform B forum topic thread, when the conversation is topic-mode.
    /// Always `None` for platform A, which has no equivalent concept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<i64>,
    pub timestamp: i64,
    pub conversation_kind: ConversationKind,
    /// True when this event is the source platform's own edit of a
    /// previously-seen message, not a new one. Platforms that have no
    /// wire-level edit notification (platform A) never set this.
    #[serde(default)]
    pub is_edit: bool,
}

/// The kind of out-of-band notice an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    Recall,
    Join,
    Leave,
    Edit,
    Heartbeat,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeEvent {
    pub platform: Platform,
    pub notice_kind: NoticeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_message_id: Option<String>,
    pub timestamp: i64,
    /// Unparsed attachment for downstream consumers that need fields this
    /// model doesn't recognize yet.
    pub raw: serde_json::Value,
}

/// What an inbound frame resolved to, once the Protocol Adapter has parsed
/// it. Parsing is schema-tolerant: malformed/unrecognized frames yield
/// `Unknown`, never an error (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventVariant {
    Message(MessageEvent),
    Notice(NoticeEvent),
    Heartbeat { platform: Platform, raw_status: serde_json::Value },
    Unknown,
}
