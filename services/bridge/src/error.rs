//! The bridge's error taxonomy (spec.md §7). `UnknownMapping`,
//! `DuplicateForward` and `RouteMissing` are deliberately not constructed
//! as errors anywhere in this codebase — callers branch on `Option`/`bool`
//! — but are named here because spec.md §7 calls them out by name as part
//! of the taxonomy operators reason about.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{platform} transport not available")]
    Disconnected { platform: bridge_protocol::Platform },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed wire frame: {0}")]
    ParseError(String),

    /// Never raised — a lookup miss is `None`, not an error. Named for
    /// completeness against spec.md's taxonomy.
    #[allow(dead_code)]
    #[error("no mapping found")]
    UnknownMapping,

    /// Never raised — dedup is a drop, not an error.
    #[allow(dead_code)]
    #[error("source message already forwarded")]
    DuplicateForward,

    #[error("media fetch failed: {0}")]
    MediaFetchError(#[from] bridge_media::MediaError),

    #[error("retry exhausted after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    /// Never raised — a missing route is a silent drop, not an error.
    #[allow(dead_code)]
    #[error("no bridge route configured for conversation {0}")]
    RouteMissing(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] bridge_store::StoreError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// An internal failure notice a bridge task may publish so an (out-of-scope)
/// operator-side notifier can surface it on a platform (spec.md §7).
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub kind: String,
    pub platform: bridge_protocol::Platform,
    pub conversation_id: Option<String>,
    pub detail: String,
    pub occurred_at: i64,
}
