//! bridge-media: magic-byte type detection, source fingerprinting, and
//! proxy-aware download used by the Message Translator's image-kind
//! detection step and the Retry Queue's download callbacks (spec.md §4.6).

pub mod download;
pub mod fingerprint;
pub mod mime;

pub use download::{MediaEngine, MediaError, ProxyConfig};
pub use fingerprint::fingerprint;
pub use mime::{detect_mime, is_animated};
