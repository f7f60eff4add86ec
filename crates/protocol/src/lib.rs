//! bridge-protocol: the platform-neutral message/event model plus the wire
//! DTOs for both sides of the bridge.
//!
//! [`segment`] defines the shared data model (`Message`, `MessageEvent`,
//! `NoticeEvent`). [`platform_a`] and [`platform_b`] define each side's wire
//! shapes; [`cq`] implements platform A's in-band tagged text form.

pub mod cq;
pub mod platform_a;
pub mod platform_b;
pub mod segment;

pub use segment::{ConversationKind, EventVariant, Message, MessageEvent, NoticeEvent, NoticeKind, Platform, Segment};
