//! Wire types for platform A's persistent duplex connection (Variant W).
//!
//! Outbound frames are `{"action", "params", "echo"}`; inbound frames are
//! either a response carrying the same `echo` (matched against a waiting
//! caller) or an unsolicited event distinguished by `post_type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outbound action request. `echo` is chosen by the caller and must be
/// registered with the Connection Manager's correlation table *before* the
/// frame is written (spec.md §4.1, §9) — a response can in principle arrive
/// before the write call returns.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub action: String,
    pub params: Value,
    pub echo: u64,
}

/// A response frame, matched to its caller by `echo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionResponse {
    pub status: ResponseStatus,
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    pub echo: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Failed,
    Async,
}

/// An unsolicited inbound frame, discriminated by `post_type`. Unknown
/// fields are preserved under `raw` by callers that need them — the adapter
/// itself only extracts what it recognizes and degrades to `Unknown`
/// (never an error) on anything it doesn't.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "post_type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(RawMessageEvent),
    Notice(RawNoticeEvent),
    Request(RawRequestEvent),
    MetaEvent(RawMetaEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessageEvent {
    pub message_type: String,
    #[serde(deserialize_with = "id_to_string")]
    pub message_id: String,
    #[serde(deserialize_with = "id_to_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "opt_id_to_string")]
    pub group_id: Option<String>,
    pub raw_message: String,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNoticeEvent {
    pub notice_type: String,
    #[serde(default, deserialize_with = "opt_id_to_string")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_to_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_to_string")]
    pub message_id: Option<String>,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRequestEvent {
    pub request_type: String,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetaEvent {
    pub meta_event_type: String,
    pub time: i64,
    #[serde(default)]
    pub status: Value,
}

/// Platform A may send numeric identifiers as either JSON integers or JSON
/// strings (a well-known quirk of this protocol family). The adapter
/// normalizes everything to `String` on the way in.
pub fn id_to_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        S(String),
        N(i64),
    }
    Ok(match Id::deserialize(d)? {
        Id::S(s) => s,
        Id::N(n) => n.to_string(),
    })
}

pub fn opt_id_to_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        S(String),
        N(i64),
        Null,
    }
    Ok(match Option::<Id>::deserialize(d)? {
        Some(Id::S(s)) => Some(s),
        Some(Id::N(n)) => Some(n.to_string()),
        Some(Id::Null) | None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_normalizes_both_integer_and_string_forms() {
        #[derive(Deserialize)]
        struct W(#[serde(deserialize_with = "id_to_string")] String);
        let from_str: W = serde_json::from_str(r#""123""#).unwrap();
        let from_int: W = serde_json::from_str("123").unwrap();
        assert_eq!(from_str.0, "123");
        assert_eq!(from_int.0, "123");
    }

    #[test]
    fn inbound_frame_discriminates_on_post_type() {
        let json = r#"{"post_type":"message","message_type":"group","message_id":42,"user_id":"u1","group_id":7,"raw_message":"hi","time":1}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::Message(m) => {
                assert_eq!(m.message_id, "42");
                assert_eq!(m.group_id.as_deref(), Some("7"));
            }
            _ => panic!("expected message frame"),
        }
    }
}
