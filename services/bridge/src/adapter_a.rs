//! Protocol Adapter for platform A (spec.md §4.2): pure translation between
//! platform A's wire frames and the neutral [`EventVariant`]/[`Segment`]
//! model. No I/O lives here — the Connection Manager owns the socket and
//! calls into this module.

use bridge_protocol::platform_a::{ActionRequest, InboundFrame, RawMessageEvent, RawMetaEvent, RawNoticeEvent};
use bridge_protocol::{cq, ConversationKind, EventVariant, MessageEvent, NoticeEvent, NoticeKind, Platform, Segment};
use serde_json::Value;

pub fn serialize_action(action: &str, params: Value, echo: u64) -> ActionRequest {
    ActionRequest { action: action.to_string(), params, echo }
}

/// Parses an unsolicited frame (one with no `echo` field) into the neutral
/// event model. Anything that doesn't match a recognized `post_type`, or
/// fails to deserialize at all, degrades to [`EventVariant::Unknown`].
pub fn parse_event(value: &Value) -> EventVariant {
    let frame: InboundFrame = match serde_json::from_value(value.clone()) {
        Ok(f) => f,
        Err(_) => return EventVariant::Unknown,
    };
    match frame {
        InboundFrame::Message(m) => EventVariant::Message(message_event(m)),
        InboundFrame::Notice(n) => notice_event(n).map_or(EventVariant::Unknown, EventVariant::Notice),
        InboundFrame::MetaEvent(meta) => meta_event(meta),
        InboundFrame::Request(_) => EventVariant::Unknown,
    }
}

fn message_event(m: RawMessageEvent) -> MessageEvent {
    let segments = cq::decode(&m.raw_message);
    let reply_to_message_id = segments.iter().find(|s| s.is(bridge_protocol::segment::kind::REPLY)).and_then(|s| s.get("id")).map(str::to_string);
    let (conversation_id, conversation_kind) = match &m.group_id {
        Some(gid) => (gid.clone(), ConversationKind::Group),
        None => (m.user_id.clone(), ConversationKind::Private),
    };
    MessageEvent {
        platform: Platform::A,
        conversation_id,
        user_id: m.user_id,
        message_id: m.message_id,
        segments,
        raw_text: m.raw_message,
        reply_to_message_id,
        sender_display_name: None,
        topic_id: None,
        timestamp: m.time,
        conversation_kind,
        is_edit: false,
    }
}

fn notice_event(n: RawNoticeEvent) -> Option<NoticeEvent> {
    let notice_kind = match n.notice_type.as_str() {
        "group_recall" | "friend_recall" => NoticeKind::Recall,
        "group_increase" => NoticeKind::Join,
        "group_decrease" => NoticeKind::Leave,
        _ => NoticeKind::Other,
    };
    Some(NoticeEvent {
        platform: Platform::A,
        notice_kind,
        conversation_id: n.group_id,
        user_id: n.user_id,
        affected_message_id: n.message_id,
        timestamp: n.time,
        raw: Value::Null,
    })
}

fn meta_event(meta: RawMetaEvent) -> EventVariant {
    if meta.meta_event_type == "heartbeat" {
        EventVariant::Heartbeat { platform: Platform::A, raw_status: meta.status }
    } else {
        EventVariant::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_group_text_message_into_neutral_event() {
        let value: Value = serde_json::from_str(
            r#"{"post_type":"message","message_type":"group","message_id":"1","user_id":"2","group_id":"3","raw_message":"hello","time":100}"#,
        )
        .unwrap();
        match parse_event(&value) {
            EventVariant::Message(m) => {
                assert_eq!(m.conversation_id, "3");
                assert_eq!(m.conversation_kind, ConversationKind::Group);
                assert_eq!(m.segments, vec![Segment::text("hello")]);
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn private_message_uses_sender_id_as_conversation() {
        let value: Value = serde_json::from_str(
            r#"{"post_type":"message","message_type":"private","message_id":"1","user_id":"2","raw_message":"hi","time":1}"#,
        )
        .unwrap();
        match parse_event(&value) {
            EventVariant::Message(m) => {
                assert_eq!(m.conversation_id, "2");
                assert_eq!(m.conversation_kind, ConversationKind::Private);
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_meta_event_is_recognized() {
        let value: Value = serde_json::from_str(r#"{"post_type":"meta_event","meta_event_type":"heartbeat","time":1,"status":{"online":true}}"#).unwrap();
        assert!(matches!(parse_event(&value), EventVariant::Heartbeat { .. }));
    }

    #[test]
    fn malformed_frame_degrades_to_unknown() {
        let value: Value = serde_json::json!({"post_type": "something_new"});
        assert_eq!(parse_event(&value), EventVariant::Unknown);
    }
}
