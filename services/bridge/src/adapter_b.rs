//! Protocol Adapter for platform B (spec.md §4.2): translates `Update`s
//! from the long-poll API into the neutral event model, and builds the
//! outbound method bodies `PeerSender` calls need.

use bridge_protocol::platform_b::{DeleteMessage, SendAnimation, SendDocument, SendMessage, SendPhoto, SendVideo, SendVoice, TgMessage, Update};
use bridge_protocol::{segment, ConversationKind, EventVariant, MessageEvent, Platform, Segment};

pub fn parse_update(update: &Update) -> EventVariant {
    if let Some(msg) = &update.message {
        return EventVariant::Message(message_event(msg, false));
    }
    if let Some(msg) = &update.edited_message {
        // Edits have no dedicated wire shape on this platform; surfaced as
        // a message event flagged `is_edit` so the forwarder deletes the
        // previously-sent peer copy and resends instead of dropping it as
        // a duplicate.
        return EventVariant::Message(message_event(msg, true));
    }
    EventVariant::Unknown
}

fn message_event(msg: &TgMessage, is_edit: bool) -> MessageEvent {
    let mut segments = Vec::new();
    if let Some(text) = msg.text.as_deref().or(msg.caption.as_deref()) {
        if !text.is_empty() {
            segments.push(Segment::text(text));
        }
    }
    if let Some(photo) = msg.photo.last() {
        segments.push(Segment::new(segment::kind::IMAGE).with("file_id", photo.file_id.clone()));
    }
    if let Some(anim) = &msg.animation {
        segments.push(Segment::new(segment::kind::ANIMATION).with("file_id", anim.file_id.clone()));
    }
    if let Some(video) = &msg.video {
        segments.push(Segment::new(segment::kind::VIDEO).with("file_id", video.file_id.clone()));
    }
    if let Some(voice) = &msg.voice {
        segments.push(Segment::new(segment::kind::VOICE).with("file_id", voice.file_id.clone()));
    }
    if let Some(doc) = &msg.document {
        let mut s = Segment::new(segment::kind::FILE).with("file_id", doc.file_id.clone());
        if let Some(name) = &doc.file_name {
            s = s.with("name", name.clone());
        }
        segments.push(s);
    }
    if let Some(sticker) = &msg.sticker {
        segments.push(Segment::new(segment::kind::STICKER).with("file_id", sticker.file_id.clone()).with("animated", sticker.is_animated.to_string()));
    }

    let user_id = msg.from.as_ref().map(|u| u.id.to_string()).unwrap_or_default();
    let sender_display_name = msg.from.as_ref().map(|u| u.display_name());
    let conversation_kind = if msg.chat.kind == "private" { ConversationKind::Private } else { ConversationKind::Group };

    MessageEvent {
        platform: Platform::B,
        conversation_id: msg.chat.id.to_string(),
        user_id,
        message_id: msg.message_id.to_string(),
        segments,
        raw_text: msg.text.clone().or_else(|| msg.caption.clone()).unwrap_or_default(),
        reply_to_message_id: msg.reply_to_message.as_ref().map(|m| m.message_id.to_string()),
        sender_display_name,
        topic_id: msg.message_thread_id,
        timestamp: msg.date,
        conversation_kind,
        is_edit,
    }
}

pub fn build_send_message(chat_id: i64, topic_id: Option<i64>, text: String, reply_to: Option<i64>) -> SendMessage {
    SendMessage { chat_id, text, message_thread_id: topic_id, reply_to_message_id: reply_to }
}

pub fn build_send_photo(chat_id: i64, topic_id: Option<i64>, photo: String, caption: Option<String>) -> SendPhoto {
    SendPhoto { chat_id, photo, caption, message_thread_id: topic_id }
}

pub fn build_send_animation(chat_id: i64, topic_id: Option<i64>, animation: String) -> SendAnimation {
    SendAnimation { chat_id, animation, message_thread_id: topic_id }
}

pub fn build_send_video(chat_id: i64, topic_id: Option<i64>, video: String) -> SendVideo {
    SendVideo { chat_id, video, message_thread_id: topic_id }
}

pub fn build_send_voice(chat_id: i64, topic_id: Option<i64>, voice: String) -> SendVoice {
    SendVoice { chat_id, voice, message_thread_id: topic_id }
}

pub fn build_send_document(chat_id: i64, topic_id: Option<i64>, document: String) -> SendDocument {
    SendDocument { chat_id, document, message_thread_id: topic_id }
}

pub fn build_delete_message(chat_id: i64, message_id: i64) -> DeleteMessage {
    DeleteMessage { chat_id, message_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::platform_b::{Chat, PhotoSize};

    fn base_msg() -> TgMessage {
        TgMessage {
            message_id: 1,
            date: 100,
            chat: Chat { id: -100, kind: "supergroup".into(), title: Some("Group".into()) },
            from: None,
            text: Some("hello".into()),
            caption: None,
            reply_to_message: None,
            message_thread_id: None,
            photo: vec![],
            animation: None,
            video: None,
            voice: None,
            document: None,
            sticker: None,
        }
    }

    #[test]
    fn text_message_becomes_single_text_segment() {
        let event = message_event(&base_msg(), false);
        assert_eq!(event.segments, vec![Segment::text("hello")]);
        assert_eq!(event.conversation_id, "-100");
        assert!(!event.is_edit);
    }

    #[test]
    fn photo_message_picks_largest_size() {
        let mut msg = base_msg();
        msg.text = None;
        msg.photo = vec![
            PhotoSize { file_id: "small".into(), width: 90, height: 90 },
            PhotoSize { file_id: "large".into(), width: 1280, height: 1280 },
        ];
        let event = message_event(&msg, false);
        assert_eq!(event.segments[0].get("file_id"), Some("large"));
    }

    #[test]
    fn topic_thread_id_is_carried_through() {
        let mut msg = base_msg();
        msg.message_thread_id = Some(42);
        let event = message_event(&msg, false);
        assert_eq!(event.topic_id, Some(42));
    }

    #[test]
    fn edited_message_event_is_flagged() {
        let event = message_event(&base_msg(), true);
        assert!(event.is_edit);
    }

    #[test]
    fn parse_update_flags_edited_message_as_edit() {
        let update = Update { update_id: 1, message: None, edited_message: Some(base_msg()), my_chat_member: None };
        match parse_update(&update) {
            EventVariant::Message(m) => assert!(m.is_edit),
            other => panic!("expected message event, got {other:?}"),
        }
    }
}
