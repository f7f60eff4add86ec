//! Wire types for platform B's long-poll HTTPS bot API (Variant P).
//!
//! `getUpdates` returns a batch of [`Update`]s; outbound actions are
//! individual `POST /bot<token>/<method>` calls with a JSON body and a JSON
//! response envelope (`ApiResponse<T>`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub edited_message: Option<TgMessage>,
    #[serde(default)]
    pub my_chat_member: Option<ChatMemberUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TgMessage>>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub animation: Option<FileRef>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub document: Option<DocumentRef>,
    #[serde(default)]
    pub sticker: Option<StickerRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.last_name, &self.username) {
            (Some(last), _) => format!("{} {}", self.first_name, last),
            (None, Some(u)) => format!("{} (@{u})", self.first_name),
            (None, None) => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRef {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StickerRef {
    pub file_id: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdate {
    pub chat: Chat,
    pub date: i64,
}

// ---------------------------------------------------------------------------
// Outbound method bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GetUpdates {
    pub offset: i64,
    pub timeout: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendPhoto {
    pub chat_id: i64,
    pub photo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendAnimation {
    pub chat_id: i64,
    pub animation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendVideo {
    pub chat_id: i64,
    pub video: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendVoice {
    pub chat_id: i64,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendDocument {
    pub chat_id: i64,
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteMessage {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_display_name_prefers_last_name_then_username_then_first_name() {
        let full = User { id: 1, username: Some("bob".into()), first_name: "Bob".into(), last_name: Some("Smith".into()) };
        assert_eq!(full.display_name(), "Bob Smith");

        let with_username = User { id: 1, username: Some("bob".into()), first_name: "Bob".into(), last_name: None };
        assert_eq!(with_username.display_name(), "Bob (@bob)");

        let bare = User { id: 1, username: None, first_name: "Bob".into(), last_name: None };
        assert_eq!(bare.display_name(), "Bob");
    }

    #[test]
    fn update_parses_minimal_text_message() {
        let json = r#"{"update_id":1,"message":{"message_id":7,"date":100,"chat":{"id":-100,"type":"group"},"text":"hi"}}"#;
        let u: Update = serde_json::from_str(json).unwrap();
        assert_eq!(u.message.unwrap().text.as_deref(), Some("hi"));
    }
}
