use crate::utils::now_utc_iso;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

/// A chat message as relayed to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub body: MessageBody,
    pub created_at: String,
}

/// Media handling is decided at construction: either the client already has
/// a durable URL for its media, or the text may carry `blob:` key references
/// that still need uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
    DirectMedia { url: String },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageInput {
    #[serde(default)]
    pub id: Option<String>,
    pub body: MessageBody,
}

impl ChatMessage {
    pub fn from_input(sender: &str, input: SendMessageInput) -> Self {
        let id = input
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            sender: sender.to_string(),
            body: input.body,
            created_at: now_utc_iso(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            MessageBody::DirectMedia { .. } => None,
        }
    }
}

fn media_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"blob:[A-Za-z0-9._-]+").expect("media key pattern"))
}

/// Extracts every distinct media key token from a message body, in first
/// appearance order. A key is the whole `blob:<ident>` token.
pub fn extract_media_keys(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for found in media_key_pattern().find_iter(text) {
        let key = found.as_str();
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_keys_in_first_appearance_order() {
        let keys = extract_media_keys("see blob:abc then blob:xyz.png and blob:abc again");
        assert_eq!(keys, vec!["blob:abc", "blob:xyz.png"]);
    }

    #[test]
    fn plain_text_has_no_keys() {
        assert!(extract_media_keys("no media here, just words").is_empty());
        assert!(extract_media_keys("").is_empty());
    }

    #[test]
    fn key_token_stops_at_invalid_characters() {
        let keys = extract_media_keys("(blob:cat_01), trailing!");
        assert_eq!(keys, vec!["blob:cat_01"]);
    }

    #[test]
    fn from_input_fills_id_and_timestamp() {
        let message = ChatMessage::from_input(
            "client-1",
            SendMessageInput {
                id: None,
                body: MessageBody::Text {
                    text: "hello".into(),
                },
            },
        );
        assert!(!message.id.is_empty());
        assert_eq!(message.sender, "client-1");
        assert_eq!(message.text(), Some("hello"));
    }

    #[test]
    fn from_input_keeps_caller_supplied_id() {
        let message = ChatMessage::from_input(
            "client-1",
            SendMessageInput {
                id: Some("msg-7".into()),
                body: MessageBody::DirectMedia {
                    url: "https://host/files/a.png".into(),
                },
            },
        );
        assert_eq!(message.id, "msg-7");
        assert_eq!(message.text(), None);
    }
}
