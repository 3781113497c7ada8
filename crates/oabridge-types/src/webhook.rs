use serde::{Deserialize, Serialize};

/// Event names Zalo delivers over the webhook. The raw string is stored
/// verbatim in the event log; this enum only classifies it for the
/// conversation projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    UserSendText,
    UserSendImage,
    UserSendAudio,
    UserSendSticker,
    UserSendGif,
    UserSendLink,
    UserSendLocation,
    OaSendText,
    Follow,
    Unfollow,
}

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "user_send_text" => Self::UserSendText,
            "user_send_image" => Self::UserSendImage,
            "user_send_audio" => Self::UserSendAudio,
            "user_send_sticker" => Self::UserSendSticker,
            "user_send_gif" => Self::UserSendGif,
            "user_send_link" => Self::UserSendLink,
            "user_send_location" => Self::UserSendLocation,
            "oa_send_text" => Self::OaSendText,
            "follow" => Self::Follow,
            "unfollow" => Self::Unfollow,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserSendText => "user_send_text",
            Self::UserSendImage => "user_send_image",
            Self::UserSendAudio => "user_send_audio",
            Self::UserSendSticker => "user_send_sticker",
            Self::UserSendGif => "user_send_gif",
            Self::UserSendLink => "user_send_link",
            Self::UserSendLocation => "user_send_location",
            Self::OaSendText => "oa_send_text",
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
        }
    }

    /// Inbound = sent by a user to the OA. Only inbound message events
    /// count toward the conversation list.
    pub fn is_inbound_message(&self) -> bool {
        matches!(
            self,
            Self::UserSendText
                | Self::UserSendImage
                | Self::UserSendAudio
                | Self::UserSendSticker
                | Self::UserSendGif
                | Self::UserSendLink
                | Self::UserSendLocation
        )
    }
}

/// The parts of a webhook payload the bridge actually reads. Zalo sends
/// more fields than these; the full raw body is what gets persisted, so
/// unknown fields are never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_name: String,
    #[serde(default)]
    pub oa_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub sender: Option<Peer>,
    #[serde(default)]
    pub recipient: Option<Peer>,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

impl WebhookPayload {
    /// The account the event belongs to. Some Zalo event revisions carry
    /// `oa_id`, older ones only `app_id`.
    pub fn owning_account(&self) -> Option<&str> {
        self.oa_id.as_deref().or(self.app_id.as_deref())
    }
}

/// Synthetic payload for an outbound message the bridge itself sent,
/// shaped like a real `oa_send_text` webhook so the projection treats
/// both uniformly.
pub fn synthetic_outbound(oa_id: &str, user_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "event_name": "oa_send_text",
        "oa_id": oa_id,
        "sender": { "id": oa_id },
        "recipient": { "id": user_id },
        "message": { "text": text },
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
}
