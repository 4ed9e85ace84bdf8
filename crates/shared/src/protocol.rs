use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MediaMessage, MediaPayload, MessageRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactRequest {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub reaction: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPresenceRequest {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub id: Vec<String>,
}

/// Protocol message as received; at most one media field is expected to be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<MediaMessage>,
}

impl MessageEnvelope {
    /// Picks the media sub-payload, checking image, audio, document, video, sticker in order.
    pub fn into_media_payload(self) -> Option<MediaPayload> {
        self.image_message
            .map(MediaPayload::Image)
            .or(self.audio_message.map(MediaPayload::Audio))
            .or(self.document_message.map(MediaPayload::Document))
            .or(self.video_message.map(MediaPayload::Video))
            .or(self.sticker_message.map(MediaPayload::Sticker))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadMediaRequest {
    #[serde(default)]
    pub message: MessageEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusRequest {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    #[serde(default)]
    pub chat: String,
    #[serde(default)]
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    #[serde(default)]
    pub chat: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_id: String,
}

/// Metadata of a message this account just sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub id: String,
    pub chat: String,
    pub sender: String,
    pub is_from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampResponse {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadMediaResponse {
    pub data: String,
    pub mimetype: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStatusResponse {
    pub status: Option<MessageRecord>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIdResponse {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    pub message: String,
    pub data: T,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            message: "success".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
