use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_SENT: &str = "sent";
pub const STATUS_RECEIVED: &str = "received";
pub const STATUS_DELIVERED: &str = "delivered";
pub const STATUS_READ: &str = "read";
pub const STATUS_REVOKED: &str = "revoked";
pub const STATUS_EDITED: &str = "edited";

/// One managed messaging account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Instance ids double as directory names, so only `[A-Za-z0-9._-]` is
    /// accepted and `.`/`..` are rejected.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self.0 != "."
            && self.0 != ".."
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable status row for a message this system observed or sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub message_id: String,
    pub timestamp: String,
    pub status: String,
    pub source: String,
}

/// Upsert input for the status store; the internal id is assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStatusUpdate {
    pub message_id: String,
    pub timestamp: String,
    pub status: String,
    pub source: String,
}

impl MessageStatusUpdate {
    pub fn new(
        message_id: impl Into<String>,
        at: DateTime<Utc>,
        status: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: canonical_timestamp(at),
            status: status.into(),
            source: source.into(),
        }
    }
}

/// Fixed-width UTC form (`2024-05-01T12:00:00.000Z`) whose byte order matches time order.
pub fn canonical_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Document,
    Video,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Sticker => "sticker",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download descriptor of a media attachment as delivered by the protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, rename = "fileSHA256", skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    #[serde(default, rename = "fileEncSHA256", skip_serializing_if = "Option::is_none")]
    pub file_enc_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    Image(MediaMessage),
    Audio(MediaMessage),
    Document(MediaMessage),
    Video(MediaMessage),
    Sticker(MediaMessage),
}

impl MediaPayload {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaPayload::Image(_) => MediaKind::Image,
            MediaPayload::Audio(_) => MediaKind::Audio,
            MediaPayload::Document(_) => MediaKind::Document,
            MediaPayload::Video(_) => MediaKind::Video,
            MediaPayload::Sticker(_) => MediaKind::Sticker,
        }
    }

    pub fn message(&self) -> &MediaMessage {
        match self {
            MediaPayload::Image(message)
            | MediaPayload::Audio(message)
            | MediaPayload::Document(message)
            | MediaPayload::Video(message)
            | MediaPayload::Sticker(message) => message,
        }
    }

    pub fn mime_type(&self) -> &str {
        self.message()
            .mimetype
            .as_deref()
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
            .unwrap_or("application/octet-stream")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn canonical_timestamps_sort_in_time_order() {
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("date");
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("date");
        assert_eq!(canonical_timestamp(earlier), "2024-05-01T09:00:00.000Z");
        assert!(canonical_timestamp(earlier) < canonical_timestamp(later));
    }

    #[test]
    fn instance_ids_must_be_safe_directory_names() {
        assert!(InstanceId::new("tenant-01_a.b").is_valid());
        assert!(!InstanceId::new("").is_valid());
        assert!(!InstanceId::new("..").is_valid());
        assert!(!InstanceId::new("../etc").is_valid());
        assert!(!InstanceId::new("a/b").is_valid());
    }

    #[test]
    fn media_payload_falls_back_to_octet_stream() {
        let payload = MediaPayload::Document(MediaMessage::default());
        assert_eq!(payload.kind(), MediaKind::Document);
        assert_eq!(payload.mime_type(), "application/octet-stream");

        let payload = MediaPayload::Image(MediaMessage {
            mimetype: Some("image/jpeg".into()),
            ..MediaMessage::default()
        });
        assert_eq!(payload.mime_type(), "image/jpeg");
    }
}
