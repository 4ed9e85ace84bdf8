use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{InstanceId, MediaPayload},
    jid::Jid,
};

/// Identifies an existing message inside a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    pub id: String,
    pub participant: Option<Jid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// An empty `text` removes an earlier reaction.
    Reaction {
        key: MessageKey,
        text: String,
        sender_timestamp_ms: i64,
    },
    Revoke {
        chat: Jid,
        message_id: String,
    },
    Edit {
        chat: Jid,
        message_id: String,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub server_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceMedia {
    Text,
    Audio,
}

/// A live, authenticated connection to the messaging network for one instance.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    fn is_connected(&self) -> bool;
    fn own_jid(&self) -> Option<Jid>;
    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> Result<SendResponse>;
    async fn download(&self, media: &MediaPayload) -> Result<Vec<u8>>;
    async fn mark_read(
        &self,
        message_ids: &[String],
        at: DateTime<Utc>,
        chat: &Jid,
        sender: &Jid,
    ) -> Result<()>;
    async fn send_chat_presence(&self, jid: &Jid, state: &str, media: PresenceMedia)
        -> Result<()>;
}

/// Owns authentication and reconnect for an instance. A successful start only
/// means the connection sequence began; the client shows up in the
/// [`crate::ConnectionRegistry`] once it is established.
#[async_trait]
pub trait SessionStarter: Send + Sync {
    async fn start_instance(&self, instance: &InstanceId) -> Result<()>;
}

pub struct MissingSessionStarter;

#[async_trait]
impl SessionStarter for MissingSessionStarter {
    async fn start_instance(&self, instance: &InstanceId) -> Result<()> {
        Err(anyhow!(
            "session starter is unavailable for instance {instance}"
        ))
    }
}
