use chrono::{DateTime, Utc};
use shared::domain::{
    InstanceId, MessageStatusUpdate, STATUS_DELIVERED, STATUS_READ, STATUS_RECEIVED,
};
use storage::Storage;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
}

impl ReceiptKind {
    fn status(&self) -> &'static str {
        match self {
            ReceiptKind::Delivered => STATUS_DELIVERED,
            ReceiptKind::Read => STATUS_READ,
        }
    }
}

/// Status-affecting events reported by a running protocol client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Received {
        message_id: String,
        timestamp: DateTime<Utc>,
    },
    Receipt {
        message_ids: Vec<String>,
        kind: ReceiptKind,
        timestamp: DateTime<Utc>,
    },
}

/// Entry point for session starters to persist what their client observes.
pub async fn record_protocol_event(
    storage: &Storage,
    instance: &InstanceId,
    event: ProtocolEvent,
) -> anyhow::Result<()> {
    match event {
        ProtocolEvent::Received {
            message_id,
            timestamp,
        } => {
            let update = MessageStatusUpdate::new(
                message_id,
                timestamp,
                STATUS_RECEIVED,
                instance.as_str(),
            );
            storage.upsert_message_status(&update).await?;
        }
        ProtocolEvent::Receipt {
            message_ids,
            kind,
            timestamp,
        } => {
            debug!(%instance, count = message_ids.len(), status = kind.status(), "receipt");
            for message_id in message_ids {
                let update =
                    MessageStatusUpdate::new(message_id, timestamp, kind.status(), instance.as_str());
                storage.upsert_message_status(&update).await?;
            }
        }
    }
    Ok(())
}
