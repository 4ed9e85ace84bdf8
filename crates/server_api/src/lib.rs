use std::{path::PathBuf, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use session::{
    MessageKey, OutgoingMessage, PresenceMedia, ProtocolClient, SessionError, SessionGuard,
};
use shared::{
    domain::{
        InstanceId, MessageStatusUpdate, STATUS_EDITED, STATUS_READ, STATUS_REVOKED,
        STATUS_SENT,
    },
    error::{ApiError, ErrorCode},
    jid::{parse_jid, Jid},
    protocol::{
        ChatPresenceRequest, DeleteMessageRequest, DownloadMediaRequest, DownloadMediaResponse,
        EditMessageRequest, MarkReadRequest, MessageIdResponse, MessageStatusRequest,
        MessageStatusResponse, ReactRequest, SendResult, TimestampResponse,
    },
};
use storage::Storage;
use tracing::{debug, error, info, warn};

mod events;
mod media;

pub use events::{record_protocol_event, ProtocolEvent, ReceiptKind};

/// Everything an operation needs besides the request itself.
#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub sessions: SessionGuard,
    pub media_root: PathBuf,
}

const REACTION_REMOVE: &str = "remove";
const OWN_MESSAGE_PREFIX: &str = "me:";

pub async fn react(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: ReactRequest,
) -> Result<SendResult, ApiError> {
    let number = required(&req.number, "missing number in payload")?;
    let reaction = required(&req.reaction, "missing reaction in payload")?;
    let id = required(&req.id, "missing id in payload")?;
    let chat = parse_address(number)?;

    let (from_me, target_id) = match id.strip_prefix(OWN_MESSAGE_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, id),
    };
    if target_id.is_empty() {
        return Err(ApiError::validation("missing id in payload"));
    }
    let text = if reaction == REACTION_REMOVE {
        String::new()
    } else {
        reaction.to_string()
    };
    let participant = req
        .participant
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| match parse_jid(raw) {
            Ok(jid) => Some(jid),
            Err(error) => {
                debug!(participant = raw, %error, "ignoring invalid group participant");
                None
            }
        });

    let client = ensure_connected(ctx, instance).await?;
    let message = OutgoingMessage::Reaction {
        key: MessageKey {
            remote_jid: chat.clone(),
            from_me,
            id: target_id.to_string(),
            participant,
        },
        text,
        sender_timestamp_ms: Utc::now().timestamp_millis(),
    };
    let sent = client.send_message(&chat, message).await.map_err(|e| {
        error!(%instance, chat = %chat, error = %e, "failed to send reaction");
        ApiError::protocol(format!("error sending reaction: {e}"))
    })?;
    info!(%instance, chat = %chat, message_id = %sent.id, "reaction sent");

    record_status(ctx, instance, &sent.id, sent.timestamp, STATUS_SENT).await;
    Ok(SendResult {
        id: sent.id,
        chat: chat.to_string(),
        sender: own_address(client.as_ref()),
        is_from_me: true,
        is_group: chat.is_group(),
        timestamp: sent.timestamp,
        server_id: sent.server_id,
    })
}

pub async fn chat_presence(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: ChatPresenceRequest,
) -> Result<TimestampResponse, ApiError> {
    let number = required(&req.number, "missing number in payload")?;
    let state = required(&req.state, "missing state in payload")?;
    let jid = parse_address(number)?;
    let media = if req.audio {
        PresenceMedia::Audio
    } else {
        PresenceMedia::Text
    };

    let client = ensure_connected(ctx, instance).await?;
    client
        .send_chat_presence(&jid, state, media)
        .await
        .map_err(|e| {
            error!(%instance, chat = %jid, state, error = %e, "failed to send chat presence");
            ApiError::protocol(format!("failure sending chat presence: {e}"))
        })?;

    Ok(TimestampResponse {
        timestamp: DateTime::<Utc>::default(),
    })
}

pub async fn mark_read(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: MarkReadRequest,
) -> Result<TimestampResponse, ApiError> {
    let number = required(&req.number, "missing number in payload")?;
    if req.id.is_empty() {
        return Err(ApiError::validation("missing id in payload"));
    }
    let message_ids = req
        .id
        .iter()
        .map(|id| required(id, "empty id in payload").map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;
    let chat = parse_address(number)?;

    let client = ensure_connected(ctx, instance).await?;
    let now = Utc::now();
    if let Err(e) = client.mark_read(&message_ids, now, &chat, &chat).await {
        error!(%instance, chat = %chat, error = %e, "failed to mark messages as read");
        return Err(ApiError::protocol("error marking message as read"));
    }

    for message_id in &message_ids {
        record_status(ctx, instance, message_id, now, STATUS_READ).await;
    }
    Ok(TimestampResponse { timestamp: now })
}

pub async fn download_media(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: DownloadMediaRequest,
) -> Result<DownloadMediaResponse, ApiError> {
    let payload = req
        .message
        .into_media_payload()
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidMediaType, "invalid media type"))?;

    let client = ensure_connected(ctx, instance).await?;
    media::ensure_instance_dir(&ctx.media_root, instance).await?;

    let kind = payload.kind();
    let bytes = client.download(&payload).await.map_err(|e| {
        error!(%instance, %kind, error = %e, "media download failed");
        ApiError::protocol(format!("failed to download {kind}: {e}"))
    })?;
    debug!(%instance, %kind, size_bytes = bytes.len(), "media downloaded");

    let mimetype = payload.mime_type().to_string();
    Ok(DownloadMediaResponse {
        data: data_url(&mimetype, &bytes),
        mimetype,
        timestamp: Utc::now(),
    })
}

pub async fn message_status(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: MessageStatusRequest,
) -> Result<MessageStatusResponse, ApiError> {
    let id = required(&req.id, "missing id in payload")?;

    ensure_connected(ctx, instance).await?;
    let status = ctx
        .storage
        .message_status_by_id(id)
        .await
        .map_err(storage_error)?;

    Ok(MessageStatusResponse {
        status,
        timestamp: Utc::now(),
    })
}

pub async fn delete_for_everyone(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: DeleteMessageRequest,
) -> Result<MessageIdResponse, ApiError> {
    let chat = required(&req.chat, "missing chat in payload")?;
    let message_id = required(&req.message_id, "missing messageId in payload")?;
    let chat = parse_address(chat)?;

    let client = ensure_connected(ctx, instance).await?;
    let revoke = OutgoingMessage::Revoke {
        chat: chat.clone(),
        message_id: message_id.to_string(),
    };
    let sent = client.send_message(&chat, revoke).await.map_err(|e| {
        error!(%instance, chat = %chat, message_id, error = %e, "failed to revoke message");
        ApiError::protocol(format!("error deleting message: {e}"))
    })?;
    info!(%instance, chat = %chat, message_id, "message revoked for everyone");

    record_status(ctx, instance, message_id, sent.timestamp, STATUS_REVOKED).await;
    Ok(MessageIdResponse {
        message_id: message_id.to_string(),
        timestamp: sent.timestamp,
    })
}

pub async fn edit_message(
    ctx: &ApiContext,
    instance: &InstanceId,
    req: EditMessageRequest,
) -> Result<MessageIdResponse, ApiError> {
    let chat = required(&req.chat, "missing chat in payload")?;
    let body = required(&req.message, "missing message in payload")?;
    let message_id = required(&req.message_id, "missing messageId in payload")?;
    let chat = parse_address(chat)?;

    let client = ensure_connected(ctx, instance).await?;
    let edit = OutgoingMessage::Edit {
        chat: chat.clone(),
        message_id: message_id.to_string(),
        text: body.to_string(),
    };
    let sent = client.send_message(&chat, edit).await.map_err(|e| {
        error!(%instance, chat = %chat, message_id, error = %e, "failed to edit message");
        ApiError::protocol(format!("error editing message: {e}"))
    })?;

    record_status(ctx, instance, message_id, sent.timestamp, STATUS_EDITED).await;
    Ok(MessageIdResponse {
        message_id: message_id.to_string(),
        timestamp: sent.timestamp,
    })
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

async fn ensure_connected(
    ctx: &ApiContext,
    instance: &InstanceId,
) -> Result<Arc<dyn ProtocolClient>, ApiError> {
    ctx.sessions
        .ensure_connected(instance)
        .await
        .map_err(unavailable)
}

/// The protocol action already happened, so a failed write is logged rather
/// than turned into an error the caller would retry.
async fn record_status(
    ctx: &ApiContext,
    instance: &InstanceId,
    message_id: &str,
    at: DateTime<Utc>,
    status: &str,
) {
    let update = MessageStatusUpdate::new(message_id, at, status, instance.as_str());
    if let Err(error) = ctx.storage.upsert_message_status(&update).await {
        warn!(%instance, message_id, status, error = %error, "failed to record message status");
    }
}

fn own_address(client: &dyn ProtocolClient) -> String {
    client
        .own_jid()
        .map(|jid| jid.to_non_ad().to_string())
        .unwrap_or_default()
}

fn required<'a>(value: &'a str, message: &str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(message));
    }
    Ok(value)
}

fn parse_address(raw: &str) -> Result<Jid, ApiError> {
    parse_jid(raw).map_err(|e| {
        ApiError::new(
            ErrorCode::InvalidAddress,
            format!("could not parse address: {e}"),
        )
    })
}

fn unavailable(err: SessionError) -> ApiError {
    warn!(instance = %err.instance(), error = %err, "no usable session for request");
    ApiError::new(ErrorCode::SessionUnavailable, err.to_string())
}

fn storage_error(err: anyhow::Error) -> ApiError {
    error!(error = %err, "status store failure");
    ApiError::storage(err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
