use super::*;
use anyhow::anyhow;
use async_trait::async_trait;
use axum::{body, body::Body, http::Request, response::Response};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use session::{OutgoingMessage, PresenceMedia, ProtocolClient, SendResponse};
use shared::{domain::MediaPayload, jid::Jid};
use std::time::Duration;
use tower::ServiceExt;

struct ConnectedClient;

#[async_trait]
impl ProtocolClient for ConnectedClient {
    fn is_connected(&self) -> bool {
        true
    }

    fn own_jid(&self) -> Option<Jid> {
        shared::jid::parse_jid("5511000000000:3@s.whatsapp.net").ok()
    }

    async fn send_message(&self, _to: &Jid, message: OutgoingMessage) -> anyhow::Result<SendResponse> {
        let id = match message {
            OutgoingMessage::Reaction { .. } => "3EB0REACTION".to_string(),
            OutgoingMessage::Revoke { message_id, .. } | OutgoingMessage::Edit { message_id, .. } => {
                format!("{message_id}-ack")
            }
        };
        Ok(SendResponse {
            id,
            timestamp: Utc::now(),
            server_id: None,
        })
    }

    async fn download(&self, _media: &MediaPayload) -> anyhow::Result<Vec<u8>> {
        Err(anyhow!("no media in tests"))
    }

    async fn mark_read(
        &self,
        _message_ids: &[String],
        _at: DateTime<Utc>,
        _chat: &Jid,
        _sender: &Jid,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_chat_presence(
        &self,
        _jid: &Jid,
        _state: &str,
        _media: PresenceMedia,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn test_app() -> (Router, ApiContext, tempfile::TempDir) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let registry = ConnectionRegistry::new();
    registry
        .set(InstanceId::new("live"), Arc::new(ConnectedClient))
        .await;
    let media = tempfile::tempdir().expect("tempdir");

    let api = ApiContext {
        storage,
        sessions: SessionGuard::new(registry, Arc::new(MissingSessionStarter))
            .with_settle_interval(Duration::from_millis(10)),
        media_root: media.path().to_path_buf(),
    };
    let app = build_router(Arc::new(AppState { api: api.clone() }));
    (app, api, media)
}

fn post_json(uri: &str, instance: Option<&str>, payload: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(instance) = instance {
        builder = builder.header(INSTANCE_HEADER, instance);
    }
    builder
        .body(Body::from(payload.to_string()))
        .expect("request")
}

async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _api, _media) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn missing_or_unsafe_instance_header_is_a_bad_request() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/message/status", None, json!({ "id": "3EB0" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "missing x-instance-id header" })
    );

    let response = app
        .oneshot(post_json("/message/status", Some("../x"), json!({ "id": "3EB0" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validation_failures_map_to_bad_request() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/message/markread",
            Some("live"),
            json!({ "number": "5511999999999", "id": [] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "missing id in payload" })
    );

    let response = app
        .oneshot(post_json(
            "/message/downloadimage",
            Some("live"),
            json!({ "message": { "conversation": "hi" } }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "invalid media type" })
    );
}

#[tokio::test]
async fn instance_without_session_yields_server_error() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/react",
            Some("offline"),
            json!({ "number": "5511999999999", "reaction": "👍", "id": "3EB0ABC" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "no active session found" })
    );
}

#[tokio::test]
async fn react_on_live_instance_returns_success_envelope() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/react",
            Some("live"),
            json!({ "number": "+5511999999999", "reaction": "remove", "id": "3EB0ABC" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["message"], "success");
    assert_eq!(body["data"]["id"], "3EB0REACTION");
    assert_eq!(body["data"]["isFromMe"], true);
    assert_eq!(body["data"]["sender"], "5511000000000@s.whatsapp.net");
}

#[tokio::test]
async fn delete_then_status_round_trips_through_the_store() {
    let (app, api, _media) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/message/delete",
            Some("live"),
            json!({ "chat": "5511999999999@s.whatsapp.net", "messageId": "ABC123" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["messageId"], "ABC123");

    let response = app
        .clone()
        .oneshot(post_json("/message/status", Some("live"), json!({ "id": "ABC123" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"]["status"], "revoked");
    assert_eq!(body["data"]["status"]["source"], "live");

    let response = app
        .oneshot(post_json("/message/status", Some("live"), json!({ "id": "NOPE" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await["data"]["status"].is_null());

    let (latest, _) = api
        .storage
        .latest_message_for_source("live")
        .await
        .expect("latest");
    assert_eq!(latest, "ABC123");
}

#[tokio::test]
async fn download_failure_is_a_server_error_naming_the_kind() {
    let (app, _api, media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/downloadimage",
            Some("live"),
            json!({ "message": { "stickerMessage": { "mimetype": "image/webp" } } }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .expect("error string")
        .starts_with("failed to download sticker"));
    assert!(media.path().join("live").is_dir());
}

#[tokio::test]
async fn mistyped_body_is_a_bad_request_with_error_body() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/markread",
            Some("live"),
            json!({ "number": "5511999999999", "id": "ABC" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .expect("error string")
        .contains("invalid type"));
}

#[tokio::test]
async fn body_without_json_content_type_is_a_bad_request() {
    let (app, _api, _media) = test_app().await;

    let request = Request::post("/message/react")
        .header(INSTANCE_HEADER, "live")
        .body(Body::from(r#"{"number":"5511"#))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn truncated_json_is_a_bad_request() {
    let (app, _api, _media) = test_app().await;

    let request = Request::post("/message/status")
        .header("content-type", "application/json")
        .header(INSTANCE_HEADER, "live")
        .body(Body::from(r#"{"id":"#))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn unparsable_address_is_a_bad_request() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/delete",
            Some("live"),
            json!({ "chat": "not a number", "messageId": "ABC123" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"]
        .as_str()
        .expect("error string")
        .starts_with("could not parse address"));
}

#[tokio::test]
async fn presence_on_live_instance_returns_zero_timestamp() {
    let (app, _api, _media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/presence",
            Some("live"),
            json!({ "number": "5511999999999", "state": "composing", "audio": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["message"], "success");
    let timestamp: DateTime<Utc> =
        serde_json::from_value(body["data"]["timestamp"].clone()).expect("timestamp");
    assert_eq!(timestamp, DateTime::<Utc>::default());
}

#[tokio::test]
async fn edit_on_live_instance_returns_message_id_and_records_status() {
    let (app, api, _media) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/message/edit",
            Some("live"),
            json!({
                "chat": "5511999999999",
                "message": "corrected text",
                "messageId": "3EB0EDIT"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["message"], "success");
    assert_eq!(body["data"]["messageId"], "3EB0EDIT");

    let record = api
        .storage
        .message_status_by_id("3EB0EDIT")
        .await
        .expect("lookup")
        .expect("record");
    assert_eq!(record.status, "edited");
    assert_eq!(record.source, "live");
}
