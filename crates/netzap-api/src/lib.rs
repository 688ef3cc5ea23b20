//! HTTP and WebSocket surface of the hub.
//!
//! Handlers are thin: they parse the request, call one [`Hub`] operation and
//! wrap the result in the JSON envelope clients expect.

pub mod chats;
pub mod error;
pub mod feed;
pub mod messages;
pub mod session;
pub mod system;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use netzap_hub::{EventSink, Hub};

pub struct AppStateInner {
    pub hub: Hub,
    /// Ingress for events pushed by the transport bridge.
    pub events: EventSink,
}

pub type AppState = Arc<AppStateInner>;

pub fn router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/whatsapp", get(session::get_status).post(session::execute_action))
        .route("/whatsapp/messages", post(chats::list_all_messages))
        .route("/whatsapp/chats", get(chats::list_chats))
        .route("/whatsapp/chats/{chat_id}/messages", get(chats::list_chat_messages))
        .route("/whatsapp/chats/{chat_id}/read", post(chats::mark_chat_read))
        .route("/whatsapp/media/{message_id}", get(chats::get_media));

    let message_routes = Router::new()
        .route(
            "/messages",
            get(messages::get_messages)
                .post(messages::send_message)
                .patch(messages::mark_as_read),
        )
        .route("/messages/last-id", get(messages::last_message_id));

    let system_routes = Router::new()
        .route("/debug", get(system::debug))
        .route("/health", get(system::health))
        .route("/transport/events", post(system::transport_event))
        .route("/events", get(feed::ws_upgrade));

    Router::new()
        .merge(session_routes)
        .merge(message_routes)
        .merge(system_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use netzap_db::Database;
    use netzap_hub::mock::{MockTransport, raw};
    use netzap_hub::{EVENT_QUEUE_CAPACITY, HubConfig};
    use netzap_types::transport::TransportEvent;

    use super::*;

    struct Harness {
        app: Router,
        hub: Hub,
        transport: Arc<MockTransport>,
    }

    async fn harness() -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let transport = Arc::new(MockTransport::new());
        let hub = Hub::new(db, transport.clone(), HubConfig::default()).await.unwrap();
        let (events, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        hub.spawn_event_loop(rx);

        let state = Arc::new(AppStateInner {
            hub: hub.clone(),
            events,
        });
        Harness {
            app: router(state),
            hub,
            transport,
        }
    }

    async fn make_ready(hub: &Hub) {
        hub.initialize_session().await.unwrap();
        hub.handle_event(TransportEvent::Authenticated).await;
        hub.handle_event(TransportEvent::Ready).await;
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn status_reports_waiting_session() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/whatsapp", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["isReady"], false);
        assert_eq!(body["isInitializing"], false);
        assert_eq!(body["qrCode"], Value::Null);
        assert_eq!(body["message"], "waiting for initialization");
    }

    #[tokio::test]
    async fn initialize_then_logout() {
        let h = harness().await;

        let (status, body) = call(&h.app, "POST", "/whatsapp", Some(json!({"action": "initialize"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isInitializing"], true);
        assert_eq!(h.transport.connects(), 1);

        let (status, body) = call(&h.app, "POST", "/whatsapp", Some(json!({"action": "logout"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "disconnected");
        assert_eq!(h.transport.destroys(), 1);
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let h = harness().await;
        let (status, body) = call(&h.app, "POST", "/whatsapp", Some(json!({"action": "reboot"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(h.transport.connects(), 0);
    }

    #[tokio::test]
    async fn connect_failure_maps_to_bad_gateway() {
        let h = harness().await;
        h.transport.fail_connect(true);
        let (status, body) = call(&h.app, "POST", "/whatsapp", Some(json!({"action": "initialize"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("browser failed to launch"));
    }

    #[tokio::test]
    async fn send_requires_ready_session() {
        let h = harness().await;
        let (status, body) =
            call(&h.app, "POST", "/messages", Some(json!({"to": "A", "message": "hi"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn send_validates_input() {
        let h = harness().await;
        make_ready(&h.hub).await;

        let (status, _) = call(&h.app, "POST", "/messages", Some(json!({"to": " ", "message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&h.app, "POST", "/messages", Some(json!({"to": "A"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn send_and_mark_read() {
        let h = harness().await;
        make_ready(&h.hub).await;
        h.hub
            .handle_event(TransportEvent::Message(raw("m1", "A", "me", false, 100)))
            .await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/messages",
            Some(json!({"to": "A", "message": "hello", "markAsRead": true})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["body"], "hello");
        assert_eq!(body["isFromMe"], true);
        assert_eq!(body["chatId"], "A");
        assert!(body.get("success").is_none());

        let (_, chats) = call(&h.app, "GET", "/whatsapp/chats", None).await;
        assert_eq!(chats["count"], 1);
        assert_eq!(chats["data"][0]["unreadCount"], 0);
    }

    #[tokio::test]
    async fn chat_reads_and_mark_read() {
        let h = harness().await;
        make_ready(&h.hub).await;
        h.hub
            .handle_event(TransportEvent::Message(raw("m1", "A", "me", false, 100)))
            .await;
        h.hub
            .handle_event(TransportEvent::Message(raw("m2", "A", "me", false, 101)))
            .await;

        let (status, body) = call(&h.app, "GET", "/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_array());
        assert_eq!(body[0]["chatId"], "A");
        assert_eq!(body[0]["unreadCount"], 2);
        assert_eq!(body[0]["lastMessage"]["id"], "m2");

        let (_, body) = call(&h.app, "GET", "/messages?chatId=A", None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["id"], "m1");

        let (_, body) = call(&h.app, "GET", "/whatsapp/chats/A/messages", None).await;
        assert_eq!(body["data"][1]["id"], "m2");

        let (status, _) = call(&h.app, "PATCH", "/messages", Some(json!({"chatId": "A"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&h.app, "GET", "/whatsapp/chats", None).await;
        assert_eq!(body["data"][0]["unreadCount"], 0);

        let (status, body) = call(&h.app, "POST", "/whatsapp/chats/ghost/read", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, body) = call(&h.app, "GET", "/messages/last-id", None).await;
        assert_eq!(body["lastMessageId"], "m2");

        let (_, body) = call(&h.app, "POST", "/whatsapp/messages?limit=1", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["id"], "m2");
    }

    #[tokio::test]
    async fn media_errors_map_to_status_codes() {
        let h = harness().await;
        make_ready(&h.hub).await;
        h.hub
            .handle_event(TransportEvent::Message(raw("plain", "A", "me", false, 1)))
            .await;

        let (status, body) = call(&h.app, "GET", "/whatsapp/media/plain", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn transport_webhook_feeds_event_loop() {
        let h = harness().await;
        h.hub.initialize_session().await.unwrap();

        let (status, _) = call(
            &h.app,
            "POST",
            "/transport/events",
            Some(json!({"type": "qr", "data": {"payload": "2@abc"}})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let mut session = h.hub.session().subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while session.borrow_and_update().qr_challenge.is_none() {
                session.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let (_, body) = call(&h.app, "GET", "/whatsapp", None).await;
        assert!(body["qrCode"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(body["qrChallenge"], "2@abc");
    }

    #[tokio::test]
    async fn malformed_webhook_is_rejected() {
        let h = harness().await;
        let (status, _) = call(&h.app, "POST", "/transport/events", Some(json!({"type": "bogus"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn debug_and_health() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&h.app, "GET", "/debug", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["client"]["isReady"], false);
        assert_eq!(body["messages"]["total"], 0);
        assert_eq!(body["chatGroups"]["total"], 0);
    }
}
