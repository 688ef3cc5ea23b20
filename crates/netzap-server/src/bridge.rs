//! [`Transport`] over the HTTP API of the chat-transport sidecar.
//!
//! Calls go out as JSON requests; events come back through the sidecar
//! posting to `/transport/events`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use netzap_hub::{Transport, TransportError};
use netzap_types::models::MediaPayload;
use netzap_types::transport::{RawChat, RawMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpBridgeTransport {
    client: Client,
    base: Url,
}

impl HttpBridgeTransport {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            anyhow::bail!("bridge URL '{}' cannot be used as a base", base_url);
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base })
    }

    /// Base URL joined with percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::new("bridge URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, segments: &[&str], body: Option<serde_json::Value>) -> Result<Response, TransportError> {
        let url = self.url(segments)?;
        debug!("Bridge POST {}", url);
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(request_failed)
    }

    async fn get(&self, url: Url) -> Result<Response, TransportError> {
        debug!("Bridge GET {}", url);
        self.client.get(url).send().await.map_err(request_failed)
    }
}

#[async_trait]
impl Transport for HttpBridgeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        expect_success(self.post(&["connect"], None).await?).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        expect_success(self.post(&["destroy"], None).await?).await?;
        Ok(())
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<RawMessage, TransportError> {
        let resp = self
            .post(&["messages"], Some(json!({ "to": to, "body": body })))
            .await?;
        decode(expect_success(resp).await?).await
    }

    async fn get_chats(&self) -> Result<Vec<RawChat>, TransportError> {
        let resp = self.get(self.url(&["chats"])?).await?;
        decode(expect_success(resp).await?).await
    }

    async fn fetch_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<RawMessage>, TransportError> {
        let mut url = self.url(&["chats", chat_id, "messages"])?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        let resp = self.get(url).await?;
        decode(expect_success(resp).await?).await
    }

    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, TransportError> {
        let resp = self.get(self.url(&["messages", message_id, "media"])?).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(expect_success(resp).await?).await.map(Some)
    }
}

fn request_failed(e: reqwest::Error) -> TransportError {
    TransportError::new(format!("bridge request failed: {}", e))
}

async fn expect_success(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::new(format!("bridge returned {}: {}", status, body.trim())))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, TransportError> {
    resp.json::<T>()
        .await
        .map_err(|e| TransportError::new(format!("bad bridge response: {}", e)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::StatusCode as AxumStatus,
        routing::{get, post},
    };
    use serde_json::Value;

    use super::*;

    fn message(id: &str, from: &str, to: &str, from_me: bool) -> Value {
        json!({ "id": id, "from": from, "to": to, "body": "", "timestamp": 1, "fromMe": from_me })
    }

    async fn sidecar() -> String {
        let app = Router::new()
            .route("/connect", post(|| async { AxumStatus::NO_CONTENT }))
            .route(
                "/destroy",
                post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "browser already closed") }),
            )
            .route(
                "/messages",
                post(|Json(body): Json<Value>| async move {
                    let to = body["to"].as_str().unwrap_or_default().to_string();
                    let mut sent = message("s1", "me", &to, true);
                    sent["body"] = body["body"].clone();
                    Json(sent)
                }),
            )
            .route(
                "/chats",
                get(|| async { Json(json!([{ "id": "A@c.us", "name": "Alice", "isGroup": false }])) }),
            )
            .route(
                "/chats/{id}/messages",
                get(|Path(id): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    let limit: usize = q.get("limit").and_then(|l| l.parse().ok()).unwrap_or(0);
                    let all = vec![message("m1", &id, "me", false), message("m2", &id, "me", false)];
                    Json(Value::Array(all.into_iter().take(limit).collect()))
                }),
            )
            .route(
                "/messages/{id}/media",
                get(|Path(id): Path<String>| async move {
                    if id == "img" {
                        Ok(Json(json!({ "mimetype": "image/png", "data": "AAA=" })))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn url_encodes_chat_ids() {
        let bridge = HttpBridgeTransport::new("http://localhost:3100/bridge/").unwrap();
        let url = bridge.url(&["chats", "a/b", "messages"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3100/bridge/chats/a%2Fb/messages");
    }

    #[test]
    fn rejects_unusable_base() {
        assert!(HttpBridgeTransport::new("mailto:someone@example.com").is_err());
        assert!(HttpBridgeTransport::new("not a url").is_err());
    }

    #[tokio::test]
    async fn drives_sidecar_calls() {
        let bridge = HttpBridgeTransport::new(&sidecar().await).unwrap();

        bridge.connect().await.unwrap();

        let err = bridge.destroy().await.unwrap_err();
        assert!(err.0.contains("500"));
        assert!(err.0.contains("browser already closed"));

        let sent = bridge.send_message("A@c.us", "hello").await.unwrap();
        assert_eq!(sent.id, "s1");
        assert_eq!(sent.to, "A@c.us");
        assert_eq!(sent.body, "hello");
        assert!(sent.from_me);

        let chats = bridge.get_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].name.as_deref(), Some("Alice"));

        let messages = bridge.fetch_messages("A@c.us", 1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, "A@c.us");
        assert_eq!(messages[0].kind, "chat");

        let media = bridge.download_media("img").await.unwrap().unwrap();
        assert_eq!(media.mimetype, "image/png");
        assert!(bridge.download_media("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_sidecar_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bridge = HttpBridgeTransport::new(&format!("http://{}", addr)).unwrap();
        let err = bridge.connect().await.unwrap_err();
        assert!(err.0.starts_with("bridge request failed"));
    }
}
