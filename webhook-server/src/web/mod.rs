//! Ingestion server.
//!
//! Routes:
//! - `POST <webhook path>`: receive one update and dispatch it
//! - `GET /`: greeting page
//! - `GET /health`: liveness
//! - `GET /ready`: readiness, 503 until the webhook is registered
//!
//! Everything else is 404, and other methods on the webhook path are 405.

pub mod handlers;
pub mod secret;
pub mod server;

use axum::{extract::Request, routing::get, Router};
use tower_http::trace::TraceLayer;

pub use handlers::{
    greeting, health, ready, receive_update, AppState, Greeting, HealthResponse, Readiness,
    Rejection,
};
pub use secret::{SecretToken, SECRET_TOKEN_HEADER};
pub use server::{start, RunningServer};

/// Build the application router.
///
/// The trace span records the method only: the URI carries the secret path.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(greeting))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .fallback(receive_update)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!("http_request", method = %request.method())
            }),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::Poll;

    use axum::body::{to_bytes, Body, Bytes};
    use axum::extract::ConnectInfo;
    use axum::http::{header, Method, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::dispatch::{Dispatcher, Handler, Outcome, WebhookReply};
    use crate::telegram::{BotToken, Update};
    use crate::Config;

    const HOOK: &str = "/42:token";
    const TELEGRAM_IP: &str = "149.154.167.220";
    const UPDATE: &str = r#"{"update_id":1,"message":{"message_id":10,"date":1700000000,"chat":{"id":99,"type":"private"},"text":"hello"}}"#;

    struct Harness {
        app: Router,
        state: AppState,
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl Harness {
        fn new(configure: impl FnOnce(&mut Config)) -> Self {
            Self::with_handler(configure, |_: Update| Outcome::Done)
        }

        fn with_handler(configure: impl FnOnce(&mut Config), handler: impl Handler) -> Self {
            let mut config = Config::new(BotToken::new("42:token"));
            config.max_body_bytes = 1024;
            configure(&mut config);

            let seen = Arc::new(Mutex::new(Vec::new()));
            let recorder = Arc::clone(&seen);
            let handler = Arc::new(handler);
            let dispatcher = Dispatcher::new(move |update: Update| {
                recorder.lock().unwrap().push(update.update_id);
                handler.handle(update)
            });

            let allowlist = config.allowlist().unwrap();
            let state = AppState::new(
                config,
                allowlist,
                dispatcher,
                Greeting::new("Hook", Some("hook_bot")),
            );
            Self {
                app: router(state.clone()),
                state,
                seen,
            }
        }

        async fn send(&self, request: Request) -> Response {
            self.app.clone().oneshot(request).await.unwrap()
        }

        fn dispatched(&self) -> Vec<i64> {
            self.seen.lock().unwrap().clone()
        }
    }

    fn request(method: Method, path: &str, from: &str, body: Body) -> Request {
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(from.parse().unwrap(), 40000)));
        request
    }

    fn post(body: &'static str) -> Request {
        let mut request = request(Method::POST, HOOK, TELEGRAM_IP, Body::from(body));
        request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, body.len().into());
        request
    }

    /// A body that records whether anything ever polled it.
    fn watched_body() -> (Body, Arc<AtomicBool>) {
        let polled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&polled);
        let stream = futures::stream::poll_fn(move |_| {
            flag.store(true, Ordering::SeqCst);
            Poll::Ready(Some(Ok::<_, std::io::Error>(Bytes::from_static(UPDATE.as_bytes()))))
        });
        (Body::from_stream(stream), polled)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allowlisted_update_is_dispatched_once() {
        let harness = Harness::new(|_| {});
        let response = harness.send(post(UPDATE)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(harness.dispatched(), vec![1]);
    }

    #[tokio::test]
    async fn test_foreign_source_is_forbidden_before_body_read() {
        let harness = Harness::new(|_| {});
        let (body, polled) = watched_body();
        let response = harness
            .send(request(Method::POST, HOOK, "8.8.8.8", body))
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!polled.load(Ordering::SeqCst));
        assert!(harness.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_missing_peer_address_is_forbidden() {
        let harness = Harness::new(|_| {});
        let mut request = post(UPDATE);
        request.extensions_mut().remove::<ConnectInfo<SocketAddr>>();

        assert_eq!(harness.send(request).await.status(), StatusCode::FORBIDDEN);
        assert!(harness.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_ipv4_mapped_source_is_allowed() {
        let harness = Harness::new(|_| {});
        let mut request = post(UPDATE);
        request.extensions_mut().insert(ConnectInfo(SocketAddr::new(
            "::ffff:149.154.167.220".parse().unwrap(),
            40000,
        )));

        assert_eq!(harness.send(request).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_declared_oversize_is_rejected_before_body_read() {
        let harness = Harness::new(|_| {});
        let (body, polled) = watched_body();
        let mut request = request(Method::POST, HOOK, TELEGRAM_IP, body);
        request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, 4096.into());

        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!polled.load(Ordering::SeqCst));
        assert!(harness.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_oversize_is_capped() {
        let harness = Harness::new(|_| {});
        let chunks = (0..8).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![b' '; 512])));
        let body = Body::from_stream(futures::stream::iter(chunks));

        let response = harness
            .send(request(Method::POST, HOOK, TELEGRAM_IP, body))
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(harness.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_content_length() {
        let harness = Harness::new(|_| {});
        let mut request = post(UPDATE);
        request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, "lots".parse().unwrap());

        assert_eq!(harness.send(request).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wrong_content_type() {
        let harness = Harness::new(|_| {});
        let (body, polled) = watched_body();
        let mut request = request(Method::POST, HOOK, TELEGRAM_IP, body);
        request
            .headers_mut()
            .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());

        assert_eq!(
            harness.send(request).await.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_json_content_type_with_charset() {
        let harness = Harness::new(|_| {});
        let mut request = post(UPDATE);
        request.headers_mut().insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );

        assert_eq!(harness.send(request).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_methods_on_webhook_path() {
        let harness = Harness::new(|_| {});
        let response = harness
            .send(request(Method::GET, HOOK, TELEGRAM_IP, Body::empty()))
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let harness = Harness::new(|_| {});
        for path in ["/42:other", "/42:token/extra", "/nope"] {
            let response = harness
                .send(request(Method::POST, path, TELEGRAM_IP, Body::from(UPDATE)))
                .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        }
        assert!(harness.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_custom_webhook_path() {
        let harness = Harness::new(|c| c.webhook_path = Some("/updates".to_string()));
        let mut request = post(UPDATE);
        *request.uri_mut() = "/updates".parse().unwrap();
        assert_eq!(harness.send(request).await.status(), StatusCode::OK);

        assert_eq!(harness.send(post(UPDATE)).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_secret_token_header() {
        let harness = Harness::new(|c| c.secret_token = Some(SecretToken::parse("s3cret").unwrap()));

        let response = harness.send(post(UPDATE)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut wrong = post(UPDATE);
        wrong
            .headers_mut()
            .insert(SECRET_TOKEN_HEADER, "guess".parse().unwrap());
        assert_eq!(harness.send(wrong).await.status(), StatusCode::UNAUTHORIZED);
        assert!(harness.dispatched().is_empty());

        let mut right = post(UPDATE);
        right
            .headers_mut()
            .insert(SECRET_TOKEN_HEADER, "s3cret".parse().unwrap());
        assert_eq!(harness.send(right).await.status(), StatusCode::OK);
        assert_eq!(harness.dispatched(), vec![1]);
    }

    #[tokio::test]
    async fn test_malformed_updates_are_400() {
        let harness = Harness::new(|_| {});
        for body in [
            "{not json",
            r#"{"message":{"message_id":1}}"#,
            r#"{"update_id":3,"telepathy":{}}"#,
        ] {
            let response = harness.send(post(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json_body(response).await["ok"], json!(false));
        }
        assert!(harness.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_handler_panic_is_500_and_server_keeps_serving() {
        let harness = Harness::with_handler(
            |_| {},
            |update: Update| {
                if update.update_id == 1 {
                    panic!("handler bug");
                }
                Outcome::Done
            },
        );

        let response = harness.send(post(UPDATE)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let next = r#"{"update_id":2,"message":{"message_id":11,"date":1700000001,"chat":{"id":99,"type":"private"},"text":"again"}}"#;
        assert_eq!(harness.send(post(next)).await.status(), StatusCode::OK);
        assert_eq!(harness.dispatched(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reply_is_returned_as_json() {
        let harness = Harness::with_handler(
            |_| {},
            |update: Update| {
                let chat = update.chat().map(|c| c.id).unwrap_or_default();
                Outcome::Reply(WebhookReply::send_message(chat, "pong"))
            },
        );

        let response = harness.send(post(UPDATE)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "method": "sendMessage", "chat_id": 99, "text": "pong" })
        );
    }

    #[tokio::test]
    async fn test_handler_reject() {
        let harness = Harness::with_handler(
            |_| {},
            |_: Update| Outcome::reject(StatusCode::SERVICE_UNAVAILABLE, "busy"),
        );

        let response = harness.send(post(UPDATE)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await,
            json!({ "ok": false, "description": "busy" })
        );
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let harness = Harness::new(|_| {});
        let get = |path: &str| request(Method::GET, path, "8.8.8.8", Body::empty());

        let response = harness.send(get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "status": "ok" }));

        let response = harness.send(get("/ready")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await, json!({ "status": "registering" }));

        harness.state.readiness.mark_ready();
        let response = harness.send(get("/ready")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "status": "ready" }));
    }

    #[tokio::test]
    async fn test_greeting_page() {
        let harness = Harness::new(|_| {});
        let get = || request(Method::GET, "/", "8.8.8.8", Body::empty());

        let response = harness.send(get()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response.headers()[header::ETAG].clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("https://t.me/hook_bot"));
        assert!(html.contains("Hook"));

        let mut conditional = get();
        conditional
            .headers_mut()
            .insert(header::IF_NONE_MATCH, etag.clone());
        let response = harness.send(conditional).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let head = request(Method::HEAD, "/", "8.8.8.8", Body::empty());
        let response = harness.send(head).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ETAG], etag);
    }

    #[test]
    fn test_greeting_etag_tracks_content() {
        let greeting = Greeting::new("Hook", None);
        assert_eq!(greeting.etag(), Greeting::new("Hook", None).etag());
        assert_ne!(greeting.etag(), Greeting::new("Hook", Some("hook_bot")).etag());
        assert!(greeting.etag().to_str().unwrap().starts_with('"'));
    }
}
