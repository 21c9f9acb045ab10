use crate::errors::UnfurlError;
use crate::events::{DeliveryMetadata, Envelope, Event, EventCallback};
use crate::metrics_defs::{EVENTS_RECEIVED, SIGNATURE_REJECTED};
use crate::pipeline::Pipeline;
use crate::signature::SignatureVerifier;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::counter;
use shared::http::{full_body, make_boxed_error_response};
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerBody = BoxBody<Bytes, UnfurlError>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Receives Slack event deliveries and starts a pipeline for each
/// `link_shared` event.
pub struct EventsHandler {
    events_path: String,
    max_body_bytes: usize,
    verifier: SignatureVerifier,
    pipeline: Arc<Pipeline>,
}

impl EventsHandler {
    pub fn new(
        events_path: String,
        max_body_bytes: usize,
        verifier: SignatureVerifier,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            events_path,
            max_body_bytes,
            verifier,
            pipeline,
        }
    }

    /// Handles a request, turning transport errors into a logged 500.
    pub async fn respond<B>(&self, req: Request<B>) -> Response<HandlerBody>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        match self.handle(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Failed to handle event delivery");
                make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<HandlerBody>, UnfurlError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        if req.uri().path() != self.events_path {
            return Ok(make_boxed_error_response(StatusCode::NOT_FOUND));
        }
        if req.method() != Method::POST {
            return Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED));
        }

        let (parts, body) = req.into_parts();
        let body = match self.read_body(&parts.headers, body).await {
            Ok(body) => body,
            Err(UnfurlError::BodyTooLarge(limit)) => {
                tracing::warn!(limit, "Refused oversized event delivery");
                return Ok(make_boxed_error_response(StatusCode::PAYLOAD_TOO_LARGE));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.verifier.verify(&parts.headers, &body) {
            counter!(SIGNATURE_REJECTED).increment(1);
            tracing::warn!(error = %e, "Rejected event delivery");
            return Ok(make_boxed_error_response(StatusCode::UNAUTHORIZED));
        }
        counter!(EVENTS_RECEIVED).increment(1);

        let envelope = match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed event payload");
                return Ok(make_boxed_error_response(StatusCode::BAD_REQUEST));
            }
        };

        match envelope {
            Envelope::UrlVerification { challenge } => {
                tracing::info!("Answering URL verification challenge");
                json_response(&serde_json::json!({ "challenge": challenge }))
            }
            Envelope::EventCallback(callback) => {
                self.dispatch(callback, DeliveryMetadata::from_headers(&parts.headers));
                Ok(Response::new(full_body("")))
            }
            Envelope::Unsupported => {
                tracing::debug!("Ignoring unsupported envelope type");
                Ok(Response::new(full_body("")))
            }
        }
    }

    /// Buffers the body, giving up as soon as it grows past `max_body_bytes`.
    async fn read_body<B>(&self, headers: &HeaderMap, body: B) -> Result<Bytes, UnfurlError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_body_bytes as u64) {
            return Err(UnfurlError::BodyTooLarge(self.max_body_bytes));
        }

        match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => {
                Err(UnfurlError::BodyTooLarge(self.max_body_bytes))
            }
            Err(e) => Err(UnfurlError::RequestBodyError(e.to_string())),
        }
    }

    fn dispatch(&self, callback: EventCallback, delivery: DeliveryMetadata) {
        let event = match callback.event {
            Event::LinkShared(event) => event,
            Event::Other => {
                tracing::debug!(event_id = %callback.event_id, "Ignoring unhandled event type");
                return;
            }
        };

        tracing::info!(
            user = %event.user,
            channel = %event.channel,
            event_id = %callback.event_id,
            event_time = callback.event_time,
            links = event.links.len(),
            "Links shared"
        );
        if delivery.is_retry() {
            tracing::info!(
                retry_num = delivery.retry_num,
                reason = delivery.retry_reason.as_deref().unwrap_or("unknown"),
                "Event delivery was retried"
            );
        }
        for link in &event.links {
            tracing::debug!(url = %link.url, domain = ?link.domain, "Shared link");
        }

        self.pipeline.clone().spawn(event);
    }
}

fn json_response(value: &serde_json::Value) -> Result<Response<HandlerBody>, UnfurlError> {
    let bytes = serde_json::to_vec(value)?;
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(bytes))
        .map_err(|e| UnfurlError::InternalError(format!("Failed to build response: {e}")))
}

/// Hyper service wrapper so the handler can be shared across connections.
pub struct EventsService {
    handler: Arc<EventsHandler>,
}

impl EventsService {
    pub fn new(handler: EventsHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl Service<Request<Incoming>> for EventsService {
    type Response = Response<HandlerBody>;
    type Error = UnfurlError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move { Ok(handler.respond(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::MarketplaceEnricher;
    use crate::events::{RETRY_NUM_HEADER, RETRY_REASON_HEADER};
    use crate::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use crate::testutils::{RecordingSender, wait_for_attempts, wait_for_sent};
    use http_body_util::Full;
    use hyper::body::Frame;
    use std::io;
    use std::task::{Context, Poll};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-signing-secret";
    const FOO: &str = "https://marketplace.visualstudio.com/items?itemName=foo";
    const MAX_BODY_BYTES: usize = 64 * 1024;

    fn handler(sender: Arc<RecordingSender>) -> EventsHandler {
        let pipeline = Arc::new(Pipeline::new(Arc::new(MarketplaceEnricher), sender));
        EventsHandler::new(
            "/slack/events".into(),
            MAX_BODY_BYTES,
            SignatureVerifier::new(SECRET.into(), Duration::from_secs(300)),
            pipeline,
        )
    }

    fn signed_request(path: &str, body: &str) -> Request<Full<Bytes>> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string();
        let verifier = SignatureVerifier::new(SECRET.into(), Duration::from_secs(300));
        Request::builder()
            .method("POST")
            .uri(path)
            .header(TIMESTAMP_HEADER, &ts)
            .header(SIGNATURE_HEADER, verifier.sign(&ts, body.as_bytes()))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_json(response: Response<HandlerBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn link_shared_body(urls: &[&str]) -> String {
        let links: Vec<_> = urls
            .iter()
            .map(|url| serde_json::json!({"domain": "marketplace.visualstudio.com", "url": url}))
            .collect();
        serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev123",
            "event_time": 1700000000,
            "event": {
                "type": "link_shared",
                "user": "U123",
                "channel": "C123",
                "message_ts": "1700000000.000100",
                "links": links
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_url_verification() {
        let handler = handler(Arc::new(RecordingSender::default()));
        let body = r#"{"type":"url_verification","token":"t","challenge":"abc123"}"#;

        let response = handler.respond(signed_request("/slack/events", body)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"challenge": "abc123"})
        );
    }

    #[tokio::test]
    async fn test_link_shared_spawns_unfurl() {
        let sender = Arc::new(RecordingSender::default());
        let handler = handler(sender.clone());

        let response = handler
            .respond(signed_request("/slack/events", &link_shared_body(&[FOO, FOO])))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = wait_for_sent(&sender, 1).await;
        assert_eq!(sent[0].channel, "C123");
        assert_eq!(sent[0].ts, "1700000000.000100");
        assert_eq!(sent[0].unfurls.len(), 1);
        assert_eq!(sent[0].unfurls[FOO].footer, "VS Marketplace");
    }

    #[tokio::test]
    async fn test_retried_delivery_is_processed() {
        let sender = Arc::new(RecordingSender::default());
        let handler = handler(sender.clone());

        let mut request = signed_request("/slack/events", &link_shared_body(&[FOO]));
        request
            .headers_mut()
            .insert(RETRY_NUM_HEADER, "1".parse().unwrap());
        request
            .headers_mut()
            .insert(RETRY_REASON_HEADER, "http_timeout".parse().unwrap());
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = wait_for_sent(&sender, 1).await;
        assert!(sent[0].unfurls.contains_key(FOO));
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_reach_caller() {
        let sender = Arc::new(RecordingSender::failing("invalid_auth"));
        let handler = handler(sender.clone());

        let response = handler
            .respond(signed_request("/slack/events", &link_shared_body(&[FOO])))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // The pipeline ran and its send failed, the response was unaffected
        wait_for_attempts(&sender, 1).await;
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_other_events_ignored() {
        let sender = Arc::new(RecordingSender::default());
        let handler = handler(sender.clone());
        let body = r#"{
            "type": "event_callback",
            "event_id": "Ev1",
            "event_time": 1,
            "event": {"type": "app_mention", "user": "U1", "text": "hi"}
        }"#;

        let response = handler.respond(signed_request("/slack/events", body)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = handler
            .respond(signed_request("/slack/events", r#"{"type":"app_rate_limited"}"#))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let sender = Arc::new(RecordingSender::default());
        let handler = handler(sender.clone());

        let mut request = signed_request("/slack/events", &link_shared_body(&[FOO]));
        request.headers_mut().insert(
            SIGNATURE_HEADER,
            "v0=0000000000000000000000000000000000000000000000000000000000000000"
                .parse()
                .unwrap(),
        );
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = signed_request("/slack/events", &link_shared_body(&[FOO]));
        request.headers_mut().remove(TIMESTAMP_HEADER);
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let handler = handler(Arc::new(RecordingSender::default()));
        let response = handler
            .respond(signed_request("/slack/events", "{not json"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let handler = handler(Arc::new(RecordingSender::default()));

        let response = handler.respond(signed_request("/other", "{}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method("GET")
            .uri("/slack/events")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_rejects_oversized_body() {
        let sender = Arc::new(RecordingSender::default());
        let handler = handler(sender.clone());

        // No content-length, the limit trips while reading
        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .body(Full::new(Bytes::from(vec![b'x'; MAX_BODY_BYTES + 1])))
            .unwrap();
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // A declared length over the limit is refused before reading
        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header(CONTENT_LENGTH, "67108864")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // A signed body at the limit is accepted
        let mut body = link_shared_body(&[FOO]);
        body.push_str(&" ".repeat(MAX_BODY_BYTES - body.len()));
        let response = handler.respond(signed_request("/slack/events", &body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        wait_for_sent(&sender, 1).await;
    }

    /// Fails on the first read, like a connection reset mid-body.
    struct BrokenBody;

    impl Body for BrokenBody {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset",
            ))))
        }
    }

    #[tokio::test]
    async fn test_body_read_error_is_internal_error() {
        let sender = Arc::new(RecordingSender::default());
        let handler = handler(sender.clone());
        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .body(BrokenBody)
            .unwrap();

        let result = handler.handle(request).await;
        assert!(matches!(result, Err(UnfurlError::RequestBodyError(_))));

        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .body(BrokenBody)
            .unwrap();
        let response = handler.respond(request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(sender.sent().is_empty());
    }
}
