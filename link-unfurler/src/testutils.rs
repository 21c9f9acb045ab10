use crate::enricher::{DisplayRecord, LinkEnricher, MarketplaceEnricher};
use crate::errors::UnfurlError;
use crate::events::Link;
use crate::slack::{ResponseSender, UnfurlRequest};
use async_trait::async_trait;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

/// Local stand-in for the Slack Web API.
pub struct SlackStub {
    pub base_url: Url,
    pub requests: mpsc::UnboundedReceiver<(Parts, Bytes)>,
}

/// Answers every request with `status` and `reply`, forwarding what it received.
pub async fn start_slack_stub(status: StatusCode, reply: &'static str) -> SlackStub {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let tx = tx.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let tx = tx.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body_bytes = body
                            .collect()
                            .await
                            .map(|collected| collected.to_bytes())
                            .unwrap_or_else(|_| Bytes::new());
                        let _ = tx.send((parts, body_bytes));

                        let mut response = Response::new(Full::new(Bytes::from_static(
                            reply.as_bytes(),
                        )));
                        *response.status_mut() = status;
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    SlackStub {
        base_url: Url::parse(&format!("http://127.0.0.1:{port}/api/")).unwrap(),
        requests: rx,
    }
}

/// Keeps every request instead of sending it.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<UnfurlRequest>>,
    pub attempts: AtomicUsize,
    pub fail_with: Option<&'static str>,
}

impl RecordingSender {
    pub fn failing(error: &'static str) -> Self {
        Self {
            fail_with: Some(error),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<UnfurlRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Calls to `send`, including the failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseSender for RecordingSender {
    async fn send(&self, request: &UnfurlRequest) -> Result<(), UnfurlError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_with {
            return Err(UnfurlError::SlackApiError(error.to_string()));
        }
        self.sent.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Polls until `count` requests were recorded by a pipeline running on another task.
pub async fn wait_for_sent(sender: &RecordingSender, count: usize) -> Vec<UnfurlRequest> {
    for _ in 0..100 {
        let sent = sender.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {count} unfurl requests, got {}",
        sender.sent().len()
    );
}

/// Polls until `send` was called `count` times, whatever the outcome.
pub async fn wait_for_attempts(sender: &RecordingSender, count: usize) {
    for _ in 0..100 {
        if sender.attempts() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {count} send attempts, got {}",
        sender.attempts()
    );
}

/// Behaves like [`MarketplaceEnricher`] except for one URL, which fails.
pub struct FailingEnricher {
    pub failing_url: &'static str,
}

#[async_trait]
impl LinkEnricher for FailingEnricher {
    async fn enrich(&self, link: &Link) -> Result<DisplayRecord, UnfurlError> {
        if link.url == self.failing_url {
            return Err(UnfurlError::EnrichmentFailed {
                url: link.url.clone(),
                reason: "lookup failed".to_string(),
            });
        }
        MarketplaceEnricher.enrich(link).await
    }
}
