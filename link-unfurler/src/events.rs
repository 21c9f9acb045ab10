//! Slack Events API payloads.
//!
//! Only the fields the unfurler reads are modelled, everything else in the
//! envelope is ignored during deserialization.

use hyper::header::HeaderMap;
use serde::Deserialize;

pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";
pub const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

/// Outer body of every request Slack posts to the events endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification { challenge: String },
    EventCallback(EventCallback),
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EventCallback {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_time: i64,
    pub event: Event,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    LinkShared(LinkSharedEvent),
    #[serde(other)]
    Other,
}

/// A message containing links from one of the app's registered domains.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LinkSharedEvent {
    pub user: String,
    pub channel: String,
    pub message_ts: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            domain: None,
        }
    }
}

/// Redelivery information Slack attaches as headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryMetadata {
    pub retry_num: Option<u32>,
    pub retry_reason: Option<String>,
}

impl DeliveryMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_num: header_str(headers, RETRY_NUM_HEADER).and_then(|v| v.trim().parse().ok()),
            retry_reason: header_str(headers, RETRY_REASON_HEADER).map(String::from),
        }
    }

    pub fn is_retry(&self) -> bool {
        self.retry_num.is_some()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
