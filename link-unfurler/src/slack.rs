use crate::config::SlackConfig;
use crate::enricher::Attachment;
use crate::errors::UnfurlError;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const UNFURL_METHOD: &str = "chat.unfurl";

/// Attachments keyed by the URL they preview.
pub type Unfurls = IndexMap<String, Attachment>;

/// Arguments of a `chat.unfurl` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnfurlRequest {
    pub channel: String,
    pub ts: String,
    pub unfurls: Unfurls,
}

/// Delivers unfurls back to the message they were requested for.
#[async_trait]
pub trait ResponseSender: Send + Sync {
    async fn send(&self, request: &UnfurlRequest) -> Result<(), UnfurlError>;
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warning: Option<String>,
}

/// Slack Web API client authenticated with the app's access token.
pub struct SlackClient {
    client: reqwest::Client,
    unfurl_url: String,
    access_token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self, UnfurlError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let unfurl_url = format!(
            "{}/{}",
            config.api_base_url.as_str().trim_end_matches('/'),
            UNFURL_METHOD
        );

        Ok(SlackClient {
            client,
            unfurl_url,
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl ResponseSender for SlackClient {
    async fn send(&self, request: &UnfurlRequest) -> Result<(), UnfurlError> {
        let response = self
            .client
            .post(&self.unfurl_url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UnfurlError::SlackStatus(status));
        }

        // Slack reports API level failures in a 200 body
        let body = response.json::<ApiResponse>().await?;
        if let Some(warning) = body.warning {
            tracing::warn!(method = UNFURL_METHOD, warning = %warning, "Slack API warning");
        }
        if !body.ok {
            return Err(UnfurlError::SlackApiError(
                body.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        Ok(())
    }
}
