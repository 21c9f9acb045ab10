use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_EVENTS_PATH: &str = "/slack/events";
const DEFAULT_API_BASE_URL: &str = "https://slack.com/api/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Slack signing secret is not set")]
    EmptySigningSecret,

    #[error("Slack access token is not set")]
    EmptyAccessToken,

    #[error("Events path must start with '/': {0}")]
    InvalidEventsPath(String),

    #[error("Signature max age cannot be 0")]
    InvalidSignatureMaxAge,

    #[error("Slack request timeout cannot be 0")]
    InvalidRequestTimeout,

    #[error("Maximum request body size cannot be 0")]
    InvalidMaxBodyBytes,
}

/// Link unfurler configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener receiving Slack event deliveries
    #[serde(default)]
    pub listener: Listener,
    /// Optional listener for health and readiness probes
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    /// Path Slack posts events to
    #[serde(default = "default_events_path")]
    pub events_path: String,
    /// Maximum distance between a request timestamp and now
    #[serde(default = "default_signature_max_age_secs")]
    pub signature_max_age_secs: u64,
    /// Larger event deliveries are refused before their signature is checked
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub slack: SlackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: None,
            events_path: default_events_path(),
            signature_max_age_secs: default_signature_max_age_secs(),
            max_body_bytes: default_max_body_bytes(),
            slack: SlackConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin_listener) = &self.admin_listener {
            admin_listener.validate()?;
        }

        if !self.events_path.starts_with('/') {
            return Err(ValidationError::InvalidEventsPath(self.events_path.clone()));
        }

        if self.signature_max_age_secs == 0 {
            return Err(ValidationError::InvalidSignatureMaxAge);
        }

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidMaxBodyBytes);
        }

        self.slack.validate()
    }

    pub fn signature_max_age(&self) -> Duration {
        Duration::from_secs(self.signature_max_age_secs)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Slack app credentials and Web API settings
#[derive(Clone, Deserialize, PartialEq)]
pub struct SlackConfig {
    /// Secret used to verify event request signatures
    #[serde(default)]
    pub signing_secret: String,
    /// Bot or user token used for `chat.unfurl`
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: Url,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        SlackConfig {
            signing_secret: String::new(),
            access_token: String::new(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SlackConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.signing_secret.is_empty() {
            return Err(ValidationError::EmptySigningSecret);
        }
        if self.access_token.is_empty() {
            return Err(ValidationError::EmptyAccessToken);
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidRequestTimeout);
        }
        Ok(())
    }
}

// Credentials stay out of logs
impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("signing_secret", &redact(&self.signing_secret))
            .field("access_token", &redact(&self.access_token))
            .field("api_base_url", &self.api_base_url.as_str())
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}

fn default_events_path() -> String {
    DEFAULT_EVENTS_PATH.to_string()
}

fn default_signature_max_age_secs() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_api_base_url() -> Url {
    Url::parse(DEFAULT_API_BASE_URL).expect("default Slack API URL is valid")
}

fn default_request_timeout_secs() -> u64 {
    10
}
