use crate::errors::UnfurlError;
use crate::events::Link;
use async_trait::async_trait;
use serde::Serialize;

pub const ATTACHMENT_COLOR: &str = "#36a64f";
pub const MARKETPLACE_FOOTER: &str = "VS Marketplace";

/// Preview of one shared link, still carrying the URL it was built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayRecord {
    pub color: String,
    pub title: String,
    pub title_link: String,
    pub footer: String,
    pub url: String,
}

/// The message attachment Slack renders for a link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub color: String,
    pub title: String,
    pub title_link: String,
    pub footer: String,
}

impl DisplayRecord {
    /// Drops the URL, which is redundant once the record is keyed by it.
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            color: self.color,
            title: self.title,
            title_link: self.title_link,
            footer: self.footer,
        }
    }
}

/// Turns a shared link into its display record.
///
/// Async so implementations can look metadata up remotely.
#[async_trait]
pub trait LinkEnricher: Send + Sync {
    async fn enrich(&self, link: &Link) -> Result<DisplayRecord, UnfurlError>;
}

/// Builds a generic VS Marketplace preview from the link alone.
pub struct MarketplaceEnricher;

#[async_trait]
impl LinkEnricher for MarketplaceEnricher {
    async fn enrich(&self, link: &Link) -> Result<DisplayRecord, UnfurlError> {
        // TODO: fetch extension name, publisher, install count and icon from the
        // marketplace item page once the lookup source is decided.
        Ok(DisplayRecord {
            color: ATTACHMENT_COLOR.to_string(),
            title: link.url.clone(),
            title_link: link.url.clone(),
            footer: MARKETPLACE_FOOTER.to_string(),
            url: link.url.clone(),
        })
    }
}
