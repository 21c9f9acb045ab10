use crate::enricher::{DisplayRecord, LinkEnricher};
use crate::errors::UnfurlError;
use crate::events::{Link, LinkSharedEvent};
use crate::metrics_defs::{LINKS_PER_EVENT, PIPELINE_DURATION, PIPELINE_FAILURES, UNFURLS_SENT};
use crate::slack::{ResponseSender, UnfurlRequest, Unfurls};
use indexmap::IndexMap;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};

/// Turns a `link_shared` event into a `chat.unfurl` call.
///
/// Steps run in order and the first failure stops the chain:
/// - enrich every link, concurrently
/// - key the records by URL
/// - prune the URL from each record
/// - send the keyed attachments
pub struct Pipeline {
    enricher: Arc<dyn LinkEnricher>,
    sender: Arc<dyn ResponseSender>,
}

impl Pipeline {
    pub fn new(enricher: Arc<dyn LinkEnricher>, sender: Arc<dyn ResponseSender>) -> Self {
        Self { enricher, sender }
    }

    /// Runs the pipeline on its own task. Failures are logged, never returned.
    pub fn spawn(self: Arc<Self>, event: LinkSharedEvent) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now();
            histogram!(LINKS_PER_EVENT).record(event.links.len() as f64);

            match self.run(&event).await {
                Ok(request) => {
                    counter!(UNFURLS_SENT).increment(1);
                    tracing::info!(
                        channel = %request.channel,
                        ts = %request.ts,
                        unfurls = request.unfurls.len(),
                        "Sent unfurls"
                    );
                }
                Err(e) => {
                    counter!(PIPELINE_FAILURES).increment(1);
                    tracing::error!(
                        error = %e,
                        channel = %event.channel,
                        ts = %event.message_ts,
                        "Failed to unfurl links"
                    );
                }
            }

            histogram!(PIPELINE_DURATION).record(start.elapsed().as_secs_f64());
        })
    }

    /// Builds and delivers the unfurls for one event, returning what was sent.
    pub async fn run(&self, event: &LinkSharedEvent) -> Result<UnfurlRequest, UnfurlError> {
        let unfurls = self.build_unfurls(&event.links).await?;
        let request = UnfurlRequest {
            channel: event.channel.clone(),
            ts: event.message_ts.clone(),
            unfurls,
        };
        self.sender.send(&request).await?;
        Ok(request)
    }

    pub async fn build_unfurls(&self, links: &[Link]) -> Result<Unfurls, UnfurlError> {
        let records = self.enrich_all(links).await?;
        Ok(prune_urls(key_by_url(records)))
    }

    /// Enriches all links concurrently, keeping the input order in the result.
    async fn enrich_all(&self, links: &[Link]) -> Result<Vec<DisplayRecord>, UnfurlError> {
        let mut join_set = JoinSet::new();

        for (index, link) in links.iter().cloned().enumerate() {
            let enricher = self.enricher.clone();
            join_set.spawn(async move { (index, enricher.enrich(&link).await) });
        }

        let mut records: Vec<Option<DisplayRecord>> = vec![None; links.len()];

        // Returning early drops the join set, which aborts outstanding enrichments
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined
                .map_err(|e| UnfurlError::InternalError(format!("Enrichment task failed: {e}")))?;
            records[index] = Some(result?);
        }

        Ok(records.into_iter().flatten().collect())
    }
}

/// Indexes records by URL. On duplicates the last record wins and the key
/// keeps the position of its first occurrence.
pub fn key_by_url(records: Vec<DisplayRecord>) -> IndexMap<String, DisplayRecord> {
    let mut keyed = IndexMap::with_capacity(records.len());
    for record in records {
        keyed.insert(record.url.clone(), record);
    }
    keyed
}

pub fn prune_urls(keyed: IndexMap<String, DisplayRecord>) -> Unfurls {
    keyed
        .into_iter()
        .map(|(url, record)| (url, record.into_attachment()))
        .collect()
}
