pub mod config;
pub mod enricher;
pub mod errors;
pub mod events;
pub mod metrics_defs;
pub mod pipeline;
pub mod service;
pub mod signature;
pub mod slack;

#[cfg(test)]
mod testutils;

use config::Config;
use enricher::MarketplaceEnricher;
use errors::UnfurlError;
use pipeline::Pipeline;
use service::{EventsHandler, EventsService};
use shared::admin_service::AdminService;
use shared::http::{run_http_service, serve_listener};
use signature::SignatureVerifier;
use slack::SlackClient;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

pub async fn run(config: Config) -> Result<(), UnfurlError> {
    let sender = Arc::new(SlackClient::new(&config.slack)?);
    let pipeline = Arc::new(Pipeline::new(Arc::new(MarketplaceEnricher), sender));
    let verifier = SignatureVerifier::new(
        config.slack.signing_secret.clone(),
        config.signature_max_age(),
    );
    let events_service = EventsService::new(EventsHandler::new(
        config.events_path.clone(),
        config.max_body_bytes,
        verifier,
        pipeline,
    ));

    // Ready once the events listener is bound
    let ready = Arc::new(AtomicBool::new(false));

    let events_task = async {
        let listener =
            TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port))
                .await?;
        let address = listener.local_addr()?;
        tracing::info!(
            address = %address,
            path = %config.events_path,
            "Listening for events"
        );
        ready.store(true, Ordering::Relaxed);
        serve_listener::<_, UnfurlError>(listener, events_service).await
    };

    match &config.admin_listener {
        Some(admin) => {
            let is_ready = ready.clone();
            let admin_service =
                AdminService::<_, UnfurlError>::new(move || is_ready.load(Ordering::Relaxed));
            let admin_task = run_http_service(&admin.host, admin.port, admin_service);
            tokio::try_join!(events_task, admin_task)?;
        }
        None => events_task.await?,
    }

    Ok(())
}
