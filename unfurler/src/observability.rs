use crate::config::{CommonConfig, MetricsConfig};
use link_unfurler::metrics_defs::ALL_METRICS;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "unfurler";

/// Installs logging, error reporting and metrics.
///
/// The returned guard flushes pending Sentry events on drop and has to live
/// until the process exits.
pub fn init(config: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config
        .logging
        .as_ref()
        .map(|logging| logging.sentry_dsn.parse::<sentry::types::Dsn>());

    let sentry_guard = match &dsn {
        Some(Ok(dsn)) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.clone()),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        _ => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(
            sentry_guard
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .init();

    if let Some(Err(e)) = dsn {
        tracing::error!(error = %e, "Invalid Sentry DSN, error reporting disabled");
    }

    if let Some(metrics_config) = &config.metrics {
        init_metrics(metrics_config);
    }

    sentry_guard
}

fn init_metrics(config: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::error!(error = %e, "Failed to install metrics recorder");
        return;
    }
    describe_all(ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );
}
