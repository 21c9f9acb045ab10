//! Metrics definitions for the link unfurler.

use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_RECEIVED: MetricDef = MetricDef {
    name: "events.received",
    metric_type: MetricType::Counter,
    description: "Number of signed event deliveries accepted by the events endpoint",
};

pub const SIGNATURE_REJECTED: MetricDef = MetricDef {
    name: "events.signature_rejected",
    metric_type: MetricType::Counter,
    description: "Number of event deliveries rejected because of an invalid or stale signature",
};

pub const LINKS_PER_EVENT: MetricDef = MetricDef {
    name: "pipeline.links",
    metric_type: MetricType::Histogram,
    description: "Number of links carried by a link_shared event",
};

pub const UNFURLS_SENT: MetricDef = MetricDef {
    name: "pipeline.unfurls_sent",
    metric_type: MetricType::Counter,
    description: "Number of chat.unfurl calls that succeeded",
};

pub const PIPELINE_FAILURES: MetricDef = MetricDef {
    name: "pipeline.failures",
    metric_type: MetricType::Counter,
    description: "Number of events whose unfurls could not be delivered",
};

pub const PIPELINE_DURATION: MetricDef = MetricDef {
    name: "pipeline.duration",
    metric_type: MetricType::Histogram,
    description: "Time from receiving a link_shared event to finishing its delivery in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_RECEIVED,
    SIGNATURE_REJECTED,
    LINKS_PER_EVENT,
    UNFURLS_SENT,
    PIPELINE_FAILURES,
    PIPELINE_DURATION,
];
