//! Metric definitions for the ingestion pipeline.

use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENT_ACCEPTED: MetricDef = MetricDef {
    name: "ingest.event.accepted",
    metric_type: MetricType::Counter,
    description: "Events stored by the pipeline",
};

pub const EVENT_DUPLICATE: MetricDef = MetricDef {
    name: "ingest.event.duplicate",
    metric_type: MetricType::Counter,
    description: "Redelivered events dropped by the idempotency check",
};

pub const EVENT_REJECTED: MetricDef = MetricDef {
    name: "ingest.event.rejected",
    metric_type: MetricType::Counter,
    description: "Deliveries rejected before storage, for any reason",
};

pub const GROUP_CREATED: MetricDef = MetricDef {
    name: "ingest.group.created",
    metric_type: MetricType::Counter,
    description: "Events whose fingerprint opened a new group",
};

pub const EVENT_PAYLOAD_BYTES: MetricDef = MetricDef {
    name: "ingest.event.payload_bytes",
    metric_type: MetricType::Histogram,
    description: "Decompressed payload size in bytes",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENT_ACCEPTED,
    EVENT_DUPLICATE,
    EVENT_REJECTED,
    GROUP_CREATED,
    EVENT_PAYLOAD_BYTES,
];
