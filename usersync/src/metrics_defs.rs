//! Metrics definitions for user sync.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SYNC_EVENTS: MetricDef = MetricDef {
    name: "sync.events",
    metric_type: MetricType::Counter,
    description: "Number of intercepted sync events. Tagged with trigger, result.",
};

pub const DOWNSTREAM_CALLS: MetricDef = MetricDef {
    name: "sync.downstream.calls",
    metric_type: MetricType::Counter,
    description: "Downstream sync calls. Tagged with outcome (accepted, rejected, failed).",
};

pub const DOWNSTREAM_CALL_DURATION: MetricDef = MetricDef {
    name: "sync.downstream.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete one downstream sync call in seconds",
};

pub const MIRROR_COMMIT_ROWS: MetricDef = MetricDef {
    name: "sync.mirror.rows",
    metric_type: MetricType::Histogram,
    description: "Number of mirror rows written by one per-user commit",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SYNC_EVENTS,
    DOWNSTREAM_CALLS,
    DOWNSTREAM_CALL_DURATION,
    MIRROR_COMMIT_ROWS,
];
