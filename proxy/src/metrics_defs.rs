use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Proxy request duration in seconds. Tagged with status, intercepted.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const INTERCEPT_FAILURES: MetricDef = MetricDef {
    name: "intercept.failures",
    metric_type: MetricType::Counter,
    description: "Sync side calls that failed. Tagged with trigger, kind, policy.",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUEST_DURATION, REQUESTS_INFLIGHT, INTERCEPT_FAILURES];
