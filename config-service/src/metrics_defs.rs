//! Metrics definitions for the config service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CONFIG_FOUND: MetricDef = MetricDef {
    name: "config.query.found",
    metric_type: MetricType::Counter,
    description: "Config queries answered with a full configuration body",
};

pub const CONFIG_NOT_MODIFIED: MetricDef = MetricDef {
    name: "config.query.not_modified",
    metric_type: MetricType::Counter,
    description: "Config queries answered with 304 because the release key matched",
};

pub const CONFIG_NOT_FOUND: MetricDef = MetricDef {
    name: "config.query.not_found",
    metric_type: MetricType::Counter,
    description: "Config queries for coordinates without any active release",
};

pub const WATCHES_RESOLVED: MetricDef = MetricDef {
    name: "notifications.watch.resolved",
    metric_type: MetricType::Counter,
    description: "Long-poll watches completed by a change event",
};

pub const WATCHES_TIMED_OUT: MetricDef = MetricDef {
    name: "notifications.watch.timed_out",
    metric_type: MetricType::Counter,
    description: "Long-poll watches that elapsed without a relevant change",
};

pub const EVENTS_PUBLISHED: MetricDef = MetricDef {
    name: "bus.events.published",
    metric_type: MetricType::Counter,
    description: "Change events appended to the shared log",
};

pub const EVENTS_COMPACTED: MetricDef = MetricDef {
    name: "bus.events.compacted",
    metric_type: MetricType::Counter,
    description: "Superseded change events removed by compaction",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CONFIG_FOUND,
    CONFIG_NOT_MODIFIED,
    CONFIG_NOT_FOUND,
    WATCHES_RESOLVED,
    WATCHES_TIMED_OUT,
    EVENTS_PUBLISHED,
    EVENTS_COMPACTED,
];
