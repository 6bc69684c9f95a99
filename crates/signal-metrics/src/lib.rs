//! The stable metric names the runtime publishes, and a single
//! registration point for their descriptions.
//!
//! This crate does not wire an exporter; it only describes metrics against
//! whatever global recorder the embedding application installs (or the
//! no-op default in tests). Wiring a Prometheus endpoint or push gateway is
//! the embedder's job, not this crate's.

use metrics::{describe_counter, describe_gauge, describe_histogram};

pub const QUEUE_DEPTH: &str = "queue_depth";
pub const QUEUE_LATENCY_SECONDS: &str = "queue_latency_seconds";
pub const COMMAND_INVOCATIONS_TOTAL: &str = "command_invocations_total";
pub const DLQ_BACKLOG: &str = "dlq_backlog";
pub const RATE_LIMITER_WAIT_SECONDS: &str = "rate_limiter_wait_seconds";
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";
pub const MESSAGES_DROPPED_TOTAL: &str = "messages_dropped_total";

/// Register descriptions for every metric this runtime emits. Idempotent;
/// call once during application startup, after installing a recorder.
pub fn describe_all() {
    describe_gauge!(QUEUE_DEPTH, "Current number of items waiting in the main queue");
    describe_histogram!(
        QUEUE_LATENCY_SECONDS,
        "Seconds between enqueue and dequeue for an item"
    );
    describe_counter!(
        COMMAND_INVOCATIONS_TOTAL,
        "Number of times a command handler was invoked, labeled by command name"
    );
    describe_gauge!(DLQ_BACKLOG, "Number of entries currently parked in the dead letter queue");
    describe_histogram!(
        RATE_LIMITER_WAIT_SECONDS,
        "Seconds a caller waited for a rate limit token, labeled by resource"
    );
    describe_gauge!(
        CIRCUIT_BREAKER_STATE,
        "Circuit breaker state per resource: 0 closed, 1 half_open, 2 open"
    );
    describe_counter!(
        MESSAGES_DROPPED_TOTAL,
        "Number of messages dropped before reaching a handler, labeled by reason"
    );
}
