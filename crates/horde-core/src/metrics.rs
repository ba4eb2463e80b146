//! Metrics collection for Horde
//!
//! Thin recording functions over OpenTelemetry instruments. Without the `otel`
//! feature every function is a no-op.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static ACTORS_CREATED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("horde")
        .u64_counter(METRIC_NAME_ACTORS_CREATED_TOTAL)
        .with_description("Total number of actor creations")
        .init()
});

#[cfg(feature = "otel")]
static ACTORS_DELETED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("horde")
        .u64_counter(METRIC_NAME_ACTORS_DELETED_TOTAL)
        .with_description("Total number of actor deletions")
        .init()
});

#[cfg(feature = "otel")]
static QUESTS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("horde")
        .u64_counter(METRIC_NAME_QUESTS_TOTAL)
        .with_description("Total number of quests executed")
        .init()
});

#[cfg(feature = "otel")]
static QUEST_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("horde")
        .f64_histogram(METRIC_NAME_QUEST_DURATION_SECONDS)
        .with_description("Quest duration in seconds")
        .init()
});

#[cfg(feature = "otel")]
static CREATES_FOLDED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("horde")
        .u64_counter(METRIC_NAME_CREATES_FOLDED_TOTAL)
        .with_description("Total number of creates folded into an in-flight creation")
        .init()
});

/// Record a finished creation
#[cfg(feature = "otel")]
pub fn record_actor_created(kind: &str) {
    ACTORS_CREATED_COUNTER.add(1, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record a finished deletion
#[cfg(feature = "otel")]
pub fn record_actor_deleted(kind: &str) {
    ACTORS_DELETED_COUNTER.add(1, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record a create folded into one already running
#[cfg(feature = "otel")]
pub fn record_create_folded(kind: &str) {
    CREATES_FOLDED_COUNTER.add(1, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record a quest run
///
/// `status` is one of "finished", "canceled", "error".
#[cfg(feature = "otel")]
pub fn record_quest(quest: &str, status: &str, duration_seconds: f64) {
    QUESTS_COUNTER.add(
        1,
        &[
            KeyValue::new("quest", quest.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );
    QUEST_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("quest", quest.to_string())],
    );
}

#[cfg(not(feature = "otel"))]
pub fn record_actor_created(_kind: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_actor_deleted(_kind: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_create_folded(_kind: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_quest(_quest: &str, _status: &str, _duration_seconds: f64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_functions_dont_panic() {
        record_actor_created("counter");
        record_actor_deleted("counter");
        record_create_folded("counter");
        record_quest("increment", "finished", 0.01);
    }
}
