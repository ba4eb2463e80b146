//! Shared fixtures for the runtime integration tests

#![allow(dead_code)]

use horde_core::{ActorId, RuntimeConfig};
use horde_runtime::Runtime;
use horde_warehouse::{MemoryEventSink, MemoryWarehouse};
use std::sync::Arc;
use std::time::Duration;

/// Runtime wired to in-memory collaborators the test can inspect
pub struct Harness {
    pub runtime: Runtime,
    pub warehouse: MemoryWarehouse,
    pub events: MemoryEventSink,
}

pub fn harness() -> Harness {
    harness_with(RuntimeConfig::default())
}

pub fn harness_with(config: RuntimeConfig) -> Harness {
    init_tracing();

    let warehouse = MemoryWarehouse::new();
    let events = MemoryEventSink::new();
    let runtime = Runtime::builder()
        .with_config(config)
        .with_warehouse(Arc::new(warehouse.clone()))
        .with_events(Arc::new(events.clone()))
        .build()
        .expect("runtime builds");

    Harness {
        runtime,
        warehouse,
        events,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id(raw: &str) -> ActorId {
    ActorId::parse(raw).expect("valid actor id")
}

/// Parent used for top-level creates
pub fn desktop() -> ActorId {
    id("desktop@main")
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
