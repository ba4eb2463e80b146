//! Quest execution integration tests
//!
//! Error capture and terminal events, deferred actions, capability checks,
//! singletons and cache eviction.

mod common;

use common::{desktop, eventually, harness, id, init_tracing};
use horde_core::{ActorId, Error, ErrorCode, Result};
use horde_runtime::{ActorType, Invocation, Lifecycle, QuestContext, QuestOutcome, Runtime};
use horde_warehouse::{DenyList, LruEvictionRanker, MemoryWarehouse};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn counter() -> ActorType {
    ActorType::builder("counter")
        .initial_state(json!({"count": 0}))
        .reducer("increment", |state, _action| {
            let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
            state.set("count", count + 1)
        })
        .quest("create", |ctx, _payload| async move {
            ctx.dispatch("increment", Value::Null).await?;
            Ok(QuestOutcome::empty())
        })
        .quest("increment", |ctx, _payload| async move {
            ctx.dispatch("increment", Value::Null).await?;
            Ok(QuestOutcome::done(ctx.get("count").await.unwrap_or(Value::Null)))
        })
        .quest("boom", |_ctx, _payload| async move {
            Err(Error::internal("boom"))
        })
        .quest("explode", |_ctx, _payload| async move {
            let items: Vec<u32> = Vec::new();
            Ok(QuestOutcome::done(items[3]))
        })
        .quest("abandon", |ctx, _payload| async move {
            ctx.dispatch("increment", Value::Null).await?;
            Ok(QuestOutcome::Canceled)
        })
        .quest("relay", |ctx, payload| async move {
            let target = ActorId::parse(payload.as_str().unwrap_or_default())?;
            ctx.cmd(&target, "boom", Value::Null).await
        })
        .build()
        .unwrap()
}

async fn cleanup_panics() -> Result<()> {
    panic!("cleanup panicked")
}

async fn live_counter(runtime: &Runtime, raw: &str) -> ActorId {
    let target = id(raw);
    runtime.create(&target, desktop(), Value::Null).await.unwrap();
    target
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_quest_error_reaches_caller_with_stack() {
    let h = harness();
    h.runtime.register(counter()).unwrap();
    let target = live_counter(&h.runtime, "counter@1").await;

    let err = h
        .runtime
        .invoke(&target, Invocation::new("boom", Value::Null).with_msg_id("m-boom"))
        .await
        .unwrap_err();

    let Error::Quest(quest_error) = err else {
        panic!("expected a quest error");
    };
    assert_eq!(quest_error.code, ErrorCode::QuestFailed);
    assert!(quest_error.message.contains("boom"));
    assert!(quest_error.stack.contains("counter@1.boom"));
    assert!(!quest_error.id.is_empty());

    let errors = h.events.with_prefix("counter@1.boom.m-boom.").await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].topic.ends_with(".error"));
    assert_eq!(errors[0].payload["code"], json!("QUEST_FAILED"));
    assert_eq!(errors[0].payload["id"], json!(quest_error.id));

    // the actor survives a failing quest
    assert!(h.runtime.is_alive(&target).await);
    assert_eq!(h.runtime.instance_stats(&target).await.unwrap().error_count, 1);
}

#[tokio::test]
async fn test_panic_is_captured() {
    let h = harness();
    h.runtime.register(counter()).unwrap();
    let target = live_counter(&h.runtime, "counter@1").await;

    let err = h.runtime.cmd(&target, "explode", Value::Null).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuestPanicked);

    let outcome = h.runtime.cmd(&target, "increment", Value::Null).await.unwrap();
    assert_eq!(outcome.value(), Some(&json!(2)));
}

#[tokio::test]
async fn test_nested_error_keeps_callee_stack() {
    let h = harness();
    h.runtime.register(counter()).unwrap();
    let front = live_counter(&h.runtime, "counter@front").await;
    live_counter(&h.runtime, "counter@back").await;

    let err = h
        .runtime
        .cmd(&front, "relay", json!("counter@back"))
        .await
        .unwrap_err();

    let Error::Quest(outer) = err else {
        panic!("expected a quest error");
    };
    assert_eq!(outer.code, ErrorCode::QuestFailed);
    assert!(outer.stack.contains("counter@front.relay"));
    assert!(outer.stack.contains("counter@back.boom"));
    assert!(outer.stack.contains("called from counter@front.relay"));
}

#[tokio::test]
async fn test_canceled_quest_publishes_nothing() {
    let h = harness();
    h.runtime.register(counter()).unwrap();
    let target = live_counter(&h.runtime, "counter@1").await;
    let upserts = h.warehouse.branch(&target).await.unwrap().upserts;

    let outcome = h
        .runtime
        .invoke(&target, Invocation::new("abandon", Value::Null).with_msg_id("m-cancel"))
        .await
        .unwrap();
    assert!(outcome.is_canceled());

    assert_eq!(h.warehouse.branch(&target).await.unwrap().upserts, upserts);
    let finished = h
        .events
        .with_prefix("counter@1.abandon.m-cancel.finished")
        .await;
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].payload["status"], json!("canceled"));
}

#[tokio::test]
async fn test_unknown_actor_is_not_found() {
    let h = harness();
    h.runtime.register(counter()).unwrap();

    let err = h
        .runtime
        .cmd(&id("counter@ghost"), "increment", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ActorNotFound { .. }));
}

// =============================================================================
// Deferred actions
// =============================================================================

#[tokio::test]
async fn test_deferred_actions_run_lifo_and_failures_are_contained() {
    let h = harness();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let actor_type = {
        let log = Arc::clone(&log);
        ActorType::builder("tidy")
            .initial_state(json!({}))
            .reducer("init", |state, _action| state.set("ready", true))
            .quest("create", |ctx, _payload| async move {
                ctx.dispatch("init", Value::Null).await?;
                Ok(QuestOutcome::empty())
            })
            .quest("work", move |ctx: QuestContext, _payload| {
                let log = Arc::clone(&log);
                async move {
                    let first = Arc::clone(&log);
                    ctx.defer(move || async move {
                        first.lock().unwrap().push("first");
                        Ok(())
                    });
                    ctx.defer(|| async { Err(Error::internal("cleanup failed")) });
                    ctx.defer(cleanup_panics);
                    let last = Arc::clone(&log);
                    ctx.defer(move || async move {
                        last.lock().unwrap().push("last");
                        Ok::<(), Error>(())
                    });
                    log.lock().unwrap().push("body");
                    Ok(QuestOutcome::done("worked"))
                }
            })
            .build()
            .unwrap()
    };
    h.runtime.register(actor_type).unwrap();
    let target = live_counter(&h.runtime, "tidy@1").await;

    let outcome = h.runtime.cmd(&target, "work", Value::Null).await.unwrap();
    assert_eq!(outcome.value(), Some(&json!("worked")));
    assert_eq!(*log.lock().unwrap(), vec!["body", "last", "first"]);
}

// =============================================================================
// Capability guard
// =============================================================================

#[tokio::test]
async fn test_blocked_command_is_not_scheduled() {
    init_tracing();
    let guard = Arc::new(DenyList::new());
    let runtime = Runtime::builder().with_guard(guard.clone()).build().unwrap();
    runtime.register(counter()).unwrap();
    let target = live_counter(&runtime, "counter@1").await;

    guard.deny("counter.increment").await;
    let err = runtime.cmd(&target, "increment", Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::Blocked { ref command, .. } if command == "counter.increment"));
    assert_eq!(runtime.instance_stats(&target).await.unwrap().quest_count, 1);

    guard.allow("counter.increment").await;
    runtime.cmd(&target, "increment", Value::Null).await.unwrap();
}

// =============================================================================
// Singletons
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_singleton_bootstraps_once() {
    let h = harness();
    let inits = Arc::new(AtomicUsize::new(0));
    let actor_type = {
        let inits = Arc::clone(&inits);
        ActorType::builder("settings")
            .singleton()
            .initial_state(json!({"theme": "light"}))
            .reducer("theme", |state, action| state.set("theme", action.payload.clone()))
            .quest("init", move |_ctx, _payload| {
                let inits = Arc::clone(&inits);
                async move {
                    inits.fetch_add(1, Ordering::SeqCst);
                    Ok(QuestOutcome::empty())
                }
            })
            .quest("theme", |ctx, payload| async move {
                ctx.dispatch("theme", payload).await?;
                Ok(QuestOutcome::done(ctx.get("theme").await.unwrap_or(Value::Null)))
            })
            .build()
            .unwrap()
    };
    h.runtime.register(actor_type).unwrap();
    let settings = ActorId::singleton("settings").unwrap();

    let calls = ["dark", "dark"].map(|theme| h.runtime.cmd(&settings, "theme", json!(theme)));
    for result in futures::future::join_all(calls).await {
        assert_eq!(result.unwrap().value(), Some(&json!("dark")));
    }

    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(h.runtime.lifecycle(&settings).await, Lifecycle::Created);
    assert_eq!(h.warehouse.get(&settings).await, Some(json!({"theme": "dark"})));

    let err = h
        .runtime
        .cmd(&id("settings@2"), "theme", json!("light"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidActorId { .. }));
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_ranked_out_actors_are_evicted() {
    init_tracing();
    let warehouse = MemoryWarehouse::new();
    let ranker = Arc::new(LruEvictionRanker::new());
    let runtime = Runtime::builder()
        .with_warehouse(Arc::new(warehouse.clone()))
        .with_ranker(ranker.clone())
        .build()
        .unwrap();

    let actor_type = ActorType::builder("tab")
        .initial_state(json!({}))
        .reducer("open", |state, _action| state.set("open", true))
        .quest("create", |ctx, _payload| async move {
            ctx.dispatch("open", Value::Null).await?;
            Ok(QuestOutcome::empty())
        })
        .cache_size(2)
        .build()
        .unwrap();
    runtime.register(actor_type).unwrap();

    for n in 1..=3 {
        runtime
            .create(&id(&format!("tab@{}", n)), desktop(), Value::Null)
            .await
            .unwrap();
    }

    let oldest = id("tab@1");
    assert!(
        eventually(|| {
            let runtime = runtime.clone();
            let oldest = oldest.clone();
            async move { runtime.lifecycle(&oldest).await == Lifecycle::Absent }
        })
        .await
    );
    assert!(!warehouse.contains(&oldest).await);
    assert!(runtime.is_alive(&id("tab@3")).await);
    assert_eq!(ranker.cached("tab").await, vec![id("tab@2"), id("tab@3")]);
}

#[tokio::test]
async fn test_evict_absent_actor_is_noop() -> Result<()> {
    let h = harness();
    h.runtime.register(counter())?;
    h.runtime.evict(&id("counter@nobody")).await?;

    let target = live_counter(&h.runtime, "counter@1").await;
    h.runtime.evict(&target).await?;
    assert_eq!(h.runtime.lifecycle(&target).await, Lifecycle::Absent);
    Ok(())
}
