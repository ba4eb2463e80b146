//! Quest executor
//!
//! Runs one admitted invocation to completion:
//! `admitted -> attaching -> running -> publishing -> finalizing`, ending in
//! `finished` or `errored`. Every failure on the way is captured and turned
//! into a [`QuestError`]; nothing a quest body does escapes as a panic.

use crate::actor_type::{QuestDef, QuestOutcome};
use crate::context::QuestContext;
use crate::instance::ActorInstance;
use crate::invocation::Invocation;
use crate::lifecycle;
use crate::runtime::Runtime;
use futures::FutureExt;
use horde_core::{metrics, ActorId, Error, QuestError, Result, FEED_DEFAULT};
use serde_json::Value;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, trace, warn};

/// Result delivered to callers
pub type QuestResult = std::result::Result<QuestOutcome, QuestError>;

/// Execution phase of one quest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestPhase {
    /// Accepted by a lane
    Admitted,
    /// Registering the branch with its parents
    Attaching,
    /// Quest body running
    Running,
    /// Pushing state to the read model
    Publishing,
    /// Running deferred actions
    Finalizing,
    /// Terminal, success or canceled
    Finished,
    /// Terminal, failure
    Errored,
}

impl fmt::Display for QuestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestPhase::Admitted => "admitted",
            QuestPhase::Attaching => "attaching",
            QuestPhase::Running => "running",
            QuestPhase::Publishing => "publishing",
            QuestPhase::Finalizing => "finalizing",
            QuestPhase::Finished => "finished",
            QuestPhase::Errored => "errored",
        };
        f.write_str(name)
    }
}

fn advance(phase: &mut QuestPhase, next: QuestPhase, id: &ActorId) {
    trace!(actor_id = %id, from = %phase, to = %next, "Quest phase");
    *phase = next;
}

/// Run one quest against an instance
///
/// Does not emit the terminal event; callers decide who gets notified.
#[instrument(skip_all, fields(actor_id = %instance.id(), quest = %invocation.quest, msg_id = %msg_id), level = "debug")]
pub(crate) async fn execute(
    runtime: &Runtime,
    instance: &Arc<ActorInstance>,
    invocation: Invocation,
    msg_id: &str,
) -> QuestResult {
    let io = runtime.io();
    let started_ms = io.monotonic_ms();
    let id = instance.id().clone();
    let quest = invocation.quest.clone();
    let mut phase = QuestPhase::Admitted;

    let Some(def) = instance.actor_type().quest(&quest).cloned() else {
        let err = Error::UnknownQuest {
            id: id.to_string(),
            quest: quest.clone(),
        };
        return Err(quest_error(runtime, instance, &invocation, msg_id, &err));
    };

    let _running = instance.quest_started(&quest);
    let ctx = QuestContext::new(runtime.clone(), Arc::clone(instance), &invocation, msg_id);

    let result = run_phases(runtime, instance, &invocation, &def, &ctx, &mut phase).await;

    advance(&mut phase, QuestPhase::Finalizing, &id);
    finalize(&ctx).await;

    let duration_ms = io.monotonic_ms().saturating_sub(started_ms);
    instance.record_quest(duration_ms, result.is_err(), io.time.as_ref());

    match result {
        Ok(outcome) => {
            advance(&mut phase, QuestPhase::Finished, &id);
            let status = if outcome.is_canceled() { "canceled" } else { "finished" };
            metrics::record_quest(&quest, status, duration_ms as f64 / 1000.0);
            debug!(actor_id = %id, quest = %quest, status, duration_ms, "Quest finished");
            Ok(outcome)
        }
        Err(err) => {
            let failed_in = phase;
            advance(&mut phase, QuestPhase::Errored, &id);
            metrics::record_quest(&quest, "error", duration_ms as f64 / 1000.0);

            let quest_error = quest_error(runtime, instance, &invocation, msg_id, &err);
            if err.is_soft() {
                warn!(
                    actor_id = %id,
                    quest = %quest,
                    error_id = %quest_error.id,
                    error = %err,
                    "Parent feed vanished, creation abandoned"
                );
            } else {
                error!(
                    actor_id = %id,
                    kind = %instance.actor_type().kind(),
                    quest = %quest,
                    phase = %failed_in,
                    caller = ?invocation.caller.as_ref().map(|c| format!("{}.{}", c.id, c.quest)),
                    error_id = %quest_error.id,
                    error = %err,
                    "Quest failed"
                );
            }
            Err(quest_error)
        }
    }
}

async fn run_phases(
    runtime: &Runtime,
    instance: &Arc<ActorInstance>,
    invocation: &Invocation,
    def: &QuestDef,
    ctx: &QuestContext,
    phase: &mut QuestPhase,
) -> Result<QuestOutcome> {
    let id = instance.id();
    let is_creation = instance.actor_type().is_creation_quest(&invocation.quest);

    if is_creation {
        advance(phase, QuestPhase::Attaching, id);
        attach(runtime, instance, invocation).await?;
    }

    advance(phase, QuestPhase::Running, id);
    let outcome = run_body(def, ctx.clone(), invocation.payload.clone()).await?;

    advance(phase, QuestPhase::Publishing, id);
    publish(runtime, instance, ctx, is_creation, &outcome).await?;

    Ok(outcome)
}

async fn attach(
    runtime: &Runtime,
    instance: &Arc<ActorInstance>,
    invocation: &Invocation,
) -> Result<()> {
    let feed = invocation.feed.as_deref().unwrap_or(FEED_DEFAULT);
    let parents: Vec<ActorId> = invocation.parent.iter().cloned().collect();

    let outcome = runtime
        .warehouse()
        .attach_to_parents(instance.id(), instance.generation(), &parents, feed)
        .await?;

    if !outcome.success {
        return Err(Error::SilentHill {
            id: instance.id().to_string(),
            reason: format!("feed '{}' is gone", feed),
        });
    }

    instance.link(invocation.parent.as_ref(), feed);
    Ok(())
}

async fn run_body(def: &QuestDef, ctx: QuestContext, payload: Value) -> Result<QuestOutcome> {
    let handler = Arc::clone(def.handler());

    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, payload))) {
        Ok(future) => future,
        Err(panic) => return Err(panicked(panic)),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(panicked(panic)),
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    Error::QuestPanicked { message }
}

async fn publish(
    runtime: &Runtime,
    instance: &Arc<ActorInstance>,
    ctx: &QuestContext,
    is_creation: bool,
    outcome: &QuestOutcome,
) -> Result<()> {
    if outcome.is_canceled() || instance.is_deleting() {
        return Ok(());
    }

    let actor_type = instance.actor_type();
    let snapshot = {
        let mut container = instance.state().lock().await;

        // state set up through a nested self call counts as well
        let never_dispatched = !ctx.has_dispatched() && container.version() == 0;
        if is_creation && !actor_type.is_singleton() && never_dispatched {
            return Err(Error::CreateWithoutState {
                id: instance.id().to_string(),
            });
        }

        if container.has_dispatched() {
            container.reset_dispatched();
            Some(container.state().clone())
        } else {
            None
        }
    };

    let Some(snapshot) = snapshot else {
        return Ok(());
    };

    runtime
        .warehouse()
        .upsert(instance.id(), &snapshot, &instance.feeds(), &instance.parents())
        .await?;

    let options = actor_type.options();
    if options.is_evictable() {
        let ranker = runtime.ranker();
        if instance.mark_ranked() {
            match ranker
                .rank(actor_type.kind(), instance.id(), options.cache_size)
                .await
            {
                Ok(evicted) => {
                    for victim in evicted.into_iter().filter(|v| v != instance.id()) {
                        debug!(actor_id = %instance.id(), victim = %victim, "Evicting ranked-out actor");
                        lifecycle::spawn_evict(runtime.clone(), victim);
                    }
                }
                Err(e) => {
                    warn!(actor_id = %instance.id(), error = %e, "Eviction ranking failed");
                }
            }
        } else {
            ranker.touch(actor_type.kind(), instance.id()).await;
        }
    }

    Ok(())
}

async fn finalize(ctx: &QuestContext) {
    let mut deferred = ctx.take_deferred();
    while let Some(action) = deferred.pop() {
        let outcome = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(actor_id = %ctx.id(), quest = %ctx.quest(), error = %e, "Deferred action failed");
            }
            Err(panic) => {
                warn!(
                    actor_id = %ctx.id(),
                    quest = %ctx.quest(),
                    error = %panicked(panic),
                    "Deferred action panicked"
                );
            }
        }
    }
}

/// Fold an error into the terminal error with its location chain
pub(crate) fn quest_error(
    runtime: &Runtime,
    instance: &ActorInstance,
    invocation: &Invocation,
    msg_id: &str,
    error: &Error,
) -> QuestError {
    let mut stack = format!(
        "at {}.{} (msg {}, generation {})",
        instance.id(),
        invocation.quest,
        msg_id,
        instance.generation()
    );
    if let Some(caller) = &invocation.caller {
        stack.push_str(&format!("\n  called from {}.{}", caller.id, caller.quest));
    }
    if !error.is_soft() {
        stack.push('\n');
        stack.push_str(&Backtrace::force_capture().to_string());
    }
    if let Error::Quest(inner) = error {
        stack.push_str("\ncaused by:\n");
        stack.push_str(&inner.stack);
    }

    QuestError::from_error(error, runtime.io().gen_uuid(), stack)
}

/// Emit `<id>.<quest>.<msgId>.finished` or `.error`
pub(crate) async fn emit_terminal(
    runtime: &Runtime,
    id: &ActorId,
    quest: &str,
    msg_id: &str,
    result: &QuestResult,
) {
    let (suffix, payload) = match result {
        Ok(outcome) => ("finished", serde_json::to_value(outcome).unwrap_or_default()),
        Err(error) => ("error", serde_json::to_value(error).unwrap_or_default()),
    };
    let topic = format!("{}.{}.{}.{}", id, quest, msg_id, suffix);

    if let Err(e) = runtime.events().emit(&topic, payload).await {
        warn!(actor_id = %id, topic = %topic, error = %e, "Failed to emit terminal event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(QuestPhase::Attaching.to_string(), "attaching");
        assert_eq!(QuestPhase::Errored.to_string(), "errored");
    }

    #[test]
    fn test_panicked_extracts_message() {
        let err = panicked(Box::new("boom"));
        assert!(matches!(err, Error::QuestPanicked { ref message } if message == "boom"));

        let err = panicked(Box::new(String::from("owned boom")));
        assert!(err.to_string().contains("owned boom"));

        let err = panicked(Box::new(42u32));
        assert!(err.to_string().contains("non-string"));
    }
}
