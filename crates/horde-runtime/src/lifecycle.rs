//! Actor lifecycle controller
//!
//! Owns the `absent -> creating -> created -> deleting -> absent` cycle of
//! every id. All transitions happen under the id's slot lock; the quest work
//! itself runs with the lock released.
//!
//! Concurrent creates of one id fold into the first run: later callers are
//! parked in the slot's pending list and receive the same result.

use crate::actor_type::{ActorType, QuestOutcome};
use crate::admission::{self, Admission, AdmissionInput};
use crate::executor::{self, QuestResult};
use crate::instance::ActorInstance;
use crate::invocation::Invocation;
use crate::lanes::{Job, Lane};
use crate::registry::{Lifecycle, PendingCreate, Slot};
use crate::runtime::Runtime;
use futures::FutureExt;
use horde_core::{metrics, ActorId, Error, Result, CREATE_WAITERS_COUNT_MAX};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

async fn await_reply(rx: oneshot::Receiver<Result<QuestOutcome>>, id: &ActorId) -> Result<QuestOutcome> {
    rx.await.unwrap_or_else(|_| {
        Err(Error::ActorDeleted {
            id: id.to_string(),
        })
    })
}

// =============================================================================
// Regular quests
// =============================================================================

/// Find the live instance for a regular quest
///
/// Returns the instance and whether it is still mid-creation. Singletons are
/// bootstrapped on first use.
pub(crate) async fn resolve(
    runtime: &Runtime,
    actor_type: &Arc<ActorType>,
    id: &ActorId,
) -> Result<(Arc<ActorInstance>, bool)> {
    loop {
        let slot = runtime.registry().get(id);
        if let Some(slot) = slot {
            let state = slot.lock().await;
            if state.retired {
                continue;
            }
            if let Some(instance) = state.instance.clone() {
                match state.lifecycle {
                    Lifecycle::Creating => return Ok((instance, true)),
                    Lifecycle::Created => return Ok((instance, false)),
                    Lifecycle::Deleting => {
                        warn!(actor_id = %id, "Invocation while the actor is being deleted");
                        return Ok((instance, false));
                    }
                    Lifecycle::Absent => {}
                }
            }
        }

        if !actor_type.is_singleton() {
            return Err(Error::actor_not_found(id.to_string()));
        }

        debug!(actor_id = %id, "Bootstrapping singleton");
        let init = Invocation::new(horde_core::QUEST_INIT, serde_json::Value::Null);
        let msg_id = runtime.io().gen_uuid();
        create(runtime, Arc::clone(actor_type), id, init, msg_id, true).await?;
    }
}

/// Classify an invocation and queue it on the instance's lanes
pub(crate) async fn enqueue(
    runtime: &Runtime,
    instance: Arc<ActorInstance>,
    invocation: Invocation,
    msg_id: String,
    target_creating: bool,
) -> Result<QuestOutcome> {
    let id = instance.id().clone();
    let actor_type = Arc::clone(instance.actor_type());

    let input = AdmissionInput {
        is_delete: invocation.is_delete(),
        has_caller: invocation.caller.is_some(),
        is_creation_quest: actor_type.is_creation_quest(&invocation.quest),
        target_creating,
        caller_in_create: invocation.is_in_create,
        is_self_call: invocation.is_self_call(&id),
        regular: actor_type.regular_lane(&invocation.quest),
    };
    let lane = match admission::classify(&input) {
        Admission::Lane(lane) => lane,
        Admission::Delete => {
            return Err(Error::internal("delete must go through the lifecycle"));
        }
    };
    if target_creating && lane != Lane::Create {
        debug!(actor_id = %id, quest = %invocation.quest, "Waiting for creation to finish");
        await_created(runtime, &instance).await?;
    }
    debug!(actor_id = %id, quest = %invocation.quest, lane = %lane, "Invocation admitted");

    let (tx, rx) = oneshot::channel();
    let job: Job = {
        let runtime = runtime.clone();
        let instance = Arc::clone(&instance);
        async move {
            let quest = invocation.quest.clone();
            let result = executor::execute(&runtime, &instance, invocation, &msg_id).await;
            executor::emit_terminal(&runtime, instance.id(), &quest, &msg_id, &result).await;
            let _ = tx.send(result.map_err(Error::Quest));
        }
        .boxed()
    };

    instance.lanes().push(lane, job)?;
    await_reply(rx, &id).await
}

/// Wait until the first creation of `instance` has finished
///
/// Paused lanes already hold regular work of non-singletons; this also covers
/// the ungated `immediate` lane and singletons, whose lanes never pause.
async fn await_created(runtime: &Runtime, instance: &Arc<ActorInstance>) -> Result<()> {
    let id = instance.id();
    loop {
        let Some(slot) = runtime.registry().get(id) else {
            return Err(Error::ActorDeleted { id: id.to_string() });
        };
        let state = slot.lock().await;
        if state.retired {
            continue;
        }
        let current = state
            .instance
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, instance));
        if !current {
            return Err(Error::ActorDeleted { id: id.to_string() });
        }
        if state.lifecycle != Lifecycle::Creating {
            return Ok(());
        }
        slot.wait_changed(state).await;
    }
}

// =============================================================================
// Create
// =============================================================================

/// Create `id`, fold into an in-flight creation, or re-create a live actor
///
/// With `bootstrap` set, an already created instance is left alone.
#[instrument(skip_all, fields(actor_id = %id, msg_id = %msg_id), level = "debug")]
pub(crate) async fn create(
    runtime: &Runtime,
    actor_type: Arc<ActorType>,
    id: &ActorId,
    invocation: Invocation,
    msg_id: String,
    bootstrap: bool,
) -> Result<QuestOutcome> {
    let registry = runtime.registry();

    loop {
        let slot = registry.slot(id);
        let mut state = slot.lock().await;
        if state.retired {
            continue;
        }

        let lifecycle = state.lifecycle;
        match lifecycle {
            Lifecycle::Absent => {
                let max = runtime.config().max_actors;
                if registry.len().saturating_sub(1) >= max {
                    state.retired = true;
                    drop(state);
                    registry.retire(id, &slot);
                    return Err(Error::ActorLimitReached { max });
                }

                let generation = registry.next_generation();
                let instance = ActorInstance::new(
                    id.clone(),
                    Arc::clone(&actor_type),
                    generation,
                    runtime.config().max_pending_per_actor,
                    runtime.io().time.as_ref(),
                );

                let (tx, rx) = oneshot::channel();
                state.lifecycle = Lifecycle::Creating;
                state.generation = generation;
                state.instance = Some(Arc::clone(&instance));
                state.pending_creates.push(PendingCreate {
                    msg_id: msg_id.clone(),
                    reply: tx,
                });

                let job = first_create_job(
                    runtime.clone(),
                    Arc::clone(&slot),
                    Arc::clone(&instance),
                    invocation,
                    msg_id,
                );
                if let Err(e) = instance.lanes().push(Lane::Create, job) {
                    state.lifecycle = Lifecycle::Absent;
                    state.instance = None;
                    state.pending_creates.clear();
                    state.retired = true;
                    drop(state);
                    registry.retire(id, &slot);
                    instance.lanes().close();
                    return Err(e);
                }
                drop(state);

                debug!(actor_id = %id, generation, "Creation started");
                return await_reply(rx, id).await;
            }

            Lifecycle::Creating => {
                if invocation.is_self_call(id) {
                    let Some(instance) = state.instance.clone() else {
                        return Err(Error::internal("creating slot without instance"));
                    };
                    drop(state);
                    return enqueue(runtime, instance, invocation, msg_id, true).await;
                }

                let depth = state.pending_creates.len();
                if depth >= CREATE_WAITERS_COUNT_MAX {
                    return Err(Error::ActorMailboxFull {
                        id: id.to_string(),
                        depth,
                        max: CREATE_WAITERS_COUNT_MAX,
                    });
                }

                let (tx, rx) = oneshot::channel();
                state.pending_creates.push(PendingCreate {
                    msg_id: msg_id.clone(),
                    reply: tx,
                });
                drop(state);

                metrics::record_create_folded(actor_type.kind());
                debug!(actor_id = %id, msg_id = %msg_id, waiters = depth + 1, "Create folded into in-flight creation");
                return await_reply(rx, id).await;
            }

            Lifecycle::Created => {
                let Some(instance) = state.instance.clone() else {
                    return Err(Error::internal("created slot without instance"));
                };
                if bootstrap {
                    return Ok(QuestOutcome::empty());
                }

                let generation = registry.next_generation();
                state.generation = generation;
                instance.set_generation(generation);
                drop(state);

                debug!(actor_id = %id, generation, "Re-create of live actor");
                return enqueue(runtime, instance, invocation, msg_id, false).await;
            }

            Lifecycle::Deleting => {
                debug!(actor_id = %id, "Create waiting for deletion to finish");
                slot.wait_changed(state).await;
            }
        }
    }
}

fn first_create_job(
    runtime: Runtime,
    slot: Arc<Slot>,
    instance: Arc<ActorInstance>,
    invocation: Invocation,
    msg_id: String,
) -> Job {
    async move {
        let quest = invocation.quest.clone();
        let parents: Vec<ActorId> = invocation.parent.iter().cloned().collect();
        let result = executor::execute(&runtime, &instance, invocation, &msg_id).await;
        finish_first_create(&runtime, &slot, &instance, &quest, &parents, result).await;
    }
    .boxed()
}

async fn finish_first_create(
    runtime: &Runtime,
    slot: &Arc<Slot>,
    instance: &Arc<ActorInstance>,
    quest: &str,
    parents: &[ActorId],
    result: QuestResult,
) {
    let id = instance.id();
    let kind = instance.actor_type().kind();
    let created = matches!(&result, Ok(outcome) if !outcome.is_canceled());

    // the slot stays `Creating` until the read model is clean, so a new
    // creation of this id cannot attach before the old branch is gone
    if !created {
        compensate(runtime, id, kind, parents).await;
    }

    let pending = {
        let mut state = slot.lock().await;
        if created {
            state.lifecycle = Lifecycle::Created;
            instance.lanes().resume();
        } else {
            state.lifecycle = Lifecycle::Absent;
            state.instance = None;
            state.retired = true;
            runtime.registry().retire(id, slot);
            instance.lanes().close();
        }
        std::mem::take(&mut state.pending_creates)
    };

    if created {
        metrics::record_actor_created(kind);
        info!(actor_id = %id, kind, generation = instance.generation(), waiters = pending.len(), "Actor created");
    }
    slot.notify_changed();

    // most recent registrant first
    for waiter in pending.into_iter().rev() {
        executor::emit_terminal(runtime, id, quest, &waiter.msg_id, &result).await;
        let _ = waiter.reply.send(result.clone().map_err(Error::Quest));
    }
}

/// Remove every trace of a creation that did not complete
async fn compensate(runtime: &Runtime, id: &ActorId, kind: &str, parents: &[ActorId]) {
    let warehouse = runtime.warehouse();
    if let Err(e) = warehouse.detach_from_parents(id, parents).await {
        warn!(actor_id = %id, error = %e, "Compensation detach failed");
    }
    if let Err(e) = warehouse.delete_branch(id).await {
        warn!(actor_id = %id, error = %e, "Compensation delete_branch failed");
    }
    runtime.ranker().forget(kind, id).await;
    info!(actor_id = %id, kind, "Creation abandoned, branch removed");
}

// =============================================================================
// Delete
// =============================================================================

/// Delete `id` at the generation carried by `invocation`
#[instrument(skip_all, fields(actor_id = %id, msg_id = %msg_id), level = "debug")]
pub(crate) async fn delete(
    runtime: &Runtime,
    id: &ActorId,
    invocation: Invocation,
    msg_id: String,
) -> Result<QuestOutcome> {
    let Some(requested) = invocation.generation else {
        return Err(Error::MissingGeneration {
            id: id.to_string(),
            quest: invocation.quest,
        });
    };

    loop {
        let Some(slot) = runtime.registry().get(id) else {
            return already_deleted(runtime, id, &invocation, &msg_id).await;
        };
        let mut state = slot.lock().await;
        if state.retired {
            continue;
        }

        let lifecycle = state.lifecycle;
        match lifecycle {
            Lifecycle::Absent => {
                drop(state);
                return already_deleted(runtime, id, &invocation, &msg_id).await;
            }
            Lifecycle::Creating | Lifecycle::Deleting => {
                slot.wait_changed(state).await;
                continue;
            }
            Lifecycle::Created => {}
        }

        let Some(instance) = state.instance.clone() else {
            return Err(Error::internal("created slot without instance"));
        };
        let current = state.generation;

        if requested < current {
            drop(state);
            debug!(actor_id = %id, requested, current, "Stale delete ignored");
            return already_deleted(runtime, id, &invocation, &msg_id).await;
        }

        if requested > current {
            drop(state);
            let err = Error::protocol_violation(
                id.to_string(),
                format!("delete at generation {} but current is {}", requested, current),
            );
            error!(
                actor_id = %id,
                kind = %instance.actor_type().kind(),
                quest = %invocation.quest,
                caller = ?invocation.caller.as_ref().map(|c| format!("{}.{}", c.id, c.quest)),
                requested,
                current,
                "Delete from the future"
            );
            let quest_error = executor::quest_error(runtime, &instance, &invocation, &msg_id, &err);
            let failed: QuestResult = Err(quest_error);
            executor::emit_terminal(runtime, id, &invocation.quest, &msg_id, &failed).await;
            return Err(err);
        }

        state.lifecycle = Lifecycle::Deleting;
        instance.set_deleting(true);
        drop(state);

        // a caller that stops waiting must not leave the slot in `Deleting`
        let (tx, rx) = oneshot::channel();
        let runtime = runtime.clone();
        tokio::spawn(async move {
            let result = run_delete(&runtime, &slot, instance, invocation, msg_id).await;
            let _ = tx.send(result);
        });
        return await_reply(rx, id).await;
    }
}

async fn already_deleted(
    runtime: &Runtime,
    id: &ActorId,
    invocation: &Invocation,
    msg_id: &str,
) -> Result<QuestOutcome> {
    let outcome = QuestOutcome::empty();
    executor::emit_terminal(runtime, id, &invocation.quest, msg_id, &Ok(outcome.clone())).await;
    Ok(outcome)
}

async fn run_delete(
    runtime: &Runtime,
    slot: &Arc<Slot>,
    instance: Arc<ActorInstance>,
    invocation: Invocation,
    msg_id: String,
) -> Result<QuestOutcome> {
    let id = instance.id().clone();
    let kind = instance.actor_type().kind().to_string();
    let quest = invocation.quest.clone();
    let generation = instance.generation();

    // a quest deleting its own actor is one of the in-flight jobs
    let allowance = usize::from(invocation.is_self_call(&id));
    instance.lanes().drain_to(allowance).await;
    debug!(actor_id = %id, allowance, "Lanes drained for delete");

    let parents = instance.parents();
    let result = executor::execute(runtime, &instance, invocation, &msg_id).await;
    let deleted = matches!(&result, Ok(outcome) if !outcome.is_canceled());

    // read-model cleanup happens before the slot is retired; a create racing
    // this delete waits on `Deleting` and never sees its branch removed
    if deleted {
        let warehouse = runtime.warehouse();
        if let Err(e) = warehouse.detach_from_parents(&id, &parents).await {
            warn!(actor_id = %id, error = %e, "Detach after delete failed");
        }
        if let Err(e) = warehouse.delete_branch(&id).await {
            warn!(actor_id = %id, error = %e, "delete_branch after delete failed");
        }
        runtime.ranker().forget(&kind, &id).await;
    }

    {
        let mut state = slot.lock().await;
        if deleted {
            state.lifecycle = Lifecycle::Absent;
            state.instance = None;
            state.retired = true;
            runtime.registry().retire(&id, slot);
            instance.lanes().close();
        } else {
            state.lifecycle = Lifecycle::Created;
            instance.set_deleting(false);
        }
    }

    if deleted {
        let topic = format!("{}.deleted", id);
        if let Err(e) = runtime
            .events()
            .emit(&topic, json!({ "generation": generation }))
            .await
        {
            warn!(actor_id = %id, error = %e, "Failed to emit deleted event");
        }

        metrics::record_actor_deleted(&kind);
        info!(actor_id = %id, kind = %kind, generation, "Actor deleted");
    } else {
        warn!(actor_id = %id, "Delete quest did not complete, actor kept");
    }

    slot.notify_changed();
    executor::emit_terminal(runtime, &id, &quest, &msg_id, &result).await;
    result.map_err(Error::Quest)
}

/// Evict `id` in the background
pub(crate) fn spawn_evict(runtime: Runtime, id: ActorId) {
    tokio::spawn(async move {
        if let Err(e) = runtime.evict(&id).await {
            warn!(actor_id = %id, error = %e, "Eviction failed");
        }
    });
}

