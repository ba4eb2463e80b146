//! Actor handles for external invocations
//!
//! A handle pins an actor id to the generation it was obtained at. Deleting
//! through a stale handle is a no-op rather than a hit on a newer incarnation.

use crate::actor_type::QuestOutcome;
use crate::invocation::Invocation;
use crate::runtime::Runtime;
use horde_core::{ActorId, Error, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Reference to one generation of an actor
#[derive(Debug, Clone)]
pub struct ActorHandle {
    id: ActorId,
    generation: u64,
    runtime: Runtime,
    default_timeout: Option<Duration>,
}

impl ActorHandle {
    /// Create a handle
    pub fn new(id: ActorId, generation: u64, runtime: Runtime) -> Self {
        Self {
            id,
            generation,
            runtime,
            default_timeout: None,
        }
    }

    /// Give up on calls that take longer than `timeout`
    ///
    /// The quest keeps running; only the caller stops waiting.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Actor id
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Generation the handle was obtained at
    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn timed<F>(&self, operation: &str, call: F) -> Result<QuestOutcome>
    where
        F: Future<Output = Result<QuestOutcome>>,
    {
        match self.default_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| Error::OperationTimedOut {
                    operation: format!("{}.{}", self.id, operation),
                    timeout_ms: timeout.as_millis() as u64,
                })?,
            None => call.await,
        }
    }

    /// Invoke a quest
    pub async fn invoke(&self, quest: impl Into<String>, payload: Value) -> Result<QuestOutcome> {
        let quest = quest.into();
        let call = self
            .runtime
            .invoke(&self.id, Invocation::new(quest.clone(), payload));
        self.timed(&quest, call).await
    }

    /// Invoke with a typed request and response
    ///
    /// The request is serialized to JSON and the quest's returned value is
    /// deserialized into `Resp`.
    pub async fn request<Req, Resp>(&self, quest: impl Into<String>, request: &Req) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_value(request).map_err(|e| Error::SerializationFailed {
            reason: format!("request: {}", e),
        })?;

        let outcome = self.invoke(quest, payload).await?;

        serde_json::from_value(outcome.into_value()).map_err(|e| Error::DeserializationFailed {
            reason: format!("response: {}", e),
        })
    }

    /// Delete the actor at the handle's generation
    pub async fn delete(&self) -> Result<QuestOutcome> {
        let call = self
            .runtime
            .invoke(&self.id, Invocation::delete(self.generation));
        self.timed(horde_core::QUEST_DELETE, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_type::ActorType;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    fn greeter() -> ActorType {
        ActorType::builder("greeter")
            .initial_state(json!({"greeted": 0}))
            .reducer("greet", |state, _action| {
                let count = state.get("greeted").and_then(Value::as_u64).unwrap_or(0);
                state.set("greeted", count + 1)
            })
            .quest("create", |ctx, _payload| async move {
                ctx.dispatch("greet", Value::Null).await?;
                Ok(QuestOutcome::empty())
            })
            .quest("hello", |_ctx, payload| async move {
                let name = payload["name"].as_str().unwrap_or("nobody").to_uppercase();
                Ok(QuestOutcome::done(json!({ "name": name })))
            })
            .quest("slow", |_ctx, _payload| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(QuestOutcome::empty())
            })
            .build()
            .unwrap()
    }

    async fn runtime_with_greeter() -> (Runtime, ActorId) {
        let runtime = Runtime::builder().build().unwrap();
        runtime.register(greeter()).unwrap();
        let id = ActorId::parse("greeter@1").unwrap();
        runtime
            .create(&id, ActorId::parse("desktop@main").unwrap(), Value::Null)
            .await
            .unwrap();
        (runtime, id)
    }

    #[tokio::test]
    async fn test_typed_request() {
        let (runtime, id) = runtime_with_greeter().await;
        let handle = runtime.handle(&id).await.unwrap();

        let reply: Greeting = handle
            .request("hello", &Greeting { name: "ada".into() })
            .await
            .unwrap();
        assert_eq!(reply, Greeting { name: "ADA".into() });
    }

    #[tokio::test]
    async fn test_timeout() {
        let (runtime, id) = runtime_with_greeter().await;
        let handle = runtime
            .handle(&id)
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(20));

        let err = handle.invoke("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::OperationTimedOut { timeout_ms: 20, .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_stale_handle_delete_is_noop() {
        let (runtime, id) = runtime_with_greeter().await;
        let stale = runtime.handle(&id).await.unwrap();

        // re-create moves the actor to a newer generation
        runtime
            .create(&id, ActorId::parse("desktop@main").unwrap(), Value::Null)
            .await
            .unwrap();
        let fresh = runtime.handle(&id).await.unwrap();
        assert!(fresh.generation() > stale.generation());

        stale.delete().await.unwrap();
        assert!(runtime.is_alive(&id).await);

        fresh.delete().await.unwrap();
        assert!(!runtime.is_alive(&id).await);
    }

    #[tokio::test]
    async fn test_handle_requires_live_actor() {
        let runtime = Runtime::builder().build().unwrap();
        runtime.register(greeter()).unwrap();
        let err = runtime
            .handle(&ActorId::parse("greeter@404").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActorNotFound { .. }));
    }
}
