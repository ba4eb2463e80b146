//! Horde Runtime
//!
//! Lane scheduler, quest executor and lifecycle controller for Horde actors.
//!
//! # Overview
//!
//! The runtime provides:
//! - Explicit quest tables per actor type ([`ActorType`])
//! - Four lanes per actor (`immediate`, `create`, `serie`, `parallel`) with a
//!   create gate that holds regular work until the first creation finishes
//! - Folding of concurrent creates into one run
//! - Generation-checked deletes that drain in-flight work first
//! - Compensation of failed creations in the read model
//!
//! # Guarantees
//! - At most one instance per actor id
//! - Generations strictly increase across re-creations
//! - `serie` quests of one actor never interleave

pub mod actor_type;
pub mod admission;
pub mod context;
pub mod executor;
pub mod handle;
pub mod instance;
pub mod invocation;
pub mod lanes;
mod lifecycle;
pub mod registry;
pub mod runtime;

pub use actor_type::{
    ActorType, ActorTypeBuilder, QuestDef, QuestFuture, QuestHandler, QuestMode, QuestOutcome,
};
pub use admission::{classify, Admission, AdmissionInput};
pub use context::QuestContext;
pub use executor::{QuestPhase, QuestResult};
pub use handle::ActorHandle;
pub use instance::{ActorInstance, InstanceStats};
pub use invocation::{CallerInfo, Invocation};
pub use lanes::{Job, Lane, LaneQueue};
pub use registry::{ActorRegistry, Lifecycle};
pub use runtime::{Runtime, RuntimeBuilder};
