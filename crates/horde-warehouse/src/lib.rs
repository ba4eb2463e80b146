//! Horde Warehouse
//!
//! Contracts between the actor runtime and the systems around it.
//!
//! # Overview
//!
//! The runtime never talks to a database, a bus or a policy engine directly.
//! It goes through four traits:
//! - [`Warehouse`]: the read-model store actors publish their visible state into
//! - [`EventSink`]: terminal quest events and deletion notices
//! - [`CapabilityGuard`]: consulted before an invocation is admitted
//! - [`EvictionRanker`]: ranks cached instances and names the ones to evict
//!
//! In-memory implementations ship alongside each trait for tests and for
//! embedding the runtime in a single process.

pub mod events;
pub mod eviction;
pub mod guard;
pub mod memory;
pub mod warehouse;

pub use events::{Event, EventSink, MemoryEventSink};
pub use eviction::{EvictionRanker, LruEvictionRanker, NoEviction};
pub use guard::{AllowAll, CapabilityGuard, DenyList};
pub use memory::{Branch, MemoryWarehouse};
pub use warehouse::{AttachOutcome, Warehouse};
