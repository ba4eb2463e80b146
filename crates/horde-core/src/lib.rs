//! Horde Core
//!
//! Core types, errors, and constants for the Horde actor runtime.
//!
//! # Overview
//!
//! Horde runs actors (addressable units of business logic) that own private,
//! versioned state and accept serialized invocations called quests. This crate
//! holds everything the runtime and its collaborators share:
//! - [`ActorId`] parsing and validation
//! - the reducer-driven [`StateContainer`]
//! - the error taxonomy and [`QuestError`]
//! - configuration, limits, time/rng providers, telemetry and metrics

pub mod actor;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod metrics;
pub mod state;
pub mod telemetry;

pub use actor::ActorId;
pub use config::{ActorTypeOptions, HordeConfig, RuntimeConfig, Scheduling};
pub use constants::*;
pub use error::{Error, ErrorCode, QuestError, Result};
pub use io::{IoContext, ManualClock, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use state::{Action, LogicHandlers, Reducer, State, StateContainer};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
