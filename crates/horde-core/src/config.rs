//! Configuration for Horde
//!
//! Explicit defaults, validation against the limits in `constants`.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for Horde
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HordeConfig {
    /// Runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl HordeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()
    }

    /// Parse a configuration from JSON and validate it
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: HordeConfig =
            serde_json::from_str(raw).map_err(|e| Error::DeserializationFailed {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum live actor instances
    #[serde(default = "default_max_actors")]
    pub max_actors: usize,

    /// Maximum queued quests per actor
    #[serde(default = "default_max_pending_per_actor")]
    pub max_pending_per_actor: usize,
}

fn default_max_actors() -> usize {
    ACTOR_CONCURRENT_COUNT_DEFAULT
}

fn default_max_pending_per_actor() -> usize {
    LANE_PENDING_COUNT_DEFAULT
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_actors: default_max_actors(),
            max_pending_per_actor: default_max_pending_per_actor(),
        }
    }
}

impl RuntimeConfig {
    /// Validate the runtime configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_actors == 0 || self.max_actors > ACTOR_CONCURRENT_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "runtime.max_actors".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.max_actors, ACTOR_CONCURRENT_COUNT_MAX
                ),
            });
        }

        if self.max_pending_per_actor == 0 || self.max_pending_per_actor > LANE_PENDING_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "runtime.max_pending_per_actor".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.max_pending_per_actor, LANE_PENDING_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}

/// Scheduling discipline of an actor type's regular lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// Quests run concurrently
    #[default]
    Parallel,
    /// Quests run one at a time in FIFO order
    ///
    /// A serie quest awaiting another serie quest on its own actor never
    /// completes: the callee is queued behind the caller.
    Serie,
}

/// Options supplied when registering an actor type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorTypeOptions {
    /// Single instance addressed by the bare kind
    #[serde(default)]
    pub singleton: bool,

    /// Eviction cache size, 0 disables eviction ranking
    #[serde(default)]
    pub cache_size: usize,

    /// Instance TTL override; instances with a TTL are never ranked for eviction
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Regular-lane discipline
    #[serde(default)]
    pub scheduling: Scheduling,
}

impl ActorTypeOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.cache_size > ACTOR_CACHE_SIZE_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "cache_size".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.cache_size, ACTOR_CACHE_SIZE_COUNT_MAX
                ),
            });
        }

        if let Some(ttl_ms) = self.ttl_ms {
            if ttl_ms == 0 || ttl_ms > ACTOR_TTL_MS_MAX {
                return Err(Error::InvalidConfiguration {
                    field: "ttl_ms".into(),
                    reason: format!("{} must be in 1..={}", ttl_ms, ACTOR_TTL_MS_MAX),
                });
            }
        }

        if self.singleton && self.cache_size > 0 {
            return Err(Error::InvalidConfiguration {
                field: "cache_size".into(),
                reason: "singletons are never evicted".into(),
            });
        }

        Ok(())
    }

    /// Whether the instance should register with the eviction ranker
    pub fn is_evictable(&self) -> bool {
        self.cache_size > 0 && self.ttl_ms.is_none()
    }
}
