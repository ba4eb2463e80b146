//! Explicit limits and well-known names for Horde
//!
//! All limits use big-endian naming (most significant first) and include units
//! in the name.

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum length of a raw actor id (`kind@unique`) in bytes
pub const ACTOR_ID_LENGTH_BYTES_MAX: usize = 512;

/// Maximum length of an actor kind in bytes
pub const ACTOR_KIND_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of live actor instances per runtime
pub const ACTOR_CONCURRENT_COUNT_MAX: usize = 1_000_000;

/// Default number of live actor instances per runtime
pub const ACTOR_CONCURRENT_COUNT_DEFAULT: usize = 100_000;

/// Maximum TTL an actor type may request in milliseconds (24 hours)
pub const ACTOR_TTL_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Maximum eviction cache size an actor type may request
pub const ACTOR_CACHE_SIZE_COUNT_MAX: usize = 1_000_000;

// =============================================================================
// Lane Limits
// =============================================================================

/// Maximum queued (not yet started) quests per actor across all lanes
pub const LANE_PENDING_COUNT_MAX: usize = 10_000;

/// Default queued quests per actor across all lanes
pub const LANE_PENDING_COUNT_DEFAULT: usize = 1_000;

/// Maximum callers folded into a single in-flight creation
pub const CREATE_WAITERS_COUNT_MAX: usize = 10_000;

// =============================================================================
// State Limits
// =============================================================================

/// Maximum depth of a state path (`a.b.c` has depth 3)
pub const STATE_PATH_DEPTH_MAX: usize = 64;

// =============================================================================
// Well-known Quests
// =============================================================================

/// Quest that creates (or re-creates) an actor instance
pub const QUEST_CREATE: &str = "create";

/// Bootstrap quest of singleton actors
pub const QUEST_INIT: &str = "init";

/// Quest that deletes an actor instance
pub const QUEST_DELETE: &str = "delete";

/// Wildcard kind accepted by identity validation
pub const ACTOR_KIND_WILDCARD: &str = "*";

/// Feed used when an invocation names none
pub const FEED_DEFAULT: &str = "system";

// =============================================================================
// Observability - Metric Names
// =============================================================================

/// Metric: Total number of actor creations (counter)
pub const METRIC_NAME_ACTORS_CREATED_TOTAL: &str = "horde_actors_created_total";

/// Metric: Total number of actor deletions (counter)
pub const METRIC_NAME_ACTORS_DELETED_TOTAL: &str = "horde_actors_deleted_total";

/// Metric: Total number of quests (counter, labels: quest, status)
pub const METRIC_NAME_QUESTS_TOTAL: &str = "horde_quests_total";

/// Metric: Quest duration in seconds (histogram, labels: quest)
pub const METRIC_NAME_QUEST_DURATION_SECONDS: &str = "horde_quest_duration_seconds";

/// Metric: Total number of folded re-creates (counter)
pub const METRIC_NAME_CREATES_FOLDED_TOTAL: &str = "horde_creates_folded_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(ACTOR_ID_LENGTH_BYTES_MAX > ACTOR_KIND_LENGTH_BYTES_MAX);
    assert!(ACTOR_CONCURRENT_COUNT_DEFAULT <= ACTOR_CONCURRENT_COUNT_MAX);
    assert!(LANE_PENDING_COUNT_DEFAULT <= LANE_PENDING_COUNT_MAX);
};
