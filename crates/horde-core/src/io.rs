//! Time and randomness providers
//!
//! Everything in the runtime that reads the clock or draws random ids goes
//! through these traits, so tests can substitute a manual clock or a seeded
//! generator without touching runtime code.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Clock abstraction
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the given duration
    async fn sleep_ms(&self, ms: u64);

    /// Monotonic milliseconds, for measuring durations
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// System clock
#[derive(Debug, Clone)]
pub struct WallClockTime {
    origin: Instant,
}

impl Default for WallClockTime {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClockTime {
    /// Create a wall clock provider
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock
///
/// `sleep_ms` advances the clock and yields once instead of waiting.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance_ms(ms);
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number source
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Next random u64
    fn next_u64(&self) -> u64;

    /// Random UUID v4 string
    fn gen_uuid(&self) -> String {
        let high = self.next_u64();
        let low = self.next_u64();

        // version 4, variant 1
        let high = (high & 0xffff_ffff_ffff_0fff) | 0x0000_0000_0000_4000;
        let low = (low & 0x3fff_ffff_ffff_ffff) | 0x8000_0000_0000_0000;

        format!(
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            high >> 32,
            (high >> 16) & 0xffff,
            high & 0xffff,
            low >> 48,
            low & 0xffff_ffff_ffff
        )
    }

    /// Random u64 in `[min, max)`
    fn gen_range(&self, min: u64, max: u64) -> u64 {
        assert!(min < max, "min must be less than max");
        min + (self.next_u64() % (max - min))
    }
}

/// xorshift64* generator, seeded from the clock unless a seed is given
///
/// Not cryptographically secure.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Seed from the system clock
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::with_seed(seed)
    }

    /// Seed explicitly
    pub fn with_seed(seed: u64) -> Self {
        // xorshift never leaves the all-zero state
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self
                .state
                .compare_exchange_weak(state, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545_F491_4F6C_DD1D),
                Err(current) => state = current,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of the time and randomness providers
#[derive(Clone)]
pub struct IoContext {
    /// Time provider
    pub time: Arc<dyn TimeProvider>,
    /// RNG provider
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Wall clock and clock-seeded RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    /// Custom providers
    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    /// Monotonic time in milliseconds
    pub fn monotonic_ms(&self) -> u64 {
        self.time.monotonic_ms()
    }

    /// Sleep through the time provider
    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }

    /// Generate a UUID
    pub fn gen_uuid(&self) -> String {
        self.rng.gen_uuid()
    }
}
