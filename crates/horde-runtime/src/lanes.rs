//! Per-actor lane queue
//!
//! Four pending sets with different disciplines, drained by one pump task per
//! actor. The pump is woken through a `Notify` whenever work is queued, a job
//! finishes, or the pause flag changes.
//!
//! Dispatch order on every wake:
//! 1. every `immediate` job
//! 2. every `create` job
//! 3. every `parallel` job, unless paused
//! 4. one `serie` job, unless paused or a serie job is still running

use futures::future::BoxFuture;
use horde_core::{ActorId, Error, Result};
use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// A queued unit of work
pub type Job = BoxFuture<'static, ()>;

/// Scheduling lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Runs before anything else, ignores pause
    Immediate,
    /// Creation work and calls issued during a creation, ignores pause
    Create,
    /// One at a time, FIFO
    Serie,
    /// Unbounded concurrency
    Parallel,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Immediate => write!(f, "immediate"),
            Lane::Create => write!(f, "create"),
            Lane::Serie => write!(f, "serie"),
            Lane::Parallel => write!(f, "parallel"),
        }
    }
}

#[derive(Default)]
struct LaneState {
    immediate: VecDeque<Job>,
    create: VecDeque<Job>,
    serie: VecDeque<Job>,
    parallel: VecDeque<Job>,
    paused: bool,
    serie_busy: bool,
    in_flight: usize,
    closed: bool,
}

impl LaneState {
    fn pending(&self) -> usize {
        self.immediate.len() + self.create.len() + self.serie.len() + self.parallel.len()
    }

    fn queue_mut(&mut self, lane: Lane) -> &mut VecDeque<Job> {
        match lane {
            Lane::Immediate => &mut self.immediate,
            Lane::Create => &mut self.create,
            Lane::Serie => &mut self.serie,
            Lane::Parallel => &mut self.parallel,
        }
    }

    /// Pop everything runnable right now, in dispatch order
    fn take_ready(&mut self) -> Vec<(Lane, Job)> {
        let mut ready = Vec::new();

        ready.extend(self.immediate.drain(..).map(|j| (Lane::Immediate, j)));
        ready.extend(self.create.drain(..).map(|j| (Lane::Create, j)));

        if !self.paused {
            ready.extend(self.parallel.drain(..).map(|j| (Lane::Parallel, j)));

            if !self.serie_busy {
                if let Some(job) = self.serie.pop_front() {
                    self.serie_busy = true;
                    ready.push((Lane::Serie, job));
                }
            }
        }

        self.in_flight += ready.len();
        ready
    }
}

/// Lane queue of one actor instance
pub struct LaneQueue {
    id: ActorId,
    state: Mutex<LaneState>,
    capacity: usize,
    /// Wakes the pump
    wake: Notify,
    /// Signalled whenever `in_flight` drops
    settled: Notify,
}

impl fmt::Debug for LaneQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("LaneQueue")
            .field("id", &self.id)
            .field("pending", &state.pending())
            .field("in_flight", &state.in_flight)
            .field("paused", &state.paused)
            .field("closed", &state.closed)
            .finish()
    }
}

impl LaneQueue {
    /// Create a queue and spawn its pump
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(id: ActorId, capacity: usize, paused: bool) -> Arc<Self> {
        debug_assert!(capacity > 0, "capacity must be positive");

        let queue = Arc::new(Self {
            id,
            state: Mutex::new(LaneState {
                paused,
                ..Default::default()
            }),
            capacity,
            wake: Notify::new(),
            settled: Notify::new(),
        });

        tokio::spawn(Arc::clone(&queue).pump());
        queue
    }

    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pump(self: Arc<Self>) {
        trace!(actor_id = %self.id, "Lane pump started");
        loop {
            let ready = {
                let mut state = self.lock();
                if state.closed {
                    break;
                }
                state.take_ready()
            };

            for (lane, job) in ready {
                debug!(actor_id = %self.id, lane = %lane, "Lane job started");
                let guard = InFlightGuard {
                    queue: Arc::clone(&self),
                    lane,
                };
                tokio::spawn(async move {
                    job.await;
                    drop(guard);
                });
            }

            self.wake.notified().await;
        }
        trace!(actor_id = %self.id, "Lane pump stopped");
    }

    fn finish(&self, lane: Lane) {
        {
            let mut state = self.lock();
            debug_assert!(state.in_flight > 0);
            state.in_flight = state.in_flight.saturating_sub(1);
            if lane == Lane::Serie {
                state.serie_busy = false;
            }
        }
        self.settled.notify_waiters();
        self.wake.notify_one();
    }

    /// Queue a job on a lane
    ///
    /// # Errors
    /// `ActorMailboxFull` when the pending limit is reached, `ActorDeleted`
    /// once the queue has been closed.
    pub fn push(&self, lane: Lane, job: Job) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(Error::ActorDeleted {
                    id: self.id.to_string(),
                });
            }

            let depth = state.pending();
            if depth >= self.capacity {
                return Err(Error::ActorMailboxFull {
                    id: self.id.to_string(),
                    depth,
                    max: self.capacity,
                });
            }

            state.queue_mut(lane).push_back(job);
        }

        trace!(actor_id = %self.id, lane = %lane, "Lane job queued");
        self.wake.notify_one();
        Ok(())
    }

    /// Stop dispatching `serie` and `parallel` jobs
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Resume `serie` and `parallel` dispatch
    pub fn resume(&self) {
        self.lock().paused = false;
        self.wake.notify_one();
    }

    /// Whether `serie`/`parallel` are gated
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Jobs started and not yet finished
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Jobs queued and not yet started
    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    /// Queued jobs on one lane
    pub fn pending_in(&self, lane: Lane) -> usize {
        self.lock().queue_mut(lane).len()
    }

    /// Whether the queue was closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until at most `allowance` jobs are in flight
    ///
    /// An allowance of one lets a job wait for everything but itself.
    pub async fn drain_to(&self, allowance: usize) {
        loop {
            let mut settled = pin!(self.settled.notified());
            settled.as_mut().enable();
            if self.in_flight() <= allowance {
                return;
            }
            settled.await;
        }
    }

    /// Wait until no job is in flight
    pub async fn drain(&self) {
        self.drain_to(0).await;
    }

    /// Stop the pump and drop every queued job
    ///
    /// Jobs already running are not interrupted.
    pub fn close(&self) {
        let dropped = {
            let mut state = self.lock();
            state.closed = true;
            let mut dropped: Vec<Job> = Vec::with_capacity(state.pending());
            dropped.extend(state.immediate.drain(..));
            dropped.extend(state.create.drain(..));
            dropped.extend(state.serie.drain(..));
            dropped.extend(state.parallel.drain(..));
            dropped
        };

        if !dropped.is_empty() {
            debug!(actor_id = %self.id, dropped = dropped.len(), "Lane closed with queued jobs");
        }
        // reply channels inside the jobs are dropped here, outside the lock
        drop(dropped);
        self.wake.notify_one();
    }
}

/// Releases the in-flight slot even if the job panics
struct InFlightGuard {
    queue: Arc<LaneQueue>,
    lane: Lane,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.queue.finish(self.lane);
    }
}
