//! Recurring schedulers for generation and distribution.
//!
//! Each scheduler owns a `Ticker` (start/stop over a tokio interval) and a
//! `TickGuard` (Idle/Running flag) so ticks never overlap. A stop request
//! cancels the scheduler's kill switch; the in-flight remote call finishes and
//! the tick observes the switch at its next checkpoint.

pub mod distribution;
pub mod generation;

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

pub use distribution::{DistributionReport, DistributionScheduler};
pub use generation::{GenerationReport, GenerationScheduler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickState {
    Idle,
    Running,
}

/// Why a tick did no work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Stopped,
    NoActiveGroups,
    EmptyPool,
}

/// Re-entrancy guard: `enter` succeeds only from `Idle`.
#[derive(Debug, Default)]
pub struct TickGuard {
    running: AtomicBool,
}

impl TickGuard {
    pub fn enter(&self) -> Option<RunningTick<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningTick { guard: self })
    }

    pub fn state(&self) -> TickState {
        if self.running.load(Ordering::Acquire) {
            TickState::Running
        } else {
            TickState::Idle
        }
    }
}

/// Returns the guard to `Idle` on drop.
pub struct RunningTick<'a> {
    guard: &'a TickGuard,
}

impl Drop for RunningTick<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Kill switch shared by a scheduler and its ticker task.
#[derive(Debug)]
pub struct KillSwitch {
    token: Mutex<CancellationToken>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self {
            token: Mutex::new(CancellationToken::new()),
        }
    }
}

impl KillSwitch {
    /// Fresh token for a new run. Any previous run stays cancelled.
    pub fn arm(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        slot.cancel();
        *slot = fresh.clone();
        fresh
    }

    pub fn trip(&self) {
        self.current().cancel();
    }

    pub fn current(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_tripped(&self) -> bool {
        self.current().is_cancelled()
    }
}

/// Wall-clock time advanced by tokio's monotonic clock, so tick timestamps
/// and the ticker's period are measured on the same clock.
#[derive(Clone, Copy, Debug)]
pub struct TickClock {
    anchor: Instant,
    wall: DateTime<Utc>,
}

impl TickClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.anchor.elapsed()).unwrap_or(ChronoDuration::zero());
        self.wall + elapsed
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

struct TickerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Fixed-period timer owning one background task.
pub struct Ticker {
    name: &'static str,
    slot: Mutex<Option<TickerHandle>>,
}

impl Ticker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    /// Start ticking every `period` (first tick fires immediately). Replaces a
    /// running timer. The task ends once `cancel` fires.
    pub fn start<F, Fut>(&self, period: Duration, cancel: CancellationToken, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let name = self.name;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                  _ = task_cancel.cancelled() => break,
                  _ = interval.tick() => {
                    // Not raced against cancellation: an in-flight tick finishes.
                    tick().await;
                  }
                }
            }
            tracing::info!(scheduler = name, "ticker exited");
        });

        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(TickerHandle { cancel, task });
        tracing::info!(scheduler = name, period_secs = period.as_secs(), "ticker started");
    }

    /// Clear the timer. The task is not aborted; it exits after any in-flight tick.
    pub fn stop(&self) {
        let handle = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            drop(handle.task);
            tracing::info!(scheduler = self.name, "ticker stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.cancel.is_cancelled() && !h.task.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}
