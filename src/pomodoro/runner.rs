//! One-second tick driver for a [`TimerEngine`].
//!
//! The runner owns at most one tick task. Pausing, resetting or dropping the
//! runner aborts that task before returning, and the task re-checks the
//! engine's running flag under the lock before each tick, so no stale tick can
//! land after a pause.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use super::engine::{TickOutcome, TimerEngine, TimerSnapshot};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

pub type SharedEngine = Arc<Mutex<TimerEngine>>;

/// Locks the engine, recovering the guard if a previous holder panicked.
pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, TimerEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels the tick task when dropped.
#[derive(Debug)]
pub struct TickHandle {
    task: JoinHandle<()>,
}

impl TickHandle {
    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
pub struct TimerRunner {
    engine: SharedEngine,
    ticker: Mutex<Option<TickHandle>>,
    snapshots: broadcast::Sender<TimerSnapshot>,
    period: Duration,
}

impl TimerRunner {
    pub fn new(engine: TimerEngine) -> Self {
        Self::with_period(engine, TICK_PERIOD)
    }

    pub fn with_period(engine: TimerEngine, period: Duration) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            ticker: Mutex::new(None),
            snapshots,
            period,
        }
    }

    pub fn engine(&self) -> SharedEngine {
        Arc::clone(&self.engine)
    }

    /// Receives a snapshot after every tick and every runner-level command.
    pub fn subscribe(&self) -> broadcast::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        lock_engine(&self.engine).snapshot()
    }

    /// Runs `f` against the engine and publishes the resulting state.
    pub fn update<R>(&self, f: impl FnOnce(&mut TimerEngine) -> R) -> R {
        let (result, snapshot) = {
            let mut engine = lock_engine(&self.engine);
            let result = f(&mut engine);
            (result, engine.snapshot())
        };
        self.publish(snapshot);
        result
    }

    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> TimerSnapshot {
        let snapshot = {
            let mut engine = lock_engine(&self.engine);
            engine.start();
            engine.snapshot()
        };

        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.as_ref().is_none_or(TickHandle::is_finished) {
            *ticker = Some(spawn_ticker(
                Arc::clone(&self.engine),
                self.snapshots.clone(),
                self.period,
            ));
            debug!("tick task spawned");
        }
        drop(ticker);

        self.publish(snapshot.clone());
        snapshot
    }

    pub fn pause(&self) -> TimerSnapshot {
        self.cancel_ticks();
        self.update(|engine| {
            engine.pause();
            engine.snapshot()
        })
    }

    pub fn reset(&self) -> TimerSnapshot {
        self.cancel_ticks();
        self.update(|engine| {
            engine.reset();
            engine.snapshot()
        })
    }

    /// Stops ticking without touching engine state; used on teardown.
    pub fn shutdown(&self) {
        self.cancel_ticks();
        info!("timer runner shut down");
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn cancel_ticks(&self) {
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if handle.is_some() {
            debug!("tick task cancelled");
        }
    }

    fn publish(&self, snapshot: TimerSnapshot) {
        // No receivers is fine.
        let _ = self.snapshots.send(snapshot);
    }
}

fn spawn_ticker(
    engine: SharedEngine,
    snapshots: broadcast::Sender<TimerSnapshot>,
    period: Duration,
) -> TickHandle {
    let task = tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let snapshot = {
                let mut engine = lock_engine(&engine);
                if !engine.is_running() {
                    break;
                }
                if let TickOutcome::PhaseCompleted { session, next } = engine.tick() {
                    debug!(session = %session.id, next = %next, "session recorded");
                }
                engine.snapshot()
            };
            let _ = snapshots.send(snapshot);
        }
    });
    TickHandle { task }
}
