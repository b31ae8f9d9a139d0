use std::{
    sync::{Arc, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    task::{AbortHandle, JoinHandle},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    error::CountdownError,
    store::{Continuation, CountdownCommand, CountdownSnapshot, CountdownStore, COUNTDOWN_START},
};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between the final tick and the continuation so overlays bound to the
/// store can unmount first.
const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownSettings {
    pub tick_interval: Duration,
    pub grace_delay: Duration,
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            grace_delay: DEFAULT_GRACE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    Running(u8),
    Completing,
}

/// Capability handed to whoever needs to gate work behind a countdown.
#[async_trait]
pub trait CountdownGate: Send + Sync {
    /// Starts (or restarts) the countdown; `continuation` runs once it completes.
    async fn request_countdown(&self, continuation: Continuation);
    /// Cancels any running countdown. Its continuation is dropped.
    async fn cancel_countdown(&self);
    fn countdown_snapshot(&self) -> CountdownSnapshot;
}

/// Drives the store's countdown in real time. Owns the only timer task;
/// starting a new countdown always aborts the previous one first.
pub struct CountdownController {
    store: Arc<CountdownStore>,
    settings: CountdownSettings,
    timer: Arc<Mutex<TimerSlot>>,
    abort: TimerAbort,
}

/// Abort handle of the ticking task, reachable without the async slot lock so
/// `Drop` can always cancel it. Cleared once the task moves into completion.
type TimerAbort = Arc<std::sync::Mutex<Option<(u64, AbortHandle)>>>;

fn set_abort(
    abort: &TimerAbort,
    value: Option<(u64, AbortHandle)>,
) -> Option<(u64, AbortHandle)> {
    let mut guard = abort.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, value)
}

fn clear_abort_for(abort: &TimerAbort, generation: u64) {
    let mut guard = abort.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.as_ref().is_some_and(|(owner, _)| *owner == generation) {
        *guard = None;
    }
}

#[derive(Default)]
struct TimerSlot {
    active: Option<ActiveTimer>,
    next_generation: u64,
    completions_pending: usize,
}

struct ActiveTimer {
    generation: u64,
    ticks_remaining: u8,
    continuation: Continuation,
    task: JoinHandle<()>,
}

enum TickOutcome {
    Continue,
    Complete(Continuation),
    Superseded,
    ExternallyStopped,
}

impl CountdownController {
    pub fn new(
        store: Arc<CountdownStore>,
        settings: CountdownSettings,
    ) -> Result<Self, CountdownError> {
        if settings.tick_interval.is_zero() {
            return Err(CountdownError::ZeroTickInterval);
        }
        Ok(Self {
            store,
            settings,
            timer: Arc::new(Mutex::new(TimerSlot::default())),
            abort: TimerAbort::default(),
        })
    }

    pub fn store(&self) -> &Arc<CountdownStore> {
        &self.store
    }

    pub fn settings(&self) -> CountdownSettings {
        self.settings
    }

    pub async fn start(&self, continuation: Continuation) {
        let mut slot = self.timer.lock().await;
        if let Some(previous) = slot.active.take() {
            previous.task.abort();
            debug!(
                generation = previous.generation,
                ticks_remaining = previous.ticks_remaining,
                "replacing running countdown"
            );
        }

        slot.next_generation += 1;
        let generation = slot.next_generation;
        self.store
            .dispatch(CountdownCommand::Start(continuation.clone()))
            .await;

        let ticker = Ticker {
            store: Arc::clone(&self.store),
            timer: Arc::clone(&self.timer),
            abort: Arc::clone(&self.abort),
            settings: self.settings,
            generation,
        };
        let task = tokio::spawn(ticker.run());
        set_abort(&self.abort, Some((generation, task.abort_handle())));
        slot.active = Some(ActiveTimer {
            generation,
            ticks_remaining: COUNTDOWN_START,
            continuation,
            task,
        });
        info!(generation, "countdown started");
    }

    pub async fn stop(&self) {
        let mut slot = self.timer.lock().await;
        let cancelled = slot.active.take();
        if let Some(active) = &cancelled {
            active.task.abort();
            clear_abort_for(&self.abort, active.generation);
        }
        self.store.dispatch(CountdownCommand::Stop).await;
        drop(slot);

        if let Some(active) = cancelled {
            info!(
                generation = active.generation,
                ticks_remaining = active.ticks_remaining,
                "countdown cancelled"
            );
        }
    }

    pub async fn phase(&self) -> ControllerPhase {
        let slot = self.timer.lock().await;
        match &slot.active {
            Some(active) => ControllerPhase::Running(active.ticks_remaining),
            None if slot.completions_pending > 0 => ControllerPhase::Completing,
            None => ControllerPhase::Idle,
        }
    }

    pub fn snapshot(&self) -> CountdownSnapshot {
        self.store.snapshot()
    }
}

impl Drop for CountdownController {
    fn drop(&mut self) {
        if let Some((generation, handle)) = set_abort(&self.abort, None) {
            handle.abort();
            debug!(generation, "countdown timer aborted on drop");
        }
    }
}

#[async_trait]
impl CountdownGate for CountdownController {
    async fn request_countdown(&self, continuation: Continuation) {
        self.start(continuation).await;
    }

    async fn cancel_countdown(&self) {
        self.stop().await;
    }

    fn countdown_snapshot(&self) -> CountdownSnapshot {
        self.snapshot()
    }
}

/// State captured by one timer task. A ticker only acts while its
/// generation still owns the controller's timer slot.
struct Ticker {
    store: Arc<CountdownStore>,
    timer: Arc<Mutex<TimerSlot>>,
    abort: TimerAbort,
    settings: CountdownSettings,
    generation: u64,
}

impl Ticker {
    async fn run(self) {
        let period = self.settings.tick_interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.on_tick().await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Complete(continuation)) => {
                    self.complete(continuation).await;
                    return;
                }
                Ok(TickOutcome::Superseded) => return,
                Ok(TickOutcome::ExternallyStopped) => {
                    info!(
                        generation = self.generation,
                        "countdown state reset externally; timer stopped"
                    );
                    return;
                }
                Err(err) => {
                    warn!(generation = self.generation, "countdown timer error: {err}");
                    self.abandon().await;
                    return;
                }
            }
        }
    }

    async fn on_tick(&self) -> Result<TickOutcome, CountdownError> {
        let mut slot = self.timer.lock().await;
        let Some(active) = slot
            .active
            .as_mut()
            .filter(|active| active.generation == self.generation)
        else {
            return Ok(TickOutcome::Superseded);
        };

        if !self.store.snapshot().is_active {
            slot.active = None;
            return Ok(TickOutcome::ExternallyStopped);
        }

        let next = active
            .ticks_remaining
            .checked_sub(1)
            .ok_or(CountdownError::TickUnderflow {
                generation: self.generation,
            })?;
        active.ticks_remaining = next;
        self.store.dispatch(CountdownCommand::Tick(next)).await;
        debug!(generation = self.generation, count = next, "countdown tick");

        if next > 0 {
            return Ok(TickOutcome::Continue);
        }

        let Some(finished) = slot.active.take() else {
            return Ok(TickOutcome::Superseded);
        };
        self.store.dispatch(CountdownCommand::Stop).await;
        slot.completions_pending += 1;
        clear_abort_for(&self.abort, self.generation);
        Ok(TickOutcome::Complete(finished.continuation))
    }

    async fn complete(&self, continuation: Continuation) {
        time::sleep(self.settings.grace_delay).await;
        info!(generation = self.generation, "countdown complete; running continuation");

        match tokio::spawn(continuation.invoke()).await {
            Ok(Ok(())) => debug!(generation = self.generation, "countdown continuation finished"),
            Ok(Err(err)) => warn!(
                generation = self.generation,
                "countdown continuation failed: {err:#}"
            ),
            Err(err) => warn!(
                generation = self.generation,
                "countdown continuation panicked: {err}"
            ),
        }

        let mut slot = self.timer.lock().await;
        slot.completions_pending = slot.completions_pending.saturating_sub(1);
    }

    async fn abandon(&self) {
        let mut slot = self.timer.lock().await;
        let owned = slot
            .active
            .as_ref()
            .is_some_and(|active| active.generation == self.generation);
        if owned {
            slot.active = None;
            self.store.dispatch(CountdownCommand::Stop).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
