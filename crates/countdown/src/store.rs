use std::{fmt, future::Future, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::trace;

/// Seconds every countdown starts from.
pub const COUNTDOWN_START: u8 = 10;

type ContinuationFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Deferred action run once a countdown completes.
///
/// Cloning shares the same action; the controller guarantees a given
/// countdown invokes it at most once.
#[derive(Clone)]
pub struct Continuation(Arc<ContinuationFn>);

impl Continuation {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move || action().boxed()))
    }

    pub(crate) fn invoke(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.0)()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation(..)")
    }
}

#[derive(Debug, Clone)]
pub struct CountdownState {
    pub is_active: bool,
    pub count: u8,
    pub(crate) on_complete: Option<Continuation>,
}

impl CountdownState {
    pub fn snapshot(&self) -> CountdownSnapshot {
        CountdownSnapshot {
            is_active: self.is_active,
            count: self.count,
        }
    }

    pub fn has_continuation(&self) -> bool {
        self.on_complete.is_some()
    }
}

impl Default for CountdownState {
    fn default() -> Self {
        Self {
            is_active: false,
            count: COUNTDOWN_START,
            on_complete: None,
        }
    }
}

/// Read-only view handed to UI and collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownSnapshot {
    pub is_active: bool,
    pub count: u8,
}

impl Default for CountdownSnapshot {
    fn default() -> Self {
        CountdownState::default().snapshot()
    }
}

#[derive(Debug, Clone)]
pub enum CountdownCommand {
    Start(Continuation),
    Tick(u8),
    Stop,
}

impl CountdownCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Tick(_) => "tick",
            Self::Stop => "stop",
        }
    }
}

pub fn reduce(state: CountdownState, command: CountdownCommand) -> CountdownState {
    match command {
        CountdownCommand::Start(continuation) => CountdownState {
            is_active: true,
            count: COUNTDOWN_START,
            on_complete: Some(continuation),
        },
        CountdownCommand::Tick(count) => CountdownState {
            count: count.min(COUNTDOWN_START),
            ..state
        },
        CountdownCommand::Stop => CountdownState::default(),
    }
}

/// Single owner of [`CountdownState`]. Every mutation goes through
/// [`CountdownStore::dispatch`]; readers only ever see snapshots.
pub struct CountdownStore {
    state: Mutex<CountdownState>,
    snapshots: watch::Sender<CountdownSnapshot>,
}

impl CountdownStore {
    pub fn new() -> Arc<Self> {
        let (snapshots, _) = watch::channel(CountdownSnapshot::default());
        Arc::new(Self {
            state: Mutex::new(CountdownState::default()),
            snapshots,
        })
    }

    pub async fn dispatch(&self, command: CountdownCommand) -> CountdownSnapshot {
        let name = command.name();
        let mut guard = self.state.lock().await;
        let current = std::mem::take(&mut *guard);
        *guard = reduce(current, command);
        let snapshot = guard.snapshot();
        trace!(
            command = name,
            is_active = snapshot.is_active,
            count = snapshot.count,
            "countdown state reduced"
        );
        // Published under the lock so watchers never observe reordered states.
        self.snapshots.send_replace(snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> CountdownSnapshot {
        *self.snapshots.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CountdownSnapshot> {
        self.snapshots.subscribe()
    }

    #[cfg(test)]
    pub(crate) async fn state(&self) -> CountdownState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
