// src/runtime/scheduler.rs
// Cooperative schedulers: one shared, lazily started and reference counted,
// or one dedicated per isolated extension.
//
// Each scheduler is a current-thread tokio runtime parked on its own OS thread.
// Tasks are submitted from any thread through the runtime handle and tracked so
// teardown can drain them: stop accepting, wait up to the drain grace, then
// force-cancel whatever is left and wait once more before the thread exits.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{GraphHostError, Result};

/// Default time given to in-flight tasks before they are force-cancelled.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Tuning for scheduler teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub drain_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// How an extension instance is bound to a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Multiplexed with other extensions on the shared scheduler thread
    #[default]
    Shared,
    /// Own OS thread and scheduler
    Isolated,
}

impl SchedulingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Isolated => "isolated",
        }
    }

    /// Attach according to this mode. `label` names the dedicated thread.
    pub fn attach(
        self,
        label: &str,
        shared: &Arc<SharedScheduler>,
        config: SchedulerConfig,
    ) -> Result<SchedulerHandle> {
        match self {
            Self::Shared => shared.attach(),
            Self::Isolated => SchedulerHandle::dedicated(label, config),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One running scheduler loop and the OS thread that owns it
struct SchedulerCore {
    label: String,
    handle: tokio::runtime::Handle,
    tracker: TaskTracker,
    stop: CancellationToken,
    force: CancellationToken,
    accepting: Mutex<bool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl SchedulerCore {
    /// Start the OS thread and block until its loop is running
    fn start(label: &str, config: SchedulerConfig) -> Result<Arc<Self>> {
        let tracker = TaskTracker::new();
        let stop = CancellationToken::new();
        let force = CancellationToken::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let thread = {
            let tracker = tracker.clone();
            let stop = stop.clone();
            let force = force.clone();
            let thread_label = label.to_string();

            std::thread::Builder::new()
                .name(label.to_string())
                .spawn(move || {
                    let rt = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };

                    rt.block_on(async {
                        let _ = ready_tx.send(Ok(tokio::runtime::Handle::current()));
                        stop.cancelled().await;

                        tracker.close();
                        if tokio::time::timeout(config.drain_grace, tracker.wait())
                            .await
                            .is_err()
                        {
                            warn!(
                                scheduler = %thread_label,
                                pending = tracker.len(),
                                "Drain grace elapsed, cancelling remaining tasks"
                            );
                            force.cancel();
                            tracker.wait().await;
                        }
                    });

                    debug!(scheduler = %thread_label, "Scheduler loop exited");
                })
                .map_err(|e| GraphHostError::SchedulerStart(e.to_string()))?
        };

        let thread_id = thread.thread().id();
        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(GraphHostError::SchedulerStart(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(GraphHostError::SchedulerStart(
                    "scheduler thread exited before its loop started".to_string(),
                ));
            }
        };

        info!(scheduler = %label, "Scheduler thread started");

        Ok(Arc::new(Self {
            label: label.to_string(),
            handle,
            tracker,
            stop,
            force,
            accepting: Mutex::new(true),
            thread: Mutex::new(Some(thread)),
            thread_id,
        }))
    }

    fn schedule<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Held across the spawn so shutdown cannot slip between check and track.
        let accepting = lock(&self.accepting);
        if !*accepting {
            return Err(GraphHostError::SchedulerClosed);
        }

        let force = self.force.clone();
        let tracked = self.tracker.track_future(async move {
            tokio::select! {
                biased;
                _ = force.cancelled() => {}
                _ = task => {}
            }
        });
        self.handle.spawn(tracked);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.tracker.len()
    }

    fn is_accepting(&self) -> bool {
        *lock(&self.accepting)
    }

    /// Stop accepting work, drain, and join the thread.
    ///
    /// Called from the scheduler's own thread the join is skipped; the loop
    /// still drains and exits once the calling task returns.
    fn shutdown(&self) {
        {
            let mut accepting = lock(&self.accepting);
            if !*accepting {
                return;
            }
            *accepting = false;
        }

        self.stop.cancel();

        if std::thread::current().id() == self.thread_id {
            debug!(scheduler = %self.label, "Shutdown requested from scheduler thread, not joining");
            return;
        }

        if let Some(thread) = lock(&self.thread).take() {
            if thread.join().is_err() {
                error!(scheduler = %self.label, "Scheduler thread panicked during drain");
            }
        }

        info!(scheduler = %self.label, "Scheduler thread stopped");
    }
}

#[derive(Default)]
struct SharedState {
    ref_count: usize,
    core: Option<Arc<SchedulerCore>>,
}

/// Reference-counted scheduler shared by every extension in `Shared` mode.
///
/// The OS thread is started by the first `attach` and torn down (after
/// draining) by the last `detach`.
pub struct SharedScheduler {
    label: String,
    config: SchedulerConfig,
    state: Mutex<SharedState>,
}

static GLOBAL_SHARED: OnceCell<Arc<SharedScheduler>> = OnceCell::new();

impl SharedScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_label("graph-host-shared", config)
    }

    pub fn with_label(label: impl Into<String>, config: SchedulerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            state: Mutex::new(SharedState::default()),
        }
    }

    /// The process-wide shared scheduler. Uses the default config unless
    /// `init_global` ran first.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_SHARED.get_or_init(|| Arc::new(Self::new(SchedulerConfig::default()))))
    }

    /// Configure the process-wide shared scheduler. Returns false if it
    /// already existed, in which case its config is left unchanged.
    pub fn init_global(config: SchedulerConfig) -> bool {
        let mut created = false;
        let shared = GLOBAL_SHARED.get_or_init(|| {
            created = true;
            Arc::new(Self::new(config))
        });
        if !created && shared.config != config {
            warn!(
                configured = ?shared.config.drain_grace,
                requested = ?config.drain_grace,
                "Shared scheduler already initialized, ignoring new config"
            );
        }
        created
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn attach(self: &Arc<Self>) -> Result<SchedulerHandle> {
        let mut state = lock(&self.state);

        let core = match &state.core {
            Some(core) => Arc::clone(core),
            None => {
                let core = SchedulerCore::start(&self.label, self.config)?;
                state.core = Some(Arc::clone(&core));
                core
            }
        };
        state.ref_count += 1;
        debug!(scheduler = %self.label, ref_count = state.ref_count, "Attached to shared scheduler");

        Ok(SchedulerHandle {
            core,
            owner: Some(Arc::clone(self)),
            detached: false,
        })
    }

    fn release(&self) {
        let retired = {
            let mut state = lock(&self.state);
            state.ref_count = state.ref_count.saturating_sub(1);
            debug!(scheduler = %self.label, ref_count = state.ref_count, "Detached from shared scheduler");
            if state.ref_count > 0 {
                return;
            }
            state.core.take()
        };

        // Drained outside the lock: a draining task may itself try to attach.
        if let Some(core) = retired {
            core.shutdown();
        }
    }

    pub fn ref_count(&self) -> usize {
        lock(&self.state).ref_count
    }

    /// Whether the shared thread currently exists
    pub fn is_running(&self) -> bool {
        lock(&self.state).core.is_some()
    }
}

/// An attachment to a scheduler. Detaching (explicitly or on drop) releases
/// the shared reference or tears down the dedicated thread.
pub struct SchedulerHandle {
    core: Arc<SchedulerCore>,
    owner: Option<Arc<SharedScheduler>>,
    detached: bool,
}

impl SchedulerHandle {
    /// Start a dedicated scheduler thread, ref count fixed at one
    pub fn dedicated(label: &str, config: SchedulerConfig) -> Result<Self> {
        let core = SchedulerCore::start(label, config)?;
        Ok(Self {
            core,
            owner: None,
            detached: false,
        })
    }

    /// Submit a task; fails once the scheduler has begun shutting down
    pub fn schedule<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.detached {
            return Err(GraphHostError::SchedulerClosed);
        }
        self.core.schedule(task)
    }

    pub fn mode(&self) -> SchedulingMode {
        if self.owner.is_some() {
            SchedulingMode::Shared
        } else {
            SchedulingMode::Isolated
        }
    }

    /// Tasks submitted and not yet finished or cancelled
    pub fn pending_tasks(&self) -> usize {
        self.core.pending()
    }

    pub fn is_accepting(&self) -> bool {
        !self.detached && self.core.is_accepting()
    }

    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;

        match &self.owner {
            Some(shared) => shared.release(),
            None => self.core.shutdown(),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.release();
    }
}
