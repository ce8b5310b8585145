//! Worker supervisor
//!
//! Owns the channel -> worker map. Only bookkeeping happens under the lock;
//! spawning and killing processes happen outside it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::log_sink::log_path;
use super::ports::PortAllocator;
use super::property::{JsonPropertyWriter, PropertyWriter};
use super::types::{validate_channel, IdleTimeout, StartRequest, SupervisorConfig, WorkerInfo};
use super::worker::{LaunchCommand, Worker};
use crate::error::{GraphHostError, Result};

const IDLE_STOP_REQUEST: &str = "idle-timeout";

struct SupervisorState {
    workers: HashMap<String, Arc<Worker>>,
    /// Channels with a start in progress
    reserved: HashSet<String>,
    ports: PortAllocator,
    /// Launched but never registered
    orphans: Vec<Arc<Worker>>,
}

impl SupervisorState {
    fn occupied(&self) -> usize {
        self.workers.len() + self.reserved.len()
    }
}

struct SupervisorInner {
    config: SupervisorConfig,
    properties: Arc<dyn PropertyWriter>,
    state: Mutex<SupervisorState>,
}

impl SupervisorInner {
    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove `channel` only if it still maps to worker `id`
    fn remove_if(&self, channel: &str, id: u64) -> bool {
        let mut state = self.lock();
        if state.workers.get(channel).map(|w| w.id()) == Some(id) {
            state.workers.remove(channel);
            return true;
        }
        false
    }

    fn on_worker_exit(&self, worker: &Worker) {
        if self.remove_if(worker.channel_name(), worker.id()) {
            info!(channel = %worker.channel_name(), "Worker exited, deregistered");
        }
        self.lock().orphans.retain(|w| w.id() != worker.id());
    }
}

/// Releases a start reservation unless the start got as far as registering
struct Reservation<'a> {
    inner: &'a SupervisorInner,
    channel: String,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().reserved.remove(&self.channel);
        }
    }
}

/// Spawns, tracks and reaps one worker process per channel
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let writer = Arc::new(JsonPropertyWriter::new(config.property_dir.clone()));
        Self::with_property_writer(config, writer)
    }

    pub fn with_property_writer(config: SupervisorConfig, properties: Arc<dyn PropertyWriter>) -> Self {
        let ports = PortAllocator::new(config.port_min, config.port_max);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                properties,
                state: Mutex::new(SupervisorState {
                    workers: HashMap::new(),
                    reserved: HashSet::new(),
                    ports,
                    orphans: Vec::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// Construct a worker; nothing is launched or registered
    pub fn create_worker(
        &self,
        channel: &str,
        graph: &str,
        property_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        control_port: u16,
    ) -> Arc<Worker> {
        Arc::new(Worker::new(channel, graph, property_path, log_path, control_port))
    }

    /// Register `worker` under `channel`. False if the channel is taken or
    /// the supervisor is full.
    pub fn add_worker(&self, channel: &str, worker: Arc<Worker>) -> bool {
        let mut state = self.inner.lock();
        if state.workers.contains_key(channel) {
            return false;
        }
        if state.occupied() >= self.inner.config.max_workers {
            warn!(channel, max = self.inner.config.max_workers, "Refusing worker, supervisor is full");
            return false;
        }
        state.workers.insert(channel.to_string(), worker);
        true
    }

    pub fn remove(&self, channel: &str) -> Option<Arc<Worker>> {
        self.inner.lock().workers.remove(channel)
    }

    pub fn get(&self, channel: &str) -> Option<Arc<Worker>> {
        self.inner.lock().workers.get(channel).cloned()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.inner.lock().workers.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn orphan_count(&self) -> usize {
        self.inner.lock().orphans.len()
    }

    /// Live workers, oldest first
    pub fn list(&self) -> Vec<WorkerInfo> {
        let workers: Vec<Arc<Worker>> = self.inner.lock().workers.values().cloned().collect();
        let mut infos: Vec<WorkerInfo> = workers.iter().map(|w| w.info()).collect();
        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.channel_name.cmp(&b.channel_name))
        });
        infos
    }

    /// Next control port from the wrapping cursor
    pub fn next_control_port(&self) -> u16 {
        self.inner.lock().ports.next_port()
    }

    // ========================================================================
    // Control operations
    // ========================================================================

    /// Launch a worker for a new channel
    pub async fn start(&self, request: StartRequest) -> Result<WorkerInfo> {
        request.validate()?;
        let channel = request.channel_name.clone();
        let config = &self.inner.config;

        let control_port = {
            let mut state = self.inner.lock();
            if state.workers.contains_key(&channel) || state.reserved.contains(&channel) {
                return Err(GraphHostError::Conflict(format!(
                    "channel {channel} already has a worker"
                )));
            }
            if state.occupied() >= config.max_workers {
                return Err(GraphHostError::CapacityExceeded {
                    max: config.max_workers,
                });
            }
            state.reserved.insert(channel.clone());
            state.ports.next_port()
        };
        let mut reservation = Reservation {
            inner: &self.inner,
            channel: channel.clone(),
            armed: true,
        };

        let property_path = self.inner.properties.materialize(&request, control_port).await?;
        let worker = self.create_worker(
            &channel,
            &request.graph_name,
            property_path.clone(),
            log_path(&config.log_dir, &channel),
            control_port,
        );
        worker.set_idle_timeout(IdleTimeout::resolve(
            request.timeout,
            config.default_timeout_secs,
        ));

        let launch = LaunchCommand::from_config(
            config,
            &property_path,
            &channel,
            &request.graph_name,
            control_port,
        );
        let weak: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        worker
            .start(&launch, move |exited| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_worker_exit(exited);
                }
            })
            .await?;

        {
            let mut state = self.inner.lock();
            state.reserved.remove(&channel);
            reservation.armed = false;

            if state.workers.contains_key(&channel) {
                warn!(channel = %channel, "Channel registered concurrently, orphaning new worker");
                state.orphans.push(worker);
                return Err(GraphHostError::Conflict(format!(
                    "channel {channel} already has a worker"
                )));
            }
            // The exit monitor only deregisters what is already registered.
            if !worker.is_running() {
                return Err(GraphHostError::Launch(format!(
                    "worker for {channel} exited during startup, see {}",
                    worker.log_path().display()
                )));
            }
            state.workers.insert(channel.clone(), Arc::clone(&worker));
        }

        Ok(worker.info())
    }

    /// Stop and remove a worker. Unknown channels are already stopped.
    pub fn stop(&self, channel: &str, request_id: Option<&str>) -> Result<()> {
        let Some(worker) = self.get(channel) else {
            debug!(channel, request_id = request_id.unwrap_or("-"), "Stop for unknown channel, nothing to do");
            return Ok(());
        };

        worker.stop(request_id)?;
        self.inner.remove_if(channel, worker.id());
        Ok(())
    }

    /// Record activity for a channel that must exist
    pub fn ping(&self, channel: &str) -> Result<()> {
        validate_channel(channel)?;
        let worker = self
            .get(channel)
            .ok_or_else(|| GraphHostError::NotFound(format!("channel {channel} not found")))?;
        worker.ping();
        Ok(())
    }

    // ========================================================================
    // Reaping
    // ========================================================================

    /// Stop and remove every worker idle as of `now`. Returns reaped channels.
    pub fn reap_idle(&self, now: Instant) -> Vec<String> {
        let snapshot: Vec<Arc<Worker>> = self.inner.lock().workers.values().cloned().collect();
        let mut reaped = Vec::new();

        for worker in snapshot.into_iter().filter(|w| w.is_idle(now)) {
            let channel = worker.channel_name().to_string();
            info!(
                channel = %channel,
                timeout_secs = worker.idle_timeout().as_secs(),
                "Reaping idle worker"
            );

            if let Err(e) = worker.stop(Some(IDLE_STOP_REQUEST)) {
                warn!(channel = %channel, error = %e, "Failed to reap idle worker, retrying next sweep");
                continue;
            }
            // A concurrent stop may have removed it already.
            if self.inner.remove_if(&channel, worker.id()) {
                reaped.push(channel);
            }
        }

        reaped
    }

    /// Stop workers that were launched but never registered
    pub fn reap_orphans(&self) -> usize {
        let orphans = std::mem::take(&mut self.inner.lock().orphans);
        let mut stopped = 0;
        let mut failed = Vec::new();

        for orphan in orphans {
            match orphan.stop(Some("orphan")) {
                Ok(()) => {
                    info!(channel = %orphan.channel_name(), "Killed orphaned worker");
                    stopped += 1;
                }
                Err(e) => {
                    warn!(channel = %orphan.channel_name(), error = %e, "Failed to kill orphaned worker");
                    failed.push(orphan);
                }
            }
        }

        if !failed.is_empty() {
            self.inner.lock().orphans.extend(failed);
        }
        stopped
    }

    /// One sweep tick
    pub fn sweep(&self) {
        self.reap_orphans();
        let reaped = self.reap_idle(Instant::now());
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "Sweep reaped idle workers");
        }
    }

    /// Run `sweep` every configured interval until `shutdown` turns true or
    /// its sender is dropped
    pub fn spawn_timeout_sweep(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let supervisor = self.clone();
        let period = self.inner.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            info!(interval_secs = period.as_secs(), "Timeout sweep started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => supervisor.sweep(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Timeout sweep stopped");
        })
    }

    /// Stop and remove everything. Individual failures are logged.
    pub fn cleanup_all(&self) -> usize {
        let workers: Vec<Arc<Worker>> = {
            let mut state = self.inner.lock();
            state.workers.drain().map(|(_, w)| w).collect()
        };

        let mut stopped = 0;
        for worker in &workers {
            match worker.stop(Some("shutdown")) {
                Ok(()) => stopped += 1,
                Err(e) => {
                    error!(channel = %worker.channel_name(), error = %e, "Failed to stop worker during cleanup")
                }
            }
        }

        stopped += self.reap_orphans();
        info!(stopped, total = workers.len(), "Stopped all workers");
        stopped
    }
}
