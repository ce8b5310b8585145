//! One worker process per channel
//!
//! A worker is launched in its own process group so that stopping it takes
//! every descendant down with the leader. An exit monitor reaps the leader,
//! kills anything left in the group and tells the supervisor.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::log_sink::LogSink;
use super::types::{IdleTimeout, SupervisorConfig, WorkerInfo};
use crate::error::{GraphHostError, Result};

/// Environment variable carrying the control port into the worker
pub const CONTROL_PORT_ENV: &str = "GRAPH_HOST_CONTROL_PORT";

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Executable, arguments and working directory for one worker
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub control_port: u16,
}

impl LaunchCommand {
    /// Fill the configured argument template for one worker
    pub fn from_config(
        config: &SupervisorConfig,
        property_path: &Path,
        channel: &str,
        graph: &str,
        control_port: u16,
    ) -> Self {
        let property = property_path.to_string_lossy();
        let port = control_port.to_string();
        let args = config
            .worker_args
            .iter()
            .map(|arg| {
                arg.replace("{property}", &property)
                    .replace("{channel}", channel)
                    .replace("{graph}", graph)
                    .replace("{port}", &port)
            })
            .collect();

        Self {
            program: config.worker_bin.clone(),
            args,
            work_dir: config.work_dir.clone(),
            control_port,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(CONTROL_PORT_ENV, self.control_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = self.work_dir {
            cmd.current_dir(dir);
        }

        // New group led by the child; its pid doubles as the group id.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

struct WorkerState {
    pid: Option<u32>,
    running: bool,
    last_activity: Instant,
    idle_timeout: IdleTimeout,
}

/// Handle to one channel's process and its bookkeeping
pub struct Worker {
    id: u64,
    channel_name: String,
    graph_name: String,
    property_path: PathBuf,
    log_path: PathBuf,
    control_port: u16,
    created_at: DateTime<Utc>,
    state: Mutex<WorkerState>,
}

impl Worker {
    /// Construct without launching anything
    pub fn new(
        channel_name: impl Into<String>,
        graph_name: impl Into<String>,
        property_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        control_port: u16,
    ) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            channel_name: channel_name.into(),
            graph_name: graph_name.into(),
            property_path: property_path.into(),
            log_path: log_path.into(),
            control_port,
            created_at: Utc::now(),
            state: Mutex::new(WorkerState {
                pid: None,
                running: false,
                last_activity: Instant::now(),
                idle_timeout: IdleTimeout::Never,
            }),
        }
    }

    /// Process-unique; distinguishes successive workers for one channel
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    pub fn property_path(&self) -> &Path {
        &self.property_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.state).pid
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn idle_timeout(&self) -> IdleTimeout {
        lock(&self.state).idle_timeout
    }

    pub fn set_idle_timeout(&self, timeout: IdleTimeout) {
        lock(&self.state).idle_timeout = timeout;
    }

    pub fn last_activity(&self) -> Instant {
        lock(&self.state).last_activity
    }

    /// Record activity; nothing else
    pub fn ping(&self) {
        lock(&self.state).last_activity = Instant::now();
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        let state = lock(&self.state);
        state.idle_timeout.is_expired(state.last_activity, now)
    }

    /// Launch the process, start the log pumps and the exit monitor.
    ///
    /// `on_exit` runs on the monitor task once the process has exited.
    pub async fn start<F>(self: &Arc<Self>, launch: &LaunchCommand, on_exit: F) -> Result<u32>
    where
        F: FnOnce(&Worker) + Send + 'static,
    {
        let sink = LogSink::open(&self.log_path, &self.channel_name)
            .await
            .map_err(|e| {
                GraphHostError::Launch(format!(
                    "cannot open log {}: {e}",
                    self.log_path.display()
                ))
            })?;

        let mut child = launch.command().spawn().map_err(|e| {
            GraphHostError::Launch(format!("failed to spawn {}: {e}", launch.program))
        })?;

        let Some(pid) = child.id() else {
            return Err(GraphHostError::Launch(format!(
                "{} exited before its pid was read",
                launch.program
            )));
        };

        if let Some(stdout) = child.stdout.take() {
            sink.pump(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            sink.pump(stderr, "stderr");
        }

        {
            let mut state = lock(&self.state);
            state.pid = Some(pid);
            state.running = true;
            state.last_activity = Instant::now();
        }

        info!(
            channel = %self.channel_name,
            graph = %self.graph_name,
            pid,
            port = self.control_port,
            log = %self.log_path.display(),
            "Worker started"
        );

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            lock(&worker.state).running = false;

            match status {
                Ok(status) => {
                    info!(channel = %worker.channel_name, pid, status = %status, "Worker exited")
                }
                Err(e) => {
                    warn!(channel = %worker.channel_name, pid, error = %e, "Failed waiting on worker")
                }
            }

            // Descendants that outlived the leader.
            if let Err(e) = kill_process_group(pid) {
                debug!(channel = %worker.channel_name, pid, error = %e, "Group cleanup after exit failed");
            }

            on_exit(&worker);
        });

        Ok(pid)
    }

    /// Kill the whole process group. Already-gone processes count as stopped.
    pub fn stop(&self, request_id: Option<&str>) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(pid) = state.pid else {
            debug!(channel = %self.channel_name, "Worker has no process, nothing to stop");
            return Ok(());
        };

        info!(
            channel = %self.channel_name,
            pid,
            request_id = request_id.unwrap_or("-"),
            "Stopping worker"
        );

        // Once the monitor has reaped the leader the group id may be reused.
        if state.running {
            kill_process_group(pid)?;
        }

        state.pid = None;
        Ok(())
    }

    pub fn info(&self) -> WorkerInfo {
        let state = lock(&self.state);
        WorkerInfo {
            channel_name: self.channel_name.clone(),
            graph_name: self.graph_name.clone(),
            pid: state.pid,
            control_port: self.control_port,
            created_at: self.created_at,
            idle_timeout_secs: state.idle_timeout.as_secs(),
            log_path: self.log_path.clone(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("channel_name", &self.channel_name)
            .field("graph_name", &self.graph_name)
            .field("control_port", &self.control_port)
            .field("pid", &self.pid())
            .finish()
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) -> Result<()> {
    let pgid = libc::pid_t::try_from(pgid).map_err(|_| {
        GraphHostError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("process group id {pgid} out of range"),
        ))
    })?;

    // SAFETY: killpg takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(GraphHostError::Io(err))
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> Result<()> {
    Err(GraphHostError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process groups are only supported on unix",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn shell(script: &str) -> LaunchCommand {
        LaunchCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            work_dir: None,
            control_port: 10123,
        }
    }

    #[test]
    fn test_launch_template_substitution() {
        let config = SupervisorConfig {
            worker_bin: "tman".to_string(),
            worker_args: vec![
                "run".to_string(),
                "--property".to_string(),
                "{property}".to_string(),
                "--name={channel}:{graph}@{port}".to_string(),
            ],
            ..Default::default()
        };
        let launch =
            LaunchCommand::from_config(&config, Path::new("/tmp/p.json"), "room-1", "va", 10005);

        assert_eq!(launch.program, "tman");
        assert_eq!(
            launch.args,
            vec!["run", "--property", "/tmp/p.json", "--name=room-1:va@10005"]
        );
        assert_eq!(launch.control_port, 10005);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Worker::new("a", "g", "/p", "/l", 1);
        let b = Worker::new("a", "g", "/p", "/l", 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_ping_resets_idle() {
        let worker = Worker::new("a", "g", "/p", "/l", 1);
        worker.set_idle_timeout(IdleTimeout::After(Duration::from_secs(10)));
        let later = Instant::now() + Duration::from_secs(11);
        assert!(worker.is_idle(later));

        worker.ping();
        assert!(!worker.is_idle(worker.last_activity() + Duration::from_secs(5)));
    }

    #[test]
    fn test_stop_without_process_is_ok() {
        let worker = Worker::new("a", "g", "/p", "/l", 1);
        assert!(worker.stop(None).is_ok());
        assert!(worker.stop(Some("req-1")).is_ok());
    }

    #[tokio::test]
    async fn test_start_logs_output_and_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(Worker::new(
            "room-1",
            "g",
            dir.path().join("p.json"),
            dir.path().join("app.log"),
            10123,
        ));

        let (tx, rx) = oneshot::channel();
        let pid = worker
            .start(&shell("echo out; echo err >&2; echo port=$GRAPH_HOST_CONTROL_PORT"), move |w| {
                let _ = tx.send(w.id());
            })
            .await
            .unwrap();
        assert!(pid > 0);

        let exited = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(exited, worker.id());
        assert!(!worker.is_running());

        // Pumps finish shortly after the pipes close.
        let mut contents = String::new();
        for _ in 0..50 {
            contents = tokio::fs::read_to_string(worker.log_path()).await.unwrap();
            if contents.lines().count() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(contents.contains("[room-1] out"));
        assert!(contents.contains("[room-1] err"));
        assert!(contents.contains("[room-1] port=10123"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(Worker::new(
            "room-1",
            "g",
            dir.path().join("p.json"),
            dir.path().join("app.log"),
            1,
        ));
        let launch = LaunchCommand {
            program: dir.path().join("missing-binary").to_string_lossy().to_string(),
            args: vec![],
            work_dir: None,
            control_port: 1,
        };

        let err = worker.start(&launch, |_| {}).await.unwrap_err();
        assert!(matches!(err, GraphHostError::Launch(_)));
        assert!(worker.pid().is_none());
    }

    #[tokio::test]
    async fn test_stop_kills_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Arc::new(Worker::new(
            "room-1",
            "g",
            dir.path().join("p.json"),
            dir.path().join("app.log"),
            1,
        ));

        let (tx, rx) = oneshot::channel();
        worker
            .start(&shell("sleep 30"), move |_| {
                let _ = tx.send(());
            })
            .await
            .unwrap();
        assert!(worker.is_running());

        worker.stop(Some("req-9")).unwrap();
        assert!(worker.pid().is_none());

        tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert!(!worker.is_running());
        assert!(worker.stop(None).is_ok());
    }
}
