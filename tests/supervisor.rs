// tests/supervisor.rs
// Worker Supervisor Integration Tests
//
// Spawns real child processes through /bin/sh and checks:
// 1. Start registers a worker with a pid, a port from the range and a log file
// 2. Duplicate channels conflict without touching the existing worker
// 3. Stopping an unknown channel succeeds
// 4. The worker limit holds, including under concurrent starts
// 5. Stop kills the whole process group
// 6. The sweep reaps idle workers and leaves never-expiring ones alone
// 7. A worker that loses a registration race is orphaned and reaped

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graph_host::supervisor::{
    JsonPropertyWriter, LaunchCommand, PropertyWriter, StartRequest, SupervisorConfig, Worker,
    WorkerSupervisor,
};
use graph_host::GraphHostError;
use once_cell::sync::OnceCell;
use tokio::sync::watch;

// ============================================================================
// TEST SETUP UTILITIES
// ============================================================================

fn shell_config(dir: &Path, script: &str, max_workers: usize) -> SupervisorConfig {
    SupervisorConfig {
        max_workers,
        port_min: 15000,
        port_max: 15099,
        default_timeout_secs: 60,
        sweep_interval_secs: 1,
        worker_bin: "/bin/sh".to_string(),
        worker_args: vec![
            "-c".to_string(),
            script.to_string(),
            "graph-worker".to_string(),
            "{property}".to_string(),
        ],
        work_dir: Some(dir.to_path_buf()),
        log_dir: dir.join("logs"),
        property_dir: dir.join("props"),
    }
}

fn sleeper(dir: &Path, max_workers: usize) -> WorkerSupervisor {
    WorkerSupervisor::new(shell_config(dir, "echo started $1; exec sleep 30", max_workers))
}

/// Alive and not a zombie
#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .map(|state| state != 'Z' && state != 'X')
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..100 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn read_log_eventually(path: &Path, needle: &str) -> String {
    let mut contents = String::new();
    for _ in 0..100 {
        contents = tokio::fs::read_to_string(path).await.unwrap_or_default();
        if contents.contains(needle) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    contents
}

// ============================================================================
// START / STOP
// ============================================================================

#[tokio::test]
async fn test_start_registers_worker_with_port_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);

    let info = supervisor
        .start(StartRequest::new("room-1", "voice_assistant").with_timeout(60))
        .await
        .unwrap();

    assert!(info.pid.unwrap() > 0);
    assert!((15000..=15099).contains(&info.control_port));
    assert_eq!(info.graph_name, "voice_assistant");
    assert_eq!(info.idle_timeout_secs, 60);

    let log = read_log_eventually(&info.log_path, "started").await;
    let first = log.lines().next().unwrap_or_default();
    assert!(first.starts_with("[room-1] started "), "unexpected log line: {first}");
    // The property path was substituted into the arguments.
    assert!(first.contains("property-room-1-"));

    let listed = supervisor.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].channel_name, "room-1");

    supervisor.cleanup_all();
}

#[tokio::test]
async fn test_duplicate_start_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);

    let first = supervisor
        .start(StartRequest::new("room-1", "voice_assistant"))
        .await
        .unwrap();
    let err = supervisor
        .start(StartRequest::new("room-1", "voice_assistant"))
        .await
        .unwrap_err();

    assert!(matches!(err, GraphHostError::Conflict(_)));
    assert_eq!(supervisor.len(), 1);
    assert_eq!(supervisor.get("room-1").unwrap().pid(), first.pid);

    supervisor.cleanup_all();
}

#[tokio::test]
async fn test_stop_unknown_channel_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);

    assert!(supervisor.stop("room-2", None).is_ok());
    assert!(supervisor.is_empty());
}

#[tokio::test]
async fn test_stop_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);

    supervisor
        .start(StartRequest::new("room-1", "voice_assistant"))
        .await
        .unwrap();
    supervisor.stop("room-1", Some("req-1")).unwrap();
    supervisor.stop("room-1", Some("req-2")).unwrap();
    assert!(!supervisor.contains("room-1"));
}

#[tokio::test]
async fn test_launch_failure_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = shell_config(dir.path(), "", 4);
    config.worker_bin = dir.path().join("no-such-binary").to_string_lossy().to_string();
    let supervisor = WorkerSupervisor::new(config);

    let err = supervisor
        .start(StartRequest::new("room-1", "voice_assistant"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphHostError::Launch(_)));
    assert!(supervisor.is_empty());

    // The failed start released its slot.
    let err = supervisor
        .start(StartRequest::new("room-1", "voice_assistant"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphHostError::Launch(_)));
}

// ============================================================================
// CAPACITY AND PORTS
// ============================================================================

#[tokio::test]
async fn test_capacity_rejects_extra_worker() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 2);

    supervisor.start(StartRequest::new("a", "g")).await.unwrap();
    supervisor.start(StartRequest::new("b", "g")).await.unwrap();

    let err = supervisor.start(StartRequest::new("c", "g")).await.unwrap_err();
    assert!(matches!(err, GraphHostError::CapacityExceeded { max: 2 }));

    assert!(supervisor.contains("a"));
    assert!(supervisor.contains("b"));
    assert!(!supervisor.contains("c"));
    // No worker was launched for the rejected channel, so no log exists.
    let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("app-c-"))
        .collect();
    assert!(logs.is_empty());

    supervisor.cleanup_all();
}

#[tokio::test]
async fn test_concurrent_starts_respect_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 2);

    let mut handles = Vec::new();
    for i in 0..6 {
        let supervisor = supervisor.clone();
        handles.push(tokio::spawn(async move {
            supervisor
                .start(StartRequest::new(format!("room-{i}"), "g"))
                .await
        }));
    }

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(GraphHostError::CapacityExceeded { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(started, 2);
    assert_eq!(rejected, 4);
    assert_eq!(supervisor.len(), 2);

    supervisor.cleanup_all();
}

#[tokio::test]
async fn test_live_workers_get_distinct_ports() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);

    for channel in ["a", "b", "c", "d"] {
        supervisor.start(StartRequest::new(channel, "g")).await.unwrap();
    }

    let mut ports: Vec<u16> = supervisor.list().iter().map(|w| w.control_port).collect();
    ports.sort_unstable();
    assert_eq!(ports, vec![15000, 15001, 15002, 15003]);

    supervisor.cleanup_all();
}

// ============================================================================
// PROCESS GROUP
// ============================================================================

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_kills_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
    let supervisor = WorkerSupervisor::new(shell_config(dir.path(), &script, 4));

    let info = supervisor
        .start(StartRequest::new("room-1", "voice_assistant"))
        .await
        .unwrap();
    let leader = info.pid.unwrap();

    let mut grandchild = None;
    for _ in 0..100 {
        if let Ok(raw) = std::fs::read_to_string(&pid_file) {
            if let Ok(pid) = raw.trim().parse::<u32>() {
                grandchild = Some(pid);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let grandchild = grandchild.unwrap();
    assert!(is_alive(leader));
    assert!(is_alive(grandchild));

    supervisor.stop("room-1", None).unwrap();

    assert!(wait_until_dead(leader).await, "worker {leader} survived stop");
    assert!(wait_until_dead(grandchild).await, "descendant {grandchild} survived stop");
}

#[tokio::test]
async fn test_crashed_worker_is_deregistered_and_channel_reusable() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = WorkerSupervisor::new(shell_config(dir.path(), "sleep 0.3; exit 7", 4));

    supervisor.start(StartRequest::new("room-1", "g")).await.unwrap();
    for _ in 0..100 {
        if !supervisor.contains("room-1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!supervisor.contains("room-1"));

    supervisor.start(StartRequest::new("room-1", "g")).await.unwrap();
    assert!(supervisor.contains("room-1"));
    supervisor.cleanup_all();
}

// ============================================================================
// REGISTRATION RACE
// ============================================================================

/// Writes the property file, then launches and registers a worker for the
/// same channel before the in-flight start can.
struct RacingWriter {
    files: JsonPropertyWriter,
    config: SupervisorConfig,
    log_path: PathBuf,
    supervisor: OnceCell<WorkerSupervisor>,
    winner: Mutex<Option<Arc<Worker>>>,
}

#[async_trait]
impl PropertyWriter for RacingWriter {
    async fn materialize(
        &self,
        request: &StartRequest,
        control_port: u16,
    ) -> graph_host::Result<PathBuf> {
        let path = self.files.materialize(request, control_port).await?;
        let supervisor = self.supervisor.get().unwrap();

        let worker = supervisor.create_worker(
            &request.channel_name,
            &request.graph_name,
            path.clone(),
            self.log_path.clone(),
            control_port,
        );
        let launch = LaunchCommand::from_config(
            &self.config,
            &path,
            &request.channel_name,
            &request.graph_name,
            control_port,
        );
        worker.start(&launch, |_| {}).await?;
        assert!(supervisor.add_worker(&request.channel_name, Arc::clone(&worker)));
        *self.winner.lock().unwrap() = Some(worker);
        Ok(path)
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_registration_race_orphans_and_sweep_reaps() {
    let dir = tempfile::tempdir().unwrap();
    let config = shell_config(dir.path(), "echo pid $$; exec sleep 30", 4);
    let writer = Arc::new(RacingWriter {
        files: JsonPropertyWriter::new(config.property_dir.clone()),
        config: config.clone(),
        log_path: dir.path().join("winner.log"),
        supervisor: OnceCell::new(),
        winner: Mutex::new(None),
    });
    let supervisor = WorkerSupervisor::with_property_writer(config, writer.clone());
    assert!(writer.supervisor.set(supervisor.clone()).is_ok());

    let err = supervisor
        .start(StartRequest::new("room-1", "g"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphHostError::Conflict(_)), "got {err:?}");
    assert_eq!(supervisor.orphan_count(), 1);

    let winner = writer.winner.lock().unwrap().clone().unwrap();
    let winner_pid = winner.pid().unwrap();
    assert_eq!(supervisor.get("room-1").unwrap().id(), winner.id());

    // Only the orphan logs under the configured log dir.
    let mut logs = std::fs::read_dir(dir.path().join("logs")).unwrap();
    let orphan_log = logs.next().unwrap().unwrap().path();
    assert!(logs.next().is_none());
    let contents = read_log_eventually(&orphan_log, "pid ").await;
    let orphan_pid: u32 = contents
        .lines()
        .find_map(|line| line.strip_prefix("[room-1] pid "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_ne!(orphan_pid, winner_pid);
    assert!(is_alive(orphan_pid));

    supervisor.sweep();
    assert!(wait_until_dead(orphan_pid).await, "orphan {orphan_pid} survived the sweep");
    assert_eq!(supervisor.orphan_count(), 0);

    assert!(is_alive(winner_pid));
    assert!(winner.is_running());
    assert_eq!(supervisor.get("room-1").unwrap().id(), winner.id());

    supervisor.cleanup_all();
    assert!(wait_until_dead(winner_pid).await);
}

// ============================================================================
// IDLE SWEEP
// ============================================================================

#[tokio::test]
async fn test_sweep_reaps_idle_worker() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = supervisor.spawn_timeout_sweep(shutdown_rx);

    let info = supervisor
        .start(StartRequest::new("room-1", "g").with_timeout(1))
        .await
        .unwrap();

    let mut reaped = false;
    for _ in 0..60 {
        if !supervisor.contains("room-1") {
            reaped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(reaped, "idle worker not reaped within timeout plus one sweep");
    #[cfg(target_os = "linux")]
    assert!(wait_until_dead(info.pid.unwrap()).await);
    #[cfg(not(target_os = "linux"))]
    let _ = info;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), sweep)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_ping_keeps_worker_alive() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = supervisor.spawn_timeout_sweep(shutdown_rx);

    supervisor
        .start(StartRequest::new("room-1", "g").with_timeout(2))
        .await
        .unwrap();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        supervisor.ping("room-1").unwrap();
    }
    assert!(supervisor.contains("room-1"));

    drop(shutdown_tx);
    sweep.await.unwrap();
    supervisor.cleanup_all();
}

#[tokio::test]
async fn test_never_expiring_worker_survives_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path(), 4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = supervisor.spawn_timeout_sweep(shutdown_rx);

    supervisor
        .start(StartRequest::new("forever", "g").with_timeout(-1))
        .await
        .unwrap();
    assert_eq!(supervisor.list()[0].idle_timeout_secs, -1);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(supervisor.contains("forever"));

    shutdown_tx.send(true).unwrap();
    sweep.await.unwrap();
    supervisor.cleanup_all();
}

#[tokio::test]
async fn test_cleanup_all_empties_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(sleeper(dir.path(), 4));

    for channel in ["a", "b", "c"] {
        supervisor.start(StartRequest::new(channel, "g")).await.unwrap();
    }
    let pids: Vec<u32> = supervisor.list().iter().filter_map(|w| w.pid).collect();
    assert_eq!(pids.len(), 3);

    assert_eq!(supervisor.cleanup_all(), 3);
    assert!(supervisor.is_empty());

    #[cfg(target_os = "linux")]
    for pid in pids {
        assert!(wait_until_dead(pid).await);
    }
}
