// src/cli/serve.rs
// Supervisor main loop: control requests on stdin, sweep in the background

use anyhow::Result;
use graph_host::config::HostConfig;
use graph_host::control::serve_stream;
use graph_host::supervisor::WorkerSupervisor;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run_serve(config: HostConfig) -> Result<()> {
    let supervisor = WorkerSupervisor::new(config.supervisor.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = supervisor.spawn_timeout_sweep(shutdown_rx);

    info!(
        max_workers = config.supervisor.max_workers,
        ports = %format!("{}-{}", config.supervisor.port_min, config.supervisor.port_max),
        worker_bin = %config.supervisor.worker_bin,
        "Supervisor ready, reading control requests from stdin"
    );

    tokio::select! {
        result = serve_stream(tokio::io::stdin(), tokio::io::stdout(), &supervisor) => {
            match result {
                Ok(()) => info!("Control input closed"),
                Err(e) => warn!(error = %e, "Control stream failed"),
            }
        }
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep.await {
        warn!(error = %e, "Timeout sweep task failed");
    }

    supervisor.cleanup_all();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
