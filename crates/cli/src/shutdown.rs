use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Returns a token that is cancelled on SIGINT or SIGTERM. The dispatcher
/// checks it between jobs, so `serve` stops cleanly and never mid-job.
pub fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint() => "SIGINT",
            _ = sigterm() => "SIGTERM",
        };
        info!("{name} received, stopping after the current job");
        on_signal.cancel();
    });
    token
}

async fn sigint() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "SIGINT handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn sigterm() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
