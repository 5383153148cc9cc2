use tokio::signal;

/// Resolve on Ctrl+C or SIGTERM, whichever comes first.
///
/// A handler that fails to install is logged and never fires; the other
/// one still triggers shutdown.
pub async fn shutdown_signal() {
    tokio::select! {
        () = wait_ctrl_c() => {}
        () = wait_sigterm() => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}

async fn wait_ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(%e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received Ctrl+C");
}

#[cfg(unix)]
async fn wait_sigterm() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut handler) => {
            handler.recv().await;
            tracing::info!("received SIGTERM");
        }
        Err(e) => {
            tracing::error!(%e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_sigterm() {
    std::future::pending::<()>().await;
}
