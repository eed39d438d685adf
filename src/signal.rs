use tracing::info;

/// Resolves when the process receives a hangup, quit, interrupt or terminate signal. All of them
/// mean the same thing: shut down gracefully.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use futures::future;
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    let kinds = [
        ("SIGHUP", SignalKind::hangup()),
        ("SIGQUIT", SignalKind::quit()),
        ("SIGINT", SignalKind::interrupt()),
        ("SIGTERM", SignalKind::terminate()),
    ];

    let mut signals = Vec::with_capacity(kinds.len());
    for (name, kind) in kinds {
        match signal(kind) {
            Ok(stream) => signals.push((name, stream)),
            Err(e) => error!("Failed to listen for {}: {}", name, e),
        }
    }

    if signals.is_empty() {
        return future::pending().await;
    }

    let received = signals.iter_mut().map(|(name, stream)| {
        Box::pin(async move {
            stream.recv().await;
            *name
        })
    });
    let (name, _, _) = future::select_all(received).await;

    info!("Received {}, shutting down", name);
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received ctrl-c, shutting down");
    }
}
