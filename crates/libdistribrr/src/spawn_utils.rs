use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error};

/// Spawns a background task that logs how it finished instead of panicking
/// the process.
pub fn spawn(
    span: tracing::Span,
    fut: impl Future<Output = anyhow::Result<()>> + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn(
        async move {
            match fut.await {
                Ok(()) => debug!("finished"),
                Err(e) => error!("finished with error: {e:#}"),
            }
        }
        .instrument(span),
    )
}

pub fn spawn_with_cancel(
    span: tracing::Span,
    cancellation_token: CancellationToken,
    fut: impl Future<Output = anyhow::Result<()>> + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    spawn(span, async move {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!("task cancelled");
                Ok(())
            },
            r = fut => r
        }
    })
}
