//! Cancellable periodic background loops

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a running background loop.
pub struct BackgroundTask {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait for the current tick to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Background task {} panicked: {}", self.name, e);
        }
    }
}

/// `tokio::time::interval` panics on a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Run `tick` every `period` until `parent` (or the returned task) is
/// cancelled. The first tick fires one period after start.
pub fn spawn_periodic<F, Fut>(
    name: impl Into<String>,
    period: Duration,
    parent: &CancellationToken,
    mut tick: F,
) -> BackgroundTask
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    let period = period.max(MIN_PERIOD);
    let token = parent.child_token();
    let loop_token = token.clone();
    let loop_name = name.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        tracing::debug!("Background task {} started (every {:?})", loop_name, period);

        loop {
            if loop_token.is_cancelled() {
                break;
            }
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                _ = ticker.tick() => tick(loop_token.clone()).await,
            }
        }
        tracing::debug!("Background task {} stopped", loop_name);
    });

    BackgroundTask {
        name,
        token,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let parent = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = spawn_periodic("test", Duration::from_secs(10), &parent, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_task() {
        let parent = CancellationToken::new();
        let task = spawn_periodic("test", Duration::from_secs(1), &parent, |_| async {});
        assert_eq!(task.name(), "test");

        parent.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let parent = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = spawn_periodic("zero", Duration::ZERO, &parent, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!task.is_finished());
        assert!(ticks.load(Ordering::SeqCst) >= 1);
        task.stop().await;
    }
}
