use super::LimiterRegistry;
use std::sync::Weak;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The sweep task panicked or was aborted.
#[derive(Debug, Error)]
#[error("sweep task failed: {0}")]
pub struct SweepShutdownError(#[from] tokio::task::JoinError);

/// Handle to a running sweep task.
///
/// The task holds only a weak reference to its registry and exits on its own
/// once the registry is dropped.
#[derive(Debug)]
pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub(crate) fn spawn(registry: Weak<LimiterRegistry>, every: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.sweep_and_report().await;
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("limiter sweep task stopped");
        });
        Self { stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for it.
    pub async fn shutdown(self) -> Result<(), SweepShutdownError> {
        let _ = self.stop.send(true);
        self.task.await?;
        Ok(())
    }
}
