//! Cancellable periodic background tasks.
//!
//! Components that need housekeeping (cache expiry sweep, threshold
//! evaluation, connection reaping) own a [`Worker`]. The task stops when
//! [`Worker::shutdown`] is awaited or when the worker is dropped.

use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior}
};
use tracing::debug;

/// Handle to a spawned periodic task
#[derive(Debug)]
pub struct Worker {
    name:     &'static str,
    shutdown: watch::Sender<bool>,
    handle:   Option<JoinHandle<()>>
}

impl Worker {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first run happens one full period after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
    {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(worker = name, ?period, "background worker started");
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    // only `true` is ever sent; a dropped sender also stops
                    _ = stop.changed() => break
                }
            }
            debug!(worker = name, "background worker stopped");
        });
        Self {
            name,
            shutdown,
            handle: Some(handle)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task and wait for the current tick to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering}
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let worker = Worker::spawn("test", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        worker.shutdown().await;
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
