//! Trailing-edge debouncing for lookups and searches

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::trace;
use tokio::task::JoinHandle;

/// Runs only the last call made within `delay` of the previous one.
///
/// Each call bumps a generation counter; a pending call fires only if no
/// newer call replaced it while it slept.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task`, superseding any call still waiting. The returned
    /// handle resolves to `None` when the call was superseded or cancelled.
    pub fn call<F, R>(&self, task: F) -> JoinHandle<Option<R>>
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) != ticket {
                trace!("Debounced call {} superseded", ticket);
                return None;
            }
            Some(task.await)
        })
    }

    /// Drop whatever call is waiting.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_only_last_call_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for code in ["7", "75", "750100000001"] {
            let runs = runs.clone();
            handles.push(debouncer.call(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                code
            }));
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results, vec![None, None, Some("750100000001")]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let first = debouncer.call(async { 1 });
        tokio::time::advance(Duration::from_millis(301)).await;
        assert_eq!(first.await.unwrap(), Some(1));
        let second = debouncer.call(async { 2 });
        assert_eq!(second.await.unwrap(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let pending = debouncer.call(async { "never" });
        debouncer.cancel();
        assert_eq!(pending.await.unwrap(), None);

        let pending = debouncer.call(async { "never" });
        drop(debouncer);
        assert_eq!(pending.await.unwrap(), None);
    }
}
