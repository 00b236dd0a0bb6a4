//! Trailing-edge debouncer.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Runs an action once a burst of triggers has been quiet for `delay`.
///
/// Every trigger restarts the wait. Triggers that arrive while the action
/// is running start a new window after it finishes. Dropping the debouncer
/// aborts its task; an armed but unfired action is discarded.
#[derive(Debug)]
pub struct Debouncer {
    trigger: mpsc::UnboundedSender<()>,
    /// Triggers sent but not yet consumed by a run.
    queued: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Debouncer {
    pub fn spawn<F, Fut>(delay: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (trigger, mut rx) = mpsc::unbounded_channel::<()>();
        let queued = Arc::new(AtomicUsize::new(0));
        let task_queued = queued.clone();

        let task = tokio::spawn(async move {
            // Idle until the first trigger of a burst.
            while rx.recv().await.is_some() {
                let mut consumed = 1;
                loop {
                    tokio::select! {
                        msg = rx.recv() => match msg {
                            Some(()) => consumed += 1,
                            None => return,
                        },
                        _ = tokio::time::sleep(delay) => break,
                    }
                }
                // Triggers that raced the timer ride along with this run.
                while rx.try_recv().is_ok() {
                    consumed += 1;
                }
                task_queued.fetch_sub(consumed, Ordering::SeqCst);
                action().await;
            }
        });

        Self {
            trigger,
            queued,
            task,
        }
    }

    /// Arms (or re-arms) the timer.
    pub fn trigger(&self) {
        // Counted before sending so the task never consumes an uncounted trigger.
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.trigger.send(()).is_err() {
            // Task is gone; nothing will ever consume this one.
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// True while a trigger is waiting for its quiet period.
    pub fn is_pending(&self) -> bool {
        self.queued.load(Ordering::SeqCst) > 0
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(delay: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let debouncer = Debouncer::spawn(delay, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (debouncer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once() {
        let (debouncer, fired) = counting(Duration::from_millis(500));

        for _ in 0..10 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (debouncer, fired) = counting(Duration::from_millis(500));

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(700)).await;
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_run_stays_pending() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let debouncer = Debouncer::spawn(Duration::from_millis(500), move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(600)).await;
        // First run is in progress; a new edit arrives.
        assert!(!debouncer.is_pending());
        debouncer.trigger();
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pending_count_settles_after_concurrent_triggers() {
        let (debouncer, fired) = counting(Duration::from_millis(1));
        let debouncer = Arc::new(debouncer);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let debouncer = debouncer.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    debouncer.trigger();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while debouncer.is_pending() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("every trigger should be consumed");
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_discards_pending_action() {
        let (debouncer, fired) = counting(Duration::from_millis(500));

        debouncer.trigger();
        drop(debouncer);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
