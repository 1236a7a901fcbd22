//! Deferred tasks - one-shot timers that can be cancelled before they fire.

use civicpulse_env::CivicContext;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A unit of work scheduled to run after a delay.
///
/// Cancellation aborts the underlying task; once [`DeferredTask::cancel`]
/// returns, the work is guaranteed not to start. Work that already started
/// is interrupted at its next suspension point.
pub struct DeferredTask {
    handle: JoinHandle<()>,
}

impl DeferredTask {
    /// Schedules `work` to run `delay` from now on the context's clock.
    pub fn schedule<Ctx, F>(ctx: &Arc<Ctx>, name: &str, delay: Duration, work: F) -> Self
    where
        Ctx: CivicContext,
        F: Future<Output = ()> + Send + 'static,
    {
        let clock = Arc::clone(ctx);
        let handle = ctx.spawn(name, async move {
            clock.sleep(delay).await;
            work.await;
        });
        Self { handle }
    }

    /// Cancels the task. Idempotent.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// The set of deferred tasks owned by one scenario run.
#[derive(Default)]
pub struct TimerSet {
    tasks: Vec<(String, DeferredTask)>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task under a key (used to cancel it individually).
    pub fn insert(&mut self, key: impl Into<String>, task: DeferredTask) {
        self.tasks.push((key.into(), task));
    }

    /// Cancels and forgets the task stored under `key`.
    pub fn cancel(&mut self, key: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|(k, task)| {
            if k == key {
                task.cancel();
                false
            } else {
                true
            }
        });
        before != self.tasks.len()
    }

    /// Cancels every task in the set.
    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain(..) {
            task.cancel();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civicpulse_env::TokioContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_deferred_task_fires_after_delay() {
        let ctx = TokioContext::shared();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let _task = DeferredTask::schedule(&ctx, "t", Duration::from_secs(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_prevents_firing() {
        let ctx = TokioContext::shared();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();

        for i in 0..3u64 {
            let counter = fired.clone();
            timers.insert(
                format!("t{}", i),
                DeferredTask::schedule(&ctx, "t", Duration::from_secs(10 + i), async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert!(timers.cancel("t0"));
        assert!(!timers.cancel("t0"));
        timers.cancel_all();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timers.cancel("t1"));
    }
}
