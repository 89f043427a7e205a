use std::time::Duration;

use tokio::task::JoinHandle;

/// A cancellable one-shot action. Scheduling again replaces the pending one.
#[derive(Default)]
pub struct DeferredAction {
    pending: Option<JoinHandle<()>>,
}

impl DeferredAction {
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rescheduling_restarts_the_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut action = DeferredAction::default();

        let counter = fired.clone();
        action.schedule(Duration::from_secs(3), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        let counter = fired.clone();
        action.schedule(Duration::from_secs(3), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(action.is_pending());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!action.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_action_never_runs() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut action = DeferredAction::default();
        let counter = fired.clone();
        action.schedule(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        action.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
