use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::common::ChatResult;
use crate::network::ChatApi;

/// Polls the online-users snapshot and answers "is this email online?".
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    api: Arc<dyn ChatApi>,
    online: RwLock<Arc<HashSet<String>>>,
    /// Bumped by `stop`, so polls that complete afterwards are dropped.
    generation: AtomicU64,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                api,
                online: RwLock::new(Arc::new(HashSet::new())),
                generation: AtomicU64::new(0),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Fetches a full snapshot and swaps it in whole. Returns the online count.
    pub async fn refresh(&self) -> ChatResult<usize> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let emails = self.inner.api.online_users().await?;

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            log::debug!("Discarding presence snapshot from a stopped poller");
            return Ok(self.online_count());
        }
        let snapshot: HashSet<String> = emails.into_iter().collect();
        let count = snapshot.len();
        *self.inner.online.write() = Arc::new(snapshot);
        Ok(count)
    }

    /// Polls immediately, then every `interval`, until `stop`.
    pub fn start(&self, interval: Duration) {
        self.stop();
        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match tracker.refresh().await {
                    Ok(count) => log::debug!("{count} user(s) online"),
                    Err(err) => log::warn!("Presence poll failed, keeping last snapshot: {err}"),
                }
            }
        });
        *self.inner.poller.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.inner.poller.lock().take() {
            handle.abort();
        }
    }

    pub fn is_online(&self, email: &str) -> bool {
        self.inner.online.read().contains(email)
    }

    pub fn online_count(&self) -> usize {
        self.inner.online.read().len()
    }

    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        self.inner.online.read().clone()
    }
}
