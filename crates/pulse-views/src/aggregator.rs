//! The view batch aggregator and its flush worker.

use crate::config::ViewConfig;
use pulse_api::ApiClient;
use pulse_cache::{CacheKey, EntityValue, StructuredCache};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

struct PendingView {
    content_id: String,
    enqueued_at: Instant,
}

struct QueueState {
    /// Every id ever enqueued this session: pending, in flight, flushed,
    /// or dropped. Membership makes enqueue a no-op.
    seen: HashSet<String>,
    /// Ids awaiting a flush, oldest first.
    pending: Vec<PendingView>,
    /// Failed-flush counts per id.
    retries: HashMap<String, u32>,
}

struct Inner {
    config: ViewConfig,
    api: Arc<dyn ApiClient>,
    cache: Arc<StructuredCache>,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Batches view reports: one entry per content id per session, flushed on a
/// size threshold or an oldest-entry deadline, whichever comes first.
#[derive(Clone)]
pub struct ViewAggregator {
    inner: Arc<Inner>,
}

impl ViewAggregator {
    pub fn new(config: ViewConfig, api: Arc<dyn ApiClient>, cache: Arc<StructuredCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                cache,
                state: Mutex::new(QueueState {
                    seen: HashSet::new(),
                    pending: Vec::new(),
                    retries: HashMap::new(),
                }),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Record a view of a piece of content. Ids already seen this session
    /// are ignored; the local view count bumps immediately on first sight.
    pub fn enqueue(&self, content_id: &str) {
        {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            if !state.seen.insert(content_id.to_string()) {
                debug!(content_id, "View already recorded this session");
                return;
            }
            state.pending.push(PendingView {
                content_id: content_id.to_string(),
                enqueued_at: Instant::now(),
            });
        }

        // View counts are this component's slice of the post entry.
        let _ = self.inner.cache.update(&CacheKey::post(content_id), |value| {
            if let EntityValue::Post(post) = value {
                post.views_count += 1;
            }
        });

        self.inner.notify.notify_one();
    }

    /// Number of ids currently awaiting a flush.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().expect("lock poisoned").pending.len()
    }

    /// Spawn the flush worker. One worker per aggregator.
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Pushed forward after a failed flush so retries honor the delay
            // window even while the queue sits at or above the threshold.
            let mut not_before = Instant::now();
            loop {
                if inner.shutdown.load(Ordering::SeqCst) {
                    // Final drain so shutdown loses nothing already queued.
                    // Remerged failures keep this bounded by the retry budget.
                    while !inner.state.lock().expect("lock poisoned").pending.is_empty() {
                        Inner::flush(&inner).await;
                    }
                    break;
                }

                let (pending_len, deadline) = {
                    let state = inner.state.lock().expect("lock poisoned");
                    let deadline = state.pending.first().map(|oldest| {
                        oldest.enqueued_at + Duration::from_millis(inner.config.max_delay_ms)
                    });
                    (state.pending.len(), deadline)
                };

                if pending_len >= inner.config.batch_threshold && Instant::now() >= not_before {
                    if !Inner::flush(&inner).await {
                        not_before =
                            Instant::now() + Duration::from_millis(inner.config.max_delay_ms);
                    }
                    continue;
                }

                match deadline {
                    Some(deadline) => {
                        let wake_at = deadline.max(not_before);
                        tokio::select! {
                            _ = inner.notify.notified() => {}
                            _ = sleep_until(wake_at) => {
                                if !Inner::flush(&inner).await {
                                    not_before = Instant::now()
                                        + Duration::from_millis(inner.config.max_delay_ms);
                                }
                            }
                        }
                    }
                    None => inner.notify.notified().await,
                }
            }
        })
    }

    /// Stop the worker after a final drain of anything still pending.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }
}

impl Inner {
    /// Send pending ids as one write, at most one full batch per flush.
    /// Failed ids re-merge with a bumped retry count; an id over budget is
    /// dropped for the session. Returns whether the write succeeded.
    async fn flush(inner: &Arc<Inner>) -> bool {
        let ids: Vec<String> = {
            let mut state = inner.state.lock().expect("lock poisoned");
            let take = state.pending.len().min(inner.config.batch_threshold);
            state
                .pending
                .drain(..take)
                .map(|view| view.content_id)
                .collect()
        };
        if ids.is_empty() {
            return true;
        }

        debug!(count = ids.len(), "Flushing view batch");
        let result = if ids.len() == 1 {
            inner.api.report_view(&ids[0]).await
        } else {
            inner.api.report_views_batch(&ids).await
        };

        match result {
            Ok(()) => {
                let mut state = inner.state.lock().expect("lock poisoned");
                for id in &ids {
                    state.retries.remove(id);
                }
                true
            }
            Err(e) => {
                warn!(error = %e, count = ids.len(), "View flush failed");
                Self::remerge(inner, ids);
                false
            }
        }
    }

    fn remerge(inner: &Arc<Inner>, ids: Vec<String>) {
        let mut state = inner.state.lock().expect("lock poisoned");
        let now = Instant::now();
        // Failed ids go back to the front so the next flush re-covers them;
        // the fresh timestamp makes the delay window double as retry spacing.
        let mut requeued = Vec::new();
        for id in ids {
            let retries = state.retries.entry(id.clone()).or_insert(0);
            *retries += 1;
            if *retries > inner.config.max_retries {
                // Non-critical data: drop silently. The id stays in the
                // seen set, so it can never re-enter.
                debug!(content_id = %id, "View dropped after retry budget");
                state.retries.remove(&id);
                continue;
            }
            requeued.push(PendingView {
                content_id: id,
                enqueued_at: now,
            });
        }
        let tail = std::mem::take(&mut state.pending);
        state.pending = requeued;
        state.pending.extend(tail);
    }
}
