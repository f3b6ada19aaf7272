//! Live-call polling loop
//!
//! [`LiveCallFeed`] owns the exposed live-call lists. A loop started with
//! [`LiveCallFeed::start`] fetches a fresh snapshot on every tick and swaps it
//! in atomically; readers always get a whole snapshot as an `Arc`.
//!
//! Failure handling per tick:
//!
//! - the business identifier cannot be resolved: error recorded, lists
//!   emptied, resolution retried on the next tick
//! - the fetch fails: error recorded, previous lists kept
//!
//! Neither stops the loop. Ticks never overlap because the fetch is awaited
//! inside the loop and missed ticks are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::model::{LiveCall, LiveCallSnapshot};
use crate::error::PollError;
use crate::events::{ClientEvent, EventEmitter};

/// Resolves the operator's business identifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BusinessIdentity: Send + Sync {
    /// The identifier used to parameterize the live-call query
    async fn business_id(&self) -> Result<String, PollError>;
}

/// Fetches one live-call snapshot for a business
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveCallFetcher: Send + Sync {
    /// Fetch the live and logical call lists
    async fn fetch(&self, business_id: &str) -> Result<LiveCallSnapshot, PollError>;
}

#[derive(Debug, Default)]
struct FeedState {
    live_calls: Arc<Vec<LiveCall>>,
    logical_calls: Arc<Vec<LiveCall>>,
    fetched_at: Option<DateTime<Utc>>,
    last_error: Option<PollError>,
}

/// Latest live-call lists plus the loop that refreshes them
pub struct LiveCallFeed {
    identity: Arc<dyn BusinessIdentity>,
    events: EventEmitter,
    business_id: tokio::sync::Mutex<Option<String>>,
    state: RwLock<FeedState>,
}

impl LiveCallFeed {
    /// Create a feed with empty lists
    pub fn new(identity: Arc<dyn BusinessIdentity>, events: EventEmitter) -> Self {
        Self {
            identity,
            events,
            business_id: tokio::sync::Mutex::new(None),
            state: RwLock::new(FeedState::default()),
        }
    }

    /// Start polling; the first tick runs immediately
    ///
    /// Dropping or cancelling the returned handle stops the loop.
    pub fn start(self: &Arc<Self>, poll_interval: Duration, fetcher: Arc<dyn LiveCallFetcher>) -> FeedHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let feed = self.clone();
        let flag = cancelled.clone();

        info!("Starting live-call feed every {:?}", poll_interval);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                // Errors are recorded and published by poll
                let _ = feed.poll(fetcher.as_ref(), Some(&flag)).await;
            }
            debug!("Live-call feed loop finished");
        });

        FeedHandle {
            feed: self.clone(),
            cancelled,
            task: Mutex::new(Some(task)),
        }
    }

    /// Run one poll outside the loop
    pub async fn refresh(&self, fetcher: &dyn LiveCallFetcher) -> Result<(), PollError> {
        self.poll(fetcher, None).await
    }

    /// Current live calls
    pub fn live_calls(&self) -> Arc<Vec<LiveCall>> {
        self.state.read().live_calls.clone()
    }

    /// Current logical calls
    pub fn logical_calls(&self) -> Arc<Vec<LiveCall>> {
        self.state.read().logical_calls.clone()
    }

    /// When the exposed lists were fetched
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().fetched_at
    }

    /// Error of the most recent tick, cleared by the next success
    pub fn last_error(&self) -> Option<PollError> {
        self.state.read().last_error.clone()
    }

    /// Look up a live call by channel or list key
    pub fn find(&self, channel: &str) -> Option<LiveCall> {
        self.state
            .read()
            .live_calls
            .iter()
            .find(|call| call.channel == channel || call.key() == channel)
            .cloned()
    }

    /// The cached business identifier, if already resolved
    pub async fn cached_business_id(&self) -> Option<String> {
        self.business_id.lock().await.clone()
    }

    async fn resolve_business_id(&self) -> Result<String, PollError> {
        let mut cached = self.business_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let id = self.identity.business_id().await?;
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(PollError::IdentityUnavailable("empty business identifier".into()));
        }
        info!("Resolved business identifier {}", id);
        *cached = Some(id.clone());
        Ok(id)
    }

    async fn poll(&self, fetcher: &dyn LiveCallFetcher, cancelled: Option<&AtomicBool>) -> Result<(), PollError> {
        let business_id = match self.resolve_business_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("Live-call poll skipped: {}", e);
                let published = self.publish(cancelled, |state| {
                    state.live_calls = Arc::new(Vec::new());
                    state.logical_calls = Arc::new(Vec::new());
                    state.last_error = Some(e.clone());
                });
                if published {
                    self.events.emit(ClientEvent::LiveCallPollFailed { error: e.clone() });
                }
                return Err(e);
            }
        };

        match fetcher.fetch(&business_id).await {
            Ok(snapshot) => {
                let live_calls = Arc::new(snapshot.live_calls);
                let logical_calls = Arc::new(snapshot.logical_calls);
                let fetched_at = snapshot.fetched_at;
                let published = self.publish(cancelled, |state| {
                    state.live_calls = live_calls.clone();
                    state.logical_calls = logical_calls.clone();
                    state.fetched_at = Some(fetched_at);
                    state.last_error = None;
                });
                if published {
                    debug!("Live calls updated: {} live, {} logical", live_calls.len(), logical_calls.len());
                    self.events.emit(ClientEvent::LiveCallsUpdated {
                        live_calls,
                        logical_calls,
                        fetched_at,
                    });
                }
                Ok(())
            }
            Err(e) => {
                warn!("Live-call fetch failed, keeping previous snapshot: {}", e);
                let published = self.publish(cancelled, |state| state.last_error = Some(e.clone()));
                if published {
                    self.events.emit(ClientEvent::LiveCallPollFailed { error: e.clone() });
                }
                Err(e)
            }
        }
    }

    /// Apply `update` unless the loop was cancelled; the check and the write share one lock
    fn publish(&self, cancelled: Option<&AtomicBool>, update: impl FnOnce(&mut FeedState)) -> bool {
        let mut state = self.state.write();
        if cancelled.is_some_and(|flag| flag.load(Ordering::Acquire)) {
            debug!("Discarding poll result after cancel");
            return false;
        }
        update(&mut state);
        true
    }
}

/// Cancels a running feed loop
pub struct FeedHandle {
    feed: Arc<LiveCallFeed>,
    cancelled: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandle {
    /// Stop future ticks; an in-flight tick will not publish
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        {
            let _state = self.feed.state.write();
            self.cancelled.store(true, Ordering::Release);
        }
        if let Some(task) = self.task.lock().take() {
            debug!("Cancelling live-call feed");
            task.abort();
        }
    }

    /// Whether [`cancel`](Self::cancel) has run
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(channels: &[&str]) -> LiveCallSnapshot {
        LiveCallSnapshot {
            live_calls: channels.iter().map(|c| LiveCall::new(*c, "")).collect(),
            logical_calls: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    fn identity(id: &'static str) -> Arc<dyn BusinessIdentity> {
        let mut mock = MockBusinessIdentity::new();
        mock.expect_business_id().times(1).returning(move || Ok(id.to_string()));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_snapshot() {
        let feed = LiveCallFeed::new(identity("biz-1"), EventEmitter::default());
        let calls = AtomicUsize::new(0);

        let mut fetcher = MockLiveCallFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|id| id == "biz-1")
            .times(3)
            .returning(move |_| match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(snapshot(&["PJSIP/205-1"])),
                1 => Err(PollError::Status { status: 502 }),
                _ => Ok(snapshot(&["PJSIP/206-2", "PJSIP/207-3"])),
            });

        feed.refresh(&fetcher).await.expect("tick 1");
        let after_first = feed.live_calls();

        assert_eq!(feed.refresh(&fetcher).await, Err(PollError::Status { status: 502 }));
        assert_eq!(feed.live_calls(), after_first);
        assert_eq!(feed.last_error(), Some(PollError::Status { status: 502 }));

        feed.refresh(&fetcher).await.expect("tick 3");
        assert_eq!(feed.live_calls().len(), 2);
        assert_eq!(feed.last_error(), None);
    }

    #[tokio::test]
    async fn test_unresolved_identity_yields_empty_lists_and_retries() {
        let mut mock = MockBusinessIdentity::new();
        let attempts = AtomicUsize::new(0);
        mock.expect_business_id().times(2).returning(move || {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PollError::IdentityUnavailable("no session".into()))
            } else {
                Ok("biz-9".into())
            }
        });
        let feed = LiveCallFeed::new(Arc::new(mock), EventEmitter::default());

        let mut fetcher = MockLiveCallFetcher::new();
        fetcher.expect_fetch().times(2).returning(|_| Ok(snapshot(&["c1"])));

        let err = feed.refresh(&fetcher).await.unwrap_err();
        assert!(matches!(err, PollError::IdentityUnavailable(_)));
        assert!(feed.live_calls().is_empty());

        feed.refresh(&fetcher).await.expect("resolved on retry");
        feed.refresh(&fetcher).await.expect("cached identity");
        assert_eq!(feed.cached_business_id().await.as_deref(), Some("biz-9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_cancelled() {
        let feed = Arc::new(LiveCallFeed::new(identity("biz-1"), EventEmitter::default()));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        let mut fetcher = MockLiveCallFetcher::new();
        fetcher.expect_fetch().returning(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(snapshot(&["c1"]))
        });

        let handle = feed.start(Duration::from_millis(5000), Arc::new(fetcher));
        tokio::time::sleep(Duration::from_millis(10_001)).await;
        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected at least two ticks, saw {}", ticks);

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test]
    async fn test_publish_after_cancel_is_discarded() {
        let feed = LiveCallFeed::new(identity("biz-1"), EventEmitter::default());
        let cancelled = AtomicBool::new(true);

        let mut fetcher = MockLiveCallFetcher::new();
        fetcher.expect_fetch().returning(|_| Ok(snapshot(&["late"])));

        feed.poll(&fetcher, Some(&cancelled)).await.expect("fetch itself succeeds");
        assert!(feed.live_calls().is_empty());
        assert!(feed.fetched_at().is_none());
    }
}
