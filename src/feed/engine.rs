use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::observable::Observable;
use super::search::filter_items;
use super::types::{
    FeedEvent, Item, ItemsChange, ItemsUpdate, Lane, LaneState, PageCursor, SearchResults,
};
use crate::remote::{FetchError, PageSource, DEFAULT_TIMEOUT_SECS};
use crate::util::catch_task_panic;

/// Retries after the first failed attempt of an accepted trigger.
const MAX_RETRIES: u32 = 1;
/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

/// Tunables for [`FeedEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Items requested per page; a shorter page means the end was reached.
    pub page_size: usize,
    /// Upper bound on a single `fetch_page` call.
    pub request_timeout: Duration,
    /// Pause before the single retry. Zero retries immediately.
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_delay: Duration::from_millis(250),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Mutable feed state. Only ever touched under `Inner::state`.
struct FeedState {
    items: Arc<Vec<Item>>,
    cursor: PageCursor,
    has_more: bool,
    /// Bumped each time a load/reload result is merged. A completion whose
    /// trigger saw an older epoch was computed against a list that has been
    /// replaced since.
    epoch: u64,
    revision: u64,
    load: LaneState,
    reload: LaneState,
    load_more: LaneState,
}

impl FeedState {
    fn new(page_size: usize) -> Self {
        Self {
            items: Arc::new(Vec::new()),
            cursor: PageCursor::first(page_size),
            has_more: true,
            epoch: 0,
            revision: 0,
            load: LaneState::Idle,
            reload: LaneState::Idle,
            load_more: LaneState::Idle,
        }
    }

    fn lane(&self, lane: Lane) -> &LaneState {
        match lane {
            Lane::Load => &self.load,
            Lane::Reload => &self.reload,
            Lane::LoadMore => &self.load_more,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut LaneState {
        match lane {
            Lane::Load => &mut self.load,
            Lane::Reload => &mut self.reload,
            Lane::LoadMore => &mut self.load_more,
        }
    }

    /// Gate for load-more; the reason is only used for logging.
    fn load_more_blocker(&self) -> Option<&'static str> {
        if self.items.is_empty() {
            Some("no items loaded")
        } else if self.load.is_in_flight() {
            Some("load in flight")
        } else if self.reload.is_in_flight() {
            Some("reload in flight")
        } else if !self.has_more {
            Some("no more pages")
        } else if self.load_more.is_in_flight() {
            Some("load_more in flight")
        } else {
            None
        }
    }
}

/// Everything the engine publishes. Owned by `Inner`, so the engine is the
/// single writer of each observable.
struct Outputs {
    items: Observable<ItemsUpdate>,
    search_results: Observable<SearchResults>,
    load: Observable<LaneState>,
    reload: Observable<LaneState>,
    load_more: Observable<LaneState>,
    last_error: Observable<Option<FetchError>>,
    events: broadcast::Sender<FeedEvent>,
}

impl Outputs {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            items: Observable::new(ItemsUpdate::default()),
            search_results: Observable::new(SearchResults::default()),
            load: Observable::new(LaneState::Idle),
            reload: Observable::new(LaneState::Idle),
            load_more: Observable::new(LaneState::Idle),
            last_error: Observable::new(None),
            events,
        }
    }

    fn lane(&self, lane: Lane) -> &Observable<LaneState> {
        match lane {
            Lane::Load => &self.load,
            Lane::Reload => &self.reload,
            Lane::LoadMore => &self.load_more,
        }
    }

    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine; the observables still carry the state.
        let _ = self.events.send(event);
    }
}

struct Inner {
    source: Arc<dyn PageSource>,
    config: EngineConfig,
    state: Mutex<FeedState>,
    outputs: Outputs,
    searches_issued: AtomicU64,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, FeedState> {
        // State is only replaced wholesale field by field, so a poisoned
        // guard still holds a consistent value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition a lane while holding the state lock, so the observable
    /// never disagrees with the gate.
    fn set_lane(&self, state: &mut FeedState, lane: Lane, next: LaneState) {
        *state.lane_mut(lane) = next.clone();
        self.outputs.lane(lane).set(next);
    }

    fn publish_items(&self, state: &mut FeedState, change: ItemsChange) {
        state.revision += 1;
        self.outputs.items.set(ItemsUpdate {
            items: Arc::clone(&state.items),
            change,
            revision: state.revision,
        });
    }

    /// Fetch one page, retrying once. Each attempt is bounded by the
    /// request timeout.
    async fn fetch_with_retry(&self, lane: Lane, page: u32) -> Result<Vec<Item>, FetchError> {
        let page_size = self.config.page_size;
        let mut retry_count = 0;

        loop {
            let attempt = tokio::time::timeout(
                self.config.request_timeout,
                self.source.fetch_page(page, page_size),
            )
            .await
            .unwrap_or(Err(FetchError::Timeout));

            match attempt {
                Ok(items) => return Ok(items),
                Err(e) if retry_count < MAX_RETRIES => {
                    tracing::warn!(
                        lane = %lane,
                        page,
                        error = %e,
                        retry = retry_count + 1,
                        "Page fetch failed, retrying"
                    );
                    if !self.config.retry_delay.is_zero() {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&self, state: &mut FeedState, lane: Lane, error: FetchError) {
        tracing::warn!(lane = %lane, error = %error, "Page fetch failed after retry");
        self.set_lane(state, lane, LaneState::Failed(error.clone()));
        self.outputs.last_error.set(Some(error.clone()));
        self.outputs.emit(FeedEvent::Failed { lane, error });
    }

    /// Merge the result of a load or reload.
    fn finish_replace(&self, lane: Lane, epoch: u64, result: Result<Vec<Item>, FetchError>) {
        let mut state = self.lock_state();

        let page = match result {
            Ok(page) => page,
            Err(e) => return self.fail(&mut state, lane, e),
        };

        if state.epoch != epoch {
            tracing::debug!(lane = %lane, epoch, current = state.epoch, "Discarding page, list replaced since trigger");
            self.set_lane(&mut state, lane, LaneState::Idle);
            self.outputs.emit(FeedEvent::Superseded { lane });
            return;
        }

        let count = page.len();
        state.epoch += 1;
        state.has_more = count == self.config.page_size;
        state.cursor = PageCursor::first(self.config.page_size);
        state.items = Arc::new(page);
        self.publish_items(&mut state, ItemsChange::Replaced);
        self.outputs.emit(FeedEvent::Replaced { lane, count });
        self.set_lane(&mut state, lane, LaneState::Idle);

        tracing::debug!(lane = %lane, count, has_more = state.has_more, "Items replaced");
    }

    /// Merge the result of a load-more for `page`.
    fn finish_append(&self, epoch: u64, page: u32, result: Result<Vec<Item>, FetchError>) {
        let mut state = self.lock_state();

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => return self.fail(&mut state, Lane::LoadMore, e),
        };

        if state.epoch != epoch {
            tracing::debug!(page, epoch, current = state.epoch, "Discarding page fetched for a replaced list");
            self.set_lane(&mut state, Lane::LoadMore, LaneState::Idle);
            self.outputs.emit(FeedEvent::Superseded {
                lane: Lane::LoadMore,
            });
            return;
        }

        let old_count = state.items.len();
        let fetched_count = fetched.len();
        let mut items = Vec::with_capacity(old_count + fetched_count);
        items.extend_from_slice(&state.items);
        items.extend(fetched);
        let range = old_count..items.len();

        state.cursor.page = page;
        state.has_more = fetched_count == self.config.page_size;
        state.items = Arc::new(items);
        self.publish_items(
            &mut state,
            ItemsChange::Appended {
                range: range.clone(),
            },
        );
        self.outputs.emit(FeedEvent::Appended {
            range: range.clone(),
        });
        self.set_lane(&mut state, Lane::LoadMore, LaneState::Idle);

        tracing::debug!(
            page,
            appended = fetched_count,
            total = range.end,
            has_more = state.has_more,
            "Items appended"
        );
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Paginated feed orchestration.
///
/// Owns the page cursor, the accumulated item list and one state per
/// request lane. Triggers return immediately: an accepted trigger spawns its
/// fetch on the current Tokio runtime and returns the task handle, a
/// rejected one returns `None` and changes nothing.
///
/// Gating (checked atomically with the flag transition):
/// - `load` is dropped while a load is in flight
/// - `reload` is dropped while a reload is in flight, regardless of other lanes
/// - `load_more` needs loaded items, more pages, and no load/reload/load-more in flight
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct FeedEngine {
    inner: Arc<Inner>,
}

impl FeedEngine {
    pub fn new(source: Arc<dyn PageSource>, config: EngineConfig) -> Self {
        let page_size = config.page_size.max(1);
        let config = EngineConfig {
            page_size,
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(FeedState::new(page_size)),
                outputs: Outputs::new(),
                searches_issued: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    /// Fetch page 1 and replace the list. Dropped while a load is in flight.
    ///
    /// `has_more` is reset when the trigger is accepted; the cursor is reset
    /// only when the page merges, so a failed load leaves it where it was.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn load(&self) -> Option<JoinHandle<()>> {
        self.start_replace(Lane::Load)
    }

    /// Pull-to-refresh: fetch page 1 and replace the list.
    ///
    /// Only gated by its own lane, so it may run alongside a load or a
    /// load-more. A result is discarded only if another load or reload
    /// merged while it was in flight.
    pub fn reload(&self) -> Option<JoinHandle<()>> {
        self.start_replace(Lane::Reload)
    }

    /// Fetch the next page and append it.
    pub fn load_more(&self) -> Option<JoinHandle<()>> {
        let (page, epoch) = {
            let mut state = self.inner.lock_state();
            if let Some(reason) = state.load_more_blocker() {
                tracing::debug!(reason, "load_more dropped");
                return None;
            }
            let page = state.cursor.next_page();
            self.inner.set_lane(&mut state, Lane::LoadMore, LaneState::InFlight);
            (page, state.epoch)
        };

        self.inner.outputs.emit(FeedEvent::Started {
            lane: Lane::LoadMore,
            page,
        });
        tracing::debug!(page, "load_more accepted");

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let result = catch_task_panic(inner.fetch_with_retry(Lane::LoadMore, page))
                .await
                .unwrap_or_else(|panic| Err(FetchError::Unknown(format!("fetch task panicked: {panic}"))));
            inner.finish_append(epoch, page, result);
        }))
    }

    /// Filter the last emitted items by `query` and publish the result.
    ///
    /// The snapshot is read when the filter runs, not when `search` is
    /// called. Results of a query are never published after those of a
    /// later query.
    pub fn search(&self, query: impl Into<String>) -> JoinHandle<()> {
        let query = query.into();
        let generation = self.inner.searches_issued.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let snapshot = inner.outputs.items.get().items;
            let needle = query.clone();
            let filtered =
                match tokio::task::spawn_blocking(move || filter_items(&snapshot, &needle)).await {
                    Ok(filtered) => filtered,
                    Err(e) => {
                        tracing::warn!(error = %e, generation, "Search task failed");
                        return;
                    }
                };

            let count = filtered.len();
            let published = inner.outputs.search_results.update_if(|current| {
                if generation <= current.generation {
                    return false;
                }
                *current = SearchResults {
                    generation,
                    query,
                    items: Arc::new(filtered),
                };
                true
            });

            if published {
                tracing::debug!(generation, results = count, "Search results published");
            } else {
                tracing::debug!(generation, "Discarding stale search results");
            }
        })
    }

    fn start_replace(&self, lane: Lane) -> Option<JoinHandle<()>> {
        let epoch = {
            let mut state = self.inner.lock_state();
            if state.lane(lane).is_in_flight() {
                tracing::debug!(lane = %lane, "Trigger dropped, already in flight");
                return None;
            }
            state.has_more = true;
            self.inner.set_lane(&mut state, lane, LaneState::InFlight);
            state.epoch
        };

        self.inner.outputs.emit(FeedEvent::Started { lane, page: 1 });
        tracing::debug!(lane = %lane, epoch, "Trigger accepted");

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let result = catch_task_panic(inner.fetch_with_retry(lane, 1))
                .await
                .unwrap_or_else(|panic| Err(FetchError::Unknown(format!("fetch task panicked: {panic}"))));
            inner.finish_replace(lane, epoch, result);
        }))
    }

    // ------------------------------------------------------------------------
    // Current values
    // ------------------------------------------------------------------------

    /// The last emitted item list.
    pub fn items(&self) -> Arc<Vec<Item>> {
        self.inner.outputs.items.get().items
    }

    pub fn search_results(&self) -> SearchResults {
        self.inner.outputs.search_results.get()
    }

    pub fn lane_state(&self, lane: Lane) -> LaneState {
        self.inner.lock_state().lane(lane).clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lane_state(Lane::Load).is_in_flight()
    }

    pub fn is_reloading(&self) -> bool {
        self.lane_state(Lane::Reload).is_in_flight()
    }

    pub fn is_loading_more(&self) -> bool {
        self.lane_state(Lane::LoadMore).is_in_flight()
    }

    pub fn has_more(&self) -> bool {
        self.inner.lock_state().has_more
    }

    pub fn cursor(&self) -> PageCursor {
        self.inner.lock_state().cursor
    }

    pub fn last_error(&self) -> Option<FetchError> {
        self.inner.outputs.last_error.get()
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    pub fn subscribe_items(&self) -> watch::Receiver<ItemsUpdate> {
        self.inner.outputs.items.subscribe()
    }

    pub fn subscribe_search_results(&self) -> watch::Receiver<SearchResults> {
        self.inner.outputs.search_results.subscribe()
    }

    pub fn subscribe_lane(&self, lane: Lane) -> watch::Receiver<LaneState> {
        self.inner.outputs.lane(lane).subscribe()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<FetchError>> {
        self.inner.outputs.last_error.subscribe()
    }

    /// Every event from now on. Lagging receivers lose the oldest events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.outputs.events.subscribe()
    }
}
