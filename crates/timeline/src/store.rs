use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::config::TimelineConfig;
use crate::error::{LoadDirection, TimelineError, TimelineResult, TransportResult};
use crate::ids::{ConversationId, MessageId};
use crate::message::{Message, MessagePatch};
use crate::scroll::ScrollState;
use crate::state::{LoadFailure, RenderState};
use crate::transport::{FetchQuery, MessageTransport};
use crate::viewport::{ViewportMetrics, extent_of};
use crate::window::{LiveInsert, RenderWindow};

const SCROLL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Rendered,
    Empty,
    WaitingForNetwork,
    /// A newer `init` replaced this one while its fetch was in flight.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRendering,
    AtEdge,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { fetched: usize },
    Skipped(SkipReason),
    /// The conversation or generation changed while the fetch was in flight.
    Discarded,
}

/// The windowed message cache for the currently bound conversation.
///
/// Cloning yields another handle to the same store. All mutations run to
/// completion under the lock; the lock is never held across a fetch.
#[derive(Clone)]
pub struct TimelineStore {
    shared: Arc<StoreShared>,
}

struct StoreShared {
    transport: Arc<dyn MessageTransport>,
    config: TimelineConfig,
    inner: Mutex<StoreInner>,
    state_tx: watch::Sender<Arc<RenderState>>,
    scroll_tx: broadcast::Sender<ScrollState>,
}

struct StoreInner {
    conversation: Option<ConversationId>,
    // Bumped by every init; completions from an older generation are stale.
    generation: u64,
    state: Arc<RenderState>,
    loading_top: bool,
    loading_bottom: bool,
}

/// Identity captured when an async fetch is issued.
#[derive(Debug, Clone)]
struct Ticket {
    conversation: ConversationId,
    generation: u64,
}

impl StoreInner {
    fn matches(&self, ticket: &Ticket) -> bool {
        self.generation == ticket.generation
            && self.conversation.as_ref() == Some(&ticket.conversation)
    }

    fn in_flight(&mut self, direction: LoadDirection) -> &mut bool {
        match direction {
            LoadDirection::Top => &mut self.loading_top,
            LoadDirection::Bottom => &mut self.loading_bottom,
        }
    }
}

/// Holds one direction's reentrancy flag until dropped.
struct LoadGuard {
    shared: Arc<StoreShared>,
    direction: LoadDirection,
    generation: u64,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        // A re-init already reset the flags for its own generation.
        if inner.generation == self.generation {
            *inner.in_flight(self.direction) = false;
        }
    }
}

impl TimelineStore {
    pub fn new(transport: Arc<dyn MessageTransport>, config: TimelineConfig) -> Self {
        let state = Arc::new(RenderState::Loading);
        let (state_tx, _) = watch::channel(state.clone());
        let (scroll_tx, _) = broadcast::channel(SCROLL_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(StoreShared {
                transport,
                config: config.normalized(),
                inner: Mutex::new(StoreInner {
                    conversation: None,
                    generation: 0,
                    state,
                    loading_top: false,
                    loading_bottom: false,
                }),
                state_tx,
                scroll_tx,
            }),
        }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.shared.config
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        self.shared.inner.lock().conversation.clone()
    }

    pub fn state(&self) -> Arc<RenderState> {
        self.shared.inner.lock().state.clone()
    }

    pub fn is_loading(&self, direction: LoadDirection) -> bool {
        *self.shared.inner.lock().in_flight(direction)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<RenderState>> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_scroll(&self) -> broadcast::Receiver<ScrollState> {
        self.shared.scroll_tx.subscribe()
    }

    pub fn emit_scroll(&self, directive: ScrollState) {
        // Nobody listening just means no view is mounted.
        let _ = self.shared.scroll_tx.send(directive);
    }

    /// Replaces the window with a fresh fetch for `conversation`.
    ///
    /// With an `anchor`, the window is centered on that message and both edges are
    /// left open; otherwise the newest page is loaded and pinned to the bottom.
    pub async fn init(
        &self,
        conversation: ConversationId,
        anchor: Option<MessageId>,
    ) -> InitOutcome {
        let ticket = {
            let mut inner = self.shared.inner.lock();
            self.begin_generation(&mut inner, conversation)
        };
        self.load_initial(ticket, anchor).await
    }

    /// Fetches the latest window when `conversation` is bound and shows `Empty`.
    ///
    /// The check and the generation bump happen under one lock, so a concurrent
    /// switch to another conversation always wins. `None` means nothing was reloaded.
    pub async fn reload_if_empty(&self, conversation: &ConversationId) -> Option<InitOutcome> {
        let ticket = {
            let mut inner = self.shared.inner.lock();
            if inner.conversation.as_ref() != Some(conversation)
                || !matches!(*inner.state, RenderState::Empty)
            {
                return None;
            }
            self.begin_generation(&mut inner, conversation.clone())
        };

        tracing::info!(
            conversation = %ticket.conversation,
            "first message in an empty conversation; fetching latest window"
        );
        Some(self.load_initial(ticket, None).await)
    }

    async fn load_initial(&self, ticket: Ticket, anchor: Option<MessageId>) -> InitOutcome {
        let connectivity = self.shared.transport.connectivity();
        if !connectivity.can_fetch() {
            tracing::info!(
                conversation = %ticket.conversation,
                ?connectivity,
                "client offline; waiting for network"
            );
            let mut inner = self.shared.inner.lock();
            if !inner.matches(&ticket) {
                return InitOutcome::Discarded;
            }
            self.replace_state(&mut inner, RenderState::WaitingForNetwork);
            return InitOutcome::WaitingForNetwork;
        }

        let config = &self.shared.config;
        let query = match &anchor {
            Some(id) => FetchQuery::nearby(id.clone(), config.anchor_window),
            None => FetchQuery::latest(config.page_size),
        };
        let result = self
            .shared
            .transport
            .fetch_messages(ticket.conversation.clone(), query)
            .await;

        let mut inner = self.shared.inner.lock();
        if !inner.matches(&ticket) {
            tracing::debug!(
                conversation = %ticket.conversation,
                generation = ticket.generation,
                "discarding superseded initial fetch"
            );
            return InitOutcome::Discarded;
        }

        let page = match result {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(
                    conversation = %ticket.conversation,
                    error = %error,
                    "initial fetch failed; waiting for network"
                );
                self.replace_state(&mut inner, RenderState::WaitingForNetwork);
                return InitOutcome::WaitingForNetwork;
            }
        };

        let (window, directive) = match anchor {
            Some(id) => (
                RenderWindow::around(page, config.max_window),
                ScrollState::ScrollToView { id },
            ),
            None => (
                RenderWindow::latest(page, config.page_size, config.max_window),
                ScrollState::ScrollToBottom { smooth: false },
            ),
        };

        let Some(window) = window else {
            tracing::info!(conversation = %ticket.conversation, "conversation is empty");
            self.replace_state(&mut inner, RenderState::Empty);
            return InitOutcome::Empty;
        };

        tracing::info!(
            conversation = %ticket.conversation,
            generation = ticket.generation,
            loaded = window.len(),
            at_top = window.at_top(),
            at_bottom = window.at_bottom(),
            "timeline window initialized"
        );
        self.replace_state(&mut inner, RenderState::Render(window));
        self.emit_scroll(directive);
        InitOutcome::Rendered
    }

    /// Loads the page of messages before the window's first message.
    ///
    /// Scroll compensation is derived from `viewport`. Without one the window is still
    /// merged but no directive is broadcast; the caller owns the scroll position then.
    pub async fn load_top(
        &self,
        viewport: Option<&dyn ViewportMetrics>,
    ) -> TimelineResult<LoadOutcome> {
        self.load_page(LoadDirection::Top, viewport).await
    }

    /// Loads the page of messages after the window's last message.
    ///
    /// Like [`load_top`](Self::load_top), broadcasts no directive without a viewport.
    pub async fn load_bottom(
        &self,
        viewport: Option<&dyn ViewportMetrics>,
    ) -> TimelineResult<LoadOutcome> {
        self.load_page(LoadDirection::Bottom, viewport).await
    }

    /// Applies a live-pushed message. Only a window showing the newest messages accepts it.
    pub fn receive(&self, message: Message) -> bool {
        let max_window = self.shared.config.max_window;
        let mut inner = self.shared.inner.lock();
        if inner.conversation.as_ref() != Some(&message.conversation_id) {
            return false;
        }

        match inner.state.window() {
            Some(window) if window.at_bottom() && !window.contains(&message.id) => {}
            _ => return false,
        }

        let Some(window) = Arc::make_mut(&mut inner.state).window_mut() else {
            return false;
        };
        let id = message.id.clone();
        match window.insert_live(message, max_window) {
            LiveInsert::Duplicate => return false,
            LiveInsert::OutsideWindow => {
                tracing::debug!(
                    message = %id,
                    "live message precedes unloaded history; left to pagination"
                );
                return false;
            }
            LiveInsert::Inserted {
                out_of_order,
                evicted,
            } => {
                if out_of_order {
                    tracing::debug!(message = %id, "live message arrived out of order");
                }
                if !evicted.is_empty() {
                    tracing::debug!(evicted = evicted.len(), "window cap reached on live insert");
                }
            }
        }

        self.notify(&inner);
        self.emit_scroll(ScrollState::StayAtBottom { smooth: true });
        true
    }

    pub fn edit(&self, conversation: &ConversationId, id: &MessageId, patch: &MessagePatch) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.conversation.as_ref() != Some(conversation)
            || !inner.state.window().is_some_and(|window| window.contains(id))
        {
            return false;
        }

        let edited = Arc::make_mut(&mut inner.state)
            .window_mut()
            .is_some_and(|window| window.edit(id, patch));
        if edited {
            self.notify(&inner);
        }
        edited
    }

    pub fn delete(&self, conversation: &ConversationId, id: &MessageId) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.conversation.as_ref() != Some(conversation)
            || !inner.state.window().is_some_and(|window| window.contains(id))
        {
            return false;
        }

        let Some(window) = Arc::make_mut(&mut inner.state).window_mut() else {
            return false;
        };
        if !window.remove(id) {
            return false;
        }

        if window.is_empty() {
            self.replace_state(&mut inner, RenderState::Empty);
        } else {
            self.notify(&inner);
        }
        self.emit_scroll(ScrollState::StayAtBottom { smooth: false });
        true
    }

    async fn load_page(
        &self,
        direction: LoadDirection,
        viewport: Option<&dyn ViewportMetrics>,
    ) -> TimelineResult<LoadOutcome> {
        let page_size = self.shared.config.page_size;
        let (ticket, query, guard) = {
            let mut inner = self.shared.inner.lock();
            let Some(conversation) = inner.conversation.clone() else {
                return Ok(LoadOutcome::Skipped(SkipReason::NotRendering));
            };
            let Some(window) = inner.state.window() else {
                return Ok(LoadOutcome::Skipped(SkipReason::NotRendering));
            };

            let (edge_reached, cursor) = match direction {
                LoadDirection::Top => (window.at_top(), window.first_id().cloned()),
                LoadDirection::Bottom => (window.at_bottom(), window.last_id().cloned()),
            };
            if edge_reached {
                return Ok(LoadOutcome::Skipped(SkipReason::AtEdge));
            }
            let Some(cursor) = cursor else {
                return Ok(LoadOutcome::Skipped(SkipReason::NotRendering));
            };

            let in_flight = inner.in_flight(direction);
            if *in_flight {
                tracing::debug!(direction = direction.as_str(), "page load already in flight");
                return Ok(LoadOutcome::Skipped(SkipReason::InFlight));
            }
            *in_flight = true;

            let query = match direction {
                LoadDirection::Top => FetchQuery::before(cursor, page_size),
                LoadDirection::Bottom => FetchQuery::after(cursor, page_size),
            };
            let ticket = Ticket {
                conversation,
                generation: inner.generation,
            };
            let guard = LoadGuard {
                shared: self.shared.clone(),
                direction,
                generation: ticket.generation,
            };
            (ticket, query, guard)
        };

        let result = self
            .shared
            .transport
            .fetch_messages(ticket.conversation.clone(), query)
            .await;
        let outcome = self.apply_page(&ticket, direction, result, viewport);

        // Released only once the page is applied and published.
        drop(guard);
        outcome
    }

    fn apply_page(
        &self,
        ticket: &Ticket,
        direction: LoadDirection,
        result: TransportResult<Vec<Message>>,
        viewport: Option<&dyn ViewportMetrics>,
    ) -> TimelineResult<LoadOutcome> {
        let config = &self.shared.config;
        let mut inner = self.shared.inner.lock();
        if !inner.matches(ticket) || inner.state.window().is_none() {
            tracing::debug!(
                conversation = %ticket.conversation,
                direction = direction.as_str(),
                "discarding stale page"
            );
            return Ok(LoadOutcome::Discarded);
        }

        let page = match result {
            Ok(page) => page,
            Err(source) => {
                tracing::warn!(
                    conversation = %ticket.conversation,
                    direction = direction.as_str(),
                    error = %source,
                    "page load failed; window kept"
                );
                if let Some(window) = Arc::make_mut(&mut inner.state).window_mut() {
                    window.set_load_error(Some(LoadFailure {
                        direction,
                        message: source.to_string(),
                    }));
                }
                self.notify(&inner);
                return Err(TimelineError::Pagination {
                    stage: "apply-page-fetch",
                    direction,
                    source,
                });
            }
        };

        let fetched = page.len();
        let Some(window) = Arc::make_mut(&mut inner.state).window_mut() else {
            return Ok(LoadOutcome::Discarded);
        };
        let merge = match direction {
            LoadDirection::Top => window.prepend_page(page, config.page_size, config.max_window),
            LoadDirection::Bottom => window.append_page(page, config.page_size, config.max_window),
        };
        if window
            .load_error()
            .is_some_and(|failure| failure.direction == direction)
        {
            window.set_load_error(None);
        }

        // Metrics still describe the pre-mutation layout, so evicted rows are measurable.
        // No metrics, no directive.
        let directive = viewport.map(|metrics| {
            let evicted_extent = extent_of(metrics, &merge.evicted);
            match direction {
                LoadDirection::Top => ScrollState::OffsetTop {
                    previous_height: metrics.scroll_height() - evicted_extent,
                },
                LoadDirection::Bottom => ScrollState::ScrollTop {
                    y: (metrics.scroll_top() - evicted_extent).max(0.0),
                },
            }
        });

        tracing::debug!(
            conversation = %ticket.conversation,
            direction = direction.as_str(),
            fetched,
            added = merge.added,
            evicted = merge.evicted.len(),
            at_top = window.at_top(),
            at_bottom = window.at_bottom(),
            "page applied"
        );

        self.notify(&inner);
        if let Some(directive) = directive {
            self.emit_scroll(directive);
        }
        Ok(LoadOutcome::Applied { fetched })
    }

    fn begin_generation(&self, inner: &mut StoreInner, conversation: ConversationId) -> Ticket {
        inner.generation = inner.generation.wrapping_add(1);
        inner.conversation = Some(conversation.clone());
        inner.loading_top = false;
        inner.loading_bottom = false;
        self.replace_state(inner, RenderState::Loading);
        Ticket {
            conversation,
            generation: inner.generation,
        }
    }

    fn replace_state(&self, inner: &mut StoreInner, state: RenderState) {
        inner.state = Arc::new(state);
        self.notify(inner);
    }

    fn notify(&self, inner: &StoreInner) {
        self.shared.state_tx.send_replace(inner.state.clone());
    }
}
