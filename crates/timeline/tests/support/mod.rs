#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use zova_timeline::{
    Connectivity, ConversationId, FetchQuery, LiveEvent, LiveEventSource, LiveSubscription,
    Message, MessageId, MessageTransport, TransportError, TransportResult, Viewport,
    ViewportMetrics,
};

pub fn message_id(number: usize) -> MessageId {
    MessageId::new(format!("m{number:03}"))
}

pub fn message(conversation: &str, number: usize) -> Message {
    Message::new(
        message_id(number),
        conversation,
        "tester",
        format!("message {number}"),
    )
}

pub fn messages(conversation: &str, numbers: impl IntoIterator<Item = usize>) -> Vec<Message> {
    numbers
        .into_iter()
        .map(|number| message(conversation, number))
        .collect()
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|message| message.id.as_str().to_string())
        .collect()
}

pub fn id_range(numbers: impl IntoIterator<Item = usize>) -> Vec<String> {
    numbers
        .into_iter()
        .map(|number| message_id(number).as_str().to_string())
        .collect()
}

/// In-memory transport answering fetches from a per-conversation history.
///
/// While holding is switched on, matching fetches park until `release_held`.
pub struct FakeTransport {
    state: Mutex<FakeState>,
    hold_pages: AtomicBool,
    hold_initial: AtomicBool,
    held: AtomicUsize,
    gate: Semaphore,
}

#[derive(Default)]
struct FakeState {
    histories: HashMap<ConversationId, Vec<Message>>,
    connectivity: Option<Connectivity>,
    fail_pages: bool,
    newest_first: bool,
    calls: Vec<(ConversationId, FetchQuery)>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            hold_pages: AtomicBool::new(false),
            hold_initial: AtomicBool::new(false),
            held: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    pub fn with_history(conversation: &str, history: Vec<Message>) -> Arc<Self> {
        let transport = Self::new();
        transport.set_history(conversation, history);
        transport
    }

    pub fn set_history(&self, conversation: &str, mut history: Vec<Message>) {
        history.sort_by(|left, right| left.id.cmp(&right.id));
        self.state
            .lock()
            .histories
            .insert(ConversationId::new(conversation), history);
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        self.state.lock().connectivity = Some(connectivity);
    }

    pub fn fail_pages(&self, fail: bool) {
        self.state.lock().fail_pages = fail;
    }

    /// Returns pages newest first, as some servers do.
    pub fn serve_newest_first(&self) {
        self.state.lock().newest_first = true;
    }

    /// Parks `before` / `after` fetches.
    pub fn hold_pages(&self, hold: bool) {
        self.hold_pages.store(hold, Ordering::SeqCst);
    }

    /// Parks latest / nearby fetches.
    pub fn hold_initial(&self, hold: bool) {
        self.hold_initial.store(hold, Ordering::SeqCst);
    }

    /// Lets every parked fetch continue. Fetches issued later park again while holding is on.
    pub fn release_held(&self) {
        self.gate.add_permits(self.held.swap(0, Ordering::SeqCst));
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(ConversationId, FetchQuery)> {
        self.state.lock().calls.clone()
    }

    pub fn page_calls(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, query)| query.before.is_some() || query.after.is_some())
            .count()
    }

    fn answer(&self, conversation: &ConversationId, query: &FetchQuery) -> TransportResult<Vec<Message>> {
        let state = self.state.lock();
        let is_page = query.before.is_some() || query.after.is_some();
        if is_page && state.fail_pages {
            return Err(TransportError::Request {
                stage: "fake-transport-fetch",
                conversation: conversation.clone(),
                details: "connection reset".to_string(),
            });
        }

        let history = state
            .histories
            .get(conversation)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let limit = query.limit;
        let mut page: Vec<Message> = if let Some(before) = &query.before {
            let older: Vec<_> = history.iter().filter(|m| &m.id < before).collect();
            older[older.len().saturating_sub(limit)..]
                .iter()
                .map(|m| (*m).clone())
                .collect()
        } else if let Some(after) = &query.after {
            history
                .iter()
                .filter(|m| &m.id > after)
                .take(limit)
                .cloned()
                .collect()
        } else if let Some(anchor) = &query.nearby {
            let split = history.partition_point(|m| &m.id <= anchor);
            let leading = limit.div_ceil(2);
            let start = split.saturating_sub(leading);
            let end = (split + limit / 2).min(history.len());
            history[start..end].to_vec()
        } else {
            history[history.len().saturating_sub(limit)..].to_vec()
        };

        if state.newest_first {
            page.reverse();
        }
        Ok(page)
    }
}

impl MessageTransport for FakeTransport {
    fn connectivity(&self) -> Connectivity {
        self.state
            .lock()
            .connectivity
            .unwrap_or(Connectivity::Online)
    }

    fn fetch_messages(
        &self,
        conversation: ConversationId,
        query: FetchQuery,
    ) -> BoxFuture<'_, TransportResult<Vec<Message>>> {
        async move {
            self.state
                .lock()
                .calls
                .push((conversation.clone(), query.clone()));

            let is_page = query.before.is_some() || query.after.is_some();
            let hold = if is_page {
                &self.hold_pages
            } else {
                &self.hold_initial
            };
            if hold.load(Ordering::SeqCst) {
                self.held.fetch_add(1, Ordering::SeqCst);
                self.gate.acquire().await.expect("gate closed").forget();
            }

            self.answer(&conversation, &query)
        }
        .boxed()
    }
}

/// Live source that hands out one channel per subscription.
#[derive(Default)]
pub struct FakeLiveSource {
    senders: Mutex<Vec<(ConversationId, UnboundedSender<LiveEvent>)>>,
}

impl FakeLiveSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivers `event` to every open subscription of its conversation.
    pub fn emit(&self, event: LiveEvent) -> usize {
        let senders = self.senders.lock();
        senders
            .iter()
            .filter(|(conversation, _)| conversation == event.conversation_id())
            .filter(|(_, sender)| sender.send(event.clone()).is_ok())
            .count()
    }

    pub fn open_subscriptions(&self, conversation: &str) -> usize {
        let conversation = ConversationId::new(conversation);
        self.senders
            .lock()
            .iter()
            .filter(|(bound, sender)| bound == &conversation && !sender.is_closed())
            .count()
    }
}

impl LiveEventSource for FakeLiveSource {
    fn subscribe(&self, conversation: &ConversationId) -> LiveSubscription {
        let (sender, subscription) = LiveSubscription::channel(conversation.clone());
        self.senders.lock().push((conversation.clone(), sender));
        subscription
    }
}

/// Viewport with fixed-height rows laid out from the current window.
#[derive(Debug, Default)]
pub struct FakeViewport {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
    pub extents: HashMap<MessageId, f32>,
    pub scrolled_to_bottom: Option<bool>,
    pub centered: Option<MessageId>,
}

impl FakeViewport {
    pub fn laid_out(messages: &[Message], row_height: f32, client_height: f32) -> Self {
        let extents: HashMap<_, _> = messages
            .iter()
            .map(|message| (message.id.clone(), row_height))
            .collect();
        Self {
            scroll_height: row_height * messages.len() as f32,
            client_height,
            extents,
            ..Self::default()
        }
    }

    /// Re-lays out rows after a content change, keeping the scroll offset.
    pub fn relayout(&mut self, messages: &[Message], row_height: f32) {
        self.extents = messages
            .iter()
            .map(|message| (message.id.clone(), row_height))
            .collect();
        self.scroll_height = row_height * messages.len() as f32;
    }
}

impl ViewportMetrics for FakeViewport {
    fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    fn scroll_height(&self) -> f32 {
        self.scroll_height
    }

    fn client_height(&self) -> f32 {
        self.client_height
    }

    fn item_extent(&self, id: &MessageId) -> Option<f32> {
        self.extents.get(id).copied()
    }
}

impl Viewport for FakeViewport {
    fn scroll_to(&mut self, y: f32) {
        self.scroll_top = y;
    }

    fn scroll_to_bottom(&mut self, smooth: bool) {
        self.scroll_top = (self.scroll_height - self.client_height).max(0.0);
        self.scrolled_to_bottom = Some(smooth);
    }

    fn scroll_into_view(&mut self, id: &MessageId) {
        self.centered = Some(id.clone());
    }
}
