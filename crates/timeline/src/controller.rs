use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::binding::TimelineView;
use crate::bus::UiCommand;
use crate::config::TimelineConfig;
use crate::error::TimelineResult;
use crate::ids::{ConversationId, MessageId};
use crate::scroll::{EdgeProximity, ScrollState};
use crate::state::RenderState;
use crate::store::{InitOutcome, LoadOutcome, TimelineStore};
use crate::transport::{Connectivity, LiveEvent, LiveEventSource, LiveSubscription, MessageTransport};
use crate::viewport::ViewportMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpOutcome {
    /// The window already holds the newest messages; only a scroll was emitted.
    Scrolled,
    Reloaded(InitOutcome),
    Unbound,
}

/// Owns the single active timeline and its live-event binding.
///
/// Cloning yields another handle to the same controller. Dropping the last handle
/// stops the live-event pump.
#[derive(Clone)]
pub struct TimelineController {
    shared: Arc<ControllerShared>,
}

struct ControllerShared {
    store: TimelineStore,
    live_source: Arc<dyn LiveEventSource>,
    binding: Mutex<Binding>,
    stale: AtomicBool,
}

enum Binding {
    Unbound,
    Bound {
        conversation: ConversationId,
        pump: JoinHandle<()>,
    },
}

impl Drop for ControllerShared {
    fn drop(&mut self) {
        if let Binding::Bound { pump, .. } = &*self.binding.get_mut() {
            pump.abort();
        }
    }
}

impl TimelineController {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        live_source: Arc<dyn LiveEventSource>,
        config: TimelineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                store: TimelineStore::new(transport, config),
                live_source,
                binding: Mutex::new(Binding::Unbound),
                stale: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> &TimelineStore {
        &self.shared.store
    }

    pub fn config(&self) -> &TimelineConfig {
        self.shared.store.config()
    }

    pub fn bound_conversation(&self) -> Option<ConversationId> {
        match &*self.shared.binding.lock() {
            Binding::Unbound => None,
            Binding::Bound { conversation, .. } => Some(conversation.clone()),
        }
    }

    pub fn state(&self) -> Arc<RenderState> {
        self.shared.store.state()
    }

    pub fn subscribe(&self) -> TimelineView {
        TimelineView::new(
            self.shared.store.subscribe_state(),
            self.shared.store.subscribe_scroll(),
        )
    }

    /// Binds `conversation` and loads its initial window.
    ///
    /// Switching conversations stops the previous live-event pump before the new
    /// subscription is opened. Re-initializing the bound conversation keeps its pump.
    pub async fn init(&self, conversation: ConversationId, anchor: Option<MessageId>) -> InitOutcome {
        self.bind(&conversation);
        self.shared.stale.store(false, Ordering::SeqCst);
        self.shared.store.init(conversation, anchor).await
    }

    pub async fn load_top(
        &self,
        viewport: Option<&dyn ViewportMetrics>,
    ) -> TimelineResult<LoadOutcome> {
        self.shared.store.load_top(viewport).await
    }

    pub async fn load_bottom(
        &self,
        viewport: Option<&dyn ViewportMetrics>,
    ) -> TimelineResult<LoadOutcome> {
        self.shared.store.load_bottom(viewport).await
    }

    /// Applies one live event to the bound timeline. Returns whether the state changed.
    pub async fn apply_live_event(&self, event: LiveEvent) -> bool {
        apply_live_event(&self.shared.store, event).await
    }

    pub fn mark_stale(&self) {
        if !self.shared.stale.swap(true, Ordering::SeqCst) {
            tracing::info!(
                conversation = ?self.bound_conversation(),
                "timeline marked stale"
            );
        }
    }

    pub fn is_stale(&self) -> bool {
        self.shared.stale.load(Ordering::SeqCst)
    }

    /// Re-runs `init` for the bound conversation if it was marked stale.
    pub async fn reload_stale(&self) -> bool {
        let Some(conversation) = self.bound_conversation() else {
            return false;
        };
        if !self.shared.stale.swap(false, Ordering::SeqCst) {
            return false;
        }

        tracing::info!(conversation = %conversation, "reloading stale timeline");
        self.init(conversation, None).await;
        true
    }

    pub async fn on_connectivity_changed(&self, connectivity: Connectivity) {
        match connectivity {
            Connectivity::Offline => self.mark_stale(),
            Connectivity::Online => {
                self.reload_stale().await;
            }
            Connectivity::Connecting => {}
        }
    }

    pub async fn jump_to_bottom(&self, smooth: bool) -> JumpOutcome {
        let Some(conversation) = self.bound_conversation() else {
            return JumpOutcome::Unbound;
        };

        if self.shared.store.state().is_at_bottom() {
            self.shared
                .store
                .emit_scroll(ScrollState::ScrollToBottom { smooth });
            return JumpOutcome::Scrolled;
        }

        // Whatever is offscreen may be arbitrarily old; fetch the newest window instead.
        JumpOutcome::Reloaded(self.init(conversation, None).await)
    }

    /// Paginates toward whichever edge the viewport is within the threshold of.
    ///
    /// Returns `Ok(None)` when neither open edge is close enough to load.
    pub async fn on_viewport_scrolled(
        &self,
        metrics: &dyn ViewportMetrics,
    ) -> TimelineResult<Option<LoadOutcome>> {
        let proximity = EdgeProximity::measure(metrics, self.config().paginate_threshold);
        let (top_open, bottom_open) = match self.shared.store.state().window() {
            Some(window) => (!window.at_top(), !window.at_bottom()),
            None => return Ok(None),
        };

        if proximity.near_top && top_open {
            return self.load_top(Some(metrics)).await.map(Some);
        }
        if proximity.near_bottom && bottom_open {
            return self.load_bottom(Some(metrics)).await.map(Some);
        }
        Ok(None)
    }

    pub async fn handle_command(&self, command: UiCommand) {
        tracing::debug!(?command, "handling ui command");
        match command {
            UiCommand::JumpToBottom { smooth } => {
                self.jump_to_bottom(smooth).await;
            }
            UiCommand::MarkAsStale => self.mark_stale(),
            UiCommand::ReloadStale => {
                self.reload_stale().await;
            }
        }
    }

    /// Handles bus commands until every publisher is gone.
    pub async fn run_commands(&self, mut commands: broadcast::Receiver<UiCommand>) {
        loop {
            match commands.recv().await {
                Ok(command) => self.handle_command(command).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "command receiver lagged; continuing");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    fn bind(&self, conversation: &ConversationId) {
        let mut binding = self.shared.binding.lock();
        if let Binding::Bound {
            conversation: bound,
            pump,
        } = &*binding
        {
            if bound == conversation && !pump.is_finished() {
                return;
            }
            pump.abort();
            tracing::info!(from = %bound, to = %conversation, "switching conversation");
        } else {
            tracing::info!(conversation = %conversation, "binding conversation");
        }

        let subscription = self.shared.live_source.subscribe(conversation);
        let pump = spawn_live_pump(self.shared.store.clone(), subscription);
        *binding = Binding::Bound {
            conversation: conversation.clone(),
            pump,
        };
    }
}

fn spawn_live_pump(store: TimelineStore, mut subscription: LiveSubscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            apply_live_event(&store, event).await;
        }
        tracing::debug!(
            conversation = %subscription.conversation(),
            "live subscription closed"
        );
    })
}

async fn apply_live_event(store: &TimelineStore, event: LiveEvent) -> bool {
    match event {
        LiveEvent::MessageCreated(message) => {
            if let Some(outcome) = store.reload_if_empty(&message.conversation_id).await {
                return outcome == InitOutcome::Rendered;
            }
            store.receive(message)
        }
        LiveEvent::MessageUpdated {
            conversation_id,
            id,
            patch,
        } => store.edit(&conversation_id, &id, &patch),
        LiveEvent::MessageDeleted {
            conversation_id,
            id,
        } => store.delete(&conversation_id, &id),
    }
}
