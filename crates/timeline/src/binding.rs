use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

use crate::scroll::{ScrollResolver, ScrollState};
use crate::state::RenderState;

/// Read side handed to the view layer: render snapshots plus scroll directives.
pub struct TimelineView {
    state: watch::Receiver<Arc<RenderState>>,
    scroll: broadcast::Receiver<ScrollState>,
}

impl TimelineView {
    pub(crate) fn new(
        state: watch::Receiver<Arc<RenderState>>,
        scroll: broadcast::Receiver<ScrollState>,
    ) -> Self {
        Self { state, scroll }
    }

    pub fn current(&self) -> Arc<RenderState> {
        self.state.borrow().clone()
    }

    /// Waits for the next published snapshot. `None` once the timeline is gone.
    pub async fn changed(&mut self) -> Option<Arc<RenderState>> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    pub fn try_next_scroll(&mut self) -> Option<ScrollState> {
        loop {
            match self.scroll.try_recv() {
                Ok(directive) => return Some(directive),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "scroll directives lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub async fn next_scroll(&mut self) -> Option<ScrollState> {
        loop {
            match self.scroll.recv().await {
                Ok(directive) => return Some(directive),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "scroll directives lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Queues every directive received so far on `resolver`; returns how many.
    pub fn drain_scroll(&mut self, resolver: &mut ScrollResolver) -> usize {
        let mut queued = 0;
        while let Some(directive) = self.try_next_scroll() {
            resolver.queue(directive);
            queued += 1;
        }
        queued
    }
}
