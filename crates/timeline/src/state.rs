use crate::error::LoadDirection;
use crate::window::RenderWindow;

/// What the message list should currently show.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RenderState {
    #[default]
    Loading,
    WaitingForNetwork,
    /// The conversation has no messages at all.
    Empty,
    Render(RenderWindow),
}

impl RenderState {
    pub fn window(&self) -> Option<&RenderWindow> {
        match self {
            Self::Render(window) => Some(window),
            Self::Loading | Self::WaitingForNetwork | Self::Empty => None,
        }
    }

    pub(crate) fn window_mut(&mut self) -> Option<&mut RenderWindow> {
        match self {
            Self::Render(window) => Some(window),
            Self::Loading | Self::WaitingForNetwork | Self::Empty => None,
        }
    }

    pub fn is_at_bottom(&self) -> bool {
        self.window().is_some_and(RenderWindow::at_bottom)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::WaitingForNetwork => "waiting_for_network",
            Self::Empty => "empty",
            Self::Render(_) => "render",
        }
    }
}

/// Retryable pagination failure kept next to the window it failed to extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub direction: LoadDirection,
    pub message: String,
}
