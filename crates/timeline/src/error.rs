use snafu::Snafu;

use crate::ids::ConversationId;

/// Which edge of the window a pagination request extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadDirection {
    Top,
    Bottom,
}

impl LoadDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }
}

/// Failure reported by a [`crate::MessageTransport`] implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("transport is offline on `{stage}`"))]
    Offline { stage: &'static str },
    #[snafu(display("fetch for conversation '{conversation}' failed on `{stage}`: {details}"))]
    Request {
        stage: &'static str,
        conversation: ConversationId,
        details: String,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TimelineError {
    #[snafu(display(
        "loading {} page failed on `{stage}`: {source}",
        direction.as_str()
    ))]
    Pagination {
        stage: &'static str,
        direction: LoadDirection,
        source: TransportError,
    },
}

pub type TimelineResult<T> = Result<T, TimelineError>;
