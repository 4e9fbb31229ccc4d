pub mod binding;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod ids;
pub mod message;
pub mod scroll;
pub mod state;
pub mod store;
pub mod transport;
pub mod viewport;
pub mod window;

pub use binding::TimelineView;
pub use bus::{CommandBus, UiCommand};
pub use config::TimelineConfig;
pub use controller::{JumpOutcome, TimelineController};
pub use error::{LoadDirection, TimelineError, TimelineResult, TransportError, TransportResult};
pub use ids::{ConversationId, MessageId};
pub use message::{Message, MessagePatch};
pub use scroll::{EdgeProximity, ScrollAction, ScrollResolver, ScrollState};
pub use state::{LoadFailure, RenderState};
pub use store::{InitOutcome, LoadOutcome, SkipReason, TimelineStore};
pub use transport::{
    Connectivity, FetchQuery, LiveEvent, LiveEventSource, LiveSubscription, MessageTransport,
};
pub use viewport::{Viewport, ViewportMetrics};
pub use window::{LiveInsert, PageMerge, RenderWindow};
