use crate::ids::MessageId;
use crate::message::Message;

/// Read-only layout measurements of the scrollable message list.
///
/// Values are only meaningful after the view has laid out the latest snapshot.
pub trait ViewportMetrics {
    fn scroll_top(&self) -> f32;
    fn scroll_height(&self) -> f32;
    fn client_height(&self) -> f32;
    /// Rendered height of one message row, top margin included.
    fn item_extent(&self, id: &MessageId) -> Option<f32>;
}

/// Imperative side of the viewport, driven by the scroll resolver.
pub trait Viewport: ViewportMetrics {
    fn scroll_to(&mut self, y: f32);
    fn scroll_to_bottom(&mut self, smooth: bool);
    /// Centers the row for `id` in the viewport.
    fn scroll_into_view(&mut self, id: &MessageId);
}

pub fn distance_to_bottom<M: ViewportMetrics + ?Sized>(metrics: &M) -> f32 {
    metrics.scroll_height() - metrics.scroll_top() - metrics.client_height()
}

pub fn is_at_bottom<M: ViewportMetrics + ?Sized>(metrics: &M, epsilon: f32) -> bool {
    distance_to_bottom(metrics) <= epsilon
}

pub fn is_at_top<M: ViewportMetrics + ?Sized>(metrics: &M, epsilon: f32) -> bool {
    metrics.scroll_top() <= epsilon
}

/// Sums the rendered extent of `messages`; rows that are not rendered count as zero.
pub fn extent_of<M: ViewportMetrics + ?Sized>(metrics: &M, messages: &[Message]) -> f32 {
    messages
        .iter()
        .filter_map(|message| metrics.item_extent(&message.id))
        .sum()
}
