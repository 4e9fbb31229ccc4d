use std::time::{Duration, Instant};

use crate::config::TimelineConfig;
use crate::ids::MessageId;
use crate::viewport::{Viewport, ViewportMetrics, is_at_bottom, is_at_top};

/// Where the viewport should sit after a content mutation.
///
/// `Free` and `Bottom` are steady states; every other variant is a one-shot
/// directive the resolver consumes after the next layout.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollState {
    Free,
    /// Following the tail. Scroll events before `ignore_until` come from our own
    /// animation and must not be read as the user scrolling away.
    Bottom { ignore_until: Option<Instant> },
    ScrollToBottom { smooth: bool },
    StayAtBottom { smooth: bool },
    ScrollToView { id: MessageId },
    /// Older rows were prepended; shift by the growth in scroll height.
    OffsetTop { previous_height: f32 },
    ScrollTop { y: f32 },
}

impl ScrollState {
    pub fn is_steady(&self) -> bool {
        matches!(self, Self::Free | Self::Bottom { .. })
    }

    fn is_positional(&self) -> bool {
        matches!(
            self,
            Self::ScrollToView { .. } | Self::OffsetTop { .. } | Self::ScrollTop { .. }
        )
    }
}

/// Imperative step taken by [`ScrollResolver::flush`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollAction {
    None,
    ScrollToBottom { smooth: bool },
    ScrollIntoView(MessageId),
    ScrollTo(f32),
}

/// Edge proximity measured on a user scroll, used to decide on pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeProximity {
    pub near_top: bool,
    pub near_bottom: bool,
}

impl EdgeProximity {
    pub fn measure<M: ViewportMetrics + ?Sized>(metrics: &M, threshold: f32) -> Self {
        Self {
            near_top: is_at_top(metrics, threshold),
            near_bottom: is_at_bottom(metrics, threshold),
        }
    }
}

/// Applies scroll directives to a viewport once the view has re-rendered.
pub struct ScrollResolver {
    steady: ScrollState,
    pending: Option<ScrollState>,
    edge_epsilon: f32,
    paginate_threshold: f32,
    offset_floor: f32,
    bottom_grace: Duration,
}

impl ScrollResolver {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            steady: ScrollState::Bottom { ignore_until: None },
            pending: None,
            edge_epsilon: config.edge_epsilon,
            paginate_threshold: config.paginate_threshold,
            offset_floor: config.prepend_offset_floor,
            bottom_grace: config.bottom_grace(),
        }
    }

    /// Current state: the pending directive if any, the steady state otherwise.
    pub fn state(&self) -> &ScrollState {
        self.pending.as_ref().unwrap_or(&self.steady)
    }

    pub fn steady(&self) -> &ScrollState {
        &self.steady
    }

    pub fn is_following_bottom(&self) -> bool {
        matches!(self.steady, ScrollState::Bottom { .. })
    }

    /// Records a directive to run after the next layout.
    pub fn queue(&mut self, directive: ScrollState) {
        if directive.is_steady() {
            self.steady = directive;
            self.pending = None;
            return;
        }

        // A follow hint must not erase position compensation that has not run yet.
        if matches!(directive, ScrollState::StayAtBottom { .. })
            && self.pending.as_ref().is_some_and(ScrollState::is_positional)
        {
            return;
        }

        self.pending = Some(directive);
    }

    /// Runs the pending directive, if any, against post-layout metrics.
    pub fn flush(&mut self, viewport: &mut dyn Viewport, now: Instant) -> ScrollAction {
        let Some(directive) = self.pending.take() else {
            return ScrollAction::None;
        };

        match directive {
            ScrollState::Free | ScrollState::Bottom { .. } => {
                self.steady = directive;
                ScrollAction::None
            }
            ScrollState::ScrollToBottom { smooth } => self.scroll_to_bottom(viewport, smooth, now),
            ScrollState::StayAtBottom { smooth } => {
                if self.is_following_bottom() || is_at_bottom(&*viewport, self.edge_epsilon) {
                    self.scroll_to_bottom(viewport, smooth, now)
                } else {
                    self.steady = ScrollState::Free;
                    ScrollAction::None
                }
            }
            ScrollState::ScrollToView { id } => {
                viewport.scroll_into_view(&id);
                self.steady = ScrollState::Free;
                ScrollAction::ScrollIntoView(id)
            }
            ScrollState::OffsetTop { previous_height } => {
                let delta = viewport.scroll_height() - previous_height;
                let target = (viewport.scroll_top() + delta).max(self.offset_floor);
                viewport.scroll_to(target);
                self.steady = ScrollState::Free;
                ScrollAction::ScrollTo(target)
            }
            ScrollState::ScrollTop { y } => {
                viewport.scroll_to(y);
                self.steady = ScrollState::Free;
                ScrollAction::ScrollTo(y)
            }
        }
    }

    /// Re-derives the steady state from a scroll event and reports edge proximity.
    pub fn on_user_scroll(&mut self, metrics: &dyn ViewportMetrics, now: Instant) -> EdgeProximity {
        let in_grace = matches!(
            self.steady,
            ScrollState::Bottom {
                ignore_until: Some(deadline)
            } if now < deadline
        );

        if !in_grace && self.pending.is_none() {
            self.steady = if is_at_bottom(metrics, self.edge_epsilon) {
                ScrollState::Bottom { ignore_until: None }
            } else {
                ScrollState::Free
            };
        }

        EdgeProximity::measure(metrics, self.paginate_threshold)
    }

    fn scroll_to_bottom(
        &mut self,
        viewport: &mut dyn Viewport,
        smooth: bool,
        now: Instant,
    ) -> ScrollAction {
        viewport.scroll_to_bottom(smooth);
        self.steady = ScrollState::Bottom {
            ignore_until: Some(now + self.bottom_grace),
        };
        ScrollAction::ScrollToBottom { smooth }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeViewport {
        scroll_top: f32,
        scroll_height: f32,
        client_height: f32,
        extents: HashMap<MessageId, f32>,
        centered: Option<MessageId>,
    }

    impl FakeViewport {
        fn new(scroll_top: f32, scroll_height: f32, client_height: f32) -> Self {
            Self {
                scroll_top,
                scroll_height,
                client_height,
                ..Self::default()
            }
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

        fn scroll_to_bottom(&mut self, _smooth: bool) {
            self.scroll_top = (self.scroll_height - self.client_height).max(0.0);
        }

        fn scroll_into_view(&mut self, id: &MessageId) {
            self.centered = Some(id.clone());
        }
    }

    fn resolver() -> ScrollResolver {
        ScrollResolver::new(&TimelineConfig::default())
    }

    #[test]
    fn scroll_to_bottom_pins_with_grace_window() {
        let mut resolver = resolver();
        let mut viewport = FakeViewport::new(0.0, 2_000.0, 500.0);
        let now = Instant::now();

        resolver.queue(ScrollState::ScrollToBottom { smooth: true });
        let action = resolver.flush(&mut viewport, now);

        assert_eq!(action, ScrollAction::ScrollToBottom { smooth: true });
        assert_eq!(viewport.scroll_top, 1_500.0);
        assert!(matches!(
            resolver.state(),
            ScrollState::Bottom {
                ignore_until: Some(deadline)
            } if *deadline > now
        ));
    }

    #[test]
    fn directives_run_exactly_once() {
        let mut resolver = resolver();
        let mut viewport = FakeViewport::new(0.0, 2_000.0, 500.0);
        let now = Instant::now();

        resolver.queue(ScrollState::ScrollTop { y: 320.0 });
        assert_eq!(resolver.flush(&mut viewport, now), ScrollAction::ScrollTo(320.0));
        viewport.scroll_top = 10.0;
        assert_eq!(resolver.flush(&mut viewport, now), ScrollAction::None);
        assert_eq!(viewport.scroll_top, 10.0);
        assert_eq!(resolver.state(), &ScrollState::Free);
    }

    #[test]
    fn offset_top_compensates_height_growth() {
        let mut resolver = resolver();
        let mut viewport = FakeViewport::new(150.0, 3_000.0, 500.0);

        resolver.queue(ScrollState::OffsetTop {
            previous_height: 2_000.0,
        });
        let action = resolver.flush(&mut viewport, Instant::now());

        assert_eq!(action, ScrollAction::ScrollTo(1_150.0));
        assert_eq!(resolver.state(), &ScrollState::Free);
    }

    #[test]
    fn offset_top_is_floored() {
        let mut resolver = resolver();
        let mut viewport = FakeViewport::new(0.0, 2_000.0, 500.0);

        resolver.queue(ScrollState::OffsetTop {
            previous_height: 2_000.0,
        });
        resolver.flush(&mut viewport, Instant::now());

        assert_eq!(viewport.scroll_top, 101.0);
    }

    #[test]
    fn scroll_to_view_centers_target() {
        let mut resolver = resolver();
        let mut viewport = FakeViewport::new(0.0, 2_000.0, 500.0);

        resolver.queue(ScrollState::ScrollToView {
            id: MessageId::new("m500"),
        });
        let action = resolver.flush(&mut viewport, Instant::now());

        assert_eq!(action, ScrollAction::ScrollIntoView(MessageId::new("m500")));
        assert_eq!(viewport.centered, Some(MessageId::new("m500")));
        assert_eq!(resolver.state(), &ScrollState::Free);
    }

    #[test]
    fn stay_at_bottom_follows_only_when_pinned_or_measured_at_bottom() {
        let now = Instant::now();

        let mut pinned = resolver();
        let mut viewport = FakeViewport::new(200.0, 2_000.0, 500.0);
        pinned.queue(ScrollState::StayAtBottom { smooth: false });
        assert_eq!(
            pinned.flush(&mut viewport, now),
            ScrollAction::ScrollToBottom { smooth: false }
        );

        let mut free = resolver();
        free.queue(ScrollState::Free);
        let mut viewport = FakeViewport::new(200.0, 2_000.0, 500.0);
        free.queue(ScrollState::StayAtBottom { smooth: true });
        assert_eq!(free.flush(&mut viewport, now), ScrollAction::None);
        assert_eq!(free.state(), &ScrollState::Free);

        let mut measured = resolver();
        measured.queue(ScrollState::Free);
        let mut viewport = FakeViewport::new(1_499.5, 2_000.0, 500.0);
        measured.queue(ScrollState::StayAtBottom { smooth: true });
        assert_eq!(
            measured.flush(&mut viewport, now),
            ScrollAction::ScrollToBottom { smooth: true }
        );
        assert!(measured.is_following_bottom());
    }

    #[test]
    fn stay_at_bottom_does_not_replace_pending_offset() {
        let mut resolver = resolver();
        resolver.queue(ScrollState::OffsetTop {
            previous_height: 1_000.0,
        });
        resolver.queue(ScrollState::StayAtBottom { smooth: true });

        assert_eq!(
            resolver.state(),
            &ScrollState::OffsetTop {
                previous_height: 1_000.0
            }
        );
    }

    #[test]
    fn user_scroll_is_ignored_during_grace_window() {
        let mut resolver = resolver();
        let mut viewport = FakeViewport::new(0.0, 2_000.0, 500.0);
        let now = Instant::now();
        resolver.queue(ScrollState::ScrollToBottom { smooth: true });
        resolver.flush(&mut viewport, now);

        // Mid-animation position.
        viewport.scroll_top = 700.0;
        resolver.on_user_scroll(&viewport, now + Duration::from_millis(10));
        assert!(resolver.is_following_bottom());

        resolver.on_user_scroll(&viewport, now + Duration::from_secs(1));
        assert_eq!(resolver.state(), &ScrollState::Free);

        viewport.scroll_top = 1_500.0;
        resolver.on_user_scroll(&viewport, now + Duration::from_secs(2));
        assert_eq!(resolver.state(), &ScrollState::Bottom { ignore_until: None });
    }

    #[test]
    fn user_scroll_reports_pagination_edges() {
        let mut resolver = resolver();
        let now = Instant::now();

        let edges = resolver.on_user_scroll(&FakeViewport::new(40.0, 5_000.0, 500.0), now);
        assert_eq!(
            edges,
            EdgeProximity {
                near_top: true,
                near_bottom: false
            }
        );

        let edges = resolver.on_user_scroll(&FakeViewport::new(4_450.0, 5_000.0, 500.0), now);
        assert_eq!(
            edges,
            EdgeProximity {
                near_top: false,
                near_bottom: true
            }
        );
    }
}
