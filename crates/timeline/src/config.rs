use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_WINDOW: usize = 150;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_ANCHOR_WINDOW: usize = 100;
/// Sub-pixel slack used by the at-top / at-bottom measurements.
pub const DEFAULT_EDGE_EPSILON: f32 = 1.0;
pub const DEFAULT_PAGINATE_THRESHOLD: f32 = 100.0;
/// Lands just below the pagination threshold so a prepend cannot retrigger itself.
pub const DEFAULT_PREPEND_OFFSET_FLOOR: f32 = 101.0;
pub const DEFAULT_BOTTOM_GRACE_MS: u64 = 250;

/// Window bounds and scroll tuning for one timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub max_window: usize,
    pub page_size: usize,
    pub anchor_window: usize,
    pub edge_epsilon: f32,
    pub paginate_threshold: f32,
    pub prepend_offset_floor: f32,
    pub bottom_grace_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_window: DEFAULT_MAX_WINDOW,
            page_size: DEFAULT_PAGE_SIZE,
            anchor_window: DEFAULT_ANCHOR_WINDOW,
            edge_epsilon: DEFAULT_EDGE_EPSILON,
            paginate_threshold: DEFAULT_PAGINATE_THRESHOLD,
            prepend_offset_floor: DEFAULT_PREPEND_OFFSET_FLOOR,
            bottom_grace_ms: DEFAULT_BOTTOM_GRACE_MS,
        }
    }
}

impl TimelineConfig {
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.max_window = self.max_window.max(self.page_size);
        self.anchor_window = self.anchor_window.clamp(1, self.max_window);
        self.edge_epsilon = non_negative(self.edge_epsilon);
        self.paginate_threshold = non_negative(self.paginate_threshold);
        self.prepend_offset_floor = non_negative(self.prepend_offset_floor);
        self
    }

    pub fn bottom_grace(&self) -> Duration {
        Duration::from_millis(self.bottom_grace_ms)
    }
}

fn non_negative(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_window_sizes() {
        let config = TimelineConfig::default();
        assert_eq!(config.max_window, 150);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.anchor_window, 100);
        assert_eq!(config.normalized(), TimelineConfig::default());
    }

    #[test]
    fn normalization_keeps_pages_inside_the_window() {
        let config = TimelineConfig {
            max_window: 10,
            page_size: 0,
            anchor_window: 500,
            edge_epsilon: -3.0,
            paginate_threshold: f32::NAN,
            ..TimelineConfig::default()
        }
        .normalized();

        assert_eq!(config.page_size, 1);
        assert_eq!(config.max_window, 10);
        assert_eq!(config.anchor_window, 10);
        assert_eq!(config.edge_epsilon, 0.0);
        assert_eq!(config.paginate_threshold, 0.0);

        let config = TimelineConfig {
            max_window: 20,
            page_size: 50,
            ..TimelineConfig::default()
        }
        .normalized();
        assert_eq!(config.max_window, 50);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: TimelineConfig =
            serde_json::from_str(r#"{"max_window": 80}"#).unwrap_or_default();
        assert_eq!(config.max_window, 80);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }
}
