pub mod history;
pub mod settings;

pub use history::{HistoryError, HistoryResult, LocalHistory};
pub use settings::{ReplaySettings, SettingsError, SettingsStore};
