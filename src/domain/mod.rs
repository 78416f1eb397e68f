//! Domain module - rules, events and the error taxonomy
//!
//! Pure data and validation. Nothing in here performs I/O.

pub mod duration_format;
pub mod errors;
pub mod events;
pub mod rule;

// Re-export commonly used items
pub use errors::{MonitorError, MonitorResult};
pub use events::{Event, EventKind};
pub use rule::{ExtractorKind, HttpMethod, MonitorRule, RuleStatus, MIN_INTERVAL};
