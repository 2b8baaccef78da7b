//! SeaORM entity models for the signal store.

pub mod pipeline_run;
pub mod signal;
pub mod signal_processing;
pub mod signal_type;
pub mod suppression_entry;

pub use signal_type::{SignalType, ALL_SIGNAL_TYPES};
