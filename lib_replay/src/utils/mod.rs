//! # Utilities Module
//!
//! General-purpose helpers that don't belong to any specific engine component.
//!
//! ## Contained Modules:
//!
//! - **`clock`**: wall-clock helpers used to stamp records and push events.

/// Wall-clock helpers.
pub mod clock;

pub use clock::{epoch_millis, local_now};
