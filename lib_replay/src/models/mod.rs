//! # Models
//!
//! Record types replayed by the engine.

/// Wide HTTP page-session sample and its column mapping.
pub mod page_sample;

pub use page_sample::{ColumnSource, FromColumn, PageSample};
