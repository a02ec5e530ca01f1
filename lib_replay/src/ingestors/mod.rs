//! # Data Ingestors Module
//!
//! Loaders that turn an external recording into the in-memory record list the
//! replay cursor walks over. The engine only ever sees the result: a loaded,
//! ordered, immutable `Vec<PageSample>`.
//!
//! ## Contained Modules:
//! - **`dataset`**: header-mapped delimited text (`.csv` / `.tsv`) read from a
//!   local path or fetched from an `http(s)://` object URL.

/// Delimited dataset loader.
pub mod dataset;

pub use dataset::{load_all, parse_delimited, Delimiter, IngestError};
