// src/lib.rs

//! Download the English Indices of Deprivation spreadsheet and load it into
//! a local DuckDB database: one schema per source file, one table per
//! non-notes worksheet.

pub mod duck;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod sheets;

pub use error::{ErrorKind, LoaderError};
pub use pipeline::{load, load_with_progress, LoadOptions, Progress, ProgressIter};
