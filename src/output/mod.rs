//! Output formatting module
//!
//! Renders builder results, active job tables and run summaries.

mod formatter;

pub use formatter::{write_builders_to_file, OutputFormat, ResultFormatter};
