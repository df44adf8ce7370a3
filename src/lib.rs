//! # docmerge
//!
//! Mail-merge for paginated documents: every CSV record is rendered through
//! a Tera template and written as its own document, at a path computed from
//! the record.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docmerge::{Config, Merger};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .data_path("people.csv")
//!     .template_path("templates/letter.html")
//!     .output_pattern("out/{row[last_name]}-{row_number:03}.pdf")
//!     .build()?;
//!
//! let stats = Merger::new(config)?.run()?;
//! stats.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Records**: CSV rows read lazily, header first
//! 2. **Template**: loaded once, auto-escaped, rendered per record with
//!    `row` and `row_number`
//! 3. **Output path**: the pattern is filled with sanitized field values
//! 4. **Document**: the markup is laid out and written to that path
//!
//! Processing is sequential and stops at the first error.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod path_template;
mod pipeline;
mod record;
mod sanitize;
mod template;

pub mod document;

pub use config::{Config, ConfigBuilder};
pub use document::{CommandRenderer, DocumentRenderer, PdfRenderer, RenderError, RendererKind};
pub use error::{Error, Result};
pub use path_template::OutputPathTemplate;
pub use pipeline::{build_filename, merge, MergeState, MergeStats, Merger};
pub use record::{Record, RecordSource};
pub use sanitize::{is_path_safe_char, path_safe, sanitize_record};
pub use template::TemplateEngine;

/// Runs a complete merge with the given configuration.
///
/// # Errors
///
/// Returns the first error raised by any stage; see [`Error`].
///
/// # Examples
///
/// ```no_run
/// use docmerge::{Config, run};
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Config::builder()
///     .template_path("letter.html")
///     .output_pattern("{row_number}.pdf")
///     .build()?;
///
/// run(config)?;
/// # Ok(())
/// # }
/// ```
pub fn run(config: Config) -> Result<MergeStats> {
    Merger::new(config)?.run()
}
