//! Conversion of rendered markup into paginated documents.
//!
//! [`DocumentRenderer`] is the seam: the merge driver only hands it markup
//! and a destination path. Two implementations ship with the crate:
//!
//! - [`PdfRenderer`] lays HTML out in-process and writes a PDF
//! - [`CommandRenderer`] pipes the markup into an external converter

mod command;
mod layout;
mod pdf;

pub use command::{CommandRenderer, OUTPUT_PLACEHOLDER};
pub use layout::PageGeometry;
pub use pdf::PdfRenderer;

use std::path::Path;
use thiserror::Error;

/// Failure of a [`DocumentRenderer`].
#[derive(Error, Debug)]
pub enum RenderError {
    /// The markup could not be laid out or converted.
    #[error("{0}")]
    Layout(String),

    /// The destination could not be written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Turns markup into a document file at `output_path`, creating or
/// overwriting it.
pub trait DocumentRenderer {
    /// Renders `markup` and writes the result to `output_path`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Layout`] if the markup cannot be rendered and
    /// [`RenderError::Io`] if the destination cannot be written.
    fn render_document(&self, markup: &str, output_path: &Path) -> Result<(), RenderError>;
}

/// Which document renderer a run uses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RendererKind {
    /// In-process HTML to PDF layout
    #[default]
    Builtin,
    /// External converter program
    Command(CommandRenderer),
}

impl RendererKind {
    /// Creates a renderer instance of this kind.
    #[must_use]
    pub fn create(&self) -> Box<dyn DocumentRenderer> {
        match self {
            Self::Builtin => Box::new(PdfRenderer::new()),
            Self::Command(command) => Box::new(command.clone()),
        }
    }
}
