use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the merge pipeline.
///
/// Every variant is fatal for the run: the merge driver stops at the first
/// error and reports it together with the failing row when one is known.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Malformed tabular input.
    #[error("Malformed data{}: {message}", row_suffix(.row))]
    DataFormat {
        /// 1-based data row, if the failure is tied to one
        row: Option<usize>,
        /// Error message
        message: String,
    },

    /// Template missing or failing to parse.
    #[error("Failed to load template '{}': {message}", .path.display())]
    TemplateLoad {
        /// Template path as given
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Template rendering failed for a record.
    #[error("Failed to render template '{template}' for row {row}: {message}")]
    TemplateRender {
        /// Template name
        template: String,
        /// 1-based data row
        row: usize,
        /// Error message
        message: String,
    },

    /// Output path template is malformed or references an unknown field.
    #[error("Invalid output path template '{template}'{}: {reason}", row_suffix(.row))]
    PathTemplate {
        /// The output path template
        template: String,
        /// 1-based data row, absent for syntax errors
        row: Option<usize>,
        /// Reason why it's invalid
        reason: String,
    },

    /// Rendered markup could not be turned into a document.
    #[error("Failed to render document '{}' for row {row}: {message}", .path.display())]
    DocumentRender {
        /// 1-based data row
        row: usize,
        /// Destination path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// IO error with context about the file path.
    #[error("IO error accessing '{}': {message}", .path.display())]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Detailed error message
        message: String,
    },
}

fn row_suffix(row: &Option<usize>) -> String {
    row.map(|r| format!(" at row {r}")).unwrap_or_default()
}

impl Error {
    /// Creates an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a data format error from a CSV parser error.
    #[must_use]
    pub fn data_format(row: Option<usize>, source: &csv::Error) -> Self {
        let message = match source.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("expected {expected_len} fields to match the header, found {len}"),
            csv::ErrorKind::Utf8 { err, .. } => format!("input is not valid UTF-8 ({err})"),
            _ => source.to_string(),
        };
        Self::DataFormat { row, message }
    }

    /// Creates a template load error.
    #[must_use]
    pub fn template_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TemplateLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a template render error, flattening the tera error chain.
    #[must_use]
    pub fn template_render(template: impl Into<String>, row: usize, source: &tera::Error) -> Self {
        Self::TemplateRender {
            template: template.into(),
            row,
            message: error_chain(source),
        }
    }

    /// Creates a path template error.
    #[must_use]
    pub fn path_template(
        template: impl Into<String>,
        row: Option<usize>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PathTemplate {
            template: template.into(),
            row,
            reason: reason.into(),
        }
    }

    /// Creates a document render error.
    #[must_use]
    pub fn document_render(row: usize, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DocumentRender {
            row,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short name of the pipeline stage that produced this error.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::DataFormat { .. } => "data",
            Self::TemplateLoad { .. } => "template load",
            Self::TemplateRender { .. } => "template render",
            Self::PathTemplate { .. } => "output path",
            Self::DocumentRender { .. } => "document render",
            Self::Io { .. } => "io",
            Self::Config { .. } => "configuration",
        }
    }

    /// Returns the 1-based row number the error is tied to, if any.
    #[must_use]
    pub const fn row(&self) -> Option<usize> {
        match self {
            Self::DataFormat { row, .. } | Self::PathTemplate { row, .. } => *row,
            Self::TemplateRender { row, .. } | Self::DocumentRender { row, .. } => Some(*row),
            _ => None,
        }
    }

    /// Returns true if this is an IO error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Tera nests the useful detail in `source()`, so walk the chain.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
