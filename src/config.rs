use crate::document::{CommandRenderer, RendererKind};
use crate::error::{Error, Result};
use crate::path_template::OutputPathTemplate;
use std::path::PathBuf;

const DEFAULT_DELIMITER: u8 = b',';

/// Configuration for a merge run.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// CSV input; `None` reads standard input
    pub data_path: Option<PathBuf>,

    /// Template file; its directory is the template resolution root
    pub template_path: PathBuf,

    /// Output path pattern (supports {row[field]} and {row_number})
    pub output_pattern: String,

    /// CSV field delimiter
    pub delimiter: u8,

    /// Document renderer to use
    pub renderer: RendererKind,

    /// Dry run mode (render and compute paths, write nothing)
    pub dry_run: bool,

    /// Warn when two records compute the same output path. Remembers every
    /// path of the run, so memory grows with the input.
    pub detect_collisions: bool,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use docmerge::Config;
    ///
    /// let config = Config::builder()
    ///     .data_path("people.csv")
    ///     .template_path("templates/letter.html")
    ///     .output_pattern("out/{row[id]}-{row_number}.pdf")
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The template file doesn't exist or isn't a file
    /// - The data file doesn't exist
    /// - The output pattern is empty or malformed
    /// - The delimiter is not ASCII
    pub fn validate(&self) -> Result<()> {
        if !self.template_path.is_file() {
            let reason = if self.template_path.exists() {
                "not a file"
            } else {
                "file does not exist"
            };
            return Err(Error::template_load(&self.template_path, reason));
        }

        if let Some(ref data_path) = self.data_path {
            if !data_path.exists() {
                return Err(Error::io(
                    data_path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "data file not found"),
                ));
            }
        }

        self.output_template()?;

        if !self.delimiter.is_ascii() {
            return Err(Error::config(format!(
                "delimiter must be a single ASCII character, got byte {:#04x}",
                self.delimiter
            )));
        }

        Ok(())
    }

    /// Compiles the output path pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathTemplate`] if the pattern is malformed.
    pub fn output_template(&self) -> Result<OutputPathTemplate> {
        OutputPathTemplate::parse(&self.output_pattern)
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    data_path: Option<PathBuf>,
    template_path: Option<PathBuf>,
    output_pattern: Option<String>,
    delimiter: Option<u8>,
    renderer: Option<RendererKind>,
    dry_run: bool,
    detect_collisions: bool,
}

impl ConfigBuilder {
    /// Sets the CSV file to read. Without it, standard input is read.
    #[must_use]
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Sets the template file.
    #[must_use]
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    /// Sets the output path pattern.
    ///
    /// `{row[field]}` is replaced by the sanitized field value and
    /// `{row_number}` by the 1-based row index.
    #[must_use]
    pub fn output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_pattern = Some(pattern.into());
        self
    }

    /// Sets the CSV field delimiter.
    #[must_use]
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Sets the document renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: RendererKind) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Renders documents with an external command line such as
    /// `weasyprint - {output}`.
    ///
    /// An empty command line, or one with unbalanced quotes, is reported by
    /// [`ConfigBuilder::build`].
    #[must_use]
    pub fn renderer_command(mut self, command_line: &str) -> Self {
        self.renderer = Some(match CommandRenderer::parse(command_line) {
            Some(command) => RendererKind::Command(command),
            None => RendererKind::Command(CommandRenderer::new(String::new(), Vec::new())),
        });
        self
    }

    /// Enables dry run mode (no documents are written).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Enables warnings for records that overwrite an earlier record's
    /// document.
    #[must_use]
    pub fn detect_collisions(mut self, enabled: bool) -> Self {
        self.detect_collisions = enabled;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a required setting is missing or validation
    /// fails.
    pub fn build(self) -> Result<Config> {
        let template_path = self
            .template_path
            .ok_or_else(|| Error::config("template path is required"))?;
        let output_pattern = self
            .output_pattern
            .ok_or_else(|| Error::config("output pattern is required"))?;
        let renderer = self.renderer.unwrap_or_default();

        if let RendererKind::Command(ref command) = renderer {
            if command.program().is_empty() {
                return Err(Error::config(
                    "renderer command is empty or has unbalanced quotes",
                ));
            }
        }

        let config = Config {
            data_path: self.data_path,
            template_path,
            output_pattern,
            delimiter: self.delimiter.unwrap_or(DEFAULT_DELIMITER),
            renderer,
            dry_run: self.dry_run,
            detect_collisions: self.detect_collisions,
        };

        config.validate()?;
        Ok(config)
    }
}
