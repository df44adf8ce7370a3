use super::{DocumentRenderer, RenderError};
use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// Placeholder replaced by the output path in command arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Delegates document rendering to an external converter.
///
/// The markup is written to the program's standard input. Arguments may
/// contain [`OUTPUT_PLACEHOLDER`]; if none does, the output path is appended
/// as the last argument. For example `weasyprint - {output}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    /// Creates a renderer running `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line with shell quoting rules, so arguments may
    /// contain spaces when quoted. Returns `None` if it is empty or its
    /// quotes are unbalanced.
    #[must_use]
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = shell_words::split(command_line).ok()?.into_iter();
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// The program that will be run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command_args(&self, output_path: &Path) -> Vec<OsString> {
        let has_placeholder = self.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER));
        let output = output_path.to_string_lossy();

        let mut args: Vec<OsString> = self
            .args
            .iter()
            .map(|a| OsString::from(a.replace(OUTPUT_PLACEHOLDER, &output)))
            .collect();
        if !has_placeholder {
            args.push(output_path.as_os_str().to_os_string());
        }
        args
    }
}

impl DocumentRenderer for CommandRenderer {
    fn render_document(&self, markup: &str, output_path: &Path) -> Result<(), RenderError> {
        let args = self.command_args(output_path);
        debug!("Running {} {:?}", self.program, args);

        // A leftover file from an earlier run must not count as output.
        match fs::remove_file(output_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RenderError::Layout(format!("failed to start '{}': {e}", self.program)))?;

        // Stdin is fed from its own thread while stderr is drained here, so
        // a converter that logs heavily before reading cannot stall the run.
        let output = thread::scope(|scope| {
            let feeder = child.stdin.take().map(|mut stdin| {
                scope.spawn(move || match stdin.write_all(markup.as_bytes()) {
                    // The exit status decides when the converter stops reading early.
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                })
            });
            let output = child.wait_with_output()?;
            if let Some(feeder) = feeder {
                feeder
                    .join()
                    .map_err(|_| io::Error::other("stdin writer panicked"))??;
            }
            Ok::<_, io::Error>(output)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Layout(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        if !output_path.exists() {
            return Err(RenderError::Layout(format!(
                "'{}' finished without writing {}",
                self.program,
                output_path.display()
            )));
        }
        Ok(())
    }
}
