use crate::{
    config::Config,
    document::{DocumentRenderer, RenderError},
    error::{Error, Result},
    path_template::OutputPathTemplate,
    record::{Record, RecordSource},
    sanitize::sanitize_record,
    template::TemplateEngine,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Renders `record` through `template` with `row_number` in context.
///
/// The record is used as-is; document content never sees sanitized values.
///
/// # Errors
///
/// Returns [`Error::TemplateRender`] if rendering fails.
pub fn merge(template: &TemplateEngine, record: &Record, row_number: usize) -> Result<String> {
    template.render(record, row_number)
}

/// Computes the output path for `record`.
///
/// Every field value is passed through [`crate::path_safe`] before it is
/// substituted, so separators and other unsafe characters never reach the
/// path from data.
///
/// # Errors
///
/// Returns [`Error::PathTemplate`] if the pattern references a missing field.
pub fn build_filename(
    output_template: &OutputPathTemplate,
    record: &Record,
    row_number: usize,
) -> Result<PathBuf> {
    output_template.format(&sanitize_record(record), row_number)
}

/// Lifecycle of a merge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Created, nothing loaded yet
    Init,
    /// Loading the template and opening the record source
    Loading,
    /// Processing records
    Iterating,
    /// All records processed
    Done,
    /// Stopped at the first error
    Failed,
}

/// Statistics collected during a merge run.
#[derive(Debug, Clone, Serialize)]
pub struct MergeStats {
    /// Records read from the input
    pub records: usize,

    /// Documents written (zero in dry run mode)
    pub documents_written: usize,

    /// Computed output paths in row order, collected in dry run mode only
    pub output_paths: Vec<PathBuf>,

    /// Records whose output path repeated an earlier one, counted when
    /// collision detection is enabled
    pub duplicate_paths: usize,

    /// Total execution time
    pub duration: Duration,

    /// Time spent rendering templates
    pub template_duration: Duration,

    /// Time spent producing documents
    pub document_duration: Duration,

    /// Whether documents were skipped
    pub dry_run: bool,
}

impl MergeStats {
    fn new(dry_run: bool) -> Self {
        Self {
            records: 0,
            documents_written: 0,
            output_paths: Vec::new(),
            duplicate_paths: 0,
            duration: Duration::ZERO,
            template_duration: Duration::ZERO,
            document_duration: Duration::ZERO,
            dry_run,
        }
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║                Merge Execution Summary                ║");
        println!("╠═══════════════════════════════════════════════════════╣");
        println!(
            "║ Records Read:         {:>8}                        ║",
            self.records
        );
        println!(
            "║ Documents Written:    {:>8}                        ║",
            self.documents_written
        );
        if self.duplicate_paths > 0 {
            println!(
                "║ Overwritten Paths:    {:>8}                        ║",
                self.duplicate_paths
            );
        }
        if self.dry_run {
            println!("║ ⚠ No documents were written (dry run mode)            ║");
        }
        println!("║                                                       ║");
        println!("║ Timing Breakdown:                                     ║");
        println!(
            "║   - Templates:        {:>8.2}s                     ║",
            self.template_duration.as_secs_f64()
        );
        println!(
            "║   - Documents:        {:>8.2}s                     ║",
            self.document_duration.as_secs_f64()
        );
        println!(
            "║   - Total:            {:>8.2}s                     ║",
            self.duration.as_secs_f64()
        );
        println!("╚═══════════════════════════════════════════════════════╝\n");
    }
}

/// Merge driver: loads the template and records once, then renders, names
/// and writes one document per record, strictly in input order.
pub struct Merger {
    config: Config,
    renderer: Box<dyn DocumentRenderer>,
    state: MergeState,
}

impl Merger {
    /// Creates a merger with the renderer selected in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let renderer = config.renderer.create();
        Ok(Self::with_renderer(config, renderer))
    }

    /// Creates a merger using a caller-supplied document renderer.
    #[must_use]
    pub fn with_renderer(config: Config, renderer: Box<dyn DocumentRenderer>) -> Self {
        Self {
            config,
            renderer,
            state: MergeState::Init,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> MergeState {
        self.state
    }

    /// Runs the merge over every record.
    ///
    /// Stops at the first error: documents already written stay on disk,
    /// nothing is written for the failing record or any after it.
    ///
    /// # Errors
    ///
    /// Returns the first error from any stage.
    #[instrument(skip(self), fields(template = %self.config.template_path.display()))]
    pub fn run(&mut self) -> Result<MergeStats> {
        let result = self.execute();
        self.state = if result.is_ok() {
            MergeState::Done
        } else {
            MergeState::Failed
        };
        result
    }

    fn execute(&mut self) -> Result<MergeStats> {
        let start_time = Instant::now();
        let mut stats = MergeStats::new(self.config.dry_run);

        self.state = MergeState::Loading;
        info!("Loading template and records");
        let template = TemplateEngine::load(&self.config.template_path)?;
        let output_template = self.config.output_template()?;
        let records =
            RecordSource::open(self.config.data_path.as_deref(), self.config.delimiter)?;
        Self::check_header(&output_template, &records);

        if self.config.dry_run {
            warn!("Dry run mode enabled - skipping document writes");
        }

        self.state = MergeState::Iterating;
        let mut seen = self.config.detect_collisions.then(HashSet::new);
        for (row_number, record) in (1..).zip(records) {
            let record = record?;
            stats.records += 1;

            let render_start = Instant::now();
            let markup = merge(&template, &record, row_number)?;
            stats.template_duration += render_start.elapsed();

            let path = build_filename(&output_template, &record, row_number)?;
            if seen.as_mut().is_some_and(|paths| !paths.insert(path.clone())) {
                stats.duplicate_paths += 1;
                warn!(
                    "Row {} writes to {} again; the earlier document is overwritten",
                    row_number,
                    path.display()
                );
            }

            if self.config.dry_run {
                debug!("Row {} -> {} (dry run)", row_number, path.display());
                stats.output_paths.push(path);
            } else {
                let write_start = Instant::now();
                self.write_document(&markup, &path, row_number)?;
                stats.document_duration += write_start.elapsed();
                stats.documents_written += 1;
                debug!("Row {} -> {}", row_number, path.display());
            }
        }

        stats.duration = start_time.elapsed();
        info!(
            "✓ Merged {} records ({} documents) in {:.2}s",
            stats.records,
            stats.documents_written,
            stats.duration.as_secs_f64()
        );
        Ok(stats)
    }

    fn write_document(&self, markup: &str, path: &Path, row_number: usize) -> Result<()> {
        self.renderer
            .render_document(markup, path)
            .map_err(|e| match e {
                RenderError::Io(source) => Error::io(path, source),
                RenderError::Layout(message) => Error::document_render(row_number, path, message),
            })
    }

    /// Warns early about fields the output pattern needs but the header lacks.
    fn check_header(output_template: &OutputPathTemplate, records: &RecordSource) {
        for name in output_template.field_names() {
            if !records.headers().iter().any(|h| h == name) {
                warn!(
                    "Output pattern references '{}' which is not a column of the input",
                    name
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records calls and writes the markup verbatim.
    #[derive(Clone, Default)]
    struct RecordingRenderer {
        calls: Rc<RefCell<Vec<(String, PathBuf)>>>,
    }

    impl DocumentRenderer for RecordingRenderer {
        fn render_document(
            &self,
            markup: &str,
            output_path: &Path,
        ) -> std::result::Result<(), RenderError> {
            std::fs::write(output_path, markup)?;
            self.calls
                .borrow_mut()
                .push((markup.to_string(), output_path.to_path_buf()));
            Ok(())
        }
    }

    fn setup(temp: &assert_fs::TempDir, template: &str, csv: &str) -> Config {
        temp.child("letter.html").write_str(template).unwrap();
        temp.child("data.csv").write_str(csv).unwrap();
        temp.child("out").create_dir_all().unwrap();

        Config::builder()
            .data_path(temp.path().join("data.csv"))
            .template_path(temp.path().join("letter.html"))
            .output_pattern(format!(
                "{}/out/{{row[name]}}-{{row_number}}.html",
                temp.path().display()
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_merge_threads_row_number() {
        let engine = TemplateEngine::from_source("t", "Row {{row_number}}: {{row.name}}").unwrap();
        let a = Record::from_pairs([("name", "A")]);
        let b = Record::from_pairs([("name", "B")]);

        assert!(merge(&engine, &a, 1).unwrap().contains("Row 1: A"));
        assert!(merge(&engine, &b, 2).unwrap().contains("Row 2: B"));
    }

    #[test]
    fn test_build_filename_sanitizes_values() {
        let template = OutputPathTemplate::parse("out/{row[name]}.pdf").unwrap();
        let record = Record::from_pairs([("name", "A/B")]);
        assert_eq!(
            build_filename(&template, &record, 1).unwrap(),
            PathBuf::from("out/AB.pdf")
        );
    }

    #[test]
    fn test_content_unsanitized_path_sanitized() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "{{ row.name }}", "name\nZoë/Ann\n");
        let renderer = RecordingRenderer::default();

        let mut merger = Merger::with_renderer(config, Box::new(renderer.clone()));
        merger.run().unwrap();

        let calls = renderer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Zoë&#x2F;Ann");
        assert!(calls[0].1.ends_with("out/ZoeAnn-1.html"));
    }

    #[test]
    fn test_run_writes_one_document_per_record() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "<p>{{ row.name }}</p>", "name\nAda\nGrace\n");

        let mut merger = Merger::with_renderer(config, Box::new(RecordingRenderer::default()));
        assert_eq!(merger.state(), MergeState::Init);
        let stats = merger.run().unwrap();

        assert_eq!(merger.state(), MergeState::Done);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.documents_written, 2);
        temp.child("out/Ada-1.html").assert("<p>Ada</p>");
        temp.child("out/Grace-2.html").assert("<p>Grace</p>");
    }

    #[test]
    fn test_builtin_renderer_writes_pdfs() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("letter.html")
            .write_str("<h1>Dear {{ row.name }}</h1><p>Row {{ row_number }}</p>")
            .unwrap();
        temp.child("data.csv").write_str("id,name\n7,Ada\n").unwrap();

        let config = Config::builder()
            .data_path(temp.path().join("data.csv"))
            .template_path(temp.path().join("letter.html"))
            .output_pattern(format!("{}/{{row[id]}}.pdf", temp.path().display()))
            .build()
            .unwrap();

        let stats = Merger::new(config).unwrap().run().unwrap();
        assert_eq!(stats.documents_written, 1);

        let doc = lopdf::Document::load(temp.path().join("7.pdf")).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_zero_records_succeeds() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "{{ row.name }}", "name\n");
        let renderer = RecordingRenderer::default();

        let mut merger = Merger::with_renderer(config, Box::new(renderer.clone()));
        let stats = merger.run().unwrap();

        assert_eq!(stats.records, 0);
        assert_eq!(stats.documents_written, 0);
        assert!(renderer.calls.borrow().is_empty());
        assert_eq!(merger.state(), MergeState::Done);
    }

    #[test]
    fn test_render_failure_stops_the_run() {
        let temp = assert_fs::TempDir::new().unwrap();
        let template = "{% if row_number == 2 %}{{ row.missing }}{% endif %}{{ row.name }}";
        let config = setup(&temp, template, "name\na\nb\nc\nd\ne\n");
        let renderer = RecordingRenderer::default();

        let mut merger = Merger::with_renderer(config, Box::new(renderer.clone()));
        let err = merger.run().unwrap_err();

        assert!(matches!(err, Error::TemplateRender { row: 2, .. }));
        assert_eq!(merger.state(), MergeState::Failed);
        assert_eq!(renderer.calls.borrow().len(), 1);
        temp.child("out/a-1.html").assert("a");
        for (i, name) in ["b", "c", "d", "e"].iter().enumerate() {
            assert!(!temp.path().join(format!("out/{name}-{}.html", i + 2)).exists());
        }
    }

    #[test]
    fn test_unknown_output_field_fails_with_row() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("letter.html").write_str("x").unwrap();
        temp.child("data.csv").write_str("name\nAda\n").unwrap();

        let config = Config::builder()
            .data_path(temp.path().join("data.csv"))
            .template_path(temp.path().join("letter.html"))
            .output_pattern(format!("{}/{{row[id]}}.pdf", temp.path().display()))
            .build()
            .unwrap();

        let mut merger = Merger::with_renderer(config, Box::new(RecordingRenderer::default()));
        let err = merger.run().unwrap_err();
        assert!(matches!(err, Error::PathTemplate { row: Some(1), .. }));
    }

    #[test]
    fn test_data_error_after_first_record() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "{{ row.name }}", "name,age\nAda,36\nGrace\n");
        let renderer = RecordingRenderer::default();

        let mut merger = Merger::with_renderer(config, Box::new(renderer.clone()));
        let err = merger.run().unwrap_err();

        assert!(matches!(err, Error::DataFormat { row: Some(2), .. }));
        assert_eq!(renderer.calls.borrow().len(), 1);
    }

    #[test]
    fn test_missing_output_directory_is_io_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("letter.html").write_str("<p>x</p>").unwrap();
        temp.child("data.csv").write_str("name\nAda\n").unwrap();

        let config = Config::builder()
            .data_path(temp.path().join("data.csv"))
            .template_path(temp.path().join("letter.html"))
            .output_pattern(format!("{}/missing/{{row_number}}.pdf", temp.path().display()))
            .build()
            .unwrap();

        let err = Merger::new(config).unwrap().run().unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_duplicate_paths_overwrite() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("letter.html").write_str("{{ row.name }}").unwrap();
        temp.child("data.csv").write_str("name,team\nAda,x\nGrace,x\n").unwrap();

        let config = Config::builder()
            .data_path(temp.path().join("data.csv"))
            .template_path(temp.path().join("letter.html"))
            .output_pattern(format!("{}/{{row[team]}}.html", temp.path().display()))
            .detect_collisions(true)
            .build()
            .unwrap();

        let mut merger = Merger::with_renderer(config, Box::new(RecordingRenderer::default()));
        let stats = merger.run().unwrap();

        assert_eq!(stats.documents_written, 2);
        assert_eq!(stats.duplicate_paths, 1);
        temp.child("x.html").assert("Grace");
    }

    #[test]
    fn test_written_paths_are_not_retained() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "{{ row.name }}", "name
Ada
Ada
Grace
");

        let mut merger = Merger::with_renderer(config, Box::new(RecordingRenderer::default()));
        let stats = merger.run().unwrap();

        assert_eq!(stats.documents_written, 3);
        assert!(stats.output_paths.is_empty());
        assert_eq!(stats.duplicate_paths, 0);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("letter.html").write_str("{{ row.name }}").unwrap();
        temp.child("data.csv").write_str("name\nAda\nGrace\n").unwrap();

        let config = Config::builder()
            .data_path(temp.path().join("data.csv"))
            .template_path(temp.path().join("letter.html"))
            .output_pattern(format!("{}/{{row[name]}}.pdf", temp.path().display()))
            .dry_run(true)
            .build()
            .unwrap();

        let renderer = RecordingRenderer::default();
        let mut merger = Merger::with_renderer(config, Box::new(renderer.clone()));
        let stats = merger.run().unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(stats.documents_written, 0);
        assert_eq!(
            stats.output_paths,
            vec![temp.path().join("Ada.pdf"), temp.path().join("Grace.pdf")]
        );
        assert!(renderer.calls.borrow().is_empty());
        assert!(!temp.path().join("Ada.pdf").exists());
    }
}
