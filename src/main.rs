use anyhow::Context;
use clap::Parser;
use docmerge::{Config, Merger};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "docmerge",
    version,
    author,
    about = "Mail-merge CSV records into PDF documents",
    long_about = "Mail-merge CSV records into paginated documents.\n\n\
    Every data row is rendered through a Tera template (HTML) and written to \
    its own file. The output path is a pattern filled with the row's field \
    values, reduced to filesystem-safe characters.\n\n\
    USAGE EXAMPLES:\n  \
      # One PDF per row, named by the id column\n  \
      docmerge --data people.csv --template letter.html --output 'out/{row[id]}.pdf'\n\n  \
      # Read the data from stdin, number the files\n  \
      cat people.csv | docmerge --template letter.html --output 'out/{row_number:03}.pdf'\n\n  \
      # Hand the HTML to an external converter\n  \
      docmerge --data people.csv --template letter.html --output 'out/{row[id]}.pdf' \\\n    \
      --renderer-cmd 'weasyprint - {output}'"
)]
struct Cli {
    /// CSV data file with a header row (defaults to stdin)
    #[arg(short, long, value_name = "PATH")]
    data: Option<PathBuf>,

    /// Template file; its directory is searched for included templates
    #[arg(short, long, value_name = "PATH")]
    template: PathBuf,

    /// Output path pattern, e.g. "out/{row[id]}-{row_number}.pdf"
    #[arg(short, long, value_name = "PATTERN")]
    output: String,

    /// CSV field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// External converter command; markup is piped to stdin and {output}
    /// is replaced by the output path
    #[arg(long, value_name = "COMMAND")]
    renderer_cmd: Option<String>,

    /// Dry run (render and compute paths, don't write documents)
    #[arg(long)]
    dry_run: bool,

    /// Warn when a record overwrites an earlier record's document
    #[arg(long)]
    check_collisions: bool,

    /// Don't print the summary
    #[arg(short, long)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    let delimiter = u8::try_from(cli.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .with_context(|| format!("Delimiter '{}' is not a single ASCII character", cli.delimiter))?;

    let mut builder = Config::builder()
        .template_path(cli.template)
        .output_pattern(cli.output)
        .delimiter(delimiter)
        .dry_run(cli.dry_run)
        .detect_collisions(cli.check_collisions);

    if let Some(data) = cli.data {
        builder = builder.data_path(data);
    }

    if let Some(command) = cli.renderer_cmd {
        builder = builder.renderer_command(&command);
    }

    let config = builder.build().context("Failed to build configuration")?;

    let mut merger = Merger::new(config).context("Failed to create merger")?;
    let stats = merger.run().map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!("Merge failed during {stage}"))
    })?;

    if !cli.quiet {
        stats.print_summary();
        for path in &stats.output_paths {
            println!("  {}", path.display());
        }
    }

    Ok(())
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("docmerge=info"),
        1 => EnvFilter::new("docmerge=debug"),
        _ => EnvFilter::new("docmerge=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .init();

    Ok(())
}
