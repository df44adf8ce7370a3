//! Mail-merge example
//!
//! Renders one registration letter per row of `demos/letters/people.csv`
//! into `out/letters/`. Names with accents or slashes are reduced to safe
//! file names, while the letters themselves keep the original spelling.

use docmerge::{Config, Merger};

fn main() -> anyhow::Result<()> {
    std::fs::create_dir_all("out/letters")?;

    let config = Config::builder()
        .data_path("demos/letters/people.csv")
        .template_path("demos/letters/letter.html")
        .output_pattern("out/letters/{row[last_name]}_{row[first_name]}-{row_number:02}.pdf")
        .detect_collisions(true)
        .build()?;

    let stats = Merger::new(config)?.run()?;

    stats.print_summary();
    for entry in std::fs::read_dir("out/letters")? {
        println!("  {}", entry?.path().display());
    }

    Ok(())
}
