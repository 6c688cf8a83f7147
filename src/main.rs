//! snapforge – export one element of an HTML file as a paginated PDF.
//!
//! Usage:
//!   snapforge <input.html> [--target <selector>] [--output <file.pdf>]
//!             [--config <options.json>] [--image-timeout <duration>] [--landscape]
//!
//! Without `--output` the PDF is written next to the input file with the
//! same stem (e.g. `report.html` → `report.pdf`).

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use snapshot_forge::render::Orientation;
use snapshot_forge::{export_html_file, ExportOptions, PdfPaginator};

#[derive(Debug, Parser)]
#[command(name = "snapforge", version, about = "Snapshot an HTML element into a paginated PDF")]
struct Cli {
    /// HTML file to load.
    input: PathBuf,

    /// CSS selector of the element to export.
    #[arg(short, long, default_value = "body")]
    target: String,

    /// Output path (default: input stem with a .pdf extension).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON options file; flags given here take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Give up on an image after this long, e.g. `5s` or `500ms`.
    #[arg(long, value_parser = parse_duration)]
    image_timeout: Option<Duration>,

    /// Landscape pages.
    #[arg(short, long)]
    landscape: bool,

    /// Document title in the PDF metadata (default: input file stem).
    #[arg(long)]
    title: Option<String>,
}

/// Same duration syntax as options files (`1s 500ms`, `2m`).
fn parse_duration(text: &str) -> Result<Duration, String> {
    let value = serde_json::Value::String(text.to_string());
    serde_json::from_value::<humantime_serde::Serde<Duration>>(value)
        .map(humantime_serde::Serde::into_inner)
        .map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut options = match &cli.config {
        Some(path) => match ExportOptions::from_json_file(path) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        None => ExportOptions {
            filename: cli.input.with_extension("pdf"),
            ..ExportOptions::default()
        },
    };
    if let Some(output) = &cli.output {
        options.filename = output.clone();
        options.output_dir = None;
    }
    if cli.image_timeout.is_some() {
        options.image_timeout = cli.image_timeout;
    }
    if cli.landscape {
        options.render.orientation = Orientation::Landscape;
    }
    match &cli.title {
        Some(title) => options.render.title = title.clone(),
        None if cli.config.is_none() => {
            if let Some(stem) = cli.input.file_stem().and_then(|s| s.to_str()) {
                options.render.title = stem.to_string();
            }
        }
        None => {}
    }

    match export_html_file(&cli.input, cli.target.as_str(), &options, &PdfPaginator).await {
        Ok(report) => {
            let pages = report.page_count;
            eprintln!(
                "Wrote '{}' ({} page{}, {} canvas{} converted, {} image{} failed)",
                report.path.display(),
                pages,
                if pages == 1 { "" } else { "s" },
                report.surfaces_converted,
                if report.surfaces_converted == 1 { "" } else { "es" },
                report.images.failed,
                if report.images.failed == 1 { "" } else { "s" },
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
