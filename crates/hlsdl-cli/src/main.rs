use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hlsdl::{
    Controller, HlsSettings, NoopObserver, PipelineOutcome, ProgressObserver, SegmentProgress, Url,
    WriterSink,
};
use tracing::metadata::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Download an HLS media playlist into a single file.
#[derive(Parser, Debug)]
#[command(name = "hlsdl", version, about)]
struct Cli {
    /// Media playlist URL (.m3u8)
    url: Url,

    /// Output file
    #[arg(short, long, default_value = "video.ts")]
    output: PathBuf,

    /// Number of concurrent segment downloads (0 = number of CPUs)
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Do not print progress
    #[arg(short, long)]
    quiet: bool,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn init_logging(verbose: bool) -> Result<()> {
    // RUST_LOG, when set, replaces the defaults entirely.
    let filter = if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else {
        let level = if verbose { "hlsdl=debug" } else { "hlsdl=info" };
        EnvFilter::default()
            .add_directive(level.parse()?)
            .add_directive(LevelFilter::WARN.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_line_number(false)
        .with_file(false)
        .init();
    Ok(())
}

/// Single-line progress on stderr.
struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_segment(&self, p: SegmentProgress) {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r[{}/{}] segment {}", p.completed, p.total, p.sequence);
        if p.completed == p.total {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let headers: HashMap<String, String> = cli.headers.into_iter().collect();
    let settings = HlsSettings::new().workers(cli.workers).headers(headers);
    let controller = Arc::new(Controller::new(settings).context("failed to set up HTTP client")?);

    let stopper = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the written prefix");
            stopper.stop();
        }
    });

    let file = tokio::fs::File::create(&cli.output)
        .await
        .with_context(|| format!("cannot create {}", cli.output.display()))?;
    let mut sink = WriterSink::new(file);

    let observer: &dyn ProgressObserver = if cli.quiet {
        &NoopObserver
    } else {
        &ConsoleProgress
    };

    let outcome = controller
        .download(&cli.url, &mut sink, observer)
        .await
        .with_context(|| format!("download of {} failed", cli.url))?;

    match outcome {
        PipelineOutcome::Completed(report) => {
            info!(
                segments = report.segments_written,
                bytes = report.bytes_written,
                output = %cli.output.display(),
                "download complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        PipelineOutcome::Stopped(report) => {
            eprintln!();
            warn!(
                segments = report.segments_written,
                output = %cli.output.display(),
                "download stopped"
            );
            Ok(ExitCode::from(130))
        }
    }
}
