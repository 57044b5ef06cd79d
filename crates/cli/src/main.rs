//! CLI entry point for mtool
//!
//! Parses command line arguments, loads configuration and dispatches to the
//! library. Results go to stdout, logs to stderr.

use clap::{Parser, Subcommand};
use mtool::config::{expand_tilde, DEFAULT_CONFIG_PATH};
use mtool::{App, AppError, Config, ScanEvent, ScanReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// mtool - media library catalog and transcoder
#[derive(Parser, Debug)]
#[command(name = "mtool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Library file, overriding the configuration
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Number of concurrent transcodes (0 = one per CPU)
    #[arg(short = 'j', long, global = true)]
    jobs: Option<u32>,

    /// Preferred audio and subtitle language
    #[arg(long, global = true)]
    language: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show information about the library and available profiles
    Info,
    /// Initialize the library from a media root
    Init { root: PathBuf },
    /// Re-scan the filesystem and update the library
    Scan,
    /// Regex search metadata and print matching master files
    Find {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Print the most recently modified master files
    Latest {
        #[arg(default_value_t = 10)]
        n: usize,
    },
    /// Transcode stale derivatives of a profile into an output tree
    Make { profile: String, output: PathBuf },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> Result<Config, AppError> {
    let mut config = Config::load_or_default(expand_tilde(&args.config))?;
    if let Some(path) = &args.catalog {
        config.catalog.path = path.clone();
    }
    if let Some(jobs) = args.jobs {
        config.transcode.parallelism = jobs;
    }
    if let Some(language) = &args.language {
        config.transcode.language = language.clone();
    }
    Ok(config)
}

fn print_scan(report: &ScanReport) {
    if report.is_noop() {
        println!(
            "library is up to date, {} unchanged, {} invalid",
            report.unchanged,
            report.events.len()
        );
        return;
    }
    println!(
        "{} new, {} changed, {} deleted, {} invalid, {} unchanged",
        report.count(|e| matches!(e, ScanEvent::New(_))),
        report.count(|e| matches!(e, ScanEvent::Changed(_))),
        report.count(|e| matches!(e, ScanEvent::Deleted(_))),
        report.count(|e| matches!(e, ScanEvent::Invalid { .. })),
        report.unchanged
    );
}

async fn run(args: Args) -> Result<bool, AppError> {
    let app = App::new(load_config(&args)?);

    match args.command {
        Command::Info => println!("{}", app.info()?),
        Command::Init { root } => print_scan(&app.init(&root)?),
        Command::Scan => print_scan(&app.scan()?),
        Command::Find { patterns } => {
            for path in app.find(patterns.as_slice())? {
                println!("{}", path.display());
            }
        }
        Command::Latest { n } => {
            for path in app.latest(n)? {
                println!("{}", path.display());
            }
        }
        Command::Make { profile, output } => {
            let report = app.make(&profile, &output).await?;
            println!(
                "{} image files present, {} to make",
                report.projected - report.stale,
                report.stale
            );
            for failed in &report.run.failed {
                println!("{}: {}", failed.path.display(), failed.error);
            }
            println!("{}", report.run);
            return Ok(report.run.is_success());
        }
    }

    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
