use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use calsync::config::{ConfigLoader, ResolvedConfig};
use calsync::domain::DatasetKind;
use calsync::error::CalsyncError;
use calsync::output::{JsonOutput, OutputMode};
use calsync::remote::{DatasetStore, HttpDatasetStore, NodeHandle, NodeRecord};
use calsync::sync::{CollectReport, ProgressEvent, ProgressSink, SyncEngine};

#[derive(Parser)]
#[command(name = "calsync")]
#[command(about = "Synchronize calibration experiment bundles between a local cache and a cloud dataset store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Incrementally collect new experiments into the local cache")]
    Collect(CollectArgs),
    #[command(about = "Fetch the newest experiments regardless of the watermark")]
    Pull(PullArgs),
    #[command(about = "Upload one local experiment directory")]
    Upload(BundleArgs),
    #[command(about = "Upload a bundle and verify it round-trips losslessly")]
    Verify(BundleArgs),
    #[command(about = "Move flat cache entries into date-partition folders")]
    Organize,
    #[command(about = "Show cache root, watermark and entry count")]
    Status,
}

#[derive(Args)]
struct CollectArgs {
    backend: String,

    #[arg(long)]
    max_experiments: Option<usize>,
}

#[derive(Args)]
struct PullArgs {
    backend: String,

    #[arg(long, default_value_t = 1)]
    limit: usize,
}

#[derive(Args)]
struct BundleArgs {
    path: Utf8PathBuf,
    backend: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CalsyncError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CalsyncError) -> u8 {
    match error {
        CalsyncError::NotFound(_)
        | CalsyncError::MissingExperimentName
        | CalsyncError::ConfigRead(_)
        | CalsyncError::ConfigParse(_) => 2,
        CalsyncError::RemoteUnavailable(_) | CalsyncError::RemoteStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Collect(args) => {
            let engine = remote_engine(&resolved, &args.backend)?;
            let max = args.max_experiments.unwrap_or(resolved.max_experiments);
            let report = engine.collect(max, sink(output_mode)).into_diagnostic()?;
            finish_collect(&report, output_mode)
        }
        Commands::Pull(args) => {
            let engine = remote_engine(&resolved, &args.backend)?;
            let report = engine
                .fetch_latest(args.limit, sink(output_mode))
                .into_diagnostic()?;
            finish_collect(&report, output_mode)
        }
        Commands::Upload(args) => {
            let engine = remote_engine(&resolved, &args.backend)?;
            let report = engine
                .upload(&args.path, sink(output_mode))
                .into_diagnostic()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_upload(&report).into_diagnostic(),
                OutputMode::Interactive => {
                    println!(
                        "uploaded {} as dataset {} ({} figure(s))",
                        report.name, report.dataset_id, report.figures
                    );
                    Ok(())
                }
            }
        }
        Commands::Verify(args) => {
            let engine = remote_engine(&resolved, &args.backend)?;
            let report = engine
                .verify(&args.path, sink(output_mode))
                .into_diagnostic()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_verify(&report).into_diagnostic(),
                OutputMode::Interactive => {
                    println!(
                        "round-trip ok: dataset {} ({} figure(s) checked)",
                        report.dataset_id, report.figures_checked
                    );
                    Ok(())
                }
            }
        }
        Commands::Organize => {
            let engine = offline_engine(&resolved);
            let report = engine.organize(sink(output_mode)).into_diagnostic()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_organize(&report).into_diagnostic(),
                OutputMode::Interactive => {
                    println!(
                        "moved {} entr(ies), skipped {}, warnings {}",
                        report.moved, report.skipped, report.warnings
                    );
                    Ok(())
                }
            }
        }
        Commands::Status => {
            let engine = offline_engine(&resolved);
            let report = engine.status().into_diagnostic()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&report).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("cache root: {}", report.cache_root);
                    match report.watermark {
                        Some(watermark) => println!("watermark:  {watermark}"),
                        None => println!("watermark:  (empty cache)"),
                    }
                    println!("entries:    {}", report.entries);
                    Ok(())
                }
            }
        }
    }
}

fn remote_engine(
    resolved: &ResolvedConfig,
    backend: &str,
) -> miette::Result<SyncEngine<HttpDatasetStore>> {
    let store = HttpDatasetStore::new(&resolved.base_url, backend, &resolved.datastore)
        .into_diagnostic()?;
    Ok(SyncEngine::new(store, resolved.cache_layout()))
}

fn offline_engine(resolved: &ResolvedConfig) -> SyncEngine<NopStore> {
    SyncEngine::new(NopStore, resolved.cache_layout())
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &LogSink,
    }
}

fn finish_collect(report: &CollectReport, mode: OutputMode) -> miette::Result<()> {
    match mode {
        OutputMode::NonInteractive => JsonOutput::print_collect(report).into_diagnostic(),
        OutputMode::Interactive => {
            print_collect_summary(report);
            Ok(())
        }
    }
}

fn print_collect_summary(report: &CollectReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}calsync summary{reset}");
    println!("{cyan}  listed:    {}{reset}", report.listed);
    println!("{yellow}  skipped:   {}{reset}", report.skipped);
    println!("{green}  processed: {}{reset}", report.processed);
    if report.failed > 0 {
        println!("{red}  failed:    {}{reset}", report.failed);
        for id in &report.failed_ids {
            println!("{red}    - {id}{reset}");
        }
    } else {
        println!("{green}  failed:    0{reset}");
    }
}

/// Interactive-mode sink: progress events go to the log stream on stderr.
struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Placeholder store for commands that never touch the network.
struct NopStore;

impl DatasetStore for NopStore {
    fn push(
        &self,
        _kind: DatasetKind,
        _data: &Value,
        _parent: Option<&str>,
    ) -> Result<NodeHandle, CalsyncError> {
        Err(CalsyncError::RemoteUnavailable(
            "dataset store not configured".to_string(),
        ))
    }

    fn list(&self, _kind: DatasetKind, _limit: usize) -> Result<Vec<NodeHandle>, CalsyncError> {
        Err(CalsyncError::RemoteUnavailable(
            "dataset store not configured".to_string(),
        ))
    }

    fn list_children(
        &self,
        _kind: DatasetKind,
        _parent: &str,
    ) -> Result<Vec<NodeHandle>, CalsyncError> {
        Err(CalsyncError::RemoteUnavailable(
            "dataset store not configured".to_string(),
        ))
    }

    fn get(&self, _id: &str) -> Result<NodeRecord, CalsyncError> {
        Err(CalsyncError::RemoteUnavailable(
            "dataset store not configured".to_string(),
        ))
    }
}
