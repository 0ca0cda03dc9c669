use reachtime_core::config::ReachConfig;
use reachtime_core::oracle::AflCovOracle;
use reachtime_core::report::{ReportFormat, WriteMode};
use reachtime_core::Campaign;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Find the first corpus input reaching each target line", long_about = None)]
struct Cli {
    /// Fuzzer output directory containing queue/, targets.txt and timestamps_delta.csv
    output_dir: Option<PathBuf>,
    /// Command replaying one input under the coverage build (AFL_FILE is appended)
    coverage_command: Option<String>,
    /// Source root that target paths are relative to
    source_root: Option<PathBuf>,

    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// afl-cov executable, overrides the configured command line
    #[clap(long)]
    afl_cov: Option<String>,
    #[clap(short, long)]
    threads: Option<usize>,
    /// Re-check every bisection with a linear scan
    #[clap(long)]
    verify: bool,
    #[clap(long, value_enum)]
    format: Option<CliFormat>,
    /// Append to an existing report instead of replacing it
    #[clap(long)]
    append: bool,
    #[clap(long)]
    timeout_ms: Option<u64>,
    #[clap(long)]
    deadline_secs: Option<u64>,
    #[clap(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliFormat {
    Csv,
    Json,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("REACHTIME_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config_file: Option<PathBuf>) -> Result<ReachConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!(path = ?config_path, "loading configuration");
            ReachConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!(path = ?default_config_path, "loading default configuration");
                ReachConfig::load_from_file(&default_config_path)
            } else {
                info!("no config file found, using built-in defaults");
                Ok(ReachConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut ReachConfig, cli: Cli) {
    if let Some(output_dir) = cli.output_dir {
        config.campaign.output_dir = output_dir;
    }
    if let Some(coverage_command) = cli.coverage_command {
        config.oracle.coverage_command = coverage_command;
    }
    if let Some(source_root) = cli.source_root {
        config.oracle.source_root = source_root;
    }
    if let Some(afl_cov) = cli.afl_cov {
        config.oracle.afl_cov = vec![afl_cov];
    }
    if let Some(threads) = cli.threads {
        config.search.threads = threads;
    }
    if cli.verify {
        config.search.verify = true;
    }
    if let Some(format) = cli.format {
        config.report.format = match format {
            CliFormat::Csv => ReportFormat::Csv,
            CliFormat::Json => ReportFormat::Json,
        };
    }
    if cli.append {
        config.report.mode = WriteMode::Append;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.oracle.timeout_ms = timeout_ms;
    }
    if let Some(deadline_secs) = cli.deadline_secs {
        config.search.deadline_secs = Some(deadline_secs);
    }
}

fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let mut config = load_config(cli.config_file.clone())?;
    apply_overrides(&mut config, cli);

    if config.oracle.coverage_command.is_empty() {
        anyhow::bail!("no coverage command given (positional argument or [oracle] coverage-command)");
    }
    tracing::debug!(?config, "effective configuration");

    let oracle = AflCovOracle::new(config.oracle.to_oracle_config())?;
    let campaign = Campaign::new(config);
    let summary = campaign.run(&oracle)?;

    println!(
        "Targets: {}, reached: {}, not reached: {}, inconclusive: {}, aborted: {}, skipped lines: {}",
        summary.targets,
        summary.found,
        summary.not_found,
        summary.inconclusive,
        summary.aborted,
        summary.skipped_lines
    );
    println!("Report written to {:?}", campaign.layout().report_file);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
