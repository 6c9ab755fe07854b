// PGO training-case provisioning
// Main library entry point

pub mod config;
pub mod error;
pub mod harvest;
pub mod installation;
pub mod lifecycle;
pub mod models;
pub mod security;
pub mod services;
pub mod staging;
pub mod utils;

#[cfg(test)]
mod testing;

use log::{error, info};
use std::path::{Path, PathBuf};

use crate::config::CaseConfig;
use crate::lifecycle::{Collaborators, TrainingCase};

pub use error::CaseError;

/// Initialize logging system with dual format (JSON + human-readable)
pub fn init_logging(log_dir: &Path, with_stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = utils::path_resolver::resolve_log_folder(log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("pgo-training-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("pgo-training-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(log::LevelFilter::Debug);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Parsed command line.
#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    config: Option<PathBuf>,
    quiet: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--quiet" | "-q" => parsed.quiet = true,
            "--config" | "-c" => {
                let value = it
                    .next()
                    .ok_or_else(|| format!("{} requires a path", arg))?;
                parsed.config = Some(PathBuf::from(value));
            }
            other => {
                if let Some(value) = other.strip_prefix("--config=") {
                    parsed.config = Some(PathBuf::from(value));
                } else {
                    return Err(format!("Unknown argument: {}", other));
                }
            }
        }
    }
    Ok(parsed)
}

fn usage() -> &'static str {
    "Usage: pgo-training [--config <path>] [--quiet]"
}

/// Run the training case once. Returns the process exit code (0 on success).
pub fn run_cli(args: Vec<String>) -> i32 {
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", usage());
            return 2;
        }
    };

    let config = match CaseConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            return 1;
        }
    };

    // Logging failures are reported but never stop the run.
    if let Err(e) = init_logging(&config.paths.log_dir, !cli.quiet) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!(
        "[PHASE: initialization] pgo-training {} starting at {}",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now()
    );
    info!(
        "[PHASE: initialization] Database {}:{} (user={}, pass={})",
        config.database.host,
        config.database.port,
        config.database.user,
        if config.database.pass.is_empty() {
            "<empty>".to_string()
        } else {
            utils::logging::mask_sensitive(&config.database.pass)
        }
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("[PHASE: initialization] Failed to start async runtime: {}", e);
            eprintln!("Failed to start async runtime: {}", e);
            return 1;
        }
    };

    let result = runtime.block_on(async {
        let parts = Collaborators::production(&config)?;
        let mut case = TrainingCase::new(&config, parts)?;
        case.init().await
    });

    match result {
        Ok(report) => {
            for line in &report.lines {
                println!("{}", line);
            }
            0
        }
        Err(e) => {
            error!("[PHASE: lifecycle] Training case failed: {}", e);
            eprintln!("Training case failed: {}", e);
            1
        }
    }
}
