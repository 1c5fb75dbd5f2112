//! tldraw-export CLI.
//!
//! Usage examples:
//!   Export the first page of a local sketch as SVG into the current directory:
//!     $ cargo run --bin tldraw-export -- export ./sketch.tldr
//!   Export every frame of a shared sketch as transparent PNGs:
//!     $ TLDRAW_EXPORT_CHROME_BIN=/path/to/chrome \
//!       cargo run --bin tldraw-export -- export https://www.tldraw.com/s/v2_c_abc \
//!       --format png --transparent --frames --output ./out

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::debug;
use tldraw_export::config::{ExportConfig, Verbosity};
use tldraw_export::logging::{ExportLogRecord, LogCallback, LogLevel};
use tldraw_export::{
    ChromiumLauncher, ExportFormat, ExportLogger, ExportOptions, ExportSession, PageToken,
    Selection, export_batch,
};

#[derive(Parser)]
#[command(
    name = "tldraw-export",
    author,
    version,
    about = "Export tldraw sketches to svg, png, jpeg, webp, json, or tldr"
)]
struct Cli {
    /// Increase diagnostic verbosity (pass twice for debug output).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export one or more sketches.
    Export(ExportArgs),
}

#[derive(Args)]
struct ExportArgs {
    /// Local .tldr files or tldraw.com sketch URLs.
    #[arg(required = true, value_name = "FILES_OR_URLS")]
    inputs: Vec<String>,

    /// Output format: svg, png, jpeg, webp, json, or tldr.
    #[arg(short, long, default_value_t = ExportFormat::Svg)]
    format: ExportFormat,

    /// Directory to write exported files into.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Base file name for exported files.
    #[arg(short, long)]
    name: Option<String>,

    /// Export frames by name or id; pass without values to export every frame.
    #[arg(long, num_args = 0.., value_name = "NAME")]
    frames: Option<Vec<String>>,

    /// Export pages by name, id, or zero-based index; pass without values for every page.
    #[arg(long, num_args = 0.., value_name = "PAGE")]
    pages: Option<Vec<String>>,

    /// Export without a background.
    #[arg(long)]
    transparent: bool,

    /// Export using the dark theme.
    #[arg(long)]
    dark: bool,

    /// Padding around the exported shapes, in pixels.
    #[arg(long)]
    padding: Option<f64>,

    /// Output scale factor.
    #[arg(long)]
    scale: Option<f64>,

    /// Remove <style> elements from SVG output.
    #[arg(long)]
    strip_style: bool,

    /// Print exported content to stdout instead of writing files.
    #[arg(short, long)]
    print: bool,
}

impl ExportArgs {
    fn options(&self) -> ExportOptions {
        ExportOptions {
            format: self.format,
            output: self.output.clone(),
            print: self.print,
            name: self.name.clone(),
            dark: self.dark,
            transparent: self.transparent,
            padding: self.padding,
            scale: self.scale,
            strip_style: self.strip_style,
            pages: match &self.pages {
                None => Selection::Default,
                Some(tokens) => {
                    Selection::from_tokens(tokens.iter().map(|t| PageToken::from(t.as_str())).collect())
                }
            },
            frames: match &self.frames {
                None => Selection::Default,
                Some(tokens) => Selection::from_tokens(tokens.clone()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_env_logger(cli.verbose);

    match cli.command {
        Command::Export(args) => run_export(args, cli.verbose).await,
    }
}

async fn run_export(args: ExportArgs, verbose: u8) -> Result<ExitCode> {
    let mut config = ExportConfig::from_env().context("invalid TLDRAW_EXPORT_* configuration")?;
    if verbose > 0 {
        config.verbose = verbosity_from_count(verbose);
    }
    config.logger = Some(make_logger_callback());
    debug!("Loaded configuration: {config:?}");

    let logger = Arc::new(ExportLogger::from_export_config(&config));
    let launcher = ChromiumLauncher::from_config(&config, Arc::clone(&logger));
    let session = ExportSession::new(launcher, config, logger);

    let report = export_batch(&session, &args.inputs, &args.options())
        .await
        .context("invalid export options")?;

    for artifact in &report.outputs {
        println!("{artifact}");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Route library diagnostics through `log` so env_logger owns stderr.
fn make_logger_callback() -> LogCallback {
    Arc::new(|record: &ExportLogRecord| {
        let target = record.category.as_deref().unwrap_or("tldraw_export");
        match record.level {
            LogLevel::Error => log::error!(target: target, "{}", record.message),
            LogLevel::Warn => log::warn!(target: target, "{}", record.message),
            LogLevel::Info => log::info!(target: target, "{}", record.message),
            LogLevel::Debug => match &record.auxiliary {
                Some(aux) if !aux.is_null() => {
                    log::debug!(target: target, "{} {aux}", record.message)
                }
                _ => log::debug!(target: target, "{}", record.message),
            },
        }
    })
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Minimal,
        1 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger(verbose: u8) {
    if env::var("RUST_LOG").is_err() {
        let level = if verbose > 1 { "debug" } else { "info" };
        unsafe {
            env::set_var("RUST_LOG", level);
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
