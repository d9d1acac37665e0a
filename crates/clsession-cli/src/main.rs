//! clsession CLI
//!
//! Lists OpenCL platforms and devices, checks that a kernel file builds, and
//! times square matrix multiplication on a selected device.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clsession::config::CONFIG_FILE_NAME;
use clsession::{LogFormat, SessionConfig, SessionError};
use tracing::debug;

mod commands;
mod exit;

use commands::{Backend, BuildCommand, ListCommand, MatmulCommand, RunContext};

/// clsession - ordered OpenCL device sessions from the command line
#[derive(Parser)]
#[command(name = "clsession")]
#[command(about = "List OpenCL devices, build kernels and run matrix multiplication")]
#[command(long_about = r#"
Runs one ordered OpenCL session per invocation: enumerate platforms and
devices, select one, build a kernel, bind arguments, execute and read back.

Examples:
  # List every platform and device
  clsession list

  # Check that a kernel file compiles
  clsession build --kernel-file matmul.cl --entry multiplyMatrices

  # Time a 1000x1000 integer product and verify it on the CPU
  clsession matmul --dimension 1000 --verify

  # Use the second platform, double precision, transposed B
  clsession --platform 1 matmul --dtype double --transpose
"#)]
#[command(version)]
struct Cli {
    /// Configuration file path (default: ./clsession.toml if present)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Driver backend
    #[arg(long, value_enum, global = true)]
    backend: Option<Backend>,

    /// Platform index; negative selects the first platform
    #[arg(long, value_name = "INDEX", global = true, allow_negative_numbers = true)]
    platform: Option<i32>,

    /// Device index within the platform; negative selects the first device
    #[arg(long, value_name = "INDEX", global = true, allow_negative_numbers = true)]
    device: Option<i32>,

    /// Options passed to the OpenCL compiler
    #[arg(long, value_name = "OPTIONS", global = true, allow_hyphen_values = true)]
    build_options: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every platform and device
    #[command(alias = "ls")]
    List(ListCommand),

    /// Build a kernel file and report the build log on failure
    Build(BuildCommand),

    /// Multiply random square matrices on the device
    #[command(alias = "mm")]
    Matmul(MatmulCommand),
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => exit::EXIT_SUCCESS,
        Err(e) => {
            report(&e);
            exit::code_for(&e)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let config = load_configuration(&cli)?;
    setup_logging(&config)?;
    debug!(?config, "configuration loaded");

    let backend = cli.backend.unwrap_or_else(Backend::default_for_build);
    let ctx = RunContext { backend, config };
    match &cli.command {
        Commands::List(cmd) => cmd.execute(&ctx),
        Commands::Build(cmd) => cmd.execute(&ctx),
        Commands::Matmul(cmd) => cmd.execute(&ctx),
    }
}

/// Print the error chain, plus the build log for build failures.
fn report(e: &anyhow::Error) {
    eprintln!("Error: {e}");
    for cause in e.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
    if let Some(SessionError::Build(failure)) = e.downcast_ref::<SessionError>() {
        if !failure.log.is_empty() {
            eprintln!("Build log:\n{}", failure.log);
        }
    }
}

/// Load configuration from file and environment, then apply CLI flags.
fn load_configuration(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SessionConfig::load_or_default(&PathBuf::from(CONFIG_FILE_NAME))
            .context("failed to load configuration")?,
    };

    if let Some(platform) = cli.platform {
        config.platform_index = platform;
    }
    if let Some(device) = cli.device {
        config.device_index = device;
    }
    if let Some(options) = &cli.build_options {
        config.build_options = options.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Logs go to stderr so device listings on stdout stay clean.
fn setup_logging(config: &SessionConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match config.log_format {
        LogFormat::Json => {
            subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).try_init()
        }
        LogFormat::Compact => subscriber.compact().try_init(),
        LogFormat::Pretty => subscriber.pretty().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
