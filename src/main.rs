//! plwasm CLI entry point.
//!
//! The binary plays the part of the host server process: it loads the host
//! configuration, builds the bridge context, selects the trust tier and
//! calls routines through the same entry points a server would.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use plwasm_bridge::{BridgeContext, HostError, WasmLauncher, call_handler, set_trust};
use plwasm_common::{
    ConfigFile, EnvConfig, HostLevel, HostValue, LayeredConfig, Level, LevelMap, ManagedLevel,
};
use plwasm_host::TracingSink;

/// Exit status when a native fault ends the process (EX_SOFTWARE).
const EXIT_FATAL: u8 = 70;

#[derive(Debug, Parser)]
#[command(
    name = "plwasm",
    version,
    about = "Run WebAssembly routines the way a host server would"
)]
struct Cli {
    /// Host configuration file (TOML).
    #[arg(short, long, env = "PLWASM_CONFIG")]
    config: Option<PathBuf>,

    /// Run routines in the untrusted tier, with host filesystem, network,
    /// environment and stdio.
    #[arg(long)]
    untrusted: bool,

    /// Log output format. Overrides the configuration file.
    #[arg(long, env = "PLWASM_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call a routine and print its result.
    ///
    /// Arguments are parsed as JSON scalars where possible (`42`, `true`,
    /// `null`) and passed as text otherwise.
    Call {
        /// Routine identifier: `module` or `module.export`.
        routine: String,
        /// Routine arguments.
        args: Vec<String>,
    },

    /// Start the runtime and print its state as JSON.
    Status,

    /// Print the level translation tables.
    Levels,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let format = match cli.log_format {
        Some(format) => format,
        None => LogFormat::from_str(&file.host.log_format, true)
            .map_err(|e| anyhow::anyhow!("Invalid host.log_format: {e}"))?,
    };
    init_tracing(format);

    if let Command::Levels = cli.command {
        print_levels()?;
        return Ok(ExitCode::SUCCESS);
    }

    // Environment variables override the file.
    let config = LayeredConfig::new()
        .layer(Arc::new(EnvConfig))
        .layer(Arc::new(file.host_config()?));

    let mut ctx = BridgeContext::new(
        Arc::new(config),
        Arc::new(TracingSink::new()),
        Box::new(WasmLauncher::new()),
    )?;

    let trusted = file.host.trusted && !cli.untrusted;
    set_trust(&mut ctx, trusted)?;
    debug!(trusted, "Host trust flag applied");

    let code = match cli.command {
        Command::Call { routine, args } => {
            let args: Vec<HostValue> = args.iter().map(String::as_str).map(parse_arg).collect();
            run_call(&mut ctx, &routine, &args)
        }
        Command::Status => {
            print_status(&mut ctx)?;
            ExitCode::SUCCESS
        }
        Command::Levels => ExitCode::SUCCESS,
    };

    ctx.shutdown();
    info!(stats = ?ctx.stats(), "plwasm exiting");

    Ok(code)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,plwasm=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn parse_arg(raw: &str) -> HostValue {
    match serde_json::from_str::<HostValue>(raw) {
        Ok(
            value @ (HostValue::Null | HostValue::Bool(_) | HostValue::Int(_) | HostValue::Float(_)),
        ) => value,
        _ => HostValue::Text(raw.to_string()),
    }
}

fn run_call(ctx: &mut BridgeContext, routine: &str, args: &[HostValue]) -> ExitCode {
    match call_handler(ctx, routine, args) {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err);
            if err.is_fatal() {
                ExitCode::from(EXIT_FATAL)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn report(err: &HostError) {
    eprintln!("{}:  {}", err.level, err.message);
    if let Some(detail) = &err.detail {
        eprintln!("DETAIL:  {detail}");
    }
    eprintln!("SQLSTATE:  {}", err.code);
}

fn print_status(ctx: &mut BridgeContext) -> anyhow::Result<()> {
    let started = ctx.embedder_mut().ensure_ready();
    let embedder = ctx.embedder();

    let status = serde_json::json!({
        "state": embedder.state(),
        "trust": embedder.current_posture(),
        "startup_attempts": embedder.startup_attempts(),
        "log_threshold": embedder.log().active_level(),
        "params": embedder.live_params(),
        "error": started.err().map(|e| e.to_string()),
    });

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn print_levels() -> anyhow::Result<()> {
    let map = LevelMap::standard()?;

    println!("{:<10} {:<10} {:<10}", "host", "common", "routine");
    for &host in HostLevel::ALL {
        let common = map.host_to_common(host);
        println!(
            "{:<10} {:<10} {:<10}",
            host.name(),
            common.to_string(),
            map.common_to_managed(common).to_string()
        );
    }

    println!();
    println!("{:<10} {:<10} {:<10}", "routine", "common", "host");
    for &managed in ManagedLevel::ALL {
        let common = map.managed_to_common(managed);
        println!(
            "{:<10} {:<10} {:<10}",
            managed.to_string(),
            common.to_string(),
            map.common_to_host(common).name()
        );
    }

    Ok(())
}
