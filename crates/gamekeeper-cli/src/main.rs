//! Gamekeeper entry point.
//!
//! Exit codes: 0 on clean shutdown, 2 on unrecoverable configuration
//! error, 1 on runtime failure.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gamekeeper_cli::{Cli, Commands, ConfigCommand, bootstrap, run_supervisor};
use gamekeeper_core::config::{self, ConfigHandle};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(code) => code,
        Err(err) => {
            error!(error = ?err, "gamekeeper failed");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<std::process::ExitCode> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.config_dir).await,
        Commands::Validate => validate(&cli.config_dir),
        Commands::Config { command } => config_command(&cli.config_dir, command),
    }
}

async fn run(config_dir: &std::path::Path) -> anyhow::Result<std::process::ExitCode> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        "starting gamekeeper"
    );

    let ctx = bootstrap(config_dir)?;

    let report = config::validate(&ctx.config.snapshot());
    for warning in &report.warnings {
        warn!(field = warning.field, "{}", warning.message);
    }
    if !report.is_valid() {
        for issue in &report.errors {
            error!(field = issue.field, "{}", issue.message);
        }
        if ctx.config.snapshot().is_first_run() {
            error!(
                "first run detected: fill in credentials and directories with \
                 `gamekeeper config set <key> <value>`, then start again"
            );
        } else {
            error!("configuration validation failed, fix the errors above");
        }
        return Ok(std::process::ExitCode::from(2));
    }

    run_supervisor(ctx).await?;
    Ok(std::process::ExitCode::SUCCESS)
}

fn validate(config_dir: &std::path::Path) -> anyhow::Result<std::process::ExitCode> {
    let config = ConfigHandle::load(config_dir)?;
    let report = config::validate(&config.snapshot());

    for warning in &report.warnings {
        println!("warning: {}: {}", warning.field, warning.message);
    }
    for issue in &report.errors {
        println!("error: {}: {}", issue.field, issue.message);
    }

    if report.is_valid() {
        println!("configuration is valid");
        Ok(std::process::ExitCode::SUCCESS)
    } else {
        Ok(std::process::ExitCode::from(2))
    }
}

fn config_command(
    config_dir: &std::path::Path,
    command: ConfigCommand,
) -> anyhow::Result<std::process::ExitCode> {
    let config = ConfigHandle::load(config_dir)?;

    match command {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&config.snapshot())?);
        }
        ConfigCommand::Set { key, value } => {
            // Accept bare scalars; anything unparsable is stored as a string.
            let json_value = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value.clone()));
            config.update_hon_field(&key, json_value)?;
            config.save()?;
            println!("set {key} = {value}");
        }
    }

    Ok(std::process::ExitCode::SUCCESS)
}
