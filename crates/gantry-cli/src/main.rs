//! Gantry CLI entrypoint.

use clap::{Parser, ValueEnum};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod config;
mod handlers;
mod render;
mod workflow;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use handlers::RunOptions;

/// Exit code for configuration and graph errors detected before execution.
const EXIT_CONFIGURATION: u8 = 2;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry workflow orchestration", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging, including streamed step output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
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

/// Configuration and graph errors exit with 2, everything else with 1.
fn failure_code(error: &(dyn std::error::Error + 'static)) -> ExitCode {
    match error.downcast_ref::<gantry_core::Error>() {
        Some(e) if e.is_fatal_before_run() => ExitCode::from(EXIT_CONFIGURATION),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config_path = cli.config.as_deref();
    let config = match CliConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Failed to load configuration: {}", style("✗").red(), e);
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };

    let result = match cli.command {
        Commands::Validate { file, strict } => handlers::validate(&config, file.as_deref(), strict),
        Commands::Plan { file, strict } => handlers::plan(&config, file.as_deref(), strict),
        Commands::Run {
            file,
            trigger,
            max_parallel,
            timeout,
            format,
            report,
            strict,
        } => {
            let options = RunOptions::resolve(
                &config,
                file,
                trigger,
                max_parallel,
                timeout,
                format,
                report,
                strict,
            );
            handlers::run(&config, options).await
        }
        Commands::Schema => handlers::schema(),
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config, config_path),
            ConfigCommands::Set { key, value } => handlers::set_config(config_path, &key, &value),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e);
            failure_code(e.as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "gantry", "run", "ci.yaml", "--trigger", "push", "-j", "2", "--format", "json", "--strict",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                file,
                trigger,
                max_parallel,
                format,
                strict,
                ..
            } => {
                assert_eq!(file, Some(PathBuf::from("ci.yaml")));
                assert_eq!(trigger, "push");
                assert_eq!(max_parallel, Some(2));
                assert_eq!(format, Some(config::OutputFormat::Json));
                assert!(strict);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_configuration_errors_exit_with_2() {
        let err: Box<dyn std::error::Error> =
            Box::new(gantry_core::Error::CyclicDependency(vec!["a".into(), "a".into()]));
        assert_eq!(failure_code(err.as_ref()), ExitCode::from(2));

        let err: Box<dyn std::error::Error> = Box::new(gantry_core::Error::Internal("x".into()));
        assert_eq!(failure_code(err.as_ref()), ExitCode::FAILURE);
    }
}
