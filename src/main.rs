//! Scriptisto - shebang interpreter for compiled languages
//!
//! CLI entry point that dispatches to subcommands.

use clap::{CommandFactory, Parser};
use console::style;
use scriptisto::cli::{Cli, Commands};
use scriptisto::config::{Config, ConfigManager};
use scriptisto::error::{ScriptistoError, ScriptistoResult, EXIT_MANIFEST, EXIT_RUNTIME};
use std::path::Path;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // clap's own exit code for usage errors (2) means "build failure" here
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_MANIFEST)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbose);

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = match config_manager.load().await {
        Ok(config) => config,
        Err(e) => return report(&e, false),
    };

    // Build output already shown on stderr need not be repeated on failure
    let streamed = match &cli.command {
        Some(Commands::Build(_)) => true,
        Some(Commands::Run(_)) | None => config.build.show_output,
        _ => false,
    };

    match run(cli, &config_manager, &config).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(EXIT_RUNTIME)),
        Err(e) => report(&e, streamed),
    }
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug; RUST_LOG wins when set
fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "scriptisto=warn",
        1 => "scriptisto=info",
        _ => "scriptisto=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn report(e: &ScriptistoError, streamed: bool) -> ExitCode {
    eprintln!("{} {}", style("Error:").red().bold(), e);
    if let Some(output) = e.captured_output().filter(|o| !streamed && !o.is_empty()) {
        eprintln!("{}", style("Output:").dim());
        eprintln!("{}", output);
    }
    if let Some(hint) = e.hint() {
        eprintln!("{} {}", style("Hint:").yellow(), hint);
    }
    ExitCode::from(e.exit_code())
}

async fn run(cli: Cli, config_manager: &ConfigManager, config: &Config) -> ScriptistoResult<i32> {
    let cache_root = ConfigManager::cache_root(config, cli.cache_root.as_deref());
    debug!(cache_root = %cache_root.display(), "Resolved cache root");

    match cli.command {
        None => match cli.script.split_first() {
            Some((script, args)) => {
                scriptisto::cli::commands::run(Path::new(script), args, config, &cache_root).await
            }
            None => {
                Cli::command()
                    .print_help()
                    .map_err(|e| ScriptistoError::io("printing help", e))?;
                Ok(0)
            }
        },
        Some(Commands::Run(args)) => {
            scriptisto::cli::commands::run(&args.script, &args.args, config, &cache_root).await
        }
        Some(Commands::Build(args)) => {
            scriptisto::cli::commands::build(args, config, &cache_root).await?;
            Ok(0)
        }
        Some(Commands::Cache(args)) => {
            scriptisto::cli::commands::cache(args, config, &cache_root).await?;
            Ok(0)
        }
        Some(Commands::Config(args)) => {
            scriptisto::cli::commands::config(args, config_manager, config).await?;
            Ok(0)
        }
        Some(Commands::Completions { shell }) => {
            scriptisto::cli::commands::completions(shell)?;
            Ok(0)
        }
    }
}
