mod cli;
pub mod commands;
pub mod config;
pub mod error;
mod logging;
pub mod models;
pub(crate) mod scope_path;
pub mod services;
mod shell;
pub mod state;

use clap::Parser;
use console::style;

use cli::Cli;
use commands::operator::ConsoleOperator;
use commands::organize_pipeline::{self, PipelineCtx, RunOutcome};
use config::Config;
use error::AppError;
use services::classifier_service::HttpClassifier;
use services::file_service::FsMover;

async fn execute(cli: &Cli) -> Result<RunOutcome, AppError> {
    let target = cli.directory.canonicalize().map_err(|e| {
        AppError::NotAccessible(format!("{}: {e}", cli.directory.display()))
    })?;
    let operator = ConsoleOperator::new(cli.yes);

    if cli.undo {
        let config = Config::load_layers(cli.config.as_deref(), &cli.overrides())?;
        let ctx = PipelineCtx::from_config(target, &config, false);
        return organize_pipeline::run_undo(&ctx, &FsMover, &operator);
    }

    let config = Config::load(cli.config.as_deref(), &cli.overrides())?;
    let provider = config.provider_config()?;
    tracing::debug!(
        provider = %provider.provider,
        model = %provider.model,
        endpoint = %provider.api_base,
        "configuration loaded"
    );
    let classifier = HttpClassifier::new(provider, config.classifier_settings())?;
    let ctx = PipelineCtx::from_config(target, &config, cli.dry_run);
    organize_pipeline::run(&ctx, &classifier, &FsMover, &operator).await
}

/// Parses arguments, runs the pipeline and returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("{err:#}");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{} failed to start runtime: {err}", style("error:").red().bold());
            return 1;
        }
    };

    match runtime.block_on(execute(&cli)) {
        Ok(outcome) if outcome.has_failures() => 1,
        Ok(_) => 0,
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "run aborted");
            eprintln!("{} {err}", style("error:").red().bold());
            1
        }
    }
}
