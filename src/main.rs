mod cancellation;
mod config;
mod data_dir;
mod db;
mod error;
mod exit;
mod logging;
mod migrate;
mod runner;
mod signals;
mod sources;

use cancellation::CancelToken;
use clap::{CommandFactory, Parser};
use config::RunnerConfig;
use db::SqliteProviderFactory;
use error::ConfigError;
use exit::ActionOutcome;
use runner::{Action, ActionRunner};
use signals::SignalCoordinator;
use std::sync::Arc;

/// Container entrypoint that installs or rolls back SQLite schema migrations
/// shipped in /data/dist against a database in /data/work.
///
/// Environment: TARGET_VERSION (optional), DATABASE_FILE (default database.db).
#[derive(Parser, Debug)]
#[command(name = "migration-runner-sqlite", version, about)]
pub struct Cli {
    /// Action to run: install | rollback
    #[arg(value_name = "ACTION")]
    action: Option<String>,

    /// Start the action immediately instead of pausing first
    #[arg(long)]
    no_sleep: bool,

    /// Anything after the action is ignored, apart from `--no-sleep`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    extra: Vec<String>,
}

impl Cli {
    fn skip_pause(&self) -> bool {
        self.no_sleep || self.extra.iter().any(|arg| arg == "--no-sleep")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit::EXIT_USAGE
            } else {
                exit::EXIT_SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    tracing::debug!(?cli, "parsed CLI arguments");

    let coordinator = Arc::new(SignalCoordinator::new());
    if let Err(e) = coordinator.listen() {
        tracing::warn!(error = %e, "failed to register signal handlers, running without them");
    }
    coordinator.token().on_cancelled(|| {
        tracing::warn!("Cancellation requested, stopping at the next checkpoint");
    });

    let config = RunnerConfig::from_env();
    let flush_timeout = config
        .as_ref()
        .map(|c| c.log_flush_timeout)
        .unwrap_or_else(|_| RunnerConfig::default().log_flush_timeout);

    let code = run(&cli, config, &coordinator.token()).await;
    if coordinator.shutdown_requests() > 0 {
        tracing::debug!(
            requests = coordinator.shutdown_requests(),
            state = ?coordinator.state(),
            "exiting after shutdown request"
        );
    }
    exit::shutdown_and_exit(code, flush_timeout).await
}

/// Validate inputs, run the requested action and map the result to an exit code.
async fn run(cli: &Cli, config: Result<RunnerConfig, ConfigError>, token: &CancelToken) -> i32 {
    let Some(action_name) = cli.action.as_deref() else {
        eprintln!("{}", Cli::command().render_usage());
        return exit::EXIT_USAGE;
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return exit::config_exit_code(&e);
        }
    };

    let action: Action = match action_name.parse() {
        Ok(action) => action,
        Err(e) => {
            tracing::error!("{e}");
            return exit::config_exit_code(&e);
        }
    };

    let backend = SqliteProviderFactory::new(config.data_dir.database(&config.database_file));
    let pre_action_delay = (!cli.skip_pause()).then_some(config.pre_action_delay);
    let runner = ActionRunner::new(
        backend,
        config.data_dir.dist(),
        config.target_version.clone(),
        pre_action_delay,
    );

    let outcome = ActionOutcome::from(runner.run(action, token).await);
    outcome.report();
    outcome.exit_code()
}
