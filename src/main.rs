use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

mod aggregate;
mod config;
mod db;
mod error;
mod ingest;
mod logging;
mod mailer;
mod models;
mod report;
mod run;
mod source;
mod window;

use crate::config::Config;
use crate::db::PgSource;
use crate::error::RunError;
use crate::mailer::{MailTransport, PreviewMailer, SmtpMailer};
use crate::models::RunSummary;
use crate::report::{HtmlTemplate, Renderer};
use crate::run::{RunController, RunRequest};
use crate::source::CsvSource;

#[derive(Parser, Debug)]
#[command(name = "coach-feedback-digest")]
#[command(about = "Send weekly coach feedback reports", long_about = None)]
struct Cli {
    /// Path to config TOML. If omitted, uses ./coach-feedback.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    log_level: Option<String>,

    /// Test mode: query the current week and send to a single override address.
    #[arg(long, requires_all = ["coach", "to"])]
    test: bool,

    /// (Test mode) Coach name to pull the report for (case-insensitive).
    #[arg(long, value_name = "NAME", requires = "test")]
    coach: Option<String>,

    /// (Test mode) Email address to send the report to instead of the real coach.
    #[arg(long, value_name = "EMAIL", requires = "test")]
    to: Option<String>,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Read coaches.csv and submissions.csv from this directory instead of the warehouse.
    #[arg(long, value_name = "DIR")]
    csv_dir: Option<PathBuf>,

    /// Write each report to DIR/<coach>.html instead of emailing it.
    #[arg(long, value_name = "DIR")]
    preview_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (cfg, config_err) = load_or_default(&cli);

    let _log = match logging::init(&cfg.logging, cli.log_level.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            if let Some(config_err) = &config_err {
                eprintln!("error: {config_err:#}");
            }
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(err) = config_err {
        error!("{err:#}");
        return ExitCode::FAILURE;
    }

    match execute(&cli, &cfg).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(err) => error!("could not serialize run summary: {err}"),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// A config that fails to load is handed back with defaults so the error can
/// still be written to the default log.
fn load_or_default(cli: &Cli) -> (Config, Option<anyhow::Error>) {
    match load_config(cli) {
        Ok(cfg) => (cfg, None),
        Err(err) => (Config::default(), Some(err)),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = Config::resolve(cli.config.as_deref())?;
    cfg.apply_env()?;
    if let Some(url) = &cli.database_url {
        cfg.database.url = url.clone();
    }
    Ok(cfg)
}

fn request(cli: &Cli, cfg: &Config) -> RunRequest {
    match (cli.test, &cli.coach, &cli.to) {
        (true, Some(coach), Some(to)) => {
            info!("TEST MODE - coach: '{coach}', sending to: {to}");
            RunRequest::test(coach.clone(), to.clone(), cfg.report.test_marker.clone())
        }
        _ => RunRequest::production(),
    }
}

async fn execute(cli: &Cli, cfg: &Config) -> anyhow::Result<RunSummary> {
    let request = request(cli, cfg);
    let offset = cfg.report.offset()?;

    let transport: Box<dyn MailTransport> = match &cli.preview_dir {
        Some(dir) => {
            info!("preview mode: reports will be written to {}", dir.display());
            Box::new(PreviewMailer::new(dir)?)
        }
        None => {
            cfg.validate_for_delivery()?;
            Box::new(SmtpMailer::new(&cfg.smtp).context("failed to set up SMTP transport")?)
        }
    };
    let renderer = Renderer::new(Box::new(HtmlTemplate), cfg.report.subject_prefix.clone());
    let now = Utc::now();

    let summary = match &cli.csv_dir {
        Some(dir) => {
            let source = CsvSource::from_dir(dir);
            RunController::new(&source, transport.as_ref(), &renderer, offset)
                .run(&request, now)
                .await?
        }
        None => {
            cfg.validate_for_database()?;
            let source = PgSource::connect(&cfg.database)
                .await
                .map_err(RunError::from)
                .context("failed to connect to the feedback warehouse")?;
            let result = RunController::new(&source, transport.as_ref(), &renderer, offset)
                .run(&request, now)
                .await;
            source.close().await;
            result?
        }
    };

    if summary.failed == 0 {
        info!("All done. Reports sent to {} coach(es).", summary.succeeded);
    } else {
        info!(
            "Done with {} failure(s); {} of {} report(s) delivered.",
            summary.failed, summary.succeeded, summary.recipients
        );
    }

    Ok(summary)
}
