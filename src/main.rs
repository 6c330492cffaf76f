use anyhow::Context;
use clap::Parser;
use serde::Serialize;

mod app;
mod catalog;
mod cli;
mod config;
mod openai;
mod outfit;
mod semantic;
#[cfg(test)]
mod tests;
mod vision;
mod web;

use app::{App, MatchRequest};
use config::Config;
use semantic::CancelToken;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging()?;

    let config = Config::load().context("failed to load config")?;
    let app = App::new(config);

    match args.command {
        cli::Command::Daemon { addr } => web::start_daemon(app, &addr),

        cli::Command::Catalog {} => print_json(&app.summary()?),

        cli::Command::Match {
            descriptions,
            gender,
            exclude_category,
            top_n,
        } => {
            let request = MatchRequest {
                descriptions,
                gender,
                exclude_category,
                top_n,
            };
            let report = app.find_matches(&request, CancelToken::new())?;

            if report.items.is_empty() {
                println!("no matches found");
                for diagnostic in &report.diagnostics {
                    log::warn!("{diagnostic:?}");
                }
                return Ok(());
            }

            print_json(&report)
        }

        cli::Command::Recommend {
            image,
            top_n,
            no_check,
        } => {
            let upload = std::fs::read(&image)
                .with_context(|| format!("could not read {}", image.display()))?;
            let recommendation = app.recommend(upload, top_n, !no_check)?;

            if recommendation.items.is_empty() {
                println!("no matches found");
                return Ok(());
            }

            print_json(&recommendation)
        }
    }
}
