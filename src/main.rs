//! Appraisal - prints the member leaderboard (or a member listing) as JSON.

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appraisal::cli::CliOptions;
use appraisal::config::Config;
use appraisal::db::Database;
use appraisal::schema::default_registry;
use appraisal::seed::{apply_seed, read_seed};
use appraisal::services::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let cli = CliOptions::from_args();

    // stdout carries the report, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appraisal=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Appraisal");

    let db = Database::in_memory();
    let services = Services::new(db, default_registry(), &config.service_options())
        .context("Failed to build services")?;

    if let Some(path) = cli.seed.as_ref().or(config.seed_path.as_ref()) {
        let seed = read_seed(path)?;
        apply_seed(&services, seed).await?;
    }

    let params = cli.params();
    let report = if cli.members {
        let members = services.members.find(&params).await?;
        serde_json::to_string_pretty(&members)?
    } else {
        let rankings = services.rankings.compute_rankings(&params).await?;
        serde_json::to_string_pretty(&rankings)?
    };
    println!("{report}");

    Ok(())
}
