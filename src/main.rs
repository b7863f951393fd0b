//! fw-sweep - empty container cleanup routine
//!
//! Walks every project, deletes subjects without sessions, sessions without
//! acquisitions and acquisitions without files, skipping anything created
//! inside the recency window.

use anyhow::bail;
use chrono::Utc;
use tracing::info;

use fw_sweep::cli::CliOptions;
use fw_sweep::config::Config;
use fw_sweep::jobs::{self, SweepOptions};
use fw_sweep::logging;
use fw_sweep::services::FlywheelClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = CliOptions::from_args()?;
    let mut config = Config::from_env()?;
    if let Some(hours) = cli.min_age_hours {
        config.min_age_hours = hours;
    }
    config.dry_run |= cli.dry_run;

    // captured once so every project shares the same cutoff
    let now = Utc::now();
    let mut options = SweepOptions::new(now, config.min_age_hours)?;
    options.dry_run = config.dry_run;
    options.projects = cli.projects;

    info!(
        api = %config.api_url,
        cutoff = %options.cutoff,
        dry_run = options.dry_run,
        "Starting empty container sweep"
    );

    let client = FlywheelClient::from_config(&config)?;
    let summary = jobs::run_sweep(&client, &options).await?;
    print!("{}", summary);

    if !summary.is_clean() {
        bail!(
            "{} project(s) failed and {} delete(s) failed",
            summary.project_failures.len(),
            summary.delete_failures.len()
        );
    }
    Ok(())
}
