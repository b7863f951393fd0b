//! Minimal CLI parsing for sweep overrides.

use std::env;

use anyhow::{Context, Result, bail};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub dry_run: bool,
    /// Restrict the sweep to these project labels (all projects when empty)
    pub projects: Vec<String>,
    pub min_age_hours: Option<i64>,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--dry-run" => options.dry_run = true,
                "--project" => {
                    let label = args.next().context("--project needs a label")?;
                    options.projects.push(label);
                }
                "--min-age-hours" => {
                    let value = args.next().context("--min-age-hours needs a value")?;
                    options.min_age_hours = Some(parse_hours(&value)?);
                }
                other => {
                    if let Some(label) = other.strip_prefix("--project=") {
                        options.projects.push(label.to_string());
                    } else if let Some(value) = other.strip_prefix("--min-age-hours=") {
                        options.min_age_hours = Some(parse_hours(value)?);
                    } else {
                        bail!("Unknown argument: {}", other);
                    }
                }
            }
        }
        Ok(options)
    }
}

fn parse_hours(value: &str) -> Result<i64> {
    let hours: i64 = value
        .parse()
        .with_context(|| format!("Invalid hour count: {}", value))?;
    if hours < 0 {
        bail!("Hour count must not be negative");
    }
    Ok(hours)
}
