//! ris-harvester main entry point
//!
//! This is the command-line interface for harvesting council-information
//! portals.

use chrono::{Months, NaiveDate};
use clap::Parser;
use ris_harvester::config::{compute_config_hash, load_body_config, Config};
use ris_harvester::crawler::{Coordinator, RunPlan};
use ris_harvester::entity::{EntityRef, EntityType};
use ris_harvester::output::{load_statistics, print_statistics};
use ris_harvester::storage::{open_shared, SqliteStorage};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// ris-harvester: incremental harvester for council-information portals
///
/// Crawls persons, meetings and papers of one body through persistent job
/// queues. An interrupted run is resumed with `--queue`.
#[derive(Parser, Debug)]
#[command(name = "ris-harvester")]
#[command(version)]
#[command(about = "Harvests council-information portals", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Uid of the body to harvest, as listed in the configuration
    #[arg(long)]
    body: String,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// First month of the meeting search (YYYY-MM)
    #[arg(long, value_name = "YYYY-MM", value_parser = parse_month)]
    start: Option<NaiveDate>,

    /// Last month of the meeting search (YYYY-MM), defaults to --start
    #[arg(long, value_name = "YYYY-MM", value_parser = parse_month, requires = "start")]
    end: Option<NaiveDate>,

    /// Work through the job queues
    #[arg(long)]
    queue: bool,

    /// Crawl a single person by id
    #[arg(long)]
    person_id: Option<i64>,

    /// Crawl a single person by detail page URL
    #[arg(long)]
    person_url: Option<String>,

    /// Crawl a single organization by id
    #[arg(long)]
    organization_id: Option<i64>,

    /// Crawl a single organization by detail page URL
    #[arg(long)]
    organization_url: Option<String>,

    /// Crawl a single meeting by id
    #[arg(long)]
    meeting_id: Option<i64>,

    /// Crawl a single meeting by detail page URL
    #[arg(long)]
    meeting_url: Option<String>,

    /// Crawl a single paper by id
    #[arg(long)]
    paper_id: Option<i64>,

    /// Crawl a single paper by detail page URL
    #[arg(long)]
    paper_url: Option<String>,

    /// Delete all records and jobs of the body before harvesting
    #[arg(long)]
    erase: bool,

    /// Show queue and record counts from the database and exit
    #[arg(long, conflicts_with = "erase")]
    status: bool,
}

impl Cli {
    fn numeric_seeds(&self) -> Vec<EntityRef> {
        [
            (EntityType::Person, self.person_id),
            (EntityType::Organization, self.organization_id),
            (EntityType::Meeting, self.meeting_id),
            (EntityType::Paper, self.paper_id),
        ]
        .into_iter()
        .filter_map(|(entity_type, id)| id.map(|id| EntityRef::numeric(entity_type, id)))
        .collect()
    }

    fn url_seeds(&self) -> Vec<(EntityType, &str)> {
        [
            (EntityType::Person, &self.person_url),
            (EntityType::Organization, &self.organization_url),
            (EntityType::Meeting, &self.meeting_url),
            (EntityType::Paper, &self.paper_url),
        ]
        .into_iter()
        .filter_map(|(entity_type, url)| url.as_deref().map(|url| (entity_type, url)))
        .collect()
    }
}

/// Parses `YYYY-MM` into the first day of that month
fn parse_month(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map_err(|_| format!("expected YYYY-MM, got {:?}", raw))
}

/// Turns the month arguments into an inclusive date range
///
/// The range ends on the last day of the end month.
fn date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Option<(NaiveDate, NaiveDate)>, String> {
    let Some(start) = start else {
        return Ok(None);
    };
    let end_month = end.unwrap_or(start);
    if end_month < start {
        return Err(format!(
            "End month {} is before start month {}",
            end_month.format("%Y-%m"),
            start.format("%Y-%m")
        ));
    }

    let last_day = end_month
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| format!("End month {} is out of range", end_month.format("%Y-%m")))?;
    Ok(Some((start, last_day)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_body_config(&cli.config, &cli.body) {
        Ok(config) => {
            let hash = compute_config_hash(&cli.config)?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.status {
        return handle_status(&config);
    }

    let plan = RunPlan {
        seeds: Vec::new(),
        date_range: date_range(cli.start, cli.end)?,
        queue: cli.queue,
    };
    handle_harvest(&cli, config, plan).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ris_harvester=info,warn"),
            1 => EnvFilter::new("ris_harvester=debug,info"),
            2 => EnvFilter::new("ris_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --status mode: shows queue and record counts
fn handle_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage, &config.body.uid, config.body.scraper.kind)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(
    cli: &Cli,
    config: Config,
    mut plan: RunPlan,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_shared(Path::new(&config.output.database_path))?;
    let mut coordinator = Coordinator::new(config, storage)?;

    if cli.erase {
        coordinator.erase()?;
    }

    plan.seeds = cli.numeric_seeds();
    for (entity_type, url) in cli.url_seeds() {
        plan.seeds.push(coordinator.resolve_url(entity_type, url)?);
    }

    if plan.seeds.is_empty() && !plan.drains() {
        tracing::warn!("Nothing to do: give a date range, --queue or an entity to crawl");
        return Ok(());
    }

    match coordinator.run(&plan).await {
        Ok(summary) => {
            let pending: u64 = coordinator
                .queue_counts()?
                .iter()
                .map(|(_, counts)| counts.pending)
                .sum();
            tracing::info!(
                "Harvest completed: {} records saved, {} jobs pending",
                summary.records_saved,
                pending
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("2013-02"), Ok(ymd(2013, 2, 1)));
        assert!(parse_month("2013").is_err());
        assert!(parse_month("2013-13").is_err());
    }

    #[test]
    fn test_date_range() {
        assert_eq!(date_range(None, None), Ok(None));
        assert_eq!(
            date_range(Some(ymd(2012, 2, 1)), None),
            Ok(Some((ymd(2012, 2, 1), ymd(2012, 2, 29))))
        );
        assert_eq!(
            date_range(Some(ymd(2013, 1, 1)), Some(ymd(2013, 12, 1))),
            Ok(Some((ymd(2013, 1, 1), ymd(2013, 12, 31))))
        );
        assert!(date_range(Some(ymd(2013, 5, 1)), Some(ymd(2013, 4, 1))).is_err());
    }
}
