use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use nba_forecast::cache::FrameCache;
use nba_forecast::config::PipelineConfig;
use nba_forecast::http_client::http_client;
use nba_forecast::pipeline::{GameWindow, Sources, run_training};
use nba_forecast::providers::{NBA_TEAMS, NbaStatsApi};

fn main() -> Result<()> {
    init_logging();

    let mut config = PipelineConfig::from_env();
    if let Some(season) = parse_arg("season") {
        config.stats_season = season.clone();
        config.season = season;
    }
    let window = match (parse_date_arg("from")?, parse_date_arg("to")?) {
        (Some(start), Some(end)) => GameWindow::Dates(start, end),
        (None, None) => GameWindow::Season,
        _ => return Err(anyhow!("--from and --to must be given together")),
    };

    let client = http_client(&config)?;
    let api = NbaStatsApi::new(client, config.base_url.clone());
    let cache = FrameCache::from_config(&config);
    let sources = Sources {
        stats: &api,
        games: &api,
        teams: &NBA_TEAMS,
    };

    let report = run_training(&config, &sources, &cache, window)?;

    println!("Training complete ({})", config.season);
    println!(
        "Rows: {} over {} games ({} duplicate keys, {} skipped games)",
        report.assembly.output_rows,
        report.assembly.output_games,
        report.assembly.duplicate_keys,
        report.assembly.skipped_games
    );
    println!(
        "Split: {} train games / {} rows, {} test games / {} rows",
        report.train_games, report.train_rows, report.test_games, report.test_rows
    );
    println!(
        "Excluded: ties={} incomplete={} unplayed={}",
        report.excluded_ties, report.excluded_incomplete, report.excluded_unplayed
    );
    println!(
        "Test: accuracy={:.3} log_loss={:.4} brier={:.4}",
        report.test_metrics.accuracy, report.test_metrics.log_loss, report.test_metrics.brier
    );
    println!("Checkpoint: {}", report.combined_data_path.display());
    println!("Model: {}", report.model_path.display());
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let flag = format!("--{name}");
    let prefix = format!("--{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if *arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}

fn parse_date_arg(name: &str) -> Result<Option<NaiveDate>> {
    parse_arg(name)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .with_context(|| format!("--{name} expects YYYY-MM-DD, got {raw:?}"))
        })
        .transpose()
}
