use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tracing_subscriber::EnvFilter;

use nba_forecast::cache::FrameCache;
use nba_forecast::config::PipelineConfig;
use nba_forecast::http_client::http_client;
use nba_forecast::pipeline::{Sources, run_prediction};
use nba_forecast::providers::{NBA_TEAMS, NbaStatsApi};

fn main() -> Result<()> {
    init_logging();

    let config = PipelineConfig::from_env();
    let date = match parse_date_arg()? {
        Some(date) => date,
        None => Local::now().date_naive(),
    };

    let client = http_client(&config)?;
    let api = NbaStatsApi::new(client, config.base_url.clone());
    let cache = FrameCache::from_config(&config);
    let sources = Sources {
        stats: &api,
        games: &api,
        teams: &NBA_TEAMS,
    };

    let run = run_prediction(&config, &sources, &cache, date)?;
    if run.predictions.is_empty() {
        println!("No games to predict on {}", run.date);
        return Ok(());
    }

    println!("Predictions for {} (stats {})", run.date, config.stats_season);
    for p in &run.predictions {
        println!(
            "{:<12} {:<28} {:<14} {}  p(win)={:.3}",
            p.game_id,
            p.team_name.as_deref().unwrap_or("?"),
            p.matchup.as_deref().unwrap_or("-"),
            p.predicted.code(),
            p.win_probability
        );
    }
    if run.unscored_rows > 0 {
        println!("Unscored rows: {}", run.unscored_rows);
    }
    if let Some(path) = &run.checkpoint_path {
        println!("Checkpoint: {}", path.display());
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_date_arg() -> Result<Option<NaiveDate>> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut raw = None;
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix("--date=") {
            raw = Some(value.trim().to_string());
        } else if arg == "--date" {
            raw = args.get(idx + 1).map(|v| v.trim().to_string());
        }
    }
    raw.filter(|v| !v.is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .with_context(|| format!("--date expects YYYY-MM-DD, got {v:?}"))
        })
        .transpose()
}
