use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::cache::{CacheLookup, FrameCache, cached_or_fetch};
use crate::config::RetryPolicy;
use crate::frame::Frame;
use crate::http_client::with_retry;
use crate::providers::GameLogSource;
use crate::stats::{GameRecord, game_records_from_frame};

const DATE_DATASET: &str = "games";
const SEASON_DATASET: &str = "game_log";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRangeCollection {
    pub records: Vec<GameRecord>,
    pub cached_dates: Vec<NaiveDate>,
    pub fetched_dates: Vec<NaiveDate>,
    /// Dates for which neither a fetch nor an old snapshot produced data.
    pub failed_dates: Vec<NaiveDate>,
}

pub fn date_key(date: NaiveDate) -> String {
    FrameCache::key(DATE_DATASET, &date.format("%Y-%m-%d").to_string())
}

fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Dates in `[start, end]` without a fresh snapshot.
pub fn missing_dates(cache: &FrameCache, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    dates_between(start, end)
        .into_iter()
        .filter(|d| !matches!(cache.lookup(&date_key(*d)), CacheLookup::Hit(_)))
        .collect()
}

/// Box scores for every date in `[start, end]`. Fresh snapshots are reused;
/// only the deficit is fetched, and a date whose fetch is exhausted falls back
/// to a stale snapshot or is skipped.
pub fn collect_date_range(
    source: &dyn GameLogSource,
    cache: &FrameCache,
    start: NaiveDate,
    end: NaiveDate,
    retry: &RetryPolicy,
) -> Result<DateRangeCollection> {
    let mut out = DateRangeCollection::default();
    let mut parts = Vec::new();
    let mut deficit = Vec::new();

    for date in dates_between(start, end) {
        match cache.lookup(&date_key(date)) {
            CacheLookup::Hit(frame) => {
                out.cached_dates.push(date);
                parts.push(frame);
            }
            CacheLookup::Stale(frame) => deficit.push((date, Some(frame))),
            CacheLookup::Miss => deficit.push((date, None)),
        }
    }
    info!(
        "games {}..{}: {} dates cached, {} to fetch",
        start,
        end,
        out.cached_dates.len(),
        deficit.len()
    );

    for (date, stale) in deficit {
        let label = format!("scoreboard {date}");
        match with_retry(retry, &label, || source.scoreboard(date)) {
            Some(frame) => {
                if let Err(err) = cache.store(&date_key(date), &frame) {
                    warn!("{}: snapshot not cached: {:#}", label, err);
                }
                out.fetched_dates.push(date);
                parts.push(frame);
            }
            None => match stale {
                Some(frame) => {
                    warn!("{}: using stale snapshot", label);
                    parts.push(frame);
                }
                None => out.failed_dates.push(date),
            },
        }
    }
    if !out.failed_dates.is_empty() {
        warn!(
            "no data for {} dates: {:?}",
            out.failed_dates.len(),
            out.failed_dates
        );
    }

    out.records = game_records_from_frame(&Frame::concat(&parts))?;
    Ok(out)
}

/// Whole-season team game log, served from the cache when fresh.
pub fn collect_season_log(
    source: &dyn GameLogSource,
    cache: &FrameCache,
    season: &str,
    retry: &RetryPolicy,
) -> Result<Vec<GameRecord>> {
    let key = FrameCache::key(SEASON_DATASET, season);
    let label = format!("league game log {season}");
    let frame = cached_or_fetch(cache, &key, || {
        with_retry(retry, &label, || source.season_game_log(season))
    })?;
    let Some(frame) = frame else {
        warn!("{}: no data", label);
        return Ok(Vec::new());
    };
    let records = game_records_from_frame(&frame)?;
    info!("{}: {} team-game rows", label, records.len());
    Ok(records)
}

/// Games scheduled on one date. Not cached: scores change through the day.
pub fn games_on_date(
    source: &dyn GameLogSource,
    date: NaiveDate,
    retry: &RetryPolicy,
) -> Result<Vec<GameRecord>> {
    let label = format!("scoreboard {date}");
    let Some(frame) = with_retry(retry, &label, || source.scoreboard(date)) else {
        return Ok(Vec::new());
    };
    Ok(game_records_from_frame(&frame)?)
}
