use anyhow::Result;
use tracing::{info, warn};

use crate::cache::{CacheLookup, FrameCache};
use crate::config::RetryPolicy;
use crate::http_client::with_retry;
use crate::providers::SeasonStatsSource;
use crate::stats::{
    STAT_COLUMNS, StatLine, TeamSeasonStats, season_stats_from_frame, season_stats_to_frame,
    standardize,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonStatsFetch {
    pub rows: Vec<TeamSeasonStats>,
    /// Teams whose fetch was exhausted or returned no usable row.
    pub failed_teams: Vec<u32>,
}

/// Fetches every team's dashboard one by one. A team that keeps failing is
/// skipped; the rest of the league is still collected.
pub fn fetch_season_stats(
    source: &dyn SeasonStatsSource,
    season: &str,
    teams: &[(u32, &str)],
    retry: &RetryPolicy,
    normalize: bool,
) -> SeasonStatsFetch {
    let mut out = SeasonStatsFetch::default();
    for (team_id, team_name) in teams {
        let label = format!("team stats {team_id} {season}");
        let Some(dashboard) = with_retry(retry, &label, || source.team_dashboard(*team_id, season))
        else {
            out.failed_teams.push(*team_id);
            continue;
        };
        if dashboard.is_empty() {
            warn!("{}: dashboard has no overall row", label);
            out.failed_teams.push(*team_id);
            continue;
        }

        let mut values = [0.0; 9];
        for (slot, column) in values.iter_mut().zip(STAT_COLUMNS) {
            *slot = dashboard.value(0, column).as_f64().unwrap_or(0.0);
        }
        out.rows.push(TeamSeasonStats {
            team_id: *team_id,
            team_name: team_name.to_string(),
            stats: StatLine::from_values(values),
        });
    }

    if normalize {
        standardize(&mut out.rows);
    }
    if !out.failed_teams.is_empty() {
        warn!(
            "season {}: no stats for {} of {} teams {:?}",
            season,
            out.failed_teams.len(),
            teams.len(),
            out.failed_teams
        );
    }
    out
}

/// Team season stats for `season`, served from the cache when fresh. Only a
/// complete league is stored; a run with failed teams uses its partial rows
/// without caching them, so the next run fetches again.
pub fn collect_season_stats(
    source: &dyn SeasonStatsSource,
    cache: &FrameCache,
    season: &str,
    teams: &[(u32, &str)],
    retry: &RetryPolicy,
    normalize: bool,
) -> Result<Vec<TeamSeasonStats>> {
    let dataset = if normalize {
        "team_stats_normalized"
    } else {
        "team_stats"
    };
    let key = FrameCache::key(dataset, season);
    let stale = match cache.lookup(&key) {
        CacheLookup::Hit(frame) => {
            let rows = season_stats_from_frame(&frame)?;
            info!("team season stats {}: {} teams (cached)", season, rows.len());
            return Ok(rows);
        }
        CacheLookup::Stale(frame) => Some(frame),
        CacheLookup::Miss => None,
    };

    let fetched = fetch_season_stats(source, season, teams, retry, normalize);
    if fetched.rows.is_empty() {
        let Some(frame) = stale else {
            warn!("no team season stats available for {}", season);
            return Ok(Vec::new());
        };
        info!("team season stats {}: fetch produced nothing, serving stale snapshot", season);
        return Ok(season_stats_from_frame(&frame)?);
    }

    if fetched.failed_teams.is_empty() {
        cache.store(&key, &season_stats_to_frame(&fetched.rows))?;
    } else {
        warn!(
            "team season stats {}: {} teams missing, not caching the partial league",
            season,
            fetched.failed_teams.len()
        );
    }
    info!("team season stats {}: {} teams", season, fetched.rows.len());
    Ok(fetched.rows)
}
