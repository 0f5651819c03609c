use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDate};

use nba_forecast::cache::{CacheLookup, FrameCache};
use nba_forecast::config::RetryPolicy;
use nba_forecast::frame::{Cell, Frame};
use nba_forecast::game_log::{collect_date_range, date_key, missing_dates};
use nba_forecast::providers::{GameLogSource, SeasonStatsSource};
use nba_forecast::season_stats::{collect_season_stats, fetch_season_stats};
use nba_forecast::stats::{GAME_LOG_REQUIRED, Outcome};

const NO_WAIT: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::ZERO,
};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "nba_forecast_collection_{}_{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
}

/// One game per date between teams `d` and `d + 100`; the lower id wins.
fn scoreboard_for(date: NaiveDate) -> Frame {
    let day = i64::from(date.day());
    let mut frame = Frame::with_columns(&GAME_LOG_REQUIRED);
    frame.set_column("IS_HOME", |_| Cell::Null);
    let stamp = date.format("%Y-%m-%d").to_string();
    for (team, pts, home) in [(day, 110, true), (day + 100, 101, false)] {
        frame.push_row(vec![
            Cell::Text(format!("00223{day:05}")),
            Cell::Int(team),
            Cell::Text(stamp.clone()),
            Cell::Float(0.48),
            Cell::Int(44),
            Cell::Int(25),
            Cell::Int(pts),
            Cell::Bool(home),
        ]);
    }
    frame
}

#[derive(Default)]
struct CountingScoreboard {
    calls: RefCell<Vec<NaiveDate>>,
    fail_on: HashSet<NaiveDate>,
}

impl GameLogSource for CountingScoreboard {
    fn season_game_log(&self, _season: &str) -> Result<Frame> {
        Err(anyhow!("not used"))
    }

    fn scoreboard(&self, date: NaiveDate) -> Result<Frame> {
        self.calls.borrow_mut().push(date);
        if self.fail_on.contains(&date) {
            return Err(anyhow!("timeout"));
        }
        Ok(scoreboard_for(date))
    }
}

#[test]
fn cold_cache_fetches_the_whole_range() {
    let cache = FrameCache::new(scratch("cold"), Duration::from_secs(3600));
    let source = CountingScoreboard::default();

    let out = collect_date_range(&source, &cache, date(1), date(4), &NO_WAIT).expect("collect");
    assert_eq!(*source.calls.borrow(), vec![date(1), date(2), date(3), date(4)]);
    assert!(out.cached_dates.is_empty());
    assert_eq!(out.fetched_dates.len(), 4);
    assert_eq!(out.records.len(), 8);
    assert!(missing_dates(&cache, date(1), date(4)).is_empty());
    let _ = fs::remove_dir_all(cache.dir());
}

#[test]
fn half_warm_cache_fetches_only_the_deficit() {
    let cache = FrameCache::new(scratch("warm"), Duration::from_secs(3600));
    for d in [date(1), date(2)] {
        cache.store(&date_key(d), &scoreboard_for(d)).expect("seed cache");
    }
    assert_eq!(missing_dates(&cache, date(1), date(4)), vec![date(3), date(4)]);

    let source = CountingScoreboard::default();
    let out = collect_date_range(&source, &cache, date(1), date(4), &NO_WAIT).expect("collect");
    assert_eq!(*source.calls.borrow(), vec![date(3), date(4)]);
    assert_eq!(out.cached_dates, vec![date(1), date(2)]);
    assert_eq!(out.fetched_dates, vec![date(3), date(4)]);

    assert_eq!(out.records.len(), 8);
    let games = out
        .records
        .iter()
        .map(|r| r.game_id.as_str())
        .collect::<HashSet<_>>();
    assert_eq!(games.len(), 4);
    let winner = out
        .records
        .iter()
        .find(|r| r.team_id == 3)
        .expect("fetched date present");
    assert_eq!(winner.outcome, Some(Outcome::Win));
    assert_eq!(winner.is_home, Some(true));
    let _ = fs::remove_dir_all(cache.dir());
}

#[test]
fn exhausted_dates_fall_back_to_stale_or_are_skipped() {
    let cache = FrameCache::new(scratch("stale"), Duration::ZERO);
    cache
        .store(&date_key(date(1)), &scoreboard_for(date(1)))
        .expect("seed cache");

    let source = CountingScoreboard {
        fail_on: HashSet::from([date(1), date(2)]),
        ..CountingScoreboard::default()
    };
    let out = collect_date_range(&source, &cache, date(1), date(3), &NO_WAIT).expect("collect");

    assert_eq!(source.calls.borrow().iter().filter(|d| **d == date(1)).count(), 3);
    assert_eq!(out.failed_dates, vec![date(2)]);
    assert_eq!(out.fetched_dates, vec![date(3)]);
    assert_eq!(out.records.len(), 4);
    assert!(out.records.iter().any(|r| r.team_id == 1));
    let _ = fs::remove_dir_all(cache.dir());
}

struct FlakyDashboards {
    broken_team: u32,
    calls: RefCell<usize>,
}

impl SeasonStatsSource for FlakyDashboards {
    fn team_dashboard(&self, team_id: u32, _season: &str) -> Result<Frame> {
        *self.calls.borrow_mut() += 1;
        if team_id == self.broken_team {
            return Err(anyhow!("connection reset"));
        }
        let mut frame = Frame::with_columns(&["GROUP_SET", "FG_PCT", "REB", "PTS"]);
        frame.push_row(vec![
            Cell::Text("Overall".into()),
            Cell::Float(0.45 + team_id as f64 / 100.0),
            Cell::Float(40.0 + team_id as f64),
            Cell::Float(100.0 + 2.0 * team_id as f64),
        ]);
        Ok(frame)
    }
}

const TEAMS: [(u32, &str); 4] = [(1, "One"), (2, "Two"), (3, "Three"), (4, "Four")];

#[test]
fn failing_team_is_skipped_and_missing_stats_read_as_zero() {
    let source = FlakyDashboards {
        broken_team: 3,
        calls: RefCell::new(0),
    };
    let out = fetch_season_stats(&source, "2023-24", &TEAMS, &NO_WAIT, false);
    assert_eq!(out.failed_teams, vec![3]);
    assert_eq!(out.rows.len(), 3);
    assert_eq!(*source.calls.borrow(), 3 + NO_WAIT.max_attempts as usize);

    let two = out.rows.iter().find(|r| r.team_id == 2).expect("team 2");
    assert_eq!(two.team_name, "Two");
    assert_eq!(two.stats.pts, 104.0);
    assert_eq!(two.stats.stl, 0.0);
}

#[test]
fn normalized_stats_are_centred_and_cached() {
    let cache = FrameCache::new(scratch("season"), Duration::from_secs(3600));
    let source = FlakyDashboards {
        broken_team: 0,
        calls: RefCell::new(0),
    };
    let rows = collect_season_stats(&source, &cache, "2023-24", &TEAMS, &NO_WAIT, true)
        .expect("collect");
    assert_eq!(rows.len(), 4);
    let mean_pts = rows.iter().map(|r| r.stats.pts).sum::<f64>() / 4.0;
    assert!(mean_pts.abs() < 1e-9);
    assert!(rows.iter().all(|r| r.stats.blk == 0.0));

    let again = collect_season_stats(&source, &cache, "2023-24", &TEAMS, &NO_WAIT, true)
        .expect("collect");
    assert_eq!(again, rows);
    assert_eq!(*source.calls.borrow(), 4);
    assert!(matches!(
        cache.lookup(&FrameCache::key("team_stats_normalized", "2023-24")),
        CacheLookup::Hit(_)
    ));
    let _ = fs::remove_dir_all(cache.dir());
}

#[test]
fn partial_league_is_not_cached() {
    let cache = FrameCache::new(scratch("partial"), Duration::from_secs(3600));
    let key = FrameCache::key("team_stats", "2023-24");
    let outage = FlakyDashboards {
        broken_team: 3,
        calls: RefCell::new(0),
    };
    let first = collect_season_stats(&outage, &cache, "2023-24", &TEAMS, &NO_WAIT, false)
        .expect("collect");
    assert_eq!(first.len(), 3);
    assert_eq!(cache.lookup(&key), CacheLookup::Miss);

    let recovered = FlakyDashboards {
        broken_team: 0,
        calls: RefCell::new(0),
    };
    let second = collect_season_stats(&recovered, &cache, "2023-24", &TEAMS, &NO_WAIT, false)
        .expect("collect");
    assert_eq!(second.len(), 4);
    assert_eq!(*recovered.calls.borrow(), 4);
    assert!(second.iter().any(|r| r.team_id == 3));
    assert!(matches!(cache.lookup(&key), CacheLookup::Hit(f) if f.len() == 4));
    let _ = fs::remove_dir_all(cache.dir());
}
