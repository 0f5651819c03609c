//! Feature assembly: one row per (game, team) holding the team's box score,
//! its opponent, and both sides' season aggregates.
//!
//! Column names come from a fixed suffix per [`JoinRole`], so the table has
//! the same, collision-free header whatever statistics are present.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::opponents::{OpponentMapping, resolve_opponents};
use crate::stats::{
    GAME_LOG_REQUIRED, GameRecord, Outcome, SEASON_STATS_REQUIRED, STAT_COLUMNS, StatLine,
    TeamSeasonStats, game_records_from_frame, season_stats_from_frame,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinRole {
    TeamGame,
    TeamSeason,
    OpponentGame,
    OpponentSeason,
}

impl JoinRole {
    pub const ALL: [JoinRole; 4] = [
        JoinRole::TeamGame,
        JoinRole::TeamSeason,
        JoinRole::OpponentGame,
        JoinRole::OpponentSeason,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            JoinRole::TeamGame => "_team_game",
            JoinRole::TeamSeason => "_team_season",
            JoinRole::OpponentGame => "_opponent_game",
            JoinRole::OpponentSeason => "_opponent_season",
        }
    }

    pub fn column(self, base: &str) -> String {
        format!("{base}{}", self.suffix())
    }
}

/// Columns that describe the game itself and carry no role suffix.
pub const GAME_COLUMNS: [&str; 5] = ["GAME_ID", "GAME_DATE", "MATCHUP", "IS_HOME", "WL"];

/// The full header of an assembled table, in canonical order.
pub fn feature_columns() -> Vec<String> {
    let mut cols = GAME_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    cols.push(JoinRole::TeamGame.column("TEAM_ID"));
    cols.push(JoinRole::OpponentGame.column("TEAM_ID"));
    cols.extend(STAT_COLUMNS.iter().map(|c| JoinRole::TeamGame.column(c)));
    cols.push(JoinRole::TeamSeason.column("TEAM_NAME"));
    cols.extend(STAT_COLUMNS.iter().map(|c| JoinRole::TeamSeason.column(c)));
    cols.push(JoinRole::OpponentSeason.column("TEAM_NAME"));
    cols.extend(STAT_COLUMNS.iter().map(|c| JoinRole::OpponentSeason.column(c)));
    cols
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub game_id: String,
    pub game_date: NaiveDate,
    pub matchup: Option<String>,
    pub is_home: Option<bool>,
    pub outcome: Option<Outcome>,
    pub team_id: u32,
    pub opponent_team_id: Option<u32>,
    pub team_game: StatLine,
    pub team_name: Option<String>,
    pub team_season: Option<StatLine>,
    pub opponent_name: Option<String>,
    pub opponent_season: Option<StatLine>,
}

impl FeatureRow {
    pub fn key(&self) -> (&str, u32) {
        (self.game_id.as_str(), self.team_id)
    }

    /// Both season joins matched and an opponent was resolved.
    pub fn is_complete(&self) -> bool {
        self.opponent_team_id.is_some()
            && self.team_season.is_some()
            && self.opponent_season.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub input_rows: usize,
    pub input_games: usize,
    pub output_rows: usize,
    pub output_games: usize,
    pub duplicate_keys: usize,
    pub missing_opponent: usize,
    pub missing_team_season: usize,
    pub missing_opponent_season: usize,
    /// Games the opponent resolver could not pair (filled by [`assemble_records`]).
    pub skipped_games: usize,
}

impl AssemblyReport {
    /// No games gained or lost and no (game, team) key repeated.
    pub fn is_consistent(&self) -> bool {
        self.input_games == self.output_games && self.duplicate_keys == 0
    }

    pub fn has_degeneracy(&self) -> bool {
        self.output_rows == 0 || self.skipped_games > 0 || self.missing_opponent > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembled {
    pub rows: Vec<FeatureRow>,
    pub report: AssemblyReport,
}

fn distinct_games<'a>(ids: impl Iterator<Item = &'a str>) -> usize {
    ids.collect::<HashSet<_>>().len()
}

/// Joins game records to their opponent, then to season stats twice: once on
/// the team and once on the opponent. Every join is a left join against a
/// unique key, so each input record yields exactly one row.
pub fn assemble(
    games: &[GameRecord],
    season: &[TeamSeasonStats],
    opponents: &[OpponentMapping],
) -> Assembled {
    let mut opponent_of: HashMap<(&str, u32), u32> = HashMap::with_capacity(opponents.len());
    for m in opponents {
        opponent_of
            .entry((m.game_id.as_str(), m.team_id))
            .or_insert(m.opponent_team_id);
    }
    let mut season_of: HashMap<u32, &TeamSeasonStats> = HashMap::with_capacity(season.len());
    for s in season {
        season_of.entry(s.team_id).or_insert(s);
    }

    let mut report = AssemblyReport {
        input_rows: games.len(),
        input_games: distinct_games(games.iter().map(|g| g.game_id.as_str())),
        ..AssemblyReport::default()
    };

    let mut rows = Vec::with_capacity(games.len());
    for g in games {
        let opponent_team_id = opponent_of.get(&(g.game_id.as_str(), g.team_id)).copied();
        if opponent_team_id.is_none() {
            report.missing_opponent += 1;
        }
        let team = season_of.get(&g.team_id);
        if team.is_none() {
            report.missing_team_season += 1;
        }
        let opponent = opponent_team_id.and_then(|id| season_of.get(&id));
        if opponent.is_none() {
            report.missing_opponent_season += 1;
        }

        rows.push(FeatureRow {
            game_id: g.game_id.clone(),
            game_date: g.game_date,
            matchup: g.matchup.clone(),
            is_home: g.is_home,
            outcome: g.outcome,
            team_id: g.team_id,
            opponent_team_id,
            team_game: g.box_score,
            team_name: team.map(|t| t.team_name.clone()),
            team_season: team.map(|t| t.stats),
            opponent_name: opponent.map(|t| t.team_name.clone()),
            opponent_season: opponent.map(|t| t.stats),
        });
    }
    info!(
        "opponent join: {} rows, {} without opponent",
        rows.len(),
        report.missing_opponent
    );
    info!(
        "season joins: {} rows without team stats, {} without opponent stats",
        report.missing_team_season, report.missing_opponent_season
    );

    let mut seen = HashSet::with_capacity(rows.len());
    report.duplicate_keys = rows.iter().filter(|r| !seen.insert(r.key())).count();
    report.output_rows = rows.len();
    report.output_games = distinct_games(rows.iter().map(|r| r.game_id.as_str()));
    info!(
        "assembled {} rows over {} games, {} duplicate keys",
        report.output_rows, report.output_games, report.duplicate_keys
    );

    if report.output_rows == 0 {
        warn!("feature assembly produced zero rows; check the game log provider");
    }
    if report.missing_opponent > 0 {
        warn!(
            "{} rows have no opponent and must not be trained on",
            report.missing_opponent
        );
    }
    if report.duplicate_keys > 0 {
        warn!("{} duplicate (game, team) rows in assembled table", report.duplicate_keys);
    }

    Assembled { rows, report }
}

/// Validates both input frames, then resolves opponents and assembles. Schema
/// problems are returned before any join runs.
pub fn assemble_from_frames(
    game_log: &Frame,
    season_stats: &Frame,
) -> Result<Assembled, PipelineError> {
    if !game_log.columns().is_empty() {
        game_log.require_columns("game_log", &GAME_LOG_REQUIRED)?;
    }
    season_stats.require_columns("team_season_stats", &SEASON_STATS_REQUIRED)?;

    let games = game_records_from_frame(game_log)?;
    let season = season_stats_from_frame(season_stats)?;
    Ok(assemble_records(&games, &season))
}

/// Resolves opponents and assembles typed records.
pub fn assemble_records(games: &[GameRecord], season: &[TeamSeasonStats]) -> Assembled {
    let resolution = resolve_opponents(games);
    let mut assembled = assemble(games, season, &resolution.mappings);
    assembled.report.skipped_games = resolution.skipped.len();
    if !resolution.skipped.is_empty() {
        warn!(
            "join degeneracy: {} games without exactly two participants",
            resolution.skipped.len()
        );
    }
    assembled
}
