use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::warn;

use crate::error::PipelineError;
use crate::frame::{Cell, Frame};

/// Statistic columns shared by box scores and season aggregates, in feature order.
pub const STAT_COLUMNS: [&str; 9] = [
    "FG_PCT", "FG3_PCT", "FT_PCT", "REB", "AST", "TOV", "STL", "BLK", "PTS",
];

/// Box-score columns a game log cannot be used without.
pub const GAME_LOG_REQUIRED: [&str; 7] =
    ["GAME_ID", "TEAM_ID", "GAME_DATE", "FG_PCT", "REB", "AST", "PTS"];

pub const SEASON_STATS_REQUIRED: [&str; 11] = [
    "TEAM_ID", "TEAM_NAME", "FG_PCT", "FG3_PCT", "FT_PCT", "REB", "AST", "TOV", "STL", "BLK",
    "PTS",
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatLine {
    pub fg_pct: f64,
    pub fg3_pct: f64,
    pub ft_pct: f64,
    pub reb: f64,
    pub ast: f64,
    pub tov: f64,
    pub stl: f64,
    pub blk: f64,
    pub pts: f64,
}

impl StatLine {
    pub fn values(&self) -> [f64; 9] {
        [
            self.fg_pct,
            self.fg3_pct,
            self.ft_pct,
            self.reb,
            self.ast,
            self.tov,
            self.stl,
            self.blk,
            self.pts,
        ]
    }

    pub fn from_values(v: [f64; 9]) -> Self {
        Self {
            fg_pct: v[0],
            fg3_pct: v[1],
            ft_pct: v[2],
            reb: v[3],
            ast: v[4],
            tov: v[5],
            stl: v[6],
            blk: v[7],
            pts: v[8],
        }
    }

    /// Reads the stat columns of one frame row; null or absent cells become 0.
    fn from_frame_row(frame: &Frame, row: usize) -> Self {
        let mut values = [0.0; 9];
        for (slot, column) in values.iter_mut().zip(STAT_COLUMNS) {
            *slot = frame.value(row, column).as_f64().unwrap_or(0.0);
        }
        Self::from_values(values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Win,
    Loss,
    Tie,
}

impl Outcome {
    pub fn code(self) -> &'static str {
        match self {
            Outcome::Win => "W",
            Outcome::Loss => "L",
            Outcome::Tie => "T",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "W" => Some(Outcome::Win),
            "L" => Some(Outcome::Loss),
            "T" | "D" => Some(Outcome::Tie),
            _ => None,
        }
    }
}

/// Outcome implied by two final scores, from the first team's side.
pub fn outcome_from_points(points: f64, opponent_points: f64) -> Outcome {
    if points > opponent_points {
        Outcome::Win
    } else if points < opponent_points {
        Outcome::Loss
    } else {
        Outcome::Tie
    }
}

/// One team's participation in one game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub game_id: String,
    pub team_id: u32,
    pub game_date: NaiveDate,
    pub matchup: Option<String>,
    pub is_home: Option<bool>,
    pub box_score: StatLine,
    /// `None` until the game has been played.
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamSeasonStats {
    pub team_id: u32,
    pub team_name: String,
    pub stats: StatLine,
}

pub fn parse_game_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%b %d, %Y"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// `"BOS vs. LAL"` is a home game for BOS, `"BOS @ LAL"` an away one.
pub fn is_home_from_matchup(matchup: &str) -> Option<bool> {
    if matchup.contains(" vs. ") || matchup.contains(" vs ") {
        Some(true)
    } else if matchup.contains(" @ ") {
        Some(false)
    } else {
        None
    }
}

/// Converts a game-log frame into records. Missing required columns fail the
/// whole conversion; rows with an unusable id or date are dropped with a warning.
/// A frame with no columns at all carries no games and converts to nothing.
pub fn game_records_from_frame(frame: &Frame) -> Result<Vec<GameRecord>, PipelineError> {
    if frame.columns().is_empty() {
        return Ok(Vec::new());
    }
    frame.require_columns("game_log", &GAME_LOG_REQUIRED)?;
    let absent = STAT_COLUMNS
        .iter()
        .filter(|c| !frame.has_column(c))
        .collect::<Vec<_>>();
    if !absent.is_empty() {
        warn!("game log has no {:?} columns; those statistics read as 0", absent);
    }

    let has_wl = frame.has_column("WL");
    let mut out = Vec::with_capacity(frame.len());
    let mut dropped = 0usize;
    for row in 0..frame.len() {
        let game_id = frame.value(row, "GAME_ID").as_text();
        let team_id = frame
            .value(row, "TEAM_ID")
            .as_i64()
            .and_then(|v| u32::try_from(v).ok());
        let game_date = frame
            .value(row, "GAME_DATE")
            .as_text()
            .as_deref()
            .and_then(parse_game_date);
        let (Some(game_id), Some(team_id), Some(game_date)) = (game_id, team_id, game_date) else {
            dropped += 1;
            continue;
        };

        let matchup = frame.value(row, "MATCHUP").as_text();
        let is_home = frame
            .value(row, "IS_HOME")
            .as_bool()
            .or_else(|| matchup.as_deref().and_then(is_home_from_matchup));
        let outcome = if has_wl {
            frame
                .value(row, "WL")
                .as_text()
                .as_deref()
                .and_then(Outcome::parse)
        } else {
            None
        };

        out.push(GameRecord {
            game_id,
            team_id,
            game_date,
            matchup,
            is_home,
            box_score: StatLine::from_frame_row(frame, row),
            outcome,
        });
    }
    if dropped > 0 {
        warn!("dropped {} game log rows without a usable id or date", dropped);
    }

    if !has_wl {
        derive_outcomes_from_points(frame, &mut out);
    }
    Ok(out)
}

/// Fills outcomes for sources without a `WL` column by comparing the points of
/// the two participants. Games whose points are not both present stay unknown.
fn derive_outcomes_from_points(frame: &Frame, records: &mut [GameRecord]) {
    let scored = (0..frame.len())
        .filter_map(|row| {
            let game_id = frame.value(row, "GAME_ID").as_text()?;
            let team_id = frame.value(row, "TEAM_ID").as_i64()?;
            let pts = frame.value(row, "PTS").as_f64()?;
            Some(((game_id, team_id as u32), pts))
        })
        .collect::<HashMap<_, _>>();

    let mut teams_by_game: HashMap<&str, Vec<u32>> = HashMap::new();
    for r in records.iter() {
        teams_by_game.entry(r.game_id.as_str()).or_default().push(r.team_id);
    }

    let mut resolved = Vec::with_capacity(records.len());
    for r in records.iter() {
        let teams = &teams_by_game[r.game_id.as_str()];
        let outcome = if teams.len() == 2 && teams[0] != teams[1] {
            let other = if teams[0] == r.team_id { teams[1] } else { teams[0] };
            let own = scored.get(&(r.game_id.clone(), r.team_id));
            let theirs = scored.get(&(r.game_id.clone(), other));
            match (own, theirs) {
                (Some(a), Some(b)) => Some(outcome_from_points(*a, *b)),
                _ => None,
            }
        } else {
            None
        };
        resolved.push(outcome);
    }
    for (r, outcome) in records.iter_mut().zip(resolved) {
        r.outcome = outcome;
    }
}

pub fn season_stats_from_frame(frame: &Frame) -> Result<Vec<TeamSeasonStats>, PipelineError> {
    frame.require_columns("team_season_stats", &SEASON_STATS_REQUIRED)?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(frame.len());
    for row in 0..frame.len() {
        let Some(team_id) = frame
            .value(row, "TEAM_ID")
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
        else {
            warn!("season stats row {} has no usable TEAM_ID", row);
            continue;
        };
        if !seen.insert(team_id) {
            return Err(PipelineError::DuplicateTeam {
                dataset: "team_season_stats".to_string(),
                team_id,
            });
        }
        out.push(TeamSeasonStats {
            team_id,
            team_name: frame.value(row, "TEAM_NAME").as_text().unwrap_or_default(),
            stats: StatLine::from_frame_row(frame, row),
        });
    }
    Ok(out)
}

pub fn season_stats_to_frame(rows: &[TeamSeasonStats]) -> Frame {
    let mut columns = vec!["TEAM_ID", "TEAM_NAME"];
    columns.extend(STAT_COLUMNS);
    let mut frame = Frame::with_columns(&columns);
    for r in rows {
        let mut cells = vec![Cell::Int(r.team_id as i64), Cell::Text(r.team_name.clone())];
        cells.extend(r.stats.values().into_iter().map(Cell::Float));
        frame.push_row(cells);
    }
    frame
}

/// Rescales every statistic to zero mean and unit population variance across
/// teams. Constant statistics become 0.
pub fn standardize(rows: &mut [TeamSeasonStats]) {
    if rows.is_empty() {
        return;
    }
    let n = rows.len() as f64;
    for k in 0..STAT_COLUMNS.len() {
        let mean = rows.iter().map(|r| r.stats.values()[k]).sum::<f64>() / n;
        let var = rows
            .iter()
            .map(|r| (r.stats.values()[k] - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        for r in rows.iter_mut() {
            let mut values = r.stats.values();
            values[k] = if std > 1e-12 { (values[k] - mean) / std } else { 0.0 };
            r.stats = StatLine::from_values(values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_frame(with_wl: bool) -> Frame {
        let mut cols = vec!["GAME_ID", "TEAM_ID", "GAME_DATE", "MATCHUP"];
        if with_wl {
            cols.push("WL");
        }
        cols.extend(STAT_COLUMNS);
        let mut f = Frame::with_columns(&cols);
        for (team, matchup, wl, pts) in [(10, "AAA vs. BBB", "W", 100), (20, "BBB @ AAA", "L", 90)] {
            let mut row = vec![
                Cell::Text("G1".into()),
                Cell::Int(team),
                Cell::Text("2024-01-05T00:00:00".into()),
                Cell::Text(matchup.into()),
            ];
            if with_wl {
                row.push(Cell::Text(wl.into()));
            }
            row.extend([0.45, 0.35, 0.8, 44.0, 25.0, 12.0, 7.0, 5.0].map(Cell::Float));
            row.push(Cell::Int(pts));
            f.push_row(row);
        }
        f
    }

    #[test]
    fn reads_wl_and_home_from_log() {
        let records = game_records_from_frame(&log_frame(true)).expect("valid frame");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, Some(Outcome::Win));
        assert_eq!(records[0].is_home, Some(true));
        assert_eq!(records[1].is_home, Some(false));
        assert_eq!(records[1].box_score.pts, 90.0);
        assert_eq!(
            records[0].game_date,
            NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date")
        );
    }

    #[test]
    fn derives_outcome_from_points_without_wl() {
        let records = game_records_from_frame(&log_frame(false)).expect("valid frame");
        assert_eq!(records[0].outcome, Some(Outcome::Win));
        assert_eq!(records[1].outcome, Some(Outcome::Loss));
    }

    #[test]
    fn duplicated_team_row_gets_no_derived_outcome() {
        let mut frame = log_frame(false);
        frame.set_column("TEAM_ID", |_| Cell::Int(10));
        let records = game_records_from_frame(&frame).expect("valid frame");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.outcome.is_none()));
    }

    #[test]
    fn missing_columns_fail_fast() {
        let f = Frame::with_columns(&["GAME_ID", "TEAM_ID"]);
        let err = game_records_from_frame(&f).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumns { ref missing, .. } if missing.contains(&"PTS".to_string())));
    }

    #[test]
    fn duplicate_team_in_season_snapshot_is_rejected() {
        let rows = vec![
            TeamSeasonStats {
                team_id: 1,
                team_name: "A".into(),
                stats: StatLine::default(),
            },
            TeamSeasonStats {
                team_id: 1,
                team_name: "A again".into(),
                stats: StatLine::default(),
            },
        ];
        let err = season_stats_from_frame(&season_stats_to_frame(&rows)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::DuplicateTeam {
                dataset: "team_season_stats".into(),
                team_id: 1
            }
        );
    }

    #[test]
    fn standardize_centers_and_scales() {
        let mut rows = [1.0, 3.0]
            .into_iter()
            .enumerate()
            .map(|(i, pts)| TeamSeasonStats {
                team_id: i as u32,
                team_name: format!("T{i}"),
                stats: StatLine {
                    pts,
                    reb: 40.0,
                    ..StatLine::default()
                },
            })
            .collect::<Vec<_>>();
        standardize(&mut rows);
        assert!((rows[0].stats.pts + 1.0).abs() < 1e-12);
        assert!((rows[1].stats.pts - 1.0).abs() < 1e-12);
        assert_eq!(rows[0].stats.reb, 0.0);
    }

    #[test]
    fn date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date");
        assert_eq!(parse_game_date("2024-03-09"), Some(d));
        assert_eq!(parse_game_date("MAR 09, 2024"), Some(d));
        assert_eq!(parse_game_date("03/09/2024"), Some(d));
        assert_eq!(parse_game_date("soon"), None);
    }
}
