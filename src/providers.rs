use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use reqwest::blocking::Client;

use crate::frame::{Cell, Frame, parse_result_sets};
use crate::http_client::get_text;

/// The 30 franchises as `(team id, full name)`.
pub const NBA_TEAMS: [(u32, &str); 30] = [
    (1610612737, "Atlanta Hawks"),
    (1610612738, "Boston Celtics"),
    (1610612739, "Cleveland Cavaliers"),
    (1610612740, "New Orleans Pelicans"),
    (1610612741, "Chicago Bulls"),
    (1610612742, "Dallas Mavericks"),
    (1610612743, "Denver Nuggets"),
    (1610612744, "Golden State Warriors"),
    (1610612745, "Houston Rockets"),
    (1610612746, "LA Clippers"),
    (1610612747, "Los Angeles Lakers"),
    (1610612748, "Miami Heat"),
    (1610612749, "Milwaukee Bucks"),
    (1610612750, "Minnesota Timberwolves"),
    (1610612751, "Brooklyn Nets"),
    (1610612752, "New York Knicks"),
    (1610612753, "Orlando Magic"),
    (1610612754, "Indiana Pacers"),
    (1610612755, "Philadelphia 76ers"),
    (1610612756, "Phoenix Suns"),
    (1610612757, "Portland Trail Blazers"),
    (1610612758, "Sacramento Kings"),
    (1610612759, "San Antonio Spurs"),
    (1610612760, "Oklahoma City Thunder"),
    (1610612761, "Toronto Raptors"),
    (1610612762, "Utah Jazz"),
    (1610612763, "Memphis Grizzlies"),
    (1610612764, "Washington Wizards"),
    (1610612765, "Detroit Pistons"),
    (1610612766, "Charlotte Hornets"),
];

/// Source of per-team season aggregates. An `Err` is a transient failure the
/// caller may retry.
pub trait SeasonStatsSource {
    fn team_dashboard(&self, team_id: u32, season: &str) -> Result<Frame>;
}

/// Source of per-(game, team) box scores.
pub trait GameLogSource {
    fn season_game_log(&self, season: &str) -> Result<Frame>;
    fn scoreboard(&self, date: NaiveDate) -> Result<Frame>;
}

/// stats.nba.com over a caller-supplied client.
pub struct NbaStatsApi {
    client: Client,
    base_url: String,
}

impl NbaStatsApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}

impl SeasonStatsSource for NbaStatsApi {
    fn team_dashboard(&self, team_id: u32, season: &str) -> Result<Frame> {
        let mut query = vec![
            ("TeamID", team_id.to_string()),
            ("Season", season.to_string()),
            ("SeasonType", "Regular Season".to_string()),
            ("MeasureType", "Base".to_string()),
            ("PerMode", "PerGame".to_string()),
            ("LeagueID", "00".to_string()),
        ];
        for key in ["PlusMinus", "PaceAdjust", "Rank"] {
            query.push((key, "N".to_string()));
        }
        for key in [
            "Month",
            "OpponentTeamID",
            "Period",
            "LastNGames",
            "PORound",
        ] {
            query.push((key, "0".to_string()));
        }
        for key in [
            "DateFrom",
            "DateTo",
            "GameSegment",
            "Location",
            "Outcome",
            "SeasonSegment",
            "VsConference",
            "VsDivision",
            "ShotClockRange",
        ] {
            query.push((key, String::new()));
        }
        let body = get_text(&self.client, &self.endpoint("teamdashboardbygeneralsplits"), &query)
            .with_context(|| format!("team dashboard {team_id} {season}"))?;
        parse_team_dashboard_json(&body)
    }
}

impl GameLogSource for NbaStatsApi {
    fn season_game_log(&self, season: &str) -> Result<Frame> {
        let query = [
            ("Counter", "0".to_string()),
            ("Direction", "ASC".to_string()),
            ("LeagueID", "00".to_string()),
            ("PlayerOrTeam", "T".to_string()),
            ("Season", season.to_string()),
            ("SeasonType", "Regular Season".to_string()),
            ("Sorter", "DATE".to_string()),
            ("DateFrom", String::new()),
            ("DateTo", String::new()),
        ];
        let body = get_text(&self.client, &self.endpoint("leaguegamelog"), &query)
            .with_context(|| format!("league game log {season}"))?;
        parse_league_game_log_json(&body)
    }

    fn scoreboard(&self, date: NaiveDate) -> Result<Frame> {
        let query = [
            ("GameDate", date.format("%m/%d/%Y").to_string()),
            ("LeagueID", "00".to_string()),
            ("DayOffset", "0".to_string()),
        ];
        let body = get_text(&self.client, &self.endpoint("scoreboardV2"), &query)
            .with_context(|| format!("scoreboard {date}"))?;
        parse_scoreboard_json(&body, date)
    }
}

/// `OverallTeamDashboard` rows of a general-splits payload.
pub fn parse_team_dashboard_json(raw: &str) -> Result<Frame> {
    let mut sets = parse_result_sets(raw)?;
    sets.remove("OverallTeamDashboard")
        .ok_or_else(|| anyhow!("payload has no OverallTeamDashboard result set"))
}

pub fn parse_league_game_log_json(raw: &str) -> Result<Frame> {
    let mut sets = parse_result_sets(raw)?;
    sets.remove("LeagueGameLog")
        .ok_or_else(|| anyhow!("payload has no LeagueGameLog result set"))
}

/// One row per (game, team) for a date: `LineScore` joined to `GameHeader` on
/// `GAME_ID`, with `IS_HOME` and `GAME_DATE` added. A payload without both
/// result sets, or with no rows, is an empty frame: no games that day.
pub fn parse_scoreboard_json(raw: &str, date: NaiveDate) -> Result<Frame> {
    let sets = parse_result_sets(raw)?;
    let (Some(line_score), Some(game_header)) = (sets.get("LineScore"), sets.get("GameHeader"))
    else {
        return Ok(Frame::default());
    };
    if line_score.is_empty() || game_header.is_empty() {
        return Ok(Frame::default());
    }

    let mut merged = line_score.left_join(game_header, "GAME_ID", &["HOME_TEAM_ID", "VISITOR_TEAM_ID"]);
    let team_idx = merged.column_index("TEAM_ID");
    let home_idx = merged.column_index("HOME_TEAM_ID");
    merged.set_column("IS_HOME", |row| {
        let team = team_idx.and_then(|i| row[i].as_i64());
        let home = home_idx.and_then(|i| row[i].as_i64());
        match (team, home) {
            (Some(t), Some(h)) => Cell::Bool(t == h),
            _ => Cell::Null,
        }
    });
    let stamp = date.format("%Y-%m-%d").to_string();
    merged.set_column("GAME_DATE", |_| Cell::Text(stamp.clone()));
    Ok(merged)
}
