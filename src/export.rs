use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::info;

use crate::assemble::{FeatureRow, JoinRole, feature_columns};
use crate::error::PipelineError;
use crate::stats::{Outcome, STAT_COLUMNS, StatLine, parse_game_date};

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn stat_cells(out: &mut Vec<String>, stats: Option<StatLine>) {
    match stats {
        Some(s) => out.extend(s.values().iter().map(|v| v.to_string())),
        None => out.extend(std::iter::repeat_n(String::new(), STAT_COLUMNS.len())),
    }
}

/// Cells of one row in [`feature_columns`] order.
pub fn row_cells(row: &FeatureRow) -> Vec<String> {
    let mut out = vec![
        row.game_id.clone(),
        row.game_date.format("%Y-%m-%d").to_string(),
        row.matchup.clone().unwrap_or_default(),
        opt(row.is_home),
        opt(row.outcome.map(Outcome::code)),
        row.team_id.to_string(),
        opt(row.opponent_team_id),
    ];
    stat_cells(&mut out, Some(row.team_game));
    out.push(row.team_name.clone().unwrap_or_default());
    stat_cells(&mut out, row.team_season);
    out.push(row.opponent_name.clone().unwrap_or_default());
    stat_cells(&mut out, row.opponent_season);
    out
}

/// Writes the assembled table as the `combined_data.csv` checkpoint.
pub fn write_feature_csv(path: &Path, rows: &[FeatureRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("create {}", path.display()))?;
    writer.write_record(feature_columns()).context("write csv header")?;
    for row in rows {
        writer.write_record(row_cells(row)).context("write csv row")?;
    }
    writer.flush().context("flush csv")?;
    info!("wrote {} feature rows to {}", rows.len(), path.display());
    Ok(())
}

struct Columns(HashMap<String, usize>);

impl Columns {
    fn text<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        let idx = self.0.get(name)?;
        record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
    }

    fn number(&self, record: &StringRecord, name: &str) -> Result<Option<f64>> {
        self.text(record, name)
            .map(|s| s.parse::<f64>().with_context(|| format!("{name}: bad number {s:?}")))
            .transpose()
    }

    fn stats(&self, record: &StringRecord, role: JoinRole) -> Result<Option<StatLine>> {
        let mut values = [0.0; 9];
        let mut present = 0usize;
        for (slot, base) in values.iter_mut().zip(STAT_COLUMNS) {
            if let Some(v) = self.number(record, &role.column(base))? {
                *slot = v;
                present += 1;
            }
        }
        Ok((present > 0).then(|| StatLine::from_values(values)))
    }
}

/// Reads a checkpoint written by [`write_feature_csv`]. The header must carry
/// every canonical column.
pub fn read_feature_csv(path: &Path) -> Result<Vec<FeatureRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let headers = reader.headers().context("read csv header")?.clone();
    let columns = Columns(
        headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_string(), i))
            .collect(),
    );
    let missing = feature_columns()
        .into_iter()
        .filter(|c| !columns.0.contains_key(c))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            dataset: path.display().to_string(),
            missing,
        }
        .into());
    }

    let team_id_col = JoinRole::TeamGame.column("TEAM_ID");
    let opponent_id_col = JoinRole::OpponentGame.column("TEAM_ID");
    let mut out = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.context("read csv record")?;
        let at = || format!("{} row {}", path.display(), line + 1);

        let game_id = columns
            .text(&record, "GAME_ID")
            .ok_or_else(|| anyhow!("{}: empty GAME_ID", at()))?
            .to_string();
        let game_date = columns
            .text(&record, "GAME_DATE")
            .and_then(parse_game_date)
            .ok_or_else(|| anyhow!("{}: bad GAME_DATE", at()))?;
        let team_id = columns
            .text(&record, &team_id_col)
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| anyhow!("{}: bad {}", at(), team_id_col))?;
        let opponent_team_id = match columns.text(&record, &opponent_id_col) {
            Some(s) => Some(
                s.parse::<u32>()
                    .with_context(|| format!("{}: bad {}", at(), opponent_id_col))?,
            ),
            None => None,
        };

        out.push(FeatureRow {
            game_id,
            game_date,
            matchup: columns.text(&record, "MATCHUP").map(str::to_string),
            is_home: columns
                .text(&record, "IS_HOME")
                .and_then(|s| s.parse::<bool>().ok()),
            outcome: columns.text(&record, "WL").and_then(Outcome::parse),
            team_id,
            opponent_team_id,
            team_game: columns
                .stats(&record, JoinRole::TeamGame)
                .with_context(at)?
                .unwrap_or_default(),
            team_name: columns
                .text(&record, &JoinRole::TeamSeason.column("TEAM_NAME"))
                .map(str::to_string),
            team_season: columns.stats(&record, JoinRole::TeamSeason).with_context(at)?,
            opponent_name: columns
                .text(&record, &JoinRole::OpponentSeason.column("TEAM_NAME"))
                .map(str::to_string),
            opponent_season: columns
                .stats(&record, JoinRole::OpponentSeason)
                .with_context(at)?,
        });
    }
    Ok(out)
}
