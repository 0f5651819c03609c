use std::collections::{HashMap, HashSet};
use std::fmt;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::error::PipelineError;

/// One dynamically typed value as delivered by a provider or read back from a
/// cache snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Cell::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(v) => Some(*v),
            Cell::Int(v) => Some(*v != 0),
            Cell::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Text form used for identifiers; `None` for null or empty text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) if s.trim().is_empty() => None,
            Cell::Text(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(v) => write!(f, "{v}"),
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(v) => f.write_str(v),
        }
    }
}

/// A small row-major table with named columns. Providers hand these out, the
/// cache persists them, and record conversion validates them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_columns(columns: &[&str]) -> Self {
        Self::new(columns.iter().map(|c| c.to_string()).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at `(row, column)`; missing columns read as null.
    pub fn value(&self, row: usize, column: &str) -> &Cell {
        static NULL: Cell = Cell::Null;
        match (self.rows.get(row), self.column_index(column)) {
            (Some(r), Some(idx)) => r.get(idx).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Fails with every absent column listed, before any caller starts joining.
    pub fn require_columns(&self, dataset: &str, required: &[&str]) -> Result<(), PipelineError> {
        let missing = required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::MissingColumns {
                dataset: dataset.to_string(),
                missing,
            })
        }
    }

    /// Sets `column` (appending it if absent) from a per-row function.
    pub fn set_column(&mut self, column: &str, mut f: impl FnMut(&[Cell]) -> Cell) {
        let idx = match self.column_index(column) {
            Some(idx) => idx,
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(Cell::Null);
                }
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            let value = f(row);
            row[idx] = value;
        }
    }

    /// Appends `take` columns from the first `right` row sharing the same `key`.
    pub fn left_join(&self, right: &Frame, key: &str, take: &[&str]) -> Frame {
        let mut columns = self.columns.clone();
        let take = take
            .iter()
            .filter(|c| !self.has_column(c))
            .filter_map(|c| right.column_index(c).map(|idx| (c.to_string(), idx)))
            .collect::<Vec<_>>();
        columns.extend(take.iter().map(|(name, _)| name.clone()));

        let mut index: HashMap<String, usize> = HashMap::new();
        if let Some(key_idx) = right.column_index(key) {
            for (pos, row) in right.rows.iter().enumerate() {
                if let Some(k) = row[key_idx].as_text() {
                    index.entry(k).or_insert(pos);
                }
            }
        }

        let left_key = self.column_index(key);
        let mut out = Frame::new(columns);
        for row in &self.rows {
            let mut joined = row.clone();
            let matched = left_key
                .and_then(|idx| row[idx].as_text())
                .and_then(|k| index.get(&k))
                .map(|pos| &right.rows[*pos]);
            for (_, idx) in &take {
                joined.push(matched.map(|r| r[*idx].clone()).unwrap_or(Cell::Null));
            }
            out.rows.push(joined);
        }
        out
    }

    /// Stacks frames, aligning by column name; columns absent in a part are null.
    pub fn concat(parts: &[Frame]) -> Frame {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for part in parts {
            for col in &part.columns {
                if seen.insert(col.clone()) {
                    columns.push(col.clone());
                }
            }
        }

        let mut out = Frame::new(columns);
        for part in parts {
            let mapping = out
                .columns
                .iter()
                .map(|c| part.column_index(c))
                .collect::<Vec<_>>();
            for row in &part.rows {
                out.rows.push(
                    mapping
                        .iter()
                        .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Cell::Null))
                        .collect(),
                );
            }
        }
        out
    }
}

/// Parses a stats payload shaped as `{"resultSets": [{"name", "headers", "rowSet"}]}`
/// (or the singular `resultSet`) into frames keyed by result-set name.
pub fn parse_result_sets(raw: &str) -> Result<HashMap<String, Frame>> {
    let value = serde_json::from_str::<Value>(raw.trim()).context("invalid stats json")?;
    let sets = match value.get("resultSets").or_else(|| value.get("resultSet")) {
        Some(Value::Array(arr)) => arr.clone(),
        Some(single @ Value::Object(_)) => vec![single.clone()],
        Some(Value::Null) | None => return Ok(HashMap::new()),
        Some(_) => return Err(anyhow!("resultSets has an unexpected shape")),
    };

    let mut out = HashMap::new();
    for set in &sets {
        let Some(name) = set.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let headers = set
            .get("headers")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|h| h.as_str().map(|s| s.to_string()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let mut frame = Frame::new(headers);
        if let Some(rows) = set.get("rowSet").and_then(|v| v.as_array()) {
            for row in rows {
                let Some(cells) = row.as_array() else {
                    continue;
                };
                frame.push_row(cells.iter().map(Cell::from_json).collect());
            }
        }
        out.insert(name.to_string(), frame);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(columns: &[&str], rows: Vec<Vec<Cell>>) -> Frame {
        let mut f = Frame::with_columns(columns);
        for row in rows {
            f.push_row(row);
        }
        f
    }

    #[test]
    fn require_columns_lists_every_missing_name() {
        let f = Frame::with_columns(&["GAME_ID", "TEAM_ID"]);
        let err = f
            .require_columns("game_log", &["GAME_ID", "PTS", "REB"])
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingColumns {
                dataset: "game_log".to_string(),
                missing: vec!["PTS".to_string(), "REB".to_string()],
            }
        );
    }

    #[test]
    fn concat_aligns_by_name() {
        let a = frame(&["A", "B"], vec![vec![Cell::Int(1), Cell::Int(2)]]);
        let b = frame(&["B", "C"], vec![vec![Cell::Int(3), Cell::Text("x".into())]]);
        let out = Frame::concat(&[a, b]);
        assert_eq!(out.columns(), ["A", "B", "C"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out.value(1, "A"), &Cell::Null);
        assert_eq!(out.value(1, "B"), &Cell::Int(3));
        assert_eq!(out.value(0, "C"), &Cell::Null);
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let left = frame(
            &["GAME_ID", "TEAM_ID"],
            vec![
                vec![Cell::Text("G1".into()), Cell::Int(10)],
                vec![Cell::Text("G9".into()), Cell::Int(20)],
            ],
        );
        let right = frame(
            &["GAME_ID", "HOME_TEAM_ID"],
            vec![vec![Cell::Text("G1".into()), Cell::Int(10)]],
        );
        let out = left.left_join(&right, "GAME_ID", &["HOME_TEAM_ID"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out.value(0, "HOME_TEAM_ID"), &Cell::Int(10));
        assert!(out.value(1, "HOME_TEAM_ID").is_null());
    }

    #[test]
    fn result_sets_parse_and_null_is_empty() {
        let raw = r#"{"resultSets":[{"name":"LineScore","headers":["GAME_ID","PTS"],"rowSet":[["001",101],["001",99.5]]}]}"#;
        let sets = parse_result_sets(raw).expect("valid payload");
        let line = &sets["LineScore"];
        assert_eq!(line.len(), 2);
        assert_eq!(line.value(0, "PTS"), &Cell::Int(101));
        assert_eq!(line.value(1, "PTS"), &Cell::Float(99.5));
        assert_eq!(line.value(0, "GAME_ID").as_text().as_deref(), Some("001"));

        assert!(parse_result_sets("{}").expect("empty object").is_empty());
    }
}
