use std::collections::BTreeMap;

use tracing::warn;

use crate::stats::GameRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpponentMapping {
    pub game_id: String,
    pub team_id: u32,
    pub opponent_team_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpponentResolution {
    pub mappings: Vec<OpponentMapping>,
    /// Games that did not have exactly two participants, with their row count.
    pub skipped: Vec<(String, usize)>,
}

/// Pairs the two participants of every game. Groups that are not exactly two
/// distinct teams emit no mapping and are reported in `skipped`.
pub fn resolve_opponents(records: &[GameRecord]) -> OpponentResolution {
    let mut groups: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for r in records {
        groups.entry(r.game_id.as_str()).or_default().push(r.team_id);
    }

    let mut out = OpponentResolution::default();
    for (game_id, teams) in groups {
        let (a, b) = match teams.as_slice() {
            &[a, b] if a != b => (a, b),
            &[a, _] => {
                warn!(
                    "game {} lists team {} twice; no opponent mapping",
                    game_id, a
                );
                out.skipped.push((game_id.to_string(), teams.len()));
                continue;
            }
            _ => {
                warn!(
                    "game {} has {} participant rows, expected 2; no opponent mapping",
                    game_id,
                    teams.len()
                );
                out.skipped.push((game_id.to_string(), teams.len()));
                continue;
            }
        };
        out.mappings.push(OpponentMapping {
            game_id: game_id.to_string(),
            team_id: a,
            opponent_team_id: b,
        });
        out.mappings.push(OpponentMapping {
            game_id: game_id.to_string(),
            team_id: b,
            opponent_team_id: a,
        });
    }
    out
}
