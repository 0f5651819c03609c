use std::collections::BTreeSet;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;

use crate::assemble::FeatureRow;
use crate::error::PipelineError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub train: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
    pub train_games: BTreeSet<String>,
    pub test_games: BTreeSet<String>,
}

/// Splits by game, never by row: the distinct game ids are shuffled with a
/// seeded generator, the first `ceil(n * test_fraction)` go to test, and rows
/// follow their game. Both sides always get at least one game.
pub fn split_by_game(
    rows: &[FeatureRow],
    test_fraction: f64,
    seed: u64,
) -> Result<Partition, PipelineError> {
    if !test_fraction.is_finite() || test_fraction <= 0.0 || test_fraction >= 1.0 {
        return Err(PipelineError::InvalidFraction(test_fraction));
    }

    // Sorted first so the shuffle depends only on the seed, not on row order.
    let mut games = rows
        .iter()
        .map(|r| r.game_id.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let n = games.len();
    if n < 2 {
        return Err(PipelineError::TooFewGames(n));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    games.shuffle(&mut rng);
    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);

    let test_games = games[..n_test]
        .iter()
        .map(|g| g.to_string())
        .collect::<BTreeSet<_>>();
    let train_games = games[n_test..]
        .iter()
        .map(|g| g.to_string())
        .collect::<BTreeSet<_>>();

    let (test, train): (Vec<FeatureRow>, Vec<FeatureRow>) = rows
        .iter()
        .cloned()
        .partition(|r| test_games.contains(&r.game_id));

    ensure_disjoint(&train_games, &test_games)?;
    ensure_rows_disjoint(&train, &test)?;
    info!(
        "partition: {} train rows / {} games, {} test rows / {} games (seed {})",
        train.len(),
        train_games.len(),
        test.len(),
        test_games.len(),
        seed
    );

    Ok(Partition {
        train,
        test,
        train_games,
        test_games,
    })
}

pub fn ensure_disjoint(
    train_games: &BTreeSet<String>,
    test_games: &BTreeSet<String>,
) -> Result<(), PipelineError> {
    let overlap = train_games
        .intersection(test_games)
        .cloned()
        .collect::<Vec<_>>();
    if overlap.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::PartitionLeak {
            count: overlap.len(),
            sample: overlap.into_iter().take(5).collect(),
        })
    }
}

/// Leak check on the rows themselves, for partitions built elsewhere.
pub fn ensure_rows_disjoint(train: &[FeatureRow], test: &[FeatureRow]) -> Result<(), PipelineError> {
    let ids = |rows: &[FeatureRow]| {
        rows.iter()
            .map(|r| r.game_id.clone())
            .collect::<BTreeSet<_>>()
    };
    ensure_disjoint(&ids(train), &ids(test))
}
