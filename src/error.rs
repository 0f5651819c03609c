use thiserror::Error;

/// Structural failures that stop a run. Transient fetch problems never end up
/// here; collectors degrade those to "no data" instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("{dataset}: missing required columns {missing:?}")]
    MissingColumns {
        dataset: String,
        missing: Vec<String>,
    },

    #[error("{dataset}: team id {team_id} appears more than once in the season snapshot")]
    DuplicateTeam { dataset: String, team_id: u32 },

    #[error("train/test leakage: {count} game ids present in both partitions (first: {sample:?})")]
    PartitionLeak { count: usize, sample: Vec<String> },

    #[error("invalid test fraction {0}; expected a value strictly between 0 and 1")]
    InvalidFraction(f64),

    #[error("need at least 2 distinct games to partition, found {0}")]
    TooFewGames(usize),

    #[error("model expects features {expected:?} but table provides {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}
