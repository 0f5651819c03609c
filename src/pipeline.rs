//! Training and prediction runs. Each stage finishes before the next one
//! starts; collectors degrade per team or per date, while schema, join and
//! partition failures stop the run.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::assemble::{AssemblyReport, assemble_records};
use crate::cache::FrameCache;
use crate::config::PipelineConfig;
use crate::export::write_feature_csv;
use crate::game_log::{collect_date_range, collect_season_log, games_on_date};
use crate::model::{
    Classifier, LogisticClassifier, Metrics, ModelArtifact, TrainingSet, evaluate,
    feature_vector, model_feature_names,
};
use crate::partition::split_by_game;
use crate::providers::{GameLogSource, SeasonStatsSource};
use crate::season_stats::collect_season_stats;
use crate::stats::{GameRecord, Outcome};

/// Which games feed a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameWindow {
    /// The league game log of the configured season.
    Season,
    /// Daily scoreboards for every date in the inclusive range.
    Dates(NaiveDate, NaiveDate),
}

pub struct Sources<'a> {
    pub stats: &'a dyn SeasonStatsSource,
    pub games: &'a dyn GameLogSource,
    pub teams: &'a [(u32, &'a str)],
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub assembly: AssemblyReport,
    pub train_games: usize,
    pub test_games: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub excluded_ties: usize,
    pub excluded_incomplete: usize,
    pub excluded_unplayed: usize,
    pub test_metrics: Metrics,
    pub combined_data_path: PathBuf,
    pub model_path: PathBuf,
}

fn collect_games(
    config: &PipelineConfig,
    sources: &Sources<'_>,
    cache: &FrameCache,
    window: GameWindow,
) -> Result<Vec<GameRecord>> {
    match window {
        GameWindow::Season => {
            collect_season_log(sources.games, cache, &config.season, &config.retry)
        }
        GameWindow::Dates(start, end) => {
            if end < start {
                bail!("date range ends before it starts: {start}..{end}");
            }
            let collected = collect_date_range(sources.games, cache, start, end, &config.retry)?;
            info!(
                "date range {}..{}: {} cached, {} fetched, {} failed",
                start,
                end,
                collected.cached_dates.len(),
                collected.fetched_dates.len(),
                collected.failed_dates.len()
            );
            Ok(collected.records)
        }
    }
}

/// Collects, assembles, checkpoints, splits by game, fits and persists.
pub fn run_training(
    config: &PipelineConfig,
    sources: &Sources<'_>,
    cache: &FrameCache,
    window: GameWindow,
) -> Result<TrainingReport> {
    let season = collect_season_stats(
        sources.stats,
        cache,
        &config.season,
        sources.teams,
        &config.retry,
        config.normalize_stats,
    )?;
    let games = collect_games(config, sources, cache, window)?;

    let assembled = assemble_records(&games, &season);
    let combined_data_path = config.combined_data_path();
    write_feature_csv(&combined_data_path, &assembled.rows)?;

    let report = assembled.report.clone();
    if assembled.rows.is_empty() {
        bail!("no feature rows assembled for season {}", config.season);
    }
    if !report.is_consistent() {
        bail!(
            "assembly changed the game set or duplicated rows: {} -> {} games, {} duplicate keys",
            report.input_games,
            report.output_games,
            report.duplicate_keys
        );
    }

    let partition = split_by_game(&assembled.rows, config.test_fraction, config.split_seed)?;
    let train = TrainingSet::from_rows(&partition.train);
    let test = TrainingSet::from_rows(&partition.test);
    let excluded_ties = train.excluded_ties + test.excluded_ties;
    let excluded_incomplete = train.excluded_incomplete + test.excluded_incomplete;
    let excluded_unplayed = train.excluded_unplayed + test.excluded_unplayed;
    if excluded_ties + excluded_incomplete + excluded_unplayed > 0 {
        warn!(
            "excluded from fitting: {} ties, {} incomplete rows, {} unplayed",
            excluded_ties, excluded_incomplete, excluded_unplayed
        );
    }
    if train.is_empty() {
        bail!("no labelled, complete rows left in the training partition");
    }

    let mut model = LogisticClassifier::new(model_feature_names());
    model.fit(&train.x, &train.y)?;
    let test_metrics = evaluate(&model, &test.x, &test.y);
    info!(
        "test metrics: n={} accuracy={:.3} log_loss={:.4} brier={:.4}",
        test_metrics.samples, test_metrics.accuracy, test_metrics.log_loss, test_metrics.brier
    );

    let artifact = ModelArtifact::new(&config.season, model, Some(test_metrics));
    artifact
        .save(&config.model_path)
        .context("persist trained model")?;
    info!("model saved to {}", config.model_path.display());

    Ok(TrainingReport {
        assembly: report,
        train_games: partition.train_games.len(),
        test_games: partition.test_games.len(),
        train_rows: train.len(),
        test_rows: test.len(),
        excluded_ties,
        excluded_incomplete,
        excluded_unplayed,
        test_metrics,
        combined_data_path,
        model_path: config.model_path.clone(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub game_id: String,
    pub team_id: u32,
    pub team_name: Option<String>,
    pub opponent_team_id: Option<u32>,
    pub matchup: Option<String>,
    pub predicted: Outcome,
    pub win_probability: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRun {
    pub date: NaiveDate,
    pub predictions: Vec<Prediction>,
    /// Rows that lacked an opponent or season stats and were not scored.
    pub unscored_rows: usize,
    pub assembly: AssemblyReport,
    /// Written whenever at least one game was assembled.
    pub checkpoint_path: Option<PathBuf>,
}

/// Scores every team row of the games on `date` with the persisted model.
pub fn run_prediction(
    config: &PipelineConfig,
    sources: &Sources<'_>,
    cache: &FrameCache,
    date: NaiveDate,
) -> Result<PredictionRun> {
    let games = games_on_date(sources.games, date, &config.retry)?;
    if games.is_empty() {
        info!("no games on {}", date);
        return Ok(PredictionRun {
            date,
            predictions: Vec::new(),
            unscored_rows: 0,
            assembly: AssemblyReport::default(),
            checkpoint_path: None,
        });
    }

    let artifact = ModelArtifact::load(&config.model_path)
        .with_context(|| format!("load model {}", config.model_path.display()))?;
    artifact.model.ensure_features(&model_feature_names())?;
    if artifact.season != config.stats_season {
        info!(
            "model trained on {}, scoring with {} season stats",
            artifact.season, config.stats_season
        );
    }

    let season = collect_season_stats(
        sources.stats,
        cache,
        &config.stats_season,
        sources.teams,
        &config.retry,
        config.normalize_stats,
    )?;
    let assembled = assemble_records(&games, &season);
    let checkpoint_path = config.prediction_data_path(date);
    write_feature_csv(&checkpoint_path, &assembled.rows)?;

    let report = &assembled.report;
    if !report.is_consistent() {
        bail!(
            "scoreboard for {} changed the game set or duplicated rows: {} -> {} games, {} duplicate keys",
            date,
            report.input_games,
            report.output_games,
            report.duplicate_keys
        );
    }

    let mut predictions = Vec::with_capacity(assembled.rows.len());
    let mut unscored_rows = 0usize;
    for row in &assembled.rows {
        let Some(x) = feature_vector(row) else {
            unscored_rows += 1;
            continue;
        };
        let win_probability = artifact.model.predict_proba(&x);
        predictions.push(Prediction {
            game_id: row.game_id.clone(),
            team_id: row.team_id,
            team_name: row.team_name.clone(),
            opponent_team_id: row.opponent_team_id,
            matchup: row.matchup.clone(),
            predicted: if win_probability >= 0.5 {
                Outcome::Win
            } else {
                Outcome::Loss
            },
            win_probability,
        });
    }
    if unscored_rows > 0 {
        warn!("{} rows on {} could not be scored", unscored_rows, date);
    }
    info!("{} predictions for {}", predictions.len(), date);

    Ok(PredictionRun {
        date,
        predictions,
        unscored_rows,
        assembly: assembled.report,
        checkpoint_path: Some(checkpoint_path),
    })
}
