use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assemble::{FeatureRow, JoinRole};
use crate::error::PipelineError;
use crate::stats::{Outcome, STAT_COLUMNS};

const ARTIFACT_VERSION: u32 = 1;
const MAX_ITERS: usize = 800;
const LR_START: f64 = 0.5;
const L2_REG: f64 = 1e-3;

/// Model inputs, named after the assembled columns they are read from.
pub fn model_feature_names() -> Vec<String> {
    let mut names = vec!["IS_HOME".to_string()];
    for role in [JoinRole::TeamGame, JoinRole::TeamSeason, JoinRole::OpponentSeason] {
        names.extend(STAT_COLUMNS.iter().map(|c| role.column(c)));
    }
    names
}

/// Numeric inputs for one row, or `None` when a season side is missing.
pub fn feature_vector(row: &FeatureRow) -> Option<Vec<f64>> {
    let team_season = row.team_season?;
    let opponent_season = row.opponent_season?;
    row.opponent_team_id?;

    let mut x = Vec::with_capacity(1 + 3 * STAT_COLUMNS.len());
    x.push(match row.is_home {
        Some(true) => 1.0,
        Some(false) => 0.0,
        None => 0.5,
    });
    x.extend(row.team_game.values());
    x.extend(team_season.values());
    x.extend(opponent_season.values());
    Some(x)
}

/// Binary label: win is positive. Ties and unplayed games have none.
pub fn label(row: &FeatureRow) -> Option<bool> {
    match row.outcome? {
        Outcome::Win => Some(true),
        Outcome::Loss => Some(false),
        Outcome::Tie => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<bool>,
    pub excluded_incomplete: usize,
    pub excluded_ties: usize,
    pub excluded_unplayed: usize,
}

impl TrainingSet {
    /// Keeps rows that have an opponent, both season sides and a win/loss label.
    pub fn from_rows(rows: &[FeatureRow]) -> Self {
        let mut out = Self::default();
        for row in rows {
            let Some(x) = feature_vector(row) else {
                out.excluded_incomplete += 1;
                continue;
            };
            match row.outcome {
                None => out.excluded_unplayed += 1,
                Some(Outcome::Tie) => out.excluded_ties += 1,
                Some(_) => {
                    if let Some(y) = label(row) {
                        out.x.push(x);
                        out.y.push(y);
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

pub trait Classifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[bool]) -> Result<()>;

    /// Probability that the row's team wins.
    fn predict_proba(&self, x: &[f64]) -> f64;

    fn predict(&self, x: &[f64]) -> bool {
        self.predict_proba(x) >= 0.5
    }
}

/// L2-regularised logistic regression over standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub feature_names: Vec<String>,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
    pub coeffs: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub train_samples: usize,
    #[serde(default)]
    pub train_log_loss: Option<f64>,
}

impl LogisticClassifier {
    pub fn new(feature_names: Vec<String>) -> Self {
        let k = feature_names.len();
        Self {
            feature_names,
            feature_means: vec![0.0; k],
            feature_stds: vec![1.0; k],
            coeffs: vec![0.0; k],
            intercept: 0.0,
            train_samples: 0,
            train_log_loss: None,
        }
    }

    fn standardized<'a>(&'a self, x: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
        x.iter()
            .zip(self.feature_means.iter().zip(&self.feature_stds))
            .map(|(v, (m, s))| (v - m) / s.max(1e-9))
    }

    fn logit(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .standardized(x)
                .zip(&self.coeffs)
                .map(|(v, c)| v * c)
                .sum::<f64>()
    }

    /// Parameters that would not survive a JSON round trip.
    pub fn ensure_finite(&self) -> Result<()> {
        let params = self
            .feature_means
            .iter()
            .chain(&self.feature_stds)
            .chain(&self.coeffs)
            .chain(std::iter::once(&self.intercept));
        if params.clone().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(anyhow!(
                "model has {} non-finite parameters",
                params.filter(|v| !v.is_finite()).count()
            ))
        }
    }

    pub fn ensure_features(&self, names: &[String]) -> Result<(), PipelineError> {
        if self.feature_names == names {
            Ok(())
        } else {
            Err(PipelineError::FeatureMismatch {
                expected: self.feature_names.clone(),
                found: names.to_vec(),
            })
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier for LogisticClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[bool]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(anyhow!(
                "cannot fit on {} rows with {} labels",
                x.len(),
                y.len()
            ));
        }
        let k = self.feature_names.len();
        if let Some(bad) = x.iter().find(|row| row.len() != k) {
            return Err(anyhow!("row has {} features, model expects {}", bad.len(), k));
        }

        let n = x.len() as f64;
        for j in 0..k {
            let mean = x.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = x.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
            self.feature_means[j] = mean;
            self.feature_stds[j] = var.sqrt().max(1e-6);
        }
        let z = x
            .iter()
            .map(|r| self.standardized(r).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        self.coeffs = vec![0.0; k];
        self.intercept = 0.0;
        for iter in 0..MAX_ITERS {
            let mut grad = vec![0.0; k];
            let mut grad_b = 0.0;
            for (row, target) in z.iter().zip(y) {
                let p = sigmoid(
                    self.intercept + row.iter().zip(&self.coeffs).map(|(v, c)| v * c).sum::<f64>(),
                );
                let err = p - if *target { 1.0 } else { 0.0 };
                grad_b += err;
                for j in 0..k {
                    grad[j] += err * row[j];
                }
            }
            let lr = LR_START / (1.0 + iter as f64 * 0.003);
            for j in 0..k {
                self.coeffs[j] -= lr * (grad[j] / n + L2_REG * self.coeffs[j]);
            }
            self.intercept -= lr * grad_b / n;
        }

        self.train_samples = x.len();
        let log_loss = evaluate(&*self, x, y).log_loss;
        self.train_log_loss = log_loss.is_finite().then_some(log_loss);
        info!(
            "fitted logistic model on {} rows, train log_loss={:.4}",
            self.train_samples, log_loss
        );
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.logit(x))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
}

pub fn evaluate(model: &dyn Classifier, x: &[Vec<f64>], y: &[bool]) -> Metrics {
    if x.is_empty() || x.len() != y.len() {
        return Metrics {
            samples: 0,
            accuracy: 0.0,
            log_loss: 0.0,
            brier: 0.0,
        };
    }
    let mut correct = 0usize;
    let mut log_loss = 0.0;
    let mut brier = 0.0;
    for (row, target) in x.iter().zip(y) {
        let p = model.predict_proba(row);
        let t = if *target { 1.0 } else { 0.0 };
        if (p >= 0.5) == *target {
            correct += 1;
        }
        let p_actual = if *target { p } else { 1.0 - p };
        log_loss += -p_actual.clamp(1e-12, 1.0).ln();
        brier += (p - t).powi(2);
    }
    let n = x.len() as f64;
    Metrics {
        samples: x.len(),
        accuracy: correct as f64 / n,
        log_loss: log_loss / n,
        brier: brier / n,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub generated_at: String,
    pub season: String,
    pub model: LogisticClassifier,
    #[serde(default)]
    pub test_metrics: Option<Metrics>,
}

impl ModelArtifact {
    pub fn new(season: &str, model: LogisticClassifier, test_metrics: Option<Metrics>) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            season: season.to_string(),
            model,
            test_metrics,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.model.ensure_finite().context("refusing to save model")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create model dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize model artifact")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let artifact =
            serde_json::from_str::<Self>(&raw).context("invalid model artifact json")?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(anyhow!(
                "model artifact version {} not supported (expected {})",
                artifact.version,
                ARTIFACT_VERSION
            ));
        }
        Ok(artifact)
    }
}
