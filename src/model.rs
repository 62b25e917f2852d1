/// Fit OLS win models and score them on held-out rows.
use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use log::{info, warn};
use ndarray::{Array1, Array2};

use crate::error::PipelineError;
use crate::partition::group_split;
use crate::preprocess::{Feature, StrikeoutGroup, TeamSeason};

/// Domain-valid range of a season win total.
pub const MAX_WINS: f64 = 162.0;

/// Anything that can predict a win total for an engineered, imputed row.
pub trait WinModel {
    fn predict(&self, row: &TeamSeason) -> Result<f64, PipelineError>;
    /// Slope count `k` used by the `n - k - 1` RMSE denominator.
    fn num_coefficients(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    pub predictors: Vec<Feature>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub residual_df: usize,
}

fn value(row: &TeamSeason, f: Feature) -> Result<f64, PipelineError> {
    f.get(row)
        .ok_or_else(|| PipelineError::insufficient(f.name(), "missing value at model time"))
}

fn design(rows: &[TeamSeason], predictors: &[Feature]) -> Result<Array2<f64>, PipelineError> {
    let mut x = Array2::<f64>::zeros((rows.len(), predictors.len()));
    for (i, r) in rows.iter().enumerate() {
        for (j, &f) in predictors.iter().enumerate() {
            x[(i, j)] = value(r, f)?;
        }
    }
    Ok(x)
}

fn target(rows: &[TeamSeason]) -> Result<Array1<f64>, PipelineError> {
    rows.iter()
        .map(|r| r.wins.ok_or_else(|| PipelineError::insufficient("wins", "missing target")))
        .collect::<Result<Vec<_>, _>>()
        .map(Array1::from)
}

/// Ordinary least squares of `wins` on `predictors`.
pub fn fit(rows: &[TeamSeason], predictors: &[Feature]) -> Result<LinearModel, PipelineError> {
    let n = rows.len();
    let k = predictors.len();
    if n <= k + 1 {
        return Err(PipelineError::insufficient(
            "wins",
            format!("{} rows cannot fit {} coefficients", n, k + 1),
        ));
    }
    let x = design(rows, predictors)?;
    let y = target(rows)?;
    let ds = Dataset::new(x, y);
    let model = LinearRegression::new()
        .fit(&ds)
        .map_err(|e| PipelineError::Fit(e.to_string()))?;

    Ok(LinearModel {
        predictors: predictors.to_vec(),
        coefficients: model.params().to_vec(),
        intercept: model.intercept(),
        residual_df: n - k - 1,
    })
}

impl LinearModel {
    /// (feature, coefficient) pairs, largest magnitude first.
    pub fn named_coefficients(&self) -> Vec<(String, f64)> {
        let mut vec: Vec<(String, f64)> = self
            .predictors
            .iter()
            .zip(&self.coefficients)
            .map(|(f, &c)| (f.name().to_string(), c))
            .collect();
        vec.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        vec
    }
}

impl WinModel for LinearModel {
    fn predict(&self, row: &TeamSeason) -> Result<f64, PipelineError> {
        self.predictors
            .iter()
            .zip(&self.coefficients)
            .try_fold(self.intercept, |acc, (&f, &b)| Ok(acc + b * value(row, f)?))
    }

    fn num_coefficients(&self) -> usize {
        self.predictors.len()
    }
}

/// One linear model per strikeout cohort, with a pooled model for cohorts too
/// small to fit on their own.
#[derive(Debug, Clone)]
pub struct PiecewiseModel {
    pub cohorts: BTreeMap<StrikeoutGroup, LinearModel>,
    pub pooled: LinearModel,
}

pub fn fit_piecewise(
    rows: &[TeamSeason],
    predictors: &[Feature],
) -> Result<PiecewiseModel, PipelineError> {
    let pooled = fit(rows, predictors)?;
    let mut cohorts = BTreeMap::new();
    for (group, members) in group_split(rows)? {
        match fit(&members, predictors) {
            Ok(m) => {
                info!("Fitted {} cohort on {} rows", group, members.len());
                cohorts.insert(group, m);
            }
            Err(e @ (PipelineError::InsufficientData { .. } | PipelineError::Fit(_))) => {
                warn!("Cohort {} uses the pooled model: {}", group, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(PiecewiseModel { cohorts, pooled })
}

impl PiecewiseModel {
    fn model_for(&self, row: &TeamSeason) -> &LinearModel {
        row.strikeout_group
            .and_then(|g| self.cohorts.get(&g))
            .unwrap_or(&self.pooled)
    }
}

impl WinModel for PiecewiseModel {
    fn predict(&self, row: &TeamSeason) -> Result<f64, PipelineError> {
        self.model_for(row).predict(row)
    }

    fn num_coefficients(&self) -> usize {
        self.pooled.num_coefficients()
    }
}

/// `sqrt(Σ(y - ŷ)² / (n_test - k - 1))`.
pub fn rmse<M: WinModel + ?Sized>(model: &M, test: &[TeamSeason]) -> Result<f64, PipelineError> {
    let k = model.num_coefficients();
    let denom = test.len() as f64 - k as f64 - 1.0;
    if denom <= 0.0 {
        return Err(PipelineError::insufficient(
            "wins",
            format!("{} test rows are too few for {} coefficients", test.len(), k),
        ));
    }
    let y = target(test)?;
    let mut sse = 0.0;
    for (r, actual) in test.iter().zip(y.iter()) {
        let err = actual - model.predict(r)?;
        sse += err * err;
    }
    Ok((sse / denom).sqrt())
}

/// Keep a prediction inside the season's possible win totals.
pub fn clamp_wins(pred: f64) -> f64 {
    pred.clamp(0.0, MAX_WINS)
}
