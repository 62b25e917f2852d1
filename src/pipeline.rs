// Stage wiring: engineer → impute → split → fit/compare → predict.
use log::info;

use crate::error::PipelineError;
use crate::impute::{impute, ImputeConfig, ImputeMode, DEFAULT_ROUNDS};
use crate::io::{self, RawRecord};
use crate::model::{self, clamp_wins, LinearModel, PiecewiseModel, WinModel};
use crate::outliers::{check_percentiles, DEFAULT_LOWER_PERCENTILE, DEFAULT_UPPER_PERCENTILE};
use crate::partition::{split, DEFAULT_TRAIN_FRACTION};
use crate::preprocess::{engineer_all, Feature, StrikeoutGroup, TeamSeason};

/// Run-wide settings, built from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub train_src: String,
    pub eval_src: String,
    pub out_path: String,
    pub train_fraction: f64,
    pub upper_percentile: f64,
    pub lower_percentile: f64,
    pub rounds: usize,
    pub seed: u64,
    pub fallback_group: StrikeoutGroup,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            train_src: "moneyball-training-data.csv".into(),
            eval_src: "moneyball-evaluation-data.csv".into(),
            out_path: "predictions.csv".into(),
            train_fraction: DEFAULT_TRAIN_FRACTION,
            upper_percentile: DEFAULT_UPPER_PERCENTILE,
            lower_percentile: DEFAULT_LOWER_PERCENTILE,
            rounds: DEFAULT_ROUNDS,
            seed: 42,
            fallback_group: StrikeoutGroup::High,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.train_fraction) {
            return Err(PipelineError::InvalidFraction(self.train_fraction));
        }
        check_percentiles(self.upper_percentile, self.lower_percentile)?;
        if self.rounds == 0 {
            return Err(PipelineError::insufficient("rounds", "at least one imputation round is needed"));
        }
        Ok(())
    }

    pub fn impute_config(&self, mode: ImputeMode) -> ImputeConfig {
        ImputeConfig {
            mode,
            upper_percentile: self.upper_percentile,
            lower_percentile: self.lower_percentile,
            screened: Feature::ALL.to_vec(),
            rounds: self.rounds,
            seed: self.seed,
            fallback_group: self.fallback_group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Pooled,
    Piecewise,
}

/// One model specification competing on the held-out split.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: &'static str,
    pub mode: ImputeMode,
    pub predictors: Vec<Feature>,
    pub kind: ModelKind,
}

const REDUCED: [Feature; 6] = [
    Feature::NetStolenBases,
    Feature::OffenseObp,
    Feature::DefenseObp,
    Feature::TotalAtBats,
    Feature::BattingHr,
    Feature::BattingSo,
];

pub fn candidates() -> Vec<Candidate> {
    vec![
        Candidate {
            name: "full / missing-only",
            mode: ImputeMode::MissingOnly,
            predictors: Feature::ALL.to_vec(),
            kind: ModelKind::Pooled,
        },
        Candidate {
            name: "full / outliers",
            mode: ImputeMode::MissingAndOutliers,
            predictors: Feature::ALL.to_vec(),
            kind: ModelKind::Pooled,
        },
        Candidate {
            name: "reduced / outliers",
            mode: ImputeMode::MissingAndOutliers,
            predictors: REDUCED.to_vec(),
            kind: ModelKind::Pooled,
        },
        Candidate {
            name: "piecewise / outliers",
            mode: ImputeMode::MissingAndOutliers,
            predictors: Feature::ALL.to_vec(),
            kind: ModelKind::Piecewise,
        },
    ]
}

#[derive(Debug, Clone)]
pub enum FittedModel {
    Linear(LinearModel),
    Piecewise(PiecewiseModel),
}

impl FittedModel {
    /// Coefficients to report; piecewise models report the pooled fit.
    pub fn named_coefficients(&self) -> Vec<(String, f64)> {
        match self {
            FittedModel::Linear(m) => m.named_coefficients(),
            FittedModel::Piecewise(m) => m.pooled.named_coefficients(),
        }
    }

    pub fn residual_df(&self) -> usize {
        match self {
            FittedModel::Linear(m) => m.residual_df,
            FittedModel::Piecewise(m) => m.pooled.residual_df,
        }
    }
}

impl WinModel for FittedModel {
    fn predict(&self, row: &TeamSeason) -> Result<f64, PipelineError> {
        match self {
            FittedModel::Linear(m) => m.predict(row),
            FittedModel::Piecewise(m) => m.predict(row),
        }
    }

    fn num_coefficients(&self) -> usize {
        match self {
            FittedModel::Linear(m) => m.num_coefficients(),
            FittedModel::Piecewise(m) => m.num_coefficients(),
        }
    }
}

impl Candidate {
    pub fn fit(&self, rows: &[TeamSeason]) -> Result<FittedModel, PipelineError> {
        Ok(match self.kind {
            ModelKind::Pooled => FittedModel::Linear(model::fit(rows, &self.predictors)?),
            ModelKind::Piecewise => {
                FittedModel::Piecewise(model::fit_piecewise(rows, &self.predictors)?)
            }
        })
    }
}

/// Engineer and impute one table.
pub fn prepare(records: &[RawRecord], cfg: &ImputeConfig) -> Result<Vec<TeamSeason>, PipelineError> {
    let rows = engineer_all(records);
    let (rows, _) = impute(&rows, cfg)?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub name: &'static str,
    pub rmse: f64,
}

/// Score every candidate on the same seeded split; returns the scores and the winner's index.
pub fn compare(
    records: &[RawRecord],
    candidates: &[Candidate],
    config: &Config,
) -> Result<(Vec<Evaluation>, usize), PipelineError> {
    let mut prepared: Vec<(ImputeMode, Vec<TeamSeason>)> = Vec::new();
    let mut evaluations = Vec::with_capacity(candidates.len());

    for c in candidates {
        if !prepared.iter().any(|(mode, _)| *mode == c.mode) {
            let rows = prepare(records, &config.impute_config(c.mode))?;
            prepared.push((c.mode, rows));
        }
        let rows = prepared
            .iter()
            .find(|(mode, _)| *mode == c.mode)
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or_default();
        let (train, test) = split(rows, config.train_fraction, config.seed)?;
        let fitted = c.fit(&train)?;
        let rmse = model::rmse(&fitted, &test)?;
        info!("{}: test RMSE {:.3}", c.name, rmse);
        evaluations.push(Evaluation { name: c.name, rmse });
    }

    let best = evaluations
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.rmse.total_cmp(&b.1.rmse))
        .map(|(i, _)| i)
        .ok_or_else(|| PipelineError::insufficient("wins", "no candidate models"))?;
    Ok((evaluations, best))
}

/// Predicted win totals, clamped to a season's range, in row order.
pub fn predict_rows<M: WinModel + ?Sized>(
    model: &M,
    rows: &[TeamSeason],
) -> Result<Vec<f64>, PipelineError> {
    rows.iter().map(|r| model.predict(r).map(clamp_wins)).collect()
}

#[derive(Debug)]
pub struct RunSummary {
    pub evaluations: Vec<Evaluation>,
    pub selected: Candidate,
    pub model: FittedModel,
    pub predictions: Vec<f64>,
}

/// Whole run: compare on the training table, refit the winner on all of it,
/// predict the evaluation table and write it out.
pub fn run(config: &Config) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let train_table = io::load_table(&config.train_src, true)?;
    let eval_table = io::load_table(&config.eval_src, false)?;

    let all = candidates();
    let (evaluations, best) = compare(&train_table.rows, &all, config)?;
    let selected = all[best].clone();
    info!("Selected model: {}", selected.name);

    let cfg = config.impute_config(selected.mode);
    let train_rows = prepare(&train_table.rows, &cfg)?;
    let model = selected.fit(&train_rows)?;

    let eval_rows = prepare(&eval_table.rows, &cfg)?;
    let predictions = predict_rows(&model, &eval_rows)?;
    io::write_predictions(&config.out_path, &eval_table, &predictions)?;

    Ok(RunSummary {
        evaluations,
        selected,
        model,
        predictions,
    })
}
