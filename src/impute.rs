// Missing-value and outlier imputation by chained bootstrap regression.
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::PipelineError;
use crate::outliers::{self, DEFAULT_LOWER_PERCENTILE, DEFAULT_UPPER_PERCENTILE};
use crate::preprocess::{Feature, StrikeoutGroup, TeamSeason};

pub const DEFAULT_ROUNDS: usize = 5;

/// Fresh bootstrap samples tried before a singular fit is reported.
const MAX_BOOTSTRAP_ATTEMPTS: usize = 10;

/// A column with `m` observed rows is regressed on at most `m / 5` others.
const ROWS_PER_PREDICTOR: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImputeMode {
    /// Fill only cells that are missing in the input.
    MissingOnly,
    /// Also treat values outside the percentile bounds as missing.
    MissingAndOutliers,
}

impl ImputeMode {
    pub fn label(&self) -> &'static str {
        match self {
            ImputeMode::MissingOnly => "missing-only",
            ImputeMode::MissingAndOutliers => "outliers",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImputeConfig {
    pub mode: ImputeMode,
    pub upper_percentile: f64,
    pub lower_percentile: f64,
    /// Columns screened for outliers in `MissingAndOutliers` mode.
    pub screened: Vec<Feature>,
    pub rounds: usize,
    pub seed: u64,
    /// Cohort given to rows whose strikeout group cannot be re-derived.
    pub fallback_group: StrikeoutGroup,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        ImputeConfig {
            mode: ImputeMode::MissingAndOutliers,
            upper_percentile: DEFAULT_UPPER_PERCENTILE,
            lower_percentile: DEFAULT_LOWER_PERCENTILE,
            screened: Feature::ALL.to_vec(),
            rounds: DEFAULT_ROUNDS,
            seed: 42,
            fallback_group: StrikeoutGroup::High,
        }
    }
}

/// What one imputation run touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImputeReport {
    pub outliers_flagged: usize,
    pub cells_imputed: usize,
    pub groups_rederived: usize,
    pub group_fallbacks: usize,
}

/// One bootstrap regression of a column on the others, in standardized units.
struct Draw {
    intercept: f64,
    coefs: Vec<(usize, f64)>,
    sigma: f64,
}

impl Draw {
    fn predict(&self, data: &Array2<f64>, row: usize) -> f64 {
        self.coefs
            .iter()
            .fold(self.intercept, |acc, &(col, b)| acc + b * data[[row, col]])
    }
}

fn column(feature: Feature) -> usize {
    Feature::ALL
        .iter()
        .position(|&f| f == feature)
        .unwrap_or_default()
}

fn varies(data: &Array2<f64>, rows: &[usize], col: usize) -> bool {
    let first = data[[rows[0], col]];
    rows.iter().any(|&r| data[[r, col]] != first)
}

fn correlation(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let xc = x - x.mean().unwrap_or(0.0);
    let yc = y - y.mean().unwrap_or(0.0);
    let sxx = xc.dot(&xc);
    let syy = yc.dot(&yc);
    if sxx > 0.0 && syy > 0.0 {
        xc.dot(&yc) / (sxx * syy).sqrt()
    } else {
        0.0
    }
}

/// The `keep` columns of `candidates` most correlated with `y` over `rows`,
/// in column order.
fn strongest(
    data: &Array2<f64>,
    rows: &[usize],
    y: &Array1<f64>,
    candidates: Vec<usize>,
    keep: usize,
) -> Vec<usize> {
    let mut scored: Vec<(usize, f64)> = candidates
        .into_iter()
        .map(|c| {
            let x = Array1::from_iter(rows.iter().map(|&r| data[[r, c]]));
            (c, correlation(&x, y).abs())
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(keep);
    let mut cols: Vec<usize> = scored.into_iter().map(|(c, _)| c).collect();
    cols.sort_unstable();
    cols
}

/// Regress `target` on the other non-constant columns over a bootstrap sample
/// of the rows where `target` was observed. Sparse columns keep only their most
/// correlated predictors; with fewer than `ROWS_PER_PREDICTOR` observed rows the
/// draw is the sample mean plus noise.
fn fit_bootstrap(
    data: &Array2<f64>,
    target: usize,
    observed: &[usize],
    rng: &mut StdRng,
) -> Result<Draw, PipelineError> {
    let m = observed.len();
    let cap = m / ROWS_PER_PREDICTOR;
    let mut last_err = String::new();
    for attempt in 0..MAX_BOOTSTRAP_ATTEMPTS {
        let sample: Vec<usize> = (0..m).map(|_| observed[rng.random_range(0..m)]).collect();
        let y = Array1::from_iter(sample.iter().map(|&r| data[[r, target]]));
        let mut predictors: Vec<usize> = (0..data.ncols())
            .filter(|&c| c != target && varies(data, &sample, c))
            .collect();
        if predictors.len() > cap {
            predictors = strongest(data, &sample, &y, predictors, cap);
        }

        if predictors.is_empty() {
            let mean = y.mean().unwrap_or(0.0);
            let sigma = if m > 1 { y.std(1.0) } else { 0.0 };
            return Ok(Draw {
                intercept: mean,
                coefs: Vec::new(),
                sigma,
            });
        }

        let x = Array2::from_shape_fn((m, predictors.len()), |(i, k)| {
            data[[sample[i], predictors[k]]]
        });
        match LinearRegression::new().fit(&Dataset::new(x.clone(), y.clone())) {
            Ok(model) => {
                let fitted: Array1<f64> = model.predict(&x);
                let ssr = (&y - &fitted).mapv(|e| e * e).sum();
                let df = m as f64 - predictors.len() as f64 - 1.0;
                let sigma = if df > 0.0 { (ssr / df).sqrt() } else { 0.0 };
                return Ok(Draw {
                    intercept: model.intercept(),
                    coefs: predictors.into_iter().zip(model.params().iter().copied()).collect(),
                    sigma,
                });
            }
            Err(e) => {
                debug!(
                    "Bootstrap fit {} for {} failed: {}",
                    attempt + 1,
                    Feature::ALL[target].name(),
                    e
                );
                last_err = e.to_string();
            }
        }
    }
    Err(PipelineError::Fit(format!(
        "{}: {} bootstrap fits failed, last error: {}",
        Feature::ALL[target].name(),
        MAX_BOOTSTRAP_ATTEMPTS,
        last_err
    )))
}

/// Mark cells strictly outside each screened column's percentile bounds as missing.
fn flag_outliers(
    rows: &[TeamSeason],
    missing: &mut Array2<bool>,
    cfg: &ImputeConfig,
) -> Result<usize, PipelineError> {
    let mut flagged = 0;
    for feature in &cfg.screened {
        let col = column(*feature);
        let b = outliers::bounds(
            feature.name(),
            rows.iter().map(|r| feature.get(r)),
            cfg.upper_percentile,
            cfg.lower_percentile,
        )?;
        let mut count = 0;
        for (i, r) in rows.iter().enumerate() {
            if let Some(v) = feature.get(r) {
                if !b.contains(v) {
                    missing[[i, col]] = true;
                    count += 1;
                }
            }
        }
        debug!(
            "{}: bounds [{:.4}, {:.4}], {} outliers",
            feature.name(),
            b.lower,
            b.upper,
            count
        );
        flagged += count;
    }
    Ok(flagged)
}

/// Fill every missing (and, in outlier mode, every out-of-bounds) predictor cell.
///
/// Each column with gaps is regressed on the others over a bootstrap sample of
/// its observed rows, and gaps are drawn from `prediction + N(0, σ²)`. The chain
/// runs `cfg.rounds` times; a cell's final value is the mean of its draws.
/// Rows left without a strikeout group, or whose strikeout counts were imputed,
/// are re-derived from the completed counts; any still unresolved get the fallback.
pub fn impute(
    rows: &[TeamSeason],
    cfg: &ImputeConfig,
) -> Result<(Vec<TeamSeason>, ImputeReport), PipelineError> {
    let n = rows.len();
    let p = Feature::ALL.len();
    let mut report = ImputeReport::default();
    if n == 0 {
        return Ok((Vec::new(), report));
    }

    let mut missing = Array2::from_shape_fn((n, p), |(i, j)| {
        Feature::ALL[j].get(&rows[i]).map_or(true, |v| !v.is_finite())
    });
    if cfg.mode == ImputeMode::MissingAndOutliers {
        report.outliers_flagged = flag_outliers(rows, &mut missing, cfg)?;
    }

    // The chain runs on z-scores; values are mapped back at the end.
    let mut data = Array2::<f64>::zeros((n, p));
    let mut scale = Vec::with_capacity(p);
    let mut observed: Vec<Vec<usize>> = Vec::with_capacity(p);
    for (j, feature) in Feature::ALL.iter().enumerate() {
        let obs: Vec<usize> = (0..n).filter(|&i| !missing[[i, j]]).collect();
        if obs.is_empty() {
            return Err(PipelineError::insufficient(feature.name(), "no observed values"));
        }
        if obs.len() < ROWS_PER_PREDICTOR && obs.len() < n {
            warn!(
                "{}: only {} observed rows, imputing from their mean",
                feature.name(),
                obs.len()
            );
        }
        let vals = Array1::from_iter(obs.iter().filter_map(|&i| feature.get(&rows[i])));
        let mean = vals.mean().unwrap_or(0.0);
        let sd = if vals.len() > 1 { vals.std(1.0) } else { 0.0 };
        let sd = if sd > 0.0 { sd } else { 1.0 };
        for &i in &obs {
            data[[i, j]] = (feature.get(&rows[i]).unwrap_or(mean) - mean) / sd;
        }
        scale.push((mean, sd));
        observed.push(obs);
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let gaps: Vec<usize> = (0..p).filter(|&j| observed[j].len() < n).collect();

    // Start the chain from random observed values.
    for &j in &gaps {
        let obs = &observed[j];
        for i in 0..n {
            if missing[[i, j]] {
                data[[i, j]] = data[[obs[rng.random_range(0..obs.len())], j]];
            }
        }
    }

    let rounds = cfg.rounds.max(1);
    let mut sums = Array2::<f64>::zeros((n, p));
    for round in 0..rounds {
        for &j in &gaps {
            let draw = fit_bootstrap(&data, j, &observed[j], &mut rng)?;
            let noise = Normal::new(0.0, draw.sigma).map_err(|e| PipelineError::Fit(e.to_string()))?;
            for i in 0..n {
                if missing[[i, j]] {
                    data[[i, j]] = draw.predict(&data, i) + noise.sample(&mut rng);
                }
            }
        }
        for &j in &gaps {
            for i in 0..n {
                if missing[[i, j]] {
                    sums[[i, j]] += data[[i, j]];
                }
            }
        }
        debug!("Imputation round {} of {} done", round + 1, rounds);
    }

    let so_cols = [column(Feature::BattingSo), column(Feature::PitchingSo)];
    let mut out = rows.to_vec();
    for (i, row) in out.iter_mut().enumerate() {
        for (j, feature) in Feature::ALL.iter().enumerate() {
            if missing[[i, j]] {
                let (mean, sd) = scale[j];
                feature.set(row, Some(sums[[i, j]] / rounds as f64 * sd + mean));
                report.cells_imputed += 1;
            }
        }
        let so_imputed = so_cols.iter().any(|&j| missing[[i, j]]);
        if row.strikeout_group.is_none() || so_imputed {
            match row.derive_group() {
                Some(g) => {
                    row.strikeout_group = Some(g);
                    report.groups_rederived += 1;
                }
                None => {
                    row.strikeout_group = Some(cfg.fallback_group);
                    report.group_fallbacks += 1;
                }
            }
        }
    }

    if report.group_fallbacks > 0 {
        warn!(
            "{} rows had no derivable strikeout group; assigned '{}'",
            report.group_fallbacks, cfg.fallback_group
        );
    }
    info!(
        "Imputed {} cells ({} outliers flagged) over {} rows in {} mode",
        report.cells_imputed,
        report.outliers_flagged,
        n,
        cfg.mode.label()
    );
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::engineer;
    use crate::io::RawRecord;

    /// Correlated synthetic team-seasons; every raw stat present.
    fn synthetic(n: usize, seed: u64) -> Vec<TeamSeason> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let strength: f64 = rng.random_range(-1.0..1.0);
                let mut jitter = |scale: f64| rng.random_range(-scale..scale);
                let raw = RawRecord {
                    index: Some(i as f64),
                    wins: Some(81.0 + 15.0 * strength + jitter(5.0)),
                    batting_h: Some(1450.0 + 80.0 * strength + jitter(40.0)),
                    batting_2b: Some(240.0 + 30.0 * strength + jitter(15.0)),
                    batting_3b: Some(55.0 + jitter(20.0)),
                    batting_hr: Some(100.0 + 40.0 * strength + jitter(30.0)),
                    batting_bb: Some(500.0 + 60.0 * strength + jitter(40.0)),
                    batting_so: Some(750.0 + jitter(150.0)),
                    baserun_sb: Some(120.0 + jitter(50.0)),
                    baserun_cs: Some(50.0 + jitter(20.0)),
                    pitching_h: Some(1500.0 - 60.0 * strength + jitter(60.0)),
                    pitching_bb: Some(540.0 + jitter(50.0)),
                    pitching_so: Some(800.0 + jitter(150.0)),
                    fielding_e: Some(150.0 - 30.0 * strength + jitter(60.0)),
                    fielding_dp: Some(145.0 + jitter(20.0)),
                };
                engineer(&raw)
            })
            .collect()
    }

    fn no_gaps(rows: &[TeamSeason]) -> bool {
        rows.iter().all(|r| {
            Feature::ALL.iter().all(|f| f.get(r).is_some_and(f64::is_finite))
                && r.strikeout_group.is_some()
        })
    }

    #[test]
    fn fills_every_cell_in_both_modes() {
        let mut rows = synthetic(120, 1);
        for i in (0..120).step_by(9) {
            rows[i].batting_2b = None;
            rows[i].net_stolen_bases = None;
        }
        for mode in [ImputeMode::MissingOnly, ImputeMode::MissingAndOutliers] {
            let cfg = ImputeConfig { mode, ..ImputeConfig::default() };
            let (out, report) = impute(&rows, &cfg).unwrap();
            assert_eq!(out.len(), rows.len());
            assert!(no_gaps(&out));
            assert!(report.cells_imputed >= 28);
        }
    }

    #[test]
    fn missing_only_keeps_observed_values() {
        let mut rows = synthetic(80, 2);
        rows[3].fielding_e = None;
        let cfg = ImputeConfig { mode: ImputeMode::MissingOnly, ..ImputeConfig::default() };
        let (out, report) = impute(&rows, &cfg).unwrap();
        assert_eq!(report.outliers_flagged, 0);
        assert_eq!(report.cells_imputed, 1);
        for (a, b) in rows.iter().zip(&out).filter(|(a, _)| a.index != Some(3.0)) {
            assert_eq!(a, b);
        }
        // observed identity survives untouched rows
        assert_eq!(out[5].net_stolen_bases, rows[5].net_stolen_bases);
    }

    #[test]
    fn same_seed_same_draws() {
        let mut rows = synthetic(100, 3);
        for i in (0..100).step_by(7) {
            rows[i].batting_hr = None;
        }
        let cfg = ImputeConfig::default();
        let (a, _) = impute(&rows, &cfg).unwrap();
        let (b, _) = impute(&rows, &cfg).unwrap();
        assert_eq!(a, b);
        let (c, _) = impute(&rows, &ImputeConfig { seed: 7, ..cfg }).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn outlier_mode_replaces_extreme_value() {
        let mut rows = synthetic(100, 4);
        rows[10].fielding_e = Some(10_000.0);
        let (out, report) = impute(&rows, &ImputeConfig::default()).unwrap();
        assert!(report.outliers_flagged > 0);
        let e = out[10].fielding_e.unwrap();
        let max_other = rows
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != 10)
            .filter_map(|(_, r)| r.fielding_e)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(e < max_other + 200.0, "imputed fielding_e {}", e);
    }

    #[test]
    fn imputed_values_follow_the_other_columns() {
        // batting_2b tracks team strength, so high-strength gaps should be filled high.
        let mut rows = synthetic(200, 5);
        let mut hidden = Vec::new();
        for i in (0..200).step_by(5) {
            hidden.push((i, rows[i].batting_2b.unwrap()));
            rows[i].batting_2b = None;
        }
        let cfg = ImputeConfig { mode: ImputeMode::MissingOnly, ..ImputeConfig::default() };
        let (out, _) = impute(&rows, &cfg).unwrap();
        let err: f64 = hidden
            .iter()
            .map(|&(i, truth)| (out[i].batting_2b.unwrap() - truth).abs())
            .sum::<f64>()
            / hidden.len() as f64;
        // filling with the column mean would give ~15.5
        assert!(err < 14.0, "mean abs error {}", err);
    }

    #[test]
    fn group_rederived_or_fallback() {
        let mut rows = synthetic(60, 6);
        rows[0].batting_so = None;
        rows[0].strikeout_group = None;
        let cfg = ImputeConfig { mode: ImputeMode::MissingOnly, ..ImputeConfig::default() };
        let (out, report) = impute(&rows, &cfg).unwrap();
        assert_eq!(report.groups_rederived, 1);
        assert_eq!(report.group_fallbacks, 0);
        assert_eq!(out[0].strikeout_group, out[0].derive_group());
    }

    #[test]
    fn group_follows_imputed_strikeouts() {
        let mut rows = synthetic(80, 8);
        // 3000 strikeouts puts the row in the high band before screening
        rows[12].batting_so = Some(3000.0);
        rows[12].strikeout_group = rows[12].derive_group();
        assert_eq!(rows[12].strikeout_group, Some(StrikeoutGroup::High));

        let (out, report) = impute(&rows, &ImputeConfig::default()).unwrap();
        assert!(out[12].batting_so.unwrap() < 3000.0);
        assert!(report.groups_rederived >= 1);
        for r in &out {
            assert_eq!(r.strikeout_group, r.derive_group());
        }
    }

    #[test]
    fn sparse_column_is_still_imputed() {
        for observed in [1, 8, 12] {
            let mut rows = synthetic(60, 9);
            for r in rows.iter_mut().skip(observed) {
                r.batting_3b = None;
            }
            let cfg = ImputeConfig { mode: ImputeMode::MissingOnly, ..ImputeConfig::default() };
            let (out, report) = impute(&rows, &cfg).unwrap();
            assert!(no_gaps(&out));
            assert_eq!(report.cells_imputed, 60 - observed);
            for r in &out[observed..] {
                let v = r.batting_3b.unwrap();
                // observed triples sit in 55 ± 20
                assert!((v - 55.0).abs() < 120.0, "{} observed: batting_3b {}", observed, v);
            }
        }
        // a single observation leaves nothing to vary, so every gap takes its value
        let mut rows = synthetic(30, 10);
        let only = rows[0].batting_3b;
        for r in rows.iter_mut().skip(1) {
            r.batting_3b = None;
        }
        let cfg = ImputeConfig { mode: ImputeMode::MissingOnly, ..ImputeConfig::default() };
        let (out, _) = impute(&rows, &cfg).unwrap();
        assert!(out.iter().all(|r| r.batting_3b == only));
    }

    #[test]
    fn fully_missing_column_is_insufficient() {
        let mut rows = synthetic(40, 7);
        for r in rows.iter_mut() {
            r.defense_obp = None;
        }
        let err = impute(&rows, &ImputeConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData { ref column, .. } if column == "defense_obp"));
    }

    #[test]
    fn empty_input_is_empty_output() {
        let (out, report) = impute(&[], &ImputeConfig::default()).unwrap();
        assert!(out.is_empty());
        assert_eq!(report, ImputeReport::default());
    }
}
