// Percentile clipping bounds for outlier screening.
use crate::error::PipelineError;

pub const DEFAULT_UPPER_PERCENTILE: f64 = 0.97;
pub const DEFAULT_LOWER_PERCENTILE: f64 = 0.03;

/// Inclusive clipping interval; anything strictly outside is an outlier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn contains(&self, v: f64) -> bool {
        v >= self.lower && v <= self.upper
    }
}

pub fn check_percentiles(upper: f64, lower: f64) -> Result<(), PipelineError> {
    if lower > 0.0 && lower < upper && upper < 1.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidPercentiles { lower, upper })
    }
}

/// Empirical percentile of sorted data, interpolating linearly between order statistics.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Lower/upper percentile values of the non-missing entries of `values`.
pub fn bounds(
    column: &str,
    values: impl IntoIterator<Item = Option<f64>>,
    upper_percentile: f64,
    lower_percentile: f64,
) -> Result<Bounds, PipelineError> {
    check_percentiles(upper_percentile, lower_percentile)?;
    let mut observed: Vec<f64> = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect();
    if observed.is_empty() {
        return Err(PipelineError::insufficient(column, "no observed values"));
    }
    observed.sort_by(f64::total_cmp);
    Ok(Bounds {
        lower: percentile(&observed, lower_percentile),
        upper: percentile(&observed, upper_percentile),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_between_order_statistics() {
        let vals = (0..=100).map(|v| Some(v as f64));
        let b = bounds("x", vals, 0.97, 0.03).unwrap();
        assert!((b.lower - 3.0).abs() < 1e-9);
        assert!((b.upper - 97.0).abs() < 1e-9);
    }

    #[test]
    fn ignores_missing_and_order() {
        let a = vec![Some(5.0), None, Some(1.0), Some(3.0), None];
        let b = vec![Some(3.0), Some(1.0), Some(5.0)];
        assert_eq!(
            bounds("x", a, 0.9, 0.1).unwrap(),
            bounds("x", b, 0.9, 0.1).unwrap()
        );
    }

    #[test]
    fn screens_about_six_percent() {
        let vals: Vec<Option<f64>> = (0..1000).map(|v| Some(v as f64)).collect();
        let b = bounds("x", vals.clone(), DEFAULT_UPPER_PERCENTILE, DEFAULT_LOWER_PERCENTILE).unwrap();
        let flagged = vals.iter().flatten().filter(|&&v| !b.contains(v)).count();
        let rate = flagged as f64 / vals.len() as f64;
        assert!((rate - 0.06).abs() < 0.005, "rate {}", rate);
    }

    #[test]
    fn single_value_is_its_own_bounds() {
        let b = bounds("x", vec![Some(7.0)], 0.97, 0.03).unwrap();
        assert_eq!(b, Bounds { lower: 7.0, upper: 7.0 });
        assert!(b.contains(7.0));
    }

    #[test]
    fn all_missing_is_insufficient() {
        let err = bounds("fielding_e", vec![None, None], 0.97, 0.03).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData { ref column, .. } if column == "fielding_e"));
    }

    #[test]
    fn rejects_inverted_percentiles() {
        assert!(bounds("x", vec![Some(1.0)], 0.03, 0.97).is_err());
        assert!(bounds("x", vec![Some(1.0)], 1.0, 0.0).is_err());
    }
}
