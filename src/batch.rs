//! Rayon-based parallel batch processing for multiple series.
//!
//! Provides batch versions of the disaggregation and benchmarking entry
//! points that process N series in parallel using Rayon's work-stealing
//! thread pool. Each series is handled independently; a failure in one does
//! not affect the others.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::adl::{adl_disaggregate, AdlSpec};
use crate::denton::{denton, BenchmarkResult, DentonSpec};
use crate::disagg::{disaggregate, interpolate, DisaggregationResult};
use crate::error::Result;
use crate::grp::{grp, GrpResult, GrpSpec};
use crate::types::TemporalDisaggregationSpec;

/// Disaggregate multiple low-frequency series in parallel.
///
/// All series share the same spec and conversion ratio. If `indicator_list`
/// is provided, `indicator_list[i]` drives `series[i]`.
pub fn batch_disaggregate(
    series: &[Vec<f64>],
    indicator_list: Option<&[DMatrix<f64>]>,
    ratio: usize,
    spec: &TemporalDisaggregationSpec,
) -> Vec<Result<DisaggregationResult>> {
    series
        .par_iter()
        .enumerate()
        .map(|(i, y)| disaggregate(y, indicator_list.map(|xs| &xs[i]), ratio, spec))
        .collect()
}

/// Interpolate multiple sampled series in parallel.
pub fn batch_interpolate(
    series: &[Vec<f64>],
    indicator_list: Option<&[DMatrix<f64>]>,
    ratio: usize,
    spec: &TemporalDisaggregationSpec,
) -> Vec<Result<DisaggregationResult>> {
    series
        .par_iter()
        .enumerate()
        .map(|(i, y)| interpolate(y, indicator_list.map(|xs| &xs[i]), ratio, spec))
        .collect()
}

/// Distributed-lag disaggregation of multiple series in parallel.
pub fn batch_adl_disaggregate(
    series: &[Vec<f64>],
    indicator_list: Option<&[DMatrix<f64>]>,
    ratio: usize,
    spec: &AdlSpec,
) -> Vec<Result<DisaggregationResult>> {
    series
        .par_iter()
        .enumerate()
        .map(|(i, y)| adl_disaggregate(y, indicator_list.map(|xs| &xs[i]), ratio, spec))
        .collect()
}

/// Denton-benchmark multiple indicator/target pairs in parallel.
///
/// `indicator_list[i]` is benchmarked to `targets[i]`; the lists must have
/// the same length.
pub fn batch_denton(
    indicator_list: &[Vec<f64>],
    targets: &[Vec<f64>],
    ratio: usize,
    spec: &DentonSpec,
) -> Vec<Result<BenchmarkResult>> {
    indicator_list
        .par_iter()
        .zip(targets.par_iter())
        .map(|(w, y)| denton(Some(w), y, ratio, spec))
        .collect()
}

/// Growth-rate-preserving benchmarking of multiple pairs in parallel.
pub fn batch_grp(
    indicator_list: &[Vec<f64>],
    targets: &[Vec<f64>],
    ratio: usize,
    spec: &GrpSpec,
) -> Vec<Result<GrpResult>> {
    indicator_list
        .par_iter()
        .zip(targets.par_iter())
        .map(|(w, y)| grp(Some(w), y, ratio, spec))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResidualModel;

    fn quarterly() -> Vec<f64> {
        vec![500.0, 510.0, 525.0, 520.0, 535.0, 560.0]
    }

    fn indicator(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 1, |t, _| 160.0 + 2.0 * t as f64 + 8.0 * (t as f64 * 0.9).sin())
    }

    fn spec() -> TemporalDisaggregationSpec {
        TemporalDisaggregationSpec {
            model: ResidualModel::Ar1,
            constant: true,
            ..Default::default()
        }
    }

    #[test]
    fn batch_matches_serial() {
        let y = quarterly();
        let x = indicator(18);
        let direct = disaggregate(&y, Some(&x), 3, &spec()).unwrap();

        let series = vec![y.clone(), y.clone(), y];
        let indicators = vec![x.clone(), x.clone(), x];
        let results = batch_disaggregate(&series, Some(&indicators), 3, &spec());
        assert_eq!(results.len(), 3);
        for r in &results {
            let r = r.as_ref().unwrap();
            for t in 0..18 {
                assert!((r.series[t] - direct.series[t]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn batch_without_indicators() {
        let series = vec![quarterly(), quarterly()];
        let spec = TemporalDisaggregationSpec {
            model: ResidualModel::RandomWalk,
            ..Default::default()
        };
        let results = batch_disaggregate(&series, None, 4, &spec);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn batch_empty() {
        let results = batch_disaggregate(&[], None, 4, &spec());
        assert!(results.is_empty());
    }

    #[test]
    fn one_failure_does_not_poison_the_rest() {
        let good = quarterly();
        let bad: Vec<f64> = vec![f64::NAN; 6];
        let results = batch_disaggregate(&[good, bad], None, 4, &spec());
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn batch_denton_matches_serial() {
        let w: Vec<f64> = vec![10.0, 11.0, 12.0, 12.5, 13.0, 12.0, 11.5, 12.5];
        let y = vec![50.0, 56.0];
        let direct = denton(Some(&w), &y, 4, &DentonSpec::default()).unwrap();
        let results =
            batch_denton(&[w.clone(), w], &[y.clone(), y], 4, &DentonSpec::default());
        for r in &results {
            let r = r.as_ref().unwrap();
            for t in 0..8 {
                assert!((r.series[t] - direct.series[t]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn batch_grp_runs() {
        let w: Vec<f64> = vec![10.0, 11.0, 12.5, 12.0, 13.0, 12.0, 11.0, 12.5];
        let y = vec![50.0, 56.0];
        let results = batch_grp(&[w], &[y], 4, &GrpSpec::default());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }
}
