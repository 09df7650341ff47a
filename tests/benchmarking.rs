//! End-to-end benchmarking behavior: Denton variants against growth-rate
//! preservation on the same data.

use tempdisagg_rs::{
    denton, grp, AggregationType, DentonSpec, GrowthObjective, GrpSpec,
};

fn indicator() -> Vec<f64> {
    vec![
        98.2, 100.8, 102.2, 100.8, 99.0, 101.6, 102.7, 101.5, 100.5, 103.0, 103.5, 101.5,
    ]
}

fn benchmarks() -> Vec<f64> {
    vec![409.4, 413.4, 417.1]
}

fn sums(series: &[f64], ratio: usize) -> Vec<f64> {
    series.chunks(ratio).map(|c| c.iter().sum::<f64>()).collect()
}

fn forward_discrepancy(series: &[f64], w: &[f64]) -> f64 {
    (1..series.len())
        .map(|t| {
            let g = series[t] / series[t - 1] - w[t] / w[t - 1];
            g * g
        })
        .sum()
}

#[test]
fn denton_and_grp_both_meet_the_benchmarks() {
    let w = indicator();
    let y = benchmarks();

    let d = denton(Some(&w), &y, 4, &DentonSpec::default()).unwrap();
    let g = grp(Some(&w), &y, 4, &GrpSpec::default()).unwrap();
    for (result, name) in [(&d.series, "denton"), (&g.series, "grp")] {
        for (total, target) in sums(result, 4).iter().zip(&y) {
            assert!(
                (total - target).abs() < 1e-6 * target,
                "{}: {} vs {}",
                name,
                total,
                target
            );
        }
    }
}

#[test]
fn grp_improves_the_growth_discrepancy_over_denton() {
    let w = indicator();
    let y = benchmarks();
    let d = denton(Some(&w), &y, 4, &DentonSpec::default()).unwrap();
    let g = grp(Some(&w), &y, 4, &GrpSpec::default()).unwrap();
    let denton_obj = forward_discrepancy(&d.series, &w);
    assert!(
        g.objective_value <= denton_obj + 1e-12,
        "grp {} vs denton {}",
        g.objective_value,
        denton_obj
    );
}

#[test]
fn proportional_denton_beats_pro_rata_on_movement() {
    let w = indicator();
    let y = benchmarks();
    let d = denton(Some(&w), &y, 4, &DentonSpec::default()).unwrap();

    // pro-rata: scale each period by its own benchmark-to-indicator ratio
    let mut pro_rata = Vec::with_capacity(w.len());
    for (j, target) in y.iter().enumerate() {
        let total: f64 = w[4 * j..4 * j + 4].iter().sum();
        for t in 4 * j..4 * j + 4 {
            pro_rata.push(w[t] * target / total);
        }
    }

    let movement = |series: &[f64]| -> f64 {
        (1..series.len())
            .map(|t| {
                let db = series[t] / w[t] - series[t - 1] / w[t - 1];
                db * db
            })
            .sum()
    };
    assert!(movement(&d.series) <= movement(&pro_rata) + 1e-12);
}

#[test]
fn average_aggregation_benchmarks_period_means() {
    let w = indicator();
    let y: Vec<f64> = benchmarks().iter().map(|v| v / 4.0).collect();
    let spec = DentonSpec { aggregation: AggregationType::Average, ..Default::default() };
    let d = denton(Some(&w), &y, 4, &spec).unwrap();
    for (j, target) in y.iter().enumerate() {
        let mean: f64 = d.series[4 * j..4 * j + 4].iter().sum::<f64>() / 4.0;
        assert!((mean - target).abs() < 1e-6 * target);
    }

    let gspec = GrpSpec { aggregation: AggregationType::Average, ..Default::default() };
    let g = grp(Some(&w), &y, 4, &gspec).unwrap();
    for (j, target) in y.iter().enumerate() {
        let mean: f64 = g.series[4 * j..4 * j + 4].iter().sum::<f64>() / 4.0;
        assert!((mean - target).abs() < 1e-6 * target);
    }
}

#[test]
fn symmetric_and_log_objectives_stay_close_for_mild_revisions() {
    let w = indicator();
    let y = benchmarks();
    let mut results = Vec::new();
    for objective in [
        GrowthObjective::Forward,
        GrowthObjective::Symmetric,
        GrowthObjective::Log,
    ] {
        let spec = GrpSpec { objective, ..Default::default() };
        results.push(grp(Some(&w), &y, 4, &spec).unwrap().series);
    }
    // revisions are a fraction of a percent here, the objectives agree to
    // well under that
    for series in &results[1..] {
        for (a, b) in series.iter().zip(&results[0]) {
            assert!((a - b).abs() < 5e-3 * b.abs(), "{} vs {}", a, b);
        }
    }
}

#[test]
fn second_order_denton_smooths_the_biratio_slope() {
    let w = indicator();
    let y = benchmarks();
    let spec = DentonSpec { differencing: 2, ..Default::default() };
    let d = denton(Some(&w), &y, 4, &spec).unwrap();
    for (total, target) in sums(&d.series, 4).iter().zip(&y) {
        assert!((total - target).abs() < 1e-6 * target);
    }
    assert!(d.biratios.iter().all(|b| b.is_finite()));
}
