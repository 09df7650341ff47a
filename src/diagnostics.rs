//! Residual diagnostics on the standardized one-step innovations.
//!
//! Under a correct specification the standardized innovations are iid
//! standard normal, so the usual battery applies: moment summary,
//! Jarque-Bera normality, Ljung-Box autocorrelation, Durbin-Watson.

use statrs::distribution::{ChiSquared, ContinuousCDF};

/// A test statistic with its asymptotic p-value.
#[derive(Debug, Clone, Copy)]
pub struct TestStatistic {
    pub statistic: f64,
    pub pvalue: f64,
}

#[derive(Debug, Clone)]
pub struct ResidualDiagnostics {
    /// Number of innovations entering the tests.
    pub n: usize,
    pub mean: f64,
    pub skewness: f64,
    /// Raw kurtosis (3 under normality).
    pub kurtosis: f64,
    pub jarque_bera: TestStatistic,
    pub ljung_box: TestStatistic,
    pub ljung_box_lags: usize,
    pub durbin_watson: f64,
}

fn chi2_pvalue(stat: f64, df: usize) -> f64 {
    let dist = ChiSquared::new(df as f64).expect("degrees of freedom > 0");
    1.0 - dist.cdf(stat)
}

fn autocorrelation(resid: &[f64], mean: f64, lag: usize) -> f64 {
    let n = resid.len();
    let denom: f64 = resid.iter().map(|e| (e - mean).powi(2)).sum();
    if denom <= 0.0 {
        return 0.0;
    }
    let num: f64 = (lag..n)
        .map(|t| (resid[t] - mean) * (resid[t - lag] - mean))
        .sum();
    num / denom
}

/// Compute the battery; `None` when there are too few innovations for the
/// moments to mean anything.
pub(crate) fn compute(resid: &[f64], max_lags: usize) -> Option<ResidualDiagnostics> {
    let n = resid.len();
    if n < 4 {
        return None;
    }
    let nf = n as f64;
    let mean = resid.iter().sum::<f64>() / nf;
    let m2 = resid.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / nf;
    if m2 <= 0.0 {
        return None;
    }
    let m3 = resid.iter().map(|e| (e - mean).powi(3)).sum::<f64>() / nf;
    let m4 = resid.iter().map(|e| (e - mean).powi(4)).sum::<f64>() / nf;
    let skewness = m3 / m2.powf(1.5);
    let kurtosis = m4 / (m2 * m2);

    let jb = nf / 6.0 * (skewness * skewness + (kurtosis - 3.0).powi(2) / 4.0);
    let jarque_bera = TestStatistic { statistic: jb, pvalue: chi2_pvalue(jb, 2) };

    let lags = max_lags.min(n / 2).max(1);
    let lb: f64 = (1..=lags)
        .map(|k| {
            let r = autocorrelation(resid, mean, k);
            r * r / (nf - k as f64)
        })
        .sum::<f64>()
        * nf
        * (nf + 2.0);
    let ljung_box = TestStatistic { statistic: lb, pvalue: chi2_pvalue(lb, lags) };

    let dsum: f64 = (1..n).map(|t| (resid[t] - resid[t - 1]).powi(2)).sum();
    let esum: f64 = resid.iter().map(|e| e * e).sum();
    let durbin_watson = if esum > 0.0 { dsum / esum } else { 0.0 };

    Some(ResidualDiagnostics {
        n,
        mean,
        skewness,
        kurtosis,
        jarque_bera,
        ljung_box,
        ljung_box_lags: lags,
        durbin_watson,
    })
}
