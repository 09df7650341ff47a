//! Small symmetric/triangular helpers on top of nalgebra.
//!
//! Filter covariances are positive semi-definite, frequently with exactly
//! singular blocks (fixed regression coefficients, zero-initialized states),
//! so the stock Cholesky is not usable everywhere.

use nalgebra::DMatrix;

/// Lower Cholesky factor of a positive semi-definite matrix.
///
/// Columns whose pivot falls below `tol * max_diag` are zeroed instead of
/// failing, so exactly singular covariances factor cleanly.
pub fn psd_cholesky(m: &DMatrix<f64>, tol: f64) -> DMatrix<f64> {
    let n = m.nrows();
    let mut l = DMatrix::<f64>::zeros(n, n);
    let max_diag = (0..n).map(|i| m[(i, i)].abs()).fold(0.0f64, f64::max);
    let floor = tol * max_diag.max(1.0);

    for j in 0..n {
        let mut d = m[(j, j)];
        for k in 0..j {
            d -= l[(j, k)] * l[(j, k)];
        }
        if d <= floor {
            // singular direction: leave the column at zero
            continue;
        }
        let dj = d.sqrt();
        l[(j, j)] = dj;
        for i in (j + 1)..n {
            let mut v = m[(i, j)];
            for k in 0..j {
                v -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = v / dj;
        }
    }
    l
}

/// Inverse of a symmetric positive definite matrix.
pub fn inverse_spd(s: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    nalgebra::Cholesky::new(s.clone()).map(|ch| ch.inverse())
}

/// Log-determinant of a symmetric positive definite matrix.
pub fn log_det_spd(s: &DMatrix<f64>) -> Option<f64> {
    nalgebra::Cholesky::new(s.clone())
        .map(|ch| 2.0 * ch.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>())
}

/// Force exact symmetry, averaging off-diagonal drift from repeated updates.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = v;
            m[(j, i)] = v;
        }
    }
}
