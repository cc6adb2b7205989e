//! Summary statistics over a samples × dimensions matrix, as produced by
//! [`crate::io::MemorySink::to_matrix`]. Used by the diagnostics in the
//! integration tests and for quick post-run checks.

use nalgebra::{DMatrix, DVector};

/// Per-dimension sample mean.
pub fn mean(samples: &DMatrix<f64>) -> DVector<f64> {
    let n = samples.nrows() as f64;
    DVector::from_fn(samples.ncols(), |j, _| samples.column(j).sum() / n)
}

/// Unbiased sample covariance (rows are observations).
pub fn covariance(samples: &DMatrix<f64>) -> DMatrix<f64> {
    let n = samples.nrows();
    assert!(n > 1, "covariance needs at least two samples");

    let mu = mean(samples);
    let mut centered = samples.clone();
    for mut row in centered.row_iter_mut() {
        row -= mu.transpose();
    }
    (centered.transpose() * centered) / (n as f64 - 1.0)
}

/// Per-dimension unbiased sample variance.
pub fn variance(samples: &DMatrix<f64>) -> DVector<f64> {
    covariance(samples).diagonal()
}
