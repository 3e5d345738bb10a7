//! Small dense linear algebra helpers on top of `ndarray`
//!
//! Everything here works on symmetric positive definite systems: normal
//! equations in the triangulator, innovation covariances and the state
//! covariance in the filter. Helpers return `Option` instead of an error type;
//! callers map `None` to the error that fits their context.

use ndarray::{Array1, Array2};

/// Pivots at or below this value are treated as singular.
const PIVOT_EPSILON: f64 = 1e-12;

/// Cholesky decomposition `A = L Lᵀ`.
///
/// Returns the lower triangular factor, or `None` if `a` is not square or not
/// positive definite.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut sum = 0.0;
        for k in 0..j {
            sum += l[[j, k]] * l[[j, k]];
        }
        let diag = a[[j, j]] - sum;
        if !diag.is_finite() || diag <= PIVOT_EPSILON {
            return None;
        }
        l[[j, j]] = diag.sqrt();

        for i in (j + 1)..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
        }
    }
    Some(l)
}

/// Solves `L Lᵀ x = b` given the Cholesky factor `L`.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();

    // Forward substitution: L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }

    // Back substitution: Lᵀ x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solves `A x = b` for symmetric positive definite `A`.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    if b.len() != a.nrows() {
        return None;
    }
    let l = cholesky(a)?;
    Some(cholesky_solve(&l, b))
}

/// Inverts a symmetric positive definite matrix.
pub fn invert_spd(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let l = cholesky(a)?;
    let mut inv = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[j] = 1.0;
        let col = cholesky_solve(&l, &e);
        inv.column_mut(j).assign(&col);
    }
    symmetrize(&mut inv);
    Some(inv)
}

/// Replaces `a` with `(a + aᵀ) / 2`.
pub fn symmetrize(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = avg;
            a[[j, i]] = avg;
        }
    }
}

/// Checks that `a` is symmetric and positive semi-definite.
///
/// The Cholesky test runs on `a + εI` with ε scaled to the trace, so a
/// covariance that has collapsed to exactly zero along one axis still passes
/// while a negative eigenvalue of any meaningful size does not.
pub fn is_positive_semidefinite(a: &Array2<f64>) -> bool {
    let n = a.nrows();
    if a.ncols() != n || a.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let scale = a.diag().iter().map(|v| v.abs()).sum::<f64>().max(1.0);
    for i in 0..n {
        for j in (i + 1)..n {
            if (a[[i, j]] - a[[j, i]]).abs() > 1e-9 * scale {
                return false;
            }
        }
    }
    let jitter = 1e-9 * scale;
    let shifted = a + &(Array2::<f64>::eye(n) * jitter);
    cholesky(&shifted).is_some()
}

/// Quadratic form `vᵀ A⁻¹ v` for symmetric positive definite `A`.
pub fn inverse_quadratic_form(a: &Array2<f64>, v: &Array1<f64>) -> Option<f64> {
    let x = solve_spd(a, v)?;
    Some(v.dot(&x))
}
