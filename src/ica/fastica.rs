//! Symmetric FastICA with the log-cosh contrast after PCA whitening.
//!
//! ```text
//! Xc = X − mean                       [C, T]
//! Cov = Xc Xcᵀ / T = E D Eᵀ           eigenvalues sorted descending
//! K   = D_k^{-1/2} E_kᵀ               whitening  [k, C]
//! Z   = K Xc                          unit variance  [k, T]
//!
//! repeat: W ← sym( E[tanh(WZ) Zᵀ] − diag(E[1 − tanh²(WZ)]) W )
//!         until max |(|diag(W_new Wᵀ)| − 1)| < tol
//!
//! unmixing U = W K       [k, C]
//! mixing   A = E_k D_k^{1/2} Wᵀ   [C, k]
//! ```
//!
//! `sym(W) = (W Wᵀ)^{-1/2} W` keeps the rows orthonormal.
use anyhow::{bail, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, warn};

/// Eigenvalues below `RANK_TOL · λ_max` count as rank deficiency.
pub const RANK_TOL: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastIcaOptions {
    pub n_components: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct FastIcaFit {
    pub mean: Array1<f64>,
    /// `[k, C]`
    pub unmixing: Array2<f64>,
    /// `[C, k]`
    pub mixing: Array2<f64>,
    pub n_iter: usize,
    pub converged: bool,
}

/// PCA whitening of centred data.
#[derive(Debug, Clone)]
pub struct Whitening {
    /// `[k, C]`
    pub whitener: Array2<f64>,
    /// `[C, k]`, inverse of `whitener` on its row space.
    pub dewhitener: Array2<f64>,
    /// Numerical rank of the covariance.
    pub rank: usize,
}

fn to_na(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_na(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Whiten to at most `n_components` dimensions (fewer if rank-deficient).
pub fn whiten(xc: &Array2<f64>, n_components: usize) -> Result<Whitening> {
    let (n_chan, n_times) = xc.dim();
    if n_times < 2 {
        bail!("cannot whiten {n_times} sample(s)");
    }
    let cov = xc.dot(&xc.t()) / n_times as f64;
    let eig = SymmetricEigen::new(to_na(&cov));

    let mut order: Vec<usize> = (0..n_chan).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let lambda_max = eig.eigenvalues[order[0]].max(0.0);
    let rank = order
        .iter()
        .filter(|&&i| eig.eigenvalues[i] > lambda_max * RANK_TOL)
        .count();
    if rank == 0 {
        bail!("data covariance is zero; nothing to decompose");
    }

    let k = n_components.min(rank);
    if k < n_components {
        warn!(requested = n_components, rank, "data rank below requested components; reducing");
    }

    let mut whitener = Array2::zeros((k, n_chan));
    let mut dewhitener = Array2::zeros((n_chan, k));
    for (row, &i) in order.iter().take(k).enumerate() {
        let d = eig.eigenvalues[i].sqrt();
        for c in 0..n_chan {
            let e = eig.eigenvectors[(c, i)];
            whitener[[row, c]] = e / d;
            dewhitener[[c, row]] = e * d;
        }
    }
    Ok(Whitening { whitener, dewhitener, rank })
}

/// `(W Wᵀ)^{-1/2} W`
fn sym_decorrelate(w: &Array2<f64>) -> Array2<f64> {
    let m = to_na(&w.dot(&w.t()));
    let eig = SymmetricEigen::new(m);
    let k = w.nrows();
    let mut inv_sqrt = DMatrix::<f64>::zeros(k, k);
    for i in 0..k {
        let s = eig.eigenvalues[i].max(f64::MIN_POSITIVE).sqrt();
        let v = eig.eigenvectors.column(i);
        inv_sqrt += (v * v.transpose()) / s;
    }
    from_na(&inv_sqrt).dot(w)
}

/// Fit FastICA to `x` (`[C, T]`).
pub fn fit_fastica(x: &Array2<f64>, opts: &FastIcaOptions) -> Result<FastIcaFit> {
    let n_times = x.ncols();
    let Some(mean) = x.mean_axis(Axis(1)) else {
        bail!("cannot decompose an empty signal");
    };
    let xc = x - &mean.view().insert_axis(Axis(1));

    let white = whiten(&xc, opts.n_components)?;
    let z = white.whitener.dot(&xc);
    let k = z.nrows();

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let w0 = Array2::from_shape_fn((k, k), |_| rng.sample::<f64, _>(StandardNormal));
    let mut w = sym_decorrelate(&w0);

    let mut converged = false;
    let mut n_iter = 0;
    for it in 1..=opts.max_iter {
        n_iter = it;
        let wz = w.dot(&z).mapv(f64::tanh);
        let g_prime_mean = wz
            .mapv(|g| 1.0 - g * g)
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(k));
        let mut w_new = wz.dot(&z.t()) / n_times as f64;
        for i in 0..k {
            let scale = g_prime_mean[i];
            let w_row = w.row(i).to_owned();
            let mut row = w_new.row_mut(i);
            row.scaled_add(-scale, &w_row);
        }
        let w_new = sym_decorrelate(&w_new);

        let lim = w_new
            .dot(&w.t())
            .diag()
            .iter()
            .map(|d| (d.abs() - 1.0).abs())
            .fold(0.0_f64, f64::max);
        w = w_new;
        if lim < opts.tol {
            converged = true;
            break;
        }
    }

    if converged {
        debug!(n_iter, k, "fastica converged");
    } else {
        warn!(max_iter = opts.max_iter, "fastica did not converge; using last estimate");
    }

    let unmixing = w.dot(&white.whitener);
    let mixing = white.dewhitener.dot(&w.t());
    Ok(FastIcaFit { mean, unmixing, mixing, n_iter, converged })
}
