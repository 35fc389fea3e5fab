//! Spherical-spline interpolation of bad channels (Perrin et al., 1989).
//!
//! With unit position vectors and `g(x) = Σₙ (2n+1) / (nᵏ (n+1)ᵏ 4π) · Pₙ(x)`
//! (Legendre order 7, stiffness k = 4):
//!
//! ```text
//! C   = ┌ G_from + αI   1 ┐        G_from[i, j]    = g(pᵢ · pⱼ)
//!       └ 1ᵀ            0 ┘        G_to_from[b, j] = g(p_b · pⱼ)
//! M   = [G_to_from  1] · pinv(C)[:, :-1]
//! x_b = M · x_good
//! ```
use std::f64::consts::PI;

use anyhow::{anyhow, Result};
use nalgebra::DMatrix;
use ndarray::Array2;
use tracing::{info, warn};

use crate::channels::ChannelRole;
use crate::error::PipelineError;
use crate::state::SignalState;

pub const LEGENDRE_TERMS: usize = 7;
pub const STIFFNESS: i32 = 4;
pub const ALPHA: f64 = 1e-5;

/// Spline kernel `g(cos θ)`.
pub fn calc_g(cosang: f64) -> f64 {
    let x = cosang.clamp(-1.0, 1.0);
    let (mut p_prev, mut p) = (1.0, x);
    let mut g = 0.0;
    for n in 1..=LEGENDRE_TERMS {
        let nf = n as f64;
        let factor = (2.0 * nf + 1.0) / (nf.powi(STIFFNESS) * (nf + 1.0).powi(STIFFNESS) * 4.0 * PI);
        g += factor * p;
        let p_next = ((2.0 * nf + 1.0) * x * p - nf * p_prev) / (nf + 1.0);
        p_prev = p;
        p = p_next;
    }
    g
}

fn normalize(p: &[f64; 3]) -> [f64; 3] {
    let n = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
    if n > 0.0 {
        [p[0] / n, p[1] / n, p[2] / n]
    } else {
        *p
    }
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// `[n_to, n_from]` matrix mapping good-channel samples to the targets.
pub fn interpolation_matrix(from: &[[f64; 3]], to: &[[f64; 3]]) -> Result<Array2<f64>> {
    let from: Vec<[f64; 3]> = from.iter().map(normalize).collect();
    let to: Vec<[f64; 3]> = to.iter().map(normalize).collect();
    let n = from.len();

    let mut c = DMatrix::<f64>::zeros(n + 1, n + 1);
    for i in 0..n {
        for j in 0..n {
            c[(i, j)] = calc_g(dot(&from[i], &from[j]));
        }
        c[(i, i)] += ALPHA;
        c[(i, n)] = 1.0;
        c[(n, i)] = 1.0;
    }
    let c_inv = c
        .pseudo_inverse(1e-12)
        .map_err(|e| anyhow!("spline system pseudo-inverse: {e}"))?;

    let mut lhs = DMatrix::<f64>::zeros(to.len(), n + 1);
    for (b, pb) in to.iter().enumerate() {
        for (j, pj) in from.iter().enumerate() {
            lhs[(b, j)] = calc_g(dot(pb, pj));
        }
        lhs[(b, n)] = 1.0;
    }
    let m = lhs * c_inv.columns(0, n);
    Ok(Array2::from_shape_fn((to.len(), n), |(i, j)| m[(i, j)]))
}

/// Replace every bad signal channel by its spline estimate and clear `bads`.
///
/// Bad channels of other roles cannot be interpolated; they are unmarked
/// with a warning.
pub fn interpolate_bads(state: &mut SignalState) -> Result<()> {
    if state.bads.is_empty() {
        info!("no bad channels; interpolation skipped");
        return Ok(());
    }

    let mut bad_idx = Vec::new();
    for name in &state.bads {
        let i = state
            .index_of(name)
            .ok_or_else(|| PipelineError::UnknownChannel(name.clone()))?;
        if state.channels[i].role == ChannelRole::Signal {
            bad_idx.push(i);
        } else {
            warn!(channel = %name, role = state.channels[i].role.as_str(), "only signal channels are interpolated; unmarking");
        }
    }
    if bad_idx.is_empty() {
        state.bads.clear();
        return Ok(());
    }

    let mut to = Vec::with_capacity(bad_idx.len());
    for &i in &bad_idx {
        let ch = &state.channels[i];
        to.push(ch.pos.ok_or_else(|| PipelineError::MissingPosition(ch.name.clone()))?);
    }

    let good_idx: Vec<usize> = state
        .signal_indices()
        .into_iter()
        .filter(|i| !bad_idx.contains(i) && state.channels[*i].pos.is_some())
        .collect();
    if good_idx.is_empty() {
        return Err(PipelineError::NoGoodNeighbours {
            bads: bad_idx.iter().map(|&i| state.channels[i].name.clone()).collect(),
        }
        .into());
    }
    let from: Vec<[f64; 3]> = good_idx
        .iter()
        .filter_map(|&i| state.channels[i].pos)
        .collect();

    let m = interpolation_matrix(&from, &to)?;
    let good = state.data.select(ndarray::Axis(0), &good_idx);
    let estimate = m.dot(&good);

    let mut non_finite = Vec::new();
    for (k, &i) in bad_idx.iter().enumerate() {
        let row = estimate.row(k);
        if row.iter().any(|v| !v.is_finite()) {
            non_finite.push(state.channels[i].name.clone());
        }
        state.data.row_mut(i).assign(&row);
    }
    if !non_finite.is_empty() {
        return Err(PipelineError::NonFiniteAfterInterpolation(non_finite).into());
    }

    info!(
        interpolated = ?bad_idx.iter().map(|&i| state.channels[i].name.as_str()).collect::<Vec<_>>(),
        n_from = good_idx.len(),
        "bad channels interpolated"
    );
    state.bads.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn kernel_is_largest_at_zero_distance() {
        assert!(calc_g(1.0) > calc_g(0.5));
        assert!(calc_g(0.5) > calc_g(0.0));
    }

    #[test]
    fn interpolation_weights_sum_to_one() {
        // The constant term in the system makes the weights reproduce a
        // constant field.
        let from = [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let to = [[0.5, 0.5, 0.7071]];
        let m = interpolation_matrix(&from, &to).unwrap();
        assert_abs_diff_eq!(m.row(0).sum(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn target_at_a_source_reproduces_it() {
        let from = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [-0.6, -0.6, 0.53]];
        let m = interpolation_matrix(&from, &[from[2]]).unwrap();
        assert_abs_diff_eq!(m[[0, 2]], 1.0, epsilon = 5e-2);
    }
}
