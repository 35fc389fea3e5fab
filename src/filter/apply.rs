//! Overlap-add zero-phase FIR convolution.
//!
//! Zero phase comes from shifting the causal output left by `(N−1)/2`
//! samples (not from forward-backward filtering). Edge transients are
//! suppressed by reflect-limited padding of `N−1` samples on each side.
//!
//! ```text
//! x ─► pad (odd reflection) ─► blocks of n_fft−N+1 ─► FFT · H ─► IFFT
//!   ─► overlap-add with shift (N−1)/2 ─► strip padding ─► y (len x)
//! ```
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// A kernel prepared for repeated overlap-add filtering.
pub struct OverlapAdd {
    n_h: usize,
    n_fft: usize,
    h_fft: Vec<Complex<f64>>,
    fwd: Arc<dyn Fft<f64>>,
    inv: Arc<dyn Fft<f64>>,
}

impl OverlapAdd {
    /// Prepare `h` (odd length) for signals of `n_x` samples.
    pub fn new(h: &[f64], n_x: usize) -> Result<Self> {
        let n_h = h.len();
        if n_h == 0 || n_h % 2 == 0 {
            bail!("zero-phase FIR needs an odd, non-empty kernel (got {n_h} taps)");
        }
        let n_ext = n_x + 2 * (n_h - 1);
        let n_fft = choose_fft_len(n_h, n_ext);

        let mut planner: FftPlanner<f64> = FftPlanner::new();
        let fwd = planner.plan_fft_forward(n_fft);
        let inv = planner.plan_fft_inverse(n_fft);

        let mut h_fft: Vec<Complex<f64>> = h
            .iter()
            .map(|&v| Complex { re: v, im: 0.0 })
            .chain(std::iter::repeat(Complex::default()))
            .take(n_fft)
            .collect();
        fwd.process(&mut h_fft);

        Ok(Self { n_h, n_fft, h_fft, fwd, inv })
    }

    /// Filter one signal; output has the input's length.
    pub fn filter(&self, x: &[f64]) -> Vec<f64> {
        let n_x = x.len();
        if n_x == 0 {
            return vec![];
        }
        let n_h = self.n_h;
        let n_fft = self.n_fft;
        let shift = (n_h - 1) / 2;
        let n_edge = n_h - 1;

        let x_ext = reflect_limited_pad(x, n_edge, n_edge);
        let n_ext = x_ext.len();

        let n_seg = n_fft - n_h + 1;
        let n_segments = n_ext.div_ceil(n_seg);
        let mut y_ext = vec![0.0_f64; n_ext];
        let inv_scale = 1.0 / n_fft as f64;
        let mut buf = vec![Complex::<f64>::default(); n_fft];

        for seg_idx in 0..n_segments {
            let start = seg_idx * n_seg;
            let stop = (start + n_seg).min(n_ext);

            buf.iter_mut().for_each(|b| *b = Complex::default());
            for (b, &v) in buf.iter_mut().zip(&x_ext[start..stop]) {
                b.re = v;
            }
            self.fwd.process(&mut buf);
            for (b, &hf) in buf.iter_mut().zip(&self.h_fft) {
                *b *= hf;
            }
            self.inv.process(&mut buf);

            let out_start = start.saturating_sub(shift);
            let out_end = (out_start + n_fft).min(n_ext);
            let prod_start = shift.saturating_sub(start);
            for (o, p) in (out_start..out_end).zip(prod_start..n_fft) {
                y_ext[o] += buf[p].re * inv_scale;
            }
        }

        y_ext[n_edge..n_edge + n_x].to_vec()
    }
}

/// Zero-phase filter every row of `data` ([C, T]) in place.
pub fn apply_fir_zero_phase(data: &mut Array2<f64>, h: &[f64]) -> Result<()> {
    let rows: Vec<usize> = (0..data.nrows()).collect();
    apply_fir_rows(data, h, &rows)
}

/// Zero-phase filter only the listed rows of `data`.
pub fn apply_fir_rows(data: &mut Array2<f64>, h: &[f64], rows: &[usize]) -> Result<()> {
    if rows.is_empty() || data.ncols() == 0 {
        return Ok(());
    }
    let ola = OverlapAdd::new(h, data.ncols())?;
    for &r in rows {
        let row: Vec<f64> = data.row(r).to_vec();
        let y = ola.filter(&row);
        data.row_mut(r).assign(&ArrayView1::from(&y));
    }
    Ok(())
}

/// Filter a single signal.
pub fn filter_1d(x: &[f64], h: &[f64]) -> Result<Vec<f64>> {
    Ok(OverlapAdd::new(h, x.len())?.filter(x))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Reflect-limited padding (MNE `_smart_pad`).
///
/// Left:  `pad[i] = 2·x[0] − x[i]`; right: `pad[i] = 2·x[−1] − x[−1−i]`.
/// Requests longer than the signal are filled with zeros on the outside.
fn reflect_limited_pad(x: &[f64], n_l: usize, n_r: usize) -> Vec<f64> {
    let n = x.len();
    let actual_l = n_l.min(n - 1);
    let actual_r = n_r.min(n - 1);

    let mut out = Vec::with_capacity(n_l + n + n_r);
    out.extend(std::iter::repeat(0.0).take(n_l - actual_l));
    for i in (1..=actual_l).rev() {
        out.push(2.0 * x[0] - x[i]);
    }
    out.extend_from_slice(x);
    let last = x[n - 1];
    for i in 1..=actual_r {
        out.push(2.0 * last - x[n - 1 - i]);
    }
    out.extend(std::iter::repeat(0.0).take(n_r - actual_r));
    out
}

/// Power-of-two block length minimising
/// `ceil(n_x / (N − n_h + 1)) · N · (log2 N + 1) + 4e-5 · N · n_x`.
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;
    let max_pow = (n_x.max(min_fft) as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow;
    let mut best_cost = f64::INFINITY;
    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft {
            continue;
        }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}
