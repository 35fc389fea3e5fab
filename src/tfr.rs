//! Morlet time-frequency power, averaged per condition.
//!
//! ```text
//! σ_t  = n_cycles / (2π f)
//! w(t) = exp(2πi f t) · exp(−t² / 2σ_t²),   t ∈ [−5σ_t, 5σ_t]
//! w   /= √0.5 · ‖w‖
//! P(f, t) = mean over epochs |x ∗ w|²        ('same' convolution)
//! logratio baseline: P ← log10(P / mean(P over [tmin, 0]))
//! ```
use std::f64::consts::PI;

use anyhow::Result;
use ndarray::{s, Array3};
use rustfft::{num_complex::Complex, FftPlanner};
use tracing::{info, warn};

use crate::config::TfrConfig;
use crate::epoch::EpochSet;
use crate::error::PipelineError;
use crate::normalize::baseline_range;

/// `n` log-spaced frequencies from `fmin` to `fmax` inclusive.
pub fn logspace(fmin: f64, fmax: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![fmin],
        _ => {
            let (a, b) = (fmin.log10(), fmax.log10());
            (0..n)
                .map(|i| 10f64.powf(a + (b - a) * i as f64 / (n - 1) as f64))
                .collect()
        }
    }
}

/// Complex Morlet wavelet sampled at `sfreq`.
pub fn morlet(freq: f64, sfreq: f64, n_cycles: f64) -> Vec<Complex<f64>> {
    let sigma_t = n_cycles / (2.0 * PI * freq);
    let half = (5.0 * sigma_t * sfreq).floor() as i64;
    let mut w: Vec<Complex<f64>> = (-half..=half)
        .map(|i| {
            let t = i as f64 / sfreq;
            let gauss = (-t * t / (2.0 * sigma_t * sigma_t)).exp();
            Complex::from_polar(gauss, 2.0 * PI * freq * t)
        })
        .collect();
    let norm = w.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt() * 0.5_f64.sqrt();
    if norm > 0.0 {
        w.iter_mut().for_each(|c| *c /= norm);
    }
    w
}

/// `|x ∗ w|²` trimmed to the length of `x` (centred).
fn convolve_power(x: &[f64], w: &[Complex<f64>], planner: &mut FftPlanner<f64>) -> Vec<f64> {
    let n_full = x.len() + w.len() - 1;
    let n_fft = n_full.next_power_of_two();
    let fwd = planner.plan_fft_forward(n_fft);
    let inv = planner.plan_fft_inverse(n_fft);

    let mut a: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex { re: v, im: 0.0 })
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    let mut b: Vec<Complex<f64>> = w
        .iter()
        .copied()
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    fwd.process(&mut a);
    fwd.process(&mut b);
    for (p, q) in a.iter_mut().zip(&b) {
        *p *= q;
    }
    inv.process(&mut a);
    let scale = 1.0 / n_fft as f64;
    let start = (w.len() - 1) / 2;
    a[start..start + x.len()]
        .iter()
        .map(|c| (*c * scale).norm_sqr())
        .collect()
}

/// Average power of one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTfr {
    pub condition: String,
    pub n_epochs: usize,
    pub channels: Vec<String>,
    pub freqs: Vec<f64>,
    pub times: Vec<f64>,
    /// `[C, F, T]`
    pub power: Array3<f64>,
    /// `"logratio"` when the baseline was applied.
    pub baseline: Option<String>,
}

/// Apply a log-ratio baseline over `range` to `[C, F, T]` power.
pub fn logratio_baseline(power: &mut Array3<f64>, range: std::ops::RangeInclusive<usize>) {
    let (n_c, n_f, _) = power.dim();
    for c in 0..n_c {
        for f in 0..n_f {
            let base = power
                .slice(s![c, f, *range.start()..=*range.end()])
                .mean()
                .unwrap_or(f64::NAN);
            power.slice_mut(s![c, f, ..]).mapv_inplace(|p| (p / base).log10());
        }
    }
}

/// Morlet power per condition over the signal channels.
pub fn compute_tfr(epochs: &EpochSet, cfg: &TfrConfig) -> Result<Vec<ConditionTfr>> {
    if cfg.n_freqs == 0 || cfg.fmin <= 0.0 || cfg.fmin > cfg.fmax || cfg.fmax >= epochs.sfreq / 2.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "TFR frequencies {}..{} Hz ({} steps) invalid at {} Hz",
            cfg.fmin, cfg.fmax, cfg.n_freqs, epochs.sfreq
        ))
        .into());
    }
    let freqs = logspace(cfg.fmin, cfg.fmax, cfg.n_freqs);
    let n_times = epochs.n_times();
    let wavelets: Vec<Vec<Complex<f64>>> = freqs
        .iter()
        .map(|&f| morlet(f, epochs.sfreq, f / cfg.cycles_divisor))
        .collect();
    if let Some(longest) = wavelets.iter().map(Vec::len).max() {
        if longest > n_times {
            return Err(PipelineError::InvalidConfig(format!(
                "wavelet at {} Hz spans {longest} samples, longer than the {n_times}-sample epochs",
                cfg.fmin
            ))
            .into());
        }
    }

    let rows = epochs.signal_indices();
    let channels: Vec<String> = rows.iter().map(|&c| epochs.channels[c].name.clone()).collect();
    let baseline = if cfg.baseline {
        let r = baseline_range(epochs.tmin, epochs.sfreq, n_times);
        if r.is_none() {
            warn!(tmin = epochs.tmin, "epochs start after the event; TFR baseline skipped");
        }
        r
    } else {
        None
    };

    let mut planner = FftPlanner::<f64>::new();
    let mut out = Vec::new();
    for condition in epochs.condition_names() {
        let idx = epochs.indices_of(&condition);
        let mut power = Array3::<f64>::zeros((rows.len(), freqs.len(), n_times));
        for &e in &idx {
            for (ci, &c) in rows.iter().enumerate() {
                let x = epochs.data.slice(s![e, c, ..]).to_vec();
                for (fi, w) in wavelets.iter().enumerate() {
                    let p = convolve_power(&x, w, &mut planner);
                    let mut dst = power.slice_mut(s![ci, fi, ..]);
                    for (d, v) in dst.iter_mut().zip(p) {
                        *d += v;
                    }
                }
            }
        }
        power.mapv_inplace(|p| p / idx.len() as f64);
        if let Some(range) = baseline.clone() {
            logratio_baseline(&mut power, range);
        }
        info!(condition = %condition, n_epochs = idx.len(), "time-frequency power computed");
        out.push(ConditionTfr {
            condition,
            n_epochs: idx.len(),
            channels: channels.clone(),
            freqs: freqs.clone(),
            times: epochs.times(),
            power,
            baseline: baseline.as_ref().map(|_| "logratio".to_string()),
        });
    }
    Ok(out)
}
