//! Epoch baseline correction and amplitude measures.
//!
//! `baseline_correct_inplace` subtracts, per epoch and channel, the mean over
//! the baseline sample range (the `[tmin, 0]` part of the window):
//!
//! ```text
//! epoch[e, c, :] -= mean(epoch[e, c, b0..=b1])
//! ```
use std::ops::RangeInclusive;

use ndarray::{s, Array3, ArrayView1};

/// Sample range covering `[tmin, 0]` s of a window starting at `tmin`.
///
/// `None` when `tmin > 0` (no pre-stimulus samples).
pub fn baseline_range(tmin: f64, sfreq: f64, n_times: usize) -> Option<RangeInclusive<usize>> {
    if tmin > 0.0 || n_times == 0 {
        return None;
    }
    let zero = ((-tmin * sfreq).round() as usize).min(n_times - 1);
    Some(0..=zero)
}

/// Per-channel, per-epoch baseline correction over `range`.
pub fn baseline_correct_inplace(epochs: &mut Array3<f64>, range: RangeInclusive<usize>) {
    let (n_e, n_c, _) = epochs.dim();
    for e in 0..n_e {
        for c in 0..n_c {
            let m = epochs
                .slice(s![e, c, *range.start()..=*range.end()])
                .mean()
                .unwrap_or(0.0);
            epochs.slice_mut(s![e, c, ..]).mapv_inplace(|v| v - m);
        }
    }
}

/// `max − min` of a series; `NaN` if any sample is non-finite.
pub fn peak_to_peak(x: ArrayView1<f64>) -> f64 {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in x {
        if !v.is_finite() {
            return f64::NAN;
        }
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if lo > hi { 0.0 } else { hi - lo }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array3};

    #[test]
    fn baseline_range_covers_prestimulus() {
        assert_eq!(baseline_range(-0.2, 250.0, 251), Some(0..=50));
        assert_eq!(baseline_range(0.0, 250.0, 10), Some(0..=0));
        assert_eq!(baseline_range(0.1, 250.0, 10), None);
    }

    #[test]
    fn baseline_zeroes_prestimulus_mean() {
        let mut ep = Array3::from_shape_fn((2, 3, 100), |(e, c, t)| e as f64 + c as f64 * 2.0 + t as f64 * 0.1);
        baseline_correct_inplace(&mut ep, 0..=19);
        for e in 0..2 {
            for c in 0..3 {
                let m = ep.slice(s![e, c, 0..=19]).mean().unwrap();
                approx::assert_abs_diff_eq!(m, 0.0, epsilon = 1e-12);
            }
        }
        // Slope is kept.
        approx::assert_abs_diff_eq!(ep[[0, 0, 99]] - ep[[0, 0, 0]], 9.9, epsilon = 1e-12);
    }

    #[test]
    fn ptp() {
        assert_eq!(peak_to_peak(arr1(&[1.0, -2.0, 4.0]).view()), 6.0);
        assert!(peak_to_peak(arr1(&[1.0, f64::NAN]).view()).is_nan());
    }
}
