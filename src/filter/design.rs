//! Linear-phase FIR design, MNE `fir_design='firwin'` conventions.
//!
//! Automatic transition bandwidths:
//!   • high-pass edge `l`:  `tb = min(max(0.25·l, 2), l)`,        cutoff `l − tb/2`
//!   • low-pass edge  `h`:  `tb = min(max(0.25·h, 2), nyq − h)`,  cutoff `h + tb/2`
//!   • notch at `f`:        stop width `f/200`, 0.5 Hz transition per side
//!
//! Length: `ceil(3.3 / min_tb · sfreq)` rounded up to odd (Hamming window).
//! Every kernel is a Hamming-windowed sinc built from unit-DC low-passes:
//!
//! ```text
//! lowpass(c)        = lp(c)
//! highpass(c)       = δ − lp(c)
//! bandpass(c1, c2)  = lp(c2) − lp(c1)
//! bandstop(c1, c2)  = δ − bandpass(c1, c2)
//! ```
use std::f64::consts::PI;

use anyhow::Result;

use crate::error::PipelineError;

/// Hamming main-lobe factor used for the automatic length.
const HAMMING_LENGTH_FACTOR: f64 = 3.3;

/// Transition bandwidth on each side of a notch stop band.
pub const NOTCH_HALF_TRANSITION: f64 = 0.5;

/// Automatic transition bandwidth for a high-pass edge.
pub fn auto_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Automatic transition bandwidth for a low-pass edge.
pub fn auto_trans_bandwidth_low(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of taps for a transition bandwidth; always odd.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n_raw = (HAMMING_LENGTH_FACTOR / trans_bw * sfreq).ceil().max(1.0) as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

fn check_edge(name: &str, f: f64, sfreq: f64) -> Result<()> {
    let nyq = sfreq / 2.0;
    if !(f > 0.0 && f < nyq) {
        return Err(PipelineError::InvalidConfig(format!(
            "{name} = {f} Hz must lie in (0, {nyq}) Hz"
        ))
        .into());
    }
    Ok(())
}

/// Zero-phase high-pass at `l_freq` Hz.
pub fn design_highpass(l_freq: f64, sfreq: f64) -> Result<Vec<f64>> {
    check_edge("l_freq", l_freq, sfreq)?;
    let tb = auto_trans_bandwidth(l_freq);
    let n = auto_filter_length(tb, sfreq);
    Ok(spectral_invert(firwin(n, l_freq - tb / 2.0, sfreq)))
}

/// Zero-phase low-pass at `h_freq` Hz.
pub fn design_lowpass(h_freq: f64, sfreq: f64) -> Result<Vec<f64>> {
    check_edge("h_freq", h_freq, sfreq)?;
    let tb = auto_trans_bandwidth_low(h_freq, sfreq);
    let n = auto_filter_length(tb, sfreq);
    Ok(firwin(n, h_freq + tb / 2.0, sfreq))
}

/// Zero-phase band-pass `[l_freq, h_freq]`.
pub fn design_bandpass(l_freq: f64, h_freq: f64, sfreq: f64) -> Result<Vec<f64>> {
    check_edge("l_freq", l_freq, sfreq)?;
    check_edge("h_freq", h_freq, sfreq)?;
    if l_freq >= h_freq {
        return Err(PipelineError::InvalidConfig(format!(
            "band-pass needs l_freq < h_freq (got {l_freq} >= {h_freq})"
        ))
        .into());
    }
    let l_tb = auto_trans_bandwidth(l_freq);
    let h_tb = auto_trans_bandwidth_low(h_freq, sfreq);
    let n = auto_filter_length(l_tb.min(h_tb), sfreq);
    Ok(band(n, l_freq - l_tb / 2.0, h_freq + h_tb / 2.0, sfreq))
}

/// Zero-phase band-stop centred on the line frequency `freq`.
pub fn design_notch(freq: f64, sfreq: f64) -> Result<Vec<f64>> {
    check_edge("notch frequency", freq, sfreq)?;
    let half_width = freq / 200.0 / 2.0;
    let lo = freq - half_width - NOTCH_HALF_TRANSITION / 2.0;
    let hi = freq + half_width + NOTCH_HALF_TRANSITION / 2.0;
    let nyq = sfreq / 2.0;
    if lo <= 0.0 || hi >= nyq {
        return Err(PipelineError::InvalidConfig(format!(
            "notch at {freq} Hz does not fit below Nyquist ({nyq} Hz)"
        ))
        .into());
    }
    let n = auto_filter_length(NOTCH_HALF_TRANSITION, sfreq);
    Ok(spectral_invert(band(n, lo, hi, sfreq)))
}

/// Kernel for optional edges: band-pass, one-sided high/low-pass, or `None`.
pub fn design_filter(l_freq: Option<f64>, h_freq: Option<f64>, sfreq: f64) -> Result<Option<Vec<f64>>> {
    Ok(match (l_freq, h_freq) {
        (Some(l), Some(h)) => Some(design_bandpass(l, h, sfreq)?),
        (Some(l), None) => Some(design_highpass(l, sfreq)?),
        (None, Some(h)) => Some(design_lowpass(h, sfreq)?),
        (None, None) => None,
    })
}

/// Unit-DC-gain Hamming-windowed sinc low-pass with `n` (odd) taps.
///
/// `cutoff_hz` is the −6 dB point.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64) -> Vec<f64> {
    let alpha = (n as f64 - 1.0) / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);
    let win = hamming(n);

    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();

    let s: f64 = h.iter().sum();
    if s != 0.0 {
        h.iter_mut().for_each(|v| *v /= s);
    }
    h
}

fn band(n: usize, lo: f64, hi: f64, sfreq: f64) -> Vec<f64> {
    let low = firwin(n, lo, sfreq);
    firwin(n, hi, sfreq)
        .into_iter()
        .zip(low)
        .map(|(a, b)| a - b)
        .collect()
}

/// `δ − h` (odd length).
fn spectral_invert(mut h: Vec<f64>) -> Vec<f64> {
    let mid = h.len() / 2;
    h.iter_mut().for_each(|v| *v = -*v);
    h[mid] += 1.0;
    h
}

/// Symmetric Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Magnitude of the kernel's frequency response at `f` Hz.
pub fn gain_at(h: &[f64], f: f64, sfreq: f64) -> f64 {
    let w = 2.0 * PI * f / sfreq;
    let (re, im) = h.iter().enumerate().fold((0.0, 0.0), |(re, im), (k, &v)| {
        (re + v * (w * k as f64).cos(), im - v * (w * k as f64).sin())
    });
    (re * re + im * im).sqrt()
}
