//! Welch power spectra and frequency-band power tables.
//!
//! ```text
//! per epoch × signal channel:
//!   segments of n_fft (no overlap) ─► remove mean ─► Hamming ─► |FFT|²
//!   ─► mean over segments ─► one-sided density  (V²/Hz)
//!
//! band power  = mean PSD over bins low ≤ f < high
//! relative    = PSD / Σ PSD over [fmin, fmax] before the band mean
//! ```
use anyhow::Result;
use ndarray::{s, Array3};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SpectralConfig;
use crate::epoch::EpochSet;
use crate::error::PipelineError;
use crate::filter::hamming;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl FrequencyBand {
    pub fn new(name: &str, low: f64, high: f64) -> Self {
        Self { name: name.to_string(), low, high }
    }

    pub fn contains(&self, f: f64) -> bool {
        f >= self.low && f < self.high
    }
}

pub fn default_bands() -> Vec<FrequencyBand> {
    vec![
        FrequencyBand::new("Theta", 4.0, 8.0),
        FrequencyBand::new("Alpha", 8.0, 13.0),
        FrequencyBand::new("Beta", 13.0, 30.0),
        FrequencyBand::new("Gamma", 30.0, 45.0),
    ]
}

/// Welch density estimate of one series with non-overlapping segments.
///
/// Returns `(freqs, psd)` over all `n_fft / 2 + 1` one-sided bins.
pub fn welch(x: &[f64], sfreq: f64, n_fft: usize) -> (Vec<f64>, Vec<f64>) {
    let n_bins = n_fft / 2 + 1;
    let freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * sfreq / n_fft as f64).collect();
    let n_seg = if n_fft == 0 { 0 } else { x.len() / n_fft };
    if n_seg == 0 {
        return (freqs, vec![0.0; n_bins]);
    }

    let window = hamming(n_fft);
    let win_pow: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (sfreq * win_pow);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);

    let mut psd = vec![0.0; n_bins];
    let mut buf = vec![Complex::<f64>::default(); n_fft];
    for seg in x.chunks_exact(n_fft).take(n_seg) {
        let mean = seg.iter().sum::<f64>() / n_fft as f64;
        for ((b, &v), &w) in buf.iter_mut().zip(seg).zip(&window) {
            *b = Complex { re: (v - mean) * w, im: 0.0 };
        }
        fft.process(&mut buf);
        for (p, b) in psd.iter_mut().zip(&buf) {
            *p += b.norm_sqr();
        }
    }
    let nyquist_bin = if n_fft % 2 == 0 { Some(n_bins - 1) } else { None };
    for (k, p) in psd.iter_mut().enumerate() {
        *p *= scale / n_seg as f64;
        if k != 0 && Some(k) != nyquist_bin {
            *p *= 2.0;
        }
    }
    (freqs, psd)
}

/// Power spectra of every epoch over the signal channels.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSpectra {
    pub freqs: Vec<f64>,
    pub channels: Vec<String>,
    /// `[E, C, F]`
    pub psd: Array3<f64>,
}

pub fn compute_psd(epochs: &EpochSet, cfg: &SpectralConfig) -> Result<EpochSpectra> {
    if cfg.fmin >= cfg.fmax {
        return Err(PipelineError::InvalidConfig(format!(
            "spectral range [{}, {}] is empty",
            cfg.fmin, cfg.fmax
        ))
        .into());
    }
    let n_times = epochs.n_times();
    let mut n_fft = cfg.n_fft;
    if n_fft > n_times {
        warn!(n_fft, n_times, "n_fft longer than the epochs; capping");
        n_fft = n_times;
    }
    if n_fft < 2 {
        return Err(PipelineError::InvalidConfig(format!("epochs of {n_times} samples are too short for a spectrum")).into());
    }

    let rows = epochs.signal_indices();
    let all_freqs: Vec<f64> = (0..n_fft / 2 + 1).map(|k| k as f64 * epochs.sfreq / n_fft as f64).collect();
    let keep: Vec<usize> = (0..all_freqs.len())
        .filter(|&k| all_freqs[k] >= cfg.fmin && all_freqs[k] <= cfg.fmax)
        .collect();
    if keep.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "no frequency bins in [{}, {}] Hz at resolution {:.3} Hz",
            cfg.fmin,
            cfg.fmax,
            epochs.sfreq / n_fft as f64
        ))
        .into());
    }

    let mut psd = Array3::<f64>::zeros((epochs.n_epochs(), rows.len(), keep.len()));
    for e in 0..epochs.n_epochs() {
        for (ci, &c) in rows.iter().enumerate() {
            let x = epochs.data.slice(s![e, c, ..]).to_vec();
            let (_, p) = welch(&x, epochs.sfreq, n_fft);
            for (fi, &k) in keep.iter().enumerate() {
                psd[[e, ci, fi]] = p[k];
            }
        }
    }
    Ok(EpochSpectra {
        freqs: keep.iter().map(|&k| all_freqs[k]).collect(),
        channels: rows.iter().map(|&c| epochs.channels[c].name.clone()).collect(),
        psd,
    })
}

/// `[E, C, B]` band power from spectra.
pub fn band_power(spectra: &EpochSpectra, bands: &[FrequencyBand], relative: bool) -> Array3<f64> {
    let (n_e, n_c, _) = spectra.psd.dim();
    let mut out = Array3::<f64>::from_elem((n_e, n_c, bands.len()), f64::NAN);
    let bins: Vec<Vec<usize>> = bands
        .iter()
        .map(|b| (0..spectra.freqs.len()).filter(|&k| b.contains(spectra.freqs[k])).collect())
        .collect();
    for e in 0..n_e {
        for c in 0..n_c {
            let row = spectra.psd.slice(s![e, c, ..]);
            let total: f64 = if relative { row.sum() } else { 1.0 };
            for (b, idx) in bins.iter().enumerate() {
                if idx.is_empty() || total == 0.0 {
                    continue;
                }
                let mean = idx.iter().map(|&k| row[k]).sum::<f64>() / idx.len() as f64;
                out[[e, c, b]] = mean / total;
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPowerRow {
    pub epoch: usize,
    pub condition: String,
    pub channel: String,
    pub band: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPowerMean {
    pub condition: String,
    pub channel: String,
    pub band: String,
    pub value: f64,
    pub n_epochs: usize,
}

/// Per-epoch rows and per-condition means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPowerTable {
    pub relative: bool,
    pub fmin: f64,
    pub fmax: f64,
    pub n_fft: usize,
    pub bands: Vec<FrequencyBand>,
    pub channels: Vec<String>,
    pub rows: Vec<BandPowerRow>,
    pub means: Vec<BandPowerMean>,
}

/// Spectral stage: PSD, band power and aggregation in one table.
pub fn band_power_table(epochs: &EpochSet, cfg: &SpectralConfig) -> Result<BandPowerTable> {
    let spectra = compute_psd(epochs, cfg)?;
    let power = band_power(&spectra, &cfg.bands, cfg.relative);

    let mut rows = Vec::new();
    for e in 0..epochs.n_epochs() {
        for (c, channel) in spectra.channels.iter().enumerate() {
            for (b, band) in cfg.bands.iter().enumerate() {
                rows.push(BandPowerRow {
                    epoch: e,
                    condition: epochs.conditions[e].clone(),
                    channel: channel.clone(),
                    band: band.name.clone(),
                    value: power[[e, c, b]],
                });
            }
        }
    }

    let mut means = Vec::new();
    for condition in epochs.condition_names() {
        let idx = epochs.indices_of(&condition);
        for (c, channel) in spectra.channels.iter().enumerate() {
            for (b, band) in cfg.bands.iter().enumerate() {
                let value = idx.iter().map(|&e| power[[e, c, b]]).sum::<f64>() / idx.len() as f64;
                means.push(BandPowerMean {
                    condition: condition.clone(),
                    channel: channel.clone(),
                    band: band.name.clone(),
                    value,
                    n_epochs: idx.len(),
                });
            }
        }
    }

    info!(
        n_epochs = epochs.n_epochs(),
        n_chan = spectra.channels.len(),
        n_bands = cfg.bands.len(),
        relative = cfg.relative,
        "band power computed"
    );
    Ok(BandPowerTable {
        relative: cfg.relative,
        fmin: cfg.fmin,
        fmax: cfg.fmax,
        n_fft: cfg.n_fft.min(epochs.n_times()),
        bands: cfg.bands.clone(),
        channels: spectra.channels,
        rows,
        means,
    })
}
