//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter, grouped per stage. All
//! fields are `pub` and every struct implements [`Default`], so partial
//! configurations can be written with struct-update syntax:
//!
//! ```
//! use eegstage::config::{EpochConfig, PipelineConfig};
//!
//! let cfg = PipelineConfig {
//!     epochs: EpochConfig { tmin: -0.5, tmax: 2.0, ..EpochConfig::default() },
//!     ..PipelineConfig::default()
//! };
//! assert_eq!(cfg.epochs.reject_uv, Some(150.0));
//! ```
//!
//! The same structure deserialises from JSON with every field optional:
//!
//! ```json
//! { "load": { "l_freq": 1.0, "notch_freqs": [60] },
//!   "epochs": { "conditions": { "2": "Rotation 90", "8": "Post-rotation" } } }
//! ```
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::channels::{default_renames, default_role_rules, ChannelModelOptions, ChannelRole, RoleRule};
use crate::error::PipelineError;
use crate::reference::{ReferenceMode, ReferenceScheme};
use crate::spectral::{default_bands, FrequencyBand};
use crate::xdf::XdfOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Subject/session id used in every output file name. Derived from the
    /// input file name when absent.
    pub subject_id: Option<String>,

    /// Directory for stage outputs. Defaults to the input's directory.
    pub output_dir: Option<PathBuf>,

    /// Ask on the console at the user-mediated steps (stream selection,
    /// bad channels, component exclusion). When off, stream selection is
    /// automatic and edit loops keep their configured sets.
    pub interactive: bool,

    pub load: LoadConfig,
    pub interpolate: InterpolateConfig,
    pub rereference: RereferenceConfig,
    pub ica: IcaConfig,
    pub epochs: EpochConfig,
    pub spectral: SpectralConfig,
    pub tfr: TfrConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subject_id: None,
            output_dir: None,
            interactive: false,
            load: LoadConfig::default(),
            interpolate: InterpolateConfig::default(),
            rereference: RereferenceConfig::default(),
            ica: IcaConfig::default(),
            epochs: EpochConfig::default(),
            spectral: SpectralConfig::default(),
            tfr: TfrConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| -> Result<()> { Err(PipelineError::InvalidConfig(msg).into()) };
        if let (Some(l), Some(h)) = (self.load.l_freq, self.load.h_freq) {
            if l >= h {
                return bad(format!("l_freq ({l}) must be below h_freq ({h})"));
            }
        }
        if self.epochs.tmax <= self.epochs.tmin {
            return bad(format!(
                "epoch window tmin={} tmax={} is empty",
                self.epochs.tmin, self.epochs.tmax
            ));
        }
        if self.epochs.baseline && self.epochs.tmin > 0.0 {
            return bad(format!(
                "baseline needs tmin <= 0 (got tmin={})",
                self.epochs.tmin
            ));
        }
        if self.spectral.fmin >= self.spectral.fmax {
            return bad(format!(
                "spectral range [{}, {}] is empty",
                self.spectral.fmin, self.spectral.fmax
            ));
        }
        if self.ica.z_threshold <= 0.0 {
            return bad(format!("z_threshold must be positive (got {})", self.ica.z_threshold));
        }
        Ok(())
    }
}

// ── load ─────────────────────────────────────────────────────────────────────

/// Stream selection, channel model and filtering (the `load` stage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Type tag of the signal stream (exact match). Default: `"EEG"`.
    pub signal_marker: String,
    /// Substring of the event stream's type tag. Default: `"Marker"`.
    pub event_marker: String,

    pub synchronize_clocks: bool,
    pub dejitter: bool,

    pub role_rules: Vec<RoleRule>,
    /// Label → canonical label, keys matched case-insensitively.
    pub renames: BTreeMap<String, String>,
    /// Layout for head positions; `None` skips positions.
    pub montage: Option<String>,
    /// Stream values are µV and are converted to volts.
    pub scale_to_volts: bool,

    /// Optional crop window in seconds after construction.
    pub crop_tmin: Option<f64>,
    pub crop_tmax: Option<f64>,

    /// Exact channel names removed before filtering.
    ///
    /// Default: `["EOG", "TRIGGER"]`.
    pub drop_channels: Vec<String>,
    /// Roles removed before filtering. Default: none.
    pub drop_roles: Vec<ChannelRole>,

    /// Line frequencies to notch. Default: `[50.0]`.
    pub notch_freqs: Vec<f64>,
    /// Also notch every harmonic below Nyquist.
    pub notch_harmonics: bool,

    /// Band-pass edges; either may be `None` for a one-sided filter.
    ///
    /// Default: 0.1 – 40 Hz.
    pub l_freq: Option<f64>,
    pub h_freq: Option<f64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            signal_marker: "EEG".into(),
            event_marker: "Marker".into(),
            synchronize_clocks: true,
            dejitter: true,
            role_rules: default_role_rules(),
            renames: default_renames(),
            montage: Some("standard_1005".into()),
            scale_to_volts: true,
            crop_tmin: None,
            crop_tmax: None,
            drop_channels: vec!["EOG".into(), "TRIGGER".into()],
            drop_roles: vec![],
            notch_freqs: vec![50.0],
            notch_harmonics: false,
            l_freq: Some(0.1),
            h_freq: Some(40.0),
        }
    }
}

impl LoadConfig {
    pub fn xdf_options(&self) -> XdfOptions {
        XdfOptions { synchronize_clocks: self.synchronize_clocks, dejitter: self.dejitter }
    }

    pub fn channel_model(&self) -> ChannelModelOptions {
        ChannelModelOptions {
            role_rules: self.role_rules.clone(),
            renames: self.renames.clone(),
            montage: self.montage.clone(),
            scale_to_volts: self.scale_to_volts,
        }
    }
}

// ── interpolate ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolateConfig {
    /// Channels known to be bad before any prompt. Unknown names are an error.
    pub bad_channels: Vec<String>,
}

// ── rereference ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RereferenceConfig {
    /// Flat channel to add back before referencing (the recording reference,
    /// e.g. `"CPz"`). Its position comes from the load montage.
    pub restore_channel: Option<String>,
    pub scheme: ReferenceScheme,
    /// Default: projection (deferred, applied on read).
    pub mode: ReferenceMode,
    /// High-pass edge required before referencing; applied when the filter
    /// history shows a lower (or no) high-pass. Default: 0.1 Hz.
    pub pre_reference_highpass: Option<f64>,
}

impl Default for RereferenceConfig {
    fn default() -> Self {
        Self {
            restore_channel: None,
            scheme: ReferenceScheme::default(),
            mode: ReferenceMode::default(),
            pre_reference_highpass: Some(0.1),
        }
    }
}

// ── ica ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcaConfig {
    /// `"fastica"`; `"picard"` and `"infomax"` are recognised but unavailable.
    pub method: String,
    /// Default: number of signal channels (capped at the data rank).
    pub n_components: Option<usize>,
    /// High-pass applied to the copy used for fitting. Default: 1 Hz.
    pub fit_highpass: Option<f64>,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
    /// Ocular reference channels; `None` = every ocular-role channel.
    pub ocular_channels: Option<Vec<String>>,
    /// Cardiac reference channels; `None` = every cardiac-role channel.
    pub cardiac_channels: Option<Vec<String>>,
    pub ocular_band: (f64, f64),
    pub cardiac_band: (f64, f64),
    /// |z| above which a component is flagged. Default: 3.0.
    pub z_threshold: f64,
    /// Outlier passes, each ignoring previously flagged scores. Default: 2.
    pub z_passes: usize,
    /// Component indices always excluded.
    pub exclude: Vec<usize>,
}

impl Default for IcaConfig {
    fn default() -> Self {
        Self {
            method: "fastica".into(),
            n_components: None,
            fit_highpass: Some(1.0),
            max_iter: 1000,
            tol: 1e-4,
            seed: 97,
            ocular_channels: None,
            cardiac_channels: None,
            ocular_band: (1.0, 10.0),
            cardiac_band: (8.0, 16.0),
            z_threshold: 3.0,
            z_passes: 2,
            exclude: vec![],
        }
    }
}

// ── epochs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochConfig {
    /// Annotation label → condition name. Labels not listed are skipped.
    pub conditions: BTreeMap<String, String>,
    /// Window start relative to the onset, seconds. Default: −1.
    pub tmin: f64,
    /// Window end (inclusive), seconds. Default: 15.
    pub tmax: f64,
    /// Subtract the per-channel mean over `[tmin, 0]`.
    pub baseline: bool,
    /// Peak-to-peak rejection threshold on signal channels in µV.
    ///
    /// Default: `Some(150.0)`.
    pub reject_uv: Option<f64>,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            conditions: BTreeMap::new(),
            tmin: -1.0,
            tmax: 15.0,
            baseline: true,
            reject_uv: Some(150.0),
        }
    }
}

// ── spectral / tfr ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub fmin: f64,
    pub fmax: f64,
    /// Welch segment length. Default: 2048 (capped to the epoch length).
    pub n_fft: usize,
    pub bands: Vec<FrequencyBand>,
    /// Divide by total power within `[fmin, fmax]`.
    pub relative: bool,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { fmin: 1.0, fmax: 45.0, n_fft: 2048, bands: default_bands(), relative: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfrConfig {
    pub fmin: f64,
    pub fmax: f64,
    pub n_freqs: usize,
    /// Cycles per wavelet = `freq / cycles_divisor`. Default: 2.
    pub cycles_divisor: f64,
    /// Log-ratio baseline over `[tmin, 0]`.
    pub baseline: bool,
}

impl Default for TfrConfig {
    fn default() -> Self {
        Self { fmin: 4.0, fmax: 45.0, n_freqs: 30, cycles_divisor: 2.0, baseline: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn reference_mode_defaults_agree() {
        assert_eq!(ReferenceMode::default(), ReferenceMode::Projection);
        assert_eq!(RereferenceConfig::default().mode, ReferenceMode::Projection);
        let parsed: RereferenceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.mode, ReferenceMode::Projection);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{ "load": { "l_freq": 1.0 },
                 "rereference": { "scheme": { "kind": "channels", "names": ["M1", "M2"] },
                                  "mode": "destructive" },
                 "epochs": { "conditions": { "2": "Rotation 90" } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.load.l_freq, Some(1.0));
        assert_eq!(cfg.load.h_freq, Some(40.0));
        assert_eq!(cfg.load.notch_freqs, vec![50.0]);
        assert_eq!(cfg.rereference.mode, ReferenceMode::Destructive);
        assert_eq!(
            cfg.rereference.scheme,
            ReferenceScheme::Channels { names: vec!["M1".into(), "M2".into()] }
        );
        assert_eq!(cfg.epochs.conditions.get("2").map(String::as_str), Some("Rotation 90"));
        assert_eq!(cfg.ica.seed, 97);
    }

    #[test]
    fn positive_tmin_with_baseline_is_rejected() {
        let cfg = PipelineConfig {
            epochs: EpochConfig { tmin: 0.5, tmax: 2.0, ..EpochConfig::default() },
            ..PipelineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(_))
        ));
    }
}
