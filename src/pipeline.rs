//! Stage runners and their file hand-offs.
//!
//! ```text
//! load         <input>.xdf                 → <id>_filtered_raw.safetensors
//! interpolate  _filtered_raw               → <id>_interpolated_raw.safetensors
//! rereference  _interpolated_raw           → <id>_rereferenced_raw.safetensors
//! ica          _rereferenced_raw           → <id>_ica_cleaned_raw.safetensors
//!                                            + <id>-ica.safetensors
//! epochs       _ica_cleaned_raw            → <id>_clean_epo.safetensors
//! bandpower    _clean_epo                  → <id>_bandpower.json
//! tfr          _clean_epo                  → <id>_tfr.safetensors
//! ```
//!
//! Every stage reads its input file, runs in memory and writes its outputs
//! atomically; failures carry a `stage '<name>'` context. The in-memory
//! stage functions are public so callers (and tests) can compose them
//! without touching the filesystem.
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::annotations::build_annotations;
use crate::channels::build_state;
use crate::conditioning::{
    apply_bandpass, apply_notch, mark_bad_channels, prune_channels, rereference, restore_reference,
};
use crate::config::PipelineConfig;
use crate::epoch::{segment, EpochSet};
use crate::ica::{remove_artifacts, DecompositionModel};
use crate::interact::Prompt;
use crate::interpolate::interpolate_bads;
use crate::io;
use crate::montage::Montage;
use crate::spectral::{band_power_table, BandPowerTable};
use crate::state::SignalState;
use crate::stream::{select_auto, select_manual, Recording};
use crate::tfr::{compute_tfr, ConditionTfr};
use crate::xdf::load_xdf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Interpolate,
    Rereference,
    Ica,
    Epochs,
    Bandpower,
    Tfr,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Load,
        Stage::Interpolate,
        Stage::Rereference,
        Stage::Ica,
        Stage::Epochs,
        Stage::Bandpower,
        Stage::Tfr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Interpolate => "interpolate",
            Stage::Rereference => "rereference",
            Stage::Ica => "ica",
            Stage::Epochs => "epochs",
            Stage::Bandpower => "bandpower",
            Stage::Tfr => "tfr",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Subject/session id from an input file name: strips `_eeg.xdf`, else the
/// extension.
pub fn subject_id_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix("_eeg.xdf") {
        return stem.to_string();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// Output locations for one subject/session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePaths {
    pub dir: PathBuf,
    pub id: String,
}

impl StagePaths {
    pub fn new(dir: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self { dir: dir.into(), id: id.into() }
    }

    /// Configured id and directory, falling back to the input's name and
    /// directory.
    pub fn for_input(input: &Path, cfg: &PipelineConfig) -> Self {
        let id = cfg.subject_id.clone().unwrap_or_else(|| subject_id_from_path(input));
        let dir = cfg
            .output_dir
            .clone()
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self { dir, id }
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{suffix}", self.id))
    }

    pub fn filtered_raw(&self) -> PathBuf {
        self.file("_filtered_raw.safetensors")
    }

    pub fn interpolated_raw(&self) -> PathBuf {
        self.file("_interpolated_raw.safetensors")
    }

    pub fn rereferenced_raw(&self) -> PathBuf {
        self.file("_rereferenced_raw.safetensors")
    }

    pub fn ica_cleaned_raw(&self) -> PathBuf {
        self.file("_ica_cleaned_raw.safetensors")
    }

    pub fn ica_model(&self) -> PathBuf {
        self.file("-ica.safetensors")
    }

    pub fn clean_epochs(&self) -> PathBuf {
        self.file("_clean_epo.safetensors")
    }

    pub fn bandpower(&self) -> PathBuf {
        self.file("_bandpower.json")
    }

    pub fn tfr(&self) -> PathBuf {
        self.file("_tfr.safetensors")
    }

    /// Files a stage writes.
    pub fn outputs(&self, stage: Stage) -> Vec<PathBuf> {
        match stage {
            Stage::Load => vec![self.filtered_raw()],
            Stage::Interpolate => vec![self.interpolated_raw()],
            Stage::Rereference => vec![self.rereferenced_raw()],
            Stage::Ica => vec![self.ica_cleaned_raw(), self.ica_model()],
            Stage::Epochs => vec![self.clean_epochs()],
            Stage::Bandpower => vec![self.bandpower()],
            Stage::Tfr => vec![self.tfr()],
        }
    }
}

// ── In-memory stages ─────────────────────────────────────────────────────────

/// Selection, channel model, annotations, optional crop, pruning, notch and
/// band-pass.
pub fn load_stage(rec: &Recording, cfg: &PipelineConfig, prompt: Option<&mut dyn Prompt>) -> Result<SignalState> {
    let selection = match prompt {
        Some(p) => select_manual(rec, p)?,
        None => select_auto(rec, &cfg.load.signal_marker, &cfg.load.event_marker)?,
    };
    let mut state = build_state(selection.signal(rec), &cfg.load.channel_model())?;
    state.annotations = build_annotations(selection.events(rec), state.first_time);
    info!(n_annotations = state.annotations.len(), "annotations attached");

    if cfg.load.crop_tmin.is_some() || cfg.load.crop_tmax.is_some() {
        state.crop(cfg.load.crop_tmin.unwrap_or(0.0), cfg.load.crop_tmax)?;
        info!(n_times = state.n_times(), first_time = state.first_time, "cropped");
    }

    prune_channels(&mut state, &cfg.load.drop_channels, &cfg.load.drop_roles);
    apply_notch(&mut state, &cfg.load.notch_freqs, cfg.load.notch_harmonics)?;
    apply_bandpass(&mut state, cfg.load.l_freq, cfg.load.h_freq)?;
    Ok(state)
}

pub fn interpolate_stage(state: &mut SignalState, cfg: &PipelineConfig, prompt: Option<&mut dyn Prompt>) -> Result<()> {
    mark_bad_channels(state, &cfg.interpolate.bad_channels, prompt)?;
    interpolate_bads(state)
}

pub fn rereference_stage(state: &mut SignalState, cfg: &PipelineConfig) -> Result<()> {
    let rc = &cfg.rereference;
    if let Some(name) = &rc.restore_channel {
        let montage = cfg.load.montage.as_deref().map(Montage::standard).transpose()?;
        restore_reference(state, name, montage.as_ref())?;
    }
    rereference(state, &rc.scheme, rc.mode, rc.pre_reference_highpass)
}

pub fn ica_stage(
    state: &mut SignalState,
    cfg: &PipelineConfig,
    prompt: Option<&mut dyn Prompt>,
) -> Result<DecompositionModel> {
    remove_artifacts(state, &cfg.ica, prompt)
}

pub fn epoch_stage(state: &SignalState, cfg: &PipelineConfig) -> Result<EpochSet> {
    segment(state, &cfg.epochs)
}

pub fn bandpower_stage(epochs: &EpochSet, cfg: &PipelineConfig) -> Result<BandPowerTable> {
    band_power_table(epochs, &cfg.spectral)
}

pub fn tfr_stage(epochs: &EpochSet, cfg: &PipelineConfig) -> Result<Vec<ConditionTfr>> {
    compute_tfr(epochs, &cfg.tfr)
}

/// Everything the in-memory composition produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub state: SignalState,
    pub model: DecompositionModel,
    pub epochs: EpochSet,
    pub bandpower: BandPowerTable,
    pub tfr: Vec<ConditionTfr>,
}

/// All stages in order without intermediate files.
pub fn preprocess(rec: &Recording, cfg: &PipelineConfig, mut prompt: Option<&mut dyn Prompt>) -> Result<PipelineOutput> {
    cfg.validate()?;
    let mut state = load_stage(rec, cfg, reborrow(&mut prompt)).context(stage_context(Stage::Load))?;
    interpolate_stage(&mut state, cfg, reborrow(&mut prompt)).context(stage_context(Stage::Interpolate))?;
    rereference_stage(&mut state, cfg).context(stage_context(Stage::Rereference))?;
    let model = ica_stage(&mut state, cfg, reborrow(&mut prompt)).context(stage_context(Stage::Ica))?;
    let epochs = epoch_stage(&state, cfg).context(stage_context(Stage::Epochs))?;
    let bandpower = if epochs.n_epochs() > 0 {
        bandpower_stage(&epochs, cfg).context(stage_context(Stage::Bandpower))?
    } else {
        empty_table(cfg)
    };
    let tfr = if epochs.n_epochs() > 0 {
        tfr_stage(&epochs, cfg).context(stage_context(Stage::Tfr))?
    } else {
        vec![]
    };
    Ok(PipelineOutput { state, model, epochs, bandpower, tfr })
}

fn empty_table(cfg: &PipelineConfig) -> BandPowerTable {
    BandPowerTable {
        relative: cfg.spectral.relative,
        fmin: cfg.spectral.fmin,
        fmax: cfg.spectral.fmax,
        n_fft: cfg.spectral.n_fft,
        bands: cfg.spectral.bands.clone(),
        channels: vec![],
        rows: vec![],
        means: vec![],
    }
}

fn reborrow<'s>(prompt: &'s mut Option<&mut dyn Prompt>) -> Option<&'s mut dyn Prompt> {
    match prompt {
        Some(p) => Some(&mut **p),
        None => None,
    }
}

fn stage_context(stage: Stage) -> String {
    format!("stage '{stage}'")
}

// ── File-backed runner ───────────────────────────────────────────────────────

/// Runs stages against the files named by [`StagePaths`].
pub struct Pipeline<'p> {
    pub cfg: PipelineConfig,
    pub paths: StagePaths,
    prompt: Option<&'p mut dyn Prompt>,
}

impl<'p> Pipeline<'p> {
    pub fn new(cfg: PipelineConfig, paths: StagePaths) -> Self {
        Self { cfg, paths, prompt: None }
    }

    /// Answer the user-mediated steps through `prompt`.
    pub fn with_prompt(mut self, prompt: &'p mut dyn Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    fn prompt(&mut self) -> Option<&mut dyn Prompt> {
        match &mut self.prompt {
            Some(p) => Some(&mut **p),
            None => None,
        }
    }

    /// Run one stage. `input` is the XDF file for [`Stage::Load`] and
    /// ignored otherwise. Returns the files written.
    pub fn run_stage(&mut self, stage: Stage, input: Option<&Path>) -> Result<Vec<PathBuf>> {
        info!(stage = stage.name(), id = %self.paths.id, "stage started");
        let result = match stage {
            Stage::Load => match input {
                Some(input) => self.run_load(input),
                None => Err(crate::error::PipelineError::InvalidConfig(
                    "the load stage needs an input file".to_string(),
                )
                .into()),
            },
            Stage::Interpolate => self.run_interpolate(),
            Stage::Rereference => self.run_rereference(),
            Stage::Ica => self.run_ica(),
            Stage::Epochs => self.run_epochs(),
            Stage::Bandpower => self.run_bandpower(),
            Stage::Tfr => self.run_tfr(),
        };
        let written = result.with_context(|| stage_context(stage))?;
        for p in &written {
            info!(stage = stage.name(), path = %p.display(), "written");
        }
        Ok(written)
    }

    /// Every stage in order, each reading the previous stage's file.
    pub fn run_all(&mut self, input: &Path) -> Result<Vec<PathBuf>> {
        self.cfg.validate()?;
        let mut written = Vec::new();
        for stage in Stage::ALL {
            written.extend(self.run_stage(stage, Some(input))?);
        }
        Ok(written)
    }

    fn run_load(&mut self, input: &Path) -> Result<Vec<PathBuf>> {
        let rec = load_xdf(input, &self.cfg.load.xdf_options())?;
        let cfg = self.cfg.clone();
        let state = load_stage(&rec, &cfg, self.prompt())?;
        let out = self.paths.filtered_raw();
        io::save_state(&state, &out)?;
        Ok(vec![out])
    }

    fn run_interpolate(&mut self) -> Result<Vec<PathBuf>> {
        let mut state = io::load_state(&self.paths.filtered_raw())?;
        let cfg = self.cfg.clone();
        interpolate_stage(&mut state, &cfg, self.prompt())?;
        let out = self.paths.interpolated_raw();
        io::save_state(&state, &out)?;
        Ok(vec![out])
    }

    fn run_rereference(&mut self) -> Result<Vec<PathBuf>> {
        let mut state = io::load_state(&self.paths.interpolated_raw())?;
        rereference_stage(&mut state, &self.cfg)?;
        let out = self.paths.rereferenced_raw();
        io::save_state(&state, &out)?;
        Ok(vec![out])
    }

    fn run_ica(&mut self) -> Result<Vec<PathBuf>> {
        let mut state = io::load_state(&self.paths.rereferenced_raw())?;
        let cfg = self.cfg.clone();
        let model = ica_stage(&mut state, &cfg, self.prompt())?;
        let (cleaned, model_path) = (self.paths.ica_cleaned_raw(), self.paths.ica_model());
        io::save_model(&model, &model_path)?;
        io::save_state(&state, &cleaned)?;
        Ok(vec![cleaned, model_path])
    }

    fn run_epochs(&mut self) -> Result<Vec<PathBuf>> {
        let state = io::load_state(&self.paths.ica_cleaned_raw())?;
        let epochs = epoch_stage(&state, &self.cfg)?;
        let out = self.paths.clean_epochs();
        io::save_epochs(&epochs, &out)?;
        Ok(vec![out])
    }

    fn run_bandpower(&mut self) -> Result<Vec<PathBuf>> {
        let epochs = io::load_epochs(&self.paths.clean_epochs())?;
        let table = if epochs.n_epochs() > 0 {
            bandpower_stage(&epochs, &self.cfg)?
        } else {
            tracing::warn!("no epochs; writing an empty band-power table");
            empty_table(&self.cfg)
        };
        let out = self.paths.bandpower();
        io::write_json(&out, &table)?;
        Ok(vec![out])
    }

    fn run_tfr(&mut self) -> Result<Vec<PathBuf>> {
        let epochs = io::load_epochs(&self.paths.clean_epochs())?;
        let tfr = tfr_stage(&epochs, &self.cfg)?;
        let out = self.paths.tfr();
        io::save_tfr(&tfr, &out)?;
        Ok(vec![out])
    }
}
