//! # eegstage: staged EEG preprocessing and analysis
//!
//! `eegstage` turns an XDF recording into cleaned, epoched EEG plus
//! band-power and time-frequency summaries. Each stage reads the previous
//! stage's file, so any stage can be re-run on its own. The filtering,
//! interpolation and spectral steps follow [MNE-Python](https://mne.tools)
//! conventions.
//!
//! ## Pipeline overview
//!
//! ```text
//! recording.xdf
//!   │
//!   ├─ xdf::load_xdf()             chunk decoder, clock sync, dejitter
//!   ├─ stream::select_auto()       signal + event stream by type tag
//!   ├─ channels::build_state()     roles, renames, units → volts, montage
//!   ├─ conditioning                prune, notch, FIR band-pass
//!   │     └─→ <id>_filtered_raw.safetensors
//!   ├─ interpolate                 spherical-spline repair of bad channels
//!   │     └─→ <id>_interpolated_raw.safetensors
//!   ├─ reference                   restore reference, average / channel ref
//!   │     └─→ <id>_rereferenced_raw.safetensors
//!   ├─ ica                         FastICA, ocular / cardiac scoring
//!   │     └─→ <id>_ica_cleaned_raw.safetensors + <id>-ica.safetensors
//!   ├─ epoch                       event windows, baseline, amplitude reject
//!   │     └─→ <id>_clean_epo.safetensors
//!   ├─ spectral                    Welch PSD → band power
//!   │     └─→ <id>_bandpower.json
//!   └─ tfr                         Morlet power per condition
//!         └─→ <id>_tfr.safetensors
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use eegstage::{Pipeline, PipelineConfig, StagePaths};
//! use std::path::Path;
//!
//! let input = Path::new("data/sub-01_eeg.xdf");
//! let cfg = PipelineConfig::default();
//! let paths = StagePaths::for_input(input, &cfg);
//! let written = Pipeline::new(cfg, paths).run_all(input).unwrap();
//! for p in written {
//!     println!("{}", p.display());
//! }
//! ```
//!
//! ## Running stages in memory
//!
//! ```no_run
//! use eegstage::{load_xdf, preprocess, PipelineConfig};
//!
//! let cfg = PipelineConfig::default();
//! let rec = load_xdf("data/sub-01_eeg.xdf", &cfg.load.xdf_options()).unwrap();
//! let out = preprocess(&rec, &cfg, None).unwrap();
//! println!("{} epochs, {} components removed", out.epochs.n_epochs(), out.model.exclude.len());
//! ```

pub mod annotations;
pub mod channels;
pub mod conditioning;
pub mod config;
pub mod edit;
pub mod epoch;
pub mod error;
pub mod filter;
pub mod ica;
pub mod interact;
pub mod interpolate;
pub mod io;
pub mod montage;
pub mod normalize;
pub mod pipeline;
pub mod reference;
pub mod spectral;
pub mod state;
pub mod stream;
pub mod tfr;
pub mod xdf;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config + errors
pub use config::PipelineConfig;
pub use error::PipelineError;

// container + selection
pub use stream::{select_auto, select_manual, Recording, Stream, StreamSelection, StreamSummary};
pub use xdf::{load_xdf, read_xdf, XdfOptions};

// channel model + signal state
pub use annotations::{Annotation, Annotations};
pub use channels::{build_state, Channel, ChannelRole};
pub use montage::Montage;
pub use state::{ReferenceDescriptor, SignalState, SignalUnit};

// processing
pub use epoch::{segment, EpochSet};
pub use ica::{remove_artifacts, DecompositionModel, IcaMethod};
pub use interpolate::interpolate_bads;
pub use reference::{set_reference, ReferenceMode, ReferenceScheme};
pub use spectral::{band_power_table, BandPowerTable, FrequencyBand};
pub use tfr::{compute_tfr, ConditionTfr};

// interaction
pub use interact::{ConsolePrompt, Prompt, ScriptedPrompt};

// io: safetensors persistence
pub use io::{load_epochs, load_model, load_state, load_tfr, save_epochs, save_model, save_state, save_tfr};

// orchestration
pub use pipeline::{preprocess, subject_id_from_path, Pipeline, PipelineOutput, Stage, StagePaths};
