//! Event-locked segmentation.
//!
//! Each annotation whose label is in the condition table yields a window
//!
//! ```text
//! start = round(onset · sfreq) + round(tmin · sfreq)
//! len   = round(tmax · sfreq) − round(tmin · sfreq) + 1
//! ```
//!
//! cut from the projected data. Windows not fully inside the data are dropped
//! with reason `no_data`; windows whose peak-to-peak amplitude on any
//! signal-role channel exceeds the threshold are dropped with reason
//! `amplitude`. Labels missing from the table are skipped without a log entry.
use std::collections::BTreeMap;

use anyhow::Result;
use ndarray::{s, Array3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channels::{Channel, ChannelRole};
use crate::config::EpochConfig;
use crate::error::PipelineError;
use crate::normalize::{baseline_correct_inplace, baseline_range, peak_to_peak};
use crate::state::{SignalState, SignalUnit};

pub const REASON_NO_DATA: &str = "no_data";
pub const REASON_AMPLITUDE: &str = "amplitude";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropLogEntry {
    /// Index into the state's annotation list.
    pub annotation_index: usize,
    pub onset: f64,
    pub label: String,
    pub reasons: Vec<String>,
    /// Channels that triggered an amplitude rejection.
    pub channels: Vec<String>,
}

/// Accepted epochs plus the record of dropped ones.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSet {
    /// `[E, C, T]`
    pub data: Array3<f64>,
    /// Condition name per epoch.
    pub conditions: Vec<String>,
    /// Annotation onset per epoch, seconds.
    pub onsets: Vec<f64>,
    pub channels: Vec<Channel>,
    pub sfreq: f64,
    pub tmin: f64,
    pub unit: SignalUnit,
    pub drop_log: Vec<DropLogEntry>,
}

impl EpochSet {
    pub fn n_epochs(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_times(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Time of each sample relative to the event.
    pub fn times(&self) -> Vec<f64> {
        let t0 = (self.tmin * self.sfreq).round();
        (0..self.n_times()).map(|i| (t0 + i as f64) / self.sfreq).collect()
    }

    pub fn signal_indices(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.role == ChannelRole::Signal)
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct condition names in first-seen order.
    pub fn condition_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.conditions {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
        out
    }

    pub fn indices_of(&self, condition: &str) -> Vec<usize> {
        self.conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == condition)
            .map(|(i, _)| i)
            .collect()
    }

    /// Epoch counts per condition.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for c in &self.conditions {
            *out.entry(c.clone()).or_insert(0) += 1;
        }
        out
    }
}

/// Cut epochs around the annotations of `state`.
pub fn segment(state: &SignalState, cfg: &EpochConfig) -> Result<EpochSet> {
    if cfg.tmax <= cfg.tmin {
        return Err(PipelineError::InvalidConfig(format!(
            "epoch window tmin={} tmax={} is empty",
            cfg.tmin, cfg.tmax
        ))
        .into());
    }
    if cfg.baseline && cfg.tmin > 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "baseline needs tmin <= 0 (got tmin={})",
            cfg.tmin
        ))
        .into());
    }
    if cfg.conditions.is_empty() {
        warn!("condition table is empty; no epochs will be cut");
    }

    let sfreq = state.sfreq;
    let offset = (cfg.tmin * sfreq).round() as i64;
    // Span-based length; rounding each edge differs at half-sample edges.
    let n_times = ((cfg.tmax - cfg.tmin) * sfreq).round() as usize + 1;
    let data = state.projected_data()?;
    let signal = state.signal_indices();
    let threshold = cfg.reject_uv.map(|uv| uv * state.unit.microvolt());

    let mut kept: Vec<(usize, &str)> = Vec::new();
    let mut drop_log = Vec::new();
    for (idx, ann) in state.annotations.iter().enumerate() {
        let Some(condition) = cfg.conditions.get(&ann.label) else {
            debug!(label = %ann.label, "annotation not in condition table");
            continue;
        };
        let start = (ann.onset * sfreq).round() as i64 + offset;
        if start < 0 || start as usize + n_times > state.n_times() {
            drop_log.push(DropLogEntry {
                annotation_index: idx,
                onset: ann.onset,
                label: ann.label.clone(),
                reasons: vec![REASON_NO_DATA.to_string()],
                channels: vec![],
            });
            continue;
        }
        kept.push((idx, condition.as_str()));
    }

    let mut epochs = Array3::<f64>::zeros((kept.len(), state.n_channels(), n_times));
    for (e, &(idx, _)) in kept.iter().enumerate() {
        let onset = state.annotations.as_slice()[idx].onset;
        let start = ((onset * sfreq).round() as i64 + offset) as usize;
        epochs
            .slice_mut(s![e, .., ..])
            .assign(&data.slice(s![.., start..start + n_times]));
    }
    if cfg.baseline {
        if let Some(range) = baseline_range(cfg.tmin, sfreq, n_times) {
            baseline_correct_inplace(&mut epochs, range);
        }
    }

    let mut accept = Vec::with_capacity(kept.len());
    for (e, &(idx, _)) in kept.iter().enumerate() {
        let offending: Vec<String> = match threshold {
            Some(thr) => signal
                .iter()
                .filter(|&&c| {
                    let ptp = peak_to_peak(epochs.slice(s![e, c, ..]));
                    ptp.is_nan() || ptp > thr
                })
                .map(|&c| state.channels[c].name.clone())
                .collect(),
            None => vec![],
        };
        if offending.is_empty() {
            accept.push(e);
        } else {
            let ann = &state.annotations.as_slice()[idx];
            drop_log.push(DropLogEntry {
                annotation_index: idx,
                onset: ann.onset,
                label: ann.label.clone(),
                reasons: vec![REASON_AMPLITUDE.to_string()],
                channels: offending,
            });
        }
    }
    drop_log.sort_by_key(|d| d.annotation_index);

    let set = EpochSet {
        data: epochs.select(Axis(0), &accept),
        conditions: accept.iter().map(|&e| kept[e].1.to_string()).collect(),
        onsets: accept
            .iter()
            .map(|&e| state.annotations.as_slice()[kept[e].0].onset)
            .collect(),
        channels: state.channels.clone(),
        sfreq,
        tmin: cfg.tmin,
        unit: state.unit,
        drop_log,
    };
    info!(
        n_epochs = set.n_epochs(),
        n_dropped = set.drop_log.len(),
        counts = ?set.counts(),
        "epochs segmented"
    );
    Ok(set)
}
