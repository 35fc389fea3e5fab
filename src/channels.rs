//! Channel roles, canonical renaming and the channel model builder.
//!
//! Roles come from an ordered rule table evaluated on the upper-cased label;
//! the first matching rule wins, unmatched labels are [`ChannelRole::Signal`]:
//!
//! ```text
//! ocular   contains "EOG" | == "AUX7" | == "AUX8"
//! cardiac  contains "ECG" | == "AUX9"
//! trigger  contains "TRIGGER"
//! ```
//!
//! Roles are assigned on the *recorded* labels, before renaming, so that
//! `AUX7 → vEOG` keeps its ocular role regardless of the new name.
use std::collections::BTreeMap;

use anyhow::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::annotations::Annotations;
use crate::error::PipelineError;
use crate::montage::Montage;
use crate::state::{ReferenceDescriptor, SignalState, SignalUnit};
use crate::stream::{Stream, StreamSamples};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Signal,
    Ocular,
    Cardiac,
    Trigger,
}

impl ChannelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelRole::Signal => "signal",
            ChannelRole::Ocular => "ocular",
            ChannelRole::Cardiac => "cardiac",
            ChannelRole::Trigger => "trigger",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Contains,
    Exact,
}

/// One entry of the role table. `pattern` is compared upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: ChannelRole,
    pub kind: MatchKind,
    pub pattern: String,
}

impl RoleRule {
    pub fn new(role: ChannelRole, kind: MatchKind, pattern: &str) -> Self {
        Self { role, kind, pattern: pattern.to_uppercase() }
    }

    pub fn matches(&self, upper_label: &str) -> bool {
        let pattern = self.pattern.to_uppercase();
        match self.kind {
            MatchKind::Contains => upper_label.contains(&pattern),
            MatchKind::Exact => upper_label == pattern,
        }
    }
}

pub fn default_role_rules() -> Vec<RoleRule> {
    use ChannelRole::*;
    use MatchKind::*;
    vec![
        RoleRule::new(Ocular, Contains, "EOG"),
        RoleRule::new(Ocular, Exact, "AUX7"),
        RoleRule::new(Ocular, Exact, "AUX8"),
        RoleRule::new(Cardiac, Contains, "ECG"),
        RoleRule::new(Cardiac, Exact, "AUX9"),
        RoleRule::new(Trigger, Contains, "TRIGGER"),
    ]
}

/// Canonical names for labels as some amplifiers write them.
pub fn default_renames() -> BTreeMap<String, String> {
    [
        ("FPz", "Fpz"),
        ("OZ", "Oz"),
        ("AUX7", "vEOG"),
        ("AUX8", "hEOG"),
        ("AUX9", "ECG"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn assign_role(label: &str, rules: &[RoleRule]) -> ChannelRole {
    let upper = label.to_uppercase();
    rules
        .iter()
        .find(|r| r.matches(&upper))
        .map(|r| r.role)
        .unwrap_or(ChannelRole::Signal)
}

/// Apply the rename table (keys matched case-insensitively).
///
/// A rename onto a label already present in the roster is an
/// [`PipelineError::InvalidConfig`] error.
pub fn apply_renames(labels: &mut [String], table: &BTreeMap<String, String>) -> Result<()> {
    let lookup: BTreeMap<String, &String> =
        table.iter().map(|(k, v)| (k.to_uppercase(), v)).collect();
    let mut renamed = labels.to_vec();
    for l in renamed.iter_mut() {
        if let Some(new) = lookup.get(&l.to_uppercase()) {
            if l != *new {
                debug!(from = %l, to = %new, "renaming channel");
                *l = (*new).clone();
            }
        }
    }
    let mut seen = std::collections::BTreeSet::new();
    for l in &renamed {
        if !seen.insert(l.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "channel rename produces duplicate label '{l}'"
            ))
            .into());
        }
    }
    labels.clone_from_slice(&renamed);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub role: ChannelRole,
    /// Unit-sphere head position, if the montage knows the label.
    pub pos: Option<[f64; 3]>,
}

impl Channel {
    pub fn new(name: impl Into<String>, role: ChannelRole) -> Self {
        Self { name: name.into(), role, pos: None }
    }
}

/// Options for turning a signal stream into a [`SignalState`].
#[derive(Debug, Clone)]
pub struct ChannelModelOptions {
    pub role_rules: Vec<RoleRule>,
    pub renames: BTreeMap<String, String>,
    /// Layout name, `None` to skip positions.
    pub montage: Option<String>,
    /// Stream values are µV; scale them to volts. When off the state stays in µV.
    pub scale_to_volts: bool,
}

impl Default for ChannelModelOptions {
    fn default() -> Self {
        Self {
            role_rules: default_role_rules(),
            renames: default_renames(),
            montage: Some("standard_1005".to_string()),
            scale_to_volts: true,
        }
    }
}

/// Build the initial signal state from the selected signal stream.
///
/// The state's `first_time` is the stream's first timestamp; annotations are
/// attached separately.
pub fn build_state(stream: &Stream, opts: &ChannelModelOptions) -> Result<SignalState> {
    let StreamSamples::Numeric(samples) = &stream.samples else {
        return Err(PipelineError::InvalidConfig(format!(
            "signal stream '{}' has string samples",
            stream.name
        ))
        .into());
    };
    if stream.nominal_srate <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "signal stream '{}' has no nominal sampling rate",
            stream.name
        ))
        .into());
    }

    // [T, C] → [C, T]
    let mut data: Array2<f64> = samples.t().as_standard_layout().into_owned();
    let unit = if opts.scale_to_volts {
        data.mapv_inplace(|v| v * 1e-6);
        SignalUnit::Volts
    } else {
        SignalUnit::Microvolts
    };

    let roles: Vec<ChannelRole> = stream
        .labels
        .iter()
        .map(|l| assign_role(l, &opts.role_rules))
        .collect();
    let mut names = stream.labels.clone();
    apply_renames(&mut names, &opts.renames)?;

    let mut channels: Vec<Channel> = names
        .into_iter()
        .zip(roles)
        .map(|(n, r)| Channel::new(n, r))
        .collect();

    if let Some(name) = &opts.montage {
        let montage = Montage::standard(name)?;
        attach_positions(&mut channels, &montage);
    }

    let state = SignalState {
        data,
        channels,
        sfreq: stream.nominal_srate,
        unit,
        annotations: Annotations::default(),
        bads: Vec::new(),
        reference: ReferenceDescriptor::Original,
        projectors: Vec::new(),
        highpass: None,
        lowpass: None,
        first_time: stream.timestamps.first().copied().unwrap_or(0.0),
    };
    state.validate()?;

    info!(
        n_chan = state.n_channels(),
        n_times = state.n_times(),
        sfreq = state.sfreq,
        unit = ?state.unit,
        "channel model built"
    );
    Ok(state)
}

/// Attach montage positions to signal-role channels. Returns the labels
/// that had no position.
pub fn attach_positions(channels: &mut [Channel], montage: &Montage) -> Vec<String> {
    let mut missing = Vec::new();
    for ch in channels.iter_mut().filter(|c| c.role == ChannelRole::Signal) {
        ch.pos = montage.get(&ch.name);
        if ch.pos.is_none() {
            missing.push(ch.name.clone());
        }
    }
    if !missing.is_empty() {
        warn!(montage = %montage.name, ?missing, "channels without montage position");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_assign_roles() {
        let rules = default_role_rules();
        assert_eq!(assign_role("Fp1", &rules), ChannelRole::Signal);
        assert_eq!(assign_role("heog", &rules), ChannelRole::Ocular);
        assert_eq!(assign_role("AUX7", &rules), ChannelRole::Ocular);
        assert_eq!(assign_role("aux9", &rules), ChannelRole::Cardiac);
        assert_eq!(assign_role("TRIGGER", &rules), ChannelRole::Trigger);
        // Exact rules do not match substrings.
        assert_eq!(assign_role("AUX70", &rules), ChannelRole::Signal);
    }

    #[test]
    fn first_rule_wins() {
        let rules = default_role_rules();
        // Contains both EOG and ECG: ocular rule comes first.
        assert_eq!(assign_role("EOG_ECG", &rules), ChannelRole::Ocular);
    }

    #[test]
    fn renames_are_case_insensitive_and_collisions_fail() {
        let table = default_renames();
        let mut labels = vec!["fpz".to_string(), "OZ".into(), "AUX7".into(), "Cz".into()];
        apply_renames(&mut labels, &table).unwrap();
        assert_eq!(labels, vec!["Fpz", "Oz", "vEOG", "Cz"]);

        let mut clash = vec!["AUX9".to_string(), "ECG".into()];
        assert!(apply_renames(&mut clash, &table).is_err());
        assert_eq!(clash, vec!["AUX9", "ECG"], "roster untouched on error");
    }

    fn stream(labels: &[&str], n_times: usize) -> Stream {
        // Sample t of channel c holds 10·t + c (µV).
        let samples = Array2::from_shape_fn((n_times, labels.len()), |(t, c)| 10.0 * t as f64 + c as f64);
        Stream {
            id: 1,
            name: "amp".into(),
            stream_type: "EEG".into(),
            nominal_srate: 250.0,
            channel_format: crate::xdf::ChannelFormat::Double64,
            channel_count: labels.len(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            samples: StreamSamples::Numeric(samples),
            timestamps: (0..n_times).map(|t| 42.0 + t as f64 / 250.0).collect(),
        }
    }

    #[test]
    fn build_state_transposes_and_scales() {
        let s = stream(&["Cz", "Pz", "TRIGGER"], 5);
        let state = build_state(&s, &ChannelModelOptions::default()).unwrap();
        assert_eq!(state.data.dim(), (3, 5));
        assert_eq!(state.unit, SignalUnit::Volts);
        assert_eq!(state.first_time, 42.0);
        for c in 0..3 {
            for t in 0..5 {
                approx::assert_relative_eq!(state.data[[c, t]], (10.0 * t as f64 + c as f64) * 1e-6, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn build_state_can_stay_in_microvolts() {
        let s = stream(&["Cz", "Pz"], 7);
        let opts = ChannelModelOptions { scale_to_volts: false, ..ChannelModelOptions::default() };
        let state = build_state(&s, &opts).unwrap();
        assert_eq!(state.unit, SignalUnit::Microvolts);
        assert_eq!(state.data[[1, 6]], 61.0);
    }

    #[test]
    fn positions_only_for_known_signal_channels() {
        let mut opts = ChannelModelOptions::default();
        // Fp1 exists in the montage but is declared ocular here.
        opts.role_rules.insert(0, RoleRule::new(ChannelRole::Ocular, MatchKind::Exact, "FP1"));
        let s = stream(&["Cz", "X9", "Fp1", "AUX7", "TRIGGER"], 4);
        let state = build_state(&s, &opts).unwrap();

        let by_name = |n: &str| &state.channels[state.index_of(n).unwrap()];
        assert!(by_name("Cz").pos.is_some());
        assert_eq!(by_name("X9").role, ChannelRole::Signal);
        assert_eq!(by_name("X9").pos, None);
        assert_eq!(by_name("Fp1").role, ChannelRole::Ocular);
        assert_eq!(by_name("Fp1").pos, None);
        assert_eq!(by_name("vEOG").role, ChannelRole::Ocular);
        assert!(state.channels.iter().filter(|c| c.role != ChannelRole::Signal).all(|c| c.pos.is_none()));
    }
}
