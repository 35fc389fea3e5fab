//! The continuous signal state handed from stage to stage.
//!
//! ```text
//! SignalState
//!   data         [C, T] f64, channel-major
//!   channels     C × (name, role, position)
//!   sfreq, unit, first_time
//!   annotations  onsets relative to sample 0
//!   bads         channel names awaiting interpolation
//!   reference    how the data is currently referenced
//!   projectors   deferred linear operators applied by projected_data()
//!   highpass / lowpass   filter history
//! ```
use anyhow::Result;
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::annotations::Annotations;
use crate::channels::{Channel, ChannelRole};
use crate::error::PipelineError;
use crate::reference::subtract_reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalUnit {
    Volts,
    Microvolts,
}

impl SignalUnit {
    /// Value of one microvolt in this unit.
    pub fn microvolt(self) -> f64 {
        match self {
            SignalUnit::Volts => 1e-6,
            SignalUnit::Microvolts => 1.0,
        }
    }
}

/// Current reference of the signal-role channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceDescriptor {
    /// As recorded (hardware reference).
    Original,
    Average { exclude: Vec<String>, projection: bool },
    Channels { names: Vec<String>, projection: bool },
}

/// Deferred re-reference: `target -= mean(reference)` for every target.
///
/// Stored by channel name so it survives roster edits that keep those
/// channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projector {
    pub description: String,
    pub active: bool,
    pub targets: Vec<String>,
    pub reference: Vec<String>,
}

impl Projector {
    /// Apply to `data` whose rows are named by `names`.
    pub fn apply(&self, data: &mut Array2<f64>, names: &[&str]) -> Result<()> {
        let resolve = |list: &[String]| -> Result<Vec<usize>> {
            list.iter()
                .map(|n| {
                    names
                        .iter()
                        .position(|m| *m == n.as_str())
                        .ok_or_else(|| anyhow::Error::from(PipelineError::UnknownChannel(n.clone())))
                })
                .collect()
        };
        let targets = resolve(&self.targets)?;
        let reference = resolve(&self.reference)?;
        subtract_reference(data, &targets, &reference);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalState {
    pub data: Array2<f64>,
    pub channels: Vec<Channel>,
    pub sfreq: f64,
    pub unit: SignalUnit,
    pub annotations: Annotations,
    pub bads: Vec<String>,
    pub reference: ReferenceDescriptor,
    pub projectors: Vec<Projector>,
    pub highpass: Option<f64>,
    pub lowpass: Option<f64>,
    /// Absolute stream time of sample 0, seconds.
    pub first_time: f64,
}

impl SignalState {
    #[inline]
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    pub fn duration_secs(&self) -> f64 {
        self.n_times() as f64 / self.sfreq
    }

    /// Structural consistency of the state.
    pub fn validate(&self) -> Result<()> {
        if self.data.nrows() != self.channels.len() {
            return Err(PipelineError::MalformedContainer(format!(
                "{} data rows for {} channels",
                self.data.nrows(),
                self.channels.len()
            ))
            .into());
        }
        if self.sfreq.is_nan() || self.sfreq <= 0.0 {
            return Err(PipelineError::MalformedContainer(format!("sfreq {}", self.sfreq)).into());
        }
        for b in &self.bads {
            if self.index_of(b).is_none() {
                return Err(PipelineError::UnknownChannel(b.clone()).into());
            }
        }
        Ok(())
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Exact-name lookup.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    /// Case-insensitive lookup; exact matches take precedence.
    pub fn find_channel(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.index_of(name).or_else(|| {
            self.channels
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
        })
    }

    /// Roster spelling of `name`, or [`PipelineError::UnknownChannel`].
    pub fn canonical_name(&self, name: &str) -> Result<String> {
        self.find_channel(name)
            .map(|i| self.channels[i].name.clone())
            .ok_or_else(|| PipelineError::UnknownChannel(name.trim().to_string()).into())
    }

    pub fn role_indices(&self, role: ChannelRole) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.role == role)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn signal_indices(&self) -> Vec<usize> {
        self.role_indices(ChannelRole::Signal)
    }

    pub fn is_bad(&self, name: &str) -> bool {
        self.bads.iter().any(|b| b == name)
    }

    /// Mark `name` bad (canonicalised, no duplicates).
    pub fn mark_bad(&mut self, name: &str) -> Result<()> {
        let name = self.canonical_name(name)?;
        if !self.is_bad(&name) {
            self.bads.push(name);
        }
        Ok(())
    }

    /// Remove the channels at `indices` (any order, duplicates ignored).
    pub fn drop_channels(&mut self, indices: &[usize]) {
        let mut keep = vec![true; self.n_channels()];
        for &i in indices {
            if i < keep.len() {
                keep[i] = false;
            }
        }
        let kept: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        let dropped: Vec<String> = (0..keep.len())
            .filter(|&i| !keep[i])
            .map(|i| self.channels[i].name.clone())
            .collect();
        self.data = self.data.select(Axis(0), &kept);
        self.channels = kept.iter().map(|&i| self.channels[i].clone()).collect();
        self.bads.retain(|b| !dropped.contains(b));
    }

    /// Append a channel with the given samples.
    pub fn add_channel(&mut self, channel: Channel, samples: Array1<f64>) -> Result<()> {
        if samples.len() != self.n_times() {
            return Err(PipelineError::MalformedContainer(format!(
                "channel '{}' has {} samples, state has {}",
                channel.name,
                samples.len(),
                self.n_times()
            ))
            .into());
        }
        if self.index_of(&channel.name).is_some() {
            return Err(PipelineError::InvalidConfig(format!(
                "channel '{}' already exists",
                channel.name
            ))
            .into());
        }
        self.data.push_row(samples.view())?;
        self.channels.push(channel);
        Ok(())
    }

    /// Data with all active projectors applied.
    pub fn projected_data(&self) -> Result<Array2<f64>> {
        let mut out = self.data.clone();
        let names = self.channel_names();
        for p in self.projectors.iter().filter(|p| p.active) {
            p.apply(&mut out, &names)?;
        }
        Ok(out)
    }

    /// Names of channels with at least one non-finite sample.
    pub fn non_finite_channels(&self) -> Vec<String> {
        self.data
            .outer_iter()
            .zip(&self.channels)
            .filter(|(row, _)| row.iter().any(|v| !v.is_finite()))
            .map(|(_, c)| c.name.clone())
            .collect()
    }

    /// Keep `[tmin, tmax]` seconds (clipped to the data).
    pub fn crop(&mut self, tmin: f64, tmax: Option<f64>) -> Result<()> {
        let last = self.n_times().saturating_sub(1);
        let start = (tmin * self.sfreq).round().max(0.0) as usize;
        let stop = match tmax {
            Some(t) => ((t * self.sfreq).round().max(0.0) as usize).min(last),
            None => last,
        };
        if start > stop {
            return Err(PipelineError::InvalidConfig(format!(
                "crop window [{tmin}, {tmax:?}] s is empty"
            ))
            .into());
        }
        self.data = self.data.slice(s![.., start..=stop]).to_owned();
        let t0 = start as f64 / self.sfreq;
        let t1 = stop as f64 / self.sfreq;
        self.annotations.crop(t0, t1);
        self.first_time += t0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::Annotation;

    fn state() -> SignalState {
        SignalState {
            data: Array2::from_shape_fn((3, 100), |(c, t)| c as f64 + t as f64 * 0.01),
            channels: vec![
                Channel::new("Fp1", ChannelRole::Signal),
                Channel::new("Cz", ChannelRole::Signal),
                Channel::new("vEOG", ChannelRole::Ocular),
            ],
            sfreq: 100.0,
            unit: SignalUnit::Volts,
            annotations: Annotations::new(vec![
                Annotation { onset: 0.2, duration: 0.0, label: "A".into() },
                Annotation { onset: 0.7, duration: 0.0, label: "B".into() },
            ]),
            bads: vec![],
            reference: ReferenceDescriptor::Original,
            projectors: vec![],
            highpass: None,
            lowpass: None,
            first_time: 12.0,
        }
    }

    #[test]
    fn lookup_is_case_insensitive_but_prefers_exact() {
        let s = state();
        assert_eq!(s.find_channel("cz"), Some(1));
        assert_eq!(s.canonical_name(" veog ").unwrap(), "vEOG");
        let err = s.canonical_name("O2").unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::UnknownChannel("O2".into()))
        );
    }

    #[test]
    fn drop_removes_rows_and_bads() {
        let mut s = state();
        s.mark_bad("fp1").unwrap();
        s.drop_channels(&[0]);
        assert_eq!(s.channel_names(), vec!["Cz", "vEOG"]);
        assert_eq!(s.data.nrows(), 2);
        assert!(s.bads.is_empty());
        approx::assert_abs_diff_eq!(s.data[[0, 0]], 1.0);
    }

    #[test]
    fn projector_applies_only_when_active() {
        let mut s = state();
        s.projectors.push(Projector {
            description: "ref".into(),
            active: false,
            targets: vec!["Fp1".into(), "Cz".into()],
            reference: vec!["Cz".into()],
        });
        assert_eq!(s.projected_data().unwrap(), s.data);
        s.projectors[0].active = true;
        let p = s.projected_data().unwrap();
        assert!(p.row(1).iter().all(|&v| v == 0.0));
        approx::assert_abs_diff_eq!(p[[0, 5]], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn crop_shifts_time_and_annotations() {
        let mut s = state();
        s.crop(0.5, Some(0.9)).unwrap();
        assert_eq!(s.n_times(), 41);
        approx::assert_abs_diff_eq!(s.first_time, 12.5, epsilon = 1e-12);
        assert_eq!(s.annotations.len(), 1);
        approx::assert_abs_diff_eq!(s.annotations.as_slice()[0].onset, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_scan() {
        let mut s = state();
        s.data[[1, 10]] = f64::NAN;
        assert_eq!(s.non_finite_channels(), vec!["Cz"]);
    }
}
