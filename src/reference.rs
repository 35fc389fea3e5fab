//! Re-referencing of signal-role channels.
//!
//! ```text
//! data[t, :] −= mean(data[reference, :])   for every target row
//! ```
//!
//! * `Average { exclude }`: reference = all signal channels except `exclude`
//!   (and except channels still marked bad).
//! * `Channels { names }`: reference = the named channels, e.g. a restored
//!   hardware reference or the mastoids.
//!
//! Destructive mode overwrites the data; projection mode stores a
//! [`Projector`] that [`SignalState::projected_data`] applies on read.
use anyhow::Result;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channels::{Channel, ChannelRole};
use crate::error::PipelineError;
use crate::montage::Montage;
use crate::state::{Projector, ReferenceDescriptor, SignalState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceScheme {
    Average {
        #[serde(default)]
        exclude: Vec<String>,
    },
    Channels { names: Vec<String> },
}

impl Default for ReferenceScheme {
    fn default() -> Self {
        ReferenceScheme::Average { exclude: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    Destructive,
    /// Deferred: stored as a projector and applied on read.
    #[default]
    Projection,
}

/// Subtract the mean of the `reference` rows from every `targets` row.
pub fn subtract_reference(data: &mut Array2<f64>, targets: &[usize], reference: &[usize]) {
    if targets.is_empty() || reference.is_empty() {
        return;
    }
    let mean = data
        .select(Axis(0), reference)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()));
    for &t in targets {
        let mut row = data.row_mut(t);
        row -= &mean;
    }
}

/// Per-timepoint mean over all rows removed from every row.
pub fn average_reference_inplace(data: &mut Array2<f64>) {
    let all: Vec<usize> = (0..data.nrows()).collect();
    subtract_reference(data, &all, &all);
}

/// Append a flat (all-zero) signal channel, e.g. the recording reference
/// that the amplifier did not store.
pub fn add_reference_channel(state: &mut SignalState, name: &str, montage: Option<&Montage>) -> Result<()> {
    let mut ch = Channel::new(name, ChannelRole::Signal);
    ch.pos = montage.and_then(|m| m.get(name));
    let zeros = Array1::zeros(state.n_times());
    state.add_channel(ch, zeros)?;
    info!(channel = name, has_position = state.channels.last().is_some_and(|c| c.pos.is_some()), "reference channel restored");
    Ok(())
}

fn resolve_reference(state: &SignalState, scheme: &ReferenceScheme) -> Result<(Vec<usize>, ReferenceDescriptor)> {
    let signal = state.signal_indices();
    match scheme {
        ReferenceScheme::Average { exclude } => {
            let exclude = exclude
                .iter()
                .map(|n| state.canonical_name(n))
                .collect::<Result<Vec<_>>>()?;
            let reference: Vec<usize> = signal
                .iter()
                .copied()
                .filter(|&i| {
                    let name = &state.channels[i].name;
                    !exclude.contains(name) && !state.is_bad(name)
                })
                .collect();
            Ok((reference, ReferenceDescriptor::Average { exclude, projection: false }))
        }
        ReferenceScheme::Channels { names } => {
            let mut reference = Vec::with_capacity(names.len());
            let mut canonical = Vec::with_capacity(names.len());
            for n in names {
                let i = state
                    .find_channel(n)
                    .ok_or_else(|| PipelineError::UnknownChannel(n.clone()))?;
                reference.push(i);
                canonical.push(state.channels[i].name.clone());
            }
            Ok((reference, ReferenceDescriptor::Channels { names: canonical, projection: false }))
        }
    }
}

/// Re-reference the signal-role channels of `state`.
pub fn set_reference(state: &mut SignalState, scheme: &ReferenceScheme, mode: ReferenceMode) -> Result<()> {
    let targets = state.signal_indices();
    let (reference, mut descriptor) = resolve_reference(state, scheme)?;
    if reference.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "reference channel set is empty".to_string(),
        )
        .into());
    }

    let projection = mode == ReferenceMode::Projection;
    match &mut descriptor {
        ReferenceDescriptor::Average { projection: p, .. }
        | ReferenceDescriptor::Channels { projection: p, .. } => *p = projection,
        ReferenceDescriptor::Original => {}
    }

    if projection {
        let name = |i: &usize| state.channels[*i].name.clone();
        let proj = Projector {
            description: reference_description(&descriptor),
            active: true,
            targets: targets.iter().map(name).collect(),
            reference: reference.iter().map(name).collect(),
        };
        state.projectors.retain(|p| !p.description.starts_with("reference"));
        state.projectors.push(proj);
    } else {
        subtract_reference(&mut state.data, &targets, &reference);
    }

    info!(
        reference = %reference_description(&descriptor),
        n_reference = reference.len(),
        n_targets = targets.len(),
        ?mode,
        "re-referenced"
    );
    state.reference = descriptor;
    Ok(())
}

fn reference_description(d: &ReferenceDescriptor) -> String {
    match d {
        ReferenceDescriptor::Original => "reference: original".into(),
        ReferenceDescriptor::Average { exclude, .. } if exclude.is_empty() => "reference: average".into(),
        ReferenceDescriptor::Average { exclude, .. } => format!("reference: average without {}", exclude.join(",")),
        ReferenceDescriptor::Channels { names, .. } => format!("reference: {}", names.join(",")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn channel_sum_is_zero_after_average_reference() {
        let mut data = Array2::from_shape_fn((8, 512), |(c, t)| ((c * 7 + t * 3) as f64).sin());
        average_reference_inplace(&mut data);
        for &s in data.sum_axis(Axis(0)).iter() {
            approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn reference_preserves_channel_differences() {
        let mut data = Array2::from_shape_fn((2, 10), |(c, _)| if c == 0 { 2.0 } else { 4.0 });
        average_reference_inplace(&mut data);
        for t in 0..10 {
            approx::assert_abs_diff_eq!(data[[0, t]] - data[[1, t]], -2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn subset_reference_leaves_other_rows() {
        let mut data = Array2::from_shape_fn((3, 4), |(c, _)| c as f64 + 1.0);
        subtract_reference(&mut data, &[0, 1], &[1]);
        assert!(data.row(0).iter().all(|&v| v == -1.0));
        assert!(data.row(1).iter().all(|&v| v == 0.0));
        assert!(data.row(2).iter().all(|&v| v == 3.0));
    }
}
