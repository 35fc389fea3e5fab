//! Conditioning sub-steps applied between loading and decomposition.
//!
//! ```text
//! load         prune ─► notch ─► band-pass
//! interpolate  mark bads (config ∪ prompt toggles) ─► spline interpolation
//! rereference  restore flat reference ─► guard high-pass ─► re-reference
//! ```
//!
//! Every filter touches signal-role rows only; ocular and cardiac channels
//! keep their raw content for artifact scoring.
use anyhow::Result;
use tracing::{debug, info, warn};

use crate::channels::ChannelRole;
use crate::edit::{run_edit_loop, ToggleSet};
use crate::filter::{apply_fir_rows, design_filter, design_highpass, design_notch};
use crate::interact::Prompt;
use crate::montage::Montage;
use crate::reference::{add_reference_channel, set_reference, ReferenceMode, ReferenceScheme};
use crate::state::SignalState;

/// Remove channels by exact name and by role. Names absent from the roster
/// are ignored. Returns the removed names.
pub fn prune_channels(state: &mut SignalState, names: &[String], roles: &[ChannelRole]) -> Vec<String> {
    let indices: Vec<usize> = state
        .channels
        .iter()
        .enumerate()
        .filter(|(_, c)| names.iter().any(|n| *n == c.name) || roles.contains(&c.role))
        .map(|(i, _)| i)
        .collect();
    let removed: Vec<String> = indices.iter().map(|&i| state.channels[i].name.clone()).collect();
    if !removed.is_empty() {
        state.drop_channels(&indices);
        info!(?removed, remaining = state.n_channels(), "channels pruned");
    }
    removed
}

/// Notch every frequency in `freqs` (and its harmonics when requested).
///
/// Frequencies at or above Nyquist are skipped with a warning.
pub fn apply_notch(state: &mut SignalState, freqs: &[f64], harmonics: bool) -> Result<()> {
    let nyq = state.sfreq / 2.0;
    let mut targets: Vec<f64> = Vec::new();
    for &f in freqs {
        if f >= nyq {
            warn!(freq = f, nyquist = nyq, "notch frequency at or above Nyquist; skipped");
            continue;
        }
        let mut k = 1.0;
        while f * k < nyq {
            targets.push(f * k);
            if !harmonics {
                break;
            }
            k += 1.0;
        }
    }

    let rows = state.signal_indices();
    for f in targets {
        // Harmonics too close to Nyquist for the stop band are left alone.
        let h = match design_notch(f, state.sfreq) {
            Ok(h) => h,
            Err(e) if f > freqs.iter().copied().fold(f64::INFINITY, f64::min) => {
                debug!(freq = f, "harmonic notch skipped: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        apply_fir_rows(&mut state.data, &h, &rows)?;
        info!(freq = f, taps = h.len(), "notch applied");
    }
    Ok(())
}

/// Zero-phase band-pass (or one-sided filter) on signal-role channels.
pub fn apply_bandpass(state: &mut SignalState, l_freq: Option<f64>, h_freq: Option<f64>) -> Result<()> {
    let Some(h) = design_filter(l_freq, h_freq, state.sfreq)? else {
        debug!("no band-pass edges configured");
        return Ok(());
    };
    let rows = state.signal_indices();
    apply_fir_rows(&mut state.data, &h, &rows)?;
    if l_freq.is_some() {
        state.highpass = l_freq;
    }
    if h_freq.is_some() {
        state.lowpass = h_freq;
    }
    info!(?l_freq, ?h_freq, taps = h.len(), n_chan = rows.len(), "band-pass applied");
    Ok(())
}

/// Merge `configured` bad channels with interactive toggles into `state.bads`.
///
/// Configured names must exist in the roster. Prompt answers naming unknown
/// channels are reported and asked again.
pub fn mark_bad_channels(
    state: &mut SignalState,
    configured: &[String],
    prompt: Option<&mut dyn Prompt>,
) -> Result<()> {
    let mut set: ToggleSet<String> = state.bads.iter().cloned().collect();
    for name in configured {
        set.insert(state.canonical_name(name)?);
    }

    if let Some(prompt) = prompt {
        prompt.say(&format!("channels: {}", state.channel_names().join(" ")));
        let roster: &SignalState = state;
        run_edit_loop(
            prompt,
            &mut set,
            "Toggle bad channels (empty line to confirm):",
            |token| roster.canonical_name(token),
        )?;
    }

    state.bads = set.to_vec();
    info!(bads = ?state.bads, "bad channels marked");
    Ok(())
}

/// Add the recording reference back as a flat channel.
pub fn restore_reference(state: &mut SignalState, name: &str, montage: Option<&Montage>) -> Result<()> {
    if state.find_channel(name).is_some() {
        warn!(channel = name, "reference channel already present; not restored");
        return Ok(());
    }
    add_reference_channel(state, name, montage)
}

/// Re-reference after making sure the data is high-passed at `guard_highpass`.
pub fn rereference(
    state: &mut SignalState,
    scheme: &ReferenceScheme,
    mode: ReferenceMode,
    guard_highpass: Option<f64>,
) -> Result<()> {
    if let Some(edge) = guard_highpass {
        if !matches!(state.highpass, Some(hp) if hp >= edge) {
            info!(edge, recorded = ?state.highpass, "high-pass before re-referencing");
            let h = design_highpass(edge, state.sfreq)?;
            let rows = state.signal_indices();
            apply_fir_rows(&mut state.data, &h, &rows)?;
            state.highpass = Some(edge);
        }
    }

    set_reference(state, scheme, mode)?;

    let data = state.projected_data()?;
    let non_finite: Vec<&str> = data
        .outer_iter()
        .zip(&state.channels)
        .filter(|(row, _)| row.iter().any(|v| !v.is_finite()))
        .map(|(_, c)| c.name.as_str())
        .collect();
    if non_finite.is_empty() {
        debug!("all channels finite after re-reference");
    } else {
        warn!(channels = ?non_finite, "non-finite samples after re-reference");
    }
    Ok(())
}
