//! Independent component decomposition for artifact removal.
//!
//! ```text
//! state ─► sanitize non-finite channels (interpolate)
//!       ─► projected signal rows ─► high-pass copy ─► FastICA ─► model
//!       ─► score sources vs ocular / cardiac references ─► flagged set
//!       ─► ∪ configured ∪ prompt toggles ─► exclude
//!       ─► X −= A[:, exclude] · S[exclude, :]
//! ```
//!
//! - [`fastica`]: whitening and the fixed-point iteration.
//! - [`score`]: correlation and outlier detection.
pub mod fastica;
pub mod score;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channels::ChannelRole;
use crate::config::IcaConfig;
use crate::edit::{run_edit_loop, ToggleSet};
use crate::error::PipelineError;
use crate::filter::{apply_fir_zero_phase, design_bandpass, design_highpass, OverlapAdd};
use crate::interact::Prompt;
use crate::interpolate::interpolate_bads;
use crate::state::SignalState;
use crate::stream::parse_index;

pub use fastica::{fit_fastica, whiten, FastIcaFit, FastIcaOptions, Whitening};
pub use score::{find_outliers, pearson};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcaMethod {
    FastIca,
}

impl IcaMethod {
    /// Parse a method name. Known but unbuilt methods are
    /// [`PipelineError::MethodUnavailable`].
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fastica" => Ok(IcaMethod::FastIca),
            m @ ("picard" | "infomax" | "extended-infomax") => Err(PipelineError::MethodUnavailable {
                method: m.to_string(),
                alternative: "fastica".to_string(),
            }
            .into()),
            other => Err(PipelineError::InvalidConfig(format!("unknown ICA method '{other}'")).into()),
        }
    }
}

impl fmt::Display for IcaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcaMethod::FastIca => f.write_str("fastica"),
        }
    }
}

/// A fitted decomposition over named signal channels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionModel {
    pub method: IcaMethod,
    pub channel_names: Vec<String>,
    /// Per-channel mean removed before unmixing, `[C]`.
    pub mean: Array1<f64>,
    /// `[k, C]`
    pub unmixing: Array2<f64>,
    /// `[C, k]`
    pub mixing: Array2<f64>,
    /// Sorted, unique component indices removed by [`DecompositionModel::apply`].
    pub exclude: Vec<usize>,
    /// Reference channel name → one correlation per component.
    pub scores: BTreeMap<String, Vec<f64>>,
    pub n_iter: usize,
    pub converged: bool,
}

impl DecompositionModel {
    pub fn n_components(&self) -> usize {
        self.unmixing.nrows()
    }

    /// Component time courses `U (X − mean)` for `x` (`[C, T]`).
    pub fn sources(&self, x: &Array2<f64>) -> Array2<f64> {
        let xc = x - &self.mean.view().insert_axis(Axis(1));
        self.unmixing.dot(&xc)
    }

    /// Remove the excluded components from `target` using sources computed
    /// on `source_data`. Both are `[C, T]` over `channel_names`.
    pub fn remove_excluded(&self, target: &mut Array2<f64>, source_data: &Array2<f64>) {
        if self.exclude.is_empty() {
            return;
        }
        let s = self.sources(source_data).select(Axis(0), &self.exclude);
        let a = self.mixing.select(Axis(1), &self.exclude);
        *target -= &a.dot(&s);
    }

    /// Apply to the signal channels of `state` in place.
    pub fn apply(&self, state: &mut SignalState) -> Result<()> {
        let rows = self
            .channel_names
            .iter()
            .map(|n| {
                state
                    .index_of(n)
                    .ok_or_else(|| anyhow::Error::from(PipelineError::UnknownChannel(n.clone())))
            })
            .collect::<Result<Vec<usize>>>()?;
        let projected = state.projected_data()?.select(Axis(0), &rows);
        let mut target = state.data.select(Axis(0), &rows);
        self.remove_excluded(&mut target, &projected);
        for (k, &r) in rows.iter().enumerate() {
            state.data.row_mut(r).assign(&target.row(k));
        }
        info!(exclude = ?self.exclude, n_chan = rows.len(), "components removed");
        Ok(())
    }
}

/// Fit a decomposition to `data` (`[C, T]`, rows named by `channel_names`).
pub fn fit_decomposition(
    data: &Array2<f64>,
    channel_names: &[String],
    method: IcaMethod,
    n_components: usize,
    cfg: &IcaConfig,
) -> Result<DecompositionModel> {
    let n_chan = data.nrows();
    if n_components == 0 || n_components > n_chan {
        return Err(PipelineError::InvalidComponentCount { requested: n_components, channels: n_chan }.into());
    }
    let fit = match method {
        IcaMethod::FastIca => fit_fastica(
            data,
            &FastIcaOptions { n_components, max_iter: cfg.max_iter, tol: cfg.tol, seed: cfg.seed },
        )?,
    };
    info!(
        %method,
        n_components = fit.unmixing.nrows(),
        n_iter = fit.n_iter,
        converged = fit.converged,
        "decomposition fitted"
    );
    Ok(DecompositionModel {
        method,
        channel_names: channel_names.to_vec(),
        mean: fit.mean,
        unmixing: fit.unmixing,
        mixing: fit.mixing,
        exclude: Vec::new(),
        scores: BTreeMap::new(),
        n_iter: fit.n_iter,
        converged: fit.converged,
    })
}

/// Interpolate every signal channel that carries a non-finite sample.
pub fn sanitize_non_finite(state: &mut SignalState) -> Result<()> {
    let broken: Vec<String> = state
        .non_finite_channels()
        .into_iter()
        .filter(|n| state.index_of(n).is_some_and(|i| state.channels[i].role == ChannelRole::Signal))
        .collect();
    if broken.is_empty() {
        return Ok(());
    }
    warn!(channels = ?broken, "non-finite samples; interpolating");
    for name in &broken {
        state.mark_bad(name)?;
    }
    interpolate_bads(state)?;
    let left: Vec<String> = state
        .non_finite_channels()
        .into_iter()
        .filter(|n| broken.contains(n))
        .collect();
    if !left.is_empty() {
        return Err(PipelineError::NonFiniteAfterInterpolation(left).into());
    }
    Ok(())
}

fn resolve_references(state: &SignalState, names: &Option<Vec<String>>, role: ChannelRole) -> Result<Vec<usize>> {
    match names {
        Some(list) => list
            .iter()
            .map(|n| {
                state
                    .find_channel(n)
                    .ok_or_else(|| anyhow::Error::from(PipelineError::UnknownChannel(n.clone())))
            })
            .collect(),
        None => Ok(state.role_indices(role)),
    }
}

/// Correlate band-passed sources with each band-passed reference channel
/// and return the flagged component indices.
pub fn score_components(
    model: &mut DecompositionModel,
    state: &SignalState,
    sources: &Array2<f64>,
    cfg: &IcaConfig,
) -> Result<Vec<usize>> {
    let groups = [
        (resolve_references(state, &cfg.ocular_channels, ChannelRole::Ocular)?, cfg.ocular_band),
        (resolve_references(state, &cfg.cardiac_channels, ChannelRole::Cardiac)?, cfg.cardiac_band),
    ];
    let mut flagged = ToggleSet::new();
    for (refs, (lo, hi)) in groups {
        if refs.is_empty() {
            continue;
        }
        let h = design_bandpass(lo, hi, state.sfreq)?;
        let ola = OverlapAdd::new(&h, state.n_times())?;
        let filtered_sources: Vec<Vec<f64>> = sources.outer_iter().map(|s| ola.filter(&s.to_vec())).collect();

        for r in refs {
            let name = &state.channels[r].name;
            let reference = state.data.row(r).to_vec();
            if reference.iter().any(|v| !v.is_finite()) {
                warn!(channel = %name, "reference channel has non-finite samples; not scored");
                continue;
            }
            let reference = ola.filter(&reference);
            let scores: Vec<f64> = filtered_sources.iter().map(|s| pearson(s, &reference)).collect();
            let bad = find_outliers(&scores, cfg.z_threshold, cfg.z_passes);
            info!(reference = %name, band = ?(lo, hi), flagged = ?bad, "components scored");
            for i in bad {
                flagged.insert(i);
            }
            model.scores.insert(name.clone(), scores);
        }
    }
    Ok(flagged.to_vec())
}

/// The artifact-removal stage: fit, score, choose exclusions, apply.
pub fn remove_artifacts(
    state: &mut SignalState,
    cfg: &IcaConfig,
    prompt: Option<&mut dyn Prompt>,
) -> Result<DecompositionModel> {
    let method = IcaMethod::parse(&cfg.method)?;
    sanitize_non_finite(state)?;

    let rows = state.signal_indices();
    let names: Vec<String> = rows.iter().map(|&i| state.channels[i].name.clone()).collect();
    let n_components = cfg.n_components.unwrap_or(rows.len());
    if n_components == 0 || n_components > rows.len() {
        return Err(PipelineError::InvalidComponentCount { requested: n_components, channels: rows.len() }.into());
    }

    let projected = state.projected_data()?.select(Axis(0), &rows);
    let mut fit_data = projected.clone();
    if let Some(edge) = cfg.fit_highpass {
        let h = design_highpass(edge, state.sfreq)?;
        apply_fir_zero_phase(&mut fit_data, &h)?;
    }
    let mut model = fit_decomposition(&fit_data, &names, method, n_components, cfg)
        .context("fitting decomposition")?;

    let sources = model.sources(&projected);
    let flagged = score_components(&mut model, state, &sources, cfg)?;

    let k = model.n_components();
    let mut exclude: ToggleSet<usize> = flagged.into_iter().collect();
    for &i in &cfg.exclude {
        if i >= k {
            return Err(PipelineError::InvalidConfig(format!(
                "excluded component {i} out of range (model has {k})"
            ))
            .into());
        }
        exclude.insert(i);
    }
    if let Some(prompt) = prompt {
        for (name, scores) in &model.scores {
            let line: Vec<String> = scores.iter().enumerate().map(|(i, s)| format!("{i}:{s:+.2}")).collect();
            prompt.say(&format!("{name}: {}", line.join(" ")));
        }
        run_edit_loop(
            prompt,
            &mut exclude,
            &format!("Toggle components to exclude (0..{k}, empty line to confirm):"),
            |token| parse_index(token, k),
        )?;
    }
    model.exclude = exclude.to_vec();
    model.apply(state)?;
    Ok(model)
}
