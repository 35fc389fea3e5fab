mod common;
use common::montage_state;
use eegstage::channels::{Channel, ChannelRole};
use eegstage::conditioning::mark_bad_channels;
use eegstage::error::PipelineError;
use eegstage::interact::ScriptedPrompt;
use eegstage::interpolate::interpolate_bads;
use ndarray::{Array1, Array2};

const NAMES: [&str; 8] = ["Fz", "Cz", "Pz", "C3", "C4", "F3", "F4", "Oz"];

/// Every channel carries the same waveform, so any weights summing to one
/// reproduce it exactly.
fn uniform_state() -> eegstage::SignalState {
    let mut state = montage_state(&NAMES, 400, 250.0);
    let wave: Vec<f64> = (0..400).map(|t| 2e-5 * (t as f64 * 0.07).sin()).collect();
    state.data = Array2::from_shape_fn((NAMES.len(), 400), |(_, t)| wave[t]);
    state
}

#[test]
fn bad_channel_is_rebuilt_from_neighbours() {
    let mut state = uniform_state();
    let truth = state.data.row(1).to_owned();
    state.data.row_mut(1).fill(1e-3);
    state.mark_bad("Cz").unwrap();
    let others = state.data.row(4).to_owned();

    interpolate_bads(&mut state).unwrap();

    assert!(state.bads.is_empty());
    for t in 0..400 {
        approx::assert_abs_diff_eq!(state.data[[1, t]], truth[t], epsilon = 1e-9);
    }
    assert_eq!(state.data.row(4), others);
}

#[test]
fn no_bads_is_a_no_op() {
    let mut state = uniform_state();
    let before = state.data.clone();
    interpolate_bads(&mut state).unwrap();
    assert_eq!(state.data, before);
}

#[test]
fn non_signal_bads_are_unmarked() {
    let mut state = uniform_state();
    state
        .add_channel(Channel::new("vEOG", ChannelRole::Ocular), Array1::zeros(400))
        .unwrap();
    state.mark_bad("vEOG").unwrap();
    interpolate_bads(&mut state).unwrap();
    assert!(state.bads.is_empty());
    assert!(state.data.row(NAMES.len()).iter().all(|&v| v == 0.0));
}

#[test]
fn bad_without_position_fails() {
    let mut state = uniform_state();
    state
        .add_channel(Channel::new("X1", ChannelRole::Signal), Array1::zeros(400))
        .unwrap();
    state.mark_bad("X1").unwrap();
    let err = interpolate_bads(&mut state).unwrap_err();
    assert_eq!(err.downcast_ref::<PipelineError>(), Some(&PipelineError::MissingPosition("X1".into())));
}

#[test]
fn all_bad_has_no_neighbours() {
    let mut state = montage_state(&["Fz", "Cz"], 100, 250.0);
    state.mark_bad("Fz").unwrap();
    state.mark_bad("Cz").unwrap();
    let err = interpolate_bads(&mut state).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::NoGoodNeighbours { .. })
    ));
}

// ── Marking ───────────────────────────────────────────────────────────────────

#[test]
fn configured_and_prompted_bads_merge() {
    let mut state = uniform_state();
    // "XYZ" is unknown: reported and asked again. "Oz" is toggled twice.
    let mut prompt = ScriptedPrompt::new(["Pz Oz", "XYZ", "oz", ""]);
    mark_bad_channels(&mut state, &["cz".to_string()], Some(&mut prompt)).unwrap();
    assert_eq!(state.bads, vec!["Cz".to_string(), "Pz".to_string()]);
    assert_eq!(prompt.remaining(), 0);
}

#[test]
fn configured_unknown_bad_is_fatal() {
    let mut state = uniform_state();
    let err = mark_bad_channels(&mut state, &["T7".to_string()], None).unwrap_err();
    assert_eq!(err.downcast_ref::<PipelineError>(), Some(&PipelineError::UnknownChannel("T7".into())));
}

#[test]
fn closed_prompt_aborts_marking() {
    let mut state = uniform_state();
    let mut prompt = ScriptedPrompt::new(["Pz"]);
    let err = mark_bad_channels(&mut state, &[], Some(&mut prompt)).unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::PromptClosed(_))));
}
