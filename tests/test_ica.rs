mod common;
use common::montage_state;
use eegstage::channels::{Channel, ChannelRole};
use eegstage::config::IcaConfig;
use eegstage::error::PipelineError;
use eegstage::ica::{pearson, remove_artifacts};
use eegstage::interact::ScriptedPrompt;
use eegstage::SignalState;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

const NAMES: [&str; 16] = [
    "Fp1", "Fp2", "F3", "F4", "Fz", "C3", "C4", "Cz", "P3", "P4", "Pz", "O1", "O2", "T7", "T8", "Oz",
];
const SFREQ: f64 = 250.0;
const N: usize = 5000;

/// Blink train: 0.1 s Gaussian bumps every 1.3 s.
fn blinks() -> Vec<f64> {
    (0..N)
        .map(|i| {
            let t = i as f64 / SFREQ;
            let phase = (t % 1.3) - 0.65;
            (-(phase * phase) / (2.0 * 0.05 * 0.05)).exp()
        })
        .collect()
}

/// 16 signal channels mixing one blink source with 15 oscillations, plus a
/// vEOG channel that records the blinks directly.
fn contaminated() -> (SignalState, Vec<f64>) {
    let blink = blinks();
    let mut sources = Array2::<f64>::zeros((NAMES.len(), N));
    for t in 0..N {
        sources[[0, t]] = blink[t];
    }
    for k in 1..NAMES.len() {
        let f = 11.0 + 1.7 * k as f64;
        for t in 0..N {
            sources[[k, t]] = (2.0 * PI * f * t as f64 / SFREQ + k as f64).sin();
        }
    }
    let mut rng = StdRng::seed_from_u64(7);
    let mixing = Array2::from_shape_fn((NAMES.len(), NAMES.len()), |_| rng.gen_range(-1.0..1.0));

    let mut state = montage_state(&NAMES, N, SFREQ);
    state.data = mixing.dot(&sources) * 1e-5;
    let eog = Array1::from_iter(blink.iter().map(|b| b * 1e-4));
    state.add_channel(Channel::new("vEOG", ChannelRole::Ocular), eog).unwrap();
    (state, blink)
}

#[test]
fn ocular_component_is_flagged_and_removed() {
    let (mut state, blink) = contaminated();
    // Channel carrying the most blink.
    let (ch, before) = (0..NAMES.len())
        .map(|c| (c, pearson(&state.data.row(c).to_vec(), &blink).abs()))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap();

    let model = remove_artifacts(&mut state, &IcaConfig::default(), None).unwrap();

    let scores = &model.scores["vEOG"];
    assert_eq!(scores.len(), model.n_components());
    let ocular = (0..scores.len())
        .max_by(|&a, &b| scores[a].abs().total_cmp(&scores[b].abs()))
        .unwrap();
    assert!(scores[ocular].abs() > 0.9, "best ocular score {}", scores[ocular]);
    assert!(model.exclude.contains(&ocular), "exclude {:?}, ocular {ocular}", model.exclude);

    let after = pearson(&state.data.row(ch).to_vec(), &blink).abs();
    assert!(after < before / 5.0, "blink correlation {before:.3} → {after:.3}");
    // Reference channel itself is not cleaned.
    let veog = state.index_of("vEOG").unwrap();
    approx::assert_abs_diff_eq!(state.data[[veog, 100]], blink[100] * 1e-4, epsilon = 1e-18);
}

#[test]
fn explicit_and_prompted_exclusions() {
    let (mut state, _) = contaminated();
    let cfg = IcaConfig {
        ocular_channels: Some(vec![]),
        cardiac_channels: Some(vec![]),
        exclude: vec![2],
        ..IcaConfig::default()
    };
    // Toggle 2 off, 5 on; "99" is out of range and asked again.
    let mut prompt = ScriptedPrompt::new(["2 5", "99", ""]);
    let model = remove_artifacts(&mut state, &cfg, Some(&mut prompt)).unwrap();
    assert_eq!(model.exclude, vec![5]);
    assert!(model.scores.is_empty());
}

#[test]
fn unavailable_method_fails_before_touching_data() {
    let (mut state, _) = contaminated();
    let before = state.data.clone();
    let cfg = IcaConfig { method: "picard".into(), ..IcaConfig::default() };
    let err = remove_artifacts(&mut state, &cfg, None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MethodUnavailable { .. })
    ));
    assert_eq!(state.data, before);
}

#[test]
fn out_of_range_exclusion_is_invalid() {
    let (mut state, _) = contaminated();
    let cfg = IcaConfig { n_components: Some(4), exclude: vec![4], ..IcaConfig::default() };
    let err = remove_artifacts(&mut state, &cfg, None).unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvalidConfig(_))));
}

#[test]
fn component_count_above_channels_is_rejected() {
    let (mut state, _) = contaminated();
    let cfg = IcaConfig { n_components: Some(17), ..IcaConfig::default() };
    let err = remove_artifacts(&mut state, &cfg, None).unwrap_err();
    assert_eq!(
        err.root_cause().downcast_ref::<PipelineError>(),
        Some(&PipelineError::InvalidComponentCount { requested: 17, channels: 16 })
    );
}

#[test]
fn non_finite_signal_channel_is_repaired_first() {
    let (mut state, _) = contaminated();
    let cz = state.index_of("Cz").unwrap();
    state.data[[cz, 10]] = f64::NAN;
    remove_artifacts(&mut state, &IcaConfig { n_components: Some(8), ..IcaConfig::default() }, None).unwrap();
    assert!(state.data.iter().all(|v| v.is_finite()));
}
