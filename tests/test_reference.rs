mod common;
use common::{max_abs_diff, montage_state};
use eegstage::channels::{Channel, ChannelRole};
use eegstage::conditioning::{rereference, restore_reference};
use eegstage::error::PipelineError;
use eegstage::montage::Montage;
use eegstage::reference::{set_reference, ReferenceMode, ReferenceScheme};
use eegstage::state::ReferenceDescriptor;
use ndarray::{Array1, Axis};

const NAMES: [&str; 5] = ["Fz", "Cz", "Pz", "C3", "C4"];

#[test]
fn destructive_average_zeroes_signal_channel_sum() {
    let mut state = montage_state(&NAMES, 500, 250.0);
    state
        .add_channel(Channel::new("vEOG", ChannelRole::Ocular), Array1::from_elem(500, 3e-5))
        .unwrap();

    set_reference(&mut state, &ReferenceScheme::default(), ReferenceMode::Destructive).unwrap();

    let signal = state.data.select(Axis(0), &state.signal_indices());
    for &s in signal.sum_axis(Axis(0)).iter() {
        approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-18);
    }
    // Non-signal rows are not targets.
    assert!(state.data.row(5).iter().all(|&v| v == 3e-5));
    assert_eq!(
        state.reference,
        ReferenceDescriptor::Average { exclude: vec![], projection: false }
    );
}

#[test]
fn projection_defers_the_subtraction() {
    let mut state = montage_state(&NAMES, 500, 250.0);
    let raw = state.data.clone();
    set_reference(&mut state, &ReferenceScheme::default(), ReferenceMode::Projection).unwrap();

    assert_eq!(state.data, raw);
    assert_eq!(state.projectors.len(), 1);
    let projected = state.projected_data().unwrap();
    for &s in projected.sum_axis(Axis(0)).iter() {
        approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-18);
    }

    // Same result as the destructive path.
    let mut destructive = montage_state(&NAMES, 500, 250.0);
    set_reference(&mut destructive, &ReferenceScheme::default(), ReferenceMode::Destructive).unwrap();
    assert!(max_abs_diff(&projected, &destructive.data) < 1e-20);

    // Re-referencing again replaces the projector instead of stacking it.
    set_reference(&mut state, &ReferenceScheme::default(), ReferenceMode::Projection).unwrap();
    assert_eq!(state.projectors.len(), 1);
}

#[test]
fn bad_channels_do_not_enter_the_average() {
    let mut state = montage_state(&NAMES, 200, 250.0);
    state.mark_bad("Pz").unwrap();
    let raw = state.data.clone();
    set_reference(&mut state, &ReferenceScheme::default(), ReferenceMode::Destructive).unwrap();

    let good = [0usize, 1, 3, 4];
    let mean = raw.select(Axis(0), &good).mean_axis(Axis(0)).unwrap();
    for t in 0..200 {
        approx::assert_abs_diff_eq!(state.data[[2, t]], raw[[2, t]] - mean[t], epsilon = 1e-20);
    }
}

#[test]
fn named_reference_channels() {
    let mut state = montage_state(&NAMES, 100, 250.0);
    let raw = state.data.clone();
    let scheme = ReferenceScheme::Channels { names: vec!["c3".into(), "C4".into()] };
    set_reference(&mut state, &scheme, ReferenceMode::Destructive).unwrap();
    for t in 0..100 {
        let m = (raw[[3, t]] + raw[[4, t]]) / 2.0;
        approx::assert_abs_diff_eq!(state.data[[0, t]], raw[[0, t]] - m, epsilon = 1e-20);
    }
    assert_eq!(
        state.reference,
        ReferenceDescriptor::Channels { names: vec!["C3".into(), "C4".into()], projection: false }
    );

    let missing = ReferenceScheme::Channels { names: vec!["M1".into()] };
    let err = set_reference(&mut state, &missing, ReferenceMode::Destructive).unwrap_err();
    assert_eq!(err.downcast_ref::<PipelineError>(), Some(&PipelineError::UnknownChannel("M1".into())));
}

#[test]
fn restored_reference_is_flat_and_positioned() {
    let mut state = montage_state(&NAMES, 300, 250.0);
    let montage = Montage::standard("standard_1005").unwrap();
    restore_reference(&mut state, "CPz", Some(&montage)).unwrap();

    let i = state.index_of("CPz").unwrap();
    assert_eq!(state.channels[i].role, ChannelRole::Signal);
    assert!(state.channels[i].pos.is_some());
    assert!(state.data.row(i).iter().all(|&v| v == 0.0));

    // Restoring twice is a warning, not a second channel.
    restore_reference(&mut state, "CPz", Some(&montage)).unwrap();
    assert_eq!(state.n_channels(), NAMES.len() + 1);

    // After an average reference the restored channel carries −mean.
    let raw = state.data.clone();
    set_reference(&mut state, &ReferenceScheme::default(), ReferenceMode::Destructive).unwrap();
    let mean = raw.mean_axis(Axis(0)).unwrap();
    for t in 0..300 {
        approx::assert_abs_diff_eq!(state.data[[i, t]], -mean[t], epsilon = 1e-20);
    }
}

#[test]
fn guard_highpass_runs_only_when_needed() {
    let mut unfiltered = montage_state(&NAMES, 2500, 250.0);
    rereference(&mut unfiltered, &ReferenceScheme::default(), ReferenceMode::Projection, Some(0.1)).unwrap();
    assert_eq!(unfiltered.highpass, Some(0.1));

    let mut filtered = montage_state(&NAMES, 2500, 250.0);
    filtered.highpass = Some(1.0);
    let raw = filtered.data.clone();
    rereference(&mut filtered, &ReferenceScheme::default(), ReferenceMode::Projection, Some(0.1)).unwrap();
    assert_eq!(filtered.data, raw);
    assert_eq!(filtered.highpass, Some(1.0));
    assert!(matches!(filtered.reference, ReferenceDescriptor::Average { projection: true, .. }));
}
