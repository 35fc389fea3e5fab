mod common;
use common::{annotations, montage_state};
use eegstage::config::{EpochConfig, SpectralConfig, TfrConfig};
use eegstage::epoch::{segment, EpochSet};
use eegstage::error::PipelineError;
use eegstage::spectral::{band_power_table, compute_psd};
use eegstage::tfr::compute_tfr;
use ndarray::s;
use std::f64::consts::PI;

const SFREQ: f64 = 250.0;

/// Fz: 10 Hz throughout. Cz: 20 Hz, plus a 10 Hz burst after each "B" event.
fn epochs() -> EpochSet {
    let n = 10_000;
    let mut state = montage_state(&["Fz", "Cz"], n, SFREQ);
    let events = [(5.0, "A"), (12.0, "B"), (19.0, "A"), (26.0, "B"), (33.0, "B")];
    for t in 0..n {
        let ts = t as f64 / SFREQ;
        state.data[[0, t]] = 1e-5 * (2.0 * PI * 10.0 * ts).sin();
        let burst = events
            .iter()
            .any(|&(on, label)| label == "B" && ts >= on && ts < on + 1.0);
        state.data[[1, t]] = 2e-6 * (2.0 * PI * 20.0 * ts).sin()
            + if burst { 2e-5 * (2.0 * PI * 10.0 * ts).sin() } else { 0.0 };
    }
    state.annotations = annotations(&events);
    let cfg = EpochConfig {
        conditions: [("A", "rest"), ("B", "task")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        tmin: -1.0,
        tmax: 2.0,
        baseline: true,
        reject_uv: None,
    };
    segment(&state, &cfg).unwrap()
}

// ── Band power ────────────────────────────────────────────────────────────────

#[test]
fn alpha_dominates_a_10hz_channel() {
    let set = epochs();
    let table = band_power_table(&set, &SpectralConfig::default()).unwrap();

    assert_eq!(table.channels, vec!["Fz", "Cz"]);
    // n_fft 2048 is longer than the 751-sample epochs and gets capped.
    assert_eq!(table.n_fft, 751);
    assert_eq!(table.rows.len(), 5 * 2 * 4);

    let fz_rest = |band: &str| {
        table
            .means
            .iter()
            .find(|m| m.condition == "rest" && m.channel == "Fz" && m.band == band)
            .map(|m| m.value)
            .unwrap()
    };
    assert!(fz_rest("Alpha") > 10.0 * fz_rest("Theta"));
    assert!(fz_rest("Alpha") > 10.0 * fz_rest("Beta"));
    assert!(table.means.iter().all(|m| m.value.is_finite()));
}

#[test]
fn condition_means_average_their_epochs() {
    let set = epochs();
    let table = band_power_table(&set, &SpectralConfig::default()).unwrap();
    let task: Vec<f64> = table
        .rows
        .iter()
        .filter(|r| r.condition == "task" && r.channel == "Cz" && r.band == "Alpha")
        .map(|r| r.value)
        .collect();
    assert_eq!(task.len(), 3);
    let mean = table
        .means
        .iter()
        .find(|m| m.condition == "task" && m.channel == "Cz" && m.band == "Alpha")
        .unwrap();
    assert_eq!(mean.n_epochs, 3);
    approx::assert_relative_eq!(mean.value, task.iter().sum::<f64>() / 3.0, max_relative = 1e-12);
}

#[test]
fn relative_power_is_a_fraction() {
    let set = epochs();
    let table = band_power_table(&set, &SpectralConfig::default()).unwrap();
    assert!(table.relative);
    for row in &table.rows {
        assert!((0.0..=1.0).contains(&row.value), "{row:?}");
    }
    let absolute = band_power_table(&set, &SpectralConfig { relative: false, ..SpectralConfig::default() }).unwrap();
    assert!(absolute.rows.iter().zip(&table.rows).any(|(a, r)| a.value != r.value));
}

#[test]
fn psd_is_restricted_to_the_requested_range() {
    let set = epochs();
    let spectra = compute_psd(&set, &SpectralConfig { fmin: 5.0, fmax: 30.0, ..SpectralConfig::default() }).unwrap();
    assert!(spectra.freqs.first().unwrap() >= &5.0);
    assert!(spectra.freqs.last().unwrap() <= &30.0);
    assert_eq!(spectra.psd.dim(), (5, 2, spectra.freqs.len()));

    let empty = SpectralConfig { fmin: 30.0, fmax: 5.0, ..SpectralConfig::default() };
    let err = compute_psd(&set, &empty).unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvalidConfig(_))));
}

// ── Time-frequency ────────────────────────────────────────────────────────────

#[test]
fn tfr_is_grouped_by_condition() {
    let set = epochs();
    let tfr = compute_tfr(&set, &TfrConfig::default()).unwrap();
    let names: Vec<&str> = tfr.iter().map(|c| c.condition.as_str()).collect();
    assert_eq!(names, vec!["rest", "task"]);
    assert_eq!(tfr[0].n_epochs, 2);
    assert_eq!(tfr[1].n_epochs, 3);
    assert_eq!(tfr[1].power.dim(), (2, 30, 751));
    assert_eq!(tfr[1].baseline.as_deref(), Some("logratio"));
    approx::assert_abs_diff_eq!(tfr[1].times[250], 0.0, epsilon = 1e-12);
}

#[test]
fn burst_shows_as_post_event_increase() {
    let set = epochs();
    let tfr = compute_tfr(&set, &TfrConfig::default()).unwrap();
    let task = &tfr[1];
    let f10 = task
        .freqs
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - 10.0).abs().total_cmp(&(b.1 - 10.0).abs()))
        .map(|(i, _)| i)
        .unwrap();
    // Cz row, 0.5 s after the event.
    let cz_post = task.power[[1, f10, 375]];
    assert!(cz_post > 1.0, "log10 ratio {cz_post}");
    // Fz has steady 10 Hz: no change relative to baseline.
    approx::assert_abs_diff_eq!(task.power[[0, f10, 375]], 0.0, epsilon = 0.1);
    assert!(task.power.slice(s![.., .., 300..450]).iter().all(|v| v.is_finite()));
}

#[test]
fn wavelet_longer_than_epoch_is_rejected() {
    let set = epochs();
    // 10 cycles at 1 Hz: the wavelet spans ~16 s.
    let cfg = TfrConfig { fmin: 1.0, fmax: 40.0, cycles_divisor: 0.1, ..TfrConfig::default() };
    let err = compute_tfr(&set, &cfg).unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvalidConfig(_))));
}
