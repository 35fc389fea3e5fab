mod common;
use common::{synthetic_xdf, XdfWriter, SFREQ, T0};
use eegstage::error::PipelineError;
use eegstage::stream::StreamSamples;
use eegstage::xdf::{read_xdf, XdfOptions};
use std::io::Cursor;

const RAW: XdfOptions = XdfOptions { synchronize_clocks: false, dejitter: false };

// ── Decoding ──────────────────────────────────────────────────────────────────

#[test]
fn decodes_streams_in_header_order() {
    let bytes = synthetic_xdf(4.0, &[(1.0, "A"), (2.5, "B")]);
    let rec = read_xdf(Cursor::new(bytes), &XdfOptions::default()).unwrap();

    assert_eq!(rec.version.as_deref(), Some("1.0"));
    assert_eq!(rec.streams.len(), 2);
    let eeg = &rec.streams[0];
    assert_eq!(eeg.stream_type, "EEG");
    assert_eq!(eeg.labels, vec!["Fz", "Cz", "EOG", "TRIGGER"]);
    assert_eq!(eeg.n_samples(), 1000);
    approx::assert_abs_diff_eq!(eeg.timestamps[0], T0, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(eeg.timestamps[999], T0 + 999.0 / SFREQ, epsilon = 1e-9);

    let markers = &rec.streams[1];
    assert_eq!(markers.marker_labels(), vec!["A", "B"]);
    approx::assert_abs_diff_eq!(markers.timestamps[1], T0 + 2.5, epsilon = 1e-12);
}

#[test]
fn samples_split_across_chunks_are_concatenated() {
    let bytes = synthetic_xdf(2.0, &[]);
    let rec = read_xdf(Cursor::new(bytes), &RAW).unwrap();
    let StreamSamples::Numeric(a) = &rec.streams[0].samples else {
        panic!("numeric samples expected");
    };
    assert_eq!(a.dim(), (500, 4));
    // TRIGGER column is all zeros, EOG is a 1.5 Hz sine.
    assert!(a.column(3).iter().all(|&v| v == 0.0));
    assert!(a.column(2).iter().any(|&v| v > 15.0));
}

#[test]
fn omitted_stamps_follow_nominal_rate() {
    let mut w = XdfWriter::new();
    w.stream_header(3, "amp", "EEG", &["Cz"], 100.0, "float32");
    w.numeric_samples(3, &[Some(10.0), None, None], &[vec![1.0], vec![2.0], vec![3.0]], true);
    let rec = read_xdf(Cursor::new(w.bytes()), &RAW).unwrap();
    let ts = &rec.streams[0].timestamps;
    approx::assert_abs_diff_eq!(ts[2], 10.02, epsilon = 1e-12);
    let StreamSamples::Numeric(a) = &rec.streams[0].samples else {
        panic!("numeric samples expected");
    };
    assert_eq!(a[[2, 0]], 3.0);
}

#[test]
fn clock_offsets_shift_stamps() {
    let mut w = XdfWriter::new();
    w.stream_header(1, "amp", "EEG", &["Cz"], 10.0, "double64");
    w.numeric_samples(1, &[Some(1.0), Some(1.1)], &[vec![0.0], vec![0.0]], false);
    w.clock_offset(1, 0.0, 0.5);
    w.clock_offset(1, 5.0, 0.5);
    let synced = read_xdf(
        Cursor::new(w.bytes()),
        &XdfOptions { synchronize_clocks: true, dejitter: false },
    )
    .unwrap();
    approx::assert_abs_diff_eq!(synced.streams[0].timestamps[0], 1.5, epsilon = 1e-12);

    let raw = read_xdf(Cursor::new(w.bytes()), &RAW).unwrap();
    approx::assert_abs_diff_eq!(raw.streams[0].timestamps[0], 1.0, epsilon = 1e-12);
}

#[test]
fn dejitter_regularises_stamps() {
    let mut w = XdfWriter::new();
    w.stream_header(1, "amp", "EEG", &["Cz"], 100.0, "double64");
    let stamps: Vec<Option<f64>> = (0..200)
        .map(|i| Some(i as f64 * 0.01 + if i % 2 == 0 { 0.002 } else { -0.002 }))
        .collect();
    let rows = vec![vec![0.0]; 200];
    w.numeric_samples(1, &stamps, &rows, false);
    let rec = read_xdf(Cursor::new(w.bytes()), &XdfOptions::default()).unwrap();
    let ts = &rec.streams[0].timestamps;
    let steps: Vec<f64> = ts.windows(2).map(|p| p[1] - p[0]).collect();
    let spread = steps.iter().cloned().fold(f64::MIN, f64::max) - steps.iter().cloned().fold(f64::MAX, f64::min);
    assert!(spread < 1e-9, "dejittered steps vary by {spread}");
}

// ── Robustness ────────────────────────────────────────────────────────────────

#[test]
fn truncated_file_keeps_decoded_chunks() {
    let mut bytes = synthetic_xdf(2.0, &[(0.5, "A")]);
    bytes.truncate(bytes.len() - 7);
    let rec = read_xdf(Cursor::new(bytes), &RAW).unwrap();
    // The last chunk (second half of EEG samples) is lost.
    assert_eq!(rec.streams[0].n_samples(), 250);
    assert_eq!(rec.streams[1].n_samples(), 1);
}

#[test]
fn unknown_chunks_are_skipped() {
    let mut w = XdfWriter::new();
    w.unknown_chunk(42, b"vendor blob");
    w.stream_header(1, "mk", "Markers", &["m"], 0.0, "string");
    w.string_samples(1, &[3.0], &["go"]);
    let rec = read_xdf(Cursor::new(w.bytes()), &RAW).unwrap();
    assert_eq!(rec.streams[0].marker_labels(), vec!["go"]);
}

#[test]
fn bad_magic_is_malformed() {
    let err = read_xdf(Cursor::new(b"NOPE....".to_vec()), &RAW).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MalformedContainer(_))
    ));
}

#[test]
fn summaries_describe_streams() {
    let rec = read_xdf(Cursor::new(synthetic_xdf(2.0, &[(0.5, "A")])), &RAW).unwrap();
    let s = rec.summaries();
    assert_eq!(s[0].channel_count, 4);
    assert_eq!(s[0].channel_format, "double64");
    assert_eq!(s[1].stream_type, "Markers");
    approx::assert_abs_diff_eq!(s[0].duration, 499.0 / SFREQ, epsilon = 1e-9);
}

#[test]
fn oversized_chunk_length_is_truncation() {
    let mut w = XdfWriter::new();
    w.stream_header(1, "mk", "Markers", &["m"], 0.0, "string");
    w.string_samples(1, &[3.0], &["go"]);
    let mut bytes = w.bytes();
    // 8-byte length field claiming u64::MAX, a samples tag, then nothing.
    bytes.push(8);
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    bytes.extend_from_slice(&[3, 0]);
    let rec = read_xdf(Cursor::new(bytes), &RAW).unwrap();
    assert_eq!(rec.streams[0].marker_labels(), vec!["go"]);

    let bare = [b"XDF:".as_slice(), &[8], &u64::MAX.to_le_bytes(), &[1, 0]].concat();
    let rec = read_xdf(Cursor::new(bare), &RAW).unwrap();
    assert!(rec.streams.is_empty());
}
