/// Shared helpers: a minimal XDF writer and synthetic recordings / states.
use eegstage::annotations::{Annotation, Annotations};
use eegstage::channels::{Channel, ChannelRole};
use eegstage::montage::Montage;
use eegstage::state::{ReferenceDescriptor, SignalState, SignalUnit};
use eegstage::xdf::{encode_chunk, encode_varlen, ChunkTag, MAGIC};
use ndarray::Array2;
use std::f64::consts::PI;

/// Builds an XDF byte stream chunk by chunk.
pub struct XdfWriter {
    buf: Vec<u8>,
}

#[allow(unused)]
impl XdfWriter {
    pub fn new() -> Self {
        let mut buf = MAGIC.to_vec();
        encode_chunk(
            ChunkTag::FileHeader,
            b"<?xml version=\"1.0\"?><info><version>1.0</version></info>",
            &mut buf,
        );
        Self { buf }
    }

    pub fn stream_header(
        &mut self,
        id: u32,
        name: &str,
        stream_type: &str,
        labels: &[&str],
        srate: f64,
        format: &str,
    ) -> &mut Self {
        let channels: String = labels
            .iter()
            .map(|l| format!("<channel><label>{l}</label><unit>microvolts</unit></channel>"))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><info><name>{name}</name><type>{stream_type}</type>\
             <channel_count>{}</channel_count><nominal_srate>{srate}</nominal_srate>\
             <channel_format>{format}</channel_format><desc><channels>{channels}</channels></desc></info>",
            labels.len().max(1)
        );
        let mut content = id.to_le_bytes().to_vec();
        content.extend_from_slice(xml.as_bytes());
        encode_chunk(ChunkTag::StreamHeader, &content, &mut self.buf);
        self
    }

    /// `rows[i]` is one sample across channels. `f32` selects float32 values.
    pub fn numeric_samples(&mut self, id: u32, stamps: &[Option<f64>], rows: &[Vec<f64>], f32: bool) -> &mut Self {
        let mut content = id.to_le_bytes().to_vec();
        encode_varlen(rows.len() as u64, &mut content);
        for (ts, row) in stamps.iter().zip(rows) {
            push_stamp(&mut content, *ts);
            for &v in row {
                if f32 {
                    content.extend_from_slice(&(v as f32).to_le_bytes());
                } else {
                    content.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        encode_chunk(ChunkTag::Samples, &content, &mut self.buf);
        self
    }

    pub fn string_samples(&mut self, id: u32, stamps: &[f64], labels: &[&str]) -> &mut Self {
        let mut content = id.to_le_bytes().to_vec();
        encode_varlen(labels.len() as u64, &mut content);
        for (ts, l) in stamps.iter().zip(labels) {
            push_stamp(&mut content, Some(*ts));
            encode_varlen(l.len() as u64, &mut content);
            content.extend_from_slice(l.as_bytes());
        }
        encode_chunk(ChunkTag::Samples, &content, &mut self.buf);
        self
    }

    pub fn clock_offset(&mut self, id: u32, collection_time: f64, offset: f64) -> &mut Self {
        let mut content = id.to_le_bytes().to_vec();
        content.extend_from_slice(&collection_time.to_le_bytes());
        content.extend_from_slice(&offset.to_le_bytes());
        encode_chunk(ChunkTag::ClockOffset, &content, &mut self.buf);
        self
    }

    /// A chunk with a tag the reader does not know.
    pub fn unknown_chunk(&mut self, tag: u16, content: &[u8]) -> &mut Self {
        encode_varlen(content.len() as u64 + 2, &mut self.buf);
        self.buf.extend_from_slice(&tag.to_le_bytes());
        self.buf.extend_from_slice(content);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

fn push_stamp(out: &mut Vec<u8>, ts: Option<f64>) {
    match ts {
        Some(t) => {
            out.push(8);
            out.extend_from_slice(&t.to_le_bytes());
        }
        None => out.push(0),
    }
}

pub const SFREQ: f64 = 250.0;
pub const T0: f64 = 100.0;

/// 4-channel EEG stream (Fz, Cz, EOG, TRIGGER) at 250 Hz for `secs` seconds
/// in µV, plus a marker stream with `markers` as `(seconds after T0, label)`.
#[allow(unused)]
pub fn synthetic_xdf(secs: f64, markers: &[(f64, &str)]) -> Vec<u8> {
    let n = (secs * SFREQ) as usize;
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let t = i as f64 / SFREQ;
            vec![
                10.0 * (2.0 * PI * 10.0 * t).sin() + 5.0 * (2.0 * PI * 6.0 * t).sin(),
                8.0 * (2.0 * PI * 10.0 * t + 0.3).sin() + 3.0 * (2.0 * PI * 20.0 * t).sin(),
                20.0 * (2.0 * PI * 1.5 * t).sin(),
                0.0,
            ]
        })
        .collect();
    let stamps: Vec<Option<f64>> = (0..n).map(|i| Some(T0 + i as f64 / SFREQ)).collect();

    let mut w = XdfWriter::new();
    w.stream_header(1, "ActiChamp-0", "EEG", &["Fz", "Cz", "EOG", "TRIGGER"], SFREQ, "double64");
    w.stream_header(2, "PsychoPy", "Markers", &["marker"], 0.0, "string");
    let half = n / 2;
    w.numeric_samples(1, &stamps[..half], &rows[..half], false);
    let ts: Vec<f64> = markers.iter().map(|(t, _)| T0 + t).collect();
    let labels: Vec<&str> = markers.iter().map(|(_, l)| *l).collect();
    w.string_samples(2, &ts, &labels);
    w.numeric_samples(1, &stamps[half..], &rows[half..], false);
    w.bytes()
}

/// Signal-only state in volts with 1005 positions on every named channel.
#[allow(unused)]
pub fn montage_state(names: &[&str], n_times: usize, sfreq: f64) -> SignalState {
    let montage = Montage::standard("standard_1005").unwrap();
    let channels: Vec<Channel> = names
        .iter()
        .map(|n| {
            let mut c = Channel::new(*n, ChannelRole::Signal);
            c.pos = montage.get(n);
            c
        })
        .collect();
    let data = Array2::from_shape_fn((names.len(), n_times), |(c, t)| {
        let t = t as f64 / sfreq;
        1e-6 * ((c as f64 + 1.0) * (2.0 * PI * 7.0 * t).sin() + (2.0 * PI * (3.0 + c as f64) * t).cos())
    });
    SignalState {
        data,
        channels,
        sfreq,
        unit: SignalUnit::Volts,
        annotations: Annotations::default(),
        bads: vec![],
        reference: ReferenceDescriptor::Original,
        projectors: vec![],
        highpass: None,
        lowpass: None,
        first_time: 0.0,
    }
}

#[allow(unused)]
pub fn annotations(items: &[(f64, &str)]) -> Annotations {
    Annotations::new(
        items
            .iter()
            .map(|(onset, label)| Annotation { onset: *onset, duration: 0.0, label: label.to_string() })
            .collect(),
    )
}

#[allow(unused)]
/// Maximum absolute difference between two arrays.
pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0_f64, f64::max)
}
