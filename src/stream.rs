//! Decoded recordings and stream selection.
//!
//! A [`Recording`] is the read-only result of decoding an XDF file: streams
//! in header order, each with its samples and per-sample timestamps.
//!
//! Selection picks one signal stream and at most one event stream, either
//! automatically by type tag or through a [`Prompt`]:
//!
//! ```text
//! automatic  signal = first stream with type == signal_marker
//!            events = first stream whose type contains event_marker (or none)
//! manual     list "[i] name / type", ask signal index, ask event index
//!            ("none" / "skip" → no events); bad index → warn, ask again
//! ```
use anyhow::Result;
use ndarray::Array2;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::interact::Prompt;
use crate::xdf::header::{ChannelFormat, StreamHeader};

// ── Data model ───────────────────────────────────────────────────────────────

/// Sample values of one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSamples {
    /// `[n_samples, n_channels]`, time-major as stored in the file.
    Numeric(Array2<f64>),
    /// One row of channel strings per sample.
    Strings(Vec<Vec<String>>),
}

impl StreamSamples {
    pub fn n_samples(&self) -> usize {
        match self {
            StreamSamples::Numeric(a) => a.nrows(),
            StreamSamples::Strings(rows) => rows.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Stream id as written in the file.
    pub id: u32,
    pub name: String,
    pub stream_type: String,
    /// `0.0` for irregular streams.
    pub nominal_srate: f64,
    pub channel_format: ChannelFormat,
    pub channel_count: usize,
    /// One label per channel.
    pub labels: Vec<String>,
    pub samples: StreamSamples,
    /// One stamp per sample row, seconds.
    pub timestamps: Vec<f64>,
}

impl Stream {
    /// Build a stream, checking that stamps and sample rows line up.
    ///
    /// Missing labels are filled as `Ch1`, `Ch2`, …
    pub fn new(
        id: u32,
        header: &StreamHeader,
        samples: StreamSamples,
        timestamps: Vec<f64>,
    ) -> Result<Self> {
        if samples.n_samples() != timestamps.len() {
            return Err(PipelineError::MalformedContainer(format!(
                "stream '{}': {} sample rows but {} timestamps",
                header.name,
                samples.n_samples(),
                timestamps.len()
            ))
            .into());
        }
        let mut labels: Vec<String> = header.labels.iter().take(header.channel_count).cloned().collect();
        for i in labels.len()..header.channel_count {
            labels.push(format!("Ch{}", i + 1));
        }
        for (i, l) in labels.iter_mut().enumerate() {
            if l.is_empty() {
                *l = format!("Ch{}", i + 1);
            }
        }
        Ok(Self {
            id,
            name: header.name.clone(),
            stream_type: header.stream_type.clone(),
            nominal_srate: header.nominal_srate,
            channel_format: header.channel_format,
            channel_count: header.channel_count,
            labels,
            samples,
            timestamps,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.timestamps.len()
    }

    /// First-channel value of every sample rendered as a label.
    ///
    /// Numeric markers use their shortest representation with integral
    /// values printed without a fractional part (`3.0` → `"3"`).
    pub fn marker_labels(&self) -> Vec<String> {
        match &self.samples {
            StreamSamples::Strings(rows) => rows
                .iter()
                .map(|r| r.first().cloned().unwrap_or_default())
                .collect(),
            StreamSamples::Numeric(a) => {
                if a.ncols() == 0 {
                    return vec![String::new(); a.nrows()];
                }
                a.column(0).iter().map(|&v| format_marker(v)).collect()
            }
        }
    }
}

pub(crate) fn format_marker(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// All streams of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    /// `<version>` from the file header, if present.
    pub version: Option<String>,
    pub streams: Vec<Stream>,
}

/// One line of the stream inventory.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StreamSummary {
    pub index: usize,
    pub name: String,
    pub stream_type: String,
    pub channel_count: usize,
    pub nominal_srate: f64,
    pub channel_format: String,
    pub n_samples: usize,
    /// Seconds between first and last stamp.
    pub duration: f64,
    pub labels: Vec<String>,
}

impl Recording {
    pub fn summaries(&self) -> Vec<StreamSummary> {
        self.streams
            .iter()
            .enumerate()
            .map(|(index, s)| StreamSummary {
                index,
                name: s.name.clone(),
                stream_type: s.stream_type.clone(),
                channel_count: s.channel_count,
                nominal_srate: s.nominal_srate,
                channel_format: s.channel_format.as_str().to_string(),
                n_samples: s.n_samples(),
                duration: match (s.timestamps.first(), s.timestamps.last()) {
                    (Some(a), Some(b)) => b - a,
                    _ => 0.0,
                },
                labels: s.labels.clone(),
            })
            .collect()
    }
}

// ── Selection ────────────────────────────────────────────────────────────────

/// Indices into [`Recording::streams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSelection {
    pub signal: usize,
    pub events: Option<usize>,
}

impl StreamSelection {
    pub fn signal<'r>(&self, rec: &'r Recording) -> &'r Stream {
        &rec.streams[self.signal]
    }

    pub fn events<'r>(&self, rec: &'r Recording) -> Option<&'r Stream> {
        self.events.map(|i| &rec.streams[i])
    }
}

/// Pick streams by type tag.
pub fn select_auto(rec: &Recording, signal_marker: &str, event_marker: &str) -> Result<StreamSelection> {
    if rec.streams.is_empty() {
        return Err(PipelineError::NoStreams.into());
    }
    let signal = rec
        .streams
        .iter()
        .position(|s| s.stream_type == signal_marker)
        .ok_or_else(|| PipelineError::NoSignalStream {
            marker: signal_marker.to_string(),
            available: rec.streams.len(),
        })?;
    let events = rec
        .streams
        .iter()
        .position(|s| s.stream_type.contains(event_marker));
    info!(
        signal = %rec.streams[signal].name,
        events = events.map(|i| rec.streams[i].name.as_str()).unwrap_or("<none>"),
        "streams selected automatically"
    );
    Ok(StreamSelection { signal, events })
}

/// Parse a stream index answer against `len` streams.
pub fn parse_index(input: &str, len: usize) -> Result<usize> {
    let out_of_range = || PipelineError::SelectionOutOfRange { input: input.to_string(), len };
    let i: usize = input.trim().parse().map_err(|_| out_of_range())?;
    if i >= len {
        return Err(out_of_range().into());
    }
    Ok(i)
}

/// Ask the user for the signal and event streams.
pub fn select_manual<P: Prompt + ?Sized>(rec: &Recording, prompt: &mut P) -> Result<StreamSelection> {
    if rec.streams.is_empty() {
        return Err(PipelineError::NoStreams.into());
    }
    for (i, s) in rec.streams.iter().enumerate() {
        prompt.say(&format!("  [{i}]: Name: '{}', Type: '{}'", s.name, s.stream_type));
    }
    let len = rec.streams.len();

    let signal = ask_index(prompt, "Enter the number of the signal stream:", len, false)?
        .ok_or(PipelineError::NoStreams)?;
    let events = ask_index(
        prompt,
        "Enter the number of the event stream (or 'none' to skip):",
        len,
        true,
    )?;
    info!(
        signal = %rec.streams[signal].name,
        events = events.map(|i| rec.streams[i].name.as_str()).unwrap_or("<none>"),
        "streams selected"
    );
    Ok(StreamSelection { signal, events })
}

fn ask_index<P: Prompt + ?Sized>(
    prompt: &mut P,
    question: &str,
    len: usize,
    allow_none: bool,
) -> Result<Option<usize>> {
    loop {
        let Some(answer) = prompt.ask(question)? else {
            return Err(PipelineError::PromptClosed(question.to_string()).into());
        };
        let answer = answer.trim();
        if allow_none && (answer.eq_ignore_ascii_case("none") || answer.eq_ignore_ascii_case("skip")) {
            return Ok(None);
        }
        match parse_index(answer, len) {
            Ok(i) => return Ok(Some(i)),
            Err(e) => {
                warn!("{e}");
                prompt.say(&e.to_string());
            }
        }
    }
}
