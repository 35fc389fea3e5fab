//! Stream header XML.
//!
//! Only the fields the pipeline needs are deserialised; everything else in
//! the `<info>` document (acquisition details, hostnames, …) is ignored.
//!
//! ```text
//! <info>
//!   <name>…</name> <type>EEG</type> <channel_count>32</channel_count>
//!   <nominal_srate>500</nominal_srate> <channel_format>float32</channel_format>
//!   <desc><channels><channel><label>Fp1</label>…</channel>…</channels></desc>
//! </info>
//! ```
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::PipelineError;

/// Per-sample value encoding declared by `<channel_format>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    Float32,
    Double64,
    Int8,
    Int16,
    Int32,
    Int64,
    String,
}

impl ChannelFormat {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            "float32" => ChannelFormat::Float32,
            "double64" => ChannelFormat::Double64,
            "int8" => ChannelFormat::Int8,
            "int16" => ChannelFormat::Int16,
            "int32" => ChannelFormat::Int32,
            "int64" => ChannelFormat::Int64,
            "string" => ChannelFormat::String,
            other => {
                return Err(PipelineError::MalformedContainer(format!(
                    "unknown channel_format '{other}'"
                ))
                .into())
            }
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelFormat::Float32 => "float32",
            ChannelFormat::Double64 => "double64",
            ChannelFormat::Int8 => "int8",
            ChannelFormat::Int16 => "int16",
            ChannelFormat::Int32 => "int32",
            ChannelFormat::Int64 => "int64",
            ChannelFormat::String => "string",
        }
    }

    /// Bytes per value for numeric formats; `None` for strings.
    pub fn value_size(self) -> Option<usize> {
        match self {
            ChannelFormat::Int8 => Some(1),
            ChannelFormat::Int16 => Some(2),
            ChannelFormat::Float32 | ChannelFormat::Int32 => Some(4),
            ChannelFormat::Double64 | ChannelFormat::Int64 => Some(8),
            ChannelFormat::String => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self != ChannelFormat::String
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InfoXml {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    stream_type: Option<String>,
    #[serde(default)]
    channel_count: Option<String>,
    #[serde(default)]
    nominal_srate: Option<String>,
    #[serde(default)]
    channel_format: Option<String>,
    #[serde(default)]
    desc: Option<DescXml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DescXml {
    #[serde(default)]
    channels: Option<ChannelsXml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelsXml {
    #[serde(default)]
    channel: Vec<ChannelXml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelXml {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    unit: Option<String>,
}

/// Parsed `<info>` of one stream header chunk.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub name: String,
    pub stream_type: String,
    pub channel_count: usize,
    /// `0.0` for irregular streams (markers).
    pub nominal_srate: f64,
    pub channel_format: ChannelFormat,
    /// Channel labels from `<desc><channels>`; empty when the writer gave none.
    pub labels: Vec<String>,
    /// Channel units from `<desc><channels>`, parallel to `labels`.
    pub units: Vec<Option<String>>,
}

impl StreamHeader {
    pub fn parse(xml: &str) -> Result<Self> {
        let info: InfoXml = quick_xml::de::from_str(xml)
            .map_err(|e| PipelineError::MalformedContainer(format!("stream header XML: {e}")))?;

        let channel_count = info
            .channel_count
            .as_deref()
            .map(str::trim)
            .unwrap_or("0")
            .parse::<usize>()
            .context("parsing <channel_count>")?;
        let nominal_srate = match info.nominal_srate.as_deref().map(str::trim) {
            None | Some("") => 0.0,
            Some(s) => s.parse::<f64>().context("parsing <nominal_srate>")?,
        };
        let channel_format =
            ChannelFormat::parse(info.channel_format.as_deref().unwrap_or("float32"))?;

        let channels = info
            .desc
            .and_then(|d| d.channels)
            .map(|c| c.channel)
            .unwrap_or_default();
        let labels = channels
            .iter()
            .map(|c| c.label.clone().unwrap_or_default().trim().to_string())
            .collect();
        let units = channels.iter().map(|c| c.unit.clone()).collect();

        Ok(StreamHeader {
            name: info.name.unwrap_or_default().trim().to_string(),
            stream_type: info.stream_type.unwrap_or_default().trim().to_string(),
            channel_count,
            nominal_srate,
            channel_format,
            labels,
            units,
        })
    }
}

/// `<version>` of the file header; informational only.
pub fn parse_file_version(xml: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct FileHeaderXml {
        #[serde(default)]
        version: Option<String>,
    }
    quick_xml::de::from_str::<FileHeaderXml>(xml)
        .ok()
        .and_then(|h| h.version)
        .map(|v| v.trim().to_string())
}
