//! Safetensors persistence for stage hand-offs.
//!
//! Layout: 8-byte LE header length, JSON header, raw LE tensor bytes.
//! Numeric arrays are F64 tensors; everything else is a JSON document stored
//! as a string under `__metadata__`:
//!
//! ```text
//! SignalState       data [C, T], positions [C, 3] (NaN = none),
//!                   onsets [A], durations [A]      + "state" document
//! EpochSet          data [E, C, T], onsets [E]     + "epochs" document
//! DecompositionModel mean [C], unmixing [k, C], mixing [C, k] + "model"
//! TFR               power_<i> [C, F, T], freqs, times + "tfr"
//! ```
//!
//! Files are written to a hidden sibling and renamed into place, so a failed
//! stage never leaves a partial output behind.
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotations::{Annotation, Annotations};
use crate::channels::{Channel, ChannelRole};
use crate::epoch::{DropLogEntry, EpochSet};
use crate::error::PipelineError;
use crate::ica::{DecompositionModel, IcaMethod};
use crate::state::{Projector, ReferenceDescriptor, SignalState, SignalUnit};
use crate::tfr::ConditionTfr;

const METADATA_KEY: &str = "__metadata__";

fn malformed(msg: impl Into<String>) -> anyhow::Error {
    PipelineError::MalformedContainer(msg.into()).into()
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Safetensors file builder for F64 tensors plus string metadata.
///
/// ```rust,no_run
/// use eegstage::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("signal", &[1.0, 2.0, 3.0], &[1, 3]);
/// w.add_metadata("sfreq", "250");
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, Vec<usize>)>,
    metadata: BTreeMap<String, String>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, shape.to_vec()));
    }

    /// Any-dimensional array in logical (row-major) order.
    pub fn add_array<D: ndarray::Dimension>(&mut self, name: &str, arr: &ndarray::Array<f64, D>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, arr.shape());
    }

    pub fn add_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Serialise `doc` as JSON under `key`.
    pub fn add_document<T: Serialize>(&mut self, key: &str, doc: &T) -> Result<()> {
        let text = serde_json::to_string(doc).with_context(|| format!("serialising '{key}'"))?;
        self.metadata.insert(key.to_string(), text);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert(METADATA_KEY.to_string(), serde_json::to_value(&self.metadata)?);
        }
        let mut offset: usize = 0;
        for (name, data, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": "F64",
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let mut out = Vec::with_capacity(8 + hdr_bytes.len() + pad + offset);
        out.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
        out.extend_from_slice(&hdr_bytes);
        out.extend(std::iter::repeat(b' ').take(pad));
        for (_, data, _) in &self.entries {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()?)
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.partial"))
}

/// Write `bytes` to a hidden sibling of `path`, then rename it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = temp_sibling(path);
    let result = (|| -> Result<()> {
        let mut f = std::fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
        std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result?;
    debug!(path = %path.display(), bytes = bytes.len(), "written");
    Ok(())
}

/// Pretty JSON document written atomically.
pub fn write_json<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(doc)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

// ── Reader ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TensorEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

/// Parsed safetensors file.
#[derive(Debug)]
pub struct StReader {
    bytes: Vec<u8>,
    data_start: usize,
    tensors: BTreeMap<String, TensorEntry>,
    metadata: BTreeMap<String, String>,
}

impl StReader {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let Some(len_bytes) = bytes.get(..8) else {
            return Err(malformed("safetensors file too small"));
        };
        let mut len = [0u8; 8];
        len.copy_from_slice(len_bytes);
        let n = u64::from_le_bytes(len) as usize;
        let header_bytes = bytes
            .get(8..8usize.saturating_add(n))
            .ok_or_else(|| malformed(format!("header length {n} exceeds file size {}", bytes.len())))?;
        let mut header: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(header_bytes).map_err(|e| malformed(format!("header JSON: {e}")))?;

        let metadata = match header.remove(METADATA_KEY) {
            Some(v) => serde_json::from_value(v).map_err(|e| malformed(format!("metadata: {e}")))?,
            None => BTreeMap::new(),
        };
        let mut tensors = BTreeMap::new();
        for (name, v) in header {
            let entry: TensorEntry =
                serde_json::from_value(v).map_err(|e| malformed(format!("tensor '{name}': {e}")))?;
            tensors.insert(name, entry);
        }
        Ok(Self { bytes, data_start: 8 + n, tensors, metadata })
    }

    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn metadata(&self, key: &str) -> Result<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| malformed(format!("missing metadata '{key}'")))
    }

    pub fn document<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        serde_json::from_str(self.metadata(key)?).map_err(|e| malformed(format!("document '{key}': {e}")))
    }

    /// F64 tensor values and shape.
    pub fn f64_tensor(&self, name: &str) -> Result<(Vec<f64>, Vec<usize>)> {
        let entry = self
            .tensors
            .get(name)
            .ok_or_else(|| malformed(format!("missing tensor '{name}'")))?;
        if entry.dtype != "F64" {
            return Err(malformed(format!("tensor '{name}' is {}, expected F64", entry.dtype)));
        }
        let [s, e] = entry.data_offsets;
        let outside = || malformed(format!("tensor '{name}' lies outside the file"));
        let start = self.data_start.checked_add(s).ok_or_else(outside)?;
        let end = self.data_start.checked_add(e).ok_or_else(outside)?;
        let raw = self.bytes.get(start..end).ok_or_else(outside)?;
        let expected = entry
            .shape
            .iter()
            .try_fold(8usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| malformed(format!("tensor '{name}' shape {:?} overflows", entry.shape)))?;
        if raw.len() != expected {
            return Err(malformed(format!(
                "tensor '{name}' has {} bytes for shape {:?}",
                raw.len(),
                entry.shape
            )));
        }
        let values = raw
            .chunks_exact(8)
            .map(|b| {
                let mut a = [0u8; 8];
                a.copy_from_slice(b);
                f64::from_le_bytes(a)
            })
            .collect();
        Ok((values, entry.shape.clone()))
    }

    pub fn array1(&self, name: &str) -> Result<Array1<f64>> {
        let (v, shape) = self.f64_tensor(name)?;
        match shape.as_slice() {
            [_] => Ok(Array1::from(v)),
            other => Err(malformed(format!("tensor '{name}' has shape {other:?}, expected 1-D"))),
        }
    }

    pub fn array2(&self, name: &str) -> Result<Array2<f64>> {
        let (v, shape) = self.f64_tensor(name)?;
        match shape.as_slice() {
            &[r, c] => Ok(Array2::from_shape_vec((r, c), v)?),
            other => Err(malformed(format!("tensor '{name}' has shape {other:?}, expected 2-D"))),
        }
    }

    pub fn array3(&self, name: &str) -> Result<Array3<f64>> {
        let (v, shape) = self.f64_tensor(name)?;
        match shape.as_slice() {
            &[a, b, c] => Ok(Array3::from_shape_vec((a, b, c), v)?),
            other => Err(malformed(format!("tensor '{name}' has shape {other:?}, expected 3-D"))),
        }
    }
}

fn check_kind(r: &StReader, kind: &str) -> Result<()> {
    let found = r.metadata("kind")?;
    if found != kind {
        return Err(malformed(format!("file holds '{found}', expected '{kind}'")));
    }
    Ok(())
}

// ── Channel roster ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ChannelDoc {
    name: String,
    role: ChannelRole,
}

fn add_channels(w: &mut StWriter, channels: &[Channel]) -> Result<()> {
    let docs: Vec<ChannelDoc> = channels
        .iter()
        .map(|c| ChannelDoc { name: c.name.clone(), role: c.role })
        .collect();
    w.add_document("channels", &docs)?;
    let pos: Vec<f64> = channels
        .iter()
        .flat_map(|c| c.pos.unwrap_or([f64::NAN; 3]))
        .collect();
    w.add_f64("positions", &pos, &[channels.len(), 3]);
    Ok(())
}

fn read_channels(r: &StReader) -> Result<Vec<Channel>> {
    let docs: Vec<ChannelDoc> = r.document("channels")?;
    let pos = r.array2("positions")?;
    if pos.nrows() != docs.len() {
        return Err(malformed(format!("{} positions for {} channels", pos.nrows(), docs.len())));
    }
    Ok(docs
        .into_iter()
        .zip(pos.outer_iter())
        .map(|(d, p)| Channel {
            name: d.name,
            role: d.role,
            pos: if p.iter().all(|v| v.is_finite()) { Some([p[0], p[1], p[2]]) } else { None },
        })
        .collect())
}

// ── SignalState ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct StateDoc {
    sfreq: f64,
    unit: SignalUnit,
    first_time: f64,
    bads: Vec<String>,
    reference: ReferenceDescriptor,
    projectors: Vec<Projector>,
    highpass: Option<f64>,
    lowpass: Option<f64>,
    annotation_labels: Vec<String>,
}

pub fn save_state(state: &SignalState, path: &Path) -> Result<()> {
    state.validate()?;
    let mut w = StWriter::new();
    w.add_metadata("kind", "signal_state");
    w.add_array("data", &state.data);
    add_channels(&mut w, &state.channels)?;
    let anns = state.annotations.as_slice();
    w.add_f64("onsets", &anns.iter().map(|a| a.onset).collect::<Vec<_>>(), &[anns.len()]);
    w.add_f64("durations", &anns.iter().map(|a| a.duration).collect::<Vec<_>>(), &[anns.len()]);
    w.add_document(
        "state",
        &StateDoc {
            sfreq: state.sfreq,
            unit: state.unit,
            first_time: state.first_time,
            bads: state.bads.clone(),
            reference: state.reference.clone(),
            projectors: state.projectors.clone(),
            highpass: state.highpass,
            lowpass: state.lowpass,
            annotation_labels: anns.iter().map(|a| a.label.clone()).collect(),
        },
    )?;
    w.write(path)
}

pub fn load_state(path: &Path) -> Result<SignalState> {
    let r = StReader::open(path)?;
    check_kind(&r, "signal_state").with_context(|| format!("loading {}", path.display()))?;
    let doc: StateDoc = r.document("state")?;
    let onsets = r.array1("onsets")?;
    let durations = r.array1("durations")?;
    if onsets.len() != doc.annotation_labels.len() || durations.len() != onsets.len() {
        return Err(malformed("annotation arrays disagree in length"));
    }
    let annotations = Annotations::new(
        onsets
            .iter()
            .zip(durations.iter())
            .zip(doc.annotation_labels)
            .map(|((&onset, &duration), label)| Annotation { onset, duration, label })
            .collect(),
    );
    let state = SignalState {
        data: r.array2("data")?,
        channels: read_channels(&r)?,
        sfreq: doc.sfreq,
        unit: doc.unit,
        annotations,
        bads: doc.bads,
        reference: doc.reference,
        projectors: doc.projectors,
        highpass: doc.highpass,
        lowpass: doc.lowpass,
        first_time: doc.first_time,
    };
    state.validate()?;
    Ok(state)
}

// ── EpochSet ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct EpochsDoc {
    sfreq: f64,
    tmin: f64,
    unit: SignalUnit,
    conditions: Vec<String>,
    drop_log: Vec<DropLogEntry>,
}

pub fn save_epochs(epochs: &EpochSet, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    w.add_metadata("kind", "epochs");
    w.add_array("data", &epochs.data);
    w.add_f64("onsets", &epochs.onsets, &[epochs.onsets.len()]);
    add_channels(&mut w, &epochs.channels)?;
    w.add_document(
        "epochs",
        &EpochsDoc {
            sfreq: epochs.sfreq,
            tmin: epochs.tmin,
            unit: epochs.unit,
            conditions: epochs.conditions.clone(),
            drop_log: epochs.drop_log.clone(),
        },
    )?;
    w.write(path)
}

pub fn load_epochs(path: &Path) -> Result<EpochSet> {
    let r = StReader::open(path)?;
    check_kind(&r, "epochs").with_context(|| format!("loading {}", path.display()))?;
    let doc: EpochsDoc = r.document("epochs")?;
    let data = r.array3("data")?;
    let channels = read_channels(&r)?;
    let onsets = r.array1("onsets")?.to_vec();
    let (n_e, n_c, _) = data.dim();
    if n_e != doc.conditions.len() || n_e != onsets.len() || n_c != channels.len() {
        return Err(malformed(format!(
            "epoch data {:?} disagrees with {} conditions / {} channels",
            data.dim(),
            doc.conditions.len(),
            channels.len()
        )));
    }
    Ok(EpochSet {
        data,
        conditions: doc.conditions,
        onsets,
        channels,
        sfreq: doc.sfreq,
        tmin: doc.tmin,
        unit: doc.unit,
        drop_log: doc.drop_log,
    })
}

// ── DecompositionModel ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ModelDoc {
    method: IcaMethod,
    channel_names: Vec<String>,
    exclude: Vec<usize>,
    scores: BTreeMap<String, Vec<f64>>,
    n_iter: usize,
    converged: bool,
}

pub fn save_model(model: &DecompositionModel, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    w.add_metadata("kind", "decomposition");
    w.add_array("mean", &model.mean);
    w.add_array("unmixing", &model.unmixing);
    w.add_array("mixing", &model.mixing);
    w.add_document(
        "model",
        &ModelDoc {
            method: model.method,
            channel_names: model.channel_names.clone(),
            exclude: model.exclude.clone(),
            scores: model.scores.clone(),
            n_iter: model.n_iter,
            converged: model.converged,
        },
    )?;
    w.write(path)
}

pub fn load_model(path: &Path) -> Result<DecompositionModel> {
    let r = StReader::open(path)?;
    check_kind(&r, "decomposition").with_context(|| format!("loading {}", path.display()))?;
    let doc: ModelDoc = r.document("model")?;
    let model = DecompositionModel {
        method: doc.method,
        channel_names: doc.channel_names,
        mean: r.array1("mean")?,
        unmixing: r.array2("unmixing")?,
        mixing: r.array2("mixing")?,
        exclude: doc.exclude,
        scores: doc.scores,
        n_iter: doc.n_iter,
        converged: doc.converged,
    };
    let (k, c) = model.unmixing.dim();
    if model.mixing.dim() != (c, k) || model.mean.len() != c || model.channel_names.len() != c {
        return Err(malformed("decomposition matrices disagree in shape"));
    }
    Ok(model)
}

// ── TFR ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct TfrDoc {
    conditions: Vec<String>,
    n_epochs: Vec<usize>,
    channels: Vec<String>,
    baseline: Option<String>,
}

pub fn save_tfr(tfrs: &[ConditionTfr], path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    w.add_metadata("kind", "tfr");
    if let Some(first) = tfrs.first() {
        w.add_f64("freqs", &first.freqs, &[first.freqs.len()]);
        w.add_f64("times", &first.times, &[first.times.len()]);
    }
    for (i, t) in tfrs.iter().enumerate() {
        w.add_array(&format!("power_{i}"), &t.power);
    }
    w.add_document(
        "tfr",
        &TfrDoc {
            conditions: tfrs.iter().map(|t| t.condition.clone()).collect(),
            n_epochs: tfrs.iter().map(|t| t.n_epochs).collect(),
            channels: tfrs.first().map(|t| t.channels.clone()).unwrap_or_default(),
            baseline: tfrs.first().and_then(|t| t.baseline.clone()),
        },
    )?;
    w.write(path)
}

pub fn load_tfr(path: &Path) -> Result<Vec<ConditionTfr>> {
    let r = StReader::open(path)?;
    check_kind(&r, "tfr").with_context(|| format!("loading {}", path.display()))?;
    let doc: TfrDoc = r.document("tfr")?;
    if doc.conditions.is_empty() {
        return Ok(vec![]);
    }
    let freqs = r.array1("freqs")?.to_vec();
    let times = r.array1("times")?.to_vec();
    doc.conditions
        .iter()
        .zip(&doc.n_epochs)
        .enumerate()
        .map(|(i, (condition, &n_epochs))| {
            Ok(ConditionTfr {
                condition: condition.clone(),
                n_epochs,
                channels: doc.channels.clone(),
                freqs: freqs.clone(),
                times: times.clone(),
                power: r.array3(&format!("power_{i}"))?,
                baseline: doc.baseline.clone(),
            })
        })
        .collect()
}
