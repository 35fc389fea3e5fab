//! Time-stamped event annotations.
//!
//! Onsets are seconds relative to the first sample of the signal stream. The
//! collection is always sorted by onset; equal onsets keep insertion order.
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stream::Stream;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub onset: f64,
    pub duration: f64,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    items: Vec<Annotation>,
}

impl Annotations {
    /// Build from arbitrary order; sorted stably by onset.
    pub fn new(mut items: Vec<Annotation>) -> Self {
        items.sort_by(|a, b| a.onset.total_cmp(&b.onset));
        Self { items }
    }

    pub fn push(&mut self, a: Annotation) {
        let at = self.items.partition_point(|x| x.onset <= a.onset);
        self.items.insert(at, a);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Annotation> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Annotation] {
        &self.items
    }

    /// Keep annotations with `tmin <= onset <= tmax` and shift them by `-tmin`.
    pub fn crop(&mut self, tmin: f64, tmax: f64) {
        self.items.retain(|a| a.onset >= tmin && a.onset <= tmax);
        for a in &mut self.items {
            a.onset -= tmin;
        }
    }
}

impl<'a> IntoIterator for &'a Annotations {
    type Item = &'a Annotation;
    type IntoIter = std::slice::Iter<'a, Annotation>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Convert an event stream into annotations relative to `signal_start`.
///
/// Events before the signal start keep their negative onset.
pub fn build_annotations(events: Option<&Stream>, signal_start: f64) -> Annotations {
    let Some(events) = events else {
        info!("no event stream selected; annotations left empty");
        return Annotations::default();
    };
    let labels = events.marker_labels();
    let items = events
        .timestamps
        .iter()
        .zip(labels)
        .map(|(&ts, label)| Annotation { onset: ts - signal_start, duration: 0.0, label })
        .collect();
    let out = Annotations::new(items);
    info!(stream = %events.name, n = out.len(), "annotations built");
    out
}
