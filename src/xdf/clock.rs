//! Timestamp post-processing for decoded streams.
//!
//! Two corrections, both least-squares line fits:
//!
//! ```text
//! clock sync   offset(t) ≈ a + b·t     fitted over (collection_time, offset)
//!              ts'       = ts + a + b·ts
//!
//! dejitter     ts[i]     ≈ c + d·i     fitted per gap-free segment
//!              ts'[i]    = c + d·i
//! ```
//!
//! Dejitter only applies to streams with a nominal sampling rate; a new
//! segment starts wherever consecutive stamps are further apart than
//! [`JITTER_BREAK_SECS`].

/// Gap (seconds) that splits a stream into independently dejittered segments.
pub const JITTER_BREAK_SECS: f64 = 1.0;

/// One `(collection_time, offset_value)` pair from a clock-offset chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockOffset {
    pub collection_time: f64,
    pub offset: f64,
}

/// Ordinary least squares `y ≈ a + b·x`. Returns `(a, b)`.
///
/// Degenerate inputs (one point, or constant `x`) collapse to the mean of `y`
/// with zero slope.
pub fn linear_fit(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len().min(y.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let mx = x[..n].iter().sum::<f64>() / nf;
    let my = y[..n].iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        sxx += dx * dx;
        sxy += dx * (y[i] - my);
    }
    if sxx <= f64::EPSILON * nf {
        return (my, 0.0);
    }
    let b = sxy / sxx;
    (my - b * mx, b)
}

/// Map stamps into the recording computer's clock using the stream's offsets.
pub fn synchronize(timestamps: &mut [f64], offsets: &[ClockOffset]) {
    if offsets.is_empty() || timestamps.is_empty() {
        return;
    }
    let x: Vec<f64> = offsets.iter().map(|o| o.collection_time).collect();
    let y: Vec<f64> = offsets.iter().map(|o| o.offset).collect();
    let (a, b) = linear_fit(&x, &y);
    for t in timestamps.iter_mut() {
        *t += a + b * *t;
    }
}

/// Replace stamps by a regular grid fitted per gap-free segment.
pub fn dejitter(timestamps: &mut [f64], nominal_srate: f64) {
    if nominal_srate <= 0.0 || timestamps.len() < 2 {
        return;
    }
    let mut start = 0;
    for i in 1..=timestamps.len() {
        let boundary = i == timestamps.len()
            || (timestamps[i] - timestamps[i - 1]).abs() > JITTER_BREAK_SECS;
        if boundary {
            fit_segment(&mut timestamps[start..i]);
            start = i;
        }
    }
}

fn fit_segment(seg: &mut [f64]) {
    if seg.len() < 2 {
        return;
    }
    let idx: Vec<f64> = (0..seg.len()).map(|i| i as f64).collect();
    let (a, b) = linear_fit(&idx, seg);
    for (i, t) in seg.iter_mut().enumerate() {
        *t = a + b * i as f64;
    }
}

/// Effective rate implied by the stamps (samples / span), `0.0` when undefined.
pub fn effective_srate(timestamps: &[f64]) -> f64 {
    match (timestamps.first(), timestamps.last()) {
        (Some(&first), Some(&last)) if last > first => {
            (timestamps.len() - 1) as f64 / (last - first)
        }
        _ => 0.0,
    }
}
