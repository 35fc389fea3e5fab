//! Artifact scoring of decomposition sources against reference channels.
//!
//! A component is flagged when its correlation with a band-passed ocular or
//! cardiac reference is an outlier among all components:
//!
//! ```text
//! pass 1: z over all scores,            flag |z| > threshold
//! pass 2: z over the unflagged scores,  flag |z| > threshold
//! ...     stops early when a pass flags nothing
//! ```

/// Pearson correlation of two equal-length series; `0.0` when either is flat.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let ma = a[..n].iter().sum::<f64>() / n as f64;
    let mb = b[..n].iter().sum::<f64>() / n as f64;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    let denom = (saa * sbb).sqrt();
    if denom > 0.0 { sab / denom } else { 0.0 }
}

/// Indices of outlying `scores` by iterative z-scoring (population std).
pub fn find_outliers(scores: &[f64], threshold: f64, max_passes: usize) -> Vec<usize> {
    let mut flagged = vec![false; scores.len()];
    for _ in 0..max_passes {
        let kept: Vec<f64> = scores
            .iter()
            .zip(&flagged)
            .filter(|(_, f)| !**f)
            .map(|(s, _)| *s)
            .collect();
        if kept.len() < 2 {
            break;
        }
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        let std = (kept.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / kept.len() as f64).sqrt();
        if std == 0.0 {
            break;
        }
        let mut any = false;
        for (i, s) in scores.iter().enumerate() {
            if !flagged[i] && ((s - mean) / std).abs() > threshold {
                flagged[i] = true;
                any = true;
            }
        }
        if !any {
            break;
        }
    }
    flagged
        .iter()
        .enumerate()
        .filter(|(_, f)| **f)
        .map(|(i, _)| i)
        .collect()
}
