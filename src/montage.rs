//! Standard electrode layouts on the unit sphere.
//!
//! Head frame: x → right ear, y → nose, z → vertex. Positions are generated
//! from the 10-10 construction rather than stored as a literal table:
//!
//! ```text
//!   row      midline θ   lateral (left) φ   electrodes (left … z … right)
//!   AF         67.5 F        126            AF7 AF5 AF3 AF1 AFz AF2 AF4 AF6 AF8
//!   F          45.0 F        144            F7  F5  F3  F1  Fz  F2  F4  F6  F8
//!   FC         22.5 F        162            FT7 FC5 FC3 FC1 FCz FC2 FC4 FC6 FT8
//!   C           0.0          180            T7  C5  C3  C1  Cz  C2  C4  C6  T8
//!   CP         22.5 B        198            TP7 CP5 CP3 CP1 CPz CP2 CP4 CP6 TP8
//!   P          45.0 B        216            P7  P5  P3  P1  Pz  P2  P4  P6  P8
//!   PO         67.5 B        234            PO7 PO5 PO3 PO1 POz PO2 PO4 PO6 PO8
//! ```
//!
//! Each row electrode lies on the arc from the midline point to the
//! equatorial lateral point, at steps of a quarter arc. The equator carries
//! Fpz/Fp1/Fp2 and Oz/O1/O2, the inferior ring (θ = 112.5°) Nz, Iz and the
//! 9/10 electrodes. `standard_1005` adds the half rows (AFF, FFC, …) between
//! the full rows.
use std::collections::BTreeMap;
use std::f64::consts::PI;

use anyhow::Result;

use crate::error::PipelineError;

/// Names accepted by [`Montage::standard`].
pub const KNOWN_MONTAGES: [&str; 2] = ["standard_1020", "standard_1005"];

#[derive(Debug, Clone, PartialEq)]
pub struct Montage {
    pub name: String,
    positions: BTreeMap<String, [f64; 3]>,
}

impl Montage {
    /// Load a named layout.
    pub fn standard(name: &str) -> Result<Self> {
        let mut positions = BTreeMap::new();
        match name {
            "standard_1020" => add_1020(&mut positions),
            "standard_1005" => {
                add_1020(&mut positions);
                add_half_rows(&mut positions);
            }
            other => return Err(PipelineError::UnknownMontage(other.to_string()).into()),
        }
        Ok(Self { name: name.to_string(), positions })
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, label: &str) -> Option<[f64; 3]> {
        self.positions.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }
}

// ── Construction ─────────────────────────────────────────────────────────────

/// Point from polar angle `theta` (from vertex) and azimuth `phi` (from +x
/// towards +y), both in degrees.
fn sph(theta: f64, phi: f64) -> [f64; 3] {
    let (t, p) = (theta * PI / 180.0, phi * PI / 180.0);
    [t.sin() * p.cos(), t.sin() * p.sin(), t.cos()]
}

fn slerp(a: [f64; 3], b: [f64; 3], t: f64) -> [f64; 3] {
    let dot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).clamp(-1.0, 1.0);
    let omega = dot.acos();
    if omega.abs() < 1e-12 {
        return a;
    }
    let s = omega.sin();
    let wa = ((1.0 - t) * omega).sin() / s;
    let wb = (t * omega).sin() / s;
    [
        wa * a[0] + wb * b[0],
        wa * a[1] + wb * b[1],
        wa * a[2] + wb * b[2],
    ]
}

/// Midline point at signed polar angle: positive = frontal, negative = posterior.
fn midline(signed_theta: f64) -> [f64; 3] {
    if signed_theta >= 0.0 {
        sph(signed_theta, 90.0)
    } else {
        sph(-signed_theta, 270.0)
    }
}

struct Row {
    prefix: &'static str,
    theta: f64,
    lateral_phi: f64,
    lateral_left: &'static str,
    lateral_right: &'static str,
}

const FULL_ROWS: [Row; 7] = [
    Row { prefix: "AF", theta: 67.5, lateral_phi: 126.0, lateral_left: "AF7", lateral_right: "AF8" },
    Row { prefix: "F", theta: 45.0, lateral_phi: 144.0, lateral_left: "F7", lateral_right: "F8" },
    Row { prefix: "FC", theta: 22.5, lateral_phi: 162.0, lateral_left: "FT7", lateral_right: "FT8" },
    Row { prefix: "C", theta: 0.0, lateral_phi: 180.0, lateral_left: "T7", lateral_right: "T8" },
    Row { prefix: "CP", theta: -22.5, lateral_phi: 198.0, lateral_left: "TP7", lateral_right: "TP8" },
    Row { prefix: "P", theta: -45.0, lateral_phi: 216.0, lateral_left: "P7", lateral_right: "P8" },
    Row { prefix: "PO", theta: -67.5, lateral_phi: 234.0, lateral_left: "PO7", lateral_right: "PO8" },
];

fn add_row(out: &mut BTreeMap<String, [f64; 3]>, row: &Row) {
    let mid = midline(row.theta);
    let left = sph(90.0, row.lateral_phi);
    let right = sph(90.0, 180.0 - row.lateral_phi);
    out.insert(format!("{}z", row.prefix), mid);
    for k in 1..=3 {
        let t = k as f64 / 4.0;
        out.insert(format!("{}{}", row.prefix, 2 * k - 1), slerp(mid, left, t));
        out.insert(format!("{}{}", row.prefix, 2 * k), slerp(mid, right, t));
    }
    out.insert(row.lateral_left.to_string(), left);
    out.insert(row.lateral_right.to_string(), right);
}

fn add_1020(out: &mut BTreeMap<String, [f64; 3]>) {
    for row in &FULL_ROWS {
        add_row(out, row);
    }

    // Equator.
    for (name, phi) in [
        ("Fpz", 90.0),
        ("Fp1", 108.0),
        ("Fp2", 72.0),
        ("Oz", 270.0),
        ("O1", 252.0),
        ("O2", 288.0),
    ] {
        out.insert(name.to_string(), sph(90.0, phi));
    }

    // Inferior ring.
    for (name, phi) in [
        ("Nz", 90.0),
        ("F9", 144.0),
        ("F10", 36.0),
        ("FT9", 162.0),
        ("FT10", 18.0),
        ("T9", 180.0),
        ("T10", 0.0),
        ("TP9", 198.0),
        ("TP10", 342.0),
        ("P9", 216.0),
        ("P10", 324.0),
        ("PO9", 234.0),
        ("PO10", 306.0),
        ("O9", 252.0),
        ("O10", 288.0),
        ("Iz", 270.0),
    ] {
        out.insert(name.to_string(), sph(112.5, phi));
    }

    // Ear lobes / mastoids.
    for (name, theta, phi) in [
        ("A1", 120.0, 195.0),
        ("A2", 120.0, 345.0),
        ("M1", 117.0, 205.0),
        ("M2", 117.0, 335.0),
    ] {
        out.insert(name.to_string(), sph(theta, phi));
    }

    // Old 10-20 names.
    for (alias, canonical) in [("T3", "T7"), ("T4", "T8"), ("T5", "P7"), ("T6", "P8")] {
        if let Some(p) = out.get(canonical).copied() {
            out.insert(alias.to_string(), p);
        }
    }
}

/// Half rows between consecutive full rows (10-5 `h` positions).
fn add_half_rows(out: &mut BTreeMap<String, [f64; 3]>) {
    const HALF: [(&str, &str); 6] = [
        ("AFF", "AFF"),
        ("FFC", "FFT"),
        ("FCC", "FTT"),
        ("CCP", "TTP"),
        ("CPP", "TPP"),
        ("PPO", "PPO"),
    ];
    for (i, (prefix, lateral)) in HALF.iter().enumerate() {
        let (a, b) = (&FULL_ROWS[i], &FULL_ROWS[i + 1]);
        let theta = (a.theta + b.theta) / 2.0;
        let phi = (a.lateral_phi + b.lateral_phi) / 2.0;
        let mid = midline(theta);
        let left = sph(90.0, phi);
        let right = sph(90.0, 180.0 - phi);
        out.insert(format!("{prefix}z"), mid);
        for k in 1..=4 {
            let t = (2 * k - 1) as f64 / 8.0;
            let (l, r) = if k == 4 {
                (format!("{lateral}7h"), format!("{lateral}8h"))
            } else {
                (format!("{prefix}{}h", 2 * k - 1), format!("{prefix}{}h", 2 * k))
            };
            out.insert(l, slerp(mid, left, t));
            out.insert(r, slerp(mid, right, t));
        }
    }
}
