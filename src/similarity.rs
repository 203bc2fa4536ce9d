use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::spectrum::Spectrum;

pub const DEFAULT_FRAGMENT_MZ_TOLERANCE: f64 = 0.02;

/// Highest charge that still gets its own shift candidate.
pub const MAX_SHIFT_CHARGE: i32 = 10;

/// Score in `[0, 1]` plus the accepted `(index_a, index_b)` peak pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub score: f64,
    pub matches: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CosineMode {
    Standard,
    Shifted,
}

impl fmt::Display for CosineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CosineMode::Standard => write!(f, "standard"),
            CosineMode::Shifted => write!(f, "shifted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityParams {
    pub fragment_mz_tolerance: f64,
    pub allow_shift: bool,
}

impl SimilarityParams {
    pub fn new(fragment_mz_tolerance: f64, mode: CosineMode) -> Self {
        Self {
            fragment_mz_tolerance,
            allow_shift: mode == CosineMode::Shifted,
        }
    }

    pub fn mode(&self) -> CosineMode {
        if self.allow_shift {
            CosineMode::Shifted
        } else {
            CosineMode::Standard
        }
    }
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_MZ_TOLERANCE, CosineMode::Standard)
    }
}

struct Candidate {
    score: f64,
    index_a: usize,
    index_b: usize,
}

/// Greedy cosine similarity between two spectra.
///
/// Both intensity vectors must have a non-zero norm. The score of an all-zero
/// spectrum is meaningless.
pub fn cosine(
    a: &Spectrum,
    b: &Spectrum,
    fragment_mz_tolerance: f64,
    allow_shift: bool,
) -> SimilarityResult {
    let intensity_a = unit_normalized(a.intensity());
    let intensity_b = unit_normalized(b.intensity());
    let mz_a = a.mz();
    let mz_b = b.mz();

    let precursor_charge = a.precursor_charge.clamp(1, MAX_SHIFT_CHARGE);
    let precursor_mass_diff = (a.precursor_mz - b.precursor_mz) * f64::from(precursor_charge);
    let mut num_shifts = 1;
    if allow_shift && precursor_mass_diff.abs() >= fragment_mz_tolerance {
        num_shifts += precursor_charge.unsigned_abs() as usize;
    }
    let mut mass_diff = vec![0.0; num_shifts];
    for (charge, shift) in mass_diff.iter_mut().enumerate().skip(1) {
        *shift = precursor_mass_diff / charge as f64;
    }
    let mut cursor = vec![0usize; num_shifts];

    let mut candidates = Vec::new();
    for (index_a, (&peak_mz, &peak_intensity)) in mz_a.iter().zip(&intensity_a).enumerate() {
        for (pos, &shift) in cursor.iter_mut().zip(&mass_diff) {
            while *pos + 1 < mz_b.len() && peak_mz - fragment_mz_tolerance > mz_b[*pos] + shift {
                *pos += 1;
            }
        }
        for (&start, &shift) in cursor.iter().zip(&mass_diff) {
            let mut index_b = start;
            while index_b < mz_b.len()
                && (peak_mz - (mz_b[index_b] + shift)).abs() <= fragment_mz_tolerance
            {
                candidates.push(Candidate {
                    score: peak_intensity * intensity_b[index_b],
                    index_a,
                    index_b,
                });
                index_b += 1;
            }
        }
    }

    // stable: equal scores keep discovery order
    candidates.sort_by(|x, y| y.score.total_cmp(&x.score));

    let mut used_a = vec![false; mz_a.len()];
    let mut used_b = vec![false; mz_b.len()];
    let mut score = 0.0;
    let mut matches = Vec::new();
    for candidate in candidates {
        if used_a[candidate.index_a] || used_b[candidate.index_b] {
            continue;
        }
        score += candidate.score;
        used_a[candidate.index_a] = true;
        used_b[candidate.index_b] = true;
        matches.push((candidate.index_a, candidate.index_b));
    }

    SimilarityResult {
        score: score.min(1.0),
        matches,
    }
}

fn unit_normalized(values: &[f64]) -> Vec<f64> {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    values.iter().map(|v| v / norm).collect()
}
