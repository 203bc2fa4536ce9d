use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::UsiError;

/// Monoisotopic residue mass of glycine, used as the stand-in for gap residues.
pub const GLYCINE_MASS: f64 = 57.021463735;

/// Unmodified sequence plus mass offsets keyed by zero-based residue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peptidoform {
    pub sequence: String,
    pub modifications: BTreeMap<usize, f64>,
}

impl Peptidoform {
    /// Decodes a compact mass-offset notation such as `VLHPLEGAVVIIFK+16.0`.
    ///
    /// A gap `X+<mass>` becomes glycine carrying `mass - GLYCINE_MASS`. An
    /// offset attaches to the residue before it, or to the first residue when
    /// it leads the sequence. A later offset on the same residue replaces the
    /// earlier one.
    pub fn decode(notation: &str, sequence: &str) -> Result<Self, UsiError> {
        let mut modifications = BTreeMap::new();
        let mut residues = 0usize;
        let mut chars = notation.char_indices().peekable();
        while let Some((start, ch)) = chars.next() {
            if ch == '+' || ch == '-' {
                let end = scan_number(notation, start + 1);
                let delta = parse_delta(&notation[start..end])?;
                modifications.insert(residues.saturating_sub(1), delta);
                while chars.peek().is_some_and(|(i, _)| *i < end) {
                    chars.next();
                }
                continue;
            }
            if ch == 'X' && notation[start + 1..].starts_with('+') {
                let end = scan_number(notation, start + 2);
                let gap = parse_delta(&notation[start + 1..end])?;
                modifications.insert(residues, gap - GLYCINE_MASS);
                residues += 1;
                while chars.peek().is_some_and(|(i, _)| *i < end) {
                    chars.next();
                }
                continue;
            }
            residues += 1;
        }
        Ok(Self {
            sequence: sequence.replace('X', "G"),
            modifications,
        })
    }
}

fn scan_number(text: &str, from: usize) -> usize {
    text[from..]
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|offset| from + offset)
        .unwrap_or(text.len())
}

fn parse_delta(token: &str) -> Result<f64, UsiError> {
    token
        .parse::<f64>()
        .map_err(|_| UsiError::InvalidPeaks(format!("unreadable modification mass {token}")))
}
