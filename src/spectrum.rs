use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UsiError;
use crate::http::{lenient_f64, lenient_i32};
use crate::peptide::Peptidoform;

pub const PEAK_INPUT: &str = "Peak Input";

/// A fragmentation spectrum with peaks held in ascending m/z order.
///
/// The three peak vectors always have the same length. Values returned by the
/// resolver are never mutated; the `restricted`/`scaled`/`annotated` helpers
/// each return a new spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub identifier: String,
    pub precursor_mz: f64,
    pub precursor_charge: i32,
    mz: Vec<f64>,
    intensity: Vec<f64>,
    annotation: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peptide: Option<Peptidoform>,
}

impl Spectrum {
    /// Builds a spectrum from unordered `(mz, intensity)` pairs.
    ///
    /// An empty peak list means the upstream record has no spectrum.
    pub fn new(
        identifier: impl Into<String>,
        precursor_mz: f64,
        precursor_charge: i32,
        mut peaks: Vec<(f64, f64)>,
    ) -> Result<Self, UsiError> {
        let identifier = identifier.into();
        if peaks.is_empty() {
            return Err(UsiError::NotFound(format!("no peaks found for {identifier}")));
        }
        peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (mz, intensity): (Vec<f64>, Vec<f64>) = peaks.into_iter().unzip();
        let annotation = vec![None; mz.len()];
        Ok(Self {
            identifier,
            precursor_mz,
            precursor_charge,
            mz,
            intensity,
            annotation,
            peptide: None,
        })
    }

    pub fn with_peptide(mut self, peptide: Option<Peptidoform>) -> Self {
        self.peptide = peptide;
        self
    }

    /// Builds a spectrum from a PROXI peak object supplied inline by a caller.
    pub fn from_proxi(value: &Value) -> Result<ResolvedSpectrum, UsiError> {
        let mzs = number_list(value, "mzs")?;
        let intensities = number_list(value, "intensities")?;
        if mzs.len() != intensities.len() {
            return Err(UsiError::InvalidPeaks(format!(
                "{} m/z values but {} intensities",
                mzs.len(),
                intensities.len()
            )));
        }
        if mzs.is_empty() {
            return Err(UsiError::InvalidPeaks("no peaks supplied".to_string()));
        }

        let mut precursor_mz = 0.0;
        let mut charge = 0;
        let mut notation = None;
        let mut sequence = None;
        if let Some(attributes) = value.get("attributes").and_then(|v| v.as_array()) {
            for attribute in attributes {
                let accession = attribute.get("accession").and_then(|v| v.as_str());
                let Some(raw) = attribute.get("value") else {
                    continue;
                };
                match accession {
                    // isolation window target m/z, selected ion m/z
                    Some("MS:1000827") | Some("MS:1000744") => {
                        precursor_mz = lenient_f64(raw).ok_or_else(|| {
                            UsiError::InvalidPeaks("unreadable precursor m/z".to_string())
                        })?;
                    }
                    Some("MS:1000041") => {
                        charge = lenient_i32(raw).ok_or_else(|| {
                            UsiError::InvalidPeaks("unreadable charge state".to_string())
                        })?;
                    }
                    Some("MS:1003049") => notation = raw.as_str().map(str::to_string),
                    Some("MS:1000888") => sequence = raw.as_str().map(str::to_string),
                    _ => {}
                }
            }
        }

        let peptide = match (notation, sequence) {
            (Some(notation), Some(sequence)) => Peptidoform::decode(&notation, &sequence).ok(),
            _ => None,
        };
        let identifier = value
            .get("usi")
            .and_then(|v| v.as_str())
            .unwrap_or(PEAK_INPUT);
        let peaks = mzs.into_iter().zip(intensities).collect();
        let spectrum = Spectrum::new(identifier, precursor_mz, charge, peaks)?.with_peptide(peptide);
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: PEAK_INPUT.to_string(),
        })
    }

    pub fn mz(&self) -> &[f64] {
        &self.mz
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn annotation(&self) -> &[Option<String>] {
        &self.annotation
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// Copy holding only the peaks with `min_mz <= mz <= max_mz`.
    pub fn restricted(&self, min_mz: Option<f64>, max_mz: Option<f64>) -> Spectrum {
        let lower = min_mz.unwrap_or(f64::NEG_INFINITY);
        let upper = max_mz.unwrap_or(f64::INFINITY);
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| self.mz[i] >= lower && self.mz[i] <= upper)
            .collect();
        Spectrum {
            mz: keep.iter().map(|&i| self.mz[i]).collect(),
            intensity: keep.iter().map(|&i| self.intensity[i]).collect(),
            annotation: keep.iter().map(|&i| self.annotation[i].clone()).collect(),
            ..self.clone_header()
        }
    }

    /// Copy with intensities divided by the base peak so the maximum is 1.
    pub fn scaled(&self) -> Spectrum {
        let max = self.intensity.iter().copied().fold(0.0_f64, f64::max);
        let intensity = if max > 0.0 {
            self.intensity.iter().map(|value| value / max).collect()
        } else {
            self.intensity.clone()
        };
        Spectrum {
            mz: self.mz.clone(),
            intensity,
            annotation: self.annotation.clone(),
            ..self.clone_header()
        }
    }

    /// Copy with the given peak labels set. Out-of-range indices are ignored.
    pub fn annotated(&self, labels: &[(usize, String)]) -> Spectrum {
        let mut annotation = self.annotation.clone();
        for (index, label) in labels {
            if let Some(slot) = annotation.get_mut(*index) {
                *slot = Some(label.clone());
            }
        }
        Spectrum {
            mz: self.mz.clone(),
            intensity: self.intensity.clone(),
            annotation,
            ..self.clone_header()
        }
    }

    fn clone_header(&self) -> Spectrum {
        Spectrum {
            identifier: self.identifier.clone(),
            precursor_mz: self.precursor_mz,
            precursor_charge: self.precursor_charge,
            mz: Vec::new(),
            intensity: Vec::new(),
            annotation: Vec::new(),
            peptide: self.peptide.clone(),
        }
    }
}

/// A spectrum together with the human-facing page of its source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSpectrum {
    pub spectrum: Spectrum,
    pub source_link: String,
}

fn number_list(value: &Value, field: &str) -> Result<Vec<f64>, UsiError> {
    value
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| UsiError::InvalidPeaks(format!("missing {field} array")))?
        .iter()
        .map(|item| {
            lenient_f64(item)
                .ok_or_else(|| UsiError::InvalidPeaks(format!("non-numeric entry in {field}")))
        })
        .collect()
}
