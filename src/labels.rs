use serde::{Deserialize, Serialize};

use crate::spectrum::Spectrum;

pub const DEFAULT_LABEL_THRESHOLD: f64 = 0.05;
pub const DEFAULT_MAX_LABELS: usize = 20;
pub const DEFAULT_PRECISION: usize = 4;
/// Match window for caller-supplied label positions, in Da.
pub const EXPLICIT_LABEL_TOLERANCE: f64 = 0.01;

/// Picks the peaks worth labelling, in ascending m/z order.
///
/// Peaks are visited from most to least intense (relative to the base peak)
/// until one falls below `intensity_threshold`. A peak is kept only when it
/// lies farther than `(max_mz - min_mz) / max_labels` from every peak already
/// kept.
pub fn label_peaks(spectrum: &Spectrum, intensity_threshold: f64, max_labels: usize) -> Vec<usize> {
    let mz = spectrum.mz();
    let intensity = spectrum.intensity();
    let (Some(first), Some(last)) = (mz.first(), mz.last()) else {
        return Vec::new();
    };
    if max_labels == 0 {
        return Vec::new();
    }
    let base = intensity.iter().copied().fold(0.0_f64, f64::max);
    if base <= 0.0 {
        return Vec::new();
    }
    let window = (last - first) / max_labels as f64;

    let mut order: Vec<usize> = (0..mz.len()).collect();
    order.sort_by(|&x, &y| intensity[y].total_cmp(&intensity[x]));

    let mut selected: Vec<usize> = Vec::new();
    for index in order {
        if intensity[index] / base < intensity_threshold {
            break;
        }
        if selected
            .iter()
            .all(|&kept| (mz[kept] - mz[index]).abs() > window)
        {
            selected.push(index);
        }
    }
    selected.sort_unstable();
    selected
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotate {
    None,
    Auto,
    /// Label the peak closest to each m/z, if within `EXPLICIT_LABEL_TOLERANCE`.
    Mz(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareOptions {
    pub mz_min: Option<f64>,
    pub mz_max: Option<f64>,
    pub annotate: Annotate,
    pub precision: usize,
    pub threshold: f64,
    pub max_labels: usize,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            mz_min: None,
            mz_max: None,
            annotate: Annotate::Auto,
            precision: DEFAULT_PRECISION,
            threshold: DEFAULT_LABEL_THRESHOLD,
            max_labels: DEFAULT_MAX_LABELS,
        }
    }
}

/// Restricts, scales and labels a copy of `spectrum` for display.
pub fn prepare_spectrum(spectrum: &Spectrum, options: &PrepareOptions) -> Spectrum {
    let prepared = spectrum.restricted(options.mz_min, options.mz_max).scaled();
    let indices = match &options.annotate {
        Annotate::None => Vec::new(),
        Annotate::Auto => label_peaks(&prepared, options.threshold, options.max_labels),
        Annotate::Mz(targets) => targets
            .iter()
            .filter_map(|target| closest_peak(prepared.mz(), *target))
            .collect(),
    };
    let labels: Vec<(usize, String)> = indices
        .into_iter()
        .map(|i| (i, format!("{:.*}", options.precision, prepared.mz()[i])))
        .collect();
    prepared.annotated(&labels)
}

fn closest_peak(mz: &[f64], target: f64) -> Option<usize> {
    mz.iter()
        .enumerate()
        .map(|(i, value)| (i, (value - target).abs()))
        .filter(|(_, distance)| *distance <= EXPLICIT_LABEL_TOLERANCE)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(peaks: &[(f64, f64)]) -> Spectrum {
        Spectrum::new("test", 0.0, 0, peaks.to_vec()).unwrap()
    }

    #[test]
    fn nearby_weaker_peaks_are_suppressed() {
        // window = (200 - 100) / 20 = 5
        let s = spectrum(&[(100.0, 10.0), (102.0, 90.0), (150.0, 50.0), (200.0, 100.0)]);
        assert_eq!(label_peaks(&s, 0.05, 20), vec![1, 2, 3]);
    }

    #[test]
    fn weak_peaks_stop_the_scan() {
        let s = spectrum(&[(100.0, 1.0), (150.0, 100.0), (200.0, 4.0)]);
        assert_eq!(label_peaks(&s, 0.05, 20), vec![1]);
    }

    #[test]
    fn explicit_labels_use_precision() {
        let s = spectrum(&[(100.0, 10.0), (150.12345, 20.0)]);
        let options = PrepareOptions {
            annotate: Annotate::Mz(vec![150.13, 170.0]),
            precision: 2,
            ..PrepareOptions::default()
        };
        let prepared = prepare_spectrum(&s, &options);
        assert_eq!(prepared.annotation(), &[None, Some("150.12".to_string())]);
        assert_eq!(prepared.intensity(), &[0.5, 1.0]);
        assert!(s.annotation().iter().all(Option::is_none));
    }
}
