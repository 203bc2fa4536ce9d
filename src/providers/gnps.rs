use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::debug;

use crate::error::UsiError;
use crate::http::{HttpClient, lenient_f64, lenient_i32, peak_pairs, url_with_params};
use crate::providers::{Backend, BackendFetcher, get_json, require_flag};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

const GNPS_DOWNLOAD: &str = "https://gnps.ucsd.edu/ProteoSAFe/DownloadResultFile";
const GNPS_LIBRARY: &str = "https://external.gnps2.org/gnpsspectrum";
const GNPS2_PEAKS: &str = "https://gnps2.org/spectrumpeaks";
const ANNOTATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Spectra clustered by a GNPS molecular-networking task.
pub struct GnpsTaskFetcher {
    http: Arc<dyn HttpClient>,
}

impl GnpsTaskFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    fn peaks_url(task: &str, filename: &str, scan: &str) -> Result<String, UsiError> {
        url_with_params(
            GNPS_DOWNLOAD,
            &[
                ("task", task),
                ("invoke", "annotatedSpectrumImageText"),
                ("block", "0"),
                ("file", &format!("FILE->{filename}")),
                ("scan", scan),
                ("peptide", "*..*"),
                ("force", "false"),
                ("_", "1561457932129"),
                ("format", "JSON"),
            ],
        )
    }
}

impl BackendFetcher for GnpsTaskFetcher {
    fn backend(&self) -> Backend {
        Backend::GnpsTask
    }

    fn fetch(&self, usi: &ParsedUsi, grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        let (task, filename) = grammar
            .gnps_task(usi.run())
            .ok_or_else(|| UsiError::MalformedUsi("incorrectly formatted GNPS task".to_string()))?;
        require_flag(usi, IndexFlag::Scan, "GNPS TASK")?;

        let url = Self::peaks_url(task, filename, usi.index())?;
        let body = get_json(self.http.as_ref(), &url, "unknown GNPS task USI")?;
        let peaks = body
            .get("peaks")
            .and_then(peak_pairs)
            .ok_or_else(|| UsiError::NotFound("unknown GNPS task USI".to_string()))?;
        let (precursor_mz, charge) = precursor_object(&body);
        let spectrum = Spectrum::new(usi.input(), precursor_mz, charge, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!("https://gnps.ucsd.edu/ProteoSAFe/status.jsp?task={task}"),
        })
    }
}

/// GNPS spectral library entries, addressed by `CCMSLIB` accession.
pub struct GnpsLibraryFetcher {
    http: Arc<dyn HttpClient>,
}

impl GnpsLibraryFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for GnpsLibraryFetcher {
    fn backend(&self) -> Backend {
        Backend::GnpsLibrary
    }

    fn fetch(&self, usi: &ParsedUsi, _grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        require_flag(usi, IndexFlag::Accession, "GNPS library")?;
        let accession = usi.index();
        let not_found = || UsiError::NotFound("unknown GNPS library USI".to_string());

        let url = url_with_params(GNPS_LIBRARY, &[("SpectrumID", accession)])?;
        let body = get_json(self.http.as_ref(), &url, "unknown GNPS library USI")?;
        let peaks_json = body
            .get("spectruminfo")
            .and_then(|v| v.get("peaks_json"))
            .and_then(|v| v.as_str())
            .filter(|text| *text != "null")
            .ok_or_else(not_found)?;
        let peaks: Value = serde_json::from_str(peaks_json).map_err(|_| not_found())?;
        let peaks = peak_pairs(&peaks).ok_or_else(not_found)?;

        let (precursor_mz, charge) = latest_annotation(&body)
            .map(|annotation| {
                (
                    annotation.get("Precursor_MZ").and_then(lenient_f64).unwrap_or(0.0),
                    annotation.get("Charge").and_then(lenient_i32).unwrap_or(0),
                )
            })
            .unwrap_or((0.0, 0));
        let spectrum = Spectrum::new(usi.input(), precursor_mz, charge, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!(
                "https://gnps.ucsd.edu/ProteoSAFe/gnpslibraryspectrum.jsp?SpectrumID={accession}"
            ),
        })
    }
}

/// The most recently created library annotation.
fn latest_annotation(body: &Value) -> Option<&Value> {
    body.get("annotations")?
        .as_array()?
        .iter()
        .filter_map(|annotation| {
            let created = annotation.get("create_time")?.as_str()?;
            let created = NaiveDateTime::parse_from_str(created, ANNOTATION_TIME_FORMAT).ok()?;
            Some((created, annotation))
        })
        .max_by_key(|(created, _)| *created)
        .map(|(_, annotation)| annotation)
}

/// Spectra from GNPS2 task results.
pub struct Gnps2Fetcher {
    http: Arc<dyn HttpClient>,
}

impl Gnps2Fetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for Gnps2Fetcher {
    fn backend(&self) -> Backend {
        Backend::Gnps2
    }

    fn fetch(&self, usi: &ParsedUsi, grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        let (task, _) = grammar
            .gnps_task(usi.run())
            .ok_or_else(|| UsiError::MalformedUsi("incorrectly formatted GNPS2 task".to_string()))?;
        require_flag(usi, IndexFlag::Scan, "GNPS2 TASK")?;

        let url = url_with_params(GNPS2_PEAKS, &[("format", "json"), ("usi", usi.input())])?;
        debug!(task, "requesting GNPS2 peaks");
        let body = get_json(self.http.as_ref(), &url, "unknown GNPS2 task USI")?;
        let peaks = body
            .get("peaks")
            .and_then(peak_pairs)
            .ok_or_else(|| UsiError::NotFound("unknown GNPS2 task USI".to_string()))?;
        let precursor_mz = body.get("precursor_mz").and_then(lenient_f64).unwrap_or(0.0);
        let spectrum = Spectrum::new(usi.input(), precursor_mz, 0, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!("https://gnps2.org/status?task={task}"),
        })
    }
}

/// Reads `{"precursor": {"mz": .., "charge": ..}}`, defaulting to zeros.
pub(crate) fn precursor_object(body: &Value) -> (f64, i32) {
    let Some(precursor) = body.get("precursor") else {
        return (0.0, 0);
    };
    (
        precursor.get("mz").and_then(lenient_f64).unwrap_or(0.0),
        precursor.get("charge").and_then(lenient_i32).unwrap_or(0),
    )
}
