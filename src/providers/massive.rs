use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::UsiError;
use crate::http::{HttpClient, lenient_i32, peak_pairs, url_with_params};
use crate::peptide::Peptidoform;
use crate::providers::gnps::precursor_object;
use crate::providers::{Backend, BackendFetcher, get_json, require_flag};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

const QUERY_SPECTRUM: &str = "https://massive.ucsd.edu/ProteoSAFe/QuerySpectrum";
const DOWNLOAD: &str = "https://massive.ucsd.edu/ProteoSAFe/DownloadResultFile";
const RESOLVER_TASK: &str = "4f2ac74ea114401787a7e96e143bb4a1";
const PEAK_FILE_EXTENSIONS: [&str; 3] = ["mzml", "mzxml", "mgf"];
const NOT_FOUND: &str = "unsupported/unknown USI";

/// MassIVE and ProteomeXchange datasets plus MassIVE-KB.
///
/// A lookup call lists candidate files for the identifier; each usable one is
/// tried in turn until a non-empty peak list comes back.
pub struct MassiveFetcher {
    http: Arc<dyn HttpClient>,
}

impl MassiveFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    fn peaks_url(descriptor: &str, scan: &str) -> Result<String, UsiError> {
        url_with_params(
            DOWNLOAD,
            &[
                ("task", RESOLVER_TASK),
                ("invoke", "annotatedSpectrumImageText"),
                ("block", "0"),
                ("file", &format!("FILE->{descriptor}")),
                ("scan", scan),
                ("peptide", "*..*"),
                ("force", "false"),
                ("format", "JSON"),
                ("uploadfile", "True"),
            ],
        )
    }

    /// Returns the candidate's body with its peaks, or `None` when the file
    /// holds no usable peak list.
    fn try_candidate(
        &self,
        descriptor: &str,
        scan: &str,
    ) -> Result<Option<(Value, Vec<(f64, f64)>)>, UsiError> {
        let url = Self::peaks_url(descriptor, scan)?;
        let response = self.http.get(&url)?;
        if !response.is_success() {
            debug!(descriptor, status = response.status, "candidate file rejected");
            return Ok(None);
        }
        let Ok(body) = serde_json::from_str::<Value>(&response.body) else {
            debug!(descriptor, "candidate file returned unreadable peaks");
            return Ok(None);
        };
        match body.get("peaks").and_then(peak_pairs) {
            Some(peaks) if !peaks.is_empty() => Ok(Some((body, peaks))),
            Some(_) => Ok(None),
            None => {
                debug!(descriptor, "candidate file returned malformed peaks");
                Ok(None)
            }
        }
    }
}

impl BackendFetcher for MassiveFetcher {
    fn backend(&self) -> Backend {
        Backend::Massive
    }

    fn fetch(&self, usi: &ParsedUsi, _grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        require_flag(usi, IndexFlag::Scan, "MassIVE")?;
        let scan = usi.index();

        let lookup_url = url_with_params(QUERY_SPECTRUM, &[("id", usi.input())])?;
        let lookup = get_json(self.http.as_ref(), &lookup_url, NOT_FOUND)?;
        let rows = lookup
            .get("row_data")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for descriptor in rows.iter().filter_map(candidate_descriptor) {
            let Some((body, peaks)) = self.try_candidate(descriptor, scan)? else {
                continue;
            };
            let (precursor_mz, mut charge) = precursor_object(&body);
            let peptide = lookup.get("usi_components").and_then(|components| {
                let sequence = components.get("peptide")?.as_str()?;
                let variant = components.get("variant")?.as_str()?;
                let peptide_charge = components.get("charge").and_then(lenient_i32)?;
                let decoded = Peptidoform::decode(variant, sequence)
                    .inspect_err(|err| warn!(error = %err, "ignoring undecodable peptide"))
                    .ok()?;
                charge = peptide_charge;
                Some(decoded)
            });
            let spectrum =
                Spectrum::new(usi.input(), precursor_mz, charge, peaks)?.with_peptide(peptide);
            return Ok(ResolvedSpectrum {
                spectrum,
                source_link: dataset_link(usi.collection()),
            });
        }
        Err(UsiError::NotFound(NOT_FOUND.to_string()))
    }
}

/// Returns the downloadable descriptor for a lookup row, without its `f.` prefix.
fn candidate_descriptor(row: &Value) -> Option<&str> {
    let descriptor = row.get("file_descriptor")?.as_str()?;
    let lower = descriptor.to_ascii_lowercase();
    let usable = PEAK_FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        || descriptor.starts_with("f.ProteomeCentral");
    if !usable {
        return None;
    }
    Some(descriptor.strip_prefix("f.").unwrap_or(descriptor))
}

fn dataset_link(dataset: &str) -> String {
    if dataset.to_ascii_lowercase().starts_with("pxd") {
        format!("http://proteomecentral.proteomexchange.org/cgi/GetDataset?ID={dataset}")
    } else {
        format!("https://massive.ucsd.edu/ProteoSAFe/QueryMSV?id={dataset}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn descriptors_are_filtered_and_stripped() {
        assert_eq!(
            candidate_descriptor(&json!({"file_descriptor": "f.MSV000079514/ccms_peak/run.mzXML"})),
            Some("MSV000079514/ccms_peak/run.mzXML")
        );
        assert_eq!(
            candidate_descriptor(&json!({"file_descriptor": "f.ProteomeCentral/PXD000561/run"})),
            Some("ProteomeCentral/PXD000561/run")
        );
        assert_eq!(
            candidate_descriptor(&json!({"file_descriptor": "f.MSV000079514/raw/run.raw"})),
            None
        );
    }

    #[test]
    fn proteomexchange_datasets_link_to_proteomecentral() {
        assert!(dataset_link("PXD000561").starts_with("http://proteomecentral"));
        assert!(dataset_link("MSV000079514").starts_with("https://massive.ucsd.edu"));
    }
}
