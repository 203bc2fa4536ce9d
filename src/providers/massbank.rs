use std::sync::Arc;

use serde_json::Value;

use crate::error::UsiError;
use crate::http::{HttpClient, lenient_f64};
use crate::providers::{Backend, BackendFetcher, get_json, require_flag};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

const MASSBANK_SERVER: &str = "https://massbank.us/rest/spectra/";
const NOT_FOUND: &str = "unknown MassBank USI";

pub struct MassBankFetcher {
    http: Arc<dyn HttpClient>,
}

impl MassBankFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for MassBankFetcher {
    fn backend(&self) -> Backend {
        Backend::MassBank
    }

    fn fetch(&self, usi: &ParsedUsi, grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        require_flag(usi, IndexFlag::Accession, "MassBank")?;
        let accession = grammar.massbank_accession(usi.index());

        let url = format!("{MASSBANK_SERVER}{accession}");
        let body = get_json(self.http.as_ref(), &url, NOT_FOUND)?;
        let peaks = body
            .get("spectrum")
            .and_then(|v| v.as_str())
            .ok_or_else(|| UsiError::NotFound(NOT_FOUND.to_string()))
            .and_then(parse_peak_text)?;
        let spectrum = Spectrum::new(usi.input(), precursor_mz(&body), 0, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!("https://massbank.eu/MassBank/RecordDisplay.jsp?id={accession}"),
        })
    }
}

/// Parses the `mz:intensity mz:intensity ...` record format.
pub fn parse_peak_text(text: &str) -> Result<Vec<(f64, f64)>, UsiError> {
    text.split_whitespace()
        .map(|peak| {
            let (mz, intensity) = peak
                .split_once(':')
                .ok_or_else(|| UsiError::Upstream(format!("malformed MassBank peak {peak}")))?;
            let parse = |value: &str| {
                value
                    .parse::<f64>()
                    .map_err(|_| UsiError::Upstream(format!("malformed MassBank peak {peak}")))
            };
            Ok((parse(mz)?, parse(intensity)?))
        })
        .collect()
}

fn precursor_mz(body: &Value) -> f64 {
    body.get("metaData")
        .and_then(|v| v.as_array())
        .and_then(|items| {
            items
                .iter()
                .find(|item| item.get("name").and_then(|v| v.as_str()) == Some("precursor m/z"))
        })
        .and_then(|item| item.get("value"))
        .and_then(lenient_f64)
        .unwrap_or(0.0)
}
