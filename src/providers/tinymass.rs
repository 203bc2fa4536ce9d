use std::sync::Arc;

use crate::error::UsiError;
use crate::http::{HttpClient, lenient_f64, peak_pairs, url_with_params};
use crate::providers::{Backend, BackendFetcher, get_json};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, ParsedUsi};

const TINYMASS_RESOLVE: &str = "https://tinymass.gnps2.org/resolve";

/// TinyMass resolves the whole identifier itself, so any index flag is passed through.
pub struct TinyMassFetcher {
    http: Arc<dyn HttpClient>,
}

impl TinyMassFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for TinyMassFetcher {
    fn backend(&self) -> Backend {
        Backend::TinyMass
    }

    fn fetch(&self, usi: &ParsedUsi, _grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        let url = url_with_params(TINYMASS_RESOLVE, &[("usi", usi.input())])?;
        let body = get_json(self.http.as_ref(), &url, "unknown TinyMass USI")?;
        let peaks = body
            .get("peaks")
            .and_then(peak_pairs)
            .ok_or_else(|| UsiError::NotFound("unknown TinyMass USI".to_string()))?;
        let precursor_mz = body.get("precursor").and_then(lenient_f64).unwrap_or(0.0);
        let spectrum = Spectrum::new(usi.input(), precursor_mz, 0, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: url,
        })
    }
}
