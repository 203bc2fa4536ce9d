use std::sync::Arc;

use crate::error::UsiError;
use crate::http::{HttpClient, lenient_f64, peak_pairs, url_with_params};
use crate::providers::{Backend, BackendFetcher, get_json, require_flag};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

const MS2LDA_SERVER: &str = "http://ms2lda.org/basicviz/";
const MOTIFDB_SERVER: &str = "http://ms2lda.org/motifdb/";

/// Documents of an MS2LDA topic-modelling experiment.
pub struct Ms2ldaFetcher {
    http: Arc<dyn HttpClient>,
}

impl Ms2ldaFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for Ms2ldaFetcher {
    fn backend(&self) -> Backend {
        Backend::Ms2lda
    }

    fn fetch(&self, usi: &ParsedUsi, grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        let experiment = grammar
            .ms2lda_experiment(usi.run())
            .ok_or_else(|| UsiError::MalformedUsi("incorrectly formatted MS2LDA task".to_string()))?;
        require_flag(usi, IndexFlag::Accession, "MS2LDA")?;
        let document = usi.index();

        let url = url_with_params(
            &format!("{MS2LDA_SERVER}get_doc/"),
            &[("experiment_id", experiment), ("document_id", document)],
        )?;
        let body = get_json(self.http.as_ref(), &url, "unknown MS2LDA USI")?;
        if let Some(error) = body.get("error") {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(UsiError::NotFound(format!("MS2LDA error: {message}")));
        }
        let peaks = body
            .get("peaks")
            .and_then(peak_pairs)
            .ok_or_else(|| UsiError::NotFound("unknown MS2LDA USI".to_string()))?;
        let precursor_mz = body.get("precursor_mz").and_then(lenient_f64).unwrap_or(0.0);
        let spectrum = Spectrum::new(usi.input(), precursor_mz, 0, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!("http://ms2lda.org/basicviz/show_doc/{document}/"),
        })
    }
}

/// Mass2Motif fragment patterns from MotifDB. Motifs have no precursor.
pub struct MotifDbFetcher {
    http: Arc<dyn HttpClient>,
}

impl MotifDbFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for MotifDbFetcher {
    fn backend(&self) -> Backend {
        Backend::MotifDb
    }

    fn fetch(&self, usi: &ParsedUsi, _grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        require_flag(usi, IndexFlag::Accession, "MOTIFDB")?;
        let motif = usi.index();

        let url = format!("{MOTIFDB_SERVER}get_motif/{motif}");
        let body = get_json(self.http.as_ref(), &url, "unknown MOTIFDB USI")?;
        let peaks = peak_pairs(&body)
            .ok_or_else(|| UsiError::NotFound("unknown MOTIFDB USI".to_string()))?;
        let spectrum = Spectrum::new(usi.input(), 0.0, 0, peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!("http://ms2lda.org/motifdb/motif/{motif}/"),
        })
    }
}
