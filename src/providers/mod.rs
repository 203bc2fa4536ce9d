use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UsiError;
use crate::http::{HttpClient, HttpResponse};
use crate::spectrum::ResolvedSpectrum;
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

pub mod gnps;
pub mod massbank;
pub mod massive;
pub mod ms2lda;
pub mod tinymass;
pub mod workbench;

pub use gnps::{Gnps2Fetcher, GnpsLibraryFetcher, GnpsTaskFetcher};
pub use massbank::MassBankFetcher;
pub use massive::MassiveFetcher;
pub use ms2lda::{Ms2ldaFetcher, MotifDbFetcher};
pub use tinymass::TinyMassFetcher;
pub use workbench::WorkbenchFetcher;

/// Upstream data source that can serve a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Massive,
    GnpsTask,
    GnpsLibrary,
    Gnps2,
    MassBank,
    Ms2lda,
    MotifDb,
    MetabolomicsWorkbench,
    TinyMass,
}

impl Backend {
    pub const ALL: [Backend; 9] = [
        Backend::Massive,
        Backend::GnpsTask,
        Backend::GnpsLibrary,
        Backend::Gnps2,
        Backend::MassBank,
        Backend::Ms2lda,
        Backend::MotifDb,
        Backend::MetabolomicsWorkbench,
        Backend::TinyMass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Massive => "massive",
            Backend::GnpsTask => "gnps_task",
            Backend::GnpsLibrary => "gnps_library",
            Backend::Gnps2 => "gnps2",
            Backend::MassBank => "mass_bank",
            Backend::Ms2lda => "ms2lda",
            Backend::MotifDb => "motif_db",
            Backend::MetabolomicsWorkbench => "metabolomics_workbench",
            Backend::TinyMass => "tiny_mass",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One upstream repository's retrieval logic.
///
/// Implementations validate the index flag before touching the network.
pub trait BackendFetcher: Send + Sync {
    fn backend(&self) -> Backend;
    fn fetch(&self, usi: &ParsedUsi, grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError>;
}

/// Builds one fetcher per backend, all sharing `http`.
pub fn default_fetchers(http: Arc<dyn HttpClient>) -> Vec<Box<dyn BackendFetcher>> {
    vec![
        Box::new(MassiveFetcher::new(http.clone())),
        Box::new(GnpsTaskFetcher::new(http.clone())),
        Box::new(GnpsLibraryFetcher::new(http.clone())),
        Box::new(Gnps2Fetcher::new(http.clone())),
        Box::new(MassBankFetcher::new(http.clone())),
        Box::new(Ms2ldaFetcher::new(http.clone())),
        Box::new(MotifDbFetcher::new(http.clone())),
        Box::new(WorkbenchFetcher::new(http.clone())),
        Box::new(TinyMassFetcher::new(http)),
    ]
}

pub(crate) fn require_flag(
    usi: &ParsedUsi,
    flag: IndexFlag,
    backend: &str,
) -> Result<(), UsiError> {
    if usi.index_flag() == flag {
        Ok(())
    } else {
        Err(UsiError::unsupported_flag(backend, flag.as_str()))
    }
}

/// GETs `url`; a non-2xx status is reported as `NotFound(not_found)`.
pub(crate) fn get_ok(
    http: &dyn HttpClient,
    url: &str,
    not_found: &str,
) -> Result<HttpResponse, UsiError> {
    let response = http.get(url)?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(UsiError::NotFound(not_found.to_string()))
    }
}

/// Like [`get_ok`] but also treats an undecodable body as not found.
pub(crate) fn get_json(http: &dyn HttpClient, url: &str, not_found: &str) -> Result<Value, UsiError> {
    let response = get_ok(http, url, not_found)?;
    serde_json::from_str(&response.body).map_err(|_| UsiError::NotFound(not_found.to_string()))
}
