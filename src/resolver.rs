use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::UsiError;
use crate::http::HttpClient;
use crate::providers::{Backend, BackendFetcher, default_fetchers};
use crate::spectrum::ResolvedSpectrum;
use crate::usi::{CollectionTag, Grammar, ParsedUsi};

/// Routes parsed identifiers to the fetcher for their repository.
pub struct Resolver {
    grammar: Arc<Grammar>,
    fetchers: HashMap<Backend, Box<dyn BackendFetcher>>,
}

impl Resolver {
    pub fn new(grammar: Arc<Grammar>, fetchers: Vec<Box<dyn BackendFetcher>>) -> Self {
        let fetchers = fetchers
            .into_iter()
            .map(|fetcher| (fetcher.backend(), fetcher))
            .collect();
        Self { grammar, fetchers }
    }

    /// Every backend served over `http`, optionally limited to `enabled`.
    pub fn with_http(
        grammar: Arc<Grammar>,
        http: Arc<dyn HttpClient>,
        enabled: Option<&BTreeSet<Backend>>,
    ) -> Self {
        let fetchers = default_fetchers(http)
            .into_iter()
            .filter(|fetcher| enabled.is_none_or(|set| set.contains(&fetcher.backend())))
            .collect();
        Self::new(grammar, fetchers)
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Picks the backend for an identifier.
    ///
    /// Anything carrying an interpretation is a proteomics spectrum and goes
    /// to MassIVE regardless of its collection.
    pub fn backend_for(&self, usi: &ParsedUsi) -> Backend {
        if usi.interpretation().is_some() || usi.tag().is_proteomics() {
            return Backend::Massive;
        }
        match usi.tag() {
            CollectionTag::Gnps => {
                if usi.run().to_ascii_lowercase().starts_with("task") {
                    Backend::GnpsTask
                } else {
                    Backend::GnpsLibrary
                }
            }
            CollectionTag::Gnps2 => Backend::Gnps2,
            CollectionTag::MassBank => Backend::MassBank,
            CollectionTag::Ms2lda => Backend::Ms2lda,
            CollectionTag::MotifDb => Backend::MotifDb,
            CollectionTag::MetabolomicsWorkbench => Backend::MetabolomicsWorkbench,
            CollectionTag::TinyMass => Backend::TinyMass,
            CollectionTag::Msv
            | CollectionTag::Pxd
            | CollectionTag::Pxl
            | CollectionTag::Rpxd
            | CollectionTag::Massive
            | CollectionTag::MassiveKb => Backend::Massive,
        }
    }

    pub fn resolve_parsed(&self, usi: &ParsedUsi) -> Result<ResolvedSpectrum, UsiError> {
        let backend = self.backend_for(usi);
        let fetcher = self
            .fetchers
            .get(&backend)
            .ok_or_else(|| UsiError::UnknownCollection(usi.collection().to_string()))?;
        debug!(usi = usi.input(), %backend, "dispatching");
        let resolved = fetcher.fetch(usi, &self.grammar)?;
        info!(
            usi = usi.input(),
            %backend,
            peaks = resolved.spectrum.len(),
            "resolved spectrum"
        );
        Ok(resolved)
    }

    pub fn resolve(&self, usi: &str) -> Result<ResolvedSpectrum, UsiError> {
        let parsed = self.grammar.parse(usi)?;
        self.resolve_parsed(&parsed)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::providers::mock::MockHttp;

    fn resolver(enabled: Option<&BTreeSet<Backend>>) -> Resolver {
        let grammar = Arc::new(Grammar::new().unwrap());
        Resolver::with_http(grammar, Arc::new(MockHttp::default()), enabled)
    }

    #[test]
    fn dispatch_follows_collection_and_run() {
        let resolver = resolver(None);
        let cases = [
            ("mzspec:PXD000561:run:scan:17555", Backend::Massive),
            ("mzspec:MASSIVEKB:run:scan:1", Backend::Massive),
            (
                "mzspec:GNPS:TASK-c95481f0c53d42e78a61bf899e9f9adb-spectra/specs_ms.mgf:scan:1943",
                Backend::GnpsTask,
            ),
            ("mzspec:GNPS:GNPS-LIBRARY:accession:CCMSLIB00005436077", Backend::GnpsLibrary),
            ("mzspec:MASSBANK::accession:SM858102", Backend::MassBank),
            ("mzspec:MOTIFDB::accession:171163", Backend::MotifDb),
            ("mzspec:ST000001:run.mzML:scan:10", Backend::MetabolomicsWorkbench),
            ("mzspec:GNPS:GNPS-LIBRARY:scan:1:PEPTIDE/2", Backend::Massive),
        ];
        for (usi, expected) in cases {
            let parsed = resolver.grammar().parse(usi).unwrap();
            assert_eq!(resolver.backend_for(&parsed), expected, "{usi}");
        }
    }

    #[test]
    fn disabled_backend_is_unknown_collection() {
        let enabled = BTreeSet::from([Backend::Massive]);
        let resolver = resolver(Some(&enabled));
        let err = resolver.resolve("mzspec:MASSBANK::accession:SM858102").unwrap_err();
        assert_matches!(err, UsiError::UnknownCollection(_));
    }
}
