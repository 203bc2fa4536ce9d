use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::ResolutionCache;
use crate::config::ResolverConfig;
use crate::coordinator::{Dispatcher, TaskCoordinator, WorkerPool};
use crate::error::UsiError;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::labels::{PrepareOptions, label_peaks, prepare_spectrum};
use crate::legacy::LegacyDialect;
use crate::providers::Backend;
use crate::resolver::Resolver;
use crate::similarity::{SimilarityParams, SimilarityResult, cosine};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub usi: String,
    pub canonical: String,
    pub collection: String,
    pub backend: Backend,
    pub run: String,
    pub index_flag: IndexFlag,
    pub index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_dialect: Option<LegacyDialect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub usi1: String,
    pub usi2: String,
    pub params: SimilarityParams,
    pub similarity: SimilarityResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeakLabel {
    pub index: usize,
    pub mz: f64,
    pub intensity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelsResult {
    pub usi: String,
    pub labels: Vec<PeakLabel>,
}

pub struct App {
    resolver: Arc<Resolver>,
    coordinator: TaskCoordinator,
    pool: Option<Arc<WorkerPool>>,
}

impl App {
    pub fn new(
        resolver: Arc<Resolver>,
        coordinator: TaskCoordinator,
        pool: Option<Arc<WorkerPool>>,
    ) -> Self {
        Self {
            resolver,
            coordinator,
            pool,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, UsiError> {
        let http = ReqwestHttpClient::with_settings(
            config.http_timeout,
            config.user_agent.as_deref(),
        )?;
        Self::with_http(config, Arc::new(http))
    }

    /// Builds the service over an arbitrary transport.
    pub fn with_http(config: &ResolverConfig, http: Arc<dyn HttpClient>) -> Result<Self, UsiError> {
        let grammar = Arc::new(Grammar::new()?);
        let resolver = Resolver::with_http(grammar, http, config.backends.as_ref());
        let cache = Arc::new(ResolutionCache::open(config.cache_dir.clone())?);
        let pool = match config.workers {
            0 => None,
            size => Some(Arc::new(WorkerPool::new(size)?)),
        };
        let dispatcher = pool
            .as_ref()
            .map(|pool| Arc::clone(pool) as Arc<dyn Dispatcher>);
        let coordinator = TaskCoordinator::new(cache, dispatcher, config.task_time_limit);
        debug!(
            cache = %config.cache_dir,
            workers = config.workers,
            "service ready"
        );
        Ok(Self::new(Arc::new(resolver), coordinator, pool))
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn coordinator(&self) -> &TaskCoordinator {
        &self.coordinator
    }

    pub fn parse(&self, usi: &str) -> Result<ParseResult, UsiError> {
        let grammar = self.resolver.grammar();
        let parsed = grammar.parse(usi)?;
        Ok(ParseResult {
            usi: usi.to_string(),
            canonical: parsed.canonical(),
            collection: parsed.collection().to_string(),
            backend: self.resolver.backend_for(&parsed),
            run: parsed.run().to_string(),
            index_flag: parsed.index_flag(),
            index: parsed.index().to_string(),
            interpretation: parsed.interpretation().map(str::to_string),
            legacy_dialect: grammar.legacy().dialect(usi),
        })
    }

    /// Resolves `usi`, computing it at most once per cache.
    pub fn spectrum(&self, usi: &str) -> Result<ResolvedSpectrum, UsiError> {
        let parsed = self.resolver.grammar().parse(usi)?;
        self.spectrum_parsed(parsed)
    }

    /// A USI when one is given, otherwise an inline PROXI peak object.
    pub fn spectrum_or_peaks(
        &self,
        usi: Option<&str>,
        peaks: Option<&Value>,
    ) -> Result<ResolvedSpectrum, UsiError> {
        match (usi, peaks) {
            (Some(usi), _) => self.spectrum(usi),
            (None, Some(peaks)) => Spectrum::from_proxi(peaks),
            (None, None) => Err(UsiError::InvalidPeaks(
                "neither a USI nor peaks were supplied".to_string(),
            )),
        }
    }

    pub fn compare(
        &self,
        usi1: &str,
        usi2: &str,
        params: SimilarityParams,
    ) -> Result<ComparisonResult, UsiError> {
        let first = self.spectrum(usi1)?.spectrum;
        let second = self.spectrum(usi2)?.spectrum;
        let key = similarity_key(usi1, usi2, &params)?;
        let (usi1, usi2) = (usi1.to_string(), usi2.to_string());
        let result = self.coordinator.get_or_compute(&key, move || {
            let similarity = cosine(
                &first,
                &second,
                params.fragment_mz_tolerance,
                params.allow_shift,
            );
            Ok(ComparisonResult {
                usi1,
                usi2,
                params,
                similarity,
            })
        })?;
        info!(
            score = result.similarity.score,
            matches = result.similarity.matches.len(),
            "compared spectra"
        );
        Ok(result)
    }

    /// Resolved spectrum restricted, scaled and labelled for display.
    pub fn prepared(
        &self,
        usi: &str,
        options: &PrepareOptions,
    ) -> Result<ResolvedSpectrum, UsiError> {
        let resolved = self.spectrum(usi)?;
        Ok(ResolvedSpectrum {
            spectrum: prepare_spectrum(&resolved.spectrum, options),
            source_link: resolved.source_link,
        })
    }

    pub fn labels(
        &self,
        usi: &str,
        threshold: f64,
        max_labels: usize,
    ) -> Result<LabelsResult, UsiError> {
        let spectrum = self.spectrum(usi)?.spectrum;
        let labels = label_peaks(&spectrum, threshold, max_labels)
            .into_iter()
            .map(|index| PeakLabel {
                index,
                mz: spectrum.mz()[index],
                intensity: spectrum.intensity()[index],
            })
            .collect();
        Ok(LabelsResult {
            usi: usi.to_string(),
            labels,
        })
    }

    /// Stops the worker pool after in-progress jobs finish.
    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }

    fn spectrum_parsed(&self, parsed: ParsedUsi) -> Result<ResolvedSpectrum, UsiError> {
        let resolver = Arc::clone(&self.resolver);
        let key = parsed.input().to_string();
        self.coordinator
            .get_or_compute(&key, move || resolver.resolve_parsed(&parsed))
    }
}

/// Cache key of a pairwise comparison; distinct from any USI key.
pub fn similarity_key(
    usi1: &str,
    usi2: &str,
    params: &SimilarityParams,
) -> Result<String, UsiError> {
    serde_json::to_string(&(
        "similarity",
        usi1,
        usi2,
        params.fragment_mz_tolerance,
        params.allow_shift,
    ))
    .map_err(|err| UsiError::Cache(err.to_string()))
}
