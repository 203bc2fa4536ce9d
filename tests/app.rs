use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;

use usi_resolver::app::App;
use usi_resolver::config::ResolverConfig;
use usi_resolver::error::UsiError;
use usi_resolver::http::{HttpClient, HttpResponse};
use usi_resolver::providers::Backend;
use usi_resolver::similarity::{CosineMode, SimilarityParams};

const BSU00002: &str = "mzspec:MASSBANK::accession:BSU00002";
const SM858102: &str = "mzspec:MASSBANK::accession:SM858102";

/// MassBank stand-in that fails its first `failures` requests.
#[derive(Default)]
struct MockMassBank {
    calls: Mutex<usize>,
    failures: usize,
}

impl HttpClient for MockMassBank {
    fn get(&self, url: &str) -> Result<HttpResponse, UsiError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls <= self.failures {
            return Err(UsiError::Upstream("connection reset".to_string()));
        }
        let spectrum = if url.ends_with("BSU00002") {
            "77.0386:120 105.0335:999 133.0648:310"
        } else {
            "105.0335:500 133.0648:100 150.0913:250"
        };
        Ok(HttpResponse {
            status: 200,
            body: json!({
                "spectrum": spectrum,
                "metaData": [{"name": "precursor m/z", "value": "151.0"}]
            })
            .to_string(),
        })
    }
}

fn config(temp: &tempfile::TempDir) -> ResolverConfig {
    ResolverConfig {
        cache_dir: Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap(),
        http_timeout: Duration::from_secs(5),
        task_time_limit: Duration::from_secs(10),
        workers: 2,
        backends: None,
        user_agent: None,
    }
}

#[test]
fn comparisons_reuse_resolved_spectra() {
    let temp = tempfile::tempdir().unwrap();
    let upstream = Arc::new(MockMassBank::default());
    let app = App::with_http(&config(&temp), upstream.clone()).unwrap();
    let params = SimilarityParams::new(0.02, CosineMode::Standard);

    let forward = app.compare(BSU00002, SM858102, params).unwrap();
    let backward = app.compare(SM858102, BSU00002, params).unwrap();
    let again = app.compare(BSU00002, SM858102, params).unwrap();

    assert_eq!(*upstream.calls.lock().unwrap(), 2);
    assert!((forward.similarity.score - backward.similarity.score).abs() < 1e-9);
    assert_eq!(forward.similarity, again.similarity);
    assert_eq!(forward.similarity.matches.len(), 2);
    app.shutdown();
}

#[test]
fn self_comparison_matches_every_peak() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::with_http(&config(&temp), Arc::new(MockMassBank::default())).unwrap();
    let result = app
        .compare(BSU00002, BSU00002, SimilarityParams::default())
        .unwrap();
    let spectrum = app.spectrum(BSU00002).unwrap().spectrum;
    assert!((result.similarity.score - 1.0).abs() < 1e-6);
    assert_eq!(result.similarity.matches.len(), spectrum.len());
}

#[test]
fn upstream_failure_is_retried_on_the_next_call() {
    let temp = tempfile::tempdir().unwrap();
    let upstream = Arc::new(MockMassBank {
        failures: 1,
        ..MockMassBank::default()
    });
    let app = App::with_http(&config(&temp), upstream.clone()).unwrap();

    assert_matches!(app.spectrum(SM858102), Err(UsiError::Upstream(_)));
    let resolved = app.spectrum(SM858102).unwrap();
    assert_eq!(resolved.spectrum.len(), 3);
    assert_eq!(*upstream.calls.lock().unwrap(), 2);
}

#[test]
fn results_survive_a_restart() {
    let temp = tempfile::tempdir().unwrap();
    let first = App::with_http(&config(&temp), Arc::new(MockMassBank::default())).unwrap();
    let resolved = first.spectrum(SM858102).unwrap();
    first.shutdown();

    let upstream = Arc::new(MockMassBank::default());
    let second = App::with_http(&config(&temp), upstream.clone()).unwrap();
    assert_eq!(second.spectrum(SM858102).unwrap(), resolved);
    assert_eq!(*upstream.calls.lock().unwrap(), 0);
}

#[test]
fn disabled_backend_reports_unknown_collection() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(&temp);
    config.backends = Some(BTreeSet::from([Backend::Massive, Backend::GnpsLibrary]));
    let upstream = Arc::new(MockMassBank::default());
    let app = App::with_http(&config, upstream.clone()).unwrap();

    let err = app.spectrum(SM858102).unwrap_err();
    assert_eq!(err, UsiError::UnknownCollection("MASSBANK".to_string()));
    assert_eq!(err.status_code(), 400);
    assert_eq!(*upstream.calls.lock().unwrap(), 0);
}

#[test]
fn labels_follow_intensity_order() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::with_http(&config(&temp), Arc::new(MockMassBank::default())).unwrap();
    let result = app.labels(BSU00002, 0.05, 20).unwrap();
    let mz: Vec<f64> = result.labels.iter().map(|label| label.mz).collect();
    assert_eq!(mz, vec![77.0386, 105.0335, 133.0648]);
}

#[test]
fn legacy_and_current_forms_are_cached_separately() {
    let temp = tempfile::tempdir().unwrap();
    let upstream = Arc::new(MockMassBank::default());
    let app = App::with_http(&config(&temp), upstream.clone()).unwrap();
    let legacy = app.spectrum("mzspec:MASSBANK:BSU00002").unwrap();
    let current = app.spectrum(BSU00002).unwrap();
    assert_eq!(legacy.spectrum.mz(), current.spectrum.mz());
    assert_eq!(*upstream.calls.lock().unwrap(), 2);
}
