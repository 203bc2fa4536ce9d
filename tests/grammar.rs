use std::sync::Arc;

use assert_matches::assert_matches;

use usi_resolver::error::UsiError;
use usi_resolver::http::{HttpClient, HttpResponse};
use usi_resolver::legacy::LegacyDialect;
use usi_resolver::providers::Backend;
use usi_resolver::resolver::Resolver;
use usi_resolver::usi::{CollectionTag, Grammar, IndexFlag};

struct Offline;

impl HttpClient for Offline {
    fn get(&self, url: &str) -> Result<HttpResponse, UsiError> {
        Err(UsiError::Upstream(format!("offline: {url}")))
    }
}

fn resolver() -> Resolver {
    Resolver::with_http(Arc::new(Grammar::new().unwrap()), Arc::new(Offline), None)
}

#[test]
fn current_identifiers_round_trip() {
    let grammar = Grammar::new().unwrap();
    let usis = [
        "mzspec:PXD000561:Adult_Frontalcortex_bRP_Elite_85_f09:scan:17555",
        "mzspec:PXD000561:Adult_Frontalcortex_bRP_Elite_85_f09:scan:17555:VLHPLEGAVVIIFK/2",
        "mzspec:MSV000079514:P1-Sheath-2-t0-1:scan:100",
        "mzspec:MASSIVEKB:(-)-epigallocatechin:scan:1",
        "mzspec:GNPS:TASK-c95481f0c53d42e78a61bf899e9f9adb-spectra/specs_ms.mgf:scan:1943",
        "mzspec:GNPS:GNPS-LIBRARY:accession:CCMSLIB00005436077",
        "mzspec:GNPS2:TASK-2a65f90094654235a4c8d337fdca11e1-nf_output/clustering/specs_ms.mgf:scan:2",
        "mzspec:MASSBANK::accession:SM858102",
        "mzspec:MS2LDA:TASK-190:accession:270684",
        "mzspec:MOTIFDB::accession:171163",
        "mzspec:ST000003:QC_1.mzML:scan:12",
        "mzspec:TINYMASS:abc:nativeId:controllerType=0 controllerNumber=1 scan=5",
    ];
    for usi in usis {
        let parsed = grammar.parse(usi).unwrap_or_else(|err| panic!("{usi}: {err}"));
        let reparsed = grammar.parse(&parsed.canonical()).unwrap();
        assert_eq!(reparsed.canonical(), parsed.canonical(), "{usi}");
        assert_eq!(parsed.to_string(), usi);
    }
}

#[test]
fn only_the_collection_ignores_case() {
    let grammar = Grammar::new().unwrap();
    let parsed = grammar.parse("mzspec:pxd000561:run:scan:1").unwrap();
    assert_eq!(parsed.tag(), CollectionTag::Pxd);
    assert_eq!(parsed.index_flag(), IndexFlag::Scan);

    assert_matches!(
        grammar.parse("mzspec:PXD000561:run:SCAN:1"),
        Err(UsiError::MalformedUsi(_))
    );
    assert_matches!(
        grammar.parse("MZSPEC:PXD000561:run:scan:1"),
        Err(UsiError::MalformedUsi(_))
    );
}

#[test]
fn proteomics_flags_exclude_accession() {
    let grammar = Grammar::new().unwrap();
    assert_matches!(
        grammar.parse("mzspec:PXD000561:run:accession:1"),
        Err(UsiError::MalformedUsi(_))
    );
}

#[test]
fn unrecognised_input_reports_the_direct_failure() {
    let grammar = Grammar::new().unwrap();
    let err = grammar.parse("not a usi").unwrap_err();
    assert_eq!(err, UsiError::MalformedUsi("not a usi".to_string()));
}

#[test]
fn legacy_dialects_dispatch_like_their_current_form() {
    let resolver = resolver();
    let grammar = resolver.grammar();
    let cases = [
        (
            "mzspec:GNPSTASK-c95481f0c53d42e78a61bf899e9f9adb:spectra/specs_ms.mgf:scan:1943",
            "mzspec:GNPS:TASK-c95481f0c53d42e78a61bf899e9f9adb-spectra/specs_ms.mgf:scan:1943",
            LegacyDialect::GnpsTask,
        ),
        (
            "mzspec:GNPSLIBRARY:CCMSLIB00005436077",
            "mzspec:GNPS:GNPS-LIBRARY:accession:CCMSLIB00005436077",
            LegacyDialect::GnpsLibrary,
        ),
        (
            "mzspec:MASSBANK:BSU00002",
            "mzspec:MASSBANK::accession:BSU00002",
            LegacyDialect::MassBank,
        ),
        (
            "mzspec:MOTIFDB:motif:171163",
            "mzspec:MOTIFDB::accession:171163",
            LegacyDialect::MotifDb,
        ),
        (
            "mzdraft:MS2LDATASK-190:document:270684",
            "mzspec:MS2LDA:TASK-190:accession:270684",
            LegacyDialect::Ms2ldaDocument,
        ),
    ];
    for (legacy, current, dialect) in cases {
        assert_eq!(grammar.legacy().dialect(legacy), Some(dialect));
        let from_legacy = grammar.parse(legacy).unwrap();
        let from_current = grammar.parse(current).unwrap();
        assert_eq!(from_legacy.input(), legacy);
        assert_eq!(from_legacy.canonical(), current);
        assert_eq!(
            resolver.backend_for(&from_legacy),
            resolver.backend_for(&from_current)
        );
    }
}

#[test]
fn interpretation_forces_massive() {
    let resolver = resolver();
    let parsed = resolver
        .grammar()
        .parse("mzspec:MASSBANK::accession:SM858102:PEPTIDE/2")
        .unwrap();
    assert_eq!(resolver.backend_for(&parsed), Backend::Massive);
}
