use std::fmt;
use std::str::FromStr;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UsiError;
use crate::legacy::LegacyTranslator;

/// Repository named by the collection segment of a USI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionTag {
    Msv,
    Pxd,
    Pxl,
    Rpxd,
    MetabolomicsWorkbench,
    Massive,
    MassiveKb,
    Gnps,
    Gnps2,
    MassBank,
    Ms2lda,
    MotifDb,
    TinyMass,
}

impl CollectionTag {
    fn from_collection(collection: &str) -> Option<Self> {
        let upper = collection.to_ascii_uppercase();
        let tag = match upper.as_str() {
            "MASSIVE" => CollectionTag::Massive,
            "MASSIVEKB" => CollectionTag::MassiveKb,
            "GNPS" => CollectionTag::Gnps,
            "GNPS2" => CollectionTag::Gnps2,
            "MASSBANK" => CollectionTag::MassBank,
            "MS2LDA" => CollectionTag::Ms2lda,
            "MOTIFDB" => CollectionTag::MotifDb,
            "TINYMASS" => CollectionTag::TinyMass,
            other if other.starts_with("MSV") => CollectionTag::Msv,
            other if other.starts_with("RPXD") => CollectionTag::Rpxd,
            other if other.starts_with("PXD") => CollectionTag::Pxd,
            other if other.starts_with("PXL") => CollectionTag::Pxl,
            other if other.starts_with("ST") => CollectionTag::MetabolomicsWorkbench,
            _ => return None,
        };
        Some(tag)
    }

    /// Proteomics collections are always served by the MassIVE resolver.
    pub fn is_proteomics(&self) -> bool {
        matches!(
            self,
            CollectionTag::Msv
                | CollectionTag::Pxd
                | CollectionTag::Pxl
                | CollectionTag::Rpxd
                | CollectionTag::Massive
                | CollectionTag::MassiveKb
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexFlag {
    Scan,
    Index,
    NativeId,
    Trace,
    Accession,
}

impl IndexFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexFlag::Scan => "scan",
            IndexFlag::Index => "index",
            IndexFlag::NativeId => "nativeId",
            IndexFlag::Trace => "trace",
            IndexFlag::Accession => "accession",
        }
    }
}

impl fmt::Display for IndexFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IndexFlag {
    type Err = UsiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scan" => Ok(IndexFlag::Scan),
            "index" => Ok(IndexFlag::Index),
            "nativeId" => Ok(IndexFlag::NativeId),
            "trace" => Ok(IndexFlag::Trace),
            "accession" => Ok(IndexFlag::Accession),
            other => Err(UsiError::MalformedUsi(format!("unknown index flag {other}"))),
        }
    }
}

/// A validated identifier. Only [`Grammar::parse`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedUsi {
    input: String,
    collection: String,
    tag: CollectionTag,
    run: String,
    index_flag: IndexFlag,
    index: String,
    interpretation: Option<String>,
}

impl ParsedUsi {
    /// The identifier exactly as the caller supplied it, before any legacy rewrite.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn tag(&self) -> CollectionTag {
        self.tag
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn index_flag(&self) -> IndexFlag {
        self.index_flag
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn interpretation(&self) -> Option<&str> {
        self.interpretation.as_deref()
    }

    /// Canonical current-grammar form.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParsedUsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mzspec:{}:{}:{}:{}",
            self.collection, self.run, self.index_flag, self.index
        )?;
        if let Some(interpretation) = &self.interpretation {
            write!(f, ":{interpretation}")?;
        }
        Ok(())
    }
}

/// Compiled identifier grammar. Build once and share by reference.
#[derive(Debug, Clone)]
pub struct Grammar {
    official: Regex,
    metabolomics: Regex,
    gnps_task: Regex,
    ms2lda_task: Regex,
    massbank_accession: Regex,
    legacy: LegacyTranslator,
}

impl Grammar {
    pub fn new() -> Result<Self, UsiError> {
        Ok(Self {
            official: compile(
                r"^mzspec:((?i:MSV\d{9}|PXD\d{6}|PXL\d{6}|RPXD\d{6}|ST\d{6}|MassIVE)):(.*):(scan|index|nativeId|trace):([^:]+)(?::(.+))?$",
            )?,
            metabolomics: compile(
                r"^mzspec:((?i:MASSIVEKB|GNPS2|GNPS|MASSBANK|MS2LDA|MOTIFDB|TINYMASS)):(.*):(scan|index|nativeId|trace|accession):([^:]+)(?::(.+))?$",
            )?,
            gnps_task: compile(r"(?i)^TASK-([a-z0-9]{32})-(.+)$")?,
            ms2lda_task: compile(r"(?i)^TASK-(\d+)$")?,
            massbank_accession: compile(r"MSBNK-[A-Z0-9_]{1,32}-([A-Z0-9_]{1,64})")?,
            legacy: LegacyTranslator::new()?,
        })
    }

    pub fn legacy(&self) -> &LegacyTranslator {
        &self.legacy
    }

    /// Parse with the current grammars, falling back to a legacy rewrite.
    ///
    /// A failed rewrite reports the error of the direct attempt.
    pub fn parse(&self, usi: &str) -> Result<ParsedUsi, UsiError> {
        let direct_err = match self.try_parse(usi, usi) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => err,
        };
        let Ok(current) = self.legacy.translate(usi) else {
            return Err(direct_err);
        };
        debug!(legacy = usi, current = %current, "translated legacy USI");
        self.try_parse(&current, usi).map_err(|_| direct_err)
    }

    fn try_parse(&self, candidate: &str, input: &str) -> Result<ParsedUsi, UsiError> {
        let caps = self
            .official
            .captures(candidate)
            .or_else(|| self.metabolomics.captures(candidate))
            .ok_or_else(|| UsiError::MalformedUsi(input.to_string()))?;
        from_captures(&caps, input)
    }

    /// Splits a `TASK-<32 hex>-<file>` run into task id and file name.
    pub fn gnps_task<'a>(&self, run: &'a str) -> Option<(&'a str, &'a str)> {
        let caps = self.gnps_task.captures(run)?;
        Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
    }

    /// Experiment id of a `TASK-<digits>` topic-model run.
    pub fn ms2lda_experiment<'a>(&self, run: &'a str) -> Option<&'a str> {
        Some(self.ms2lda_task.captures(run)?.get(1)?.as_str())
    }

    /// Strips the contributor prefix from `MSBNK-<contributor>-<accession>`.
    pub fn massbank_accession<'a>(&self, index: &'a str) -> &'a str {
        self.massbank_accession
            .captures(index)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(index)
    }
}

fn compile(pattern: &str) -> Result<Regex, UsiError> {
    Regex::new(pattern).map_err(|err| UsiError::InvalidPattern(err.to_string()))
}

fn from_captures(caps: &Captures<'_>, input: &str) -> Result<ParsedUsi, UsiError> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str());
    let malformed = || UsiError::MalformedUsi(input.to_string());
    let collection = group(1).ok_or_else(malformed)?;
    let tag = CollectionTag::from_collection(collection)
        .ok_or_else(|| UsiError::UnknownCollection(collection.to_string()))?;
    Ok(ParsedUsi {
        input: input.to_string(),
        collection: collection.to_string(),
        tag,
        run: group(2).ok_or_else(malformed)?.to_string(),
        index_flag: group(3).ok_or_else(malformed)?.parse()?,
        index: group(4).ok_or_else(malformed)?.to_string(),
        interpretation: group(5).map(|value| value.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_official_proteomics_usi() {
        let grammar = Grammar::new().unwrap();
        let parsed = grammar
            .parse("mzspec:PXD000561:Adult_Frontalcortex_bRP_Elite_85_f09:scan:17555")
            .unwrap();
        assert_eq!(parsed.tag(), CollectionTag::Pxd);
        assert_eq!(parsed.run(), "Adult_Frontalcortex_bRP_Elite_85_f09");
        assert_eq!(parsed.index_flag(), IndexFlag::Scan);
        assert_eq!(parsed.index(), "17555");
        assert_eq!(parsed.interpretation(), None);
    }

    #[test]
    fn collection_is_case_insensitive_but_preserved() {
        let grammar = Grammar::new().unwrap();
        let parsed = grammar
            .parse("mzspec:massbank::accession:SM858102")
            .unwrap();
        assert_eq!(parsed.tag(), CollectionTag::MassBank);
        assert_eq!(parsed.collection(), "massbank");
        assert_eq!(parsed.index(), "SM858102");
    }

    #[test]
    fn interpretation_keeps_embedded_colons() {
        let grammar = Grammar::new().unwrap();
        let usi = "mzspec:PXD000966:CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09.mzML:scan:12298:[UNIMOD:214]-LHFFM[UNIMOD:35]PGFAPLTSR/2";
        let parsed = grammar.parse(usi).unwrap();
        assert_eq!(parsed.index(), "12298");
        assert_eq!(
            parsed.interpretation(),
            Some("[UNIMOD:214]-LHFFM[UNIMOD:35]PGFAPLTSR/2")
        );
        assert_eq!(parsed.to_string(), usi);
    }

    #[test]
    fn empty_index_is_malformed() {
        let grammar = Grammar::new().unwrap();
        let err = grammar
            .parse("mzspec:PXD000561:Adult_Frontalcortex_bRP_Elite_85_f09:scan:")
            .unwrap_err();
        assert_matches!(err, UsiError::MalformedUsi(_));
    }

    #[test]
    fn task_run_is_split() {
        let grammar = Grammar::new().unwrap();
        let (task, file) = grammar
            .gnps_task("TASK-c95481f0c53d42e78a61bf899e9f9adb-spectra/specs_ms.mgf")
            .unwrap();
        assert_eq!(task, "c95481f0c53d42e78a61bf899e9f9adb");
        assert_eq!(file, "spectra/specs_ms.mgf");
        assert_eq!(grammar.ms2lda_experiment("TASK-190"), Some("190"));
        assert_eq!(grammar.ms2lda_experiment("TASK-bla190"), None);
    }

    #[test]
    fn massbank_accession_cleanup() {
        let grammar = Grammar::new().unwrap();
        assert_eq!(grammar.massbank_accession("MSBNK-AAFC-AC000646"), "AC000646");
        assert_eq!(grammar.massbank_accession("SM858102"), "SM858102");
    }
}
