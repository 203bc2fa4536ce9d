use regex::Regex;
use serde::Serialize;

use crate::error::UsiError;

/// Deprecated identifier dialects that predate the metabolomics USI grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyDialect {
    GnpsTask,
    GnpsLibrary,
    MassBank,
    MotifDb,
    Ms2ldaDocument,
}

#[derive(Debug, Clone)]
struct Rewrite {
    dialect: LegacyDialect,
    pattern: Regex,
    template: &'static str,
}

/// Rewrites legacy identifiers into the current grammar.
///
/// The output is a candidate only: callers re-parse it with the current
/// grammar before using it.
#[derive(Debug, Clone)]
pub struct LegacyTranslator {
    rewrites: Vec<Rewrite>,
}

impl LegacyTranslator {
    pub fn new() -> Result<Self, UsiError> {
        let table = [
            (
                LegacyDialect::GnpsTask,
                r"(?i)^(?:mzspec|mzdraft):GNPSTASK-([a-z0-9]{32}):(.+):scan:(\d+)$",
                "mzspec:GNPS:TASK-${1}-${2}:scan:${3}",
            ),
            (
                LegacyDialect::GnpsLibrary,
                r"(?i)^(?:mzspec|mzdraft):GNPSLIBRARY:(CCMSLIB\d+)$",
                "mzspec:GNPS:GNPS-LIBRARY:accession:${1}",
            ),
            (
                LegacyDialect::MassBank,
                r"(?i)^(?:mzspec|mzdraft):MASSBANK:([^:]+)$",
                "mzspec:MASSBANK::accession:${1}",
            ),
            (
                LegacyDialect::MotifDb,
                r"(?i)^(?:mzspec|mzdraft):MOTIFDB:motif:([^:]+)$",
                "mzspec:MOTIFDB::accession:${1}",
            ),
            (
                LegacyDialect::Ms2ldaDocument,
                r"(?i)^(?:mzspec|mzdraft):MS2LDATASK-([^:]+):document:([^:]+)$",
                "mzspec:MS2LDA:TASK-${1}:accession:${2}",
            ),
        ];
        let rewrites = table
            .into_iter()
            .map(|(dialect, pattern, template)| {
                Ok(Rewrite {
                    dialect,
                    pattern: Regex::new(pattern)
                        .map_err(|err| UsiError::InvalidPattern(err.to_string()))?,
                    template,
                })
            })
            .collect::<Result<Vec<_>, UsiError>>()?;
        Ok(Self { rewrites })
    }

    pub fn dialect(&self, usi: &str) -> Option<LegacyDialect> {
        self.rewrites
            .iter()
            .find(|rewrite| rewrite.pattern.is_match(usi))
            .map(|rewrite| rewrite.dialect)
    }

    pub fn translate(&self, usi: &str) -> Result<String, UsiError> {
        for rewrite in &self.rewrites {
            if let Some(caps) = rewrite.pattern.captures(usi) {
                let mut current = String::new();
                caps.expand(rewrite.template, &mut current);
                return Ok(current);
            }
        }
        Err(UsiError::UnknownLegacyForm(usi.to_string()))
    }
}
