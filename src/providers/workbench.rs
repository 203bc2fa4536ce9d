use std::sync::Arc;

use crate::error::UsiError;
use crate::http::{HttpClient, url_with_params};
use crate::providers::{Backend, BackendFetcher, get_ok, require_flag};
use crate::spectrum::{ResolvedSpectrum, Spectrum};
use crate::usi::{Grammar, IndexFlag, ParsedUsi};

const WORKBENCH_MS2: &str = "https://www.metabolomicsworkbench.org/data/ms2.php";
const HEADER_LINES: usize = 4;

/// Metabolomics Workbench studies (`ST` accessions).
pub struct WorkbenchFetcher {
    http: Arc<dyn HttpClient>,
}

impl WorkbenchFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl BackendFetcher for WorkbenchFetcher {
    fn backend(&self) -> Backend {
        Backend::MetabolomicsWorkbench
    }

    fn fetch(&self, usi: &ParsedUsi, _grammar: &Grammar) -> Result<ResolvedSpectrum, UsiError> {
        require_flag(usi, IndexFlag::Scan, "MW")?;
        let study = usi.collection();

        let url = url_with_params(
            WORKBENCH_MS2,
            &[
                ("A", &format!("{study}.zip")),
                ("F", usi.run()),
                ("S", usi.index()),
            ],
        )?;
        let response = get_ok(self.http.as_ref(), &url, "unknown MW USI")?;
        let block = parse_ms2_block(&response.body)?;
        let spectrum = Spectrum::new(usi.input(), block.precursor_mz, block.charge, block.peaks)?;
        Ok(ResolvedSpectrum {
            spectrum,
            source_link: format!(
                "https://www.metabolomicsworkbench.org/data/DRCCMetadata.php?Mode=Study&StudyID={study}&StudyType=MS&ResultType=1"
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ms2Block {
    pub precursor_mz: f64,
    pub charge: i32,
    pub peaks: Vec<(f64, f64)>,
}

/// Parses the `<pre>` text block served by the workbench.
///
/// Line 1 ends with the precursor m/z and line 3 with the charge, each after
/// the last `:`. A whitespace-separated table with `m/z` and `intensity`
/// columns follows the four header lines.
pub fn parse_ms2_block(text: &str) -> Result<Ms2Block, UsiError> {
    let malformed = |what: &str| UsiError::Upstream(format!("unreadable MW response: {what}"));
    let text = text.replace("<pre>", "").replace("</pre></br>", "");
    let lines: Vec<&str> = text.trim().lines().collect();

    let field = |line: Option<&&str>| {
        line.and_then(|line| line.rsplit(':').next())
            .map(|value| value.replace('"', "").trim().to_string())
    };
    let precursor_mz = field(lines.first())
        .and_then(|value| value.parse::<f64>().ok())
        .ok_or_else(|| malformed("precursor m/z"))?;
    let charge = field(lines.get(2))
        .and_then(|value| value.parse::<i32>().ok())
        .ok_or_else(|| malformed("charge"))?;

    let mut table = lines
        .iter()
        .skip(HEADER_LINES)
        .filter(|line| !line.trim().is_empty());
    let header: Vec<&str> = table
        .next()
        .ok_or_else(|| malformed("peak table header"))?
        .split_whitespace()
        .collect();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| malformed(name))
    };
    let mz_col = column("m/z")?;
    let intensity_col = column("intensity")?;

    let peaks = table
        .map(|row| {
            let cells: Vec<&str> = row.split_whitespace().collect();
            let cell = |i: usize| {
                cells
                    .get(i)
                    .and_then(|value| value.parse::<f64>().ok())
                    .ok_or_else(|| malformed("peak row"))
            };
            Ok((cell(mz_col)?, cell(intensity_col)?))
        })
        .collect::<Result<Vec<_>, UsiError>>()?;

    Ok(Ms2Block {
        precursor_mz,
        charge,
        peaks,
    })
}
