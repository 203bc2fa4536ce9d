use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ComparisonResult, LabelsResult, ParseResult};
use crate::error::UsiError;
use crate::spectrum::ResolvedSpectrum;

/// Structured failure printed in place of a result.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub status: u16,
    pub message: String,
}

impl From<&UsiError> for ErrorEnvelope {
    fn from(error: &UsiError) -> Self {
        Self {
            kind: error.kind(),
            status: error.status_code(),
            message: error.to_string(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_spectrum(result: &ResolvedSpectrum) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_comparison(result: &ComparisonResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_labels(result: &LabelsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_parse(result: &ParseResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_error(error: &UsiError) -> io::Result<()> {
        Self::print_json(&serde_json::json!({ "error": ErrorEnvelope::from(error) }))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_kind_and_status() {
        let error = UsiError::NotFound("no peaks found for x".to_string());
        let value = serde_json::to_value(ErrorEnvelope::from(&error)).unwrap();
        assert_eq!(value["kind"], "not_found");
        assert_eq!(value["status"], 404);
        assert_eq!(value["message"], "no peaks found for x");
    }
}
