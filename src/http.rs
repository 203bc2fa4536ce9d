use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::UsiError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 45;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, UsiError> {
        serde_json::from_str(&self.body).map_err(|err| UsiError::Upstream(err.to_string()))
    }
}

/// Blocking GET transport shared by every backend fetcher.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, UsiError>;
}

impl<T: HttpClient + ?Sized> HttpClient for std::sync::Arc<T> {
    fn get(&self, url: &str) -> Result<HttpResponse, UsiError> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, UsiError> {
        Self::with_settings(Duration::from_secs(DEFAULT_TIMEOUT_SECS), None)
    }

    pub fn with_settings(timeout: Duration, user_agent: Option<&str>) -> Result<Self, UsiError> {
        let agent = match user_agent {
            Some(agent) => agent.to_string(),
            None => format!("usi-resolver/{}", env!("CARGO_PKG_VERSION")),
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&agent).map_err(|err| UsiError::Upstream(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| UsiError::Upstream(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, url: &str) -> Result<HttpResponse, UsiError> {
        debug!(url, "upstream request");
        let response = self.client.get(url).send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(transport_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn transport_error(err: reqwest::Error) -> UsiError {
    if err.is_timeout() {
        UsiError::Timeout(err.to_string())
    } else {
        UsiError::Upstream(err.to_string())
    }
}

/// Builds `base?k=v&...` with form encoding.
pub fn url_with_params(base: &str, params: &[(&str, &str)]) -> Result<String, UsiError> {
    Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|err| UsiError::Upstream(err.to_string()))
}

/// Reads a number that upstreams sometimes send as a string.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn lenient_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .and_then(|n| i32::try_from(n).ok()),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i32>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|f| f as i32))
        }
        _ => None,
    }
}

/// Parses a `[[mz, intensity], ...]` peak array.
pub fn peak_pairs(value: &Value) -> Option<Vec<(f64, f64)>> {
    value
        .as_array()?
        .iter()
        .map(|pair| {
            let pair = pair.as_array()?;
            Some((lenient_f64(pair.first()?)?, lenient_f64(pair.get(1)?)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn params_are_form_encoded() {
        let url = url_with_params(
            "https://example.org/resolve",
            &[("usi", "mzspec:MASSBANK::accession:SM858102")],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://example.org/resolve?usi=mzspec%3AMASSBANK%3A%3Aaccession%3ASM858102"
        );
    }

    #[test]
    fn lenient_numbers() {
        assert_eq!(lenient_f64(&json!("245.5")), Some(245.5));
        assert_eq!(lenient_f64(&json!(12)), Some(12.0));
        assert_eq!(lenient_i32(&json!("2")), Some(2));
        assert_eq!(lenient_i32(&json!(1.0)), Some(1));
        assert_eq!(lenient_i32(&json!(null)), None);
    }

    #[test]
    fn peak_pairs_reject_ragged_input() {
        assert_eq!(
            peak_pairs(&json!([[100.0, 5.0], ["101.5", 2]])),
            Some(vec![(100.0, 5.0), (101.5, 2.0)])
        );
        assert_eq!(peak_pairs(&json!([[100.0]])), None);
    }
}
