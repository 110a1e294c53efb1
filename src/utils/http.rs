// src/utils/http.rs

//! HTTP client utilities.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::SourceConfig;

/// Browser-like headers the upstream search API expects.
pub fn default_headers(config: &SourceConfig) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = [
        ("User-Agent", config.user_agent.as_str()),
        ("Accept", "application/json, text/javascript, */*; q=0.01"),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Cache-Control", "no-cache"),
        ("Origin", "https://www.encar.com"),
        ("Pragma", "no-cache"),
        ("Referer", "https://www.encar.com/"),
        ("Sec-Fetch-Dest", "empty"),
        ("Sec-Fetch-Mode", "cors"),
        ("Sec-Fetch-Site", "same-site"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (name, value) in &config.extra_headers {
        match headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value.clone(),
            None => headers.push((name.clone(), value.clone())),
        }
    }
    headers
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &SourceConfig) -> Result<reqwest::Client> {
    let mut header_map = HeaderMap::new();
    for (name, value) in default_headers(config) {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::config(format!("Invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| AppError::config(format!("Invalid value for header {name}: {e}")))?;
        header_map.insert(name, value);
    }

    let client = reqwest::Client::builder()
        .default_headers(header_map)
        .timeout(config.timeout())
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_headers_override_defaults() {
        let mut config = SourceConfig::default();
        config
            .extra_headers
            .insert("referer".into(), "https://example.com/".into());
        config.extra_headers.insert("X-Trace".into(), "1".into());

        let headers = default_headers(&config);
        let referer: Vec<_> = headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("referer"))
            .collect();
        assert_eq!(referer.len(), 1);
        assert_eq!(referer[0].1, "https://example.com/");
        assert!(headers.iter().any(|(k, v)| k == "X-Trace" && v == "1"));
    }

    #[test]
    fn test_client_builds_with_defaults() {
        assert!(create_async_client(&SourceConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = SourceConfig::default();
        config
            .extra_headers
            .insert("bad header".into(), "x".into());
        assert!(create_async_client(&config).is_err());
    }
}
