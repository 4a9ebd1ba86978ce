//! Request URL construction from a source's `config` map.
//!
//! Recognised keys:
//! - `base_url` (required): http(s) URL of the provider
//! - `path`: appended to `base_url`
//! - `api_key`: sent as a query parameter
//! - `api_key_param`: name of that parameter (default `apikey`)

use datahub_core::{FetchError, SourceConfig};
use serde_json::{Map, Value};
use url::Url;

const DEFAULT_API_KEY_PARAM: &str = "apikey";

fn config_str<'a>(source: &'a SourceConfig, key: &str) -> Result<Option<&'a str>, FetchError> {
    match source.config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(FetchError::Misconfigured(format!(
            "{}: {key} must be a string, got {other}",
            source.source_id
        ))),
    }
}

/// Base URL of `source`, without path or query.
pub fn base_url(source: &SourceConfig) -> Result<Url, FetchError> {
    let raw = config_str(source, "base_url")?
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FetchError::Misconfigured(format!("{}: base_url is required", source.source_id)))?;

    let url = Url::parse(raw).map_err(|e| FetchError::Misconfigured(format!("{}: invalid base_url: {e}", source.source_id)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FetchError::Misconfigured(format!("{}: unsupported scheme {scheme}", source.source_id))),
    }
}

/// Full request URL for `params` against `source`.
///
/// Parameters become query pairs in key order. Nulls are skipped, arrays
/// are comma-joined and nested objects are sent as compact JSON.
pub fn request_url(source: &SourceConfig, params: &Map<String, Value>) -> Result<Url, FetchError> {
    let mut url = base_url(source)?;

    if let Some(path) = config_str(source, "path")? {
        let joined = format!("{}/{}", url.path().trim_end_matches('/'), path.trim_start_matches('/'));
        url.set_path(&joined);
    }

    let mut names: Vec<&String> = params.keys().collect();
    names.sort();

    {
        let mut query = url.query_pairs_mut();
        for name in names {
            if let Some(value) = query_value(&params[name]) {
                query.append_pair(name, &value);
            }
        }
        if let Some(key) = config_str(source, "api_key")? {
            let param = config_str(source, "api_key_param")?.unwrap_or(DEFAULT_API_KEY_PARAM);
            query.append_pair(param, key);
        }
    }

    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(query_value).collect();
            Some(parts.join(","))
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use datahub_core::SourceStatus;
    use serde_json::json;

    fn source(config: Value) -> SourceConfig {
        SourceConfig {
            source_id: "fred".into(),
            name: "FRED".into(),
            domain_type: "economic_indicator".into(),
            adapter_ref: "http_json".into(),
            config: config.as_object().cloned().unwrap_or_default(),
            status: SourceStatus::Active,
            error_count: 0,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_tested_at: None,
            test_result: None,
        }
    }

    #[test]
    fn test_base_url_required() {
        let err = base_url(&source(json!({}))).unwrap_err();
        assert!(matches!(err, FetchError::Misconfigured(msg) if msg.contains("base_url")));

        let err = base_url(&source(json!({"base_url": 42}))).unwrap_err();
        assert!(matches!(err, FetchError::Misconfigured(_)));
    }

    #[test]
    fn test_base_url_scheme() {
        let err = base_url(&source(json!({"base_url": "ftp://example.com"}))).unwrap_err();
        assert!(matches!(err, FetchError::Misconfigured(msg) if msg.contains("ftp")));
    }

    #[test]
    fn test_path_is_joined() {
        let s = source(json!({"base_url": "https://api.stlouisfed.org/fred/", "path": "/series/observations"}));
        let url = request_url(&s, &Map::new()).unwrap();
        assert_eq!(url.as_str(), "https://api.stlouisfed.org/fred/series/observations");
    }

    #[test]
    fn test_params_become_sorted_query_pairs() {
        let s = source(json!({"base_url": "https://example.com/v1"}));
        let params = json!({
            "symbol": "AAPL",
            "indicators": ["GDP", "CPI"],
            "start_date": null,
            "limit": 10,
            "adjusted": true,
        });
        let url = request_url(&s, params.as_object().unwrap()).unwrap();
        assert_eq!(url.query(), Some("adjusted=true&indicators=GDP%2CCPI&limit=10&symbol=AAPL"));
    }

    #[test]
    fn test_api_key_appended() {
        let s = source(json!({"base_url": "https://example.com", "api_key": "k3y"}));
        let url = request_url(&s, &Map::new()).unwrap();
        assert_eq!(url.query(), Some("apikey=k3y"));

        let s = source(json!({"base_url": "https://example.com", "api_key": "k3y", "api_key_param": "api_key"}));
        let params = json!({"series_id": "GDP"});
        let url = request_url(&s, params.as_object().unwrap()).unwrap();
        assert_eq!(url.query(), Some("series_id=GDP&api_key=k3y"));
    }
}
