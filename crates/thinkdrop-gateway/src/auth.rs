use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use subtle::ConstantTimeEq;
use thinkdrop_common::{Error, Result};

/// Check the bearer token against the configured key list.
///
/// An empty key list disables auth (local development). Comparison is
/// constant-time per key; `ct_eq` already rejects length mismatches without
/// an early exit.
pub fn authorize(headers: &HeaderMap, api_keys: &[String]) -> Result<()> {
    if api_keys.is_empty() {
        return Ok(());
    }

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("missing Authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::Unauthorized("expected Bearer authorization".into()))?;

    let authorized = api_keys
        .iter()
        .any(|key| key.as_bytes().ct_eq(token.as_bytes()).into());

    if authorized {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid API key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_key_list_disables_auth() {
        assert!(authorize(&HeaderMap::new(), &[]).is_ok());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let err = authorize(&HeaderMap::new(), &keys(&["secret"])).expect_err("should fail");
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn non_bearer_scheme_is_unauthorized() {
        let headers = headers_with("Basic c2VjcmV0");
        assert!(authorize(&headers, &keys(&["secret"])).is_err());
    }

    #[test]
    fn wrong_key_is_unauthorized() {
        let headers = headers_with("Bearer nope");
        assert!(authorize(&headers, &keys(&["secret"])).is_err());
    }

    #[test]
    fn any_key_in_the_csv_list_matches() {
        let headers = headers_with("Bearer second-key");
        assert!(authorize(&headers, &keys(&["first-key", "second-key"])).is_ok());
    }
}
