use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::{HeaderMap, HeaderValue, header};
use uuid::Uuid;

use crate::api_error::ApiError;

/// Header carrying the correlation id across services.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

pub const API_TOKEN_HEADER: &str = "X-API-Token";
pub const API_TOKEN_QUERY_PARAM: &str = "apikey";

/// Identifies one logical operation across the coordinator and its agents.
#[derive(Clone, Debug)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Injects a correlation id into every request: reuses the caller's
/// X-Correlation-ID if present, generates one otherwise, and echoes it on the
/// response.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let cid = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(CorrelationId::from)
        .unwrap_or_else(CorrelationId::generate);

    request.extensions_mut().insert(cid.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(cid.as_str()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// The expected API token, shared as middleware state.
#[derive(Clone)]
pub struct RequireToken(pub Arc<str>);

/// The token the caller actually presented, stashed in request extensions for
/// handlers that need it (node registration injects it into the request body).
#[derive(Clone, Debug)]
pub struct PresentedToken(pub String);

/// Shared-bearer auth. The token is accepted from, in order: the X-API-Token
/// header, the Authorization header (raw token, not Bearer-prefixed), or the
/// `apikey` query parameter. Missing or mismatched token -> 401.
pub async fn require_api_token(
    State(expected): State<RequireToken>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match presented_token(request.headers(), request.uri().query()) {
        Some(token) if token == expected.0.as_ref() => {
            request.extensions_mut().insert(PresentedToken(token));
            Ok(next.run(request).await)
        }
        _ => Err(ApiError::unauthorized()),
    }
}

fn presented_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(token) = header_value(headers, API_TOKEN_HEADER) {
        return Some(token);
    }
    if let Some(token) = header_value(headers, header::AUTHORIZATION.as_str()) {
        return Some(token);
    }
    query.and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == API_TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_token_location_precedence() {
        // X-API-Token wins over Authorization, which wins over the query param.
        let all = headers(&[(API_TOKEN_HEADER, "one"), ("Authorization", "two")]);
        assert_eq!(
            presented_token(&all, Some("apikey=three")),
            Some("one".to_string())
        );

        let auth_only = headers(&[("Authorization", "two")]);
        assert_eq!(
            presented_token(&auth_only, Some("apikey=three")),
            Some("two".to_string())
        );

        assert_eq!(
            presented_token(&headers(&[]), Some("other=x&apikey=three")),
            Some("three".to_string())
        );

        assert_eq!(presented_token(&headers(&[]), None), None);
    }

    #[test]
    fn test_empty_header_is_ignored() {
        let empty = headers(&[(API_TOKEN_HEADER, ""), ("Authorization", "two")]);
        assert_eq!(presented_token(&empty, None), Some("two".to_string()));
    }
}
