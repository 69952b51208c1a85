/// Authentication gate in front of /api and /ws
use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::api::ApiError;
use crate::app_state::AppState;

pub const TOKEN_COOKIE: &str = "webfiles_token";

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token presented by a request: bearer header, then cookie, then query parameter
fn presented_token(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or(query_token)
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_authorized(
    expected: Option<&str>,
    headers: &HeaderMap,
    query_token: Option<String>,
) -> bool {
    match expected {
        None => true,
        Some(expected) => presented_token(headers, query_token)
            .is_some_and(|token| constant_time_eq(token.as_bytes(), expected.as_bytes())),
    }
}

/// Rejects requests without the configured token with 401
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let query_token = Query::<TokenQuery>::try_from_uri(request.uri())
        .map(|Query(query)| query.token)
        .unwrap_or_default();

    if is_authorized(state.auth_token(), request.headers(), query_token) {
        next.run(request).await
    } else {
        debug!("Rejected unauthenticated request to {}", request.uri().path());
        ApiError::unauthorized().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn open_gate_accepts_everything() {
        assert!(is_authorized(None, &HeaderMap::new(), None));
    }

    #[test]
    fn accepts_each_token_location() {
        let expected = Some("s3cret");

        let bearer = headers(&[(header::AUTHORIZATION, "Bearer s3cret")]);
        assert!(is_authorized(expected, &bearer, None));

        let cookie = headers(&[(header::COOKIE, "theme=dark; webfiles_token=s3cret")]);
        assert!(is_authorized(expected, &cookie, None));

        assert!(is_authorized(
            expected,
            &HeaderMap::new(),
            Some("s3cret".to_string())
        ));
    }

    #[test]
    fn rejects_missing_or_wrong_tokens() {
        let expected = Some("s3cret");

        assert!(!is_authorized(expected, &HeaderMap::new(), None));
        let wrong = headers(&[(header::AUTHORIZATION, "Bearer nope")]);
        assert!(!is_authorized(expected, &wrong, None));
        let basic = headers(&[(header::AUTHORIZATION, "Basic s3cret")]);
        assert!(!is_authorized(expected, &basic, None));
        let other_cookie = headers(&[(header::COOKIE, "session=s3cret")]);
        assert!(!is_authorized(expected, &other_cookie, None));
    }

    #[test]
    fn token_comparison_checks_every_byte() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"s3cre"));
        assert!(!constant_time_eq(b"", b"x"));

        let prefix = headers(&[(header::AUTHORIZATION, "Bearer s3cretX")]);
        assert!(!is_authorized(Some("s3cret"), &prefix, None));
    }

    #[test]
    fn bearer_header_takes_precedence() {
        let both = headers(&[
            (header::AUTHORIZATION, "Bearer wrong"),
            (header::COOKIE, "webfiles_token=s3cret"),
        ]);
        assert!(!is_authorized(Some("s3cret"), &both, None));
    }
}
