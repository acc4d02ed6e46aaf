//! Session cookie helpers.

use axum::http::{HeaderMap, header};

use crate::services::session_store::SessionId;

pub const SESSION_COOKIE: &str = "taxdoc_session";

/// Session id carried by the request's `Cookie` headers, if any parses.
pub fn presented_session(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// `Set-Cookie` value binding the client to `id`.
pub fn session_cookie(id: SessionId) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    #[test]
    fn session_is_found_among_other_cookies() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={}; lang=es", SESSION_COOKIE, id)).unwrap(),
        );
        assert_eq!(presented_session(&headers), Some(id));
    }

    #[test]
    fn malformed_or_missing_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_session(&headers), None);
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("taxdoc_session=not-a-uuid"),
        );
        assert_eq!(presented_session(&headers), None);
    }

    #[test]
    fn cookie_is_http_only() {
        let cookie = session_cookie(Uuid::nil());
        assert!(cookie.starts_with("taxdoc_session=00000000-"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
    }
}
