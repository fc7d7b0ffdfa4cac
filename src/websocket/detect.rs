//! WebSocket upgrade detection.

use axum::http::{header, HeaderMap};

/// True iff `Upgrade` is `websocket` and `Connection` carries the `upgrade` token,
/// both compared case-insensitively.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));

    upgrade && connection
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn missing_or_empty_upgrade_is_not_websocket() {
        assert!(!is_upgrade_request(&headers(&[("connection", "Upgrade")])));
        assert!(!is_upgrade_request(&headers(&[
            ("upgrade", ""),
            ("connection", "Upgrade")
        ])));
    }

    #[test]
    fn keep_alive_upgrade_list_is_websocket() {
        assert!(is_upgrade_request(&headers(&[
            ("upgrade", "websocket"),
            ("connection", "keep-alive, Upgrade"),
        ])));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_upgrade_request(&headers(&[
            ("upgrade", "WebSocket"),
            ("connection", "UPGRADE"),
        ])));
    }

    #[test]
    fn other_protocols_are_not_websocket() {
        assert!(!is_upgrade_request(&headers(&[
            ("upgrade", "h2c"),
            ("connection", "Upgrade"),
        ])));
        assert!(!is_upgrade_request(&headers(&[
            ("upgrade", "websocket"),
            ("connection", "keep-alive"),
        ])));
    }
}
