//! Route rules applied before any handler or credential check runs.
//!
//! Known paths carry a method allow-list, and anonymous endpoints refuse
//! requests that arrive with an `Authorization` header. Unknown paths fall
//! through to the router's 404 fallback untouched.

use axum::{
    extract::Request,
    http::{Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

struct RouteRule {
    path: &'static str,
    methods: &'static [Method],
    /// Credentials make no sense here; their presence is a malformed request.
    anonymous: bool,
}

static RULES: &[RouteRule] = &[
    RouteRule {
        path: "/healthz",
        methods: &[Method::GET],
        anonymous: true,
    },
    RouteRule {
        path: "/v1/user",
        methods: &[Method::POST],
        anonymous: true,
    },
    RouteRule {
        path: "/verify",
        methods: &[Method::GET],
        anonymous: true,
    },
    RouteRule {
        path: "/v1/user/self",
        methods: &[Method::GET, Method::PUT],
        anonymous: false,
    },
];

/// Decide whether a request violates the rules for its path.
fn evaluate(path: &str, method: &Method, has_authorization: bool) -> Option<StatusCode> {
    let rule = RULES.iter().find(|rule| rule.path == path)?;

    if rule.anonymous && has_authorization {
        return Some(StatusCode::BAD_REQUEST);
    }

    if !rule.methods.contains(method) {
        return Some(StatusCode::METHOD_NOT_ALLOWED);
    }

    None
}

/// Middleware enforcing the route rules for every inbound request.
pub async fn enforce(request: Request, next: Next) -> Response {
    let has_authorization = request.headers().contains_key(header::AUTHORIZATION);

    if let Some(status) = evaluate(request.uri().path(), request.method(), has_authorization) {
        warn!(
            path = request.uri().path(),
            method = %request.method(),
            status = status.as_u16(),
            "Request rejected by route rules"
        );
        return status.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_path_falls_through() {
        assert_eq!(evaluate("/nope", &Method::GET, false), None);
        assert_eq!(evaluate("/nope", &Method::DELETE, true), None);
    }

    #[test]
    fn known_paths_pass_with_allowed_method() {
        assert_eq!(evaluate("/healthz", &Method::GET, false), None);
        assert_eq!(evaluate("/v1/user", &Method::POST, false), None);
        assert_eq!(evaluate("/verify", &Method::GET, false), None);
        assert_eq!(evaluate("/v1/user/self", &Method::GET, true), None);
        assert_eq!(evaluate("/v1/user/self", &Method::PUT, true), None);
    }

    #[test]
    fn wrong_method_is_rejected() {
        assert_eq!(
            evaluate("/healthz", &Method::POST, false),
            Some(StatusCode::METHOD_NOT_ALLOWED)
        );
        assert_eq!(
            evaluate("/v1/user", &Method::GET, false),
            Some(StatusCode::METHOD_NOT_ALLOWED)
        );
        assert_eq!(
            evaluate("/v1/user/self", &Method::DELETE, true),
            Some(StatusCode::METHOD_NOT_ALLOWED)
        );
    }

    #[test]
    fn credentials_on_anonymous_path_are_rejected() {
        assert_eq!(
            evaluate("/healthz", &Method::GET, true),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            evaluate("/v1/user", &Method::POST, true),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            evaluate("/verify", &Method::GET, true),
            Some(StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn credential_check_precedes_method_check() {
        // Both rules violated: the malformed-credentials rejection wins.
        assert_eq!(
            evaluate("/verify", &Method::POST, true),
            Some(StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn protected_path_allows_credentials() {
        assert_eq!(evaluate("/v1/user/self", &Method::GET, false), None);
    }
}
