//! OpenAPI document generation and the route that serves it.

use super::handlers;
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::users::create,
        handlers::users::read,
        handlers::users::update,
        handlers::verify::verify,
    ),
    components(schemas(
        handlers::health::Health,
        handlers::users::NewAccount,
        handlers::users::AccountResponse,
        handlers::users::AccountChanges,
    )),
    tags(
        (name = "accounts", description = "Account registration, profile and verification"),
        (name = "health", description = "Store liveness probe")
    )
)]
pub struct ApiDoc;

/// Serve the generated document as plain JSON.
pub async fn serve() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in ["/healthz", "/v1/user", "/v1/user/self", "/verify"] {
            assert!(
                paths.iter().any(|path| path.as_str() == expected),
                "missing path {expected}, got {paths:?}"
            );
        }
    }
}
