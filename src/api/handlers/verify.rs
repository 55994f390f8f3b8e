//! Email-ownership verification endpoint.
//!
//! The token from the verification link is accepted only within the
//! configured window from issuance. Expired tokens stay on record but are
//! inert; re-verifying a still-fresh token is harmless because the flag is
//! set idempotently.

use crate::api::ServiceConfig;
use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Deserialize, Debug)]
pub struct VerifyParams {
    token: Option<String>,
}

enum VerifyOutcome {
    Verified,
    UnknownToken,
    Expired,
}

#[utoipa::path(
    get,
    path= "/verify",
    params(
        ("token" = String, Query, description = "Verification token from the emailed link")
    ),
    responses (
        (status = 200, description = "Account verified"),
        (status = 400, description = "Missing, malformed or expired token", body = String),
        (status = 404, description = "Unknown verification token", body = String),
    ),
    tag= "accounts"
)]
pub async fn verify(
    Query(params): Query<VerifyParams>,
    pool: Extension<PgPool>,
    config: Extension<ServiceConfig>,
) -> impl IntoResponse {
    let Some(token) = params.token.as_deref().filter(|token| !token.is_empty()) else {
        warn!("Verification request without token");
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    };

    let Ok(token) = Uuid::parse_str(token) else {
        warn!("Verification token is not a valid identifier");
        return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
    };

    match consume_token(&pool, token, config.verification_ttl_seconds()).await {
        Ok(VerifyOutcome::Verified) => {
            info!("Account verified");
            (
                StatusCode::OK,
                Json(json!({ "message": "account verified" })),
            )
                .into_response()
        }
        Ok(VerifyOutcome::UnknownToken) => (
            StatusCode::NOT_FOUND,
            "Unknown verification token".to_string(),
        )
            .into_response(),
        Ok(VerifyOutcome::Expired) => {
            warn!("Verification link expired");
            (
                StatusCode::BAD_REQUEST,
                "Verification link expired".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to verify account: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn consume_token(pool: &PgPool, token: Uuid, ttl_seconds: i64) -> Result<VerifyOutcome> {
    let query = r"
        SELECT accounts.id AS account_id,
               (NOW() - verification_tokens.issued_at) > ($2 * INTERVAL '1 second') AS expired
        FROM verification_tokens
        JOIN accounts ON accounts.id = verification_tokens.account_id
        WHERE verification_tokens.token = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .bind(ttl_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to look up verification token")?;

    let Some(row) = row else {
        return Ok(VerifyOutcome::UnknownToken);
    };

    if row.get::<bool, _>("expired") {
        return Ok(VerifyOutcome::Expired);
    }

    let account_id: Uuid = row.get("account_id");
    let query = r"
        UPDATE accounts
        SET is_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark account verified")?;

    Ok(VerifyOutcome::Verified)
}
