//! Account registration and self-service endpoints.
//!
//! Flow Overview:
//! 1) `POST /v1/user` validates the payload, hashes the password, and in
//!    one transaction persists the account, issues a verification token,
//!    and enqueues the verification notification.
//! 2) `GET /v1/user/self` returns the public projection of the principal
//!    resolved by the authentication stage.
//! 3) `PUT /v1/user/self` applies an all-or-nothing update of the three
//!    mutable fields.

use super::auth::{self, Principal};
use anyhow::Context;
use crate::api::email::VERIFY_EMAIL_TOPIC;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sqlx::{PgPool, Row};
use tracing::{Instrument, error, info, info_span, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AccountResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub account_created: String,
    pub account_updated: String,
}

/// All three fields are required with non-empty values; the update is
/// all-or-nothing.
#[derive(ToSchema, Deserialize, Debug)]
pub struct AccountChanges {
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

enum CreateOutcome {
    Created(AccountResponse),
    DuplicateUsername,
}

#[utoipa::path(
    post,
    path= "/v1/user",
    request_body = NewAccount,
    responses (
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Missing or malformed fields", body = String),
        (status = 409, description = "Username already registered", body = String),
    ),
    tag= "accounts"
)]
pub async fn create(
    pool: Extension<PgPool>,
    payload: Option<Json<NewAccount>>,
) -> impl IntoResponse {
    let account: NewAccount = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if let Err(message) = validate_new_account(&account) {
        warn!("Rejected account payload: {message}");
        return (StatusCode::BAD_REQUEST, message.to_string()).into_response();
    }

    let password_hash = match auth::hash_password(&account.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create account".to_string(),
            )
                .into_response();
        }
    };

    match insert_account(&pool, &account, &password_hash).await {
        Ok(CreateOutcome::Created(response)) => {
            info!(username = %response.username, id = %response.id, "Account created");
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Ok(CreateOutcome::DuplicateUsername) => {
            warn!("Username already registered");
            (
                StatusCode::CONFLICT,
                "Username already registered".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to persist account: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create account".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path= "/v1/user/self",
    responses (
        (status = 200, description = "Authenticated account profile", body = AccountResponse),
        (status = 400, description = "Request carried a body or query string"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Account email is not verified"),
    ),
    tag= "accounts"
)]
pub async fn read(
    uri: Uri,
    headers: HeaderMap,
    Extension(principal): Extension<Principal>,
    pool: Extension<PgPool>,
) -> impl IntoResponse {
    if uri.query().is_some() || super::has_body(&headers) {
        warn!("Profile read carried a body or query string");
        return StatusCode::BAD_REQUEST.into_response();
    }

    match fetch_account(&pool, principal.account_id).await {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to fetch account profile: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path= "/v1/user/self",
    request_body = AccountChanges,
    responses (
        (status = 204, description = "Account updated"),
        (status = 400, description = "Unknown, missing or empty fields", body = String),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Account email is not verified"),
    ),
    tag= "accounts"
)]
pub async fn update(
    Extension(principal): Extension<Principal>,
    pool: Extension<PgPool>,
    payload: Option<Json<Map<String, Value>>>,
) -> impl IntoResponse {
    let fields: Map<String, Value> = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let changes = match parse_changes(&fields) {
        Ok(changes) => changes,
        Err(message) => {
            warn!("Rejected account update: {message}");
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
    };

    let password_hash = match auth::hash_password(&changes.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update account".to_string(),
            )
                .into_response();
        }
    };

    match apply_changes(&pool, principal.account_id, &changes, &password_hash).await {
        Ok(()) => {
            info!(username = %principal.username, "Account updated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to update account: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update account".to_string(),
            )
                .into_response()
        }
    }
}

fn validate_new_account(account: &NewAccount) -> Result<(), &'static str> {
    if account.first_name.is_empty() {
        return Err("first_name is required");
    }
    if account.last_name.is_empty() {
        return Err("last_name is required");
    }
    if account.password.is_empty() {
        return Err("password is required");
    }
    if !super::valid_email(&account.username) {
        return Err("username must be a valid email address");
    }
    // A ':' would make the username ambiguous inside Basic credentials.
    if account.username.contains(':') {
        return Err("username must not contain ':'");
    }
    Ok(())
}

/// Validate an update payload: exactly the three known keys, all present,
/// all non-empty strings. Anything else rejects the whole request.
fn parse_changes(fields: &Map<String, Value>) -> Result<AccountChanges, String> {
    let mut first_name = None;
    let mut last_name = None;
    let mut password = None;

    for (key, value) in fields {
        let slot = match key.as_str() {
            "first_name" => &mut first_name,
            "last_name" => &mut last_name,
            "password" => &mut password,
            _ => return Err(format!("field '{key}' is not updatable")),
        };

        let Some(text) = value.as_str().filter(|text| !text.is_empty()) else {
            return Err(format!("field '{key}' must be a non-empty string"));
        };

        *slot = Some(text.to_string());
    }

    match (first_name, last_name, password) {
        (Some(first_name), Some(last_name), Some(password)) => Ok(AccountChanges {
            first_name,
            last_name,
            password,
        }),
        _ => Err("first_name, last_name and password are all required".to_string()),
    }
}

async fn insert_account(
    pool: &PgPool,
    account: &NewAccount,
    password_hash: &str,
) -> anyhow::Result<CreateOutcome> {
    let mut tx = pool.begin().await.context("begin account transaction")?;

    let account_id = Uuid::new_v4();
    let query = r#"
        INSERT INTO accounts (id, username, password_hash, first_name, last_name)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING
            to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"') AS account_created,
            to_char(updated_at AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"') AS account_updated
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(&account.username)
        .bind(password_hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let row = match row {
        Ok(row) => row,
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(CreateOutcome::DuplicateUsername);
            }
            return Err(err).context("failed to insert account");
        }
    };

    let token = issue_verification_token(&mut tx, account_id, &account.username).await?;

    tx.commit().await.context("commit account transaction")?;

    info!(token = %token, "Verification token issued");

    Ok(CreateOutcome::Created(AccountResponse {
        id: account_id.to_string(),
        first_name: account.first_name.clone(),
        last_name: account.last_name.clone(),
        username: account.username.clone(),
        account_created: row.get("account_created"),
        account_updated: row.get("account_updated"),
    }))
}

/// Issue the token and enqueue its notification inside the caller's
/// transaction, so an account never commits without both.
async fn issue_verification_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_id: Uuid,
    username: &str,
) -> anyhow::Result<Uuid> {
    let token = Uuid::new_v4();
    let query = "INSERT INTO verification_tokens (token, account_id) VALUES ($1, $2)";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token)
        .bind(account_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert verification token")?;

    let payload = json!({
        "email": username,
        "token": token,
    });
    let payload_text = serde_json::to_string(&payload).context("serialize verification payload")?;

    let query = r"
        INSERT INTO email_outbox (topic, to_email, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(VERIFY_EMAIL_TOPIC)
        .bind(username)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to enqueue verification notification")?;

    Ok(token)
}

async fn fetch_account(pool: &PgPool, account_id: Uuid) -> anyhow::Result<Option<AccountResponse>> {
    let query = r#"
        SELECT id::text AS id, first_name, last_name, username,
            to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"') AS account_created,
            to_char(updated_at AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"') AS account_updated
        FROM accounts
        WHERE id = $1
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch account")?;

    Ok(row.map(|row| AccountResponse {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        username: row.get("username"),
        account_created: row.get("account_created"),
        account_updated: row.get("account_updated"),
    }))
}

async fn apply_changes(
    pool: &PgPool,
    account_id: Uuid,
    changes: &AccountChanges,
    password_hash: &str,
) -> anyhow::Result<()> {
    let query = r"
        UPDATE accounts
        SET first_name = $1,
            last_name = $2,
            password_hash = $3,
            updated_at = NOW()
        WHERE id = $4
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(password_hash)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update account")?;

    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account() -> NewAccount {
        NewAccount {
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            username: "john.doe@example.com".to_string(),
            password: "password123".to_string(),
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert_eq!(validate_new_account(&new_account()), Ok(()));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let mut account = new_account();
        account.first_name = String::new();
        assert!(validate_new_account(&account).is_err());

        let mut account = new_account();
        account.last_name = String::new();
        assert!(validate_new_account(&account).is_err());

        let mut account = new_account();
        account.password = String::new();
        assert!(validate_new_account(&account).is_err());
    }

    #[test]
    fn invalid_email_is_rejected() {
        let mut account = new_account();
        account.username = "john.doe".to_string();
        assert_eq!(
            validate_new_account(&account),
            Err("username must be a valid email address")
        );
    }

    #[test]
    fn colon_in_username_is_rejected() {
        let mut account = new_account();
        account.username = "john:doe@example.com".to_string();
        assert_eq!(
            validate_new_account(&account),
            Err("username must not contain ':'")
        );
    }

    fn changes(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn full_update_is_accepted() {
        let fields = changes(&[
            ("first_name", Value::from("Jane")),
            ("last_name", Value::from("Doe")),
            ("password", Value::from("newpassword123")),
        ]);
        let changes = parse_changes(&fields).expect("changes");
        assert_eq!(changes.first_name, "Jane");
        assert_eq!(changes.last_name, "Doe");
        assert_eq!(changes.password, "newpassword123");
    }

    #[test]
    fn partial_update_is_rejected() {
        let fields = changes(&[
            ("first_name", Value::from("Jane")),
            ("last_name", Value::from("Doe")),
        ]);
        assert!(parse_changes(&fields).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let fields = changes(&[
            ("first_name", Value::from("Jane")),
            ("last_name", Value::from("Doe")),
            ("password", Value::from("newpassword123")),
            ("is_verified", Value::from(true)),
        ]);
        assert_eq!(
            parse_changes(&fields).unwrap_err(),
            "field 'is_verified' is not updatable"
        );
    }

    #[test]
    fn username_change_is_rejected() {
        let fields = changes(&[
            ("first_name", Value::from("Jane")),
            ("last_name", Value::from("Doe")),
            ("password", Value::from("newpassword123")),
            ("username", Value::from("jane.doe@example.com")),
        ]);
        assert_eq!(
            parse_changes(&fields).unwrap_err(),
            "field 'username' is not updatable"
        );
    }

    #[test]
    fn empty_value_is_rejected() {
        let fields = changes(&[
            ("first_name", Value::from("")),
            ("last_name", Value::from("Doe")),
            ("password", Value::from("newpassword123")),
        ]);
        assert_eq!(
            parse_changes(&fields).unwrap_err(),
            "field 'first_name' must be a non-empty string"
        );
    }

    #[test]
    fn non_string_value_is_rejected() {
        let fields = changes(&[
            ("first_name", Value::from(42)),
            ("last_name", Value::from("Doe")),
            ("password", Value::from("newpassword123")),
        ]);
        assert!(parse_changes(&fields).is_err());
    }

    #[test]
    fn empty_update_is_rejected() {
        assert!(parse_changes(&Map::new()).is_err());
    }
}
