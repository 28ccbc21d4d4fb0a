//! Identity: signup, login, logout, and session-backed profile extraction.
//!
//! Credential verification and session persistence live here; the rest of
//! the API only ever sees an authenticated [`Profile`]. Profiles are
//! bootstrapped on first sight of an identity, so a credential created
//! before the profiles table existed (or by a concurrent signup) still
//! resolves to exactly one profile row.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation;
use crate::db::{
    AuthResponse, Credential, DbPool, LoginRequest, Profile, Role, Session, SignupRequest,
};
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err)
        if db_err.message().contains("UNIQUE constraint failed"))
}

/// Register a new credential and its profile record.
pub async fn register(pool: &DbPool, request: &SignupRequest) -> Result<Profile, ApiError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let email = request.email.trim();

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    // Email uniqueness is enforced by the store (UNIQUE COLLATE NOCASE), not
    // by a read-then-write check.
    let inserted = sqlx::query(
        "INSERT INTO credentials (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(email)
    .bind(&password_hash)
    .bind(&now)
    .execute(pool)
    .await;

    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            return Err(ApiError::duplicate_email());
        }
        return Err(err.into());
    }

    let profile = ensure_profile(
        pool,
        &id,
        email,
        Some(request.name.trim()),
        Some(request.role),
    )
    .await?;

    Ok(profile)
}

/// Verify a credential and resolve its profile, bootstrapping one if the
/// identity has never been seen by the profile store.
pub async fn authenticate(pool: &DbPool, request: &LoginRequest) -> Result<Profile, ApiError> {
    let credential: Option<Credential> =
        sqlx::query_as("SELECT * FROM credentials WHERE email = ?")
            .bind(request.email.trim())
            .fetch_optional(pool)
            .await?;

    // Same error whether the email is unknown or the password is wrong
    let credential = credential.ok_or_else(ApiError::invalid_credentials)?;
    if !verify_password(&request.password, &credential.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let profile = ensure_profile(pool, &credential.id, &credential.email, None, None).await?;

    if let Some(expected) = request.expected_role {
        if profile.role != expected {
            return Err(ApiError::role_mismatch(expected.as_str()));
        }
    }

    Ok(profile)
}

/// Load the profile for an identity, creating it if absent.
///
/// The insert is conflict-tolerant: two near-simultaneous observers of the
/// same identity both end up reading the single winning row, never creating
/// two profiles.
pub async fn ensure_profile(
    pool: &DbPool,
    id: &str,
    email: &str,
    name: Option<&str>,
    role: Option<Role>,
) -> Result<Profile, ApiError> {
    let existing: Option<Profile> = sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    if let Some(profile) = existing {
        return Ok(profile);
    }

    // Default name is the email local-part; default role is customer.
    let name = name
        .map(str::to_string)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());
    let role = role.unwrap_or(Role::Customer);
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO profiles (id, email, name, role, created_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(id)
    .bind(email)
    .bind(&name)
    .bind(role)
    .bind(&now)
    .execute(pool)
    .await?;

    let profile = sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(profile)
}

/// Create a session for a profile and return the bearer token.
pub async fn create_session(
    pool: &DbPool,
    profile_id: &str,
    ttl_days: i64,
) -> Result<String, ApiError> {
    let token = generate_token();
    let token_hash = hash_token(&token);

    let expires_at = Utc::now()
        .checked_add_signed(chrono::Duration::days(ttl_days))
        .ok_or_else(|| ApiError::internal("Session expiry out of range"))?
        .to_rfc3339();

    let session_id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO sessions (id, profile_id, token_hash, expires_at, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session_id)
    .bind(profile_id)
    .bind(&token_hash)
    .bind(&expires_at)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(token)
}

/// Resolve a bearer token to its profile, rejecting expired sessions.
pub async fn current_profile(pool: &DbPool, token: &str) -> Result<Profile, ApiError> {
    let token_hash = hash_token(token);
    let now = Utc::now().to_rfc3339();

    let session: Option<Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(&token_hash)
            .bind(&now)
            .fetch_optional(pool)
            .await?;
    let session = session.ok_or_else(|| ApiError::unauthorized("Missing or expired session"))?;

    let profile: Option<Profile> = sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
        .bind(&session.profile_id)
        .fetch_optional(pool)
        .await?;
    profile.ok_or_else(|| ApiError::unauthorized("Session user no longer exists"))
}

/// Remove the session for a token. Unknown tokens are a no-op.
pub async fn delete_session(pool: &DbPool, token: &str) -> Result<(), ApiError> {
    let token_hash = hash_token(token);
    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(&token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get("Authorization").and_then(|h| h.to_str().ok())?;
    auth_header
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

/// Signup endpoint
///
/// POST /api/auth/signup
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validation::validate_email(request.email.trim()) {
        errors.add("email", e);
    }
    if let Err(e) = validation::validate_password(&request.password) {
        errors.add("password", e);
    }
    if let Err(e) = validation::validate_required_text(&request.name, "Name") {
        errors.add("name", e);
    }
    errors.finish()?;

    let profile = register(&state.db, &request).await?;
    let token = create_session(&state.db, &profile.id, state.config.auth.session_ttl_days).await?;

    tracing::info!(user = %profile.id, role = %profile.role, "New account registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user: profile })))
}

/// Login endpoint
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if request.email.trim().is_empty() {
        errors.add("email", "Email is required");
    }
    if request.password.is_empty() {
        errors.add("password", "Password is required");
    }
    errors.finish()?;

    let profile = authenticate(&state.db, &request).await?;
    let token = create_session(&state.db, &profile.id, state.config.auth.session_ttl_days).await?;

    Ok(Json(AuthResponse { token, user: profile }))
}

/// Logout endpoint. Idempotent: no active session is not an error.
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    if let Some(token) = extract_token(&headers) {
        delete_session(&state.db, &token).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Current-user endpoint (the initial session check)
///
/// GET /api/auth/me
pub async fn me(profile: Profile) -> Json<Profile> {
    Json(profile)
}

/// Extractor for getting the current authenticated profile from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for Profile {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
        current_profile(&state.db, &token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db::test_support::memory_pool;

    fn signup_request(email: &str, role: Role) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "hunter22".to_string(),
            name: "Pat".to_string(),
            role,
        }
    }

    fn login_request(email: &str, password: &str, expected_role: Option<Role>) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            expected_role,
        }
    }

    async fn credential_count(pool: &DbPool) -> i64 {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM credentials")
            .fetch_one(pool)
            .await
            .unwrap();
        count.0
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[tokio::test]
    async fn duplicate_email_rejected_case_insensitively() {
        let pool = memory_pool().await;
        register(&pool, &signup_request("pat@example.com", Role::Customer))
            .await
            .unwrap();
        assert_eq!(credential_count(&pool).await, 1);

        let err = register(&pool, &signup_request("Pat@Example.COM", Role::Carrier))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateEmail);
        assert_eq!(credential_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn bad_password_and_unknown_email_are_indistinguishable() {
        let pool = memory_pool().await;
        register(&pool, &signup_request("pat@example.com", Role::Customer))
            .await
            .unwrap();

        let wrong_password = authenticate(&pool, &login_request("pat@example.com", "nope42", None))
            .await
            .unwrap_err();
        let unknown_email = authenticate(&pool, &login_request("who@example.com", "hunter22", None))
            .await
            .unwrap_err();

        assert_eq!(wrong_password.code(), ErrorCode::InvalidCredentials);
        assert_eq!(unknown_email.code(), ErrorCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn expected_role_mismatch_is_distinct_from_bad_credentials() {
        let pool = memory_pool().await;
        register(&pool, &signup_request("pat@example.com", Role::Customer))
            .await
            .unwrap();

        let err = authenticate(
            &pool,
            &login_request("pat@example.com", "hunter22", Some(Role::Carrier)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoleMismatch);

        // The matching entry point still works
        let profile = authenticate(
            &pool,
            &login_request("pat@example.com", "hunter22", Some(Role::Customer)),
        )
        .await
        .unwrap();
        assert_eq!(profile.role, Role::Customer);
    }

    #[tokio::test]
    async fn profile_bootstrapped_for_bare_credential() {
        let pool = memory_pool().await;

        // Credential with no profile row, as an external identity provider
        // would leave behind
        let hash = hash_password("hunter22").unwrap();
        sqlx::query(
            "INSERT INTO credentials (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind("cred1")
        .bind("solo@example.com")
        .bind(&hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

        let profile = authenticate(&pool, &login_request("solo@example.com", "hunter22", None))
            .await
            .unwrap();
        assert_eq!(profile.id, "cred1");
        assert_eq!(profile.name, "solo");
        assert_eq!(profile.role, Role::Customer);

        // Re-observing the identity must not create a second profile
        ensure_profile(&pool, "cred1", "solo@example.com", None, None)
            .await
            .unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE id = 'cred1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn session_round_trip_and_idempotent_logout() {
        let pool = memory_pool().await;
        let profile = register(&pool, &signup_request("pat@example.com", Role::Carrier))
            .await
            .unwrap();

        let token = create_session(&pool, &profile.id, 7).await.unwrap();
        let resolved = current_profile(&pool, &token).await.unwrap();
        assert_eq!(resolved.id, profile.id);

        delete_session(&pool, &token).await.unwrap();
        let err = current_profile(&pool, &token).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);

        // Logging out again is a no-op, not an error
        delete_session(&pool, &token).await.unwrap();
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let pool = memory_pool().await;
        let profile = register(&pool, &signup_request("pat@example.com", Role::Customer))
            .await
            .unwrap();

        let token = create_session(&pool, &profile.id, 7).await.unwrap();
        sqlx::query("UPDATE sessions SET expires_at = ?")
            .bind((Utc::now() - chrono::Duration::hours(1)).to_rfc3339())
            .execute(&pool)
            .await
            .unwrap();

        let err = current_profile(&pool, &token).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }
}
