use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{password, Session};
use crate::error::{AppError, AppResult};
use crate::models::{NewRefreshToken, User};
use crate::state::AppState;
use crate::store::UserStore;

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<IssuedTokens> {
    let email = email.trim().to_ascii_lowercase();
    let user = state
        .store()
        .find_user_by_email(&email)
        .await?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(user_id = %user.id, "rejected login with wrong password");
        return Err(AppError::unauthorized());
    }

    info!(user_id = %user.id, "user logged in");
    issue_tokens(state, &user).await
}

/// Rotates the refresh token: the presented one is revoked and a new pair is
/// issued.
pub async fn refresh(state: &AppState, refresh_value: &str) -> AppResult<IssuedTokens> {
    let now = Utc::now().naive_utc();
    let token = state
        .store()
        .consume_refresh_token(&hash_refresh_token(refresh_value), now)
        .await?
        .ok_or_else(AppError::unauthorized)?;

    let user = state.store().find_user(token.user_id).await?;
    issue_tokens(state, &user).await
}

/// Revokes the presented refresh token, or every token of the user when none
/// (or an unknown one) is presented.
pub async fn logout(
    state: &AppState,
    session: &Session,
    refresh_value: Option<&str>,
) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    let mut revoked = 0;
    if let Some(value) = refresh_value {
        let hashed = hash_refresh_token(value);
        revoked = state
            .store()
            .revoke_refresh_tokens(session.user_id, Some(&hashed), now)
            .await?;
    }
    if revoked == 0 {
        state
            .store()
            .revoke_refresh_tokens(session.user_id, None, now)
            .await?;
    }
    Ok(())
}

pub async fn current_user(state: &AppState, session: &Session) -> AppResult<User> {
    state.store().find_user(session.user_id).await
}

async fn issue_tokens(state: &AppState, user: &User) -> AppResult<IssuedTokens> {
    let access_token = state.jwt.generate_token(user).map_err(AppError::from)?;

    let now = Utc::now();
    let refresh_token = generate_refresh_token();
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    state
        .store()
        .insert_refresh_token(NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_refresh_token(&refresh_token),
            issued_at: now.naive_utc(),
            expires_at: refresh_expires_at.naive_utc(),
        })
        .await?;

    Ok(IssuedTokens {
        access_token,
        expires_in: state.config.jwt_expiry_minutes * 60,
        refresh_token,
        refresh_expires_at,
    })
}

pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
