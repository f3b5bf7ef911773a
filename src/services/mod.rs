//! Orchestration over the record store, object storage and change feed. Every
//! operation takes the caller's [`Session`](crate::auth::Session) explicitly.

pub mod analysis;
pub mod auth;
pub mod comments;
pub mod deals;
pub mod documents;
pub mod milestones;
pub mod notifications;
pub mod signatures;

use crate::error::{AppError, AppResult};

/// Trims and lower-cases an email address, rejecting obviously malformed ones.
pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::bad_request(format!("invalid email address '{}'", raw.trim())));
    }
    Ok(email)
}
