//! Password hashing and policy.

use crate::error::AppError;

/// Characters that count as "special" for the password policy.
pub const SPECIAL_CHARS: &str = "@$!%*?&";

pub const MIN_PASSWORD_LEN: usize = 12;

/// Hash `password` with bcrypt on the blocking pool.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("bcrypt: {}", e)))
}

/// Check `password` against a bcrypt hash on the blocking pool.
///
/// A malformed hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| AppError::Internal(format!("verify task failed: {}", e)))
}

/// Rules `password` breaks; empty when it is acceptable.
pub fn check_password_policy(password: &str) -> Vec<&'static str> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push("Password must be at least 12 characters long");
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| SPECIAL_CHARS.contains(c));
    if !(has_lower && has_upper && has_digit && has_special) {
        problems.push(
            "Password must contain uppercase and lowercase letters, numbers and special characters",
        );
    }
    problems
}
