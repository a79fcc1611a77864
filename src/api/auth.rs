use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::AppState;
use crate::db::models::User;
use crate::error::{ApiError, Result};
use crate::evm::signature::derive_deposit_address;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    /// Referral code of the inviting user, if any.
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
    /// Shown exactly once; the server stores it only for lookup.
    pub api_token: String,
}

const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| REFERRAL_CODE_ALPHABET[rng.gen_range(0..REFERRAL_CODE_ALPHABET.len())] as char)
        .collect()
}

fn generate_api_token() -> String {
    hex::encode(rand::thread_rng().gen::<[u8; 32]>())
}

fn validate_username(username: &str) -> Result<()> {
    let ok = (3..=32).contains(&username.len())
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');

    if !ok {
        return Err(ApiError::Validation(
            "username must be 3-32 characters of letters, digits, or underscore".to_string(),
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let username = request.username.trim().to_string();
    validate_username(&username)?;

    let referred_by: Option<Uuid> = match request.referral_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            let referrer: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM users WHERE referral_code = $1")
                    .bind(code.to_uppercase())
                    .fetch_optional(&state.db_pool)
                    .await?;
            Some(referrer.ok_or_else(|| {
                ApiError::Validation(format!("unknown referral code: {}", code))
            })?)
        }
        _ => None,
    };

    let user_id = Uuid::new_v4();
    let api_token = generate_api_token();
    let deposit_address = derive_deposit_address(&state.config.deposit_master_secret, user_id);

    let mut tx = state.db_pool.begin().await?;

    // referral codes collide rarely at 36^8; retry a couple of times on conflict
    let mut user: Option<User> = None;
    for _ in 0..3 {
        let referral_code = generate_referral_code();
        let inserted: Option<User> = sqlx::query_as(
            r#"
            INSERT INTO users (id, username, referral_code, referred_by, api_token, deposit_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (referral_code) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&username)
        .bind(&referral_code)
        .bind(referred_by)
        .bind(&api_token)
        .bind(&deposit_address)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint() == Some("users_username_key") => {
                ApiError::Conflict(format!("username {} is taken", username))
            }
            other => ApiError::from(other),
        })?;

        if inserted.is_some() {
            user = inserted;
            break;
        }
    }

    let user = user.ok_or_else(|| {
        ApiError::Internal("could not allocate a unique referral code".to_string())
    })?;

    sqlx::query("INSERT INTO balances (user_id) VALUES ($1)")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!("User {} registered as {}", user.id, user.username);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user, api_token }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("semi;colon").is_err());
    }

    #[test]
    fn referral_codes_are_eight_chars_of_the_alphabet() {
        for _ in 0..50 {
            let code = generate_referral_code();
            assert_eq!(code.len(), 8);
            assert!(code
                .bytes()
                .all(|b| REFERRAL_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn api_tokens_are_64_hex_chars() {
        let token = generate_api_token();
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(token, generate_api_token());
    }
}
