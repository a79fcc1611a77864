use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{WalletChallenge, WalletLink};
use crate::error::{ApiError, Result};
use crate::evm::signature::{normalize_address, recover_signer};

/// Challenge/response proof of wallet ownership. A link is only created after
/// the user signs a server-issued nonce with the wallet's key; possession of an
/// address string alone proves nothing.
pub struct WalletProofService {
    db_pool: PgPool,
    ttl_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct IssuedChallenge {
    pub address: String,
    pub nonce: String,
    pub message: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub fn challenge_message(address: &str, nonce: &str, issued_at: DateTime<Utc>) -> String {
    format!(
        "XNRT wallet ownership proof\n\nAddress: {}\nNonce: {}\nIssued At: {}",
        address,
        nonce,
        issued_at.to_rfc3339()
    )
}

impl WalletProofService {
    pub fn new(db_pool: PgPool, ttl_minutes: i64) -> Self {
        Self {
            db_pool,
            ttl_minutes,
        }
    }

    pub async fn issue_challenge(&self, user_id: Uuid, address: &str) -> Result<IssuedChallenge> {
        let address = normalize_address(address)?;

        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM wallet_links WHERE address = $1")
                .bind(&address)
                .fetch_optional(&self.db_pool)
                .await?;

        match owner {
            Some(id) if id == user_id => return Err(ApiError::AlreadyLinked),
            Some(_) => {
                return Err(ApiError::Conflict(
                    "this address is linked to another account".to_string(),
                ))
            }
            None => {}
        }

        // opportunistic cleanup of stale unconsumed challenges
        sqlx::query("DELETE FROM wallet_challenges WHERE expires_at < NOW() AND consumed = FALSE")
            .execute(&self.db_pool)
            .await?;

        let nonce = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::minutes(self.ttl_minutes);
        let message = challenge_message(&address, &nonce, issued_at);

        sqlx::query(
            "INSERT INTO wallet_challenges \
             (user_id, address, nonce, message, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user_id)
        .bind(&address)
        .bind(&nonce)
        .bind(&message)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&self.db_pool)
        .await?;

        Ok(IssuedChallenge {
            address,
            nonce,
            message,
            issued_at,
            expires_at,
        })
    }

    /// Verifies the signature over the stored challenge message and links the
    /// wallet. The challenge row is locked and consumed in the same transaction
    /// as the link insert, so a challenge can succeed at most once.
    pub async fn confirm_challenge(
        &self,
        user_id: Uuid,
        address: &str,
        nonce: &str,
        signature: &str,
        issued_at: Option<DateTime<Utc>>,
    ) -> Result<WalletLink> {
        let address = normalize_address(address)?;
        let mut tx = self.db_pool.begin().await?;

        let challenge: WalletChallenge = sqlx::query_as(
            "SELECT * FROM wallet_challenges WHERE address = $1 AND nonce = $2 FOR UPDATE",
        )
        .bind(&address)
        .bind(nonce)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::ChallengeNotFound)?;

        if challenge.user_id != user_id {
            return Err(ApiError::ChallengeNotFound);
        }
        // sub-second tolerance: clients echo back an RFC 3339 rendering
        if let Some(claimed) = issued_at {
            if (claimed - challenge.issued_at).num_seconds().abs() > 1 {
                return Err(ApiError::ChallengeNotFound);
            }
        }
        if challenge.consumed {
            return Err(ApiError::AlreadyLinked);
        }
        if Utc::now() > challenge.expires_at {
            return Err(ApiError::ChallengeExpired);
        }

        let signer = recover_signer(&challenge.message, signature)?;
        if signer != address {
            return Err(ApiError::InvalidSignature);
        }

        sqlx::query("UPDATE wallet_challenges SET consumed = TRUE WHERE id = $1")
            .bind(challenge.id)
            .execute(&mut *tx)
            .await?;

        let link: Option<WalletLink> = sqlx::query_as(
            "INSERT INTO wallet_links (user_id, address) VALUES ($1, $2) \
             ON CONFLICT (address) DO NOTHING RETURNING *",
        )
        .bind(user_id)
        .bind(&address)
        .fetch_optional(&mut *tx)
        .await?;

        match link {
            Some(link) => {
                tx.commit().await?;
                tracing::info!("Wallet {} linked to user {}", link.address, user_id);
                Ok(link)
            }
            None => {
                // the address got linked between challenge issue and confirm
                let owner: Option<Uuid> =
                    sqlx::query_scalar("SELECT user_id FROM wallet_links WHERE address = $1")
                        .bind(&address)
                        .fetch_optional(&mut *tx)
                        .await?;

                if owner == Some(user_id) {
                    Err(ApiError::AlreadyLinked)
                } else {
                    Err(ApiError::Conflict(
                        "this address is linked to another account".to_string(),
                    ))
                }
            }
        }
    }

    pub async fn linked_wallets(&self, user_id: Uuid) -> Result<Vec<WalletLink>> {
        let links = sqlx::query_as(
            "SELECT * FROM wallet_links WHERE user_id = $1 ORDER BY verified_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_embeds_all_challenge_fields() {
        let issued_at = Utc::now();
        let message = challenge_message(
            "0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0",
            "deadbeefdeadbeefdeadbeefdeadbeef",
            issued_at,
        );
        assert!(message.contains("0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0"));
        assert!(message.contains("deadbeefdeadbeefdeadbeefdeadbeef"));
        assert!(message.contains(&issued_at.to_rfc3339()));
    }

    #[test]
    fn distinct_nonces_produce_distinct_messages() {
        let issued_at = Utc::now();
        let address = "0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0";
        assert_ne!(
            challenge_message(address, "nonce-one", issued_at),
            challenge_message(address, "nonce-two", issued_at)
        );
    }
}
