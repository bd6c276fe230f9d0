// SPDX-License-Identifier: AGPL-3.0-or-later

//! HMAC-signed bearer tokens (C10, §4.10). Wire format is
//! `hex(json(claims)) + "." + hex(hmac-sha256(json(claims)))` — no base64
//! dependency is introduced since `hex` is already carried for the frame
//! codec's error paths.

use std::{
    sync::Arc,
    time::Duration,
};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    error::CoreError,
    utils::{generate_token_id, now_epoch_secs},
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub token_id: String,
    pub user_id: String,
    pub game_id: String,
    pub username: String,
    pub token_type: TokenKind,
    pub issued_at: i64,
    pub not_before: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_id: String,
    pub expires_in: i64,
    pub expires_at: i64,
}

pub struct TokenService {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
            now_fn: Arc::new(now_epoch_secs),
        }
    }

    /// Test-only hook for P7's clock-dependent expiry coverage.
    #[cfg(test)]
    fn with_clock(mut self, now_fn: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now_fn = Arc::new(now_fn);
        self
    }

    pub fn generate(&self, user_id: &str, game_id: &str, username: &str) -> IssuedTokens {
        let now = (self.now_fn)();
        let token_id = generate_token_id();

        let access = self.encode(Claims {
            token_id: token_id.clone(),
            user_id: user_id.to_string(),
            game_id: game_id.to_string(),
            username: username.to_string(),
            token_type: TokenKind::Access,
            issued_at: now,
            not_before: now,
            expires_at: now + self.access_ttl.as_secs() as i64,
        });
        let refresh = self.encode(Claims {
            token_id: token_id.clone(),
            user_id: user_id.to_string(),
            game_id: game_id.to_string(),
            username: username.to_string(),
            token_type: TokenKind::Refresh,
            issued_at: now,
            not_before: now,
            expires_at: now + self.refresh_ttl.as_secs() as i64,
        });

        IssuedTokens {
            access_token: access,
            refresh_token: refresh,
            token_id,
            expires_in: self.access_ttl.as_secs() as i64,
            expires_at: now + self.access_ttl.as_secs() as i64,
        }
    }

    /// Verifies signature and expiry window. Every failure mode (bad
    /// signature, malformed encoding, expired, not-yet-valid) collapses to
    /// the same `Authentication` error; the specific cause is logged at the
    /// caller's boundary, not returned to the client.
    pub fn validate(&self, token: &str) -> Result<Claims, CoreError> {
        let (payload_hex, sig_hex) = token
            .split_once('.')
            .ok_or_else(|| CoreError::Authentication("malformed token".into()))?;

        let payload = hex::decode(payload_hex).map_err(|_| CoreError::Authentication("malformed token payload".into()))?;
        let signature = hex::decode(sig_hex).map_err(|_| CoreError::Authentication("malformed token signature".into()))?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| CoreError::Authentication("invalid signing key".into()))?;
        mac.update(&payload);
        mac.verify_slice(&signature).map_err(|_| CoreError::Authentication("signature mismatch".into()))?;

        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| CoreError::Authentication("malformed token claims".into()))?;

        let now = (self.now_fn)();
        if now >= claims.expires_at {
            return Err(CoreError::Authentication("token expired".into()));
        }
        if now < claims.not_before {
            return Err(CoreError::Authentication("token not yet valid".into()));
        }
        Ok(claims)
    }

    /// Validates `refresh_token`, then issues a fresh access/refresh pair
    /// for the same subject. The old refresh token is not revoked; it
    /// simply expires on its own schedule.
    pub fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, CoreError> {
        let claims = self.validate(refresh_token)?;
        if claims.token_type != TokenKind::Refresh {
            return Err(CoreError::Authentication("not a refresh token".into()));
        }
        Ok(self.generate(&claims.user_id, &claims.game_id, &claims.username))
    }

    pub fn extract_bearer(header: &str) -> Result<&str, CoreError> {
        header
            .strip_prefix("Bearer ")
            .ok_or_else(|| CoreError::Authentication("missing Bearer prefix".into()))
    }

    fn encode(&self, claims: Claims) -> String {
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        format!("{}.{}", hex::encode(&payload), hex::encode(signature))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    fn service() -> TokenService {
        TokenService::new(b"test-secret".to_vec(), Duration::from_secs(900), Duration::from_secs(86400))
    }

    #[test]
    fn generate_then_validate_round_trips() {
        let service = service();
        let issued = service.generate("u1", "chess", "alice");
        let claims = service.validate(&issued.access_token).expect("valid access token");
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.token_type, TokenKind::Access);
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let service = service();
        let issued = service.generate("u1", "chess", "alice");
        let mut tampered = issued.access_token.clone();
        tampered.push('0');
        assert!(service.validate(&tampered).is_err());
    }

    #[test]
    fn expired_token_is_rejected_via_injectable_clock() {
        let clock = Arc::new(AtomicI64::new(1_000));
        let clock_for_service = clock.clone();
        let service = TokenService::new(b"secret".to_vec(), Duration::from_secs(10), Duration::from_secs(100))
            .with_clock(move || clock_for_service.load(Ordering::Relaxed));

        let issued = service.generate("u1", "chess", "alice");
        assert!(service.validate(&issued.access_token).is_ok());

        clock.store(1_000 + 11, Ordering::Relaxed);
        assert!(service.validate(&issued.access_token).is_err());
    }

    #[test]
    fn token_is_rejected_at_the_exact_expiry_instant() {
        let clock = Arc::new(AtomicI64::new(1_000));
        let clock_for_service = clock.clone();
        let service = TokenService::new(b"secret".to_vec(), Duration::from_secs(10), Duration::from_secs(100))
            .with_clock(move || clock_for_service.load(Ordering::Relaxed));

        let issued = service.generate("u1", "chess", "alice");
        assert!(service.validate(&issued.access_token).is_ok());

        clock.store(1_000 + 9, Ordering::Relaxed);
        assert!(service.validate(&issued.access_token).is_ok());

        clock.store(1_000 + 10, Ordering::Relaxed);
        assert!(service.validate(&issued.access_token).is_err());
    }

    #[test]
    fn refresh_rotates_the_pair_and_rejects_access_tokens() {
        let service = service();
        let issued = service.generate("u1", "chess", "alice");
        assert!(service.refresh(&issued.access_token).is_err());

        let rotated = service.refresh(&issued.refresh_token).expect("rotate");
        let claims = service.validate(&rotated.access_token).expect("valid after rotation");
        assert_eq!(claims.user_id, "u1");
    }

    #[test]
    fn extract_bearer_requires_exact_prefix() {
        assert_eq!(TokenService::extract_bearer("Bearer abc123").expect("token"), "abc123");
        assert!(TokenService::extract_bearer("bearer abc123").is_err());
        assert!(TokenService::extract_bearer("abc123").is_err());
    }
}
