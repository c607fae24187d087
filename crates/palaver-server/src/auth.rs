//! Ed25519 bearer token authentication.
//!
//! Tokens have the form `<user_id>.<expires_secs>.<signature_hex>` where the
//! signature covers the domain-separated message
//! `palaver.token.v1:<user_id>.<expires_secs>`. The server holds only the
//! verifying key; tokens are minted out of band by whoever holds the signing
//! key.
//!
//! Any defect in the token (wrong shape, bad hex, forged or expired
//! signature) maps to [`AuthError::InvalidSignature`]. The error does not
//! distinguish the failure modes, so a probing client learns nothing about
//! which check tripped.

use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use palaver_core::store::{AuthError, Authenticator, UserStore};
use palaver_proto::types::{UserId, UserIdentity};

/// Domain separator prefixed to the signed message.
const TOKEN_DOMAIN: &str = "palaver.token.v1:";

/// Verifies Ed25519 bearer tokens and resolves them to identities.
pub struct TokenAuthenticator {
    /// Public half of the token-minting keypair
    verifying_key: VerifyingKey,
    /// Identity lookup after signature verification
    users: Arc<dyn UserStore>,
}

impl TokenAuthenticator {
    /// Create an authenticator from a verifying key and a user store.
    pub fn new(verifying_key: VerifyingKey, users: Arc<dyn UserStore>) -> Self {
        Self { verifying_key, users }
    }

    fn parse(token: &str) -> Option<(UserId, u64, Signature)> {
        let mut parts = token.splitn(3, '.');
        let user_id: UserId = parts.next()?.parse().ok()?;
        let expires_secs: u64 = parts.next()?.parse().ok()?;

        let sig_bytes = hex::decode(parts.next()?).ok()?;
        let signature = Signature::from_slice(&sig_bytes).ok()?;

        Some((user_id, expires_secs, signature))
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn verify(
        &self,
        credential: Option<&str>,
        now_secs: u64,
    ) -> Result<UserIdentity, AuthError> {
        let token = credential.ok_or(AuthError::MissingCredential)?;

        let (user_id, expires_secs, signature) =
            Self::parse(token).ok_or(AuthError::InvalidSignature)?;

        let message = format!("{TOKEN_DOMAIN}{user_id}.{expires_secs}");
        self.verifying_key
            .verify(message.as_bytes(), &signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        if expires_secs <= now_secs {
            return Err(AuthError::InvalidSignature);
        }

        let identity = self
            .users
            .identity(user_id)
            .await
            .map_err(|_| AuthError::UnknownSubject)?
            .ok_or(AuthError::UnknownSubject)?;

        Ok(identity)
    }
}

/// Mint a token for a user (tooling and test helper).
#[must_use]
pub fn mint_token(signing_key: &SigningKey, user_id: UserId, expires_secs: u64) -> String {
    let message = format!("{TOKEN_DOMAIN}{user_id}.{expires_secs}");
    let signature = signing_key.sign(message.as_bytes());
    format!("{user_id}.{expires_secs}.{}", hex::encode(signature.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryUserStore;

    fn keypair() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn authenticator_with_user(user_id: UserId) -> (TokenAuthenticator, SigningKey) {
        let signing_key = keypair();
        let users = MemoryUserStore::new();
        users.add_user(UserIdentity { id: user_id, username: "alice".to_string(), avatar: None });

        let auth = TokenAuthenticator::new(signing_key.verifying_key(), Arc::new(users));
        (auth, signing_key)
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let (auth, signing_key) = authenticator_with_user(1);
        let token = mint_token(&signing_key, 1, 10_000);

        let identity = auth.verify(Some(&token), 5_000).await.unwrap();
        assert_eq!(identity.id, 1);
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn missing_credential_rejected() {
        let (auth, _) = authenticator_with_user(1);
        let err = auth.verify(None, 5_000).await.unwrap_err();
        assert_eq!(err, AuthError::MissingCredential);
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let (auth, signing_key) = authenticator_with_user(1);
        let token = mint_token(&signing_key, 1, 4_000);

        let err = auth.verify(Some(&token), 5_000).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn forged_signature_rejected() {
        let (auth, _) = authenticator_with_user(1);

        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        let token = mint_token(&other_key, 1, 10_000);

        let err = auth.verify(Some(&token), 5_000).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn tampered_user_id_rejected() {
        let (auth, signing_key) = authenticator_with_user(2);
        let token = mint_token(&signing_key, 1, 10_000);

        // Re-target the token at a different user, keeping the signature
        let tampered = token.replacen("1.", "2.", 1);

        let err = auth.verify(Some(&tampered), 5_000).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn malformed_token_rejected() {
        let (auth, _) = authenticator_with_user(1);

        for bad in ["", "garbage", "1.2", "1.2.nothex", "x.2.00", "1.y.00"] {
            let err = auth.verify(Some(bad), 5_000).await.unwrap_err();
            assert_eq!(err, AuthError::InvalidSignature, "token {bad:?}");
        }
    }

    #[tokio::test]
    async fn unknown_subject_rejected() {
        let (auth, signing_key) = authenticator_with_user(1);
        let token = mint_token(&signing_key, 42, 10_000);

        let err = auth.verify(Some(&token), 5_000).await.unwrap_err();
        assert_eq!(err, AuthError::UnknownSubject);
    }
}
