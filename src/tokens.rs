use std::sync::Arc;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::credentials::verify_password_blocking;
use crate::error::AuthError;
use crate::repo::UserRepository;
use crate::user::{SessionToken, TokenOrigin, User};

/// Claims embedded in a session token. `sub` is the sole identity claim.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

/// JWT signing and verification keys derived from the process-wide secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: TimeDuration,
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            ttl: TimeDuration::minutes(config.ttl_minutes),
        }
    }

    fn sign(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data =
            decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(|e| {
                warn!(error = %e, "jwt rejected");
                AuthError::InvalidToken
            })?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

/// Session-token lifecycle: issue, verify, revoke, and the password login
/// flow that ties credentials to issuance.
#[derive(Clone)]
pub struct TokenService {
    keys: JwtKeys,
    repo: Arc<dyn UserRepository>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, repo: Arc<dyn UserRepository>) -> Self {
        Self {
            keys: JwtKeys::new(config),
            repo,
        }
    }

    /// Signs a fresh token for the user and atomically appends it to the
    /// persisted token list. Two concurrent issuances for the same user both
    /// land; neither can overwrite the other.
    pub async fn issue_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let token = self.keys.sign(user_id)?;
        let entry = SessionToken {
            origin: TokenOrigin::Web,
            token: token.clone(),
        };
        self.repo
            .push_token(user_id, &entry, OffsetDateTime::now_utc())
            .await?;
        info!(user_id = %user_id, "session token issued");
        Ok(token)
    }

    /// Signature check followed by a revocation check against the persisted
    /// list. A token that decodes fine but is no longer on the user's record
    /// has been revoked and is rejected.
    pub async fn verify_token(&self, token: &str) -> Result<Uuid, AuthError> {
        let claims = self.keys.verify(token)?;
        let user = self
            .repo
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::Authentication)?;
        if !user.has_token(token) {
            warn!(user_id = %claims.sub, "token not in active list");
            return Err(AuthError::Authentication);
        }
        Ok(user.id)
    }

    /// Removes the matching entry from the user's token list. Revoking an
    /// absent token is a no-op, not an error.
    pub async fn revoke_token(&self, user_id: Uuid, token: &str) -> Result<(), AuthError> {
        self.repo
            .pull_token(user_id, token, OffsetDateTime::now_utc())
            .await?;
        info!(user_id = %user_id, "session token revoked");
        Ok(())
    }

    /// Password login: email lookup, off-thread password check, then token
    /// issuance for the authenticated user.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String), AuthError> {
        let user = self
            .repo
            .find_by_email(email)
            .await?
            .ok_or(AuthError::NotFound)?;
        let ok = verify_password_blocking(password.to_owned(), user.password_hash.clone()).await?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::Authentication);
        }
        let token = self.issue_token(user.id).await?;
        info!(user_id = %user.id, "user logged in");
        Ok((user, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::hash_password;
    use crate::repo::InMemoryUserRepository;
    use crate::user::User;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".into(),
            ttl_minutes: 60,
        }
    }

    async fn service_with_user(config: JwtConfig) -> (TokenService, Uuid) {
        let repo = Arc::new(InMemoryUserRepository::new());
        let user = User::new(
            "a@test.com".into(),
            hash_password("secret1").unwrap(),
            None,
            None,
        );
        let user_id = user.id;
        repo.insert(&user).await.unwrap();
        (TokenService::new(&config, repo), user_id)
    }

    #[tokio::test]
    async fn issue_then_verify_returns_user_id() {
        let (service, user_id) = service_with_user(test_config()).await;
        let token = service.issue_token(user_id).await.unwrap();
        assert_eq!(service.verify_token(&token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn issue_for_unknown_user_is_not_found() {
        let (service, _) = service_with_user(test_config()).await;
        let err = service.issue_token(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn verify_rejects_malformed_token() {
        let (service, _) = service_with_user(test_config()).await;
        let err = service.verify_token("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn verify_rejects_token_signed_with_other_secret() {
        let (service, user_id) = service_with_user(test_config()).await;
        let forged = JwtKeys::new(&JwtConfig {
            secret: "other-secret".into(),
            ttl_minutes: 60,
        })
        .sign(user_id)
        .unwrap();
        let err = service.verify_token(&forged).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn verify_rejects_expired_token() {
        let (service, user_id) = service_with_user(JwtConfig {
            secret: "test-secret".into(),
            ttl_minutes: -5,
        })
        .await;
        let token = service.issue_token(user_id).await.unwrap();
        let err = service.verify_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn revoked_token_fails_authentication() {
        let (service, user_id) = service_with_user(test_config()).await;
        let token = service.issue_token(user_id).await.unwrap();
        service.revoke_token(user_id, &token).await.unwrap();
        let err = service.verify_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication));
    }

    #[tokio::test]
    async fn revoking_absent_token_is_a_noop() {
        let (service, user_id) = service_with_user(test_config()).await;
        service.revoke_token(user_id, "never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn login_issues_verifiable_token() {
        let (service, user_id) = service_with_user(test_config()).await;
        let (user, token) = service.login("a@test.com", "secret1").await.unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(service.verify_token(&token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let (service, _) = service_with_user(test_config()).await;
        let err = service.login("a@test.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication));
    }

    #[tokio::test]
    async fn login_rejects_unknown_email() {
        let (service, _) = service_with_user(test_config()).await;
        let err = service.login("b@test.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }
}
