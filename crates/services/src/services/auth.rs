//! Password login and access-token verification.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use db::models::user::{CreateUser, User};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use utils::{
    auth::{LoginResponse, Role},
    jwt::{Claims, TokenError, TokenSigner},
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Clone, Debug)]
pub struct AuthService {
    signer: TokenSigner,
}

impl AuthService {
    pub fn new(signer: TokenSigner) -> Self {
        Self { signer }
    }

    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))
    }

    pub fn verify_password(password: &str, password_hash: &str) -> bool {
        PasswordHash::new(password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub async fn register(
        pool: &SqlitePool,
        data: &CreateUser,
        password: &str,
    ) -> Result<User, AuthError> {
        let hash = Self::hash_password(password)?;
        Ok(User::create(pool, data, &hash).await?)
    }

    pub async fn login(
        &self,
        pool: &SqlitePool,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, AuthError> {
        let user = User::find_by_email(pool, email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !Self::verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.signer.issue(user.id, user.role)?;
        info!(user_id = %user.id, role = %user.role, "User logged in");

        Ok(LoginResponse {
            token,
            user: user.profile(),
        })
    }

    pub fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(self.signer.verify(token)?)
    }

    /// Create the admin account if no user with that email exists yet
    pub async fn ensure_admin(
        pool: &SqlitePool,
        email: &str,
        password: &str,
    ) -> Result<bool, AuthError> {
        if User::find_by_email(pool, email).await?.is_some() {
            return Ok(false);
        }

        let data = CreateUser {
            email: email.to_string(),
            name: "Administrator".to_string(),
            role: Role::Admin,
        };
        let user = Self::register(pool, &data, password).await?;
        info!(user_id = %user.id, email = %user.email, "Created bootstrap admin account");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use db::DBService;

    use super::*;

    fn service() -> AuthService {
        AuthService::new(TokenSigner::new(b"test", Duration::hours(1)))
    }

    #[test]
    fn password_hash_verifies_only_matching_password() {
        let hash = AuthService::hash_password("hunter2").unwrap();
        assert!(AuthService::verify_password("hunter2", &hash));
        assert!(!AuthService::verify_password("hunter3", &hash));
        assert!(!AuthService::verify_password("hunter2", "not-a-hash"));
    }

    #[tokio::test]
    async fn login_issues_token_for_profile() {
        let db = DBService::in_memory().await.unwrap();
        AuthService::ensure_admin(&db.pool, "admin@example.com", "pw").await.unwrap();

        let auth = service();
        let session = auth.login(&db.pool, "admin@example.com", "pw").await.unwrap();
        let claims = auth.authenticate(&session.token).unwrap();

        assert_eq!(session.user.role, Role::Admin);
        assert_eq!(claims.user_id().unwrap(), session.user.id);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let db = DBService::in_memory().await.unwrap();
        AuthService::ensure_admin(&db.pool, "admin@example.com", "pw").await.unwrap();

        let err = service()
            .login(&db.pool, "admin@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent() {
        let db = DBService::in_memory().await.unwrap();
        assert!(AuthService::ensure_admin(&db.pool, "a@example.com", "pw").await.unwrap());
        assert!(!AuthService::ensure_admin(&db.pool, "a@example.com", "pw").await.unwrap());
    }
}
