use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::info;

use bazaar_core::auth::{hash_password, verify_password, AuthError, IssuedToken, TokenService};
use bazaar_core::domain::user::{Role, User, UserId, UserProfile};
use bazaar_core::errors::{ApplicationError, DomainError, ResourceKind};

use crate::repositories::{RepositoryError, UserRepository};

pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user {0} was not found")]
    UserNotFound(UserId),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<IdentityError> for ApplicationError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::Validation(_) => Self::Domain(DomainError::Validation(value.to_string())),
            IdentityError::InvalidCredentials => Self::Unauthorized(value.to_string()),
            IdentityError::UserNotFound(id) => Self::not_found(ResourceKind::User, id),
            IdentityError::Auth(AuthError::InvalidToken(message)) => Self::Unauthorized(message),
            IdentityError::Auth(error) => Self::Integration(error.to_string()),
            IdentityError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registers a user with the `Client` role.
    async fn create_user(&self, profile: UserProfile, password: &str)
        -> Result<User, IdentityError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError>;
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, IdentityError>;
    fn check_password(&self, user: &User, password: &str) -> Result<bool, IdentityError>;
    async fn roles(&self, id: &UserId) -> Result<Vec<Role>, IdentityError>;
    async fn add_to_role(&self, id: &UserId, role: Role) -> Result<(), IdentityError>;
    fn issue_token(&self, user: &User) -> Result<IssuedToken, IdentityError>;

    /// Email + password login. Unknown email and wrong password are indistinguishable.
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, IssuedToken), IdentityError> {
        let user = self.find_by_email(email).await?.ok_or(IdentityError::InvalidCredentials)?;
        if !self.check_password(&user, password)? {
            return Err(IdentityError::InvalidCredentials);
        }
        let token = self.issue_token(&user)?;
        Ok((user, token))
    }
}

/// Password rules: at least six characters with a digit, a lowercase and an uppercase letter.
pub fn password_violations(password: &str) -> Vec<String> {
    let mut violations = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        violations.push(format!("password must be at least {MIN_PASSWORD_LENGTH} characters"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("password must contain a digit".to_string());
    }
    if !password.chars().any(char::is_lowercase) {
        violations.push("password must contain a lowercase letter".to_string());
    }
    if !password.chars().any(char::is_uppercase) {
        violations.push("password must contain an uppercase letter".to_string());
    }
    violations
}

pub struct LocalIdentityProvider {
    users: Arc<dyn UserRepository>,
    tokens: TokenService,
}

impl LocalIdentityProvider {
    pub fn new(users: Arc<dyn UserRepository>, tokens: TokenService) -> Self {
        Self { users, tokens }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn create_user(
        &self,
        profile: UserProfile,
        password: &str,
    ) -> Result<User, IdentityError> {
        let email = profile.email.trim().to_string();
        let mut violations = Vec::new();
        if email.is_empty() || !email.contains('@') {
            violations.push("a valid email is required".to_string());
        }
        violations.extend(password_violations(password));
        if violations.is_empty() && self.users.find_by_email(&email).await?.is_some() {
            violations.push(format!("email {email} is already registered"));
        }
        if !violations.is_empty() {
            return Err(IdentityError::Validation(violations));
        }

        let user = User {
            id: UserId::generate(),
            email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            password_hash: hash_password(password)?,
            roles: vec![Role::Client],
            created_at: Utc::now(),
        };
        self.users.insert(user.clone()).await.map_err(|error| match error {
            RepositoryError::Constraint(message) => IdentityError::Validation(vec![message]),
            other => IdentityError::Repository(other),
        })?;

        info!(event_name = "identity.user.registered", user_id = %user.id, "user registered");
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        Ok(self.users.find_by_email(email).await?)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, IdentityError> {
        Ok(self.users.find_by_id(id).await?)
    }

    fn check_password(&self, user: &User, password: &str) -> Result<bool, IdentityError> {
        Ok(verify_password(password, &user.password_hash)?)
    }

    async fn roles(&self, id: &UserId) -> Result<Vec<Role>, IdentityError> {
        self.users
            .find_by_id(id)
            .await?
            .map(|user| user.roles)
            .ok_or_else(|| IdentityError::UserNotFound(id.clone()))
    }

    async fn add_to_role(&self, id: &UserId, role: Role) -> Result<(), IdentityError> {
        if self.users.find_by_id(id).await?.is_none() {
            return Err(IdentityError::UserNotFound(id.clone()));
        }
        self.users.add_role(id, role).await?;
        Ok(())
    }

    fn issue_token(&self, user: &User) -> Result<IssuedToken, IdentityError> {
        Ok(self.tokens.issue(user, Utc::now())?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use bazaar_core::auth::TokenService;
    use bazaar_core::domain::user::{Role, UserProfile};

    use super::{password_violations, IdentityError, IdentityProvider, LocalIdentityProvider};
    use crate::repositories::InMemoryUserRepository;

    fn provider() -> LocalIdentityProvider {
        let tokens = TokenService::new(
            "identity-test-secret-with-enough-length".to_string().into(),
            "bazaar",
            "bazaar-clients",
            Duration::days(7),
        );
        LocalIdentityProvider::new(Arc::new(InMemoryUserRepository::new()), tokens)
    }

    fn profile(email: &str) -> UserProfile {
        UserProfile {
            email: email.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
        }
    }

    #[test]
    fn password_rules_report_every_violation() {
        assert!(password_violations("Secret1").is_empty());
        assert_eq!(password_violations("abc").len(), 3);
    }

    #[tokio::test]
    async fn registration_assigns_client_role_and_allows_sign_in() {
        let identity = provider();
        let user = identity.create_user(profile("ada@example.com"), "Secret1").await.expect("register");
        assert_eq!(user.roles, vec![Role::Client]);
        assert_ne!(user.password_hash, "Secret1");

        let (signed_in, token) = identity.sign_in("ADA@example.com", "Secret1").await.expect("sign in");
        assert_eq!(signed_in.id, user.id);
        assert!(!token.token.is_empty());

        let wrong = identity.sign_in("ada@example.com", "Secret2").await;
        assert!(matches!(wrong, Err(IdentityError::InvalidCredentials)));
        let unknown = identity.sign_in("nobody@example.com", "Secret1").await;
        assert!(matches!(unknown, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_validation_error() {
        let identity = provider();
        identity.create_user(profile("ada@example.com"), "Secret1").await.expect("first");

        let error = identity
            .create_user(profile("ada@example.com"), "Secret1")
            .await
            .expect_err("duplicate");
        match error {
            IdentityError::Validation(reasons) => {
                assert!(reasons.iter().any(|reason| reason.contains("already registered")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn roles_can_be_added_to_existing_users_only() {
        let identity = provider();
        let user = identity.create_user(profile("owner@example.com"), "Secret1").await.expect("user");

        identity.add_to_role(&user.id, Role::Owner).await.expect("add role");
        assert_eq!(identity.roles(&user.id).await.expect("roles"), vec![Role::Client, Role::Owner]);

        let ghost = bazaar_core::domain::user::UserId("missing".to_string());
        assert!(matches!(
            identity.add_to_role(&ghost, Role::Admin).await,
            Err(IdentityError::UserNotFound(_))
        ));
    }
}
