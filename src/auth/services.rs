use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    dto::{AuthResponse, LoginRequest, RegisterRequest},
    errors::AuthError,
    jwt::JwtKeys,
    store::CredentialStore,
};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[^@\s]+$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Usernames never contain `@`, so a login identifier can't hit one user by
/// email and another by username.
pub(crate) fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

/// Registration input after trimming and email case folding.
#[derive(Debug)]
struct Registration {
    full_name: String,
    email: String,
    username: String,
    password: String,
}

fn validate_registration(req: RegisterRequest) -> Result<Registration, AuthError> {
    let full_name = req.full_name.trim().to_owned();
    let email = req.email.trim().to_lowercase();
    let username = req.username.trim().to_owned();
    let confirm = req.confirm_password.unwrap_or_else(|| req.password.clone());

    if full_name.is_empty() || email.is_empty() || username.is_empty() || req.password.is_empty() {
        return Err(AuthError::validation("All fields are required"));
    }
    if !is_valid_email(&email) {
        return Err(AuthError::validation("Invalid email"));
    }
    if !is_valid_username(&username) {
        return Err(AuthError::validation("Username must not contain '@' or spaces"));
    }
    if req.password != confirm {
        return Err(AuthError::validation("Passwords do not match"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    Ok(Registration {
        full_name,
        email,
        username,
        password: req.password,
    })
}

/// Validates credentials and mints session tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    store: CredentialStore,
    keys: JwtKeys,
}

impl SessionIssuer {
    pub fn new(store: CredentialStore, keys: JwtKeys) -> Self {
        Self { store, keys }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    #[instrument(skip(self, req))]
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        let reg = validate_registration(req).map_err(|e| {
            warn!(reason = %e, "registration rejected");
            e
        })?;

        if self.store.find_by_email(&reg.email).await?.is_some() {
            warn!(email = %reg.email, "email already registered");
            return Err(AuthError::DuplicateEmail);
        }
        if self.store.find_by_username(&reg.username).await?.is_some() {
            warn!(username = %reg.username, "username already registered");
            return Err(AuthError::DuplicateUsername);
        }

        // A concurrent registration can still win the race; the store's
        // unique constraint turns that into DuplicateEmail/DuplicateUsername.
        let user = self
            .store
            .create(&reg.full_name, &reg.email, &reg.username, &reg.password)
            .await?;

        let token = self.issue_token(user.id)?;
        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(AuthResponse::new(user, token))
    }

    #[instrument(skip(self, req))]
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        let identifier = req.username_or_email.trim();
        if identifier.is_empty() || req.password.is_empty() {
            warn!("login with empty identifier or password");
            return Err(AuthError::InvalidCredentials);
        }

        let Some(user) = self.store.find_by_login(identifier).await? else {
            warn!("login unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.store.verify_password(&user, &req.password).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.issue_token(user.id)?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthResponse::new(user, token))
    }

    pub fn issue_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        Ok(self.keys.sign(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            clock::ManualClock,
            errors::INVALID_CREDENTIALS,
            repo::{MemoryUserRepo, UserRepo},
            repo_types::NewUser,
        },
        config::AppConfig,
    };
    use std::sync::Arc;
    use time::{macros::datetime, Duration};

    fn issuer_with_clock(clock: Arc<ManualClock>) -> (SessionIssuer, Arc<MemoryUserRepo>) {
        let repo = Arc::new(MemoryUserRepo::default());
        let keys = JwtKeys::with_clock(&AppConfig::test().jwt, clock);
        let issuer = SessionIssuer::new(CredentialStore::new(repo.clone()), keys);
        (issuer, repo)
    }

    fn issuer() -> (SessionIssuer, Arc<MemoryUserRepo>) {
        issuer_with_clock(Arc::new(ManualClock::new(datetime!(2024-05-01 09:00 UTC))))
    }

    fn register_req(email: &str, username: &str, password: &str, confirm: &str) -> RegisterRequest {
        RegisterRequest {
            full_name: "Jane Doe".into(),
            email: email.into(),
            username: username.into(),
            password: password.into(),
            confirm_password: Some(confirm.into()),
        }
    }

    fn login_req(identifier: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username_or_email: identifier.into(),
            password: password.into(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("jane@x.com"));
        assert!(!is_valid_email("jane"));
        assert!(!is_valid_email("jane@x"));
        assert!(!is_valid_email("ja ne@x.com"));
    }

    #[test]
    fn username_validation() {
        assert!(is_valid_username("janed"));
        assert!(is_valid_username("jane.doe_1-x"));
        assert!(!is_valid_username("jane@x.com"));
        assert!(!is_valid_username("jane doe"));
        assert!(is_valid_username("josé"));
        assert!(is_valid_username("Jane+Doe!"));
        assert!(is_valid_username(&"a".repeat(64)));
    }

    #[tokio::test]
    async fn non_ascii_username_registers_and_logs_in() {
        let (issuer, _) = issuer();
        let reg = issuer
            .register(register_req("jose@x.com", "josé", "password123", "password123"))
            .await
            .unwrap();
        assert_eq!(reg.username, "josé");

        let login = issuer.login(login_req("josé", "password123")).await.unwrap();
        assert_eq!(login.id, reg.id);
    }

    #[tokio::test]
    async fn register_then_login_with_username_and_email() {
        let (issuer, _) = issuer();
        let reg = issuer
            .register(register_req("jane@x.com", "janed", "password123", "password123"))
            .await
            .unwrap();
        assert_eq!(reg.username, "janed");
        assert_eq!(reg.email, "jane@x.com");
        assert_eq!(reg.full_name, "Jane Doe");

        for identifier in ["janed", "jane@x.com", "  Jane@X.com "] {
            let login = issuer.login(login_req(identifier, "password123")).await.unwrap();
            assert_eq!(login.id, reg.id);
            assert_eq!(login.username, reg.username);
            assert_eq!(login.email, reg.email);
            assert_eq!(login.full_name, reg.full_name);
        }
    }

    #[tokio::test]
    async fn register_normalizes_email() {
        let (issuer, _) = issuer();
        let reg = issuer
            .register(register_req(" Jane@X.COM ", "janed", "password123", "password123"))
            .await
            .unwrap();
        assert_eq!(reg.email, "jane@x.com");
    }

    #[tokio::test]
    async fn duplicate_email_regardless_of_username() {
        let (issuer, _) = issuer();
        issuer
            .register(register_req("jane@x.com", "janed", "password123", "password123"))
            .await
            .unwrap();
        let err = issuer
            .register(register_req("jane@x.com", "someone", "password123", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));
        assert_eq!(err.to_string(), "Email already exists");
    }

    #[tokio::test]
    async fn duplicate_username_regardless_of_email() {
        let (issuer, _) = issuer();
        issuer
            .register(register_req("jane@x.com", "janed", "password123", "password123"))
            .await
            .unwrap();
        let err = issuer
            .register(register_req("new@x.com", "janed", "password123", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUsername));
        assert_eq!(err.to_string(), "Username already exists");
    }

    #[tokio::test]
    async fn invalid_input_never_touches_the_store() {
        let (issuer, repo) = issuer();
        let cases = [
            register_req("jane@x.com", "janed", "password123", "password124"),
            register_req("jane@x.com", "janed", "short", "short"),
            register_req("jane@x.com", "janed", "seven77", "seven77"),
            register_req("", "janed", "password123", "password123"),
            register_req("jane@x.com", "", "password123", "password123"),
            register_req("not-an-email", "janed", "password123", "password123"),
        ];
        for req in cases {
            let err = issuer.register(req).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "got {err:?}");
        }
        let mut blank_name = register_req("jane@x.com", "janed", "password123", "password123");
        blank_name.full_name = "   ".into();
        assert!(matches!(
            issuer.register(blank_name).await.unwrap_err(),
            AuthError::Validation(_)
        ));
        assert_eq!(repo.len(), 0);
    }

    #[tokio::test]
    async fn eight_character_password_is_enough() {
        let (issuer, _) = issuer();
        let reg = issuer
            .register(register_req("jane@x.com", "janed", "eight888", "eight888"))
            .await
            .unwrap();
        assert_eq!(reg.username, "janed");
    }

    #[tokio::test]
    async fn missing_confirm_counts_as_confirmed() {
        let (issuer, _) = issuer();
        let mut req = register_req("jane@x.com", "janed", "password123", "");
        req.confirm_password = None;
        assert!(issuer.register(req).await.is_ok());
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (issuer, _) = issuer();
        issuer
            .register(register_req("jane@x.com", "janed", "password123", "password123"))
            .await
            .unwrap();

        let wrong_pw_username = issuer.login(login_req("janed", "nope-nope")).await.unwrap_err();
        let wrong_pw_email = issuer.login(login_req("jane@x.com", "nope-nope")).await.unwrap_err();
        let unknown = issuer.login(login_req("ghost", "password123")).await.unwrap_err();

        let empty_identifier = issuer.login(login_req("   ", "password123")).await.unwrap_err();
        let empty_password = issuer.login(login_req("janed", "")).await.unwrap_err();

        for err in [wrong_pw_username, wrong_pw_email, unknown, empty_identifier, empty_password] {
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert_eq!(err.to_string(), INVALID_CREDENTIALS);
        }
    }

    #[tokio::test]
    async fn corrupt_stored_hash_is_a_server_error() {
        let (issuer, repo) = issuer();
        repo.insert(NewUser {
            full_name: "Jane Doe".into(),
            email: "jane@x.com".into(),
            username: "janed".into(),
            password_hash: "not-a-phc-string".into(),
        })
        .await
        .unwrap();

        let err = issuer.login(login_req("janed", "password123")).await.unwrap_err();
        assert!(matches!(err, AuthError::Server(_)), "got {err:?}");
        assert_eq!(err.to_string(), "Server Error");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_registrations_with_same_email() {
        let (issuer, repo) = issuer();
        let a = {
            let issuer = issuer.clone();
            tokio::spawn(async move {
                issuer
                    .register(register_req("jane@x.com", "janed", "password123", "password123"))
                    .await
            })
        };
        let b = {
            let issuer = issuer.clone();
            tokio::spawn(async move {
                issuer
                    .register(register_req("jane@x.com", "jdoe", "password123", "password123"))
                    .await
            })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AuthError::DuplicateEmail)))
                .count(),
            1
        );
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn issued_token_decodes_to_user_and_expires() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 09:00 UTC)));
        let (issuer, _) = issuer_with_clock(clock.clone());
        let reg = issuer
            .register(register_req("jane@x.com", "janed", "password123", "password123"))
            .await
            .unwrap();

        let claims = issuer.keys().verify(&reg.token).unwrap();
        assert_eq!(claims.sub, reg.id);

        clock.advance(Duration::days(30) + Duration::seconds(1));
        assert!(issuer.keys().verify(&reg.token).is_err());
    }
}
