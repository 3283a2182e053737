use std::sync::Arc;

use anyhow::Context;
use tracing::instrument;

use crate::auth::{
    errors::StoreError,
    password,
    repo::UserRepo,
    repo_types::{NewUser, User},
};

/// Owns user records and the only path that turns a plaintext password into a stored hash.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn UserRepo>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn UserRepo>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<dyn UserRepo> {
        &self.repo
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.repo.find_by_email(email).await
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.repo.find_by_username(username).await
    }

    pub async fn find_by_login(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        self.repo
            .find_by_login(&identifier.to_lowercase(), identifier)
            .await
    }

    #[instrument(skip(self, plaintext_password))]
    pub async fn create(
        &self,
        full_name: &str,
        email: &str,
        username: &str,
        plaintext_password: &str,
    ) -> Result<User, StoreError> {
        let plain = plaintext_password.to_owned();
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
            .await
            .context("password hashing task")??;

        self.repo
            .insert(NewUser {
                full_name: full_name.to_owned(),
                email: email.to_owned(),
                username: username.to_owned(),
                password_hash,
            })
            .await
    }

    pub async fn verify_password(
        &self,
        user: &User,
        plaintext_password: &str,
    ) -> anyhow::Result<bool> {
        let stored = user.password_hash.clone();
        let plain = plaintext_password.to_owned();
        tokio::task::spawn_blocking(move || password::verify_password(&stored, &plain))
            .await
            .context("password verification task")?
    }
}
