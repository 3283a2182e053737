use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::auth::{
    jwt::JwtKeys,
    repo::{PgUserRepo, UserRepo},
    services::SessionIssuer,
    store::CredentialStore,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionIssuer,
}

impl AppState {
    /// Connects to Postgres and returns the pool alongside the state so the
    /// caller can run migrations.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let repo = Arc::new(PgUserRepo::new(db.clone())) as Arc<dyn UserRepo>;
        let keys = JwtKeys::new(&config.jwt);
        Ok((Self::from_parts(config, repo, keys), db))
    }

    pub fn from_parts(config: Arc<AppConfig>, repo: Arc<dyn UserRepo>, keys: JwtKeys) -> Self {
        let sessions = SessionIssuer::new(CredentialStore::new(repo), keys);
        Self { config, sessions }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::auth::repo::MemoryUserRepo;

        let config = Arc::new(AppConfig::test());
        let keys = JwtKeys::new(&config.jwt);
        Self::from_parts(config, Arc::new(MemoryUserRepo::default()), keys)
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.keys().clone()
    }
}
