use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{
    errors::StoreError,
    repo_types::{NewUser, User},
};

/// Durable user records with unique email and username.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    /// Record whose email equals `email` or whose username equals `username`.
    async fn find_by_login(&self, email: &str, username: &str) -> Result<Option<User>, StoreError>;
    /// Fails with `DuplicateKey` when email or username is taken; atomic in the backend.
    async fn insert(&self, new: NewUser) -> Result<User, StoreError>;
}

const USER_COLUMNS: &str = "id, full_name, email, username, password_hash, created_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_where(&self, clause: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where("email = $1", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_where("username = $1", username).await
    }

    async fn find_by_login(&self, email: &str, username: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $2 ORDER BY created_at LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (full_name, email, username, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&new.full_name)
            .bind(&new.email)
            .bind(&new.username)
            .bind(&new.password_hash)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }
}

#[cfg(test)]
pub use memory::MemoryUserRepo;
