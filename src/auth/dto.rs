use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    /// The web client checks this before submitting, so it may be absent.
    #[serde(default)]
    pub confirm_password: Option<String>,
}

/// Request body for login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Response returned after register or login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub token: String,
}

impl AuthResponse {
    pub fn new(user: User, token: String) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name,
            username: user.username,
            email: user.email,
            token,
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
        }
    }
}
