use std::sync::Arc;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{
    claims::Claims,
    clock::{Clock, SystemClock},
};
use crate::config::JwtConfig;

/// Every session token is valid for this long after issuance.
pub const TOKEN_TTL: Duration = Duration::days(30);

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            clock,
        }
    }

    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            exp: (now + TOKEN_TTL).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    /// Checks signature, issuer and audience, then expiry against the injected clock.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_exp = false;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        if data.claims.exp <= self.clock.now().unix_timestamp() {
            anyhow::bail!("token expired");
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}
