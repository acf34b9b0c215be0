//! Bearer tokens: HS256 JWTs signed with `secret_key`.

use crate::{api::models::users::Role, config::Config, errors::Error, types::UserId};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

fn secret(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "sign session: secret_key is not configured".to_string(),
        })
}

/// Mint a token for a user, valid for `session.token_lifetime`
pub fn create_session_token(config: &Config, user_id: UserId, email: &str, role: Role) -> Result<String, Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id,
        email: email.to_string(),
        role,
        iat: now,
        exp: now + config.session.token_lifetime.as_secs() as i64,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret(config)?)).map_err(|e| Error::Internal {
        operation: format!("sign session token: {e}"),
    })
}

/// Validate signature and expiry
pub fn verify_session_token(config: &Config, token: &str) -> Result<Claims, Error> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret(config)?), &Validation::default()).map_err(|e| {
        Error::Unauthenticated {
            message: Some(format!("Invalid bearer token: {e}")),
        }
    })?;
    Ok(data.claims)
}
