use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData as JwtTokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sigflow_shared::User;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,    // Subject (user ID)
    pub org: Uuid,    // Organization the session is scoped to
    pub role: String,
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

#[derive(Debug)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub fn create_jwt(user: &User, secret: &str) -> Result<TokenResponse, jsonwebtoken::errors::Error> {
    let issued_at = Utc::now();
    let expires_at = issued_at + Duration::hours(24); // 24 hour expiration

    let claims = Claims {
        sub: user.id,
        org: user.organization_id,
        role: user.role.clone(),
        exp: expires_at.timestamp(),
        iat: issued_at.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(TokenResponse {
        token,
        expires_at,
    })
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtTokenData<Claims>, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
}
