use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

fn jwt_secret() -> String {
    std::env::var("CB_JWT_SECRET").unwrap_or_else(|_| "dev-jwt-secret-change-me".to_string())
}

fn user_validation() -> Validation {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation
}

pub fn issue_user_jwt(user_id: Uuid, email: &str, ttl_hours: i64) -> Result<(String, usize), String> {
    let exp = (Utc::now() + Duration::hours(ttl_hours)).timestamp() as usize;
    let claims = UserClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret().as_bytes()),
    )
    .map(|token| (token, exp))
    .map_err(|err| format!("Failed to sign user JWT: {}", err))
}

pub fn verify_user_jwt(token: &str) -> Result<UserClaims, String> {
    decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret().as_bytes()),
        &user_validation(),
    )
    .map(|decoded| decoded.claims)
    .map_err(|err| format!("Invalid user JWT: {}", err))
}
