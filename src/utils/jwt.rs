// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppError};

pub const TOKEN_ACCESS: &str = "access";
pub const TOKEN_REFRESH: &str = "refresh";

/// JWT Claims structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    /// User's role (e.g., 'user', 'admin').
    pub role: String,
    /// Either "access" or "refresh". Only access tokens pass the auth middleware.
    pub token_type: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> i64 {
        self.sub.parse().unwrap_or(0)
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn sign(
    id: i64,
    role: &str,
    token_type: &str,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize
        + expiration_seconds as usize;

    let claims = Claims {
        sub: id.to_string(),
        role: role.to_owned(),
        token_type: token_type.to_owned(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Signs a short-lived access token for the user.
pub fn sign_access_token(id: i64, role: &str, config: &Config) -> Result<String, AppError> {
    sign(
        id,
        role,
        TOKEN_ACCESS,
        &config.jwt_secret,
        config.jwt_expiration,
    )
}

/// Signs a longer-lived refresh token for the user.
pub fn sign_refresh_token(id: i64, role: &str, config: &Config) -> Result<String, AppError> {
    sign(
        id,
        role,
        TOKEN_REFRESH,
        &config.jwt_secret,
        config.refresh_expiration,
    )
}

/// Verifies and decodes a JWT string.
///
/// Returns the `Claims` if valid, otherwise returns an `AppError`.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Verifies a token and requires it to be of the given type.
pub fn verify_token_type(token: &str, secret: &str, expected: &str) -> Result<Claims, AppError> {
    let claims = verify_jwt(token, secret)?;
    if claims.token_type != expected {
        return Err(AppError::AuthError("Wrong token type".to_string()));
    }
    Ok(claims)
}

/// Axum Middleware: Authentication.
///
/// Intercepts requests, validates the 'Authorization: Bearer <token>' header.
/// If valid, injects `Claims` into the request extensions for handlers to use.
/// If invalid, returns 401 Unauthorized.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    match verify_token_type(token, &config.jwt_secret, TOKEN_ACCESS) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Axum Middleware: Admin Authorization.
///
/// Must be used AFTER `auth_middleware`. Checks if the injected `Claims` has 'admin' role.
/// If not, returns 403 Forbidden.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if claims.role != "admin" {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trip() {
        let token = sign(42, "user", TOKEN_ACCESS, "secret", 600).unwrap();
        let claims = verify_token_type(&token, "secret", TOKEN_ACCESS).unwrap();
        assert_eq!(claims.user_id(), 42);
        assert!(!claims.is_admin());
    }

    #[test]
    fn refresh_token_rejected_as_access() {
        let token = sign(42, "user", TOKEN_REFRESH, "secret", 600).unwrap();
        assert!(verify_token_type(&token, "secret", TOKEN_ACCESS).is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = sign(42, "user", TOKEN_ACCESS, "secret", 600).unwrap();
        assert!(verify_jwt(&token, "other_secret").is_err());
    }
}
