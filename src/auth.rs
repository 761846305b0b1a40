//! Identity from the hosted auth provider.
//!
//! The provider signs HS256 access tokens with the project's JWT secret and
//! `aud = "authenticated"`. We only verify them; sign-up, sign-in and refresh
//! all happen against the provider directly.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const AUDIENCE: &str = "authenticated";
pub const SESSION_COOKIE: &str = "sb-access-token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub aud: String,
    pub exp: i64,
}

pub fn decode_access_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// The signed-in caller. Use as a handler argument on any route that needs one.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn cookie_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))?;

        let claims = decode_access_token(token, state.config.auth_jwt_secret.expose_secret())
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected access token");
                AppError::Unauthorized("Invalid or expired token".into())
            })?;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;

        Ok(AuthUser {
            user_id,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-that-is-long-enough-for-hmac";

    fn token(aud: &str, exp_offset: i64, secret: &str) -> String {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: Some("sam@example.com".into()),
            role: Some("authenticated".into()),
            aud: aud.into(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let claims = decode_access_token(&token(AUDIENCE, 3600, SECRET), SECRET).unwrap();
        assert_eq!(claims.email.as_deref(), Some("sam@example.com"));
        assert!(Uuid::parse_str(&claims.sub).is_ok());
    }

    #[test]
    fn rejects_expired_token() {
        // well beyond the default 60s leeway
        assert!(decode_access_token(&token(AUDIENCE, -600, SECRET), SECRET).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        assert!(decode_access_token(&token(AUDIENCE, 3600, "other-secret"), SECRET).is_err());
    }

    #[test]
    fn rejects_wrong_audience() {
        assert!(decode_access_token(&token("anon", 3600, SECRET), SECRET).is_err());
    }

    #[test]
    fn reads_session_cookie() {
        let (parts, _) = Request::builder()
            .header(COOKIE, "theme=dark; sb-access-token=abc.def.ghi; other=1")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(cookie_token(&parts), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&parts), None);
    }

    #[test]
    fn bearer_requires_prefix() {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Token abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
