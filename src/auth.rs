//! Shop identity from Shopify session tokens.
//!
//! The embedded admin sends `Authorization: Bearer <session token>`, an HS256
//! JWT signed with the app secret whose `dest` claim is the shop's URL.

use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::ApiError;

/// The authenticated tenant (a shop domain such as `demo.myshopify.com`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopIdentity(String);

impl ShopIdentity {
    pub fn new(shop: impl Into<String>) -> Self {
        Self(shop.into())
    }

    pub fn shop(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub dest: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(api_secret: &str, api_key: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match api_key {
            Some(key) => validation.set_audience(&[key]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(api_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<ShopIdentity, AuthError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation)?;
        shop_from_dest(&data.claims.dest).ok_or(AuthError::MissingShop)
    }
}

fn shop_from_dest(dest: &str) -> Option<ShopIdentity> {
    let host = dest
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    (!host.is_empty() && !host.contains('/')).then(|| ShopIdentity::new(host.to_lowercase()))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl<S> FromRequestParts<S> for ShopIdentity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing session token".to_string()))?;
        let state = AppState::from_ref(state);
        Ok(state.sessions.verify(token)?)
    }
}

impl<S> OptionalFromRequestParts<S> for ShopIdentity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Ok(None);
        };
        let state = AppState::from_ref(state);
        Ok(Some(state.sessions.verify(token)?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("session token does not name a shop")]
    MissingShop,
}
