//! Request identity.
//!
//! Every identified request carries a signed session token, either in an
//! `Authorization: Bearer` header or in the `session` cookie. Requests without
//! one are issued a fresh identity, which is returned in both places on the
//! response. A token that is present but does not verify is rejected.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use jiff::{SignedDuration, Timestamp};
use pinhole_core::UserId;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";
pub const DEFAULT_TOKEN_TTL: SignedDuration = SignedDuration::from_hours(24);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired at {0}")]
    Expired(Timestamp),
    #[error("failed to issue token: {0}")]
    Issue(String),
    #[error("unusable signing secret: {0}")]
    InvalidSecret(String),
}

/// A freshly issued identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub user: UserId,
    pub token: String,
    pub expires_at: Timestamp,
}

/// Issues and verifies session tokens. Opaque to everything below the gateway.
pub trait IdentityProvider: Send + Sync + 'static {
    fn issue(&self) -> Result<Issued, AuthError>;

    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// HMAC-SHA256 signed tokens of the form `base64url(claims).base64url(mac)`.
#[derive(Clone)]
pub struct SignedTokenProvider {
    mac: HmacSha256,
    ttl: SignedDuration,
}

impl std::fmt::Debug for SignedTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTokenProvider")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SignedTokenProvider {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        Self::with_ttl(secret, DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(secret: impl AsRef<[u8]>, ttl: SignedDuration) -> Result<Self, AuthError> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac, ttl })
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|e| AuthError::Issue(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }
}

impl IdentityProvider for SignedTokenProvider {
    fn issue(&self) -> Result<Issued, AuthError> {
        let expires_at = Timestamp::now()
            .checked_add(self.ttl)
            .map_err(|e| AuthError::Issue(e.to_string()))?;
        let user = UserId::new(Uuid::new_v4().to_string());

        let token = self.sign(&Claims {
            sub: user.to_string(),
            exp: expires_at.as_second(),
        })?;

        Ok(Issued {
            user,
            token,
            expires_at,
        })
    }

    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;

        let expires_at = Timestamp::from_second(claims.exp).map_err(|_| AuthError::Malformed)?;
        if expires_at <= Timestamp::now() {
            return Err(AuthError::Expired(expires_at));
        }

        Ok(UserId::new(claims.sub))
    }
}

/// The user a request acts for, inserted by [`identify`].
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: UserId,
    /// Issued for this request; no prior token was presented.
    pub fresh: bool,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn session_cookie_header(issued: &Issued) -> Option<HeaderValue> {
    let max_age = issued.expires_at.as_second() - Timestamp::now().as_second();
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={}; Path=/; Max-Age={max_age}; HttpOnly; Secure; SameSite=Strict",
        issued.token
    ))
    .ok()
}

/// Middleware resolving the request's [`Identity`].
pub async fn identify(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let presented = bearer_token(request.headers()).or_else(|| session_cookie(request.headers()));

    if let Some(token) = presented {
        return match state.identity().verify(&token) {
            Ok(user) => {
                request
                    .extensions_mut()
                    .insert(Identity { user, fresh: false });
                next.run(request).await
            }
            Err(err) => {
                debug!(error = %err, "rejected session token");
                AppError::Unauthorized.into_response()
            }
        };
    }

    let issued = match state.identity().issue() {
        Ok(issued) => issued,
        Err(err) => {
            warn!(error = %err, "failed to issue session token");
            return AppError::Unauthorized.into_response();
        }
    };

    debug!(user = %issued.user, "issued new identity");
    request.extensions_mut().insert(Identity {
        user: issued.user.clone(),
        fresh: true,
    });

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Some(cookie) = session_cookie_header(&issued) {
        headers.append(SET_COOKIE, cookie);
    }
    if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", issued.token)) {
        headers.insert(AUTHORIZATION, bearer);
    }
    response
}
