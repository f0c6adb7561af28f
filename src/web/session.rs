use crate::state::SharedState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::web::ApiError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
}

/// Mints a bearer token. The web frontend's auth flow shares SESSION_KEY
/// and issues these on login; the service itself only signs in tests.
pub fn sign_session(user_id: Uuid, key: &[u8]) -> Result<String, SessionError> {
    let exp = Utc::now() + Duration::hours(24);
    let payload = format!("{}|{}", user_id, exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    ))
}

pub fn verify_session(token: &str, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 2 {
        return Err(SessionError::Invalid);
    }
    let payload_bytes = general_purpose::STANDARD
        .decode(parts[0])
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::STANDARD
        .decode(parts[1])
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let (user_raw, exp_raw) = payload.split_once('|').ok_or(SessionError::Invalid)?;
    let user_id = Uuid::parse_str(user_raw).map_err(|_| SessionError::Invalid)?;
    let exp: i64 = exp_raw.parse().map_err(|_| SessionError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims { user_id, exp })
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Axum extractor yielding the authenticated user id from a bearer token.
pub struct UserSession(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared = SharedState::from_ref(state);

        let token =
            extract_bearer(&parts.headers).ok_or_else(ApiError::unauthorized)?;

        let claims = verify_session(&token, &shared.session_key).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            ApiError::unauthorized()
        })?;

        Ok(UserSession(claims.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let key = b"0123456789abcdef0123456789abcdef";
        let user_id = Uuid::new_v4();
        let token = sign_session(user_id, key).unwrap();
        let claims = verify_session(&token, key).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let key = b"0123456789abcdef0123456789abcdef";
        let token = sign_session(Uuid::new_v4(), key).unwrap();

        let other_user = general_purpose::STANDARD.encode(format!(
            "{}|{}",
            Uuid::new_v4(),
            (Utc::now() + Duration::hours(24)).timestamp()
        ));
        let sig = token.split('.').nth(1).unwrap();
        let forged = format!("{other_user}.{sig}");
        assert!(matches!(
            verify_session(&forged, key),
            Err(SessionError::Signature)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = sign_session(Uuid::new_v4(), b"key-one-key-one-key-one-key-one!").unwrap();
        assert!(verify_session(&token, b"key-two-key-two-key-two-key-two!").is_err());
    }

    #[test]
    fn garbage_tokens_are_invalid() {
        let key = b"0123456789abcdef0123456789abcdef";
        assert!(matches!(
            verify_session("not-a-token", key),
            Err(SessionError::Invalid)
        ));
        assert!(matches!(
            verify_session("a.b.c", key),
            Err(SessionError::Invalid)
        ));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc.def".parse().unwrap(),
        );
        assert_eq!(extract_bearer(&headers).as_deref(), Some("abc.def"));

        let mut basic = HeaderMap::new();
        basic.insert(
            axum::http::header::AUTHORIZATION,
            "Basic abc".parse().unwrap(),
        );
        assert_eq!(extract_bearer(&basic), None);
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
