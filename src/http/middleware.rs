//! Bearer token verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer};
use sha2::Sha256;

use crate::app::AppState;
use crate::game::UserId;
use crate::util::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

/// Claims we read from an HS256 token
#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    /// Subject, a string or numeric user id
    #[serde(deserialize_with = "subject_as_string")]
    pub sub: UserId,
    /// Expiration time (Unix timestamp), enforced when present
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

fn subject_as_string<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subject {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    let sub = match Subject::deserialize(deserializer)? {
        Subject::Text(s) => s,
        Subject::Int(n) => n.to_string(),
        Subject::Uint(n) => n.to_string(),
    };
    if sub.trim().is_empty() {
        return Err(serde::de::Error::custom("empty subject"));
    }
    Ok(sub)
}

/// Verify a JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp.is_some_and(|exp| exp < unix_secs()) {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim)
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Caller identity placed in request extensions by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub claims: JwtClaims,
}

/// Middleware to require authentication
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;
    let claims = verify_jwt(token, &state.config.jwt_secret)?;

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.sub.clone(),
        claims,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const SECRET: &str = "test-secret";

    /// Sign `payload` as an HS256 token
    pub(crate) fn sign(payload: &serde_json::Value, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{header}.{body}").as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{body}.{sig}")
    }

    #[test]
    fn accepts_string_and_numeric_subjects() {
        let token = sign(&serde_json::json!({ "sub": "user-7" }), SECRET);
        assert_eq!(assert_ok!(verify_jwt(&token, SECRET)).sub, "user-7");

        let token = sign(&serde_json::json!({ "sub": 42, "name": "Ann" }), SECRET);
        let claims = assert_ok!(verify_jwt(&token, SECRET));
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.name.as_deref(), Some("Ann"));
    }

    #[test]
    fn rejects_bad_signature() {
        let token = sign(&serde_json::json!({ "sub": "1" }), "other");
        assert!(matches!(verify_jwt(&token, SECRET), Err(AuthError::InvalidToken)));
        assert_err!(verify_jwt("a.b", SECRET));
        assert_err!(verify_jwt("a.b.c.d", SECRET));
    }

    #[test]
    fn rejects_missing_subject() {
        let token = sign(&serde_json::json!({ "name": "x" }), SECRET);
        assert_err!(verify_jwt(&token, SECRET));
        let token = sign(&serde_json::json!({ "sub": "" }), SECRET);
        assert_err!(verify_jwt(&token, SECRET));
    }

    #[test]
    fn expiry_is_enforced_when_present() {
        let expired = sign(&serde_json::json!({ "sub": "1", "exp": 1000 }), SECRET);
        assert!(matches!(verify_jwt(&expired, SECRET), Err(AuthError::TokenExpired)));

        let later = unix_secs() + 3600;
        let fresh = sign(&serde_json::json!({ "sub": "1", "exp": later }), SECRET);
        assert_ok!(verify_jwt(&fresh, SECRET));
    }

    #[test]
    fn bearer_prefix() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
