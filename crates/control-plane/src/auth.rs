use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use webfront_common::models::TokenResponse;
use webfront_common::{AppConfig, Result, WebfrontError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// 单用户登录与 HS256 令牌校验
pub struct AuthService {
    username: String,
    password: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl AuthService {
    pub fn new(username: &str, password: &str, secret: &[u8], ttl: Duration) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let secret = match &config.auth_jwt_secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("AUTH_JWT_SECRET not set, tokens will not survive a restart");
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
            }
        };
        let ttl = i64::try_from(config.auth_token_ttl_secs).unwrap_or(i64::MAX / 1000);
        Self::new(
            &config.auth_username,
            &config.auth_password,
            secret.as_bytes(),
            Duration::seconds(ttl),
        )
    }

    pub fn login(&self, username: &str, password: &str) -> Result<TokenResponse> {
        if username != self.username || password != self.password {
            return Err(WebfrontError::unauthorized("incorrect username or password"));
        }
        let now = Utc::now();
        let claims = Claims {
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| WebfrontError::Internal(anyhow::anyhow!("failed to sign token: {}", e)))?;
        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer".to_string(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| WebfrontError::unauthorized(format!("invalid token: {}", e)))
    }
}

/// Rejects requests without a valid `Authorization: Bearer` token.
pub async fn require_bearer(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| WebfrontError::unauthorized("missing bearer token"))?;

    state.auth.verify(token)?;
    Ok(next.run(req).await)
}
