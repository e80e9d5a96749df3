use crate::config::AuthConfig;
use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Injected into request extensions after a bearer token is accepted.
#[derive(Clone, Debug)]
pub struct TokenAuth {
    pub owner_id: String,
}

/// Verifies API tokens minted by the external identity provider.
///
/// Tokens are held only as SHA-256 digests. An empty provider disables the
/// check entirely, which is meant for local development.
pub struct CredentialProvider {
    tokens: HashMap<String, TokenAuth>,
}

impl CredentialProvider {
    pub fn new<I>(digests: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let tokens = digests
            .into_iter()
            .map(|(digest, owner_id)| (digest.to_ascii_lowercase(), TokenAuth { owner_id }))
            .collect();
        Self { tokens }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config
                .api_tokens
                .iter()
                .map(|t| (t.token_sha256.clone(), t.owner_id.clone())),
        )
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn resolve(&self, plaintext: &str) -> Option<TokenAuth> {
        self.tokens.get(&hash_token(plaintext)).cloned()
    }
}

/// SHA-256 hex digest of a plaintext token.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Owner a request is scoped to, if it carried a token.
pub fn resolve_owner(token_auth: &Option<axum::Extension<TokenAuth>>) -> Option<String> {
    token_auth
        .as_ref()
        .map(|axum::Extension(auth)| auth.owner_id.clone())
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Require `Authorization: Bearer <token>` when tokens are configured.
pub async fn require_bearer(mut request: Request<Body>, next: Next) -> Result<Response, Response> {
    let Some(provider) = request.extensions().get::<Arc<CredentialProvider>>().cloned() else {
        tracing::error!("bearer auth: CredentialProvider not configured");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "auth not configured").into_response());
    };

    if !provider.is_enabled() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    let Some(token) = token else {
        return Err(unauthorized("missing bearer token"));
    };

    match provider.resolve(&token) {
        Some(auth) => {
            tracing::debug!(owner_id = %auth.owner_id, "bearer auth ok");
            request.extensions_mut().insert(auth);
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "auth rejected: unknown bearer token");
            Err(unauthorized("invalid bearer token"))
        }
    }
}
