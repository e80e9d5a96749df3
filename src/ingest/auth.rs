use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Secret shared with the view/redirect tier that reports scans.
#[derive(Clone)]
pub struct HmacSecret(pub String);

/// Maximum body size read for verification (matches the ingest body limit).
#[derive(Clone)]
pub struct HmacBodyLimit(pub usize);

/// Hex HMAC-SHA256 of `body` under `secret`, as sent in `X-Signature`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Reject ingest requests whose `X-Signature` is not the HMAC of the body.
pub async fn hmac_auth(request: Request<Body>, next: Next) -> Result<Response, impl IntoResponse> {
    let Some(secret) = request.extensions().get::<HmacSecret>().cloned() else {
        tracing::error!(path = %request.uri().path(), "ingest auth: HmacSecret not configured");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "auth not configured"));
    };

    let request_path = request.uri().path().to_string();

    let Some(signature_hex) = request
        .headers()
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    else {
        tracing::warn!(path = %request_path, "auth rejected: missing X-Signature header");
        return Err((StatusCode::UNAUTHORIZED, "missing X-Signature header"));
    };

    let signature_bytes = hex::decode(&signature_hex).map_err(|_| {
        tracing::warn!(path = %request_path, "auth rejected: invalid signature hex encoding");
        (StatusCode::UNAUTHORIZED, "invalid signature encoding")
    })?;

    let body_limit = request
        .extensions()
        .get::<HmacBodyLimit>()
        .map(|l| l.0)
        .unwrap_or(64 * 1024);
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, body_limit)
        .await
        .map_err(|_| (StatusCode::BAD_REQUEST, "failed to read body"))?;

    let mut mac = HmacSha256::new_from_slice(secret.0.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(&body_bytes);
    let expected = mac.finalize().into_bytes();

    if expected.as_slice().ct_eq(&signature_bytes).into() {
        tracing::debug!(path = %request_path, body_bytes = body_bytes.len(), "ingest auth ok");
        let request = Request::from_parts(parts, Body::from(body_bytes));
        Ok(next.run(request).await)
    } else {
        tracing::warn!(
            path = %request_path,
            body_bytes = body_bytes.len(),
            "auth rejected: HMAC signature mismatch"
        );
        Err((StatusCode::UNAUTHORIZED, "invalid signature"))
    }
}
