//! Authentication primitives for Docker registry access
//!
//! Parses `WWW-Authenticate: Bearer` challenges and exchanges credentials at
//! the challenge realm for a scoped token.

use crate::error::{CatalogError, Result};
use crate::recorder::{CallRecorder, CallTimer};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Token lifetime assumed when the realm omits `expires_in`
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Parsed `WWW-Authenticate: Bearer` challenge
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Token issued by a realm, with its computed expiry instant
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: Instant,
}

/// Parse a Bearer challenge header: `Bearer realm="...",service="...",scope="..."`.
///
/// Returns `None` for non-Bearer schemes or challenges without a realm.
pub fn parse_www_authenticate(header: &str) -> Option<AuthChallenge> {
    let params_str = header.strip_prefix("Bearer ")?;
    let mut params = HashMap::new();

    for param in params_str.split(',') {
        let param = param.trim();
        if let Some(eq_pos) = param.find('=') {
            let key = param[..eq_pos].trim();
            let value = param[eq_pos + 1..].trim().trim_matches('"');
            params.insert(key, value);
        }
    }

    let realm = params.get("realm")?;
    Some(AuthChallenge {
        realm: realm.to_string(),
        service: params.get("service").unwrap_or(&"").to_string(),
        scope: params.get("scope").map(|s| s.to_string()),
    })
}

/// Exchange credentials at the challenge realm for a scoped token.
///
/// A rejection from the realm (401/403) is an [`CatalogError::Auth`] and must
/// not be retried; transport failures surface as [`CatalogError::Network`]
/// for the caller's bounded-backoff retry.
pub async fn exchange_token(
    http: &Client,
    challenge: &AuthChallenge,
    username: &str,
    password: &str,
    recorder: &CallRecorder,
) -> Result<IssuedToken> {
    let mut url = format!("{}?service={}", challenge.realm, challenge.service);
    if let Some(scope) = &challenge.scope {
        url.push_str(&format!("&scope={}", scope));
    }

    tracing::debug!(realm = %challenge.realm, service = %challenge.service, "requesting token");

    let timer = CallTimer::start("GET", &url);
    let response = http
        .get(&url)
        .basic_auth(username, Some(password))
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            recorder.record(timer.finish(None, 0));
            return Err(CatalogError::Network(format!("token exchange failed: {}", err)));
        }
    };

    let status = response.status();
    let size = response.content_length().unwrap_or(0) as usize;
    recorder.record(timer.finish(Some(status.as_u16()), size));

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(CatalogError::Auth(format!(
            "credentials rejected by {} (status {})",
            challenge.realm, status
        )));
    }
    if !status.is_success() {
        return Err(CatalogError::Network(format!(
            "token exchange against {} failed with status {}",
            challenge.realm, status
        )));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| CatalogError::Parse(format!("malformed token response: {}", e)))?;

    let token = token_response
        .token
        .or(token_response.access_token)
        .ok_or_else(|| {
            CatalogError::Parse("token response carried neither token nor access_token".into())
        })?;

    let ttl = token_response
        .expires_in
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TOKEN_TTL);

    Ok(IssuedToken {
        token,
        expires_at: Instant::now() + ttl,
    })
}
