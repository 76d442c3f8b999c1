//! Per-registry credential and token lifecycle
//!
//! [`AuthSession`] owns the token state machine for one registry:
//! `Unauthenticated → Authenticating → Authenticated(token, expiry) → Failed`,
//! with expiry or a later 401 transitioning back through `Authenticating`.
//! Concurrent requests sharing a session collapse into a single outstanding
//! refresh; every waiter receives the same resulting token or failure.

use crate::common::{with_retry, RetryConfig};
use crate::config::AuthMethod;
use crate::error::{CatalogError, Result};
use crate::recorder::CallRecorder;
use crate::registry::auth::{exchange_token, AuthChallenge, IssuedToken};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use std::future::Future;
use std::time::Instant;
use tokio::sync::Mutex;

/// Credential material attached to one outbound request
#[derive(Debug, Clone)]
pub enum RequestAuth {
    None,
    /// Complete `Authorization` header value
    Basic(String),
    Bearer(String),
}

impl RequestAuth {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            RequestAuth::None => request,
            RequestAuth::Basic(header) => request.header(reqwest::header::AUTHORIZATION, header),
            RequestAuth::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// Auth material plus the token epoch it was observed at.
///
/// The epoch lets a caller that hit a 401 tell the session which token
/// failed, so a refresh completed by a concurrent caller is not repeated.
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    pub auth: RequestAuth,
    pub epoch: u64,
}

#[derive(Debug)]
enum Phase {
    Unauthenticated,
    Authenticated { token: String, expires_at: Instant },
    Failed(CatalogError),
}

#[derive(Debug)]
struct Inner {
    epoch: u64,
    phase: Phase,
    challenge: Option<AuthChallenge>,
    last_error: Option<CatalogError>,
}

/// Token state machine for one registry descriptor
#[derive(Debug)]
pub struct AuthSession {
    method: AuthMethod,
    retry: RetryConfig,
    inner: Mutex<Inner>,
}

impl AuthSession {
    pub fn new(method: AuthMethod) -> Self {
        Self {
            method,
            retry: RetryConfig::default(),
            inner: Mutex::new(Inner {
                epoch: 0,
                phase: Phase::Unauthenticated,
                challenge: None,
                last_error: None,
            }),
        }
    }

    /// Auth material for the next request.
    ///
    /// Basic credentials ride along on every request; a cached exchange token
    /// is reused until expiry. An expired token with a known challenge is
    /// refreshed here before the request goes out.
    pub async fn authorize(&self, http: &Client, recorder: &CallRecorder) -> Result<TokenSnapshot> {
        match &self.method {
            AuthMethod::None => Ok(TokenSnapshot {
                auth: RequestAuth::None,
                epoch: self.epoch().await,
            }),
            AuthMethod::Basic { username, password } => {
                let header = format!(
                    "Basic {}",
                    BASE64.encode(format!("{}:{}", username, password))
                );
                Ok(TokenSnapshot {
                    auth: RequestAuth::Basic(header),
                    epoch: self.epoch().await,
                })
            }
            AuthMethod::BearerStatic { token } => {
                let inner = self.inner.lock().await;
                match &inner.phase {
                    Phase::Failed(err) => Err(err.clone()),
                    _ => Ok(TokenSnapshot {
                        auth: RequestAuth::Bearer(token.clone()),
                        epoch: inner.epoch,
                    }),
                }
            }
            AuthMethod::TokenExchange { .. } => {
                let (epoch, cached_token, challenge, failed) = {
                    let inner = self.inner.lock().await;
                    let token = match &inner.phase {
                        Phase::Authenticated { token, expires_at }
                            if Instant::now() < *expires_at =>
                        {
                            Some(token.clone())
                        }
                        _ => None,
                    };
                    let failed = match &inner.phase {
                        Phase::Failed(err) => Some(err.clone()),
                        _ => None,
                    };
                    (inner.epoch, token, inner.challenge.clone(), failed)
                };

                if let Some(err) = failed {
                    return Err(err);
                }
                if let Some(token) = cached_token {
                    return Ok(TokenSnapshot {
                        auth: RequestAuth::Bearer(token),
                        epoch,
                    });
                }
                if let Some(challenge) = challenge {
                    // Expired or dropped token with a known realm: refresh now
                    let token = self.refresh(epoch, &challenge, http, recorder).await?;
                    return Ok(TokenSnapshot {
                        auth: RequestAuth::Bearer(token),
                        epoch: self.epoch().await,
                    });
                }
                // First contact: go out unauthenticated and let the 401
                // challenge drive the exchange
                Ok(TokenSnapshot {
                    auth: RequestAuth::None,
                    epoch,
                })
            }
        }
    }

    /// React to a 401 observed with the snapshot taken at `observed_epoch`.
    ///
    /// Bearer-static rejection is terminal. Token exchange runs the
    /// single-flight refresh against the challenge realm.
    pub async fn handle_rejection(
        &self,
        observed_epoch: u64,
        challenge: Option<AuthChallenge>,
        http: &Client,
        recorder: &CallRecorder,
    ) -> Result<RequestAuth> {
        match &self.method {
            AuthMethod::None => Err(CatalogError::Auth(
                "registry requires authentication but none is configured".into(),
            )),
            AuthMethod::Basic { .. } => {
                Err(CatalogError::Auth("basic credentials rejected".into()))
            }
            AuthMethod::BearerStatic { .. } => {
                let err = CatalogError::Auth("static bearer token rejected".into());
                let mut inner = self.inner.lock().await;
                inner.phase = Phase::Failed(err.clone());
                Err(err)
            }
            AuthMethod::TokenExchange { .. } => {
                let challenge = {
                    let mut inner = self.inner.lock().await;
                    if let Some(challenge) = challenge {
                        inner.challenge = Some(challenge);
                    }
                    inner.challenge.clone()
                };
                let challenge = challenge.ok_or_else(|| {
                    CatalogError::Auth("401 response carried no Bearer challenge".into())
                })?;
                let token = self.refresh(observed_epoch, &challenge, http, recorder).await?;
                Ok(RequestAuth::Bearer(token))
            }
        }
    }

    async fn refresh(
        &self,
        observed_epoch: u64,
        challenge: &AuthChallenge,
        http: &Client,
        recorder: &CallRecorder,
    ) -> Result<String> {
        let (username, password) = match &self.method {
            AuthMethod::TokenExchange { username, password } => {
                (username.clone(), password.clone())
            }
            _ => return Err(CatalogError::Auth("session does not exchange tokens".into())),
        };
        let retry = self.retry.clone();

        self.refresh_with(observed_epoch, || async move {
            with_retry(&retry, || {
                exchange_token(http, challenge, &username, &password, recorder)
            })
            .await
        })
        .await
    }

    /// Single-flight refresh core.
    ///
    /// The state mutex is held across the exchange, so concurrent callers
    /// queue behind the first one. A queued caller whose observed epoch is
    /// already stale receives the outcome of the completed refresh instead of
    /// issuing a duplicate exchange.
    pub(crate) async fn refresh_with<F, Fut>(&self, observed_epoch: u64, exchange: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken>>,
    {
        let mut inner = self.inner.lock().await;

        if inner.epoch > observed_epoch {
            return match &inner.phase {
                Phase::Authenticated { token, expires_at } if Instant::now() < *expires_at => {
                    Ok(token.clone())
                }
                Phase::Failed(err) => Err(err.clone()),
                _ => Err(inner.last_error.clone().unwrap_or_else(|| {
                    CatalogError::Auth("authentication required".into())
                })),
            };
        }
        if let Phase::Failed(err) = &inner.phase {
            return Err(err.clone());
        }

        // This caller performs the exchange (state: Authenticating)
        let result = exchange().await;
        inner.epoch += 1;
        match result {
            Ok(issued) => {
                tracing::debug!(epoch = inner.epoch, "token exchange succeeded");
                inner.phase = Phase::Authenticated {
                    token: issued.token.clone(),
                    expires_at: issued.expires_at,
                };
                inner.last_error = None;
                Ok(issued.token)
            }
            Err(err @ CatalogError::Auth(_)) => {
                tracing::warn!(error = %err, "credential rejection, session failed");
                inner.phase = Phase::Failed(err.clone());
                Err(err)
            }
            Err(err) => {
                // Transient exchange failure: stay retryable for the next 401
                inner.phase = Phase::Unauthenticated;
                inner.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn epoch(&self) -> u64 {
        self.inner.lock().await.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn exchange_session() -> AuthSession {
        AuthSession::new(AuthMethod::TokenExchange {
            username: "bot".into(),
            password: "hunter2".into(),
        })
    }

    fn issued(token: &str) -> IssuedToken {
        IssuedToken {
            token: token.to_string(),
            expires_at: Instant::now() + Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_single_flight() {
        let session = Arc::new(exchange_session());
        let exchanges = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let session = Arc::clone(&session);
            let exchanges = Arc::clone(&exchanges);
            handles.push(tokio::spawn(async move {
                session
                    .refresh_with(0, || async move {
                        exchanges.fetch_add(1, Ordering::SeqCst);
                        // Hold the refresh long enough for every caller to queue
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(issued("scoped-token"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "scoped-token");
        }
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_credential_rejection_is_terminal() {
        let session = exchange_session();

        let err = session
            .refresh_with(0, || async {
                Err(CatalogError::Auth("credentials rejected".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Auth(_)));

        // No further exchange is attempted once the session has failed
        let err = session
            .refresh_with(1, || async {
                unreachable!("exchange must not run after terminal failure")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Auth(_)));
    }

    #[tokio::test]
    async fn test_network_failure_shared_with_waiters_but_retryable() {
        let session = exchange_session();

        let err = session
            .refresh_with(0, || async {
                Err(CatalogError::Network("exchange timed out".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Network(_)));

        // A waiter that observed the pre-failure epoch gets the same failure
        let err = session
            .refresh_with(0, || async { unreachable!("stale waiter must not re-exchange") })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Network(_)));

        // A fresh 401 at the current epoch may retry the exchange
        let token = session
            .refresh_with(1, || async { Ok(issued("second-try")) })
            .await
            .unwrap();
        assert_eq!(token, "second-try");
    }

    #[tokio::test]
    async fn test_basic_auth_attaches_header_without_state() {
        let session = AuthSession::new(AuthMethod::Basic {
            username: "user".into(),
            password: "pass".into(),
        });
        let recorder = CallRecorder::new();
        let http = Client::new();

        let snapshot = session.authorize(&http, &recorder).await.unwrap();
        match snapshot.auth {
            // base64("user:pass")
            RequestAuth::Basic(header) => assert_eq!(header, "Basic dXNlcjpwYXNz"),
            other => panic!("expected basic auth, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_static_bearer_rejection_not_retried() {
        let session = AuthSession::new(AuthMethod::BearerStatic {
            token: "static-token".into(),
        });
        let recorder = CallRecorder::new();
        let http = Client::new();

        let err = session
            .handle_rejection(0, None, &http, &recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Auth(_)));

        // The session is now failed; authorize surfaces the same error
        let err = session.authorize(&http, &recorder).await.unwrap_err();
        assert!(matches!(err, CatalogError::Auth(_)));
    }
}
