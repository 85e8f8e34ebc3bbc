//! Supabase GoTrue implementation of [`IdentityProvider`].

use crate::provider::{
    IdentityProvider, ProviderError, SessionEvent, SessionEventHub, SessionEventKind,
    Subscription,
};
use crate::session::{token_expiry, Session};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Supabase token refresh request.
#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// GoTrue token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    user: Value,
}

impl From<TokenResponse> for Session {
    fn from(data: TokenResponse) -> Self {
        Session {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at: data.expires_at,
            expires_in: data.expires_in,
            token_type: data.token_type.unwrap_or_else(|| "bearer".to_string()),
            user: data.user,
        }
        .with_computed_expiry()
    }
}

/// GoTrue error body. Different endpoints use different field sets.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a non-success GoTrue response to a [`ProviderError`].
pub(crate) fn parse_error_body(status: u16, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
        return ProviderError::RateLimited;
    }

    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| body.trim().to_string());

    ProviderError::Api {
        status,
        code: parsed.error_code.or(parsed.error),
        message,
    }
}

fn network_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Network(e.to_string())
}

/// Identity provider backed by the Supabase auth REST API.
///
/// The provider-side session lives only in memory; persistence is the
/// session store's job.
pub struct SupabaseIdentityProvider {
    supabase_url: String,
    publishable_key: String,
    http_client: Client,
    session: Mutex<Option<Session>>,
    events: SessionEventHub,
}

impl SupabaseIdentityProvider {
    pub fn new(supabase_url: &str, publishable_key: &str) -> Self {
        Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            publishable_key: publishable_key.to_string(),
            http_client: Client::new(),
            session: Mutex::new(None),
            events: SessionEventHub::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.supabase_url, path)
    }

    async fn error_from_response(response: Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = parse_error_body(status.as_u16(), &body);
        warn!(status = %status, error = %error, "identity provider request failed");
        error
    }

    fn store_session(&self, session: &Session, kind: SessionEventKind) {
        *self.session.lock() = Some(session.clone());
        self.events
            .emit(SessionEvent::new(kind, Some(session.clone())));
    }

    /// Fetch the user behind an access token from `/auth/v1/user`.
    async fn fetch_user(&self, access_token: &str) -> Result<Value, ProviderError> {
        let url = self.endpoint("user");
        debug!(url = %url, "verifying access token with identity provider");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.publishable_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let url = self.endpoint("token?grant_type=refresh_token");
        debug!(url = %url, "refreshing session");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.publishable_key)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(Session::from(data))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        let session = self.session.lock().clone();
        Ok(session.filter(|s| !s.expires_within(0)))
    }

    async fn establish_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, ProviderError> {
        let expired = token_expiry(access_token)
            .map(|exp| exp <= Utc::now().timestamp())
            .unwrap_or(true);

        let session = if expired {
            debug!("stored access token expired, establishing via refresh");
            self.refresh(refresh_token).await?
        } else {
            let user = self.fetch_user(access_token).await?;
            Session {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                expires_at: None,
                expires_in: 0,
                token_type: "bearer".to_string(),
                user,
            }
        };
        let session = Session {
            expires_in: session
                .expiry()
                .map(|exp| (exp - Utc::now().timestamp()).max(0))
                .unwrap_or(session.expires_in),
            expires_at: session.expiry(),
            ..session
        };

        self.store_session(&session, SessionEventKind::SignedIn);
        info!("identity provider session established");
        Ok(session)
    }

    async fn force_refresh(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let session = self.refresh(refresh_token).await?;
        self.store_session(&session, SessionEventKind::TokenRefreshed);
        info!("identity provider session refreshed");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let session = self.session.lock().take();
        self.events
            .emit(SessionEvent::new(SessionEventKind::SignedOut, None));

        let Some(session) = session else {
            return Ok(());
        };

        let response = self
            .http_client
            .post(self.endpoint("logout"))
            .header("apikey", &self.publishable_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    fn discard_session(&self, access_token: &str) {
        let mut held = self.session.lock();
        if held.as_ref().is_some_and(|s| s.access_token == access_token) {
            *held = None;
            debug!("identity provider session discarded");
        }
    }

    fn subscribe(&self) -> Subscription {
        let current = self.session.lock().clone();
        self.events.subscribe(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_error_code_body() {
        let error = parse_error_body(
            400,
            r#"{"code":400,"error_code":"refresh_token_not_found","msg":"Invalid Refresh Token: Refresh Token Not Found"}"#,
        );
        assert!(error.is_refresh_token_invalid());
        match error {
            ProviderError::Api { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("refresh_token_not_found"));
                assert_eq!(message, "Invalid Refresh Token: Refresh Token Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parses_oauth_style_body() {
        let error = parse_error_body(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Already Used"}"#,
        );
        assert!(error.is_refresh_token_invalid());
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert_eq!(parse_error_body(429, "slow down"), ProviderError::RateLimited);

        let error = parse_error_body(502, "<html>bad gateway</html>");
        assert!(!error.is_refresh_token_invalid());
        assert!(error.is_transient());
    }

    #[test]
    fn token_response_computes_expiry() {
        let data: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600,"user":{"id":"u-1"}}"#,
        )
        .unwrap();
        let before = Utc::now().timestamp();
        let session = Session::from(data);
        let expires_at = session.expires_at.unwrap();
        assert!(expires_at >= before + 3600);
        assert_eq!(session.token_type, "bearer");
    }

    #[tokio::test]
    async fn sign_out_without_session_only_emits_event() {
        let provider = SupabaseIdentityProvider::new("http://127.0.0.1:9", "key");
        let mut sub = provider.subscribe();
        assert_eq!(
            sub.recv().await.unwrap().kind,
            SessionEventKind::InitialSession
        );

        provider.sign_out().await.unwrap();
        assert_eq!(sub.recv().await.unwrap().kind, SessionEventKind::SignedOut);
        assert_eq!(provider.current_session().await.unwrap(), None);
    }

    fn held_session(access_token: &str) -> Session {
        Session {
            access_token: access_token.to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(Utc::now().timestamp() + 3600),
            expires_in: 3600,
            token_type: "bearer".to_string(),
            user: Value::Null,
        }
    }

    #[tokio::test]
    async fn discard_session_only_drops_the_matching_session() {
        let provider = SupabaseIdentityProvider::new("http://127.0.0.1:9", "key");
        *provider.session.lock() = Some(held_session("current-A"));

        provider.discard_session("stale-A");
        assert!(provider.current_session().await.unwrap().is_some());

        provider.discard_session("current-A");
        assert_eq!(provider.current_session().await.unwrap(), None);
    }
}
