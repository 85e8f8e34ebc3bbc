//! Backend identity endpoints: who-am-I, login, registration.
//!
//! These are the bootstrap calls. They go straight to the transport, never
//! through [`crate::AuthenticatedClient`], so a 401 here can't recurse into a
//! refresh.

use crate::interceptor::{ApiError, ApiRequest, HttpTransport};
use crate::session::{Session, User};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const WHO_AM_I_PATH: &str = "/auth/me";
pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Backend response to login and registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub session: Session,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WhoAmIBody {
    Wrapped { user: User },
    Bare(User),
}

/// Client for the backend identity endpoints.
#[derive(Clone)]
pub struct IdentityApi {
    transport: Arc<dyn HttpTransport>,
}

impl IdentityApi {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Resolve the user behind an access token.
    pub async fn who_am_i(&self, access_token: &str) -> Result<User, ApiError> {
        let request = ApiRequest::get(WHO_AM_I_PATH).with_bearer(access_token);
        let response = self.transport.send(&request).await?;
        let body: WhoAmIBody = ApiError::check(WHO_AM_I_PATH, response)?.json()?;
        let user = match body {
            WhoAmIBody::Wrapped { user } | WhoAmIBody::Bare(user) => user,
        };
        debug!(user_id = %user.id, "resolved current user");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({ "email": email, "password": password }),
        );
        let response = self.transport.send(&request).await?;
        ApiError::check(LOGIN_PATH, response)?.json()
    }

    pub async fn register(&self, registration: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let body =
            serde_json::to_value(registration).map_err(|e| ApiError::Decode(e.to_string()))?;
        let request = ApiRequest::post(REGISTER_PATH, body);
        let response = self.transport.send(&request).await?;
        ApiError::check(REGISTER_PATH, response)?.json()
    }
}
