//! Identity provider boundary.
//!
//! Handlers only see [`IdentityProvider`] and the typed [`IdentityError`];
//! [`PocketBaseClient`] is the production implementation talking to the
//! PocketBase `users` auth collection over REST.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UserIdentity {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) email: Option<String>,
    pub(crate) name: Option<String>,
}

impl UserIdentity {
    pub(crate) fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthSession {
    pub(crate) user: UserIdentity,
    pub(crate) token: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum IdentityError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username already exists")]
    DuplicateUsername,

    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("{0}")]
    Unknown(String),
}

#[async_trait]
pub(crate) trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str)
    -> Result<AuthSession, IdentityError>;

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserIdentity, IdentityError>;

    /// `Ok(None)` when the provider no longer knows the user.
    async fn resolve_identity(
        &self,
        id: &str,
        token: Option<&str>,
    ) -> Result<Option<UserIdentity>, IdentityError>;
}

pub(crate) struct PocketBaseClient {
    base_url: String,
    http: reqwest::Client,
}

impl PocketBaseClient {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build identity provider HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn users_url(&self, suffix: &str) -> String {
        format!("{}/api/collections/users/{}", self.base_url, suffix)
    }
}

#[derive(Serialize)]
struct PasswordAuthRequest<'a> {
    identity: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest<'a> {
    username: &'a str,
    password: &'a str,
    password_confirm: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    record: UserRecord,
}

#[derive(Deserialize)]
struct UserRecord {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<UserRecord> for UserIdentity {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            email: record.email.filter(|value| !value.is_empty()),
            name: record.name.filter(|value| !value.is_empty()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: HashMap<String, FieldError>,
}

#[derive(Debug, Deserialize)]
struct FieldError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Validation codes PocketBase uses for a taken username, across versions.
const DUPLICATE_USERNAME_CODES: [&str; 2] = ["validation_not_unique", "validation_invalid_username"];

impl ErrorResponse {
    fn is_duplicate_username(&self) -> bool {
        self.data
            .get("username")
            .is_some_and(|field| DUPLICATE_USERNAME_CODES.contains(&field.code.as_str()))
    }

    fn describe(&self) -> String {
        let mut fields = self
            .data
            .iter()
            .map(|(field, error)| format!("{field}: {}", error.message))
            .collect::<Vec<String>>();
        fields.sort();

        match (self.message.is_empty(), fields.is_empty()) {
            (false, false) => format!("{} ({})", self.message, fields.join("; ")),
            (false, true) => self.message.clone(),
            (true, false) => fields.join("; "),
            (true, true) => "unexpected response from identity provider".to_string(),
        }
    }
}

fn unavailable(err: reqwest::Error) -> IdentityError {
    IdentityError::ProviderUnavailable(err.to_string())
}

async fn error_body(response: reqwest::Response) -> ErrorResponse {
    response.json::<ErrorResponse>().await.unwrap_or_default()
}

#[async_trait]
impl IdentityProvider for PocketBaseClient {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthSession, IdentityError> {
        let response = self
            .http
            .post(self.users_url("auth-with-password"))
            .json(&PasswordAuthRequest {
                identity: username,
                password,
            })
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status.is_server_error() {
            let body = error_body(response).await;
            return Err(IdentityError::ProviderUnavailable(body.describe()));
        }
        if status.is_client_error() {
            debug!(status = %status, "password authentication rejected");
            return Err(IdentityError::InvalidCredentials);
        }

        let auth = response
            .json::<AuthResponse>()
            .await
            .map_err(|err| IdentityError::Unknown(format!("malformed auth response: {err}")))?;

        Ok(AuthSession {
            user: auth.record.into(),
            token: auth.token,
        })
    }

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserIdentity, IdentityError> {
        let response = self
            .http
            .post(self.users_url("records"))
            .json(&CreateUserRequest {
                username,
                password,
                password_confirm: password,
                name: display_name,
            })
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status.is_server_error() {
            let body = error_body(response).await;
            return Err(IdentityError::ProviderUnavailable(body.describe()));
        }
        if status.is_client_error() {
            let body = error_body(response).await;
            if body.is_duplicate_username() {
                return Err(IdentityError::DuplicateUsername);
            }
            return Err(IdentityError::Unknown(body.describe()));
        }

        let record = response
            .json::<UserRecord>()
            .await
            .map_err(|err| IdentityError::Unknown(format!("malformed user record: {err}")))?;
        Ok(record.into())
    }

    async fn resolve_identity(
        &self,
        id: &str,
        token: Option<&str>,
    ) -> Result<Option<UserIdentity>, IdentityError> {
        let mut request = self.http.get(self.users_url(&format!("records/{id}")));
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await.map_err(unavailable)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() {
            let body = error_body(response).await;
            return Err(IdentityError::ProviderUnavailable(body.describe()));
        }
        if status.is_client_error() {
            let body = error_body(response).await;
            return Err(IdentityError::Unknown(body.describe()));
        }

        let record = response
            .json::<UserRecord>()
            .await
            .map_err(|err| IdentityError::Unknown(format!("malformed user record: {err}")))?;
        Ok(Some(record.into()))
    }
}
