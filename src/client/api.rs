//! Typed calls for the `/auth/*` and public endpoints.

use super::{ClientError, HttpClient, RequestConfig, TokenData};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    Method,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Credentials {
    pub name: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_captcha(mut self, uuid: impl Into<String>, code: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self.code = Some(code.into());
        self
    }
}

/// `data` of a login or refresh response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires: i64,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Session {
    #[must_use]
    pub fn token_data(&self) -> TokenData {
        TokenData {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires: self.expires,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    pub status: i16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub title: String,
    pub version: String,
    pub captcha_login: bool,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaChallenge {
    pub uuid: String,
    pub img: String,
    pub captcha_enabled: bool,
}

/// Log in and store the returned tokens.
/// # Errors
/// `ClientError::Application` with code 1001 on bad credentials.
#[instrument(skip(client, credentials), fields(name = %credentials.name))]
pub async fn login(client: &HttpClient, credentials: &Credentials) -> Result<Session, ClientError> {
    let body = serde_json::to_value(credentials)
        .map_err(|err| ClientError::Build(err.to_string()))?;
    let session: Session = client
        .data(Method::POST, "/auth/login", RequestConfig::new().body(body))
        .await?;
    client.tokens().set(session.token_data());
    debug!("Logged in as {}", session.username);
    Ok(session)
}

/// Exchange the stored refresh token for a new session.
/// # Errors
/// `ClientError::RefreshFailed` when no token is stored; server errors otherwise.
pub async fn refresh_token(client: &HttpClient) -> Result<Session, ClientError> {
    let current = client
        .tokens()
        .get()
        .ok_or_else(|| ClientError::RefreshFailed("No refresh token stored".to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", current.refresh_token))
        .map_err(|err| ClientError::Build(err.to_string()))?;
    let path = client.config().refresh_path.clone();
    let session: Session = client
        .data(
            Method::POST,
            &path,
            RequestConfig::new().header(AUTHORIZATION, bearer),
        )
        .await?;
    client.tokens().set(session.token_data());
    Ok(session)
}

/// # Errors
/// `ClientError::Unauthorized` when the session is gone.
pub async fn me(client: &HttpClient) -> Result<CurrentUser, ClientError> {
    client
        .get("/auth/me", RequestConfig::new().skip_envelope())
        .await
}

/// Revoke the current token and forget it locally.
/// # Errors
/// `ClientError::Unauthorized` when the token was already unusable.
pub async fn logout(client: &HttpClient) -> Result<String, ClientError> {
    let body: Value = client
        .post("/auth/logout", RequestConfig::new().skip_envelope().body(json!({})))
        .await?;
    client.tokens().remove();
    Ok(body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// # Errors
/// See [`ClientError`].
pub async fn get_config(client: &HttpClient) -> Result<AppSettings, ClientError> {
    client
        .data(Method::GET, "/getConfig", RequestConfig::new())
        .await
}

/// # Errors
/// See [`ClientError`].
pub async fn captcha_image(client: &HttpClient) -> Result<CaptchaChallenge, ClientError> {
    client
        .data(Method::GET, "/captchaImage", RequestConfig::new())
        .await
}
