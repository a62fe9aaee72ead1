use super::{error::ClientError, params::ArrayFormat};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    RequestBuilder,
};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub const ENV_API_URL: &str = "BACKOFFICE_API_URL";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300_000);
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Paths (matched as suffixes) that never get an `Authorization` header.
pub const DEFAULT_WHITELIST: [&str; 5] = [
    "/refreshToken",
    "/auth/refresh",
    "/login",
    "/captchaImage",
    "/getConfig",
];

/// Replaces token handling for a request: the builder is sent as returned.
pub type BeforeRequest = Arc<dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync>;

/// Replaces the value returned for a successful (`code == 0`) payload.
pub type BeforeResponse = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub headers: HeaderMap,
    pub array_format: ArrayFormat,
    pub whitelist: Vec<String>,
    pub refresh_path: String,
    pub before_request: Option<BeforeRequest>,
    pub before_response: Option<BeforeResponse>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            headers,
            array_format: ArrayFormat::default(),
            whitelist: DEFAULT_WHITELIST.iter().map(ToString::to_string).collect(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            before_request: None,
            before_response: None,
        }
    }

    /// Read the base URL from `BACKOFFICE_API_URL`.
    /// # Errors
    /// Returns `ClientError::Build` if the variable is unset or empty.
    pub fn from_env() -> Result<Self, ClientError> {
        match std::env::var(ENV_API_URL) {
            Ok(url) if !url.trim().is_empty() => Ok(Self::new(url.trim())),
            _ => Err(ClientError::Build(format!("{ENV_API_URL} is not set"))),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_array_format(mut self, format: ArrayFormat) -> Self {
        self.array_format = format;
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync + 'static,
    {
        self.before_request = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_before_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.before_response = Some(Arc::new(hook));
        self
    }

    /// Whether `path` (query string ignored) ends with a whitelisted suffix.
    #[must_use]
    pub fn is_whitelisted(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.whitelist.iter().any(|suffix| path.ends_with(suffix.as_str()))
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("array_format", &self.array_format)
            .field("whitelist", &self.whitelist)
            .field("refresh_path", &self.refresh_path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Json,
    Binary,
}

/// Per-call options.
#[derive(Clone, Default)]
pub struct RequestConfig {
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub cancel: Option<CancellationToken>,
    pub before_request: Option<BeforeRequest>,
    pub before_response: Option<BeforeResponse>,
    /// Return successful bodies as-is, for endpoints that do not answer with
    /// a `{code, data}` envelope (`/auth/me`, `/auth/logout`).
    pub skip_envelope: bool,
}

impl RequestConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn binary(mut self) -> Self {
        self.response_type = ResponseType::Binary;
        self
    }

    #[must_use]
    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn skip_envelope(mut self) -> Self {
        self.skip_envelope = true;
        self
    }

    #[must_use]
    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync + 'static,
    {
        self.before_request = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn before_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.before_response = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("params", &self.params)
            .field("body", &self.body.is_some())
            .field("response_type", &self.response_type)
            .field("skip_envelope", &self.skip_envelope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert_eq!(config.array_format, ArrayFormat::Indices);
        assert_eq!(config.headers[CONTENT_TYPE], "application/json");
        assert_eq!(config.headers["x-requested-with"], "XMLHttpRequest");
    }

    #[test]
    fn whitelist_matches_suffixes() {
        let config = ClientConfig::new("http://localhost:8080");
        assert!(config.is_whitelisted("/auth/login"));
        assert!(config.is_whitelisted("/getConfig?lang=en"));
        assert!(config.is_whitelisted("/auth/refresh"));
        assert!(!config.is_whitelisted("/auth/me"));
        assert!(!config.is_whitelisted("/login/history"));
    }

    #[test]
    fn from_env_reads_base_url() {
        temp_env::with_var(ENV_API_URL, Some("http://api.local "), || {
            let config = ClientConfig::from_env();
            assert_eq!(
                config.map(|config| config.base_url).ok().as_deref(),
                Some("http://api.local")
            );
        });
        temp_env::with_var_unset(ENV_API_URL, || {
            assert!(matches!(
                ClientConfig::from_env(),
                Err(ClientError::Build(_))
            ));
        });
    }
}
