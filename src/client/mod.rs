//! HTTP client for the backoffice API.
//!
//! Attaches bearer tokens, evaluates the `{code, message, data}` envelope,
//! reports failures through a [`Notifier`] and coordinates token refresh so
//! that concurrent requests share one refresh call.

use crate::APP_USER_AGENT;
use reqwest::{header::CONTENT_TYPE, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

pub mod api;
mod config;
mod error;
mod params;
mod refresh;
mod session;

pub use config::{
    BeforeRequest, BeforeResponse, ClientConfig, RequestConfig, ResponseType, DEFAULT_WHITELIST,
    ENV_API_URL,
};
pub use error::ClientError;
pub use params::ArrayFormat;
pub use refresh::RefreshCoordinator;
pub use session::{
    LogNotifier, MemoryTokenStore, MessageKind, NoProgress, Notifier, Progress, TokenData,
    TokenStore,
};

pub const MALFORMED_RESPONSE_MESSAGE: &str = "伺服器回傳資料結構有誤";
pub const RELOGIN_PROMPT: &str = "登入狀態已過期，您可以繼續留在該頁面，或者重新登入";
pub const RELOGIN_CANCELLED_MESSAGE: &str = "已取消重新登入";

/// What a call resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Binary(_) => None,
        }
    }
}

struct Inner {
    http: reqwest::Client,
    config: ClientConfig,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    progress: Arc<dyn Progress>,
    refresh: Arc<RefreshCoordinator>,
}

/// Cheap to clone; clones share token storage and refresh state.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

pub struct HttpClientBuilder {
    config: ClientConfig,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    progress: Arc<dyn Progress>,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// # Errors
    /// Returns `ClientError::Build` if the base URL or the underlying client is invalid.
    pub fn build(self) -> Result<HttpClient, ClientError> {
        Url::parse(&self.config.base_url)
            .map_err(|err| ClientError::Build(format!("{}: {err}", self.config.base_url)))?;
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(self.config.timeout)
            .default_headers(self.config.headers.clone())
            .build()?;
        Ok(HttpClient {
            inner: Arc::new(Inner {
                http,
                config: self.config,
                tokens: self.tokens,
                notifier: self.notifier,
                progress: self.progress,
                refresh: Arc::default(),
            }),
        })
    }
}

/// Stops the progress indicator on every exit path, including drop.
struct ProgressGuard(Arc<dyn Progress>);

impl ProgressGuard {
    fn start(progress: Arc<dyn Progress>) -> Self {
        progress.start();
        Self(progress)
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

impl HttpClient {
    #[must_use]
    pub fn builder(config: ClientConfig) -> HttpClientBuilder {
        HttpClientBuilder {
            config,
            tokens: Arc::new(MemoryTokenStore::default()),
            notifier: Arc::new(LogNotifier),
            progress: Arc::new(NoProgress),
        }
    }

    /// # Errors
    /// Returns `ClientError::Build` if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn tokens(&self) -> &dyn TokenStore {
        self.inner.tokens.as_ref()
    }

    /// Send a request and return the evaluated payload.
    /// # Errors
    /// See [`ClientError`].
    pub async fn request_raw(
        &self,
        method: Method,
        path: &str,
        config: RequestConfig,
    ) -> Result<Payload, ClientError> {
        let _progress = ProgressGuard::start(self.inner.progress.clone());
        match config.cancel.clone() {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(ClientError::cancelled()),
                    result = self.exchange(method, path, &config) => result,
                }
            }
            None => self.exchange(method, path, &config).await,
        }
    }

    /// Send a request and deserialize the whole JSON payload into `T`.
    /// # Errors
    /// See [`ClientError`]; a body that does not fit `T` is `MalformedResponse`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        config: RequestConfig,
    ) -> Result<T, ClientError> {
        match self.request_raw(method, path, config).await? {
            Payload::Json(value) => serde_json::from_value(value)
                .map_err(|err| ClientError::MalformedResponse(err.to_string())),
            Payload::Binary(_) => Err(ClientError::MalformedResponse(
                "Expected a JSON body".to_string(),
            )),
        }
    }

    /// # Errors
    /// See [`HttpClient::request`].
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        config: RequestConfig,
    ) -> Result<T, ClientError> {
        self.request(Method::GET, path, config).await
    }

    /// # Errors
    /// See [`HttpClient::request`].
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        config: RequestConfig,
    ) -> Result<T, ClientError> {
        self.request(Method::POST, path, config).await
    }

    /// Like [`HttpClient::request`] but returns only the envelope's `data`.
    /// # Errors
    /// See [`HttpClient::request`].
    pub async fn data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        config: RequestConfig,
    ) -> Result<T, ClientError> {
        let envelope: Envelope<T> = self.request(method, path, config).await?;
        Ok(envelope.data)
    }

    fn url(&self, path: &str, params: Option<&Value>) -> Result<Url, ClientError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.inner.config.base_url.trim_end_matches('/'), path)
        };
        let mut url = Url::parse(&raw).map_err(|err| ClientError::Build(format!("{raw}: {err}")))?;
        if let Some(params) = params {
            params::append(&mut url, params, self.inner.config.array_format);
        }
        Ok(url)
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        config: &RequestConfig,
    ) -> Result<Payload, ClientError> {
        let url = self.url(path, config.params.as_ref())?;
        let span = info_span!("http.client", http.method = %method, url = %url);

        let mut builder = self
            .inner
            .http
            .request(method, url)
            .headers(config.headers.clone());
        if let Some(body) = &config.body {
            builder = builder.json(body);
        }

        let hook = config
            .before_request
            .as_ref()
            .or(self.inner.config.before_request.as_ref());
        let builder = match hook {
            Some(hook) => hook(builder),
            None => self.authorize(builder, path).await?,
        };

        let response = builder.send().instrument(span).await?;
        self.read_response(response, config).await
    }

    async fn authorize(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<RequestBuilder, ClientError> {
        if self.inner.config.is_whitelisted(path) {
            return Ok(builder);
        }
        let Some(token) = self.inner.tokens.get() else {
            return Ok(builder);
        };
        let access_token = if token.is_expired() {
            let client = self.clone();
            self.inner
                .refresh
                .access_token(move || async move { client.refresh_session().await })
                .await?
        } else {
            token.access_token
        };
        Ok(builder.bearer_auth(access_token))
    }

    /// Runs on the refresh task, detached from the request that started it.
    async fn refresh_session(&self) -> Result<String, ClientError> {
        // a refresh that settled just before we took the lead already stored a token
        if let Some(current) = self.inner.tokens.get() {
            if !current.is_expired() {
                return Ok(current.access_token);
            }
        }

        match self.exchange_refresh_token().await {
            Ok(token) => {
                let access_token = token.access_token.clone();
                self.inner.tokens.set(token);
                Ok(access_token)
            }
            Err(err) => {
                warn!("Token refresh failed: {err}");
                self.inner.tokens.remove();
                self.inner.notifier.redirect_to_login();
                Err(match err {
                    ClientError::RefreshFailed(message) => ClientError::RefreshFailed(message),
                    other => ClientError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    async fn exchange_refresh_token(&self) -> Result<TokenData, ClientError> {
        let refresh_token = self
            .inner
            .tokens
            .get()
            .map(|token| token.refresh_token)
            .ok_or_else(|| ClientError::RefreshFailed("No refresh token stored".to_string()))?;
        let url = self.url(&self.inner.config.refresh_path, None)?;
        debug!("Refreshing access token");

        let span = info_span!("http.client.refresh", http.method = "POST", url = %url);
        let response = self
            .inner
            .http
            .post(url)
            .bearer_auth(refresh_token)
            .send()
            .instrument(span)
            .await?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|_| ClientError::from_status(status))?;

        match body.get("code").and_then(Value::as_i64) {
            Some(0) => {
                let envelope: Envelope<TokenData> = serde_json::from_value(body)
                    .map_err(|err| ClientError::MalformedResponse(err.to_string()))?;
                Ok(envelope.data)
            }
            _ => Err(ClientError::RefreshFailed(
                body.get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("Refresh rejected with status {status}"), str::to_string),
            )),
        }
    }

    async fn read_response(
        &self,
        response: Response,
        config: &RequestConfig,
    ) -> Result<Payload, ClientError> {
        let status = response.status();
        let declares_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        let bytes = response.bytes().await?;

        // error-as-blob: a binary download that came back as a JSON envelope
        if config.response_type == ResponseType::Binary && !declares_json {
            return if status.is_success() {
                Ok(Payload::Binary(bytes.to_vec()))
            } else {
                Err(ClientError::from_status(status))
            };
        }

        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(_) if status.is_success() => return Err(self.malformed()),
            Err(_) => return Err(ClientError::from_status(status)),
        };

        if config.skip_envelope && status.is_success() {
            return Ok(Payload::Json(body));
        }
        if !status.is_success() && body.get("code").is_none() {
            return Err(ClientError::from_status(status));
        }
        self.evaluate(body, config).await.map(Payload::Json)
    }

    async fn evaluate(&self, body: Value, config: &RequestConfig) -> Result<Value, ClientError> {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match body.get("code").and_then(Value::as_i64) {
            None => Err(self.malformed()),
            Some(0) => {
                let hook = config
                    .before_response
                    .as_ref()
                    .or(self.inner.config.before_response.as_ref());
                Ok(match hook {
                    Some(hook) => hook(body),
                    None => body,
                })
            }
            Some(401) => {
                if self.inner.notifier.confirm_relogin(RELOGIN_PROMPT).await {
                    self.inner.tokens.remove();
                    self.inner.notifier.redirect_to_login();
                } else {
                    self.inner
                        .notifier
                        .message(RELOGIN_CANCELLED_MESSAGE, MessageKind::Info);
                }
                Err(ClientError::Unauthorized(message))
            }
            Some(code) => {
                self.inner.notifier.message(&message, MessageKind::Error);
                Err(ClientError::Application { code, message })
            }
        }
    }

    fn malformed(&self) -> ClientError {
        self.inner
            .notifier
            .message(MALFORMED_RESPONSE_MESSAGE, MessageKind::Error);
        ClientError::MalformedResponse(MALFORMED_RESPONSE_MESSAGE.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{CountingProgress, RecordingNotifier};
    use super::*;
    use anyhow::{bail, Result};
    use reqwest::header::{HeaderName, HeaderValue};
    use serde_json::json;
    use std::{net::TcpListener, time::Duration};
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn token(access: &str, expires_in: i64) -> TokenData {
        TokenData {
            access_token: access.to_string(),
            refresh_token: format!("{access}-refresh"),
            expires: chrono::Utc::now().timestamp() + expires_in,
        }
    }

    struct Fixture {
        client: HttpClient,
        tokens: Arc<MemoryTokenStore>,
        notifier: Arc<RecordingNotifier>,
        progress: Arc<CountingProgress>,
    }

    fn fixture(config: ClientConfig, token: Option<TokenData>, notifier: RecordingNotifier) -> Result<Fixture> {
        let tokens = Arc::new(MemoryTokenStore::new(token));
        let notifier = Arc::new(notifier);
        let progress = Arc::new(CountingProgress::default());
        let client = HttpClient::builder(config)
            .token_store(tokens.clone())
            .notifier(notifier.clone())
            .progress(progress.clone())
            .build()?;
        Ok(Fixture {
            client,
            tokens,
            notifier,
            progress,
        })
    }

    fn ok_body() -> Value {
        json!({"code": 0, "success": true, "data": {"title": "Backoffice"}})
    }

    #[test]
    fn build_rejects_bad_base_url() {
        assert!(matches!(
            HttpClient::new(ClientConfig::new("not a url")),
            Err(ClientError::Build(_))
        ));
    }

    #[tokio::test]
    async fn whitelisted_paths_get_no_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getConfig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("live", 3600)),
            RecordingNotifier::default(),
        )?;
        fx.client
            .request_raw(Method::GET, "/getConfig", RequestConfig::new())
            .await?;

        let Some(requests) = server.received_requests().await else {
            bail!("request recording disabled");
        };
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
        assert_eq!(
            requests[0].headers.get("x-requested-with").map(|v| v.as_bytes()),
            Some(&b"XMLHttpRequest"[..])
        );
        Ok(())
    }

    #[tokio::test]
    async fn other_paths_get_the_bearer_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/user/list"))
            .and(header("authorization", "Bearer live"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("live", 3600)),
            RecordingNotifier::default(),
        )?;
        let payload = fx
            .client
            .request_raw(
                Method::GET,
                "/admin/user/list",
                RequestConfig::new().params(json!({"status": 1})),
            )
            .await?;

        // code 0 comes back untouched
        assert_eq!(payload, Payload::Json(ok_body()));
        assert_eq!(fx.progress.counts(), (1, 1));
        server.verify().await;
        Ok(())
    }

    #[tokio::test]
    async fn code_401_prompts_once_and_rejects_with_message() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"code": 401, "message": "expired"})),
            )
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("live", 3600)),
            RecordingNotifier::confirming(),
        )?;
        let err = fx
            .client
            .request_raw(Method::GET, "/auth/me", RequestConfig::new())
            .await;

        assert_eq!(err, Err(ClientError::Unauthorized("expired".to_string())));
        assert_eq!(fx.notifier.prompts(), 1);
        assert_eq!(fx.notifier.redirects(), 1);
        assert_eq!(fx.tokens.get(), None);
        assert_eq!(fx.progress.counts(), (1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn declined_relogin_keeps_the_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/role/all"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 401, "message": "expired"})),
            )
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("live", 3600)),
            RecordingNotifier::default(),
        )?;
        let err = fx
            .client
            .request_raw(Method::GET, "/admin/role/all", RequestConfig::new())
            .await;

        assert_eq!(err, Err(ClientError::Unauthorized("expired".to_string())));
        assert_eq!(fx.notifier.redirects(), 0);
        assert!(fx.tokens.get().is_some());
        assert_eq!(
            fx.notifier.messages(),
            vec![(RELOGIN_CANCELLED_MESSAGE.to_string(), MessageKind::Info)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn business_and_malformed_errors_are_reported() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(path("/admin/user/create"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({"code": 422, "message": "The name field is required."})),
            )
            .mount(&server)
            .await;
        Mock::given(path("/admin/menu/tree"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let fx = fixture(ClientConfig::new(server.uri()), None, RecordingNotifier::default())?;
        let err = fx
            .client
            .request_raw(
                Method::POST,
                "/admin/user/create",
                RequestConfig::new().body(json!({})),
            )
            .await;
        assert_eq!(
            err,
            Err(ClientError::Application {
                code: 422,
                message: "The name field is required.".to_string()
            })
        );

        let err = fx
            .client
            .request_raw(Method::GET, "/admin/menu/tree", RequestConfig::new())
            .await;
        assert_eq!(
            err,
            Err(ClientError::MalformedResponse(MALFORMED_RESPONSE_MESSAGE.to_string()))
        );
        assert_eq!(
            fx.notifier.messages(),
            vec![
                ("The name field is required.".to_string(), MessageKind::Error),
                (MALFORMED_RESPONSE_MESSAGE.to_string(), MessageKind::Error),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn non_envelope_http_errors_are_transport_errors() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(path("/admin/user/list"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let fx = fixture(ClientConfig::new(server.uri()), None, RecordingNotifier::default())?;
        let err = fx
            .client
            .request_raw(Method::GET, "/admin/user/list", RequestConfig::new())
            .await;
        assert!(matches!(
            err,
            Err(ClientError::Transport {
                status: Some(502),
                cancelled: false,
                ..
            })
        ));
        assert!(fx.notifier.messages().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn binary_responses() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(path("/export/ok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![1_u8, 2, 3], "application/octet-stream"),
            )
            .mount(&server)
            .await;
        Mock::given(path("/export/failed"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                br#"{"code":500,"message":"export failed"}"#.to_vec(),
                "application/json",
            ))
            .mount(&server)
            .await;

        let fx = fixture(ClientConfig::new(server.uri()), None, RecordingNotifier::default())?;
        let payload = fx
            .client
            .request_raw(Method::GET, "/export/ok", RequestConfig::new().binary())
            .await?;
        assert_eq!(payload, Payload::Binary(vec![1, 2, 3]));

        let err = fx
            .client
            .request_raw(Method::GET, "/export/failed", RequestConfig::new().binary())
            .await;
        assert_eq!(
            err,
            Err(ClientError::Application {
                code: 500,
                message: "export failed".to_string()
            })
        );
        assert_eq!(fx.progress.counts(), (2, 2));
        Ok(())
    }

    #[tokio::test]
    async fn hooks_override_defaults() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(path("/admin/menu/list"))
            .and(header("x-tenant", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig::new(server.uri())
            .with_before_response(|body| json!({"wrapped": body}));
        let fx = fixture(config, Some(token("live", 3600)), RecordingNotifier::default())?;

        // the per-call request hook replaces token attachment entirely
        let payload = fx
            .client
            .request_raw(
                Method::GET,
                "/admin/menu/list",
                RequestConfig::new().before_request(|builder| {
                    builder.header(HeaderName::from_static("x-tenant"), HeaderValue::from_static("acme"))
                }),
            )
            .await?;
        assert_eq!(payload, Payload::Json(json!({"wrapped": ok_body()})));

        let Some(requests) = server.received_requests().await else {
            bail!("request recording disabled");
        };
        assert!(requests[0].headers.get("authorization").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_is_flagged() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(path("/admin/user/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let fx = fixture(ClientConfig::new(server.uri()), None, RecordingNotifier::default())?;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = fx
            .client
            .request_raw(
                Method::GET,
                "/admin/user/list",
                RequestConfig::new().cancel_with(cancel),
            )
            .await;
        assert!(err.as_ref().is_err_and(ClientError::is_cancelled));
        assert_eq!(fx.progress.counts(), (1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn timeout_is_a_transport_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(path("/admin/user/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = ClientConfig::new(server.uri()).with_timeout(Duration::from_millis(100));
        let fx = fixture(config, None, RecordingNotifier::default())?;
        let err = fx
            .client
            .request_raw(Method::GET, "/admin/user/list", RequestConfig::new())
            .await;
        assert!(matches!(
            err,
            Err(ClientError::Transport {
                cancelled: false,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_refresh() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let fresh_expiry = chrono::Utc::now().timestamp() + 3600;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("authorization", "Bearer stale-refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "code": 0,
                        "success": true,
                        "data": {
                            "accessToken": "fresh",
                            "refreshToken": "fresh",
                            "expires": fresh_expiry
                        }
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/admin/user/list"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(6)
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("stale", -10)),
            RecordingNotifier::default(),
        )?;

        let mut tasks = JoinSet::new();
        for _ in 0..6 {
            let client = fx.client.clone();
            tasks.spawn(async move {
                client
                    .request_raw(Method::GET, "/admin/user/list", RequestConfig::new())
                    .await
            });
        }
        let mut resolved = 0;
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result??, Payload::Json(ok_body()));
            resolved += 1;
        }

        assert_eq!(resolved, 6);
        assert_eq!(
            fx.tokens.get().map(|token| token.access_token),
            Some("fresh".to_string())
        );
        assert_eq!(fx.progress.counts(), (6, 6));
        server.verify().await;
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_the_first_request_does_not_fail_the_refresh() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let fresh_expiry = chrono::Utc::now().timestamp() + 3600;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "code": 0,
                        "success": true,
                        "data": {
                            "accessToken": "fresh",
                            "refreshToken": "fresh",
                            "expires": fresh_expiry
                        }
                    }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/admin/user/list"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("stale", -10)),
            RecordingNotifier::default(),
        )?;

        let cancel = CancellationToken::new();
        let first = {
            let client = fx.client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                client
                    .request_raw(
                        Method::GET,
                        "/admin/user/list",
                        RequestConfig::new().cancel_with(cancel),
                    )
                    .await
            })
        };
        while fx.client.inner.refresh.waiting() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = {
            let client = fx.client.clone();
            tokio::spawn(async move {
                client
                    .request_raw(Method::GET, "/admin/user/list", RequestConfig::new())
                    .await
            })
        };
        while fx.client.inner.refresh.waiting() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        assert!(matches!(first.await?, Err(err) if err.is_cancelled()));
        assert_eq!(second.await??, Payload::Json(ok_body()));
        assert_eq!(
            fx.tokens.get().map(|token| token.access_token),
            Some("fresh".to_string())
        );
        assert_eq!(fx.notifier.redirects(), 0);
        server.verify().await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_rejects_everyone_and_redirects_once() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"code": 401, "message": "Unauthenticated."}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/admin/user/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(
            ClientConfig::new(server.uri()),
            Some(token("stale", -10)),
            RecordingNotifier::default(),
        )?;

        let mut tasks = JoinSet::new();
        for _ in 0..4 {
            let client = fx.client.clone();
            tasks.spawn(async move {
                client
                    .request_raw(Method::GET, "/admin/user/list", RequestConfig::new())
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(matches!(result?, Err(ClientError::RefreshFailed(_))));
        }

        assert_eq!(fx.notifier.redirects(), 1);
        assert_eq!(fx.tokens.get(), None);
        server.verify().await;
        Ok(())
    }
}
