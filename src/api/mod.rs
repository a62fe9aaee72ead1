use crate::store::Store;
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod captcha;
pub mod error;
pub mod handlers;
mod openapi;
pub mod rate_limit;
pub mod state;
mod utils;

pub use openapi::openapi;
pub use state::AppState;

use handlers::{
    auth as auth_handlers, captcha as captcha_handlers, config, health, menus, roles, root, users,
};

/// Build the application router.
///
/// - `/getConfig`, `/captchaImage`: public, throttled per client IP
/// - `/auth/register`, `/auth/login`, `/auth/refresh`: public
/// - `/auth/me`, `/auth/logout`, `/admin/*`: bearer token required
pub fn router(state: Arc<AppState>) -> Router {
    let throttled = Router::new()
        .route("/getConfig", get(config::get_config))
        .route("/captchaImage", get(captcha_handlers::captcha_image))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::throttle,
        ));

    let protected = Router::new()
        .route("/auth/me", get(auth_handlers::me))
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/admin/user/list", get(users::list))
        .route("/admin/user/create", post(users::create))
        .route("/admin/user/update", post(users::update))
        .route("/admin/user/updateStatus", post(users::update_status))
        .route("/admin/user/resetPassword", post(users::reset_password))
        .route("/admin/user/delete", post(users::delete))
        .route("/admin/user/profile/info", get(users::profile))
        .route("/admin/user/profile/password", post(users::change_password))
        .route("/admin/role/all", get(roles::all))
        .route("/admin/role/list", get(roles::list))
        .route("/admin/role/info", get(roles::info))
        .route("/admin/role/create", post(roles::create))
        .route("/admin/role/update", post(roles::update))
        .route("/admin/role/updateStatus", post(roles::update_status))
        .route("/admin/role/delete", post(roles::delete))
        .route("/admin/menu/list", get(menus::list))
        .route("/admin/menu/tree", get(menus::tree))
        .route("/admin/menu/info", get(menus::info))
        .route("/admin/menu/create", post(menus::create))
        .route("/admin/menu/update", post(menus::update))
        .route("/admin/menu/delete", post(menus::delete))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::principal::authenticate,
        ));

    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/auth/register", post(auth_handlers::register))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/refresh", post(auth_handlers::refresh))
        .merge(throttled)
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .with_state(state)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, store: Arc<dyn Store>, auth_config: auth::AuthConfig) -> Result<()> {
    let frontend_origin = frontend_origin(auth_config.frontend_base_url())?;
    let state = Arc::new(AppState::new(auth_config, store));

    let cors = CorsLayer::new()
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::handlers::test_support::{body_json, get, test_app};
    use super::*;
    use crate::{
        api::{auth::AuthConfig, rate_limit::FixedWindowLimiter},
        store::MemoryStore,
    };
    use axum::http::StatusCode;
    use secrecy::SecretString;
    use std::time::Duration;
    use tower::ServiceExt;

    #[test]
    fn frontend_origin_strips_path() -> Result<()> {
        assert_eq!(
            frontend_origin("http://localhost:8848/login")?,
            "http://localhost:8848"
        );
        assert_eq!(
            frontend_origin("https://panel.example.com/")?,
            "https://panel.example.com"
        );
        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }

    #[test]
    fn make_span_reads_request_id() -> Result<()> {
        let request = Request::builder()
            .uri("/health")
            .header("x-request-id", "01HZY")
            .body(Body::empty())?;
        let span = make_span(&request);
        // spans are disabled without a subscriber; building one must not panic
        drop(span);
        Ok(())
    }

    #[tokio::test]
    async fn root_greets() -> Result<()> {
        let (app, _state) = test_app();
        let response = app.oneshot(get("/", None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert!(String::from_utf8(bytes.to_vec())?.starts_with(env!("CARGO_PKG_NAME")));
        Ok(())
    }

    #[tokio::test]
    async fn openapi_document_is_served() -> Result<()> {
        let (app, _state) = test_app();
        let response = app.oneshot(get("/api-docs/openapi.json", None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await?;
        assert!(body["paths"]["/auth/login"].is_object());
        Ok(())
    }

    #[tokio::test]
    async fn public_endpoints_are_throttled() -> Result<()> {
        let state = Arc::new(AppState::with_limiter(
            AuthConfig::new(SecretString::from("test-secret".to_string())),
            Arc::new(MemoryStore::new()),
            Arc::new(FixedWindowLimiter::new(2, Duration::from_secs(60))),
        ));
        let app = router(state);

        for remaining in ["1", "0"] {
            let response = app.clone().oneshot(get("/getConfig", None)?).await?;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["X-RateLimit-Limit"], "2");
            assert_eq!(response.headers()["X-RateLimit-Remaining"], remaining);
        }

        // the captcha endpoint shares the same per-client window
        let response = app.clone().oneshot(get("/captchaImage", None)?).await?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));
        let body = body_json(response).await?;
        assert_eq!(body["code"], 429);

        // routes outside the throttled group keep working
        let response = app.oneshot(get("/health", None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
