use crate::api::{
    error::{ok, ApiResponse},
    state::AppState,
};
use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub title: String,
    pub version: String,
    pub captcha_login: bool,
    pub token_ttl_hours: i64,
}

#[utoipa::path(
    get,
    path = "/getConfig",
    responses(
        (status = 200, description = "Frontend configuration", body = ApiResponse<AppConfig>),
        (status = 429, description = "Too many requests", body = crate::api::error::ErrorBody),
    ),
    tag = "config"
)]
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ApiResponse<AppConfig>> {
    ok(AppConfig {
        title: state.config.app_title().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        captcha_login: state.config.captcha_login(),
        token_ttl_hours: state.config.token_ttl_hours(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body_json, get, test_app_with, test_config};
    use anyhow::Result;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn get_config_reports_settings() -> Result<()> {
        let (app, _state) = test_app_with(
            test_config()
                .with_app_title("Panel".to_string())
                .with_captcha_login(true),
        );
        let response = app.oneshot(get("/getConfig", None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await?;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["title"], "Panel");
        assert_eq!(body["data"]["captchaLogin"], true);
        assert_eq!(body["data"]["tokenTtlHours"], 1);
        assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}
