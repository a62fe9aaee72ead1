use crate::api::{
    captcha::render_data_url,
    error::{ok, ApiResponse},
    state::AppState,
};
use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaImage {
    pub uuid: String,
    /// `data:image/svg+xml;base64,...`
    pub img: String,
    pub captcha_enabled: bool,
}

#[utoipa::path(
    get,
    path = "/captchaImage",
    responses(
        (status = 200, description = "New single-use captcha, valid for five minutes", body = ApiResponse<CaptchaImage>),
        (status = 429, description = "Too many requests", body = crate::api::error::ErrorBody),
    ),
    tag = "config"
)]
#[instrument(skip(state))]
pub async fn captcha_image(State(state): State<Arc<AppState>>) -> Json<ApiResponse<CaptchaImage>> {
    let captcha = state.captchas.issue();
    ok(CaptchaImage {
        uuid: captcha.uuid.to_string(),
        img: render_data_url(&captcha.code),
        captcha_enabled: state.config.captcha_login(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body_json, get, test_app};
    use anyhow::Result;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn captcha_image_returns_svg_data_url() -> Result<()> {
        let (app, _state) = test_app();
        let response = app.oneshot(get("/captchaImage", None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await?;
        assert_eq!(body["code"], 0);
        assert!(body["data"]["img"]
            .as_str()
            .is_some_and(|img| img.starts_with("data:image/svg+xml;base64,")));
        assert!(body["data"]["uuid"]
            .as_str()
            .is_some_and(|uuid| uuid::Uuid::parse_str(uuid).is_ok()));
        assert_eq!(body["data"]["captchaEnabled"], false);
        Ok(())
    }
}
