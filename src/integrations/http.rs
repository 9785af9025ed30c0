//! HTTP 接入层（axum）
//!
//! GET /health；POST /get-cookies 校验 API Key 与请求体后登记请求并立即返回 request_id，
//! 结果经 Webhook 异步送达；GET /requests/:id 查询状态（不含凭证）。
//! API Key 可来自 `apikey` 查询参数、`X-API-KEY` 头或 `Authorization: Bearer`。

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::agent::AgentComponents;
use crate::core::{AgentError, CredentialBundle, LoginRequest, RequestStatusView};

pub struct HttpState {
    pub agent: Arc<AgentComponents>,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct GetCookiesBody {
    pub login_url: String,
    pub svc_email: String,
    pub email_password: String,
    #[serde(default)]
    pub svc_username: Option<String>,
    #[serde(default)]
    pub svc_password: Option<String>,
    pub callback_url: String,
    #[serde(default)]
    pub required_cookies: Option<Vec<String>>,
}

impl GetCookiesBody {
    fn into_request(self) -> LoginRequest {
        let credentials = CredentialBundle {
            email: self.svc_email,
            mailbox_password: self.email_password,
            username: self.svc_username.filter(|s| !s.is_empty()),
            password: self.svc_password.filter(|s| !s.is_empty()),
        };
        let request = LoginRequest::new(self.login_url, credentials, self.callback_url);
        match self.required_cookies {
            Some(keys) if !keys.is_empty() => request.with_required_keys(keys),
            _ => request,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub status: String,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeyQuery {
    pub apikey: Option<String>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "detail": detail.into() })))
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/get-cookies", post(get_cookies))
        .route("/requests/:id", get(request_status))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

fn authorize(state: &HttpState, headers: &HeaderMap, query: &ApiKeyQuery) -> Result<(), ApiError> {
    let header_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let provided = query.apikey.as_deref().or(header_key).or(bearer);
    match provided {
        Some(key) if key == state.api_key => Ok(()),
        _ => Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized")),
    }
}

async fn get_cookies(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ApiKeyQuery>,
    headers: HeaderMap,
    Json(body): Json<GetCookiesBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    authorize(&state, &headers, &query)?;

    let request_id = state
        .agent
        .submit(body.into_request())
        .await
        .map_err(|e| match e {
            AgentError::InvalidRequest(msg) => api_error(StatusCode::UNPROCESSABLE_ENTITY, msg),
            other => {
                tracing::error!("Failed to accept request: {}", other);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        })?;

    Ok(Json(TaskAccepted {
        status: "processing".to_string(),
        message: "Task accepted. Results will be sent to webhook URL.".to_string(),
        request_id,
    }))
}

async fn request_status(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(query): Query<ApiKeyQuery>,
    headers: HeaderMap,
) -> Result<Json<RequestStatusView>, ApiError> {
    authorize(&state, &headers, &query)?;
    state
        .agent
        .registry
        .status_view(&id)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e.to_string()))
}
