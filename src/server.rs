use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

use crate::controller::RunController;
use crate::error::{AssistantError, ServerError};
use crate::models::ChatRequest;

#[derive(Clone)]
pub struct AppState {
    controller: Arc<RunController>,
}

impl AppState {
    pub fn new(controller: Arc<RunController>) -> Self {
        Self { controller }
    }
}

/// Raw query string. Everything is optional here so a bad request still gets
/// an error payload instead of axum's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct InformationQuery {
    message: Option<String>,
    new: Option<String>,
    id_thread: Option<String>,
}

impl InformationQuery {
    fn into_request(self) -> Result<ChatRequest, AssistantError> {
        let message = self
            .message
            .ok_or_else(|| AssistantError::Usage("message must be provided".to_string()))?;
        let new_thread = match self.new.as_deref() {
            Some(raw) => parse_flag(raw).ok_or_else(|| {
                AssistantError::Usage(format!("new must be a boolean, got '{raw}'"))
            })?,
            None => return Err(AssistantError::Usage("new must be provided".to_string())),
        };
        Ok(ChatRequest {
            message,
            new_thread,
            thread_id: self.id_thread,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/get_information", get(information_handler))
        .layer(cors)
        .with_state(state)
}

async fn root_handler() -> Json<Value> {
    Json(json!({ "Hello": "World" }))
}

async fn information_handler(
    State(state): State<AppState>,
    query: Option<Query<InformationQuery>>,
) -> Json<Value> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("get_information", %request_id);

    async move {
        let Query(query) = query.unwrap_or_default();
        let request = match query.into_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected request");
                return Json(json!({ "error": e.to_string() }));
            }
        };

        match state.controller.chat(request).await {
            Ok(reply) => Json(json!(reply)),
            Err(e) => {
                tracing::error!(error = %e, "Request failed");
                Json(json!({ "error": e.to_string() }))
            }
        }
    }
    .instrument(span)
    .await
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(%addr, "HTTP server ready to accept connections");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}
