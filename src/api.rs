use std::net::SocketAddr;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::Error;
use crate::filter::{normalize, RawFilter};
use crate::models::Test;
use crate::test_store::default_title;

#[derive(Clone)]
pub struct AppState {
    db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestResponse {
    pub id: i64,
    pub redirect: String,
    pub question_count: usize,
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResponse {
    #[serde(flatten)]
    pub test: Test,
    pub question_count: usize,
}

#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}

/// Normalize, select and persist. Returns the stored test and whether the
/// selection had to ignore the filter.
pub fn generate_test(db: &Database, raw: &RawFilter) -> Result<(Test, bool), Error> {
    let descriptor = normalize(raw)?;
    let selection = db.select_questions(&descriptor)?;
    let title = descriptor
        .title
        .clone()
        .unwrap_or_else(|| default_title(descriptor.level.label()));
    let test = db.create_test(&title, &selection.questions)?;
    Ok((test, selection.fallback))
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(join_err) => {
            error!(error = %join_err, "blocking task failed");
            Err(ApiError(Error::Io(std::io::Error::other(join_err.to_string()))))
        }
    }
}

async fn create_test(
    State(state): State<AppState>,
    payload: Result<Json<RawFilter>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateTestResponse>), ApiError> {
    let Json(raw) = payload.map_err(|rejection| {
        warn!(error = %rejection, "rejected test request body");
        ApiError(Error::validation(rejection.body_text()))
    })?;

    let db = state.db.clone();
    let (test, fallback) = run_blocking(move || generate_test(&db, &raw)).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTestResponse {
            id: test.id,
            redirect: format!("/test/{}", test.id),
            question_count: test.question_count(),
            fallback,
        }),
    ))
}

async fn get_test(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<TestResponse>, ApiError> {
    let Path(id) = id.map_err(|rejection| {
        warn!(error = %rejection, "rejected test id");
        ApiError(Error::validation("test id must be an integer"))
    })?;
    let db = state.db.clone();
    let test = run_blocking(move || db.get_test(id)).await?;
    let question_count = test.question_count();
    Ok(Json(TestResponse {
        test,
        question_count,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tests", post(create_test))
        .route("/tests/:id", get(get_test))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(db: Database, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(AppState::new(db))).await
}
