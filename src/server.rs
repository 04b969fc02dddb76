use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::execution::ExecutionStarted;
use crate::notebook::Notebook;
use crate::registry::Id;
use crate::search::RepoSuggestion;
use crate::service::Trybook;
use crate::status::{ExecutionView, SyncView};
use crate::{tlog, tlog_error, Error, Result};

type AppState = Arc<Trybook>;

/// `Error` rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tlog_error!("Request failed: {}", self.0);
        }
        (status, ResponseJson(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub repo: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SyncStarted {
    pub operation_id: Id,
}

pub fn router(trybook: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/repos/sync", post(start_sync))
        .route("/api/repos/sync/{id}", get(sync_status))
        .route("/api/notebooks/{owner}/{repo}", post(create_notebook))
        .route("/api/notebooks/{owner}/{repo}/{name}", get(get_notebook))
        .route(
            "/api/notebooks/{owner}/{repo}/{name}/prompts",
            post(start_prompt),
        )
        .route("/api/executions/{id}", get(execution_status))
        .layer(middleware::from_fn(log_request))
        .with_state(trybook)
}

async fn search(
    State(trybook): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ResponseJson<Vec<RepoSuggestion>> {
    ResponseJson(trybook.search(&params.query).await)
}

async fn start_sync(
    State(trybook): State<AppState>,
    ResponseJson(body): ResponseJson<SyncRequest>,
) -> std::result::Result<(StatusCode, ResponseJson<SyncStarted>), ApiError> {
    let operation_id = trybook.start_sync(&body.repo).await?;
    Ok((StatusCode::ACCEPTED, ResponseJson(SyncStarted { operation_id })))
}

async fn sync_status(
    State(trybook): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<ResponseJson<SyncView>, ApiError> {
    let id = parse_id(&id, Error::OperationNotFound)?;
    Ok(ResponseJson(trybook.sync_status(&id).await?))
}

async fn create_notebook(
    State(trybook): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> std::result::Result<(StatusCode, ResponseJson<Notebook>), ApiError> {
    let notebook = trybook.create_notebook(&owner, &repo).await?;
    Ok((StatusCode::CREATED, ResponseJson(notebook)))
}

async fn get_notebook(
    State(trybook): State<AppState>,
    Path((owner, repo, name)): Path<(String, String, String)>,
) -> std::result::Result<ResponseJson<Notebook>, ApiError> {
    Ok(ResponseJson(trybook.notebook(&owner, &repo, &name)?))
}

async fn start_prompt(
    State(trybook): State<AppState>,
    Path((owner, repo, name)): Path<(String, String, String)>,
    ResponseJson(body): ResponseJson<PromptRequest>,
) -> std::result::Result<(StatusCode, ResponseJson<ExecutionStarted>), ApiError> {
    let execution_id = trybook
        .start_prompt(&owner, &repo, &name, &body.prompt)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        ResponseJson(ExecutionStarted { execution_id }),
    ))
}

async fn execution_status(
    State(trybook): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<ResponseJson<ExecutionView>, ApiError> {
    let id = parse_id(&id, Error::ExecutionNotFound)?;
    Ok(ResponseJson(trybook.execution_status(&id).await?))
}

/// A malformed id can never name a registered entry.
fn parse_id(raw: &str, not_found: fn(String) -> Error) -> Result<Id> {
    raw.parse().map_err(|_| not_found(raw.to_string()))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    tlog!(
        "{} {} {} {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(trybook: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    serve_until(listener, trybook, shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled, then
/// let in-flight requests finish.
pub async fn serve_until(
    listener: TcpListener,
    trybook: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    tlog!("Server running on http://{}", local);
    println!("trybook listening on http://{}", local);
    axum::serve(listener, router(trybook))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tlog!("Server on {} stopped", local);
    Ok(())
}

/// Cancel `shutdown` on the first Ctrl-C, or SIGTERM on Unix.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(e) => {
                tlog_error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tlog_error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
        _ = shutdown.cancelled() => return,
    };
    tlog!("Received {}, shutting down", received);
    shutdown.cancel();
}
