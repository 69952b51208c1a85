/// REST API handlers for terminal management
use axum::{
    extract::{Json, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use crate::{
    api::{
        ApiError,
        dto::{
            CreateTerminalRequest, CreatedTerminalResponse, RenameTerminalRequest,
            ResizeTerminalRequest, SuccessResponse, TerminalDetailResponse, TerminalSummary,
        },
    },
    app_state::AppState,
    service::CreateTerminal,
};

/// List every known terminal
pub async fn list_terminals(State(state): State<AppState>) -> Json<Vec<TerminalSummary>> {
    let terminals = state.manager.list().await;
    Json(terminals.into_iter().map(TerminalSummary::from).collect())
}

/// Every field is optional, so a request without a JSON body means all defaults
fn create_request(
    body: Result<Json<CreateTerminalRequest>, JsonRejection>,
) -> Result<CreateTerminalRequest, ApiError> {
    match body {
        Ok(Json(req)) => Ok(req),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(CreateTerminalRequest::default()),
        Err(rejection) => Err(ApiError::new(rejection.status(), rejection.body_text())),
    }
}

/// Create a terminal, or update the record of an existing id
pub async fn create_terminal(
    State(state): State<AppState>,
    body: Result<Json<CreateTerminalRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = create_request(body)?;
    info!("Creating terminal {:?}", req.id);

    let created = state
        .manager
        .create(CreateTerminal {
            id: req.id,
            cwd: req.cwd,
            name: req.name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedTerminalResponse::from(created)),
    ))
}

/// Get one terminal with its live state
pub async fn get_terminal(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
) -> Result<Json<TerminalDetailResponse>, ApiError> {
    let detail = state.manager.get(&terminal_id).await?;
    Ok(Json(detail.into()))
}

/// Rename a terminal, creating its record if needed
pub async fn rename_terminal(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
    Json(req): Json<RenameTerminalRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let record = state.manager.rename(&terminal_id, &req.name).await?;
    Ok(Json(SuccessResponse::new(format!(
        "Terminal {} renamed to {}",
        record.id, record.name
    ))))
}

/// Resize a terminal's live process
pub async fn resize_terminal(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
    Json(req): Json<ResizeTerminalRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!(
        "Resizing terminal {} to {}x{}",
        terminal_id, req.cols, req.rows
    );

    let resized = state
        .manager
        .resize(&terminal_id, req.rows, req.cols)
        .await?;
    let message = if resized {
        format!("Terminal {} resized to {}x{}", terminal_id, req.cols, req.rows)
    } else {
        format!("Terminal {} has no viewers, resize ignored", terminal_id)
    };
    Ok(Json(SuccessResponse::new(message)))
}

/// Destroy a terminal: backend session, record, connections and process
pub async fn destroy_terminal(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!("Destroying terminal {}", terminal_id);

    state.manager.destroy(&terminal_id).await?;
    Ok(Json(SuccessResponse::new(format!(
        "Terminal {} destroyed",
        terminal_id
    ))))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(SuccessResponse::new("Health check passed")))
}
