use axum::{extract::{Path, State}, http::StatusCode, response::IntoResponse, Json};
use axum_streams::StreamBodyAs;
use std::sync::Arc;

use crate::monitor::{Snapshot, StartOutcome};
use crate::server::{Server, ServerError};
use crate::tasks::TaskSnapshot;


pub async fn status(
    State(server): State<Arc<Server>>,
) -> Result<Json<Snapshot>, ServerError> {
    Ok(Json(server.monitor.snapshot().await?))
}


pub async fn list_tasks(
    State(server): State<Arc<Server>>,
) -> Result<Json<Vec<TaskSnapshot>>, ServerError> {
    Ok(Json(server.monitor.snapshot().await?.tasks))
}


pub async fn get_task(
    State(server): State<Arc<Server>>,
    Path(code): Path<String>
) -> Result<Json<TaskSnapshot>, ServerError> {
    server.monitor.snapshot().await?
        .tasks
        .into_iter()
        .find(|task| task.code == code)
        .map(Json)
        .ok_or(ServerError::TaskNotFound(code))
}


pub async fn start_run(
    State(server): State<Arc<Server>>,
) -> Result<Json<StartOutcome>, ServerError> {
    Ok(Json(server.monitor.start().await?))
}


pub async fn stop_run(
    State(server): State<Arc<Server>>,
) -> Result<StatusCode, ServerError> {
    server.monitor.stop().await?;
    Ok(StatusCode::ACCEPTED)
}


pub async fn update_stream(
    State(server): State<Arc<Server>>,
) -> impl IntoResponse {
    StreamBodyAs::json_nl(server.monitor.updates())
}
