use axum::routing::{get, post};
use std::sync::Arc;

use crate::error::Error;
use crate::monitor::Monitor;

mod handlers;


pub struct Server {
    pub monitor: Monitor,
}

impl Server {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }
}


#[derive(Debug)]
pub enum ServerError {
    TaskNotFound(String),
    SpawnFailed(String),
    MonitorUnavailable,
}

impl From<Error> for ServerError {
    fn from(err: Error) -> Self {
        match err {
            Error::Spawn { .. } => ServerError::SpawnFailed(err.to_string()),
            Error::UnknownTask(code) => ServerError::TaskNotFound(code),
            _ => ServerError::MonitorUnavailable,
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::http::Response<axum::body::Body> {
        match self {
            ServerError::TaskNotFound(code) => {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    format!("Task not found: {}", code)
                ).into_response()
            }
            ServerError::SpawnFailed(message) => {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    message
                ).into_response()
            }
            ServerError::MonitorUnavailable => {
                (
                    axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    "Monitor is not running"
                ).into_response()
            }
        }
    }
}


pub fn router(server: Arc<Server>) -> axum::Router {
    axum::Router::new()
        .route("/status", get(handlers::status))
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/:code", get(handlers::get_task))
        .route("/run", post(handlers::start_run))
        .route("/stop", post(handlers::stop_run))
        .route("/updates", get(handlers::update_stream))
        .with_state(server)
}


pub async fn serve(
    server: Arc<Server>,
    listener: tokio::net::TcpListener
) -> Result<(), std::io::Error> {
    tracing::info!(addr = ?listener.local_addr().ok(), "serving monitor");
    axum::serve(listener, router(server)).await
}
