use std::future::Future;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use runbox_protocol::execution::{Execution, Operation, Overrides};
use runbox_protocol::job::Job;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::service::{RunService, UpdateOptions};

/// Builds the HTTP surface of a [`RunService`].
pub struct RunboxApiBuilder {
    service: RunService,
}

impl RunboxApiBuilder {
    pub fn new(service: RunService) -> Self {
        Self { service }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/v2/jobs", post(create_job))
            .route("/v2/jobs/:job", get(get_job).patch(update_job))
            .route("/v2/jobs/:job/run", post(run_job))
            .route("/v2/jobs/:job/executions", get(list_executions))
            .route(
                "/v2/executions/:execution",
                get(get_execution).delete(delete_execution),
            )
            .with_state(self.service)
    }

    /// Serves until `shutdown` resolves, then force-stops every container the
    /// engine still tracks.
    pub async fn serve<F>(self, bind_address: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = self.service.clone();
        let router = self.into_router();
        let listener = tokio::net::TcpListener::bind(bind_address).await?;

        info!(address = %bind_address, "starting runbox service");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("http server stopped, cleaning up executions");
        service.shutdown().await;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    /// Canonical gRPC status for clients speaking the Cloud Run protocol.
    #[serde(rename = "grpcCode")]
    pub grpc_code: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunJobRequest {
    #[serde(default)]
    pub overrides: Option<Overrides>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateJobParams {
    #[serde(default)]
    pub allow_missing: bool,
    #[serde(default)]
    pub validate_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExecutionsResponse {
    pub executions: Vec<Execution>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

async fn health(State(service): State<RunService>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "runningContainers": service.engine().running_containers(),
    }))
}

async fn create_job(
    State(service): State<RunService>,
    body: Bytes,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job: Job = parse_body(&body)?;
    let created = service.create_job(job).map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_job(
    State(service): State<RunService>,
    Path(job): Path<String>,
) -> Result<Json<Job>, ApiError> {
    service.get_job(&job).map(Json).map_err(map_error)
}

async fn update_job(
    State(service): State<RunService>,
    Path(name): Path<String>,
    Query(params): Query<UpdateJobParams>,
    body: Bytes,
) -> Result<Json<Job>, ApiError> {
    let mut job: Job = parse_body(&body)?;
    if job.name.is_empty() {
        job.name = name;
    } else if job.name != name {
        return Err(map_error(EngineError::InvalidArgument(format!(
            "job name {} does not match path {}",
            job.name, name
        ))));
    }

    let options = UpdateOptions {
        allow_missing: params.allow_missing,
        validate_only: params.validate_only,
    };
    service.update_job(job, options).map(Json).map_err(map_error)
}

async fn run_job(
    State(service): State<RunService>,
    Path(job): Path<String>,
    body: Bytes,
) -> Result<Json<Execution>, ApiError> {
    let request: RunJobRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunJobRequest::default()
    } else {
        parse_body(&body)?
    };

    service
        .run_job(&job, request.overrides.as_ref())
        .await
        .map(Json)
        .map_err(map_error)
}

async fn list_executions(
    State(service): State<RunService>,
    Path(job): Path<String>,
) -> Result<Json<ListExecutionsResponse>, ApiError> {
    service
        .list_executions(&job)
        .map(|executions| Json(ListExecutionsResponse { executions }))
        .map_err(map_error)
}

async fn get_execution(
    State(service): State<RunService>,
    Path(execution): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    service.get_execution(&execution).map(Json).map_err(map_error)
}

async fn delete_execution(
    State(service): State<RunService>,
    Path(execution): Path<String>,
) -> Result<Json<Operation>, ApiError> {
    service
        .delete_execution(&execution)
        .await
        .map(Json)
        .map_err(map_error)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        map_error(EngineError::InvalidArgument(format!(
            "invalid request body: {}",
            err
        )))
    })
}

fn map_error(err: EngineError) -> ApiError {
    let kind = err.kind();
    let status =
        StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            code: kind.as_str().into(),
            message: err.message().to_string(),
            grpc_code: kind.grpc_code(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_keep_their_kind() {
        let (status, Json(body)) = map_error(EngineError::AlreadyExists("job a".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, "already_exists");
        assert_eq!(body.message, "job a");
        assert_eq!(body.grpc_code, 6);

        let (status, _) = map_error(EngineError::DeadlineExceeded("late".into()));
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn malformed_body_is_invalid_argument() {
        let err = parse_body::<Job>(b"{not json").err().expect("parse error");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1 .0.code, "invalid_argument");
    }
}
