//! Scrape job endpoints.
//!
//! - `POST /api/jobs` queues a [`ScrapeRequest`] and returns its job id.
//! - `GET /api/jobs/{job_id}?resource_type=` returns the finished response,
//!   404 while it is pending.
//! - `POST /api/scrape` scrapes within the request and returns the raw result.
//! - `POST /api/scrape/screenshot` does the same, always as `image/png`.

use {
    axum::{
        Json,
        extract::{
            Path, Query, State,
            rejection::{JsonRejection, QueryRejection},
        },
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    serde::Deserialize,
    tracing::{info, warn},
    trawl_browser::{ResourceType, ScrapeRequest, ScrapeStatus},
    trawl_common::JobId,
    trawl_jobs::Error as JobError,
};

use crate::server::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ResultQuery {
    #[serde(default)]
    pub resource_type: ResourceType,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "ok": false, "error": message.into() })),
    )
        .into_response()
}

fn job_error_response(err: &JobError) -> Response {
    let status = match err {
        JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        JobError::QueueFull { .. } | JobError::QueueClosed { .. } | JobError::Saturated { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        },
        JobError::Browser(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

/// `POST /api/jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let resource_type = request.resource_type;
    match state.gateway.jobs.submit(request) {
        Ok(job_id) => {
            info!(%job_id, %resource_type, "job accepted");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "job_id": job_id,
                    "resource_type": resource_type,
                })),
            )
                .into_response()
        },
        Err(e) => {
            warn!(%resource_type, error = %e, "job rejected");
            job_error_response(&e)
        },
    }
}

/// `GET /api/jobs/{job_id}`
pub async fn job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    query: Result<Query<ResultQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let job_id: JobId = match job_id.parse() {
        Ok(id) => id,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid job id: {e}"));
        },
    };

    match state.gateway.jobs.result(job_id, query.resource_type) {
        Some(response) => Json(response).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no {} result for job {job_id} yet", query.resource_type),
        ),
    }
}

/// `POST /api/scrape`
pub async fn scrape_now(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => run_sync(&state, request).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    }
}

/// `POST /api/scrape/screenshot`
pub async fn screenshot_now(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(mut request)) => {
            request.resource_type = ResourceType::Screenshot;
            run_sync(&state, request).await
        },
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    }
}

async fn run_sync(state: &AppState, request: ScrapeRequest) -> Response {
    let Some(sync) = state.gateway.sync.as_ref() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "synchronous scraping is disabled",
        );
    };

    let response = match sync.scrape(&request, &state.gateway.shutdown).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %request.url, error = %e, "synchronous scrape rejected");
            return job_error_response(&e);
        },
    };

    let job_id = response.job_id;
    let payload = match (response.status, response.result) {
        (ScrapeStatus::Ok, Some(payload)) => payload,
        (_, result) => {
            warn!(
                %job_id,
                url = %request.url,
                error = result.as_deref().unwrap_or_default(),
                "synchronous scrape produced no content"
            );
            return StatusCode::NO_CONTENT.into_response();
        },
    };

    match response.resource_type {
        ResourceType::PageSource => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            payload,
        )
            .into_response(),
        ResourceType::Screenshot => match BASE64.decode(payload.as_bytes()) {
            Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
            Err(e) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("screenshot payload is not valid base64: {e}"),
            ),
        },
    }
}
