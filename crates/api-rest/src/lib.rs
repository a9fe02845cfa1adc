//! # API REST
//!
//! REST API for the epi bundle service.
//!
//! Handles:
//! - the inbound update signal (`POST /api/data`) and bundle reversal (`POST /api/reverse`)
//! - static assets and the current output bundle
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON rejections, CORS)
//!
//! All pipeline work is delegated to [`epi_core::IngestService`].

#![warn(rust_2018_idioms)]

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use epi_core::fhir::{Bundle, Record};
use epi_core::{ingest::is_empty_payload, IngestService, INDEX_HTML_FILENAME};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state for the REST API server.
#[derive(Clone)]
pub struct AppState {
    pub service: IngestService,
}

#[derive(Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Error body returned for every rejected request.
#[derive(Debug, Serialize, ToSchema)]
pub struct FailureRes {
    pub status: &'static str,
    pub reason: &'static str,
}

#[derive(Serialize, ToSchema)]
pub struct DataRes {
    pub status: &'static str,
    /// Observations in the assembled bundle.
    pub entries: usize,
    /// Records dropped during validation.
    pub skipped: usize,
    /// The request body, echoed back.
    #[schema(value_type = Object)]
    pub data_received: Value,
}

#[derive(Serialize, ToSchema)]
pub struct ReverseFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReverseRes {
    pub status: &'static str,
    #[schema(value_type = Vec<Object>)]
    pub records: Vec<Record>,
    pub failures: Vec<ReverseFailure>,
}

type ApiError = (StatusCode, Json<FailureRes>);

fn failure(status: StatusCode, reason: &'static str) -> ApiError {
    (
        status,
        Json(FailureRes {
            status: "failure",
            reason,
        }),
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(health, post_data, reverse),
    components(schemas(HealthRes, FailureRes, DataRes, ReverseFailure, ReverseRes))
)]
struct ApiDoc;

/// Build the application router.
///
/// Static routes are resolved against the service's configured static directory and output file.
pub fn router(state: AppState) -> Router {
    let cfg = state.service.config();
    let index = ServeFile::new(cfg.static_dir().join(INDEX_HTML_FILENAME));
    let style = ServeDir::new(cfg.static_dir());
    let current_bundle = ServeFile::new(cfg.output_file());

    Router::new()
        .route("/health", get(health))
        .route("/api/data", post(post_data))
        .route("/api/reverse", post(reverse))
        .route_service("/", index)
        .route_service("/fhir_bundle.json", current_bundle)
        .nest_service("/style", style)
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API.
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "epi REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/api/data",
    request_body(content = Object, description = "A record, or a JSON array of records"),
    responses(
        (status = 200, description = "Bundle assembled", body = DataRes),
        (status = 400, description = "Malformed, empty or invalid data", body = FailureRes),
        (status = 415, description = "Body is not declared as JSON", body = FailureRes)
    )
)]
/// Inbound update signal.
///
/// Validates and assembles the posted records, replies with the entry and skip counts, and
/// writes the bundle to the output file in the background.
///
/// # Errors
///
/// Returns `4xx` with reason:
/// - `malformed json` if the body is not JSON (status taken from the extractor rejection),
/// - `empty data` if the body is `null`, `[]` or `{}`,
/// - `invalid data` if no record survives validation or the batch is malformed.
async fn post_data(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<DataRes>, ApiError> {
    let Json(body) = payload.map_err(|rejection| {
        tracing::warn!("Rejected update: {}", rejection.body_text());
        failure(rejection.status(), "malformed json")
    })?;

    if is_empty_payload(&body) {
        tracing::warn!("Received empty data");
        return Err(failure(StatusCode::BAD_REQUEST, "empty data"));
    }

    let report = state.service.assemble(&body);
    if report.error.is_some() || report.bundle.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "invalid data"));
    }

    let entries = report.bundle.len();
    let skipped = report.skipped.len();
    // Write failures are logged by the service and never reach the client.
    let _ = state.service.persist_in_background(report.bundle);

    tracing::info!("Accepted update: {} entries, {} skipped", entries, skipped);
    Ok(Json(DataRes {
        status: "success",
        entries,
        skipped,
        data_received: body,
    }))
}

#[utoipa::path(
    post,
    path = "/api/reverse",
    request_body(content = Object, description = "A FHIR Bundle of observations"),
    responses(
        (status = 200, description = "Records recovered from the bundle", body = ReverseRes),
        (status = 400, description = "Body is not a FHIR Bundle", body = FailureRes)
    )
)]
/// Reverse a bundle into flat records.
///
/// Entries that cannot be reversed are reported by index alongside the records that could.
///
/// # Errors
///
/// Returns `4xx` with reason `malformed json` if the body is not JSON, and `400` with reason
/// `invalid bundle` if it is not a FHIR Bundle.
async fn reverse(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ReverseRes>, ApiError> {
    let Json(body) = payload.map_err(|rejection| failure(rejection.status(), "malformed json"))?;

    let bundle = Bundle::parse(&body.to_string()).map_err(|e| {
        tracing::warn!("Rejected bundle: {}", e);
        failure(StatusCode::BAD_REQUEST, "invalid bundle")
    })?;

    let report = state.service.reverse(&bundle);
    let failures = report
        .failures
        .into_iter()
        .map(|f| ReverseFailure {
            index: f.index,
            reason: f.error.to_string(),
        })
        .collect();

    Ok(Json(ReverseRes {
        status: "success",
        records: report.records,
        failures,
    }))
}
