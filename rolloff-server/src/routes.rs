use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use rolloff_core::{
    CityListing, CityRef, Company, DumpsterSize, Price, RolloffService, SchedulerError,
    SchedulerStatus, ServiceArea, StoreError, TriggerOutcome, VendorMeta,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Error answered to API clients as `{"error": {"message", "status"}}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        tracing::error!(error = %error, "snapshot store unavailable");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(error: SchedulerError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CityQuery {
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScrapeResponse {
    message: &'static str,
    queued: bool,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    vendors: Vec<VendorMeta>,
    #[serde(flatten)]
    scheduler: SchedulerStatus,
}

/// All API routes with CORS for `origins` and request tracing.
pub(crate) fn router(service: Arc<RolloffService>, origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/scrape", post(scrape))
        .route("/companies", get(companies))
        .route("/service-areas", get(service_areas))
        .route("/dumpster-sizes", get(dumpster_sizes))
        .route("/prices", get(prices))
        .route("/city/{city}", get(city))
        .route("/cities", get(cities))
        .route("/status", get(status))
        .layer(cors(origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(origin, error = %error, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn scrape(
    State(service): State<Arc<RolloffService>>,
) -> Result<(StatusCode, Json<ScrapeResponse>), ApiError> {
    let response = match service.request_refresh()? {
        TriggerOutcome::Queued => ScrapeResponse {
            message: "Scrape queued",
            queued: true,
        },
        TriggerOutcome::AlreadyPending => ScrapeResponse {
            message: "A scrape is already pending",
            queued: false,
        },
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn companies(State(service): State<Arc<RolloffService>>) -> ApiResult<Vec<Company>> {
    Ok(Json(service.companies().await?))
}

async fn service_areas(State(service): State<Arc<RolloffService>>) -> ApiResult<Vec<ServiceArea>> {
    Ok(Json(service.service_areas().await?))
}

async fn dumpster_sizes(
    State(service): State<Arc<RolloffService>>,
) -> ApiResult<Vec<DumpsterSize>> {
    Ok(Json(service.dumpster_sizes().await?))
}

async fn prices(State(service): State<Arc<RolloffService>>) -> ApiResult<Vec<Price>> {
    Ok(Json(service.prices().await?))
}

async fn city(
    State(service): State<Arc<RolloffService>>,
    Path(name): Path<String>,
    Query(query): Query<CityQuery>,
) -> ApiResult<CityListing> {
    service
        .city(&name, query.state.as_deref())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("No data found for city: {name}")))
}

async fn cities(State(service): State<Arc<RolloffService>>) -> ApiResult<Vec<CityRef>> {
    Ok(Json(service.cities().await?))
}

async fn status(State(service): State<Arc<RolloffService>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        vendors: service.vendors(),
        scheduler: service.status(),
    })
}
