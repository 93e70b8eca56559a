//! HTTP API

use crate::app_state::{AppState, SharedAppState};
use crate::chart::{self, Chart};
use crate::cli::CommandLineArgs;
use crate::error::EnergyVizError;
use crate::metrics;
use crate::models::{DescribeRequest, SeriesRequest, TotalsRequest};
use crate::object_store::{is_dataset_key, ObjectInfo};
use crate::summary::{self, DatasetSummary};
use crate::totals::{self, Totals};
use crate::validated_json::ValidatedJson;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

/// Application service
pub type Service = NormalizePath<Router>;

/// Initialise the application
///
/// Sizes the global Rayon thread pool when a thread limit is given.
pub fn init(args: &CommandLineArgs) {
    if let Some(thread_limit) = args.thread_limit {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_limit)
            .build_global()
        {
            tracing::warn!("failed to configure Rayon thread pool: {}", err);
        }
    }
}

/// Returns a [axum::Router] for the API
///
/// The router is wrapped in layers that trace each request and record request and response
/// metrics.
///
/// # Arguments
///
/// * `state`: Shared application state
fn router(state: SharedAppState) -> Router {
    fn v1() -> Router<SharedAppState> {
        Router::new()
            .route("/datasets", get(list_datasets))
            .route("/datasets/describe", post(describe))
            .route("/series", post(series))
            .route("/totals", post(category_totals))
    }

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/v1", v1())
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(metrics::request_counter)
                    .on_response(metrics::record_response_metrics),
            ),
        )
        .with_state(state)
}

/// Returns an [crate::app::Service] for the API
///
/// Trailing slashes are removed from request paths before routing.
///
/// # Arguments
///
/// * `args`: Command line arguments
pub fn service(args: &CommandLineArgs) -> Service {
    service_with_state(Arc::new(AppState::new(args)))
}

fn service_with_state(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// List the dataset files under the configured prefix
async fn list_datasets(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<ObjectInfo>>, EnergyVizError> {
    let objects = {
        let _connection = state.resource_manager.store_connection().await?;
        state.store.list(&state.args.prefix).await?
    };
    Ok(Json(
        objects
            .into_iter()
            .filter(|object| is_dataset_key(&object.key))
            .collect(),
    ))
}

/// Summarise the columns of a dataset, optionally per category
#[tracing::instrument(level = "DEBUG", skip(state))]
async fn describe(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<DescribeRequest>,
) -> Result<Json<DatasetSummary>, EnergyVizError> {
    let dataset = state.dataset(&request.object).await?;
    let summary = state
        .compute(move || summary::describe(&dataset, request.group_by.as_deref()))
        .await?;
    Ok(Json(summary))
}

/// Build chart series from a dataset
#[tracing::instrument(level = "DEBUG", skip(state))]
async fn series(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<SeriesRequest>,
) -> Result<Json<Chart>, EnergyVizError> {
    let spec = request.to_query_spec()?;
    let options = request.chart_options(state.args.fail_on_empty_series);
    let dataset = state
        .source_dataset(&request.source()?, &spec.time_range)
        .await?;
    let chart = state
        .compute(move || chart::render(&dataset, &spec, &options))
        .await?;
    Ok(Json(chart))
}

/// Sum a variable per category, for pie, bar and map views
#[tracing::instrument(level = "DEBUG", skip(state))]
async fn category_totals(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<TotalsRequest>,
) -> Result<Json<Totals>, EnergyVizError> {
    let spec = request.to_query_spec()?;
    let dataset = state
        .source_dataset(&request.source()?, &spec.time_range)
        .await?;
    let result = state
        .compute(move || {
            totals::render_totals(&dataset, &spec, &request.variable, &request.by, request.sort)
        })
        .await?;
    Ok(Json(result))
}
