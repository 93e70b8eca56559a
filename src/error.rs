//! Error handling.

use arrow::error::ArrowError;
use axum::{
    extract::rejection::JsonRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parquet::errors::ParquetError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

use crate::dataset::{ColumnKind, Timestamp};

/// Failure to retrieve an object from the object store.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The object or its bucket does not exist
    #[error("object {key} not found")]
    NotFound { key: String },

    /// The store refused access to the object
    #[error("access to object {key} denied")]
    AccessDenied { key: String },

    /// The store did not respond in time
    #[error("timed out retrieving object {key}")]
    Timeout { key: String },

    /// Any other failure talking to the store
    #[error("failed to retrieve object {key}: {message}")]
    Transport { key: String, message: String },
}

/// ONS energy viz error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum EnergyVizError {
    /// Error decoding Arrow data
    #[error("failed to parse source data")]
    Arrow(#[from] ArrowError),

    /// Error reading CSV data
    #[error("failed to parse source data")]
    Csv(#[from] csv::Error),

    /// Error decompressing data
    #[error("failed to decompress data")]
    Decompression(#[from] std::io::Error),

    /// A series had no points and empty series were configured as errors
    #[error("no data points for variable {variable}")]
    EmptySeries { variable: String },

    /// Insufficient memory to process request
    #[error("Insufficient memory to process request ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// Time range start after its end
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },

    /// No dataset object under a prefix covers the requested time range
    #[error("no dataset objects under prefix '{prefix}' match the time range")]
    NoMatchingObjects { prefix: String },

    /// A grouping column does not hold categories
    #[error("column {column} is {kind}, not category")]
    NotACategory { column: String, kind: ColumnKind },

    /// Error reading Parquet data
    #[error("failed to parse source data")]
    Parquet(#[from] ParquetError),

    /// Malformed source data
    #[error("failed to parse source data: {reason}")]
    Parse { reason: String },

    /// Error deserialising request data
    #[error("request data is not valid")]
    RequestDataJsonRejection(#[from] JsonRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Error retrieving an object from the object store
    #[error("error retrieving object from storage")]
    Retrieval(#[from] RetrievalError),

    /// Source data does not have the expected columns
    #[error("source data does not match the expected schema: {reason}")]
    Schema { reason: String },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// A blocking task panicked or was cancelled
    #[error("background task failed")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// A requested variable or filter column is not in the dataset
    #[error("unknown variable {variable}")]
    UnknownVariable { variable: String },
}

impl EnergyVizError {
    /// Stable error code reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            EnergyVizError::Arrow(_)
            | EnergyVizError::Csv(_)
            | EnergyVizError::Decompression(_)
            | EnergyVizError::Parquet(_)
            | EnergyVizError::Parse { reason: _ } => "parse_error",
            EnergyVizError::EmptySeries { variable: _ } => "empty_series",
            EnergyVizError::InsufficientMemory {
                requested: _,
                total: _,
            } => "insufficient_memory",
            EnergyVizError::InvalidRange { start: _, end: _ } => "invalid_range",
            EnergyVizError::NoMatchingObjects { prefix: _ } => "no_matching_objects",
            EnergyVizError::NotACategory { column: _, kind: _ } => "not_a_category",
            EnergyVizError::RequestDataJsonRejection(_)
            | EnergyVizError::RequestDataValidationSingle(_)
            | EnergyVizError::RequestDataValidation(_) => "invalid_request",
            EnergyVizError::Retrieval(error) => match error {
                RetrievalError::NotFound { key: _ } => "not_found",
                RetrievalError::AccessDenied { key: _ } => "access_denied",
                RetrievalError::Timeout { key: _ } => "timeout",
                RetrievalError::Transport { key: _, message: _ } => "retrieval_error",
            },
            EnergyVizError::Schema { reason: _ } => "schema_error",
            EnergyVizError::SemaphoreAcquireError(_)
            | EnergyVizError::TaskJoin(_)
            | EnergyVizError::TryFromInt(_) => "internal_error",
            EnergyVizError::UnknownVariable { variable: _ } => "unknown_variable",
        }
    }

    /// HTTP status of the response for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            // Bad request
            EnergyVizError::InsufficientMemory {
                requested: _,
                total: _,
            }
            | EnergyVizError::InvalidRange { start: _, end: _ }
            | EnergyVizError::NotACategory { column: _, kind: _ }
            | EnergyVizError::RequestDataJsonRejection(_)
            | EnergyVizError::RequestDataValidationSingle(_)
            | EnergyVizError::RequestDataValidation(_)
            | EnergyVizError::UnknownVariable { variable: _ } => StatusCode::BAD_REQUEST,

            // Not found
            EnergyVizError::NoMatchingObjects { prefix: _ } => StatusCode::NOT_FOUND,

            // Unprocessable entity
            EnergyVizError::EmptySeries { variable: _ } => StatusCode::UNPROCESSABLE_ENTITY,

            // Upstream storage failures
            EnergyVizError::Retrieval(RetrievalError::Timeout { key: _ }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            EnergyVizError::Retrieval(_) => StatusCode::BAD_GATEWAY,

            // Internal server error
            EnergyVizError::Arrow(_)
            | EnergyVizError::Csv(_)
            | EnergyVizError::Decompression(_)
            | EnergyVizError::Parquet(_)
            | EnergyVizError::Parse { reason: _ }
            | EnergyVizError::Schema { reason: _ }
            | EnergyVizError::SemaphoreAcquireError(_)
            | EnergyVizError::TaskJoin(_)
            | EnergyVizError::TryFromInt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EnergyVizError {
    /// Convert from an `EnergyVizError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Error code from the error taxonomy
    code: String,

    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new(error: &EnergyVizError) -> Self {
        let mut causes = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            causes.push(source.to_string());
            current = source.source();
        }
        // Remove duplicate entries.
        causes.dedup();
        ErrorBody {
            code: error.code().to_string(),
            message: error.to_string(),
            caused_by: if causes.is_empty() { None } else { Some(causes) },
        }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl From<EnergyVizError> for ErrorResponse {
    /// Convert from an `EnergyVizError` into an `ErrorResponse`.
    fn from(error: EnergyVizError) -> Self {
        let response = ErrorResponse {
            status: error.status(),
            error: ErrorBody::new(&error),
        };

        // Log server errors. Client errors are the caller's problem.
        if response.status.is_server_error() {
            event!(Level::ERROR, code = error.code(), "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}
