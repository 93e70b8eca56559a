//! This crate serves chart-ready time series of Brazilian electricity generation data published
//! by the ONS (Operador Nacional do Sistema Elétrico) as CSV and Parquet files in S3.
//!
//! A request names a source object, the variables to plot, a time range and optional filters.
//! The object is retrieved from the [object store](object_store), parsed into an immutable
//! [Dataset](dataset::Dataset) by the [loader], narrowed by the [query] engine and shaped into
//! series by the [chart] adapter or into per-category [totals]. A request may also span the
//! monthly or yearly files under a prefix, which are [merged](sources) into one dataset. Parsed
//! datasets are kept in a [cache](dataset_cache) so that repeated requests against the same file
//! do not retrieve it again.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the hyper HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data.
//! * [AWS SDK for S3](aws-sdk-s3) is used to interact with S3-compatible object stores.
//! * [arrow] and [parquet] decode Parquet source files. [csv] reads the CSV ones.
//! * [ndarray] computes the column statistics of dataset summaries.

pub mod app;
pub mod app_state;
pub mod chart;
pub mod cli;
pub mod compression;
pub mod dataset;
pub mod dataset_cache;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod object_store;
pub mod query;
pub mod resample;
pub mod resource_manager;
pub mod s3_client;
pub mod server;
pub mod sources;
pub mod summary;
#[cfg(test)]
pub mod test_utils;
pub mod totals;
pub mod tracing;
pub mod validated_json;
