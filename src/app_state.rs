use crate::cli::CommandLineArgs;
use crate::compression;
use crate::dataset::Dataset;
use crate::dataset_cache::DatasetCache;
use crate::error::EnergyVizError;
use crate::loader::{self, LoadOptions};
use crate::metrics::BYTES_RETRIEVED;
use crate::object_store::{FileSystemStore, ObjectStore};
use crate::query::TimeRange;
use crate::resource_manager::ResourceManager;
use crate::s3_client::{S3Client, S3Credentials};
use crate::sources::{self, DatasetSource};

use std::sync::Arc;
use std::time::Duration;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    /// Source of dataset files.
    pub store: Arc<dyn ObjectStore>,

    /// Loaded datasets.
    pub dataset_cache: DatasetCache,

    /// How source files are interpreted.
    pub load_options: LoadOptions,
}

impl AppState {
    /// Create and return an [AppState].
    ///
    /// Objects are served from `--data-dir` when it is set, and from S3 otherwise.
    pub fn new(args: &CommandLineArgs) -> Self {
        let store: Arc<dyn ObjectStore> = match &args.data_dir {
            Some(data_dir) => Arc::new(FileSystemStore::new(data_dir)),
            None => Arc::new(S3Client::new(
                &args.bucket,
                &args.region,
                args.s3_endpoint.as_ref(),
                S3Credentials::from_options(args.access_key.as_deref(), args.secret_key.as_deref()),
                Duration::from_secs(args.store_timeout),
            )),
        };
        Self::with_store(args, store)
    }

    /// Create an [AppState] backed by the given store.
    pub fn with_store(args: &CommandLineArgs, store: Arc<dyn ObjectStore>) -> Self {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager =
            ResourceManager::new(args.s3_connection_limit, args.memory_limit, task_limit);
        let load_options = LoadOptions {
            timestamp_column: args.timestamp_column.clone(),
            max_inflated_size: args.memory_limit,
            ..Default::default()
        };

        Self {
            args: args.clone(),
            resource_manager,
            store,
            dataset_cache: DatasetCache::new(args.dataset_cache_size, args.dataset_cache_ttl),
            load_options,
        }
    }

    /// Returns the dataset stored under a key, from the cache if possible.
    pub async fn dataset(&self, key: &str) -> Result<Arc<Dataset>, EnergyVizError> {
        self.dataset_cache
            .get_or_load(key, || self.load_dataset(key))
            .await
    }

    /// Returns the dataset of a request's source.
    ///
    /// Each object is loaded through the cache. Several objects are merged into one dataset,
    /// which is not itself cached.
    ///
    /// # Arguments
    ///
    /// * `source`: [DatasetSource] of the request
    /// * `range`: Time range of the request, used to choose objects under a prefix
    pub async fn source_dataset(
        &self,
        source: &DatasetSource,
        range: &TimeRange,
    ) -> Result<Arc<Dataset>, EnergyVizError> {
        let keys = match source {
            DatasetSource::Object(key) => return self.dataset(key).await,
            DatasetSource::Objects(keys) => keys.clone(),
            DatasetSource::Prefix(prefix) => {
                let objects = {
                    let _connection = self.resource_manager.store_connection().await?;
                    self.store.list(prefix).await?
                };
                let keys = sources::select_keys(&objects, range);
                if keys.is_empty() {
                    return Err(EnergyVizError::NoMatchingObjects {
                        prefix: prefix.clone(),
                    });
                }
                tracing::debug!(
                    prefix = prefix.as_str(),
                    objects = keys.len(),
                    "selected objects"
                );
                keys
            }
        };
        let mut datasets = Vec::with_capacity(keys.len());
        for key in &keys {
            datasets.push(self.dataset(key).await?);
        }
        self.compute(move || sources::merge(&keys, datasets)).await
    }

    async fn load_dataset(&self, key: &str) -> Result<Dataset, EnergyVizError> {
        let raw = {
            let _connection = self.resource_manager.store_connection().await?;
            self.store.get(key).await?
        };
        BYTES_RETRIEVED.inc_by(raw.len() as u64);
        tracing::debug!(key, bytes = raw.len(), "retrieved object");
        let permit = self.resource_manager.memory(raw.len()).await?;
        // A compressed object is charged again at its inflated size, after its compressed
        // permit is released.
        let (data, _memory) = if compression::is_gzip(&raw) {
            let limit = self.load_options.max_inflated_size;
            let inflated = self
                .compute(move || compression::maybe_decompress(raw, limit))
                .await?;
            drop(permit);
            let permit = self.resource_manager.memory(inflated.len()).await?;
            (inflated, permit)
        } else {
            (raw, permit)
        };
        let options = self.load_options.clone();
        self.compute(move || loader::load(data, &options)).await
    }

    /// Run CPU-bound work off the async worker threads.
    ///
    /// Uses the Rayon pool when `--use-rayon` is set, or a Tokio blocking thread bounded by the
    /// task limit otherwise.
    pub async fn compute<F, T>(&self, work: F) -> Result<T, EnergyVizError>
    where
        F: FnOnce() -> Result<T, EnergyVizError> + Send + 'static,
        T: Send + 'static,
    {
        if self.args.use_rayon {
            tokio_rayon::spawn(work).await
        } else {
            let _task = self.resource_manager.task().await?;
            tokio::task::spawn_blocking(work).await?
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
