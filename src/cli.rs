//! Command Line Interface (CLI) arguments.

use byte_unit::Byte;
use clap::Parser;
use url::Url;

/// ONS energy viz command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "ONS_ENERGY_VIZ_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "ONS_ENERGY_VIZ_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "ONS_ENERGY_VIZ_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/ons-energy-viz/certs/cert.pem",
        env = "ONS_ENERGY_VIZ_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/ons-energy-viz/certs/key.pem",
        env = "ONS_ENERGY_VIZ_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "ONS_ENERGY_VIZ_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "ONS_ENERGY_VIZ_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "ONS_ENERGY_VIZ_USE_RAYON")]
    pub use_rayon: bool,
    /// Maximum number of concurrent CPU-bound tasks. Defaults to one less than the number of CPUs.
    #[arg(long, env = "ONS_ENERGY_VIZ_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// S3 bucket holding the source data
    #[arg(long, default_value = "ons-aws-prod-opendata", env = "ONS_ENERGY_VIZ_BUCKET")]
    pub bucket: String,
    /// Key prefix under which datasets are listed
    #[arg(
        long,
        default_value = "dataset/geracao_usina_2_ho/",
        env = "ONS_ENERGY_VIZ_PREFIX"
    )]
    pub prefix: String,
    /// AWS region of the bucket
    #[arg(long, default_value = "us-east-1", env = "ONS_ENERGY_VIZ_REGION")]
    pub region: String,
    /// URL of an S3-compatible object store to use instead of AWS
    #[arg(long, env = "ONS_ENERGY_VIZ_S3_ENDPOINT")]
    pub s3_endpoint: Option<Url>,
    /// S3 access key. Anonymous access is used unless both keys are given.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: Option<String>,
    /// S3 secret key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
    /// Serve objects from this local directory instead of S3
    #[arg(long, env = "ONS_ENERGY_VIZ_DATA_DIR")]
    pub data_dir: Option<String>,
    /// Time limit in seconds for each object store call
    #[arg(long, default_value_t = 60, env = "ONS_ENERGY_VIZ_STORE_TIMEOUT")]
    pub store_timeout: u64,
    /// Maximum number of concurrent object store connections
    #[arg(long, env = "ONS_ENERGY_VIZ_S3_CONNECTION_LIMIT")]
    pub s3_connection_limit: Option<usize>,
    /// Memory limit for source data being processed, e.g. 512MiB or 2GB
    #[arg(long, value_parser = parse_memory_limit, env = "ONS_ENERGY_VIZ_MEMORY_LIMIT")]
    pub memory_limit: Option<usize>,
    /// Maximum number of datasets kept in the cache. 0 disables caching.
    #[arg(long, default_value_t = 16, env = "ONS_ENERGY_VIZ_DATASET_CACHE_SIZE")]
    pub dataset_cache_size: usize,
    /// Time in seconds a cached dataset stays valid
    #[arg(long, default_value_t = 3600, env = "ONS_ENERGY_VIZ_DATASET_CACHE_TTL")]
    pub dataset_cache_ttl: u64,
    /// Name of the timestamp column. Detected from the column names if not set.
    #[arg(long, env = "ONS_ENERGY_VIZ_TIMESTAMP_COLUMN")]
    pub timestamp_column: Option<String>,
    /// Whether a series with no points fails the request by default
    #[arg(long, default_value_t = false, env = "ONS_ENERGY_VIZ_FAIL_ON_EMPTY_SERIES")]
    pub fail_on_empty_series: bool,
}

/// Parse a human-readable byte size.
fn parse_memory_limit(value: &str) -> Result<usize, String> {
    let bytes = Byte::parse_str(value, true).map_err(|err| err.to_string())?;
    usize::try_from(bytes.as_u64()).map_err(|err| err.to_string())
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
