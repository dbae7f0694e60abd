//! # markbench CLI Entry Point
//!
//! Main binary for the markbench aggregation service.
//!
//! ## Usage
//!
//! ```bash
//! # Run the aggregation server
//! MARKBENCH_PASSPHRASE=... markbench serve -b 0.0.0.0:8080
//!
//! # Run it against a local registry, with embedded scripts from a mirror
//! markbench serve --registry-file registry.json --script-mirror http://127.0.0.1:9000/js
//!
//! # Render a text on every implementation (one JSON record per line)
//! markbench get http://127.0.0.1:8080 '# hello'
//!
//! # Encrypt a single URL, or print a whole registry with plaintext URLs
//! markbench cipher "$PASSPHRASE" encode http://example.com/render
//! markbench cipher "$PASSPHRASE" decode --registry-file registry.json
//! ```
//!
//! ## URL Format
//!
//! All URLs must include the `http://` or `https://` prefix:
//! - ✅ `http://127.0.0.1:8080`
//! - ❌ `127.0.0.1:8080`

use anyhow::Result;
use argh::FromArgs;
use markbench_aggregator::config::{DEFAULT_PASSPHRASE_ENV, DEFAULT_REGISTRY_URL};
use markbench_aggregator::{
    Aggregator, AggregatorConfig, DefaultSanitizer, EndpointInvoker, FileRegistrySource,
    HttpRegistrySource, HttpServer, PassphraseSource, RegistryCache, RegistryConfig,
    RegistrySource,
};
use markbench_cli::cipher_tool::{self, CipherMode};
use markbench_common::rate_limit::{AdmissionController, ThrottleConfig};
use markbench_engine::{EmbeddedEngine, HttpScriptLoader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Timeout of one registry document download.
const REGISTRY_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Validates that a URL string starts with http:// or https://
///
/// # Arguments
///
/// * `url` - The URL string to validate
/// * `description` - Human-readable description of what the URL is for (e.g., "server address")
fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

#[derive(FromArgs)]
/// markbench - compare markdown implementations side by side
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Serve**: Run the aggregation server
/// - **Get**: Render a text on a running server
/// - **Cipher**: Encrypt or decrypt registry URLs
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Get(GetArgs),
    Cipher(CipherArgs),
}

/// Arguments for running the aggregation server.
///
/// # Example
///
/// ```bash
/// markbench serve -b 0.0.0.0:8080 --max-clients 500 --cors-origin https://example.com
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the aggregation server
struct ServeArgs {
    /// address to bind the HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    bind: String,

    /// URL of the registry document
    ///
    /// Must include the http:// or https:// prefix. Ignored when
    /// --registry-file is given.
    #[argh(option, long = "registry-url", default = "DEFAULT_REGISTRY_URL.into()")]
    registry_url: String,

    /// read the registry document from a local file instead
    #[argh(option, long = "registry-file")]
    registry_file: Option<String>,

    /// environment variable holding the registry passphrase
    ///
    /// Read on every registry refresh, so it can be fixed without a restart.
    #[argh(option, long = "passphrase-env", default = "DEFAULT_PASSPHRASE_ENV.into()")]
    passphrase_env: String,

    /// seconds after which the registry is downloaded again
    #[argh(option, long = "refresh-interval-secs", default = "3600")]
    refresh_interval_secs: u64,

    /// requests per second allowed for one client
    ///
    /// Zero disables the per-client interval check.
    #[argh(option, long = "max-requests-per-second", default = "2.0")]
    max_requests_per_second: f64,

    /// maximum number of clients tracked at once
    #[argh(option, long = "max-clients", default = "100")]
    max_clients: usize,

    /// seconds after which an idle client is forgotten
    #[argh(option, long = "client-expiry-secs", default = "60")]
    client_expiry_secs: u64,

    /// maximum number of characters rendered per request
    #[argh(option, long = "max-text-length", default = "1000")]
    max_text_length: usize,

    /// time allowed for one implementation to answer, in milliseconds
    #[argh(option, long = "backend-timeout-ms", default = "30000")]
    backend_timeout_ms: u64,

    /// allowed CORS origin (repeatable; any origin when omitted)
    #[argh(option, long = "cors-origin")]
    cors_origins: Vec<String>,

    /// base URL serving the embedded reference scripts
    ///
    /// When omitted, scripts are downloaded from their pinned release URLs.
    #[argh(option, long = "script-mirror")]
    script_mirror: Option<String>,
}

/// Arguments for rendering a text on a running server.
///
/// Each record is printed as one JSON line as soon as it arrives, which
/// makes the output suitable for piping into `jq`.
#[derive(FromArgs)]
#[argh(subcommand, name = "get")]
/// render a text on every implementation of a server
struct GetArgs {
    /// address of the server (e.g. http://127.0.0.1:8080)
    #[argh(positional)]
    server_address: String,

    /// markdown text to render
    #[argh(positional)]
    text: String,
}

/// Arguments for the registry cipher.
///
/// With a value, encrypts or decrypts that value. Without one, loads the
/// registry and prints it with every URL decrypted (`decode`) or encrypted
/// (`encode`).
#[derive(FromArgs)]
#[argh(subcommand, name = "cipher")]
/// encrypt or decrypt registry URLs
struct CipherArgs {
    /// passphrase of the registry
    #[argh(positional)]
    passphrase: String,

    /// encode or decode
    #[argh(positional)]
    mode: CipherMode,

    /// value to transform; the whole registry when omitted
    #[argh(positional)]
    value: Option<String>,

    /// URL of the registry document
    #[argh(option, long = "registry-url", default = "DEFAULT_REGISTRY_URL.into()")]
    registry_url: String,

    /// read the registry document from a local file instead
    #[argh(option, long = "registry-file")]
    registry_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // get and cipher write machine-readable output to stdout
    if matches!(cli.command, Commands::Serve(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Get(args) => run_get(args).await,
        Commands::Cipher(args) => run_cipher(args).await,
    }
}

fn registry_source(
    registry_url: String,
    registry_file: Option<String>,
) -> Result<Arc<dyn RegistrySource>> {
    match registry_file {
        Some(path) => Ok(Arc::new(FileRegistrySource::new(path))),
        None => {
            validate_http_url(&registry_url, "registry URL")?;
            Ok(Arc::new(HttpRegistrySource::new(registry_url, REGISTRY_FETCH_TIMEOUT)?))
        }
    }
}

/// Executes the `serve` subcommand.
async fn run_serve(args: ServeArgs) -> Result<()> {
    let throttle = throttle_config(&args)?;
    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;

    let source = registry_source(args.registry_url, args.registry_file)?;
    tracing::info!("Registry: {}", source.describe());

    let registry = RegistryCache::new(
        source,
        RegistryConfig {
            refresh_interval: Duration::from_secs(args.refresh_interval_secs),
            passphrase: PassphraseSource::Env(args.passphrase_env),
        },
    );
    if let Err(e) = registry.refresh().await {
        // not fatal: the next request retries
        tracing::warn!("Initial registry load failed: {}", e);
    }

    let mut loader = HttpScriptLoader::new()?;
    if let Some(mirror) = args.script_mirror {
        validate_http_url(&mirror, "script mirror")?;
        tracing::info!("Embedded scripts from mirror {}", mirror);
        loader = loader.with_mirror(mirror);
    }
    let engine = Arc::new(EmbeddedEngine::new(Arc::new(loader)));

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

    let config = AggregatorConfig {
        max_text_length: args.max_text_length,
        backend_timeout: Duration::from_millis(args.backend_timeout_ms),
    };
    tracing::info!(
        "Max text length: {} chars, backend timeout: {}ms",
        config.max_text_length,
        args.backend_timeout_ms
    );

    let aggregator = Aggregator::new(
        Arc::new(registry),
        Arc::new(EndpointInvoker::new(http_client, engine)),
        Arc::new(DefaultSanitizer::new()?),
        config,
    );

    tracing::info!(
        "Throttling: {} requests per second, {} clients",
        throttle.max_requests_per_second,
        throttle.max_clients
    );

    let server = HttpServer::new(Arc::new(aggregator), AdmissionController::new(throttle))
        .with_cors_origins(&args.cors_origins)?;
    server.run(addr).await?;

    Ok(())
}

/// Builds the admission settings of `serve`.
///
/// A rate of zero disables the per-client interval; a negative or
/// non-finite rate is refused.
fn throttle_config(args: &ServeArgs) -> Result<ThrottleConfig> {
    anyhow::ensure!(
        args.max_requests_per_second.is_finite() && args.max_requests_per_second >= 0.0,
        "Invalid --max-requests-per-second {}: must be a finite, non-negative number",
        args.max_requests_per_second
    );

    Ok(ThrottleConfig {
        max_requests_per_second: args.max_requests_per_second,
        max_clients: args.max_clients,
        client_expiry: Duration::from_secs(args.client_expiry_secs),
    })
}

/// Executes the `get` subcommand.
///
/// No tracing is initialized for this command to keep stdout clean.
async fn run_get(args: GetArgs) -> Result<()> {
    validate_http_url(&args.server_address, "server address")?;

    let client = markbench_client::MarkbenchClient::new(&args.server_address)?;
    let mut encode_error = None;
    client
        .render_each(&args.text, |envelope| match serde_json::to_string(&envelope) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                encode_error.get_or_insert(e);
            }
        })
        .await?;

    match encode_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Executes the `cipher` subcommand.
async fn run_cipher(args: CipherArgs) -> Result<()> {
    let output = match &args.value {
        Some(value) => cipher_tool::transform_value(args.mode, value, &args.passphrase)?,
        None => {
            let source = registry_source(args.registry_url, args.registry_file)?;
            cipher_tool::transform_registry(source.as_ref(), args.mode, &args.passphrase).await?
        }
    };
    println!("{}", output);
    Ok(())
}
