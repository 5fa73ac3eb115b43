//! vSphere Drivers Operator
//!
//! Runs the VDOConfig and VsphereCloudConfig controllers against the
//! cluster, or a single dry-run pass over seeded objects in standalone mode.

use anyhow::Context as _;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vdo_operator::crd::{VDOConfig, VsphereCloudConfig};
use vdo_operator::manifest::HttpFetcher;
use vdo_operator::matrix::MATRIX_CONFIG_MAP_NAME;
use vdo_operator::{
    live_context, reconcile_once, run_controllers, Context, Error, MemoryStore, Metrics,
    OperatorConfig, RestConnector, Result, SessionCache, DEFAULT_NAMESPACE,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// vSphere Drivers Operator - configures the vSphere CPI and CSI drivers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace holding VDOConfig, VsphereCloudConfig and the matrix ConfigMap
    #[arg(long, env = "VDO_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// ConfigMap pointing at the compatibility matrix
    #[arg(long, env = "MATRIX_CONFIG_MAP", default_value = MATRIX_CONFIG_MAP_NAME)]
    matrix_config_map: String,

    /// How long to wait for driver daemonsets to become healthy, in seconds
    #[arg(long, env = "HEALTH_TIMEOUT", default_value = "120")]
    health_timeout_secs: u64,

    /// Requeue interval while a pipeline converges, in seconds
    #[arg(long, env = "REQUEUE_INTERVAL", default_value = "30")]
    requeue_secs: u64,

    /// Requeue interval once every pipeline is settled, in seconds
    #[arg(long, env = "SETTLED_REQUEUE_INTERVAL", default_value = "300")]
    settled_requeue_secs: u64,

    /// Requeue interval for errors retried with backoff, in seconds
    #[arg(long, env = "ERROR_REQUEUE_INTERVAL", default_value = "15")]
    error_requeue_secs: u64,

    /// Timeout of vCenter and manifest HTTP requests, in seconds
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "30")]
    http_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run one pass over an in-memory store instead of a cluster
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Manifest file seeding the in-memory store in standalone mode
    #[arg(long, env = "STANDALONE_SEED", requires = "standalone")]
    seed: Option<PathBuf>,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace.clone(),
            matrix_config_map: self.matrix_config_map.clone(),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            requeue_interval: Duration::from_secs(self.requeue_secs),
            settled_requeue_interval: Duration::from_secs(self.settled_requeue_secs),
            error_requeue_interval: Duration::from_secs(self.error_requeue_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting vSphere Drivers Operator");
    info!("  Version: {}", vdo_operator::VERSION);
    info!("  Namespace: {}", args.namespace);
    info!("  Matrix ConfigMap: {}", args.matrix_config_map);
    info!("  Standalone mode: {}", args.standalone);

    let config = args.operator_config();
    let metrics = Metrics::new().context("failed to register metrics")?;

    if args.standalone {
        return run_standalone(config, metrics, args.seed.as_deref()).await;
    }

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let ctx = Arc::new(live_context(client.clone(), config, metrics.clone())?);

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!("Starting controllers");
    run_controllers(client, ctx).await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Standalone Mode
// =============================================================================

async fn run_standalone(
    config: OperatorConfig,
    metrics: Metrics,
    seed: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    if let Some(path) = seed {
        let document = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let count = store.seed(&document)?;
        info!("Seeded {} objects from {}", count, path.display());
    }

    let connector = Arc::new(RestConnector::new(config.http_timeout));
    let fetcher = Arc::new(HttpFetcher::new(config.http_timeout)?);
    let sessions = Arc::new(SessionCache::new(connector, metrics.vcenter_logins.clone()));
    let ctx = Arc::new(Context::new(store.clone(), sessions, fetcher, config, metrics));

    let failures = reconcile_once(ctx, &store).await;

    for vcc in store.list::<VsphereCloudConfig>() {
        println!("---\n# VsphereCloudConfig {}", kube::ResourceExt::name_any(&vcc));
        print!("{}", serde_yaml::to_string(&vcc.status)?);
    }
    for vdo in store.list::<VDOConfig>() {
        println!("---\n# VDOConfig {}", kube::ResourceExt::name_any(&vdo));
        print!("{}", serde_yaml::to_string(&vdo.status)?);
    }

    if failures > 0 {
        anyhow::bail!("{} reconcile pass(es) failed", failures);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Metrics) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = content_type.parse() {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, "error")
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
