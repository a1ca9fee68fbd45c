//! Bare-metal CSI Operator
//!
//! Runs the reconcile pass for a csi-baremetal Deployment on a fixed interval,
//! sweeps stale capacity reservations in the background and serves health
//! and Prometheus endpoints.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use baremetal_csi_operator::{
    load_deployment_file, metrics, CleanupConfig, DeploymentSource, DeploymentSpec, Error,
    KubeStore, MemoryStore, OperatorConfig, Orchestrator, OrchestratorConfig, PlatformCatalog,
    RecordingDeployer, ReservationCleaner, ResourceStoreRef, Result, StaticVerifier,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Bare-metal CSI Operator - node platforms, node removal and scheduler extender patching
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the Deployment resource to reconcile
    #[arg(long, env = "DEPLOYMENT_NAME", default_value = "csi-baremetal")]
    deployment_name: String,

    /// Namespace of the Deployment resource and of the objects the operator owns
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Read the deployment from a YAML file instead of the cluster
    #[arg(long, env = "DEPLOYMENT_FILE")]
    deployment_file: Option<PathBuf>,

    /// Seconds between reconcile passes
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "30")]
    reconcile_interval_secs: u64,

    /// Upper bound on a single reconcile pass, in seconds
    #[arg(long, env = "PASS_DEADLINE", default_value = "120")]
    pass_deadline_secs: u64,

    /// Seconds between capacity reservation sweeps
    #[arg(long, env = "CLEANUP_INTERVAL", default_value = "60")]
    cleanup_interval_secs: u64,

    /// Age after which a capacity reservation is removed, in seconds
    #[arg(long, env = "RESERVATION_TTL", default_value = "3600")]
    reservation_ttl_secs: u64,

    /// Verdict of the external RBAC check for the scheduler extender
    #[arg(long, env = "SECURITY_VERIFIED", default_value_t = true, action = clap::ArgAction::Set)]
    security_verified: bool,

    /// Health and metrics bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes, in-memory cluster)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        let source = match &self.deployment_file {
            Some(path) => DeploymentSource::File(path.clone()),
            None => DeploymentSource::Resource {
                namespace: self.namespace.clone(),
                name: self.deployment_name.clone(),
            },
        };
        OperatorConfig {
            source,
            namespace: self.namespace.clone(),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            pass_deadline: Duration::from_secs(self.pass_deadline_secs),
            cleanup: CleanupConfig {
                interval: Duration::from_secs(self.cleanup_interval_secs),
                ttl: Duration::from_secs(self.reservation_ttl_secs),
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.operator_config();
    config.validate()?;

    info!("Starting Bare-metal CSI Operator");
    info!("  Version: {}", baremetal_csi_operator::VERSION);
    info!("  Namespace: {}", config.namespace);
    info!("  Source: {:?}", config.source);
    info!("  Standalone mode: {}", args.standalone);

    // Resource store
    let (store, kube_store): (ResourceStoreRef, Option<KubeStore>) = if args.standalone {
        if !matches!(config.source, DeploymentSource::File(_)) {
            return Err(Error::Configuration(
                "standalone mode needs --deployment-file".into(),
            ));
        }
        (Arc::new(MemoryStore::new()), None)
    } else {
        let kube = KubeStore::try_default().await?;
        (Arc::new(kube.clone()), Some(kube))
    };

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            namespace: config.namespace.clone(),
            deadline: config.pass_deadline,
        },
        Arc::new(PlatformCatalog::standard()),
        store.clone(),
        Arc::new(StaticVerifier::new(args.security_verified)),
        Arc::new(RecordingDeployer::new()),
    );

    let token = CancellationToken::new();

    // Reservation cleanup
    let cleaner = ReservationCleaner::new(store.clone(), config.cleanup.clone(), token.child_token());
    let cleaner_handle = tokio::spawn(cleaner.run());

    // Health & metrics server
    let health_addr = args.health_addr.clone();
    let health_state = orchestrator.clone();
    let health_token = token.child_token();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_state, health_token).await {
            error!("Health server error: {}", e);
        }
    });

    // Shutdown on Ctrl-C
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        shutdown.cancel();
    });

    run_reconcile_loop(&config, kube_store.as_ref(), &orchestrator, &token).await;

    token.cancel();
    if let Err(e) = cleaner_handle.await {
        warn!("Reservation cleaner ended abnormally: {}", e);
    }

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Reconcile Loop
// =============================================================================

async fn run_reconcile_loop(
    config: &OperatorConfig,
    kube: Option<&KubeStore>,
    orchestrator: &Orchestrator,
    token: &CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.reconcile_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match load_spec(&config.source, kube).await {
            Ok(desired) => {
                if let Err(e) = orchestrator.sync(desired).await {
                    warn!(action = ?e.action(), "Reconcile failed: {}", e);
                }
            }
            Err(e) => warn!("Failed to load deployment: {}", e),
        }
    }
}

async fn load_spec(source: &DeploymentSource, kube: Option<&KubeStore>) -> Result<Option<DeploymentSpec>> {
    match source {
        DeploymentSource::File(path) => load_deployment_file(path).map(Some),
        DeploymentSource::Resource { namespace, name } => match kube {
            Some(kube) => Ok(kube.get_deployment(namespace, name).await?.map(|d| d.spec)),
            None => Err(Error::Configuration("no cluster connection for Deployment resource".into())),
        },
    }
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
    for directive in ["hyper=warn", "kube=info", "tower_http=info", "axum=info"] {
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
// Health & Metrics Server
// =============================================================================

async fn run_health_server(
    addr: &str,
    orchestrator: Arc<Orchestrator>,
    token: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/livez", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator);

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Health server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

/// Ready once a pass has completed cleanly
async fn readyz(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let status = orchestrator.status().await;
    if status.healthy {
        (StatusCode::OK, "ok".to_string())
    } else {
        let reason = status.last_error.unwrap_or_else(|| "no completed pass yet".to_string());
        (StatusCode::SERVICE_UNAVAILABLE, reason)
    }
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    axum::Json(orchestrator.status().await)
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
