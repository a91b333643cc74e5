use atomgate::archive::{ArchiveError, Snapshot};
use atomgate::assets::AssetResolver;
use atomgate::bridge::{FrontController, UpstreamConfig, UpstreamRuntime};
use atomgate::config::{Config, ResolvedApp};
use atomgate::readiness;
use atomgate::routing::Router;
use atomgate::server::{FacadeServer, FacadeState};
use atomgate::{PKG_NAME, VERSION};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "atomgate.toml";
const DEFAULT_LOG_DIRECTIVE: &str = "atomgate=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let config = load_config().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    print_startup_banner(&config);

    materialize_snapshot(&config).await?;

    let app = config.resolve_app().map_err(|e| {
        error!(error = %e, "Application root is not usable");
        e
    })?;
    info!(
        root = %app.root.display(),
        front_controller = %app.front_controller.display(),
        data_dir = ?app.data_dir,
        "Application resolved"
    );

    if config.dependencies.enabled {
        let targets = config.dependencies.targets()?;
        readiness::wait_for_all(&targets, &config.dependencies.gate())
            .await
            .map_err(|e| {
                error!(error = %e, "Dependencies not ready");
                e
            })?;
    } else {
        warn!("Dependency gate disabled");
    }

    let runtime = Arc::new(build_runtime(&config)?);
    let state = build_state(&config, app, runtime);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let grace_period = config.server.shutdown_grace_period();
    let server = FacadeServer::bind(
        &config.server.listen_addr(),
        state,
        shutdown_rx,
        grace_period,
    )
    .await
    .map_err(|e| {
        error!(addr = %config.server.listen_addr(), error = %e, "Failed to bind listener");
        anyhow::anyhow!("Failed to bind {}: {}", config.server.listen_addr(), e)
    })?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Facade server error");
        }
    });

    wait_for_signal().await;

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // The server bounds its own drain; this only guards against a stuck teardown
    if tokio::time::timeout(grace_period + Duration::from_secs(5), server_handle)
        .await
        .is_err()
    {
        warn!("Server did not stop in time");
    }

    info!("Shutdown complete");
    Ok(())
}

/// `RUST_LOG` when set, otherwise `atomgate=info`
fn log_filter() -> EnvFilter {
    log_filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

fn log_filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

/// Config file from the first argument, else `atomgate.toml` if present, else defaults.
fn load_config() -> anyhow::Result<Config> {
    let mut config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let config = Config::load(&path)?;
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
            let config = Config::load(Path::new(DEFAULT_CONFIG_PATH))?;
            info!(path = DEFAULT_CONFIG_PATH, "Configuration loaded");
            config
        }
        None => {
            info!("No configuration file, using defaults and environment");
            Config::default()
        }
    };

    config.apply_process_env()?;
    config.validate()?;
    Ok(config)
}

/// Extract the configured snapshot into the application root.
///
/// A root holding a different tree is kept as-is unless extraction is forced.
async fn materialize_snapshot(config: &Config) -> anyhow::Result<()> {
    let Some(snapshot_path) = config.archive.snapshot.clone() else {
        info!("No snapshot configured, serving application root as-is");
        return Ok(());
    };
    let target = config.app_root()?;
    let force = config.archive.force;

    let result = tokio::task::spawn_blocking(move || {
        let snapshot = Snapshot::load(Path::new(&snapshot_path))?;
        info!(
            snapshot = %snapshot_path,
            digest = %snapshot.digest(),
            target = %target.display(),
            force,
            "Materializing snapshot"
        );
        snapshot.ensure_extracted(&target, force)
    })
    .await?;

    match result {
        Ok(true) => info!("Snapshot extracted"),
        Ok(false) => info!("Application root already matches snapshot"),
        Err(ArchiveError::RootExistsAndDiffers(path)) => {
            warn!(
                root = %path.display(),
                "Application root differs from snapshot, keeping existing tree (set force to replace it)"
            );
        }
        Err(e) => {
            error!(error = %e, "Snapshot extraction failed");
            return Err(e.into());
        }
    }
    Ok(())
}

fn build_runtime(config: &Config) -> anyhow::Result<UpstreamRuntime> {
    let url = config
        .runtime
        .url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("runtime.url is not configured"))?;

    let mut upstream = UpstreamConfig::new(url);
    upstream.request_timeout = Duration::from_secs(config.runtime.request_timeout_secs);
    upstream.max_idle_per_host = config.runtime.pool_max_idle;
    upstream.idle_timeout = Duration::from_secs(config.runtime.pool_idle_timeout_secs);

    UpstreamRuntime::new(upstream)
}

fn build_state(
    config: &Config,
    app: ResolvedApp,
    runtime: Arc<UpstreamRuntime>,
) -> FacadeState<UpstreamRuntime> {
    let router = Router::new(AssetResolver::new(app.root.clone(), app.data_dir));
    let front_controller = FrontController::new(app.root, app.front_controller);

    FacadeState::new(router, front_controller, runtime)
        .with_log_routes(config.server.log_routes)
        .with_internal_token(config.native.internal_token.clone())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting legacy facade");
    info!(
        addr = %config.server.listen_addr(),
        log_routes = config.server.log_routes,
        shutdown_grace_period_secs = config.server.shutdown_grace_period_secs,
        "Server configuration"
    );
    info!(
        root = ?config.app.root,
        data_dir = ?config.app.data_dir,
        front_controller = %config.app.front_controller,
        snapshot = ?config.archive.snapshot,
        force_extract = config.archive.force,
        "Application settings"
    );
    info!(
        enabled = config.dependencies.enabled,
        attempts = config.dependencies.attempts,
        delay_ms = config.dependencies.delay_ms,
        "Dependency gate settings"
    );
    info!(
        url = ?config.runtime.url,
        request_timeout_secs = config.runtime.request_timeout_secs,
        pool_max_idle = config.runtime.pool_max_idle,
        native_token = config.native.internal_token.is_some(),
        "Legacy runtime settings"
    );
}
