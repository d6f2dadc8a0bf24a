use intercom::application::{CallLifecycleManager, CredentialIssuer, NotificationFanoutLoop};
use intercom::config::Config;
use intercom::domain::access::{FixedWindowRateLimiter, IdentityProvider};
use intercom::domain::call::CallRepository;
use intercom::domain::credential::TokenSigner;
use intercom::domain::directory::ParticipantDirectory;
use intercom::infrastructure::identity::HttpIdentityProvider;
use intercom::infrastructure::push::ExpoPushGateway;
use intercom::infrastructure::signing::HmacTokenSigner;
use intercom::interface::api::{build_router, init_metrics, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting intercom service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!(
        "Configuration loaded: {} ({:?})",
        config.bind_address(),
        config.server.environment
    );

    let (calls, directory) = open_stores(&config).await?;

    let signer: Option<Arc<dyn TokenSigner>> = if config.media.is_configured() {
        Some(Arc::new(HmacTokenSigner::new(
            config.media.app_id.clone(),
            config.media.app_certificate.as_bytes(),
        )?))
    } else {
        None
    };

    let push_config = config.push_config();
    let push_enabled = push_config.enabled;
    if !push_enabled {
        warn!("Push delivery is disabled; calls will ring only over signaling");
    }
    let push = Arc::new(ExpoPushGateway::new(push_config)?);
    let identity: Arc<dyn IdentityProvider> =
        Arc::new(HttpIdentityProvider::new(config.identity_config())?);

    let (fanout, timeouts) =
        NotificationFanoutLoop::new(push, calls.clone(), config.fanout_settings());
    let fanout = Arc::new(fanout);
    let credentials = Arc::new(CredentialIssuer::new(
        signer,
        calls.clone(),
        config.credential_settings(),
    ));
    let manager = Arc::new(CallLifecycleManager::new(
        calls.clone(),
        directory,
        fanout.clone(),
        credentials.clone(),
    ));
    let timeout_worker = manager.clone().spawn_timeout_worker(timeouts);

    match manager.reconcile_stale().await {
        Ok(0) => {}
        Ok(n) => info!("Marked {} stale ringing calls as missed", n),
        Err(e) => warn!("Startup reconciliation failed: {}", e),
    }

    let rate_limiter = Arc::new(FixedWindowRateLimiter::new(config.rate_limit_policy()));
    let sweeper = {
        let rate_limiter = rate_limiter.clone();
        let manager = manager.clone();
        let mut ticker = tokio::time::interval(config.sweep_interval());
        tokio::spawn(async move {
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = rate_limiter.sweep_expired();
                if evicted > 0 {
                    tracing::debug!("Evicted {} expired rate-limit windows", evicted);
                }
                if let Err(e) = manager.reconcile_stale().await {
                    warn!("Stale call sweep failed: {}", e);
                }
            }
        })
    };

    let prometheus_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics exporter unavailable: {}", e);
            None
        }
    };

    let state = AppState {
        calls: manager,
        credentials,
        call_store: calls,
        identity,
        rate_limiter,
        push_enabled,
        expose_errors: config.is_development(),
        started_at: chrono::Utc::now(),
    };
    let app = build_router(state, prometheus_handle);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("REST API listening on {}", config.bind_address());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down...");
    fanout.stop_all();
    sweeper.abort();
    timeout_worker.abort();
    info!("Intercom service stopped");

    Ok(())
}

#[cfg(all(feature = "postgres", not(feature = "memory")))]
async fn open_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn CallRepository>, Arc<dyn ParticipantDirectory>)> {
    use intercom::infrastructure::persistence::{
        create_pool, run_migrations, DatabaseConfig, PgCallRepository, PgDirectory,
    };

    let pool = create_pool(&DatabaseConfig::from(&config.database)).await?;
    info!("Database connection pool created");
    run_migrations(&pool).await?;

    Ok((
        Arc::new(PgCallRepository::new(pool.clone())),
        Arc::new(PgDirectory::new(pool)),
    ))
}

#[cfg(not(all(feature = "postgres", not(feature = "memory"))))]
async fn open_stores(
    _config: &Config,
) -> anyhow::Result<(Arc<dyn CallRepository>, Arc<dyn ParticipantDirectory>)> {
    use intercom::infrastructure::persistence::{InMemoryCallRepository, InMemoryDirectory};

    warn!("Using the in-memory call store; calls and directory are not persisted");
    Ok((
        Arc::new(InMemoryCallRepository::new()),
        Arc::new(InMemoryDirectory::new()),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
