/// Identity Service Main Entry Point
///
/// Starts the HTTP server with:
/// - PostgreSQL connection pool and migrations
/// - RS256 signing key (PEM file or ephemeral)
/// - SMTP notifier (no-op when unconfigured)
/// - Refresh token purge (background task)
use anyhow::{Context, Result};
use crypto_core::{EphemeralKeyStore, KeyManager, KeyStore, PemFileKeyStore, TokenFingerprinter};
use identity_service::{
    config::Settings,
    db::PgIdentityStore,
    http::{start_http_server, HttpServerState},
    security::TokenService,
    services::{ProviderRegistry, SmtpNotifier, TracingAuditSink},
    CoreDependencies, IdentityCore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "identity_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Identity Service");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    // Signing key
    let key_store: Box<dyn KeyStore> = match &settings.jwt.private_key_path {
        Some(path) => Box::new(PemFileKeyStore::new(path)),
        None => {
            warn!("JWT_PRIVATE_KEY_PATH not set; tokens will not survive a restart");
            Box::new(EphemeralKeyStore)
        }
    };
    let mut keys = KeyManager::load_or_generate(key_store.as_ref(), settings.jwt.key_bits)
        .context("Failed to initialize JWT signing key")?;
    if let Some(kid) = &settings.jwt.key_id {
        keys = keys.with_kid(kid.clone());
    }
    info!(kid = %keys.kid(), "JWT signing key initialized");
    let tokens = Arc::new(TokenService::from_settings(Arc::new(keys), &settings.jwt));

    // Refresh token fingerprints
    let fingerprinter = match &settings.refresh_token.fingerprint_key {
        Some(key) => TokenFingerprinter::new(key.as_bytes()),
        None => {
            warn!("REFRESH_TOKEN_FINGERPRINT_KEY not set; refresh tokens will not survive a restart");
            TokenFingerprinter::random()
        }
    }
    .context("Failed to initialize token fingerprinter")?;

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    // Run database migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    // Initialize notifier
    let notifier = SmtpNotifier::new(&settings.email).context("Failed to initialize notifier")?;
    if notifier.is_enabled() {
        info!("Notifier initialized with SMTP");
    } else {
        info!("Notifier running in no-op mode (SMTP not configured)");
    }

    let providers =
        ProviderRegistry::from_settings(&settings.oauth).context("Failed to configure providers")?;

    let core = IdentityCore::new(CoreDependencies {
        store: Arc::new(PgIdentityStore::new(db_pool.clone())),
        tokens: Arc::clone(&tokens),
        fingerprinter: Arc::new(fingerprinter),
        notifier: Arc::new(notifier),
        audit_sink: Arc::new(TracingAuditSink),
        providers,
        lockout: settings.lockout.clone(),
        refresh_token: settings.refresh_token.clone(),
        account: settings.account.clone(),
    });

    // Spawn refresh token purge (background task)
    let purge_engine = core.engine.clone();
    let purge_every = Duration::from_secs(settings.refresh_token.purge_interval_secs.max(1));
    let purge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            if let Err(e) = purge_engine.purge_stale_refresh_tokens().await {
                error!(error = %e, "Refresh token purge failed");
            }
        }
    });

    let state = HttpServerState {
        tokens: Arc::clone(&core.tokens),
    };
    start_http_server(
        state,
        &settings.server.host,
        settings.server.port,
        shutdown_signal(),
    )
    .await
    .context("HTTP server error")?;

    purge_handle.abort();
    db_pool.close().await;
    info!("Identity service shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
