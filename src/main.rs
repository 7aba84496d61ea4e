use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use wa_session_engine::adapter::UnwiredAdapterFactory;
use wa_session_engine::config::Config;
use wa_session_engine::gateway::{self, AppState};
use wa_session_engine::lifecycle::LifecycleController;
use wa_session_engine::queue::PendingQueue;
use wa_session_engine::rehydrate;
use wa_session_engine::session::SessionRegistry;
use wa_session_engine::shutdown;
use wa_session_engine::store::{AuthBlobStore, FsAuthBlobStore, InstanceMetadataStore, SqliteMetadataStore};

#[derive(Parser, Debug)]
#[command(name = "wa-session-engine", about = "WhatsApp session lifecycle & resilience engine")]
struct Cli {
    /// Path to the TOML config file. Defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the HTTP port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);

    let mut config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("failed to load config from {}: {err}", config_path.display());
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    wa_session_engine::log::init(&config.log_level);
    info!(port = config.port, config = %config.config_path.display(), "starting engine");

    let auth_blobs: Arc<dyn AuthBlobStore> =
        Arc::new(FsAuthBlobStore::new(config.session_storage_path.clone()));

    let metadata: Arc<dyn InstanceMetadataStore> =
        match SqliteMetadataStore::connect(&config.database_url).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(error = %err, "failed to open instance metadata store");
                std::process::exit(1);
            }
        };

    let registry = Arc::new(SessionRegistry::new());
    let queue = Arc::new(PendingQueue::new(&config.policy));
    let adapters = Arc::new(UnwiredAdapterFactory);

    let controller = Arc::new(LifecycleController::new(
        registry,
        adapters,
        auth_blobs,
        metadata.clone(),
        queue,
        config.policy.clone(),
    ));

    let rehydrated = rehydrate::rehydrate(&metadata, config.policy.rehydrate_stagger(), {
        let controller = controller.clone();
        move |id| {
            let controller = controller.clone();
            async move { controller.start(&id).await }
        }
    })
    .await;
    info!(rehydrated, "rehydration pass complete");

    tokio::spawn({
        let controller = controller.clone();
        async move { controller.run_recovery_sweep().await }
    });
    tokio::spawn({
        let controller = controller.clone();
        async move { controller.run_memory_monitor().await }
    });

    let app = gateway::router(AppState { controller: controller.clone() }, &config);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, port = config.port, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let serve = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "HTTP server exited with error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = serve => {
            if let Err(err) = result {
                error!(error = %err, "HTTP server task panicked");
            }
        }
    }

    let report = shutdown::shutdown_all(
        &controller.registry,
        config.policy.destroy_timeout(),
        config.policy.graceful_shutdown_timeout(),
    )
    .await;
    info!(
        closed = report.closed.len(),
        failed = report.failed.len(),
        timed_out = report.timed_out,
        "shutdown complete"
    );
}
