mod config;
mod gtfs;
mod models;
mod realtime;
mod web;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::Config;
use gtfs::agencies::load_agency_names;
use gtfs::shapes::ShapeResolver;
use realtime::FeedClient;

/// Shared application state, owned by `main` and handed to every handler.
pub struct AppState {
    pub config: ArcSwap<Config>,
    pub config_path: PathBuf,
    pub feed: FeedClient,
    pub shapes: ShapeResolver,
    /// `agency_id → agency_name`, loaded once on first use.
    pub agency_names: OnceLock<HashMap<String, String>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, config_path: PathBuf) -> Result<Self, realtime::FeedError> {
        Ok(AppState {
            shapes: ShapeResolver::new(config.cache.capacity()),
            config: ArcSwap::from_pointee(config),
            config_path,
            feed: FeedClient::new()?,
            agency_names: OnceLock::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Agency names, reading the agency table on the first call.
    ///
    /// Blocking; call from `spawn_blocking`.
    pub fn agency_names(&self) -> &HashMap<String, String> {
        self.agency_names.get_or_init(|| {
            let config = self.config.load();
            load_agency_names(&config.gtfs.files().agency)
        })
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bus_map=info")),
        )
        .init();

    info!("Bus map server starting");

    let config_path = find_config_path();
    info!("Config file: {}", config_path.display());

    let initial_config = match Config::load(&config_path) {
        Ok(cfg) => {
            info!(
                "Config loaded: static data in {}, feed {}, cache {} route sets",
                cfg.gtfs.static_dir.display(),
                cfg.feed.url,
                cfg.cache.max_route_sets
            );
            if cfg.feed.api_key().is_empty() {
                warn!("[CONFIG] No realtime API key configured; /api/bus_data will fail");
            }
            if cfg.web.maps_api_key().is_none() {
                warn!("[CONFIG] No maps API key configured; /api/maps_config will fail");
            }
            cfg
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let state = match AppState::new(initial_config, config_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    // Warm the agency map so the first picker request does not pay for it
    let warm_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || {
        warm_state.agency_names();
    });

    let web_state = Arc::clone(&state);
    let mut web_handle = tokio::spawn(web::server::run(web_state));

    let web_exited = tokio::select! {
        _ = shutdown_signal() => false,
        _ = &mut web_handle => true,
    };

    state.shutdown.cancel();
    if web_exited {
        warn!("Web server exited");
    } else {
        info!("Shutdown signal received");
        let _ = web_handle.await;
    }

    info!("Shutdown complete");
}

/// Find the config.json file (check CWD, then parent directory).
fn find_config_path() -> PathBuf {
    let candidates = [
        PathBuf::from("config.json"),
        PathBuf::from("../config.json"),
    ];
    for path in &candidates {
        if path.exists() {
            return path.clone();
        }
    }
    // Default even if it doesn't exist yet
    PathBuf::from("config.json")
}

/// Wait for SIGTERM or SIGINT (Ctrl-C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
