//! Account Monitor Service: standalone binary that polls tracked X/Twitter
//! accounts for new posts and serves an RPC API over the collected data.
//!
//! Default: http://127.0.0.1:9102/

mod app;
mod config;
mod db;
mod error;
mod routes;
mod scheduler;
#[cfg(test)]
mod testing;
mod x_api;

use std::sync::Arc;

use account_monitor_types::ClientStatus;
use app::AppContext;
use config::Config;
use x_api::{ContentClient, Credentials, PostSource};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    log::info!("Opening database at: {}", config.db_path);
    let database = Arc::new(db::Db::open(&config.db_path).expect("Failed to open database"));

    if config.seed_samples {
        match database.seed_sample_accounts() {
            Ok(0) => {}
            Ok(n) => log::info!("Seeded {} sample accounts", n),
            Err(e) => log::warn!("Failed to seed sample accounts: {}", e),
        }
    }

    let client = ContentClient::new(&config.api_base_url, Credentials::from_env());
    let connected = client.status() != ClientStatus::Disconnected;
    if let Some(reason) = client.disabled_reason() {
        log::warn!("Background polling disabled: {}", reason);
    }
    let source: Arc<dyn PostSource> = Arc::new(client);

    let ctx = Arc::new(AppContext::new(
        database.clone(),
        source,
        config.scheduler(),
    ));

    if config.autostart && connected {
        ctx.scheduler.start();
    }

    let cors = tower_http::cors::CorsLayer::permissive();
    let app = routes::router(ctx.clone()).layer(cors);

    let addr = format!("127.0.0.1:{}", config.port);
    log::info!("Account Monitor Service listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    ctx.shutdown().await;
    log::info!("Account Monitor Service stopped");
}
