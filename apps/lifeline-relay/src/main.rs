use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use lifeline_relay::{
    cli::Cli,
    config::Config,
    router,
    store::SessionStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to WARN when RUST_LOG is unset.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ttl) = cli.session_ttl {
        config.session_ttl_seconds = ttl;
    }

    info!("starting Lifeline relay on port {}", config.port);
    info!(
        "session TTL: {}s, join limit: {}/{}s",
        config.session_ttl_seconds, config.join_rate_limit, config.join_rate_window_seconds
    );

    let store = Arc::new(SessionStore::new(config.store_config()));
    let app = router(store);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Lifeline relay listening on {addr}");

    // ConnectInfo feeds the per-address rate limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
