mod config;
mod frame;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().expect("invalid configuration");
    let port = config.port;
    tracing::info!(
        server_id = ?config.server_id,
        snapshot_dir = %config.snapshot_dir.display(),
        close_empty_rooms = config.close_empty_rooms,
        "configuration loaded"
    );

    let state = state::AppState::new(config);
    state.registry.on_start().await;

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "roomboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
