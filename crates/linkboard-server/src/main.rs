use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use linkboard_server::state::AppState;

/// `linkboard health` — liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$LINKBOARD_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("LINKBOARD_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Health-check subcommand — handled before tokio does any real work so
    // the probe stays fast.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("linkboard=info".parse()?),
        )
        .json()
        .init();

    let cfg = linkboard_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Ensure data directory exists before opening DuckDB.
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/linkboard.db", cfg.data_dir);

    // Open DuckDB — initialises schema and seeds the settings table.
    let db = linkboard_duckdb::DuckDbStore::open(&db_path, &cfg.duckdb_memory_limit)?;

    // Seed a default site so the dashboard is usable out of the box.
    // Upsert semantics make this safe on every startup.
    if let Err(e) = db.seed_site("demo", "Demo Page").await {
        tracing::warn!(error = %e, "Failed to seed default site");
    } else {
        info!("Default site 'demo' ready");
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));

    // Spawn the rollup/prune maintenance loop.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            linkboard_server::scheduler::run_scheduler_loop(state).await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = linkboard_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Linkboard metrics listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
