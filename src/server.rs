use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};
use crate::hooks::{NoopRecalculator, SharedRecalculator};
use crate::missions::MissionEngine;
use crate::pillars::Orchestrator;
use crate::pillars::generator::{PillarGenerator, TemplateGenerator};
use crate::signals::SignalEngine;
use crate::store::{DbHandle, StrategyDb};
use crate::widgets::WidgetEngine;

/// Configuration for the orchestration server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4180,
            db_path: std::path::PathBuf::from(".strata/strata.db"),
            dev_mode: false,
        }
    }
}

/// Wire the engines around one database handle and build the router.
pub fn build_router(db: DbHandle, generator: Arc<dyn PillarGenerator>) -> Router {
    let recalc: SharedRecalculator = Arc::new(NoopRecalculator);
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(db.clone(), generator, recalc.clone()),
        signals: SignalEngine::new(db.clone(), recalc),
        missions: MissionEngine::new(db.clone()),
        widgets: WidgetEngine::new(db.clone()),
        db,
    });
    api::api_router().with_state(state)
}

/// Start the server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = StrategyDb::new(&config.db_path).context("Failed to initialize strategy database")?;
    let mut app = build_router(DbHandle::new(db), Arc::new(TemplateGenerator));

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Strata running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = DbHandle::new(StrategyDb::new_in_memory().unwrap());
        build_router(db, Arc::new(TemplateGenerator))
    }

    #[tokio::test]
    async fn health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_mounted() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/strategies")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4180);
        assert_eq!(config.db_path, std::path::PathBuf::from(".strata/strata.db"));
        assert!(!config.dev_mode);
    }
}
