//! Application startup and lifecycle management.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::{GiftCardConfig, StorageBackend};
use crate::handlers::{business_summary, health_check, metrics_handler, readiness_check, run_sweep};
use crate::services::{
    init_metrics, Database, GiftCardServices, HttpPaymentGateway, MemoryStore, PaymentGateway,
    Store,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub services: GiftCardServices,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/internal/sweep", post(run_sweep))
        .route(
            "/internal/businesses/:business_id/gift-cards/summary",
            get(business_summary),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    sweeper: Option<JoinHandle<()>>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: GiftCardConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: GiftCardConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: GiftCardConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn Store> = match &config.storage {
            StorageBackend::Postgres(database) => {
                let db = Database::new(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    AppError::from(e)
                })?;

                if run_migrations {
                    db.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        AppError::from(e)
                    })?;
                }
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(
            config.payment_gateway.url.clone(),
            config.payment_gateway.api_key.clone(),
            config.payment_gateway.timeout,
        )?);

        Self::build_with(config, store, gateway).await
    }

    /// Build over an existing store and gateway.
    pub async fn build_with(
        config: GiftCardConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let services = GiftCardServices::new(store, gateway, &config.policy);

        let sweeper = config.sweeper.enabled.then(|| {
            services
                .sweeper
                .clone()
                .spawn(config.sweeper.interval)
        });

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Giftcard service listener bound");

        Ok(Self {
            port,
            listener,
            state: AppState { services },
            sweeper,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn services(&self) -> &GiftCardServices {
        &self.state.services
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "giftcard-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, app).await;

        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
