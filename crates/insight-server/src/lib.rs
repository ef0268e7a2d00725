use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use insight_config::Config;
use insight_contracts::{
    ContactSummaryRequest, ContactSummaryResult, DigestRequest, DigestResult, JobType,
    NextStepRequest, NextStepResult, API_VERSION,
};
use serde_json::{json, Value};
use tracing::info;

mod cache;
mod client;
mod gateway;
mod invocation_log;

pub use cache::{CacheEntry, InsightCache};
pub use client::{ClientError, CompletionClient, HttpCompletionClient};
pub use gateway::{GatewaySettings, InsightGateway};
pub use invocation_log::{InvocationLogger, MemoryLog};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let state = AppState::new(&cfg).await?;
    let gateway = state.gateway.clone();
    let app = router(state.gateway);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, model = %cfg.llm.model, "insight gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"))?;

    gateway.logger().flush().await;
    info!("insight gateway stopped");
    Ok(())
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let state = AppState::new(&cfg).await?;
    Ok(router(state.gateway))
}

/// Router over an already-assembled gateway; tests inject their own client and logger.
pub fn router(gateway: Arc<InsightGateway>) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/contracts", get(contracts))
        .route("/v1/insights/digest", post(digest))
        .route("/v1/insights/next-step", post(next_step))
        .route("/v1/insights/contact-summary", post(contact_summary))
        .with_state(AppState { gateway })
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<InsightGateway>,
}

impl AppState {
    async fn new(cfg: &Config) -> Result<Self, String> {
        let client = HttpCompletionClient::from_config(&cfg.llm)?;
        if !client.has_credential() {
            info!(
                env = %cfg.llm.api_key_env,
                "no completion credential configured; every insight will use its fallback"
            );
        }
        let log = InvocationLogger::from_config(&cfg.invocation_log).await;
        Ok(Self {
            gateway: Arc::new(InsightGateway::new(
                Arc::new(client),
                Arc::new(InsightCache::new()),
                log,
                GatewaySettings::from_config(cfg),
            )),
        })
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn contracts() -> Json<Value> {
    Json(json!({
        "version": API_VERSION,
        "jobs": [
            JobType::Digest.as_str(),
            JobType::NextStep.as_str(),
            JobType::ContactSummary.as_str()
        ],
        "providers": {
            "fallback": insight_contracts::PROVIDER_FALLBACK,
            "fallbackError": insight_contracts::PROVIDER_FALLBACK_ERROR
        }
    }))
}

async fn digest(
    State(state): State<AppState>,
    Json(req): Json<DigestRequest>,
) -> Json<DigestResult> {
    Json(state.gateway.generate_digest(&req).await)
}

async fn next_step(
    State(state): State<AppState>,
    Json(req): Json<NextStepRequest>,
) -> Json<NextStepResult> {
    Json(state.gateway.generate_next_step(&req).await)
}

async fn contact_summary(
    State(state): State<AppState>,
    Json(req): Json<ContactSummaryRequest>,
) -> Json<ContactSummaryResult> {
    Json(state.gateway.generate_contact_summary(&req).await)
}
