use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::batch_processor::BatchProcessor;

/// Shared readiness/error counters the consumer loop updates as it runs, read by the health
/// endpoints without needing a lock on the batch processor itself.
#[derive(Default)]
pub struct GraphinatorState {
    pub connected: AtomicBool,
    pub messages_consumed: AtomicU64,
}

pub struct HealthServer {
    port: u16,
    state: Arc<GraphinatorState>,
    processor: Arc<BatchProcessor>,
}

impl HealthServer {
    pub fn new(port: u16, state: Arc<GraphinatorState>, processor: Arc<BatchProcessor>) -> Self {
        Self { port, state, processor }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ready", get(ready_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state((self.state, self.processor));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("🏥 Health server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await.map_err(|e| {
            error!("Health server error: {}", e);
            e.into()
        })
    }
}

type HealthState = (Arc<GraphinatorState>, Arc<BatchProcessor>);

async fn health_handler(State((state, processor)): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let health = json!({
        "status": "healthy",
        "service": "graphinator",
        "connected": state.connected.load(Ordering::Relaxed),
        "messages_consumed": state.messages_consumed.load(Ordering::Relaxed),
        "stats": processor.get_stats(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    (StatusCode::OK, Json(health))
}

async fn metrics_handler(State((state, processor)): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let metrics = json!({
        "messages_consumed": state.messages_consumed.load(Ordering::Relaxed),
        "stats": processor.get_stats(),
    });

    (StatusCode::OK, Json(metrics))
}

async fn ready_handler(State((state, _processor)): State<HealthState>) -> StatusCode {
    if state.connected.load(Ordering::Relaxed) { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_processor::BatchConfig;
    use crate::graph_store::Neo4jStore;

    fn test_processor() -> Arc<BatchProcessor> {
        // Neo4jStore::connect is async and needs a live broker; tests only exercise the
        // handlers' shape so we never construct a real store here.
        BatchProcessor::new_for_test()
    }

    #[tokio::test]
    async fn test_ready_handler_not_ready() {
        let state = Arc::new(GraphinatorState::default());
        let status = ready_handler(State((state, test_processor()))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_handler_ready() {
        let state = Arc::new(GraphinatorState::default());
        state.connected.store(true, Ordering::Relaxed);
        let status = ready_handler(State((state, test_processor()))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_handler_reports_service_name() {
        let state = Arc::new(GraphinatorState::default());
        let (status, json) = health_handler(State((state, test_processor()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.0["service"], "graphinator");
    }

    #[tokio::test]
    async fn test_metrics_handler_reports_consumed_count() {
        let state = Arc::new(GraphinatorState::default());
        state.messages_consumed.store(42, Ordering::Relaxed);
        let (status, json) = metrics_handler(State((state, test_processor()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.0["messages_consumed"], 42);
    }

    #[allow(dead_code)]
    fn unused(_store: Neo4jStore, _config: BatchConfig) {}
}
