use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::admin_api::auth;
use crate::admin_api::routes::{self, AppState};

/// Authenticated admin REST API over the detection engine, synchronizer and
/// scheduler.
pub struct AdminApiServer {
    state: AppState,
    bind_addr: String,
}

/// Build the admin router. Every route requires the API key.
pub fn router(state: AppState) -> Router {
    let api_key = state.api_key.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/status", get(routes::get_status))
        .route("/api/v1/detect", post(routes::detect))
        .route("/api/v1/ip-ranges/stats", get(routes::get_range_stats))
        .route("/api/v1/ip-ranges/sources", get(routes::list_sources))
        .route("/api/v1/ip-ranges/logs", get(routes::get_update_logs))
        .route("/api/v1/ip-ranges/update-all", post(routes::update_all))
        .route("/api/v1/ip-ranges/update/{source}", post(routes::update_source))
        .route("/api/v1/ip-ranges/update-chatgpt", post(routes::update_chatgpt))
        .route("/api/v1/ip-ranges/test/{ip}", get(routes::test_ip))
        .route("/api/v1/scheduler/status", get(routes::scheduler_status))
        .route("/api/v1/scheduler/start", post(routes::scheduler_start))
        .route("/api/v1/scheduler/stop", post(routes::scheduler_stop))
        .route("/api/v1/scheduler/update-ip-now", post(routes::run_ip_update_now))
        .route(
            "/api/v1/scheduler/update-chatgpt-now",
            post(routes::run_chatgpt_refresh_now),
        )
        .route("/api/v1/scheduler/cleanup-now", post(routes::run_cleanup_now))
        .layer(middleware::from_fn_with_state(api_key, auth::require_api_key))
        .layer(cors)
        .with_state(state)
}

impl AdminApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!("Admin API listening on {}", self.bind_addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::admin_api::auth::API_KEY_HEADER;
    use crate::config::defaults;
    use crate::config::settings::{DetectionConfig, ScrapeConfig, SourceConfig, SyncConfig};
    use crate::detection::engine::DetectionEngine;
    use crate::detection::ip_index::IpRangeIndex;
    use crate::detection::patterns::PatternCatalog;
    use crate::models::address::{NewAddress, SourceType};
    use crate::scheduler::Scheduler;
    use crate::storage::testing::FlakyStore;
    use crate::storage::RangeStore;
    use crate::sync::synchronizer::Synchronizer;

    const KEY: &str = "test-key";

    fn app() -> Router {
        let store = Arc::new(FlakyStore::new());
        store
            .inner
            .apply_changes(
                "GPTBot",
                None,
                &[NewAddress {
                    address: "20.171.206.7".to_string(),
                    source_type: SourceType::DirectIp,
                    range_start: None,
                    range_end: None,
                }],
                &[],
            )
            .unwrap();

        let detection = DetectionConfig {
            store_fallback: true,
            match_networks: false,
        };
        let index = Arc::new(IpRangeIndex::init(store.clone(), &detection));
        let engine = Arc::new(DetectionEngine::new(
            Arc::new(PatternCatalog::new().unwrap()),
            index.clone(),
        ));
        let sync_config = SyncConfig {
            timeout_secs: 1,
            user_agent: "botwatch-test".to_string(),
            sources: vec![SourceConfig {
                name: "gptbot".to_string(),
                url: "http://127.0.0.1:9/gptbot.txt".to_string(),
                bot_name: Some("GPTBot".to_string()),
            }],
        };
        let scrape = ScrapeConfig {
            url: "http://127.0.0.1:9/page".to_string(),
            ..defaults::default_scrape_config()
        };
        let sync = Arc::new(Synchronizer::new(store, index.clone(), &sync_config, &scrape).unwrap());
        let scheduler =
            Arc::new(Scheduler::new(sync.clone(), &defaults::default_scheduler_config()).unwrap());

        router(AppState {
            engine,
            index,
            sync,
            scheduler,
            start_time: Instant::now(),
            api_key: KEY.to_string(),
        })
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, KEY);
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_rejected() {
        let req = Request::builder()
            .uri("/api/v1/status")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app().oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/status")
            .header(API_KEY_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app().oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_detect_combines_signals() {
        let body = serde_json::json!({
            "user_agent": "Mozilla/5.0 (Macintosh) Safari/605.1.15",
            "ip_address": "20.171.206.7",
        });
        let (status, json) = send(app(), request("POST", "/api/v1/detect", Some(body))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["is_bot"], true);
        assert_eq!(json["detection_method"], "ip_address");
        assert_eq!(json["bot_category"], "IP Detected");
        assert_eq!(json["bot_name"], "IP_GPTBot");
        assert_eq!(json["ip_source_type"], "direct_ip");
    }

    #[tokio::test]
    async fn test_ip_test_endpoint() {
        let (_, hit) = send(app(), request("GET", "/api/v1/ip-ranges/test/20.171.206.7", None)).await;
        assert_eq!(hit["is_match"], true);
        assert_eq!(hit["bot_name"], "GPTBot");

        let (_, miss) = send(app(), request("GET", "/api/v1/ip-ranges/test/not-an-ip", None)).await;
        assert_eq!(miss["valid_ip"], false);
        assert_eq!(miss["is_match"], false);
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_found() {
        let (status, json) =
            send(app(), request("POST", "/api/v1/ip-ranges/update/missing", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("available: gptbot"));
    }

    #[tokio::test]
    async fn test_failed_source_reports_error_text() {
        let (status, json) =
            send(app(), request("POST", "/api/v1/ip-ranges/update/gptbot", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["source"], "gptbot");
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_sources_and_stats() {
        let (_, sources) = send(app(), request("GET", "/api/v1/ip-ranges/sources", None)).await;
        assert_eq!(sources["sources"][0]["bot_name"], "GPTBot");
        assert_eq!(sources["scrape"]["bot_name"], "ChatGPT-User");

        let (status, stats) = send(app(), request("GET", "/api/v1/ip-ranges/stats", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["indexed_total"], 1);
        assert_eq!(stats["records"]["active"], 1);
        assert_eq!(stats["families"][1]["family"], "GPTBot");
    }

    #[tokio::test]
    async fn test_update_logs_after_failed_run() {
        let app = app();
        send(app.clone(), request("POST", "/api/v1/ip-ranges/update-all", None)).await;
        let (status, json) =
            send(app, request("GET", "/api/v1/ip-ranges/logs?limit=5", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["logs"].as_array().unwrap().len(), 1);
        assert_eq!(json["logs"][0]["update_type"], "full_update");
        assert!(json["logs"][0]["error_message"].is_string());
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle() {
        let app = app();
        let (_, status) = send(app.clone(), request("GET", "/api/v1/scheduler/status", None)).await;
        assert_eq!(status["running"], false);
        assert_eq!(status["registered_jobs"], 3);

        let (_, started) = send(app.clone(), request("POST", "/api/v1/scheduler/start", None)).await;
        assert_eq!(started["changed"], true);
        assert_eq!(started["status"]["scheduled_jobs"], 3);

        let (_, again) = send(app.clone(), request("POST", "/api/v1/scheduler/start", None)).await;
        assert_eq!(again["changed"], false);
        assert_eq!(again["status"]["scheduled_jobs"], 3);

        let (_, cleanup) =
            send(app.clone(), request("POST", "/api/v1/scheduler/cleanup-now", None)).await;
        assert_eq!(cleanup["job"], "cleanup");
        assert_eq!(cleanup["success"], true);
        assert_eq!(cleanup["outcome"]["status"], "success");

        let (_, stopped) = send(app, request("POST", "/api/v1/scheduler/stop", None)).await;
        assert_eq!(stopped["changed"], true);
        assert_eq!(stopped["status"]["running"], false);
    }
}
