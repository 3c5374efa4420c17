//! 健康检查与运行状态接口。

use crate::error::AppError;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use mc_telemetry::new_request_ids;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, warn};

#[derive(Debug, Clone)]
pub struct WebState {
    /// `server` / `gateway` / `handler`
    pub component: &'static str,
    pub running_since: DateTime<Utc>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
}

/// 绑定地址并在后台提供服务，`shutdown` 取消后优雅退出。
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, AppError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "mc.web", addr = %addr, "http_listening");
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(err) = result {
            warn!(target: "mc.web", error = %err, "http_server_failed");
        }
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn status(State(state): State<WebState>) -> impl IntoResponse {
    Json(json!({
        "component": state.component,
        "version": crate::VERSION,
        "runningSince": state.running_since.to_rfc3339(),
        "metrics": mc_telemetry::metrics().snapshot(),
    }))
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        target: "mc.web",
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        router(WebState {
            component: "server",
            running_since: Utc::now(),
        })
    }

    #[tokio::test]
    async fn health_sets_request_id() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers().get("x-request-id").expect("header");
        assert!(!request_id.is_empty());
        let body = response.into_body().collect().await.expect("body").to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["ok"], json!(true));
    }

    #[tokio::test]
    async fn status_reports_version_and_counters() {
        mc_telemetry::record_message_received();
        let response = app()
            .oneshot(Request::get("/api/status").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.expect("body").to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["version"], json!(crate::VERSION));
        assert_eq!(value["component"], json!("server"));
        assert!(value["metrics"]["messagesReceived"].as_u64().expect("counter") >= 1);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app()
            .oneshot(Request::get("/api/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-trace-id"));
    }
}
