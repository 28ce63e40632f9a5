// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP surface of the debugging service.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use eyre::Result;
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use walnut_common::{scrub_sensitive, CallTraceInfo, DebuggerInfo, TraceRequest};
use walnut_engine::{sweep_once, DebugPipeline, PipelineError, PipelineStage, SweepReport};

/// Handle to the running HTTP server
#[derive(Debug)]
pub struct ServerHandle {
    /// Address the server is listening on
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(self) -> Result<()> {
        if self.shutdown_tx.send(()).is_err() {
            warn!("HTTP server already shut down");
        }
        self.task.await??;
        Ok(())
    }
}

/// Shared state of the handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pipeline: Arc<DebugPipeline>,
}

impl AppState {
    /// State serving `pipeline`.
    pub fn new(pipeline: DebugPipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }
}

/// Error body: `{ "error": { "kind", "message" } }`. The message is always
/// scrubbed.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl AsRef<str>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "badRequest",
            message: scrub_sensitive(message.as_ref()),
        }
    }

    fn internal(message: impl AsRef<str>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: scrub_sensitive(message.as_ref()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        let status = match (err.stage, kind) {
            (_, "timeout") => StatusCode::GATEWAY_TIMEOUT,
            (PipelineStage::Acquiring | PipelineStage::Normalizing, _) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, kind, message: err.public_message() }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "kind": self.kind, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/debug", post(debug))
        .route("/simulate", post(simulate))
        .route("/cleanup", post(cleanup))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_methods([Method::POST, Method::GET])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .with_state(state)
}

/// Bind `addr` and serve in the background.
pub async fn start(state: AppState, addr: SocketAddr) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let app = router(state);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    info!("Walnut listening on {}", addr);
    Ok(ServerHandle { addr, shutdown_tx, task })
}

async fn debug(
    State(state): State<AppState>,
    request: Result<Json<TraceRequest>, JsonRejection>,
) -> Result<Json<DebuggerInfo>, ApiError> {
    let Json(request) = request?;
    Ok(Json(state.pipeline.debug(&request).await?))
}

async fn simulate(
    State(state): State<AppState>,
    request: Result<Json<TraceRequest>, JsonRejection>,
) -> Result<Json<CallTraceInfo>, ApiError> {
    let Json(request) = request?;
    Ok(Json(state.pipeline.simulate(&request).await?))
}

async fn cleanup(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let scratch = &state.pipeline.config().scratch;
    let report = sweep_once(&scratch.root, scratch.max_age())
        .await
        .map_err(|e| ApiError::internal(format!("scratch sweep failed: {e}")))?;
    info!(removed = report.removed.len(), kept = report.kept.len(), "Manual scratch sweep");
    Ok(Json(report))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use futures::future::BoxFuture;
    use semver::Version;
    use serde_json::Value;
    use tower::ServiceExt;
    use walnut_engine::{CompilationError, CompileJob, DebugCompiler, EngineConfig};

    use super::*;

    #[derive(Debug)]
    struct NoCompiler(Version);

    impl DebugCompiler for NoCompiler {
        fn version(&self) -> &Version {
            &self.0
        }

        fn compile<'a>(
            &'a self,
            _job: &'a CompileJob,
        ) -> BoxFuture<'a, Result<std::path::PathBuf, CompilationError>> {
            unreachable!("no contract is verified in these tests")
        }
    }

    fn app(scratch: &Path) -> Router {
        let config = EngineConfig::default().with_rpc_timeout(2).with_scratch_root(scratch);
        let compiler = Arc::new(NoCompiler(Version::new(0, 8, 29)));
        router(AppState::new(DebugPipeline::new(config, compiler)))
    }

    async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let scratch = tempfile::tempdir().unwrap();
        let (status, body) = call(app(scratch.path()), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_bad_request_body() {
        let scratch = tempfile::tempdir().unwrap();
        let (status, body) =
            call(app(scratch.path()), "POST", "/debug", r#"{"calldata": "0x"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "badRequest");
    }

    #[tokio::test]
    async fn test_unreachable_node_is_bad_gateway_without_url() {
        let scratch = tempfile::tempdir().unwrap();
        let key = "Zq8dWm3Lr7Xy2Kp9Tn4Vb6Hs1Jc5Gf0A";
        let body = json!({
            "txHash": format!("0x{}", "11".repeat(32)),
            "rpcUrl": format!("http://127.0.0.1:1/v2/{key}"),
            "chainId": 1,
        });
        let (status, body) =
            call(app(scratch.path()), "POST", "/simulate", &body.to_string()).await;
        assert!(
            status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT,
            "{status}"
        );
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains(key), "{message}");
        assert!(!message.contains("127.0.0.1:1/v2"), "{message}");
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_scratch() {
        let scratch = tempfile::tempdir().unwrap();
        let stale = scratch.path().join("run-1-old");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::File::open(&stale)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let (status, body) = call(app(scratch.path()), "POST", "/cleanup", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"].as_array().unwrap().len(), 1);
        assert!(!stale.exists());
    }
}
