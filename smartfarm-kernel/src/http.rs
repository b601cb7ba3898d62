/**
 * API REST LOCALE - Serveur HTTP du kernel smartfarm
 *
 * RÔLE :
 * Interface locale (LAN) d'inspection et de pilotage, sans rendu : les
 * dashboards consomment ce JSON.
 *
 * ROUTES :
 * - GET  /health            → "ok" (toujours ouvert)
 * - GET  /status            → instantané système
 * - GET  /nodes, /nodes/{id} → dernier jeu de mesures par nœud (404 si inconnu)
 * - POST /readings          → lot de mesures brutes mis en file (202)
 * - POST /commands          → commande mise en file (202)
 *
 * SÉCURITÉ :
 * Si SMARTFARM_API_KEY est défini, header x-api-key obligatoire hors /health.
 */

use crate::commands::{CommandRequest, CommandSource, InboundCommand};
use crate::models::ReadingBatch;
use crate::nodes::{NodeRegistry, NodeView};
use crate::ports::{Clock, SystemStatus};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub nodes: NodeRegistry,
    pub status: Arc<dyn SystemStatus>,
    pub clock: Arc<dyn Clock>,
    pub readings_tx: mpsc::Sender<ReadingBatch>,
    pub commands_tx: mpsc::Sender<InboundCommand>,
    pub api_key: Option<String>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("rejected request to {} (bad api key)", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(get_status))
        .route("/nodes", get(get_nodes))
        .route("/nodes/{id}", get(get_node))
        .route("/readings", post(post_readings))
        .route("/commands", post(post_command))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<Value> {
    Json(app.status.snapshot())
}

// GET /nodes (liste)
async fn get_nodes(State(app): State<AppState>) -> Json<Vec<NodeView>> {
    let now = app.clock.now();
    Json(app.nodes.list().iter().map(|n| n.view(now)).collect())
}

// GET /nodes/{id} (détail)
async fn get_node(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<NodeView>, StatusCode> {
    let Some(node) = app.nodes.get(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(node.view(app.clock.now())))
}

// POST /readings
async fn post_readings(
    State(app): State<AppState>,
    Json(batch): Json<ReadingBatch>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let node_id = batch.node_id.clone();
    if node_id.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    app.readings_tx.try_send(batch).map_err(|e| {
        warn!("readings queue unavailable: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true, "node_id": node_id }))))
}

// POST /commands
async fn post_command(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let Some(request) = CommandRequest::from_value(body, || Uuid::new_v4().to_string()) else {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    };
    let command_id = request.command_id.clone();
    let inbound = InboundCommand {
        request,
        source: CommandSource::LocalApi,
    };
    app.commands_tx.try_send(inbound).map_err(|e| {
        warn!("command queue unavailable: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true, "command_id": command_id }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    struct FixedStatus;
    impl SystemStatus for FixedStatus {
        fn snapshot(&self) -> Value {
            json!({"device_id": "farm-01"})
        }
    }

    fn app(
        api_key: Option<&str>,
    ) -> (Router, mpsc::Receiver<ReadingBatch>, mpsc::Receiver<InboundCommand>) {
        let (readings_tx, readings_rx) = mpsc::channel(4);
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let state = AppState {
            nodes: NodeRegistry::new(),
            status: Arc::new(FixedStatus),
            clock: Arc::new(SystemClock::default()),
            readings_tx,
            commands_tx,
            api_key: api_key.map(String::from),
        };
        (build_router(state), readings_rx, commands_rx)
    }

    fn post(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (router, _r, _c) = app(None);
        let res = router.clone().oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = router.oneshot(HttpRequest::get("/status").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_node_is_404() {
        let (router, _r, _c) = app(None);
        let res = router.oneshot(HttpRequest::get("/nodes/NODE9").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_readings_queues_batch() {
        let (router, mut readings, _c) = app(None);
        let res = router
            .oneshot(post("/readings", r#"{"node_id":"NODE1","readings":{"SOIL":600,"TEMP":24.5}}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let batch = readings.try_recv().unwrap();
        assert_eq!(batch.node_id, "NODE1");
        assert_eq!(batch.readings.len(), 2);
    }

    #[tokio::test]
    async fn test_post_command_assigns_id() {
        let (router, _r, mut commands) = app(None);
        let res = router
            .clone()
            .oneshot(post("/commands", r#"{"type":"actuator","actuator":"buzzer","action":"on"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let cmd = commands.try_recv().unwrap();
        assert_eq!(cmd.source, CommandSource::LocalApi);
        assert!(Uuid::parse_str(&cmd.request.command_id).is_ok());

        let res = router.oneshot(post("/commands", r#"{"type":"reboot"}"#)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_api_key_enforced_when_set() {
        let (router, _r, _c) = app(Some("secret"));
        let res = router.clone().oneshot(HttpRequest::get("/status").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = HttpRequest::get("/status").header("x-api-key", "secret").body(Body::empty()).unwrap();
        assert_eq!(router.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let res = router.oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_only_exact_health_path_is_open() {
        let (readings_tx, _r) = mpsc::channel(1);
        let (commands_tx, _c) = mpsc::channel(1);
        let state = AppState {
            nodes: NodeRegistry::new(),
            status: Arc::new(FixedStatus),
            clock: Arc::new(SystemClock::default()),
            readings_tx,
            commands_tx,
            api_key: Some("secret".into()),
        };
        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/healthz", get(|| async { "leak" }))
            .layer(middleware::from_fn_with_state(state, require_api_key));

        let res = router.clone().oneshot(HttpRequest::get("/healthz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = router.oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
