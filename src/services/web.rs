//! Axum-based HTTP server for operating the decoder fleet.
//!
//! Endpoints:
//! - GET `/api/objects` - Every managed object with its state
//! - GET `/api/objects/:id` - One object with committed attributes and alarms
//! - DELETE `/api/objects/:id` - Delete a childless, disabled object
//! - POST `/api/objects/:id/admin` - Set admin state `{"state": "ENABLE"}`
//! - POST `/api/decoders/:id/reboot` - Ask a decoder to reboot
//! - GET `/api/alarms` - Alarms currently reported
//! - GET `/api/config` - Committed configuration document (XML)
//! - POST `/api/config` - Apply a configuration document (XML body)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::WebConfig;
use crate::error::{ConfigError, ResultCode};
use crate::mo::ObjectId;

use super::api::{
    ActionResponse, AdminRequest, ApiResponse, ConfigApplied, ObjectDetail, ObjectSummary,
};
use super::shared::SharedFleetState;

// ============================================================================
// Error Mapping
// ============================================================================

fn status_for(rc: ResultCode) -> StatusCode {
    match rc {
        ResultCode::Ok => StatusCode::OK,
        ResultCode::ParamError | ResultCode::ParseError => StatusCode::BAD_REQUEST,
        ResultCode::DoesNotExist => StatusCode::NOT_FOUND,
        ResultCode::AlreadyExists | ResultCode::NotPermitted | ResultCode::NoResources => {
            StatusCode::CONFLICT
        }
        ResultCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn config_error(err: ConfigError) -> Response {
    (
        status_for(err.rc()),
        Json(ApiResponse::<()>::from_error(&err)),
    )
        .into_response()
}

fn reply<T: serde::Serialize>(result: Result<T, ConfigError>) -> Response {
    match result {
        Ok(data) => Json(ApiResponse::ok(data)).into_response(),
        Err(err) => config_error(err),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /api/objects - Lists every managed object
async fn list_objects(State(state): State<Arc<SharedFleetState>>) -> Response {
    let objects: Vec<ObjectSummary> =
        state.with_fleet(|fleet| fleet.tree().iter().map(ObjectSummary::from).collect());
    Json(ApiResponse::ok(objects)).into_response()
}

/// GET /api/objects/:id - One object in detail
async fn get_object(
    State(state): State<Arc<SharedFleetState>>,
    Path(id): Path<u32>,
) -> Response {
    reply(state.with_fleet(|fleet| {
        fleet
            .tree()
            .get(ObjectId(id))
            .map(ObjectDetail::from)
    }))
}

/// DELETE /api/objects/:id
async fn delete_object(
    State(state): State<Arc<SharedFleetState>>,
    Path(id): Path<u32>,
) -> Response {
    let id = ObjectId(id);
    reply(
        state
            .with_fleet(|fleet| fleet.delete(id))
            .map(|()| ActionResponse::done(id, "deleted")),
    )
}

/// POST /api/objects/:id/admin - Set admin state
///
/// Accepts JSON: `{"state": "ENABLE"}` or `{"state": "DISABLE"}`
async fn set_admin(
    State(state): State<Arc<SharedFleetState>>,
    Path(id): Path<u32>,
    body: Bytes,
) -> Response {
    let Ok(request) = serde_json::from_slice::<AdminRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::err("Invalid admin state request")),
        )
            .into_response();
    };
    let admin = match request.admin_state() {
        Ok(admin) => admin,
        Err(err) => return config_error(err),
    };
    let id = ObjectId(id);
    reply(
        state
            .with_fleet(|fleet| fleet.set_admin(id, admin))
            .map(|()| ActionResponse::done(id, admin.as_wire().to_lowercase())),
    )
}

/// POST /api/decoders/:id/reboot
async fn reboot_decoder(
    State(state): State<Arc<SharedFleetState>>,
    Path(id): Path<u32>,
) -> Response {
    let id = ObjectId(id);
    reply(
        state
            .with_fleet(|fleet| fleet.reboot(id))
            .map(|()| ActionResponse::done(id, "reboot_requested")),
    )
}

/// GET /api/alarms - Alarms currently reported
async fn list_alarms(State(state): State<Arc<SharedFleetState>>) -> Response {
    let alarms: Vec<_> =
        state.with_fleet(|fleet| fleet.alarms().into_iter().cloned().collect());
    Json(ApiResponse::ok(alarms)).into_response()
}

/// GET /api/config - Committed configuration as XML
async fn export_config(State(state): State<Arc<SharedFleetState>>) -> Response {
    match state.with_fleet(|fleet| fleet.export_config()) {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/xml")], xml).into_response(),
        Err(err) => config_error(err),
    }
}

/// POST /api/config - Apply a configuration document
///
/// The whole document is one transaction: on error nothing changes.
async fn apply_config(State(state): State<Arc<SharedFleetState>>, body: Bytes) -> Response {
    let Ok(xml) = std::str::from_utf8(&body) else {
        return config_error(ConfigError::Malformed("body is not UTF-8".into()));
    };
    reply(
        state
            .with_fleet(|fleet| fleet.load_config(xml))
            .map(|objects| ConfigApplied { objects }),
    )
}

/// Unknown route
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::err("Not found")),
    )
}

// ============================================================================
// Server Builder
// ============================================================================

/// Listener settings of the REST API
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Listen address
    pub addr: SocketAddr,
    /// Allow any origin
    pub cors_permissive: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 8080).into(),
            cors_permissive: true,
        }
    }
}

impl WebServerConfig {
    /// Listens on `addr`
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Origin policy
    pub fn cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Derives the listener from the file configuration
    pub fn from_config(config: &WebConfig) -> Self {
        Self {
            addr: ([0, 0, 0, 0], config.port).into(),
            cors_permissive: config.cors_permissive,
        }
    }
}

/// Routes every operator endpoint onto the shared fleet
pub fn build_router(state: Arc<SharedFleetState>, config: &WebServerConfig) -> Router {
    let mut router = Router::new()
        .route("/api/objects", get(list_objects))
        .route("/api/objects/:id", get(get_object).delete(delete_object))
        .route("/api/objects/:id/admin", post(set_admin))
        .route("/api/decoders/:id/reboot", post(reboot_decoder))
        .route("/api/alarms", get(list_alarms))
        .route("/api/config", get(export_config).post(apply_config))
        .fallback(not_found)
        .with_state(state);

    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Serves the REST API until the listener fails
///
/// Runs until the server is shut down.
///
/// ```ignore
/// let state = Arc::new(SharedFleetState::new(fleet));
/// let mqtt_handler = MqttHandler::with_shared_state(Arc::clone(&state), mqtt_config);
/// run_server_with_state(state, web_config).await?;
/// ```
pub async fn run_server_with_state(
    state: Arc<SharedFleetState>,
    config: WebServerConfig,
) -> Result<(), std::io::Error> {
    let router = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "web server listening");

    axum::serve(listener, router).await
}
