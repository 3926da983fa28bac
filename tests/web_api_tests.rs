//! Integration tests for the web API.
//!
//! These tests verify the HTTP API endpoints work correctly.

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rs_trainz_fleet::protocol::{Topics, REBOOT};
use rs_trainz_fleet::services::{
    build_router, ActionResponse, ApiResponse, ConfigApplied, ObjectDetail, ObjectSummary,
    SharedFleetState, WebServerConfig,
};
use rs_trainz_fleet::traits::NullRegistrar;
use rs_trainz_fleet::{
    Alarm, AdminState, Condition, Config, Effect, Fleet, MoKind, ObjectId, ResultCode, Summary,
};

const DOC: &str = "<Decoders><Decoder>\
    <SystemName>east</SystemName><URI>dec-east</URI>\
    <MAC>02:00:00:00:00:01</MAC><AdminState>ENABLE</AdminState>\
    <SatelliteLink><SystemName>link0</SystemName><Link>0</Link>\
      <AdminState>ENABLE</AdminState></SatelliteLink>\
    </Decoder></Decoders>";

fn create_test_app() -> (axum::Router, Arc<SharedFleetState>) {
    let fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    let state = Arc::new(SharedFleetState::new(fleet));
    let config = WebServerConfig::default();
    let router = build_router(Arc::clone(&state), &config);
    (router, state)
}

fn loaded_app() -> (axum::Router, Arc<SharedFleetState>, ObjectId) {
    let (app, state) = create_test_app();
    let decoder = state.with_fleet(|fleet| {
        let id = fleet.load_config(DOC).unwrap()[0];
        fleet.drain_effects();
        id
    });
    (app, state, decoder)
}

async fn send(app: axum::Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_list_objects_empty_fleet() {
    let (app, _state) = create_test_app();

    let (status, body) = send(app, "GET", "/api/objects", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let json: ApiResponse<Vec<ObjectSummary>> = serde_json::from_slice(&body).unwrap();
    assert!(json.success);
    let objects = json.data.unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].kind, MoKind::Server);
    assert_eq!(objects[0].id, ObjectId::ROOT);
}

#[tokio::test]
async fn test_apply_config() {
    let (app, state) = create_test_app();

    let (status, body) = send(app, "POST", "/api/config", Body::from(DOC)).await;
    assert_eq!(status, StatusCode::OK);

    let json: ApiResponse<ConfigApplied> = serde_json::from_slice(&body).unwrap();
    assert!(json.success);
    let objects = json.data.unwrap().objects;
    assert_eq!(objects.len(), 1);

    state.with_fleet(|fleet| {
        assert_eq!(fleet.decoder_by_uri("dec-east"), Some(objects[0]));
        assert!(!fleet.drain_effects().is_empty());
    });
}

#[tokio::test]
async fn test_apply_config_collision_is_conflict() {
    let (app, state, _) = loaded_app();
    let clash = DOC.replace("<SystemName>east</SystemName>", "<SystemName>west</SystemName>");

    let (status, body) = send(app, "POST", "/api/config", Body::from(clash)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let json: ApiResponse<ConfigApplied> = serde_json::from_slice(&body).unwrap();
    assert!(!json.success);
    assert_eq!(json.rc, Some(ResultCode::AlreadyExists));
    assert!(json.error.is_some());
    state.with_fleet(|fleet| assert_eq!(fleet.tree().len(), 3));
}

#[tokio::test]
async fn test_apply_malformed_config() {
    let (app, _state) = create_test_app();

    let (status, body) = send(app, "POST", "/api/config", Body::from("<Decoders>")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let json: ApiResponse<ConfigApplied> = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.rc, Some(ResultCode::ParseError));
}

#[tokio::test]
async fn test_get_object_detail() {
    let (app, _state, decoder) = loaded_app();

    let uri = format!("/api/objects/{}", decoder);
    let (status, body) = send(app, "GET", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let json: ApiResponse<ObjectDetail> = serde_json::from_slice(&body).unwrap();
    let detail = json.data.unwrap();
    assert_eq!(detail.object.name, "east");
    assert_eq!(detail.object.kind, MoKind::Decoder);
    assert_eq!(detail.object.admin, AdminState::Enabled);
    assert_eq!(detail.object.summary, Summary::Available);
    assert_eq!(detail.attributes["URI"].as_deref(), Some("dec-east"));
    assert!(!detail.attributes.contains_key("Children"));
    assert_eq!(detail.children.len(), 1);
    assert!(detail.alarms.is_empty());
    assert_eq!(detail.supervision.unwrap().period_ms(), 1000);
}

#[tokio::test]
async fn test_get_unknown_object() {
    let (app, _state) = create_test_app();

    let (status, body) = send(app, "GET", "/api/objects/42", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let json: ApiResponse<ObjectDetail> = serde_json::from_slice(&body).unwrap();
    assert!(!json.success);
    assert_eq!(json.rc, Some(ResultCode::DoesNotExist));
}

#[tokio::test]
async fn test_set_admin_state() {
    let (app, state, decoder) = loaded_app();

    let uri = format!("/api/objects/{}/admin", decoder);
    let (status, body) = send(app, "POST", &uri, Body::from(r#"{"state": "DISABLE"}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let json: ApiResponse<ActionResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.data.unwrap().id, decoder);

    state.with_fleet(|fleet| {
        let node = fleet.tree().get(decoder).unwrap();
        assert_eq!(node.state().admin(), AdminState::Disabled);
        let link = fleet.tree().find_by_display_name(decoder, "east/link0").unwrap();
        assert!(fleet
            .tree()
            .get(link)
            .unwrap()
            .state()
            .has(Condition::ControlBlocked));
    });
}

#[tokio::test]
async fn test_set_admin_invalid_json() {
    let (app, _state, decoder) = loaded_app();

    let uri = format!("/api/objects/{}/admin", decoder);
    let (status, _) = send(app, "POST", &uri, Body::from("not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_admin_unknown_state() {
    let (app, _state, decoder) = loaded_app();

    let uri = format!("/api/objects/{}/admin", decoder);
    let (status, body) = send(app, "POST", &uri, Body::from(r#"{"state": "SLEEPY"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let json: ApiResponse<ActionResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.rc, Some(ResultCode::ParamError));
}

#[tokio::test]
async fn test_delete_enabled_object_refused() {
    let (app, _state, decoder) = loaded_app();

    let uri = format!("/api/objects/{}", decoder);
    let (status, body) = send(app, "DELETE", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let json: ApiResponse<ActionResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.rc, Some(ResultCode::NotPermitted));
}

#[tokio::test]
async fn test_delete_disabled_leaf() {
    let (app, state, decoder) = loaded_app();
    let link = state.with_fleet(|fleet| {
        let link = fleet.tree().find_by_display_name(decoder, "east/link0").unwrap();
        fleet.set_admin(link, AdminState::Disabled).unwrap();
        link
    });

    let uri = format!("/api/objects/{}", link);
    let (status, _) = send(app, "DELETE", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    state.with_fleet(|fleet| assert!(!fleet.tree().exists(link)));
}

#[tokio::test]
async fn test_reboot_decoder() {
    let (app, state, decoder) = loaded_app();

    let uri = format!("/api/decoders/{}/reboot", decoder);
    let (status, _) = send(app, "POST", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let effects = state.with_fleet(|fleet| fleet.drain_effects());
    assert_eq!(
        effects,
        vec![Effect::publish(Topics::default().reboot("dec-east"), REBOOT)]
    );
}

#[tokio::test]
async fn test_list_alarms() {
    let (app, state, _) = loaded_app();
    state.with_fleet(|fleet| {
        for now in [0, 1000, 2000, 3000] {
            fleet.tick(now);
        }
    });

    let (status, body) = send(app, "GET", "/api/alarms", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let json: ApiResponse<Vec<Alarm>> = serde_json::from_slice(&body).unwrap();
    let alarms = json.data.unwrap();
    assert!(alarms
        .iter()
        .any(|a| a.kind == Condition::ServerUnavailable && a.source == "east"));
    assert!(alarms
        .iter()
        .any(|a| a.kind == Condition::ControlBlocked && a.source == "east/link0"));
}

#[tokio::test]
async fn test_export_config() {
    let (app, _state, _) = loaded_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/config")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/xml"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(xml.starts_with("<Decoders>"));
    assert!(xml.contains("<URI>dec-east</URI>"));
    assert!(xml.contains("<SatelliteLink>"));
}

#[tokio::test]
async fn test_not_found() {
    let (app, _state) = create_test_app();

    let (status, body) = send(app, "GET", "/api/nonexistent", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let json: ApiResponse<()> = serde_json::from_slice(&body).unwrap();
    assert!(!json.success);
    assert_eq!(json.error.as_deref(), Some("Not found"));
}
