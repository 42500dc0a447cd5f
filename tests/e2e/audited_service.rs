// End-to-end test of an audited service forwarding its context to a downstream service.
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::post;
use axum::{Json, Router};
use fleetkit::fleetkit_core::audit::{AuditCategory, MemorySink, OPERATION_ID_KEY, OPERATOR_KEY};
use fleetkit::fleetkit_core::metadata::USER_ID_KEY;
use fleetkit::fleetkit_core::sanitize::Sanitizable;
use fleetkit::fleetkit_http::client::RESPONSE_BODY_KEY;
use fleetkit::fleetkit_http::{
    audit_operation, propagate_metadata, unwrap_response_code_is_error, AuditState, Method,
    RequestMetadata,
};
use fleetkit::fleetkit_store::{save_entity, MemoryRepository};
use fleetkit::{
    ApiError, AuditLogger, DocumentRepository, HttpClient, Metadata, Query, RequestOptions,
    StructuredError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vehicle {
    plate: String,
    model: String,
}

impl Sanitizable for Vehicle {
    fn sanitize(&mut self) {
        self.plate.sanitize();
        self.model.sanitize();
    }
}

#[derive(Clone)]
struct FleetState {
    repository: Arc<MemoryRepository>,
    registry: HttpClient,
}

async fn spawn_http_service(router: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    Ok(addr)
}

/// Downstream registry: echoes the context it received, refuses duplicate plates.
async fn register_plate(
    RequestMetadata(metadata): RequestMetadata,
    Json(vehicle): Json<Vehicle>,
) -> Result<Json<Value>, ApiError> {
    if vehicle.plate == "DUP-1" {
        return Err(StructuredError::new(
            409,
            "registry",
            "register",
            "duplicate_plate",
            Some(Metadata::from_iter([("plate", vehicle.plate)])),
        )
        .into());
    }

    Ok(Json(json!({
        "operation_id": metadata.get(OPERATION_ID_KEY),
        "user_id": metadata.get(USER_ID_KEY),
    })))
}

async fn create_vehicle(
    State(state): State<FleetState>,
    RequestMetadata(metadata): RequestMetadata,
    Json(mut vehicle): Json<Vehicle>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let registration: Value = state
        .registry
        .call(
            Method::POST,
            "/plates",
            Some(&vehicle),
            &RequestOptions::new().metadata(metadata),
        )
        .await
        .map_err(|err| match err.meta().get(RESPONSE_BODY_KEY) {
            "" => ApiError(err),
            body => ApiError(StructuredError::parse(body)),
        })?;

    let id = vehicle.plate.clone();
    save_entity(state.repository.as_ref(), "vehicles", &id, &mut vehicle, "create_vehicle").await?;

    Ok((StatusCode::CREATED, Json(registration)))
}

struct Fleet {
    client: HttpClient,
    sink: Arc<MemorySink>,
    repository: Arc<MemoryRepository>,
}

async fn fleet() -> anyhow::Result<Fleet> {
    let registry = Router::new()
        .route("/plates", post(register_plate))
        .layer(from_fn(propagate_metadata));
    let registry_addr = spawn_http_service(registry).await?;

    let sink = Arc::new(MemorySink::new());
    let repository = Arc::new(MemoryRepository::new(["vehicles"]).with_domain("fleet"));
    let state = FleetState {
        repository: repository.clone(),
        registry: HttpClient::new(format!("http://{registry_addr}")),
    };
    let audit = AuditState::new("fleet-api", AuditLogger::new(sink.clone()));

    let api = Router::new()
        .route("/vehicles", post(create_vehicle))
        .with_state(state)
        .layer(from_fn_with_state(audit, audit_operation))
        .layer(from_fn(propagate_metadata));
    let api_addr = spawn_http_service(api).await?;

    Ok(Fleet {
        client: HttpClient::new(format!("http://{api_addr}")),
        sink,
        repository,
    })
}

#[tokio::test]
async fn operation_context_flows_downstream_and_into_the_audit_trail() {
    let fleet = fleet().await.expect("fleet");
    let options = RequestOptions::new().metadata(Metadata::from_iter([(USER_ID_KEY, "u-7")]));

    let registration: Value = fleet
        .client
        .call(
            Method::POST,
            "/vehicles",
            Some(&json!({"plate": "AB-<i>1</i>", "model": "Kangoo"})),
            &options,
        )
        .await
        .expect("created");

    let events = fleet.sink.events();
    assert_eq!(events.len(), 2);
    let (attempt, success) = (&events[0], &events[1]);

    assert_eq!(attempt.category, AuditCategory::Attempt);
    assert_eq!(success.category, AuditCategory::Success);
    assert_eq!(attempt.field_str(OPERATOR_KEY), Some("fleet-api"));
    assert_eq!(attempt.field_str(USER_ID_KEY), Some("u-7"));
    assert_eq!(attempt.field_str("http_method"), Some("POST"));
    assert_eq!(attempt.field_str("http_path"), Some("/vehicles"));
    assert_eq!(success.field("http_status"), Some(&json!(201)));

    let operation_id = attempt.field_str(OPERATION_ID_KEY).expect("operation id");
    assert_eq!(success.field_str(OPERATION_ID_KEY), Some(operation_id));
    assert_eq!(registration["operation_id"], json!(operation_id));
    assert_eq!(registration["user_id"], json!("u-7"));

    let stored = fleet
        .repository
        .get_one("vehicles", &Query::new().filter("model", "Kangoo"), false, "find_vehicle")
        .await
        .expect("stored")
        .expect("present");
    assert_eq!(stored["plate"], json!("AB-1"));
}

#[tokio::test]
async fn downstream_failure_is_relayed_and_audited_as_fail() {
    let fleet = fleet().await.expect("fleet");

    let err = fleet
        .client
        .call::<_, Value>(
            Method::POST,
            "/vehicles",
            Some(&json!({"plate": "DUP-1", "model": "Transit"})),
            &RequestOptions::new(),
        )
        .await
        .expect_err("duplicate");

    assert_eq!(err.code(), 409);
    let (message, fields) = unwrap_response_code_is_error(&err).expect("remote body");
    assert!(message.contains("registry/register/duplicate_plate/plate=dup-1"));
    assert!(fields.contains_key(RESPONSE_BODY_KEY));

    let categories: Vec<_> = fleet.sink.events().iter().map(|event| event.category).collect();
    assert_eq!(categories, vec![AuditCategory::Attempt, AuditCategory::Fail]);
    assert_eq!(fleet.sink.events()[1].field("http_status"), Some(&json!(409)));

    let count = fleet
        .repository
        .count("vehicles", &Query::new(), "count_vehicles")
        .await
        .expect("count");
    assert_eq!(count, 0);
}
