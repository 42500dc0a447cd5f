// End-to-end test ensuring structured errors survive an HTTP hop.
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::middleware::from_fn;
use axum::routing::get;
use axum::{Json, Router};
use fleetkit::fleetkit_core::metadata::USER_ID_KEY;
use fleetkit::fleetkit_http::client::{ERROR_RESPONSE_CODE_IS_ERROR, RESPONSE_BODY_KEY};
use fleetkit::fleetkit_http::{propagate_metadata, Method, RequestMetadata};
use fleetkit::fleetkit_store::{get_one_as, MemoryRepository};
use fleetkit::{ApiError, DocumentRepository, ErrorKind, HttpClient, Metadata, Query, RequestOptions, StructuredError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Order {
    reference: String,
    #[serde(default)]
    requested_by: String,
}

async fn spawn_http_service(router: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    Ok(addr)
}

async fn get_order(
    State(repository): State<Arc<MemoryRepository>>,
    RequestMetadata(metadata): RequestMetadata,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order: Option<Order> =
        get_one_as(repository.as_ref(), "orders", &Query::by_id(&order_id), true, "get_order").await?;

    let Some(mut order) = order else {
        return Err(StructuredError::new(
            404,
            "orders",
            "lookup",
            "not_found",
            Some(Metadata::from_iter([("order_id", order_id)])),
        )
        .into());
    };

    order.requested_by = metadata.get(USER_ID_KEY).to_string();
    Ok(Json(order))
}

async fn orders_service() -> anyhow::Result<HttpClient> {
    let repository = Arc::new(MemoryRepository::new(["orders"]).with_domain("orders"));
    repository
        .save("orders", "o-1", json!({"reference": "REF-1"}), "seed")
        .await
        .map_err(|err| anyhow::anyhow!(err.to_error_string()))?;

    let router = Router::new()
        .route("/orders/:id", get(get_order))
        .with_state(repository)
        .layer(from_fn(propagate_metadata));

    let addr = spawn_http_service(router).await?;
    Ok(HttpClient::new(format!("http://{addr}")))
}

#[tokio::test]
async fn metadata_reaches_the_remote_handler() {
    let client = orders_service().await.expect("service");
    let options = RequestOptions::new().metadata(Metadata::from_iter([(USER_ID_KEY, "u-42")]));

    let order: Order = client
        .call::<(), _>(Method::GET, "/orders/o-1", None, &options)
        .await
        .expect("order");

    assert_eq!(
        order,
        Order {
            reference: "REF-1".into(),
            requested_by: "u-42".into(),
        }
    );
}

#[tokio::test]
async fn remote_error_is_rebuilt_from_the_response_body() {
    let client = orders_service().await.expect("service");

    let err = client
        .call::<(), Order>(Method::GET, "/orders/abc", None, &RequestOptions::new())
        .await
        .expect_err("missing order");

    assert_eq!(err.code(), 404);
    assert_eq!(err.sub_domain_code(), ERROR_RESPONSE_CODE_IS_ERROR);

    let remote = StructuredError::parse(&err.meta().get(RESPONSE_BODY_KEY).to_string());
    assert_eq!(remote.code(), 404);
    assert_eq!(remote.kind(), ErrorKind::NotFound);
    assert_eq!(remote.detail_string(), "orders/lookup/not_found/order_id=abc");
    assert_eq!(remote.domain(), "orders");
    assert_eq!(remote.meta().get("order_id"), "abc");
}

#[tokio::test]
async fn corrupt_metadata_header_is_rejected() {
    let client = orders_service().await.expect("service");
    let options = RequestOptions::new().header(fleetkit::fleetkit_http::METADATA_HEADER, "%%%not-base64%%%");

    let err = client
        .call_raw(Method::GET, "/orders/o-1", Vec::new(), &options)
        .await
        .expect_err("bad header");

    assert_eq!(err.code(), 400);
    let remote = StructuredError::parse(&err.meta().get(RESPONSE_BODY_KEY).to_string());
    assert_eq!(remote.domain(), "fleetkit");
    assert_eq!(remote.sub_domain(), "metadata");
}
