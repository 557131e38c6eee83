//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use invoice_store::{InMemoryInvoiceStore, Statement};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    setup_with_store().0
}

fn setup_with_store() -> (axum::Router, InMemoryInvoiceStore) {
    let store = InMemoryInvoiceStore::new();
    let state = api::create_state(store.clone());
    (api::create_app(state, get_metrics_handle()), store)
}

fn invoice_body() -> Value {
    json!({
        "invoiceDate": "2024-08-18",
        "paymentTerms": "Net 30",
        "projectDescription": "Graphic Design",
        "invoiceStatus": "pending",
        "streetAddress": "19 Union Terrace",
        "city": "London",
        "postCode": "E1 3EZ",
        "country": "United Kingdom",
        "clientsName": "Alex Grim",
        "clientsEmail": "alexgrim@mail.com",
        "clientsStreetAddress": "84 Church Way",
        "clientsCity": "Bradford",
        "clientsPostCode": "BD1 9PB",
        "clientsCountry": "United Kingdom",
        "items": [{"itemName": "Design", "quantity": 2, "price": 50}]
    })
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    };
    app.clone().oneshot(request.unwrap()).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn create_invoice(app: &axum::Router) -> String {
    let response = send(app, "POST", "/inv", Some(invoice_body())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["invoiceId"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = send(&app, "GET", "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_create_then_list() {
    let app = setup();

    let response = send(&app, "POST", "/inv", Some(invoice_body())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    let invoice_id = json["invoiceId"].as_str().unwrap().to_string();

    let response = send(&app, "GET", "/inv", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    let invoices = listed.as_array().unwrap();
    assert_eq!(invoices.len(), 1);

    let invoice = &invoices[0];
    assert_eq!(invoice["invoiceId"], invoice_id.as_str());
    assert_eq!(invoice["invoiceDate"], "2024-08-18");
    assert_eq!(invoice["paymentTerms"], "Net 30");
    assert_eq!(invoice["invoiceStatus"], "pending");
    assert_eq!(invoice["city"], "London");
    assert_eq!(invoice["clientsEmail"], "alexgrim@mail.com");
    assert_eq!(invoice["items"][0]["itemName"], "Design");
    assert_eq!(invoice["items"][0]["quantity"], 2);
    assert_eq!(invoice["items"][0]["price"].as_f64(), Some(50.0));
    assert_eq!(invoice["items"][0]["total"].as_f64(), Some(100.0));
    assert_eq!(invoice["total"].as_f64(), Some(100.0));
}

#[tokio::test]
async fn test_get_by_id() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;

    let response = send(&app, "GET", &format!("/inv/{invoice_id}"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["clientsName"], "Alex Grim");
}

#[tokio::test]
async fn test_get_unknown_or_malformed_id_is_not_found() {
    let app = setup();

    let response = send(
        &app,
        "GET",
        "/inv/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["success"], false);

    let response = send(&app, "GET", "/inv/not-a-uuid", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_items() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;

    let response = send(&app, "GET", "/inv/items", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["invoiceId"], invoice_id.as_str());
    assert_eq!(items[0]["itemName"], "Design");
    assert_eq!(items[0]["position"], 0);
}

#[tokio::test]
async fn test_update_only_changes_supplied_field() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;
    let uri = format!("/inv/{invoice_id}");
    let before = json_body(send(&app, "GET", &uri, None).await).await;

    let response = send(&app, "PUT", &uri, Some(json!({"clientsEmail": "a@b.com"}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let after = json_body(send(&app, "GET", &uri, None).await).await;
    let mut expected = before.clone();
    expected["clientsEmail"] = json!("a@b.com");
    assert_eq!(after, expected);
}

#[tokio::test]
async fn test_update_ignores_empty_strings() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;
    let uri = format!("/inv/{invoice_id}");

    let response = send(
        &app,
        "PUT",
        &uri,
        Some(json!({"paymentTerms": "", "invoiceDate": "", "city": "Leeds"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let after = json_body(send(&app, "GET", &uri, None).await).await;
    assert_eq!(after["paymentTerms"], "Net 30");
    assert_eq!(after["invoiceDate"], "2024-08-18");
    assert_eq!(after["city"], "Leeds");
}

#[tokio::test]
async fn test_update_unknown_invoice_is_server_error() {
    let app = setup();

    let response = send(
        &app,
        "PUT",
        "/inv/00000000-0000-0000-0000-000000000000",
        Some(json!({"paymentTerms": "Net 15"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Error updating invoice and related data");

    let response = send(
        &app,
        "PUT",
        "/inv/not-a-uuid",
        Some(json!({"paymentTerms": "Net 15"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_update_with_incomplete_new_item_is_rejected() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;
    let uri = format!("/inv/{invoice_id}");

    let response = send(
        &app,
        "PUT",
        &uri,
        Some(json!({"paymentTerms": "Net 15", "items": [{}, {"quantity": 1}]})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let after = json_body(send(&app, "GET", &uri, None).await).await;
    assert_eq!(after["paymentTerms"], "Net 30");
    assert_eq!(after["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;
    let uri = format!("/inv/{invoice_id}");

    let response = send(&app, "DELETE", &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let response = send(&app, "DELETE", &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "DELETE", "/inv/not-a-uuid", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let listed = json_body(send(&app, "GET", "/inv", None).await).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_create_leaves_nothing_behind() {
    let (app, store) = setup_with_store();
    store.fail_on(Statement::InsertLineItem);

    let response = send(&app, "POST", "/inv", Some(invoice_body())).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Error adding invoice and related data");
    assert_eq!(store.invoice_count().await, 0);
    assert_eq!(store.client_count().await, 0);
}

#[tokio::test]
async fn test_out_of_range_price_is_rejected_and_list_still_works() {
    let (app, store) = setup_with_store();
    let mut body = invoice_body();
    body["items"] = json!([{"itemName": "Big", "quantity": 100, "price": 1e28}]);

    let response = send(&app, "POST", "/inv", Some(body)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["message"],
        "Error adding invoice and related data"
    );
    assert_eq!(store.invoice_count().await, 0);

    let response = send(&app, "GET", "/inv", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_prices_are_stored_in_cents() {
    let app = setup();
    let mut body = invoice_body();
    body["items"] = json!([{"itemName": "Design", "quantity": 3, "price": 0.005}]);
    let response = send(&app, "POST", "/inv", Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let listed = json_body(send(&app, "GET", "/inv", None).await).await;
    let invoice = &listed[0];
    assert_eq!(invoice["items"][0]["price"].as_f64(), Some(0.01));
    assert_eq!(invoice["total"].as_f64(), Some(0.03));
}

#[tokio::test]
async fn test_missing_fields_is_bad_request() {
    let app = setup();

    let response = send(&app, "POST", "/inv", Some(json!({"paymentTerms": "Net 30"}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["success"], false);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = setup();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/inv")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = text_body(response).await;
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    create_invoice(&app).await;

    let response = send(&app, "GET", "/metrics", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let text = text_body(response).await;
    assert!(text.contains("invoice_operations_total"));
}

#[tokio::test]
async fn test_metrics_describe_reads_and_writes() {
    let app = setup();
    api::routes::metrics::describe();
    create_invoice(&app).await;
    send(&app, "GET", "/inv", None).await;

    let text = text_body(send(&app, "GET", "/metrics", None).await).await;

    assert!(text.contains(
        "# HELP invoice_operation_duration_seconds Wall time of invoice repository reads and writes"
    ));
    assert!(text.contains("operation=\"list\""));
}

#[tokio::test]
async fn test_concurrent_creates_all_land() {
    let app = setup();

    let requests: Vec<_> = (0..10)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { send(&app, "POST", "/inv", Some(invoice_body())).await })
        })
        .collect();
    for request in requests {
        assert_eq!(request.await.unwrap().status(), StatusCode::CREATED);
    }

    let listed = json_body(send(&app, "GET", "/inv", None).await).await;
    let invoices = listed.as_array().unwrap();
    assert_eq!(invoices.len(), 10);
    assert!(
        invoices
            .iter()
            .all(|invoice| invoice["items"].as_array().map(Vec::len) == Some(1))
    );
}
