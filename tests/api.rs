//! HTTP surface over the in-memory ledger.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use opensase_storefront::api::{router, AppState};
use opensase_storefront::claims::{MemoryCouponIssuer, MemoryOrderCreator, RetryPolicy};
use opensase_storefront::clock::SystemClock;
use opensase_storefront::domain::aggregates::{Address, ClaimableResource};
use opensase_storefront::domain::value_objects::{ActorId, AddressId, Cents, ResourceId};
use opensase_storefront::ledger::{CouponTemplate, FailPoint, MemoryLedger};
use opensase_storefront::publisher::LogPublisher;

fn app(ledger: &MemoryLedger) -> Router {
    let retry = RetryPolicy { max_attempts: 2, backoff: std::time::Duration::ZERO };
    let state = AppState::new(
        ledger.clone(),
        Arc::new(ledger.clone()),
        Arc::new(MemoryCouponIssuer),
        Arc::new(MemoryOrderCreator),
        Arc::new(SystemClock),
        Arc::new(LogPublisher),
        retry,
    );
    router(state)
}

async fn signed_in(ledger: &MemoryLedger, token: &str) -> ActorId {
    let actor = ActorId::new();
    ledger.insert_token(token, actor).await;
    actor
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri).header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn rush(ledger: &MemoryLedger, title: &str, capacity: Option<u32>) -> ResourceId {
    rush_from(ledger, title, capacity, CouponTemplate::new(1_000, 7)).await
}

async fn rush_from(ledger: &MemoryLedger, title: &str, capacity: Option<u32>, template: CouponTemplate) -> ResourceId {
    let resource = ClaimableResource::coupon(title, template.id, capacity);
    let id = resource.id();
    ledger.insert_template(template).await;
    ledger.insert_resource(resource).await;
    id
}

async fn address(ledger: &MemoryLedger, actor: ActorId) -> AddressId {
    let address = Address::new(actor, "Ada", "13800000000", "1 Main St");
    let id = address.id;
    ledger.insert_address(address).await;
    id
}

#[tokio::test]
async fn test_health() {
    let ledger = MemoryLedger::new();
    let (status, body) = send(&app(&ledger), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_receive_coupon_once() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;
    let id = rush(&ledger, "10 off", Some(1)).await;

    let (status, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);
    assert_eq!(body["code"], "0");
    assert_eq!(body["data"]["resource_id"], id.to_string());

    let (status, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], false);
    assert_eq!(body["code"], "ALREADY_CLAIMED");

    signed_in(&ledger, "t2").await;
    let (status, body) = send(&app, post("/api/ticket-rush/receive?token=t2", json!({"id": id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "EXHAUSTED");
}

#[tokio::test]
async fn test_receive_requires_token() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    let id = rush(&ledger, "10 off", None).await;

    let (status, body) = send(&app, post("/api/ticket-rush/receive", json!({"id": id}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(&app, post("/api/ticket-rush/receive?token=unknown", json!({"id": id}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_receive_unknown_or_malformed_id() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;

    let (_, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": "42"}))).await;
    assert_eq!(body["code"], "NOT_FOUND");
    let (_, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": ResourceId::new()}))).await;
    assert_eq!(body["code"], "NOT_FOUND");
    let (_, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": ""}))).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_bearer_header_is_accepted() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;
    let id = rush(&ledger, "10 off", None).await;

    let request = Request::post("/api/ticket-rush/receive")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer t1")
        .body(Body::from(json!({"id": id}).to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);
}

#[tokio::test]
async fn test_store_outage_is_503() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;
    let id = rush(&ledger, "10 off", None).await;
    ledger.inject_failure(FailPoint::LockResource, 2).await;

    let (status, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": id}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], false);
    assert_eq!(body["code"], "TRANSIENT_STORE_FAILURE");
}

#[tokio::test]
async fn test_list_rushes() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;
    let first = rush(&ledger, "first", Some(5)).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = rush(&ledger, "second", None).await;
    let sold_out = rush(&ledger, "sold out", Some(0)).await;
    let no_stock = rush_from(&ledger, "no stock", None, CouponTemplate::new(0, 7)).await;
    let retired = rush_from(&ledger, "retired", None, CouponTemplate { active: false, ..CouponTemplate::new(10, 7) }).await;
    let sku = ClaimableResource::group_buy("tee", 3, Duration::hours(1), Cents::new(990), None);
    ledger.insert_resource(sku).await;

    send(&app, post("/api/ticket-rush/receive?token=t1", json!({"id": first}))).await;

    let (_, body) = send(&app, get("/api/ticket-rush?token=t1")).await;
    let rushes = body["data"].as_array().unwrap();
    let ids: Vec<&str> = rushes.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![second.to_string(), first.to_string()]);
    for hidden in [sold_out, no_stock, retired] {
        assert!(!ids.contains(&hidden.to_string().as_str()));
    }
    assert_eq!(rushes[1]["claimed"], true);
    assert_eq!(rushes[1]["remaining"], 4);
    assert_eq!(rushes[0]["claimed"], false);
    assert_eq!(rushes[0]["remaining"], Value::Null);

    let (_, body) = send(&app, get("/api/ticket-rush?order=asc")).await;
    assert_eq!(body["data"][0]["id"], first.to_string());
    assert_eq!(body["data"][0]["claimed"], false);

    let (status, body) = send(&app, get("/api/ticket-rush?order=sideways")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], false);
}

#[tokio::test]
async fn test_group_buy_flow() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    let sku = ClaimableResource::group_buy("tee", 2, Duration::hours(1), Cents::new(990), Some(10));
    let sku_id = sku.id();
    ledger.insert_resource(sku).await;

    let alice = signed_in(&ledger, "alice").await;
    let alice_address = address(&ledger, alice).await;
    let (status, body) = send(
        &app,
        post(
            "/api/bulk/create-spell?token=alice",
            json!({"bulkSkuId": sku_id, "spellId": "0", "payType": 1, "deliveryType": 1, "message": "ring twice", "addressId": alice_address}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true, "{body}");
    assert_eq!(body["data"]["state"], "forming");
    let spell = body["data"]["spell_id"].as_str().unwrap().to_owned();
    assert!(body["data"]["order_id"].is_string());
    assert!(body["data"]["number"].as_str().unwrap().starts_with("ORD-"));

    let (_, body) = send(&app, get(&format!("/api/bulk/spell-detail?spellId={spell}&token=alice"))).await;
    assert_eq!(body["data"]["current_count"], 1);
    assert_eq!(body["data"]["missing"], 1);
    assert_eq!(body["data"]["joined"], true);

    let bob = signed_in(&ledger, "bob").await;
    let bob_address = address(&ledger, bob).await;
    let (_, body) = send(&app, post("/api/bulk/create-spell?token=bob", json!({"bulkSkuId": sku_id, "spellId": spell, "addressId": bob_address}))).await;
    assert_eq!(body["data"]["state"], "succeeded", "{body}");

    let carol = signed_in(&ledger, "carol").await;
    let carol_address = address(&ledger, carol).await;
    let (status, body) = send(&app, post("/api/bulk/create-spell?token=carol", json!({"bulkSkuId": sku_id, "spellId": spell, "addressId": carol_address}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "GROUP_UNAVAILABLE");

    // detail is readable without a token
    let (_, body) = send(&app, get(&format!("/api/bulk/spell-detail?spellId={spell}"))).await;
    assert_eq!(body["data"]["state"], "succeeded");
    assert_eq!(body["data"]["participants"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["joined"], false);
}

#[tokio::test]
async fn test_create_spell_rejections() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    let actor = signed_in(&ledger, "t1").await;
    let own = address(&ledger, actor).await;
    let sku = ClaimableResource::group_buy("tee", 2, Duration::hours(1), Cents::new(990), None);
    let sku_id = sku.id();
    ledger.insert_resource(sku).await;

    let (_, body) = send(&app, post("/api/bulk/create-spell?token=t1", json!({"bulkSkuId": sku_id}))).await;
    assert_eq!(body["code"], "REJECTED");
    assert_eq!(body["data"], "a delivery address is required");

    let (_, body) = send(&app, post("/api/bulk/create-spell?token=t1", json!({"bulkSkuId": sku_id, "addressId": own, "spellId": "nope"}))).await;
    assert_eq!(body["code"], "NOT_FOUND");

    let (_, body) = send(&app, post("/api/bulk/create-spell?token=t1", json!({"bulkSkuId": sku_id, "addressId": own, "payType": 99}))).await;
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (_, body) = send(&app, get(&format!("/api/bulk/spell-detail?spellId={}", ResourceId::new()))).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_change_default_address() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    let actor = signed_in(&ledger, "t1").await;
    let home = address(&ledger, actor).await;
    let work = address(&ledger, actor).await;

    let (_, body) = send(&app, post("/api/address/change-default-address?token=t1", json!({"id": work}))).await;
    assert_eq!(body["status"], true);
    let (_, body) = send(&app, post("/api/address/change-default-address?token=t1", json!({"id": home}))).await;
    assert_eq!(body["status"], true);

    let defaults: Vec<AddressId> = ledger.addresses(actor).await.into_iter().filter(|a| a.is_default).map(|a| a.id).collect();
    assert_eq!(defaults, vec![home]);

    signed_in(&ledger, "t2").await;
    let (_, body) = send(&app, post("/api/address/change-default-address?token=t2", json!({"id": home}))).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_input_keeps_envelope() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;

    let (status, body) = send(&app, post("/api/ticket-rush/receive?token=t1", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], false);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let request = Request::post("/api/ticket-rush/receive?token=t1").header(header::CONTENT_TYPE, "text/plain").body(Body::from("id=1")).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = send(&app, post("/api/address/change-default-address?token=t1", json!({"name": "home"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = send(&app, get("/api/bulk/spell-detail")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], false);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_form_encoded_receive() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    signed_in(&ledger, "t1").await;
    let id = rush(&ledger, "10 off", Some(3)).await;

    let request = Request::post("/api/ticket-rush/receive?token=t1")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("id={id}")))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true, "{body}");
    assert_eq!(body["data"]["artifact"]["reference"].as_str().unwrap().len(), 16);
}

#[tokio::test]
async fn test_spell_orders_by_status() {
    let ledger = MemoryLedger::new();
    let app = app(&ledger);
    let sku = ClaimableResource::group_buy("tee", 2, Duration::hours(1), Cents::new(990), None);
    let sku_id = sku.id();
    ledger.insert_resource(sku).await;

    let alice = signed_in(&ledger, "alice").await;
    let alice_address = address(&ledger, alice).await;
    let (_, body) = send(&app, post("/api/bulk/create-spell?token=alice", json!({"bulkSkuId": sku_id, "addressId": alice_address}))).await;
    let spell = body["data"]["spell_id"].as_str().unwrap().to_owned();
    let number = body["data"]["number"].as_str().unwrap().to_owned();

    let (_, body) = send(&app, get("/api/bulk/spell-order?status=forming&token=alice")).await;
    let forming = body["data"].as_array().unwrap();
    assert_eq!(forming.len(), 1);
    assert_eq!(forming[0]["spell_id"], spell);
    assert_eq!(forming[0]["number"], number);
    assert_eq!(forming[0]["state"], "forming");

    let bob = signed_in(&ledger, "bob").await;
    let bob_address = address(&ledger, bob).await;
    send(&app, post("/api/bulk/create-spell?token=bob", json!({"bulkSkuId": sku_id, "spellId": spell, "addressId": bob_address}))).await;

    let (_, body) = send(&app, get("/api/bulk/spell-order?status=forming&token=alice")).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = send(&app, get("/api/bulk/spell-order?status=succeeded&token=alice")).await;
    assert_eq!(body["data"][0]["current_count"], 2);
    let (_, body) = send(&app, get("/api/bulk/spell-order?status=failed&token=bob")).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, get("/api/bulk/spell-order?status=paid&token=alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "INVALID_REQUEST");
    let (_, body) = send(&app, get("/api/bulk/spell-order?token=alice")).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
    let (status, _) = send(&app, get("/api/bulk/spell-order?status=forming")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
