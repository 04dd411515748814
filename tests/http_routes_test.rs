mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatcart::application::ledger::Checkout;
use chatcart::application::webhook::sign;
use chatcart::domain::order::{OrderStatus, PaymentMethod};
use chatcart::domain::ports::SessionStore;
use chatcart::domain::session::Step;
use chatcart::interfaces::http::{AppState, SIGNATURE_HEADER, router};
use chrono::Utc;
use common::*;
use tower::ServiceExt;

fn app(h: &Harness) -> axum::Router {
    router(AppState {
        registry: h.registry.clone(),
        engine: h.engine.clone(),
        payments: h.webhooks.clone(),
        verify_token: Some("verify-me".to_string()),
    })
}

fn inbound(channel: &str, from: &str, message: serde_json::Value) -> String {
    let mut message = message;
    message["from"] = serde_json::Value::String(from.to_string());
    serde_json::json!({
        "entry": [{"changes": [{"value": {
            "metadata": {"phone_number_id": channel},
            "messages": [message]
        }}]}]
    })
    .to_string()
}

async fn post(h: &Harness, uri: &str, body: String, signature: Option<&str>) -> (StatusCode, String) {
    let mut request = Request::post(uri).header("content-type", "application/json");
    if let Some(sig) = signature {
        request = request.header(SIGNATURE_HEADER, sig);
    }
    let response = app(h)
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_messages_route_to_their_brand() {
    let h = Harness::new();
    let order = serde_json::json!({
        "type": "order",
        "order": {"product_items": [{"product_retailer_id": "A", "quantity": 2}]}
    });

    let (status, _) = post(&h, "/webhook", inbound("2002", "+919000000001", order), None).await;
    assert_eq!(status, StatusCode::OK);

    let laurent = h.brand("laurent");
    let kanuka = h.brand("kanuka");
    assert_eq!(
        h.sessions.get_cart(&laurent.id, CUSTOMER).await.unwrap().item_count(),
        2
    );
    assert!(h.sessions.get_cart(&kanuka.id, CUSTOMER).await.unwrap().is_empty());
    let state = h.sessions.get_state(&laurent.id, CUSTOMER).await.unwrap().unwrap();
    assert_eq!(state.step, Step::ViewingCart);
}

#[tokio::test]
async fn test_unknown_channel_and_unknown_types_are_skipped() {
    let h = Harness::new();
    let text = serde_json::json!({"type": "text", "text": {"body": "hi"}});
    let (status, _) = post(&h, "/webhook", inbound("9999", CUSTOMER, text), None).await;
    assert_eq!(status, StatusCode::OK);

    let sticker = serde_json::json!({"type": "sticker"});
    let (status, _) = post(&h, "/webhook", inbound("1001", CUSTOMER, sticker), None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn test_malformed_envelope_is_bad_request() {
    let h = Harness::new();
    let (status, _) = post(&h, "/webhook", "not json".to_string(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_message_without_sender_does_not_reject_envelope() {
    let h = Harness::new();
    let body = serde_json::json!({
        "entry": [{"changes": [
            {"value": {
                "metadata": {"phone_number_id": "1001"},
                "messages": [{"type": "text", "text": {"body": "hi"}}]
            }},
            {"value": {
                "metadata": {"phone_number_id": "1001"},
                "messages": [{"from": CUSTOMER, "type": "text", "text": {"body": "hi"}}]
            }}
        ]}]
    })
    .to_string();

    let (status, _) = post(&h, "/webhook", body, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.messenger.count("main_menu"), 1);
}

#[tokio::test]
async fn test_payment_route_confirms_order() {
    let h = Harness::new();
    let brand = h.brand("kanuka");
    let item = brand.product("A").unwrap().clone();
    h.sessions
        .add_item(&brand.id, CUSTOMER, "A", &item, 1, Utc::now())
        .await
        .unwrap();
    let order_id = h
        .ledger
        .place_order(&brand, CUSTOMER, Checkout::new(PaymentMethod::Online))
        .await
        .unwrap()
        .order
        .order_id;

    let body = serde_json::json!({
        "event": "payment_link.paid",
        "payload": {"payment_link": {"entity": {
            "reference_id": order_id,
            "customer": {"contact": format!("+{CUSTOMER}")}
        }}}
    })
    .to_string();

    let (status, ack) = post(&h, "/payment-webhook", body.clone(), Some("00ff")).await;
    assert_eq!((status, ack.as_str()), (StatusCode::OK, "Ignored"));
    assert_eq!(h.ledger.get_order(&order_id).await.unwrap().status, OrderStatus::Pending);

    let sig = sign("kanuka-secret", body.as_bytes());
    let (status, ack) = post(&h, "/payment-webhook", body, Some(&sig)).await;
    assert_eq!((status, ack.as_str()), (StatusCode::OK, "OK"));
    assert_eq!(h.ledger.get_order(&order_id).await.unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_verification_handshake() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(&h)
        .oneshot(
            Request::get("/webhook?hub.mode=unsubscribe&hub.verify_token=verify-me&hub.challenge=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
