mod common;

use chatcart::application::ledger::Checkout;
use chatcart::application::webhook::{WebhookOutcome, sign};
use chatcart::domain::order::{OrderStatus, PaymentMethod};
use chatcart::domain::ports::SessionStore;
use chrono::Utc;
use common::*;

fn paid_event(order_id: &str, contact: &str) -> Vec<u8> {
    serde_json::json!({
        "event": "payment_link.paid",
        "payload": {
            "payment_link": {
                "entity": {
                    "reference_id": order_id,
                    "customer": { "contact": contact }
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

async fn pending_order(h: &Harness, brand: &str) -> String {
    let brand = h.brand(brand);
    let item = brand.product("A").unwrap().clone();
    h.sessions
        .add_item(&brand.id, CUSTOMER, "A", &item, 1, Utc::now())
        .await
        .unwrap();
    let mut cart = h.sessions.get_cart(&brand.id, CUSTOMER).await.unwrap();
    cart.branch = Some(brand.branches[0].name.clone());
    h.sessions.put_cart(&brand.id, CUSTOMER, cart).await.unwrap();

    h.ledger
        .place_order(&brand, CUSTOMER, Checkout::new(PaymentMethod::Online))
        .await
        .unwrap()
        .order
        .order_id
}

#[tokio::test]
async fn test_paid_event_confirms_once() {
    let h = Harness::new();
    let order_id = pending_order(&h, "kanuka").await;
    h.messenger.clear();

    let body = paid_event(&order_id, &format!("+{CUSTOMER}"));
    let sig = sign("kanuka-secret", &body);

    let outcome = h.webhooks.handle(&body, Some(&sig)).await;
    assert_eq!(outcome, WebhookOutcome::Confirmed { order_id: order_id.clone() });
    assert_eq!(outcome.acknowledgement(), "OK");
    assert_eq!(h.ledger.get_order(&order_id).await.unwrap().status, OrderStatus::Paid);
    assert_eq!(h.messenger.count("order_alert"), 1);
    let confirmation = h
        .messenger
        .sent()
        .into_iter()
        .find(|s| s.intent == "order_confirmation")
        .unwrap();
    assert_eq!(confirmation.to, CUSTOMER);

    let again = h.webhooks.handle(&body, Some(&sig)).await;
    assert_eq!(again, WebhookOutcome::AlreadyConfirmed { order_id });
    assert_eq!(again.acknowledgement(), "OK");
    assert_eq!(h.messenger.count("order_alert"), 1);
    assert_eq!(h.messenger.count("order_confirmation"), 1);
}

#[tokio::test]
async fn test_other_brands_secret_is_rejected() {
    let h = Harness::new();
    let order_id = pending_order(&h, "kanuka").await;

    let body = paid_event(&order_id, CUSTOMER);
    let sig = sign("laurent-secret", &body);

    assert_eq!(h.webhooks.handle(&body, Some(&sig)).await, WebhookOutcome::Rejected);
    assert_eq!(h.ledger.get_order(&order_id).await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_tampered_or_unsigned_payloads_are_rejected() {
    let h = Harness::new();
    let order_id = pending_order(&h, "kanuka").await;

    let body = paid_event(&order_id, CUSTOMER);
    let sig = sign("kanuka-secret", &body);
    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;

    assert_eq!(h.webhooks.handle(&tampered, Some(&sig)).await, WebhookOutcome::Rejected);
    assert_eq!(h.webhooks.handle(&body, None).await, WebhookOutcome::Rejected);
    assert_eq!(h.webhooks.handle(&body, Some("")).await, WebhookOutcome::Rejected);
    assert_eq!(h.ledger.get_order(&order_id).await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_unknown_order_is_ignored() {
    let h = Harness::new();
    let body = paid_event("ORD20260101000000000ZZZZZZZZ", CUSTOMER);
    let sig = sign("laurent-secret", &body);

    let outcome = h.webhooks.handle(&body, Some(&sig)).await;
    assert_eq!(outcome, WebhookOutcome::Ignored("unknown order"));
    assert_eq!(outcome.acknowledgement(), "Ignored");
}

#[tokio::test]
async fn test_other_events_are_ignored() {
    let h = Harness::new();
    let body = br#"{"event":"payment.captured","payload":{}}"#;
    let sig = sign("kanuka-secret", body);
    assert_eq!(
        h.webhooks.handle(body, Some(&sig)).await,
        WebhookOutcome::Ignored("unhandled event")
    );
}

#[tokio::test]
async fn test_confirmation_through_the_wrong_brand_is_not_found() {
    let h = Harness::new();
    let order_id = pending_order(&h, "laurent").await;
    let kanuka = h.brand("kanuka");

    let err = h
        .ledger
        .confirm_order(&kanuka, CUSTOMER, &order_id, PaymentMethod::Online)
        .await
        .unwrap_err();
    assert!(matches!(err, chatcart::error::CommerceError::OrderNotFound(_)));

    let body = paid_event(&order_id, CUSTOMER);
    let sig = sign("laurent-secret", &body);
    assert!(matches!(
        h.webhooks.handle(&body, Some(&sig)).await,
        WebhookOutcome::Confirmed { .. }
    ));
}
