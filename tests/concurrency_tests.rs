mod common;

use chatcart::application::ledger::{Checkout, ConfirmOutcome};
use chatcart::application::webhook::{WebhookOutcome, sign};
use chatcart::domain::order::{OrderStatus, PaymentMethod};
use chatcart::domain::ports::SessionStore;
use chatcart::error::CommerceError;
use chrono::Utc;
use common::*;
use std::sync::Arc;

async fn place(h: &Harness, customer: &str, method: PaymentMethod) -> String {
    let brand = h.brand("kanuka");
    let item = brand.product("A").unwrap().clone();
    h.sessions
        .add_item(&brand.id, customer, "A", &item, 1, Utc::now())
        .await
        .unwrap();
    let mut cart = h.sessions.get_cart(&brand.id, customer).await.unwrap();
    cart.branch = Some("Kondapur".to_string());
    h.sessions.put_cart(&brand.id, customer, cart).await.unwrap();
    h.ledger
        .place_order(&brand, customer, Checkout::new(method))
        .await
        .unwrap()
        .order
        .order_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_status_updates_apply_once() {
    let h = Arc::new(Harness::new());
    let order_id = place(&h, CUSTOMER, PaymentMethod::CashOnDelivery).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        let order_id = order_id.clone();
        handles.push(tokio::spawn(async move {
            h.ledger.update_status(&order_id, OrderStatus::Ready).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => {
                assert_eq!(order.status, OrderStatus::Ready);
                applied += 1;
            }
            Err(CommerceError::InvalidTransition { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(applied, 1);

    let entry = h.ledger.get_entry(&order_id).await.unwrap();
    assert_eq!(entry.order.status, OrderStatus::Ready);
    assert_eq!(entry.version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_forward_moves_never_go_backwards() {
    let h = Arc::new(Harness::new());
    let order_id = place(&h, CUSTOMER, PaymentMethod::CashOnDelivery).await;

    let targets = [OrderStatus::Ready, OrderStatus::OnTheWay, OrderStatus::Delivered];
    let mut handles = Vec::new();
    for status in targets.into_iter().cycle().take(12) {
        let h = h.clone();
        let order_id = order_id.clone();
        handles.push(tokio::spawn(async move {
            h.ledger.update_status(&order_id, status).await
        }));
    }

    let mut last_applied = Vec::new();
    for handle in handles {
        if let Ok(order) = handle.await.unwrap() {
            last_applied.push(order.status);
        }
    }

    assert!(!last_applied.is_empty());
    let entry = h.ledger.get_entry(&order_id).await.unwrap();
    assert_eq!(entry.version as usize, last_applied.len() + 1);
    assert!(last_applied.contains(&entry.order.status));
    if entry.order.status == OrderStatus::Delivered {
        assert!(entry.archived);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_webhooks_confirm_once() {
    let h = Arc::new(Harness::new());
    let order_id = place(&h, CUSTOMER, PaymentMethod::Online).await;
    h.messenger.clear();

    let body = serde_json::json!({
        "event": "payment_link.paid",
        "payload": {"payment_link": {"entity": {
            "reference_id": order_id,
            "customer": {"contact": CUSTOMER}
        }}}
    })
    .to_string()
    .into_bytes();
    let sig = sign("kanuka-secret", &body);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let body = body.clone();
        let sig = sig.clone();
        handles.push(tokio::spawn(async move {
            h.webhooks.handle(&body, Some(&sig)).await
        }));
    }

    let mut confirmed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            WebhookOutcome::Confirmed { .. } => confirmed += 1,
            WebhookOutcome::AlreadyConfirmed { .. } => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(confirmed, 1);
    assert_eq!(h.messenger.count("order_alert"), 1);
    assert_eq!(h.messenger.count("order_confirmation"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_customers_do_not_interfere() {
    let h = Arc::new(Harness::new());
    let brand = h.brand("kanuka");

    let mut handles = Vec::new();
    for i in 0..20 {
        let h = h.clone();
        let brand = brand.clone();
        handles.push(tokio::spawn(async move {
            let customer = format!("9180000{i:05}");
            let item = brand.product("B").unwrap().clone();
            for _ in 0..3 {
                h.sessions
                    .add_item(&brand.id, &customer, "B", &item, 1, Utc::now())
                    .await
                    .unwrap();
            }
            let order = h
                .ledger
                .place_order(&brand, &customer, Checkout::new(PaymentMethod::CashOnDelivery))
                .await
                .unwrap()
                .order;
            (customer, order)
        }));
    }

    for handle in handles {
        let (customer, order) = handle.await.unwrap();
        assert_eq!(order.user_id, customer);
        assert_eq!(order.items[0].quantity, 3);
        assert!(h.sessions.get_cart(&brand.id, &customer).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_confirm_after_status_moved_is_already_confirmed() {
    let h = Harness::new();
    let order_id = place(&h, CUSTOMER, PaymentMethod::Online).await;
    let brand = h.brand("kanuka");

    let first = h
        .ledger
        .confirm_order(&brand, CUSTOMER, &order_id, PaymentMethod::Online)
        .await
        .unwrap();
    assert!(matches!(first, ConfirmOutcome::Confirmed(_)));

    h.ledger.update_status(&order_id, OrderStatus::Ready).await.unwrap();
    let second = h
        .ledger
        .confirm_order(&brand, CUSTOMER, &order_id, PaymentMethod::Online)
        .await
        .unwrap();
    match second {
        ConfirmOutcome::AlreadyConfirmed(order) => assert_eq!(order.status, OrderStatus::Ready),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
