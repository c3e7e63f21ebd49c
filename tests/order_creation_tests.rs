mod common;

use common::*;
use escrow_orderservice::{
    api::sandbox::SandboxIntentState,
    app_error::AppError,
    domain::{
        activity::ActivityKind,
        delivery::{DeliveryStage, VerificationMethod},
        notification::NotificationKind,
        order::OrderStatus,
        payment::PaymentStatus,
        ports::ActivityRepository,
    },
    services::delivery::SupplierProof,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn test_creates_confirmed_order_with_escrow_hold() {
    let mut h = harness();
    let aggregate = h.create_order(dec!(20.00), 2, dec!(5.00)).await;

    assert_eq!(aggregate.order.status, OrderStatus::Confirmed);
    assert_eq!(aggregate.order.subtotal, money(dec!(40.00)));
    assert_eq!(aggregate.order.total, money(dec!(45.00)));
    assert!(aggregate.order.pricing_is_consistent());
    assert!(aggregate.order.order_number.starts_with("ORD-"));
    assert_eq!(aggregate.items.len(), 1);
    assert_eq!(aggregate.items[0].line_total, money(dec!(40.00)));

    assert_eq!(aggregate.payment.amount, aggregate.order.total);
    assert_eq!(aggregate.payment.status, PaymentStatus::Authorized);
    assert_eq!(aggregate.payment.provider, "sandbox");
    let intent = h.sandbox.intent(&aggregate.payment.intent_id).unwrap();
    assert_eq!(intent.state, SandboxIntentState::Held);
    assert_eq!(intent.amount, aggregate.order.total);

    assert_eq!(aggregate.delivery.stage, DeliveryStage::AwaitingSupplierConfirmation);
    assert_eq!(aggregate.delivery.recipient.phone, "+233205550101");
    // order, one item, delivery, payment
    assert_eq!(h.store.rows_for_order(aggregate.order.id).await, 4);

    let kinds: Vec<ActivityKind> = h
        .store
        .list_activities(aggregate.order.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::OrderCreated,
            ActivityKind::PaymentAuthorized,
            ActivityKind::OrderConfirmed
        ]
    );
    assert_eq!(h.drain_notifications(), vec![NotificationKind::OrderConfirmed]);
}

#[tokio::test]
async fn test_threshold_decides_verification_at_creation() {
    let h = harness();

    let cheap = h.create_order(dec!(40.00), 1, dec!(5.00)).await;
    assert_eq!(cheap.order.total, money(dec!(45.00)));
    assert_eq!(cheap.delivery.verification.method(), VerificationMethod::Photo);
    assert!(cheap.delivery.verification.pin().is_none());

    let exact = h.create_order(dec!(110.00), 1, dec!(10.00)).await;
    assert_eq!(exact.delivery.verification.method(), VerificationMethod::Pin);

    let expensive = h.create_order(dec!(95.00), 2, dec!(10.00)).await;
    assert_eq!(expensive.order.total, money(dec!(200.00)));
    let pin = expensive.delivery.verification.pin().unwrap();
    assert_eq!(pin.len(), 4);
    assert!(pin.chars().all(|c| c.is_ascii_digit()));
    assert!(!expensive.delivery.verification.requires_photo());
}

#[tokio::test]
async fn test_invalid_request_writes_nothing() {
    let h = harness();

    let mut req = h.order_request(dec!(10.00), 0, dec!(2.00));
    let err = h.services.orders.create(h.buyer, req.clone()).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    req.items[0].quantity = 1;
    req.latitude = 123.0;
    let err = h.services.orders.create(h.buyer, req).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let own_goods = h.order_request(dec!(10.00), 1, dec!(2.00));
    let err = h.services.orders.create(h.supplier, own_goods).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    assert_eq!(h.store.order_count().await, 0);
    assert!(h.gateway.last_intent().is_none());
}

#[tokio::test]
async fn test_amounts_beyond_the_ledger_range_are_bad_requests() {
    let h = harness();

    for req in [
        h.order_request(Decimal::MAX, 2, dec!(0)),
        h.order_request(dec!(6000000000.00), 2, dec!(0)),
        h.order_request(dec!(9999999999.99), 1, dec!(0.01)),
        h.order_request(dec!(1.00), i64::MAX, dec!(0)),
    ] {
        let err = h.services.orders.create(h.buyer, req).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");
    }

    assert_eq!(h.store.order_count().await, 0);
    assert!(h.gateway.last_intent().is_none());
}

#[tokio::test]
async fn test_failed_hold_rolls_back_every_row() {
    let h = harness();
    h.gateway.fail(GatewayStep::Hold);

    let err = h
        .services
        .orders
        .create(h.buyer, h.order_request(dec!(40.00), 1, dec!(5.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PaymentProvider(_)));

    assert_eq!(h.store.order_count().await, 0);
    let intent_id = h.gateway.last_intent().unwrap();
    let intent = h.sandbox.intent(&intent_id).unwrap();
    assert_eq!(intent.state, SandboxIntentState::Refunded);
}

#[tokio::test]
async fn test_failed_payment_write_voids_the_intent() {
    let h = harness();
    h.faults.fail_insert_payment();

    let err = h
        .services
        .orders
        .create(h.buyer, h.order_request(dec!(95.00), 2, dec!(10.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Database(_)));

    assert_eq!(h.store.order_count().await, 0);
    let intent_id = h.gateway.last_intent().unwrap();
    assert_eq!(
        h.sandbox.intent(&intent_id).unwrap().state,
        SandboxIntentState::Refunded
    );
}

#[tokio::test]
async fn test_unfinished_rollback_is_a_partial_failure() {
    let h = harness();
    h.gateway.fail(GatewayStep::Hold);
    h.faults.fail_delete_order();

    let err = h
        .services
        .orders
        .create(h.buyer, h.order_request(dec!(40.00), 1, dec!(5.00)))
        .await
        .unwrap_err();
    let AppError::PartialFailure(message) = err else {
        panic!("expected a partial failure, got {err:?}");
    };
    assert!(message.contains("order"));
    // Everything but the order row itself was undone.
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn test_buyer_cancels_before_handover() {
    let mut h = harness();
    let aggregate = h.create_order(dec!(40.00), 1, dec!(5.00)).await;
    h.drain_notifications();

    let err = h
        .services
        .orders
        .cancel(h.supplier, aggregate.order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenResource(_)));

    let cancelled = h
        .services
        .orders
        .cancel(h.buyer, aggregate.order.id, Some("found it cheaper".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("found it cheaper"));

    let payment = h.payment(aggregate.order.id).await;
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refunded_amount, payment.amount);
    assert_eq!(
        h.sandbox.intent(&payment.intent_id).unwrap().state,
        SandboxIntentState::Refunded
    );
    assert_eq!(h.drain_notifications(), vec![NotificationKind::OrderCancelled]);

    let again = h
        .services
        .orders
        .cancel(h.buyer, aggregate.order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(again, AppError::BusinessRule(_)));
}

#[tokio::test]
async fn test_cannot_cancel_after_supplier_confirmed() {
    let h = harness();
    let aggregate = h.create_order(dec!(95.00), 2, dec!(10.00)).await;
    h.capture(&aggregate).await;
    let pin = aggregate.delivery.verification.pin().unwrap().to_string();
    h.services
        .delivery
        .supplier_confirm(h.supplier, aggregate.order.id, SupplierProof::Pin(pin))
        .await
        .unwrap();

    let err = h
        .services
        .orders
        .cancel(h.buyer, aggregate.order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BusinessRule(_)));
    assert_eq!(h.payment(aggregate.order.id).await.status, PaymentStatus::Held);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let h = harness();
    let err = h
        .services
        .orders
        .cancel(h.buyer, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
