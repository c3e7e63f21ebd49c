mod common;

use common::*;
use escrow_orderservice::{
    app_error::AppError,
    domain::{
        notification::NotificationKind,
        order::{OrderChanges, OrderStatus, OrderTransition},
        payment::PaymentStatus,
        ports::{DisputeRepository, OrderRepository},
        webhook::WebhookStatus,
    },
    services::{
        delivery::{BuyerConfirmationOutcome, BuyerDecision, SupplierProof},
        ledger::ReleaseOutcome,
        orders::OrderAggregate,
    },
};
use futures::future::join_all;
use rust_decimal_macros::dec;

/// Captured order the supplier has handed over.
async fn handed_over(h: &Harness) -> OrderAggregate {
    let aggregate = h.create_order(dec!(40.00), 1, dec!(5.00)).await;
    h.capture(&aggregate).await;
    h.services
        .delivery
        .supplier_confirm(h.supplier, aggregate.order.id, SupplierProof::Photo(jpeg()))
        .await
        .unwrap();
    aggregate
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_releases_pay_out_once() {
    let h = harness();
    let aggregate = handed_over(&h).await;
    let order_id = aggregate.order.id;
    h.store
        .transition_order(order_id, OrderTransition::MarkDelivered, OrderChanges::default())
        .await
        .unwrap()
        .unwrap();

    let tasks = (0..4).map(|_| {
        let ledger = h.services.ledger.clone();
        let payment_id = aggregate.payment.id;
        tokio::spawn(async move { ledger.release(payment_id, order_id).await })
    });
    let outcomes: Vec<ReleaseOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let released = outcomes
        .iter()
        .filter(|o| matches!(o, ReleaseOutcome::Released { .. }))
        .count();
    assert_eq!(released, 1);
    assert_eq!(outcomes.len() - released, 3);
    assert!(outcomes.iter().all(|o| match o {
        ReleaseOutcome::Released { payment, .. } | ReleaseOutcome::AlreadyReleased { payment } =>
            payment.status == PaymentStatus::Released,
    }));
    assert_eq!(h.order(order_id).await.status, OrderStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_acceptance_releases_once() {
    let mut h = harness();
    let aggregate = handed_over(&h).await;
    let order_id = aggregate.order.id;
    h.drain_notifications();

    let tasks = (0..2).map(|_| {
        let delivery = h.services.delivery.clone();
        let buyer = h.buyer;
        tokio::spawn(async move { delivery.buyer_confirm(buyer, order_id, BuyerDecision::Accept).await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|joined| joined.unwrap()).collect();

    let released = results
        .iter()
        .filter(|r| matches!(r, Ok(BuyerConfirmationOutcome::Released { .. })))
        .count();
    assert_eq!(released, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::BusinessRule(message)) if message == "buyer already confirmed")));

    let payment = h.payment(order_id).await;
    assert_eq!(payment.status, PaymentStatus::Released);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Completed);
    let released_notices = h
        .drain_notifications()
        .into_iter()
        .filter(|kind| *kind == NotificationKind::EscrowReleased)
        .count();
    assert_eq!(released_notices, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_deliveries_of_one_event_apply_once() {
    let mut h = harness();
    let aggregate = h.create_order(dec!(40.00), 1, dec!(5.00)).await;
    let order_id = aggregate.order.id;
    h.drain_notifications();
    let body = provider_event(
        "evt_parallel_capture",
        "payment.captured",
        &aggregate.payment.intent_id,
        Some("txn_parallel"),
        None,
    );
    let signature = h.sandbox.sign(&body);

    let tasks = (0..4).map(|_| {
        let webhooks = h.services.webhooks.clone();
        let body = body.clone();
        let signature = signature.clone();
        tokio::spawn(async move { webhooks.receive(&body, Some(&signature)).await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|joined| joined.unwrap()).collect();

    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(receipt) if !receipt.duplicate))
        .count();
    assert_eq!(applied, 1);
    // Losers either see the finished row or are told to retry.
    assert!(results
        .iter()
        .all(|r| matches!(r, Ok(_) | Err(AppError::Other(_)))));

    let audit = h.store.webhook_events().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].status, WebhookStatus::Processed);
    assert_eq!(h.payment(order_id).await.status, PaymentStatus::Held);
    assert_eq!(h.drain_notifications(), vec![NotificationKind::PaymentCaptured]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_dispute_openings_leave_one_active() {
    let h = harness();
    let aggregate = handed_over(&h).await;
    let order_id = aggregate.order.id;

    let tasks = [h.buyer, h.supplier, h.buyer, h.supplier].map(|actor| {
        let disputes = h.services.disputes.clone();
        tokio::spawn(async move { disputes.open(actor, order_id, "goods do not match the order").await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|joined| joined.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(AppError::BusinessRule(_)))));

    assert_eq!(h.store.disputes_for_order(order_id).await.len(), 1);
    assert!(h.store.find_active_dispute(order_id).await.unwrap().is_some());
    assert_eq!(h.payment(order_id).await.status, PaymentStatus::Frozen);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Disputed);
}
