use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_error::{AppError, Result};
use crate::config::EscrowConfig;
use crate::domain::activity::ActivityKind;
use crate::domain::delivery::{Delivery, DeliveryStage, Recipient, Verification};
use crate::domain::money::Money;
use crate::domain::notification::NotificationKind;
use crate::domain::order::{
    DeliveryAddress, DeliveryWindow, Order, OrderChanges, OrderItem, OrderStatus, OrderTransition,
    generate_order_number,
};
use crate::domain::payment::{Payment, PaymentTransition};
use crate::domain::ports::{
    DeliveryRepository, DisputeRepository, GatewayRef, IntentMetadata, OrderRepository, PaymentRepository,
    RepositoryRef,
};
use crate::services::ledger::EscrowLedger;
use crate::services::outbox::Outbox;
use crate::services::record_activity;
use crate::services::saga::CompensationStack;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrderItemReq {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i64,
    #[schema(value_type = String, example = "12.50")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOrderReq {
    pub supplier_id: Uuid,
    pub items: Vec<OrderItemReq>,
    pub delivery_date: NaiveDate,
    pub window_starts_at: NaiveTime,
    pub window_ends_at: NaiveTime,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub address_line: String,
    pub latitude: f64,
    pub longitude: f64,
    pub vehicle_type: String,
    #[schema(value_type = String, example = "7.50")]
    pub delivery_fee: Decimal,
}

/// Everything written for one order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderAggregate {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub delivery: Delivery,
    pub payment: Payment,
}

struct ValidatedItem {
    req: OrderItemReq,
    quantity: u32,
    unit_price: Money,
    line_total: Money,
}

fn amount_too_large(what: &str) -> AppError {
    AppError::BadRequest(format!("{what} exceeds the maximum of {}", Money::MAX))
}

/// A request that passed validation, with money already typed.
struct ValidatedOrder {
    items: Vec<ValidatedItem>,
    subtotal: Money,
    delivery_fee: Money,
    total: Money,
    window: DeliveryWindow,
    address: DeliveryAddress,
    recipient: Recipient,
}

fn normalize_phone(phone: &str) -> Option<String> {
    let compact: String = phone.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    let valid = (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    valid.then_some(compact)
}

fn validate(buyer_id: Uuid, req: &CreateOrderReq, today: NaiveDate) -> Result<ValidatedOrder> {
    if buyer_id == req.supplier_id {
        return Err(AppError::BadRequest("buyer and supplier must differ".to_string()));
    }
    if req.items.is_empty() {
        return Err(AppError::BadRequest("an order needs at least one item".to_string()));
    }

    let mut items = Vec::with_capacity(req.items.len());
    for item in &req.items {
        if item.product_name.trim().is_empty() {
            return Err(AppError::BadRequest("product name must not be empty".to_string()));
        }
        let quantity = i32::try_from(item.quantity)
            .ok()
            .and_then(|q| u32::try_from(q).ok())
            .filter(|q| *q >= 1)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "quantity for product {} must be at least 1, got {}",
                    item.product_id, item.quantity
                ))
            })?;
        let unit_price = Money::positive(item.unit_price)?;
        let line_total = unit_price
            .checked_mul(quantity)
            .ok_or_else(|| amount_too_large(&format!("line total for product {}", item.product_id)))?;
        items.push(ValidatedItem {
            req: item.clone(),
            quantity,
            unit_price,
            line_total,
        });
    }
    let subtotal = items
        .iter()
        .try_fold(Money::ZERO, |acc, item| acc.checked_add(item.line_total))
        .ok_or_else(|| amount_too_large("order subtotal"))?;
    let delivery_fee = Money::new(req.delivery_fee)?;
    let total = subtotal
        .checked_add(delivery_fee)
        .ok_or_else(|| amount_too_large("order total"))?;

    if req.delivery_date < today {
        return Err(AppError::BadRequest(format!(
            "delivery date {} is in the past",
            req.delivery_date
        )));
    }
    if req.window_ends_at <= req.window_starts_at {
        return Err(AppError::BadRequest(
            "delivery window must end after it starts".to_string(),
        ));
    }
    if req.address_line.trim().is_empty() {
        return Err(AppError::BadRequest("delivery address must not be empty".to_string()));
    }
    if !(-90.0..=90.0).contains(&req.latitude) || !(-180.0..=180.0).contains(&req.longitude) {
        return Err(AppError::BadRequest(format!(
            "coordinates ({}, {}) are out of range",
            req.latitude, req.longitude
        )));
    }
    if req.recipient_name.trim().is_empty() {
        return Err(AppError::BadRequest("recipient name must not be empty".to_string()));
    }
    let phone = normalize_phone(&req.recipient_phone).ok_or_else(|| {
        AppError::BadRequest(format!("recipient phone `{}` is malformed", req.recipient_phone))
    })?;
    if req.vehicle_type.trim().is_empty() {
        return Err(AppError::BadRequest("vehicle type must not be empty".to_string()));
    }

    Ok(ValidatedOrder {
        items,
        subtotal,
        delivery_fee,
        total,
        window: DeliveryWindow {
            date: req.delivery_date,
            starts_at: req.window_starts_at,
            ends_at: req.window_ends_at,
        },
        address: DeliveryAddress {
            line: req.address_line.trim().to_string(),
            latitude: req.latitude,
            longitude: req.longitude,
        },
        recipient: Recipient {
            name: req.recipient_name.trim().to_string(),
            phone,
        },
    })
}

/// Creates an order with its items, delivery and escrow payment as one
/// all-or-nothing unit, and cancels orders before the handover.
#[derive(Clone)]
pub struct OrderAggregateBuilder {
    repo: RepositoryRef,
    gateway: GatewayRef,
    ledger: EscrowLedger,
    outbox: Outbox,
    escrow: EscrowConfig,
}

impl OrderAggregateBuilder {
    pub fn new(
        repo: RepositoryRef,
        gateway: GatewayRef,
        ledger: EscrowLedger,
        outbox: Outbox,
        escrow: EscrowConfig,
    ) -> Self {
        Self {
            repo,
            gateway,
            ledger,
            outbox,
            escrow,
        }
    }

    pub async fn create(&self, buyer_id: Uuid, req: CreateOrderReq) -> Result<OrderAggregate> {
        let now = Utc::now();
        let validated = validate(buyer_id, &req, now.date_naive())?;

        let mut compensations = CompensationStack::new();
        let written = self
            .write_aggregate(buyer_id, &req, validated, &mut compensations)
            .await;
        match written {
            Ok(aggregate) => {
                compensations.commit();
                tracing::info!(
                    order_id = %aggregate.order.id,
                    order_number = %aggregate.order.order_number,
                    total = %aggregate.order.total,
                    verification = %aggregate.delivery.verification.method(),
                    "Order created"
                );
                self.outbox.publish(&aggregate.order, NotificationKind::OrderConfirmed);
                Ok(aggregate)
            }
            Err(err) => {
                tracing::warn!("Order creation failed, compensating {} steps: {}", compensations.len(), err);
                let report = compensations.unwind().await;
                if report.is_clean() {
                    Err(err)
                } else {
                    tracing::error!("Order creation left residue: {}", report.failed_steps());
                    Err(AppError::PartialFailure(format!(
                        "order creation failed ({err}) and could not undo: {}",
                        report.failed_steps()
                    )))
                }
            }
        }
    }

    async fn write_aggregate(
        &self,
        buyer_id: Uuid,
        req: &CreateOrderReq,
        validated: ValidatedOrder,
        compensations: &mut CompensationStack,
    ) -> Result<OrderAggregate> {
        let now = Utc::now();
        let total = validated.total;

        let order = self
            .repo
            .insert_order(Order {
                id: Uuid::new_v4(),
                order_number: generate_order_number(now),
                buyer_id,
                supplier_id: req.supplier_id,
                status: OrderStatus::Pending,
                subtotal: validated.subtotal,
                delivery_fee: validated.delivery_fee,
                total,
                currency: self.escrow.currency.clone(),
                delivery_window: validated.window.clone(),
                delivery_address: validated.address,
                vehicle_type: req.vehicle_type.trim().to_string(),
                cancellation_reason: None,
                paid_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;
        let repo = self.repo.clone();
        let order_id = order.id;
        compensations.push("order", move || async move {
            repo.delete_order(order_id).await?;
            Ok(())
        });

        let items = validated
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: item.req.product_id,
                product_name: item.req.product_name.trim().to_string(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
                created_at: now,
            })
            .collect();
        let items = self.repo.insert_order_items(items).await?;
        let repo = self.repo.clone();
        compensations.push("order items", move || async move {
            repo.delete_order_items(order_id).await?;
            Ok(())
        });

        // Fixed here so a later threshold change never flips the method.
        let verification = Verification::for_total(
            total,
            self.escrow.verification_threshold,
            self.escrow.pin_length,
        );
        let delivery = self
            .repo
            .insert_delivery(Delivery {
                id: Uuid::new_v4(),
                order_id,
                stage: DeliveryStage::AwaitingSupplierConfirmation,
                window: validated.window,
                recipient: validated.recipient,
                verification,
                supplier_confirmed_at: None,
                buyer_confirmed_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;
        let repo = self.repo.clone();
        let delivery_id = delivery.id;
        compensations.push("delivery", move || async move {
            repo.delete_delivery(delivery_id).await?;
            Ok(())
        });

        let metadata = IntentMetadata::from([
            ("order_id".to_string(), order_id.to_string()),
            ("order_number".to_string(), order.order_number.clone()),
        ]);
        let intent_id = self
            .gateway
            .create_intent(total, &order.currency, &metadata)
            .await?;
        let gateway = self.gateway.clone();
        let voided_intent = intent_id.clone();
        compensations.push("payment intent", move || async move {
            gateway.refund(&voided_intent, total).await?;
            Ok(())
        });
        self.gateway.hold(&intent_id).await?;

        let payment = self
            .repo
            .insert_payment(Payment::new(
                order_id,
                self.gateway.provider_name(),
                intent_id,
                total,
                order.currency.clone(),
                now,
            ))
            .await?;
        let repo = self.repo.clone();
        let payment_id = payment.id;
        compensations.push("payment", move || async move {
            repo.delete_payment(payment_id).await?;
            Ok(())
        });

        let order = self
            .repo
            .transition_order(order_id, OrderTransition::Confirm, OrderChanges::default())
            .await?
            .ok_or_else(|| AppError::BusinessRule(format!("order {order_id} left `pending` during creation")))?;

        record_activity(
            &self.repo,
            order_id,
            Some(buyer_id),
            ActivityKind::OrderCreated,
            format!("Order {} created for {} {}", order.order_number, total, order.currency),
        )
        .await;
        record_activity(
            &self.repo,
            order_id,
            None,
            ActivityKind::PaymentAuthorized,
            format!("Escrow hold placed with {}", payment.provider),
        )
        .await;
        record_activity(
            &self.repo,
            order_id,
            None,
            ActivityKind::OrderConfirmed,
            "Order confirmed",
        )
        .await;

        Ok(OrderAggregate {
            order,
            items,
            delivery,
            payment,
        })
    }

    /// Buyer cancellation, allowed until the supplier confirms the handover
    /// and while no dispute is active.
    pub async fn cancel(&self, actor_id: Uuid, order_id: Uuid, reason: Option<String>) -> Result<Order> {
        let order = self
            .repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;
        if !order.is_buyer(actor_id) {
            return Err(AppError::ForbiddenResource(
                "only the buyer can cancel an order".to_string(),
            ));
        }
        if self.repo.find_active_dispute(order_id).await?.is_some() {
            return Err(AppError::BusinessRule(
                "an order with an active dispute cannot be cancelled".to_string(),
            ));
        }
        OrderTransition::Cancel.check(order.status)?;

        let payment = self
            .repo
            .find_payment_by_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment for order {order_id}")))?;
        PaymentTransition::Refund.check(payment.status)?;

        self.gateway.refund(&payment.intent_id, payment.remaining()).await?;

        // Money is back with the buyer from here on; local mismatches are
        // partial failures, not rule violations.
        if self.ledger.refund_in_full(&payment).await?.is_none() {
            return Err(AppError::PartialFailure(format!(
                "intent {} refunded but payment {} changed state concurrently",
                payment.intent_id, payment.id
            )));
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "cancelled by buyer".to_string());
        let cancelled = self
            .repo
            .transition_order(order_id, OrderTransition::Cancel, OrderChanges::with_reason(&reason))
            .await?
            .ok_or_else(|| {
                AppError::PartialFailure(format!(
                    "payment for order {order_id} refunded but the order could not be cancelled"
                ))
            })?;

        tracing::info!(%order_id, %reason, "Order cancelled");
        record_activity(
            &self.repo,
            order_id,
            Some(actor_id),
            ActivityKind::OrderCancelled,
            format!("Cancelled: {reason}"),
        )
        .await;
        self.outbox.publish(&cancelled, NotificationKind::OrderCancelled);
        Ok(cancelled)
    }
}
