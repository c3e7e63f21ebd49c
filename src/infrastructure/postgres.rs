use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    result::{DatabaseErrorKind, Error as DieselError},
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::app_error::StoreError;
use crate::db::{DbConnection, DbPool};
use crate::domain::{
    activity::OrderActivity,
    delivery::{Delivery, DeliveryChanges, DeliveryTransition},
    dispute::{Dispute, DisputeResolution, DisputeStatus},
    order::{Order, OrderChanges, OrderItem, OrderTransition},
    payment::{Payment, PaymentChanges, PaymentTransition},
    ports::{
        ActivityRepository, DeliveryRepository, DisputeOpening, DisputeRepository, OrderFollowUp,
        OrderRepository, PaymentRepository, StoreResult, WebhookEffect, WebhookEventRepository,
        WebhookRecording, WebhookSettlement,
    },
    webhook::{WebhookCompletion, WebhookEvent, WebhookStatus},
};
use crate::models::{
    DeliveryChangeset, DeliveryEntity, DisputeEntity, OrderActivityEntity, OrderChangeset, OrderEntity,
    OrderItemEntity, PaymentChangeset, PaymentEntity, WebhookEventEntity,
};
use crate::schema::{deliveries, disputes, order_activities, order_items, orders, payments, webhook_events};

/// Why a multi-row transaction was rolled back.
#[derive(Debug)]
enum TxAbort {
    /// A conditional update matched no row.
    Guard,
    Store(StoreError),
}

impl From<DieselError> for TxAbort {
    fn from(err: DieselError) -> Self {
        TxAbort::Store(StoreError::Diesel(err))
    }
}

impl From<StoreError> for TxAbort {
    fn from(err: StoreError) -> Self {
        TxAbort::Store(err)
    }
}

/// Collapses a rolled back guard into `None`.
fn guarded<T>(result: Result<T, TxAbort>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(TxAbort::Guard) => Ok(None),
        Err(TxAbort::Store(err)) => Err(err),
    }
}

fn order_sources(transition: OrderTransition) -> Vec<&'static str> {
    transition.sources().iter().map(|s| s.as_str()).collect()
}

fn payment_sources(transition: PaymentTransition) -> Vec<&'static str> {
    transition.sources().iter().map(|s| s.as_str()).collect()
}

async fn update_order(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    transition: OrderTransition,
    changes: OrderChanges,
    now: DateTime<Utc>,
) -> Result<Option<OrderEntity>, DieselError> {
    diesel::update(
        orders::table
            .find(order_id)
            .filter(orders::status.eq_any(order_sources(transition))),
    )
    .set(OrderChangeset::new(
        Some(transition.target().to_string()),
        changes,
        now,
    ))
    .returning(OrderEntity::as_returning())
    .get_result(conn)
    .await
    .optional()
}

async fn update_payment(
    conn: &mut AsyncPgConnection,
    payment_id: Uuid,
    transition: PaymentTransition,
    changes: PaymentChanges,
    now: DateTime<Utc>,
) -> Result<Option<PaymentEntity>, DieselError> {
    diesel::update(
        payments::table
            .find(payment_id)
            .filter(payments::status.eq_any(payment_sources(transition))),
    )
    .set(PaymentChangeset::new(
        Some(transition.target().to_string()),
        changes,
        now,
    ))
    .returning(PaymentEntity::as_returning())
    .get_result(conn)
    .await
    .optional()
}

/// Completes an event still `processing` under `claimed_at`. Returns
/// whether the claim matched.
async fn finish_event(
    conn: &mut AsyncPgConnection,
    event_id: Uuid,
    claimed_at: DateTime<Utc>,
    completion: WebhookCompletion,
) -> Result<bool, DieselError> {
    let matched = diesel::update(
        webhook_events::table.find(event_id).filter(
            webhook_events::status
                .eq(WebhookStatus::Processing.as_str())
                .and(webhook_events::claimed_at.eq(claimed_at)),
        ),
    )
    .set((
        webhook_events::status.eq(completion.status.as_str()),
        webhook_events::error.eq(completion.error),
        webhook_events::processed_at.eq(completion.processed_at),
        webhook_events::processing_ms.eq(completion.processing_ms),
    ))
    .execute(conn)
    .await?;
    if matched == 0 {
        return Ok(false);
    }

    if let Some(payment_id) = completion.payment_id {
        diesel::update(webhook_events::table.find(event_id))
            .set(webhook_events::payment_id.eq(payment_id))
            .execute(conn)
            .await?;
    }
    if let Some(transaction_id) = completion.transaction_id {
        diesel::update(webhook_events::table.find(event_id))
            .set(webhook_events::transaction_id.eq(transaction_id))
            .execute(conn)
            .await?;
    }
    Ok(true)
}

/// Postgres adapter behind a bb8 pool. Every transition is a conditional
/// `UPDATE .. WHERE status IN (..)`, compound operations run in one
/// transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<DbConnection<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert_order(&self, order: Order) -> StoreResult<Order> {
        let conn = &mut self.conn().await?;
        let entity = diesel::insert_into(orders::table)
            .values(OrderEntity::from(&order))
            .returning(OrderEntity::as_returning())
            .get_result(conn)
            .await?;
        entity.try_into()
    }

    async fn insert_order_items(&self, items: Vec<OrderItem>) -> StoreResult<Vec<OrderItem>> {
        let conn = &mut self.conn().await?;
        let entities = items
            .iter()
            .map(OrderItemEntity::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let inserted = diesel::insert_into(order_items::table)
            .values(&entities)
            .returning(OrderItemEntity::as_returning())
            .get_results(conn)
            .await?;
        inserted.into_iter().map(OrderItem::try_from).collect()
    }

    async fn find_order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let conn = &mut self.conn().await?;
        orders::table
            .find(order_id)
            .select(OrderEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_order_items(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        let conn = &mut self.conn().await?;
        order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order(order_items::created_at.asc())
            .select(OrderItemEntity::as_select())
            .load(conn)
            .await?
            .into_iter()
            .map(OrderItem::try_from)
            .collect()
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        transition: OrderTransition,
        changes: OrderChanges,
    ) -> StoreResult<Option<Order>> {
        let conn = &mut self.conn().await?;
        update_order(conn, order_id, transition, changes, Utc::now())
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn annotate_order(&self, order_id: Uuid, changes: OrderChanges) -> StoreResult<Option<Order>> {
        let conn = &mut self.conn().await?;
        diesel::update(orders::table.find(order_id))
            .set(OrderChangeset::new(None, changes, Utc::now()))
            .returning(OrderEntity::as_returning())
            .get_result(conn)
            .await
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<u64> {
        let conn = &mut self.conn().await?;
        let deleted = diesel::delete(order_items::table.filter(order_items::order_id.eq(order_id)))
            .execute(conn)
            .await?;
        Ok(deleted as u64)
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<u64> {
        let conn = &mut self.conn().await?;
        let deleted = diesel::delete(orders::table.find(order_id))
            .execute(conn)
            .await?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl DeliveryRepository for PgStore {
    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery> {
        let conn = &mut self.conn().await?;
        diesel::insert_into(deliveries::table)
            .values(DeliveryEntity::from(&delivery))
            .returning(DeliveryEntity::as_returning())
            .get_result(conn)
            .await?
            .try_into()
    }

    async fn find_delivery_by_order(&self, order_id: Uuid) -> StoreResult<Option<Delivery>> {
        let conn = &mut self.conn().await?;
        deliveries::table
            .filter(deliveries::order_id.eq(order_id))
            .select(DeliveryEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(Delivery::try_from)
            .transpose()
    }

    async fn transition_delivery(
        &self,
        delivery_id: Uuid,
        transition: DeliveryTransition,
        changes: DeliveryChanges,
    ) -> StoreResult<Option<Delivery>> {
        let conn = &mut self.conn().await?;
        diesel::update(
            deliveries::table
                .find(delivery_id)
                .filter(deliveries::stage.eq(transition.source().as_str())),
        )
        .set(DeliveryChangeset::new(transition, changes, Utc::now()))
        .returning(DeliveryEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .map(Delivery::try_from)
        .transpose()
    }

    async fn delete_delivery(&self, delivery_id: Uuid) -> StoreResult<u64> {
        let conn = &mut self.conn().await?;
        let deleted = diesel::delete(deliveries::table.find(delivery_id))
            .execute(conn)
            .await?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert_payment(&self, payment: Payment) -> StoreResult<Payment> {
        let conn = &mut self.conn().await?;
        diesel::insert_into(payments::table)
            .values(PaymentEntity::from(&payment))
            .returning(PaymentEntity::as_returning())
            .get_result(conn)
            .await?
            .try_into()
    }

    async fn find_payment_by_order(&self, order_id: Uuid) -> StoreResult<Option<Payment>> {
        let conn = &mut self.conn().await?;
        payments::table
            .filter(payments::order_id.eq(order_id))
            .select(PaymentEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        let conn = &mut self.conn().await?;
        payments::table
            .filter(payments::intent_id.eq(intent_id))
            .select(PaymentEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
        changes: PaymentChanges,
    ) -> StoreResult<Option<Payment>> {
        let conn = &mut self.conn().await?;
        update_payment(conn, payment_id, transition, changes, Utc::now())
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn annotate_payment(&self, payment_id: Uuid, changes: PaymentChanges) -> StoreResult<Option<Payment>> {
        let conn = &mut self.conn().await?;
        diesel::update(payments::table.find(payment_id))
            .set(PaymentChangeset::new(None, changes, Utc::now()))
            .returning(PaymentEntity::as_returning())
            .get_result(conn)
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn delete_payment(&self, payment_id: Uuid) -> StoreResult<u64> {
        let conn = &mut self.conn().await?;
        let deleted = diesel::delete(payments::table.find(payment_id))
            .execute(conn)
            .await?;
        Ok(deleted as u64)
    }

    async fn release_escrow(
        &self,
        payment_id: Uuid,
        order_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Payment, Order)>> {
        let conn = &mut self.conn().await?;
        let result = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let payment = update_payment(
                        conn,
                        payment_id,
                        PaymentTransition::Release,
                        PaymentChanges {
                            released_at: Some(released_at),
                            ..Default::default()
                        },
                        released_at,
                    )
                    .await?
                    .ok_or(TxAbort::Guard)?;

                    let order = update_order(
                        conn,
                        order_id,
                        OrderTransition::Complete,
                        OrderChanges::default(),
                        released_at,
                    )
                    .await?
                    .ok_or(TxAbort::Guard)?;

                    Ok::<(Payment, Order), TxAbort>((payment.try_into()?, order.try_into()?))
                })
            })
            .await;
        guarded(result)
    }
}

#[async_trait]
impl DisputeRepository for PgStore {
    async fn open_dispute(&self, dispute: Dispute, payment_id: Uuid) -> StoreResult<DisputeOpening> {
        let conn = &mut self.conn().await?;
        let result = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let now = dispute.created_at;

                    // Serialises concurrent openings for the same order.
                    let order: Order = orders::table
                        .find(dispute.order_id)
                        .select(OrderEntity::as_select())
                        .for_update()
                        .first(conn)
                        .await?
                        .try_into()?;

                    let active = disputes::table
                        .filter(disputes::order_id.eq(dispute.order_id))
                        .filter(disputes::status.ne(DisputeStatus::Resolved.as_str()))
                        .select(DisputeEntity::as_select())
                        .first(conn)
                        .await
                        .optional()?;
                    if let Some(active) = active {
                        return Ok(DisputeOpening::ActiveDisputeExists(active.try_into()?));
                    }
                    if !OrderTransition::OpenDispute.allows(order.status) {
                        return Ok(DisputeOpening::OrderNotDisputable(order.status));
                    }

                    let payment: Payment = payments::table
                        .find(payment_id)
                        .select(PaymentEntity::as_select())
                        .for_update()
                        .first(conn)
                        .await?
                        .try_into()?;
                    if !PaymentTransition::Freeze.allows(payment.status) {
                        return Ok(DisputeOpening::PaymentNotHeld(payment.status));
                    }

                    let inserted = diesel::insert_into(disputes::table)
                        .values(DisputeEntity::from(&dispute))
                        .returning(DisputeEntity::as_returning())
                        .get_result(conn)
                        .await?;
                    let payment = update_payment(
                        conn,
                        payment_id,
                        PaymentTransition::Freeze,
                        PaymentChanges::default(),
                        now,
                    )
                    .await?
                    .ok_or(TxAbort::Guard)?;
                    let order = update_order(
                        conn,
                        dispute.order_id,
                        OrderTransition::OpenDispute,
                        OrderChanges::default(),
                        now,
                    )
                    .await?
                    .ok_or(TxAbort::Guard)?;

                    Ok::<DisputeOpening, TxAbort>(DisputeOpening::Opened {
                        dispute: inserted.try_into()?,
                        payment: payment.try_into()?,
                        order: order.try_into()?,
                    })
                })
            })
            .await;

        match result {
            Ok(opening) => Ok(opening),
            Err(TxAbort::Store(StoreError::Diesel(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            )))) => Err(StoreError::Corrupt(
                "an active dispute appeared while opening another".to_string(),
            )),
            Err(TxAbort::Guard) => Err(StoreError::Corrupt(
                "locked rows changed while opening a dispute".to_string(),
            )),
            Err(TxAbort::Store(err)) => Err(err),
        }
    }

    async fn find_dispute(&self, dispute_id: Uuid) -> StoreResult<Option<Dispute>> {
        let conn = &mut self.conn().await?;
        disputes::table
            .find(dispute_id)
            .select(DisputeEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(Dispute::try_from)
            .transpose()
    }

    async fn find_active_dispute(&self, order_id: Uuid) -> StoreResult<Option<Dispute>> {
        let conn = &mut self.conn().await?;
        disputes::table
            .filter(disputes::order_id.eq(order_id))
            .filter(disputes::status.ne(DisputeStatus::Resolved.as_str()))
            .select(DisputeEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(Dispute::try_from)
            .transpose()
    }

    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        payment_id: Uuid,
        resolution: DisputeResolution,
        payment_changes: PaymentChanges,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Payment, Order)>> {
        let (payment_transition, order_transition) = resolution.transitions();
        let conn = &mut self.conn().await?;
        let result = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let dispute = diesel::update(
                        disputes::table
                            .find(dispute_id)
                            .filter(disputes::status.ne(DisputeStatus::Resolved.as_str())),
                    )
                    .set((
                        disputes::status.eq(DisputeStatus::Resolved.as_str()),
                        disputes::resolution.eq(resolution.as_str()),
                        disputes::resolved_at.eq(resolved_at),
                        disputes::updated_at.eq(resolved_at),
                    ))
                    .returning(DisputeEntity::as_returning())
                    .get_result(conn)
                    .await
                    .optional()?
                    .ok_or(TxAbort::Guard)?;

                    let payment = update_payment(
                        conn,
                        payment_id,
                        payment_transition,
                        payment_changes,
                        resolved_at,
                    )
                    .await?
                    .filter(|p| p.order_id == dispute.order_id)
                    .ok_or(TxAbort::Guard)?;

                    let order = update_order(
                        conn,
                        dispute.order_id,
                        order_transition,
                        OrderChanges::default(),
                        resolved_at,
                    )
                    .await?
                    .ok_or(TxAbort::Guard)?;

                    Ok::<(Dispute, Payment, Order), TxAbort>((
                        dispute.try_into()?,
                        payment.try_into()?,
                        order.try_into()?,
                    ))
                })
            })
            .await;
        guarded(result)
    }
}

#[async_trait]
impl WebhookEventRepository for PgStore {
    async fn record_webhook_event(&self, event: WebhookEvent) -> StoreResult<WebhookRecording> {
        let conn = &mut self.conn().await?;
        let inserted = diesel::insert_into(webhook_events::table)
            .values(WebhookEventEntity::from(&event))
            .on_conflict(webhook_events::provider_event_id)
            .do_nothing()
            .returning(WebhookEventEntity::as_returning())
            .get_result(conn)
            .await
            .optional()?;

        if let Some(inserted) = inserted {
            return Ok(WebhookRecording::Inserted(inserted.try_into()?));
        }

        let existing = webhook_events::table
            .filter(webhook_events::provider_event_id.eq(event.provider_event_id.clone()))
            .select(WebhookEventEntity::as_select())
            .first(conn)
            .await?;
        Ok(WebhookRecording::Duplicate(existing.try_into()?))
    }

    async fn reclaim_webhook_event(
        &self,
        event_id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>> {
        let conn = &mut self.conn().await?;
        diesel::update(
            webhook_events::table.find(event_id).filter(
                webhook_events::status.eq(WebhookStatus::Failed.as_str()).or(webhook_events::status
                    .eq(WebhookStatus::Processing.as_str())
                    .and(webhook_events::claimed_at.lt(stale_before))),
            ),
        )
        .set((
            webhook_events::status.eq(WebhookStatus::Processing.as_str()),
            webhook_events::claimed_at.eq(now),
            webhook_events::error.eq(None::<String>),
        ))
        .returning(WebhookEventEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .map(WebhookEvent::try_from)
        .transpose()
    }

    async fn complete_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        completion: WebhookCompletion,
    ) -> StoreResult<bool> {
        let conn = &mut self.conn().await?;
        let finished = conn
            .transaction(move |conn| {
                Box::pin(async move { finish_event(conn, event_id, claimed_at, completion).await })
            })
            .await?;
        Ok(finished)
    }

    async fn settle_webhook_event(
        &self,
        event_id: Uuid,
        claimed_at: DateTime<Utc>,
        effect: WebhookEffect,
        completion: WebhookCompletion,
    ) -> StoreResult<WebhookSettlement> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                // Row lock first: a concurrent reclaim waits until this commits.
                let claimed: Option<Uuid> = webhook_events::table
                    .find(event_id)
                    .filter(
                        webhook_events::status
                            .eq(WebhookStatus::Processing.as_str())
                            .and(webhook_events::claimed_at.eq(claimed_at)),
                    )
                    .select(webhook_events::id)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;
                if claimed.is_none() {
                    return Ok(WebhookSettlement::ClaimLost);
                }

                let now = completion.processed_at;
                let Some(payment) =
                    update_payment(conn, effect.payment_id, effect.transition, effect.changes, now).await?
                else {
                    let status: String = payments::table
                        .find(effect.payment_id)
                        .select(payments::status)
                        .first(conn)
                        .await?;
                    return Ok(WebhookSettlement::PaymentMoved(status.parse()?));
                };

                let order_id = payment.order_id;
                let moved = match effect.order {
                    Some(OrderFollowUp::Transition(transition, changes)) => {
                        update_order(conn, order_id, transition, changes, now).await?
                    }
                    Some(OrderFollowUp::TransitionOrAnnotate(transition, changes)) => {
                        match update_order(conn, order_id, transition, changes.clone(), now).await? {
                            Some(order) => Some(order),
                            None => Some(
                                diesel::update(orders::table.find(order_id))
                                    .set(OrderChangeset::new(None, changes, now))
                                    .returning(OrderEntity::as_returning())
                                    .get_result(conn)
                                    .await?,
                            ),
                        }
                    }
                    None => None,
                };
                let order = match moved {
                    Some(order) => order,
                    None => {
                        orders::table
                            .find(order_id)
                            .select(OrderEntity::as_select())
                            .first(conn)
                            .await?
                    }
                };

                let payment = Payment::try_from(payment)?;
                finish_event(
                    conn,
                    event_id,
                    claimed_at,
                    WebhookCompletion {
                        payment_id: Some(payment.id),
                        transaction_id: payment.transaction_id.clone(),
                        ..completion
                    },
                )
                .await?;
                Ok::<WebhookSettlement, StoreError>(WebhookSettlement::Applied {
                    payment,
                    order: order.try_into()?,
                })
            })
        })
        .await
    }

    async fn find_webhook_event(&self, provider_event_id: &str) -> StoreResult<Option<WebhookEvent>> {
        let conn = &mut self.conn().await?;
        webhook_events::table
            .filter(webhook_events::provider_event_id.eq(provider_event_id))
            .select(WebhookEventEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .map(WebhookEvent::try_from)
            .transpose()
    }

    async fn recent_webhook_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>> {
        let conn = &mut self.conn().await?;
        webhook_events::table
            .order(webhook_events::received_at.desc())
            .limit(limit)
            .select(WebhookEventEntity::as_select())
            .load(conn)
            .await?
            .into_iter()
            .map(WebhookEvent::try_from)
            .collect()
    }
}

#[async_trait]
impl ActivityRepository for PgStore {
    async fn append_activity(&self, activity: OrderActivity) -> StoreResult<()> {
        let conn = &mut self.conn().await?;
        diesel::insert_into(order_activities::table)
            .values(OrderActivityEntity::from(&activity))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_activities(&self, order_id: Uuid) -> StoreResult<Vec<OrderActivity>> {
        let conn = &mut self.conn().await?;
        order_activities::table
            .filter(order_activities::order_id.eq(order_id))
            .order(order_activities::created_at.asc())
            .select(OrderActivityEntity::as_select())
            .load(conn)
            .await?
            .into_iter()
            .map(OrderActivity::try_from)
            .collect()
    }
}
