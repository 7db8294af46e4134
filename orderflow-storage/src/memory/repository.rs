//! In-memory order repository with the same write semantics as the
//! relational store, plus fault injection for tests.

use async_trait::async_trait;
use orderflow_core::{
    stored_precision, Delivery, Item, Order, Payment, StoreError, StoreResult, Timestamp,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::traits::{InsertOutcome, OrderRepository};

/// Points inside `insert` where an injected fault can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStage {
    Delivery,
    Payment,
    Order,
    Items,
}

#[derive(Debug, Clone)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    delivery_uid: String,
    payment_transaction: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i64,
    date_created: Timestamp,
    oof_shard: String,
}

#[derive(Debug, Clone)]
struct ItemRow {
    id: i64,
    order_uid: String,
    item: Item,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    deliveries: HashMap<String, Delivery>,
    payments: HashMap<String, Payment>,
    orders: HashMap<String, OrderRow>,
    items: Vec<ItemRow>,
    next_item_id: i64,
}

#[derive(Debug, Default)]
struct Faults {
    insert: VecDeque<(InsertStage, StoreError)>,
    get: VecDeque<StoreError>,
    ping: Option<StoreError>,
}

#[derive(Debug, Default)]
struct Counters {
    insert_calls: usize,
    get_calls: usize,
}

/// Four-table order store held in memory.
///
/// Writes are staged on a copy of the tables and swapped in only when every
/// stage succeeded, mirroring a rolled-back transaction on failure.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Mutex<Counters>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `insert` fail with `error` when it reaches `stage`.
    ///
    /// Faults queue up; each `insert` call consumes at most one.
    pub async fn fail_insert_at(&self, stage: InsertStage, error: StoreError) {
        self.faults.lock().await.insert.push_back((stage, error));
    }

    /// Make the next `get_by_id` fail with `error`.
    pub async fn fail_next_get(&self, error: StoreError) {
        self.faults.lock().await.get.push_back(error);
    }

    /// Make every `ping` fail until cleared with `None`.
    pub async fn set_ping_failure(&self, error: Option<StoreError>) {
        self.faults.lock().await.ping = error;
    }

    pub async fn insert_calls(&self) -> usize {
        self.counters.lock().await.insert_calls
    }

    pub async fn get_calls(&self) -> usize {
        self.counters.lock().await.get_calls
    }

    /// Row counts as `(delivery, payment, orders, items)`.
    pub async fn row_counts(&self) -> (usize, usize, usize, usize) {
        let tables = self.tables.lock().await;
        (
            tables.deliveries.len(),
            tables.payments.len(),
            tables.orders.len(),
            tables.items.len(),
        )
    }

    /// Remove the delivery row of an order, leaving the order row dangling.
    pub async fn corrupt_delivery(&self, order_uid: &str) {
        self.tables.lock().await.deliveries.remove(order_uid);
    }

    async fn take_insert_fault(&self) -> Option<(InsertStage, StoreError)> {
        self.faults.lock().await.insert.pop_front()
    }
}

fn check_stage(
    fault: &Option<(InsertStage, StoreError)>,
    stage: InsertStage,
) -> StoreResult<()> {
    match fault {
        Some((at, error)) if *at == stage => Err(error.clone()),
        _ => Ok(()),
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> StoreResult<InsertOutcome> {
        self.counters.lock().await.insert_calls += 1;
        let fault = self.take_insert_fault().await;

        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();

        check_stage(&fault, InsertStage::Delivery)?;
        staged
            .deliveries
            .entry(order.order_uid.clone())
            .or_insert_with(|| order.delivery.clone());

        check_stage(&fault, InsertStage::Payment)?;
        staged
            .payments
            .entry(order.payment.transaction.clone())
            .or_insert_with(|| order.payment.clone());

        check_stage(&fault, InsertStage::Order)?;
        if staged.orders.contains_key(&order.order_uid) {
            *tables = staged;
            return Ok(InsertOutcome::AlreadyPresent);
        }
        staged.orders.insert(
            order.order_uid.clone(),
            OrderRow {
                order_uid: order.order_uid.clone(),
                track_number: order.track_number.clone(),
                entry: order.entry.clone(),
                delivery_uid: order.order_uid.clone(),
                payment_transaction: order.payment.transaction.clone(),
                locale: order.locale.clone(),
                internal_signature: order.internal_signature.clone(),
                customer_id: order.customer_id.clone(),
                delivery_service: order.delivery_service.clone(),
                shardkey: order.shardkey.clone(),
                sm_id: order.sm_id,
                date_created: stored_precision(order.date_created),
                oof_shard: order.oof_shard.clone(),
            },
        );

        for item in &order.items {
            check_stage(&fault, InsertStage::Items)?;
            staged.next_item_id += 1;
            let id = staged.next_item_id;
            staged.items.push(ItemRow {
                id,
                order_uid: order.order_uid.clone(),
                item: item.clone(),
            });
        }

        *tables = staged;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_by_id(&self, order_uid: &str) -> StoreResult<Order> {
        self.counters.lock().await.get_calls += 1;
        if let Some(error) = self.faults.lock().await.get.pop_front() {
            return Err(error);
        }

        let tables = self.tables.lock().await;
        let row = tables
            .orders
            .get(order_uid)
            .ok_or_else(|| StoreError::NotFound {
                order_uid: order_uid.to_string(),
            })?;

        let delivery = tables
            .deliveries
            .get(&row.delivery_uid)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt {
                order_uid: order_uid.to_string(),
                reason: "delivery row missing".to_string(),
            })?;
        let payment = tables
            .payments
            .get(&row.payment_transaction)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt {
                order_uid: order_uid.to_string(),
                reason: format!("payment {} missing", row.payment_transaction),
            })?;

        let mut items: Vec<&ItemRow> = tables
            .items
            .iter()
            .filter(|r| r.order_uid == order_uid)
            .collect();
        items.sort_by_key(|r| r.id);

        Ok(Order {
            order_uid: row.order_uid.clone(),
            track_number: row.track_number.clone(),
            entry: row.entry.clone(),
            delivery,
            payment,
            items: items.into_iter().map(|r| r.item.clone()).collect(),
            locale: row.locale.clone(),
            internal_signature: row.internal_signature.clone(),
            customer_id: row.customer_id.clone(),
            delivery_service: row.delivery_service.clone(),
            shardkey: row.shardkey.clone(),
            sm_id: row.sm_id,
            date_created: row.date_created,
            oof_shard: row.oof_shard.clone(),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        match &self.faults.lock().await.ping {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
