//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres and the
//! [`OrderRepository`] implementation over the four order tables.

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime, Timeouts,
};
use orderflow_core::{stored_precision, Delivery, Item, Order, Payment, StoreError, StoreResult};
use orderflow_storage::{InsertOutcome, OrderRepository};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::FromSql;
use tokio_postgres::{NoTls, Row};

use crate::config::{env_flag, env_millis, env_parse, env_string};

/// Idempotent DDL for the order tables.
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_orders.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait, create and recycle timeout for pooled connections
    pub timeout: Duration,
    /// Server-side `statement_timeout` for every session
    pub statement_timeout: Duration,
    /// Run the schema bootstrap at startup
    pub apply_schema: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "orders".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(5),
            apply_schema: true,
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("ORDERFLOW_DB_URL").ok().filter(|u| !u.is_empty()),
            host: env_string("ORDERFLOW_DB_HOST", &defaults.host),
            port: env_parse("ORDERFLOW_DB_PORT", defaults.port),
            dbname: env_string("ORDERFLOW_DB_NAME", &defaults.dbname),
            user: env_string("ORDERFLOW_DB_USER", &defaults.user),
            password: std::env::var("ORDERFLOW_DB_PASSWORD").unwrap_or_default(),
            max_size: env_parse("ORDERFLOW_DB_POOL_SIZE", defaults.max_size),
            timeout: env_millis("ORDERFLOW_DB_TIMEOUT_MS", defaults.timeout),
            statement_timeout: env_millis(
                "ORDERFLOW_DB_STATEMENT_TIMEOUT_MS",
                defaults.statement_timeout,
            ),
            apply_schema: env_flag("ORDERFLOW_DB_APPLY_SCHEMA", defaults.apply_schema),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> StoreResult<Pool> {
        let mut cfg = Config::new();
        match &self.url {
            Some(url) => cfg.url = Some(url.clone()),
            None => {
                cfg.host = Some(self.host.clone());
                cfg.port = Some(self.port);
                cfg.dbname = Some(self.dbname.clone());
                cfg.user = Some(self.user.clone());
                cfg.password = Some(self.password.clone());
            }
        }
        cfg.options = Some(format!(
            "-c statement_timeout={}",
            self.statement_timeout.as_millis()
        ));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Classify a driver error for the retry decision.
fn map_pg_error(stage: &str, err: tokio_postgres::Error) -> StoreError {
    if err.is_closed() {
        return StoreError::Unavailable {
            reason: format!("{}: connection closed", stage),
        };
    }
    match err.code() {
        Some(code)
            if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED =>
        {
            StoreError::Conflict {
                stage: stage.to_string(),
                reason: err.to_string(),
            }
        }
        Some(code)
            if *code == SqlState::QUERY_CANCELED
                || *code == SqlState::ADMIN_SHUTDOWN
                || *code == SqlState::CANNOT_CONNECT_NOW
                || *code == SqlState::TOO_MANY_CONNECTIONS
                || code.code().starts_with("08") =>
        {
            StoreError::Unavailable {
                reason: format!("{}: {}", stage, err),
            }
        }
        Some(_) => StoreError::Rejected {
            stage: stage.to_string(),
            reason: err.to_string(),
        },
        // No SQLSTATE: I/O or protocol failure on the socket.
        None => StoreError::Unavailable {
            reason: format!("{}: {}", stage, err),
        },
    }
}

fn map_pool_error(err: PoolError) -> StoreError {
    tracing::warn!(error = %err, "Connection pool error");
    match err {
        PoolError::Backend(pg) => map_pg_error("acquire connection", pg),
        other => StoreError::Unavailable {
            reason: format!("acquire connection: {}", other),
        },
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str, order_uid: &str) -> StoreResult<T> {
    row.try_get(name).map_err(|e| StoreError::Corrupt {
        order_uid: order_uid.to_string(),
        reason: format!("column {}: {}", name, e),
    })
}

// ============================================================================
// REPOSITORY
// ============================================================================

const INSERT_DELIVERY: &str = "\
    INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
    ON CONFLICT (order_uid) DO NOTHING";

const INSERT_PAYMENT: &str = "\
    INSERT INTO payment (transaction, request_id, currency, provider, amount, payment_dt, \
                         bank, delivery_cost, goods_total, custom_fee) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
    ON CONFLICT (transaction) DO NOTHING";

const INSERT_ORDER: &str = "\
    INSERT INTO orders (order_uid, track_number, entry, delivery_uid, payment_transaction, \
                        locale, internal_signature, customer_id, delivery_service, shardkey, \
                        sm_id, date_created, oof_shard) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
    ON CONFLICT (order_uid) DO NOTHING";

const INSERT_ITEM: &str = "\
    INSERT INTO items (order_uid, chrt_id, track_number, price, rid, name, sale, size, \
                       total_price, nm_id, brand, status) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

const SELECT_ORDER: &str = "\
    SELECT order_uid, track_number, entry, delivery_uid, payment_transaction, locale, \
           internal_signature, customer_id, delivery_service, shardkey, sm_id, \
           date_created, oof_shard \
    FROM orders WHERE order_uid = $1";

const SELECT_DELIVERY: &str = "\
    SELECT name, phone, zip, city, address, region, email \
    FROM delivery WHERE order_uid = $1";

const SELECT_PAYMENT: &str = "\
    SELECT transaction, request_id, currency, provider, amount, payment_dt, bank, \
           delivery_cost, goods_total, custom_fee \
    FROM payment WHERE transaction = $1";

const SELECT_ITEMS: &str = "\
    SELECT chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, \
           brand, status \
    FROM items WHERE order_uid = $1 ORDER BY id";

/// Order repository backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: Pool,
}

impl PgOrderRepository {
    /// Create a new repository with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new repository from configuration.
    pub fn from_config(config: &DbConfig) -> StoreResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> StoreResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(map_pool_error)
    }

    /// Create the order tables if they do not exist yet.
    pub async fn apply_schema(&self) -> StoreResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| map_pg_error("apply schema", e))?;
        tracing::info!("Order schema applied");
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> StoreResult<InsertOutcome> {
        let mut conn = self.get_conn().await?;
        // Dropping the transaction without commit rolls it back.
        let tx = conn
            .transaction()
            .await
            .map_err(|e| map_pg_error("begin transaction", e))?;

        let d = &order.delivery;
        let stmt = tx
            .prepare_cached(INSERT_DELIVERY)
            .await
            .map_err(|e| map_pg_error("prepare delivery", e))?;
        tx.execute(
            &stmt,
            &[
                &order.order_uid,
                &d.name,
                &d.phone,
                &d.zip,
                &d.city,
                &d.address,
                &d.region,
                &d.email,
            ],
        )
        .await
        .map_err(|e| map_pg_error("insert delivery", e))?;

        let p = &order.payment;
        let stmt = tx
            .prepare_cached(INSERT_PAYMENT)
            .await
            .map_err(|e| map_pg_error("prepare payment", e))?;
        tx.execute(
            &stmt,
            &[
                &p.transaction,
                &p.request_id,
                &p.currency,
                &p.provider,
                &p.amount,
                &p.payment_dt,
                &p.bank,
                &p.delivery_cost,
                &p.goods_total,
                &p.custom_fee,
            ],
        )
        .await
        .map_err(|e| map_pg_error("insert payment", e))?;

        let stmt = tx
            .prepare_cached(INSERT_ORDER)
            .await
            .map_err(|e| map_pg_error("prepare orders", e))?;
        let date_created = stored_precision(order.date_created);
        let inserted = tx
            .execute(
                &stmt,
                &[
                    &order.order_uid,
                    &order.track_number,
                    &order.entry,
                    &order.order_uid,
                    &p.transaction,
                    &order.locale,
                    &order.internal_signature,
                    &order.customer_id,
                    &order.delivery_service,
                    &order.shardkey,
                    &order.sm_id,
                    &date_created,
                    &order.oof_shard,
                ],
            )
            .await
            .map_err(|e| map_pg_error("insert orders", e))?;

        if inserted == 0 {
            tx.commit()
                .await
                .map_err(|e| map_pg_error("commit transaction", e))?;
            tracing::debug!(order_uid = %order.order_uid, "Order row already present");
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let stmt = tx
            .prepare_cached(INSERT_ITEM)
            .await
            .map_err(|e| map_pg_error("prepare items", e))?;
        for item in &order.items {
            tx.execute(
                &stmt,
                &[
                    &order.order_uid,
                    &item.chrt_id,
                    &item.track_number,
                    &item.price,
                    &item.rid,
                    &item.name,
                    &item.sale,
                    &item.size,
                    &item.total_price,
                    &item.nm_id,
                    &item.brand,
                    &item.status,
                ],
            )
            .await
            .map_err(|e| map_pg_error("insert items", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_pg_error("commit transaction", e))?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_by_id(&self, order_uid: &str) -> StoreResult<Order> {
        let conn = self.get_conn().await?;

        let row = conn
            .query_opt(SELECT_ORDER, &[&order_uid])
            .await
            .map_err(|e| map_pg_error("select orders", e))?
            .ok_or_else(|| StoreError::NotFound {
                order_uid: order_uid.to_string(),
            })?;

        let delivery_uid: String = column(&row, "delivery_uid", order_uid)?;
        let payment_transaction: String = column(&row, "payment_transaction", order_uid)?;

        let delivery_row = conn
            .query_opt(SELECT_DELIVERY, &[&delivery_uid])
            .await
            .map_err(|e| map_pg_error("select delivery", e))?
            .ok_or_else(|| StoreError::Corrupt {
                order_uid: order_uid.to_string(),
                reason: "delivery row missing".to_string(),
            })?;
        let delivery = Delivery {
            name: column(&delivery_row, "name", order_uid)?,
            phone: column(&delivery_row, "phone", order_uid)?,
            zip: column(&delivery_row, "zip", order_uid)?,
            city: column(&delivery_row, "city", order_uid)?,
            address: column(&delivery_row, "address", order_uid)?,
            region: column(&delivery_row, "region", order_uid)?,
            email: column(&delivery_row, "email", order_uid)?,
        };

        let payment_row = conn
            .query_opt(SELECT_PAYMENT, &[&payment_transaction])
            .await
            .map_err(|e| map_pg_error("select payment", e))?
            .ok_or_else(|| StoreError::Corrupt {
                order_uid: order_uid.to_string(),
                reason: format!("payment {} missing", payment_transaction),
            })?;
        let payment = Payment {
            transaction: column(&payment_row, "transaction", order_uid)?,
            request_id: column(&payment_row, "request_id", order_uid)?,
            currency: column(&payment_row, "currency", order_uid)?,
            provider: column(&payment_row, "provider", order_uid)?,
            amount: column(&payment_row, "amount", order_uid)?,
            payment_dt: column(&payment_row, "payment_dt", order_uid)?,
            bank: column(&payment_row, "bank", order_uid)?,
            delivery_cost: column(&payment_row, "delivery_cost", order_uid)?,
            goods_total: column(&payment_row, "goods_total", order_uid)?,
            custom_fee: column(&payment_row, "custom_fee", order_uid)?,
        };

        let item_rows = conn
            .query(SELECT_ITEMS, &[&order_uid])
            .await
            .map_err(|e| map_pg_error("select items", e))?;
        let items = item_rows
            .iter()
            .map(|r| -> StoreResult<Item> {
                Ok(Item {
                    chrt_id: column(r, "chrt_id", order_uid)?,
                    track_number: column(r, "track_number", order_uid)?,
                    price: column(r, "price", order_uid)?,
                    rid: column(r, "rid", order_uid)?,
                    name: column(r, "name", order_uid)?,
                    sale: column(r, "sale", order_uid)?,
                    size: column(r, "size", order_uid)?,
                    total_price: column(r, "total_price", order_uid)?,
                    nm_id: column(r, "nm_id", order_uid)?,
                    brand: column(r, "brand", order_uid)?,
                    status: column(r, "status", order_uid)?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Order {
            order_uid: column(&row, "order_uid", order_uid)?,
            track_number: column(&row, "track_number", order_uid)?,
            entry: column(&row, "entry", order_uid)?,
            delivery,
            payment,
            items,
            locale: column(&row, "locale", order_uid)?,
            internal_signature: column(&row, "internal_signature", order_uid)?,
            customer_id: column(&row, "customer_id", order_uid)?,
            delivery_service: column(&row, "delivery_service", order_uid)?,
            shardkey: column(&row, "shardkey", order_uid)?,
            sm_id: column(&row, "sm_id", order_uid)?,
            date_created: column(&row, "date_created", order_uid)?,
            oof_shard: column(&row, "oof_shard", order_uid)?,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(|e| map_pg_error("health check", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert!(config.url.is_none());
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
        assert!(config.apply_schema);
    }

    #[test]
    fn test_schema_creates_all_tables() {
        for table in ["delivery", "payment", "orders", "items"] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "missing table {}",
                table
            );
        }
        assert!(SCHEMA_SQL.contains("BIGSERIAL"));
    }

    #[test]
    fn test_inserts_are_conflict_safe() {
        assert!(INSERT_DELIVERY.contains("ON CONFLICT (order_uid) DO NOTHING"));
        assert!(INSERT_PAYMENT.contains("ON CONFLICT (transaction) DO NOTHING"));
        assert!(INSERT_ORDER.contains("ON CONFLICT (order_uid) DO NOTHING"));
        assert!(SELECT_ITEMS.ends_with("ORDER BY id"));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // No connection is attempted until the first checkout.
        let repo = PgOrderRepository::from_config(&DbConfig::default()).unwrap();
        assert_eq!(repo.pool_size(), 0);
    }
}
