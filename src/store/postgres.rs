use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;

use super::{OrderFilter, OrderMutation, OrderStore, ProviderMutation, StoreError};
use crate::domain::{AutomationLog, LogStatus, Order, PendingAsyncOrder, PendingStatus, Provider};

// ============================================================================
// Postgres-backed Order Store
// ============================================================================
//
// Read-modify-write goes through `SELECT ... FOR UPDATE` inside a transaction;
// a mutation error drops the transaction, which rolls it back.
//
// ============================================================================

const ORDER_COLUMNS: &str = "id, correlation_id, status, payment_status, payment_key, amount, \
    refunded_amount, currency, customer_name, customer_email, customer_phone, product_sku, quantity, \
    provider_used, provider_order_id, esim_iccid, esim_activation_code, esim_qr_code, retry_count, \
    error_message, created, updated, completed_at";

const PROVIDER_COLUMNS: &str = "id, name, priority, is_active, circuit_breaker_state, success_rate, \
    consecutive_failures, last_failure_at, probe_started_at, updated";

const PENDING_COLUMNS: &str = "request_id, order_id, provider_id, status, created_at, resolved_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    async fn write_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, payment_key = $4, refunded_amount = $5,
                provider_used = $6, provider_order_id = $7, esim_iccid = $8, esim_activation_code = $9,
                esim_qr_code = $10, retry_count = $11, error_message = $12, updated = $13, completed_at = $14
             WHERE id = $1",
        )
        .bind(&order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_key)
        .bind(order.refunded_amount)
        .bind(&order.provider_used)
        .bind(&order.provider_order_id)
        .bind(&order.esim_iccid)
        .bind(&order.esim_activation_code)
        .bind(&order.esim_qr_code)
        .bind(order.retry_count)
        .bind(&order.error_message)
        .bind(order.updated)
        .bind(order.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_provider(tx: &mut Transaction<'_, Postgres>, provider: &Provider) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE providers SET circuit_breaker_state = $2, success_rate = $3, consecutive_failures = $4,
                last_failure_at = $5, probe_started_at = $6, updated = $7
             WHERE id = $1",
        )
        .bind(&provider.id)
        .bind(provider.circuit_breaker_state.as_str())
        .bind(provider.success_rate)
        .bind(provider.consecutive_failures)
        .bind(provider.last_failure_at)
        .bind(provider.probe_started_at)
        .bind(provider.updated)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn parse<T: std::str::FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::Corrupt)
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: row.try_get("id")?,
        correlation_id: row.try_get("correlation_id")?,
        status: parse(row, "status")?,
        payment_status: parse(row, "payment_status")?,
        payment_key: row.try_get("payment_key")?,
        amount: row.try_get("amount")?,
        refunded_amount: row.try_get("refunded_amount")?,
        currency: row.try_get("currency")?,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        customer_phone: row.try_get("customer_phone")?,
        product_sku: row.try_get("product_sku")?,
        quantity: row.try_get("quantity")?,
        provider_used: row.try_get("provider_used")?,
        provider_order_id: row.try_get("provider_order_id")?,
        esim_iccid: row.try_get("esim_iccid")?,
        esim_activation_code: row.try_get("esim_activation_code")?,
        esim_qr_code: row.try_get("esim_qr_code")?,
        retry_count: row.try_get("retry_count")?,
        error_message: row.try_get("error_message")?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn provider_from_row(row: &PgRow) -> Result<Provider, StoreError> {
    Ok(Provider {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        priority: row.try_get("priority")?,
        is_active: row.try_get("is_active")?,
        circuit_breaker_state: parse(row, "circuit_breaker_state")?,
        success_rate: row.try_get("success_rate")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        last_failure_at: row.try_get("last_failure_at")?,
        probe_started_at: row.try_get("probe_started_at")?,
        updated: row.try_get("updated")?,
    })
}

fn pending_from_row(row: &PgRow) -> Result<PendingAsyncOrder, StoreError> {
    Ok(PendingAsyncOrder {
        request_id: row.try_get("request_id")?,
        order_id: row.try_get("order_id")?,
        provider_id: row.try_get("provider_id")?,
        status: parse(row, "status")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn log_from_row(row: &PgRow) -> Result<AutomationLog, StoreError> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "success" => LogStatus::Success,
        "failed" => LogStatus::Failed,
        other => return Err(StoreError::Corrupt(format!("unknown log status: {other}"))),
    };
    let metadata: Json<Map<String, Value>> = row.try_get("metadata")?;
    Ok(AutomationLog {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        step_name: row.try_get("step_name")?,
        status,
        provider_name: row.try_get("provider_name")?,
        error_message: row.try_get("error_message")?,
        metadata: metadata.0,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                     $19, $20, $21, $22, $23)"
        ))
        .bind(&order.id)
        .bind(&order.correlation_id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_key)
        .bind(order.amount)
        .bind(order.refunded_amount)
        .bind(&order.currency)
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(&order.customer_phone)
        .bind(&order.product_sku)
        .bind(order.quantity)
        .bind(&order.provider_used)
        .bind(&order.provider_order_id)
        .bind(&order.esim_iccid)
        .bind(&order.esim_activation_code)
        .bind(&order.esim_qr_code)
        .bind(order.retry_count)
        .bind(&order.error_message)
        .bind(order.created)
        .bind(order.updated)
        .bind(order.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(format!("order {}", order.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_order(&self, id: &str, mutation: OrderMutation) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

        let mut order = order_from_row(&row)?;
        mutation(&mut order)?;
        Self::write_order(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));

        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
            query.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(payment_status) = filter.payment_status {
            query.push(" AND payment_status = ").push_bind(payment_status.as_str());
        }
        if let Some(cutoff) = filter.updated_before {
            query.push(" AND updated < ").push_bind(cutoff);
        }
        if let Some(needle) = &filter.correlation_contains {
            query.push(" AND strpos(correlation_id, ").push_bind(needle.clone()).push(") > 0");
        }
        query.push(" ORDER BY created ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO providers ({PROVIDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, priority = EXCLUDED.priority, is_active = EXCLUDED.is_active,
                updated = EXCLUDED.updated"
        ))
        .bind(&provider.id)
        .bind(&provider.name)
        .bind(provider.priority)
        .bind(provider.is_active)
        .bind(provider.circuit_breaker_state.as_str())
        .bind(provider.success_rate)
        .bind(provider.consecutive_failures)
        .bind(provider.last_failure_at)
        .bind(provider.probe_started_at)
        .bind(provider.updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_provider(&self, id: &str) -> Result<Option<Provider>, StoreError> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(provider_from_row).transpose()
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY priority ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(provider_from_row).collect()
    }

    async fn update_provider(&self, id: &str, mutation: ProviderMutation) -> Result<Provider, StoreError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("provider {id}")))?;

        let mut provider = provider_from_row(&row)?;
        mutation(&mut provider)?;
        Self::write_provider(&mut tx, &provider).await?;
        tx.commit().await?;
        Ok(provider)
    }

    async fn insert_pending(&self, pending: &PendingAsyncOrder) -> Result<(), StoreError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO pending_async_orders ({PENDING_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (request_id) WHERE status = 'pending' DO NOTHING"
        ))
        .bind(&pending.request_id)
        .bind(&pending.order_id)
        .bind(&pending.provider_id)
        .bind(pending.status.as_str())
        .bind(pending.created_at)
        .bind(pending.resolved_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok(());
        }

        let holder: Option<String> = sqlx::query_scalar(
            "SELECT order_id FROM pending_async_orders WHERE request_id = $1 AND status = 'pending'",
        )
        .bind(&pending.request_id)
        .fetch_optional(&self.pool)
        .await?;

        match holder {
            Some(order_id) if order_id == pending.order_id => Ok(()),
            Some(order_id) => Err(StoreError::Duplicate(format!(
                "request {} is pending for order {order_id}",
                pending.request_id
            ))),
            // Resolved between the insert and the check; nothing left to do.
            None => Ok(()),
        }
    }

    async fn find_pending(&self, request_id: &str) -> Result<Option<PendingAsyncOrder>, StoreError> {
        let sql = format!(
            "SELECT {PENDING_COLUMNS} FROM pending_async_orders WHERE request_id = $1
             ORDER BY (status = 'pending') DESC, created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(request_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(pending_from_row).transpose()
    }

    async fn resolve_pending(&self, request_id: &str, status: PendingStatus) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE pending_async_orders SET status = $2, resolved_at = now()
             WHERE request_id = $1 AND status = 'pending'",
        )
        .bind(request_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn append_log(&self, log: &AutomationLog) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO automation_logs
                (id, order_id, step_name, status, provider_name, error_message, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&log.id)
        .bind(&log.order_id)
        .bind(&log.step_name)
        .bind(log.status.as_str())
        .bind(&log.provider_name)
        .bind(&log.error_message)
        .bind(Json(&log.metadata))
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs(&self, order_id: &str) -> Result<Vec<AutomationLog>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, step_name, status, provider_name, error_message, metadata, created_at
             FROM automation_logs WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn try_acquire_lock(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let acquired = sqlx::query(
            "INSERT INTO cron_locks (name, holder, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3))
             ON CONFLICT (name) DO UPDATE SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
             WHERE cron_locks.expires_at < now()",
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(acquired > 0)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        let released = sqlx::query("DELETE FROM cron_locks WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(released > 0)
    }
}
