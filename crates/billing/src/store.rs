//! Persistence of subscription records
//!
//! The engine writes through [`SubscriptionStore`] twice at most per pass:
//! an isolated customer commit while a first subscription is being set up,
//! and the full save issued by [`crate::ReconciliationEngine::save`].

use async_trait::async_trait;
use plansync_shared::{Plan, PlanId, SubscriptionOwner};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::record::SubscriptionRecord;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persist only the remote customer id and card summary
    async fn commit_customer(&self, record: &SubscriptionRecord) -> BillingResult<()>;

    /// Persist plan, price, customer id and card summary
    async fn save(&self, record: &SubscriptionRecord) -> BillingResult<()>;

    async fn find_by_customer_id(&self, customer_id: &str) -> BillingResult<Option<SubscriptionRecord>>;
}

/// Plans known to the application, used to rebuild records from stored ids
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: HashMap<PlanId, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn get(&self, id: PlanId) -> Option<&Plan> {
        self.plans.get(&id)
    }

    fn resolve(&self, id: Option<i64>) -> BillingResult<Option<Plan>> {
        match id.map(PlanId) {
            None => Ok(None),
            Some(id) => self
                .get(id)
                .cloned()
                .map(Some)
                .ok_or_else(|| BillingError::InvalidInput(format!("Unknown plan ID: {}", id))),
        }
    }
}

/// A stored subscription row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSubscription {
    pub id: Uuid,
    pub owner_id: String,
    pub plan_id: Option<i64>,
    pub current_price: Option<i64>,
    pub remote_customer_id: Option<String>,
    pub card_last_four: Option<String>,
}

impl StoredSubscription {
    fn into_record(self, catalog: &PlanCatalog) -> BillingResult<SubscriptionRecord> {
        let plan = catalog.resolve(self.plan_id)?;
        Ok(SubscriptionRecord::load(
            self.id,
            SubscriptionOwner::new(self.owner_id),
            plan,
            self.current_price,
            self.remote_customer_id,
            self.card_last_four,
        ))
    }
}

// =============================================================================
// Postgres
// =============================================================================

/// Postgres-backed store using the `subscriptions` table
pub struct PgSubscriptionStore {
    pool: PgPool,
    catalog: PlanCatalog,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool, catalog: PlanCatalog) -> Self {
        Self { pool, catalog }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn commit_customer(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, owner_id, stripe_id, last_four, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET stripe_id = COALESCE(EXCLUDED.stripe_id, subscriptions.stripe_id),
                last_four = EXCLUDED.last_four,
                updated_at = NOW()
            "#,
        )
        .bind(record.id)
        .bind(&record.owner.id)
        .bind(record.remote_customer_id.as_deref())
        .bind(record.card_last_four.as_deref())
        .execute(&self.pool)
        .await?;

        tracing::debug!(record_id = %record.id, "Committed remote customer for subscription");

        Ok(())
    }

    async fn save(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, owner_id, plan_id, current_price, stripe_id, last_four, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET plan_id = EXCLUDED.plan_id,
                current_price = EXCLUDED.current_price,
                stripe_id = COALESCE(EXCLUDED.stripe_id, subscriptions.stripe_id),
                last_four = EXCLUDED.last_four,
                updated_at = NOW()
            "#,
        )
        .bind(record.id)
        .bind(&record.owner.id)
        .bind(record.plan_id().map(|id| id.0))
        .bind(record.current_price)
        .bind(record.remote_customer_id.as_deref())
        .bind(record.card_last_four.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> BillingResult<Option<SubscriptionRecord>> {
        let row: Option<(Uuid, String, Option<i64>, Option<i64>, Option<String>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT id, owner_id, plan_id, current_price, stripe_id, last_four
                FROM subscriptions
                WHERE stripe_id = $1
                "#,
            )
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(id, owner_id, plan_id, current_price, remote_customer_id, card_last_four)| {
            StoredSubscription {
                id,
                owner_id,
                plan_id,
                current_price,
                remote_customer_id,
                card_last_four,
            }
            .into_record(&self.catalog)
        })
        .transpose()
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Which kind of write reached the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreWriteKind {
    Customer,
    Full,
}

/// One write observed by [`InMemorySubscriptionStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    pub kind: StoreWriteKind,
    pub record_id: Uuid,
    pub remote_customer_id: Option<String>,
    pub card_last_four: Option<String>,
    /// Whether the record's recursion guard was engaged during the write
    pub guard_engaged: bool,
}

/// In-memory store for tests and single-process embedding
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    rows: Mutex<HashMap<Uuid, StoredSubscription>>,
    writes: Mutex<Vec<StoreWrite>>,
    catalog: PlanCatalog,
}

impl InMemorySubscriptionStore {
    pub fn new(catalog: PlanCatalog) -> Self {
        Self {
            catalog,
            ..Default::default()
        }
    }

    pub fn get(&self, id: Uuid) -> Option<StoredSubscription> {
        self.rows.lock().ok().and_then(|rows| rows.get(&id).cloned())
    }

    /// Writes in the order they happened
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn record_write(&self, kind: StoreWriteKind, record: &SubscriptionRecord) -> BillingResult<()> {
        let mut writes = self.writes.lock().map_err(|_| poisoned())?;
        writes.push(StoreWrite {
            kind,
            record_id: record.id,
            remote_customer_id: record.remote_customer_id.clone(),
            card_last_four: record.card_last_four.clone(),
            guard_engaged: record.guard().is_engaged(),
        });
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn commit_customer(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        {
            let mut rows = self.rows.lock().map_err(|_| poisoned())?;
            let row = rows.entry(record.id).or_insert_with(|| StoredSubscription {
                id: record.id,
                owner_id: record.owner.id.clone(),
                plan_id: None,
                current_price: None,
                remote_customer_id: None,
                card_last_four: None,
            });
            if record.remote_customer_id.is_some() {
                row.remote_customer_id = record.remote_customer_id.clone();
            }
            row.card_last_four = record.card_last_four.clone();
        }
        self.record_write(StoreWriteKind::Customer, record)
    }

    async fn save(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        {
            let mut rows = self.rows.lock().map_err(|_| poisoned())?;
            // A recorded customer id is never cleared
            let remote_customer_id = record
                .remote_customer_id
                .clone()
                .or_else(|| rows.get(&record.id).and_then(|row| row.remote_customer_id.clone()));
            rows.insert(
                record.id,
                StoredSubscription {
                    id: record.id,
                    owner_id: record.owner.id.clone(),
                    plan_id: record.plan_id().map(|id| id.0),
                    current_price: record.current_price,
                    remote_customer_id,
                    card_last_four: record.card_last_four.clone(),
                },
            );
        }
        self.record_write(StoreWriteKind::Full, record)
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> BillingResult<Option<SubscriptionRecord>> {
        let row = {
            let rows = self.rows.lock().map_err(|_| poisoned())?;
            rows.values()
                .find(|row| row.remote_customer_id.as_deref() == Some(customer_id))
                .cloned()
        };
        row.map(|row| row.into_record(&self.catalog)).transpose()
    }
}

fn poisoned() -> BillingError {
    BillingError::Internal("Subscription store lock poisoned".to_string())
}
