//! Shared credit ledger.
//!
//! A finite daily pool of processing credits shared by every user, kept
//! consistent between the fast store (race arbiter) and the durable store
//! (record). All mutating operations serialize through a [`PriorityLock`]
//! so only one critical section runs at a time across the process.
//!
//! Atomicity: the fast store's decrement-and-return decides contended
//! consumes. The durable store is a synchronous follower; a failed follower
//! write is logged and left to reconciliation, never rolled back.

pub mod plock;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use filepress_core::constants::{
    DAILY_SHARED_CREDIT_LIMIT, SHARED_CREDIT_KEY_PREFIX, SHARED_CREDIT_KEY_TTL_SECS,
    TABLE_CREDIT_TRANSACTIONS, TABLE_SHARED_CREDITS,
};
use filepress_core::types::Credits;
use filepress_core::FilepressError;
use filepress_store::{filters, DurableStore, FastStore};

pub use plock::{PriorityGuard, PriorityLock};

// ── Lock priorities ──────────────────────────────────────────────────────────

pub const PRIO_READ: u8 = 0;
pub const PRIO_CONSUME: u8 = 1;
pub const PRIO_REFUND: u8 = 2;
pub const PRIO_ADMIN: u8 = 3;

/// Reconciliation snapshot of both stores, taken without mutating either.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsComparison {
    pub fast: Option<Credits>,
    pub durable: Option<Credits>,
    pub diff: Option<Credits>,
    pub equal: bool,
}

/// The shared credit ledger.
pub struct SharedCredits<F: FastStore, D: DurableStore> {
    fast: Arc<F>,
    durable: Arc<D>,
    lock: PriorityLock,
    daily_limit: Credits,
    updated_by: String,
}

impl<F: FastStore, D: DurableStore> SharedCredits<F, D> {
    pub fn new(fast: Arc<F>, durable: Arc<D>, updated_by: &str) -> Self {
        Self {
            fast,
            durable,
            lock: PriorityLock::new(),
            daily_limit: DAILY_SHARED_CREDIT_LIMIT,
            updated_by: updated_by.to_string(),
        }
    }

    /// Override the daily pool size (tests, staged rollouts).
    pub fn with_daily_limit(mut self, limit: Credits) -> Self {
        self.daily_limit = limit;
        self
    }

    /// Today's UTC date key, `YYYY-MM-DD`.
    pub fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    fn credit_key(date: &str) -> String {
        format!("{SHARED_CREDIT_KEY_PREFIX}:{date}")
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Remaining credits for today. Preference order: fast store, durable
    /// store (repopulating the fast store), then lazy initialization when
    /// `should_init` is set.
    pub async fn get_credits_left(&self, should_init: bool)
        -> Result<Option<Credits>, FilepressError>
    {
        let _guard = self.lock.acquire(PRIO_READ).await;
        self.credits_left_locked(should_init).await
    }

    async fn credits_left_locked(&self, should_init: bool)
        -> Result<Option<Credits>, FilepressError>
    {
        let date = Self::today();
        let key = Self::credit_key(&date);

        if let Some(raw) = self.fast.get(&key).await? {
            let left = raw
                .parse::<Credits>()
                .map_err(|_| FilepressError::FastStore(format!("{key} is not an integer")))?;
            return Ok(Some(left));
        }

        let rows = self
            .durable
            .select(TABLE_SHARED_CREDITS, &filters([("date", date.as_str())]))
            .await?;
        if let Some(left) = rows.first().and_then(|r| r["credits_left"].as_i64()) {
            self.fast
                .set_ex(&key, &left.to_string(), SHARED_CREDIT_KEY_TTL_SECS)
                .await?;
            return Ok(Some(left));
        }

        if should_init {
            return self.init_locked(None).await.map(Some);
        }
        Ok(None)
    }

    // ── Init ─────────────────────────────────────────────────────────────────

    /// Upsert today's pool to `amount` (positive) or the daily limit, then
    /// write the fast-store key and append an `init` transaction. If the
    /// durable upsert fails the fast store is left untouched.
    pub async fn init_daily_credits(&self, amount: Option<Credits>)
        -> Result<Credits, FilepressError>
    {
        let _guard = self.lock.acquire(PRIO_ADMIN).await;
        self.init_locked(amount).await
    }

    async fn init_locked(&self, amount: Option<Credits>) -> Result<Credits, FilepressError> {
        let amount = amount.filter(|a| *a > 0).unwrap_or(self.daily_limit);
        let date = Self::today();
        let now = Utc::now().to_rfc3339();

        self.durable
            .upsert(
                TABLE_SHARED_CREDITS,
                json!({
                    "date": date,
                    "credits_left": amount,
                    "created_at": now,
                    "created_by": self.updated_by,
                    "last_updated_at": now,
                    "last_updated_by": self.updated_by,
                    "comment": "daily init",
                }),
                "date",
            )
            .await?;

        self.fast
            .set_ex(&Self::credit_key(&date), &amount.to_string(), SHARED_CREDIT_KEY_TTL_SECS)
            .await?;

        self.append_transaction(&date, "init", amount, Some("daily init"), None, None)
            .await;

        info!(date = %date, credits = amount, "shared credit pool initialized");
        Ok(amount)
    }

    // ── Consume ──────────────────────────────────────────────────────────────

    /// Atomically attempt to take `amount` credits from today's pool.
    ///
    /// Returns `true` when the post-decrement balance is still non-negative;
    /// otherwise compensates with an equal increment and returns `false`.
    /// A transient negative is never observable outside the critical section.
    pub async fn consume_credits(
        &self,
        amount: Credits,
        reason: Option<&str>,
        ref_id: Option<&str>,
        details: Option<Value>,
    ) -> Result<bool, FilepressError> {
        if amount < 0 {
            return Err(FilepressError::InvalidAmount(amount));
        }
        let _guard = self.lock.acquire(PRIO_CONSUME).await;

        // Lazily bring up today's pool so the first consume of a day is
        // charged against the full limit rather than an absent key.
        self.credits_left_locked(true).await?;

        let date = Self::today();
        let key = Self::credit_key(&date);

        let next = self.fast.decr_by(&key, amount).await?;
        if next < 0 {
            self.fast.incr_by(&key, amount).await?;
            return Ok(false);
        }

        self.mirror_durable(&date, next, reason).await;
        self.append_transaction(&date, "consume", amount, reason, ref_id, details)
            .await;
        Ok(true)
    }

    // ── Refund ───────────────────────────────────────────────────────────────

    /// Return `amount` credits to today's pool. A no-op when the pool has not
    /// been initialized for the day (no fast-store key).
    pub async fn refund_credits(&self, amount: Credits, reason: Option<&str>)
        -> Result<(), FilepressError>
    {
        if amount < 0 {
            return Err(FilepressError::InvalidAmount(amount));
        }
        let _guard = self.lock.acquire(PRIO_REFUND).await;

        let date = Self::today();
        let key = Self::credit_key(&date);
        if !self.fast.exists(&key).await? {
            return Ok(());
        }

        let next = self.fast.incr_by(&key, amount).await?;
        self.mirror_durable(&date, next, reason).await;
        self.append_transaction(&date, "refund", amount, reason, None, None)
            .await;
        Ok(())
    }

    // ── Reconciliation ───────────────────────────────────────────────────────

    /// Snapshot both stores for drift diagnostics. Mutates nothing.
    pub async fn compare_credits_left(&self) -> Result<CreditsComparison, FilepressError> {
        let _guard = self.lock.acquire(PRIO_ADMIN).await;

        let date = Self::today();
        let fast = match self.fast.get(&Self::credit_key(&date)).await? {
            Some(raw) => raw.parse::<Credits>().ok(),
            None => None,
        };
        let durable = self
            .durable
            .select(TABLE_SHARED_CREDITS, &filters([("date", date.as_str())]))
            .await?
            .first()
            .and_then(|r| r["credits_left"].as_i64());

        let diff = match (fast, durable) {
            (Some(f), Some(d)) => Some((d - f).abs()),
            _ => None,
        };
        Ok(CreditsComparison { fast, durable, equal: diff == Some(0), diff })
    }

    /// Transaction rows for `date`, oldest first as inserted. For any date,
    /// `sum(init) − sum(consume) + sum(refund)` converges on the durable
    /// balance.
    pub async fn transactions(&self, date: &str) -> Result<Vec<Value>, FilepressError> {
        self.durable
            .select(TABLE_CREDIT_TRANSACTIONS, &filters([("date", date)]))
            .await
    }

    // ── Follower writes ──────────────────────────────────────────────────────

    /// Mirror the post-operation balance to the durable store. Failures are
    /// logged and left to reconciliation; the fast store already moved.
    async fn mirror_durable(&self, date: &str, credits_left: Credits, reason: Option<&str>) {
        let result = self
            .durable
            .upsert(
                TABLE_SHARED_CREDITS,
                json!({
                    "date": date,
                    "credits_left": credits_left,
                    "last_updated_at": Utc::now().to_rfc3339(),
                    "last_updated_by": self.updated_by,
                    "comment": reason,
                }),
                "date",
            )
            .await;
        if let Err(e) = result {
            warn!(date, credits_left, error = %e, "durable credit mirror failed");
        }
    }

    async fn append_transaction(
        &self,
        date: &str,
        tx_type: &str,
        amount: Credits,
        comment: Option<&str>,
        ref_id: Option<&str>,
        details: Option<Value>,
    ) {
        let row = json!({
            "date": date,
            "type": tx_type,
            "amount": amount,
            "comment": comment,
            "ref_id": ref_id,
            "details": details,
            "created_at": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.durable.insert(TABLE_CREDIT_TRANSACTIONS, row).await {
            warn!(date, tx_type, amount, error = %e, "credit transaction append failed");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use filepress_store::memory::{MemoryDurableStore, MemoryFastStore};

    fn ledger() -> SharedCredits<MemoryFastStore, MemoryDurableStore> {
        SharedCredits::new(
            Arc::new(MemoryFastStore::new()),
            Arc::new(MemoryDurableStore::new()),
            "test",
        )
    }

    async fn tx_rows(
        ledger: &SharedCredits<MemoryFastStore, MemoryDurableStore>,
        tx_type: &str,
    ) -> usize {
        ledger
            .durable
            .rows(TABLE_CREDIT_TRANSACTIONS)
            .await
            .iter()
            .filter(|r| r["type"] == tx_type)
            .count()
    }

    #[tokio::test]
    async fn lazy_init_on_first_read() {
        let ledger = ledger();
        assert_eq!(ledger.get_credits_left(true).await.unwrap(), Some(70));
        assert_eq!(tx_rows(&ledger, "init").await, 1);

        let rows = ledger.durable.rows(TABLE_SHARED_CREDITS).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["credits_left"], 70);
    }

    #[tokio::test]
    async fn read_without_init_returns_none() {
        let ledger = ledger();
        assert_eq!(ledger.get_credits_left(false).await.unwrap(), None);
        assert!(ledger.durable.rows(TABLE_SHARED_CREDITS).await.is_empty());
    }

    #[tokio::test]
    async fn read_repopulates_fast_store_from_durable() {
        let ledger = ledger();
        ledger
            .durable
            .upsert(
                TABLE_SHARED_CREDITS,
                json!({"date": SharedCredits::<MemoryFastStore, MemoryDurableStore>::today(),
                       "credits_left": 33}),
                "date",
            )
            .await
            .unwrap();

        assert_eq!(ledger.get_credits_left(false).await.unwrap(), Some(33));
        // Second read must come from the fast store.
        let key = SharedCredits::<MemoryFastStore, MemoryDurableStore>::credit_key(
            &SharedCredits::<MemoryFastStore, MemoryDurableStore>::today(),
        );
        assert_eq!(ledger.fast.get(&key).await.unwrap(), Some("33".to_string()));
    }

    #[tokio::test]
    async fn init_prefers_positive_amount_else_limit() {
        let ledger = ledger();
        assert_eq!(ledger.init_daily_credits(Some(100)).await.unwrap(), 100);
        assert_eq!(ledger.init_daily_credits(Some(0)).await.unwrap(), 70);
        assert_eq!(ledger.init_daily_credits(None).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn init_failure_leaves_fast_store_untouched() {
        let ledger = ledger();
        ledger.durable.fail_writes(true);
        assert!(ledger.init_daily_credits(None).await.is_err());
        assert_eq!(ledger.get_credits_left(false).await.unwrap_or(None), None);
    }

    #[tokio::test]
    async fn consume_decrements_and_logs() {
        let ledger = ledger();
        ledger.init_daily_credits(None).await.unwrap();

        let taken = ledger
            .consume_credits(20, Some("upscaleimage"), Some("job-1"), None)
            .await
            .unwrap();
        assert!(taken);
        assert_eq!(ledger.get_credits_left(false).await.unwrap(), Some(50));
        assert_eq!(tx_rows(&ledger, "consume").await, 1);

        let rows = ledger.durable.rows(TABLE_SHARED_CREDITS).await;
        assert_eq!(rows[0]["credits_left"], 50);
    }

    #[tokio::test]
    async fn consume_beyond_pool_compensates() {
        let ledger = ledger().with_daily_limit(10);
        ledger.init_daily_credits(None).await.unwrap();

        let taken = ledger.consume_credits(20, None, None, None).await.unwrap();
        assert!(!taken);
        assert_eq!(ledger.get_credits_left(false).await.unwrap(), Some(10));
        assert_eq!(tx_rows(&ledger, "consume").await, 0, "failed consume must not log");
    }

    #[tokio::test]
    async fn consume_zero_is_noop_on_balance_but_logged() {
        let ledger = ledger();
        ledger.init_daily_credits(None).await.unwrap();

        assert!(ledger.consume_credits(0, None, None, None).await.unwrap());
        assert_eq!(ledger.get_credits_left(false).await.unwrap(), Some(70));
        assert_eq!(tx_rows(&ledger, "consume").await, 1);
    }

    #[tokio::test]
    async fn negative_amounts_rejected() {
        let ledger = ledger();
        assert!(matches!(
            ledger.consume_credits(-1, None, None, None).await,
            Err(FilepressError::InvalidAmount(-1))
        ));
        assert!(ledger.refund_credits(-1, None).await.is_err());
    }

    #[tokio::test]
    async fn refund_before_init_is_noop() {
        let ledger = ledger();
        ledger.refund_credits(20, Some("task.failed")).await.unwrap();
        assert!(ledger.durable.rows(TABLE_SHARED_CREDITS).await.is_empty());
        assert_eq!(tx_rows(&ledger, "refund").await, 0);
    }

    #[tokio::test]
    async fn consume_then_refund_restores_balance() {
        let ledger = ledger();
        ledger.init_daily_credits(None).await.unwrap();

        assert!(ledger.consume_credits(20, None, Some("job-9"), None).await.unwrap());
        ledger.refund_credits(20, Some("task.failed")).await.unwrap();

        assert_eq!(ledger.get_credits_left(false).await.unwrap(), Some(70));
        assert_eq!(tx_rows(&ledger, "refund").await, 1);
    }

    #[tokio::test]
    async fn durable_failure_never_rolls_back_fast_store() {
        let ledger = ledger();
        ledger.init_daily_credits(None).await.unwrap();
        ledger.durable.fail_writes(true);

        assert!(ledger.consume_credits(20, None, None, None).await.unwrap());
        ledger.durable.fail_writes(false);

        let cmp = ledger.compare_credits_left().await.unwrap();
        assert_eq!(cmp.fast, Some(50));
        assert_eq!(cmp.durable, Some(70));
        assert_eq!(cmp.diff, Some(20));
        assert!(!cmp.equal);
    }

    #[tokio::test]
    async fn compare_is_read_only() {
        let ledger = ledger();
        ledger.init_daily_credits(None).await.unwrap();
        let before = ledger.durable.rows(TABLE_SHARED_CREDITS).await;
        let cmp = ledger.compare_credits_left().await.unwrap();
        assert!(cmp.equal);
        assert_eq!(ledger.durable.rows(TABLE_SHARED_CREDITS).await, before);
    }

    #[tokio::test]
    async fn transaction_log_balances_against_the_pool() {
        let ledger = ledger();
        ledger.init_daily_credits(None).await.unwrap();
        assert!(ledger.consume_credits(20, None, Some("a"), None).await.unwrap());
        assert!(ledger.consume_credits(10, None, Some("b"), None).await.unwrap());
        ledger.refund_credits(20, Some("task.failed")).await.unwrap();

        let date = SharedCredits::<MemoryFastStore, MemoryDurableStore>::today();
        let mut balance = 0i64;
        for tx in ledger.transactions(&date).await.unwrap() {
            let amount = tx["amount"].as_i64().unwrap();
            match tx["type"].as_str().unwrap() {
                "init" => balance += amount,
                "consume" => balance -= amount,
                "refund" => balance += amount,
                other => panic!("unexpected transaction type {other}"),
            }
        }
        assert_eq!(Some(balance), ledger.get_credits_left(false).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_consumes_never_oversell() {
        let ledger = Arc::new(ledger());
        ledger.init_daily_credits(None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .consume_credits(20, None, Some(&format!("job-{i}")), None)
                    .await
                    .unwrap()
            }));
        }

        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        // 70 credits / 20 per call → exactly 3 winners.
        assert_eq!(accepted, 3);
        assert_eq!(ledger.get_credits_left(false).await.unwrap(), Some(10));
    }
}
