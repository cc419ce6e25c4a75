//! Credit ledger service
//!
//! Owns the per-user balance and the append-only transaction log. Every
//! mutation takes a pessimistic row lock on the user_credits row and commits
//! the balance update together with its ledger entry, so `balance_after` in
//! the log is always consistent with the balance. The lock lives in the
//! database, which keeps the invariant across multiple service instances.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Order,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::entities::credit_transactions::{self, TransactionKind};
use crate::entities::prelude::*;
use crate::entities::user_credits;
use crate::errors::{Result, ServiceError};

/// Credits granted to every new user on first touch.
pub const WELCOME_GRANT: i32 = 100;

const STEP_BASE_COST: i32 = 5;
const IMAGE_STEP_SURCHARGE: i32 = 10;
const IMAGE_COST: i32 = 10;

/// 10 credits per generated image.
pub fn image_generation_cost(count: i32) -> i32 {
    count * IMAGE_COST
}

/// 5 credits per step plus 10 extra per image step, so an image step costs 15
/// in total.
pub fn agent_run_cost(step_count: usize, image_steps: usize) -> i32 {
    step_count as i32 * STEP_BASE_COST + image_steps as i32 * IMAGE_STEP_SURCHARGE
}

#[derive(Clone)]
pub struct CreditsService {
    db: DatabaseConnection,
}

impl CreditsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Idempotent lazy initialization: creates the balance row and its BONUS
    /// ledger entry exactly once per user. Two concurrent first touches race
    /// on the insert; the loser hits the unique index on user_id and falls
    /// back to reading the winner's row.
    pub async fn ensure_user_credits(&self, user_id: Uuid) -> Result<user_credits::Model> {
        if let Some(existing) = UserCredits::find()
            .filter(user_credits::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
        {
            return Ok(existing);
        }

        let txn = self.db.begin().await?;

        let inserted = user_credits::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            balance: Set(WELCOME_GRANT),
            total_earned: Set(WELCOME_GRANT),
            total_spent: Set(0),
            ..Default::default()
        }
        .insert(&txn)
        .await;

        let credit = match inserted {
            Ok(credit) => credit,
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                return UserCredits::find()
                    .filter(user_credits::Column::UserId.eq(user_id))
                    .one(&self.db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("User credits".to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        record_transaction(
            &txn,
            user_id,
            TransactionKind::Bonus,
            WELCOME_GRANT,
            credit.balance,
            "Welcome bonus - 100 free credits",
            None,
            None,
        )
        .await?;

        txn.commit().await?;

        tracing::info!(user_id = %user_id, "Created credit balance with welcome grant");
        Ok(credit)
    }

    pub async fn get_user_credits(&self, user_id: Uuid) -> Result<user_credits::Model> {
        self.ensure_user_credits(user_id).await
    }

    /// Read-only sufficiency check (after lazy initialization).
    pub async fn check_sufficient_credits(&self, user_id: Uuid, required: i32) -> Result<bool> {
        let credit = self.ensure_user_credits(user_id).await?;
        Ok(credit.balance >= required)
    }

    /// Atomically debit `amount` from the user's balance and append the usage
    /// entry. Fails with `InsufficientCredits` without touching anything if
    /// the locked balance cannot cover the amount.
    pub async fn deduct_credits(
        &self,
        user_id: Uuid,
        amount: i32,
        description: &str,
        related_job_id: Option<String>,
        related_job_type: Option<String>,
    ) -> Result<user_credits::Model> {
        let txn = self.db.begin().await?;

        let credit = lock_balance(&txn, user_id).await?;

        if credit.balance < amount {
            txn.rollback().await?;
            return Err(ServiceError::InsufficientCredits { needed: amount });
        }

        let updated = apply_balance_change(&txn, credit, -amount, 0, amount).await?;

        record_transaction(
            &txn,
            user_id,
            TransactionKind::Usage,
            -amount,
            updated.balance,
            description,
            related_job_id,
            related_job_type,
        )
        .await?;

        txn.commit().await?;

        tracing::debug!(user_id = %user_id, amount, balance = updated.balance, "Deducted credits");
        Ok(updated)
    }

    /// Atomically credit `amount` to the user's balance and append a ledger
    /// entry of the given kind (purchase, refund, bonus or adjustment).
    pub async fn add_credits(
        &self,
        user_id: Uuid,
        amount: i32,
        description: &str,
        kind: TransactionKind,
    ) -> Result<user_credits::Model> {
        let txn = self.db.begin().await?;

        let credit = lock_balance(&txn, user_id).await?;
        let updated = apply_balance_change(&txn, credit, amount, amount, 0).await?;

        record_transaction(
            &txn,
            user_id,
            kind,
            amount,
            updated.balance,
            description,
            None,
            None,
        )
        .await?;

        txn.commit().await?;

        tracing::debug!(user_id = %user_id, amount, balance = updated.balance, "Added credits");
        Ok(updated)
    }

    /// Clawback after a refund. Same locking discipline as a debit, but the
    /// balance is allowed to go negative: the user may already have spent the
    /// refunded credits. total_earned and total_spent stay monotonic.
    pub async fn revoke_credits(
        &self,
        user_id: Uuid,
        amount: i32,
        description: &str,
        kind: TransactionKind,
    ) -> Result<user_credits::Model> {
        let txn = self.db.begin().await?;

        let credit = lock_balance(&txn, user_id).await?;
        let updated = apply_balance_change(&txn, credit, -amount, 0, 0).await?;

        record_transaction(
            &txn,
            user_id,
            kind,
            -amount,
            updated.balance,
            description,
            None,
            None,
        )
        .await?;

        txn.commit().await?;

        tracing::info!(user_id = %user_id, amount, balance = updated.balance, "Revoked credits");
        Ok(updated)
    }

    /// Most recent ledger entries, newest first.
    pub async fn transaction_history(
        &self,
        user_id: Uuid,
        limit: u64,
    ) -> Result<Vec<credit_transactions::Model>> {
        let entries = CreditTransactions::find()
            .filter(credit_transactions::Column::UserId.eq(user_id))
            .order_by(credit_transactions::Column::CreatedAt, Order::Desc)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(entries)
    }
}

/// Fetch the user's balance row under an exclusive row lock. Callers must be
/// inside a transaction; the lock is held until it commits or rolls back.
pub(crate) async fn lock_balance<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<user_credits::Model> {
    UserCredits::find()
        .filter(user_credits::Column::UserId.eq(user_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User credits".to_string()))
}

/// Apply signed deltas to a locked balance row. The single place the balance
/// and its accumulators are mutated; every ledger path goes through here.
pub(crate) async fn apply_balance_change<C: ConnectionTrait>(
    conn: &C,
    credit: user_credits::Model,
    delta_balance: i32,
    delta_earned: i32,
    delta_spent: i32,
) -> Result<user_credits::Model> {
    let new_balance = credit.balance + delta_balance;
    let new_total_earned = credit.total_earned + delta_earned;
    let new_total_spent = credit.total_spent + delta_spent;

    let mut active: user_credits::ActiveModel = credit.into();
    active.balance = Set(new_balance);
    active.total_earned = Set(new_total_earned);
    active.total_spent = Set(new_total_spent);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

#[allow(clippy::too_many_arguments)]
async fn record_transaction<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    kind: TransactionKind,
    amount: i32,
    balance_after: i32,
    description: &str,
    related_job_id: Option<String>,
    related_job_type: Option<String>,
) -> Result<credit_transactions::Model> {
    // Timestamped at insert time, after the row lock is held, so ordering by
    // created_at reproduces the order the balance actually changed in. The
    // column default would use transaction start time, which can predate the
    // lock wait.
    let entry = credit_transactions::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        kind: Set(kind),
        amount: Set(amount),
        balance_after: Set(balance_after),
        description: Set(Some(description.to_string())),
        related_job_id: Set(related_job_id),
        related_job_type: Set(related_job_type),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(entry)
}
