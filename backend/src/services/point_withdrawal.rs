//! # Point Withdrawal Service
//!
//! Cash-out of spendable points to a bank account, reviewed by an admin.
//!
//! ## Flow
//!
//! ```text
//! request ──► debit points (audit: withdrawal) + row `pending`
//!                 │
//!        ┌────────┴─────────┐
//!        ▼                  ▼
//!    approve            reject ──► credit points back (audit: refund)
//!        │
//!        ▼
//!    complete   (payout sent on the scheduled business day)
//! ```
//!
//! Each step is one transaction. State changes lock the withdrawal row
//! before any balance row.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::queries;
use crate::db::{
    Database, DatabaseError, PointTransactionType, PointType, PointWithdrawalRecord, WithdrawalStatus,
};
use crate::models::{Paginated, WithdrawalListQuery, WithdrawalRequest};
use crate::utils::{local_date, next_business_day, page_window};

use super::ledger::{self, LedgerError};
use super::ErrorKind;

/// Errors that can occur in withdrawal operations.
#[derive(Debug, thiserror::Error)]
pub enum WithdrawalError {
    /// Missing bank details or similar.
    #[error("Invalid withdrawal: {0}")]
    Validation(String),

    #[error("Withdrawal of {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Account is deactivated: {0}")]
    AccountInactive(Uuid),

    #[error("Withdrawal not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot move withdrawal from {from} to {to}")]
    InvalidTransition { from: WithdrawalStatus, to: WithdrawalStatus },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<tokio_postgres::Error> for WithdrawalError {
    fn from(e: tokio_postgres::Error) -> Self {
        WithdrawalError::Database(DatabaseError::QueryError(e))
    }
}

impl WithdrawalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WithdrawalError::Validation(_) | WithdrawalError::BelowMinimum { .. } => ErrorKind::Validation,
            WithdrawalError::AccountNotFound(_) | WithdrawalError::NotFound(_) => ErrorKind::NotFound,
            WithdrawalError::AccountInactive(_) | WithdrawalError::InvalidTransition { .. } => {
                ErrorKind::StateConflict
            }
            WithdrawalError::Ledger(e) => e.kind(),
            WithdrawalError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            WithdrawalError::Validation(_) => "VALIDATION_ERROR",
            WithdrawalError::BelowMinimum { .. } => "BELOW_MINIMUM_WITHDRAWAL",
            WithdrawalError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            WithdrawalError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            WithdrawalError::NotFound(_) => "WITHDRAWAL_NOT_FOUND",
            WithdrawalError::InvalidTransition { .. } => "INVALID_TRANSITION",
            WithdrawalError::Ledger(e) => e.code(),
            WithdrawalError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Trimmed bank details, or the name of the first blank field.
fn bank_details(request: &WithdrawalRequest) -> Result<(String, String, String), WithdrawalError> {
    let fields = [
        ("bank name", &request.bank_name),
        ("account number", &request.account_number),
        ("account holder", &request.account_holder),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(WithdrawalError::Validation(format!("{} is required", field)));
        }
    }

    Ok((
        request.bank_name.trim().to_string(),
        request.account_number.trim().to_string(),
        request.account_holder.trim().to_string(),
    ))
}

/// Service for point withdrawals.
#[derive(Clone)]
pub struct PointWithdrawals {
    db: Database,

    /// Minimum amount and home timezone.
    config: AppConfig,
}

impl PointWithdrawals {
    pub fn new(db: Database, config: AppConfig) -> Self {
        Self { db, config }
    }

    /// Take points off the balance and file a payout request.
    ///
    /// ## Returns
    ///
    /// * `Ok(PointWithdrawalRecord)` - The `pending` request
    /// * `Err(WithdrawalError)` - Nothing was changed
    pub async fn request_withdrawal(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<PointWithdrawalRecord, WithdrawalError> {
        let (bank_name, bank_account_number, account_holder) = bank_details(request)?;
        if request.amount < self.config.withdrawal_minimum {
            return Err(WithdrawalError::BelowMinimum {
                amount: request.amount,
                minimum: self.config.withdrawal_minimum,
            });
        }

        let account_id = request.account_id;
        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        let account = queries::get_account_in_tx(&tx, account_id).await?
            .ok_or(WithdrawalError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(WithdrawalError::AccountInactive(account_id));
        }

        let now = Utc::now();
        let record = PointWithdrawalRecord {
            id: Uuid::new_v4(),
            account_id,
            point_type: PointType::X,
            amount: request.amount,
            bank_name,
            bank_account_number,
            account_holder,
            status: WithdrawalStatus::Pending,
            scheduled_payment_date: next_business_day(local_date(now, self.config.home_timezone)),
            admin_note: None,
            processed_at: None,
            created_at: now,
        };

        ledger::debit_points(&tx, account_id, record.point_type, record.amount,
            PointTransactionType::Withdrawal, Some(record.id), "Withdrawal request").await?;
        queries::insert_point_withdrawal(&tx, &record).await?;

        tx.commit().await?;

        info!(
            "Withdrawal {} of {} requested by account {} (payout {})",
            record.id, record.amount, account_id, record.scheduled_payment_date
        );

        Ok(record)
    }

    /// One account's withdrawals, newest first.
    pub async fn list_for_account(
        &self,
        account_id: Uuid,
        query: &WithdrawalListQuery,
    ) -> Result<Paginated<PointWithdrawalRecord>, WithdrawalError> {
        self.list_page(Some(account_id), query).await
    }

    /// All withdrawals for the admin screen.
    pub async fn list_all(
        &self,
        query: &WithdrawalListQuery,
    ) -> Result<Paginated<PointWithdrawalRecord>, WithdrawalError> {
        self.list_page(None, query).await
    }

    async fn list_page(
        &self,
        account_id: Option<Uuid>,
        query: &WithdrawalListQuery,
    ) -> Result<Paginated<PointWithdrawalRecord>, WithdrawalError> {
        let (page, limit, offset) = page_window(query.page, query.limit);
        let (items, total) =
            queries::list_point_withdrawals(self.db.pool(), account_id, query.status, limit, offset).await?;

        Ok(Paginated { items, total, page, limit })
    }

    pub async fn approve(
        &self,
        withdrawal_id: Uuid,
        admin_note: Option<&str>,
    ) -> Result<PointWithdrawalRecord, WithdrawalError> {
        self.transition(withdrawal_id, WithdrawalStatus::Approved, admin_note).await
    }

    /// Reject a pending request and give the points back.
    pub async fn reject(
        &self,
        withdrawal_id: Uuid,
        admin_note: Option<&str>,
    ) -> Result<PointWithdrawalRecord, WithdrawalError> {
        self.transition(withdrawal_id, WithdrawalStatus::Rejected, admin_note).await
    }

    /// Mark an approved request as paid out.
    pub async fn complete(&self, withdrawal_id: Uuid) -> Result<PointWithdrawalRecord, WithdrawalError> {
        self.transition(withdrawal_id, WithdrawalStatus::Completed, None).await
    }

    async fn transition(
        &self,
        withdrawal_id: Uuid,
        to: WithdrawalStatus,
        admin_note: Option<&str>,
    ) -> Result<PointWithdrawalRecord, WithdrawalError> {
        let admin_note = admin_note.map(str::trim).filter(|n| !n.is_empty());

        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        let current = queries::lock_point_withdrawal(&tx, withdrawal_id).await?
            .ok_or(WithdrawalError::NotFound(withdrawal_id))?;
        if !current.status.can_transition_to(to) {
            return Err(WithdrawalError::InvalidTransition { from: current.status, to });
        }

        if to == WithdrawalStatus::Rejected {
            ledger::credit_points(&tx, current.account_id, current.point_type, current.amount,
                PointTransactionType::Refund, Some(current.id), "Withdrawal rejected").await?;
        }
        let updated = queries::update_point_withdrawal_status(&tx, withdrawal_id, to, admin_note).await?;

        tx.commit().await?;

        info!("Withdrawal {} moved from {} to {}", withdrawal_id, current.status, to);

        Ok(updated)
    }
}
