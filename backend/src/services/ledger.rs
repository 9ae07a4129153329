//! # Ledger Service
//!
//! Wallet and point balances, with one audit row per change.
//!
//! ## Responsibilities
//!
//! - Transaction-scoped debit/credit primitives used by settlement,
//!   reversal and the release job
//! - Administrative grant/deduct/deposit and their bulk variants
//! - Balance snapshots, audit history and the escrow list
//!
//! ## Mutation Discipline
//!
//! ```text
//! lock balance row (FOR UPDATE)
//!          ↓
//! check sufficiency against the locked value
//!          ↓
//! update balance (debit) or upsert it (credit)
//!          ↓
//! append audit row with balance_after
//! ```
//!
//! Every audit row carries the signed delta, so for any account the sum
//! of its audit amounts equals its current balance.

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_postgres::Transaction;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::db::{
    Database, DatabaseError, PendingPointRecord, PointTransactionRecord, PointTransactionType,
    PointType, WalletTransactionRecord, WalletTransactionType,
};
use crate::models::{
    BalanceAdjustmentRequest, BalanceChangeResponse, BalancesResponse, BulkResultResponse,
    BulkRowError, Paginated,
};
use crate::utils::{format_krw, max_money, money_issue, page_window, MoneyIssue};

use super::ErrorKind;

/// Maximum number of row errors reported by a bulk operation.
pub const MAX_BULK_ERRORS: usize = 100;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Amount is zero, negative or otherwise unusable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The balance is lower than the requested debit.
    #[error("Insufficient {instrument} balance: available {available}, requested {requested}")]
    InsufficientBalance {
        instrument: String,
        available: Decimal,
        requested: Decimal,
    },

    /// No account with this id.
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    /// Database operation failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<tokio_postgres::Error> for LedgerError {
    fn from(e: tokio_postgres::Error) -> Self {
        LedgerError::Database(DatabaseError::QueryError(e))
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_) => ErrorKind::Validation,
            LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientResource,
            LedgerError::AccountNotFound(_) => ErrorKind::NotFound,
            LedgerError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Amounts must be positive and fit a money column exactly.
fn check_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    match money_issue(amount) {
        Some(MoneyIssue::TooPrecise) => Err(LedgerError::InvalidAmount(format!(
            "amount {} has more than two decimal places",
            amount
        ))),
        Some(MoneyIssue::TooLarge) => Err(LedgerError::InvalidAmount(format!(
            "amount {} exceeds the maximum of {}",
            amount,
            max_money()
        ))),
        None => Ok(()),
    }
}

// ==========================================
// TRANSACTION PRIMITIVES
// ==========================================

/// Debit the wallet inside `tx`.
///
/// ## Returns
///
/// * `Ok(balance_after)` - Debit applied and audited
/// * `Err(LedgerError::InsufficientBalance)` - Nothing changed
pub async fn debit_wallet(
    tx: &Transaction<'_>,
    account_id: Uuid,
    amount: Decimal,
    transaction_type: WalletTransactionType,
    reference_id: Option<Uuid>,
    description: &str,
) -> Result<Decimal, LedgerError> {
    check_amount(amount)?;

    let available = queries::lock_wallet_balance(tx, account_id).await?
        .unwrap_or(Decimal::ZERO);
    if available < amount {
        return Err(LedgerError::InsufficientBalance {
            instrument: "wallet".to_string(),
            available,
            requested: amount,
        });
    }

    let balance_after = queries::subtract_from_wallet_balance(tx, account_id, amount).await?;
    append_wallet_audit(tx, account_id, transaction_type, -amount, balance_after, reference_id, description).await?;

    Ok(balance_after)
}

/// Credit the wallet inside `tx`, creating the balance row if needed.
pub async fn credit_wallet(
    tx: &Transaction<'_>,
    account_id: Uuid,
    amount: Decimal,
    transaction_type: WalletTransactionType,
    reference_id: Option<Uuid>,
    description: &str,
) -> Result<Decimal, LedgerError> {
    check_amount(amount)?;

    let balance_after = queries::add_to_wallet_balance(tx, account_id, amount).await?;
    append_wallet_audit(tx, account_id, transaction_type, amount, balance_after, reference_id, description).await?;

    Ok(balance_after)
}

/// Debit a point balance inside `tx`.
pub async fn debit_points(
    tx: &Transaction<'_>,
    account_id: Uuid,
    point_type: PointType,
    amount: Decimal,
    transaction_type: PointTransactionType,
    reference_id: Option<Uuid>,
    description: &str,
) -> Result<Decimal, LedgerError> {
    check_amount(amount)?;

    let available = queries::lock_point_balance(tx, account_id, point_type).await?
        .unwrap_or(Decimal::ZERO);
    if available < amount {
        return Err(LedgerError::InsufficientBalance {
            instrument: format!("{} points", point_type),
            available,
            requested: amount,
        });
    }

    let balance_after = queries::subtract_from_point_balance(tx, account_id, point_type, amount).await?;
    append_point_audit(tx, account_id, point_type, transaction_type, -amount, balance_after, reference_id, description).await?;

    Ok(balance_after)
}

/// Credit a point balance inside `tx`, creating the balance row if needed.
pub async fn credit_points(
    tx: &Transaction<'_>,
    account_id: Uuid,
    point_type: PointType,
    amount: Decimal,
    transaction_type: PointTransactionType,
    reference_id: Option<Uuid>,
    description: &str,
) -> Result<Decimal, LedgerError> {
    check_amount(amount)?;

    let balance_after = queries::add_to_point_balance(tx, account_id, point_type, amount).await?;
    append_point_audit(tx, account_id, point_type, transaction_type, amount, balance_after, reference_id, description).await?;

    Ok(balance_after)
}

async fn append_wallet_audit(
    tx: &Transaction<'_>,
    account_id: Uuid,
    transaction_type: WalletTransactionType,
    amount: Decimal,
    balance_after: Decimal,
    reference_id: Option<Uuid>,
    description: &str,
) -> Result<(), LedgerError> {
    let record = WalletTransactionRecord {
        id: Uuid::new_v4(),
        account_id,
        transaction_type,
        amount,
        balance_after,
        reference_id,
        description: Some(description.to_string()),
        created_at: Utc::now(),
    };
    queries::insert_wallet_transaction(tx, &record).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn append_point_audit(
    tx: &Transaction<'_>,
    account_id: Uuid,
    point_type: PointType,
    transaction_type: PointTransactionType,
    amount: Decimal,
    balance_after: Decimal,
    reference_id: Option<Uuid>,
    description: &str,
) -> Result<(), LedgerError> {
    let record = PointTransactionRecord {
        id: Uuid::new_v4(),
        account_id,
        point_type,
        transaction_type,
        amount,
        balance_after,
        reference_id,
        description: Some(description.to_string()),
        created_at: Utc::now(),
    };
    queries::insert_point_transaction(tx, &record).await?;
    Ok(())
}

// ==========================================
// ADMINISTRATIVE ADJUSTMENTS
// ==========================================

/// The four administrative balance operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    GrantPoints,
    DeductPoints,
    DepositWallet,
    DeductWallet,
}

impl AdjustmentKind {
    fn label(&self) -> &'static str {
        match self {
            AdjustmentKind::GrantPoints => "Admin grant",
            AdjustmentKind::DeductPoints => "Admin deduction",
            AdjustmentKind::DepositWallet => "Admin deposit",
            AdjustmentKind::DeductWallet => "Admin wallet deduction",
        }
    }

    /// Audit description, e.g. `Admin grant: Event reward`.
    pub fn describe(&self, reason: Option<&str>) -> String {
        match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => format!("{}: {}", self.label(), reason),
            None => self.label().to_string(),
        }
    }
}

/// Service for balance reads and administrative balance changes.
///
/// ## Usage
///
/// ```rust,ignore
/// let ledger = LedgerService::new(db);
/// let balances = ledger.get_balances(account_id).await?;
/// ```
#[derive(Clone)]
pub struct LedgerService {
    /// Database connection for balances and audit rows.
    db: Database,
}

impl LedgerService {
    /// Create a new LedgerService instance.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==========================================
    // BALANCE QUERIES
    // ==========================================

    /// Wallet, point and escrowed point balances of an account.
    pub async fn get_balances(&self, account_id: Uuid) -> Result<BalancesResponse, LedgerError> {
        let pool = self.db.pool();

        if queries::get_account(pool, account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let (wallet_balance, point_balance, pending_point_balance) = futures::try_join!(
            queries::get_wallet_balance(pool, account_id),
            queries::get_point_balance(pool, account_id, PointType::X),
            queries::sum_pending_points(pool, account_id),
        )?;

        Ok(BalancesResponse {
            account_id,
            wallet_balance,
            point_balance,
            pending_point_balance,
            formatted_wallet: format_krw(wallet_balance),
        })
    }

    /// Page through wallet audit rows, newest first.
    pub async fn wallet_history(
        &self,
        account_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<Paginated<WalletTransactionRecord>, LedgerError> {
        let (page, limit, offset) = page_window(page, limit);
        let (items, total) = queries::list_wallet_transactions(self.db.pool(), account_id, limit, offset).await?;

        Ok(Paginated { items, total, page, limit })
    }

    /// Page through point audit rows, optionally of one point type.
    pub async fn point_history(
        &self,
        account_id: Uuid,
        point_type: Option<PointType>,
        page: i64,
        limit: i64,
    ) -> Result<Paginated<PointTransactionRecord>, LedgerError> {
        let (page, limit, offset) = page_window(page, limit);
        let (items, total) =
            queries::list_point_transactions(self.db.pool(), account_id, point_type, limit, offset).await?;

        Ok(Paginated { items, total, page, limit })
    }

    /// Escrow rows of an account, newest first.
    pub async fn list_pending_points(&self, account_id: Uuid) -> Result<Vec<PendingPointRecord>, LedgerError> {
        Ok(queries::list_pending_points(self.db.pool(), account_id).await?)
    }

    // ==========================================
    // ADJUSTMENTS
    // ==========================================

    pub async fn grant_points(&self, request: &BalanceAdjustmentRequest) -> Result<BalanceChangeResponse, LedgerError> {
        self.adjust(AdjustmentKind::GrantPoints, request).await
    }

    pub async fn deduct_points(&self, request: &BalanceAdjustmentRequest) -> Result<BalanceChangeResponse, LedgerError> {
        self.adjust(AdjustmentKind::DeductPoints, request).await
    }

    pub async fn deposit_wallet(&self, request: &BalanceAdjustmentRequest) -> Result<BalanceChangeResponse, LedgerError> {
        self.adjust(AdjustmentKind::DepositWallet, request).await
    }

    pub async fn deduct_wallet(&self, request: &BalanceAdjustmentRequest) -> Result<BalanceChangeResponse, LedgerError> {
        self.adjust(AdjustmentKind::DeductWallet, request).await
    }

    /// Apply one administrative balance change in its own transaction.
    ///
    /// ## Returns
    ///
    /// * `Ok(BalanceChangeResponse)` - The balance after the change
    /// * `Err(LedgerError)` - Nothing was changed
    pub async fn adjust(
        &self,
        kind: AdjustmentKind,
        request: &BalanceAdjustmentRequest,
    ) -> Result<BalanceChangeResponse, LedgerError> {
        check_amount(request.amount)?;

        let account_id = request.account_id;
        let description = kind.describe(request.reason.as_deref());

        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        if queries::get_account_in_tx(&tx, account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let new_balance = match kind {
            AdjustmentKind::GrantPoints => {
                credit_points(&tx, account_id, request.point_type, request.amount,
                    PointTransactionType::Grant, None, &description).await?
            }
            AdjustmentKind::DeductPoints => {
                debit_points(&tx, account_id, request.point_type, request.amount,
                    PointTransactionType::AdminDeduct, None, &description).await?
            }
            AdjustmentKind::DepositWallet => {
                credit_wallet(&tx, account_id, request.amount,
                    WalletTransactionType::Deposit, None, &description).await?
            }
            AdjustmentKind::DeductWallet => {
                debit_wallet(&tx, account_id, request.amount,
                    WalletTransactionType::Payment, None, &description).await?
            }
        };

        tx.commit().await?;

        info!(
            "{} of {} applied to account {} (new balance {})",
            kind.label(), request.amount, account_id, new_balance
        );

        Ok(BalanceChangeResponse { account_id, new_balance })
    }

    /// Apply a list of adjustments, each in its own transaction.
    ///
    /// A failing row does not stop the batch. Row numbers in the report
    /// are 1-based; at most [`MAX_BULK_ERRORS`] errors are listed.
    pub async fn bulk_adjust(
        &self,
        kind: AdjustmentKind,
        rows: &[BalanceAdjustmentRequest],
    ) -> BulkResultResponse {
        let mut result = BulkResultResponse {
            total: rows.len(),
            ..Default::default()
        };

        for (index, row) in rows.iter().enumerate() {
            match self.adjust(kind, row).await {
                Ok(_) => result.success_count += 1,
                Err(e) => {
                    result.fail_count += 1;
                    if result.errors.len() < MAX_BULK_ERRORS {
                        result.errors.push(BulkRowError {
                            row: index + 1,
                            account_id: row.account_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if result.fail_count > 0 {
            warn!(
                "{} bulk run: {} of {} rows failed",
                kind.label(), result.fail_count, result.total
            );
        } else {
            info!("{} bulk run: {} rows applied", kind.label(), result.success_count);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AccountGrade;
    use crate::services::test_support::{self, adjustment};

    #[test]
    fn test_describe_with_and_without_reason() {
        assert_eq!(AdjustmentKind::GrantPoints.describe(Some("Event reward")), "Admin grant: Event reward");
        assert_eq!(AdjustmentKind::DeductWallet.describe(Some("   ")), "Admin wallet deduction");
        assert_eq!(AdjustmentKind::DepositWallet.describe(None), "Admin deposit");
    }

    #[test]
    fn test_error_kinds() {
        let err = LedgerError::InsufficientBalance {
            instrument: "wallet".to_string(),
            available: Decimal::from(5),
            requested: Decimal::from(10),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        assert!(err.to_string().contains("wallet"));
        assert_eq!(LedgerError::AccountNotFound(Uuid::nil()).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::InvalidAmount("x".into()).code(), "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn test_deposit_and_deduct_wallet() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());
        let account = test_support::create_account(&db, AccountGrade::Dealer).await;

        let deposited = ledger.deposit_wallet(&adjustment(account, 25000)).await.unwrap();
        assert_eq!(deposited.new_balance, Decimal::from(25000));

        let deducted = ledger.deduct_wallet(&adjustment(account, 5000)).await.unwrap();
        assert_eq!(deducted.new_balance, Decimal::from(20000));

        let history = ledger.wallet_history(account, 1, 20).await.unwrap();
        assert_eq!(history.total, 2);
        assert_eq!(history.items[0].transaction_type, WalletTransactionType::Payment);
        assert_eq!(history.items[0].amount, Decimal::from(-5000));
    }

    #[tokio::test]
    async fn test_overdraft_is_refused_without_mutation() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());
        let account = test_support::create_account(&db, AccountGrade::Consumer).await;

        ledger.grant_points(&adjustment(account, 100)).await.unwrap();

        let err = ledger.deduct_points(&adjustment(account, 150)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let err = ledger.deduct_wallet(&adjustment(account, 1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { ref instrument, .. } if instrument == "wallet"));

        let balances = ledger.get_balances(account).await.unwrap();
        assert_eq!(balances.point_balance, Decimal::from(100));
        assert_eq!(balances.wallet_balance, Decimal::ZERO);

        let history = ledger.point_history(account, Some(PointType::X), 1, 20).await.unwrap();
        assert_eq!(history.total, 1);
    }

    #[tokio::test]
    async fn test_audit_rows_sum_to_balance() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());
        let account = test_support::create_account(&db, AccountGrade::Dealer).await;

        for amount in [300, 200, 50] {
            ledger.grant_points(&adjustment(account, amount)).await.unwrap();
        }
        ledger.deduct_points(&adjustment(account, 120)).await.unwrap();
        let _ = ledger.deduct_points(&adjustment(account, 10_000)).await;

        let balance = ledger.get_balances(account).await.unwrap().point_balance;
        let audit_sum = test_support::point_audit_sum(&db, account).await;
        assert_eq!(balance, Decimal::from(430));
        assert_eq!(audit_sum, balance);
    }

    #[tokio::test]
    async fn test_unknown_account_and_invalid_amount() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());

        let err = ledger.grant_points(&adjustment(Uuid::new_v4(), 10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let account = test_support::create_account(&db, AccountGrade::Dealer).await;
        let err = ledger.deposit_wallet(&adjustment(account, 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn test_check_amount_rejects_unstorable_values() {
        assert!(check_amount(Decimal::new(1050, 2)).is_ok());
        assert!(check_amount(max_money()).is_ok());
        assert!(matches!(check_amount(Decimal::new(1, 3)), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(check_amount(Decimal::new(10005, 3)), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(check_amount(Decimal::MAX), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(check_amount(-Decimal::new(1, 2)), Err(LedgerError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_sub_cent_adjustments_leave_no_trace() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());
        let account = test_support::create_account(&db, AccountGrade::Dealer).await;

        let mut request = adjustment(account, 0);
        request.amount = Decimal::new(1, 3);
        for kind in [AdjustmentKind::DepositWallet, AdjustmentKind::GrantPoints] {
            let err = ledger.adjust(kind, &request).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }

        request.amount = Decimal::MAX;
        let err = ledger.deposit_wallet(&request).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        let balances = ledger.get_balances(account).await.unwrap();
        assert_eq!(balances.wallet_balance, Decimal::ZERO);
        assert_eq!(balances.point_balance, Decimal::ZERO);
        assert_eq!(test_support::wallet_audit_sum(&db, account).await, Decimal::ZERO);
        assert_eq!(test_support::point_audit_sum(&db, account).await, Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_deductions_never_overdraw() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());
        let account = test_support::create_account(&db, AccountGrade::Dealer).await;

        ledger.deposit_wallet(&adjustment(account, 10_000)).await.unwrap();
        ledger.grant_points(&adjustment(account, 10_000)).await.unwrap();

        let first = adjustment(account, 7_000);
        let second = adjustment(account, 6_000);
        let (a, b) = tokio::join!(ledger.deduct_wallet(&first), ledger.deduct_wallet(&second));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let refused = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(refused, LedgerError::InsufficientBalance { .. }));

        let (a, b) = tokio::join!(ledger.deduct_points(&first), ledger.deduct_points(&second));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

        let balances = ledger.get_balances(account).await.unwrap();
        assert!(balances.wallet_balance >= Decimal::ZERO);
        assert!(balances.point_balance >= Decimal::ZERO);
        assert!(balances.wallet_balance == Decimal::from(3_000) || balances.wallet_balance == Decimal::from(4_000));
        assert_eq!(test_support::wallet_audit_sum(&db, account).await, balances.wallet_balance);
        assert_eq!(test_support::point_audit_sum(&db, account).await, balances.point_balance);
    }

    #[tokio::test]
    async fn test_bulk_grant_reports_failed_rows() {
        let Some(db) = test_support::test_database().await else { return };
        let ledger = LedgerService::new(db.clone());
        let first = test_support::create_account(&db, AccountGrade::Dealer).await;
        let second = test_support::create_account(&db, AccountGrade::Consumer).await;
        let missing = Uuid::new_v4();

        let rows = vec![
            adjustment(first, 100),
            adjustment(missing, 100),
            adjustment(second, -5),
            adjustment(second, 40),
        ];
        let result = ledger.bulk_adjust(AdjustmentKind::GrantPoints, &rows).await;

        assert_eq!(result.total, 4);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.fail_count, 2);
        assert_eq!(result.errors[0].row, 2);
        assert_eq!(result.errors[0].account_id, missing);
        assert_eq!(result.errors[1].row, 3);

        assert_eq!(ledger.get_balances(second).await.unwrap().point_balance, Decimal::from(40));
    }
}
