//! Shared fixtures for service tests.
//!
//! Database-backed tests read `TEST_DATABASE_URL` and are skipped when it
//! is unset. Every fixture creates fresh rows with random ids, so tests
//! can share one database and run concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{
    AccountGrade, CardReversalStatus, Database, OrderRecord, OrderStatus, PointType, ShippingInfo,
};
use crate::models::{BalanceAdjustmentRequest, CardDetails};

use super::payment_gateway::{AuthorizationRequest, decline_message};
use super::{
    CardPayments, GatewayError, GatewayOutcome, LedgerService, OrderReversal, OrderSettlement, PaymentGateway,
    PointWithdrawals,
};

static MIGRATED: OnceCell<()> = OnceCell::const_new();

/// Connect to the test database, applying the schema once per process.
pub async fn test_database() -> Option<Database> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    MIGRATED
        .get_or_init(|| async {
            let db = Database::connect(&url, 1).await.expect("connect test database");
            db.run_migrations().await.expect("migrate test database");
        })
        .await;

    Some(Database::connect(&url, 4).await.expect("connect test database"))
}

pub async fn create_account(db: &Database, grade: AccountGrade) -> Uuid {
    let id = Uuid::new_v4();
    let client = db.client().await.unwrap();
    client
        .execute(
            "INSERT INTO accounts (id, email, name, grade) VALUES ($1, $2, $3, $4)",
            &[&id, &format!("{}@test.local", id), &"Test Account", &grade.as_str()],
        )
        .await
        .unwrap();
    id
}

/// Insert a product with the given dealer/consumer price, PV and stock.
pub async fn create_product(db: &Database, dealer: i64, consumer: i64, pv: i64, stock: i32) -> Uuid {
    let id = Uuid::new_v4();
    let client = db.client().await.unwrap();
    client
        .execute(
            "INSERT INTO products (id, name, price_consumer, price_dealer, pv_value, stock_quantity)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &id,
                &format!("Product {}", &id.to_string()[..8]),
                &Decimal::from(consumer),
                &Decimal::from(dealer),
                &Decimal::from(pv),
                &stock,
            ],
        )
        .await
        .unwrap();
    id
}

pub async fn deactivate_product(db: &Database, product_id: Uuid) {
    let client = db.client().await.unwrap();
    client
        .execute("UPDATE products SET is_active = FALSE WHERE id = $1", &[&product_id])
        .await
        .unwrap();
}

pub async fn product_stock(db: &Database, product_id: Uuid) -> i32 {
    let client = db.client().await.unwrap();
    let row = client
        .query_one("SELECT stock_quantity FROM products WHERE id = $1", &[&product_id])
        .await
        .unwrap();
    row.get(0)
}

/// Deposit through the ledger so the audit trail stays complete.
pub async fn fund_wallet(db: &Database, account_id: Uuid, amount: i64) {
    LedgerService::new(db.clone())
        .deposit_wallet(&adjustment(account_id, amount))
        .await
        .unwrap();
}

pub fn adjustment(account_id: Uuid, amount: i64) -> BalanceAdjustmentRequest {
    BalanceAdjustmentRequest {
        account_id,
        amount: Decimal::from(amount),
        reason: Some("test".to_string()),
        point_type: PointType::X,
    }
}

pub async fn point_audit_sum(db: &Database, account_id: Uuid) -> Decimal {
    audit_sum(db, "point_transactions", account_id).await
}

pub async fn wallet_audit_sum(db: &Database, account_id: Uuid) -> Decimal {
    audit_sum(db, "wallet_transactions", account_id).await
}

async fn audit_sum(db: &Database, table: &str, account_id: Uuid) -> Decimal {
    let client = db.client().await.unwrap();
    let sql = format!("SELECT COALESCE(SUM(amount), 0) FROM {} WHERE account_id = $1", table);
    client.query_one(sql.as_str(), &[&account_id]).await.unwrap().get(0)
}

/// Move an order's escrow row to a fixed release date.
pub async fn backdate_pending_point(db: &Database, order_id: Uuid, date: chrono::NaiveDate) {
    let client = db.client().await.unwrap();
    let updated = client
        .execute(
            "UPDATE pending_points SET scheduled_release_date = $2 WHERE order_id = $1",
            &[&order_id, &date],
        )
        .await
        .unwrap();
    assert_eq!(updated, 1, "order {} has no pending point row", order_id);
}

pub fn card_details() -> CardDetails {
    CardDetails {
        number: "4111111111111111".to_string(),
        expiry: "203012".to_string(),
        auth_code: "900101".to_string(),
        password_prefix: "12".to_string(),
        installment: "00".to_string(),
        customer_name: "Test Buyer".to_string(),
        customer_email: None,
    }
}

pub fn shipping() -> ShippingInfo {
    ShippingInfo {
        name: "Test Buyer".to_string(),
        phone: "010-0000-0000".to_string(),
        address: "1 Test Street, Seoul".to_string(),
        postal_code: Some("04524".to_string()),
        memo: None,
    }
}

/// An in-memory order, for pure transition checks.
pub fn order_record(status: OrderStatus) -> OrderRecord {
    let now = Utc::now();
    OrderRecord {
        id: Uuid::new_v4(),
        order_number: "ORD250101-00000000".to_string(),
        account_id: Uuid::new_v4(),
        status,
        total_amount: Decimal::from(10_000),
        total_pv: Decimal::ZERO,
        payment_wallet: Decimal::from(10_000),
        payment_point: Decimal::ZERO,
        payment_card: Decimal::ZERO,
        payment_bank: Decimal::ZERO,
        shipping: shipping(),
        gateway_transaction_id: None,
        invoice_number: None,
        card_reversal_status: CardReversalStatus::NotRequired,
        card_reversal_error: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn settlement(db: &Database, gateway: Arc<dyn PaymentGateway>) -> OrderSettlement {
    let config = AppConfig::for_tests("unused");
    OrderSettlement::new(db.clone(), config, CardPayments::new(db.clone(), gateway))
}

pub fn reversal(db: &Database, gateway: Arc<dyn PaymentGateway>) -> OrderReversal {
    OrderReversal::new(db.clone(), CardPayments::new(db.clone(), gateway))
}

pub fn withdrawals(db: &Database) -> PointWithdrawals {
    PointWithdrawals::new(db.clone(), AppConfig::for_tests("unused"))
}

// ==========================================
// SCRIPTED GATEWAY
// ==========================================

/// What the scripted gateway answers.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Approve,
    Decline(&'static str),
    /// Transport failure.
    Fail,
    /// No answer within the timeout.
    Timeout,
}

impl Script {
    fn answer(self) -> Result<GatewayOutcome, GatewayError> {
        match self {
            Script::Approve => Ok(GatewayOutcome::Approved {
                transaction_id: Some(format!("SCRIPTED-{}", &Uuid::new_v4().simple().to_string()[..12])),
            }),
            Script::Decline(code) => Ok(GatewayOutcome::Declined {
                code: code.to_string(),
                message: decline_message(code, ""),
            }),
            Script::Fail => Err(GatewayError::Network("scripted failure".to_string())),
            Script::Timeout => Err(GatewayError::Timeout(1)),
        }
    }
}

/// A gateway that answers from a script and counts calls.
pub struct ScriptedGateway {
    authorize: Mutex<Script>,
    reverse: Mutex<Script>,
    authorize_calls: AtomicUsize,
    reverse_calls: AtomicUsize,
}

impl ScriptedGateway {
    fn new(authorize: Script) -> Self {
        Self {
            authorize: Mutex::new(authorize),
            reverse: Mutex::new(Script::Approve),
            authorize_calls: AtomicUsize::new(0),
            reverse_calls: AtomicUsize::new(0),
        }
    }

    pub fn approving() -> Self {
        Self::new(Script::Approve)
    }

    pub fn declining(code: &'static str) -> Self {
        Self::new(Script::Decline(code))
    }

    /// Authorizations fail with `script`, which should be `Fail` or `Timeout`.
    pub fn unanswered(script: Script) -> Self {
        Self::new(script)
    }

    pub fn set_reverse(&self, script: Script) {
        *self.reverse.lock().unwrap() = script;
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn reverse_calls(&self) -> usize {
        self.reverse_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn authorize(&self, _request: AuthorizationRequest<'_>) -> Result<GatewayOutcome, GatewayError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        let script = *self.authorize.lock().unwrap();
        script.answer()
    }

    async fn reverse(&self, _order_ref: &str, _amount: Decimal) -> Result<GatewayOutcome, GatewayError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        let script = *self.reverse.lock().unwrap();
        script.answer()
    }
}
