//! # Order Settlement Service
//!
//! Places an order as one atomic unit: stock decrement, payment
//! application, order rows and the escrowed point reward either all
//! commit or none do.
//!
//! ## Flow: Place Order
//!
//! ```text
//! 0. Validate request, build PaymentPlan          (no DB access)
//!                ↓
//! 1. BEGIN; lock account's products by ascending id (FOR UPDATE)
//!                ↓
//! 2. Price lines by grade, reconcile plan with total (still no writes)
//!                ↓
//! 3. Decrement stock
//!                ↓
//! 4. Wallet debit → point debit → card authorization
//!                ↓
//! 5. Insert order (paid) + items + pending point
//!                ↓
//! 6. COMMIT   (failure after a card approval, or an unanswered
//!             authorization → best-effort card reversal)
//! ```
//!
//! ## Pricing
//!
//! | Grade | Unit price | Unit PV |
//! |-------|------------|---------|
//! | dealer | `price_dealer` | `pv_value` |
//! | consumer | `price_consumer` | 0 |

use std::collections::BTreeMap;

use chrono::{Days, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::queries;
use crate::db::{
    AccountGrade, CardReversalStatus, Database, DatabaseError, OrderItemRecord, OrderRecord,
    OrderStatus, PendingPointRecord, PendingPointStatus, PointTransactionType, PointType,
    ProductRecord, WalletTransactionType,
};
use crate::models::{
    AdminOrderListQuery, OrderDetailResponse, OrderListQuery, Paginated, PlaceOrderRequest,
};
use crate::utils::{format_krw, generate_order_number, local_date, money_issue, page_window};

use super::ledger::{self, LedgerError};
use super::payment_gateway::{CardPayments, GatewayError, GatewayOutcome};
use super::payment_plan::{PaymentPlan, PaymentPlanError};
use super::ErrorKind;

/// Errors that can occur in order operations.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// Malformed request.
    #[error("Invalid order: {0}")]
    Validation(String),

    /// Payment instruments are invalid or do not cover the total.
    #[error(transparent)]
    Payment(#[from] PaymentPlanError),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Account is deactivated: {0}")]
    AccountInactive(Uuid),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Product is not on sale: {0}")]
    ProductInactive(String),

    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i32,
        requested: i32,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// The order is cancelled or refunded already.
    #[error("Order {order_number} is already {status}")]
    AlreadyFinalized {
        order_number: String,
        status: OrderStatus,
    },

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Reconciliation was asked for an order whose card reversal did not fail.
    #[error("Order {0} has no failed card reversal")]
    NoFailedReversal(String),

    /// The gateway declined the card.
    #[error("Card payment declined [{code}]: {message}")]
    PaymentDeclined { code: String, message: String },

    /// The gateway could not be reached or answered garbage.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<tokio_postgres::Error> for OrderError {
    fn from(e: tokio_postgres::Error) -> Self {
        OrderError::Database(DatabaseError::QueryError(e))
    }
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation(_) | OrderError::Payment(_) | OrderError::ProductInactive(_) => {
                ErrorKind::Validation
            }
            OrderError::InsufficientStock { .. } => ErrorKind::InsufficientResource,
            OrderError::AccountNotFound(_) | OrderError::ProductNotFound(_) | OrderError::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            OrderError::AccountInactive(_)
            | OrderError::AlreadyFinalized { .. }
            | OrderError::InvalidTransition { .. }
            | OrderError::NoFailedReversal(_) => ErrorKind::StateConflict,
            OrderError::PaymentDeclined { .. } | OrderError::Gateway(_) => ErrorKind::ExternalDependency,
            OrderError::Ledger(e) => e.kind(),
            OrderError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "VALIDATION_ERROR",
            OrderError::Payment(PaymentPlanError::Mismatch { .. }) => "PAYMENT_MISMATCH",
            OrderError::Payment(_) => "INVALID_PAYMENT",
            OrderError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            OrderError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            OrderError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            OrderError::ProductInactive(_) => "PRODUCT_INACTIVE",
            OrderError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            OrderError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            OrderError::AlreadyFinalized { .. } => "ALREADY_FINALIZED",
            OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrderError::NoFailedReversal(_) => "NO_FAILED_REVERSAL",
            OrderError::PaymentDeclined { .. } => "PAYMENT_DECLINED",
            OrderError::Gateway(_) => "GATEWAY_ERROR",
            OrderError::Ledger(e) => e.code(),
            OrderError::Database(_) => "DATABASE_ERROR",
        }
    }
}

// ==========================================
// PURE HELPERS
// ==========================================

/// Check the request and merge duplicate lines.
///
/// The map is keyed by product id, so iterating it yields products in
/// the ascending order used for row locks.
pub fn validate_request(request: &PlaceOrderRequest) -> Result<BTreeMap<Uuid, i32>, OrderError> {
    if request.items.is_empty() {
        return Err(OrderError::Validation("order has no items".to_string()));
    }

    let shipping = &request.shipping;
    for (field, value) in [("name", &shipping.name), ("phone", &shipping.phone), ("address", &shipping.address)] {
        if value.trim().is_empty() {
            return Err(OrderError::Validation(format!("shipping {} is required", field)));
        }
    }

    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in &request.items {
        if item.quantity <= 0 {
            return Err(OrderError::Validation(format!(
                "quantity for product {} must be positive",
                item.product_id
            )));
        }
        let entry = merged.entry(item.product_id).or_insert(0);
        *entry = entry.checked_add(item.quantity).ok_or_else(|| {
            OrderError::Validation(format!("quantity for product {} is too large", item.product_id))
        })?;
    }

    Ok(merged)
}

/// Price one order line for the given account grade.
pub fn price_line(order_id: Uuid, product: &ProductRecord, grade: AccountGrade, quantity: i32) -> OrderItemRecord {
    let (unit_price, unit_pv) = match grade {
        AccountGrade::Dealer => (product.price_dealer, product.pv_value),
        AccountGrade::Consumer => (product.price_consumer, Decimal::ZERO),
    };
    let qty = Decimal::from(quantity);

    OrderItemRecord {
        id: Uuid::new_v4(),
        order_id,
        product_id: product.id,
        product_name: product.name.clone(),
        quantity,
        unit_price,
        unit_pv,
        total_price: unit_price * qty,
        total_pv: unit_pv * qty,
    }
}

/// Points escrowed for an order: `total_pv × rate`, to the cent, with
/// half-cents rounded away from zero.
pub fn reward_for(total_pv: Decimal, rate: Decimal) -> Decimal {
    (total_pv * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sum a money column over order lines, refusing totals a money column
/// cannot hold.
fn sum_lines(
    items: &[OrderItemRecord],
    field: &'static str,
    value: impl Fn(&OrderItemRecord) -> Decimal,
) -> Result<Decimal, OrderError> {
    let sum = items
        .iter()
        .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(value(item)))
        .ok_or(PaymentPlanError::TooLarge(field))?;
    if money_issue(sum).is_some() {
        return Err(PaymentPlanError::TooLarge(field).into());
    }
    Ok(sum)
}

/// Insert the order, its items and escrow row, then commit.
async fn persist_order(
    tx: deadpool_postgres::Transaction<'_>,
    order: &OrderRecord,
    items: &[OrderItemRecord],
    pending_point: Option<&PendingPointRecord>,
) -> Result<(), OrderError> {
    queries::insert_order(&tx, order).await?;
    for item in items {
        queries::insert_order_item(&tx, item).await?;
    }
    if let Some(pending) = pending_point {
        queries::insert_pending_point(&tx, pending).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Read an order with its items and escrow row.
pub(crate) async fn load_order_detail(db: &Database, order_id: Uuid) -> Result<OrderDetailResponse, OrderError> {
    let pool = db.pool();
    let order = queries::get_order(pool, order_id).await?
        .ok_or(OrderError::OrderNotFound(order_id))?;
    let items = queries::get_order_items(pool, order_id).await?;
    let pending_point = queries::get_pending_point_for_order(pool, order_id).await?;

    Ok(OrderDetailResponse {
        formatted_total: format_krw(order.total_amount),
        order,
        items,
        pending_point,
    })
}

fn product_summary(items: &[OrderItemRecord]) -> String {
    match items {
        [] => String::new(),
        [only] => only.product_name.clone(),
        [first, rest @ ..] => format!("{} and {} more", first.product_name, rest.len()),
    }
}

// ==========================================
// SERVICE
// ==========================================

/// Service that settles new orders and answers order queries.
///
/// ## Usage
///
/// ```rust,ignore
/// let settlement = OrderSettlement::new(db, config, card_payments);
/// let order = settlement.place_order(request).await?;
/// ```
#[derive(Clone)]
pub struct OrderSettlement {
    /// Database connection.
    db: Database,

    /// Reward rate, vesting days, tolerance and home timezone.
    config: AppConfig,

    /// Card gateway with payment request bookkeeping.
    payments: CardPayments,
}

impl OrderSettlement {
    pub fn new(db: Database, config: AppConfig, payments: CardPayments) -> Self {
        Self { db, config, payments }
    }

    /// Settle an order atomically.
    ///
    /// ## Returns
    ///
    /// * `Ok(OrderDetailResponse)` - The order in status `paid`
    /// * `Err(OrderError)` - Nothing was changed, apart from a recorded
    ///   card payment request when the gateway was reached
    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<OrderDetailResponse, OrderError> {
        let merged = validate_request(&request)?;
        let plan = PaymentPlan::from_instruments(request.payments.clone())?;

        let account_id = request.account_id;
        let order_id = Uuid::new_v4();

        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        let account = queries::get_account_in_tx(&tx, account_id).await?
            .ok_or(OrderError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(OrderError::AccountInactive(account_id));
        }

        // Lock and price every product before any write.
        let mut items = Vec::with_capacity(merged.len());
        for (&product_id, &quantity) in &merged {
            let product = queries::lock_product_for_update(&tx, product_id).await?
                .ok_or(OrderError::ProductNotFound(product_id))?;
            if !product.is_active {
                return Err(OrderError::ProductInactive(product.name));
            }
            if product.stock_quantity < quantity {
                return Err(OrderError::InsufficientStock {
                    product: product.name,
                    available: product.stock_quantity,
                    requested: quantity,
                });
            }
            items.push(price_line(order_id, &product, account.grade, quantity));
        }

        let total_amount = sum_lines(&items, "order total", |i| i.total_price)?;
        let total_pv = sum_lines(&items, "order pv", |i| i.total_pv)?;
        plan.reconcile(total_amount, self.config.payment_tolerance)?;

        // Stock
        for item in &items {
            queries::adjust_product_stock(&tx, item.product_id, -item.quantity).await?;
        }

        let now = Utc::now();
        let order_date = local_date(now, self.config.home_timezone);
        let order_number = generate_order_number(order_date);
        let payment_note = format!("Order payment {}", order_number);

        // Balances
        if plan.wallet > Decimal::ZERO {
            ledger::debit_wallet(&tx, account_id, plan.wallet,
                WalletTransactionType::Payment, Some(order_id), &payment_note).await?;
        }
        if let Some((point_type, amount)) = plan.points {
            ledger::debit_points(&tx, account_id, point_type, amount,
                PointTransactionType::OrderPayment, Some(order_id), &payment_note).await?;
        }

        // Card
        let mut gateway_transaction_id = None;
        if let Some(charge) = &plan.card {
            let outcome = match self.payments
                .authorize(&order_number, charge.amount, &product_summary(&items), &charge.card)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    // No answer does not mean no charge.
                    error!("Card authorization for {} went unanswered: {}", order_number, e);
                    self.compensate_card(&order_number, charge.amount).await;
                    return Err(e.into());
                }
            };
            match outcome {
                GatewayOutcome::Approved { transaction_id } => gateway_transaction_id = transaction_id,
                GatewayOutcome::Declined { code, message } => {
                    return Err(OrderError::PaymentDeclined { code, message });
                }
            }
        }

        let order = OrderRecord {
            id: order_id,
            order_number: order_number.clone(),
            account_id,
            status: OrderStatus::Paid,
            total_amount,
            total_pv,
            payment_wallet: plan.wallet,
            payment_point: plan.point_amount(),
            payment_card: plan.card_amount(),
            payment_bank: plan.bank,
            shipping: request.shipping,
            gateway_transaction_id,
            invoice_number: None,
            card_reversal_status: CardReversalStatus::NotRequired,
            card_reversal_error: None,
            created_at: now,
            updated_at: now,
        };

        let persisted = match self.pending_reward(&order, order_date) {
            Ok(pending_point) => persist_order(tx, &order, &items, pending_point.as_ref())
                .await
                .map(|_| pending_point),
            Err(e) => Err(e),
        };
        let pending_point = match persisted {
            Ok(pending_point) => pending_point,
            Err(e) => {
                error!("Order {} rolled back after payment: {}", order_number, e);
                if plan.card.is_some() {
                    self.compensate_card(&order_number, order.payment_card).await;
                }
                return Err(e);
            }
        };

        info!(
            "Order {} settled for account {}: total {}, pv {}, reward {}",
            order_number,
            account_id,
            total_amount,
            total_pv,
            pending_point.as_ref().map(|p| p.point_amount).unwrap_or(Decimal::ZERO)
        );

        Ok(OrderDetailResponse {
            formatted_total: format_krw(order.total_amount),
            order,
            items,
            pending_point,
        })
    }

    /// Escrow row for a settled order, or `None` when it earns nothing.
    fn pending_reward(
        &self,
        order: &OrderRecord,
        order_date: chrono::NaiveDate,
    ) -> Result<Option<PendingPointRecord>, OrderError> {
        if order.total_pv <= Decimal::ZERO {
            return Ok(None);
        }
        let reward = reward_for(order.total_pv, self.config.point_reward_rate);
        if reward <= Decimal::ZERO {
            return Ok(None);
        }

        let release_date = order_date
            .checked_add_days(Days::new(u64::from(self.config.point_vesting_days)))
            .ok_or_else(|| OrderError::Validation("release date out of range".to_string()))?;

        Ok(Some(PendingPointRecord {
            id: Uuid::new_v4(),
            account_id: order.account_id,
            order_id: order.id,
            point_type: PointType::X,
            point_amount: reward,
            pv_amount: order.total_pv,
            scheduled_release_date: release_date,
            status: PendingPointStatus::Pending,
            released_at: None,
            created_at: order.created_at,
        }))
    }

    async fn compensate_card(&self, order_number: &str, amount: Decimal) {
        match self.payments.reverse(order_number, amount).await {
            Ok(GatewayOutcome::Approved { .. }) => {
                warn!("Card authorization for {} reversed after failed settlement", order_number);
            }
            Ok(GatewayOutcome::Declined { code, message }) => {
                error!(
                    "Card authorization for {} NOT reversed after failed settlement: [{}] {}",
                    order_number, code, message
                );
            }
            Err(e) => {
                error!("Card authorization for {} NOT reversed after failed settlement: {}", order_number, e);
            }
        }
    }

    // ==========================================
    // ORDER QUERIES
    // ==========================================

    /// One order with its items and escrow row.
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetailResponse, OrderError> {
        load_order_detail(&self.db, order_id).await
    }

    /// One account's orders, newest first.
    pub async fn list_orders(&self, query: &OrderListQuery) -> Result<Paginated<OrderRecord>, OrderError> {
        let (page, limit, offset) = page_window(query.page, query.limit);
        let (items, total) =
            queries::list_account_orders(self.db.pool(), query.account_id, query.status, limit, offset).await?;

        Ok(Paginated { items, total, page, limit })
    }

    /// All orders for the admin screen.
    pub async fn list_all_orders(&self, query: &AdminOrderListQuery) -> Result<Paginated<OrderRecord>, OrderError> {
        let (page, limit, offset) = page_window(query.page, query.limit);
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let (items, total) =
            queries::list_all_orders(self.db.pool(), query.status, search, limit, offset).await?;

        Ok(Paginated { items, total, page, limit })
    }
}
