//! # Database Queries
//!
//! This module contains all the SQL for the ledger, inventory and order
//! tables. Each function performs one statement (or one read with its
//! count).
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `account` / `product` - Reference data and stock counters
//! - `wallet_*` - Wallet balance and audit rows
//! - `point_*` - Point balance and audit rows
//! - `pending_point*` - Escrowed point rewards
//! - `order*` - Orders and order items
//! - `payment_request*` - Card gateway bookkeeping
//! - `point_withdrawal*` - Point cash-out requests
//!
//! ## Pool vs Transaction
//!
//! Functions taking a `Transaction` are building blocks for the atomic
//! settlement, reversal and release operations; the caller owns commit
//! and rollback. Functions taking the `Pool` are standalone reads or
//! bookkeeping writes that must survive a rolled-back transaction.

use chrono::NaiveDate;
use deadpool_postgres::Pool;
use rust_decimal::Decimal;
use tokio_postgres::{Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;

// ============================================
// HELPER FUNCTIONS
// ============================================

const ORDER_COLUMNS: &str = r#"
    id, order_number, account_id, status, total_amount, total_pv,
    payment_wallet, payment_point, payment_card, payment_bank,
    shipping_name, shipping_phone, shipping_address, shipping_postal_code, shipping_memo,
    gateway_transaction_id, invoice_number, card_reversal_status, card_reversal_error,
    created_at, updated_at
"#;

const PENDING_POINT_COLUMNS: &str = r#"
    id, account_id, order_id, point_type, point_amount, pv_amount,
    scheduled_release_date, status, released_at, created_at
"#;

const WITHDRAWAL_COLUMNS: &str = r#"
    id, account_id, point_type, amount, bank_name, bank_account_number, account_holder,
    status, scheduled_payment_date, admin_note, processed_at, created_at
"#;

/// Parse a text column into one of the text-backed enums.
fn text_column<T>(row: &Row, column: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr<Err = DatabaseError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
}

async fn pooled(pool: &Pool) -> Result<deadpool_postgres::Client, DatabaseError> {
    pool.get().await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

fn row_to_account(row: &Row) -> Result<AccountRecord, DatabaseError> {
    Ok(AccountRecord {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        grade: text_column(row, "grade")?,
        referrer_id: row.get("referrer_id"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}

fn row_to_product(row: &Row) -> Result<ProductRecord, DatabaseError> {
    Ok(ProductRecord {
        id: row.get("id"),
        name: row.get("name"),
        price_consumer: row.get("price_consumer"),
        price_dealer: row.get("price_dealer"),
        pv_value: row.get("pv_value"),
        stock_quantity: row.get("stock_quantity"),
        is_active: row.get("is_active"),
    })
}

fn row_to_wallet_transaction(row: &Row) -> Result<WalletTransactionRecord, DatabaseError> {
    Ok(WalletTransactionRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        transaction_type: text_column(row, "transaction_type")?,
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        reference_id: row.get("reference_id"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

fn row_to_point_transaction(row: &Row) -> Result<PointTransactionRecord, DatabaseError> {
    Ok(PointTransactionRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        point_type: text_column(row, "point_type")?,
        transaction_type: text_column(row, "transaction_type")?,
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        reference_id: row.get("reference_id"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

fn row_to_pending_point(row: &Row) -> Result<PendingPointRecord, DatabaseError> {
    Ok(PendingPointRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        order_id: row.get("order_id"),
        point_type: text_column(row, "point_type")?,
        point_amount: row.get("point_amount"),
        pv_amount: row.get("pv_amount"),
        scheduled_release_date: row.get("scheduled_release_date"),
        status: text_column(row, "status")?,
        released_at: row.get("released_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_withdrawal(row: &Row) -> Result<PointWithdrawalRecord, DatabaseError> {
    Ok(PointWithdrawalRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        point_type: text_column(row, "point_type")?,
        amount: row.get("amount"),
        bank_name: row.get("bank_name"),
        bank_account_number: row.get("bank_account_number"),
        account_holder: row.get("account_holder"),
        status: text_column(row, "status")?,
        scheduled_payment_date: row.get("scheduled_payment_date"),
        admin_note: row.get("admin_note"),
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_order(row: &Row) -> Result<OrderRecord, DatabaseError> {
    Ok(OrderRecord {
        id: row.get("id"),
        order_number: row.get("order_number"),
        account_id: row.get("account_id"),
        status: text_column(row, "status")?,
        total_amount: row.get("total_amount"),
        total_pv: row.get("total_pv"),
        payment_wallet: row.get("payment_wallet"),
        payment_point: row.get("payment_point"),
        payment_card: row.get("payment_card"),
        payment_bank: row.get("payment_bank"),
        shipping: ShippingInfo {
            name: row.get("shipping_name"),
            phone: row.get("shipping_phone"),
            address: row.get("shipping_address"),
            postal_code: row.get("shipping_postal_code"),
            memo: row.get("shipping_memo"),
        },
        gateway_transaction_id: row.get("gateway_transaction_id"),
        invoice_number: row.get("invoice_number"),
        card_reversal_status: text_column(row, "card_reversal_status")?,
        card_reversal_error: row.get("card_reversal_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_order_item(row: &Row) -> Result<OrderItemRecord, DatabaseError> {
    Ok(OrderItemRecord {
        id: row.get("id"),
        order_id: row.get("order_id"),
        product_id: row.get("product_id"),
        product_name: row.get("product_name"),
        quantity: row.get("quantity"),
        unit_price: row.get("unit_price"),
        unit_pv: row.get("unit_pv"),
        total_price: row.get("total_price"),
        total_pv: row.get("total_pv"),
    })
}

fn row_to_payment_request(row: &Row) -> Result<PaymentRequestRecord, DatabaseError> {
    Ok(PaymentRequestRecord {
        id: row.get("id"),
        order_ref: row.get("order_ref"),
        amount: row.get("amount"),
        status: text_column(row, "status")?,
        gateway_transaction_id: row.get("gateway_transaction_id"),
        error_message: row.get("error_message"),
        payment_data: row.get("payment_data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================
// ACCOUNT QUERIES
// ============================================

/// Get an account by id.
pub async fn get_account(
    pool: &Pool,
    account_id: Uuid,
) -> Result<Option<AccountRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let row = client.query_opt(
        r#"
        SELECT id, email, name, grade, referrer_id, is_active, created_at
        FROM accounts
        WHERE id = $1
        "#,
        &[&account_id],
    ).await?;

    row.as_ref().map(row_to_account).transpose()
}

/// Get an account by id inside a transaction.
pub async fn get_account_in_tx(
    tx: &Transaction<'_>,
    account_id: Uuid,
) -> Result<Option<AccountRecord>, DatabaseError> {
    let row = tx.query_opt(
        r#"
        SELECT id, email, name, grade, referrer_id, is_active, created_at
        FROM accounts
        WHERE id = $1
        "#,
        &[&account_id],
    ).await?;

    row.as_ref().map(row_to_account).transpose()
}

// ============================================
// PRODUCT QUERIES
// ============================================

/// Lock a product row for the rest of the transaction and return it.
///
/// Concurrent settlements against the same product serialize here.
pub async fn lock_product_for_update(
    tx: &Transaction<'_>,
    product_id: Uuid,
) -> Result<Option<ProductRecord>, DatabaseError> {
    debug!("Locking product {}", product_id);

    let row = tx.query_opt(
        r#"
        SELECT id, name, price_consumer, price_dealer, pv_value, stock_quantity, is_active
        FROM products
        WHERE id = $1
        FOR UPDATE
        "#,
        &[&product_id],
    ).await?;

    row.as_ref().map(row_to_product).transpose()
}

/// Add `delta` (negative to decrement) to a product's stock counter.
///
/// Returns the number of rows touched; the `CHECK (stock_quantity >= 0)`
/// constraint rejects anything that would go negative.
pub async fn adjust_product_stock(
    tx: &Transaction<'_>,
    product_id: Uuid,
    delta: i32,
) -> Result<u64, DatabaseError> {
    let rows = tx.execute(
        r#"
        UPDATE products
        SET stock_quantity = stock_quantity + $2, updated_at = NOW()
        WHERE id = $1
        "#,
        &[&product_id, &delta],
    ).await?;

    Ok(rows)
}

// ============================================
// WALLET QUERIES
// ============================================

/// Lock an account's wallet row and return its balance.
///
/// `None` means the account has never been funded.
pub async fn lock_wallet_balance(
    tx: &Transaction<'_>,
    account_id: Uuid,
) -> Result<Option<Decimal>, DatabaseError> {
    let row = tx.query_opt(
        "SELECT balance FROM wallet_balances WHERE account_id = $1 FOR UPDATE",
        &[&account_id],
    ).await?;

    Ok(row.map(|r| r.get("balance")))
}

/// Add a positive `delta` to the wallet balance, creating the row if needed.
///
/// Returns the resulting balance.
pub async fn add_to_wallet_balance(
    tx: &Transaction<'_>,
    account_id: Uuid,
    delta: Decimal,
) -> Result<Decimal, DatabaseError> {
    let row = tx.query_one(
        r#"
        INSERT INTO wallet_balances (account_id, balance)
        VALUES ($1, $2)
        ON CONFLICT (account_id)
        DO UPDATE SET balance = wallet_balances.balance + EXCLUDED.balance, updated_at = NOW()
        RETURNING balance
        "#,
        &[&account_id, &delta],
    ).await?;

    Ok(row.get("balance"))
}

/// Subtract `amount` from an existing wallet row.
///
/// The caller must already hold the row lock from
/// [`lock_wallet_balance`] and have checked sufficiency.
pub async fn subtract_from_wallet_balance(
    tx: &Transaction<'_>,
    account_id: Uuid,
    amount: Decimal,
) -> Result<Decimal, DatabaseError> {
    let row = tx.query_one(
        r#"
        UPDATE wallet_balances
        SET balance = balance - $2, updated_at = NOW()
        WHERE account_id = $1
        RETURNING balance
        "#,
        &[&account_id, &amount],
    ).await?;

    Ok(row.get("balance"))
}

/// Append a wallet audit row.
pub async fn insert_wallet_transaction(
    tx: &Transaction<'_>,
    record: &WalletTransactionRecord,
) -> Result<(), DatabaseError> {
    tx.execute(
        r#"
        INSERT INTO wallet_transactions (
            id, account_id, transaction_type, amount, balance_after,
            reference_id, description, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        &[
            &record.id,
            &record.account_id,
            &record.transaction_type.as_str(),
            &record.amount,
            &record.balance_after,
            &record.reference_id,
            &record.description,
            &record.created_at,
        ],
    ).await?;

    Ok(())
}

/// Current wallet balance; zero for accounts without a wallet row.
pub async fn get_wallet_balance(
    pool: &Pool,
    account_id: Uuid,
) -> Result<Decimal, DatabaseError> {
    let client = pooled(pool).await?;

    let row = client.query_opt(
        "SELECT balance FROM wallet_balances WHERE account_id = $1",
        &[&account_id],
    ).await?;

    Ok(row.map(|r| r.get("balance")).unwrap_or(Decimal::ZERO))
}

/// Page through an account's wallet audit rows, newest first.
///
/// Returns the page and the total row count.
pub async fn list_wallet_transactions(
    pool: &Pool,
    account_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<(Vec<WalletTransactionRecord>, i64), DatabaseError> {
    let client = pooled(pool).await?;

    let count_row = client.query_one(
        "SELECT COUNT(*) AS count FROM wallet_transactions WHERE account_id = $1",
        &[&account_id],
    ).await?;

    let rows = client.query(
        r#"
        SELECT id, account_id, transaction_type, amount, balance_after,
               reference_id, description, created_at
        FROM wallet_transactions
        WHERE account_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
        &[&account_id, &limit, &offset],
    ).await?;

    let transactions = rows.iter()
        .map(row_to_wallet_transaction)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((transactions, count_row.get("count")))
}

// ============================================
// POINT QUERIES
// ============================================

/// Lock an account's point row of one type and return its balance.
pub async fn lock_point_balance(
    tx: &Transaction<'_>,
    account_id: Uuid,
    point_type: PointType,
) -> Result<Option<Decimal>, DatabaseError> {
    let row = tx.query_opt(
        r#"
        SELECT balance FROM point_balances
        WHERE account_id = $1 AND point_type = $2
        FOR UPDATE
        "#,
        &[&account_id, &point_type.as_str()],
    ).await?;

    Ok(row.map(|r| r.get("balance")))
}

/// Add a positive `delta` to a point balance, creating the row if needed.
pub async fn add_to_point_balance(
    tx: &Transaction<'_>,
    account_id: Uuid,
    point_type: PointType,
    delta: Decimal,
) -> Result<Decimal, DatabaseError> {
    let row = tx.query_one(
        r#"
        INSERT INTO point_balances (account_id, point_type, balance)
        VALUES ($1, $2, $3)
        ON CONFLICT (account_id, point_type)
        DO UPDATE SET balance = point_balances.balance + EXCLUDED.balance, updated_at = NOW()
        RETURNING balance
        "#,
        &[&account_id, &point_type.as_str(), &delta],
    ).await?;

    Ok(row.get("balance"))
}

/// Subtract `amount` from an existing point row locked by
/// [`lock_point_balance`].
pub async fn subtract_from_point_balance(
    tx: &Transaction<'_>,
    account_id: Uuid,
    point_type: PointType,
    amount: Decimal,
) -> Result<Decimal, DatabaseError> {
    let row = tx.query_one(
        r#"
        UPDATE point_balances
        SET balance = balance - $3, updated_at = NOW()
        WHERE account_id = $1 AND point_type = $2
        RETURNING balance
        "#,
        &[&account_id, &point_type.as_str(), &amount],
    ).await?;

    Ok(row.get("balance"))
}

/// Append a point audit row.
pub async fn insert_point_transaction(
    tx: &Transaction<'_>,
    record: &PointTransactionRecord,
) -> Result<(), DatabaseError> {
    tx.execute(
        r#"
        INSERT INTO point_transactions (
            id, account_id, point_type, transaction_type, amount, balance_after,
            reference_id, description, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
        &[
            &record.id,
            &record.account_id,
            &record.point_type.as_str(),
            &record.transaction_type.as_str(),
            &record.amount,
            &record.balance_after,
            &record.reference_id,
            &record.description,
            &record.created_at,
        ],
    ).await?;

    Ok(())
}

/// Current point balance of one type; zero when no row exists.
pub async fn get_point_balance(
    pool: &Pool,
    account_id: Uuid,
    point_type: PointType,
) -> Result<Decimal, DatabaseError> {
    let client = pooled(pool).await?;

    let row = client.query_opt(
        "SELECT balance FROM point_balances WHERE account_id = $1 AND point_type = $2",
        &[&account_id, &point_type.as_str()],
    ).await?;

    Ok(row.map(|r| r.get("balance")).unwrap_or(Decimal::ZERO))
}

/// Page through an account's point audit rows, optionally of one type.
pub async fn list_point_transactions(
    pool: &Pool,
    account_id: Uuid,
    point_type: Option<PointType>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PointTransactionRecord>, i64), DatabaseError> {
    let client = pooled(pool).await?;
    let point_type = point_type.map(|p| p.as_str());

    let count_row = client.query_one(
        r#"
        SELECT COUNT(*) AS count FROM point_transactions
        WHERE account_id = $1 AND ($2::TEXT IS NULL OR point_type = $2)
        "#,
        &[&account_id, &point_type],
    ).await?;

    let rows = client.query(
        r#"
        SELECT id, account_id, point_type, transaction_type, amount, balance_after,
               reference_id, description, created_at
        FROM point_transactions
        WHERE account_id = $1 AND ($2::TEXT IS NULL OR point_type = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
        &[&account_id, &point_type, &limit, &offset],
    ).await?;

    let transactions = rows.iter()
        .map(row_to_point_transaction)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((transactions, count_row.get("count")))
}

// ============================================
// PENDING POINT QUERIES
// ============================================

/// Insert an escrow row. The unique index on `order_id` guarantees one
/// row per order.
pub async fn insert_pending_point(
    tx: &Transaction<'_>,
    record: &PendingPointRecord,
) -> Result<(), DatabaseError> {
    tx.execute(
        r#"
        INSERT INTO pending_points (
            id, account_id, order_id, point_type, point_amount, pv_amount,
            scheduled_release_date, status, released_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
        &[
            &record.id,
            &record.account_id,
            &record.order_id,
            &record.point_type.as_str(),
            &record.point_amount,
            &record.pv_amount,
            &record.scheduled_release_date,
            &record.status.as_str(),
            &record.released_at,
            &record.created_at,
        ],
    ).await?;

    Ok(())
}

/// Move any still-pending escrow row of an order to `cancelled`.
///
/// Rows already released or cancelled are left alone, so this is a
/// no-op when called twice.
pub async fn cancel_pending_points_for_order(
    tx: &Transaction<'_>,
    order_id: Uuid,
) -> Result<u64, DatabaseError> {
    let rows = tx.execute(
        r#"
        UPDATE pending_points
        SET status = 'cancelled'
        WHERE order_id = $1 AND status = 'pending'
        "#,
        &[&order_id],
    ).await?;

    Ok(rows)
}

/// Lock every pending escrow row due on or before `today`.
pub async fn lock_due_pending_points(
    tx: &Transaction<'_>,
    today: NaiveDate,
) -> Result<Vec<PendingPointRecord>, DatabaseError> {
    let sql = format!(
        r#"
        SELECT {PENDING_POINT_COLUMNS}
        FROM pending_points
        WHERE status = 'pending' AND scheduled_release_date <= $1
        ORDER BY scheduled_release_date, created_at
        FOR UPDATE
        "#
    );

    let rows = tx.query(sql.as_str(), &[&today]).await?;

    rows.iter().map(row_to_pending_point).collect()
}

/// Mark an escrow row released. Only touches rows still pending.
pub async fn mark_pending_point_released(
    tx: &Transaction<'_>,
    pending_id: Uuid,
) -> Result<u64, DatabaseError> {
    let rows = tx.execute(
        r#"
        UPDATE pending_points
        SET status = 'released', released_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
        &[&pending_id],
    ).await?;

    Ok(rows)
}

/// All escrow rows of an account, newest first.
pub async fn list_pending_points(
    pool: &Pool,
    account_id: Uuid,
) -> Result<Vec<PendingPointRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let sql = format!(
        r#"
        SELECT {PENDING_POINT_COLUMNS}
        FROM pending_points
        WHERE account_id = $1
        ORDER BY created_at DESC
        "#
    );

    let rows = client.query(sql.as_str(), &[&account_id]).await?;

    rows.iter().map(row_to_pending_point).collect()
}

/// The escrow row created for an order, if any.
pub async fn get_pending_point_for_order(
    pool: &Pool,
    order_id: Uuid,
) -> Result<Option<PendingPointRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let sql = format!(
        "SELECT {PENDING_POINT_COLUMNS} FROM pending_points WHERE order_id = $1"
    );

    let row = client.query_opt(sql.as_str(), &[&order_id]).await?;

    row.as_ref().map(row_to_pending_point).transpose()
}

/// Sum of an account's rewards still waiting in escrow.
pub async fn sum_pending_points(
    pool: &Pool,
    account_id: Uuid,
) -> Result<Decimal, DatabaseError> {
    let client = pooled(pool).await?;

    let row = client.query_one(
        r#"
        SELECT COALESCE(SUM(point_amount), 0) AS total
        FROM pending_points
        WHERE account_id = $1 AND status = 'pending'
        "#,
        &[&account_id],
    ).await?;

    Ok(row.get("total"))
}

// ============================================
// ORDER QUERIES
// ============================================

/// Insert an order row.
pub async fn insert_order(
    tx: &Transaction<'_>,
    order: &OrderRecord,
) -> Result<(), DatabaseError> {
    debug!("Inserting order {} ({})", order.order_number, order.id);

    tx.execute(
        r#"
        INSERT INTO orders (
            id, order_number, account_id, status, total_amount, total_pv,
            payment_wallet, payment_point, payment_card, payment_bank,
            shipping_name, shipping_phone, shipping_address, shipping_postal_code, shipping_memo,
            gateway_transaction_id, invoice_number, card_reversal_status, card_reversal_error,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21)
        "#,
        &[
            &order.id,
            &order.order_number,
            &order.account_id,
            &order.status.as_str(),
            &order.total_amount,
            &order.total_pv,
            &order.payment_wallet,
            &order.payment_point,
            &order.payment_card,
            &order.payment_bank,
            &order.shipping.name,
            &order.shipping.phone,
            &order.shipping.address,
            &order.shipping.postal_code,
            &order.shipping.memo,
            &order.gateway_transaction_id,
            &order.invoice_number,
            &order.card_reversal_status.as_str(),
            &order.card_reversal_error,
            &order.created_at,
            &order.updated_at,
        ],
    ).await?;

    Ok(())
}

/// Insert one order line.
pub async fn insert_order_item(
    tx: &Transaction<'_>,
    item: &OrderItemRecord,
) -> Result<(), DatabaseError> {
    tx.execute(
        r#"
        INSERT INTO order_items (
            id, order_id, product_id, product_name, quantity,
            unit_price, unit_pv, total_price, total_pv
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
        &[
            &item.id,
            &item.order_id,
            &item.product_id,
            &item.product_name,
            &item.quantity,
            &item.unit_price,
            &item.unit_pv,
            &item.total_price,
            &item.total_pv,
        ],
    ).await?;

    Ok(())
}

/// Lock an order row for a status change.
pub async fn lock_order_for_update(
    tx: &Transaction<'_>,
    order_id: Uuid,
) -> Result<Option<OrderRecord>, DatabaseError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");

    let row = tx.query_opt(sql.as_str(), &[&order_id]).await?;

    row.as_ref().map(row_to_order).transpose()
}

/// Order lines read inside a transaction, in product id order.
pub async fn order_items_in_tx(
    tx: &Transaction<'_>,
    order_id: Uuid,
) -> Result<Vec<OrderItemRecord>, DatabaseError> {
    let rows = tx.query(
        r#"
        SELECT id, order_id, product_id, product_name, quantity,
               unit_price, unit_pv, total_price, total_pv
        FROM order_items
        WHERE order_id = $1
        ORDER BY product_id
        "#,
        &[&order_id],
    ).await?;

    rows.iter().map(row_to_order_item).collect()
}

/// Set an order's status.
pub async fn update_order_status(
    tx: &Transaction<'_>,
    order_id: Uuid,
    status: OrderStatus,
) -> Result<u64, DatabaseError> {
    let rows = tx.execute(
        "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1",
        &[&order_id, &status.as_str()],
    ).await?;

    Ok(rows)
}

/// Store a shipment tracking number together with the new status.
pub async fn set_invoice_number(
    tx: &Transaction<'_>,
    order_id: Uuid,
    invoice_number: &str,
    status: OrderStatus,
) -> Result<u64, DatabaseError> {
    let rows = tx.execute(
        r#"
        UPDATE orders
        SET invoice_number = $2, status = $3, updated_at = NOW()
        WHERE id = $1
        "#,
        &[&order_id, &invoice_number, &status.as_str()],
    ).await?;

    Ok(rows)
}

/// Get an order by id.
pub async fn get_order(
    pool: &Pool,
    order_id: Uuid,
) -> Result<Option<OrderRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    let row = client.query_opt(sql.as_str(), &[&order_id]).await?;

    row.as_ref().map(row_to_order).transpose()
}

/// Get the lines of an order.
pub async fn get_order_items(
    pool: &Pool,
    order_id: Uuid,
) -> Result<Vec<OrderItemRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let rows = client.query(
        r#"
        SELECT id, order_id, product_id, product_name, quantity,
               unit_price, unit_pv, total_price, total_pv
        FROM order_items
        WHERE order_id = $1
        ORDER BY product_id
        "#,
        &[&order_id],
    ).await?;

    rows.iter().map(row_to_order_item).collect()
}

/// Page through one account's orders, newest first.
pub async fn list_account_orders(
    pool: &Pool,
    account_id: Uuid,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<OrderRecord>, i64), DatabaseError> {
    let client = pooled(pool).await?;
    let status = status.map(|s| s.as_str());

    let count_row = client.query_one(
        r#"
        SELECT COUNT(*) AS count FROM orders
        WHERE account_id = $1 AND ($2::TEXT IS NULL OR status = $2)
        "#,
        &[&account_id, &status],
    ).await?;

    let sql = format!(
        r#"
        SELECT {ORDER_COLUMNS}
        FROM orders
        WHERE account_id = $1 AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let rows = client.query(sql.as_str(), &[&account_id, &status, &limit, &offset]).await?;

    let orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>, _>>()?;

    Ok((orders, count_row.get("count")))
}

/// Page through all orders for the admin screen.
///
/// `search` matches the order number, account name or account email.
pub async fn list_all_orders(
    pool: &Pool,
    status: Option<OrderStatus>,
    search: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<OrderRecord>, i64), DatabaseError> {
    let client = pooled(pool).await?;
    let status = status.map(|s| s.as_str());
    let pattern = search.map(|s| format!("%{}%", s));

    let filter = r#"
        ($1::TEXT IS NULL OR o.status = $1)
        AND ($2::TEXT IS NULL
             OR o.order_number ILIKE $2
             OR a.name ILIKE $2
             OR a.email ILIKE $2)
    "#;

    let count_sql = format!(
        "SELECT COUNT(*) AS count FROM orders o JOIN accounts a ON o.account_id = a.id WHERE {filter}"
    );
    let count_row = client.query_one(count_sql.as_str(), &[&status, &pattern]).await?;

    let columns = ORDER_COLUMNS
        .split(',')
        .map(|c| format!("o.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r#"
        SELECT {columns}
        FROM orders o
        JOIN accounts a ON o.account_id = a.id
        WHERE {filter}
        ORDER BY o.created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let rows = client.query(sql.as_str(), &[&status, &pattern, &limit, &offset]).await?;

    let orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>, _>>()?;

    Ok((orders, count_row.get("count")))
}

/// Record the outcome of reversing an order's card payment.
pub async fn record_card_reversal(
    pool: &Pool,
    order_id: Uuid,
    status: CardReversalStatus,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    let client = pooled(pool).await?;

    let rows = client.execute(
        r#"
        UPDATE orders
        SET card_reversal_status = $2, card_reversal_error = $3, updated_at = NOW()
        WHERE id = $1
        "#,
        &[&order_id, &status.as_str(), &error_message],
    ).await?;

    if rows == 0 {
        return Err(DatabaseError::NotFound(format!("Order not found: {}", order_id)));
    }

    Ok(())
}

/// Reversed orders whose card refund still needs manual attention.
pub async fn list_failed_card_reversals(pool: &Pool) -> Result<Vec<OrderRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let sql = format!(
        r#"
        SELECT {ORDER_COLUMNS}
        FROM orders
        WHERE status IN ('cancelled', 'refunded')
          AND payment_card > 0
          AND card_reversal_status = 'failed'
        ORDER BY updated_at
        "#
    );
    let rows = client.query(sql.as_str(), &[]).await?;

    rows.iter().map(row_to_order).collect()
}

// ============================================
// PAYMENT REQUEST QUERIES
// ============================================

/// Record a card gateway request.
pub async fn insert_payment_request(
    pool: &Pool,
    request: &PaymentRequestRecord,
) -> Result<(), DatabaseError> {
    let client = pooled(pool).await?;

    client.execute(
        r#"
        INSERT INTO payment_requests (
            id, order_ref, amount, status, gateway_transaction_id,
            error_message, payment_data, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
        &[
            &request.id,
            &request.order_ref,
            &request.amount,
            &request.status.as_str(),
            &request.gateway_transaction_id,
            &request.error_message,
            &request.payment_data,
            &request.created_at,
            &request.updated_at,
        ],
    ).await?;

    Ok(())
}

/// Update one payment request after the gateway answered.
pub async fn update_payment_request(
    pool: &Pool,
    id: Uuid,
    status: PaymentRequestStatus,
    gateway_transaction_id: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    let client = pooled(pool).await?;

    client.execute(
        r#"
        UPDATE payment_requests
        SET status = $2,
            gateway_transaction_id = COALESCE($3, gateway_transaction_id),
            error_message = $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
        &[&id, &status.as_str(), &gateway_transaction_id, &error_message],
    ).await?;

    Ok(())
}

/// Latest completed authorization for an order reference.
pub async fn find_completed_payment_request(
    pool: &Pool,
    order_ref: &str,
) -> Result<Option<PaymentRequestRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let row = client.query_opt(
        r#"
        SELECT id, order_ref, amount, status, gateway_transaction_id,
               error_message, payment_data, created_at, updated_at
        FROM payment_requests
        WHERE order_ref = $1 AND status = 'completed'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        &[&order_ref],
    ).await?;

    row.as_ref().map(row_to_payment_request).transpose()
}

/// All payment requests for an order reference, oldest first.
pub async fn list_payment_requests(
    pool: &Pool,
    order_ref: &str,
) -> Result<Vec<PaymentRequestRecord>, DatabaseError> {
    let client = pooled(pool).await?;

    let rows = client.query(
        r#"
        SELECT id, order_ref, amount, status, gateway_transaction_id,
               error_message, payment_data, created_at, updated_at
        FROM payment_requests
        WHERE order_ref = $1
        ORDER BY created_at
        "#,
        &[&order_ref],
    ).await?;

    rows.iter().map(row_to_payment_request).collect()
}

/// Apply an asynchronous gateway notification to the matching requests.
///
/// Returns how many rows were updated. Orders and balances are never
/// touched from here.
pub async fn apply_payment_callback(
    pool: &Pool,
    order_ref: &str,
    status: PaymentRequestStatus,
    gateway_transaction_id: Option<&str>,
    error_message: Option<&str>,
    payment_data: &serde_json::Value,
) -> Result<u64, DatabaseError> {
    let client = pooled(pool).await?;

    let rows = client.execute(
        r#"
        UPDATE payment_requests
        SET status = $2,
            gateway_transaction_id = COALESCE($3, gateway_transaction_id),
            error_message = $4,
            payment_data = payment_data || $5::jsonb,
            updated_at = NOW()
        WHERE order_ref = $1 AND status <> 'cancelled'
        "#,
        &[&order_ref, &status.as_str(), &gateway_transaction_id, &error_message, payment_data],
    ).await?;

    Ok(rows)
}

// ============================================
// POINT WITHDRAWAL QUERIES
// ============================================

/// Insert a withdrawal request.
pub async fn insert_point_withdrawal(
    tx: &Transaction<'_>,
    record: &PointWithdrawalRecord,
) -> Result<(), DatabaseError> {
    tx.execute(
        r#"
        INSERT INTO point_withdrawals (
            id, account_id, point_type, amount, bank_name, bank_account_number, account_holder,
            status, scheduled_payment_date, admin_note, processed_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
        &[
            &record.id,
            &record.account_id,
            &record.point_type.as_str(),
            &record.amount,
            &record.bank_name,
            &record.bank_account_number,
            &record.account_holder,
            &record.status.as_str(),
            &record.scheduled_payment_date,
            &record.admin_note,
            &record.processed_at,
            &record.created_at,
        ],
    ).await?;

    Ok(())
}

/// Lock a withdrawal row for a state change.
pub async fn lock_point_withdrawal(
    tx: &Transaction<'_>,
    withdrawal_id: Uuid,
) -> Result<Option<PointWithdrawalRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM point_withdrawals WHERE id = $1 FOR UPDATE"
    );

    let row = tx.query_opt(sql.as_str(), &[&withdrawal_id]).await?;

    row.as_ref().map(row_to_withdrawal).transpose()
}

/// Move a locked withdrawal to `status`, keeping the previous note when
/// `admin_note` is `None`.
pub async fn update_point_withdrawal_status(
    tx: &Transaction<'_>,
    withdrawal_id: Uuid,
    status: WithdrawalStatus,
    admin_note: Option<&str>,
) -> Result<PointWithdrawalRecord, DatabaseError> {
    let sql = format!(
        r#"
        UPDATE point_withdrawals
        SET status = $2, admin_note = COALESCE($3, admin_note), processed_at = NOW()
        WHERE id = $1
        RETURNING {WITHDRAWAL_COLUMNS}
        "#
    );

    let row = tx.query_one(sql.as_str(), &[&withdrawal_id, &status.as_str(), &admin_note]).await?;

    row_to_withdrawal(&row)
}

/// Page through withdrawals, newest first, optionally of one account
/// and/or one status.
pub async fn list_point_withdrawals(
    pool: &Pool,
    account_id: Option<Uuid>,
    status: Option<WithdrawalStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PointWithdrawalRecord>, i64), DatabaseError> {
    let client = pooled(pool).await?;
    let status = status.map(|s| s.as_str());

    let filter = "($1::UUID IS NULL OR account_id = $1) AND ($2::TEXT IS NULL OR status = $2)";

    let count_sql = format!("SELECT COUNT(*) AS count FROM point_withdrawals WHERE {filter}");
    let count_row = client.query_one(count_sql.as_str(), &[&account_id, &status]).await?;

    let sql = format!(
        r#"
        SELECT {WITHDRAWAL_COLUMNS}
        FROM point_withdrawals
        WHERE {filter}
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let rows = client.query(sql.as_str(), &[&account_id, &status, &limit, &offset]).await?;

    let withdrawals = rows.iter().map(row_to_withdrawal).collect::<Result<Vec<_>, _>>()?;

    Ok((withdrawals, count_row.get("count")))
}
