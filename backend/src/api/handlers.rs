//! # API Request Handlers
//!
//! Each handler:
//! 1. Extracts request data
//! 2. Calls the appropriate service
//! 3. Returns a formatted response
//!
//! ## Error Handling
//!
//! Service errors carry a kind and a stable code. The kind picks the
//! HTTP status:
//!
//! | Kind | Status |
//! |------|--------|
//! | Validation, InsufficientResource, StateConflict | 400 |
//! | NotFound | 404 |
//! | ExternalDependency | 502 |
//! | Internal | 500 |
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "INSUFFICIENT_BALANCE",
//!         "message": "Insufficient wallet balance: available 5000, requested 20000"
//!     }
//! }
//! ```

use std::fmt::Display;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::models::{
    AdminOrderListQuery,
    ApiResponse,
    BalanceAdjustmentRequest,
    BulkAdjustmentRequest,
    HealthResponse,
    HistoryQuery,
    OrderListQuery,
    PaymentCallbackRequest,
    PlaceOrderRequest,
    ReleaseRequest,
    SetInvoiceRequest,
    UpdateOrderStatusRequest,
    WithdrawalDecisionRequest,
    WithdrawalListQuery,
    WithdrawalRequest,
};
use crate::services::{AdjustmentKind, ErrorKind, LedgerError, OrderError, ReleaseError, WithdrawalError};

// ==========================================
// ERROR MAPPING
// ==========================================

/// A service error the API can render.
pub trait ApiFailure: Display {
    fn kind(&self) -> ErrorKind;
    fn code(&self) -> &'static str;
}

impl ApiFailure for LedgerError {
    fn kind(&self) -> ErrorKind {
        LedgerError::kind(self)
    }

    fn code(&self) -> &'static str {
        LedgerError::code(self)
    }
}

impl ApiFailure for OrderError {
    fn kind(&self) -> ErrorKind {
        OrderError::kind(self)
    }

    fn code(&self) -> &'static str {
        OrderError::code(self)
    }
}

impl ApiFailure for ReleaseError {
    fn kind(&self) -> ErrorKind {
        ReleaseError::kind(self)
    }

    fn code(&self) -> &'static str {
        ReleaseError::code(self)
    }
}

impl ApiFailure for WithdrawalError {
    fn kind(&self) -> ErrorKind {
        WithdrawalError::kind(self)
    }

    fn code(&self) -> &'static str {
        WithdrawalError::code(self)
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::InsufficientResource | ErrorKind::StateConflict => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ExternalDependency => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure<E: ApiFailure>(action: &str, e: &E) -> HttpResponse {
    let kind = e.kind();
    match kind {
        ErrorKind::Internal => error!("{} failed: {}", action, e),
        ErrorKind::ExternalDependency => warn!("{} failed: {}", action, e),
        _ => info!("{} rejected: {} ({})", action, e, e.code()),
    }

    let message = match kind {
        // Storage details stay in the log
        ErrorKind::Internal => "Internal server error".to_string(),
        _ => e.to_string(),
    };

    HttpResponse::build(status_for(kind)).json(ApiResponse::<()>::error(e.code(), &message))
}

fn respond<T: Serialize, E: ApiFailure>(action: &str, result: Result<T, E>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => failure(action, &e),
    }
}

// ==========================================
// GENERAL
// ==========================================

/// API information endpoint (root).
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Retail Ledger API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Order settlement, wallet and point ledger",
        "endpoints": {
            "health": "GET /health",
            "orders": {
                "place": "POST /orders",
                "list": "GET /orders?accountId=&status=&page=&limit=",
                "get": "GET /orders/{id}"
            },
            "accounts": {
                "balances": "GET /accounts/{id}/balances",
                "walletTransactions": "GET /accounts/{id}/wallet/transactions",
                "pointTransactions": "GET /accounts/{id}/points/transactions",
                "pendingPoints": "GET /accounts/{id}/points/pending",
                "withdrawals": "GET /accounts/{id}/withdrawals?status=&page=&limit="
            },
            "withdrawals": {
                "request": "POST /withdrawals"
            },
            "payments": {
                "callback": "POST /payments/callback"
            },
            "admin": {
                "orders": "GET /admin/orders?status=&search=&page=&limit=",
                "updateStatus": "PUT /admin/orders/{id}/status",
                "setInvoice": "PUT /admin/orders/{id}/invoice",
                "unreconciledReversals": "GET /admin/orders/unreconciled-reversals",
                "retryCardReversal": "POST /admin/orders/{id}/card-reversal/retry",
                "points": "POST /admin/points/{grant|deduct|bulk-grant|bulk-deduct}",
                "wallet": "POST /admin/wallet/{deposit|deduct|bulk-deposit|bulk-deduct}",
                "withdrawals": "GET /admin/withdrawals?status=&page=&limit=",
                "reviewWithdrawal": "POST /admin/withdrawals/{id}/{approve|reject|complete}",
                "releasePendingPoints": "POST /admin/jobs/pending-point-release"
            }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// `GET /health`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "database": "connected",
///         "version": "0.1.0",
///         "timestamp": "2025-03-15T00:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let db_healthy = match state.db.client().await {
        Ok(client) => client.query_one("SELECT 1", &[]).await.is_ok(),
        Err(_) => false,
    };

    let response = HealthResponse {
        status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: if db_healthy { "connected" } else { "disconnected" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ==========================================
// ORDERS
// ==========================================

/// Place and settle an order.
///
/// `POST /orders`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/orders \
///   -H "Content-Type: application/json" \
///   -d '{
///     "accountId": "7d0b...",
///     "items": [{ "productId": "3f2a...", "quantity": 2 }],
///     "payments": [
///       { "instrument": "wallet", "amount": "15000" },
///       { "instrument": "points", "pointType": "X", "amount": "5000" }
///     ],
///     "shipping": { "name": "Kim", "phone": "010-1234-5678", "address": "Seoul" }
///   }'
/// ```
///
/// On success the order is `paid`, stock and balances are debited and a
/// dealer order carries its escrowed reward in `pendingPoint`.
pub async fn place_order(
    state: web::Data<Arc<AppState>>,
    body: web::Json<PlaceOrderRequest>,
) -> HttpResponse {
    info!("Place order request for account {}", body.account_id);
    respond("Place order", state.settlement.place_order(body.into_inner()).await)
}

/// `GET /orders?accountId=...&status=...&page=1&limit=20`
pub async fn list_orders(
    state: web::Data<Arc<AppState>>,
    query: web::Query<OrderListQuery>,
) -> HttpResponse {
    respond("List orders", state.settlement.list_orders(&query).await)
}

/// `GET /orders/{id}`
pub async fn get_order(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    respond("Get order", state.settlement.get_order(path.into_inner()).await)
}

// ==========================================
// ACCOUNTS
// ==========================================

/// `GET /accounts/{id}/balances`
pub async fn get_balances(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    respond("Get balances", state.ledger.get_balances(path.into_inner()).await)
}

/// `GET /accounts/{id}/wallet/transactions?page=1&limit=20`
pub async fn wallet_transactions(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> HttpResponse {
    let result = state.ledger.wallet_history(path.into_inner(), query.page, query.limit).await;
    respond("Wallet history", result)
}

/// `GET /accounts/{id}/points/transactions?pointType=X&page=1&limit=20`
pub async fn point_transactions(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> HttpResponse {
    let result = state
        .ledger
        .point_history(path.into_inner(), query.point_type, query.page, query.limit)
        .await;
    respond("Point history", result)
}

/// `GET /accounts/{id}/points/pending`
pub async fn pending_points(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    respond("Pending points", state.ledger.list_pending_points(path.into_inner()).await)
}

/// `GET /accounts/{id}/withdrawals?status=pending&page=1&limit=20`
pub async fn account_withdrawals(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<WithdrawalListQuery>,
) -> HttpResponse {
    respond("Account withdrawals", state.withdrawals.list_for_account(path.into_inner(), &query).await)
}

// ==========================================
// WITHDRAWALS
// ==========================================

/// Request a point cash-out.
///
/// `POST /withdrawals`
///
/// The points leave the balance immediately and come back only if an
/// admin rejects the request.
pub async fn request_withdrawal(
    state: web::Data<Arc<AppState>>,
    body: web::Json<WithdrawalRequest>,
) -> HttpResponse {
    info!("Withdrawal request of {} for account {}", body.amount, body.account_id);
    respond("Request withdrawal", state.withdrawals.request_withdrawal(&body).await)
}

// ==========================================
// PAYMENT GATEWAY
// ==========================================

/// Card gateway result notification.
///
/// `POST /payments/callback` (form-encoded, sent by the gateway)
///
/// Updates payment request bookkeeping only. Always answers 200 with the
/// gateway's ack format; `rescode` other than `0000` asks for a resend.
pub async fn payment_callback(
    state: web::Data<Arc<AppState>>,
    form: web::Form<PaymentCallbackRequest>,
) -> HttpResponse {
    info!("Payment callback for {} (rescode {})", form.orderid, form.rescode);
    let ack = state.payments.handle_callback(&form).await;
    HttpResponse::Ok().json(ack)
}

// ==========================================
// ADMIN: ORDERS
// ==========================================

/// `GET /admin/orders?status=paid&search=ORD2503&page=1&limit=20`
pub async fn admin_list_orders(
    state: web::Data<Arc<AppState>>,
    query: web::Query<AdminOrderListQuery>,
) -> HttpResponse {
    respond("Admin list orders", state.settlement.list_all_orders(&query).await)
}

/// Change an order's status.
///
/// `PUT /admin/orders/{id}/status` with `{ "status": "cancelled" }`
///
/// `cancelled` and `refunded` run the reversal: stock, wallet and points
/// are restored, the escrowed reward is cancelled and any card payment is
/// reversed at the gateway.
pub async fn update_order_status(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateOrderStatusRequest>,
) -> HttpResponse {
    let order_id = path.into_inner();
    info!("Status change request for order {} -> {}", order_id, body.status);
    respond("Update order status", state.reversal.set_order_status(order_id, body.status).await)
}

/// `PUT /admin/orders/{id}/invoice` with `{ "invoiceNumber": "..." }`
pub async fn set_invoice(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<SetInvoiceRequest>,
) -> HttpResponse {
    let result = state.reversal.set_invoice_number(path.into_inner(), &body.invoice_number).await;
    respond("Set invoice", result)
}

/// `GET /admin/orders/unreconciled-reversals`
pub async fn unreconciled_reversals(state: web::Data<Arc<AppState>>) -> HttpResponse {
    respond("List unreconciled reversals", state.reversal.list_unreconciled_reversals().await)
}

/// `POST /admin/orders/{id}/card-reversal/retry`
pub async fn retry_card_reversal(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    respond("Retry card reversal", state.reversal.retry_card_reversal(path.into_inner()).await)
}

// ==========================================
// ADMIN: BALANCE ADJUSTMENTS
// ==========================================

async fn adjust(state: &AppState, kind: AdjustmentKind, body: BalanceAdjustmentRequest) -> HttpResponse {
    info!("{:?} of {} for account {}", kind, body.amount, body.account_id);
    respond("Balance adjustment", state.ledger.adjust(kind, &body).await)
}

async fn bulk_adjust(state: &AppState, kind: AdjustmentKind, body: BulkAdjustmentRequest) -> HttpResponse {
    info!("Bulk {:?} with {} rows", kind, body.rows.len());
    let result = state.ledger.bulk_adjust(kind, &body.rows).await;
    HttpResponse::Ok().json(ApiResponse::success(result))
}

/// `POST /admin/points/grant`
pub async fn grant_points(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BalanceAdjustmentRequest>,
) -> HttpResponse {
    adjust(&state, AdjustmentKind::GrantPoints, body.into_inner()).await
}

/// `POST /admin/points/deduct`
pub async fn deduct_points(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BalanceAdjustmentRequest>,
) -> HttpResponse {
    adjust(&state, AdjustmentKind::DeductPoints, body.into_inner()).await
}

/// `POST /admin/wallet/deposit`
pub async fn deposit_wallet(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BalanceAdjustmentRequest>,
) -> HttpResponse {
    adjust(&state, AdjustmentKind::DepositWallet, body.into_inner()).await
}

/// `POST /admin/wallet/deduct`
pub async fn deduct_wallet(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BalanceAdjustmentRequest>,
) -> HttpResponse {
    adjust(&state, AdjustmentKind::DeductWallet, body.into_inner()).await
}

/// Bulk grant; each row settles on its own.
///
/// `POST /admin/points/bulk-grant` with `{ "rows": [ ... ] }`
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "total": 3,
///         "successCount": 2,
///         "failCount": 1,
///         "errors": [{ "row": 2, "accountId": "...", "error": "Account not found: ..." }]
///     }
/// }
/// ```
pub async fn bulk_grant_points(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BulkAdjustmentRequest>,
) -> HttpResponse {
    bulk_adjust(&state, AdjustmentKind::GrantPoints, body.into_inner()).await
}

/// `POST /admin/points/bulk-deduct`
pub async fn bulk_deduct_points(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BulkAdjustmentRequest>,
) -> HttpResponse {
    bulk_adjust(&state, AdjustmentKind::DeductPoints, body.into_inner()).await
}

/// `POST /admin/wallet/bulk-deposit`
pub async fn bulk_deposit_wallet(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BulkAdjustmentRequest>,
) -> HttpResponse {
    bulk_adjust(&state, AdjustmentKind::DepositWallet, body.into_inner()).await
}

/// `POST /admin/wallet/bulk-deduct`
pub async fn bulk_deduct_wallet(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BulkAdjustmentRequest>,
) -> HttpResponse {
    bulk_adjust(&state, AdjustmentKind::DeductWallet, body.into_inner()).await
}

// ==========================================
// ADMIN: WITHDRAWALS
// ==========================================

/// `GET /admin/withdrawals?status=pending&page=1&limit=20`
pub async fn admin_list_withdrawals(
    state: web::Data<Arc<AppState>>,
    query: web::Query<WithdrawalListQuery>,
) -> HttpResponse {
    respond("Admin list withdrawals", state.withdrawals.list_all(&query).await)
}

/// `POST /admin/withdrawals/{id}/approve`, optional `{ "adminNote": "..." }`
pub async fn approve_withdrawal(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: Option<web::Json<WithdrawalDecisionRequest>>,
) -> HttpResponse {
    let note = body.and_then(|b| b.into_inner().admin_note);
    respond("Approve withdrawal", state.withdrawals.approve(path.into_inner(), note.as_deref()).await)
}

/// `POST /admin/withdrawals/{id}/reject`; the points are credited back.
pub async fn reject_withdrawal(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: Option<web::Json<WithdrawalDecisionRequest>>,
) -> HttpResponse {
    let note = body.and_then(|b| b.into_inner().admin_note);
    respond("Reject withdrawal", state.withdrawals.reject(path.into_inner(), note.as_deref()).await)
}

/// `POST /admin/withdrawals/{id}/complete`
pub async fn complete_withdrawal(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    respond("Complete withdrawal", state.withdrawals.complete(path.into_inner()).await)
}

// ==========================================
// ADMIN: JOBS
// ==========================================

/// Run the pending-point release now.
///
/// `POST /admin/jobs/pending-point-release`, optional body
/// `{ "date": "2025-03-15" }` to release as of another day.
pub async fn release_pending_points(
    state: web::Data<Arc<AppState>>,
    body: Option<web::Json<ReleaseRequest>>,
) -> HttpResponse {
    let date = body.and_then(|b| b.into_inner().date);
    info!("Manual pending point release (date override: {:?})", date);
    respond("Pending point release", state.release.trigger(date).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use crate::services::PaymentPlanError;

    #[test]
    fn test_status_for_kinds() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::InsufficientResource), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::StateConflict), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::ExternalDependency), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_failure_response() {
        let err = OrderError::Payment(PaymentPlanError::Mismatch {
            paid: Decimal::from(19_998),
            total: Decimal::from(20_000),
        });
        let response = failure("Place order", &err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let missing = LedgerError::AccountNotFound(Uuid::nil());
        assert_eq!(failure("Get balances", &missing).status(), StatusCode::NOT_FOUND);

        let exhausted = ReleaseError::Exhausted { attempts: 3, last_error: "down".to_string() };
        assert_eq!(failure("Release", &exhausted).status(), StatusCode::INTERNAL_SERVER_ERROR);

        let below = WithdrawalError::BelowMinimum { amount: Decimal::ONE, minimum: Decimal::TEN };
        assert_eq!(failure("Request withdrawal", &below).status(), StatusCode::BAD_REQUEST);
    }
}
