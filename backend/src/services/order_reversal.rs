//! # Order Reversal Service
//!
//! Status changes after settlement. Cancelling or refunding an order
//! undoes its local effects atomically; the card refund happens after
//! commit and is tracked separately.
//!
//! ## Flow: Cancel / Refund
//!
//! ```text
//! BEGIN
//!   lock order row, reject terminal or illegal moves
//!   cancel pending escrow               (no-op if already released/cancelled)
//!   restore stock (by product id)
//!   refund wallet, refund points        (audit type: refund)
//!   set status
//! COMMIT
//!          ↓
//! card portion > 0 ?  → gateway reverse → card_reversal_status
//!                                          reversed | failed (+ error)
//! ```
//!
//! A failed card reversal never unwinds the committed local reversal.
//! Such orders show up in [`OrderReversal::list_unreconciled_reversals`]
//! until [`OrderReversal::retry_card_reversal`] succeeds.

use rust_decimal::Decimal;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::queries;
use crate::db::{
    CardReversalStatus, Database, OrderRecord, OrderStatus, PointTransactionType, PointType,
    WalletTransactionType,
};
use crate::models::OrderDetailResponse;

use super::ledger;
use super::order_settlement::{load_order_detail, OrderError};
use super::payment_gateway::{CardPayments, GatewayOutcome};

/// Service for order status changes and card reversal reconciliation.
#[derive(Clone)]
pub struct OrderReversal {
    db: Database,
    payments: CardPayments,
}

impl OrderReversal {
    pub fn new(db: Database, payments: CardPayments) -> Self {
        Self { db, payments }
    }

    /// Move an order to `new_status`.
    ///
    /// `cancelled` and `refunded` run the full local reversal followed by
    /// a best-effort card reversal; other targets only change the status.
    ///
    /// ## Returns
    ///
    /// * `Ok(OrderDetailResponse)` - The order after the change
    /// * `Err(OrderError::AlreadyFinalized)` - The order was terminal
    /// * `Err(OrderError::InvalidTransition)` - The move is not allowed
    pub async fn set_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderDetailResponse, OrderError> {
        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        let order = queries::lock_order_for_update(&tx, order_id).await?
            .ok_or(OrderError::OrderNotFound(order_id))?;
        check_transition(&order, new_status)?;

        let reversing = new_status.is_terminal();
        if reversing {
            // Escrow before balances, the same order the release job locks in.
            queries::cancel_pending_points_for_order(&tx, order_id).await?;

            let items = queries::order_items_in_tx(&tx, order_id).await?;
            for item in &items {
                queries::adjust_product_stock(&tx, item.product_id, item.quantity).await?;
            }

            let note = format!("Refund for order {}", order.order_number);
            if order.payment_wallet > Decimal::ZERO {
                ledger::credit_wallet(&tx, order.account_id, order.payment_wallet,
                    WalletTransactionType::Refund, Some(order.id), &note).await?;
            }
            if order.payment_point > Decimal::ZERO {
                ledger::credit_points(&tx, order.account_id, PointType::X, order.payment_point,
                    PointTransactionType::Refund, Some(order.id), &note).await?;
            }
        }
        queries::update_order_status(&tx, order_id, new_status).await?;

        tx.commit().await?;

        info!("Order {} moved from {} to {}", order.order_number, order.status, new_status);

        if reversing && order.payment_card > Decimal::ZERO {
            self.reverse_card(&order).await;
        }

        load_order_detail(&self.db, order_id).await
    }

    /// Store a shipment tracking number and mark the order shipped.
    pub async fn set_invoice_number(
        &self,
        order_id: Uuid,
        invoice_number: &str,
    ) -> Result<OrderDetailResponse, OrderError> {
        let invoice_number = invoice_number.trim();
        if invoice_number.is_empty() {
            return Err(OrderError::Validation("invoice number is required".to_string()));
        }

        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        let order = queries::lock_order_for_update(&tx, order_id).await?
            .ok_or(OrderError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(OrderError::AlreadyFinalized {
                order_number: order.order_number,
                status: order.status,
            });
        }
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::Processing | OrderStatus::Shipped) {
            return Err(OrderError::InvalidTransition { from: order.status, to: OrderStatus::Shipped });
        }

        queries::set_invoice_number(&tx, order_id, invoice_number, OrderStatus::Shipped).await?;
        tx.commit().await?;

        info!("Order {} shipped with invoice {}", order.order_number, invoice_number);

        load_order_detail(&self.db, order_id).await
    }

    // ==========================================
    // CARD RECONCILIATION
    // ==========================================

    /// Reversed orders whose card refund failed.
    pub async fn list_unreconciled_reversals(&self) -> Result<Vec<OrderRecord>, OrderError> {
        Ok(queries::list_failed_card_reversals(self.db.pool()).await?)
    }

    /// Call the gateway again for one order whose card reversal failed.
    pub async fn retry_card_reversal(&self, order_id: Uuid) -> Result<OrderDetailResponse, OrderError> {
        let order = queries::get_order(self.db.pool(), order_id).await?
            .ok_or(OrderError::OrderNotFound(order_id))?;
        if !order.status.is_terminal()
            || order.payment_card <= Decimal::ZERO
            || order.card_reversal_status != CardReversalStatus::Failed
        {
            return Err(OrderError::NoFailedReversal(order.order_number));
        }

        self.reverse_card(&order).await;

        load_order_detail(&self.db, order_id).await
    }

    /// Reverse the card portion of an order and record the result.
    async fn reverse_card(&self, order: &OrderRecord) -> CardReversalStatus {
        let (status, failure) = match self.payments.reverse(&order.order_number, order.payment_card).await {
            Ok(GatewayOutcome::Approved { .. }) => (CardReversalStatus::Reversed, None),
            Ok(GatewayOutcome::Declined { code, message }) => {
                (CardReversalStatus::Failed, Some(format!("[{}] {}", code, message)))
            }
            Err(e) => (CardReversalStatus::Failed, Some(e.to_string())),
        };

        if let Some(reason) = &failure {
            error!(
                "Card reversal of {} for order {} failed, manual reconciliation needed: {}",
                order.payment_card, order.order_number, reason
            );
        }

        if let Err(e) = queries::record_card_reversal(self.db.pool(), order.id, status, failure.as_deref()).await {
            error!("Could not record card reversal result for order {}: {}", order.order_number, e);
        }

        status
    }
}

/// Reject moves out of terminal states and moves the state machine forbids.
fn check_transition(order: &OrderRecord, next: OrderStatus) -> Result<(), OrderError> {
    if order.status.is_terminal() {
        return Err(OrderError::AlreadyFinalized {
            order_number: order.order_number.clone(),
            status: order.status,
        });
    }
    if !order.status.can_transition_to(next) {
        return Err(OrderError::InvalidTransition { from: order.status, to: next });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::{AccountGrade, PaymentRequestStatus, PendingPointStatus};
    use crate::models::{OrderLineRequest, PaymentInstrument, PlaceOrderRequest};
    use crate::services::test_support::{self, card_details, Script, ScriptedGateway};
    use crate::services::{ErrorKind, LedgerService, PointRelease};
    use crate::config::AppConfig;
    use chrono::NaiveDate;

    fn order_request(account_id: Uuid, product_id: Uuid, quantity: i32, payments: Vec<PaymentInstrument>) -> PlaceOrderRequest {
        PlaceOrderRequest {
            account_id,
            items: vec![OrderLineRequest { product_id, quantity }],
            payments,
            shipping: test_support::shipping(),
        }
    }

    fn wallet(amount: i64) -> PaymentInstrument {
        PaymentInstrument::Wallet { amount: Decimal::from(amount) }
    }

    #[test]
    fn test_check_transition() {
        let mut order = test_support::order_record(OrderStatus::Delivered);
        assert!(matches!(
            check_transition(&order, OrderStatus::Cancelled),
            Err(OrderError::InvalidTransition { .. })
        ));

        order.status = OrderStatus::Refunded;
        let err = check_transition(&order, OrderStatus::Cancelled).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(err.code(), "ALREADY_FINALIZED");

        order.status = OrderStatus::Processing;
        assert!(check_transition(&order, OrderStatus::Paid).is_err());
        assert!(check_transition(&order, OrderStatus::Delivered).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_restores_everything_once() {
        let Some(db) = test_support::test_database().await else { return };
        let gateway = Arc::new(ScriptedGateway::approving());
        let settlement = test_support::settlement(&db, gateway.clone());
        let reversal = test_support::reversal(&db, gateway);
        let ledger = LedgerService::new(db.clone());

        let account = test_support::create_account(&db, AccountGrade::Dealer).await;
        let product = test_support::create_product(&db, 10_000, 13_000, 100, 5).await;
        test_support::fund_wallet(&db, account, 25_000).await;

        let placed = settlement
            .place_order(order_request(account, product, 2, vec![wallet(20_000)]))
            .await
            .unwrap();

        let cancelled = reversal.set_order_status(placed.order.id, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.pending_point.unwrap().status, PendingPointStatus::Cancelled);
        assert_eq!(cancelled.order.card_reversal_status, CardReversalStatus::NotRequired);
        assert_eq!(test_support::product_stock(&db, product).await, 5);

        let balances = ledger.get_balances(account).await.unwrap();
        assert_eq!(balances.wallet_balance, Decimal::from(25_000));
        assert_eq!(balances.pending_point_balance, Decimal::ZERO);
        let history_len = ledger.wallet_history(account, 1, 50).await.unwrap().total;
        assert_eq!(history_len, 3);

        let err = reversal.set_order_status(placed.order.id, OrderStatus::Cancelled).await.unwrap_err();
        assert!(matches!(err, OrderError::AlreadyFinalized { .. }));
        assert_eq!(ledger.get_balances(account).await.unwrap().wallet_balance, Decimal::from(25_000));
        assert_eq!(ledger.wallet_history(account, 1, 50).await.unwrap().total, history_len);
        assert_eq!(test_support::product_stock(&db, product).await, 5);

        let err = reversal.set_order_status(placed.order.id, OrderStatus::Shipped).await.unwrap_err();
        assert!(matches!(err, OrderError::AlreadyFinalized { .. }));
    }

    #[tokio::test]
    async fn test_refund_returns_points_and_keeps_audit_consistent() {
        let Some(db) = test_support::test_database().await else { return };
        let gateway = Arc::new(ScriptedGateway::approving());
        let settlement = test_support::settlement(&db, gateway.clone());
        let reversal = test_support::reversal(&db, gateway);
        let ledger = LedgerService::new(db.clone());

        let account = test_support::create_account(&db, AccountGrade::Dealer).await;
        let product = test_support::create_product(&db, 10_000, 13_000, 100, 5).await;
        test_support::fund_wallet(&db, account, 4_000).await;
        ledger.grant_points(&test_support::adjustment(account, 6_000)).await.unwrap();

        let placed = settlement
            .place_order(order_request(
                account,
                product,
                1,
                vec![
                    wallet(4_000),
                    PaymentInstrument::Points { point_type: PointType::X, amount: Decimal::from(6_000) },
                ],
            ))
            .await
            .unwrap();
        reversal.set_order_status(placed.order.id, OrderStatus::Processing).await.unwrap();

        let refunded = reversal.set_order_status(placed.order.id, OrderStatus::Refunded).await.unwrap();
        assert_eq!(refunded.order.status, OrderStatus::Refunded);

        let balances = ledger.get_balances(account).await.unwrap();
        assert_eq!(balances.wallet_balance, Decimal::from(4_000));
        assert_eq!(balances.point_balance, Decimal::from(6_000));
        assert_eq!(test_support::point_audit_sum(&db, account).await, balances.point_balance);
        assert_eq!(test_support::wallet_audit_sum(&db, account).await, balances.wallet_balance);

        let points = ledger.point_history(account, None, 1, 10).await.unwrap();
        assert_eq!(points.items[0].transaction_type, PointTransactionType::Refund);
        assert_eq!(points.items[0].reference_id, Some(placed.order.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_racing_release_settles_escrow_once() {
        let Some(db) = test_support::test_database().await else { return };
        let gateway = Arc::new(ScriptedGateway::approving());
        let settlement = test_support::settlement(&db, gateway.clone());
        let reversal = test_support::reversal(&db, gateway);
        let release = PointRelease::new(db.clone(), AppConfig::for_tests("unused"));
        let ledger = LedgerService::new(db.clone());
        let due = NaiveDate::from_ymd_opt(1975, 5, 5).unwrap();

        for _ in 0..5 {
            let account = test_support::create_account(&db, AccountGrade::Dealer).await;
            let product = test_support::create_product(&db, 10_000, 13_000, 100, 5).await;
            ledger.grant_points(&test_support::adjustment(account, 10_000)).await.unwrap();

            let placed = settlement
                .place_order(order_request(
                    account,
                    product,
                    1,
                    vec![PaymentInstrument::Points { point_type: PointType::X, amount: Decimal::from(10_000) }],
                ))
                .await
                .unwrap();
            test_support::backdate_pending_point(&db, placed.order.id, due).await;

            let (cancelled, released) = tokio::join!(
                reversal.set_order_status(placed.order.id, OrderStatus::Cancelled),
                release.release_due(due),
            );
            cancelled.unwrap();
            released.unwrap();

            let escrow = queries::get_pending_point_for_order(db.pool(), placed.order.id).await.unwrap().unwrap();
            let balance = ledger.get_balances(account).await.unwrap().point_balance;
            match escrow.status {
                PendingPointStatus::Released => assert_eq!(balance, Decimal::from(10_050)),
                PendingPointStatus::Cancelled => assert_eq!(balance, Decimal::from(10_000)),
                other => panic!("escrow left {:?}", other),
            }
            assert_eq!(test_support::point_audit_sum(&db, account).await, balance);
        }
    }

    #[tokio::test]
    async fn test_failed_card_reversal_is_tracked_and_retried() {
        let Some(db) = test_support::test_database().await else { return };
        let gateway = Arc::new(ScriptedGateway::approving());
        gateway.set_reverse(Script::Fail);
        let settlement = test_support::settlement(&db, gateway.clone());
        let reversal = test_support::reversal(&db, gateway.clone());

        let account = test_support::create_account(&db, AccountGrade::Dealer).await;
        let product = test_support::create_product(&db, 10_000, 13_000, 100, 5).await;

        let placed = settlement
            .place_order(order_request(
                account,
                product,
                1,
                vec![PaymentInstrument::Card { amount: Decimal::from(10_000), card: card_details() }],
            ))
            .await
            .unwrap();

        let cancelled = reversal.set_order_status(placed.order.id, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.order.card_reversal_status, CardReversalStatus::Failed);
        assert!(cancelled.order.card_reversal_error.is_some());
        assert_eq!(test_support::product_stock(&db, product).await, 5);

        let open = reversal.list_unreconciled_reversals().await.unwrap();
        assert!(open.iter().any(|o| o.id == placed.order.id));

        gateway.set_reverse(Script::Approve);
        let retried = reversal.retry_card_reversal(placed.order.id).await.unwrap();
        assert_eq!(retried.order.card_reversal_status, CardReversalStatus::Reversed);
        assert_eq!(gateway.reverse_calls(), 2);

        let open = reversal.list_unreconciled_reversals().await.unwrap();
        assert!(!open.iter().any(|o| o.id == placed.order.id));

        let requests = queries::list_payment_requests(db.pool(), &placed.order.order_number).await.unwrap();
        assert_eq!(requests[0].status, PaymentRequestStatus::Cancelled);

        let err = reversal.retry_card_reversal(placed.order.id).await.unwrap_err();
        assert_eq!(err.code(), "NO_FAILED_REVERSAL");
    }

    #[tokio::test]
    async fn test_invoice_moves_order_to_shipped() {
        let Some(db) = test_support::test_database().await else { return };
        let gateway = Arc::new(ScriptedGateway::approving());
        let settlement = test_support::settlement(&db, gateway.clone());
        let reversal = test_support::reversal(&db, gateway);

        let account = test_support::create_account(&db, AccountGrade::Consumer).await;
        let product = test_support::create_product(&db, 1_000, 1_000, 0, 5).await;
        let placed = settlement
            .place_order(order_request(
                account,
                product,
                1,
                vec![PaymentInstrument::Bank { amount: Decimal::from(1_000) }],
            ))
            .await
            .unwrap();

        let err = reversal.set_invoice_number(placed.order.id, " ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let shipped = reversal.set_invoice_number(placed.order.id, "CJ-123456").await.unwrap();
        assert_eq!(shipped.order.status, OrderStatus::Shipped);
        assert_eq!(shipped.order.invoice_number.as_deref(), Some("CJ-123456"));

        reversal.set_order_status(placed.order.id, OrderStatus::Delivered).await.unwrap();
        let err = reversal.set_invoice_number(placed.order.id, "CJ-999").await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { from: OrderStatus::Delivered, .. }));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let Some(db) = test_support::test_database().await else { return };
        let reversal = test_support::reversal(&db, Arc::new(ScriptedGateway::approving()));

        let err = reversal.set_order_status(Uuid::new_v4(), OrderStatus::Cancelled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
