//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `accounts` | Dealers and consumers; owning key for every balance |
//! | `products` | Catalog entries with prices, PV and stock counter |
//! | `wallet_balances` / `wallet_transactions` | X-pay stored value + audit trail |
//! | `point_balances` / `point_transactions` | Spendable points per type + audit trail |
//! | `pending_points` | Escrowed point rewards waiting for the vesting date |
//! | `orders` / `order_items` | Settled orders with payment breakdown and line snapshots |
//! | `payment_requests` | Card gateway authorizations and reversals |
//! | `point_withdrawals` | Point cash-out requests and their review state |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐       ┌──────────────────┐       ┌──────────────┐
//! │  accounts   │──────<│      orders      │──────<│ order_items  │
//! │             │       │                  │       │              │
//! │ id (PK)     │       │ account_id (FK)  │       │ product_id   │
//! │ grade       │       │ status           │       │ quantity     │
//! └─────────────┘       │ payment_*        │       └──────────────┘
//!        │              └──────────────────┘
//!        │                       │
//!        ▼                       ▼
//! ┌──────────────────┐   ┌──────────────────┐
//! │ *_balances       │   │  pending_points  │
//! │ *_transactions   │   │  order_id (FK)   │
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! ## Note on Types
//!
//! Money and points are `NUMERIC(15, 2)` columns mapped to
//! `rust_decimal::Decimal`. Enumerations are stored as lowercase text.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DatabaseError;

/// Declares a text-backed enum with `as_str`, `Display` and `FromStr`.
///
/// The text form is what goes into the database and over the wire.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Stored/wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(DatabaseError::InvalidData(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// Account grade. Only dealers earn PV on purchases.
    pub enum AccountGrade {
        Dealer => "dealer",
        Consumer => "consumer",
    }
}

text_enum! {
    /// Point ledgers kept per account. Only the X ledger is active.
    pub enum PointType {
        X => "X",
    }
}

text_enum! {
    /// Order lifecycle.
    ///
    /// ```text
    /// pending → paid → processing → shipped → delivered
    ///            └──────────┴───────────┴──→ cancelled | refunded (terminal)
    /// ```
    pub enum OrderStatus {
        Pending => "pending",
        Paid => "paid",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

impl OrderStatus {
    /// `cancelled` and `refunded` accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Position on the forward fulfilment chain; `None` for terminal states.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Paid => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled | OrderStatus::Refunded => None,
        }
    }

    /// Whether an order in `self` may move to `next`.
    ///
    /// Forward moves along the chain may skip steps but never go back.
    /// Reversal targets are reachable from `paid`, `processing` and
    /// `shipped` only.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return matches!(
                self,
                OrderStatus::Paid | OrderStatus::Processing | OrderStatus::Shipped
            );
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

text_enum! {
    /// Escrow state of a pending point reward.
    pub enum PendingPointStatus {
        Pending => "pending",
        Released => "released",
        Cancelled => "cancelled",
    }
}

text_enum! {
    /// Audit row kinds for the wallet ledger.
    pub enum WalletTransactionType {
        Deposit => "deposit",
        Payment => "payment",
        Refund => "refund",
    }
}

text_enum! {
    /// Audit row kinds for the point ledger.
    pub enum PointTransactionType {
        Grant => "grant",
        AdminDeduct => "admin_deduct",
        PvReward => "pv_reward",
        OrderPayment => "order_payment",
        Refund => "refund",
        Withdrawal => "withdrawal",
    }
}

text_enum! {
    /// Review state of a point cash-out.
    ///
    /// ```text
    /// pending → approved → completed
    ///    └────→ rejected (points refunded)
    /// ```
    pub enum WithdrawalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Completed => "completed",
    }
}

impl WithdrawalStatus {
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        matches!(
            (self, next),
            (WithdrawalStatus::Pending, WithdrawalStatus::Approved)
                | (WithdrawalStatus::Pending, WithdrawalStatus::Rejected)
                | (WithdrawalStatus::Approved, WithdrawalStatus::Completed)
        )
    }
}

text_enum! {
    /// Outcome of reversing the card portion of a cancelled order.
    pub enum CardReversalStatus {
        NotRequired => "not_required",
        Reversed => "reversed",
        Failed => "failed",
    }
}

text_enum! {
    /// Lifecycle of a card gateway request.
    pub enum PaymentRequestStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// A dealer or consumer account.
///
/// Accounts are created at signup and only ever soft-deactivated.
/// The referrer link feeds the genealogy screens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub grade: AccountGrade,
    pub referrer_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A catalog product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,

    /// Unit price charged to consumer-grade accounts.
    pub price_consumer: Decimal,

    /// Unit price charged to dealer-grade accounts.
    pub price_dealer: Decimal,

    /// Performance value earned per unit by dealers.
    pub pv_value: Decimal,

    /// Units on hand. Never negative.
    pub stock_quantity: i32,

    pub is_active: bool,
}

/// One wallet ("X-pay") audit row.
///
/// `amount` is signed: deposits and refunds are positive, payments
/// negative. The running sum of `amount` equals the wallet balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub transaction_type: WalletTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,

    /// Order this movement belongs to, if any.
    pub reference_id: Option<Uuid>,

    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One point-ledger audit row. Same sign convention as the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub point_type: PointType,
    pub transaction_type: PointTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An escrowed point reward.
///
/// Created once per order with PV. Moves to `released` (by the release
/// job) or `cancelled` (when the order is reversed first); both are final.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPointRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub order_id: Uuid,
    pub point_type: PointType,

    /// Points credited on release.
    pub point_amount: Decimal,

    /// PV the reward was computed from.
    pub pv_amount: Decimal,

    /// Date (home timezone) from which the release job may pay it out.
    pub scheduled_release_date: NaiveDate,

    pub status: PendingPointStatus,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Shipping snapshot stored on the order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShippingInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub postal_code: Option<String>,
    pub memo: Option<String>,
}

/// A settled order.
///
/// The `payment_*` columns record how much of `total_amount` each
/// instrument covered; the reversal engine refunds from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub account_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub total_pv: Decimal,
    pub payment_wallet: Decimal,
    pub payment_point: Decimal,
    pub payment_card: Decimal,
    pub payment_bank: Decimal,
    pub shipping: ShippingInfo,

    /// Gateway transaction id of the card authorization, if any.
    pub gateway_transaction_id: Option<String>,

    /// Shipment tracking number.
    pub invoice_number: Option<String>,

    pub card_reversal_status: CardReversalStatus,
    pub card_reversal_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product snapshot for one order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub unit_pv: Decimal,
    pub total_price: Decimal,
    pub total_pv: Decimal,
}

/// A request sent to the card gateway.
///
/// Written outside the settlement transaction so declined or failed
/// attempts stay on record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestRecord {
    pub id: Uuid,

    /// Order number the gateway knows the payment by.
    pub order_ref: String,

    pub amount: Decimal,
    pub status: PaymentRequestStatus,
    pub gateway_transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub payment_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A request to pay points out to a bank account.
///
/// The points leave the balance when the request is made; a rejection
/// credits them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointWithdrawalRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub point_type: PointType,
    pub amount: Decimal,
    pub bank_name: String,
    pub bank_account_number: String,
    pub account_holder: String,
    pub status: WithdrawalStatus,

    /// Business day (home timezone) the payout is due.
    pub scheduled_payment_date: NaiveDate,

    pub admin_note: Option<String>,

    /// When the request last changed state.
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_transitions() {
        use WithdrawalStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Rejected));
        for terminal in [Rejected, Completed] {
            for next in [Pending, Approved, Rejected, Completed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_order_status_forward_chain() {
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_order_status_reversal_sources() {
        for from in [OrderStatus::Paid, OrderStatus::Processing, OrderStatus::Shipped] {
            assert!(from.can_transition_to(OrderStatus::Cancelled));
            assert!(from.can_transition_to(OrderStatus::Refunded));
        }
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ];
        for terminal in [OrderStatus::Cancelled, OrderStatus::Refunded] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_text_enum_parsing() {
        assert_eq!("admin_deduct".parse::<PointTransactionType>().unwrap(), PointTransactionType::AdminDeduct);
        assert_eq!(CardReversalStatus::NotRequired.as_str(), "not_required");
        assert!(matches!(
            "archived".parse::<OrderStatus>(),
            Err(DatabaseError::InvalidData(_))
        ));
    }

    #[test]
    fn test_text_enum_serde_uses_stored_form() {
        let json = serde_json::to_string(&PendingPointStatus::Released).unwrap();
        assert_eq!(json, "\"released\"");
        let grade: AccountGrade = serde_json::from_str("\"dealer\"").unwrap();
        assert_eq!(grade, AccountGrade::Dealer);
    }
}
