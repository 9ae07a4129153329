//! # API Request Models
//!
//! Structures for incoming API request bodies and query strings.
//! Each struct represents the expected JSON body for an endpoint.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{OrderStatus, PointType, ShippingInfo, WithdrawalStatus};

/// Request to place an order.
///
/// ## Example JSON
///
/// ```json
/// {
///     "accountId": "0f0e2c1a-...",
///     "items": [{ "productId": "8d1c...", "quantity": 2 }],
///     "payments": [
///         { "instrument": "wallet", "amount": "15000" },
///         { "instrument": "points", "pointType": "X", "amount": "5000" }
///     ],
///     "shipping": { "name": "Kim", "phone": "010-0000-0000", "address": "Seoul" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    /// Ordering account. Its grade decides the price list.
    pub account_id: Uuid,

    /// Order lines; at least one.
    pub items: Vec<OrderLineRequest>,

    /// How the total is paid. Applied in the fixed order
    /// wallet, points, card, bank regardless of list order.
    #[serde(default)]
    pub payments: Vec<PaymentInstrument>,

    /// Delivery address snapshot stored on the order.
    pub shipping: ShippingInfo,
}

/// One requested order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A single way of paying part of an order.
///
/// Serialized with an `instrument` tag:
/// `wallet`, `points`, `card` or `bank`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "instrument", rename_all = "snake_case")]
pub enum PaymentInstrument {
    /// Debit from the stored-value wallet.
    Wallet { amount: Decimal },

    /// Debit from a point balance.
    Points {
        #[serde(rename = "pointType", default = "default_point_type")]
        point_type: PointType,
        amount: Decimal,
    },

    /// Charge a card through the external gateway.
    Card { amount: Decimal, card: CardDetails },

    /// Bank transfer, recorded only.
    Bank { amount: Decimal },
}

fn default_point_type() -> PointType {
    PointType::X
}

impl PaymentInstrument {
    /// The amount this instrument contributes.
    pub fn amount(&self) -> Decimal {
        match self {
            PaymentInstrument::Wallet { amount }
            | PaymentInstrument::Points { amount, .. }
            | PaymentInstrument::Card { amount, .. }
            | PaymentInstrument::Bank { amount } => *amount,
        }
    }

    /// Short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PaymentInstrument::Wallet { .. } => "wallet",
            PaymentInstrument::Points { .. } => "points",
            PaymentInstrument::Card { .. } => "card",
            PaymentInstrument::Bank { .. } => "bank",
        }
    }
}

/// Card data forwarded to the gateway for a keyed-in payment.
///
/// Never stored. `Debug` masks everything but the last four digits.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    /// Card number, digits only.
    pub number: String,

    /// Expiry as `YYYYMM`.
    pub expiry: String,

    /// Birth date (`YYMMDD`) or business registration number.
    pub auth_code: String,

    /// First two digits of the card password.
    pub password_prefix: String,

    /// Installment months; `00` for a lump-sum payment.
    #[serde(default = "default_installment")]
    pub installment: String,

    pub customer_name: String,

    #[serde(default)]
    pub customer_email: Option<String>,
}

fn default_installment() -> String {
    "00".to_string()
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail: String = self.number.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        f.debug_struct("CardDetails")
            .field("number", &format!("****{}", tail))
            .field("installment", &self.installment)
            .field("customer_name", &self.customer_name)
            .finish_non_exhaustive()
    }
}

/// Query parameters for an account's order list.
///
/// ## Example URL
///
/// ```text
/// GET /orders?accountId=0f0e2c1a-...&status=paid&page=1&limit=20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    pub account_id: Uuid,

    pub status: Option<OrderStatus>,

    /// 1-based page number. Default: 1
    #[serde(default = "default_page")]
    pub page: i64,

    /// Page size. Default: 20, Max: 100
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Query parameters for the admin order list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderListQuery {
    pub status: Option<OrderStatus>,

    /// Matches order number, account name or email.
    pub search: Option<String>,

    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Query parameters for wallet and point history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Only used by the point history.
    pub point_type: Option<PointType>,

    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

/// Request to move an order to another status.
///
/// ## Example JSON
///
/// ```json
/// { "status": "cancelled" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Request to attach a shipment tracking number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInvoiceRequest {
    pub invoice_number: String,
}

/// A single administrative balance change.
///
/// Used for point grant/deduct and wallet deposit/deduct, and as one
/// row of a bulk request.
///
/// ## Example JSON
///
/// ```json
/// {
///     "accountId": "0f0e2c1a-...",
///     "amount": "1000",
///     "reason": "Event reward"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAdjustmentRequest {
    pub account_id: Uuid,

    /// Positive amount to add or remove.
    pub amount: Decimal,

    /// Free-text reason appended to the audit description.
    #[serde(default)]
    pub reason: Option<String>,

    /// Point type for point adjustments. Default: X
    #[serde(default = "default_point_type")]
    pub point_type: PointType,
}

/// A batch of administrative balance changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAdjustmentRequest {
    pub rows: Vec<BalanceAdjustmentRequest>,
}

/// Asynchronous payment notification posted by the card gateway.
///
/// Field names follow the gateway's form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallbackRequest {
    pub orderid: String,
    pub tranid: Option<String>,
    pub rescode: String,
    #[serde(default)]
    pub resmsg: String,
    pub card_num: Option<String>,
    pub card_auth_no: Option<String>,
    pub card_name: Option<String>,
    pub tran_date: Option<String>,
}

/// Manual trigger for the pending-point release job.
///
/// `date` overrides "today" in the home timezone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub date: Option<NaiveDate>,
}

/// Request to cash out points to a bank account.
///
/// ## Example JSON
///
/// ```json
/// {
///     "accountId": "0f0e2c1a-...",
///     "amount": "50000",
///     "bankName": "Kookmin",
///     "accountNumber": "123-456-7890",
///     "accountHolder": "Kim"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
}

/// Admin decision on a withdrawal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDecisionRequest {
    #[serde(default)]
    pub admin_note: Option<String>,
}

/// Query parameters for withdrawal lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalListQuery {
    pub status: Option<WithdrawalStatus>,

    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_instrument_tagging() {
        let json = r#"[
            {"instrument": "wallet", "amount": "15000"},
            {"instrument": "points", "amount": 5000},
            {"instrument": "bank", "amount": "0"}
        ]"#;

        let parsed: Vec<PaymentInstrument> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(matches!(parsed[0], PaymentInstrument::Wallet { amount } if amount == Decimal::from(15000)));
        assert!(matches!(
            parsed[1],
            PaymentInstrument::Points { point_type: PointType::X, amount } if amount == Decimal::from(5000)
        ));
        assert_eq!(parsed[2].name(), "bank");
    }

    #[test]
    fn test_unknown_instrument_is_rejected() {
        let json = r#"{"instrument": "coupon", "amount": "100"}"#;
        assert!(serde_json::from_str::<PaymentInstrument>(json).is_err());
    }

    #[test]
    fn test_card_debug_masks_number() {
        let card = CardDetails {
            number: "1234567812345678".to_string(),
            expiry: "202812".to_string(),
            auth_code: "900101".to_string(),
            password_prefix: "12".to_string(),
            installment: "00".to_string(),
            customer_name: "Kim".to_string(),
            customer_email: None,
        };

        let printed = format!("{:?}", card);
        assert!(printed.contains("****5678"));
        assert!(!printed.contains("12345678123"));
        assert!(!printed.contains("900101"));
    }

    #[test]
    fn test_withdrawal_request_shape() {
        let json = r#"{
            "accountId": "00000000-0000-0000-0000-000000000001",
            "amount": "50000",
            "bankName": "Kookmin",
            "accountNumber": "123-456",
            "accountHolder": "Kim"
        }"#;
        let parsed: WithdrawalRequest = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.amount, Decimal::from(50_000));
        assert_eq!(parsed.account_number, "123-456");

        let query: WithdrawalListQuery = serde_json::from_str(r#"{"status": "approved"}"#).unwrap();
        assert_eq!(query.status, Some(WithdrawalStatus::Approved));
        assert_eq!(query.page, 1);
    }

    #[test]
    fn test_list_query_defaults() {
        let query: AdminOrderListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 20);
        assert!(query.status.is_none());
    }
}
