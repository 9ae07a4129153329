//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{OrderItemRecord, OrderRecord, PendingPointRecord};

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "INSUFFICIENT_BALANCE",
///         "message": "Insufficient wallet balance: available 5000, requested 20000"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "INSUFFICIENT_STOCK").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// One page of a longer list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,

    /// Total number of matching rows.
    pub total: i64,

    /// 1-based page number.
    pub page: i64,

    pub limit: i64,
}

/// Balances of one account.
///
/// Returned by `GET /accounts/{id}/balances`
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "accountId": "0f0e2c1a-...",
///         "walletBalance": "25000.00",
///         "pointBalance": "1200.00",
///         "pendingPointBalance": "100.00",
///         "formattedWallet": "25,000 KRW"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancesResponse {
    pub account_id: Uuid,

    /// Stored-value wallet balance.
    pub wallet_balance: Decimal,

    /// Spendable points of the active point type.
    pub point_balance: Decimal,

    /// Rewards still in escrow, not yet spendable.
    pub pending_point_balance: Decimal,

    /// Human-readable wallet balance.
    pub formatted_wallet: String,
}

/// Result of a single administrative balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChangeResponse {
    pub account_id: Uuid,
    pub new_balance: Decimal,
}

/// Result of a bulk administrative operation.
///
/// ## Example Response
///
/// ```json
/// {
///     "total": 3,
///     "successCount": 2,
///     "failCount": 1,
///     "errors": [{ "row": 2, "accountId": "...", "error": "Account not found: ..." }]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResultResponse {
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,

    /// Failed rows, capped at 100 entries.
    pub errors: Vec<BulkRowError>,
}

/// Why one row of a bulk request failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRowError {
    /// 1-based index into the submitted rows.
    pub row: usize,
    pub account_id: Uuid,
    pub error: String,
}

/// An order with its lines and escrowed reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: OrderRecord,

    pub items: Vec<OrderItemRecord>,

    /// Escrow row created for this order, if it earned a reward.
    pub pending_point: Option<PendingPointRecord>,

    /// Human-readable order total.
    pub formatted_total: String,
}

/// Outcome of one pending-point release pass.
///
/// Returned by `POST /admin/jobs/pending-point-release` and printed by
/// the `release-pending-points` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSummary {
    pub released_count: u64,
    pub total_amount: Decimal,
}

/// Acknowledgement expected by the card gateway after a callback.
///
/// `0000` means accepted; any other code asks the gateway to resend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallbackAck {
    pub rescode: String,
    pub resmsg: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall health status.
    pub status: String,

    /// Database connection status.
    pub database: String,

    /// Server version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let response: ApiResponse<()> = ApiResponse::error("ORDER_NOT_FOUND", "Order not found");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["error"]["code"], "ORDER_NOT_FOUND");
    }

    #[test]
    fn test_bulk_result_uses_camel_case() {
        let result = BulkResultResponse {
            total: 2,
            success_count: 1,
            fail_count: 1,
            errors: vec![BulkRowError {
                row: 2,
                account_id: Uuid::nil(),
                error: "boom".to_string(),
            }],
        };
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["successCount"], 1);
        assert_eq!(json["failCount"], 1);
        assert_eq!(json["errors"][0]["row"], 2);
    }
}
