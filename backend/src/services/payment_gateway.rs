//! # Card Payment Gateway
//!
//! The external card gateway sits behind the [`PaymentGateway`] trait so
//! settlement and reversal can run against the real Payring client in
//! production and a scripted gateway in tests.
//!
//! ## Flow: Authorization
//!
//! ```text
//! 1. payment_requests row inserted (pending)     ← own statement, outside
//!                ↓                                 the settlement tx
//! 2. POST /v1/sugi/order.do (bounded by timeout)
//!                ↓
//! 3. rescode 0000 → completed + gateway tranid
//!    anything else → failed + readable message
//! ```
//!
//! Declined attempts therefore stay auditable even though the settlement
//! transaction that asked for them rolls back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::queries;
use crate::db::{Database, PaymentRequestRecord, PaymentRequestStatus};
use crate::models::{CardDetails, PaymentCallbackAck, PaymentCallbackRequest};

/// Result code the gateway uses for success.
const APPROVED_CODE: &str = "0000";

/// Transport-level gateway failures. A decline is not an error; it is
/// reported as [`GatewayOutcome::Declined`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway timed out after {0}s")]
    Timeout(u64),

    #[error("Payment gateway unreachable: {0}")]
    Network(String),

    #[error("Unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

/// Answer of the gateway to an authorize or reverse call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved { transaction_id: Option<String> },
    Declined { code: String, message: String },
}

impl GatewayOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, GatewayOutcome::Approved { .. })
    }
}

/// A card charge to authorize.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    /// Merchant order reference (the order number).
    pub order_ref: &'a str,
    pub amount: Decimal,
    /// Short description shown on the card statement.
    pub product_name: &'a str,
    pub card: &'a CardDetails,
    /// Internal payment request id, echoed back by the gateway.
    pub request_id: Uuid,
}

/// Outbound card gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorize and capture a keyed-in card payment.
    async fn authorize(&self, request: AuthorizationRequest<'_>) -> Result<GatewayOutcome, GatewayError>;

    /// Reverse (cancel) a previously approved payment.
    async fn reverse(&self, order_ref: &str, amount: Decimal) -> Result<GatewayOutcome, GatewayError>;
}

// ==========================================
// PAYRING CLIENT
// ==========================================

#[derive(Debug, Deserialize)]
struct PayringResponse {
    rescode: String,
    #[serde(default)]
    resmsg: String,
    tranid: Option<String>,
}

impl PayringResponse {
    fn into_outcome(self) -> GatewayOutcome {
        if self.rescode == APPROVED_CODE {
            GatewayOutcome::Approved { transaction_id: self.tranid }
        } else {
            let message = decline_message(&self.rescode, &self.resmsg);
            GatewayOutcome::Declined { code: self.rescode, message }
        }
    }
}

/// Readable message for a gateway result code.
///
/// Unknown codes fall back to the gateway's own message.
pub fn decline_message(code: &str, gateway_message: &str) -> String {
    let known = match code {
        "P001" => Some("Merchant account not found"),
        "P002" => Some("Order information not found"),
        "P003" => Some("Duplicate order number"),
        "P004" => Some("Payment request not found"),
        "P006" => Some("Payment wait time exceeded"),
        "P007" => Some("Payment is not awaiting approval"),
        "P008" => Some("Payment failed"),
        "P009" => Some("Payment cannot be cancelled"),
        "P010" => Some("Transaction already cancelled"),
        "P201" => Some("Too many input attempts"),
        "P202" => Some("Payment amount does not match"),
        "P203" => Some("Wrong simple-pay password"),
        "P301" => Some("Order was cancelled"),
        "P900" => Some("Malformed gateway message"),
        "P901" => Some("Gateway database failure"),
        "P902" => Some("Card network communication failure"),
        "P903" => Some("Card network processing failure"),
        "P999" => Some("Unknown gateway error"),
        _ => None,
    };

    match known {
        Some(message) => message.to_string(),
        None if !gateway_message.is_empty() => gateway_message.to_string(),
        None => "Card payment could not be processed".to_string(),
    }
}

/// Whole won, half-won rounded away from zero.
fn whole_won(amount: Decimal) -> String {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_string()
}

/// Payring keyed-in card payment client.
#[derive(Clone)]
pub struct PayringGateway {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl PayringGateway {
    /// Build a client from configuration.
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.gateway_api_key.clone(),
            timeout_secs: config.gateway_timeout_secs,
        })
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<GatewayOutcome, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let call = async {
            let response = self.client
                .post(&url)
                .form(form)
                .send()
                .await
                .map_err(|e| GatewayError::Network(e.to_string()))?;

            response
                .json::<PayringResponse>()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
        };

        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout_secs))??;

        Ok(response.into_outcome())
    }
}

#[async_trait]
impl PaymentGateway for PayringGateway {
    async fn authorize(&self, request: AuthorizationRequest<'_>) -> Result<GatewayOutcome, GatewayError> {
        let card = request.card;
        let form = [
            ("apikey", self.api_key.clone()),
            ("orderid", request.order_ref.to_string()),
            ("prodname", request.product_name.to_string()),
            ("amount", whole_won(request.amount)),
            ("encinfo", card.number.clone()),
            ("encdata", card.expiry.clone()),
            ("cardauth", card.auth_code.clone()),
            ("cardpwd", card.password_prefix.clone()),
            ("quota", card.installment.clone()),
            ("taxcode", "00".to_string()),
            ("custname", card.customer_name.clone()),
            ("custemail", card.customer_email.clone().unwrap_or_default()),
            ("info1", request.request_id.to_string()),
        ];

        self.post_form("/v1/sugi/order.do", &form).await
    }

    async fn reverse(&self, order_ref: &str, amount: Decimal) -> Result<GatewayOutcome, GatewayError> {
        let form = [
            ("apikey", self.api_key.clone()),
            ("orderid", order_ref.to_string()),
            ("amount", whole_won(amount)),
        ];

        self.post_form("/v1/sugi/cancel.do", &form).await
    }
}

// ==========================================
// CARD PAYMENT BOOKKEEPING
// ==========================================

/// Gateway calls plus their `payment_requests` bookkeeping.
///
/// Bookkeeping writes go through the pool, never through a caller's
/// transaction, and a failed bookkeeping write is logged without
/// changing the gateway result.
#[derive(Clone)]
pub struct CardPayments {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
}

impl CardPayments {
    pub fn new(db: Database, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db, gateway }
    }

    /// Authorize a card charge and record the attempt.
    pub async fn authorize(
        &self,
        order_ref: &str,
        amount: Decimal,
        product_name: &str,
        card: &CardDetails,
    ) -> Result<GatewayOutcome, GatewayError> {
        let now = Utc::now();
        let request_id = Uuid::new_v4();
        let record = PaymentRequestRecord {
            id: request_id,
            order_ref: order_ref.to_string(),
            amount,
            status: PaymentRequestStatus::Pending,
            gateway_transaction_id: None,
            error_message: None,
            payment_data: serde_json::json!({
                "productName": product_name,
                "customerName": card.customer_name,
                "customerEmail": card.customer_email,
                "installment": card.installment,
            }),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = queries::insert_payment_request(self.db.pool(), &record).await {
            warn!("Could not record payment request for {}: {}", order_ref, e);
        }

        let result = self.gateway
            .authorize(AuthorizationRequest { order_ref, amount, product_name, card, request_id })
            .await;

        let (status, transaction_id, error_message) = match &result {
            Ok(GatewayOutcome::Approved { transaction_id }) => {
                info!("Card payment approved for {} ({})", order_ref, amount);
                (PaymentRequestStatus::Completed, transaction_id.clone(), None)
            }
            Ok(GatewayOutcome::Declined { code, message }) => {
                warn!("Card payment declined for {}: [{}] {}", order_ref, code, message);
                (PaymentRequestStatus::Failed, None, Some(message.clone()))
            }
            Err(e) => {
                warn!("Card payment failed for {}: {}", order_ref, e);
                (PaymentRequestStatus::Failed, None, Some(e.to_string()))
            }
        };

        if let Err(e) = queries::update_payment_request(
            self.db.pool(),
            request_id,
            status,
            transaction_id.as_deref(),
            error_message.as_deref(),
        ).await {
            warn!("Could not update payment request {}: {}", request_id, e);
        }

        result
    }

    /// Reverse a card charge; an approved reversal marks the completed
    /// payment request as cancelled.
    pub async fn reverse(&self, order_ref: &str, amount: Decimal) -> Result<GatewayOutcome, GatewayError> {
        let outcome = self.gateway.reverse(order_ref, amount).await?;

        match &outcome {
            GatewayOutcome::Approved { .. } => {
                info!("Card payment reversed for {} ({})", order_ref, amount);
                match queries::find_completed_payment_request(self.db.pool(), order_ref).await {
                    Ok(Some(request)) => {
                        if let Err(e) = queries::update_payment_request(
                            self.db.pool(),
                            request.id,
                            PaymentRequestStatus::Cancelled,
                            None,
                            None,
                        ).await {
                            warn!("Could not mark payment request {} cancelled: {}", request.id, e);
                        }
                    }
                    Ok(None) => debug!("No completed payment request for {}", order_ref),
                    Err(e) => warn!("Could not look up payment request for {}: {}", order_ref, e),
                }
            }
            GatewayOutcome::Declined { code, message } => {
                warn!("Card reversal declined for {}: [{}] {}", order_ref, code, message);
            }
        }

        Ok(outcome)
    }

    /// Apply an asynchronous gateway notification.
    ///
    /// Only payment request rows change. The acknowledgement asks the
    /// gateway to resend when the update could not be stored.
    pub async fn handle_callback(&self, callback: &PaymentCallbackRequest) -> PaymentCallbackAck {
        let approved = callback.rescode == APPROVED_CODE;
        let (status, error_message) = if approved {
            (PaymentRequestStatus::Completed, None)
        } else {
            (PaymentRequestStatus::Failed, Some(decline_message(&callback.rescode, &callback.resmsg)))
        };
        let data = if approved {
            serde_json::json!({
                "cardNum": callback.card_num,
                "cardAuthNo": callback.card_auth_no,
                "cardName": callback.card_name,
                "tranDate": callback.tran_date,
            })
        } else {
            serde_json::json!({})
        };

        match queries::apply_payment_callback(
            self.db.pool(),
            &callback.orderid,
            status,
            callback.tranid.as_deref(),
            error_message.as_deref(),
            &data,
        ).await {
            Ok(rows) => {
                info!("Payment callback for {} applied to {} request(s) ({})", callback.orderid, rows, status);
                PaymentCallbackAck { rescode: APPROVED_CODE.to_string(), resmsg: "SUCCESS".to_string() }
            }
            Err(e) => {
                error!("Payment callback for {} could not be stored: {}", callback.orderid, e);
                PaymentCallbackAck { rescode: "1000".to_string(), resmsg: "RETRY".to_string() }
            }
        }
    }
}
