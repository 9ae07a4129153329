//! # Services Module
//!
//! This module contains the core business logic services for the
//! retail ledger backend. Each service handles a specific domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `LedgerService` | Wallet and point balances, admin adjustments, history |
//! | `OrderSettlement` | Atomic order placement (stock, payment, escrow) |
//! | `OrderReversal` | Status changes, cancellation/refund, card reconciliation |
//! | `PointRelease` | Daily release of vested point rewards |
//! | `CardPayments` | Card gateway calls and payment request bookkeeping |
//! | `PointWithdrawals` | Point cash-out requests and their admin review |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐     │
//! │  │OrderSettlement │  │ OrderReversal  │  │  PointRelease  │     │
//! │  │ place_order()  │  │ set_status()   │  │ release_due()  │     │
//! │  └───────┬────────┘  └───────┬────────┘  └───────┬────────┘     │
//! │          │                   │                   │              │
//! │          ▼                   ▼                   ▼              │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │        ledger (lock → mutate → audit primitives)          │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │          │                   │                                   │
//! │          ▼                   ▼                                   │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │        CardPayments ──► dyn PaymentGateway (Payring)      │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Taxonomy
//!
//! Every service error maps onto one [`ErrorKind`]; the API layer turns
//! the kind into an HTTP status and the error's `code()` into the
//! response body.

pub mod ledger;
pub mod payment_plan;
pub mod payment_gateway;
pub mod order_settlement;
pub mod order_reversal;
pub mod point_release;
pub mod point_withdrawal;

#[cfg(test)]
pub mod test_support;

pub use ledger::{LedgerError, LedgerService, AdjustmentKind};
pub use payment_plan::{PaymentPlan, PaymentPlanError};
pub use payment_gateway::{CardPayments, GatewayError, GatewayOutcome, PaymentGateway, PayringGateway};
pub use order_settlement::{OrderError, OrderSettlement};
pub use order_reversal::OrderReversal;
pub use point_release::{PointRelease, ReleaseError};
pub use point_withdrawal::{PointWithdrawals, WithdrawalError};

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent input; nothing was touched.
    Validation,
    /// Not enough stock or balance; the transaction rolled back.
    InsufficientResource,
    /// Unknown order, product or account.
    NotFound,
    /// The entity is in a state that forbids the operation.
    StateConflict,
    /// The card gateway failed or declined.
    ExternalDependency,
    /// Storage or other unexpected failure.
    Internal,
}
