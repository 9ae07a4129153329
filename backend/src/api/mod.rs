//! # REST API Module
//!
//! HTTP endpoints for orders, balances and the admin back office.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/orders` | Place and settle an order |
//! | GET | `/orders` | Orders of one account |
//! | GET | `/orders/{id}` | Order with items and escrow |
//! | GET | `/accounts/{id}/balances` | Wallet, point and pending balances |
//! | GET | `/accounts/{id}/wallet/transactions` | Wallet history |
//! | GET | `/accounts/{id}/points/transactions` | Point history |
//! | GET | `/accounts/{id}/points/pending` | Escrowed rewards |
//! | GET | `/accounts/{id}/withdrawals` | Point cash-out requests |
//! | POST | `/withdrawals` | Request a point cash-out |
//! | POST | `/payments/callback` | Card gateway notification |
//! | * | `/admin/...` | Order status, adjustments, withdrawal review, release job |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "INSUFFICIENT_STOCK",
//!         "message": "Insufficient stock for Serum: available 1, requested 2"
//!     }
//! }
//! ```
//!
//! Error codes come from the service layer; the HTTP status follows the
//! error kind (see [`handlers::status_for`]).

pub mod routes;
pub mod handlers;

pub use routes::configure_routes;
