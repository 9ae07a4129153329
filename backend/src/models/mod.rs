//! # API Models
//!
//! Request and response bodies of the REST API, kept apart from the
//! storage records in `db::models`.
//!
//! - `requests.rs` - order placement, payment instruments, admin
//!   adjustments, withdrawals, list queries, gateway callback
//! - `responses.rs` - envelope, balances, order detail, bulk and
//!   release reports
//!
//! JSON field names are camelCase; money and points are decimal strings.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
