//! # API Route Configuration

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                                  GET
/// ├── /orders                                  POST place, GET list
/// │   └── /{id}                                GET
/// ├── /accounts/{id}
/// │   ├── /balances                            GET
/// │   ├── /wallet/transactions                 GET
/// │   ├── /points/transactions                 GET
/// │   ├── /points/pending                      GET
/// │   └── /withdrawals                         GET
/// ├── /withdrawals                             POST
/// ├── /payments/callback                       POST (gateway)
/// └── /admin
///     ├── /orders                              GET
///     ├── /orders/unreconciled-reversals       GET
///     ├── /orders/{id}/status                  PUT
///     ├── /orders/{id}/invoice                 PUT
///     ├── /orders/{id}/card-reversal/retry     POST
///     ├── /points/{grant,deduct}               POST
///     ├── /points/{bulk-grant,bulk-deduct}     POST
///     ├── /wallet/{deposit,deduct}             POST
///     ├── /wallet/{bulk-deposit,bulk-deduct}   POST
///     ├── /withdrawals                         GET
///     ├── /withdrawals/{id}/{approve,reject,complete}  POST
///     └── /jobs/pending-point-release          POST
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/", web::get().to(handlers::api_info))
        .route("/health", web::get().to(handlers::health_check))

        .service(
            web::scope("/orders")
                .route("", web::post().to(handlers::place_order))
                .route("", web::get().to(handlers::list_orders))
                .route("/{id}", web::get().to(handlers::get_order))
        )

        .service(
            web::scope("/accounts/{id}")
                .route("/balances", web::get().to(handlers::get_balances))
                .route("/wallet/transactions", web::get().to(handlers::wallet_transactions))
                .route("/points/transactions", web::get().to(handlers::point_transactions))
                .route("/points/pending", web::get().to(handlers::pending_points))
                .route("/withdrawals", web::get().to(handlers::account_withdrawals))
        )

        .route("/withdrawals", web::post().to(handlers::request_withdrawal))

        .route("/payments/callback", web::post().to(handlers::payment_callback))

        .service(
            web::scope("/admin")
                .route("/orders", web::get().to(handlers::admin_list_orders))
                .route("/orders/unreconciled-reversals", web::get().to(handlers::unreconciled_reversals))
                .route("/orders/{id}/status", web::put().to(handlers::update_order_status))
                .route("/orders/{id}/invoice", web::put().to(handlers::set_invoice))
                .route("/orders/{id}/card-reversal/retry", web::post().to(handlers::retry_card_reversal))

                .route("/points/grant", web::post().to(handlers::grant_points))
                .route("/points/deduct", web::post().to(handlers::deduct_points))
                .route("/points/bulk-grant", web::post().to(handlers::bulk_grant_points))
                .route("/points/bulk-deduct", web::post().to(handlers::bulk_deduct_points))

                .route("/wallet/deposit", web::post().to(handlers::deposit_wallet))
                .route("/wallet/deduct", web::post().to(handlers::deduct_wallet))
                .route("/wallet/bulk-deposit", web::post().to(handlers::bulk_deposit_wallet))
                .route("/wallet/bulk-deduct", web::post().to(handlers::bulk_deduct_wallet))

                .route("/withdrawals", web::get().to(handlers::admin_list_withdrawals))
                .route("/withdrawals/{id}/approve", web::post().to(handlers::approve_withdrawal))
                .route("/withdrawals/{id}/reject", web::post().to(handlers::reject_withdrawal))
                .route("/withdrawals/{id}/complete", web::post().to(handlers::complete_withdrawal))

                .route("/jobs/pending-point-release", web::post().to(handlers::release_pending_points))
        );
}
