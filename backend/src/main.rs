//! # Retail Ledger Backend Service
//!
//! Entry point for the order settlement and points/wallet ledger service.
//! It provides:
//!
//! - REST API for placing orders and reading balances and history
//! - Admin API for order status changes, refunds, balance adjustments
//!   and point withdrawal review
//! - A daily background job that releases vested point rewards
//! - An operator command that runs one release pass and exits
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────────────────┐      ┌─────────────────────────┐   │
//! │  │        REST API         │      │   Background Services   │   │
//! │  │        (Actix)          │      │  • Point release (daily)│   │
//! │  │  /orders   /accounts    │      │                         │   │
//! │  │  /admin    /payments    │      │                         │   │
//! │  └────────────┬────────────┘      └────────────┬────────────┘   │
//! │               └────────────────┬───────────────┘                │
//! │  ┌─────────────────────────────┴─────────────────────────────┐  │
//! │  │                      SERVICE LAYER                         │  │
//! │  │  OrderSettlement · OrderReversal · LedgerService           │  │
//! │  │  PointRelease · PointWithdrawals · CardPayments            │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │               │                                 │                │
//! │        ┌──────┴──────┐                   ┌──────┴──────┐         │
//! │        │  PostgreSQL │                   │ Card gateway│         │
//! │        └─────────────┘                   └─────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the server: `ledger-backend` (the schema is applied on boot)
//! 4. Release rewards by hand: `ledger-backend release-pending-points --date 2025-03-15`

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod models;
mod services;
mod utils;

use config::AppConfig;
use db::Database;
use services::{
    CardPayments, LedgerService, OrderReversal, OrderSettlement, PayringGateway, PointRelease, PointWithdrawals,
};

/// Command line interface.
#[derive(Debug, Parser)]
#[command(name = "ledger-backend", version, about = "Order settlement and points/wallet ledger")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and the daily release schedule (default)
    Serve,

    /// Run one pending-point release pass and exit
    ReleasePendingPoints {
        /// Release as of this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

/// Application state shared across all handlers.
pub struct AppState {
    /// Database connection pool for PostgreSQL
    pub db: Database,

    pub ledger: LedgerService,
    pub settlement: OrderSettlement,
    pub reversal: OrderReversal,
    pub release: PointRelease,
    pub withdrawals: PointWithdrawals,

    /// Card gateway bookkeeping, used by the callback endpoint
    pub payments: CardPayments,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    info!("🚀 Starting Retail Ledger Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    let config = AppConfig::from_env()
        .expect("Failed to load configuration");

    info!("📋 Configuration loaded");
    info!("   Home timezone: {}", config.home_timezone);
    info!("   Reward rate: {}, vesting: {} days", config.point_reward_rate, config.point_vesting_days);

    // =========================================
    // STEP 3: Initialize Database
    // =========================================
    let db = Database::connect(&config.database_url, config.database_pool_size)
        .await
        .expect("Failed to connect to database");

    info!("🗄️  Database connected");

    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    info!("📦 Database migrations complete");

    let release = PointRelease::new(db.clone(), config.clone());

    if let Some(Command::ReleasePendingPoints { date }) = cli.command {
        let summary = release
            .trigger(date)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let output = serde_json::to_string_pretty(&summary)?;
        println!("{}", output);
        return Ok(());
    }

    // =========================================
    // STEP 4: Initialize Services
    // =========================================
    let gateway = PayringGateway::new(&config)
        .expect("Failed to create payment gateway client");
    let payments = CardPayments::new(db.clone(), Arc::new(gateway));

    let app_state = Arc::new(AppState {
        db: db.clone(),
        ledger: LedgerService::new(db.clone()),
        settlement: OrderSettlement::new(db.clone(), config.clone(), payments.clone()),
        reversal: OrderReversal::new(db.clone(), payments.clone()),
        release: release.clone(),
        withdrawals: PointWithdrawals::new(db.clone(), config.clone()),
        payments,
    });

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start Background Services
    // =========================================
    tokio::spawn(async move {
        release.start().await;
    });

    info!("⏰ Pending point release scheduled");

    // =========================================
    // STEP 6: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(api::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
