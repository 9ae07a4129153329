//! # Pending-Point Release Service
//!
//! Pays out escrowed point rewards once their vesting date is reached.
//!
//! ## Schedule
//!
//! ```text
//! PointRelease (background task)
//!              │
//!              ├── sleep until next RELEASE_HOUR:00 (home timezone)
//!              │
//!              ├── release_due(today)         one transaction per run
//!              │     └─ failure → retry after base, 2×base, 4×base ...
//!              │
//!              └── attempts exhausted → error! and wait for tomorrow
//! ```
//!
//! A run only selects rows still `pending`, so re-running a day (or a
//! manual trigger on top of the schedule) never pays a reward twice.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::queries;
use crate::db::{Database, DatabaseError, PointTransactionType};
use crate::models::ReleaseSummary;
use crate::utils::local_date;

use super::ledger::{self, LedgerError};
use super::ErrorKind;

/// Errors that can occur while releasing points.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Every scheduled attempt failed; rows stay pending.
    #[error("Release failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl From<tokio_postgres::Error> for ReleaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        ReleaseError::Database(DatabaseError::QueryError(e))
    }
}

impl ReleaseError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReleaseError::Exhausted { .. } => "RELEASE_EXHAUSTED",
            _ => "RELEASE_FAILED",
        }
    }
}

// ==========================================
// SCHEDULE MATH
// ==========================================

/// Delay before retrying after failed attempt number `attempt` (1-based).
///
/// `base × 2^(attempt-1)`, saturating instead of overflowing.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// The first `hour:00` in `tz` strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, tz: Tz, hour: u32) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();

    // A local hour can be skipped by a DST jump; look a few days ahead.
    for _ in 0..3 {
        let candidate = date
            .and_hms_opt(hour, 0, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc));
        if let Some(candidate) = candidate {
            if candidate > now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    now + chrono::Duration::days(1)
}

/// Run `operation` up to `max_attempts` times with exponential backoff.
///
/// The closure receives the 1-based attempt number. The last error is
/// returned when every attempt failed.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_delay_ms: u64,
    mut operation: F,
) -> Result<T, (u32, E)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err((attempt, e)),
            Err(e) => {
                let delay = backoff_delay(base_delay_ms, attempt);
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ==========================================
// SERVICE
// ==========================================

/// The pending-point release job.
///
/// ## Usage
///
/// ```rust,ignore
/// let release = PointRelease::new(db, config);
///
/// // Start the daily schedule (runs forever)
/// tokio::spawn(async move {
///     release.start().await;
/// });
/// ```
#[derive(Clone)]
pub struct PointRelease {
    db: Database,
    config: AppConfig,
}

impl PointRelease {
    pub fn new(db: Database, config: AppConfig) -> Self {
        Self { db, config }
    }

    /// "Today" in the home timezone.
    pub fn today(&self) -> NaiveDate {
        local_date(Utc::now(), self.config.home_timezone)
    }

    /// Release every pending reward due on or before `today`.
    ///
    /// One transaction for the whole batch: any failure leaves every
    /// row pending for the next run.
    pub async fn release_due(&self, today: NaiveDate) -> Result<ReleaseSummary, ReleaseError> {
        let mut client = self.db.client().await?;
        let tx = client.transaction().await?;

        let due = queries::lock_due_pending_points(&tx, today).await?;

        let mut summary = ReleaseSummary::default();
        for pending in &due {
            if pending.point_amount > Decimal::ZERO {
                let description = format!("PV reward ({} PV)", pending.pv_amount);
                ledger::credit_points(
                    &tx,
                    pending.account_id,
                    pending.point_type,
                    pending.point_amount,
                    PointTransactionType::PvReward,
                    Some(pending.order_id),
                    &description,
                ).await?;
            }
            summary.released_count += queries::mark_pending_point_released(&tx, pending.id).await?;
            summary.total_amount += pending.point_amount;
        }

        tx.commit().await?;

        info!(
            "Released {} pending point rewards due by {} (total {})",
            summary.released_count, today, summary.total_amount
        );

        Ok(summary)
    }

    /// Manual trigger; `date` overrides today.
    pub async fn trigger(&self, date: Option<NaiveDate>) -> Result<ReleaseSummary, ReleaseError> {
        let today = date.unwrap_or_else(|| self.today());
        self.release_due(today).await
    }

    /// One scheduled run with bounded retries.
    pub async fn run_with_retry(&self, today: NaiveDate) -> Result<ReleaseSummary, ReleaseError> {
        retry_with_backoff(
            self.config.release_max_attempts,
            self.config.release_backoff_ms,
            |_| self.release_due(today),
        )
        .await
        .map_err(|(attempts, e)| ReleaseError::Exhausted {
            attempts,
            last_error: e.to_string(),
        })
    }

    /// Start the daily schedule.
    ///
    /// Runs forever; failures are logged and retried on the next day.
    pub async fn start(&self) {
        info!(
            "Starting pending point release schedule ({}:00 {})",
            self.config.release_hour, self.config.home_timezone
        );

        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.config.home_timezone, self.config.release_hour);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next pending point release at {}", next);
            tokio::time::sleep(wait).await;

            let today = self.today();
            if let Err(e) = self.run_with_retry(today).await {
                error!("Pending point release for {} gave up, rewards stay pending: {}", today, e);
            }
        }
    }
}
