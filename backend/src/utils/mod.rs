//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Largest page size any list endpoint returns.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Why an amount cannot be stored in a `NUMERIC(15,2)` money column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyIssue {
    /// More than two fractional digits.
    TooPrecise,
    /// Magnitude above [`max_money`].
    TooLarge,
}

/// Largest magnitude a money column holds: 9,999,999,999,999.99.
pub fn max_money() -> Decimal {
    Decimal::new(999_999_999_999_999, 2)
}

/// Check `amount` fits a money column without rounding or overflow.
///
/// Trailing zeros do not count as precision, so `10.000` is accepted.
pub fn money_issue(amount: Decimal) -> Option<MoneyIssue> {
    if amount.normalize().scale() > 2 {
        Some(MoneyIssue::TooPrecise)
    } else if amount.abs() > max_money() {
        Some(MoneyIssue::TooLarge)
    } else {
        None
    }
}

/// Format a money amount as human-readable KRW.
///
/// Rounds to whole won and adds thousands separators.
///
/// ## Arguments
///
/// * `amount` - Amount in won
///
/// ## Returns
///
/// Formatted string like "1,234,567 KRW"
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_krw(Decimal::from(25000)), "25,000 KRW");
/// ```
pub fn format_krw(amount: Decimal) -> String {
    let rounded = amount.round_dp(0);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let digits = rounded.abs().trunc().to_string();

    // Add commas
    let mut result = String::new();
    for (i, c) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    let reversed: String = result.chars().rev().collect();

    if negative {
        format!("-{} KRW", reversed)
    } else {
        format!("{} KRW", reversed)
    }
}

/// The calendar date of `now` in the home timezone.
///
/// Order numbers, vesting dates and the release job all count days in
/// this zone, not in UTC.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// The first weekday strictly after `date`.
pub fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut next = date;
    loop {
        next = match next.checked_add_days(Days::new(1)) {
            Some(day) => day,
            None => return next,
        };
        if !matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
            return next;
        }
    }
}

/// Generate a human-readable order number.
///
/// Format: `ORD` + `yyMMdd` + `-` + 8 upper-case hex characters,
/// e.g. `ORD250314-9F3A01BC`.
///
/// ## Arguments
///
/// * `order_date` - Business date of the order (home timezone)
pub fn generate_order_number(order_date: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD{}-{}", order_date.format("%y%m%d"), suffix)
}

/// Turn a 1-based page and a page size into `(limit, offset)`.
///
/// Out-of-range values are clamped: page to at least 1, limit to
/// `1..=MAX_PAGE_SIZE`. Offsets past `i64::MAX` saturate, which simply
/// yields an empty page.
pub fn page_window(page: i64, limit: i64) -> (i64, i64, i64) {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    (page, limit, (page - 1).saturating_mul(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_krw() {
        assert_eq!(format_krw(Decimal::from(25000)), "25,000 KRW");
        assert_eq!(format_krw(Decimal::ZERO), "0 KRW");
        assert_eq!(format_krw(Decimal::new(99950, 2)), "1,000 KRW");
        assert_eq!(format_krw(Decimal::from(-1234567)), "-1,234,567 KRW");
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        // 16:30 UTC is already the next day in Seoul (UTC+9).
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 16, 30, 0).unwrap();
        assert_eq!(
            local_date(now, chrono_tz::Asia::Seoul),
            NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
        );
        assert_eq!(
            local_date(now, chrono_tz::UTC),
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
        );
    }

    #[test]
    fn test_next_business_day_skips_weekends() {
        let day = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap();
        // 2025-03-13 is a Thursday.
        assert_eq!(next_business_day(day(13)), day(14));
        assert_eq!(next_business_day(day(14)), day(17));
        assert_eq!(next_business_day(day(15)), day(17));
        assert_eq!(next_business_day(day(16)), day(17));
        assert_eq!(next_business_day(NaiveDate::MAX), NaiveDate::MAX);
    }

    #[test]
    fn test_generate_order_number_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let number = generate_order_number(date);

        assert!(number.starts_with("ORD250314-"));
        let suffix = &number["ORD250314-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));

        assert_ne!(number, generate_order_number(date));
    }

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(1, 20), (1, 20, 0));
        assert_eq!(page_window(3, 10), (3, 10, 20));
        assert_eq!(page_window(0, 500), (1, MAX_PAGE_SIZE, 0));
        assert_eq!(page_window(-2, 0), (1, 1, 0));
    }

    #[test]
    fn test_page_window_saturates_huge_pages() {
        assert_eq!(page_window(i64::MAX, 100), (i64::MAX, 100, i64::MAX));
        assert_eq!(page_window(i64::MAX, 1), (i64::MAX, 1, i64::MAX - 1));
        assert_eq!(page_window(i64::MIN, i64::MAX), (1, MAX_PAGE_SIZE, 0));
    }

    #[test]
    fn test_money_issue() {
        assert_eq!(money_issue(Decimal::new(1050, 2)), None);
        assert_eq!(money_issue(Decimal::new(10000, 3)), None);
        assert_eq!(money_issue(max_money()), None);
        assert_eq!(money_issue(Decimal::new(1, 3)), Some(MoneyIssue::TooPrecise));
        assert_eq!(money_issue(Decimal::new(10005, 3)), Some(MoneyIssue::TooPrecise));
        assert_eq!(money_issue(max_money() + Decimal::new(1, 2)), Some(MoneyIssue::TooLarge));
        assert_eq!(money_issue(Decimal::MAX), Some(MoneyIssue::TooLarge));
        assert_eq!(money_issue(-Decimal::MAX), Some(MoneyIssue::TooLarge));
    }
}
