//! # Payment Plan
//!
//! Turns the submitted list of payment instruments into a validated,
//! fixed-order plan before settlement touches any row.
//!
//! | Order | Instrument | Effect at settlement |
//! |-------|------------|----------------------|
//! | 1 | wallet | debit wallet balance |
//! | 2 | points | debit point balance |
//! | 3 | card | authorize through the gateway |
//! | 4 | bank | recorded only |

use rust_decimal::Decimal;

use crate::db::PointType;
use crate::models::{CardDetails, PaymentInstrument};
use crate::utils::{money_issue, MoneyIssue};

/// Errors raised while building or reconciling a plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaymentPlanError {
    #[error("Payment amount for {0} must not be negative")]
    NegativeAmount(&'static str),

    #[error("Payment instrument {0} was given more than once")]
    DuplicateInstrument(&'static str),

    #[error("Payment amount for {0} has more than two decimal places")]
    TooPrecise(&'static str),

    #[error("Payment amount for {0} exceeds the largest storable amount")]
    TooLarge(&'static str),

    #[error("Payment total {paid} does not match order total {total}")]
    Mismatch { paid: Decimal, total: Decimal },
}

/// A card charge to authorize at settlement.
#[derive(Debug, Clone)]
pub struct CardCharge {
    pub amount: Decimal,
    pub card: CardDetails,
}

/// How an order total is split across instruments.
#[derive(Debug, Clone, Default)]
pub struct PaymentPlan {
    pub wallet: Decimal,
    pub points: Option<(PointType, Decimal)>,
    pub card: Option<CardCharge>,
    pub bank: Decimal,
}

impl PaymentPlan {
    /// Validate instruments and fold them into a plan.
    ///
    /// Amounts must be non-negative whole cents that fit a money column,
    /// and each instrument may appear once.
    /// Zero-amount entries are accepted and ignored.
    pub fn from_instruments(instruments: Vec<PaymentInstrument>) -> Result<Self, PaymentPlanError> {
        let mut plan = PaymentPlan::default();
        let mut seen: Vec<&'static str> = Vec::with_capacity(4);

        for instrument in instruments {
            let name = instrument.name();
            if instrument.amount() < Decimal::ZERO {
                return Err(PaymentPlanError::NegativeAmount(name));
            }
            match money_issue(instrument.amount()) {
                Some(MoneyIssue::TooPrecise) => return Err(PaymentPlanError::TooPrecise(name)),
                Some(MoneyIssue::TooLarge) => return Err(PaymentPlanError::TooLarge(name)),
                None => {}
            }
            if seen.contains(&name) {
                return Err(PaymentPlanError::DuplicateInstrument(name));
            }
            seen.push(name);

            match instrument {
                PaymentInstrument::Wallet { amount } => plan.wallet = amount,
                PaymentInstrument::Points { point_type, amount } => {
                    if amount > Decimal::ZERO {
                        plan.points = Some((point_type, amount));
                    }
                }
                PaymentInstrument::Card { amount, card } => {
                    if amount > Decimal::ZERO {
                        plan.card = Some(CardCharge { amount, card });
                    }
                }
                PaymentInstrument::Bank { amount } => plan.bank = amount,
            }
        }

        Ok(plan)
    }

    pub fn point_amount(&self) -> Decimal {
        self.points.map(|(_, amount)| amount).unwrap_or(Decimal::ZERO)
    }

    pub fn card_amount(&self) -> Decimal {
        self.card.as_ref().map(|c| c.amount).unwrap_or(Decimal::ZERO)
    }

    /// Sum of all instruments.
    pub fn total(&self) -> Result<Decimal, PaymentPlanError> {
        [self.point_amount(), self.card_amount(), self.bank]
            .into_iter()
            .try_fold(self.wallet, |sum, amount| sum.checked_add(amount))
            .ok_or(PaymentPlanError::TooLarge("payment total"))
    }

    /// Check the plan covers `order_total`.
    ///
    /// A difference strictly greater than `tolerance` is a mismatch.
    pub fn reconcile(&self, order_total: Decimal, tolerance: Decimal) -> Result<(), PaymentPlanError> {
        let paid = self.total()?;
        let difference = paid
            .checked_sub(order_total)
            .ok_or(PaymentPlanError::TooLarge("payment total"))?;
        if difference.abs() > tolerance {
            return Err(PaymentPlanError::Mismatch { paid, total: order_total });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> CardDetails {
        CardDetails {
            number: "4111111111111111".to_string(),
            expiry: "203001".to_string(),
            auth_code: "900101".to_string(),
            password_prefix: "12".to_string(),
            installment: "00".to_string(),
            customer_name: "Kim".to_string(),
            customer_email: None,
        }
    }

    #[test]
    fn test_plan_collects_instruments() {
        let plan = PaymentPlan::from_instruments(vec![
            PaymentInstrument::Bank { amount: Decimal::from(1000) },
            PaymentInstrument::Wallet { amount: Decimal::from(15000) },
            PaymentInstrument::Points { point_type: PointType::X, amount: Decimal::from(3000) },
            PaymentInstrument::Card { amount: Decimal::from(1000), card: card() },
        ])
        .unwrap();

        assert_eq!(plan.wallet, Decimal::from(15000));
        assert_eq!(plan.point_amount(), Decimal::from(3000));
        assert_eq!(plan.card_amount(), Decimal::from(1000));
        assert_eq!(plan.total(), Ok(Decimal::from(20000)));
    }

    #[test]
    fn test_zero_card_is_dropped() {
        let plan = PaymentPlan::from_instruments(vec![
            PaymentInstrument::Card { amount: Decimal::ZERO, card: card() },
            PaymentInstrument::Wallet { amount: Decimal::from(10) },
        ])
        .unwrap();

        assert!(plan.card.is_none());
        assert!(plan.points.is_none());
    }

    #[test]
    fn test_rejects_negative_and_duplicates() {
        let err = PaymentPlan::from_instruments(vec![PaymentInstrument::Wallet { amount: Decimal::from(-1) }])
            .unwrap_err();
        assert_eq!(err, PaymentPlanError::NegativeAmount("wallet"));

        let err = PaymentPlan::from_instruments(vec![
            PaymentInstrument::Bank { amount: Decimal::from(1) },
            PaymentInstrument::Bank { amount: Decimal::from(2) },
        ])
        .unwrap_err();
        assert_eq!(err, PaymentPlanError::DuplicateInstrument("bank"));
    }

    #[test]
    fn test_rejects_sub_cent_and_oversized_amounts() {
        let err = PaymentPlan::from_instruments(vec![PaymentInstrument::Wallet { amount: Decimal::new(1, 3) }])
            .unwrap_err();
        assert_eq!(err, PaymentPlanError::TooPrecise("wallet"));

        let err = PaymentPlan::from_instruments(vec![
            PaymentInstrument::Card { amount: Decimal::new(1_000_005, 3), card: card() },
        ])
        .unwrap_err();
        assert_eq!(err, PaymentPlanError::TooPrecise("card"));

        let err = PaymentPlan::from_instruments(vec![
            PaymentInstrument::Wallet { amount: Decimal::MAX },
            PaymentInstrument::Bank { amount: Decimal::MAX },
        ])
        .unwrap_err();
        assert_eq!(err, PaymentPlanError::TooLarge("wallet"));

        let plan = PaymentPlan::from_instruments(vec![PaymentInstrument::Bank { amount: Decimal::new(1000, 3) }])
            .unwrap();
        assert_eq!(plan.total(), Ok(Decimal::ONE));
    }

    #[test]
    fn test_total_overflow_is_an_error() {
        let plan = PaymentPlan {
            wallet: Decimal::MAX,
            bank: Decimal::MAX,
            ..Default::default()
        };
        assert_eq!(plan.total(), Err(PaymentPlanError::TooLarge("payment total")));
        assert_eq!(
            plan.reconcile(Decimal::ZERO, Decimal::ONE),
            Err(PaymentPlanError::TooLarge("payment total"))
        );
    }

    #[test]
    fn test_reconcile_tolerance_boundary() {
        let plan = PaymentPlan::from_instruments(vec![PaymentInstrument::Wallet { amount: Decimal::from(20001) }])
            .unwrap();

        assert!(plan.reconcile(Decimal::from(20000), Decimal::ONE).is_ok());
        assert!(plan.reconcile(Decimal::from(20002), Decimal::ONE).is_ok());
        assert_eq!(
            plan.reconcile(Decimal::from(19999), Decimal::ONE),
            Err(PaymentPlanError::Mismatch { paid: Decimal::from(20001), total: Decimal::from(19999) })
        );
    }
}
