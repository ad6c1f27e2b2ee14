use chrono::Local;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use thiserror::Error;

use crate::context::BetContext;
use crate::dom::marker_id;
use crate::state::TotalsOverflow;
use crate::types::{BetObservation, CanonicalBet, SourceKind, SourceScope};

/// Format of the wall-clock label attached to each bet.
pub const TIME_LABEL_FORMAT: &str = "%H:%M:%S";

/// Reasons an observation cannot become a bet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("multiplier {0} is not a finite non-negative number")]
    InvalidMultiplier(f64),
    #[error("amount {0} is not a finite non-negative number")]
    InvalidAmount(f64),
    #[error("win amount overflows for amount {amount} x {multiplier}")]
    Overflow { amount: f64, multiplier: f64 },
    #[error(transparent)]
    TotalsOverflow(#[from] TotalsOverflow),
}

/// Turns raw observations into canonical bets.
///
/// Holds only the counter used to synthesize ids for payloads without one.
#[derive(Debug, Default)]
pub struct Normalizer {
    synthetic_seq: u64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `obs`, filling missing amount/currency from `context`.
    pub fn normalize(
        &mut self,
        obs: &BetObservation,
        context: &BetContext,
    ) -> Result<CanonicalBet, Rejection> {
        let multiplier = obs.multiplier;
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(Rejection::InvalidMultiplier(multiplier));
        }
        let raw_amount = obs.amount_hint.unwrap_or(context.amount);
        if !raw_amount.is_finite() || raw_amount < 0.0 {
            return Err(Rejection::InvalidAmount(raw_amount));
        }

        let amount = Decimal::from_f64(raw_amount).ok_or(Rejection::InvalidAmount(raw_amount))?;
        let factor =
            Decimal::from_f64(multiplier).ok_or(Rejection::InvalidMultiplier(multiplier))?;
        let win_amount = amount.checked_mul(factor).ok_or(Rejection::Overflow {
            amount: raw_amount,
            multiplier,
        })?;

        Ok(CanonicalBet {
            id: self.derive_id(obs),
            amount,
            currency: obs
                .currency_hint
                .clone()
                .unwrap_or_else(|| context.currency.clone()),
            multiplier,
            win_amount,
            profit: win_amount - amount,
            risk_level: obs
                .risk_level
                .clone()
                .unwrap_or_else(|| default_risk(obs.scope).to_string()),
            variant_info: obs.variant,
            observed_at: obs
                .observed_at
                .with_timezone(&Local)
                .format(TIME_LABEL_FORMAT)
                .to_string(),
        })
    }

    fn derive_id(&mut self, obs: &BetObservation) -> String {
        match (&obs.raw_id, obs.source()) {
            (Some(raw), SourceKind::Dom) => marker_id(obs.scope, raw),
            (Some(raw), _) => raw.clone(),
            (None, _) => {
                self.synthetic_seq += 1;
                format!("{}-synthetic-{}", obs.scope.label(), self.synthetic_seq)
            }
        }
    }
}

fn default_risk(scope: SourceScope) -> &'static str {
    match scope {
        SourceScope::Keno => "keno",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn obs(scope: SourceScope, raw_id: Option<&str>, multiplier: f64) -> BetObservation {
        BetObservation {
            scope,
            raw_id: raw_id.map(String::from),
            multiplier,
            amount_hint: None,
            currency_hint: None,
            risk_level: None,
            variant: 0,
            observed_at: Utc::now(),
        }
    }

    fn ctx(amount: f64) -> BetContext {
        BetContext {
            amount,
            currency: "eur".into(),
        }
    }

    #[test]
    fn computes_win_and_profit() {
        let mut o = obs(SourceScope::Network, Some("n1"), 2.5);
        o.amount_hint = Some(4.0);
        let bet = Normalizer::new().normalize(&o, &ctx(99.0)).unwrap();
        assert_eq!(bet.amount, dec!(4));
        assert_eq!(bet.win_amount, dec!(10));
        assert_eq!(bet.profit, dec!(6));
        assert_eq!(bet.id, "n1");
    }

    #[test]
    fn losing_bet_has_negative_profit() {
        let mut o = obs(SourceScope::Network, Some("n1"), 0.2);
        o.amount_hint = Some(10.0);
        let bet = Normalizer::new().normalize(&o, &ctx(0.0)).unwrap();
        assert_eq!(bet.win_amount, dec!(2));
        assert_eq!(bet.profit, dec!(-8));
    }

    #[test]
    fn missing_hints_fall_back_to_context() {
        let bet = Normalizer::new()
            .normalize(&obs(SourceScope::Network, Some("n1"), 1.0), &ctx(3.0))
            .unwrap();
        assert_eq!(bet.amount, dec!(3));
        assert_eq!(bet.currency, "eur");
        assert_eq!(bet.risk_level, "unknown");
    }

    #[test]
    fn dom_ids_drop_marker_prefix() {
        let mut n = Normalizer::new();
        let plinko = obs(SourceScope::Plinko, Some("plinko-drop-result-xyz"), 1.0);
        let keno = obs(SourceScope::Keno, Some("keno-result-12"), 1.0);
        assert_eq!(n.normalize(&plinko, &ctx(1.0)).unwrap().id, "xyz");
        let keno_bet = n.normalize(&keno, &ctx(1.0)).unwrap();
        assert_eq!(keno_bet.id, "12");
        assert_eq!(keno_bet.risk_level, "keno");
    }

    #[test]
    fn missing_ids_are_synthesized_uniquely() {
        let mut n = Normalizer::new();
        let a = n.normalize(&obs(SourceScope::Network, None, 1.0), &ctx(1.0)).unwrap();
        let b = n.normalize(&obs(SourceScope::Network, None, 1.0), &ctx(1.0)).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("network-synthetic-"));
    }

    #[test]
    fn rejects_bad_multipliers() {
        let mut n = Normalizer::new();
        for m in [f64::NAN, f64::INFINITY, -0.5] {
            assert!(matches!(
                n.normalize(&obs(SourceScope::Network, Some("x"), m), &ctx(1.0)),
                Err(Rejection::InvalidMultiplier(_))
            ));
        }
    }

    #[test]
    fn rejects_negative_amounts() {
        let mut o = obs(SourceScope::Network, Some("x"), 1.0);
        o.amount_hint = Some(-1.0);
        assert_eq!(
            Normalizer::new().normalize(&o, &ctx(1.0)),
            Err(Rejection::InvalidAmount(-1.0))
        );
    }
}
