use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CanonicalBet, HistoryPoint};

/// Number of bets kept in `recent_bets`.
pub const RECENT_BETS_CAPACITY: usize = 10;

/// A running total would leave the representable decimal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session totals would overflow")]
pub struct TotalsOverflow;

/// Running statistics for one observing session.
///
/// Mutated only through [`SessionStats::apply`] and [`SessionStats::reset`];
/// persistence and presentation read it by reference. Field names follow the
/// stored snapshot (`totalBets`, `recentBets`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_bets: u64,
    pub total_wagered: Decimal,
    pub total_profit: Decimal,
    pub total_winnings: Decimal,
    /// Streaming mean of every applied multiplier.
    pub average_multiplier: f64,
    pub wins: u64,
    pub losses: u64,
    /// Newest first, at most [`RECENT_BETS_CAPACITY`] entries.
    pub recent_bets: Vec<CanonicalBet>,
    /// Cumulative profit after each bet.
    pub profit_history: Vec<HistoryPoint>,
    /// Amount wagered on each bet.
    pub bet_history: Vec<HistoryPoint>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one admitted bet into the running totals.
    ///
    /// A multiplier of exactly 1.0 counts as a win. Nothing changes when a
    /// running total would overflow.
    pub fn apply(&mut self, bet: CanonicalBet) -> Result<(), TotalsOverflow> {
        let total_wagered = self.total_wagered.checked_add(bet.amount);
        let total_profit = self.total_profit.checked_add(bet.profit);
        let total_winnings = self.total_winnings.checked_add(bet.win_amount);
        let (Some(total_wagered), Some(total_profit), Some(total_winnings)) =
            (total_wagered, total_profit, total_winnings)
        else {
            return Err(TotalsOverflow);
        };

        self.total_bets += 1;
        let n = self.total_bets;

        self.total_wagered = total_wagered;
        self.total_profit = total_profit;
        self.total_winnings = total_winnings;

        self.average_multiplier =
            (self.average_multiplier * (n - 1) as f64 + bet.multiplier) / n as f64;

        if bet.multiplier >= 1.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }

        self.profit_history.push(HistoryPoint {
            index: n,
            value: self.total_profit,
            time_label: bet.observed_at.clone(),
        });
        self.bet_history.push(HistoryPoint {
            index: n,
            value: bet.amount,
            time_label: bet.observed_at.clone(),
        });

        self.recent_bets.insert(0, bet);
        self.recent_bets.truncate(RECENT_BETS_CAPACITY);
        Ok(())
    }

    /// Return every field to its zero value.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
