use serde::Serialize;

use crate::currency::{format_amount, format_signed};
use crate::state::SessionStats;
use crate::types::{CanonicalBet, HistoryPoint, UiPreferences};

/// Everything the display needs, already formatted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderModel {
    pub currency: String,
    pub profit: String,
    pub profit_positive: bool,
    pub wagered: String,
    pub wins: u64,
    pub losses: u64,
    pub total_bets: u64,
    pub average_multiplier: String,
    /// Present only when the recent list is shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_bets: Option<Vec<RecentBetRow>>,
    /// Present only when the graph is shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentBetRow {
    pub amount: String,
    pub multiplier: String,
    pub risk_level: String,
    pub profit: String,
    pub positive: bool,
    pub time: String,
}

/// Session time series for charting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub profit: Vec<HistoryPoint>,
    pub wagers: Vec<HistoryPoint>,
}

fn recent_row(bet: &CanonicalBet, currency: &str) -> RecentBetRow {
    RecentBetRow {
        amount: format_amount(bet.amount, currency),
        multiplier: format!("{:.2}x", bet.multiplier),
        risk_level: bet.risk_level.clone(),
        profit: format_signed(bet.profit, currency),
        positive: !bet.profit.is_sign_negative() || bet.profit.is_zero(),
        time: bet.observed_at.clone(),
    }
}

/// Build the render model for `stats` under `prefs`, formatted in `currency`.
pub fn render(stats: &SessionStats, prefs: &UiPreferences, currency: &str) -> RenderModel {
    let profit_positive = !stats.total_profit.is_sign_negative() || stats.total_profit.is_zero();
    RenderModel {
        currency: currency.to_string(),
        profit: format_signed(stats.total_profit, currency),
        profit_positive,
        wagered: format_amount(stats.total_wagered, currency),
        wins: stats.wins,
        losses: stats.losses,
        total_bets: stats.total_bets,
        average_multiplier: format!("{:.2}x", stats.average_multiplier),
        recent_bets: prefs.show_recent_bets.then(|| {
            stats
                .recent_bets
                .iter()
                .map(|bet| recent_row(bet, currency))
                .collect()
        }),
        chart: prefs.show_graph.then(|| ChartSeries {
            profit: stats.profit_history.clone(),
            wagers: stats.bet_history.clone(),
        }),
    }
}
