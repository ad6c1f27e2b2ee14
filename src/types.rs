use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::network::Exchange;
use crate::relay::RuntimeMessage;

/// Observation channel that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Network,
    Dom,
    Relay,
}

/// Independent identifier namespace used for deduplication.
///
/// Each DOM game variant gets its own scope; network payloads and relayed
/// messages each get one more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceScope {
    Plinko,
    Keno,
    Network,
    Relay,
}

impl SourceScope {
    pub fn kind(self) -> SourceKind {
        match self {
            SourceScope::Plinko | SourceScope::Keno => SourceKind::Dom,
            SourceScope::Network => SourceKind::Network,
            SourceScope::Relay => SourceKind::Relay,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceScope::Plinko => "plinko",
            SourceScope::Keno => "keno",
            SourceScope::Network => "network",
            SourceScope::Relay => "relay",
        }
    }
}

/// A raw, source-tagged signal that a bet outcome happened.
///
/// Consumed once by the normalizer and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BetObservation {
    pub scope: SourceScope,
    /// Payload id (network/relay) or marker attribute value (DOM).
    pub raw_id: Option<String>,
    pub multiplier: f64,
    pub amount_hint: Option<f64>,
    pub currency_hint: Option<String>,
    pub risk_level: Option<String>,
    /// Plinko row count; zero for variants without rows.
    pub variant: u32,
    pub observed_at: DateTime<Utc>,
}

impl BetObservation {
    pub fn source(&self) -> SourceKind {
        self.scope.kind()
    }
}

/// Normalized record of one physical bet outcome.
///
/// `win_amount = amount * multiplier` and `profit = win_amount - amount`.
/// Legacy snapshots stored `timestamp` and `rows`; both are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanonicalBet {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub multiplier: f64,
    pub win_amount: Decimal,
    pub profit: Decimal,
    pub risk_level: String,
    #[serde(alias = "rows")]
    pub variant_info: u32,
    #[serde(alias = "timestamp")]
    pub observed_at: String,
}

/// One point of a session time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(rename = "x")]
    pub index: u64,
    #[serde(rename = "y")]
    pub value: Decimal,
    #[serde(rename = "time", default)]
    pub time_label: String,
}

/// Display toggles. Reset to both-visible on every load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPreferences {
    pub show_recent_bets: bool,
    pub show_graph: bool,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            show_recent_bets: true,
            show_graph: true,
        }
    }
}

/// One line of the runtime's stdin feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    /// A captured request/response pair.
    Exchange(Exchange),
    /// A message relayed from another process.
    Message(RuntimeMessage),
    /// A user control.
    Control(Control),
}

/// User controls for the stats display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Control {
    ToggleGraph,
    ToggleRecentBets,
    OpenDisplay,
    CloseDisplay,
    /// Zero all stats. Ignored unless `confirmed`.
    Reset {
        #[serde(default)]
        confirmed: bool,
    },
}
