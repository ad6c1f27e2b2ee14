use serde::Serialize;

use crate::presentation::RenderModel;
use crate::types::CanonicalBet;

/// One applied bet, as emitted on stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetEvent<'a> {
    pub timestamp: String,
    pub bet: &'a CanonicalBet,
    pub total_bets: u64,
}

/// Emit an applied bet as a single JSON line to stdout.
pub fn report_bet(event: &BetEvent<'_>) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// Emit a render model as a single JSON line to stdout.
pub fn report_render(model: &RenderModel) {
    if let Ok(json) = serde_json::to_string(model) {
        println!("{json}");
    }
}

/// Emit a render model as pretty-printed JSON to stdout.
pub fn report_render_pretty(model: &RenderModel) {
    if let Ok(json) = serde_json::to_string_pretty(model) {
        println!("{json}");
    }
}
