use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::BetContextCache;
use crate::dedup::{Admission, DedupGate};
use crate::dom::DomObserver;
use crate::network::{self, Exchange};
use crate::normalizer::{Normalizer, Rejection};
use crate::page::PageView;
use crate::persistence::{PersistenceBridge, Store, StoreChange, merge_snapshot};
use crate::presentation::{RenderModel, render};
use crate::relay::RuntimeMessage;
use crate::state::SessionStats;
use crate::types::{BetObservation, CanonicalBet, Control, UiPreferences};
use crate::STATS_KEY;

/// What happened to one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied(CanonicalBet),
    Duplicate(String),
    Rejected(Rejection),
}

/// Owns the reconciliation pipeline for one page context:
/// normalizer -> dedup gate -> stats, with write-through persistence.
///
/// Every entry point is synchronous and handles its own failures.
pub struct Engine<S: Store> {
    stats: SessionStats,
    gate: DedupGate,
    normalizer: Normalizer,
    context: BetContextCache,
    bridge: PersistenceBridge<S>,
    prefs: UiPreferences,
    display_open: bool,
}

impl<S: Store> Engine<S> {
    /// Create an engine whose stats start from the stored snapshot.
    pub fn new(bridge: PersistenceBridge<S>, dedup_capacity: usize) -> Self {
        let stats = bridge.load();
        Self {
            stats,
            gate: DedupGate::new(dedup_capacity),
            normalizer: Normalizer::new(),
            context: BetContextCache::new(),
            bridge,
            prefs: UiPreferences::default(),
            display_open: false,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn currency(&self) -> &str {
        self.context.currency()
    }

    pub fn bridge(&self) -> &PersistenceBridge<S> {
        &self.bridge
    }

    pub fn is_display_open(&self) -> bool {
        self.display_open
    }

    /// Run one observation through normalize -> admit -> apply.
    pub fn ingest(&mut self, obs: BetObservation) -> Outcome {
        let bet = match self.normalizer.normalize(&obs, &self.context.fallback()) {
            Ok(bet) => bet,
            Err(rejection) => {
                debug!("Rejected {} observation: {rejection}", obs.scope.label());
                return Outcome::Rejected(rejection);
            }
        };

        if self.gate.admit(obs.scope, &bet.id) == Admission::Duplicate {
            debug!("Duplicate {} bet {}", obs.scope.label(), bet.id);
            return Outcome::Duplicate(bet.id);
        }

        debug!(
            "Applying {} bet {}: {} {} x{:.2}",
            obs.scope.label(),
            bet.id,
            bet.amount,
            bet.currency,
            bet.multiplier
        );
        if let Err(e) = self.stats.apply(bet.clone()) {
            warn!("Dropping {} bet {}: {e}", obs.scope.label(), bet.id);
            return Outcome::Rejected(e.into());
        }
        self.bridge.save(&self.stats);
        Outcome::Applied(bet)
    }

    /// Inspect a captured network exchange.
    pub fn ingest_exchange(&mut self, exchange: &Exchange, now: DateTime<Utc>) -> Option<Outcome> {
        let obs = network::inspect(exchange, now)?;
        Some(self.ingest(obs))
    }

    /// Apply a relayed message the same way as a local observation.
    pub fn ingest_message(&mut self, message: RuntimeMessage, now: DateTime<Utc>) -> Option<Outcome> {
        let obs = message.into_observation(now)?;
        Some(self.ingest(obs))
    }

    /// Rescan the page's result markers and ingest every new one.
    pub fn rescan(
        &mut self,
        observer: &DomObserver,
        page: &impl PageView,
        now: DateTime<Utc>,
    ) -> Vec<Outcome> {
        let observations = observer.rescan(page, &self.gate, &mut self.context, now);
        observations.into_iter().map(|obs| self.ingest(obs)).collect()
    }

    /// Re-run currency discovery against the page.
    pub fn refresh_currency(&mut self, page: &impl PageView) -> bool {
        self.context.refresh_currency(page)
    }

    /// Zero all stats and persist the zeroed snapshot. Does nothing unless
    /// `confirmed`; there is no undo.
    pub fn reset(&mut self, confirmed: bool) -> bool {
        if !confirmed {
            return false;
        }
        info!("Resetting stats ({} bets discarded)", self.stats.total_bets);
        self.stats.reset();
        self.bridge.save(&self.stats);
        true
    }

    /// Merge a snapshot written by another process into live state.
    ///
    /// Returns true when the display is open and should be re-rendered.
    pub fn apply_external_change(&mut self, change: &StoreChange) -> bool {
        if change.key != STATS_KEY {
            return false;
        }
        let Some(value) = &change.new_value else {
            return false;
        };
        self.merge_external(value)
    }

    fn merge_external(&mut self, snapshot: &Value) -> bool {
        self.stats = merge_snapshot(&self.stats, snapshot);
        debug!("Merged external snapshot ({} bets)", self.stats.total_bets);
        self.display_open
    }

    /// Apply a user control. Returns true when the display should re-render.
    pub fn control(&mut self, control: Control) -> bool {
        match control {
            Control::ToggleGraph => {
                self.toggle_graph();
            }
            Control::ToggleRecentBets => {
                self.toggle_recent_bets();
            }
            Control::OpenDisplay => self.open_display(),
            Control::CloseDisplay => {
                self.close_display();
                return false;
            }
            Control::Reset { confirmed } => {
                if !self.reset(confirmed) {
                    return false;
                }
            }
        }
        self.display_open
    }

    pub fn toggle_graph(&mut self) -> bool {
        self.prefs.show_graph = !self.prefs.show_graph;
        self.prefs.show_graph
    }

    pub fn toggle_recent_bets(&mut self) -> bool {
        self.prefs.show_recent_bets = !self.prefs.show_recent_bets;
        self.prefs.show_recent_bets
    }

    pub fn open_display(&mut self) {
        self.display_open = true;
    }

    pub fn close_display(&mut self) {
        self.display_open = false;
    }

    pub fn render(&self) -> RenderModel {
        render(&self.stats, &self.prefs, self.context.currency())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::network::Transport;
    use crate::page::{PageSnapshot, ResultMarker};
    use crate::persistence::{MemoryStore, StoreError};
    use crate::types::SourceScope;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn engine() -> Engine<MemoryStore> {
        Engine::new(PersistenceBridge::new(Arc::new(MemoryStore::new())), 64)
    }

    fn network_obs(id: &str, amount: f64, multiplier: f64) -> BetObservation {
        BetObservation {
            scope: SourceScope::Network,
            raw_id: Some(id.into()),
            multiplier,
            amount_hint: Some(amount),
            currency_hint: None,
            risk_level: None,
            variant: 0,
            observed_at: Utc::now(),
        }
    }

    fn marker(test_id: &str, text: &str) -> ResultMarker {
        ResultMarker {
            test_id: test_id.into(),
            text: text.into(),
        }
    }

    #[test]
    fn applies_and_persists() {
        let mut engine = engine();
        let outcome = engine.ingest(network_obs("a", 10.0, 2.0));
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert_eq!(engine.stats().total_profit, dec!(10));
        assert_eq!(engine.bridge().load(), *engine.stats());
    }

    #[test]
    fn duplicate_ids_leave_stats_unchanged() {
        let mut engine = engine();
        engine.ingest(network_obs("a", 10.0, 2.0));
        let before = engine.stats().clone();
        assert_eq!(
            engine.ingest(network_obs("a", 10.0, 2.0)),
            Outcome::Duplicate("a".into())
        );
        assert_eq!(*engine.stats(), before);
    }

    #[test]
    fn rejected_observations_do_not_count() {
        let mut engine = engine();
        let outcome = engine.ingest(network_obs("a", 10.0, f64::NAN));
        assert!(matches!(outcome, Outcome::Rejected(Rejection::InvalidMultiplier(_))));
        assert_eq!(engine.stats().total_bets, 0);
    }

    #[test]
    fn repeated_rescans_are_idempotent() {
        let mut engine = engine();
        let observer = DomObserver::new(SourceScope::Plinko);
        let page = PageSnapshot {
            money_amount_text: Some("1".into()),
            markers: vec![
                marker("plinko-drop-result-1", "x0.5"),
                marker("plinko-result-1", "x0.5"),
                marker("plinko-drop-result-2", "x3"),
            ],
            ..Default::default()
        };
        let first = engine.rescan(&observer, &page, Utc::now());
        assert_eq!(first.len(), 3);
        assert!(matches!(first[1], Outcome::Duplicate(_)));
        assert!(engine.rescan(&observer, &page, Utc::now()).is_empty());
        assert_eq!(engine.stats().total_bets, 2);
        assert_eq!(engine.stats().total_profit, dec!(1.5));
    }

    #[test]
    fn out_of_range_markers_are_not_rescanned_forever() {
        let mut engine = engine();
        let observer = DomObserver::new(SourceScope::Keno);
        let page = PageSnapshot {
            money_amount_text: Some("1".into()),
            markers: vec![marker("keno-result-1", "-2"), marker("keno-result-2", "1e999")],
            ..Default::default()
        };
        assert!(engine.rescan(&observer, &page, Utc::now()).is_empty());
        assert!(engine.rescan(&observer, &page, Utc::now()).is_empty());
        assert_eq!(engine.stats().total_bets, 0);
    }

    #[test]
    fn network_and_dom_ids_are_not_reconciled() {
        let mut engine = engine();
        engine.ingest(network_obs("77", 1.0, 2.0));
        let page = PageSnapshot {
            money_amount_text: Some("1".into()),
            markers: vec![marker("keno-result-77", "2")],
            ..Default::default()
        };
        engine.rescan(&DomObserver::new(SourceScope::Keno), &page, Utc::now());
        assert_eq!(engine.stats().total_bets, 2);
    }

    #[test]
    fn exchange_and_message_paths_apply() {
        let mut engine = engine();
        let exchange = Exchange {
            transport: Transport::Fetch,
            method: "POST".into(),
            url: "https://duel.com/api/plinko/bet".into(),
            request_body: None,
            status: 200,
            response_body: r#"{"success":true,"data":{"id":"n1","payout_multiplier":"0","amount_currency":"3"}}"#.into(),
        };
        assert!(matches!(
            engine.ingest_exchange(&exchange, Utc::now()),
            Some(Outcome::Applied(_))
        ));

        let message: RuntimeMessage = serde_json::from_value(json!({
            "action": "betData",
            "data": {"success": true, "data": {"id": "n1", "payout_multiplier": 2, "amount_currency": 1}}
        }))
        .unwrap();
        assert!(matches!(
            engine.ingest_message(message, Utc::now()),
            Some(Outcome::Applied(_))
        ));
        assert_eq!(engine.stats().total_bets, 2);
        assert_eq!(engine.stats().losses, 1);
    }

    #[test]
    fn reset_requires_confirmation() {
        let mut engine = engine();
        engine.ingest(network_obs("a", 5.0, 3.0));
        assert!(!engine.reset(false));
        assert_eq!(engine.stats().total_bets, 1);

        assert!(engine.reset(true));
        assert_eq!(*engine.stats(), SessionStats::default());
        assert_eq!(engine.bridge().load(), SessionStats::default());
    }

    #[test]
    fn external_changes_merge_and_request_render_when_open() {
        let mut engine = engine();
        let change = StoreChange {
            key: STATS_KEY.into(),
            new_value: Some(json!({"totalBets": 4, "wins": 3, "losses": 1})),
        };
        assert!(!engine.apply_external_change(&change));
        assert_eq!(engine.stats().total_bets, 4);

        engine.open_display();
        assert!(engine.apply_external_change(&change));

        let other = StoreChange {
            key: "duelTemp_x".into(),
            new_value: Some(json!({})),
        };
        assert!(!engine.apply_external_change(&other));
    }

    #[test]
    fn toggles_flip_render_sections() {
        let mut engine = engine();
        assert!(!engine.toggle_graph());
        assert!(engine.render().chart.is_none());
        assert!(engine.render().recent_bets.is_some());
        assert!(!engine.toggle_recent_bets());
        assert!(engine.render().recent_bets.is_none());
        assert!(engine.toggle_graph());
    }

    // ── failure handling ───────────────────────────────────────────

    struct FailingStore {
        changes: tokio::sync::broadcast::Sender<StoreChange>,
    }

    impl FailingStore {
        fn new() -> Self {
            let (changes, _) = tokio::sync::broadcast::channel(4);
            Self { changes }
        }
    }

    impl Store for FailingStore {
        fn get(&self, _keys: Option<&[&str]>) -> Result<serde_json::Map<String, Value>, StoreError> {
            Ok(serde_json::Map::new())
        }

        fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&self, _keys: &[String]) -> Result<(), StoreError> {
            Ok(())
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreChange> {
            self.changes.subscribe()
        }
    }

    #[test]
    fn failed_writes_keep_in_memory_stats() {
        let mut engine = Engine::new(PersistenceBridge::new(Arc::new(FailingStore::new())), 64);
        assert!(matches!(engine.ingest(network_obs("a", 10.0, 2.0)), Outcome::Applied(_)));
        assert!(matches!(engine.ingest(network_obs("b", 1.0, 0.0)), Outcome::Applied(_)));
        assert_eq!(engine.stats().total_bets, 2);
        assert_eq!(engine.stats().total_profit, dec!(9));
    }

    #[tokio::test]
    async fn failed_background_writes_keep_in_memory_stats() {
        let mut engine = Engine::new(PersistenceBridge::new(Arc::new(FailingStore::new())), 64);
        assert!(matches!(engine.ingest(network_obs("a", 3.0, 2.0)), Outcome::Applied(_)));
        tokio::task::yield_now().await;
        assert_eq!(engine.stats().total_bets, 1);
        assert_eq!(engine.stats().total_wagered, dec!(3));
    }

    #[test]
    fn overflowing_totals_are_rejected_without_counting() {
        let mut engine = engine();
        assert!(matches!(engine.ingest(network_obs("a", 5e28, 1.0)), Outcome::Applied(_)));
        let before = engine.stats().clone();
        assert!(matches!(
            engine.ingest(network_obs("b", 5e28, 1.0)),
            Outcome::Rejected(Rejection::TotalsOverflow(_))
        ));
        assert_eq!(*engine.stats(), before);
        assert_eq!(engine.stats().total_bets, 1);
    }

    #[test]
    fn hintless_bets_use_polled_currency() {
        let mut engine = engine();
        let page = PageSnapshot {
            currency_icons: vec!["url(#icon-duel-btc_svg__a)".into()],
            ..Default::default()
        };
        assert!(engine.refresh_currency(&page));
        let Outcome::Applied(bet) = engine.ingest(network_obs("a", 1.0, 2.0)) else {
            panic!("expected an applied bet");
        };
        assert_eq!(bet.currency, "btc");
    }

    // ── controls ───────────────────────────────────────────────────

    fn control(raw: serde_json::Value) -> Control {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn controls_drive_display_and_reset() {
        let mut engine = engine();
        engine.ingest(network_obs("a", 2.0, 3.0));

        assert!(!engine.control(control(json!({"action": "toggleGraph"}))));
        assert!(engine.control(control(json!({"action": "openDisplay"}))));
        assert!(engine.render().chart.is_none());
        assert!(engine.control(control(json!({"action": "toggleRecentBets"}))));
        assert!(engine.render().recent_bets.is_none());

        assert!(!engine.control(control(json!({"action": "reset"}))));
        assert_eq!(engine.stats().total_bets, 1);
        assert!(engine.control(control(json!({"action": "reset", "confirmed": true}))));
        assert_eq!(engine.stats().total_bets, 0);

        assert!(!engine.control(control(json!({"action": "closeDisplay"}))));
        assert!(!engine.is_display_open());
    }
}
