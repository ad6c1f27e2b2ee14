//! Result-marker observation over page snapshots.
//!
//! Two triggers feed the same rescan: a debounced reaction to mutation
//! batches that add markers, and a fixed interval backstop. The rescan looks
//! at every marker on the page and relies on the dedup gate to skip the ones
//! already counted, so running it twice in a row is harmless.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::trace;

use crate::context::BetContextCache;
use crate::dedup::DedupGate;
use crate::page::{PageView, ResultMarker, parse_number};
use crate::types::{BetObservation, SourceScope};

const PLINKO_PREFIXES: &[&str] = &["plinko-drop-result-", "plinko-result-"];
const KENO_PREFIXES: &[&str] = &["keno-result-"];

/// Row count stamped on Plinko observations.
pub const PLINKO_ROWS: u32 = 16;

/// `data-testid` prefixes of result markers for a DOM scope.
pub fn marker_prefixes(scope: SourceScope) -> &'static [&'static str] {
    match scope {
        SourceScope::Plinko => PLINKO_PREFIXES,
        SourceScope::Keno => KENO_PREFIXES,
        SourceScope::Network | SourceScope::Relay => &[],
    }
}

pub fn is_result_marker(scope: SourceScope, test_id: &str) -> bool {
    marker_prefixes(scope).iter().any(|p| test_id.starts_with(p))
}

/// Stable bet id of a marker: the attribute with its scope prefix removed.
pub fn marker_id(scope: SourceScope, test_id: &str) -> String {
    marker_prefixes(scope)
        .iter()
        .find_map(|p| test_id.strip_prefix(p))
        .unwrap_or(test_id)
        .to_string()
}

/// Multiplier shown by a marker, e.g. `"x 1.5"`, `"1,000x"` or `"0.2"`.
///
/// Only finite non-negative values count; anything else is treated as not
/// rendered yet.
pub fn parse_marker_multiplier(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix(['x', 'X'])
        .map(str::trim_start)
        .unwrap_or(trimmed);
    parse_number(stripped).filter(|m| m.is_finite() && *m >= 0.0)
}

/// Risk level shown next to the board. Only Plinko has one.
pub fn infer_risk(scope: SourceScope, page: &impl PageView) -> Option<String> {
    if scope != SourceScope::Plinko {
        return None;
    }
    let text = page.risk_display_text().unwrap_or_default().to_lowercase();
    let level = if text.contains("low") {
        "low"
    } else if text.contains("medium") {
        "medium"
    } else {
        "high"
    };
    Some(level.to_string())
}

/// Watches one game's result markers.
#[derive(Debug, Clone, Copy)]
pub struct DomObserver {
    scope: SourceScope,
}

impl DomObserver {
    pub fn new(scope: SourceScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> SourceScope {
        self.scope
    }

    /// Delay before the first scan after startup.
    pub fn initial_delay(&self) -> Duration {
        match self.scope {
            SourceScope::Keno => Duration::from_millis(1000),
            _ => Duration::from_millis(800),
        }
    }

    /// Whether a batch of added markers warrants a rescan.
    pub fn batch_has_markers(&self, added: &[&ResultMarker]) -> bool {
        added.iter().any(|m| is_result_marker(self.scope, &m.test_id))
    }

    /// Scan every marker on the page and emit observations for unseen ones.
    ///
    /// Bet context is read per emitted observation. Markers with unparseable
    /// text are skipped without being recorded, so a later scan can pick them
    /// up once the host finishes rendering.
    pub fn rescan(
        &self,
        page: &impl PageView,
        gate: &DedupGate,
        context: &mut BetContextCache,
        observed_at: DateTime<Utc>,
    ) -> Vec<BetObservation> {
        let mut observations = Vec::new();
        for marker in page.result_markers() {
            if !is_result_marker(self.scope, &marker.test_id) {
                continue;
            }
            if gate.contains(self.scope, &marker_id(self.scope, &marker.test_id)) {
                continue;
            }
            let Some(multiplier) = parse_marker_multiplier(&marker.text) else {
                trace!("Marker {} has no multiplier yet: {:?}", marker.test_id, marker.text);
                continue;
            };
            let ctx = context.read(page);
            observations.push(BetObservation {
                scope: self.scope,
                raw_id: Some(marker.test_id.clone()),
                multiplier,
                amount_hint: Some(ctx.amount),
                currency_hint: Some(ctx.currency),
                risk_level: infer_risk(self.scope, page),
                variant: if self.scope == SourceScope::Plinko {
                    PLINKO_ROWS
                } else {
                    0
                },
                observed_at,
            });
        }
        observations
    }
}

/// Markers present in `current` whose id is absent from `previous`.
pub fn added_markers<'a>(
    previous: &[ResultMarker],
    current: &'a [ResultMarker],
) -> Vec<&'a ResultMarker> {
    current
        .iter()
        .filter(|m| !previous.iter().any(|p| p.test_id == m.test_id))
        .collect()
}

/// Single-shot delay that coalesces repeated triggers into one deadline.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm the timer unless it is already pending.
    pub fn arm(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.delay);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return true if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
