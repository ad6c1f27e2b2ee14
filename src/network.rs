//! Bet outcome extraction from captured request/response pairs.
//!
//! The observer only borrows an [`Exchange`]; the response the page sees is
//! never touched. Classification is over-inclusive and anything
//! that fails to parse is dropped without surfacing an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::page::parse_number;
use crate::types::{BetObservation, SourceScope};

/// Substrings of a request URL that mark it as possibly bet-related.
const URL_TOKENS: &[&str] = &["bet", "plinko", "game", "api", "duel.com"];

/// Substrings of a request body that mark it as possibly bet-related.
const BODY_TOKENS: &[&str] = &["risk_level", "amount", "rows"];

/// Request primitive that issued the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Fetch,
    Xhr,
}

/// A completed request/response pair as captured by the interception layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub transport: Transport,
    #[serde(default)]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub request_body: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub response_body: String,
}

/// Top-level shape of a bet response (and of relayed `betData` messages).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BetEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Fields read from a bet payload. Numbers may arrive as JSON numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BetPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub payout_multiplier: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub amount_currency: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub risk_level: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rows: Option<f64>,
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(&s),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

impl BetEnvelope {
    /// Extract the payload of a successful bet response.
    ///
    /// Requires `success == true`, an object `data`, and a parseable multiplier.
    pub fn payload(&self) -> Option<BetPayload> {
        if !self.success {
            return None;
        }
        let data = self.data.as_ref().filter(|d| d.is_object())?;
        let payload: BetPayload = match serde_json::from_value(data.clone()) {
            Ok(p) => p,
            Err(e) => {
                trace!("Ignoring malformed bet payload: {e}");
                return None;
            }
        };
        payload.payout_multiplier.is_some().then_some(payload)
    }

    /// Turn a successful envelope into an observation for `scope`.
    pub fn into_observation(
        self,
        scope: SourceScope,
        observed_at: DateTime<Utc>,
    ) -> Option<BetObservation> {
        let payload = self.payload()?;
        Some(BetObservation {
            scope,
            raw_id: payload.id,
            multiplier: payload.payout_multiplier?,
            amount_hint: payload.amount_currency,
            currency_hint: payload.currency.map(|c| c.to_ascii_lowercase()),
            risk_level: payload.risk_level,
            variant: payload
                .rows
                .filter(|r| r.is_finite() && *r >= 0.0)
                .map(|r| r as u32)
                .unwrap_or(0),
            observed_at,
        })
    }
}

/// Whether a fetch-style exchange looks bet-related by URL or request body.
pub fn is_interesting(exchange: &Exchange) -> bool {
    let url_hit = URL_TOKENS.iter().any(|t| exchange.url.contains(t));
    let body_hit = exchange
        .request_body
        .as_deref()
        .is_some_and(|body| BODY_TOKENS.iter().any(|t| body.contains(t)));
    url_hit || body_hit
}

/// Parse a response body as a bet envelope, swallowing failures.
pub fn parse_response(body: &str) -> Option<BetEnvelope> {
    match serde_json::from_str::<BetEnvelope>(body) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            trace!("Response is not a bet envelope: {e}");
            None
        }
    }
}

/// Inspect an exchange and extract a bet observation if it carries one.
///
/// Fetch exchanges are filtered by [`is_interesting`]; XHR exchanges are
/// inspected whenever they completed with HTTP 200.
pub fn inspect(exchange: &Exchange, observed_at: DateTime<Utc>) -> Option<BetObservation> {
    let eligible = match exchange.transport {
        Transport::Fetch => is_interesting(exchange),
        Transport::Xhr => exchange.status == 200,
    };
    if !eligible {
        return None;
    }
    parse_response(&exchange.response_body)?.into_observation(SourceScope::Network, observed_at)
}
