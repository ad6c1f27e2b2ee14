use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::network::BetEnvelope;
use crate::types::{BetObservation, SourceScope};

/// Message relayed from another process, dispatched on its `action` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action")]
pub enum RuntimeMessage {
    /// Bet data shaped exactly like a network bet response.
    #[serde(rename = "betData")]
    BetData { data: BetEnvelope },
    /// Any action this process does not handle.
    #[serde(other)]
    Unknown,
}

impl RuntimeMessage {
    /// Observation carried by the message, if any.
    pub fn into_observation(self, observed_at: DateTime<Utc>) -> Option<BetObservation> {
        match self {
            RuntimeMessage::BetData { data } => {
                data.into_observation(SourceScope::Relay, observed_at)
            }
            RuntimeMessage::Unknown => None,
        }
    }
}
