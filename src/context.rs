use tracing::debug;

use crate::currency::{self, FALLBACK_CURRENCY};
use crate::page::{PageView, parse_number};

/// Bet amount and currency as shown on the page when a bet was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct BetContext {
    pub amount: f64,
    pub currency: String,
}

impl Default for BetContext {
    fn default() -> Self {
        Self {
            amount: 0.0,
            currency: FALLBACK_CURRENCY.to_string(),
        }
    }
}

/// Read-through cache of the live bet amount and currency.
///
/// `read` always goes to the page; [`BetContextCache::fallback`] backs
/// observations that arrive without a page at hand (network payloads missing
/// hints).
#[derive(Debug, Clone, Default)]
pub struct BetContextCache {
    current_currency: Option<String>,
    last: BetContext,
}

impl BetContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currency last discovered by polling or by a bet read.
    pub fn currency(&self) -> &str {
        self.current_currency.as_deref().unwrap_or(FALLBACK_CURRENCY)
    }

    /// Context for observations without hints: the amount last read from
    /// the page, in the live currency.
    pub fn fallback(&self) -> BetContext {
        BetContext {
            amount: self.last.amount,
            currency: self.currency().to_string(),
        }
    }

    /// Re-run currency discovery. Returns true when the token changed.
    pub fn refresh_currency(&mut self, page: &impl PageView) -> bool {
        let token = currency::resolve(page);
        let changed = self.currency() != token;
        if changed {
            debug!("Currency changed: {} -> {token}", self.currency());
        }
        self.current_currency = Some(token);
        changed
    }

    /// Read the bet amount and currency from the page and cache them.
    ///
    /// Amount comes from the rendered money text, then the input value when the
    /// text is missing or zero. A known code at the end of the bet input label
    /// overrides the polled currency.
    pub fn read(&mut self, page: &impl PageView) -> BetContext {
        let mut amount = page
            .money_amount_text()
            .and_then(parse_number)
            .unwrap_or(0.0);
        if amount == 0.0 {
            amount = page
                .currency_input_value()
                .and_then(parse_number)
                .unwrap_or(0.0);
        }

        let label_currency = page.bet_input_label().and_then(currency::trailing_token);
        if let Some(token) = &label_currency {
            self.current_currency = Some(token.clone());
        }

        self.last = BetContext {
            amount,
            currency: self.currency().to_string(),
        };
        self.last.clone()
    }
}
