use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::page::PageView;

/// Token used when no strategy finds a currency on the page.
pub const FALLBACK_CURRENCY: &str = "usd";

/// Known currency tokens and their display symbols.
const CURRENCIES: &[(&str, &str)] = &[
    ("eur", "€"),
    ("usd", "$"),
    ("cad", "C$"),
    ("jpy", "¥"),
    ("cny", "¥"),
    ("inr", "₹"),
    ("idr", "Rp"),
    ("nzd", "NZ$"),
    ("aud", "A$"),
    ("dkk", "kr"),
    ("try", "₺"),
    ("krw", "₩"),
    ("ars", "$"),
    ("brl", "R$"),
    ("usdt", "USDT"),
    ("usdc", "USDC"),
    ("btc", "₿"),
    ("eth", "Ξ"),
    ("bnb", "BNB"),
    ("sol", "SOL"),
    ("xrp", "XRP"),
    ("ltc", "Ł"),
    ("doge", "Ð"),
    ("trx", "TRX"),
    ("bch", "BCH"),
    ("ada", "ADA"),
    ("link", "LINK"),
    ("avax", "AVAX"),
    ("ton", "TON"),
    ("hbar", "HBAR"),
];

static TRAILING_CODE: LazyLock<Regex> = LazyLock::new(|| {
    let codes: Vec<&str> = CURRENCIES.iter().map(|(code, _)| *code).collect();
    Regex::new(&format!(r"(?i)\b({})\s*$", codes.join("|"))).expect("valid currency regex")
});

static ICON_CLIP_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"icon-duel-(\w+)_svg__a").expect("valid icon regex"));

/// Display symbol for a token, if known.
pub fn symbol(token: &str) -> Option<&'static str> {
    let lower = token.to_ascii_lowercase();
    CURRENCIES
        .iter()
        .find(|(code, _)| *code == lower)
        .map(|(_, symbol)| *symbol)
}

pub fn is_known(token: &str) -> bool {
    symbol(token).is_some()
}

/// Known token at the end of a piece of text, lowercased.
pub fn trailing_token(text: &str) -> Option<String> {
    let caps = TRAILING_CODE.captures(text.trim())?;
    let token = caps.get(1)?.as_str().to_ascii_lowercase();
    is_known(&token).then_some(token)
}

fn icon_token(clip_path: &str) -> Option<String> {
    let caps = ICON_CLIP_PATH.captures(clip_path)?;
    let token = caps.get(1)?.as_str().to_ascii_lowercase();
    is_known(&token).then_some(token)
}

/// Discover the active currency token from page signals.
///
/// Strategies run in order, first match wins: icon clip-paths, the bet input
/// label's trailing code, then any currency-named element (text before the
/// `data-currency` attribute). Falls back to [`FALLBACK_CURRENCY`].
pub fn resolve(page: &impl PageView) -> String {
    let from_icons = || {
        page.currency_icon_clip_paths()
            .iter()
            .find_map(|clip| icon_token(clip))
    };
    let from_label = || page.bet_input_label().and_then(trailing_token);
    let from_elements = || {
        page.currency_elements().iter().find_map(|el| {
            let text = el
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .or(el.data_currency.as_deref())?;
            trailing_token(text)
        })
    };

    from_icons()
        .or_else(from_label)
        .or_else(from_elements)
        .unwrap_or_else(|| FALLBACK_CURRENCY.to_string())
}

/// Format an amount as `<symbol><abs value to 2 dp>`.
///
/// Unknown tokens use the fallback currency's symbol.
pub fn format_amount(amount: Decimal, token: &str) -> String {
    let symbol = symbol(token)
        .or_else(|| symbol(FALLBACK_CURRENCY))
        .unwrap_or("$");
    format!("{symbol}{:.2}", amount.abs())
}

/// Like [`format_amount`] with a leading `+` or `-`.
pub fn format_signed(amount: Decimal, token: &str) -> String {
    let sign = if amount.is_sign_negative() && !amount.is_zero() {
        '-'
    } else {
        '+'
    };
    format!("{sign}{}", format_amount(amount, token))
}
