//! Read-only view of the host page.
//!
//! The page is an unstable contract: every accessor may come back empty and
//! callers degrade to defaults. [`PageSnapshot`] is the serialized form the
//! runtime polls from disk.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// An element whose class or attribute name mentions "currency".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurrencyElement {
    pub text: Option<String>,
    pub data_currency: Option<String>,
}

/// A result marker element, identified by its `data-testid` attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultMarker {
    pub test_id: String,
    pub text: String,
}

/// Accessors over the page elements the tracker reads.
pub trait PageView {
    /// `clip-path` values of currency icon groups.
    fn currency_icon_clip_paths(&self) -> &[String];
    /// Text of the bet input label (ends with the currency code).
    fn bet_input_label(&self) -> Option<&str>;
    fn currency_elements(&self) -> &[CurrencyElement];
    /// Rendered text of the money input amount.
    fn money_amount_text(&self) -> Option<&str>;
    /// Value of the currency input field.
    fn currency_input_value(&self) -> Option<&str>;
    /// Text of the first risk-level display element.
    fn risk_display_text(&self) -> Option<&str>;
    /// All result markers currently present, in document order.
    fn result_markers(&self) -> &[ResultMarker];
}

/// A point-in-time capture of the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub currency_icons: Vec<String>,
    pub bet_input_label: Option<String>,
    pub currency_elements: Vec<CurrencyElement>,
    pub money_amount_text: Option<String>,
    pub currency_input_value: Option<String>,
    pub risk_text: Option<String>,
    pub markers: Vec<ResultMarker>,
}

impl PageSnapshot {
    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(snapshot)
    }
}

impl PageView for PageSnapshot {
    fn currency_icon_clip_paths(&self) -> &[String] {
        &self.currency_icons
    }

    fn bet_input_label(&self) -> Option<&str> {
        self.bet_input_label.as_deref()
    }

    fn currency_elements(&self) -> &[CurrencyElement] {
        &self.currency_elements
    }

    fn money_amount_text(&self) -> Option<&str> {
        self.money_amount_text.as_deref()
    }

    fn currency_input_value(&self) -> Option<&str> {
        self.currency_input_value.as_deref()
    }

    fn risk_display_text(&self) -> Option<&str> {
        self.risk_text.as_deref()
    }

    fn result_markers(&self) -> &[ResultMarker] {
        &self.markers
    }
}

static LEADING_FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").expect("valid float regex")
});

/// Parse the leading number of a display string, ignoring thousands separators.
///
/// Trailing text is ignored (`"1,250.50 USD"` -> `1250.5`); a string that does
/// not start with a number yields `None`.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned = text.trim().replace(',', "");
    let m = LEADING_FLOAT.find(&cleaned)?;
    m.as_str().parse::<f64>().ok()
}
