//! Reply parsing: model text → typed line items.
//!
//! Models are told to answer with pure JSON, yet they still wrap it in
//! ` ```json ` fences, prepend a sentence, or sprinkle zero-width characters.
//! Cleanup is deterministic and shape-preserving; after it the JSON object is
//! deserialised strictly. Any shape mismatch (a string where a number belongs,
//! a missing `items` array, an unknown page type) rejects the whole page.
//! Nothing is coerced or guessed.

use crate::output::{BillItem, PageType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Why a reply was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("reply contains no JSON object")]
    NoJsonObject,

    #[error("reply JSON does not match the expected shape: {0}")]
    Schema(String),

    #[error("unknown page_type '{0}'")]
    UnknownPageType(String),
}

/// A successfully parsed page reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub page_type: PageType,
    pub items: Vec<BillItem>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    page_type: Option<String>,
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    item_name: String,
    quantity: Option<f64>,
    rate: Option<f64>,
    amount: Option<f64>,
}

impl RawItem {
    fn into_bill_item(self) -> Option<BillItem> {
        let name = self.item_name.trim();
        if name.is_empty() {
            return None;
        }
        Some(BillItem {
            item_name: name.to_string(),
            item_amount: self.amount.filter(|a| a.is_finite()),
            item_rate: self.rate.filter(|r| r.is_finite()).unwrap_or(0.0),
            item_quantity: self.quantity.filter(|q| q.is_finite()).unwrap_or(0.0),
        })
    }
}

/// Parse one model reply into a page type and its line items.
///
/// A missing `page_type` defaults to "Bill Detail". Items whose name is
/// blank are dropped.
pub fn parse_reply(text: &str) -> Result<ParsedPage, ReplyError> {
    let cleaned = remove_invisible_chars(text);
    let cleaned = strip_code_fences(&cleaned);
    let json = find_json_object(&cleaned).ok_or(ReplyError::NoJsonObject)?;

    let raw: RawReply =
        serde_json::from_str(json).map_err(|e| ReplyError::Schema(e.to_string()))?;

    let page_type = match raw.page_type.as_deref().map(str::trim) {
        None | Some("") => PageType::default(),
        Some(label) => PageType::from_label(label)
            .ok_or_else(|| ReplyError::UnknownPageType(label.to_string()))?,
    };

    let items = raw
        .items
        .into_iter()
        .filter_map(RawItem::into_bill_item)
        .collect();

    Ok(ParsedPage { page_type, items })
}

// ── Cleanup rules ────────────────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)\n?\s*```").unwrap());

/// Keep the body of the first fenced block if there is one.
fn strip_code_fences(input: &str) -> String {
    match RE_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

/// The span from the first `{` to the last `}`.
fn find_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    (end > start).then(|| &input[start..=end])
}
