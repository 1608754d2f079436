//! Output types: line items, per-page results, token usage and the
//! response envelope served over HTTP.
//!
//! The serialised field names are part of the public contract of the
//! `/extract-bill-data` endpoint and must not change.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// One extracted invoice line.
///
/// `item_amount` is `None` when the model reported no amount (JSON `null`).
/// Such an item is never considered a duplicate of anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    pub item_name: String,
    pub item_amount: Option<f64>,
    pub item_rate: f64,
    pub item_quantity: f64,
}

impl BillItem {
    pub fn new(name: impl Into<String>, amount: f64, rate: f64, quantity: f64) -> Self {
        Self {
            item_name: name.into(),
            item_amount: Some(amount),
            item_rate: rate,
            item_quantity: quantity,
        }
    }

    /// The amount if it is present and finite.
    pub fn comparable_amount(&self) -> Option<f64> {
        self.item_amount.filter(|a| a.is_finite())
    }
}

/// Page classification reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageType {
    #[default]
    #[serde(rename = "Bill Detail")]
    BillDetail,
    #[serde(rename = "Final Bill")]
    FinalBill,
    #[serde(rename = "Pharmacy")]
    Pharmacy,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::BillDetail => "Bill Detail",
            PageType::FinalBill => "Final Bill",
            PageType::Pharmacy => "Pharmacy",
        }
    }

    /// Match a model-supplied label, ignoring case and spacing
    /// (`"final bill"`, `"FINAL  BILL"`, `"FinalBill"`).
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "billdetail" => Some(PageType::BillDetail),
            "finalbill" => Some(PageType::FinalBill),
            "pharmacy" => Some(PageType::Pharmacy),
            _ => None,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts consumed by model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            total_tokens: input_tokens + output_tokens,
            input_tokens,
            output_tokens,
        }
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            total_tokens: self.total_tokens + rhs.total_tokens,
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

impl<'a> Sum<&'a TokenUsage> for TokenUsage {
    fn sum<I: Iterator<Item = &'a TokenUsage>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// All line items extracted from one rendered page.
///
/// Only `page_no`, `page_type` and `bill_items` are serialised; the rest is
/// in-process diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_no: usize,
    pub page_type: PageType,
    pub bill_items: Vec<BillItem>,

    #[serde(skip)]
    pub usage: TokenUsage,
    #[serde(skip)]
    pub duration_ms: u64,
    #[serde(skip)]
    pub retries: u8,
    /// Set when this page failed; `bill_items` is then empty.
    #[serde(skip)]
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn new(page_no: usize, page_type: PageType, bill_items: Vec<BillItem>) -> Self {
        Self {
            page_no,
            page_type,
            bill_items,
            usage: TokenUsage::default(),
            duration_ms: 0,
            retries: 0,
            error: None,
        }
    }

    /// A page that contributes no items because of `error`.
    pub fn failed(page_no: usize, error: PageError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(page_no, PageType::default(), Vec::new())
        }
    }
}

/// Statistics for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the document (1 for a plain image).
    pub total_pages: usize,
    /// Pages whose reply was parsed successfully.
    pub processed_pages: usize,
    /// Pages that failed and contributed no items.
    pub failed_pages: usize,
    /// Line items across all pages before deduplication.
    pub raw_item_count: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// Full library result for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Per-page records in page order, not deduplicated.
    pub pages: Vec<PageResult>,
    /// Items surviving cross-page deduplication, first-seen order.
    pub unique_items: Vec<BillItem>,
    pub total_item_count: usize,
    pub usage: TokenUsage,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Wrap into the success envelope served over HTTP.
    pub fn into_response(self) -> ExtractResponse {
        ExtractResponse {
            is_success: true,
            token_usage: self.usage,
            data: Some(ExtractData {
                pagewise_line_items: self.pages,
                total_item_count: self.total_item_count,
            }),
            error: None,
        }
    }
}

/// `data` section of the response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractData {
    pub pagewise_line_items: Vec<PageResult>,
    pub total_item_count: usize,
}

/// Response envelope of `POST /extract-bill-data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub is_success: bool,
    pub token_usage: TokenUsage,
    pub data: Option<ExtractData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractResponse {
    /// Envelope for a fatal failure: no data, zero usage.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            token_usage: TokenUsage::default(),
            data: None,
            error: Some(message.into()),
        }
    }
}
