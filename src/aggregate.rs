//! Cross-page aggregation and line-item deduplication.
//!
//! Hospital and pharmacy bills routinely list the same line twice: once on a
//! detail page and again on the final summary page. Counting both would
//! inflate `total_item_count`, so items are collapsed when their names are
//! near-identical *and* their amounts agree within a tolerance.
//!
//! ## Matching rule
//!
//! Item `I` duplicates an already-kept item `K` iff
//!
//! ```text
//! ratio(norm(I.name), norm(K.name)) >= similarity_threshold
//!     && |I.amount - K.amount| <= amount_tolerance
//! ```
//!
//! `ratio` is the classic sequence-matcher ratio `2·M / T`, where `M` is the
//! number of characters covered by the recursively found longest matching
//! blocks and `T` is the combined length of both strings. Items are visited
//! in page order, then item order; the first occurrence survives.
//!
//! Deduplication only affects the computed count (and `unique_items`). The
//! per-page lists are returned untouched.

use crate::output::{BillItem, PageResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum name similarity for two items to be considered the same line.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.92;

/// Maximum absolute amount difference, in currency units, for a duplicate.
pub const DEFAULT_AMOUNT_TOLERANCE: f64 = 1.0;

/// Tunables for [`dedupe_items`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Name similarity threshold in `[0.0, 1.0]`. Default: 0.92.
    pub similarity_threshold: f64,
    /// Absolute amount tolerance. Default: 1.0.
    pub amount_tolerance: f64,
    /// Lowercase and collapse whitespace before scoring. Default: true.
    pub normalize_names: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            amount_tolerance: DEFAULT_AMOUNT_TOLERANCE,
            normalize_names: true,
        }
    }
}

/// Result of aggregating one document's pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Surviving items in first-seen order.
    pub unique_items: Vec<BillItem>,
    /// Items across all pages before deduplication.
    pub raw_item_count: usize,
}

impl Aggregate {
    pub fn total_item_count(&self) -> usize {
        self.unique_items.len()
    }
}

/// Flatten `pages` in order and deduplicate their items.
pub fn aggregate(pages: &[PageResult], config: &DedupConfig) -> Aggregate {
    let flattened: Vec<&BillItem> = pages.iter().flat_map(|p| p.bill_items.iter()).collect();
    let raw_item_count = flattened.len();
    let unique_items = dedupe_items(flattened, config).into_iter().cloned().collect();
    Aggregate {
        unique_items,
        raw_item_count,
    }
}

/// Number of distinct items across `pages`.
pub fn total_item_count(pages: &[PageResult], config: &DedupConfig) -> usize {
    let flattened = pages.iter().flat_map(|p| p.bill_items.iter());
    dedupe_items(flattened, config).len()
}

/// Keep the first occurrence of every distinct item.
pub fn dedupe_items<'a, I>(items: I, config: &DedupConfig) -> Vec<&'a BillItem>
where
    I: IntoIterator<Item = &'a BillItem>,
{
    // Kept items with their pre-normalised names.
    let mut kept: Vec<(&'a BillItem, Vec<char>)> = Vec::new();

    for item in items {
        let name = comparable_name(&item.item_name, config);
        let duplicate = kept
            .iter()
            .any(|(k, k_name)| is_duplicate(item, &name, k, k_name, config));
        if !duplicate {
            kept.push((item, name));
        }
    }

    kept.into_iter().map(|(item, _)| item).collect()
}

fn is_duplicate(
    item: &BillItem,
    item_name: &[char],
    kept: &BillItem,
    kept_name: &[char],
    config: &DedupConfig,
) -> bool {
    // The cheaper amount test goes first; a missing amount never matches.
    let (Some(a), Some(b)) = (item.comparable_amount(), kept.comparable_amount()) else {
        return false;
    };
    if (a - b).abs() > config.amount_tolerance {
        return false;
    }
    ratio_chars(item_name, kept_name) >= config.similarity_threshold
}

fn comparable_name(name: &str, config: &DedupConfig) -> Vec<char> {
    if config.normalize_names {
        normalize_name(name).chars().collect()
    } else {
        name.chars().collect()
    }
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, trim and collapse internal whitespace runs to one space.
pub fn normalize_name(name: &str) -> String {
    RE_WHITESPACE
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

/// Sequence-matcher similarity of two strings, in `[0.0, 1.0]`.
///
/// Two empty strings are identical (1.0).
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(a, b) as f64 / total as f64
}

/// Total size of the matching blocks between `a` and `b`.
///
/// Finds the longest common block, then recurses into the unmatched
/// regions to its left and right. No junk heuristic is applied.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given windows.
///
/// Ties resolve to the earliest `i`, then the earliest `j`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // j2len[j] = length of the match ending at a[i-1], b[j]
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }

    (best_i, best_j, best_k)
}
