//! Batch cost estimation.
//!
//! Pure and deterministic: recipient rows plus a message template in,
//! per-recipient bodies, segment counts, and a total price out. No side
//! effects — the same inputs always produce the same [`Estimate`], which
//! is what makes acceptance decisions reproducible and property-testable.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::address::AddressResolver;
use crate::config::PricingConfig;

/// Columns probed, in order, for the destination address.
pub const ADDRESS_COLUMNS: [&str; 4] = ["phone", "phone_number", "mobile", "msisdn"];

/// Single-segment character limit for 7-bit-encodable bodies.
const BASIC_SINGLE_LIMIT: usize = 160;
/// Per-segment characters once a 7-bit body spans multiple segments.
const BASIC_MULTI_SIZE: usize = 153;
/// Single-segment character limit for bodies with extended characters.
const EXTENDED_SINGLE_LIMIT: usize = 70;
/// Per-segment characters once an extended body spans multiple segments.
const EXTENDED_MULTI_SIZE: usize = 67;

/// One recipient row as received from the transport layer: column → value.
pub type Row = BTreeMap<String, String>;

/// A row accepted for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRow {
    /// Canonical destination address.
    pub address: String,
    /// Resolved message body.
    pub body: String,
    /// Priced segment count for the body.
    pub segments: i64,
}

/// A row excluded from costing, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    /// The original row, untouched.
    pub row: Row,
    /// Why it was rejected.
    pub reason: String,
}

/// The result of costing one batch.
#[derive(Debug, Clone)]
pub struct Estimate {
    /// Rows accepted for dispatch, deduplicated by canonical address.
    pub accepted: Vec<AcceptedRow>,
    /// Rows excluded from costing. Both lists together report every
    /// non-duplicate input row.
    pub rejected: Vec<RejectedRow>,
    /// Rows silently dropped as later occurrences of an address already
    /// accepted in this batch.
    pub deduped: usize,
    /// Sum of segments across accepted rows.
    pub total_segments: i64,
    /// `total_segments × price_per_segment_mills`.
    pub total_mills: i64,
    /// The per-segment price the totals were computed with.
    pub price_per_segment_mills: i64,
}

fn template_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("literal pattern compiles"))
}

/// Instantiate `template` against one row: every `{{column}}` token is
/// replaced with the row's value, missing columns with the empty string.
pub fn instantiate_template(template: &str, row: &Row) -> String {
    template_token_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let column = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            row.get(column).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Count priced segments for a message body.
///
/// Bodies whose every character fits in 7 bits price at 160 characters for
/// a single segment, 153 per segment beyond that; anything else prices at
/// 70 and 67. Counts characters, not bytes.
pub fn segments_for_body(body: &str) -> i64 {
    let chars = body.chars().count();
    let basic = body.chars().all(|c| u32::from(c) <= 127);
    let per_segment = if basic {
        if chars <= BASIC_SINGLE_LIMIT {
            return 1;
        }
        BASIC_MULTI_SIZE
    } else {
        if chars <= EXTENDED_SINGLE_LIMIT {
            return 1;
        }
        EXTENDED_MULTI_SIZE
    };
    i64::try_from(chars.div_ceil(per_segment)).unwrap_or(i64::MAX)
}

/// First non-blank address value among [`ADDRESS_COLUMNS`].
fn raw_address(row: &Row) -> Option<&str> {
    ADDRESS_COLUMNS
        .iter()
        .filter_map(|col| row.get(*col))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

/// Resolve one row's message body: an explicit non-blank `message` column
/// wins over the template.
fn body_for_row(row: &Row, template: &str) -> String {
    match row.get("message").map(|m| m.trim()) {
        Some(explicit) if !explicit.is_empty() => explicit.to_owned(),
        _ => instantiate_template(template, row),
    }
}

/// Cost a batch of rows against a template.
///
/// Every input row lands in exactly one of three buckets: accepted,
/// rejected (with reason), or deduplicated (a later occurrence of an
/// already-accepted canonical address — dropped silently, only counted).
/// The first occurrence of each address wins.
pub fn estimate_batch(
    rows: &[Row],
    template: &str,
    resolver: &dyn AddressResolver,
    pricing: &PricingConfig,
) -> Estimate {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();
    let mut deduped = 0usize;
    let mut total_segments = 0i64;

    for row in rows {
        let Some(raw) = raw_address(row) else {
            rejected.push(RejectedRow {
                row: row.clone(),
                reason: "address missing".to_owned(),
            });
            continue;
        };

        let address = match resolver.resolve(raw, &pricing.default_region) {
            Ok(canonical) => canonical,
            Err(reason) => {
                rejected.push(RejectedRow {
                    row: row.clone(),
                    reason,
                });
                continue;
            }
        };

        if !seen.insert(address.clone()) {
            deduped = deduped.saturating_add(1);
            continue;
        }

        let body = body_for_row(row, template);
        let segments = segments_for_body(&body);
        total_segments = total_segments.saturating_add(segments);
        accepted.push(AcceptedRow {
            address,
            body,
            segments,
        });
    }

    let total_mills = total_segments.saturating_mul(pricing.price_per_segment_mills);
    Estimate {
        accepted,
        rejected,
        deduped,
        total_segments,
        total_mills,
        price_per_segment_mills: pricing.price_per_segment_mills,
    }
}
