//! Tests for `src/estimate.rs` — batch costing.

#[path = "support/mod.rs"]
mod support;

use courier::address::DigitResolver;
use courier::config::PricingConfig;
use courier::estimate::{estimate_batch, instantiate_template, segments_for_body};

use support::row;

fn resolver() -> DigitResolver {
    DigitResolver::new("IN").expect("region should resolve")
}

fn pricing() -> PricingConfig {
    PricingConfig::default()
}

// ── Segment counting ────────────────────────────────────────────

#[test]
fn ascii_body_at_160_chars_is_one_segment() {
    assert_eq!(segments_for_body(&"a".repeat(160)), 1);
}

#[test]
fn ascii_body_at_161_chars_is_two_segments() {
    assert_eq!(segments_for_body(&"a".repeat(161)), 2);
}

#[test]
fn extended_body_at_70_chars_is_one_segment() {
    assert_eq!(segments_for_body(&"é".repeat(70)), 1);
}

#[test]
fn extended_body_at_71_chars_is_two_segments() {
    assert_eq!(segments_for_body(&"é".repeat(71)), 2);
}

#[test]
fn one_non_ascii_char_switches_the_encoding_limits() {
    // 71 ASCII chars plus nothing: one segment under the 160 limit.
    assert_eq!(segments_for_body(&"a".repeat(71)), 1);
    // Same length but one extended char: over the 70 limit, two segments.
    let mut body = "a".repeat(70);
    body.push('€');
    assert_eq!(segments_for_body(&body), 2);
}

#[test]
fn empty_body_still_prices_one_segment() {
    assert_eq!(segments_for_body(""), 1);
}

#[test]
fn long_ascii_body_divides_by_153() {
    // 460 chars: ceil(460 / 153) = 4.
    assert_eq!(segments_for_body(&"a".repeat(460)), 4);
}

// ── Template instantiation ──────────────────────────────────────

#[test]
fn template_tokens_fill_from_the_row() {
    let r = row(&[("phone", "+919876500001"), ("name", "Asha")]);
    assert_eq!(instantiate_template("Hi {{name}}!", &r), "Hi Asha!");
}

#[test]
fn missing_columns_substitute_empty_string() {
    let r = row(&[("phone", "+919876500001")]);
    assert_eq!(instantiate_template("Hi {{name}}!", &r), "Hi !");
}

#[test]
fn explicit_message_column_overrides_the_template() {
    let rows = vec![row(&[
        ("phone", "+919876500001"),
        ("name", "Asha"),
        ("message", "custom text"),
    ])];
    let est = estimate_batch(&rows, "Hi {{name}}!", &resolver(), &pricing());
    assert_eq!(est.accepted.len(), 1);
    assert_eq!(est.accepted[0].body, "custom text");
}

// ── Acceptance, rejection, dedup ────────────────────────────────

#[test]
fn rows_without_an_address_are_rejected_with_reason() {
    let rows = vec![row(&[("name", "Asha")])];
    let est = estimate_batch(&rows, "hello", &resolver(), &pricing());
    assert!(est.accepted.is_empty());
    assert_eq!(est.rejected.len(), 1);
    assert_eq!(est.rejected[0].reason, "address missing");
}

#[test]
fn alternate_address_columns_are_probed_in_order() {
    let rows = vec![
        row(&[("mobile", "+919876500001")]),
        row(&[("msisdn", "+919876500002")]),
    ];
    let est = estimate_batch(&rows, "hello", &resolver(), &pricing());
    assert_eq!(est.accepted.len(), 2);
}

#[test]
fn wrong_region_addresses_are_rejected() {
    let rows = vec![row(&[("phone", "+14155550100")])];
    let est = estimate_batch(&rows, "hello", &resolver(), &pricing());
    assert!(est.accepted.is_empty());
    assert_eq!(est.rejected[0].reason, "region not allowed");
}

#[test]
fn garbage_addresses_are_rejected() {
    let rows = vec![row(&[("phone", "not-a-number")])];
    let est = estimate_batch(&rows, "hello", &resolver(), &pricing());
    assert_eq!(est.rejected[0].reason, "invalid address");
}

#[test]
fn bare_national_digits_get_the_default_region_code() {
    let rows = vec![row(&[("phone", "98765 00001")])];
    let est = estimate_batch(&rows, "hello", &resolver(), &pricing());
    assert_eq!(est.accepted.len(), 1);
    assert_eq!(est.accepted[0].address, "+919876500001");
}

#[test]
fn duplicate_addresses_keep_only_the_first_occurrence() {
    let rows = vec![
        row(&[("phone", "+919876500001"), ("name", "first")]),
        row(&[("phone", "+919876500001"), ("name", "second")]),
    ];
    let est = estimate_batch(&rows, "Hi {{name}}", &resolver(), &pricing());
    assert_eq!(est.accepted.len(), 1);
    assert_eq!(est.accepted[0].body, "Hi first");
    assert_eq!(est.deduped, 1);
    // A dedup is not a rejection.
    assert!(est.rejected.is_empty());
}

#[test]
fn duplicates_with_different_formatting_still_collapse() {
    let rows = vec![
        row(&[("phone", "+91 98765-00001")]),
        row(&[("phone", "9876500001")]),
    ];
    let est = estimate_batch(&rows, "hello", &resolver(), &pricing());
    assert_eq!(est.accepted.len(), 1);
    assert_eq!(est.deduped, 1);
}

// ── Totals ──────────────────────────────────────────────────────

#[test]
fn total_cost_is_segments_times_configured_price() {
    let rows = vec![
        row(&[("phone", "+919876500001")]),
        row(&[("phone", "+919876500002")]),
    ];
    let long_template = "x".repeat(200); // two segments each
    let est = estimate_batch(&rows, &long_template, &resolver(), &pricing());
    assert_eq!(est.total_segments, 4);
    // 4 segments at the default 50 mills/segment.
    assert_eq!(est.total_mills, 200);
}

#[test]
fn estimation_is_deterministic() {
    let rows = vec![
        row(&[("phone", "+919876500001"), ("name", "Asha")]),
        row(&[("phone", "bogus")]),
        row(&[("phone", "+919876500001")]),
    ];
    let a = estimate_batch(&rows, "Hi {{name}}", &resolver(), &pricing());
    let b = estimate_batch(&rows, "Hi {{name}}", &resolver(), &pricing());
    assert_eq!(a.accepted, b.accepted);
    assert_eq!(a.rejected, b.rejected);
    assert_eq!(a.total_segments, b.total_segments);
    assert_eq!(a.total_mills, b.total_mills);
}
