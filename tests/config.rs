//! Tests for `src/config.rs` — defaults, overrides, validation.

use courier::config::CourierConfig;

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn defaults_are_valid() {
    let config = CourierConfig::default();
    config.validate().expect("defaults should validate");
    assert_eq!(config.pricing.price_per_segment_mills, 50);
    assert_eq!(config.pricing.opening_balance_mills, 100_000);
    assert_eq!(config.dispatch.max_attempts, 4);
    assert_eq!(config.dispatch.throttle_ms, 250);
}

#[test]
fn env_overrides_take_precedence() {
    let mut config = CourierConfig::default();
    config.apply_overrides(|key| match key {
        "COURIER_PRICE_PER_SEGMENT" => Some("75".to_owned()),
        "SEND_DELAY_MS" => Some("100".to_owned()),
        "TWILIO_ACCOUNT_SID" => Some("AC123".to_owned()),
        "TWILIO_AUTH_TOKEN" => Some("tok".to_owned()),
        "PUBLIC_WEBHOOK_URL" => Some("https://example.com/hooks".to_owned()),
        _ => None,
    });
    assert_eq!(config.pricing.price_per_segment_mills, 75);
    assert_eq!(config.dispatch.throttle_ms, 100);
    assert_eq!(config.provider.account_sid, "AC123");
    assert_eq!(config.provider.auth_token, "tok");
    assert_eq!(
        config.provider.public_webhook_url,
        "https://example.com/hooks"
    );
}

#[test]
fn invalid_env_overrides_are_ignored() {
    let mut config = CourierConfig::default();
    config.apply_overrides(|key| match key {
        "COURIER_PRICE_PER_SEGMENT" => Some("not-a-number".to_owned()),
        _ => None,
    });
    assert_eq!(config.pricing.price_per_segment_mills, 50);
}

#[test]
fn unset_env_changes_nothing() {
    let mut config = CourierConfig::default();
    config.apply_overrides(no_env);
    assert_eq!(config.pricing.price_per_segment_mills, 50);
    assert!(config.provider.account_sid.is_empty());
}

#[test]
fn zero_price_fails_validation() {
    let mut config = CourierConfig::default();
    config.pricing.price_per_segment_mills = 0;
    assert!(config.validate().is_err());
}

#[test]
fn zero_attempts_fail_validation() {
    let mut config = CourierConfig::default();
    config.dispatch.max_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn malformed_webhook_url_fails_validation() {
    let mut config = CourierConfig::default();
    config.provider.public_webhook_url = "not a url".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn status_callback_url_appends_the_ingress_path() {
    let mut config = CourierConfig::default();
    assert!(config.provider.status_callback_url().is_none());

    config.provider.public_webhook_url = "https://example.com/".to_owned();
    assert_eq!(
        config.provider.status_callback_url().as_deref(),
        Some("https://example.com/api/carrier/status")
    );
}
