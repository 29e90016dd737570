//! Destination address resolution.
//!
//! The engine treats address validation as a pluggable collaborator: the
//! estimator only needs a deterministic, side-effect-free function from a
//! raw string to either a canonical address or a rejection reason. The
//! default [`DigitResolver`] normalizes to an E.164-flavored `+<digits>`
//! form and gates on a single allowed region; deployments needing
//! full-grade number parsing supply their own [`AddressResolver`].

/// Maximum digit count of a canonical address (E.164 ceiling).
const MAX_DIGITS: usize = 15;

/// Minimum digit count accepted for a bare national number.
const MIN_NATIONAL_DIGITS: usize = 8;

/// Resolves raw destination addresses into canonical form.
///
/// Implementations must be deterministic and side-effect-free: the
/// estimator relies on identical inputs producing identical outputs.
pub trait AddressResolver: Send + Sync {
    /// Resolve `raw` into a canonical address, interpreting numbers
    /// without a country code against `default_region`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable rejection reason. The reason is surfaced
    /// verbatim in the batch's rejected-row report.
    fn resolve(&self, raw: &str, default_region: &str) -> Result<String, String>;
}

/// Map an ISO region code to its dialing code.
///
/// Deliberately small: unknown regions reject rather than guess.
fn dialing_code(region: &str) -> Option<&'static str> {
    match region {
        "IN" => Some("91"),
        "US" | "CA" => Some("1"),
        "GB" => Some("44"),
        "AU" => Some("61"),
        "DE" => Some("49"),
        "FR" => Some("33"),
        "BR" => Some("55"),
        "NG" => Some("234"),
        "SG" => Some("65"),
        "AE" => Some("971"),
        _ => None,
    }
}

/// Default resolver: digit normalization plus a region gate.
///
/// A raw value starting with `+` keeps its own country code; bare digit
/// strings are interpreted against the default region. Either way the
/// canonical result must carry the allowed region's dialing code.
#[derive(Debug, Clone)]
pub struct DigitResolver {
    allowed_code: &'static str,
}

impl DigitResolver {
    /// Build a resolver constrained to `allowed_region`.
    ///
    /// # Errors
    ///
    /// Returns an error string if the region has no known dialing code.
    pub fn new(allowed_region: &str) -> Result<Self, String> {
        let allowed_code = dialing_code(allowed_region)
            .ok_or_else(|| format!("unsupported region: {allowed_region}"))?;
        Ok(Self { allowed_code })
    }
}

/// Strip common visual separators, keeping only ASCII digits.
///
/// Returns `None` if any other character is present.
fn digits_of(s: &str) -> Option<String> {
    let mut digits = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }
    Some(digits)
}

impl AddressResolver for DigitResolver {
    fn resolve(&self, raw: &str, default_region: &str) -> Result<String, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("address missing".to_owned());
        }

        let canonical_digits = if let Some(rest) = raw.strip_prefix('+') {
            let digits = digits_of(rest).ok_or_else(|| "invalid address".to_owned())?;
            if digits.len() < MIN_NATIONAL_DIGITS || digits.len() > MAX_DIGITS {
                return Err("invalid address".to_owned());
            }
            digits
        } else {
            let digits = digits_of(raw).ok_or_else(|| "invalid address".to_owned())?;
            if digits.len() < MIN_NATIONAL_DIGITS {
                return Err("invalid address".to_owned());
            }
            let code = dialing_code(default_region)
                .ok_or_else(|| format!("unsupported region: {default_region}"))?;
            if code.len().saturating_add(digits.len()) > MAX_DIGITS {
                return Err("invalid address".to_owned());
            }
            format!("{code}{digits}")
        };

        if !canonical_digits.starts_with(self.allowed_code) {
            return Err("region not allowed".to_owned());
        }
        Ok(format!("+{canonical_digits}"))
    }
}
