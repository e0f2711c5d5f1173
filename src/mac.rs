//! MAC address canonicalisation and battery-voltage conversion.
//!
//! Canonical form is always colon-separated uppercase hex, e.g. `AA:BB:CC:DD:EE:FF`.

use cached::proc_macro::cached;
use regex::Regex;
use std::sync::OnceLock;

pub type Mac = String;

fn hex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9A-Fa-f:]{12,17}$").expect("valid MAC regex"))
}

/// `true` if `raw` is plausibly a MAC (12 hex digits, optionally
/// colon-separated) before spending a canonicalisation pass on it. Rejects
/// garbage payloads (wrong length, non-hex characters) without silently
/// producing a malformed canonical MAC that would then collide in the
/// sensor/gateway maps.
pub fn looks_like_mac(raw: &str) -> bool {
    hex_pattern().is_match(raw.trim())
}

/// Inserts `:` every two hex chars if absent; leaves already-colonised input intact.
/// Idempotent: `canonicalize_mac(&canonicalize_mac(x)) == canonicalize_mac(x)`.
///
/// The same handful of gateway/sensor MACs repeat on every bus message, so
/// the conversion is memoized rather than re-parsed on every call.
pub fn canonicalize_mac(raw: &str) -> Mac {
    canonicalize_mac_cached(raw.to_owned())
}

#[cached(size = 4096)]
fn canonicalize_mac_cached(raw: String) -> Mac {
    let trimmed = raw.trim();
    if trimmed.contains(':') {
        return trimmed.to_uppercase();
    }
    let hex: String = trimmed.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    hex.as_bytes()
        .chunks(2)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
        .to_uppercase()
}

const BATT_MV_MIN: f64 = 2500.;
const BATT_MV_MAX: f64 = 3600.;

/// `round(clamp((mV - 2500) / (3600 - 2500) * 100, 0, 100))`. Monotone, saturating.
pub fn battery_percent(vbatt_mv: f64) -> u8 {
    let pct = (vbatt_mv - BATT_MV_MIN) / (BATT_MV_MAX - BATT_MV_MIN) * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_inserts_colons() {
        assert_eq!(canonicalize_mac("aabbccddeeff"), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn looks_like_mac_accepts_both_forms() {
        assert!(looks_like_mac("aabbccddeeff"));
        assert!(looks_like_mac("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn looks_like_mac_rejects_garbage() {
        assert!(!looks_like_mac("not-a-mac"));
        assert!(!looks_like_mac("aabb"));
    }

    #[test]
    fn canonicalize_leaves_colonised_input_intact() {
        assert_eq!(canonicalize_mac("aa:bb:cc:dd:ee:ff"), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize_mac("AABBCCDDEEFF");
        let twice = canonicalize_mac(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn battery_percent_saturates_at_endpoints() {
        assert_eq!(battery_percent(1000.0), 0);
        assert_eq!(battery_percent(5000.0), 100);
    }

    #[test]
    fn battery_percent_is_monotone() {
        let low = battery_percent(2600.0);
        let high = battery_percent(3200.0);
        assert!(high > low);
    }

    #[test]
    fn battery_percent_midpoint() {
        assert_eq!(battery_percent((BATT_MV_MIN + BATT_MV_MAX) / 2.0), 50);
    }
}
