//! Reconciliation calculator.
//!
//! All currency math runs on `rust_decimal::Decimal` rounded to two places,
//! so `102.50 - 100.00` is exactly `2.50` and threshold comparisons never
//! suffer from binary float drift.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::str::FromStr;

/// Currency precision (cents).
pub const CURRENCY_DP: u32 = 2;

/// Fallback justification threshold when `umbral_diferencia` is missing.
pub const DEFAULT_THRESHOLD: Decimal = Decimal::from_parts(200, 0, 0, false, 2);

/// Round to currency precision, midpoint away from zero.
pub fn round_currency(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero);
    // Always carry two places so "2.5" renders as "2.50".
    rounded.rescale(CURRENCY_DP);
    rounded
}

/// Parse a user-entered amount.
///
/// Accepts `.` or `,` as decimal separator. Returns `None` for empty,
/// unparsable or negative input.
pub fn parse_amount(input: &str) -> Option<Decimal> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = trimmed.replace(',', ".");
    let value = Decimal::from_str(&normalized).ok()?;
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    Some(round_currency(value))
}

/// Parse a threshold parameter value, falling back to [`DEFAULT_THRESHOLD`].
pub fn parse_threshold(raw: Option<&str>) -> Decimal {
    raw.and_then(parse_amount).unwrap_or(DEFAULT_THRESHOLD)
}

/// Signed difference `counted - expected`.
pub fn compute_difference(counted: Decimal, expected: Decimal) -> Decimal {
    round_currency(counted - expected)
}

/// `true` iff `|difference| > threshold`. Equal to the threshold is accepted.
pub fn requires_justification(difference: Decimal, threshold: Decimal) -> bool {
    difference.abs() > threshold
}

/// Derived values shown while the cash count is being typed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferencePreview {
    pub difference: Option<Decimal>,
    pub requires_justification: bool,
}

/// Compute the preview for a raw counted input.
///
/// When the input is empty or unparsable the difference is undefined and
/// the justification flag stays off so the form does not block entry.
pub fn preview(counted_input: &str, expected: Decimal, threshold: Decimal) -> DifferencePreview {
    match parse_amount(counted_input) {
        Some(counted) => {
            let difference = compute_difference(counted, expected);
            DifferencePreview {
                difference: Some(difference),
                requires_justification: requires_justification(difference, threshold),
            }
        }
        None => DifferencePreview {
            difference: None,
            requires_justification: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_default_threshold_is_two() {
        assert_eq!(DEFAULT_THRESHOLD, d("2.00"));
    }

    #[test]
    fn test_difference_is_exact() {
        assert_eq!(compute_difference(d("102.50"), d("100.00")), d("2.50"));
        assert_eq!(compute_difference(d("99.00"), d("100.00")), d("-1.00"));
        // 0.1 + 0.2 style drift does not happen with decimals
        assert_eq!(compute_difference(d("0.30"), d("0.10")), d("0.20"));
    }

    #[test]
    fn test_threshold_boundary_is_not_exceeded() {
        assert!(!requires_justification(d("2.00"), d("2.00")));
        assert!(!requires_justification(d("-2.00"), d("2.00")));
        assert!(requires_justification(d("2.01"), d("2.00")));
        assert!(requires_justification(d("-2.01"), d("2.00")));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(" 102.5 "), Some(d("102.50")));
        assert_eq!(parse_amount("99,99"), Some(d("99.99")));
        assert_eq!(parse_amount("10.005"), Some(d("10.01")));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("   "), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount("0"), Some(Decimal::ZERO));
    }

    #[test]
    fn test_parse_threshold_falls_back() {
        assert_eq!(parse_threshold(None), DEFAULT_THRESHOLD);
        assert_eq!(parse_threshold(Some("not-a-number")), DEFAULT_THRESHOLD);
        assert_eq!(parse_threshold(Some("5.5")), d("5.50"));
    }

    #[test]
    fn test_preview_empty_input_is_undefined() {
        let p = preview("", d("100.00"), DEFAULT_THRESHOLD);
        assert_eq!(p.difference, None);
        assert!(!p.requires_justification);

        let p = preview("12x", d("100.00"), DEFAULT_THRESHOLD);
        assert_eq!(p.difference, None);
        assert!(!p.requires_justification);
    }

    #[test]
    fn test_preview_flags_large_difference() {
        let p = preview("102.50", d("100.00"), DEFAULT_THRESHOLD);
        assert_eq!(p.difference, Some(d("2.50")));
        assert!(p.requires_justification);

        let p = preview("99", d("100.00"), DEFAULT_THRESHOLD);
        assert_eq!(p.difference, Some(d("-1.00")));
        assert!(!p.requires_justification);
    }

    #[test]
    fn test_preview_serializes_camel_case() {
        let p = preview("102.50", d("100.00"), DEFAULT_THRESHOLD);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["difference"], "2.50");
        assert_eq!(json["requiresJustification"], true);
    }
}
