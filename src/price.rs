//! Localized price string normalization.
//!
//! Marketplace prices arrive as display strings such as `"1 234,56 ₴"` or
//! `"$0.03 USD"`. Malformed input never fails; it degrades to zero, which
//! record validation rejects.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a localized currency string into an amount.
///
/// Keeps only ASCII digits, `,`, `.` and `-`, treats the first comma as the
/// decimal separator, then reads the longest leading number. Returns zero
/// when no number can be read.
pub fn parse_price(raw: &str) -> Decimal {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    let normalized = kept.replacen(',', ".", 1);

    leading_number(&normalized)
        .and_then(|n| Decimal::from_str(&n).ok())
        .unwrap_or(Decimal::ZERO)
}

/// Extract the leading `[-]digits[.digits]` prefix, the way a lenient
/// float parser would. `None` if the prefix holds no digits.
fn leading_number(s: &str) -> Option<String> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let int_part: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let after_int = &rest[int_part.len()..];
    let frac_part: String = after_int
        .strip_prefix('.')
        .map(|f| f.chars().take_while(char::is_ascii_digit).collect())
        .unwrap_or_default();

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(int_part.len() + frac_part.len() + 3);
    if negative {
        out.push('-');
    }
    if int_part.is_empty() {
        out.push('0');
    } else {
        out.push_str(&int_part);
    }
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    Some(out)
}
