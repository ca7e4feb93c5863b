//! Formatting helpers shared by reports and the CLI.

use crate::types::local_datetime;

/// Truncate to at most `max_chars` characters, appending "..." when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Format a dollar amount with four decimals (e.g., "$0.0123").
pub fn format_cost(cost: f64) -> String {
    format!("${:.4}", cost)
}

/// Format a token count with thousands separators (e.g., "12,345").
pub fn format_tokens(tokens: f64) -> String {
    let whole = tokens.round() as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if whole < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format with thousands separators and a fixed number of decimals
/// (e.g., "1,234.50").
pub fn format_decimal(value: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, value.abs());
    let (whole, frac) = match fixed.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (fixed.as_str(), None),
    };
    let mut out = String::with_capacity(fixed.len() + whole.len() / 3 + 1);
    if value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Format an optional unix timestamp in local time, or "N/A" if missing.
pub fn format_timestamp_opt(ts: Option<f64>) -> String {
    ts.and_then(local_datetime)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("héllo", 2), "hé...");
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(0.0), "0");
        assert_eq!(format_tokens(999.0), "999");
        assert_eq!(format_tokens(1234.4), "1,234");
        assert_eq!(format_tokens(1234567.0), "1,234,567");
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(0.0, 2), "0.00");
        assert_eq!(format_decimal(1234.5, 2), "1,234.50");
        assert_eq!(format_decimal(-1234567.891, 2), "-1,234,567.89");
        assert_eq!(format_decimal(-0.001, 2), "0.00");
        assert_eq!(format_decimal(999.999, 2), "1,000.00");
        assert_eq!(format_decimal(42.0, 0), "42");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.01234), "$0.0123");
    }

    #[test]
    fn test_format_timestamp_missing() {
        assert_eq!(format_timestamp_opt(None), "N/A");
    }
}
