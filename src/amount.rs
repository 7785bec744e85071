//! Number rounding and the text formats shared with the description
//! codec. Currency amounts are kept to two decimals, traded quantities
//! to nine.

/// Rounding tolerance: one cent discrepancies are considered equal.
pub const CENT_EPSILON: f64 = 0.005;

const QTY_SCALE: f64 = 1e9;

/// Round a currency amount to whole cents.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round a traded quantity to nine decimals.
pub fn round_qty(value: f64) -> f64 {
    (value * QTY_SCALE).round() / QTY_SCALE
}

/// Convert a currency amount to integer cents for exact comparison.
pub fn cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

/// Format a quantity with an explicit sign and trimmed zero decimals,
/// e.g. `+2`, `-0.5`, `+1.000000221`.
pub fn format_signed_qty(value: f64) -> String {
    let rounded = round_qty(value);
    if rounded == 0.0 {
        return "+0".to_string();
    }
    let mut text = format!("{rounded:.9}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    if text.starts_with('-') {
        text
    } else {
        format!("+{text}")
    }
}

/// Format a quantity without a forced sign, e.g. `80` or `0.5`.
pub fn format_qty(value: f64) -> String {
    let signed = format_signed_qty(value);
    signed.strip_prefix('+').unwrap_or(&signed).to_string()
}

/// Format a quantity with its unit, e.g. `+2 ETH`.
pub fn format_signed_qty_unit(value: f64, unit: &str) -> String {
    format!("{} {unit}", format_signed_qty(value))
}

/// Format a currency amount with a unit and the given number of
/// decimals, e.g. `99.00 €/ETH` or `0.73000 USD`.
pub fn format_currency_digits(value: f64, unit: &str, digits: usize) -> String {
    format!("{value:.digits$} {unit}")
}

/// Format a currency amount with two decimals.
pub fn format_currency(value: f64, unit: &str) -> String {
    format_currency_digits(value, unit, 2)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn cents_rounding() {
        assert_eq!(round_cents(1.005), 1.01);
        assert_eq!(round_cents(-51.004), -51.0);
        assert_eq!(cents(198.0), 19800);
        assert_eq!(cents(-0.004), 0);
    }

    #[test]
    fn signed_quantity_formatting() {
        assert_eq!(format_signed_qty(2.0), "+2");
        assert_eq!(format_signed_qty(-1.0), "-1");
        assert_eq!(format_signed_qty(0.5), "+0.5");
        assert_eq!(format_signed_qty(0.0), "+0");
        assert_eq!(format_signed_qty(20.0), "+20");
        assert_eq!(format_signed_qty(1.000000221), "+1.000000221");
        assert_eq!(format_signed_qty_unit(-0.25, "BTC"), "-0.25 BTC");
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency(99.0, "€/ETH"), "99.00 €/ETH");
        assert_eq!(format_currency_digits(0.73, "USD", 5), "0.73000 USD");
    }
}
