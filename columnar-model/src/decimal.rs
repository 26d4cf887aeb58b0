//! Decimal128 helpers.
//!
//! Values are unscaled `i128` integers; the scale is carried by the type.
//! All arithmetic is checked: `None` means the result does not fit the
//! requested precision and the caller applies its overflow policy.

use crate::error::{EngineError, Result};

/// Maximum precision of a 128-bit decimal.
pub const MAX_PRECISION: u8 = 38;

/// Minimum scale kept by decimal division.
const MIN_DIVISION_SCALE: u8 = 6;

/// `10^exp` for `exp <= 38`.
pub fn pow10(exp: u8) -> i128 {
    debug_assert!(exp <= MAX_PRECISION);
    10i128.pow(exp as u32)
}

/// Number of decimal digits in `value` (0 has one digit).
pub fn digit_count(value: i128) -> u8 {
    let mut v = value.unsigned_abs();
    let mut digits = 1;
    while v >= 10 {
        v /= 10;
        digits += 1;
    }
    digits
}

pub fn fits_precision(value: i128, precision: u8) -> bool {
    precision >= MAX_PRECISION + 1 || value.unsigned_abs() < pow10(precision) as u128
}

/// Largest unscaled value representable with `precision` digits.
pub fn max_for_precision(precision: u8) -> i128 {
    pow10(precision.min(MAX_PRECISION)) - 1
}

/// Change the scale of `value`, rounding half away from zero when digits are
/// dropped. Returns `None` if scaling up overflows `i128`.
pub fn rescale(value: i128, from_scale: u8, to_scale: u8) -> Option<i128> {
    if to_scale >= from_scale {
        let diff = to_scale - from_scale;
        if diff > MAX_PRECISION {
            return if value == 0 { Some(0) } else { None };
        }
        return value.checked_mul(pow10(diff));
    }
    let diff = from_scale - to_scale;
    if diff > MAX_PRECISION {
        return Some(0);
    }
    Some(div_half_up(value, pow10(diff)))
}

/// `numerator / denominator` rounded half away from zero. `denominator != 0`.
fn div_half_up(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.unsigned_abs() * 2 >= denominator.unsigned_abs() {
        if (numerator < 0) != (denominator < 0) {
            quotient - 1
        } else {
            quotient + 1
        }
    } else {
        quotient
    }
}

/// Result type of `a + b` / `a - b`.
pub fn add_result_type(p1: u8, s1: u8, p2: u8, s2: u8) -> (u8, u8) {
    let scale = s1.max(s2);
    let integral = (p1 - s1).max(p2 - s2);
    let precision = (integral + scale + 1).min(MAX_PRECISION);
    (precision, scale)
}

/// Result type of `a * b`: the scale is always `s1 + s2`.
pub fn mul_result_type(p1: u8, s1: u8, p2: u8, s2: u8) -> Result<(u8, u8)> {
    let scale = s1 + s2;
    if scale > MAX_PRECISION {
        return Err(EngineError::DecimalPrecisionOverflow(format!(
            "product scale {} exceeds maximum precision {}",
            scale, MAX_PRECISION
        )));
    }
    let precision = (p1 as u16 + p2 as u16 + 1).min(MAX_PRECISION as u16) as u8;
    Ok((precision.max(scale), scale))
}

/// Result type of `a / b`.
pub fn div_result_type(p1: u8, s1: u8, p2: u8, s2: u8) -> (u8, u8) {
    let scale = (s1 + p2 + 1).max(MIN_DIVISION_SCALE).min(MAX_PRECISION);
    let integral = (p1 - s1 + s2) as u16;
    let precision = (integral + scale as u16).min(MAX_PRECISION as u16) as u8;
    (precision.max(scale), scale)
}

/// Result type of `a % b`.
pub fn rem_result_type(p1: u8, s1: u8, p2: u8, s2: u8) -> (u8, u8) {
    let scale = s1.max(s2);
    let integral = (p1 - s1).min(p2 - s2);
    ((integral + scale).clamp(1, MAX_PRECISION), scale)
}

pub fn checked_add(a: i128, s1: u8, b: i128, s2: u8, precision: u8, scale: u8) -> Option<i128> {
    let a = rescale(a, s1, scale)?;
    let b = rescale(b, s2, scale)?;
    a.checked_add(b).filter(|v| fits_precision(*v, precision))
}

pub fn checked_sub(a: i128, s1: u8, b: i128, s2: u8, precision: u8, scale: u8) -> Option<i128> {
    let a = rescale(a, s1, scale)?;
    let b = rescale(b, s2, scale)?;
    a.checked_sub(b).filter(|v| fits_precision(*v, precision))
}

/// Product of unscaled values; the scale of the result is `s1 + s2`.
pub fn checked_mul(a: i128, b: i128, precision: u8) -> Option<i128> {
    a.checked_mul(b).filter(|v| fits_precision(*v, precision))
}

/// Quotient at `scale`, rounded half-up. `b` must be non-zero.
pub fn checked_div(a: i128, s1: u8, b: i128, s2: u8, precision: u8, scale: u8) -> Option<i128> {
    debug_assert!(b != 0);
    // a / 10^s1 / (b / 10^s2) * 10^scale == a * 10^(scale + s2 - s1) / b
    let shift = scale as i16 + s2 as i16 - s1 as i16;
    if shift.unsigned_abs() > MAX_PRECISION as u16 {
        return None;
    }
    let value = if shift >= 0 {
        let numerator = a.checked_mul(pow10(shift as u8))?;
        div_half_up(numerator, b)
    } else {
        let denominator = b.checked_mul(pow10((-shift) as u8))?;
        div_half_up(a, denominator)
    };
    Some(value).filter(|v| fits_precision(*v, precision))
}

pub fn checked_rem(a: i128, s1: u8, b: i128, s2: u8, precision: u8, scale: u8) -> Option<i128> {
    let a = rescale(a, s1, scale)?;
    let b = rescale(b, s2, scale)?;
    if b == 0 {
        return None;
    }
    a.checked_rem(b).filter(|v| fits_precision(*v, precision))
}

/// Parse `"-12.345"` into `(unscaled, scale)`.
pub fn parse(text: &str) -> Result<(i128, u8)> {
    let invalid = || EngineError::InvalidArgument(format!("invalid decimal literal '{}'", text));
    let s = text.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let scale = u8::try_from(frac_part.len())
        .ok()
        .filter(|s| *s <= MAX_PRECISION)
        .ok_or_else(invalid)?;
    let mut value: i128 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i128))
            .ok_or_else(|| {
                EngineError::DecimalPrecisionOverflow(format!("'{}' exceeds 128 bits", text))
            })?;
    }
    Ok((if negative { -value } else { value }, scale))
}

/// Parse and rescale (half-up) to `scale`, checking `precision`.
pub fn parse_with_scale(text: &str, precision: u8, scale: u8) -> Result<i128> {
    let (value, natural) = parse(text)?;
    rescale(value, natural, scale)
        .filter(|v| fits_precision(*v, precision))
        .ok_or_else(|| {
            EngineError::DecimalPrecisionOverflow(format!(
                "'{}' does not fit decimal({}, {})",
                text, precision, scale
            ))
        })
}

pub fn format(value: i128, scale: u8) -> String {
    let digits = value.unsigned_abs().to_string();
    let sign = if value < 0 { "-" } else { "" };
    if scale == 0 {
        return format!("{}{}", sign, digits);
    }
    let scale = scale as usize;
    if digits.len() <= scale {
        format!("{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
    } else {
        let split = digits.len() - scale;
        format!("{}{}.{}", sign, &digits[..split], &digits[split..])
    }
}

pub fn to_f64(value: i128, scale: u8) -> f64 {
    value as f64 / 10f64.powi(scale as i32)
}

/// Half-up conversion of a float; `None` for non-finite or out-of-range input.
pub fn from_f64(value: f64, precision: u8, scale: u8) -> Option<i128> {
    if !value.is_finite() {
        return None;
    }
    let scaled = (value * 10f64.powi(scale as i32)).round();
    if scaled.abs() >= 1e38 {
        return None;
    }
    Some(scaled as i128).filter(|v| fits_precision(*v, precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_half_up() {
        assert_eq!(rescale(12344, 3, 2), Some(1234));
        assert_eq!(rescale(12345, 3, 2), Some(1235));
        assert_eq!(rescale(-12345, 3, 2), Some(-1235));
        assert_eq!(rescale(-12344, 3, 2), Some(-1234));
        assert_eq!(rescale(1234, 2, 4), Some(123400));
    }

    #[test]
    fn rescale_is_idempotent() {
        for v in [-99999i128, -12345, -5, 0, 5, 12345, 99995] {
            let once = rescale(v, 3, 1).unwrap();
            assert_eq!(rescale(once, 1, 1), Some(once));
        }
    }

    #[test]
    fn result_types() {
        assert_eq!(mul_result_type(10, 2, 5, 3).unwrap(), (16, 5));
        assert_eq!(add_result_type(10, 2, 10, 2), (11, 2));
        assert_eq!(add_result_type(38, 2, 38, 2), (38, 2));
        assert!(mul_result_type(38, 20, 38, 20).is_err());
        let (p, s) = div_result_type(10, 2, 5, 0);
        assert!(s >= 6 && p >= s);
    }

    #[test]
    fn checked_ops() {
        // 1.50 + 2.125 = 3.625
        assert_eq!(checked_add(150, 2, 2125, 3, 10, 3), Some(3625));
        // 9.9 * 9.9 with precision 3 overflows (98.01 needs 4 digits)
        assert_eq!(checked_mul(99, 99, 3), None);
        assert_eq!(checked_mul(99, 99, 4), Some(9801));
        // 1.00 / 3 = 0.333333 at scale 6
        assert_eq!(checked_div(100, 2, 3, 0, 10, 6), Some(333333));
        // 2 / 3 rounds up
        assert_eq!(checked_div(2, 0, 3, 0, 10, 2), Some(67));
        assert_eq!(checked_rem(700, 2, 300, 2, 10, 2), Some(100));
    }

    #[test]
    fn parse_and_format() {
        assert_eq!(parse("12.345").unwrap(), (12345, 3));
        assert_eq!(parse("-0.05").unwrap(), (-5, 2));
        assert_eq!(parse("7").unwrap(), (7, 0));
        assert!(parse("1.2.3").is_err());
        assert!(parse("").is_err());
        assert_eq!(parse_with_scale("12.345", 10, 2).unwrap(), 1235);
        assert!(parse_with_scale("123.4", 3, 1).is_err());
        assert_eq!(format(1235, 2), "12.35");
        assert_eq!(format(-5, 3), "-0.005");
        assert_eq!(format(42, 0), "42");
    }

    #[test]
    fn precision_helpers() {
        assert_eq!(digit_count(0), 1);
        assert_eq!(digit_count(-999), 3);
        assert!(fits_precision(99999, 5));
        assert!(!fits_precision(100000, 5));
        assert_eq!(max_for_precision(3), 999);
        assert_eq!(from_f64(12.5, 10, 0), Some(13));
        assert_eq!(from_f64(-2.5, 10, 0), Some(-3));
        assert_eq!(from_f64(1e6, 3, 0), None);
        assert_eq!(from_f64(f64::NAN, 10, 2), None);
    }
}
