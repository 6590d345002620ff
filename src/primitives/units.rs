// Exact conversion between decimal token amounts and base units
use alloy_primitives::utils::{self, ParseUnits};
use alloy_primitives::U256;

use super::error::{Result, WithdrawError};

/// `"1.5"` with 18 decimals becomes `1_500_000_000_000_000_000`.
/// Signed amounts and more fractional digits than `decimals` are rejected
/// rather than truncated.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Ok(U256::ZERO);
    }
    let invalid = |reason: String| WithdrawError::InvalidInput(format!("invalid amount {}: {}", amount, reason));

    if amount.starts_with('-') || amount.starts_with('+') {
        return Err(invalid("must be unsigned".into()));
    }
    if let Some((_, fraction)) = amount.split_once('.') {
        if fraction.len() > decimals as usize {
            return Err(invalid(format!("more than {} fractional digits", decimals)));
        }
    }

    match utils::parse_units(amount, decimals).map_err(|e| invalid(e.to_string()))? {
        ParseUnits::U256(value) => Ok(value),
        ParseUnits::I256(_) => Err(invalid("must be unsigned".into())),
    }
}

/// Base units back to a decimal string without trailing zeros
pub fn format_units(value: U256, decimals: u8) -> Result<String> {
    let formatted = utils::format_units(value, decimals)
        .map_err(|e| WithdrawError::InvalidInput(format!("cannot format {}: {}", value, e)))?;
    if !formatted.contains('.') {
        return Ok(formatted);
    }
    Ok(formatted.trim_end_matches('0').trim_end_matches('.').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(value: u128) -> U256 {
        U256::from(value)
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.5", 18).unwrap(), units(1_500_000_000_000_000_000));
        assert_eq!(parse_units("100", 6).unwrap(), units(100_000_000));
        assert_eq!(parse_units("0.000001", 6).unwrap(), units(1));
        assert_eq!(parse_units("", 18).unwrap(), U256::ZERO);
        assert!(parse_units("0.0000001", 6).is_err());
        assert!(parse_units("1,5", 18).is_err());
        assert!(parse_units("-1", 18).is_err());
    }

    #[test]
    fn test_parse_units_beyond_u128() {
        let huge = parse_units("1000000000000000000000", 18).unwrap();
        assert_eq!(huge, U256::from(10u64).pow(U256::from(39u64)));
        assert!(huge > U256::from(u128::MAX));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(units(1_500_000_000_000_000_000), 18).unwrap(), "1.5");
        assert_eq!(format_units(units(7), 0).unwrap(), "7");
        assert_eq!(format_units(units(100_000_000), 6).unwrap(), "100");
        assert_eq!(format_units(units(1), 6).unwrap(), "0.000001");
    }

    #[test]
    fn test_format_units_with_wide_decimals() {
        assert_eq!(format_units(units(5), 40).unwrap(), format!("0.{}5", "0".repeat(39)));
        assert!(format_units(units(5), 200).is_err());
    }
}
