//! Coin amounts ↔ base units (satoshis, 8 decimals).

use utxoindex_core::IngestError;

/// Base units per coin.
pub const COIN: u64 = 100_000_000;

const DECIMALS: usize = 8;

/// Convert an RPC float amount to base units, rounding to the nearest unit.
pub fn to_base(value: f64) -> Result<u64, IngestError> {
    let scaled = (value * COIN as f64).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled >= u64::MAX as f64 {
        return Err(IngestError::Overflow {
            value: value.to_string(),
            target: "u64",
        });
    }
    Ok(scaled as u64)
}

/// Parse a decimal string such as `"6.25"` exactly.
pub fn parse_amount(text: &str) -> Result<u64, IngestError> {
    let invalid = || IngestError::Other(format!("invalid amount '{text}'"));
    let (whole, fraction) = text.trim().split_once('.').unwrap_or((text.trim(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > DECIMALS
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = DECIMALS).parse().map_err(|_| invalid())?
    };
    whole
        .checked_mul(COIN)
        .and_then(|base| base.checked_add(fraction))
        .ok_or_else(|| IngestError::Overflow {
            value: text.to_string(),
            target: "u64",
        })
}

/// Base units back to a float amount.
pub fn from_base(units: u64) -> f64 {
    units as f64 / COIN as f64
}

/// Base units as an exact 8-decimal string.
pub fn format_amount(units: u64) -> String {
    format!("{}.{:08}", units / COIN, units % COIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_rpc_floats() {
        assert_eq!(to_base(6.25).unwrap(), 625_000_000);
        assert_eq!(to_base(0.00000001).unwrap(), 1);
        assert_eq!(to_base(0.1 + 0.2).unwrap(), 30_000_000);
        assert_eq!(to_base(21_000_000.0).unwrap(), 2_100_000_000_000_000);
        assert!(to_base(-1.0).is_err());
        assert!(to_base(f64::NAN).is_err());
    }

    #[test]
    fn round_trips_through_base_units() {
        for v in [0.0, 0.00000001, 0.12345678, 0.5, 6.25, 50.0, 1234.5678] {
            assert_eq!(from_base(to_base(v).unwrap()), v);
        }
    }

    #[test]
    fn parses_decimal_strings_exactly() {
        assert_eq!(parse_amount("6.25").unwrap(), 625_000_000);
        assert_eq!(parse_amount("0.00000001").unwrap(), 1);
        assert_eq!(parse_amount("50").unwrap(), 5_000_000_000);
        assert_eq!(parse_amount(".5").unwrap(), 50_000_000);
        assert!(parse_amount("1.000000001").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("").is_err());
        assert!(matches!(
            parse_amount("999999999999999"),
            Err(IngestError::Overflow { .. })
        ));
    }

    #[test]
    fn formats_eight_decimals() {
        assert_eq!(format_amount(625_000_000), "6.25000000");
        assert_eq!(format_amount(1), "0.00000001");
        assert_eq!(parse_amount(&format_amount(123_456_789)).unwrap(), 123_456_789);
    }
}
