//! Range-checked integer narrowing.
//!
//! RPC payloads carry signed 64-bit heights and sizes while the store uses
//! unsigned 32/64-bit columns. Every narrowing in the engine goes through here.

use std::fmt::Display;

use crate::error::IngestError;

/// Narrow any integer to `u32`, failing with [`IngestError::Overflow`] when it does not fit.
pub fn to_u32<T>(value: T) -> Result<u32, IngestError>
where
    T: TryInto<u32> + Display + Copy,
{
    value.try_into().map_err(|_| IngestError::Overflow {
        value: value.to_string(),
        target: "u32",
    })
}

/// Narrow any integer to `u64`, failing with [`IngestError::Overflow`] when it does not fit.
pub fn to_u64<T>(value: T) -> Result<u64, IngestError>
where
    T: TryInto<u64> + Display + Copy,
{
    value.try_into().map_err(|_| IngestError::Overflow {
        value: value.to_string(),
        target: "u64",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_values_in_range() {
        assert_eq!(to_u32(0i64).unwrap(), 0);
        assert_eq!(to_u32(u32::MAX as i64).unwrap(), u32::MAX);
        assert_eq!(to_u32(42u8).unwrap(), 42);
        assert_eq!(to_u64(840_000i64).unwrap(), 840_000);
        assert_eq!(to_u64(u64::MAX).unwrap(), u64::MAX);
    }

    #[test]
    fn rejects_negative() {
        let err = to_u64(-1i64).unwrap_err();
        assert!(matches!(err, IngestError::Overflow { target: "u64", .. }));
        assert!(to_u32(-5i32).is_err());
    }

    #[test]
    fn rejects_too_wide() {
        let err = to_u32(u32::MAX as u64 + 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "integer overflow: 4294967296 does not fit in u32"
        );
        assert!(to_u64(i128::MAX).is_err());
    }
}
