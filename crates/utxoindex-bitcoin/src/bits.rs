//! Compact difficulty target (`bits`) parsing.

use utxoindex_core::IngestError;

/// Parse the hex `bits` field of a block header, e.g. `"1d00ffff"`.
pub fn parse_bits(text: &str) -> Result<u32, IngestError> {
    let hex = text.strip_prefix("0x").unwrap_or(text);
    if hex.is_empty() || hex.len() > 8 {
        return Err(IngestError::Other(format!("invalid bits '{text}'")));
    }
    u32::from_str_radix(hex, 16)
        .map_err(|e| IngestError::Other(format!("invalid bits '{text}': {e}")))
}
