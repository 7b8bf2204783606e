//! Quantity parsing and wei/ETH conversion
//!
//! All arithmetic is done on 256-bit integers, so balances of any size
//! convert without the precision loss of a float division.

use alloy_primitives::U256;

use crate::error::{Error, Result};

/// Decimals of the native currency (1 ETH = 10^18 wei)
pub const ETH_DECIMALS: u8 = 18;

/// Places shown for a formatted balance
pub const DISPLAY_PLACES: u8 = 4;

/// Parse a `0x`-prefixed hex or plain decimal quantity
pub fn parse_quantity(input: &str) -> Result<U256> {
    let trimmed = input.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return Err(Error::InvalidQuantity(input.to_string()));
        }
        U256::from_str_radix(hex, 16)
    } else {
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidQuantity(input.to_string()));
        }
        U256::from_str_radix(trimmed, 10)
    };

    parsed.map_err(|e| Error::InvalidQuantity(format!("{}: {}", input, e)))
}

/// Normalize a provider quantity to a base-10 string
pub fn to_decimal_string(input: &str) -> Result<String> {
    Ok(parse_quantity(input)?.to_string())
}

/// Parse a chain id (`"0x89"` or `"137"`)
pub fn parse_chain_id(input: &str) -> Result<u64> {
    let value = parse_quantity(input)?;
    u64::try_from(value).map_err(|_| Error::InvalidQuantity(format!("chain id {} out of range", input)))
}

/// `0x`-prefixed lowercase hex, as providers expect for chain ids
pub fn to_hex_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Scale `value` down by `decimals` and render `places` fractional digits,
/// rounding half up
pub fn format_units(value: U256, decimals: u8, places: u8) -> String {
    let scale = pow10(decimals);
    let mut integer = value / scale;
    let remainder = value % scale;

    let fraction = if places >= decimals {
        // Exact: pad the remainder out to the requested width
        let digits = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
        format!("{:0<width$}", digits, width = places as usize)
    } else {
        let unit = pow10(decimals - places);
        let mut scaled = remainder / unit;
        if remainder % unit >= unit / U256::from(2u64) {
            scaled += U256::from(1u64);
        }
        if scaled == pow10(places) {
            integer += U256::from(1u64);
            scaled = U256::ZERO;
        }
        format!("{:0>width$}", scaled.to_string(), width = places as usize)
    };

    if places == 0 {
        integer.to_string()
    } else {
        format!("{}.{}", integer, fraction)
    }
}

/// Convert a wei quantity (decimal or hex) to ETH with four decimal places
pub fn wei_to_eth(wei: &str) -> Result<String> {
    Ok(format_units(parse_quantity(wei)?, ETH_DECIMALS, DISPLAY_PLACES))
}
