//! Display formatting and address validation helpers

use alloy_primitives::Address;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use regex::Regex;

use crate::error::{Error, Result};

lazy_static::lazy_static! {
    static ref ETH_ADDRESS_RE: Regex =
        Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("Invalid address regex");
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex");
}

/// Default pattern for [`format_date`]
pub const DEFAULT_DATE_PATTERN: &str = "YYYY-MM-DD HH:mm:ss";

/// Render `date` with the tokens `YYYY MM DD HH mm ss` (first occurrence of each)
pub fn format_date<Tz: TimeZone>(date: &DateTime<Tz>, pattern: &str) -> String {
    pattern
        .replacen("YYYY", &date.year().to_string(), 1)
        .replacen("MM", &format!("{:02}", date.month()), 1)
        .replacen("DD", &format!("{:02}", date.day()), 1)
        .replacen("HH", &format!("{:02}", date.hour()), 1)
        .replacen("mm", &format!("{:02}", date.minute()), 1)
        .replacen("ss", &format!("{:02}", date.second()), 1)
}

/// [`format_date`] for a millisecond Unix timestamp in local time
pub fn format_timestamp_ms(millis: i64, pattern: &str) -> Option<String> {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|date| format_date(&date, pattern))
}

/// Fixed decimals with `,` thousands separators in the integer part
pub fn format_number(num: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, num);
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

/// Human-readable byte count (base 1024, two decimals)
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut exp = 0usize;
    let mut threshold = 1024u64;
    while exp + 1 < UNITS.len() && bytes >= threshold {
        exp += 1;
        threshold = threshold.saturating_mul(1024);
    }

    let value = bytes as f64 / 1024f64.powi(exp as i32);
    format!("{:.2} {}", value, UNITS[exp])
}

/// Keep `start` leading and `end` trailing characters: `0x1234...5678`
pub fn format_address(address: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= start + end {
        return address.to_string();
    }

    let head: String = chars[..start].iter().collect();
    let tail: String = chars[chars.len() - end..].iter().collect();
    format!("{}...{}", head, tail)
}

/// [`format_address`] with 6 leading and 4 trailing characters
pub fn shorten_address(address: &str) -> String {
    format_address(address, 6, 4)
}

/// `0x` followed by 40 hex digits, any case
pub fn is_valid_address(address: &str) -> bool {
    ETH_ADDRESS_RE.is_match(address)
}

/// Valid address whose mixed-case form, if any, carries a correct EIP-55 checksum
pub fn is_valid_checksum_address(address: &str) -> bool {
    if !is_valid_address(address) {
        return false;
    }

    let hex = &address[2..];
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());

    if has_upper && has_lower {
        Address::parse_checksummed(address, None).is_ok()
    } else {
        // Single-case addresses carry no checksum
        true
    }
}

/// EIP-55 checksummed form of `address`
pub fn to_checksum_address(address: &str) -> Result<String> {
    if !is_valid_address(address) {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    let parsed: Address = address
        .parse()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;
    Ok(parsed.to_checksum(None))
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_format_date() {
        let date = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(format_date(&date, DEFAULT_DATE_PATTERN), "2024-03-07 09:05:02");
        assert_eq!(format_date(&date, "DD/MM/YYYY"), "07/03/2024");
        assert_eq!(format_date(&date, "HH:mm"), "09:05");
    }

    #[test]
    fn test_format_timestamp_ms() {
        let formatted = format_timestamp_ms(0, "YYYY").unwrap();
        assert!(formatted == "1970" || formatted == "1969");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.0, 0), "1,234,567");
        assert_eq!(format_number(1234.5678, 2), "1,234.57");
        assert_eq!(format_number(999.0, 0), "999");
        assert_eq!(format_number(-1234.5, 1), "-1,234.5");
        assert_eq!(format_number(0.12345, 4), "0.1235");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_file_size(3 * 1024u64.pow(5)), "3072.00 TB");
    }

    #[test]
    fn test_format_address() {
        let addr = "0x1234567890123456789012345678901234567890";
        assert_eq!(shorten_address(addr), "0x1234...7890");
        assert_eq!(format_address(addr, 4, 2), "0x12...90");
        assert_eq!(format_address("0x1234", 6, 4), "0x1234");
        assert_eq!(format_address("", 6, 4), "");
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("0x1234567890123456789012345678901234567890"));
        assert!(is_valid_address(CHECKSUMMED));
        assert!(!is_valid_address("1234567890123456789012345678901234567890"));
        assert!(!is_valid_address("0x12345"));
        assert!(!is_valid_address("0xZZ34567890123456789012345678901234567890"));
    }

    #[test]
    fn test_checksum_validation() {
        assert!(is_valid_checksum_address(CHECKSUMMED));
        assert!(is_valid_checksum_address(&CHECKSUMMED.to_lowercase()));
        // Flip the case of one letter
        assert!(!is_valid_checksum_address("0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(!is_valid_checksum_address("not an address"));
    }

    #[test]
    fn test_to_checksum_address() {
        assert_eq!(to_checksum_address(&CHECKSUMMED.to_lowercase()).unwrap(), CHECKSUMMED);
        assert!(matches!(to_checksum_address("0x12"), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("yd@example.com"));
        assert!(!is_valid_email("yd@example"));
        assert!(!is_valid_email("not an email"));
    }
}
