use crate::{
    constants::{KAS_DECIMALS, SOMPI_PER_KAS},
    error::ProtocolError,
};

/// Format a sompi amount as a KAS decimal string with trailing zeros removed.
///
/// `123_000_000` → `"1.23"`, `100_000_000` → `"1"`, `1` → `"0.00000001"`.
pub fn sompi_to_kas_string(sompi: u64) -> String {
    let whole = sompi / SOMPI_PER_KAS;
    let fractional = sompi % SOMPI_PER_KAS;
    if fractional == 0 {
        return whole.to_string();
    }
    let padded = format!("{fractional:0width$}", width = KAS_DECIMALS);
    format!("{whole}.{}", padded.trim_end_matches('0'))
}

/// Parse a decimal sompi string as sent by the node.
///
/// Surrounding whitespace is tolerated; signs, fractions and anything that
/// does not fit in a u64 are rejected.
pub fn parse_sompi(raw: &str) -> Result<u64, ProtocolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidAmount(raw.to_owned()));
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidAmount(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_kas_without_trailing_zeros() {
        assert_eq!(sompi_to_kas_string(123_000_000), "1.23");
        assert_eq!(sompi_to_kas_string(100_000_000), "1");
        assert_eq!(sompi_to_kas_string(0), "0");
        assert_eq!(sompi_to_kas_string(1), "0.00000001");
        assert_eq!(sompi_to_kas_string(2_500_000_010), "25.0000001");
    }

    #[test]
    fn parse_sompi_accepts_plain_decimals_only() {
        assert_eq!(parse_sompi("42").unwrap(), 42);
        assert_eq!(parse_sompi(" 7 ").unwrap(), 7);
        assert!(parse_sompi("").is_err());
        assert!(parse_sompi("-1").is_err());
        assert!(parse_sompi("1.5").is_err());
        assert!(parse_sompi("abc").is_err());
        assert!(parse_sompi("99999999999999999999999").is_err());
    }
}
