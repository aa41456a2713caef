//! Formats raw keys and values for log and debug output.

use itertools::Itertools as _;

/// Formats encoded keys and values.
pub trait Formatter {
    /// Formats a key.
    fn key(key: &[u8]) -> String;

    /// Formats a value. Also takes the key to determine the kind of value.
    fn value(key: &[u8], value: &[u8]) -> String;

    /// Formats a key/value pair.
    fn key_value(key: &[u8], value: &[u8]) -> String {
        let fmtkey = Self::key(key);
        let fmtvalue = Self::value(key, value);
        format!("{fmtkey} => {fmtvalue}")
    }
}

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }
}

impl Formatter for Raw {
    fn key(key: &[u8]) -> String {
        Self::bytes(key)
    }

    fn value(_key: &[u8], value: &[u8]) -> String {
        Self::bytes(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_escapes_non_printable() {
        assert_eq!(Raw::bytes(b"abc"), "\"abc\"");
        assert_eq!(Raw::bytes(&[0x00, 0xff]), "\"\\x00\\xff\"");
    }

    #[test]
    fn test_key_value() {
        assert_eq!(Raw::key_value(b"k", b"v"), "\"k\" => \"v\"");
    }
}
