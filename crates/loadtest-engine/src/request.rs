//! Requests and key/value construction helpers.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// One generated request: a key relative to the client namespace and a
/// value, empty for reads and deletes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub key: String,
    pub value: Vec<u8>,
}

impl Request {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Request with an empty value.
    pub fn key_only(key: impl Into<String>) -> Self {
        Self::new(key, Vec::new())
    }
}

/// Decimal `num` left-padded with zeros to `size` bytes. Numbers wider than
/// `size` are returned unpadded.
pub fn sequential_key(size: usize, num: u64) -> String {
    format!("{num:0>size$}")
}

/// Constant key of `size` bytes, used when every request targets one node.
pub fn same_key(size: usize) -> String {
    "x".repeat(size)
}

/// Random alphanumeric payload of `len` bytes.
pub fn random_value(len: usize) -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_key_padding() {
        assert_eq!(sequential_key(6, 42), "000042");
        assert_eq!(sequential_key(3, 12345), "12345");
        assert_eq!(sequential_key(1, 0), "0");
    }

    #[test]
    fn test_same_key() {
        assert_eq!(same_key(4), "xxxx");
    }

    #[test]
    fn test_random_value_is_alphanumeric() {
        let value = random_value(64);
        assert_eq!(value.len(), 64);
        assert!(value.iter().all(|b| b.is_ascii_alphanumeric()));
    }
}
