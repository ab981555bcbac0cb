use std::cmp::Ordering;

/// Total order over fixed-width index keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders keys as little-endian signed 64-bit integers. Keys shorter than
/// eight bytes fall back to bytewise order.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 8 || b.len() < 8 {
            return a.cmp(b);
        }

        let a_val = i64::from_le_bytes(a[..8].try_into().unwrap());
        let b_val = i64::from_le_bytes(b[..8].try_into().unwrap());

        a_val.cmp(&b_val).then_with(|| a[8..].cmp(&b[8..]))
    }
}

/// Orders keys lexicographically by their raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Encodes an integer as an 8-byte key understood by `IntegerComparator`.
pub fn integer_key(value: i64) -> [u8; 8] {
    value.to_le_bytes()
}
