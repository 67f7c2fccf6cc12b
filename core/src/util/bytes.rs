use primitive_types::U256;
use sha3::{Digest, Keccak256};

/// Number of bytes needed to represent `value`; zero needs zero bytes.
#[inline]
pub fn bytes_required(value: U256) -> usize {
    value.bits().div_ceil(8)
}

#[inline]
pub fn bytes_required_usize(value: usize) -> usize {
    let bits = usize::BITS - value.leading_zeros();
    bits.div_ceil(8) as usize
}

/// Big-endian bytes of `value` without leading zeros, at least `min_len` long.
pub fn to_compact_big_endian(value: U256, min_len: usize) -> Vec<u8> {
    let full = value.to_big_endian();
    let len = bytes_required(value).max(min_len).min(32);
    full[32 - len..].to_vec()
}

/// Writes the low `out.len()` bytes of `value` into `out`, big-endian.
pub fn write_big_endian(value: U256, out: &mut [u8]) {
    let full = value.to_big_endian();
    let width = out.len().min(32);
    let start = out.len() - width;
    out[..start].fill(0);
    out[start..].copy_from_slice(&full[32 - width..]);
}

/// Keccak-256 of `data` as a 256-bit key.
pub fn keccak256(data: &[u8]) -> U256 {
    let digest = Keccak256::digest(data);
    U256::from_big_endian(digest.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_required_counts_significant_bytes() {
        assert_eq!(bytes_required(U256::zero()), 0);
        assert_eq!(bytes_required(U256::from(0xffu64)), 1);
        assert_eq!(bytes_required(U256::from(0x100u64)), 2);
        assert_eq!(bytes_required(U256::MAX), 32);
        assert_eq!(bytes_required_usize(0), 0);
        assert_eq!(bytes_required_usize(255), 1);
        assert_eq!(bytes_required_usize(65536), 3);
    }

    #[test]
    fn compact_encoding_keeps_minimum_width() {
        assert_eq!(to_compact_big_endian(U256::zero(), 1), vec![0]);
        assert_eq!(to_compact_big_endian(U256::from(0x1234u64), 1), vec![0x12, 0x34]);
        assert_eq!(to_compact_big_endian(U256::from(1u64), 3), vec![0, 0, 1]);
    }

    #[test]
    fn write_big_endian_pads_on_the_left() {
        let mut out = [0xaa; 4];
        write_big_endian(U256::from(0x0102u64), &mut out);
        assert_eq!(out, [0, 0, 1, 2]);
    }

    #[test]
    fn keccak_matches_known_vector() {
        let empty = keccak256(b"");
        assert_eq!(
            hex::encode(empty.to_big_endian()),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
