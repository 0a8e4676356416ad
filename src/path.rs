//! Nibble paths and the compact (hex-prefix) key encoding used by trie nodes.
//!
//! Paths are kept as one nibble per byte. The hex expansion of a leaf key
//! carries a trailing [`TERMINATOR`] marker nibble; structural node paths never
//! do.

use alloy_primitives::{keccak256, Address, B256};
use alloy_trie::Nibbles;

/// Marker nibble appended to the hex expansion of a key that ends at a leaf.
pub const TERMINATOR: u8 = 16;

/// Returns whether a hex-expanded key ends in the leaf terminator.
pub fn has_terminator(hex: &[u8]) -> bool {
    hex.last() == Some(&TERMINATOR)
}

/// Expands each key byte into two nibbles and appends the leaf terminator.
pub fn key_bytes_to_hex(key: &[u8]) -> Vec<u8> {
    let mut hex = Vec::with_capacity(key.len() * 2 + 1);
    for byte in key {
        hex.push(byte >> 4);
        hex.push(byte & 0x0f);
    }
    hex.push(TERMINATOR);
    hex
}

/// Packs a hex-expanded key into its compact (hex-prefix) form.
///
/// The first nibble of the output records the leaf flag (terminator present)
/// and the parity of the nibble count; an odd count stores its first nibble in
/// the low half of the flag byte.
pub fn hex_to_compact(hex: &[u8]) -> Vec<u8> {
    let (hex, terminator) =
        if has_terminator(hex) { (&hex[..hex.len() - 1], 1u8) } else { (hex, 0u8) };

    let mut buf = vec![0u8; hex.len() / 2 + 1];
    buf[0] = terminator << 5;
    let hex = if hex.len() % 2 == 1 {
        buf[0] |= 0x10 | hex[0];
        &hex[1..]
    } else {
        hex
    };
    for (slot, pair) in buf[1..].iter_mut().zip(hex.chunks_exact(2)) {
        *slot = pair[0] << 4 | pair[1];
    }
    buf
}

/// Unpacks a compact (hex-prefix) encoded key into nibbles, re-appending the
/// terminator when the leaf flag is set.
pub fn compact_to_hex(compact: &[u8]) -> Vec<u8> {
    if compact.is_empty() {
        return Vec::new();
    }
    let mut base = key_bytes_to_hex(compact);
    // a flag high nibble below 2 means extension: drop the terminator added above
    if base[0] < 2 {
        base.truncate(base.len() - 1);
    }
    // even parity drops both flag nibbles, odd keeps the second as the first data nibble
    let chop = 2 - (base[0] & 1) as usize;
    base.drain(..chop);
    base
}

/// Assembles the full 32-byte key a leaf stands for out of the path to the leaf
/// node and the leaf's own hex-expanded key fragment (terminator included).
///
/// Returns `None` when the combined path does not name a full 32-byte key.
pub fn leaf_key(node_path: &[u8], partial_path: &[u8]) -> Option<B256> {
    let mut full = Vec::with_capacity(node_path.len() + partial_path.len());
    full.extend_from_slice(node_path);
    full.extend_from_slice(partial_path);
    let encoded = hex_to_compact(&full);
    (encoded.len() == 33).then(|| B256::from_slice(&encoded[1..]))
}

/// The state-trie leaf key of an address.
pub fn address_leaf_key(address: &Address) -> B256 {
    keccak256(address)
}

/// A structural node path as [`Nibbles`].
///
/// # Panics
///
/// Panics if the path contains the terminator; structural paths never do.
pub(crate) fn to_nibbles(path: &[u8]) -> Nibbles {
    Nibbles::from_nibbles(path)
}

/// Lower-hex rendering of a nibble path for error and log context.
pub(crate) fn hex_path(path: &[u8]) -> String {
    path.iter()
        .map(|nibble| char::from_digit(u32::from(*nibble) & 0x0f, 16).unwrap_or('?'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hex_compact_vectors() {
        let cases: &[(&[u8], &[u8])] = &[
            (&[], &[0x00]),
            (&[16], &[0x20]),
            (&[1, 2, 3, 4, 5], &[0x11, 0x23, 0x45]),
            (&[0, 1, 2, 3, 4, 5], &[0x00, 0x01, 0x23, 0x45]),
            (&[15, 1, 12, 11, 8, 16], &[0x3f, 0x1c, 0xb8]),
            (&[0, 15, 1, 12, 11, 8, 16], &[0x20, 0x0f, 0x1c, 0xb8]),
        ];
        for (hex, compact) in cases {
            assert_eq!(hex_to_compact(hex), *compact, "hex_to_compact({hex:?})");
            assert_eq!(compact_to_hex(compact), *hex, "compact_to_hex({compact:?})");
        }
    }

    #[test]
    fn key_bytes_expansion() {
        assert_eq!(key_bytes_to_hex(&[]), vec![16]);
        assert_eq!(key_bytes_to_hex(&[0xab, 0x05]), vec![0xa, 0xb, 0x0, 0x5, 16]);
    }

    #[test]
    fn leaf_key_reassembles_full_key() {
        let key = B256::repeat_byte(0x7e);
        let hex = key_bytes_to_hex(key.as_slice());
        for split in [0, 1, 31, 64] {
            let reassembled =
                leaf_key(&hex[..split], &hex[split..]).expect("full key should reassemble");
            assert_eq!(reassembled, key, "split at {split}");
        }
    }

    #[test]
    fn leaf_key_rejects_short_paths() {
        assert_eq!(leaf_key(&[1, 2, 3], &[16]), None);
    }

    #[test]
    fn hex_path_rendering() {
        assert_eq!(hex_path(&[0xc, 0x5, 0x0]), "c50");
        assert_eq!(hex_path(&[]), "");
    }

    proptest! {
        #[test]
        fn compact_roundtrip(
            nibbles in proptest::collection::vec(0u8..16, 0..65),
            leaf in any::<bool>(),
        ) {
            let mut hex = nibbles;
            if leaf {
                hex.push(TERMINATOR);
            }
            prop_assert_eq!(compact_to_hex(&hex_to_compact(&hex)), hex);
        }
    }
}
