//! Client-to-server payload masking (RFC 6455 Section 5.3).

/// XOR `data` in place against the repeating 4-byte `key`.
///
/// Byte `i` is XORed with `key[i % 4]`. Applying the same key twice
/// restores the original bytes.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    let key_word = u32::from_ne_bytes(key);
    let mut chunks = data.chunks_exact_mut(4);

    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(word ^ key_word).to_ne_bytes());
    }

    // Trailing partial group uses the leading key bytes.
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}

/// Return a masked copy of `data`.
///
/// Equivalent to [`apply_mask`] on an owned copy; the input is untouched.
///
/// # Example
///
/// ```
/// use wsdual::protocol::mask::mask;
///
/// let key = [0x37, 0xfa, 0x21, 0x3d];
/// assert_eq!(mask(b"Hello", key), [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
/// ```
#[must_use]
pub fn mask(data: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut out = data.to_vec();
    apply_mask(&mut out, key);
    out
}
