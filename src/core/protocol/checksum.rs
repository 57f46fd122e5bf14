//! Checksum calculation
//!
//! The Neobot wire format protects every frame with an 8-bit additive
//! checksum over the bytes that follow the magic header.

/// Simple 8-bit sum
pub fn sum8_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Checksum of a frame body, skipping `header_len` leading magic bytes.
///
/// `frame` must not include the checksum byte itself.
pub fn body_checksum(frame: &[u8], header_len: usize) -> u8 {
    frame.get(header_len..).map_or(0, sum8_checksum)
}

/// Verify a frame whose last byte is the sum8 of everything between the
/// header and that byte.
pub fn verify_trailing_sum8(frame: &[u8], header_len: usize) -> bool {
    match frame.split_last() {
        Some((&checksum, body)) if body.len() >= header_len => {
            body_checksum(body, header_len) == checksum
        }
        _ => false,
    }
}
