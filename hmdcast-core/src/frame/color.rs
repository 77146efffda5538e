//! RGB → BGR channel reorder.
//!
//! Within each 3-byte pixel group the byte at relative position 0 (R)
//! moves to +2, position 1 (G) stays, and position 2 (B) moves to −2.
//! Pixel order is unchanged. Applying the reorder twice yields the input.

/// Write the BGR reordering of `rgb` into `bgr` and return the written
/// prefix of `bgr`.
///
/// Both slices are expected to have the same length; only the common
/// prefix is converted. A trailing partial group (length not a multiple
/// of 3) is copied unchanged.
pub fn to_bgr<'a>(rgb: &[u8], bgr: &'a mut [u8]) -> &'a [u8] {
    debug_assert_eq!(rgb.len(), bgr.len());
    let len = rgb.len().min(bgr.len());
    let src = &rgb[..len];
    let dst = &mut bgr[..len];

    for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(3)) {
        d[0] = s[2];
        d[1] = s[1];
        d[2] = s[0];
    }

    let aligned = len - len % 3;
    dst[aligned..].copy_from_slice(&src[aligned..]);

    &bgr[..len]
}
