//! Image size arithmetic

/// Bytes in one GiB
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Size of an image in whole GiB, rounded up.
///
/// The working volume must hold every byte of the image, so partial GiB
/// round up. Empty images still need a 1 GiB volume, the EBS minimum.
pub fn image_size_gib(bytes: u64) -> u64 {
    bytes.div_ceil(GIB).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiples_are_unchanged() {
        assert_eq!(image_size_gib(8 * GIB), 8);
        assert_eq!(image_size_gib(GIB), 1);
    }

    #[test]
    fn test_partial_gib_rounds_up() {
        assert_eq!(image_size_gib(8 * GIB + 1), 9);
        assert_eq!(image_size_gib(GIB - 1), 1);
    }

    #[test]
    fn test_empty_image_needs_minimum_volume() {
        assert_eq!(image_size_gib(0), 1);
    }
}
