/// Byte order of an N64 ROM image, detected from its first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomByteOrder {
    /// `.z64`, native order, sent as is.
    BigEndian,
    /// `.v64`, 16-bit words swapped.
    ByteSwapped,
    /// `.n64`, 32-bit words reversed.
    LittleEndian,
    /// No known PI header, sent as is.
    Unknown,
}
impl RomByteOrder {
    pub fn detect(header: &[u8]) -> Self {
        match header.get(0..4) {
            Some([0x80, 0x37, 0x12, 0x40]) => RomByteOrder::BigEndian,
            Some([0x37, 0x80, 0x40, 0x12]) => RomByteOrder::ByteSwapped,
            Some([0x40, 0x12, 0x37, 0x80]) => RomByteOrder::LittleEndian,
            _ => RomByteOrder::Unknown,
        }
    }

    /// Rewrites `buf` in place to big-endian order.
    ///
    /// Trailing bytes that do not fill a whole word are left untouched.
    pub fn to_big_endian(self, buf: &mut [u8]) {
        match self {
            RomByteOrder::ByteSwapped => buf.chunks_exact_mut(2).for_each(|c| c.swap(0, 1)),
            RomByteOrder::LittleEndian => buf.chunks_exact_mut(4).for_each(|c| {
                c.swap(0, 3);
                c.swap(1, 2)
            }),
            RomByteOrder::BigEndian | RomByteOrder::Unknown => {}
        }
    }
}

/// Rounds `size` up to a multiple of `align`.
pub(crate) fn align_up(size: u32, align: u32) -> u32 {
    size.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    const Z64: [u8; 8] = [0x80, 0x37, 0x12, 0x40, 0x00, 0x00, 0x00, 0x0F];

    #[test]
    fn test_detect() {
        assert_eq!(RomByteOrder::detect(&Z64), RomByteOrder::BigEndian);
        assert_eq!(
            RomByteOrder::detect(&[0x37, 0x80, 0x40, 0x12]),
            RomByteOrder::ByteSwapped
        );
        assert_eq!(
            RomByteOrder::detect(&[0x40, 0x12, 0x37, 0x80]),
            RomByteOrder::LittleEndian
        );
        assert_eq!(RomByteOrder::detect(&[0x80, 0x37]), RomByteOrder::Unknown);
        assert_eq!(RomByteOrder::detect(&[0; 4]), RomByteOrder::Unknown);
    }

    #[test]
    fn test_normalize() {
        let mut v64 = [0x37, 0x80, 0x40, 0x12, 0x00, 0x00, 0x0F, 0x00];
        RomByteOrder::ByteSwapped.to_big_endian(&mut v64);
        assert_eq!(v64, Z64);

        let mut n64 = [0x40, 0x12, 0x37, 0x80, 0x0F, 0x00, 0x00, 0x00];
        RomByteOrder::LittleEndian.to_big_endian(&mut n64);
        assert_eq!(n64, Z64);

        let mut z64 = Z64;
        RomByteOrder::BigEndian.to_big_endian(&mut z64);
        assert_eq!(z64, Z64);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(100, 4), 100);
        assert_eq!(align_up(101, 4), 104);
        assert_eq!(align_up(1, 512), 512);
    }
}
