use crc::Crc;

use crate::config::CicType;
use crate::rom::RomByteOrder;

/// Offset of the IPL3 bootcode in the ROM.
pub const IPL3_OFFSET: usize = 0x40;
/// End of the IPL3 bootcode in the ROM.
pub const IPL3_END: usize = 0x1000;
/// Offset of the country code in the ROM header.
const COUNTRY_CODE_OFFSET: usize = 0x3E;

const CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// CRC-32 of the IPL3 in `header`, after normalizing its byte order.
///
/// Returns `None` when `header` is shorter than the bootcode.
pub fn ipl3_checksum(header: &[u8]) -> Option<u32> {
    let header = normalized(header)?;
    Some(CRC.checksum(&header[IPL3_OFFSET..IPL3_END]))
}

/// Guesses the CIC a ROM expects from its bootcode.
///
/// `header` holds at least the first 4 KiB of the ROM in any byte order.
pub fn detect_cic(header: &[u8]) -> Option<CicType> {
    let header = normalized(header)?;
    let checksum = CRC.checksum(&header[IPL3_OFFSET..IPL3_END]);
    cic_from_checksum(checksum, is_pal(header[COUNTRY_CODE_OFFSET]))
}

fn normalized(header: &[u8]) -> Option<Vec<u8>> {
    if header.len() < IPL3_END {
        return None;
    }

    let mut header = header[..IPL3_END].to_vec();
    RomByteOrder::detect(&header).to_big_endian(&mut header);
    Some(header)
}

fn cic_from_checksum(checksum: u32, pal: bool) -> Option<CicType> {
    match checksum {
        // Star Fox 64
        0x6170A4A1 => Some(CicType::Cic6101),
        // Lylat Wars
        0x009E9EA3 => Some(CicType::Cic7102),
        0x90BB6CB5 if pal => Some(CicType::Cic7101),
        0x90BB6CB5 => Some(CicType::Cic6102),
        0x0B050EE0 => Some(CicType::CicX103),
        0x98BC2C86 => Some(CicType::CicX105),
        0xACC8580A => Some(CicType::CicX106),
        0x0E018159 => Some(CicType::Cic8303),
        _ => None,
    }
}

fn is_pal(country: u8) -> bool {
    matches!(country, b'D' | b'F' | b'I' | b'P' | b'S' | b'U' | b'X' | b'Y')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_rom() -> Vec<u8> {
        let mut rom: Vec<u8> = (0..IPL3_END).map(|i| (i * 7) as u8).collect();
        rom[0..4].copy_from_slice(&[0x80, 0x37, 0x12, 0x40]);
        rom
    }

    #[test]
    fn test_known_checksums() {
        assert_eq!(cic_from_checksum(0x6170A4A1, false), Some(CicType::Cic6101));
        assert_eq!(cic_from_checksum(0x90BB6CB5, false), Some(CicType::Cic6102));
        assert_eq!(cic_from_checksum(0x90BB6CB5, true), Some(CicType::Cic7101));
        assert_eq!(cic_from_checksum(0x0E018159, true), Some(CicType::Cic8303));
        assert_eq!(cic_from_checksum(0xDEADBEEF, false), None);
    }

    #[test]
    fn test_region() {
        assert!(is_pal(b'P'));
        assert!(is_pal(b'D'));
        assert!(!is_pal(b'E'));
        assert!(!is_pal(b'J'));
    }

    #[test]
    fn test_short_header() {
        assert_eq!(ipl3_checksum(&[0x80, 0x37, 0x12, 0x40]), None);
        assert_eq!(detect_cic(&[0; 0x800]), None);
    }

    #[test]
    fn test_checksum_ignores_byte_order() {
        let z64 = fake_rom();
        let mut v64 = z64.clone();
        v64.chunks_exact_mut(2).for_each(|c| c.swap(0, 1));
        let mut n64 = z64.clone();
        n64.chunks_exact_mut(4).for_each(|c| c.reverse());

        let expected = ipl3_checksum(&z64);
        assert!(expected.is_some());
        assert_eq!(ipl3_checksum(&v64), expected);
        assert_eq!(ipl3_checksum(&n64), expected);
    }
}
