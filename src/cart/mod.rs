//! Cart specific wire protocols.
//!
//! Capabilities are plain data on [`CartType`]; the protocols themselves sit
//! behind [`CartLink`], one variant per cart family.

mod d64;
mod everdrive;
mod sc64;

use crate::config::{CartType, Config};
use crate::error::{LoaderError, Result};
use crate::protocol::{self, DataFrame, DataHeader, DataType, ProtocolVersion};
use crate::rom::align_up;
use crate::usb::{Transport, UsbDeviceInfo, REPLY_TIMEOUT};

/// Bytes of ROM sent between two cancellation checks.
pub const UPLOAD_CHUNK_SIZE: usize = 128 * 1024;

/// What a cart can hold and how the uploaded image must be shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartCapabilities {
    /// Largest ROM the cart accepts, in bytes.
    pub max_rom_size: u32,
    /// The uploaded size must be a multiple of this.
    pub alignment: u32,
    /// Smaller ROMs are padded up to this size.
    pub min_rom_size: u32,
    /// The cart can be told which CIC to emulate.
    pub explicit_cic: bool,
}
impl CartCapabilities {
    /// Padding bytes needed after a ROM of `size` bytes.
    pub fn rom_padding(&self, size: u32) -> u32 {
        align_up(size.max(self.min_rom_size), self.alignment) - size
    }
}

impl CartType {
    /// Capabilities of the cart, `None` until a cart is selected.
    pub fn capabilities(self) -> Option<CartCapabilities> {
        const MIB: u32 = 1024 * 1024;

        match self {
            CartType::None => None,
            CartType::SixtyFourDriveHw1 => Some(CartCapabilities {
                max_rom_size: 64 * MIB,
                alignment: 4,
                min_rom_size: 0,
                explicit_cic: true,
            }),
            CartType::SixtyFourDriveHw2 => Some(CartCapabilities {
                max_rom_size: 240 * MIB,
                alignment: 4,
                min_rom_size: 0,
                explicit_cic: true,
            }),
            CartType::EverDrive => Some(CartCapabilities {
                max_rom_size: 64 * MIB,
                alignment: 512,
                // covers the area the boot code checksums
                min_rom_size: 0x101000,
                explicit_cic: false,
            }),
            CartType::Sc64 => Some(CartCapabilities {
                max_rom_size: 64 * MIB,
                alignment: 4,
                min_rom_size: 0,
                explicit_cic: true,
            }),
        }
    }

    /// USB product ID and product string the cart enumerates with.
    fn usb_id(self) -> Option<(u16, &'static str)> {
        match self {
            CartType::None => None,
            CartType::SixtyFourDriveHw1 => Some((0x6010, "64drive USB device A")),
            CartType::SixtyFourDriveHw2 => Some((0x6014, "64drive USB device")),
            CartType::EverDrive => Some((0x6001, "FT245R USB FIFO")),
            CartType::Sc64 => Some((0x6014, "SC64")),
        }
    }

    /// Identifies the cart behind an enumerated device.
    pub fn detect(info: &UsbDeviceInfo) -> Option<CartType> {
        if info.vendor_id != crate::FTDI_VID {
            return None;
        }

        [
            CartType::SixtyFourDriveHw1,
            CartType::SixtyFourDriveHw2,
            CartType::EverDrive,
            CartType::Sc64,
        ]
        .into_iter()
        .find(|cart| cart.usb_id() == Some((info.product_id, info.product.as_str())))
    }
}

/// Protocol state of an open cart.
pub(crate) enum CartLink {
    SixtyFourDrive(d64::Link),
    EverDrive(everdrive::Link),
    Sc64(sc64::Link),
}
impl CartLink {
    /// Runs the cart handshake on a freshly claimed transport.
    pub fn open<T: Transport>(cart: CartType, t: &mut T) -> Result<Self> {
        match cart {
            CartType::None => Err(LoaderError::NoCartSelected),
            CartType::SixtyFourDriveHw1 | CartType::SixtyFourDriveHw2 => {
                d64::Link::open(t).map(CartLink::SixtyFourDrive)
            }
            CartType::EverDrive => everdrive::Link::open(t).map(CartLink::EverDrive),
            CartType::Sc64 => sc64::Link::open(t).map(CartLink::Sc64),
        }
    }

    pub fn test_debug(&self, config: &Config) -> Result<bool> {
        match self {
            CartLink::SixtyFourDrive(link) => Ok(link.test_debug(config)),
            CartLink::EverDrive(_) => Ok(true),
            CartLink::Sc64(_) => Ok(true),
        }
    }

    /// Prepares the cart for `size` bytes of ROM (padding included).
    pub fn begin_upload<T: Transport>(
        &mut self,
        t: &mut T,
        config: &Config,
        size: u32,
    ) -> Result<()> {
        match self {
            CartLink::SixtyFourDrive(link) => link.begin_upload(t, config),
            CartLink::EverDrive(link) => link.begin_upload(t, config, size),
            CartLink::Sc64(link) => link.begin_upload(t, config),
        }
    }

    pub fn write_chunk<T: Transport>(&mut self, t: &mut T, offset: u32, data: &[u8]) -> Result<()> {
        match self {
            CartLink::SixtyFourDrive(link) => link.write_chunk(t, offset, data),
            CartLink::EverDrive(link) => link.write_chunk(t, data),
            CartLink::Sc64(link) => link.write_chunk(t, offset, data),
        }
    }

    pub fn end_upload<T: Transport>(&mut self, t: &mut T) -> Result<()> {
        match self {
            CartLink::SixtyFourDrive(_) => Ok(()),
            CartLink::EverDrive(link) => link.end_upload(t),
            CartLink::Sc64(_) => Ok(()),
        }
    }

    pub fn send_frame<T: Transport>(
        &mut self,
        t: &mut T,
        version: ProtocolVersion,
        datatype: DataType,
        payload: &[u8],
    ) -> Result<()> {
        match self {
            CartLink::SixtyFourDrive(link) => link.send_frame(t, version, datatype, payload),
            CartLink::EverDrive(link) => link.send_frame(t, version, datatype, payload),
            CartLink::Sc64(link) => link.send_frame(t, version, datatype, payload),
        }
    }

    pub fn receive_frame<T: Transport>(
        &mut self,
        t: &mut T,
        version: ProtocolVersion,
    ) -> Result<Option<DataFrame>> {
        match self {
            CartLink::SixtyFourDrive(_) | CartLink::EverDrive(_) => receive_dma(t, version),
            CartLink::Sc64(link) => link.receive_frame(t, version),
        }
    }
}

const DMA_SIGNATURE: [u8; 4] = *b"DMA@";
const CMP_SIGNATURE: [u8; 4] = *b"CMPH";

/// Wraps a frame as `DMA@ | frame | CMPH`.
pub(crate) fn dma_envelope(
    version: ProtocolVersion,
    datatype: DataType,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let frame = protocol::encode_frame(version, datatype, payload)?;

    let mut buf = Vec::with_capacity(frame.len() + 8);
    buf.extend_from_slice(&DMA_SIGNATURE);
    buf.extend_from_slice(&frame);
    buf.extend_from_slice(&CMP_SIGNATURE);
    Ok(buf)
}

/// Reads one `DMA@ | frame | CMPH` envelope if one is waiting.
pub(crate) fn receive_dma<T: Transport>(
    t: &mut T,
    version: ProtocolVersion,
) -> Result<Option<DataFrame>> {
    let mut signature = [0u8; 4];
    if !t.poll_exact(&mut signature)? {
        return Ok(None);
    }
    if signature != DMA_SIGNATURE {
        return Err(LoaderError::BadFrameSignature(signature));
    }

    let mut word = [0u8; 4];
    let received = t.read_full(&mut word, REPLY_TIMEOUT)?;
    if received < word.len() {
        return Err(LoaderError::FramingMismatch {
            declared: word.len(),
            received,
        });
    }
    let header = DataHeader::from_word(u32::from_be_bytes(word))?;

    let mut data = vec![0u8; version.aligned_len(header.size())];
    let received = t.read_full(&mut data, REPLY_TIMEOUT)?;
    if received < data.len() {
        return Err(LoaderError::FramingMismatch {
            declared: header.size(),
            received,
        });
    }

    let mut completion = [0u8; 4];
    t.read_full(&mut completion, REPLY_TIMEOUT)?;
    if completion != CMP_SIGNATURE {
        return Err(LoaderError::BadCompletionSignal(completion));
    }

    Ok(Some(protocol::frame_from_parts(header, data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::{device, MockTransport};

    #[test]
    fn test_padding_alignment() {
        for cart in [
            CartType::SixtyFourDriveHw1,
            CartType::SixtyFourDriveHw2,
            CartType::EverDrive,
            CartType::Sc64,
        ] {
            let caps = cart.capabilities().unwrap();
            for size in [1, 3, 100, 511, 512, 0x100000, 0x101001, caps.max_rom_size - 1] {
                let total = size + caps.rom_padding(size);
                assert_eq!(total % caps.alignment, 0, "{:?} {}", cart, size);
                assert!(total >= size);
                assert!(total >= caps.min_rom_size);
                assert_eq!(caps.rom_padding(size), caps.rom_padding(size));
            }
        }
        assert!(CartType::None.capabilities().is_none());
    }

    #[test]
    fn test_sc64_scenario() {
        let caps = CartType::Sc64.capabilities().unwrap();
        assert_eq!(caps.max_rom_size, 64 * 1024 * 1024);
        assert_eq!(caps.alignment, 4);
        assert_eq!(caps.rom_padding(100), 0);
        assert_eq!(caps.rom_padding(101), 3);
    }

    #[test]
    fn test_everdrive_minimum() {
        let caps = CartType::EverDrive.capabilities().unwrap();
        assert_eq!(caps.rom_padding(0x1000), 0x101000 - 0x1000);
        assert_eq!(caps.rom_padding(0x200001), 511);
    }

    #[test]
    fn test_detect() {
        assert_eq!(
            CartType::detect(&device(0x6014, "SC64")),
            Some(CartType::Sc64)
        );
        assert_eq!(
            CartType::detect(&device(0x6014, "64drive USB device")),
            Some(CartType::SixtyFourDriveHw2)
        );
        assert_eq!(
            CartType::detect(&device(0x6010, "64drive USB device A")),
            Some(CartType::SixtyFourDriveHw1)
        );
        assert_eq!(
            CartType::detect(&device(0x6001, "FT245R USB FIFO")),
            Some(CartType::EverDrive)
        );
        assert_eq!(CartType::detect(&device(0x6014, "USB Serial")), None);

        let mut other = device(0x6014, "SC64");
        other.vendor_id = 0x1234;
        assert_eq!(CartType::detect(&other), None);
    }

    #[test]
    fn test_dma_round_trip() {
        let mut t = MockTransport::new();
        let envelope = dma_envelope(ProtocolVersion::V2, DataType::Text, b"hi!").unwrap();
        assert_eq!(&envelope[..4], b"DMA@");
        assert_eq!(&envelope[envelope.len() - 4..], b"CMPH");

        t.push_read(&envelope);
        let frame = receive_dma(&mut t, ProtocolVersion::V2).unwrap().unwrap();
        assert_eq!(frame.datatype(), DataType::Text);
        assert_eq!(frame.data(), b"hi!");
        assert_eq!(t.unread(), 0);

        assert!(receive_dma(&mut t, ProtocolVersion::V2).unwrap().is_none());
    }

    #[test]
    fn test_dma_errors() {
        let mut t = MockTransport::new();
        t.push_read(b"XXXX");
        assert!(matches!(
            receive_dma(&mut t, ProtocolVersion::V2),
            Err(LoaderError::BadFrameSignature(_))
        ));

        // V1 padding read as V2 lands the tail in the wrong place
        let mut t = MockTransport::new();
        t.push_read(&dma_envelope(ProtocolVersion::V1, DataType::RawBinary, b"ab").unwrap());
        let err = receive_dma(&mut t, ProtocolVersion::V2).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Framing);

        let mut t = MockTransport::new();
        t.push_read(b"DMA@");
        t.push_read(&[0x02, 0x00, 0x00, 0x10]);
        t.push_read(&[0xAA; 6]);
        assert!(matches!(
            receive_dma(&mut t, ProtocolVersion::V2),
            Err(LoaderError::FramingMismatch {
                declared: 16,
                received: 6
            })
        ));

        // the error carries the size from the header, not the padded length
        let mut t = MockTransport::new();
        t.push_read(b"DMA@");
        t.push_read(&[0x01, 0x00, 0x00, 0x05]);
        t.push_read(b"abc");
        assert!(matches!(
            receive_dma(&mut t, ProtocolVersion::V2),
            Err(LoaderError::FramingMismatch {
                declared: 5,
                received: 3
            })
        ));
    }
}
