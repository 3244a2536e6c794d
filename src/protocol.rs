use crate::error::{LoaderError, Result};

/// Largest payload a single data frame can carry.
pub const MAX_DATA_SIZE: usize = 8 * 1024 * 1024;

/// Version of the USB debug protocol spoken with the ROM running on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    V1 = 0x00,
    V2 = 0x02,
}
impl ProtocolVersion {
    /// Wire alignment of frame payloads.
    pub fn payload_alignment(self) -> usize {
        match self {
            ProtocolVersion::V1 => 2,
            ProtocolVersion::V2 => 4,
        }
    }

    /// Size of a payload of `size` bytes once padded for the wire.
    pub fn aligned_len(self, size: usize) -> usize {
        let align = self.payload_alignment();
        (size + align - 1) / align * align
    }
}
impl TryFrom<u16> for ProtocolVersion {
    type Error = LoaderError;

    fn try_from(x: u16) -> Result<Self> {
        match x {
            x if x == Self::V1 as u16 => Ok(Self::V1),
            x if x == Self::V2 as u16 => Ok(Self::V2),
            _ => Err(LoaderError::UnsupportedProtocol(x)),
        }
    }
}

/// The newest protocol this crate speaks.
pub const USBPROTOCOL_LATEST: ProtocolVersion = ProtocolVersion::V2;

/// Semantic category of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Text = 0x01,
    RawBinary = 0x02,
    Header = 0x03,
    Screenshot = 0x04,
    Heartbeat = 0x05,
}
impl TryFrom<u8> for DataType {
    type Error = LoaderError;

    fn try_from(x: u8) -> Result<Self> {
        match x {
            x if x == Self::Text as u8 => Ok(Self::Text),
            x if x == Self::RawBinary as u8 => Ok(Self::RawBinary),
            x if x == Self::Header as u8 => Ok(Self::Header),
            x if x == Self::Screenshot as u8 => Ok(Self::Screenshot),
            x if x == Self::Heartbeat as u8 => Ok(Self::Heartbeat),
            _ => Err(LoaderError::UnknownDataType(x)),
        }
    }
}

/// Header of a data frame: the data type in the top byte, the payload size in
/// the low 24 bits, sent big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    datatype: DataType,
    size: u32,
}
impl DataHeader {
    pub fn new(datatype: DataType, size: usize) -> Result<Self> {
        if size > MAX_DATA_SIZE {
            return Err(LoaderError::DataTooLarge {
                size,
                max: MAX_DATA_SIZE,
            });
        }

        Ok(DataHeader {
            datatype,
            size: size as u32,
        })
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn to_word(&self) -> u32 {
        ((self.datatype as u32) << 24) | (self.size & 0x00FF_FFFF)
    }

    pub fn from_word(word: u32) -> Result<Self> {
        let datatype = DataType::try_from((word >> 24) as u8)?;
        let size = word & 0x00FF_FFFF;
        if size as usize > MAX_DATA_SIZE {
            return Err(LoaderError::FramingMismatch {
                declared: size as usize,
                received: 0,
            });
        }
        Ok(DataHeader { datatype, size })
    }
}

/// One frame received from the console. The payload belongs to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    header: DataHeader,
    data: Vec<u8>,
}
impl DataFrame {
    pub fn header(&self) -> DataHeader {
        self.header
    }

    pub fn datatype(&self) -> DataType {
        self.header.datatype
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Encodes a frame: header word followed by the payload zero-padded to the
/// protocol alignment.
pub fn encode_frame(
    version: ProtocolVersion,
    datatype: DataType,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let header = DataHeader::new(datatype, payload.len())?;

    let mut buf = Vec::with_capacity(4 + version.aligned_len(payload.len()));
    buf.extend_from_slice(&header.to_word().to_be_bytes());
    buf.extend_from_slice(payload);
    buf.resize(4 + version.aligned_len(payload.len()), 0);
    Ok(buf)
}

/// Decodes a complete frame as produced by [`encode_frame`].
///
/// The buffer must hold exactly the header and the padded payload.
pub fn decode_frame(version: ProtocolVersion, buf: &[u8]) -> Result<DataFrame> {
    if buf.len() < 4 {
        return Err(LoaderError::FramingMismatch {
            declared: 4,
            received: buf.len(),
        });
    }

    let word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let header = DataHeader::from_word(word)?;
    let body = &buf[4..];
    if body.len() != version.aligned_len(header.size()) {
        return Err(LoaderError::FramingMismatch {
            declared: header.size(),
            received: body.len(),
        });
    }

    Ok(DataFrame {
        header,
        data: body[..header.size()].to_vec(),
    })
}

/// Builds a frame from an already validated header and an unpadded payload.
pub(crate) fn frame_from_parts(header: DataHeader, mut data: Vec<u8>) -> DataFrame {
    data.truncate(header.size());
    DataFrame { header, data }
}

/// Contents of a heartbeat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub protocol: ProtocolVersion,
    pub version: u16,
}

/// Only heartbeat layout known so far.
pub const HEARTBEAT_VERSION: u16 = 0x01;

/// Parses a heartbeat payload: protocol version and heartbeat version, both
/// big-endian `u16`.
pub fn parse_heartbeat(buf: &[u8]) -> Result<Heartbeat> {
    if buf.len() < 4 {
        return Err(LoaderError::MalformedHeartbeat);
    }

    let protocol = u16::from_be_bytes([buf[0], buf[1]]);
    let version = u16::from_be_bytes([buf[2], buf[3]]);

    if protocol > USBPROTOCOL_LATEST as u16 {
        return Err(LoaderError::UnsupportedProtocol(protocol));
    }
    let protocol = ProtocolVersion::try_from(protocol)?;

    if version != HEARTBEAT_VERSION {
        return Err(LoaderError::UnsupportedHeartbeat(version));
    }

    Ok(Heartbeat { protocol, version })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_order() {
        assert!(ProtocolVersion::V1 < ProtocolVersion::V2);
        assert_eq!(USBPROTOCOL_LATEST, ProtocolVersion::V2);
        assert_eq!(ProtocolVersion::try_from(2).unwrap(), ProtocolVersion::V2);
        assert!(matches!(
            ProtocolVersion::try_from(1),
            Err(LoaderError::UnsupportedProtocol(1))
        ));
    }

    #[test]
    fn test_aligned_len() {
        assert_eq!(ProtocolVersion::V1.aligned_len(0), 0);
        assert_eq!(ProtocolVersion::V1.aligned_len(3), 4);
        assert_eq!(ProtocolVersion::V1.aligned_len(4), 4);
        assert_eq!(ProtocolVersion::V2.aligned_len(5), 8);
        assert_eq!(ProtocolVersion::V2.aligned_len(8), 8);
    }

    #[test]
    fn test_header_word() {
        let header = DataHeader::new(DataType::Text, 0x1234).unwrap();
        assert_eq!(header.to_word(), 0x0100_1234);

        let parsed = DataHeader::from_word(0x0500_0004).unwrap();
        assert_eq!(parsed.datatype(), DataType::Heartbeat);
        assert_eq!(parsed.size(), 4);

        assert!(matches!(
            DataHeader::from_word(0x0900_0004),
            Err(LoaderError::UnknownDataType(9))
        ));
        assert!(matches!(
            DataHeader::new(DataType::RawBinary, MAX_DATA_SIZE + 1),
            Err(LoaderError::DataTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(ProtocolVersion::V2, DataType::Text, b"hello").unwrap();
        assert_eq!(&frame[0..4], &[0x01, 0x00, 0x00, 0x05]);
        assert_eq!(&frame[4..9], b"hello");
        assert_eq!(&frame[9..], &[0, 0, 0]);

        let frame = encode_frame(ProtocolVersion::V1, DataType::Text, b"hello").unwrap();
        assert_eq!(frame.len(), 4 + 6);
    }

    #[test]
    fn test_frame_sequence() {
        let sent: Vec<(DataType, Vec<u8>)> = vec![
            (DataType::Text, b"abc".to_vec()),
            (DataType::RawBinary, vec![]),
            (DataType::Screenshot, (0..=255).collect()),
            (DataType::Header, vec![0xFF; 7]),
        ];

        for version in [ProtocolVersion::V1, ProtocolVersion::V2] {
            let mut stream = vec![];
            let mut bounds = vec![];
            for (datatype, payload) in &sent {
                let frame = encode_frame(version, *datatype, payload).unwrap();
                bounds.push((stream.len(), stream.len() + frame.len()));
                stream.extend_from_slice(&frame);
            }

            let received: Vec<_> = bounds
                .iter()
                .map(|&(start, end)| decode_frame(version, &stream[start..end]).unwrap())
                .collect();

            for ((datatype, payload), frame) in sent.iter().zip(&received) {
                assert_eq!(frame.datatype(), *datatype);
                assert_eq!(frame.data(), payload.as_slice());
                assert_eq!(frame.header().size(), payload.len());
            }
        }
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut frame = encode_frame(ProtocolVersion::V2, DataType::Text, b"12345678").unwrap();
        frame.truncate(frame.len() - 4);
        assert!(matches!(
            decode_frame(ProtocolVersion::V2, &frame),
            Err(LoaderError::FramingMismatch {
                declared: 8,
                received: 4
            })
        ));

        // a V1 frame read as V2 is a framing error, not a transport error
        let frame = encode_frame(ProtocolVersion::V1, DataType::Text, b"ab").unwrap();
        let err = decode_frame(ProtocolVersion::V2, &frame).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Framing);
    }

    #[test]
    fn test_heartbeat() {
        let hb = parse_heartbeat(&[0x00, 0x02, 0x00, 0x01]).unwrap();
        assert_eq!(hb.protocol, ProtocolVersion::V2);
        assert_eq!(hb.version, 1);

        assert!(matches!(
            parse_heartbeat(&[0x00, 0x02, 0x00]),
            Err(LoaderError::MalformedHeartbeat)
        ));
        assert!(matches!(
            parse_heartbeat(&[0x00, 0x03, 0x00, 0x01]),
            Err(LoaderError::UnsupportedProtocol(3))
        ));
        assert!(matches!(
            parse_heartbeat(&[0x00, 0x00, 0x00, 0x02]),
            Err(LoaderError::UnsupportedHeartbeat(2))
        ));
    }
}
