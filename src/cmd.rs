use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};

// all cart commands and replies are big-endian with fixed-size integers
fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    wire()
        .serialize(value)
        .map_err(LoaderError::CmdSerializeFailure)
}

pub(crate) fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
    wire()
        .deserialize(buf)
        .map_err(LoaderError::CmdDeserializeFailure)
}

/// Command packet for the 64drive.
///
/// Only the first `4 + 4 * argc` bytes go on the wire.
#[derive(Serialize, Debug, Clone)]
pub(crate) struct D64Cmd {
    /// Command ID.
    id: u8,
    /// Always `b"CMD"`.
    magic: [u8; 3],
    args: [u32; 2],
    #[serde(skip)]
    argc: usize,
}
impl D64Cmd {
    pub fn new(id: u8, args: &[u32]) -> Self {
        let mut packed = [0; 2];
        packed[..args.len()].copy_from_slice(args);
        D64Cmd {
            id,
            magic: *b"CMD",
            args: packed,
            argc: args.len(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn ser(&self) -> Result<Vec<u8>> {
        let mut buf = encode(self)?;
        buf.truncate(4 + 4 * self.argc);
        Ok(buf)
    }
}

/// Reply to the 64drive VERSION command.
#[derive(Deserialize, Debug, Clone, Copy)]
pub(crate) struct D64Version {
    /// Hardware variant tag.
    pub variant: u32,
    /// Firmware version times 100.
    pub version: u32,
}

/// Command packet for the EverDrive, always 16 bytes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct EverDriveCmd {
    /// `b"cmd"` from the host, `b"cmd"` again in replies.
    magic: [u8; 3],
    /// Command ID.
    id: u8,
    addr: u32,
    /// Transfer length in 512-byte blocks.
    len: u32,
    arg: u32,
}
impl EverDriveCmd {
    pub fn new(id: u8, addr: u32, len: u32, arg: u32) -> Self {
        EverDriveCmd {
            magic: *b"cmd",
            id,
            addr,
            len,
            arg,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn magic(&self) -> [u8; 3] {
        self.magic
    }

    pub fn ser(&self) -> Result<Vec<u8>> {
        encode(self)
    }
}

/// Command packet header for the SummerCart64, followed by its data.
#[derive(Serialize, Debug, Clone)]
pub(crate) struct Sc64Cmd {
    /// Always `b"CMD"`.
    magic: [u8; 3],
    /// Command ID.
    id: u8,
    args: [u32; 2],
}
impl Sc64Cmd {
    pub fn new(id: u8, args: [u32; 2]) -> Self {
        Sc64Cmd {
            magic: *b"CMD",
            id,
            args,
        }
    }

    /// Serializes the header with `data` appended.
    pub fn ser(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = encode(self)?;
        buf.extend_from_slice(data);
        Ok(buf)
    }
}

/// Reply to the SummerCart64 VERSION command.
#[derive(Deserialize, Debug, Clone, Copy)]
pub(crate) struct Sc64Version {
    pub major: u16,
    pub minor: u16,
    pub revision: u32,
}
