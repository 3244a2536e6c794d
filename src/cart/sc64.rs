//! SummerCart64 protocol.
//!
//! Commands are `['C', 'M', 'D', id]`, two big-endian arguments and data.
//! Everything the cart sends is `token | length | data`, where the token is
//! `CMP`/`ERR` plus the command id for replies and `PKT` plus a packet id for
//! unsolicited packets. Debug frames arrive as `PKT` `U` packets, so they can
//! interleave with command replies and are queued until asked for.

use std::collections::VecDeque;

use crate::cmd::{self, Sc64Cmd, Sc64Version};
use crate::config::{CicType, Config, SaveType};
use crate::error::{LoaderError, Result};
use crate::protocol::{self, DataFrame, DataType, ProtocolVersion, MAX_DATA_SIZE};
use crate::usb::{Control, Transport, REPLY_TIMEOUT};

const CMD_IDENTIFIER: u8 = b'v';
const CMD_VERSION: u8 = b'V';
const CMD_STATE_RESET: u8 = b'R';
const CMD_CONFIG_SET: u8 = b'C';
const CMD_MEMORY_WRITE: u8 = b'M';
const CMD_USB_WRITE: u8 = b'U';

const PACKET_USB: u8 = b'U';

const SDRAM_ADDRESS: u32 = 0x0000_0000;

const CONFIG_SAVE_TYPE: u32 = 6;
const CONFIG_CIC_SEED: u32 = 7;

const IDENTIFIER: &[u8; 4] = b"SCv2";
const MIN_MINOR: u16 = 12;

pub(crate) struct Link {
    /// Bodies of debug packets that arrived while waiting for a reply.
    pending: VecDeque<Vec<u8>>,
}
impl Link {
    pub fn open<T: Transport>(t: &mut T) -> Result<Self> {
        t.control(Control::Reset)?;
        t.control(Control::PurgeRx)?;
        t.control(Control::PurgeTx)?;

        let mut link = Link {
            pending: VecDeque::new(),
        };

        let identifier = link.execute(t, CMD_IDENTIFIER, [0, 0], &[])?;
        if identifier.as_slice() != IDENTIFIER {
            log::debug!("unexpected identifier {:02x?}", identifier);
            return Err(LoaderError::NotCart);
        }

        let version: Sc64Version = cmd::decode(&link.execute(t, CMD_VERSION, [0, 0], &[])?)?;
        log::info!(
            "SC64 firmware {}.{}.{}",
            version.major,
            version.minor,
            version.revision
        );
        if version.major != 2 || version.minor < MIN_MINOR {
            return Err(LoaderError::FirmwareUnsupported {
                major: version.major,
                minor: version.minor,
            });
        }

        link.execute(t, CMD_STATE_RESET, [0, 0], &[])?;
        Ok(link)
    }

    pub fn begin_upload<T: Transport>(&mut self, t: &mut T, config: &Config) -> Result<()> {
        self.execute(
            t,
            CMD_CONFIG_SET,
            [CONFIG_SAVE_TYPE, save_code(config.save())],
            &[],
        )?;
        if let Some(seed) = cic_seed(config.cic()) {
            self.execute(t, CMD_CONFIG_SET, [CONFIG_CIC_SEED, seed], &[])?;
        }
        Ok(())
    }

    pub fn write_chunk<T: Transport>(&mut self, t: &mut T, offset: u32, data: &[u8]) -> Result<()> {
        self.execute(
            t,
            CMD_MEMORY_WRITE,
            [SDRAM_ADDRESS + offset, data.len() as u32],
            data,
        )?;
        Ok(())
    }

    pub fn send_frame<T: Transport>(
        &mut self,
        t: &mut T,
        version: ProtocolVersion,
        datatype: DataType,
        payload: &[u8],
    ) -> Result<()> {
        let frame = protocol::encode_frame(version, datatype, payload)?;
        self.execute(
            t,
            CMD_USB_WRITE,
            [datatype as u32, frame.len() as u32],
            &frame,
        )?;
        Ok(())
    }

    pub fn receive_frame<T: Transport>(
        &mut self,
        t: &mut T,
        version: ProtocolVersion,
    ) -> Result<Option<DataFrame>> {
        if let Some(body) = self.pending.pop_front() {
            return protocol::decode_frame(version, &body).map(Some);
        }

        let mut token = [0u8; 4];
        if !t.poll_exact(&mut token)? {
            return Ok(None);
        }
        if &token[..3] != b"PKT" {
            return Err(LoaderError::BadFrameSignature(token));
        }

        let body = read_body(t)?;
        if token[3] != PACKET_USB {
            log::debug!("ignoring packet {:?}", token[3] as char);
            return Ok(None);
        }
        protocol::decode_frame(version, &body).map(Some)
    }

    /// Sends a command and returns the body of its reply.
    fn execute<T: Transport>(
        &mut self,
        t: &mut T,
        id: u8,
        args: [u32; 2],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        t.write_all(&Sc64Cmd::new(id, args).ser(data)?)?;

        loop {
            let mut token = [0u8; 4];
            t.read_exact(&mut token)?;
            let body = read_body(t)?;

            match (&token[..3], token[3]) {
                (b"CMP", reply) if reply == id => return Ok(body),
                (b"ERR", reply) if reply == id => {
                    return Err(LoaderError::CmdFailed(id));
                }
                (b"PKT", PACKET_USB) => self.pending.push_back(body),
                (b"PKT", packet) => log::debug!("ignoring packet {:?}", packet as char),
                _ => {
                    return Err(LoaderError::CmdReplyMismatch {
                        cmd: id,
                        reply: token,
                    })
                }
            }
        }
    }
}

fn read_body<T: Transport>(t: &mut T) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    t.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    // a frame header plus the largest payload
    if len > MAX_DATA_SIZE + 8 {
        return Err(LoaderError::FramingMismatch {
            declared: len,
            received: 0,
        });
    }

    let mut body = vec![0u8; len];
    let received = t.read_full(&mut body, REPLY_TIMEOUT)?;
    if received < len {
        return Err(LoaderError::FramingMismatch {
            declared: len,
            received,
        });
    }
    Ok(body)
}

fn save_code(save: SaveType) -> u32 {
    match save {
        SaveType::None => 0,
        SaveType::Eeprom4k => 1,
        SaveType::Eeprom16k => 2,
        SaveType::Sram256 => 3,
        SaveType::FlashRam => 4,
        SaveType::Sram768 => 5,
        // the cart has no separate Pokemon Stadium 2 mode, plain FlashRAM works
        SaveType::FlashRamPkmn => 4,
    }
}

/// IPL3 seed the cart hands to the boot code.
fn cic_seed(cic: CicType) -> Option<u32> {
    match cic {
        CicType::None => None,
        CicType::Cic6101 | CicType::Cic7102 => Some(0x13F),
        CicType::Cic6102 | CicType::Cic7101 => Some(0x3F),
        CicType::CicX103 => Some(0x78),
        CicType::CicX105 => Some(0x91),
        CicType::CicX106 => Some(0x85),
        CicType::Cic5101 => Some(0xAC),
        CicType::Cic8303 => Some(0xDD),
    }
}
