//! EverDrive-64 protocol.
//!
//! Every command is a 16 byte [`EverDriveCmd`]. The cart boots whatever ROM
//! is in SDRAM on `s`, reading the save and CIC types from the ROM header
//! itself.

use crate::cmd::{self, EverDriveCmd};
use crate::config::{CicType, Config, SaveType};
use crate::error::{LoaderError, Result};
use crate::protocol::{DataType, ProtocolVersion};
use crate::usb::{Control, Transport};

use super::dma_envelope;

const CMD_TEST: u8 = b't';
const CMD_TEST_REPLY: u8 = b'r';
const CMD_WRITE_ROM: u8 = b'W';
const CMD_START: u8 = b's';

const ROM_ADDRESS: u32 = 0x1000_0000;
const BLOCK_SIZE: u32 = 512;

pub(crate) struct Link;
impl Link {
    pub fn open<T: Transport>(t: &mut T) -> Result<Self> {
        t.control(Control::Reset)?;
        t.control(Control::PurgeRx)?;
        t.control(Control::PurgeTx)?;

        send(t, &EverDriveCmd::new(CMD_TEST, 0, 0, 0))?;

        let mut buf = [0u8; 16];
        t.read_exact(&mut buf).map_err(|e| match e {
            LoaderError::Timeout => LoaderError::NotCart,
            e => e,
        })?;
        let reply: EverDriveCmd = cmd::decode(&buf)?;
        if reply.magic() != *b"cmd" || reply.id() != CMD_TEST_REPLY {
            log::debug!("unexpected test reply {:02x?}", buf);
            return Err(LoaderError::NotCart);
        }

        Ok(Link)
    }

    /// `size` is the padded ROM size, a multiple of the block size.
    pub fn begin_upload<T: Transport>(
        &mut self,
        t: &mut T,
        config: &Config,
        size: u32,
    ) -> Result<()> {
        if config.save() != SaveType::None || config.cic() != CicType::None {
            log::debug!("everdrive takes save and cic type from the rom header");
        }

        send(
            t,
            &EverDriveCmd::new(CMD_WRITE_ROM, ROM_ADDRESS, size / BLOCK_SIZE, 0),
        )
    }

    pub fn write_chunk<T: Transport>(&mut self, t: &mut T, data: &[u8]) -> Result<()> {
        t.write_all(data)
    }

    pub fn end_upload<T: Transport>(&mut self, t: &mut T) -> Result<()> {
        send(t, &EverDriveCmd::new(CMD_START, 0, 0, 0))
    }

    pub fn send_frame<T: Transport>(
        &mut self,
        t: &mut T,
        version: ProtocolVersion,
        datatype: DataType,
        payload: &[u8],
    ) -> Result<()> {
        t.write_all(&dma_envelope(version, datatype, payload)?)
    }
}

fn send<T: Transport>(t: &mut T, cmd: &EverDriveCmd) -> Result<()> {
    t.write_all(&cmd.ser()?)
}
