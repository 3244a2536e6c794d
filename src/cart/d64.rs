//! 64drive protocol.
//!
//! Commands are `[id, 'C', 'M', 'D']` followed by up to two big-endian
//! arguments and any data; the cart answers with an optional reply and then
//! `['C', 'M', 'P', id]`.

use crate::cmd::{self, D64Cmd, D64Version};
use crate::config::{CicType, Config, SaveType};
use crate::error::{LoaderError, Result};
use crate::protocol::{self, DataType, ProtocolVersion};
use crate::usb::{BitMode, Control, Transport};

const CMD_LOAD_RAM: u8 = 0x20;
const CMD_USB_WRITE: u8 = 0x31;
const CMD_SET_SAVE: u8 = 0x70;
const CMD_SET_CIC: u8 = 0x72;
const CMD_VERSION: u8 = 0x80;

const BANK_CART_ROM: u32 = 1;
/// Set in the SET_CIC argument to override the cart's own detection.
const CIC_OVERRIDE: u32 = 1 << 31;

/// First firmware (times 100) with the debug channel.
const MIN_DEBUG_FIRMWARE: u32 = 205;

pub(crate) struct Link {
    firmware: u32,
}
impl Link {
    pub fn open<T: Transport>(t: &mut T) -> Result<Self> {
        t.control(Control::Reset)?;
        t.control(Control::SetBitmode {
            mask: 0xFF,
            mode: BitMode::Reset,
        })?;
        t.control(Control::SetBitmode {
            mask: 0xFF,
            mode: BitMode::SyncFifo,
        })?;
        t.control(Control::PurgeRx)?;
        t.control(Control::PurgeTx)?;

        let reply = command(t, &D64Cmd::new(CMD_VERSION, &[]), &[], 8)?;
        let version: D64Version = cmd::decode(&reply)?;
        log::info!(
            "64drive firmware {}.{:02} (variant {:08x})",
            version.version / 100,
            version.version % 100,
            version.variant
        );

        Ok(Link {
            firmware: version.version,
        })
    }

    pub fn test_debug(&self, config: &Config) -> bool {
        if config.cic() == CicType::Cic8303 {
            log::warn!("64drive cannot use usb with the 8303 cic");
            return false;
        }
        if self.firmware < MIN_DEBUG_FIRMWARE {
            log::warn!(
                "64drive firmware {} too old for debug mode, need {}",
                self.firmware,
                MIN_DEBUG_FIRMWARE
            );
            return false;
        }
        true
    }

    pub fn begin_upload<T: Transport>(&mut self, t: &mut T, config: &Config) -> Result<()> {
        if let Some(save) = save_code(config.save()) {
            log::debug!("setting save type {:?}", config.save());
            command(t, &D64Cmd::new(CMD_SET_SAVE, &[save]), &[], 0)?;
        }
        if let Some(cic) = cic_code(config.cic()) {
            log::debug!("setting cic {:?}", config.cic());
            command(t, &D64Cmd::new(CMD_SET_CIC, &[CIC_OVERRIDE | cic]), &[], 0)?;
        }
        Ok(())
    }

    pub fn write_chunk<T: Transport>(&mut self, t: &mut T, offset: u32, data: &[u8]) -> Result<()> {
        let cmd = D64Cmd::new(
            CMD_LOAD_RAM,
            &[offset, (BANK_CART_ROM << 24) | (data.len() as u32 & 0x00FF_FFFF)],
        );
        command(t, &cmd, data, 0)?;
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
        command(
            t,
            &D64Cmd::new(CMD_USB_WRITE, &[frame.len() as u32]),
            &frame,
            0,
        )?;
        Ok(())
    }
}

/// Sends `cmd` and `data` in one write, then reads `reply_len` bytes and the
/// completion token.
fn command<T: Transport>(
    t: &mut T,
    cmd: &D64Cmd,
    data: &[u8],
    reply_len: usize,
) -> Result<Vec<u8>> {
    let mut buf = cmd.ser()?;
    buf.extend_from_slice(data);
    t.write_all(&buf)?;

    let mut reply = vec![0u8; reply_len];
    t.read_exact(&mut reply)?;

    let mut completion = [0u8; 4];
    t.read_exact(&mut completion)?;
    if completion != [b'C', b'M', b'P', cmd.id()] {
        return Err(LoaderError::CmdReplyMismatch {
            cmd: cmd.id(),
            reply: completion,
        });
    }

    Ok(reply)
}

fn save_code(save: SaveType) -> Option<u32> {
    match save {
        SaveType::None => None,
        SaveType::Eeprom4k => Some(1),
        SaveType::Eeprom16k => Some(2),
        SaveType::Sram256 => Some(3),
        SaveType::FlashRam => Some(4),
        SaveType::Sram768 => Some(5),
        SaveType::FlashRamPkmn => Some(6),
    }
}

fn cic_code(cic: CicType) -> Option<u32> {
    match cic {
        CicType::None => None,
        CicType::Cic6101 => Some(0),
        CicType::Cic6102 => Some(1),
        CicType::Cic7101 => Some(2),
        CicType::Cic7102 => Some(3),
        CicType::CicX103 => Some(4),
        CicType::CicX105 => Some(5),
        CicType::CicX106 => Some(6),
        CicType::Cic5101 => Some(7),
        CicType::Cic8303 => Some(8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::MockTransport;

    /// Reply to the VERSION command sent on open.
    fn version_reply(firmware: u32) -> Vec<u8> {
        let mut buf = b"UDEV".to_vec();
        buf.extend_from_slice(&firmware.to_be_bytes());
        buf.extend_from_slice(&[b'C', b'M', b'P', CMD_VERSION]);
        buf
    }

    fn completion(id: u8) -> [u8; 4] {
        [b'C', b'M', b'P', id]
    }

    #[test]
    fn test_open_handshake() {
        let mut t = MockTransport::new();
        t.push_read(&version_reply(205));
        let link = Link::open(&mut t).unwrap();
        assert_eq!(link.firmware, 205);
        assert_eq!(t.written(), [CMD_VERSION, b'C', b'M', b'D']);
        assert!(t.controls().contains(&Control::SetBitmode {
            mask: 0xFF,
            mode: BitMode::SyncFifo
        }));
    }

    #[test]
    fn test_bad_completion() {
        let mut t = MockTransport::new();
        t.push_read(b"UDEV\0\0\0\xCDCMPX");
        assert!(matches!(
            Link::open(&mut t),
            Err(LoaderError::CmdReplyMismatch { cmd: CMD_VERSION, .. })
        ));
    }

    #[test]
    fn test_debug_requirements() {
        let mut config = Config::new();
        assert!(Link { firmware: 205 }.test_debug(&config));
        assert!(!Link { firmware: 204 }.test_debug(&config));
        config.set_cic(CicType::Cic8303);
        assert!(!Link { firmware: 300 }.test_debug(&config));
    }

    #[test]
    fn test_upload_commands() {
        let mut t = MockTransport::new();
        let mut link = Link { firmware: 205 };
        let mut config = Config::new();
        config.set_save(SaveType::Sram256);
        config.set_cic(CicType::Cic6102);

        t.push_read(&completion(CMD_SET_SAVE));
        t.push_read(&completion(CMD_SET_CIC));
        link.begin_upload(&mut t, &config).unwrap();

        t.push_read(&completion(CMD_LOAD_RAM));
        link.write_chunk(&mut t, 0x20000, &[1, 2, 3, 4]).unwrap();

        let writes = t.writes();
        assert_eq!(writes[0], [CMD_SET_SAVE, b'C', b'M', b'D', 0, 0, 0, 3]);
        assert_eq!(writes[1], [CMD_SET_CIC, b'C', b'M', b'D', 0x80, 0, 0, 1]);
        assert_eq!(
            writes[2],
            [CMD_LOAD_RAM, b'C', b'M', b'D', 0, 2, 0, 0, 1, 0, 0, 4, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_no_save_no_cic() {
        let mut t = MockTransport::new();
        Link { firmware: 205 }
            .begin_upload(&mut t, &Config::new())
            .unwrap();
        assert_eq!(t.write_count(), 0);
    }
}
