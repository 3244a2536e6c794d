use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};

/// The flashcart model attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum CartType {
    /// Not selected yet, `find` will detect it.
    #[default]
    None = 0,
    /// 64drive hardware revision 1.
    SixtyFourDriveHw1 = 1,
    /// 64drive hardware revision 2.
    SixtyFourDriveHw2 = 2,
    /// EverDrive 3.0 / X7.
    EverDrive = 3,
    /// SummerCart64.
    Sc64 = 4,
}
impl TryFrom<i32> for CartType {
    type Error = LoaderError;

    fn try_from(x: i32) -> Result<Self> {
        match x {
            x if x == Self::None as i32 => Ok(Self::None),
            x if x == Self::SixtyFourDriveHw1 as i32 => Ok(Self::SixtyFourDriveHw1),
            x if x == Self::SixtyFourDriveHw2 as i32 => Ok(Self::SixtyFourDriveHw2),
            x if x == Self::EverDrive as i32 => Ok(Self::EverDrive),
            x if x == Self::Sc64 as i32 => Ok(Self::Sc64),
            _ => Err(LoaderError::InvalidEnumerant {
                what: "cart type",
                value: x.into(),
            }),
        }
    }
}

/// The boot chip (CIC) the ROM's IPL3 expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum CicType {
    /// Let the cart decide.
    #[default]
    None = -1,
    Cic6101 = 0,
    Cic6102 = 1,
    Cic7101 = 2,
    Cic7102 = 3,
    CicX103 = 4,
    CicX105 = 5,
    CicX106 = 6,
    /// Aleck64.
    Cic5101 = 7,
    /// 64DD retail.
    Cic8303 = 8,
}
impl TryFrom<i32> for CicType {
    type Error = LoaderError;

    fn try_from(x: i32) -> Result<Self> {
        match x {
            x if x == Self::None as i32 => Ok(Self::None),
            x if x == Self::Cic6101 as i32 => Ok(Self::Cic6101),
            x if x == Self::Cic6102 as i32 => Ok(Self::Cic6102),
            x if x == Self::Cic7101 as i32 => Ok(Self::Cic7101),
            x if x == Self::Cic7102 as i32 => Ok(Self::Cic7102),
            x if x == Self::CicX103 as i32 => Ok(Self::CicX103),
            x if x == Self::CicX105 as i32 => Ok(Self::CicX105),
            x if x == Self::CicX106 as i32 => Ok(Self::CicX106),
            x if x == Self::Cic5101 as i32 => Ok(Self::Cic5101),
            x if x == Self::Cic8303 as i32 => Ok(Self::Cic8303),
            _ => Err(LoaderError::InvalidEnumerant {
                what: "cic type",
                value: x.into(),
            }),
        }
    }
}

/// Save memory emulated by the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum SaveType {
    #[default]
    None = 0,
    Eeprom4k = 1,
    Eeprom16k = 2,
    Sram256 = 3,
    FlashRam = 4,
    Sram768 = 5,
    /// FlashRAM variant used by Pokemon Stadium 2.
    FlashRamPkmn = 6,
}
impl TryFrom<i32> for SaveType {
    type Error = LoaderError;

    fn try_from(x: i32) -> Result<Self> {
        match x {
            x if x == Self::None as i32 => Ok(Self::None),
            x if x == Self::Eeprom4k as i32 => Ok(Self::Eeprom4k),
            x if x == Self::Eeprom16k as i32 => Ok(Self::Eeprom16k),
            x if x == Self::Sram256 as i32 => Ok(Self::Sram256),
            x if x == Self::FlashRam as i32 => Ok(Self::FlashRam),
            x if x == Self::Sram768 as i32 => Ok(Self::Sram768),
            x if x == Self::FlashRamPkmn as i32 => Ok(Self::FlashRamPkmn),
            _ => Err(LoaderError::InvalidEnumerant {
                what: "save type",
                value: x.into(),
            }),
        }
    }
}

/// The ROM selected for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomInfo {
    pub path: PathBuf,
    pub size: u32,
}

/// Upload configuration.
///
/// Set before a session starts and treated as read-only while a transfer runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    cart: CartType,
    cic: CicType,
    save: SaveType,
    rom: Option<RomInfo>,
}
impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cart(&self) -> CartType {
        self.cart
    }

    pub fn set_cart(&mut self, cart: CartType) {
        self.cart = cart;
    }

    pub fn cic(&self) -> CicType {
        self.cic
    }

    pub fn set_cic(&mut self, cic: CicType) {
        self.cic = cic;
    }

    pub fn save(&self) -> SaveType {
        self.save
    }

    pub fn set_save(&mut self, save: SaveType) {
        self.save = save;
    }

    pub fn rom(&self) -> Option<&RomInfo> {
        self.rom.as_ref()
    }

    /// Records the ROM path and its size in bytes.
    ///
    /// The path is not touched, reading the file is up to the caller.
    pub fn set_rom(&mut self, path: impl AsRef<Path>, size: u32) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(LoaderError::InvalidRomPath);
        }
        if size == 0 {
            return Err(LoaderError::InvalidRomSize);
        }

        self.rom = Some(RomInfo {
            path: path.to_path_buf(),
            size,
        });
        Ok(())
    }

    /// Sets the cart from a raw discriminant.
    pub fn set_cart_raw(&mut self, raw: i32) -> Result<()> {
        self.cart = CartType::try_from(raw)?;
        Ok(())
    }

    /// Sets the CIC from a raw discriminant.
    pub fn set_cic_raw(&mut self, raw: i32) -> Result<()> {
        self.cic = CicType::try_from(raw)?;
        Ok(())
    }

    /// Sets the save type from a raw discriminant.
    pub fn set_save_raw(&mut self, raw: i32) -> Result<()> {
        self.save = SaveType::try_from(raw)?;
        Ok(())
    }
}
