use std::fmt;
use std::str::FromStr;

use gf3_edid::{EdidInfo, PnpId};

use crate::regs::boot0;

pub const MIN_VRAM_SIZE: usize = 64 * 1024 * 1024;
pub const MAX_VRAM_SIZE: usize = 512 * 1024 * 1024;
pub const DEFAULT_VRAM_SIZE: usize = 64 * 1024 * 1024;

/// Largest expansion ROM image accepted (the ROM BAR is sized to the next power of two).
pub const MAX_ROM_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("VRAM size {0:#x} must be a power of two between 64 MiB and 512 MiB")]
    VramSize(usize),
    #[error("unknown adapter model {0:?}")]
    UnknownModel(String),
    #[error("ROM image is {len} bytes (maximum {max})")]
    RomTooLarge { len: usize, max: usize },
    #[error("invalid EDID vendor id: {0}")]
    EdidVendor(#[from] gf3_edid::PnpIdError),
    #[error("EDID mode {width}x{height} cannot be described (1..=65535 per axis)")]
    EdidMode { width: u32, height: u32 },
}

/// Board variants the model can impersonate. All share the NV20 register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Gf3Model {
    #[default]
    GeForce3,
    GeForce3Ti200,
    GeForce3Ti500,
    GeForce256Ddr,
    GeForce2Mx,
    GeForce2Gts,
    GeForce2Ti,
}

impl Gf3Model {
    pub const ALL: [Gf3Model; 7] = [
        Self::GeForce3,
        Self::GeForce3Ti200,
        Self::GeForce3Ti500,
        Self::GeForce256Ddr,
        Self::GeForce2Mx,
        Self::GeForce2Gts,
        Self::GeForce2Ti,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::GeForce3 => "geforce3",
            Self::GeForce3Ti200 => "geforce3-ti200",
            Self::GeForce3Ti500 => "geforce3-ti500",
            Self::GeForce256Ddr => "geforce256-ddr",
            Self::GeForce2Mx => "geforce2-mx",
            Self::GeForce2Gts => "geforce2-gts",
            Self::GeForce2Ti => "geforce2-ti",
        }
    }

    /// Marketing name, also used as the EDID product string.
    pub fn product_name(self) -> &'static str {
        match self {
            Self::GeForce3 => "GeForce3",
            Self::GeForce3Ti200 => "GeForce3 Ti200",
            Self::GeForce3Ti500 => "GeForce3 Ti500",
            Self::GeForce256Ddr => "GeForce256",
            Self::GeForce2Mx => "GeForce2 MX",
            Self::GeForce2Gts => "GeForce2 GTS",
            Self::GeForce2Ti => "GeForce2 Ti",
        }
    }

    pub fn device_id(self) -> u16 {
        match self {
            Self::GeForce3 => 0x0200,
            Self::GeForce3Ti200 => 0x0201,
            Self::GeForce3Ti500 => 0x0202,
            Self::GeForce256Ddr => 0x0101,
            Self::GeForce2Mx => 0x0110,
            Self::GeForce2Gts => 0x0150,
            Self::GeForce2Ti => 0x0151,
        }
    }

    /// `(architecture, implementation)` as reported in `PMC_BOOT_0`.
    pub fn arch_impl(self) -> (u32, u32) {
        match self {
            Self::GeForce3 => (0x20, 0x0),
            Self::GeForce3Ti200 => (0x20, 0x1),
            Self::GeForce3Ti500 => (0x20, 0x2),
            Self::GeForce256Ddr => (0x10, 0x0),
            Self::GeForce2Mx => (0x10, 0x1),
            Self::GeForce2Gts => (0x10, 0x5),
            Self::GeForce2Ti => (0x10, 0x6),
        }
    }

    pub fn boot0(self) -> u32 {
        let (arch, implementation) = self.arch_impl();
        boot0(arch, implementation)
    }

    pub fn revision_id(self) -> u8 {
        match self.arch_impl().0 {
            0x20 => 0xA3,
            _ => 0xA1,
        }
    }
}

impl fmt::Display for Gf3Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gf3Model {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownModel(s.to_string()))
    }
}

/// Device properties supplied by the host at realize time.
#[derive(Debug, Clone)]
pub struct Gf3Config {
    pub model: Gf3Model,
    pub vram_size: usize,
    /// Optional video BIOS image exposed through the expansion ROM BAR.
    pub rom: Option<Vec<u8>>,
    pub edid: EdidInfo,
}

impl Default for Gf3Config {
    fn default() -> Self {
        Self::for_model(Gf3Model::default())
    }
}

impl Gf3Config {
    /// Defaults for `model`: 64 MiB of VRAM and an EDID naming the board.
    pub fn for_model(model: Gf3Model) -> Self {
        Self {
            model,
            vram_size: DEFAULT_VRAM_SIZE,
            rom: None,
            edid: EdidInfo {
                product_code: model.device_id(),
                name: model.product_name().to_string(),
                ..EdidInfo::default()
            },
        }
    }

    /// Parses and applies a three-letter EDID manufacturer id.
    pub fn set_edid_vendor(&mut self, code: &str) -> Result<(), ConfigError> {
        self.edid.vendor = code.parse::<PnpId>()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.vram_size.is_power_of_two()
            || !(MIN_VRAM_SIZE..=MAX_VRAM_SIZE).contains(&self.vram_size)
        {
            return Err(ConfigError::VramSize(self.vram_size));
        }
        if let Some(rom) = &self.rom {
            if rom.len() > MAX_ROM_SIZE {
                return Err(ConfigError::RomTooLarge {
                    len: rom.len(),
                    max: MAX_ROM_SIZE,
                });
            }
        }
        if !self.edid.dimensions_valid() {
            return Err(ConfigError::EdidMode {
                width: self.edid.pref_width,
                height: self.edid.pref_height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_round_trip() {
        for model in Gf3Model::ALL {
            assert_eq!(model.name().parse::<Gf3Model>().unwrap(), model);
        }
        assert!(matches!(
            "riva128".parse::<Gf3Model>(),
            Err(ConfigError::UnknownModel(_))
        ));
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Gf3Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.model.boot0(), 0x0220_0000);
        assert_eq!(cfg.edid.name, "GeForce3");
    }

    #[test]
    fn vram_size_is_validated() {
        for size in [32 << 20, 96 << 20, 1024 << 20] {
            let cfg = Gf3Config {
                vram_size: size,
                ..Gf3Config::default()
            };
            assert!(matches!(cfg.validate(), Err(ConfigError::VramSize(s)) if s == size));
        }
    }

    #[test]
    fn edid_vendor_must_be_uppercase_letters() {
        let mut cfg = Gf3Config::default();
        cfg.set_edid_vendor("QMU").unwrap();
        assert_eq!(cfg.edid.vendor.to_string(), "QMU");
        assert!(matches!(
            cfg.set_edid_vendor("q3"),
            Err(ConfigError::EdidVendor(_))
        ));
    }

    #[test]
    fn oversized_rom_is_rejected() {
        let cfg = Gf3Config {
            rom: Some(vec![0; MAX_ROM_SIZE + 1]),
            ..Gf3Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::RomTooLarge { .. })));
    }

    #[test]
    fn edid_mode_must_fit_an_edid() {
        for (width, height) in [(0, 768), (1024, 300_000_000)] {
            let cfg = Gf3Config {
                edid: EdidInfo::default().with_preferred(width, height),
                ..Gf3Config::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::EdidMode { width: w, height: h }) if (w, h) == (width, height)
            ));
        }
    }
}
