use std::io::{Cursor, Read};

use gf3_edid::{EdidImage, EdidInfo, PnpId};
use thiserror::Error;

use crate::config::MAX_VRAM_SIZE;
use crate::ddc::{DdcEngineState, DdcState};
use crate::mmio::CRTC_STORE_END;
use crate::pci::PCI_CONFIG_SPACE_SIZE;
use crate::regs::NV_PRMVIO_SIZE;
use crate::vbe::VbeRegs;
use crate::GeForce3;

const PRMVIO_WORDS: usize = NV_PRMVIO_SIZE / 4;
const CRTC_LEN: usize = CRTC_STORE_END as usize;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot magic")]
    InvalidMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),

    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),

    #[error("VRAM size mismatch (expected {expected} bytes, found {found} bytes)")]
    VramLenMismatch { expected: usize, found: usize },

    #[error("snapshot is for device {found:#06x}, this adapter is {expected:#06x}")]
    ModelMismatch { expected: u16, found: u16 },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_bool<R: Read>(r: &mut R) -> Result<bool> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(SnapshotError::Corrupt("invalid bool")),
    }
}

fn read_u16_le<R: Read>(r: &mut R) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(r)?))
}

fn read_u32_le<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

fn read_u64_le<R: Read>(r: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = usize::from(read_u8(r)?);
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| SnapshotError::Corrupt("invalid utf-8 string"))
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    // Length prefix is one byte; the EDID only keeps 13 characters anyway.
    let mut end = s.len().min(usize::from(u8::MAX));
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    out.push(end as u8);
    out.extend_from_slice(&s.as_bytes()[..end]);
}

/// Device state (version 1). The EDID blob itself is not stored; it is regenerated from
/// [`Gf3Snapshot::edid`] on restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gf3Snapshot {
    pub device_id: u16,

    pub pci_config: [u8; PCI_CONFIG_SPACE_SIZE],
    pub bar_bases: [u32; 6],
    pub rom_base: u32,

    pub intr: u32,
    pub intr_en: u32,
    pub prmvio: Vec<u32>,
    pub crtc: [u8; CRTC_LEN],

    pub vbe_index: u16,
    pub vbe: VbeRegs,

    pub ddc: DdcEngineState,
    pub edid: EdidInfo,

    pub now_ns: u64,
    pub vram: Vec<u8>,
}

impl Gf3Snapshot {
    pub const MAGIC: [u8; 4] = *b"GF3S";
    pub const VERSION: u16 = 1;

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(bytes);

        if read_array::<4, _>(&mut r)? != Self::MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let version = read_u16_le(&mut r)?;
        if version != Self::VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let device_id = read_u16_le(&mut r)?;

        let pci_config = read_array::<PCI_CONFIG_SPACE_SIZE, _>(&mut r)?;
        let mut bar_bases = [0u32; 6];
        for base in &mut bar_bases {
            *base = read_u32_le(&mut r)?;
        }
        let rom_base = read_u32_le(&mut r)?;

        let intr = read_u32_le(&mut r)?;
        let intr_en = read_u32_le(&mut r)?;
        let mut prmvio = Vec::with_capacity(PRMVIO_WORDS);
        for _ in 0..PRMVIO_WORDS {
            prmvio.push(read_u32_le(&mut r)?);
        }
        let crtc = read_array::<CRTC_LEN, _>(&mut r)?;

        let vbe_index = read_u16_le(&mut r)?;
        let vbe = VbeRegs {
            xres: read_u16_le(&mut r)?,
            yres: read_u16_le(&mut r)?,
            bpp: read_u16_le(&mut r)?,
            enable: read_u16_le(&mut r)?,
            bank: read_u16_le(&mut r)?,
            virt_width: read_u16_le(&mut r)?,
            virt_height: read_u16_le(&mut r)?,
            x_offset: read_u16_le(&mut r)?,
            y_offset: read_u16_le(&mut r)?,
        };

        let ddc = DdcEngineState {
            state: DdcState::from_u8(read_u8(&mut r)?)
                .ok_or(SnapshotError::Corrupt("invalid DDC state"))?,
            shift: read_u8(&mut r)?,
            bit_count: read_u8(&mut r)?,
            address: read_u8(&mut r)?,
            cursor: read_u32_le(&mut r)?,
            sda_in: read_bool(&mut r)?,
            scl_in: read_bool(&mut r)?,
            sda_out: read_bool(&mut r)?,
            ack_pending: read_bool(&mut r)?,
            ack_slot: read_bool(&mut r)?,
            fresh: read_bool(&mut r)?,
            offset_written: read_bool(&mut r)?,
        };

        let edid = EdidInfo {
            vendor: PnpId::new(read_array::<3, _>(&mut r)?)
                .map_err(|_| SnapshotError::Corrupt("invalid EDID vendor"))?,
            product_code: read_u16_le(&mut r)?,
            name: read_string(&mut r)?,
            serial: read_string(&mut r)?,
            pref_width: read_u32_le(&mut r)?,
            pref_height: read_u32_le(&mut r)?,
            max_width: read_u32_le(&mut r)?,
            max_height: read_u32_le(&mut r)?,
            width_mm: read_u32_le(&mut r)?,
            height_mm: read_u32_le(&mut r)?,
            refresh_hz: read_u16_le(&mut r)?,
            extension_block: read_bool(&mut r)?,
        };
        if !edid.dimensions_valid() {
            return Err(SnapshotError::Corrupt("EDID mode out of range"));
        }

        let now_ns = read_u64_le(&mut r)?;

        let vram_len = read_u32_le(&mut r)? as usize;
        if vram_len > MAX_VRAM_SIZE {
            return Err(SnapshotError::Corrupt("vram too large"));
        }
        let mut vram = vec![0u8; vram_len];
        r.read_exact(&mut vram)?;

        Ok(Self {
            device_id,
            pci_config,
            bar_bases,
            rom_base,
            intr,
            intr_en,
            prmvio,
            crtc,
            vbe_index,
            vbe,
            ddc,
            edid,
            now_ns,
            vram,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.vram.len() + 8 * 1024);
        out.extend_from_slice(&Self::MAGIC);
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&self.device_id.to_le_bytes());

        out.extend_from_slice(&self.pci_config);
        for base in self.bar_bases {
            out.extend_from_slice(&base.to_le_bytes());
        }
        out.extend_from_slice(&self.rom_base.to_le_bytes());

        out.extend_from_slice(&self.intr.to_le_bytes());
        out.extend_from_slice(&self.intr_en.to_le_bytes());
        for i in 0..PRMVIO_WORDS {
            let word = self.prmvio.get(i).copied().unwrap_or(0);
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&self.crtc);

        out.extend_from_slice(&self.vbe_index.to_le_bytes());
        let v = &self.vbe;
        for reg in [
            v.xres,
            v.yres,
            v.bpp,
            v.enable,
            v.bank,
            v.virt_width,
            v.virt_height,
            v.x_offset,
            v.y_offset,
        ] {
            out.extend_from_slice(&reg.to_le_bytes());
        }

        let d = &self.ddc;
        out.push(d.state.to_u8());
        out.push(d.shift);
        out.push(d.bit_count);
        out.push(d.address);
        out.extend_from_slice(&d.cursor.to_le_bytes());
        for flag in [
            d.sda_in,
            d.scl_in,
            d.sda_out,
            d.ack_pending,
            d.ack_slot,
            d.fresh,
            d.offset_written,
        ] {
            out.push(flag as u8);
        }

        let e = &self.edid;
        out.extend_from_slice(&e.vendor.as_bytes());
        out.extend_from_slice(&e.product_code.to_le_bytes());
        write_string(&mut out, &e.name);
        write_string(&mut out, &e.serial);
        for v in [
            e.pref_width,
            e.pref_height,
            e.max_width,
            e.max_height,
            e.width_mm,
            e.height_mm,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&e.refresh_hz.to_le_bytes());
        out.push(e.extension_block as u8);

        out.extend_from_slice(&self.now_ns.to_le_bytes());

        let vram_len = u32::try_from(self.vram.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&vram_len.to_le_bytes());
        out.extend_from_slice(&self.vram);

        out
    }
}

impl GeForce3 {
    pub fn save_snapshot(&self) -> Gf3Snapshot {
        Gf3Snapshot {
            device_id: self.model.device_id(),
            pci_config: *self.pci.bytes(),
            bar_bases: self.pci.bar_bases(),
            rom_base: self.pci.rom_base(),
            intr: self.regs.intr(),
            intr_en: self.regs.intr_en(),
            prmvio: self.regs.prmvio_words().to_vec(),
            crtc: self.crtc,
            vbe_index: self.vbe.read_index(),
            vbe: self.vbe.regs(),
            ddc: self.ddc.save_state(),
            edid: self.edid.info().clone(),
            now_ns: self.now_ns,
            vram: self.vram.clone(),
        }
    }

    /// Restores a snapshot taken from an adapter of the same model and VRAM size. The attached
    /// console sink is brought up to date with the restored display state.
    pub fn restore_snapshot(&mut self, snap: &Gf3Snapshot) -> Result<()> {
        let expected = self.model.device_id();
        if snap.device_id != expected {
            return Err(SnapshotError::ModelMismatch {
                expected,
                found: snap.device_id,
            });
        }
        if snap.vram.len() != self.vram.len() {
            return Err(SnapshotError::VramLenMismatch {
                expected: self.vram.len(),
                found: snap.vram.len(),
            });
        }
        if snap.prmvio.len() != PRMVIO_WORDS {
            return Err(SnapshotError::Corrupt("PRMVIO length"));
        }
        if !snap.edid.dimensions_valid() {
            return Err(SnapshotError::Corrupt("EDID mode out of range"));
        }
        let edid = EdidImage::generate(&snap.edid);

        self.pci
            .restore(&snap.pci_config, snap.bar_bases, snap.rom_base);
        self.regs.restore(snap.intr, snap.intr_en, &snap.prmvio);
        self.crtc = snap.crtc;
        self.vram.copy_from_slice(&snap.vram);
        self.vbe.restore(snap.vbe_index, snap.vbe);
        self.set_edid_image(edid);
        self.ddc.restore_state(&snap.ddc);
        self.now_ns = snap.now_ns;
        self.resync_display();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Gf3Config, Gf3Model};
    use crate::mmio::Aperture;

    fn dev(model: Gf3Model) -> GeForce3 {
        GeForce3::realize(Gf3Config::for_model(model)).unwrap()
    }

    #[test]
    fn encode_decode_preserves_every_field() {
        let mut d = dev(Gf3Model::GeForce3);
        d.write(Aperture::Bar0, 0x140, 4, 0x1);
        d.write(Aperture::Bar0, 0x300, 4, 0xCAFE_F00D);
        d.write(Aperture::Crtc, 0x20, 1, 0x42);
        d.resize_display(1280, 1024);
        d.tick(123);

        let snap = d.save_snapshot();
        let decoded = Gf3Snapshot::decode(&snap.encode()).unwrap();
        assert_eq!(decoded, snap);
        assert_eq!(decoded.edid.pref_width, 1280);
        assert_eq!(decoded.now_ns, 123);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let bytes = dev(Gf3Model::GeForce3).save_snapshot().encode();

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(
            Gf3Snapshot::decode(&bad),
            Err(SnapshotError::InvalidMagic)
        ));

        let mut bad = bytes.clone();
        bad[4] = 2;
        assert!(matches!(
            Gf3Snapshot::decode(&bad),
            Err(SnapshotError::UnsupportedVersion(2))
        ));

        assert!(matches!(
            Gf3Snapshot::decode(&bytes[..bytes.len() - 1]),
            Err(SnapshotError::Io(_))
        ));
    }

    #[test]
    fn restore_checks_model_and_vram() {
        let snap = dev(Gf3Model::GeForce2Mx).save_snapshot();
        let mut target = dev(Gf3Model::GeForce3);
        assert!(matches!(
            target.restore_snapshot(&snap),
            Err(SnapshotError::ModelMismatch {
                expected: 0x0200,
                found: 0x0110
            })
        ));

        let big = Gf3Config {
            vram_size: 128 << 20,
            ..Gf3Config::default()
        };
        let snap = GeForce3::realize(big).unwrap().save_snapshot();
        assert!(matches!(
            target.restore_snapshot(&snap),
            Err(SnapshotError::VramLenMismatch { .. })
        ));
    }

    #[test]
    fn oversized_edid_mode_is_corrupt() {
        let mut snap = dev(Gf3Model::GeForce3).save_snapshot();
        snap.edid.pref_height = 0x2000_0000;
        assert!(matches!(
            Gf3Snapshot::decode(&snap.encode()),
            Err(SnapshotError::Corrupt(_))
        ));

        let mut target = dev(Gf3Model::GeForce3);
        target.write(Aperture::Bar0, 0x140, 4, 0x5);
        assert!(matches!(
            target.restore_snapshot(&snap),
            Err(SnapshotError::Corrupt(_))
        ));
        assert_eq!(target.regs().intr_en(), 0x5);
    }

    #[test]
    fn long_names_are_truncated_on_a_char_boundary() {
        let mut out = Vec::new();
        let name = "é".repeat(200);
        write_string(&mut out, &name);
        assert_eq!(out[0], 254);
        let s = read_string(&mut Cursor::new(&out[..])).unwrap();
        assert_eq!(s.chars().count(), 127);
    }
}
