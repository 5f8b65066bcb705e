//! Address decoding for the adapter's apertures, plus bus adapters for hosts that share the
//! device behind `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::console::is_vga_port;
use crate::regs::{
    NvBlock, NV_MMIO_SIZE, NV_PBUS_PCI_NV_1, NV_PMC_BOOT_0, NV_PMC_INTR_0, NV_PMC_INTR_EN_0,
    NV_PRMVIO_SIZE,
};
use crate::vbe::{VBE_DISPI_DATA_PORT, VBE_DISPI_INDEX_PORT};
use crate::GeForce3;

/// Size of the CRTC aperture (BAR2).
pub const CRTC_APERTURE_SIZE: u32 = 0x1000;

/// DDC register window inside the CRTC aperture.
pub const DDC_WINDOW_START: u32 = 0x50;
pub const DDC_WINDOW_END: u32 = 0x60;
pub const DDC_REG_DATA: u32 = 0x0;
pub const DDC_REG_CONTROL: u32 = 0x4;
pub const DDC_REG_STOP: u32 = 0x8;

/// CRTC registers backed by plain storage (`0x04..0x50`).
pub(crate) const CRTC_STORE_START: u32 = 0x04;
pub(crate) const CRTC_STORE_END: u32 = DDC_WINDOW_START;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aperture {
    /// BAR0: 16 MiB NV register space.
    Bar0,
    /// BAR2: 4 KiB CRTC block.
    Crtc,
    /// Legacy I/O ports.
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdcReg {
    Data,
    Control,
    Stop,
    Reserved,
}

/// Decoded target of a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Ddc(DdcReg),
    VbeIndex,
    VbeData,
    PmcBoot0,
    PmcIntr,
    PmcIntrEn,
    PbusPciId,
    /// Offset into the PRMVIO word store.
    Prmvio(u32),
    CrtcStatus,
    /// Offset into the stored CRTC bytes.
    CrtcReg(u32),
    LegacyVga(u16),
    Unimplemented(NvBlock),
}

pub fn decode(aperture: Aperture, offset: u64) -> Target {
    match aperture {
        Aperture::Crtc => decode_crtc(offset),
        Aperture::Io => decode_io(offset),
        Aperture::Bar0 => decode_bar0(offset),
    }
}

fn decode_crtc(offset: u64) -> Target {
    let Ok(offset) = u32::try_from(offset) else {
        return Target::Unimplemented(NvBlock::Pcrtc);
    };
    match offset {
        DDC_WINDOW_START..DDC_WINDOW_END => {
            Target::Ddc(match (offset - DDC_WINDOW_START) & !0x3 {
                DDC_REG_DATA => DdcReg::Data,
                DDC_REG_CONTROL => DdcReg::Control,
                DDC_REG_STOP => DdcReg::Stop,
                _ => DdcReg::Reserved,
            })
        }
        0x00 => Target::CrtcStatus,
        CRTC_STORE_START..CRTC_STORE_END => Target::CrtcReg(offset),
        _ => Target::Unimplemented(NvBlock::Pcrtc),
    }
}

fn decode_io(port: u64) -> Target {
    let Ok(port) = u16::try_from(port) else {
        return Target::Unimplemented(NvBlock::Unknown);
    };
    match port {
        VBE_DISPI_INDEX_PORT => Target::VbeIndex,
        VBE_DISPI_DATA_PORT => Target::VbeData,
        p if is_vga_port(p) => Target::LegacyVga(p),
        _ => Target::Unimplemented(NvBlock::Unknown),
    }
}

fn decode_bar0(offset: u64) -> Target {
    let Ok(offset) = u32::try_from(offset) else {
        return Target::Unimplemented(NvBlock::Unknown);
    };
    match offset {
        NV_PMC_BOOT_0 => Target::PmcBoot0,
        NV_PMC_INTR_0 => Target::PmcIntr,
        NV_PMC_INTR_EN_0 => Target::PmcIntrEn,
        NV_PBUS_PCI_NV_1 => Target::PbusPciId,
        o if (o as usize) < NV_PRMVIO_SIZE => Target::Prmvio(o),
        o if o >= NV_MMIO_SIZE => Target::Unimplemented(NvBlock::Unknown),
        o => Target::Unimplemented(NvBlock::for_offset(o)),
    }
}

/// Memory-mapped bus handler, as installed into a host's physical address map.
///
/// `offset` is relative to the mapping base; values are little-endian.
pub trait MmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64;
    fn write(&mut self, offset: u64, size: usize, value: u64);
}

/// BAR0 (NV registers) adapter.
pub struct Gf3RegsMmioHandler {
    pub dev: Rc<RefCell<GeForce3>>,
}

impl MmioHandler for Gf3RegsMmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        self.dev.borrow_mut().read(Aperture::Bar0, offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        self.dev
            .borrow_mut()
            .write(Aperture::Bar0, offset, size, value);
    }
}

/// BAR2 (CRTC + DDC) adapter.
pub struct Gf3CrtcMmioHandler {
    pub dev: Rc<RefCell<GeForce3>>,
}

impl MmioHandler for Gf3CrtcMmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        self.dev.borrow_mut().read(Aperture::Crtc, offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        self.dev
            .borrow_mut()
            .write(Aperture::Crtc, offset, size, value);
    }
}

/// BAR1 (VRAM) adapter. Accesses past the end of VRAM read as zero and are dropped.
pub struct Gf3VramMmioHandler {
    pub dev: Rc<RefCell<GeForce3>>,
}

impl MmioHandler for Gf3VramMmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        if size == 0 {
            return 0;
        }
        let size = size.clamp(1, 8);
        let dev = self.dev.borrow();
        let mut out = 0u64;
        for i in 0..size {
            let b = dev.vram_read_u8(offset.wrapping_add(i as u64)).unwrap_or(0);
            out |= u64::from(b) << (i * 8);
        }
        out
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        if size == 0 {
            return;
        }
        let size = size.clamp(1, 8);
        let mut dev = self.dev.borrow_mut();
        for i in 0..size {
            let b = ((value >> (i * 8)) & 0xFF) as u8;
            dev.vram_write_u8(offset.wrapping_add(i as u64), b);
        }
    }
}

/// VBE linear framebuffer adapter. Reads float high unless a linear mode is active.
pub struct Gf3LfbMmioHandler {
    pub dev: Rc<RefCell<GeForce3>>,
}

impl MmioHandler for Gf3LfbMmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        let dev = self.dev.borrow();
        let mut out = 0u64;
        for i in 0..size.min(8) {
            let b = dev.lfb_read_u8(offset.wrapping_add(i as u64)).unwrap_or(0xFF);
            out |= u64::from(b) << (i * 8);
        }
        out
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        let mut dev = self.dev.borrow_mut();
        for i in 0..size.min(8) {
            dev.lfb_write_u8(offset.wrapping_add(i as u64), (value >> (i * 8)) as u8);
        }
    }
}

/// Legacy memory window (`0xA0000..0xC0000`) adapter: banked VBE framebuffer or VGA planes.
pub struct Gf3LegacyMmioHandler {
    pub dev: Rc<RefCell<GeForce3>>,
}

impl MmioHandler for Gf3LegacyMmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        if size == 0 {
            return 0;
        }
        if !(1..=8).contains(&size) {
            return u64::MAX;
        }
        let mut dev = self.dev.borrow_mut();
        let mut out = 0u64;
        for i in 0..size {
            let off = u32::try_from(offset.wrapping_add(i as u64)).unwrap_or(u32::MAX);
            out |= u64::from(dev.legacy_mem_read(off)) << (i * 8);
        }
        out
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        if size == 0 || !(1..=8).contains(&size) {
            return;
        }
        let mut dev = self.dev.borrow_mut();
        for i in 0..size {
            let off = u32::try_from(offset.wrapping_add(i as u64)).unwrap_or(u32::MAX);
            dev.legacy_mem_write(off, ((value >> (i * 8)) & 0xFF) as u8);
        }
    }
}

/// Expansion ROM adapter (read-only).
pub struct Gf3RomMmioHandler {
    pub dev: Rc<RefCell<GeForce3>>,
}

impl MmioHandler for Gf3RomMmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        let dev = self.dev.borrow();
        let mut out = 0u64;
        for i in 0..size.min(8) {
            let b = dev.rom_read_u8(offset.wrapping_add(i as u64));
            out |= u64::from(b) << (i * 8);
        }
        out
    }

    fn write(&mut self, _offset: u64, _size: usize, _value: u64) {}
}
