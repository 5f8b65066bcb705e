use gf3_edid::EdidImage;
use tracing::{debug, trace};

use crate::config::{ConfigError, Gf3Config, Gf3Model};
use crate::console::{DisplaySink, VgaCompat, VGA_LEGACY_WINDOW_SIZE};
use crate::ddc::{DdcEngine, DdcState};
use crate::log_throttle::{LogThrottle, ThrottleDecision};
use crate::mmio::{decode, Aperture, DdcReg, Target, CRTC_APERTURE_SIZE, CRTC_STORE_END};
use crate::pci::{
    PciBarDefinition, PciConfigSpace, PciSubsystemIds, NVIDIA_VENDOR_ID, PCI_CLASS_DISPLAY,
    PCI_INTERRUPT_PIN_INTA, PCI_SUBCLASS_DISPLAY_VGA,
};
use crate::regs::{size_mask, NvBlock, NvRegisters, NV_MMIO_SIZE};
use crate::vbe::{ModeChange, VbeController};
use crate::{io_all_ones, DisplayAdapter, PortIO};

/// BAR indices used by the adapter.
pub const BAR_MMIO: u8 = 0;
pub const BAR_VRAM: u8 = 1;
pub const BAR_CRTC: u8 = 2;

/// Value returned by the CRTC status register (offset 0x00).
const CRTC_STATUS: u64 = 0x01;

/// Value returned by unassigned offsets in the DDC window.
const DDC_RESERVED_VALUE: u64 = 0xFF;

/// The emulated adapter: PCI function, NV register file, DDC bus, VBE controller and VRAM.
pub struct GeForce3 {
    pub(crate) model: Gf3Model,
    pub(crate) pci: PciConfigSpace,
    pub(crate) regs: NvRegisters,
    pub(crate) crtc: [u8; CRTC_STORE_END as usize],
    pub(crate) ddc: DdcEngine,
    pub(crate) edid: EdidImage,
    pub(crate) vbe: VbeController,
    pub(crate) vram: Vec<u8>,
    pub(crate) rom: Option<Vec<u8>>,
    sink: Option<Box<dyn DisplaySink>>,
    vga: Option<Box<dyn VgaCompat>>,
    throttle: LogThrottle,
    pub(crate) now_ns: u64,
}

impl GeForce3 {
    /// Builds the device from `config`, validating it first.
    pub fn realize(config: Gf3Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let Gf3Config {
            model,
            vram_size,
            rom,
            edid: edid_info,
        } = config;

        let device_id = model.device_id();
        let mut pci = PciConfigSpace::new(NVIDIA_VENDOR_ID, device_id);
        pci.set_class_code(
            PCI_CLASS_DISPLAY,
            PCI_SUBCLASS_DISPLAY_VGA,
            0x00,
            model.revision_id(),
        );
        pci.set_subsystem_ids(PciSubsystemIds {
            subsystem_vendor_id: NVIDIA_VENDOR_ID,
            subsystem_id: device_id,
        });
        pci.set_interrupt_pin(PCI_INTERRUPT_PIN_INTA);
        pci.set_bar_definition(
            BAR_MMIO,
            PciBarDefinition {
                size: NV_MMIO_SIZE,
                prefetchable: false,
            },
        );
        pci.set_bar_definition(
            BAR_VRAM,
            PciBarDefinition {
                // validate() bounds VRAM to 512 MiB.
                size: u32::try_from(vram_size).unwrap_or(u32::MAX),
                prefetchable: true,
            },
        );
        pci.set_bar_definition(
            BAR_CRTC,
            PciBarDefinition {
                size: CRTC_APERTURE_SIZE,
                prefetchable: false,
            },
        );
        if let Some(rom) = &rom {
            // validate() bounds the image to MAX_ROM_SIZE.
            pci.set_rom_size(u32::try_from(rom.len()).unwrap_or(u32::MAX));
        }

        let edid = EdidImage::generate(&edid_info);
        debug!(
            model = model.name(),
            vram_mb = vram_size >> 20,
            edid_len = edid.len(),
            "GeForce3 realized"
        );

        Ok(Self {
            model,
            pci,
            regs: NvRegisters::new(model.boot0(), NVIDIA_VENDOR_ID, device_id),
            crtc: [0; CRTC_STORE_END as usize],
            ddc: DdcEngine::new(edid.as_bytes().to_vec()),
            edid,
            vbe: VbeController::new(vram_size),
            vram: vec![0; vram_size],
            rom,
            sink: None,
            vga: None,
            throttle: LogThrottle::new(),
            now_ns: 0,
        })
    }

    pub fn model(&self) -> Gf3Model {
        self.model
    }

    pub fn pci(&self) -> &PciConfigSpace {
        &self.pci
    }

    pub fn pci_mut(&mut self) -> &mut PciConfigSpace {
        &mut self.pci
    }

    pub fn regs(&self) -> &NvRegisters {
        &self.regs
    }

    pub fn ddc(&self) -> &DdcEngine {
        &self.ddc
    }

    /// Direct access to the DDC bus, as a host-side I2C master would have.
    pub fn ddc_mut(&mut self) -> &mut DdcEngine {
        &mut self.ddc
    }

    pub fn vbe(&self) -> &VbeController {
        &self.vbe
    }

    pub fn edid(&self) -> &EdidImage {
        &self.edid
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn vram_mut(&mut self) -> &mut [u8] {
        &mut self.vram
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Advances device time. Only the log throttle observes it.
    pub fn tick(&mut self, delta_ns: u64) {
        self.now_ns = self.now_ns.saturating_add(delta_ns);
    }

    pub fn raise_interrupt(&mut self, bits: u32) {
        self.regs.raise_interrupt(bits);
    }

    /// Level of the INTA line.
    pub fn irq_level(&self) -> bool {
        self.regs.irq_level()
    }

    /// Returns the device to its power-on register state. VRAM, the EDID and attached
    /// collaborators are kept.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.crtc.fill(0);
        self.ddc.reset();
        let was_enabled = self.vbe.enabled();
        self.vbe.reset();
        self.throttle.reset();
        if was_enabled {
            self.notify_legacy();
        }
    }

    /// Attaches the console backend. An already active VBE mode is reported immediately.
    pub fn attach_console_sink(&mut self, mut sink: Box<dyn DisplaySink>) {
        if let Some(mode) = self.vbe.mode() {
            sink.mode_changed(&mode);
            sink.invalidate();
        }
        self.sink = Some(sink);
    }

    pub fn attach_vga(&mut self, vga: Box<dyn VgaCompat>) {
        self.vga = Some(vga);
    }

    /// Regenerates the EDID for a new preferred resolution and publishes it on the DDC bus.
    ///
    /// Sizes an EDID cannot describe (empty, or beyond [`gf3_edid::MAX_DIMENSION`]) are
    /// ignored. An in-flight DDC transaction keeps its position.
    pub fn resize_display(&mut self, width: u32, height: u32) {
        let info = self.edid.info().with_preferred(width, height);
        if !info.dimensions_valid() {
            debug!(width, height, "ignoring display resize outside EDID limits");
            return;
        }
        self.set_edid_image(EdidImage::generate(&info));
        debug!(width, height, len = self.edid.len(), "EDID regenerated");
    }

    pub fn config_read(&self, offset: u16, size: usize) -> u32 {
        self.pci.read(offset, size)
    }

    pub fn config_write(&mut self, offset: u16, size: usize, value: u32) {
        self.pci.write(offset, size, value);
    }

    /// Register read through one of the apertures. Accesses wider than 4 bytes are split.
    pub fn read(&mut self, aperture: Aperture, offset: u64, size: usize) -> u64 {
        match size {
            0 => 0,
            1..=4 => self.read_reg(aperture, offset, size) & u64::from(size_mask(size)),
            _ => {
                let lo = self.read_reg(aperture, offset, 4) & 0xFFFF_FFFF;
                let hi = self.read(aperture, offset.wrapping_add(4), size.min(8) - 4);
                lo | (hi << 32)
            }
        }
    }

    /// Register write through one of the apertures. Accesses wider than 4 bytes are split.
    pub fn write(&mut self, aperture: Aperture, offset: u64, size: usize, value: u64) {
        match size {
            0 => {}
            1..=4 => self.write_reg(aperture, offset, size, value & u64::from(size_mask(size))),
            _ => {
                self.write_reg(aperture, offset, 4, value & 0xFFFF_FFFF);
                self.write(aperture, offset.wrapping_add(4), size.min(8) - 4, value >> 32);
            }
        }
    }

    fn read_reg(&mut self, aperture: Aperture, offset: u64, size: usize) -> u64 {
        match decode(aperture, offset) {
            Target::Ddc(DdcReg::Data) => {
                let byte = self.ddc.i2c_recv(true);
                trace!(byte, cursor = self.ddc.cursor(), "DDC data read");
                u64::from(byte)
            }
            Target::Ddc(DdcReg::Control) => {
                let (sda, scl) = self.ddc.read_pins();
                u64::from(sda) | (u64::from(scl) << 1)
            }
            Target::Ddc(DdcReg::Stop) => 0,
            Target::Ddc(DdcReg::Reserved) => DDC_RESERVED_VALUE,
            Target::VbeIndex => u64::from(self.vbe.read_index()),
            Target::VbeData => u64::from(self.vbe.read_data()),
            Target::PmcBoot0 => u64::from(self.regs.boot0()),
            Target::PmcIntr => u64::from(self.regs.intr()),
            Target::PmcIntrEn => u64::from(self.regs.intr_en()),
            Target::PbusPciId => u64::from(self.regs.pci_id()),
            Target::Prmvio(off) => u64::from(self.regs.prmvio_read(off, size)),
            Target::CrtcStatus => CRTC_STATUS,
            Target::CrtcReg(off) => {
                let mut out = 0u64;
                for (i, b) in self.crtc[off as usize..].iter().take(size).enumerate() {
                    out |= u64::from(*b) << (i * 8);
                }
                out
            }
            Target::LegacyVga(port) => match self.vga.as_mut() {
                Some(vga) => u64::from(vga.io_read(port, size)),
                None => u64::from(io_all_ones(size)),
            },
            Target::Unimplemented(block) => {
                self.log_unimplemented(aperture, offset, size, None, block);
                0
            }
        }
    }

    fn write_reg(&mut self, aperture: Aperture, offset: u64, size: usize, value: u64) {
        match decode(aperture, offset) {
            Target::Ddc(DdcReg::Data) if self.ddc.reading() => {
                trace!(value, "DDC data write during a read transaction dropped");
            }
            Target::Ddc(DdcReg::Data) => {
                let byte = value as u8;
                let acked = if matches!(self.ddc.state(), DdcState::Idle | DdcState::Stop) {
                    self.ddc.i2c_start(byte)
                } else {
                    self.ddc.i2c_send(byte)
                };
                trace!(byte, acked, "DDC data write");
            }
            Target::Ddc(DdcReg::Control) => {
                self.ddc.write_pins(value & 0x1 != 0, value & 0x2 != 0);
            }
            Target::Ddc(DdcReg::Stop) => self.ddc.i2c_stop(),
            Target::Ddc(DdcReg::Reserved) => {}
            Target::VbeIndex => self.vbe.write_index(value as u16),
            Target::VbeData => {
                if let Some(change) = self.vbe.write_data(value as u16) {
                    self.apply_mode_change(change);
                }
            }
            Target::PmcBoot0 | Target::PbusPciId => {
                trace!(offset, value, "write to read-only identity register dropped");
            }
            Target::PmcIntr => self.regs.write_intr(value as u32),
            Target::PmcIntrEn => self.regs.write_intr_en(value as u32),
            Target::Prmvio(off) => self.regs.prmvio_write(off, size, value as u32),
            Target::CrtcStatus => {}
            Target::CrtcReg(off) => {
                for (i, b) in self.crtc[off as usize..].iter_mut().take(size).enumerate() {
                    *b = (value >> (i * 8)) as u8;
                }
            }
            Target::LegacyVga(port) => {
                if let Some(vga) = self.vga.as_mut() {
                    vga.io_write(port, size, value as u32);
                }
            }
            Target::Unimplemented(block) => {
                self.log_unimplemented(aperture, offset, size, Some(value), block);
            }
        }
    }

    fn apply_mode_change(&mut self, change: ModeChange) {
        match change {
            ModeChange::Enabled {
                mode,
                clear_framebuffer,
            } => {
                if clear_framebuffer {
                    let len = (mode.line_pitch as usize)
                        .saturating_mul(usize::from(mode.virt_height))
                        .min(self.vram.len());
                    self.vram[..len].fill(0);
                }
                debug!(
                    width = mode.width,
                    height = mode.height,
                    bpp = mode.bpp,
                    pitch = mode.line_pitch,
                    lfb = mode.lfb,
                    "VBE mode set"
                );
                if let Some(sink) = self.sink.as_mut() {
                    sink.mode_changed(&mode);
                    sink.invalidate();
                }
            }
            ModeChange::Rejected | ModeChange::Disabled => self.notify_legacy(),
            ModeChange::Panned {
                display_start,
                bank_offset,
            } => {
                trace!(display_start, bank_offset, "VBE display start changed");
                if let Some(sink) = self.sink.as_mut() {
                    sink.display_start_changed(display_start);
                }
            }
        }
    }

    /// Re-announces the current display state to the collaborators (after a restore).
    pub(crate) fn resync_display(&mut self) {
        match self.vbe.mode() {
            Some(mode) => {
                if let Some(sink) = self.sink.as_mut() {
                    sink.mode_changed(&mode);
                    sink.invalidate();
                }
            }
            None => self.notify_legacy(),
        }
    }

    fn notify_legacy(&mut self) {
        if let Some(vga) = self.vga.as_mut() {
            vga.restore();
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.restore_legacy();
        }
    }

    fn log_unimplemented(
        &mut self,
        aperture: Aperture,
        offset: u64,
        size: usize,
        value: Option<u64>,
        block: NvBlock,
    ) {
        let key = ((aperture as u64) << 32) | (offset & 0xFFFF_FFFF);
        let decision = self
            .throttle
            .check(self.now_ns, key, value.unwrap_or(u64::MAX));
        match decision {
            ThrottleDecision::Suppress => return,
            ThrottleDecision::Resume { suppressed } => {
                debug!(suppressed, "resuming MMIO logging after rate limit");
            }
            ThrottleDecision::Log => {}
        }
        match value {
            Some(value) => debug!(
                block = block.name(),
                ?aperture,
                offset = format_args!("{offset:#x}"),
                size,
                value = format_args!("{value:#x}"),
                "unimplemented register write"
            ),
            None => debug!(
                block = block.name(),
                ?aperture,
                offset = format_args!("{offset:#x}"),
                size,
                "unimplemented register read"
            ),
        }
    }

    /// Raw VRAM byte (BAR1).
    pub fn vram_read_u8(&self, offset: u64) -> Option<u8> {
        let offset = usize::try_from(offset).ok()?;
        self.vram.get(offset).copied()
    }

    pub fn vram_write_u8(&mut self, offset: u64, value: u8) {
        if let Some(b) = usize::try_from(offset)
            .ok()
            .and_then(|o| self.vram.get_mut(o))
        {
            *b = value;
        }
    }

    /// VBE linear framebuffer byte; `None` unless a linear mode is active.
    pub fn lfb_read_u8(&self, offset: u64) -> Option<u8> {
        self.vbe.translate_lfb(offset).map(|i| self.vram[i])
    }

    pub fn lfb_write_u8(&mut self, offset: u64, value: u8) {
        if let Some(i) = self.vbe.translate_lfb(offset) {
            self.vram[i] = value;
        }
    }

    /// Byte in the legacy 0xA0000 window: the VBE bank while VBE is enabled, VGA memory
    /// otherwise.
    pub fn legacy_mem_read(&mut self, offset: u32) -> u8 {
        if offset >= VGA_LEGACY_WINDOW_SIZE {
            return 0xFF;
        }
        if self.vbe.enabled() {
            return self
                .vbe
                .translate_bank_window(offset)
                .map_or(0xFF, |i| self.vram[i]);
        }
        match self.vga.as_mut() {
            Some(vga) => vga.mem_read(offset),
            None => 0xFF,
        }
    }

    pub fn legacy_mem_write(&mut self, offset: u32, value: u8) {
        if offset >= VGA_LEGACY_WINDOW_SIZE {
            return;
        }
        if self.vbe.enabled() {
            if let Some(i) = self.vbe.translate_bank_window(offset) {
                self.vram[i] = value;
            }
            return;
        }
        if let Some(vga) = self.vga.as_mut() {
            vga.mem_write(offset, value);
        }
    }

    /// Expansion ROM byte; past the image (or without one) reads 0xFF.
    pub fn rom_read_u8(&self, offset: u64) -> u8 {
        let Some(rom) = &self.rom else {
            return 0xFF;
        };
        usize::try_from(offset)
            .ok()
            .and_then(|o| rom.get(o).copied())
            .unwrap_or(0xFF)
    }

    pub(crate) fn set_edid_image(&mut self, image: EdidImage) {
        self.ddc.set_edid(image.as_bytes().to_vec());
        self.edid = image;
    }
}

impl PortIO for GeForce3 {
    fn port_read(&mut self, port: u16, size: usize) -> u32 {
        match size {
            0 => 0,
            1 | 2 | 4 => self.read(Aperture::Io, u64::from(port), size) as u32,
            _ => io_all_ones(size),
        }
    }

    fn port_write(&mut self, port: u16, size: usize, val: u32) {
        match size {
            1 | 2 | 4 => self.write(Aperture::Io, u64::from(port), size, u64::from(val)),
            _ => {}
        }
    }
}

impl DisplayAdapter for GeForce3 {
    fn reset(&mut self) {
        GeForce3::reset(self);
    }

    fn mmio_read(&mut self, aperture: Aperture, offset: u64, size: usize) -> u64 {
        self.read(aperture, offset, size)
    }

    fn mmio_write(&mut self, aperture: Aperture, offset: u64, size: usize, value: u64) {
        self.write(aperture, offset, size, value);
    }

    fn attach_console_sink(&mut self, sink: Box<dyn DisplaySink>) {
        GeForce3::attach_console_sink(self, sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{RecordingSink, SinkEvent};
    use crate::vbe::{
        VbeEnable, VBE_DISPI_DATA_PORT, VBE_DISPI_INDEX_BPP, VBE_DISPI_INDEX_ENABLE,
        VBE_DISPI_INDEX_PORT, VBE_DISPI_INDEX_XRES, VBE_DISPI_INDEX_YRES,
    };

    fn dev() -> GeForce3 {
        GeForce3::realize(Gf3Config::default()).unwrap()
    }

    fn vbe_write(dev: &mut GeForce3, index: u16, value: u16) {
        dev.port_write(VBE_DISPI_INDEX_PORT, 2, u32::from(index));
        dev.port_write(VBE_DISPI_DATA_PORT, 2, u32::from(value));
    }

    fn set_mode(dev: &mut GeForce3, w: u16, h: u16, bpp: u16, enable: VbeEnable) {
        vbe_write(dev, VBE_DISPI_INDEX_XRES, w);
        vbe_write(dev, VBE_DISPI_INDEX_YRES, h);
        vbe_write(dev, VBE_DISPI_INDEX_BPP, bpp);
        vbe_write(dev, VBE_DISPI_INDEX_ENABLE, enable.bits());
    }

    #[test]
    fn realize_programs_pci_identity_and_bars() {
        let dev = dev();
        let id = dev.pci().vendor_device_id();
        assert_eq!((id.vendor_id, id.device_id), (0x10DE, 0x0200));
        let class = dev.pci().class_code();
        assert_eq!((class.class, class.subclass, class.prog_if), (0x03, 0x00, 0x00));
        assert_eq!(dev.pci().interrupt_pin(), PCI_INTERRUPT_PIN_INTA);
        assert_eq!(dev.pci().bar_definition(BAR_MMIO).unwrap().size, 16 << 20);
        let vram_bar = dev.pci().bar_definition(BAR_VRAM).unwrap();
        assert_eq!(vram_bar.size, 64 << 20);
        assert!(vram_bar.prefetchable);
        assert_eq!(dev.pci().bar_definition(BAR_CRTC).unwrap().size, 0x1000);
        assert!(dev.pci().rom_range().is_none());
    }

    #[test]
    fn rom_bar_is_sized_to_next_power_of_two() {
        let cfg = Gf3Config {
            rom: Some(vec![0x55, 0xAA, 0x40]),
            ..Gf3Config::default()
        };
        let mut dev = GeForce3::realize(cfg).unwrap();
        dev.config_write(0x30, 4, 0xFFFF_F800);
        assert_eq!(dev.config_read(0x30, 4) & 0xFFFF_F800, 0xFFFF_F800);
        assert_eq!(dev.rom_read_u8(0), 0x55);
        assert_eq!(dev.rom_read_u8(1), 0xAA);
        assert_eq!(dev.rom_read_u8(3), 0xFF);
    }

    #[test]
    fn enabling_a_mode_clears_vram_and_notifies_sink() {
        let mut dev = dev();
        let sink = RecordingSink::new();
        dev.attach_console_sink(Box::new(sink.clone()));
        dev.vram_mut()[0] = 0xAB;

        set_mode(&mut dev, 800, 600, 32, VbeEnable::ENABLED | VbeEnable::LFB_ENABLED);
        assert_eq!(dev.vram()[0], 0);
        let events = sink.take();
        assert!(matches!(events[0], SinkEvent::ModeChanged(m) if m.width == 800 && m.bpp == 32));
        assert_eq!(events[1], SinkEvent::Invalidate);

        vbe_write(&mut dev, VBE_DISPI_INDEX_ENABLE, 0);
        assert_eq!(sink.take(), vec![SinkEvent::RestoreLegacy]);
    }

    #[test]
    fn noclearmem_preserves_vram() {
        let mut dev = dev();
        dev.vram_mut()[16] = 0x5A;
        set_mode(
            &mut dev,
            640,
            480,
            16,
            VbeEnable::ENABLED | VbeEnable::LFB_ENABLED | VbeEnable::NOCLEARMEM,
        );
        assert_eq!(dev.vram()[16], 0x5A);
        assert_eq!(dev.lfb_read_u8(16), Some(0x5A));
    }

    #[test]
    fn legacy_window_follows_vbe_bank() {
        let mut dev = dev();
        assert_eq!(dev.legacy_mem_read(0), 0xFF);

        set_mode(&mut dev, 1024, 768, 32, VbeEnable::ENABLED);
        assert_eq!(dev.lfb_read_u8(0), None);
        dev.legacy_mem_write(0x10, 0x77);
        assert_eq!(dev.vram()[0x10], 0x77);
        assert_eq!(dev.legacy_mem_read(0x10), 0x77);
        assert_eq!(dev.legacy_mem_read(0x1_0000), 0xFF);
    }

    #[test]
    fn reset_returns_vbe_to_legacy() {
        let mut dev = dev();
        let sink = RecordingSink::new();
        dev.attach_console_sink(Box::new(sink.clone()));
        set_mode(&mut dev, 640, 480, 8, VbeEnable::ENABLED);
        sink.take();

        dev.write(Aperture::Bar0, 0x140, 4, 1);
        dev.reset();
        assert!(!dev.vbe().enabled());
        assert_eq!(dev.regs().intr_en(), 0);
        assert_eq!(sink.take(), vec![SinkEvent::RestoreLegacy]);
    }

    #[test]
    fn late_sink_sees_active_mode() {
        let mut dev = dev();
        set_mode(&mut dev, 640, 480, 8, VbeEnable::ENABLED);
        let sink = RecordingSink::new();
        dev.attach_console_sink(Box::new(sink.clone()));
        let events = sink.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SinkEvent::ModeChanged(_)));
    }

    #[test]
    fn resize_ignores_sizes_outside_edid_limits() {
        let mut dev = dev();
        let before = dev.edid().as_bytes().to_vec();
        dev.resize_display(0, 1080);
        assert_eq!(dev.edid().as_bytes(), &before[..]);
        dev.resize_display(1024, 300_000_000);
        dev.resize_display(u32::MAX, 768);
        assert_eq!(dev.edid().as_bytes(), &before[..]);
        assert!(gf3_edid::checksums_valid(dev.ddc().edid()));
        dev.resize_display(1280, 1024);
        assert_eq!(dev.edid().preferred_resolution(), Some((1280, 1024)));
        assert_eq!(dev.ddc().edid(), dev.edid().as_bytes());
    }

    #[test]
    fn ddc_data_writes_during_a_read_are_dropped() {
        let mut dev = dev();
        let data = u64::from(crate::mmio::DDC_WINDOW_START + crate::mmio::DDC_REG_DATA);
        dev.write(Aperture::Crtc, data, 1, 0xA1);
        for _ in 0..3 {
            dev.read(Aperture::Crtc, data, 1);
        }
        dev.write(Aperture::Crtc, data, 1, 0x55);
        assert_eq!(dev.ddc().cursor(), 3);
        let next = dev.read(Aperture::Crtc, data, 1);
        assert_eq!(next, u64::from(dev.edid().as_bytes()[3]));
    }

    #[test]
    fn wide_accesses_are_split() {
        let mut dev = dev();
        dev.write(Aperture::Bar0, 0x200, 8, 0x1122_3344_5566_7788);
        assert_eq!(dev.read(Aperture::Bar0, 0x200, 4), 0x5566_7788);
        assert_eq!(dev.read(Aperture::Bar0, 0x204, 4), 0x1122_3344);
        assert_eq!(dev.read(Aperture::Bar0, 0x200, 8), 0x1122_3344_5566_7788);
    }

    #[test]
    fn crtc_storage_round_trips() {
        let mut dev = dev();
        dev.write(Aperture::Crtc, 0x10, 4, 0xDEAD_BEEF);
        assert_eq!(dev.read(Aperture::Crtc, 0x10, 4), 0xDEAD_BEEF);
        assert_eq!(dev.read(Aperture::Crtc, 0x12, 1), 0xAD);
        dev.write(Aperture::Crtc, 0x00, 4, 0);
        assert_eq!(dev.read(Aperture::Crtc, 0x00, 4), 0x01);
        // Last stored register does not spill into the DDC window.
        dev.write(Aperture::Crtc, 0x4C, 4, 0xFFFF_FFFF);
        assert_eq!(dev.read(Aperture::Crtc, 0x4C, 4), 0xFFFF_FFFF);
    }

    #[test]
    fn unimplemented_blocks_read_zero() {
        let mut dev = dev();
        dev.write(Aperture::Bar0, 0x40_0100, 4, 0x1234);
        assert_eq!(dev.read(Aperture::Bar0, 0x40_0100, 4), 0);
        assert_eq!(dev.read(Aperture::Crtc, 0x800, 4), 0);
        assert_eq!(dev.port_read(0x80, 1), 0);
        assert_eq!(dev.port_read(0x3C0, 1), 0xFF);
    }
}
