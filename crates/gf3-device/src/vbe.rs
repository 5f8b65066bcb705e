//! Bochs-compatible VBE DISPI mode controller.
//!
//! Guests program a mode through the index/data port pair at 0x1CE/0x1CF: XRES, YRES and BPP
//! (optionally VIRT_WIDTH/VIRT_HEIGHT and the panning offsets), then write ENABLE. The mode is
//! validated against the framebuffer at enable time; any invalid combination drops the
//! controller back to the safe 640x480x8 mode with ENABLE cleared.

use bitflags::bitflags;
use tracing::{debug, warn};

/// Bochs VBE ("VBE_DISPI") index register port.
pub const VBE_DISPI_INDEX_PORT: u16 = 0x01CE;
/// Bochs VBE ("VBE_DISPI") data register port.
pub const VBE_DISPI_DATA_PORT: u16 = 0x01CF;

pub const VBE_DISPI_ID5: u16 = 0xB0C5;

pub const VBE_DISPI_INDEX_ID: u16 = 0x0000;
pub const VBE_DISPI_INDEX_XRES: u16 = 0x0001;
pub const VBE_DISPI_INDEX_YRES: u16 = 0x0002;
pub const VBE_DISPI_INDEX_BPP: u16 = 0x0003;
pub const VBE_DISPI_INDEX_ENABLE: u16 = 0x0004;
pub const VBE_DISPI_INDEX_BANK: u16 = 0x0005;
pub const VBE_DISPI_INDEX_VIRT_WIDTH: u16 = 0x0006;
pub const VBE_DISPI_INDEX_VIRT_HEIGHT: u16 = 0x0007;
pub const VBE_DISPI_INDEX_X_OFFSET: u16 = 0x0008;
pub const VBE_DISPI_INDEX_Y_OFFSET: u16 = 0x0009;
pub const VBE_DISPI_INDEX_VIDEO_MEMORY_64K: u16 = 0x000A;

pub const VBE_DISPI_MIN_XRES: u16 = 64;
pub const VBE_DISPI_MAX_XRES: u16 = 2048;
pub const VBE_DISPI_MIN_YRES: u16 = 64;
pub const VBE_DISPI_MAX_YRES: u16 = 1536;
pub const VBE_DISPI_MAX_BPP: u16 = 32;

/// Size of the banked window at 0xA0000.
pub const VBE_BANK_SIZE: usize = 64 * 1024;

const SAFE_XRES: u16 = 640;
const SAFE_YRES: u16 = 480;
const SAFE_BPP: u16 = 8;

bitflags! {
    /// Bits of the ENABLE register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VbeEnable: u16 {
        const ENABLED = 0x01;
        const GETCAPS = 0x02;
        const DAC_8BIT = 0x20;
        const LFB_ENABLED = 0x40;
        const NOCLEARMEM = 0x80;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VbeRegs {
    pub xres: u16,
    pub yres: u16,
    pub bpp: u16,
    pub enable: u16,
    pub bank: u16,
    pub virt_width: u16,
    pub virt_height: u16,
    pub x_offset: u16,
    pub y_offset: u16,
}

impl VbeRegs {
    fn safe_default() -> Self {
        Self {
            xres: SAFE_XRES,
            yres: SAFE_YRES,
            bpp: SAFE_BPP,
            enable: 0,
            bank: 0,
            virt_width: SAFE_XRES,
            virt_height: SAFE_YRES,
            x_offset: 0,
            y_offset: 0,
        }
    }

    fn flags(self) -> VbeEnable {
        VbeEnable::from_bits_retain(self.enable)
    }

    fn enabled(self) -> bool {
        self.flags().contains(VbeEnable::ENABLED)
    }

    fn lfb_enabled(self) -> bool {
        self.flags().contains(VbeEnable::LFB_ENABLED)
    }

    fn effective_virt_width(self) -> u16 {
        if self.virt_width != 0 {
            self.virt_width
        } else {
            self.xres
        }
    }

    fn effective_virt_height(self) -> u16 {
        if self.virt_height != 0 {
            self.virt_height
        } else {
            self.yres
        }
    }
}

/// Bytes per pixel for a BPP value, rounded up (15 bpp occupies 2 bytes).
pub fn bytes_per_pixel(bpp: u16) -> u32 {
    u32::from(bpp).div_ceil(8)
}

/// Geometry of the active mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbeMode {
    pub width: u16,
    pub height: u16,
    pub bpp: u16,
    pub virt_width: u16,
    pub virt_height: u16,
    /// Bytes per scan line, aligned to 4.
    pub line_pitch: u32,
    /// Byte offset of the first displayed pixel.
    pub display_start: u32,
    pub lfb: bool,
}

/// Side effects of a data-port write the device has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    /// A mode was validated and activated.
    Enabled { mode: VbeMode, clear_framebuffer: bool },
    /// An enable attempt failed; the controller fell back to the safe mode and is disabled.
    Rejected,
    /// The guest disabled the controller; legacy VGA scanout takes over again.
    Disabled,
    /// Bank or panning offsets changed while enabled.
    Panned { display_start: u32, bank_offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeError {
    Resolution,
    Depth,
    VirtualTooSmall,
    OffsetOutOfBounds,
    FramebufferTooSmall,
}

pub struct VbeController {
    index: u16,
    regs: VbeRegs,
    framebuffer_size: usize,
    line_pitch: u32,
    display_start: u32,
    bank_offset: u32,
}

impl VbeController {
    pub fn new(framebuffer_size: usize) -> Self {
        let mut vbe = Self {
            index: 0,
            regs: VbeRegs::safe_default(),
            framebuffer_size,
            line_pitch: 0,
            display_start: 0,
            bank_offset: 0,
        };
        vbe.fall_back_to_safe_mode();
        vbe
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.fall_back_to_safe_mode();
    }

    pub fn regs(&self) -> VbeRegs {
        self.regs
    }

    pub fn framebuffer_size(&self) -> usize {
        self.framebuffer_size
    }

    pub fn enabled(&self) -> bool {
        self.regs.enabled()
    }

    pub fn lfb_active(&self) -> bool {
        self.regs.enabled() && self.regs.lfb_enabled()
    }

    pub fn line_pitch(&self) -> u32 {
        self.line_pitch
    }

    pub fn display_start(&self) -> u32 {
        self.display_start
    }

    pub fn bank_offset(&self) -> u32 {
        self.bank_offset
    }

    /// The active mode, if enabled.
    pub fn mode(&self) -> Option<VbeMode> {
        self.enabled().then(|| self.current_mode())
    }

    fn current_mode(&self) -> VbeMode {
        VbeMode {
            width: self.regs.xres,
            height: self.regs.yres,
            bpp: self.regs.bpp,
            virt_width: self.regs.effective_virt_width(),
            virt_height: self.regs.effective_virt_height(),
            line_pitch: self.line_pitch,
            display_start: self.display_start,
            lfb: self.regs.lfb_enabled(),
        }
    }

    pub fn read_index(&self) -> u16 {
        self.index
    }

    pub fn write_index(&mut self, index: u16) {
        self.index = index;
    }

    pub fn read_data(&self) -> u16 {
        let caps = self.regs.flags().contains(VbeEnable::GETCAPS);
        match self.index {
            VBE_DISPI_INDEX_ID => VBE_DISPI_ID5,
            VBE_DISPI_INDEX_XRES if caps => VBE_DISPI_MAX_XRES,
            VBE_DISPI_INDEX_YRES if caps => VBE_DISPI_MAX_YRES,
            VBE_DISPI_INDEX_BPP if caps => VBE_DISPI_MAX_BPP,
            VBE_DISPI_INDEX_XRES => self.regs.xres,
            VBE_DISPI_INDEX_YRES => self.regs.yres,
            VBE_DISPI_INDEX_BPP => self.regs.bpp,
            VBE_DISPI_INDEX_ENABLE => self.regs.enable,
            VBE_DISPI_INDEX_BANK => self.regs.bank,
            VBE_DISPI_INDEX_VIRT_WIDTH => self.regs.virt_width,
            VBE_DISPI_INDEX_VIRT_HEIGHT => self.regs.virt_height,
            VBE_DISPI_INDEX_X_OFFSET => self.regs.x_offset,
            VBE_DISPI_INDEX_Y_OFFSET => self.regs.y_offset,
            VBE_DISPI_INDEX_VIDEO_MEMORY_64K => {
                u16::try_from(self.framebuffer_size / VBE_BANK_SIZE).unwrap_or(u16::MAX)
            }
            _ => 0,
        }
    }

    pub fn write_data(&mut self, value: u16) -> Option<ModeChange> {
        let enabled = self.enabled();
        match self.index {
            VBE_DISPI_INDEX_ENABLE => return self.write_enable(value),
            VBE_DISPI_INDEX_BANK => return self.write_bank(value),
            VBE_DISPI_INDEX_X_OFFSET | VBE_DISPI_INDEX_Y_OFFSET => {
                return self.write_offset(self.index, value)
            }
            VBE_DISPI_INDEX_XRES
            | VBE_DISPI_INDEX_YRES
            | VBE_DISPI_INDEX_BPP
            | VBE_DISPI_INDEX_VIRT_WIDTH
            | VBE_DISPI_INDEX_VIRT_HEIGHT
                if enabled =>
            {
                warn!(
                    index = self.index,
                    value, "VBE: geometry register written while enabled, ignored"
                );
            }
            VBE_DISPI_INDEX_XRES => {
                self.regs.xres = value;
                self.regs.virt_width = 0;
                self.regs.x_offset = 0;
            }
            VBE_DISPI_INDEX_YRES => {
                self.regs.yres = value;
                self.regs.virt_height = 0;
                self.regs.y_offset = 0;
            }
            VBE_DISPI_INDEX_BPP => self.regs.bpp = value,
            VBE_DISPI_INDEX_VIRT_WIDTH => self.regs.virt_width = value,
            VBE_DISPI_INDEX_VIRT_HEIGHT => self.regs.virt_height = value,
            // ID and VIDEO_MEMORY_64K are read-only.
            _ => {}
        }
        None
    }

    fn write_enable(&mut self, value: u16) -> Option<ModeChange> {
        let was_enabled = self.enabled();
        let flags = VbeEnable::from_bits_retain(value);

        if !flags.contains(VbeEnable::ENABLED) {
            self.regs.enable = value;
            if was_enabled {
                debug!("VBE disabled");
                return Some(ModeChange::Disabled);
            }
            return None;
        }

        match self.validate() {
            Ok(()) => {
                self.regs.enable = value;
                self.apply_mode();
                let mode = self.current_mode();
                debug!(
                    width = mode.width,
                    height = mode.height,
                    bpp = mode.bpp,
                    pitch = mode.line_pitch,
                    lfb = mode.lfb,
                    "VBE mode set"
                );
                Some(ModeChange::Enabled {
                    mode,
                    clear_framebuffer: !flags.contains(VbeEnable::NOCLEARMEM),
                })
            }
            Err(err) => {
                warn!(
                    xres = self.regs.xres,
                    yres = self.regs.yres,
                    bpp = self.regs.bpp,
                    virt_width = self.regs.virt_width,
                    virt_height = self.regs.virt_height,
                    framebuffer_size = self.framebuffer_size,
                    error = ?err,
                    "VBE: invalid mode, falling back to 640x480x8"
                );
                self.fall_back_to_safe_mode();
                Some(ModeChange::Rejected)
            }
        }
    }

    fn validate(&self) -> Result<(), ModeError> {
        let r = self.regs;
        if !(VBE_DISPI_MIN_XRES..=VBE_DISPI_MAX_XRES).contains(&r.xres)
            || !(VBE_DISPI_MIN_YRES..=VBE_DISPI_MAX_YRES).contains(&r.yres)
        {
            return Err(ModeError::Resolution);
        }
        if !matches!(r.bpp, 8 | 15 | 16 | 24 | 32) {
            return Err(ModeError::Depth);
        }

        let virt_w = r.effective_virt_width();
        let virt_h = r.effective_virt_height();
        if virt_w < r.xres || virt_h < r.yres {
            return Err(ModeError::VirtualTooSmall);
        }
        if u32::from(r.x_offset) + u32::from(r.xres) > u32::from(virt_w)
            || u32::from(r.y_offset) + u32::from(r.yres) > u32::from(virt_h)
        {
            return Err(ModeError::OffsetOutOfBounds);
        }

        let required = u64::from(virt_w) * u64::from(virt_h) * u64::from(bytes_per_pixel(r.bpp));
        if required > self.framebuffer_size as u64 {
            return Err(ModeError::FramebufferTooSmall);
        }
        Ok(())
    }

    fn apply_mode(&mut self) {
        self.regs.virt_width = self.regs.effective_virt_width();
        self.regs.virt_height = self.regs.effective_virt_height();
        let bpp = bytes_per_pixel(self.regs.bpp);
        self.line_pitch = (u32::from(self.regs.virt_width) * bpp + 3) & !3;
        if self.bank_start(self.regs.bank).is_none() {
            self.regs.bank = 0;
        }
        self.bank_offset = u32::from(self.regs.bank) * VBE_BANK_SIZE as u32;
        self.display_start = self.compute_display_start(self.regs.x_offset, self.regs.y_offset);
    }

    fn fall_back_to_safe_mode(&mut self) {
        self.regs = VbeRegs::safe_default();
        self.line_pitch = u32::from(SAFE_XRES);
        self.display_start = 0;
        self.bank_offset = 0;
    }

    fn compute_display_start(&self, x_offset: u16, y_offset: u16) -> u32 {
        u32::from(y_offset) * self.line_pitch + u32::from(x_offset) * bytes_per_pixel(self.regs.bpp)
    }

    fn bank_start(&self, bank: u16) -> Option<u32> {
        let start = usize::from(bank) * VBE_BANK_SIZE;
        (start < self.framebuffer_size).then_some(start as u32)
    }

    fn write_bank(&mut self, value: u16) -> Option<ModeChange> {
        if !self.enabled() {
            self.regs.bank = value;
            return None;
        }
        let Some(start) = self.bank_start(value) else {
            warn!(bank = value, "VBE: bank outside framebuffer, ignored");
            return None;
        };
        self.regs.bank = value;
        self.bank_offset = start;
        Some(ModeChange::Panned {
            display_start: self.display_start,
            bank_offset: self.bank_offset,
        })
    }

    fn write_offset(&mut self, index: u16, value: u16) -> Option<ModeChange> {
        let (x, y) = if index == VBE_DISPI_INDEX_X_OFFSET {
            (value, self.regs.y_offset)
        } else {
            (self.regs.x_offset, value)
        };
        if !self.enabled() {
            self.regs.x_offset = x;
            self.regs.y_offset = y;
            return None;
        }

        let fits = u32::from(x) + u32::from(self.regs.xres) <= u32::from(self.regs.virt_width)
            && u32::from(y) + u32::from(self.regs.yres) <= u32::from(self.regs.virt_height);
        if !fits {
            warn!(x_offset = x, y_offset = y, "VBE: pan outside virtual screen, ignored");
            return None;
        }
        self.regs.x_offset = x;
        self.regs.y_offset = y;
        self.display_start = self.compute_display_start(x, y);
        Some(ModeChange::Panned {
            display_start: self.display_start,
            bank_offset: self.bank_offset,
        })
    }

    /// Maps a linear framebuffer offset to a framebuffer byte offset.
    pub fn translate_lfb(&self, offset: u64) -> Option<usize> {
        if !self.lfb_active() || offset >= self.framebuffer_size as u64 {
            return None;
        }
        usize::try_from(offset).ok()
    }

    /// Maps an offset inside the 64 KiB banked window to a framebuffer byte offset.
    pub fn translate_bank_window(&self, offset: u32) -> Option<usize> {
        if !self.enabled() || offset as usize >= VBE_BANK_SIZE {
            return None;
        }
        let fb = self.bank_offset as usize + offset as usize;
        (fb < self.framebuffer_size).then_some(fb)
    }

    /// Restores registers from a snapshot, re-deriving pitch and offsets.
    pub fn restore(&mut self, index: u16, regs: VbeRegs) {
        self.index = index;
        self.regs = regs;
        if !regs.enabled() {
            let bpp = bytes_per_pixel(regs.bpp.max(8));
            self.line_pitch = (u32::from(regs.effective_virt_width()) * bpp + 3) & !3;
            self.display_start = 0;
            self.bank_offset = 0;
            return;
        }
        if self.validate().is_ok() {
            self.apply_mode();
        } else {
            warn!("VBE: restored mode is invalid, falling back to 640x480x8");
            self.fall_back_to_safe_mode();
        }
    }
}
