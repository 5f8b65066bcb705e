/// Resolution and refresh rate requested for a detailed timing descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timing {
    pub width: u16,
    pub height: u16,
    pub refresh_hz: u16,
}

impl Timing {
    pub const fn new(width: u16, height: u16, refresh_hz: u16) -> Self {
        Self {
            width,
            height,
            refresh_hz,
        }
    }
}

/// Fully specified video timing, as stored in an 18-byte EDID DTD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailedTiming {
    /// Pixel clock in units of 10 kHz.
    pub pixel_clock_10khz: u16,
    pub h_active: u16,
    pub h_blank: u16,
    pub h_front: u16,
    pub h_sync: u16,
    pub v_active: u16,
    pub v_blank: u16,
    pub v_front: u16,
    pub v_sync: u16,
}

// Modes with well-known DMT/CEA timings.
const KNOWN_MODES: [(Timing, DetailedTiming); 10] = [
    known(640, 480, 2518, [160, 16, 96], [45, 10, 2]),
    known(800, 600, 4000, [256, 40, 128], [28, 1, 4]),
    known(1024, 768, 6500, [320, 24, 136], [38, 3, 6]),
    known(1280, 720, 7425, [370, 110, 40], [30, 5, 5]),
    known(1280, 800, 8350, [400, 72, 128], [31, 3, 6]),
    known(1280, 1024, 10800, [408, 48, 112], [42, 1, 3]),
    known(1440, 900, 10650, [464, 80, 152], [34, 3, 6]),
    known(1600, 1200, 16200, [560, 64, 192], [50, 1, 3]),
    known(1680, 1050, 14625, [560, 104, 176], [39, 3, 6]),
    known(1920, 1080, 14850, [280, 88, 44], [45, 4, 5]),
];

const fn known(
    width: u16,
    height: u16,
    pixel_clock_10khz: u16,
    h: [u16; 3],
    v: [u16; 3],
) -> (Timing, DetailedTiming) {
    (
        Timing::new(width, height, 60),
        DetailedTiming {
            pixel_clock_10khz,
            h_active: width,
            h_blank: h[0],
            h_front: h[1],
            h_sync: h[2],
            v_active: height,
            v_blank: v[0],
            v_front: v[1],
            v_sync: v[2],
        },
    )
}

impl DetailedTiming {
    /// 1024x768@60 (VESA DMT), used whenever a requested mode cannot be encoded.
    pub const FALLBACK: DetailedTiming = known(1024, 768, 6500, [320, 24, 136], [38, 3, 6]).1;

    /// Returns the timing for `mode`: a known DMT entry, or a synthesized one using standard
    /// blanking first and reduced blanking when the pixel clock would not fit.
    ///
    /// Returns `None` when the mode cannot be represented in a DTD at all.
    pub fn for_timing(mode: Timing) -> Option<Self> {
        if mode.width == 0 || mode.height == 0 || mode.refresh_hz == 0 {
            return None;
        }
        if let Some((_, dtd)) = KNOWN_MODES.iter().find(|(t, _)| *t == mode) {
            return Some(*dtd);
        }
        Self::synthesize(mode, false).or_else(|| Self::synthesize(mode, true))
    }

    fn synthesize(mode: Timing, reduced: bool) -> Option<Self> {
        let w = u32::from(mode.width);
        let h = u32::from(mode.height);

        let (h_blank, h_front, h_sync) = if reduced {
            (160, 48, 32)
        } else {
            let h_blank = align8(w * 30 / 100).max(64);
            let h_sync = align8(w * 8 / 100).max(8);
            let h_front = align8(h_blank / 4).max(8);
            (h_blank, h_front, h_sync)
        };
        let v_front = 3;
        let v_sync = 6;
        let v_blank = if reduced { h / 45 } else { h / 20 }.max(v_front + v_sync + 6);

        let total = u64::from(w + h_blank) * u64::from(h + v_blank) * u64::from(mode.refresh_hz);
        let pixel_clock_10khz = total.div_ceil(10_000);

        let timing = Self {
            pixel_clock_10khz: u16::try_from(pixel_clock_10khz).ok()?,
            h_active: mode.width,
            h_blank: u16::try_from(h_blank).ok()?,
            h_front: u16::try_from(h_front).ok()?,
            h_sync: u16::try_from(h_sync).ok()?,
            v_active: mode.height,
            v_blank: u16::try_from(v_blank).ok()?,
            v_front: v_front as u16,
            v_sync: v_sync as u16,
        };
        timing.fits_descriptor().then_some(timing)
    }

    fn fits_descriptor(&self) -> bool {
        self.pixel_clock_10khz != 0
            && self.h_active <= 0xFFF
            && self.h_blank <= 0xFFF
            && self.v_active <= 0xFFF
            && self.v_blank <= 0xFFF
            && self.h_front <= 0x3FF
            && self.h_sync <= 0x3FF
            && self.v_front <= 0x3F
            && self.v_sync <= 0x3F
            && self.h_front + self.h_sync <= self.h_blank
            && self.v_front + self.v_sync <= self.v_blank
    }

    pub fn h_total(&self) -> u32 {
        u32::from(self.h_active) + u32::from(self.h_blank)
    }

    pub fn v_total(&self) -> u32 {
        u32::from(self.v_active) + u32::from(self.v_blank)
    }

    pub fn pixel_clock_hz(&self) -> u64 {
        u64::from(self.pixel_clock_10khz) * 10_000
    }

    /// Whether the range limits descriptor (u8 Hz / kHz fields) can describe this timing.
    pub fn fits_range_limits(&self) -> bool {
        self.h_freq_khz_ceil() < 255 && self.refresh_hz() < 255.0
    }

    /// Horizontal line rate in kHz, rounded up.
    pub fn h_freq_khz_ceil(&self) -> u32 {
        let khz = self.pixel_clock_hz().div_ceil(u64::from(self.h_total()) * 1000);
        u32::try_from(khz).unwrap_or(u32::MAX)
    }

    /// Vertical refresh in Hz.
    pub fn refresh_hz(&self) -> f64 {
        self.pixel_clock_hz() as f64 / (f64::from(self.h_total()) * f64::from(self.v_total()))
    }

    /// Writes the 18-byte DTD encoding of this timing.
    pub fn encode(&self, out: &mut [u8; 18], width_mm: u32, height_mm: u32) {
        let width_mm = width_mm.min(0xFFF) as u16;
        let height_mm = height_mm.min(0xFFF) as u16;
        let hi4 = |v: u16| ((v >> 8) & 0xF) as u8;

        out[0..2].copy_from_slice(&self.pixel_clock_10khz.to_le_bytes());
        out[2] = self.h_active as u8;
        out[3] = self.h_blank as u8;
        out[4] = (hi4(self.h_active) << 4) | hi4(self.h_blank);
        out[5] = self.v_active as u8;
        out[6] = self.v_blank as u8;
        out[7] = (hi4(self.v_active) << 4) | hi4(self.v_blank);
        out[8] = self.h_front as u8;
        out[9] = self.h_sync as u8;
        out[10] = (((self.v_front & 0xF) as u8) << 4) | (self.v_sync & 0xF) as u8;
        out[11] = ((((self.h_front >> 8) & 0x3) as u8) << 6)
            | ((((self.h_sync >> 8) & 0x3) as u8) << 4)
            | ((((self.v_front >> 4) & 0x3) as u8) << 2)
            | (((self.v_sync >> 4) & 0x3) as u8);
        out[12] = width_mm as u8;
        out[13] = height_mm as u8;
        out[14] = ((hi4(width_mm)) << 4) | hi4(height_mm);
        out[15] = 0;
        out[16] = 0;
        // Digital separate sync.
        out[17] = 0x18;
    }

    /// Parses an 18-byte DTD. Returns `None` for display descriptors (pixel clock 0).
    pub fn decode(dtd: &[u8]) -> Option<Self> {
        if dtd.len() < 18 {
            return None;
        }
        let pixel_clock_10khz = u16::from_le_bytes([dtd[0], dtd[1]]);
        if pixel_clock_10khz == 0 {
            return None;
        }
        let join = |lo: u8, hi: u8| u16::from(lo) | (u16::from(hi) << 8);
        Some(Self {
            pixel_clock_10khz,
            h_active: join(dtd[2], dtd[4] >> 4),
            h_blank: join(dtd[3], dtd[4] & 0xF),
            v_active: join(dtd[5], dtd[7] >> 4),
            v_blank: join(dtd[6], dtd[7] & 0xF),
            h_front: join(dtd[8], (dtd[11] >> 6) & 0x3),
            h_sync: join(dtd[9], (dtd[11] >> 4) & 0x3),
            v_front: u16::from(dtd[10] >> 4) | (u16::from((dtd[11] >> 2) & 0x3) << 4),
            v_sync: u16::from(dtd[10] & 0xF) | (u16::from(dtd[11] & 0x3) << 4),
        })
    }
}

fn align8(v: u32) -> u32 {
    v.div_ceil(8) * 8
}
