//! EDID generation for the emulated monitor attached to the GeForce3 DDC bus.
//!
//! The generator is a pure function of [`EdidInfo`]: the same parameters always produce the same
//! bytes. Devices regenerate the whole image whenever a parameter changes (e.g. on a host display
//! resize) and swap it in, rather than patching individual fields.
//!
//! Layout follows VESA E-EDID 1.4:
//! - block 0: header, vendor/product, basic parameters, established + standard timings and four
//!   18-byte descriptors (preferred DTD, range limits, product name, serial string);
//! - block 1 (optional): a CTA-861 extension carrying a DTD for the maximum resolution.
//!
//! Every 128-byte block carries a valid checksum.
#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

mod timing;

pub use timing::{DetailedTiming, Timing};

/// Size of a single EDID block.
pub const EDID_BLOCK_SIZE: usize = 128;

/// Fixed 8-byte EDID header.
pub const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

/// Offset of the first 18-byte descriptor (the preferred detailed timing).
pub const PREFERRED_DTD_OFFSET: usize = 54;

const DESCRIPTOR_LEN: usize = 18;
const DESCRIPTOR_TAG_SERIAL: u8 = 0xFF;
const DESCRIPTOR_TAG_RANGE_LIMITS: u8 = 0xFD;
const DESCRIPTOR_TAG_PRODUCT_NAME: u8 = 0xFC;

/// Modes advertised as standard timings when they fit within the maximum resolution.
const STANDARD_TIMING_CANDIDATES: [(u32, u32); 9] = [
    (1600, 1200),
    (1680, 1050),
    (1440, 900),
    (1280, 1024),
    (1280, 800),
    (1152, 864),
    (1024, 768),
    (800, 600),
    (640, 480),
];

/// Largest width or height an EDID can describe.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Dots per inch assumed when the physical size is left as 0.
const DEFAULT_DPI: u32 = 100;

/// Errors returned when parsing a PNP vendor id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PnpIdError {
    #[error("PNP vendor id must be exactly 3 characters (got {0})")]
    Length(usize),
    #[error("PNP vendor id character {0:?} is not an ASCII uppercase letter")]
    Character(char),
}

/// Three-letter PNP manufacturer id (e.g. `NVD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PnpId([u8; 3]);

impl PnpId {
    /// NVIDIA's registered PNP id.
    pub const NVIDIA: PnpId = PnpId(*b"NVD");

    pub fn new(code: [u8; 3]) -> Result<Self, PnpIdError> {
        for ch in code {
            if !ch.is_ascii_uppercase() {
                return Err(PnpIdError::Character(ch as char));
            }
        }
        Ok(Self(code))
    }

    pub fn as_bytes(&self) -> [u8; 3] {
        self.0
    }

    /// Packs the id into the big-endian 5-bit-per-letter manufacturer field (bytes 8..10).
    pub fn encode(self) -> [u8; 2] {
        let [a, b, c] = self.0.map(|ch| u16::from(ch - b'@'));
        ((a << 10) | (b << 5) | c).to_be_bytes()
    }

    /// Inverse of [`PnpId::encode`].
    pub fn decode(bytes: [u8; 2]) -> Option<Self> {
        let packed = u16::from_be_bytes(bytes);
        let letter = |shift: u16| {
            let v = ((packed >> shift) & 0x1F) as u8;
            v.checked_add(b'@')
        };
        let code = [letter(10)?, letter(5)?, letter(0)?];
        Self::new(code).ok()
    }
}

impl FromStr for PnpId {
    type Err = PnpIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 {
            return Err(PnpIdError::Length(s.chars().count()));
        }
        Self::new([bytes[0], bytes[1], bytes[2]])
    }
}

impl fmt::Display for PnpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &ch in &self.0 {
            write!(f, "{}", ch as char)?;
        }
        Ok(())
    }
}

/// Parameters describing the emulated monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdidInfo {
    pub vendor: PnpId,
    pub product_code: u16,
    /// Product name; truncated to 13 characters in the name descriptor.
    pub name: String,
    /// Serial string; truncated to 13 characters. A purely numeric serial is also stored in the
    /// 32-bit serial number field.
    pub serial: String,
    pub pref_width: u32,
    pub pref_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Physical width in millimetres; 0 derives it from the preferred mode at 100 DPI.
    pub width_mm: u32,
    /// Physical height in millimetres; 0 derives it from the preferred mode at 100 DPI.
    pub height_mm: u32,
    pub refresh_hz: u16,
    /// Emit a 256-byte image (base block + CTA-861 extension) instead of a single block.
    pub extension_block: bool,
}

impl Default for EdidInfo {
    fn default() -> Self {
        Self {
            vendor: PnpId::NVIDIA,
            product_code: 0x0200,
            name: "GeForce3".to_string(),
            serial: "12345678".to_string(),
            pref_width: 1024,
            pref_height: 768,
            max_width: 1600,
            max_height: 1200,
            width_mm: 0,
            height_mm: 0,
            refresh_hz: 60,
            extension_block: true,
        }
    }
}

impl EdidInfo {
    /// Returns a copy with a new preferred resolution, growing the maximum to include it.
    pub fn with_preferred(&self, width: u32, height: u32) -> Self {
        Self {
            pref_width: width,
            pref_height: height,
            max_width: self.max_width.max(width),
            max_height: self.max_height.max(height),
            ..self.clone()
        }
    }

    /// Whether the preferred and maximum sizes are non-empty and no larger than
    /// [`MAX_DIMENSION`].
    pub fn dimensions_valid(&self) -> bool {
        self.pref_width != 0
            && self.pref_height != 0
            && [
                self.pref_width,
                self.pref_height,
                self.max_width,
                self.max_height,
            ]
            .into_iter()
            .all(|v| v <= MAX_DIMENSION)
    }

    /// Image size in bytes.
    pub fn image_len(&self) -> usize {
        if self.extension_block {
            2 * EDID_BLOCK_SIZE
        } else {
            EDID_BLOCK_SIZE
        }
    }

    fn physical_size_mm(&self) -> (u32, u32) {
        let derive = |px: u32| px.saturating_mul(254) / (DEFAULT_DPI * 10);
        let w = if self.width_mm != 0 {
            self.width_mm
        } else {
            derive(self.pref_width)
        };
        let h = if self.height_mm != 0 {
            self.height_mm
        } else {
            derive(self.pref_height)
        };
        (w, h)
    }
}

/// A generated EDID image together with the parameters it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdidImage {
    bytes: Vec<u8>,
    info: EdidInfo,
}

impl EdidImage {
    /// Builds the full image for `info`.
    pub fn generate(info: &EdidInfo) -> Self {
        let mut bytes = vec![0u8; info.image_len()];
        let (base, ext) = bytes.split_at_mut(EDID_BLOCK_SIZE);
        write_base_block(base, info);
        if info.extension_block {
            write_cta_block(ext, info);
        }
        Self {
            bytes,
            info: info.clone(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn info(&self) -> &EdidInfo {
        &self.info
    }

    /// Returns the 128-byte block at `index`, if present.
    pub fn block(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(EDID_BLOCK_SIZE)?;
        self.bytes.get(start..start + EDID_BLOCK_SIZE)
    }

    /// Active resolution of the preferred detailed timing (block 0, first descriptor).
    pub fn preferred_resolution(&self) -> Option<(u16, u16)> {
        let dtd = self
            .bytes
            .get(PREFERRED_DTD_OFFSET..PREFERRED_DTD_OFFSET + DESCRIPTOR_LEN)?;
        DetailedTiming::decode(dtd).map(|t| (t.h_active, t.v_active))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Returns `true` when every block of `bytes` sums to zero.
pub fn checksums_valid(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes.len() % EDID_BLOCK_SIZE == 0
        && bytes
            .chunks(EDID_BLOCK_SIZE)
            .all(|block| block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0)
}

fn write_checksum(block: &mut [u8]) {
    let sum = block[..EDID_BLOCK_SIZE - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    block[EDID_BLOCK_SIZE - 1] = 0u8.wrapping_sub(sum);
}

fn clamp_u16(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

fn preferred_timing(info: &EdidInfo) -> DetailedTiming {
    let timing = Timing::new(
        clamp_u16(info.pref_width),
        clamp_u16(info.pref_height),
        info.refresh_hz,
    );
    DetailedTiming::for_timing(timing)
        .filter(|t| info.refresh_hz <= 255 && t.fits_range_limits())
        .unwrap_or(DetailedTiming::FALLBACK)
}

fn max_timing(info: &EdidInfo) -> Option<DetailedTiming> {
    let width = info.max_width.max(info.pref_width);
    let height = info.max_height.max(info.pref_height);
    DetailedTiming::for_timing(Timing::new(
        clamp_u16(width),
        clamp_u16(height),
        info.refresh_hz,
    ))
    .filter(|t| info.refresh_hz <= 255 && t.fits_range_limits())
}

fn write_base_block(block: &mut [u8], info: &EdidInfo) {
    block[0..8].copy_from_slice(&EDID_HEADER);
    block[8..10].copy_from_slice(&info.vendor.encode());
    block[10..12].copy_from_slice(&info.product_code.to_le_bytes());
    let serial_number = info.serial.parse::<u32>().unwrap_or(0);
    block[12..16].copy_from_slice(&serial_number.to_le_bytes());
    // Week 1 of 2001.
    block[16] = 1;
    block[17] = (2001 - 1990) as u8;
    block[18] = 1;
    block[19] = 4;

    // Digital input, 8 bits per colour, DisplayPort interface.
    block[20] = 0xA5;
    let (width_mm, height_mm) = info.physical_size_mm();
    block[21] = (width_mm / 10).clamp(1, 255) as u8;
    block[22] = (height_mm / 10).clamp(1, 255) as u8;
    // Gamma 2.2.
    block[23] = 220 - 100;
    // sRGB default, preferred timing is native, continuous frequency.
    block[24] = 0x07;
    write_chromaticity(&mut block[25..35]);

    // Established timings: 640x480@60, 800x600@60, 1024x768@60.
    block[35] = 0x21;
    block[36] = 0x08;
    block[37] = 0x00;

    write_standard_timings(&mut block[38..54], info);

    let preferred = preferred_timing(info);
    let mut max_clock = preferred;
    if let Some(max) = max_timing(info) {
        if max.pixel_clock_10khz > max_clock.pixel_clock_10khz {
            max_clock = max;
        }
    }

    let mut desc = [0u8; DESCRIPTOR_LEN];
    preferred.encode(&mut desc, width_mm, height_mm);
    block[54..72].copy_from_slice(&desc);
    block[72..90].copy_from_slice(&range_limits_descriptor(
        &preferred,
        &max_clock,
        info.refresh_hz,
    ));
    block[90..108].copy_from_slice(&text_descriptor(DESCRIPTOR_TAG_PRODUCT_NAME, &info.name));
    block[108..126].copy_from_slice(&text_descriptor(DESCRIPTOR_TAG_SERIAL, &info.serial));

    block[126] = u8::from(info.extension_block);
    write_checksum(block);
}

fn write_chromaticity(out: &mut [u8]) {
    // sRGB primaries and D65 white point, as 10-bit binary fractions.
    let enc = |v: f64| (v * 1024.0).round() as u16;
    let [rx, ry, gx, gy, bx, by, wx, wy] =
        [0.640, 0.330, 0.300, 0.600, 0.150, 0.060, 0.3127, 0.3290].map(enc);
    let lo = |v: u16| (v & 0x3) as u8;
    out[0] = (lo(rx) << 6) | (lo(ry) << 4) | (lo(gx) << 2) | lo(gy);
    out[1] = (lo(bx) << 6) | (lo(by) << 4) | (lo(wx) << 2) | lo(wy);
    for (slot, v) in out[2..].iter_mut().zip([rx, ry, gx, gy, bx, by, wx, wy]) {
        *slot = (v >> 2) as u8;
    }
}

/// Encodes a standard timing entry, or `None` if the mode cannot be represented.
pub fn encode_standard_timing(width: u32, height: u32, refresh_hz: u16) -> Option<[u8; 2]> {
    if width % 8 != 0 || !(256..=2288).contains(&width) || !(60..=123).contains(&refresh_hz) {
        return None;
    }
    let (w, h) = (u64::from(width), u64::from(height));
    let aspect = if h * 16 == w * 10 {
        0
    } else if h * 4 == w * 3 {
        1
    } else if h * 5 == w * 4 {
        2
    } else if h * 16 == w * 9 {
        3
    } else {
        return None;
    };
    Some([
        (width / 8 - 31) as u8,
        (aspect << 6) | (refresh_hz - 60) as u8,
    ])
}

fn write_standard_timings(out: &mut [u8], info: &EdidInfo) {
    out.fill(0x01);
    let max_w = info.max_width.max(info.pref_width);
    let max_h = info.max_height.max(info.pref_height);

    let preferred = (info.pref_width, info.pref_height);
    let candidates = std::iter::once(preferred).chain(
        STANDARD_TIMING_CANDIDATES
            .into_iter()
            .filter(|&(w, h)| w <= max_w && h <= max_h && (w, h) != preferred),
    );

    let encoded = candidates.filter_map(|(w, h)| encode_standard_timing(w, h, info.refresh_hz));
    for (slot, bytes) in out.chunks_exact_mut(2).zip(encoded) {
        slot.copy_from_slice(&bytes);
    }
}

fn range_limits_descriptor(
    preferred: &DetailedTiming,
    fastest: &DetailedTiming,
    refresh_hz: u16,
) -> [u8; DESCRIPTOR_LEN] {
    let max_h_khz = preferred.h_freq_khz_ceil().max(fastest.h_freq_khz_ceil()) + 1;
    let max_clock_10mhz = u32::from(fastest.pixel_clock_10khz).div_ceil(1000) + 1;

    let mut desc = [0u8; DESCRIPTOR_LEN];
    desc[3] = DESCRIPTOR_TAG_RANGE_LIMITS;
    desc[5] = 50;
    desc[6] = refresh_hz.clamp(75, 255) as u8;
    desc[7] = 30;
    desc[8] = max_h_khz.clamp(31, 255) as u8;
    desc[9] = max_clock_10mhz.clamp(1, 255) as u8;
    // Range limits only, no timing formula.
    desc[10] = 0x01;
    desc[11] = 0x0A;
    desc[12..].fill(0x20);
    desc
}

fn text_descriptor(tag: u8, text: &str) -> [u8; DESCRIPTOR_LEN] {
    let mut desc = [0u8; DESCRIPTOR_LEN];
    desc[3] = tag;
    let payload = &mut desc[5..];
    payload.fill(0x20);
    let mut len = 0;
    for (slot, ch) in payload.iter_mut().zip(text.chars().take(13)) {
        *slot = if ch.is_ascii_graphic() || ch == ' ' {
            ch as u8
        } else {
            b'?'
        };
        len += 1;
    }
    if len < payload.len() {
        payload[len] = 0x0A;
    }
    desc
}

fn write_cta_block(block: &mut [u8], info: &EdidInfo) {
    block[0] = 0x02;
    block[1] = 0x03;
    // No data block collection; DTDs start right after the header.
    block[2] = 4;
    block[3] = 0x00;

    let preferred = preferred_timing(info);
    if let Some(max) = max_timing(info) {
        if (max.h_active, max.v_active) != (preferred.h_active, preferred.v_active) {
            let (width_mm, height_mm) = info.physical_size_mm();
            let mut desc = [0u8; DESCRIPTOR_LEN];
            max.encode(&mut desc, width_mm, height_mm);
            block[4..4 + DESCRIPTOR_LEN].copy_from_slice(&desc);
        }
    }
    write_checksum(block);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnp_id_packs_nvd() {
        // N=14, V=22, D=4 → 0b0_01110_10110_00100.
        assert_eq!(PnpId::NVIDIA.encode(), [0x3A, 0xC4]);
        assert_eq!(PnpId::decode([0x3A, 0xC4]), Some(PnpId::NVIDIA));
    }

    #[test]
    fn pnp_id_rejects_lowercase_and_wrong_length() {
        assert_eq!("nvd".parse::<PnpId>(), Err(PnpIdError::Character('n')));
        assert_eq!("NVDA".parse::<PnpId>(), Err(PnpIdError::Length(4)));
    }

    #[test]
    fn text_descriptor_terminates_short_strings() {
        let desc = text_descriptor(DESCRIPTOR_TAG_PRODUCT_NAME, "GeForce3");
        assert_eq!(&desc[5..13], b"GeForce3");
        assert_eq!(desc[13], 0x0A);
        assert!(desc[14..].iter().all(|&b| b == 0x20));
    }

    #[test]
    fn standard_timing_rejects_unaligned_widths() {
        assert_eq!(encode_standard_timing(1366, 768, 60), None);
        assert_eq!(encode_standard_timing(1024, 768, 60), Some([0x61, 0x40]));
        assert_eq!(encode_standard_timing(1920, 1080, 60), Some([0xD1, 0xC0]));
    }

    #[test]
    fn standard_timing_tolerates_huge_heights() {
        assert_eq!(encode_standard_timing(1024, u32::MAX, 60), None);
        assert_eq!(encode_standard_timing(2048, 300_000_000, 60), None);
    }

    #[test]
    fn oversized_modes_still_produce_a_valid_image() {
        let info = EdidInfo::default().with_preferred(1024, 300_000_000);
        assert!(!info.dimensions_valid());
        let image = EdidImage::generate(&info);
        assert_eq!(&image.as_bytes()[..8], &EDID_HEADER);
        assert!(checksums_valid(image.as_bytes()));
        assert_eq!(image.preferred_resolution(), Some((1024, 768)));
    }

    #[test]
    fn dimension_limits() {
        assert!(EdidInfo::default().dimensions_valid());
        assert!(EdidInfo::default()
            .with_preferred(MAX_DIMENSION, 1080)
            .dimensions_valid());
        assert!(!EdidInfo::default()
            .with_preferred(MAX_DIMENSION + 1, 1080)
            .dimensions_valid());
        assert!(!EdidInfo::default().with_preferred(1920, 0).dimensions_valid());
    }

    #[test]
    fn physical_size_defaults_to_100_dpi() {
        let info = EdidInfo::default();
        assert_eq!(info.physical_size_mm(), (260, 195));
    }
}
