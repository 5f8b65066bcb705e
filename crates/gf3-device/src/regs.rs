//! NV20-style register file backing BAR0.

pub const NV_PMC_BOOT_0: u32 = 0x0000_0000;
pub const NV_PMC_INTR_0: u32 = 0x0000_0100;
pub const NV_PMC_INTR_EN_0: u32 = 0x0000_0140;
pub const NV_PBUS_PCI_NV_1: u32 = 0x0000_1804;

/// PRMVIO scratch window at the start of BAR0.
pub const NV_PRMVIO_SIZE: usize = 0x1000;
const NV_PRMVIO_WORDS: usize = NV_PRMVIO_SIZE / 4;

/// Size of the BAR0 register aperture.
pub const NV_MMIO_SIZE: u32 = 16 * 1024 * 1024;

/// Computes `PMC_BOOT_0` for an architecture/implementation pair.
pub const fn boot0(arch: u32, implementation: u32) -> u32 {
    (arch << 20) | (arch << 16) | (implementation << 4)
}

/// Named NV engine blocks inside BAR0, used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvBlock {
    Pmc,
    Pbus,
    Ptimer,
    Pextdev,
    Pgraph,
    Pcrtc,
    Pramdac,
    Unknown,
}

impl NvBlock {
    pub fn for_offset(offset: u32) -> Self {
        match offset {
            0x00_0000..=0x00_0FFF => Self::Pmc,
            0x00_1000..=0x00_1FFF => Self::Pbus,
            0x00_9000..=0x00_9FFF => Self::Ptimer,
            0x10_1000..=0x10_1FFF => Self::Pextdev,
            0x40_0000..=0x40_1FFF => Self::Pgraph,
            0x60_0000..=0x60_0FFF => Self::Pcrtc,
            0x68_0000..=0x68_0FFF => Self::Pramdac,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pmc => "PMC",
            Self::Pbus => "PBUS",
            Self::Ptimer => "PTIMER",
            Self::Pextdev => "PEXTDEV",
            Self::Pgraph => "PGRAPH",
            Self::Pcrtc => "PCRTC",
            Self::Pramdac => "PRAMDAC",
            Self::Unknown => "unknown",
        }
    }
}

pub struct NvRegisters {
    boot0: u32,
    pci_id: u32,
    intr: u32,
    intr_en: u32,
    prmvio: Box<[u32; NV_PRMVIO_WORDS]>,
}

impl NvRegisters {
    pub fn new(boot0: u32, vendor_id: u16, device_id: u16) -> Self {
        Self {
            boot0,
            pci_id: (u32::from(vendor_id) << 16) | u32::from(device_id),
            intr: 0,
            intr_en: 0,
            prmvio: Box::new([0; NV_PRMVIO_WORDS]),
        }
    }

    /// Clears interrupt state and PRMVIO. Identity registers are constant.
    pub fn reset(&mut self) {
        self.intr = 0;
        self.intr_en = 0;
        self.prmvio.fill(0);
    }

    pub fn boot0(&self) -> u32 {
        self.boot0
    }

    pub fn pci_id(&self) -> u32 {
        self.pci_id
    }

    pub fn intr(&self) -> u32 {
        self.intr
    }

    pub fn intr_en(&self) -> u32 {
        self.intr_en
    }

    /// Host-side interrupt source: latches `bits` into `PMC_INTR_0`.
    pub fn raise_interrupt(&mut self, bits: u32) {
        self.intr |= bits;
    }

    pub fn irq_level(&self) -> bool {
        self.intr & self.intr_en != 0
    }

    /// Write-1-to-clear.
    pub fn write_intr(&mut self, value: u32) {
        self.intr &= !value;
    }

    pub fn write_intr_en(&mut self, value: u32) {
        self.intr_en = value;
    }

    /// Reads `size` bytes at `offset` within PRMVIO. An access may straddle two words; bytes
    /// past the end of PRMVIO read as zero.
    pub fn prmvio_read(&self, offset: u32, size: usize) -> u32 {
        (0..size.min(4)).fold(0, |acc, i| {
            let byte = self.prmvio_byte(offset as usize + i).unwrap_or(0);
            acc | (u32::from(byte) << (i * 8))
        })
    }

    /// Writes `size` bytes at `offset` within PRMVIO, merging into the surrounding words.
    /// Bytes past the end of PRMVIO are dropped.
    pub fn prmvio_write(&mut self, offset: u32, size: usize, value: u32) {
        for i in 0..size.min(4) {
            let pos = offset as usize + i;
            let Some(slot) = self.prmvio.get_mut(pos / 4) else {
                break;
            };
            let shift = (pos % 4) * 8;
            let byte = (value >> (i * 8)) & 0xFF;
            *slot = (*slot & !(0xFF << shift)) | (byte << shift);
        }
    }

    fn prmvio_byte(&self, pos: usize) -> Option<u8> {
        let word = self.prmvio.get(pos / 4)?;
        Some((word >> ((pos % 4) * 8)) as u8)
    }

    pub(crate) fn prmvio_words(&self) -> &[u32] {
        &self.prmvio[..]
    }

    pub(crate) fn restore(&mut self, intr: u32, intr_en: u32, prmvio: &[u32]) {
        self.intr = intr;
        self.intr_en = intr_en;
        for (dst, src) in self.prmvio.iter_mut().zip(prmvio) {
            *dst = *src;
        }
    }
}

pub(crate) fn size_mask(size: usize) -> u32 {
    match size {
        1 => 0xFF,
        2 => 0xFFFF,
        _ => 0xFFFF_FFFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot0_for_geforce3_variants() {
        assert_eq!(boot0(0x20, 0), 0x0220_0000);
        assert_eq!(boot0(0x20, 1), 0x0220_0010);
        assert_eq!(boot0(0x20, 2), 0x0220_0020);
    }

    #[test]
    fn intr_is_write_one_to_clear() {
        let mut regs = NvRegisters::new(boot0(0x20, 0), 0x10DE, 0x0200);
        regs.raise_interrupt(0b1011);
        regs.write_intr(0b0010);
        assert_eq!(regs.intr(), 0b1001);
    }

    #[test]
    fn irq_level_follows_enable_mask() {
        let mut regs = NvRegisters::new(boot0(0x20, 0), 0x10DE, 0x0200);
        regs.raise_interrupt(1 << 24);
        assert!(!regs.irq_level());
        regs.write_intr_en(1 << 24);
        assert!(regs.irq_level());
        regs.write_intr(1 << 24);
        assert!(!regs.irq_level());
    }

    #[test]
    fn prmvio_byte_writes_merge_into_word() {
        let mut regs = NvRegisters::new(0, 0x10DE, 0x0200);
        regs.prmvio_write(0x3C4, 4, 0x1122_3344);
        regs.prmvio_write(0x3C5, 1, 0xAA);
        assert_eq!(regs.prmvio_read(0x3C4, 4), 0x1122_AA44);
        assert_eq!(regs.prmvio_read(0x3C6, 2), 0x1122);
    }

    #[test]
    fn prmvio_accesses_straddle_words() {
        let mut regs = NvRegisters::new(0, 0x10DE, 0x0200);
        regs.prmvio_write(0x3C6, 4, 0xAABB_CCDD);
        assert_eq!(regs.prmvio_read(0x3C4, 4), 0xCCDD_0000);
        assert_eq!(regs.prmvio_read(0x3C8, 4), 0x0000_AABB);
        assert_eq!(regs.prmvio_read(0x3C6, 4), 0xAABB_CCDD);

        regs.prmvio_write(0xFFE, 4, 0x1234_5678);
        assert_eq!(regs.prmvio_read(0xFFC, 4), 0x5678_0000);
        assert_eq!(regs.prmvio_read(0xFFE, 4), 0x0000_5678);
        assert_eq!(regs.prmvio_read(0, 4), 0);
    }

    #[test]
    fn block_names() {
        assert_eq!(NvBlock::for_offset(0x40_0100).name(), "PGRAPH");
        assert_eq!(NvBlock::for_offset(0x68_0300).name(), "PRAMDAC");
        assert_eq!(NvBlock::for_offset(0x70_0000), NvBlock::Unknown);
    }
}
