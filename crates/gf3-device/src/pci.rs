//! Type 0 PCI configuration space for the adapter.

pub const PCI_CONFIG_SPACE_SIZE: usize = 256;

pub const NVIDIA_VENDOR_ID: u16 = 0x10DE;

pub const PCI_CLASS_DISPLAY: u8 = 0x03;
pub const PCI_SUBCLASS_DISPLAY_VGA: u8 = 0x00;

/// Interrupt pin INTA#.
pub const PCI_INTERRUPT_PIN_INTA: u8 = 0x01;

const EXPANSION_ROM_OFFSET: usize = 0x30;
const ROM_ENABLE: u32 = 0x1;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciVendorDeviceId {
    pub vendor_id: u16,
    pub device_id: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciSubsystemIds {
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciClassCode {
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision_id: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciBarDefinition {
    pub size: u32,
    pub prefetchable: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciBarRange {
    pub base: u64,
    pub size: u64,
}

impl PciBarRange {
    pub fn end_exclusive(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.base..self.end_exclusive()).contains(&addr)
    }
}

#[derive(Debug, Clone, Default)]
struct PciBarState {
    def: Option<PciBarDefinition>,
    base: u32,
    probe: bool,
}

/// PCI configuration space for a Type 0 header with 32-bit memory BARs and an optional
/// expansion ROM BAR.
///
/// Supports the standard size probe (write `0xFFFF_FFFF`, read back the size mask) and keeps
/// identity, class and interrupt-pin bytes read-only to the guest.
pub struct PciConfigSpace {
    bytes: [u8; PCI_CONFIG_SPACE_SIZE],
    bars: [PciBarState; 6],
    rom: PciBarState,
}

impl PciConfigSpace {
    pub const INTERRUPT_LINE_OFFSET: u16 = 0x3C;
    pub const INTERRUPT_PIN_OFFSET: u16 = 0x3D;

    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        let mut bytes = [0u8; PCI_CONFIG_SPACE_SIZE];
        bytes[0x00..0x02].copy_from_slice(&vendor_id.to_le_bytes());
        bytes[0x02..0x04].copy_from_slice(&device_id.to_le_bytes());
        Self {
            bytes,
            bars: Default::default(),
            rom: PciBarState::default(),
        }
    }

    pub fn vendor_device_id(&self) -> PciVendorDeviceId {
        PciVendorDeviceId {
            vendor_id: u16::from_le_bytes([self.bytes[0x00], self.bytes[0x01]]),
            device_id: u16::from_le_bytes([self.bytes[0x02], self.bytes[0x03]]),
        }
    }

    pub fn class_code(&self) -> PciClassCode {
        PciClassCode {
            revision_id: self.bytes[0x08],
            prog_if: self.bytes[0x09],
            subclass: self.bytes[0x0a],
            class: self.bytes[0x0b],
        }
    }

    pub fn set_class_code(&mut self, class: u8, subclass: u8, prog_if: u8, revision_id: u8) {
        self.bytes[0x08] = revision_id;
        self.bytes[0x09] = prog_if;
        self.bytes[0x0a] = subclass;
        self.bytes[0x0b] = class;
    }

    pub fn subsystem_ids(&self) -> PciSubsystemIds {
        PciSubsystemIds {
            subsystem_vendor_id: u16::from_le_bytes([self.bytes[0x2c], self.bytes[0x2d]]),
            subsystem_id: u16::from_le_bytes([self.bytes[0x2e], self.bytes[0x2f]]),
        }
    }

    pub fn set_subsystem_ids(&mut self, ids: PciSubsystemIds) {
        self.bytes[0x2c..0x2e].copy_from_slice(&ids.subsystem_vendor_id.to_le_bytes());
        self.bytes[0x2e..0x30].copy_from_slice(&ids.subsystem_id.to_le_bytes());
    }

    pub fn command(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x04], self.bytes[0x05]])
    }

    pub fn set_command(&mut self, command: u16) {
        self.bytes[0x04..0x06].copy_from_slice(&command.to_le_bytes());
    }

    pub fn interrupt_pin(&self) -> u8 {
        self.bytes[usize::from(Self::INTERRUPT_PIN_OFFSET)]
    }

    pub fn set_interrupt_pin(&mut self, pin: u8) {
        // Read-only to the guest; device code sets it directly.
        self.bytes[usize::from(Self::INTERRUPT_PIN_OFFSET)] = pin;
    }

    pub fn set_bar_definition(&mut self, index: u8, def: PciBarDefinition) {
        let index = usize::from(index);
        assert!(index < self.bars.len());
        assert!(
            def.size.is_power_of_two(),
            "PCI MMIO32 BAR size must be a power of two"
        );
        assert!(def.size >= 0x10, "PCI MMIO BAR size must be at least 16 bytes");

        self.bars[index] = PciBarState {
            def: Some(def),
            base: 0,
            probe: false,
        };
    }

    pub fn bar_definition(&self, index: u8) -> Option<PciBarDefinition> {
        self.bars.get(usize::from(index)).and_then(|bar| bar.def)
    }

    pub fn bar_range(&self, index: u8) -> Option<PciBarRange> {
        let bar = self.bars.get(usize::from(index))?;
        let def = bar.def?;
        Some(PciBarRange {
            base: u64::from(bar.base),
            size: u64::from(def.size),
        })
    }

    pub fn set_bar_base(&mut self, index: u8, base: u32) {
        let Some(bar) = self.bars.get_mut(usize::from(index)) else {
            return;
        };
        if let Some(def) = bar.def {
            bar.base = base & bar_mask(def.size);
            bar.probe = false;
        }
    }

    /// Declares an expansion ROM of `size` bytes (rounded up to a power of two, minimum 2 KiB).
    pub fn set_rom_size(&mut self, size: u32) {
        let size = size.max(0x800).checked_next_power_of_two().unwrap_or(0x8000_0000);
        self.rom = PciBarState {
            def: Some(PciBarDefinition {
                size,
                prefetchable: false,
            }),
            base: 0,
            probe: false,
        };
    }

    pub fn rom_range(&self) -> Option<PciBarRange> {
        let def = self.rom.def?;
        Some(PciBarRange {
            base: u64::from(self.rom.base & !ROM_ENABLE),
            size: u64::from(def.size),
        })
    }

    pub fn rom_enabled(&self) -> bool {
        self.rom.def.is_some() && self.rom.base & ROM_ENABLE != 0
    }

    pub fn read(&self, offset: u16, size: usize) -> u32 {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        assert!(offset + size <= PCI_CONFIG_SPACE_SIZE);

        let register = match offset & !0x3 {
            aligned @ 0x10..=0x27 => Some(self.read_bar_register((aligned - 0x10) / 4)),
            EXPANSION_ROM_OFFSET => Some(self.read_rom_register()),
            _ => None,
        };
        if let Some(value) = register {
            let shifted = value >> ((offset & 0x3) * 8);
            return shifted & crate::regs::size_mask(size);
        }

        let mut value = 0u32;
        for i in 0..size {
            value |= (self.bytes[offset + i] as u32) << (8 * i);
        }
        value
    }

    pub fn write(&mut self, offset: u16, size: usize, value: u32) {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        assert!(offset + size <= PCI_CONFIG_SPACE_SIZE);

        if (0x10..=0x27).contains(&offset) || offset == EXPANSION_ROM_OFFSET {
            assert_eq!(offset & 0x3, 0, "BAR writes must be 32-bit aligned");
            assert_eq!(size, 4, "BAR writes must be 32-bit");
            if offset == EXPANSION_ROM_OFFSET {
                self.write_rom_register(value);
            } else {
                self.write_bar_register((offset - 0x10) / 4, value);
            }
            return;
        }

        for i in 0..size {
            let addr = offset + i;
            if is_read_only_byte(addr) {
                continue;
            }
            self.bytes[addr] = ((value >> (8 * i)) & 0xff) as u8;
        }
    }

    fn read_bar_register(&self, bar_index: usize) -> u32 {
        let bar = &self.bars[bar_index];
        let Some(def) = bar.def else {
            return 0;
        };
        let mut val = if bar.probe {
            bar_mask(def.size)
        } else {
            bar.base
        };
        if def.prefetchable {
            val |= 1 << 3;
        }
        val
    }

    fn write_bar_register(&mut self, bar_index: usize, value: u32) {
        let bar = &mut self.bars[bar_index];
        let Some(def) = bar.def else {
            return;
        };
        if value == 0xFFFF_FFFF {
            bar.probe = true;
            return;
        }
        bar.base = value & bar_mask(def.size);
        bar.probe = false;
    }

    fn read_rom_register(&self) -> u32 {
        let Some(def) = self.rom.def else {
            return 0;
        };
        if self.rom.probe {
            return !(def.size - 1) & 0xFFFF_F800;
        }
        self.rom.base
    }

    fn write_rom_register(&mut self, value: u32) {
        let Some(def) = self.rom.def else {
            return;
        };
        if value & 0xFFFF_F800 == 0xFFFF_F800 {
            self.rom.probe = true;
            return;
        }
        self.rom.base = (value & !(def.size - 1) & 0xFFFF_F800) | (value & ROM_ENABLE);
        self.rom.probe = false;
    }

    pub(crate) fn bytes(&self) -> &[u8; PCI_CONFIG_SPACE_SIZE] {
        &self.bytes
    }

    pub(crate) fn bar_bases(&self) -> [u32; 6] {
        core::array::from_fn(|i| self.bars[i].base)
    }

    pub(crate) fn rom_base(&self) -> u32 {
        self.rom.base
    }

    /// Restores guest-writable bytes and BAR bases; identity bytes are kept as constructed.
    pub(crate) fn restore(&mut self, bytes: &[u8; PCI_CONFIG_SPACE_SIZE], bars: [u32; 6], rom: u32) {
        for (addr, (dst, src)) in self.bytes.iter_mut().zip(bytes).enumerate() {
            if !is_read_only_byte(addr) {
                *dst = *src;
            }
        }
        for (index, base) in bars.into_iter().enumerate() {
            self.set_bar_base(index as u8, base);
        }
        if let Some(def) = self.rom.def {
            self.rom.base = (rom & !(def.size - 1) & 0xFFFF_F800) | (rom & ROM_ENABLE);
            self.rom.probe = false;
        }
    }
}

fn bar_mask(size: u32) -> u32 {
    !(size.saturating_sub(1)) & 0xFFFF_FFF0
}

fn is_read_only_byte(addr: usize) -> bool {
    // Vendor/device, status, revision/class, header type, BARs/ROM (handled separately),
    // subsystem ids and interrupt pin.
    addr < 0x04
        || (0x06..=0x0B).contains(&addr)
        || addr == 0x0E
        || (0x10..0x28).contains(&addr)
        || (0x2C..0x34).contains(&addr)
        || addr == usize::from(PciConfigSpace::INTERRUPT_PIN_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_probe_reports_size_mask() {
        let mut cfg = PciConfigSpace::new(NVIDIA_VENDOR_ID, 0x0200);
        cfg.set_bar_definition(
            0,
            PciBarDefinition {
                size: 16 * 1024 * 1024,
                prefetchable: false,
            },
        );
        cfg.set_bar_definition(
            1,
            PciBarDefinition {
                size: 64 * 1024 * 1024,
                prefetchable: true,
            },
        );

        cfg.write(0x10, 4, 0xFFFF_FFFF);
        assert_eq!(cfg.read(0x10, 4), 0xFF00_0000);
        cfg.write(0x14, 4, 0xFFFF_FFFF);
        assert_eq!(cfg.read(0x14, 4), 0xFC00_0008);
        // Unimplemented BAR.
        cfg.write(0x1C, 4, 0xFFFF_FFFF);
        assert_eq!(cfg.read(0x1C, 4), 0);
    }

    #[test]
    fn bar_writes_are_masked_to_bar_size_alignment() {
        let mut cfg = PciConfigSpace::new(NVIDIA_VENDOR_ID, 0x0200);
        cfg.set_bar_definition(
            2,
            PciBarDefinition {
                size: 0x1000,
                prefetchable: false,
            },
        );
        cfg.write(0x18, 4, 0x1234_5678);
        assert_eq!(cfg.bar_range(2).unwrap().base, 0x1234_5000);
        assert_eq!(cfg.read(0x18, 4), 0x1234_5000);
        assert_eq!(cfg.read(0x19, 1), 0x50);
    }

    #[test]
    fn identity_bytes_are_read_only() {
        let mut cfg = PciConfigSpace::new(NVIDIA_VENDOR_ID, 0x0200);
        cfg.set_class_code(PCI_CLASS_DISPLAY, PCI_SUBCLASS_DISPLAY_VGA, 0, 0xA1);
        cfg.set_interrupt_pin(PCI_INTERRUPT_PIN_INTA);
        cfg.write(0x00, 4, 0);
        cfg.write(0x08, 4, 0);
        cfg.write(0x3C, 4, 0x0000_000B);
        assert_eq!(cfg.read(0x00, 4), 0x0200_10DE);
        assert_eq!(cfg.class_code().class, PCI_CLASS_DISPLAY);
        assert_eq!(cfg.read(0x3C, 1), 0x0B);
        assert_eq!(cfg.interrupt_pin(), PCI_INTERRUPT_PIN_INTA);
    }

    #[test]
    fn command_register_is_writable() {
        let mut cfg = PciConfigSpace::new(NVIDIA_VENDOR_ID, 0x0200);
        cfg.write(0x04, 4, 0xFFFF_0007);
        assert_eq!(cfg.command(), 0x0007);
        assert_eq!(cfg.read(0x06, 2), 0);
    }

    #[test]
    fn rom_bar_probe_and_enable() {
        let mut cfg = PciConfigSpace::new(NVIDIA_VENDOR_ID, 0x0200);
        assert_eq!(cfg.read(0x30, 4), 0);

        cfg.set_rom_size(40 * 1024);
        cfg.write(0x30, 4, 0xFFFF_F800);
        assert_eq!(cfg.read(0x30, 4), 0xFFFF_0000);

        cfg.write(0x30, 4, 0xC000_0001);
        assert!(cfg.rom_enabled());
        assert_eq!(
            cfg.rom_range(),
            Some(PciBarRange {
                base: 0xC000_0000,
                size: 64 * 1024
            })
        );
    }
}
