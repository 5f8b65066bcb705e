use std::cell::RefCell;
use std::rc::Rc;

use gf3_device::regs::{NV_PBUS_PCI_NV_1, NV_PMC_BOOT_0, NV_PMC_INTR_0, NV_PMC_INTR_EN_0};
use gf3_device::{
    Aperture, DisplayAdapter, GeForce3, Gf3Config, Gf3CrtcMmioHandler, Gf3Model,
    Gf3RegsMmioHandler, Gf3VramMmioHandler, MmioHandler,
};
use pretty_assertions::assert_eq;

fn realize(model: Gf3Model) -> GeForce3 {
    GeForce3::realize(Gf3Config::for_model(model)).unwrap()
}

#[test]
fn boot0_identifies_each_model() {
    let expected = [
        (Gf3Model::GeForce3, 0x0220_0000),
        (Gf3Model::GeForce3Ti200, 0x0220_0010),
        (Gf3Model::GeForce3Ti500, 0x0220_0020),
        (Gf3Model::GeForce256Ddr, 0x0110_0000),
        (Gf3Model::GeForce2Mx, 0x0110_0010),
        (Gf3Model::GeForce2Gts, 0x0110_0050),
        (Gf3Model::GeForce2Ti, 0x0110_0060),
    ];
    for (model, boot0) in expected {
        let mut dev = realize(model);
        assert_eq!(
            dev.mmio_read(Aperture::Bar0, u64::from(NV_PMC_BOOT_0), 4),
            boot0,
            "{model}"
        );
        let pci_id = dev.mmio_read(Aperture::Bar0, u64::from(NV_PBUS_PCI_NV_1), 4);
        assert_eq!(pci_id, (0x10DE << 16) | u64::from(model.device_id()));
        assert_eq!(dev.config_read(0x00, 4), (u32::from(model.device_id()) << 16) | 0x10DE);
    }
}

#[test]
fn identity_registers_ignore_writes() {
    let mut dev = realize(Gf3Model::GeForce3);
    dev.mmio_write(Aperture::Bar0, 0, 4, 0xFFFF_FFFF);
    dev.mmio_write(Aperture::Bar0, u64::from(NV_PBUS_PCI_NV_1), 4, 0);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0, 4), 0x0220_0000);
    assert_eq!(
        dev.mmio_read(Aperture::Bar0, u64::from(NV_PBUS_PCI_NV_1), 4),
        0x10DE_0200
    );
}

#[test]
fn intr_is_write_one_to_clear_and_drives_irq() {
    let mut dev = realize(Gf3Model::GeForce3);
    let intr = u64::from(NV_PMC_INTR_0);
    let intr_en = u64::from(NV_PMC_INTR_EN_0);

    dev.raise_interrupt(0x0100_1001);
    assert_eq!(dev.mmio_read(Aperture::Bar0, intr, 4), 0x0100_1001);
    assert!(!dev.irq_level());

    dev.mmio_write(Aperture::Bar0, intr_en, 4, 0x1);
    assert!(dev.irq_level());

    // Writing zero changes nothing.
    dev.mmio_write(Aperture::Bar0, intr, 4, 0);
    assert_eq!(dev.mmio_read(Aperture::Bar0, intr, 4), 0x0100_1001);

    dev.mmio_write(Aperture::Bar0, intr, 4, 0x1);
    assert_eq!(dev.mmio_read(Aperture::Bar0, intr, 4), 0x0100_1000);
    assert!(!dev.irq_level());

    dev.mmio_write(Aperture::Bar0, intr, 4, 0xFFFF_FFFF);
    assert_eq!(dev.mmio_read(Aperture::Bar0, intr, 4), 0);
}

#[test]
fn prmvio_sub_word_writes_merge() {
    let mut dev = realize(Gf3Model::GeForce3);
    dev.mmio_write(Aperture::Bar0, 0x3C0, 4, 0x1122_3344);
    dev.mmio_write(Aperture::Bar0, 0x3C1, 1, 0xAA);
    dev.mmio_write(Aperture::Bar0, 0x3C2, 2, 0xBBCC);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x3C0, 4), 0xBBCC_AA44);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x3C3, 1), 0xBB);

    // Unaligned dword spanning two PRMVIO words.
    dev.mmio_write(Aperture::Bar0, 0x3D6, 4, 0x5566_7788);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x3D4, 4), 0x7788_0000);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x3D8, 2), 0x5566);
}

#[test]
fn unimplemented_blocks_are_silent_and_zero() {
    let mut dev = realize(Gf3Model::GeForce3);
    for offset in [0x9000, 0x10_1000, 0x40_0000, 0x60_0000, 0x68_0000, 0xFF_FFFC] {
        dev.mmio_write(Aperture::Bar0, offset, 4, 0xDEAD_BEEF);
        assert_eq!(dev.mmio_read(Aperture::Bar0, offset, 4), 0, "{offset:#x}");
    }
    // Repeated polling within a second goes through the throttle without side effects.
    for _ in 0..1000 {
        assert_eq!(dev.mmio_read(Aperture::Bar0, 0x40_0700, 4), 0);
    }
    dev.tick(2_000_000_000);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x40_0700, 4), 0);
    assert_eq!(dev.now_ns(), 2_000_000_000);
}

#[test]
fn crtc_status_and_ddc_reserved() {
    let mut dev = realize(Gf3Model::GeForce3);
    assert_eq!(dev.mmio_read(Aperture::Crtc, 0x00, 4), 0x01);
    assert_eq!(dev.mmio_read(Aperture::Crtc, 0x58, 4), 0);
    assert_eq!(dev.mmio_read(Aperture::Crtc, 0x5C, 4), 0xFF);
    assert_eq!(dev.mmio_read(Aperture::Crtc, 0x5F, 1), 0xFF);
}

#[test]
fn bus_adapters_share_one_device() {
    let dev = Rc::new(RefCell::new(realize(Gf3Model::GeForce3Ti500)));
    let mut regs = Gf3RegsMmioHandler { dev: dev.clone() };
    let mut crtc = Gf3CrtcMmioHandler { dev: dev.clone() };
    let mut vram = Gf3VramMmioHandler { dev: dev.clone() };

    assert_eq!(regs.read(0, 4), 0x0220_0020);
    regs.write(0x140, 4, 0x3);
    assert_eq!(dev.borrow().regs().intr_en(), 0x3);

    crtc.write(0x08, 2, 0xBEEF);
    assert_eq!(crtc.read(0x08, 2), 0xBEEF);

    vram.write(0x100, 8, 0x0102_0304_0506_0708);
    assert_eq!(vram.read(0x104, 4), 0x0102_0304);
    assert_eq!(dev.borrow().vram()[0x100], 0x08);

    // Past the end of VRAM: reads zero, writes dropped.
    let end = dev.borrow().vram().len() as u64;
    vram.write(end, 4, 0xFFFF_FFFF);
    assert_eq!(vram.read(end - 2, 4), 0);
}

#[test]
fn reset_clears_registers_but_keeps_identity() {
    let mut dev = realize(Gf3Model::GeForce2Gts);
    dev.mmio_write(Aperture::Bar0, 0x140, 4, 0xFFFF_FFFF);
    dev.mmio_write(Aperture::Bar0, 0x800, 4, 0x1234);
    dev.mmio_write(Aperture::Crtc, 0x10, 1, 0x55);
    DisplayAdapter::reset(&mut dev);

    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x140, 4), 0);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0x800, 4), 0);
    assert_eq!(dev.mmio_read(Aperture::Crtc, 0x10, 1), 0);
    assert_eq!(dev.mmio_read(Aperture::Bar0, 0, 4), 0x0110_0050);
}
