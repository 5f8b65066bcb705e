//! GeForce3-family PCI display adapter model.
//!
//! The device exposes three register apertures (see [`mmio::Aperture`]):
//! - BAR0: the 16 MiB NV register space (`PMC_BOOT_0`, interrupt registers, PRMVIO, ...).
//! - BAR2: a 4 KiB CRTC block holding the DDC bit-bang registers at `0x50..0x60`.
//! - The Bochs VBE DISPI ports `0x1CE`/`0x1CF` and the legacy VGA ports.
//!
//! BAR1 maps VRAM directly. The monitor behind the DDC bus is an EEPROM serving an EDID image
//! generated by `gf3-edid`; it is regenerated whenever the host resizes the display.
//!
//! Everything is single-threaded and synchronous. Hosts that share the device with bus
//! handlers wrap it in `Rc<RefCell<_>>` (see the `*MmioHandler` adapters).

#![forbid(unsafe_code)]

pub mod config;
pub mod console;
pub mod ddc;
mod device;
pub mod log_throttle;
pub mod mmio;
pub mod pci;
pub mod regs;
mod snapshot;
pub mod vbe;

pub use gf3_edid as edid;

pub use config::{ConfigError, Gf3Config, Gf3Model};
pub use console::{DisplaySink, RecordingSink, SinkEvent, VgaCompat};
pub use ddc::{DdcEngine, DdcState};
pub use device::{GeForce3, BAR_CRTC, BAR_MMIO, BAR_VRAM};
pub use mmio::{
    Aperture, Gf3CrtcMmioHandler, Gf3LegacyMmioHandler, Gf3LfbMmioHandler, Gf3RegsMmioHandler,
    Gf3RomMmioHandler, Gf3VramMmioHandler, MmioHandler,
};
pub use snapshot::{Gf3Snapshot, SnapshotError};
pub use vbe::{ModeChange, VbeController, VbeEnable, VbeMode};

/// Legacy port I/O, as dispatched by the host's port bus.
pub trait PortIO {
    fn port_read(&mut self, port: u16, size: usize) -> u32;
    fn port_write(&mut self, port: u16, size: usize, val: u32);
}

/// What a host needs from a display adapter, independent of its register layout.
pub trait DisplayAdapter {
    fn reset(&mut self);
    fn mmio_read(&mut self, aperture: Aperture, offset: u64, size: usize) -> u64;
    fn mmio_write(&mut self, aperture: Aperture, offset: u64, size: usize, value: u64);
    fn attach_console_sink(&mut self, sink: Box<dyn DisplaySink>);
}

fn io_all_ones(size: usize) -> u32 {
    match size {
        0 => 0,
        1 => 0xFF,
        2 => 0xFFFF,
        _ => 0xFFFF_FFFF,
    }
}
