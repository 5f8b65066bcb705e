//! Host-facing collaborators: the console sink and the legacy VGA core.

use std::cell::RefCell;
use std::rc::Rc;

use crate::vbe::VbeMode;

/// First and last legacy VGA I/O ports (0x3B0..=0x3DF).
pub const VGA_PORT_FIRST: u16 = 0x03B0;
pub const VGA_PORT_LAST: u16 = 0x03DF;

/// Size of the legacy memory window at 0xA0000.
pub const VGA_LEGACY_WINDOW_SIZE: u32 = 0x2_0000;

/// Receives display-state changes from the adapter (typically a console/UI backend).
pub trait DisplaySink {
    /// A VBE mode became active.
    fn mode_changed(&mut self, mode: &VbeMode);

    /// Scanout returns to the legacy VGA core.
    fn restore_legacy(&mut self);

    /// The whole surface must be redrawn.
    fn invalidate(&mut self);

    /// The first displayed byte moved (panning / page flipping).
    fn display_start_changed(&mut self, _display_start: u32) {}
}

/// The legacy VGA register file and planar memory, owned by the host.
///
/// The adapter forwards legacy ports and the 0xA0000 window here while VBE is disabled.
pub trait VgaCompat {
    fn io_read(&mut self, port: u16, size: usize) -> u32;
    fn io_write(&mut self, port: u16, size: usize, value: u32);
    fn mem_read(&mut self, offset: u32) -> u8;
    fn mem_write(&mut self, offset: u32, value: u8);

    /// Resume legacy scanout after VBE was disabled.
    fn restore(&mut self);
}

/// Event recorded by [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    ModeChanged(VbeMode),
    RestoreLegacy,
    Invalidate,
    DisplayStart(u32),
}

/// A [`DisplaySink`] that appends every notification to a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the event log; stays valid after the sink is moved into a device.
    pub fn events(&self) -> Rc<RefCell<Vec<SinkEvent>>> {
        Rc::clone(&self.events)
    }

    pub fn take(&self) -> Vec<SinkEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl DisplaySink for RecordingSink {
    fn mode_changed(&mut self, mode: &VbeMode) {
        self.events.borrow_mut().push(SinkEvent::ModeChanged(*mode));
    }

    fn restore_legacy(&mut self) {
        self.events.borrow_mut().push(SinkEvent::RestoreLegacy);
    }

    fn invalidate(&mut self) {
        self.events.borrow_mut().push(SinkEvent::Invalidate);
    }

    fn display_start_changed(&mut self, display_start: u32) {
        self.events
            .borrow_mut()
            .push(SinkEvent::DisplayStart(display_start));
    }
}

pub(crate) fn is_vga_port(port: u16) -> bool {
    (VGA_PORT_FIRST..=VGA_PORT_LAST).contains(&port)
}
