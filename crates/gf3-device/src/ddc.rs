//! Bit-banged DDC (I2C) slave serving the monitor EDID.
//!
//! The guest drives the two open-drain lines through the DDC control register; every access is
//! fed to [`DdcEngine::write_pins`] and the engine reconstructs START/STOP conditions, address and
//! data bytes from the level changes. The engine answers at the EDID EEPROM address (0x50, i.e.
//! 0xA0 for writes and 0xA1 for reads).
//!
//! Timing model:
//! - SDA transitions while SCL is high are START (falling) or STOP (rising) conditions.
//! - Master-driven bits are sampled on SCL rising edges.
//! - The slave only changes its own SDA drive on SCL falling edges.

use tracing::{debug, trace};

/// Bit in the DDC control register carrying SDA.
pub const DDC_SDA_PIN: u8 = 0x01;
/// Bit in the DDC control register carrying SCL.
pub const DDC_SCL_PIN: u8 = 0x02;

/// 8-bit (write) form of the EDID EEPROM address; the read form is `0xA1`.
pub const EDID_SLAVE_ADDR: u8 = 0xA0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdcState {
    Idle,
    Start,
    AddressPhase,
    DataPhase,
    /// The master NACKed a read byte; waiting for the STOP condition.
    Stop,
}

impl DdcState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Start => 1,
            Self::AddressPhase => 2,
            Self::DataPhase => 3,
            Self::Stop => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Idle,
            1 => Self::Start,
            2 => Self::AddressPhase,
            3 => Self::DataPhase,
            4 => Self::Stop,
            _ => return None,
        })
    }
}

/// Serializable engine state (the EDID blob itself is not part of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdcEngineState {
    pub state: DdcState,
    pub shift: u8,
    pub bit_count: u8,
    pub address: u8,
    pub cursor: u32,
    pub sda_in: bool,
    pub scl_in: bool,
    pub sda_out: bool,
    pub ack_pending: bool,
    pub ack_slot: bool,
    pub fresh: bool,
    pub offset_written: bool,
}

#[derive(Debug, Clone)]
pub struct DdcEngine {
    state: DdcState,
    shift: u8,
    bit_count: u8,
    address: u8,
    cursor: usize,

    // Last levels driven by the master.
    sda_in: bool,
    scl_in: bool,
    // Slave drive; `false` pulls the line low.
    sda_out: bool,

    // ACK decided on the 8th rising edge, driven on the following falling edge.
    ack_pending: bool,
    // Inside the ninth (acknowledge) clock.
    ack_slot: bool,
    // The current transaction started from Idle/Stop rather than as a repeated START.
    fresh: bool,
    // The word offset byte of the current write transaction has been received.
    offset_written: bool,

    edid: Vec<u8>,
}

impl DdcEngine {
    pub fn new(edid: Vec<u8>) -> Self {
        Self {
            state: DdcState::Idle,
            shift: 0,
            bit_count: 0,
            address: 0,
            cursor: 0,
            sda_in: true,
            scl_in: true,
            sda_out: true,
            ack_pending: false,
            ack_slot: false,
            fresh: true,
            offset_written: false,
            edid,
        }
    }

    /// Returns the engine to Idle with both lines released. The EDID blob is kept.
    pub fn reset(&mut self) {
        let edid = std::mem::take(&mut self.edid);
        *self = Self::new(edid);
    }

    pub fn state(&self) -> DdcState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// True while the slave is streaming bytes to the master.
    pub fn reading(&self) -> bool {
        self.state == DdcState::DataPhase && self.is_read()
    }

    pub fn edid(&self) -> &[u8] {
        &self.edid
    }

    /// Swaps in a freshly generated EDID blob. The cursor is kept within the new blob and a bit
    /// being driven is re-sampled from it.
    pub fn set_edid(&mut self, edid: Vec<u8>) {
        self.edid = edid;
        self.cursor = if self.edid.is_empty() {
            0
        } else {
            self.cursor % self.edid.len()
        };
        let driving = self.state == DdcState::DataPhase
            && self.is_read()
            && !self.ack_slot
            && !self.scl_in
            && self.bit_count < 8;
        if driving {
            self.drive_bit();
        }
    }

    /// Levels currently seen on the bus: `(sda, scl)`.
    pub fn read_pins(&self) -> (bool, bool) {
        (self.sda_in && self.sda_out, self.scl_in)
    }

    /// Applies new master-driven levels.
    pub fn write_pins(&mut self, sda: bool, scl: bool) {
        let (old_sda, old_scl) = (self.sda_in, self.scl_in);
        self.sda_in = sda;
        self.scl_in = scl;

        match (old_scl, scl) {
            (true, true) if old_sda && !sda => self.start_condition(),
            (true, true) if !old_sda && sda => self.stop_condition(),
            (false, true) => self.rising_edge(sda),
            (true, false) => self.falling_edge(),
            _ => {}
        }
    }

    fn start_condition(&mut self) {
        self.fresh = matches!(self.state, DdcState::Idle | DdcState::Stop);
        trace!(repeated = !self.fresh, "DDC start");
        self.state = DdcState::Start;
        self.shift = 0;
        self.bit_count = 0;
        self.sda_out = true;
        self.ack_pending = false;
        self.ack_slot = false;
    }

    fn stop_condition(&mut self) {
        trace!("DDC stop");
        self.state = DdcState::Idle;
        self.shift = 0;
        self.bit_count = 0;
        self.sda_out = true;
        self.ack_pending = false;
        self.ack_slot = false;
    }

    fn is_read(&self) -> bool {
        self.address & 1 != 0
    }

    fn rising_edge(&mut self, sda: bool) {
        match self.state {
            DdcState::Idle | DdcState::Stop => {}
            DdcState::Start => {
                self.state = DdcState::AddressPhase;
                self.shift_in(sda);
            }
            DdcState::DataPhase if self.is_read() => {
                if self.ack_slot {
                    if sda {
                        trace!(cursor = self.cursor, "DDC master NACK");
                        self.state = DdcState::Stop;
                    }
                } else if self.bit_count < 8 {
                    self.bit_count += 1;
                }
            }
            DdcState::AddressPhase | DdcState::DataPhase => {
                if !self.ack_slot {
                    self.shift_in(sda);
                }
            }
        }
    }

    fn shift_in(&mut self, sda: bool) {
        if self.bit_count >= 8 {
            return;
        }
        self.shift = (self.shift << 1) | u8::from(sda);
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.byte_received();
        }
    }

    fn byte_received(&mut self) {
        match self.state {
            DdcState::AddressPhase => {
                if self.shift & 0xFE == EDID_SLAVE_ADDR {
                    self.address = self.shift;
                    if self.fresh {
                        self.cursor = 0;
                    }
                    self.offset_written = false;
                    self.ack_pending = true;
                    debug!(
                        address = self.shift,
                        read = self.is_read(),
                        cursor = self.cursor,
                        "DDC address ACK"
                    );
                } else {
                    trace!(address = self.shift, "DDC address NACK");
                    self.stop_condition();
                }
            }
            DdcState::DataPhase => {
                if !self.offset_written {
                    self.cursor = if self.edid.is_empty() {
                        0
                    } else {
                        usize::from(self.shift) % self.edid.len()
                    };
                    self.offset_written = true;
                    trace!(cursor = self.cursor, "DDC word offset");
                }
                self.ack_pending = true;
            }
            _ => {}
        }
    }

    fn falling_edge(&mut self) {
        if !matches!(self.state, DdcState::AddressPhase | DdcState::DataPhase) {
            return;
        }

        if self.ack_pending {
            self.ack_pending = false;
            self.ack_slot = true;
            self.sda_out = false;
            return;
        }

        if self.ack_slot {
            self.ack_slot = false;
            self.sda_out = true;
            self.bit_count = 0;
            self.shift = 0;
            if self.state == DdcState::AddressPhase {
                self.state = DdcState::DataPhase;
            }
            if self.is_read() {
                self.drive_bit();
            }
            return;
        }

        if self.state == DdcState::DataPhase && self.is_read() {
            if self.bit_count < 8 {
                self.drive_bit();
            } else {
                // Byte done; the master acknowledges during the ninth clock.
                self.sda_out = true;
                self.advance_cursor();
                self.ack_slot = true;
            }
        }
    }

    fn current_byte(&self) -> u8 {
        self.edid.get(self.cursor).copied().unwrap_or(0xFF)
    }

    fn drive_bit(&mut self) {
        let bit = 7 - self.bit_count.min(7);
        self.sda_out = (self.current_byte() >> bit) & 1 != 0;
    }

    fn advance_cursor(&mut self) {
        if !self.edid.is_empty() {
            self.cursor = (self.cursor + 1) % self.edid.len();
        }
    }

    // Byte-level helpers that synthesise full bit cycles.

    fn clock_bit(&mut self, bit: bool) {
        self.write_pins(bit, false);
        self.write_pins(bit, true);
        self.write_pins(bit, false);
    }

    fn read_bit(&mut self) -> bool {
        self.write_pins(true, false);
        self.write_pins(true, true);
        let (sda, _) = self.read_pins();
        self.write_pins(true, false);
        sda
    }

    /// Issues a START (or repeated START) followed by `addr`. Returns whether the slave ACKed.
    pub fn i2c_start(&mut self, addr: u8) -> bool {
        self.write_pins(true, true);
        self.write_pins(false, true);
        self.write_pins(false, false);
        self.i2c_send(addr)
    }

    /// Clocks out one byte MSB first. Returns whether the slave ACKed.
    pub fn i2c_send(&mut self, byte: u8) -> bool {
        for bit in (0..8).rev() {
            self.clock_bit((byte >> bit) & 1 != 0);
        }
        !self.read_bit()
    }

    /// Clocks in one byte, then ACKs (`ack == true`) or NACKs it.
    pub fn i2c_recv(&mut self, ack: bool) -> u8 {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | u8::from(self.read_bit());
        }
        self.clock_bit(!ack);
        byte
    }

    pub fn i2c_stop(&mut self) {
        self.write_pins(false, false);
        self.write_pins(false, true);
        self.write_pins(true, true);
    }

    pub fn save_state(&self) -> DdcEngineState {
        DdcEngineState {
            state: self.state,
            shift: self.shift,
            bit_count: self.bit_count,
            address: self.address,
            cursor: u32::try_from(self.cursor).unwrap_or(0),
            sda_in: self.sda_in,
            scl_in: self.scl_in,
            sda_out: self.sda_out,
            ack_pending: self.ack_pending,
            ack_slot: self.ack_slot,
            fresh: self.fresh,
            offset_written: self.offset_written,
        }
    }

    pub fn restore_state(&mut self, s: &DdcEngineState) {
        self.state = s.state;
        self.shift = s.shift;
        self.bit_count = s.bit_count.min(8);
        self.address = s.address;
        self.sda_in = s.sda_in;
        self.scl_in = s.scl_in;
        self.sda_out = s.sda_out;
        self.ack_pending = s.ack_pending;
        self.ack_slot = s.ack_slot;
        self.fresh = s.fresh;
        self.offset_written = s.offset_written;
        self.cursor = s.cursor as usize;
        let edid = std::mem::take(&mut self.edid);
        self.set_edid(edid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> Vec<u8> {
        (0u8..=255).collect()
    }

    #[test]
    fn start_then_address_ack() {
        let mut ddc = DdcEngine::new(blob());
        assert!(ddc.i2c_start(0xA1));
        assert_eq!(ddc.state(), DdcState::DataPhase);
        assert_eq!(ddc.read_pins(), (false, false));
    }

    #[test]
    fn wrong_address_is_nacked_and_idles() {
        let mut ddc = DdcEngine::new(blob());
        assert!(!ddc.i2c_start(0xA4));
        assert_eq!(ddc.state(), DdcState::Idle);
        assert!(ddc.read_pins().0);
    }

    #[test]
    fn read_streams_bytes_in_order() {
        let mut ddc = DdcEngine::new(blob());
        assert!(ddc.i2c_start(0xA1));
        assert_eq!(ddc.i2c_recv(true), 0);
        assert_eq!(ddc.i2c_recv(true), 1);
        assert_eq!(ddc.i2c_recv(false), 2);
        assert_eq!(ddc.state(), DdcState::Stop);
        ddc.i2c_stop();
        assert_eq!(ddc.state(), DdcState::Idle);
    }

    #[test]
    fn word_offset_then_repeated_start_reads_from_offset() {
        let mut ddc = DdcEngine::new(blob());
        assert!(ddc.i2c_start(0xA0));
        assert!(ddc.i2c_send(0x7E));
        // Later bytes are acknowledged but do not move the cursor.
        assert!(ddc.i2c_send(0x10));
        assert!(ddc.i2c_start(0xA1));
        assert_eq!(ddc.i2c_recv(true), 0x7E);
        assert_eq!(ddc.i2c_recv(false), 0x7F);
        ddc.i2c_stop();
    }

    #[test]
    fn fresh_transaction_resets_cursor() {
        let mut ddc = DdcEngine::new(blob());
        assert!(ddc.i2c_start(0xA1));
        ddc.i2c_recv(true);
        ddc.i2c_recv(false);
        ddc.i2c_stop();

        assert!(ddc.i2c_start(0xA1));
        assert_eq!(ddc.i2c_recv(false), 0);
        ddc.i2c_stop();
    }

    #[test]
    fn cursor_wraps_at_end_of_blob() {
        let mut ddc = DdcEngine::new(vec![0xAA, 0xBB, 0xCC]);
        assert!(ddc.i2c_start(0xA1));
        let bytes: Vec<u8> = (0..5).map(|_| ddc.i2c_recv(true)).collect();
        assert_eq!(bytes, [0xAA, 0xBB, 0xCC, 0xAA, 0xBB]);
    }

    #[test]
    fn stop_in_the_middle_of_a_byte_returns_to_idle() {
        let mut ddc = DdcEngine::new(blob());
        ddc.write_pins(true, true);
        ddc.write_pins(false, true);
        ddc.write_pins(false, false);
        ddc.write_pins(true, false);
        ddc.write_pins(true, true);
        assert_eq!(ddc.state(), DdcState::AddressPhase);
        ddc.i2c_stop();
        assert_eq!(ddc.state(), DdcState::Idle);
    }

    #[test]
    fn clocks_while_idle_are_ignored() {
        let mut ddc = DdcEngine::new(blob());
        for _ in 0..20 {
            ddc.write_pins(false, false);
            ddc.write_pins(false, true);
        }
        assert_eq!(ddc.state(), DdcState::Idle);
        assert_eq!(ddc.read_pins(), (false, true));
    }

    #[test]
    fn set_edid_keeps_cursor_in_bounds() {
        let mut ddc = DdcEngine::new(blob());
        assert!(ddc.i2c_start(0xA0));
        assert!(ddc.i2c_send(200));
        ddc.set_edid(vec![1; 128]);
        assert_eq!(ddc.cursor(), 200 % 128);
    }

    #[test]
    fn save_restore_resumes_mid_stream() {
        let mut ddc = DdcEngine::new(blob());
        assert!(ddc.i2c_start(0xA1));
        ddc.i2c_recv(true);
        let saved = ddc.save_state();

        let mut restored = DdcEngine::new(blob());
        restored.restore_state(&saved);
        assert_eq!(restored.i2c_recv(false), 1);
    }
}
