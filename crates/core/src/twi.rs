//! Two-wire display bus reconstruction.
//!
//! The firmware bit-bangs an I2C-like protocol to the display controller on
//! PB0 (data) and PB2 (clock), assisted by the USI shift hardware. This
//! module rebuilds byte-oriented transactions from the raw edge stream: a
//! start condition is SDA falling while SCL is high, bits are sampled
//! MSB-first on SCL rising edges, and every 9th clock pulse is the ACK slot
//! that commits the shifted byte. The first byte of a transaction addresses
//! the device, the second selects command vs data mode, and everything after
//! flows into the display controller until the next start or stop.
//!
//! A second, register-driven entry exists: firmware that lets the USI
//! hardware do the shifting finishes a byte by writing a sentinel to USISR,
//! which delivers the USIDR contents directly with no edge reconstruction.
//! Both paths feed [`Ssd1306`] identically.
//!
//! Bus noise is expected: an address mismatch or malformed control byte
//! drops the transaction back to idle with no error. Glitches are not
//! filtered; any start/stop shape, even mid-byte, takes effect immediately.

use crate::display::Ssd1306;
use crate::mcu::{IoSpace, PB0, PB2, PINB, PORTB, USIDR, USIOIF, USIPF, USISIF, USISR, USITC};

/// Fixed 7-bit slave address of the display controller.
pub const TWI_ADDRESS: u8 = 0x3C;
/// Control byte selecting command mode for the rest of the transaction.
pub const CONTROL_COMMAND: u8 = 0x00;
/// Control byte selecting data mode for the rest of the transaction.
pub const CONTROL_DATA: u8 = 0x40;

/// USISR write value that commits the USIDR byte to the bus (fast path).
const USISR_SHIFT_DONE: u8 = 0xF0;
/// USISR write value that requests an ACK on the held data byte.
const USISR_ACK: u8 = 0xFE;

/// Transaction phase. The accumulator byte is only meaningful once 8 bits
/// have been shifted in; the counter covers 8 data bits plus the ACK slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    /// No transaction in progress; edges are ignored.
    Idle,
    /// Start seen, next byte is the address/control byte.
    Address,
    /// Addressed; next byte selects command or data mode.
    Select,
    /// All further bytes are controller commands.
    Command,
    /// All further bytes are framebuffer data.
    Data,
}

/// Bus protocol state machine for the two-wire display link.
pub struct TwiBus {
    state: BusState,
    /// Clock pulses seen this byte (0–8 data, 9 = ACK slot).
    bit_count: u8,
    /// Shift accumulator, MSB first.
    shift: u8,
    sda: bool,
    scl: bool,
}

impl TwiBus {
    pub fn new() -> Self {
        TwiBus {
            state: BusState::Idle,
            bit_count: 0,
            shift: 0,
            sda: false,
            scl: false,
        }
    }

    /// Whether a transaction is currently active.
    pub fn active(&self) -> bool {
        self.state != BusState::Idle
    }

    /// Data line edge. Start/stop conditions are shapes on SDA while SCL is
    /// high; a start is honored from any state, including mid-byte.
    pub fn on_sda(&mut self, io: &mut dyn IoSpace, level: bool) {
        self.sda = level;
        if !self.scl {
            return;
        }
        if !level {
            // Start: SDA falls while SCL high. Restart resets the bit
            // counter; stale shift bits fall out after 8 fresh clocks.
            io.io_write(USISR, io.io_read(USISR) | 1 << USISIF);
            self.state = BusState::Address;
            self.bit_count = 0;
        } else if self.state != BusState::Idle {
            // Stop: SDA rises while SCL high.
            io.io_write(USISR, io.io_read(USISR) | 1 << USIPF);
            self.state = BusState::Idle;
        }
    }

    /// Clock line edge. Bits are sampled on the rising edge; the 9th pulse
    /// is the ACK slot, which commits the byte and pulls SDA low for the
    /// controller's acknowledgement.
    pub fn on_scl(&mut self, io: &mut dyn IoSpace, display: &mut Ssd1306, level: bool) {
        self.scl = level;
        if self.state == BusState::Idle || !level {
            return;
        }
        if self.bit_count < 8 {
            self.shift = self.shift << 1 | self.sda as u8;
        }
        self.bit_count += 1;
        if self.bit_count == 9 {
            let byte = self.shift;
            self.receive_byte(display, byte);
            self.bit_count = 0;
        }
        // ACK: the controller holds SDA low for the master to sample.
        io.io_write(PINB, io.io_read(PINB) & !(1 << PB0));
    }

    /// USICR write intercept. A USITC strobe toggles SCL through PORTB and
    /// steps the USISR counter nibble, raising USIOIF on wrap; the strobe
    /// bits themselves never read back.
    pub fn on_usicr_write(&mut self, io: &mut dyn IoSpace, value: u8) -> u8 {
        if value & 1 << USITC != 0 {
            io.io_write(PORTB, io.io_read(PORTB) ^ 1 << PB2);
            let reg = io.io_read(USISR);
            let count = (reg & 0x0F).wrapping_add(1) & 0x0F;
            let mut reg = (reg & 0xF0) | count;
            if count == 0 {
                reg |= 1 << USIOIF;
            }
            io.io_write(USISR, reg);
        }
        value & 0xFC
    }

    /// USISR write intercept: the register-driven fast path. A shift-done
    /// sentinel delivers the USIDR byte exactly as if it had been clocked in
    /// through the pins; an ACK sentinel answers it. Flag bits are
    /// write-one-to-clear, the counter nibble stores directly.
    pub fn on_usisr_write(
        &mut self,
        io: &mut dyn IoSpace,
        display: &mut Ssd1306,
        value: u8,
    ) -> u8 {
        if value == USISR_SHIFT_DONE {
            let byte = io.io_read(USIDR);
            self.receive_byte(display, byte);
        } else if value == USISR_ACK && self.state != BusState::Idle {
            io.io_write(USIDR, io.io_read(USIDR) & !0x01);
        }
        let reg = io.io_read(USISR);
        (reg & !((value & 0xE0) | 0x0F)) | (value & 0x0F)
    }

    /// Route a completed byte according to the transaction phase.
    fn receive_byte(&mut self, display: &mut Ssd1306, byte: u8) {
        self.state = match self.state {
            BusState::Idle => BusState::Idle,
            BusState::Address => {
                if byte >> 1 == TWI_ADDRESS {
                    BusState::Select
                } else {
                    // Another device's transaction; ignore it wholesale.
                    BusState::Idle
                }
            }
            BusState::Select => match byte {
                CONTROL_COMMAND => BusState::Command,
                CONTROL_DATA => BusState::Data,
                _ => BusState::Idle,
            },
            BusState::Command => {
                display.command(byte);
                BusState::Command
            }
            BusState::Data => {
                display.data(byte);
                BusState::Data
            }
        };
    }
}
