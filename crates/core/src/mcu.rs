//! Simulator adapter: the seam between the peripheral models and the
//! external ATtiny85 instruction-set simulator.
//!
//! The core never reaches into simulator internals. It registers interest in
//! pin edges, I/O register writes and cycle timers through [`Mcu`], receives
//! those events synchronously through [`McuHooks`] while the simulator runs,
//! and pokes status/ACK bits back through [`IoSpace`]. Any CPU simulator that
//! implements [`Mcu`] can drive the device; tests use a scripted double that
//! replays canned event sequences.

use thiserror::Error;

// ─── ATtiny85 data-space register addresses ─────────────────────────────────

/// USI control register
pub const USICR: u8 = 0x2D;
/// USI status register (start/stop/overflow flags + 4-bit counter)
pub const USISR: u8 = 0x2E;
/// USI data (shift) register
pub const USIDR: u8 = 0x2F;
/// Port B input pins
pub const PINB: u8 = 0x36;
/// Port B data register
pub const PORTB: u8 = 0x38;

/// PB0: bus data line (SDA)
pub const PB0: u8 = 0;
/// PB1: action button (digital, active-low)
pub const PB1: u8 = 1;
/// PB2: bus clock line (SCL)
pub const PB2: u8 = 2;
/// PB4: speaker output
pub const PB4: u8 = 4;

/// USISR bit 7: start condition detected
pub const USISIF: u8 = 7;
/// USISR bit 6: counter overflow (byte shifted)
pub const USIOIF: u8 = 6;
/// USISR bit 5: stop condition detected
pub const USIPF: u8 = 5;
/// USICR bit 0: clock toggle strobe
pub const USITC: u8 = 0;

// ─── Event identifiers ──────────────────────────────────────────────────────

/// Digital lines the core observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    /// Bus data line (PB0)
    Sda,
    /// Bus clock line (PB2)
    Scl,
    /// Speaker toggle output (PB4)
    Speaker,
}

/// ADC input channels driven by the button axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogChannel {
    /// Left/right resistor ladder (ADC0)
    XAxis,
    /// Up/down resistor ladder (ADC3)
    YAxis,
}

/// Cooperative cycle-timer slots owned by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSlot {
    /// Fires once per frame period; yields control back to the caller.
    Frame,
    /// Fires once per audio sample period.
    Sound,
}

/// CPU run state reported after a slice of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    /// The CPU executed a terminal sleep/break and will make no progress.
    Halted,
    Crashed,
}

// ─── Program image ──────────────────────────────────────────────────────────

/// A flat program image plus its load base address.
///
/// Produced by whatever loader the host uses (Intel HEX, raw binary); the
/// core only copies bytes and sets the initial program counter.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub data: Vec<u8>,
    /// Byte address in flash where `data` is loaded; also the initial PC.
    pub base: u32,
}

/// Session setup failure. Fatal: no partial state is retained.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("empty program image")]
    EmptyImage,
    #[error("program image ({size} bytes at 0x{base:04X}) does not fit in flash")]
    ImageTooLarge { size: usize, base: u32 },
    #[error("simulator construction failed: {0}")]
    Simulator(String),
}

// ─── Adapter traits ─────────────────────────────────────────────────────────

/// Raw byte view of the simulator's I/O space.
///
/// Writes through this trait store bytes directly and never re-enter the
/// registered hooks, so hook code can update status registers and ACK bits
/// without recursing into itself.
pub trait IoSpace {
    fn io_read(&self, addr: u8) -> u8;
    fn io_write(&mut self, addr: u8, value: u8);
}

/// Callbacks the simulator invokes inline while advancing the CPU.
///
/// All calls happen synchronously on the caller's thread, between
/// instructions; `now` is the simulator's cycle counter at the event.
pub trait McuHooks {
    /// A registered pin changed level.
    fn pin_changed(&mut self, io: &mut dyn IoSpace, now: u64, pin: Pin, level: bool);

    /// The CPU wrote `value` to a registered I/O address. Returns the value
    /// the simulator must actually store (register writes may be
    /// transformed, e.g. strobe bits that never read back).
    fn io_written(&mut self, io: &mut dyn IoSpace, now: u64, addr: u8, value: u8) -> u8;

    /// A registered timer's deadline passed. Returns the next absolute
    /// deadline in cycles.
    fn timer_fired(&mut self, io: &mut dyn IoSpace, slot: TimerSlot, now: u64) -> u64;
}

/// The external CPU simulator, reduced to the operations the core needs.
pub trait Mcu {
    /// Copy the program image into instruction memory and point the CPU at
    /// its load base.
    fn load_program(&mut self, image: &ProgramImage) -> Result<(), SetupError>;

    /// Subscribe to edge notifications for `pin`.
    fn register_pin_hook(&mut self, pin: Pin);

    /// Intercept data-space writes to `addr`.
    fn register_io_write_hook(&mut self, addr: u8);

    /// Arm a periodic cycle timer. The first deadline is one period from
    /// now; each [`McuHooks::timer_fired`] return value re-arms it.
    fn register_timer(&mut self, slot: TimerSlot, period_cycles: u64);

    /// Advance the CPU by a bounded slice, dispatching hooks inline.
    fn run_slice(&mut self, hooks: &mut dyn McuHooks) -> CpuState;

    /// Drive an analog input channel, in millivolts.
    fn raise_analog(&mut self, ch: AnalogChannel, millivolts: u16);

    /// Drive the action-button input line (PB1).
    fn raise_digital(&mut self, level: bool);

    /// Current cycle counter.
    fn cycle(&self) -> u64;

    /// Persistent 512-byte storage, read side. Always exactly
    /// [`crate::STORAGE_SIZE`] bytes.
    fn storage(&self) -> &[u8];

    /// Persistent 512-byte storage, write side.
    fn storage_mut(&mut self) -> &mut [u8];
}

// ─── Scripted test double ───────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_load_program_bounds() {
        let mut mcu = ScriptedMcu::new();
        let image = ProgramImage { data: vec![0x12, 0x34], base: 0 };
        assert!(mcu.load_program(&image).is_ok());
        assert_eq!(mcu.flash[0], 0x12);
        assert_eq!(mcu.pc, 0);

        let too_big = ProgramImage { data: vec![0; 16], base: crate::FLASH_SIZE as u32 - 8 };
        assert!(matches!(
            mcu.load_program(&too_big),
            Err(SetupError::ImageTooLarge { .. })
        ));

        let empty = ProgramImage { data: Vec::new(), base: 0 };
        assert!(matches!(mcu.load_program(&empty), Err(SetupError::EmptyImage)));
    }

    #[test]
    fn test_unregistered_events_are_not_dispatched() {
        struct Counter(u32);
        impl McuHooks for Counter {
            fn pin_changed(&mut self, _: &mut dyn IoSpace, _: u64, _: Pin, _: bool) {
                self.0 += 1;
            }
            fn io_written(&mut self, _: &mut dyn IoSpace, _: u64, _: u8, v: u8) -> u8 {
                self.0 += 1;
                v
            }
            fn timer_fired(&mut self, _: &mut dyn IoSpace, _: TimerSlot, now: u64) -> u64 {
                now
            }
        }

        let mut mcu = ScriptedMcu::new();
        mcu.script([Event::Edge(Pin::Sda, true), Event::IoWrite(USISR, 0xF0)]);
        let mut hooks = Counter(0);
        mcu.run_slice(&mut hooks);
        assert_eq!(hooks.0, 0);
        // The unhooked write still lands in the register file.
        assert_eq!(mcu.io.io_read(USISR), 0xF0);
    }
}
