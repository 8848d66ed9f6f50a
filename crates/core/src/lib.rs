//! # tinyjoypad-core
//!
//! Peripheral emulation core for the TinyJoypad handheld (ATtiny85 with an
//! SSD1306 OLED, resistor-ladder buttons and a piezo speaker).
//!
//! The CPU itself is external: any AVR instruction-set simulator that
//! implements the [`mcu::Mcu`] adapter can drive this core. The core hooks
//! the simulator's pin edges, I/O register writes and cycle timers, rebuilds
//! the bit-banged two-wire display protocol, models the display controller
//! and speaker, and exposes a pull-based frame/audio API to the host.
//!
//! ## Architecture
//!
//! - [`TinyJoypad`] — Session object owning the simulator and peripherals;
//!   one `run_frame` call per host frame
//! - [`mcu`] — Simulator adapter traits ([`mcu::Mcu`], [`mcu::McuHooks`],
//!   [`mcu::IoSpace`]) and ATtiny85 register constants
//! - [`TwiBus`] — Two-wire bus protocol state machine (edge-driven and
//!   USI-register-driven byte delivery)
//! - [`Ssd1306`] — Display controller model and ARGB renderer
//! - [`input::Buttons`] — Button pairs mapped to analog axis voltages
//! - [`SoundSampler`] — Speaker duty cycle integrated into 8-bit PCM
//!
//! ## Timing
//!
//! Everything is cooperative and single-threaded. Two cycle timers run
//! inside the simulator: the frame timer (30 Hz) yields `run_frame` back to
//! the caller, the sound timer (32 kHz) closes audio sample windows. Both
//! fire only while the CPU advances.

pub mod display;
pub mod input;
pub mod mcu;
pub mod sound;
pub mod twi;

pub use display::Ssd1306;
pub use mcu::{CpuState, Mcu, ProgramImage, SetupError};
pub use sound::SoundSampler;
pub use twi::TwiBus;

use mcu::{IoSpace, McuHooks, Pin, TimerSlot};

/// Display width in pixels
pub const SCREEN_WIDTH: usize = 128;
/// Display height in pixels
pub const SCREEN_HEIGHT: usize = 64;
/// Flash memory size: 8 KB (ATtiny85)
pub const FLASH_SIZE: usize = 8 * 1024;
/// Persistent storage size: 512 bytes (ATtiny85 EEPROM)
pub const STORAGE_SIZE: usize = 512;
/// CPU clock frequency: 16 MHz
pub const CLOCK_HZ: u32 = 16_000_000;
/// Host frame rate
pub const FPS: u32 = 30;
/// Frame period in microseconds
pub const FRAME_PERIOD_US: u64 = 1_000_000 / FPS as u64;
/// Frame period in CPU cycles
pub const FRAME_PERIOD_CYCLES: u64 = FRAME_PERIOD_US * CLOCK_HZ as u64 / 1_000_000;
/// Audio sample rate in Hz
pub const SOUND_RATE: u32 = 32_000;
/// Audio sample period in CPU cycles
pub const SOUND_PERIOD_CYCLES: u64 = (CLOCK_HZ / SOUND_RATE) as u64;
/// Audio sample buffer capacity in bytes
pub const SOUND_BUFFER_SIZE: usize = 2048;

/// TinyJoypad button identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
}

/// Number of buttons
pub const BUTTON_COUNT: usize = 5;

/// Peripheral set wired into the simulator's hook dispatch.
///
/// Implements [`McuHooks`]; the simulator calls back into this while the
/// CPU advances, synchronously on the same thread of control.
struct Peripherals {
    bus: TwiBus,
    display: Ssd1306,
    sound: SoundSampler,
    /// Set by the frame timer; `run_frame` returns at the next slice
    /// boundary once it is observed.
    yielded: bool,
}

impl Peripherals {
    fn new() -> Self {
        Peripherals {
            bus: TwiBus::new(),
            display: Ssd1306::new(),
            sound: SoundSampler::new(),
            yielded: false,
        }
    }

    fn reset(&mut self, refresh_on_round: bool) {
        self.bus = TwiBus::new();
        self.display = Ssd1306::new();
        self.display.refresh_on_round = refresh_on_round;
        self.sound.reset();
        self.yielded = false;
    }
}

impl McuHooks for Peripherals {
    fn pin_changed(&mut self, io: &mut dyn IoSpace, now: u64, pin: Pin, level: bool) {
        match pin {
            Pin::Sda => self.bus.on_sda(io, level),
            Pin::Scl => self.bus.on_scl(io, &mut self.display, level),
            Pin::Speaker => self.sound.toggle(now, level),
        }
    }

    fn io_written(&mut self, io: &mut dyn IoSpace, _now: u64, addr: u8, value: u8) -> u8 {
        match addr {
            mcu::USICR => self.bus.on_usicr_write(io, value),
            mcu::USISR => self.bus.on_usisr_write(io, &mut self.display, value),
            _ => value,
        }
    }

    fn timer_fired(&mut self, io: &mut dyn IoSpace, slot: TimerSlot, now: u64) -> u64 {
        match slot {
            TimerSlot::Frame => {
                self.yielded = true;
                now + FRAME_PERIOD_CYCLES
            }
            TimerSlot::Sound => {
                let high = io.io_read(mcu::PORTB) & 1 << mcu::PB4 != 0;
                self.sound.sample(now, high);
                now + SOUND_PERIOD_CYCLES
            }
        }
    }
}

/// A TinyJoypad emulation session.
///
/// Lifecycle: `new` → [`setup`](Self::setup) → any number of
/// [`run_frame`](Self::run_frame) / [`read_sound`](Self::read_sound) /
/// [`button_event`](Self::button_event) calls → [`teardown`](Self::teardown).
/// Every operation on a torn-down or never-set-up session is an inert no-op
/// returning false/zero; `teardown` is idempotent.
pub struct TinyJoypad {
    /// The external CPU simulator; `None` until setup.
    sim: Option<Box<dyn Mcu>>,
    per: Peripherals,
    buttons: input::Buttons,
    /// Luma refresh policy; survives setup/teardown.
    refresh_on_round: bool,
    frame_count: u32,
    /// Enable diagnostic output (eprintln)
    pub debug: bool,
}

impl TinyJoypad {
    pub fn new() -> Self {
        TinyJoypad {
            sim: None,
            per: Peripherals::new(),
            buttons: input::Buttons::new(),
            refresh_on_round: false,
            frame_count: 0,
            debug: false,
        }
    }

    /// Whether a device is set up and running.
    pub fn is_active(&self) -> bool {
        self.sim.is_some()
    }

    /// Load a program into `sim` and wire up all hooks and timers.
    ///
    /// On failure the half-constructed simulator is dropped and the session
    /// remains uninitialized. A live session is torn down first.
    pub fn setup(
        &mut self,
        mut sim: Box<dyn Mcu>,
        image: &ProgramImage,
    ) -> Result<(), SetupError> {
        self.teardown();

        sim.load_program(image)?;

        sim.register_pin_hook(Pin::Sda);
        sim.register_pin_hook(Pin::Scl);
        sim.register_pin_hook(Pin::Speaker);
        sim.register_io_write_hook(mcu::USICR);
        sim.register_io_write_hook(mcu::USISR);
        sim.register_timer(TimerSlot::Frame, FRAME_PERIOD_CYCLES);
        sim.register_timer(TimerSlot::Sound, SOUND_PERIOD_CYCLES);

        self.per.reset(self.refresh_on_round);
        self.buttons.reset(sim.as_mut());
        self.frame_count = 0;

        if self.debug {
            eprintln!(
                "[tinyjoypad] setup: {} bytes at 0x{:04X}",
                image.data.len(),
                image.base
            );
        }
        self.sim = Some(sim);
        Ok(())
    }

    /// Run one frame of emulation and render into `pixels` (row-major
    /// 128×64 packed colors).
    ///
    /// The CPU advances in bounded slices until the frame timer yields or
    /// the CPU reaches a terminal state; a halted CPU still renders and
    /// returns true, the screen just stops changing. Returns false without
    /// touching `pixels` when the session is uninitialized or the buffer is
    /// undersized.
    pub fn run_frame(&mut self, pixels: &mut [u32]) -> bool {
        let Some(sim) = self.sim.as_mut() else {
            return false;
        };
        if pixels.len() < SCREEN_WIDTH * SCREEN_HEIGHT {
            return false;
        }

        self.per.yielded = false;
        loop {
            let state = sim.run_slice(&mut self.per);
            if self.per.yielded || state != CpuState::Running {
                break;
            }
        }

        if !self.refresh_on_round {
            self.per.display.refresh();
        }
        self.per.display.render(pixels);

        self.frame_count += 1;
        if self.debug && self.frame_count <= 10 {
            eprintln!(
                "[tinyjoypad] frame {}: cmd={} data={} cursor={:?} sound={}",
                self.frame_count,
                self.per.display.dbg_cmd_count,
                self.per.display.dbg_data_count,
                self.per.display.cursor(),
                self.per.sound.len()
            );
        }
        true
    }

    /// Drain buffered audio samples into `out`; returns the sample count.
    /// Returns 0 when the session is uninitialized or `out` holds fewer
    /// than [`SOUND_BUFFER_SIZE`] bytes.
    pub fn read_sound(&mut self, out: &mut [u8]) -> usize {
        if self.sim.is_none() || out.len() < SOUND_BUFFER_SIZE {
            return 0;
        }
        self.per.sound.drain(out)
    }

    /// Apply a button press/release. Returns false for redundant events and
    /// when the session is uninitialized.
    pub fn button_event(&mut self, btn: Button, pressed: bool) -> bool {
        let Some(sim) = self.sim.as_mut() else {
            return false;
        };
        self.buttons.event(sim.as_mut(), btn, pressed)
    }

    /// Copy the 512-byte persistent storage into `out`.
    pub fn storage(&self, out: &mut [u8]) -> bool {
        let Some(sim) = self.sim.as_ref() else {
            return false;
        };
        if out.len() < STORAGE_SIZE {
            return false;
        }
        out[..STORAGE_SIZE].copy_from_slice(sim.storage());
        true
    }

    /// Overwrite the 512-byte persistent storage from `data`.
    pub fn set_storage(&mut self, data: &[u8]) -> bool {
        let Some(sim) = self.sim.as_mut() else {
            return false;
        };
        if data.len() < STORAGE_SIZE {
            return false;
        }
        sim.storage_mut().copy_from_slice(&data[..STORAGE_SIZE]);
        true
    }

    /// Select the luma refresh timing policy: true rebuilds the render grid
    /// on every page wraparound, false once per frame. Settable in any
    /// state and remembered across setup/teardown.
    pub fn set_refresh_timing(&mut self, on_round: bool) -> bool {
        self.refresh_on_round = on_round;
        self.per.display.refresh_on_round = on_round;
        true
    }

    /// Tear down the session. Idempotent; all further calls except `setup`
    /// become inert.
    pub fn teardown(&mut self) {
        if self.sim.take().is_some() && self.debug {
            eprintln!("[tinyjoypad] teardown");
        }
    }
}

impl Default for TinyJoypad {
    fn default() -> Self {
        TinyJoypad::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcu::testing::{Event, ScriptedIo, ScriptedMcu};
    use twi::{CONTROL_COMMAND, CONTROL_DATA, TWI_ADDRESS};

    const FB: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

    fn image() -> ProgramImage {
        ProgramImage { data: vec![0xFF; 64], base: 0 }
    }

    /// Edge sequence for a start condition.
    fn start_events() -> Vec<Event> {
        vec![
            Event::Edge(Pin::Sda, true),
            Event::Edge(Pin::Scl, true),
            Event::Edge(Pin::Sda, false),
        ]
    }

    /// Edge sequence clocking one byte, MSB first, plus the ACK pulse.
    fn byte_events(byte: u8) -> Vec<Event> {
        let mut ev = Vec::new();
        for bit in (0..8).rev() {
            ev.push(Event::Edge(Pin::Scl, false));
            ev.push(Event::Edge(Pin::Sda, byte >> bit & 1 != 0));
            ev.push(Event::Edge(Pin::Scl, true));
        }
        ev.push(Event::Edge(Pin::Scl, false));
        ev.push(Event::Edge(Pin::Scl, true));
        ev
    }

    /// A whole addressed transaction: start, address, control byte, payload.
    fn transaction(control: u8, payload: &[u8]) -> Vec<Event> {
        let mut ev = start_events();
        ev.extend(byte_events(TWI_ADDRESS << 1));
        ev.extend(byte_events(control));
        for &b in payload {
            ev.extend(byte_events(b));
        }
        ev
    }

    fn ready_session(sim: ScriptedMcu) -> TinyJoypad {
        let mut tjp = TinyJoypad::new();
        tjp.setup(Box::new(sim), &image()).unwrap();
        tjp
    }

    #[test]
    fn test_setup_registers_everything() {
        let mut sim = ScriptedMcu::new();
        sim.events.push_back(Event::Halt);
        let tjp = ready_session(sim);
        assert!(tjp.is_active());
    }

    #[test]
    fn test_setup_failure_leaves_uninitialized() {
        let mut sim = ScriptedMcu::new();
        sim.fail_load = true;
        let mut tjp = TinyJoypad::new();
        assert!(tjp.setup(Box::new(sim), &image()).is_err());
        assert!(!tjp.is_active());

        let mut pixels = vec![0u32; FB];
        assert!(!tjp.run_frame(&mut pixels));
    }

    #[test]
    fn test_uninitialized_calls_are_no_ops() {
        let mut tjp = TinyJoypad::new();
        let mut pixels = vec![0u32; FB];
        let mut audio = [0u8; SOUND_BUFFER_SIZE];
        let mut store = [0u8; STORAGE_SIZE];

        assert!(!tjp.run_frame(&mut pixels));
        assert_eq!(tjp.read_sound(&mut audio), 0);
        assert!(!tjp.button_event(Button::A, true));
        assert!(!tjp.storage(&mut store));
        assert!(!tjp.set_storage(&store));
        // The refresh policy is independent of the device.
        assert!(tjp.set_refresh_timing(true));
        tjp.teardown(); // harmless
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut sim = ScriptedMcu::new();
        sim.events.push_back(Event::Halt);
        let mut tjp = ready_session(sim);

        tjp.teardown();
        tjp.teardown();
        assert!(!tjp.is_active());
        let mut pixels = vec![0u32; FB];
        assert!(!tjp.run_frame(&mut pixels));
    }

    #[test]
    fn test_run_frame_rejects_undersized_buffer() {
        let mut sim = ScriptedMcu::new();
        sim.events.push_back(Event::Halt);
        let mut tjp = ready_session(sim);

        let mut small = vec![0u32; FB - 1];
        assert!(!tjp.run_frame(&mut small));
        // The full-size call still works afterwards.
        let mut pixels = vec![0u32; FB];
        assert!(tjp.run_frame(&mut pixels));
    }

    #[test]
    fn test_scripted_transaction_renders_pixel() {
        let mut sim = ScriptedMcu::new();
        let mut script = transaction(CONTROL_COMMAND, &[0xAF]); // display on
        script.extend(transaction(CONTROL_DATA, &[0x01])); // bit 0 at (0,0)
        script.push(Event::Fire(TimerSlot::Frame));
        sim.script(script);

        let mut tjp = ready_session(sim);
        let mut pixels = vec![0u32; FB];
        assert!(tjp.run_frame(&mut pixels));
        // Default contrast 0x7F → alpha 191 over white.
        assert_eq!(pixels[0], 0xBFFF_FFFF);
        assert_eq!(pixels[1], 0);
    }

    #[test]
    fn test_timer_hooks_rearm_one_period_out() {
        let mut per = Peripherals::new();
        let mut io = ScriptedIo { regs: [0; 0x60] };

        let next = per.timer_fired(&mut io, TimerSlot::Frame, 1000);
        assert!(per.yielded);
        assert_eq!(next, 1000 + FRAME_PERIOD_CYCLES);

        let next = per.timer_fired(&mut io, TimerSlot::Sound, 500);
        assert_eq!(next, 500 + SOUND_PERIOD_CYCLES);
    }

    #[test]
    fn test_halted_cpu_still_returns_true() {
        let mut sim = ScriptedMcu::new();
        sim.script([Event::Halt]);
        let mut tjp = ready_session(sim);

        let mut pixels = vec![0u32; FB];
        assert!(tjp.run_frame(&mut pixels));
        // Subsequent frames keep "succeeding" with no progress.
        assert!(tjp.run_frame(&mut pixels));
    }

    #[test]
    fn test_sound_pipeline_through_session() {
        let mut sim = ScriptedMcu::new();
        sim.script([
            // Speaker line high at the port, then a full sample window.
            Event::IoWrite(mcu::PORTB, 1 << mcu::PB4),
            Event::Advance(SOUND_PERIOD_CYCLES),
            Event::Fire(TimerSlot::Sound),
            Event::Fire(TimerSlot::Frame),
        ]);
        let mut tjp = ready_session(sim);

        let mut pixels = vec![0u32; FB];
        assert!(tjp.run_frame(&mut pixels));

        let mut audio = [0u8; SOUND_BUFFER_SIZE];
        let mut small = [0u8; SOUND_BUFFER_SIZE - 1];
        assert_eq!(tjp.read_sound(&mut small), 0);
        assert_eq!(tjp.read_sound(&mut audio), 1);
        assert_eq!(audio[0], sound::SAMPLE_BASE + sound::SAMPLE_AMPLITUDE);
        // Drained: the next read is empty.
        assert_eq!(tjp.read_sound(&mut audio), 0);
    }

    #[test]
    fn test_button_event_reaches_simulator() {
        let mut sim = ScriptedMcu::new();
        sim.events.push_back(Event::Halt);
        let mut tjp = ready_session(sim);

        assert!(tjp.button_event(Button::A, true));
        assert!(!tjp.button_event(Button::A, true)); // redundant
        assert!(tjp.button_event(Button::Left, true));
    }

    #[test]
    fn test_storage_round_trip() {
        let mut sim = ScriptedMcu::new();
        sim.events.push_back(Event::Halt);
        let mut tjp = ready_session(sim);

        let mut blob = [0u8; STORAGE_SIZE];
        blob[0] = 0xA5;
        blob[STORAGE_SIZE - 1] = 0x5A;
        assert!(tjp.set_storage(&blob));

        let mut out = [0u8; STORAGE_SIZE];
        assert!(tjp.storage(&mut out));
        assert_eq!(out[0], 0xA5);
        assert_eq!(out[STORAGE_SIZE - 1], 0x5A);

        let mut short = [0u8; STORAGE_SIZE - 1];
        assert!(!tjp.storage(&mut short));
        assert!(!tjp.set_storage(&short));
    }

    #[test]
    fn test_refresh_policy_survives_setup() {
        let mut tjp = TinyJoypad::new();
        assert!(tjp.set_refresh_timing(true));

        let mut sim = ScriptedMcu::new();
        let mut script = transaction(CONTROL_COMMAND, &[0xAF, 0x20, 0x00]);
        // A full vram sweep wraps the page and, under the round policy,
        // flushes the luma grid mid-frame.
        let data: Vec<u8> = vec![0xFF; display::PAGES * SCREEN_WIDTH];
        script.extend(transaction(CONTROL_DATA, &data));
        script.push(Event::Fire(TimerSlot::Frame));
        sim.script(script);

        tjp.setup(Box::new(sim), &image()).unwrap();
        let mut pixels = vec![0u32; FB];
        assert!(tjp.run_frame(&mut pixels));
        assert_ne!(pixels[0], 0);
    }
}
