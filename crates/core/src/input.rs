//! Button input mapped onto the simulator's analog and digital inputs.
//!
//! The hardware wires each direction pair through a resistor ladder into one
//! ADC channel, so a whole axis is a single analog voltage: 88 kΩ to ground
//! for one direction, 33 kΩ for the other, both in parallel when both are
//! held, and Vcc when the axis is released. The action button is a plain
//! active-low digital line.

use crate::mcu::{AnalogChannel, Mcu};
use crate::{Button, BUTTON_COUNT};

/// Axis voltage, released (millivolts).
pub const AXIS_MV_VCC: u16 = 3300;
/// Axis voltage with the 88 kΩ leg grounded (left / down).
pub const AXIS_MV_88K: u16 = 2640;
/// Axis voltage with the 33 kΩ leg grounded (right / up).
pub const AXIS_MV_33K: u16 = 1980;
/// Axis voltage with both legs grounded.
pub const AXIS_MV_BOTH: u16 = 1720;

/// Button state tracker and input mapper.
pub struct Buttons {
    pressed: [bool; BUTTON_COUNT],
}

impl Buttons {
    pub fn new() -> Self {
        Buttons { pressed: [false; BUTTON_COUNT] }
    }

    /// Drive every input to its released level.
    pub fn reset(&mut self, mcu: &mut dyn Mcu) {
        self.pressed = [false; BUTTON_COUNT];
        mcu.raise_digital(true);
        mcu.raise_analog(AnalogChannel::XAxis, AXIS_MV_VCC);
        mcu.raise_analog(AnalogChannel::YAxis, AXIS_MV_VCC);
    }

    /// Apply a press/release event. Returns false for redundant events
    /// (button already in that state), which have no side effects.
    pub fn event(&mut self, mcu: &mut dyn Mcu, btn: Button, pressed: bool) -> bool {
        if self.pressed[btn as usize] == pressed {
            return false;
        }
        self.pressed[btn as usize] = pressed;

        match btn {
            Button::Left | Button::Right => {
                let mv = axis_millivolts(
                    self.pressed[Button::Left as usize],
                    self.pressed[Button::Right as usize],
                );
                mcu.raise_analog(AnalogChannel::XAxis, mv);
            }
            Button::Up | Button::Down => {
                let mv = axis_millivolts(
                    self.pressed[Button::Down as usize],
                    self.pressed[Button::Up as usize],
                );
                mcu.raise_analog(AnalogChannel::YAxis, mv);
            }
            // Active-low: pressed drives the line low.
            Button::A => mcu.raise_digital(!pressed),
        }
        true
    }

    pub fn is_pressed(&self, btn: Button) -> bool {
        self.pressed[btn as usize]
    }
}

/// Combined ladder voltage for one axis; `first` is the 88 kΩ leg
/// (left on the horizontal axis, down on the vertical axis).
fn axis_millivolts(first: bool, second: bool) -> u16 {
    match (first, second) {
        (false, false) => AXIS_MV_VCC,
        (true, false) => AXIS_MV_88K,
        (false, true) => AXIS_MV_33K,
        (true, true) => AXIS_MV_BOTH,
    }
}
