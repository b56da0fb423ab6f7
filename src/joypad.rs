// The eight buttons are arranged as a 2x4 matrix: one nibble of direction keys and one nibble of
// action keys. A program selects which half it wants to see by writing the select bits of P1, then
// reads the four input lines. Lines are active low: 0 means pressed.
//
// FF00 - P1/JOYP - Joypad (R/W)
//
// Bit 7 - Not used (reads 1)
// Bit 6 - Not used (reads 1)
// Bit 5 - P15 Select Action Keys      (0=Select)
// Bit 4 - P14 Select Direction Keys   (0=Select)
// Bit 3 - P13 Input Down  or Start    (0=Pressed) (Read Only)
// Bit 2 - P12 Input Up    or Select   (0=Pressed) (Read Only)
// Bit 1 - P11 Input Left  or Button B (0=Pressed) (Read Only)
// Bit 0 - P10 Input Right or Button A (0=Pressed) (Read Only)
use super::intf::{Flag, SharedIntf};
use super::memory::Memory;

#[rustfmt::skip]
#[derive(Clone, Copy)]
pub enum JoypadKey {
    Right  = 0b0000_0001,
    Left   = 0b0000_0010,
    Up     = 0b0000_0100,
    Down   = 0b0000_1000,
    A      = 0b0001_0000,
    B      = 0b0010_0000,
    Select = 0b0100_0000,
    Start  = 0b1000_0000,
}

pub struct Joypad {
    intf: SharedIntf,
    // Low nibble directions, high nibble actions, bit clear when pressed.
    matrix: u8,
    select: u8,
}

impl Joypad {
    pub fn power_up(intf: SharedIntf) -> Self {
        Self { intf, matrix: 0xff, select: 0x30 }
    }

    // The joypad interrupt fires on a high-to-low edge of a line the program currently has
    // selected, so a press only interrupts when its half of the matrix is visible.
    pub fn keydown(&mut self, key: JoypadKey) {
        let was_up = self.matrix & key as u8 != 0x00;
        self.matrix &= !(key as u8);
        let selected = match key {
            JoypadKey::Right | JoypadKey::Left | JoypadKey::Up | JoypadKey::Down => self.select & 0x10 == 0x00,
            _ => self.select & 0x20 == 0x00,
        };
        if was_up && selected {
            self.intf.borrow_mut().hi(Flag::Joypad);
        }
    }

    pub fn keyup(&mut self, key: JoypadKey) {
        self.matrix |= key as u8;
    }
}

impl Memory for Joypad {
    fn read(&self, a: u16) -> u8 {
        assert_eq!(a, 0xff00);
        // Bits 6-7 are not wired and read 1. With neither half selected all lines float high.
        let hi = 0xc0 | self.select;
        if self.select & 0x10 == 0x00 {
            return hi | (self.matrix & 0x0f);
        }
        if self.select & 0x20 == 0x00 {
            return hi | (self.matrix >> 4);
        }
        hi | 0x0f
    }

    fn write(&mut self, a: u16, v: u8) {
        assert_eq!(a, 0xff00);
        // Only the two select bits are writable.
        self.select = v & 0x30;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::Intf;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn joypad() -> Joypad {
        Joypad::power_up(Rc::new(RefCell::new(Intf::power_up())))
    }

    #[test]
    fn selected_nibble_reflects_presses() {
        let mut pad = joypad();
        pad.keydown(JoypadKey::Left);
        pad.write(0xff00, 0x20); // select directions
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0d);
        pad.write(0xff00, 0x10); // select actions
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0f);
        pad.keyup(JoypadKey::Left);
        pad.write(0xff00, 0x20);
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0f);
    }

    #[test]
    fn unused_bits_read_high() {
        let mut pad = joypad();
        pad.write(0xff00, 0x00);
        assert_eq!(pad.read(0xff00) & 0xc0, 0xc0);
    }

    #[test]
    fn interrupt_only_for_selected_half() {
        let mut pad = joypad();
        pad.write(0xff00, 0x20); // directions selected
        pad.keydown(JoypadKey::A);
        assert_eq!(pad.intf.borrow().data, 0x00);
        pad.keydown(JoypadKey::Down);
        assert_eq!(pad.intf.borrow().data, 1 << Flag::Joypad as u8);
    }
}
