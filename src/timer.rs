// The timer block is four registers on top of a single free-running 16 bit counter. The upper byte
// of that counter is DIV. TIMA does not have its own prescaler: it increments whenever a selected
// bit of the counter falls from 1 to 0 while the TAC enable bit is set. Any write that disturbs the
// counter (DIV resets it to zero) or the mux (TAC) can therefore produce a spurious falling edge
// and clock TIMA - real hardware does exactly this, and test roms check for it.
//
// See: http://gbdev.gg8.se/wiki/articles/Timer_and_Divider_Registers
use super::intf::{Flag, SharedIntf};
use super::memory::Memory;

pub struct Timer {
    intf: SharedIntf,
    // The whole counter. DIV (0xff04) is its upper 8 bits and increments at 16384 Hz.
    div: u16,
    tima: u8,
    tma: u8,
    //  Bit  2   - Timer Enable
    //  Bits 1-0 - Input Clock Select
    //             00: 4096 Hz   (counter bit 9)
    //             01: 262144 Hz (counter bit 3)
    //             10: 65536 Hz  (counter bit 5)
    //             11: 16384 Hz  (counter bit 7)
    tac: u8,
    // Base cycles until the delayed TMA reload. After an overflow TIMA reads zero for 4 cycles,
    // then the reload happens and the interrupt is requested. Zero when no overflow is pending.
    reload: u8,
}

impl Timer {
    pub fn power_up(intf: SharedIntf) -> Self {
        Self { intf, div: 0x0000, tima: 0x00, tma: 0x00, tac: 0x00, reload: 0 }
    }

    // The level feeding TIMA's edge detector: the selected counter bit gated by the enable bit.
    fn signal(&self) -> bool {
        if self.tac & 0x04 == 0x00 {
            return false;
        }
        let bit = match self.tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        };
        self.div >> bit & 0x01 != 0x00
    }

    fn increment_tima(&mut self) {
        self.tima = self.tima.wrapping_add(1);
        if self.tima == 0x00 {
            self.reload = 4;
        }
    }

    pub fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            if self.reload > 0 {
                self.reload -= 1;
                if self.reload == 0 {
                    self.tima = self.tma;
                    self.intf.borrow_mut().hi(Flag::Timer);
                }
            }
            let before = self.signal();
            self.div = self.div.wrapping_add(1);
            if before && !self.signal() {
                self.increment_tima();
            }
        }
    }
}

impl Memory for Timer {
    fn read(&self, a: u16) -> u8 {
        match a {
            0xff04 => (self.div >> 8) as u8,
            0xff05 => self.tima,
            0xff06 => self.tma,
            0xff07 => 0xf8 | self.tac,
            _ => 0xff,
        }
    }

    fn write(&mut self, a: u16, v: u8) {
        match a {
            0xff04 => {
                let before = self.signal();
                self.div = 0x0000;
                if before && !self.signal() {
                    self.increment_tima();
                }
            }
            0xff05 => {
                // Writing TIMA during the reload delay cancels the reload.
                self.tima = v;
                self.reload = 0;
            }
            0xff06 => self.tma = v,
            0xff07 => {
                let before = self.signal();
                self.tac = v & 0x07;
                if before && !self.signal() {
                    self.increment_tima();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::Intf;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn timer() -> Timer {
        Timer::power_up(Rc::new(RefCell::new(Intf::power_up())))
    }

    #[test]
    fn div_write_resets_counter() {
        let mut t = timer();
        t.tick(1024);
        assert_ne!(t.read(0xff04), 0x00);
        t.write(0xff04, 0x5a);
        assert_eq!(t.read(0xff04), 0x00);
    }

    #[test]
    fn tima_rate_follows_tac() {
        // 01 selects counter bit 3: one increment every 16 base cycles.
        let mut t = timer();
        t.write(0xff07, 0x05);
        t.tick(16);
        assert_eq!(t.read(0xff05), 0x01);
        t.tick(16 * 9);
        assert_eq!(t.read(0xff05), 0x0a);
    }

    #[test]
    fn tima_frozen_while_disabled() {
        let mut t = timer();
        t.write(0xff07, 0x01);
        t.tick(1024);
        assert_eq!(t.read(0xff05), 0x00);
    }

    #[test]
    fn div_write_can_clock_tima() {
        let mut t = timer();
        t.write(0xff07, 0x05);
        // Counter bit 3 is high after 8 cycles; zeroing the counter drops it.
        t.tick(8);
        t.write(0xff04, 0x00);
        assert_eq!(t.read(0xff05), 0x01);
    }

    #[test]
    fn overflow_reloads_after_four_cycles() {
        let mut t = timer();
        t.write(0xff06, 0xab);
        t.write(0xff07, 0x05);
        t.write(0xff05, 0xff);
        t.tick(16);
        // Overflowed: reads zero during the delay, then takes TMA and raises the interrupt.
        assert_eq!(t.read(0xff05), 0x00);
        t.tick(4);
        assert_eq!(t.read(0xff05), 0xab);
        assert_eq!(t.intf.borrow().data & 0x04, 0x04);
    }

    #[test]
    fn tima_write_cancels_pending_reload() {
        let mut t = timer();
        t.write(0xff06, 0xab);
        t.write(0xff07, 0x05);
        t.write(0xff05, 0xff);
        t.tick(16);
        t.write(0xff05, 0x42);
        t.tick(8);
        assert_eq!(t.read(0xff05), 0x42);
        assert_eq!(t.intf.borrow().data & 0x04, 0x00);
    }

    #[test]
    fn tac_unused_bits_read_high() {
        let mut t = timer();
        t.write(0xff07, 0x05);
        assert_eq!(t.read(0xff07), 0xfd);
    }
}
