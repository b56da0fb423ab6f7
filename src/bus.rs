// The main bus decodes every cpu address, routes it to the owning component and keeps the handful
// of registers that belong to no one else: the boot rom overlay, KEY0/KEY1, and the WRAM bank
// select. It is also the machine's clock distributor: each m-cycle the cpu consumes is fanned out
// from here to the timer, the video and audio units, the OAM DMA engine and the cartridge clock.
//
// General memory map:
// 0000-3FFF   16KB ROM bank 00 (in cartridge)
// 4000-7FFF   16KB ROM bank 01..NN (in cartridge, switchable)
// 8000-9FFF   8KB Video RAM (switchable bank 0-1 in color mode)
// A000-BFFF   8KB external RAM (in cartridge, switchable, if any)
// C000-CFFF   4KB Work RAM bank 0
// D000-DFFF   4KB Work RAM bank 1 (switchable 1-7 in color mode)
// E000-FDFF   Echo of C000-DDFF
// FE00-FE9F   Sprite attribute table (OAM)
// FEA0-FEFF   Not usable
// FF00-FF7F   I/O ports
// FF80-FFFE   High RAM
// FFFF        Interrupt enable register
use super::apu::Apu;
use super::cartridge::Cartridge;
use super::convention::Term;
use super::dma::{Hdma, HdmaMode, OamDma};
use super::intf::{Intf, SharedIntf};
use super::joypad::Joypad;
use super::memory::Memory;
use super::ppu::Ppu;
use super::timer::Timer;
use std::cell::RefCell;
use std::rc::Rc;

// KEY0 bit 2: locks the color machine into monochrome-compatible behavior. Latched by the boot rom
// before it unmaps itself.
pub const DISABLE_CGB_FUNCTIONS: u8 = 0x04;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Speed {
    Normal = 0x01,
    Double = 0x02,
}

pub struct MainBus {
    pub cartridge: Cartridge,
    pub apu: Apu,
    pub ppu: Ppu,
    pub joypad: Joypad,
    pub timer: Timer,
    pub term: Term,
    pub intf: SharedIntf,
    pub speed: Speed,
    // KEY1 bit 0: a speed switch has been requested and the next STOP performs it.
    shift: bool,
    oam_dma: OamDma,
    hdma: Hdma,
    // The boot image, kept only while mapped. On the monochrome machine it covers 0x0000-0x00ff;
    // the color image additionally covers 0x0200-0x08ff, with or without the 256 byte gap baked
    // into the file.
    boot_rom: Vec<u8>,
    boot_mapped: bool,
    key0: u8,
    inte: u8,
    hram: [u8; 0x7f],
    wram: [u8; 0x8000],
    wram_bank: usize,
    // Wall-clock-equivalent base cycles consumed, used by the driver for frame budgeting.
    pub cycles: u64,
}

impl MainBus {
    pub fn power_up(cartridge: Cartridge, sample_rate: u32) -> Self {
        let term = cartridge.header.term();
        let key0 = if term == Term::GBC { cartridge.header.cgb_support } else { DISABLE_CGB_FUNCTIONS };
        let mut bus = Self::build(cartridge, term, sample_rate);
        bus.key0 = key0;
        bus
    }

    pub fn power_up_with_bootstrap(cartridge: Cartridge, term: Term, boot_rom: Vec<u8>) -> Self {
        let mut bus = Self::build(cartridge, term, 48000);
        bus.boot_rom = boot_rom;
        bus.boot_mapped = true;
        if term == Term::GB {
            bus.key0 = DISABLE_CGB_FUNCTIONS;
        }
        bus
    }

    fn build(cartridge: Cartridge, term: Term, sample_rate: u32) -> Self {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        Self {
            cartridge,
            apu: Apu::power_up(term, sample_rate),
            ppu: Ppu::power_up(term, intf.clone()),
            joypad: Joypad::power_up(intf.clone()),
            timer: Timer::power_up(intf.clone()),
            term,
            intf,
            speed: Speed::Normal,
            shift: false,
            oam_dma: OamDma::power_up(),
            hdma: Hdma::power_up(),
            boot_rom: Vec::new(),
            boot_mapped: false,
            key0: 0x00,
            inte: 0x00,
            hram: [0x00; 0x7f],
            wram: [0x00; 0x8000],
            wram_bank: 0x01,
            cycles: 0,
        }
    }

    // Monochrome machine, or a color machine latched into compatibility mode: the color-only
    // ports (KEY1, VBK, the palette ports, SVBK) read 0xff and ignore writes.
    fn is_compat(&self) -> bool {
        self.term == Term::GB || self.key0 & DISABLE_CGB_FUNCTIONS != 0x00
    }

    fn boot_overlaps(&self, a: u16) -> bool {
        if !self.boot_mapped {
            return false;
        }
        match a {
            0x0000..=0x00ff => true,
            0x0200..=0x08ff => self.term == Term::GBC,
            _ => false,
        }
    }

    fn read_boot(&self, a: u16) -> u8 {
        // A 2048 byte color image is the two code windows packed together; the 2304 byte layout
        // keeps the unused gap, and the monochrome image is addressed directly.
        let i = if a >= 0x0200 && self.boot_rom.len() == 0x800 { a as usize - 0x100 } else { a as usize };
        self.boot_rom.get(i).copied().unwrap_or(0xff)
    }

    pub fn speed_switch_armed(&self) -> bool {
        self.shift
    }

    // Performs an armed speed switch; the cpu calls back on STOP.
    pub fn switch_speed(&mut self) {
        if self.shift {
            self.speed = if self.speed == Speed::Double { Speed::Normal } else { Speed::Double };
        }
        self.shift = false;
    }

    // Fans m-cycles out to everything that runs off the clock. The timer counts cpu clocks (4 per
    // m-cycle in either speed); the video unit, audio unit and cartridge clock run at the base
    // rate, which is half the cpu clock in double speed.
    pub fn tick(&mut self, m_cycles: u32) {
        for _ in 0..m_cycles {
            self.timer.tick(4);
            if let Some((src, dst)) = self.oam_dma.step() {
                let v = self.read_raw(src);
                self.ppu.write(dst, v);
            }
            let base = if self.speed == Speed::Double { 2 } else { 4 };
            self.cycles += u64::from(base);
            self.ppu.tick(base);
            self.apu.tick(base);
            self.cartridge.tick(base);
            if self.ppu.take_hblank() && self.hdma.active && self.hdma.mode == HdmaMode::Hdma {
                self.run_hdma_block();
            }
        }
    }

    fn run_hdma_block(&mut self) {
        let src = self.hdma.src;
        for i in 0..0x10 {
            let v = self.read_raw(src.wrapping_add(i));
            self.ppu.write(self.hdma.dst.wrapping_add(i), v);
        }
        self.hdma.src = self.hdma.src.wrapping_add(0x10);
        self.hdma.dst = self.hdma.dst.wrapping_add(0x10);
        if self.hdma.remain == 0 {
            self.hdma.remain = 0x7f;
            self.hdma.active = false;
        } else {
            self.hdma.remain -= 1;
        }
    }

    // General purpose DMA moves everything at once while the cpu stalls.
    fn run_gdma(&mut self) {
        let mut blocks = 0;
        while self.hdma.active {
            self.run_hdma_block();
            blocks += 1;
        }
        self.tick(8 * blocks);
    }

    // The bus as the DMA engines and the rest of the machine see it, immune to the OAM DMA
    // conflict rule that applies to the cpu.
    pub fn read_raw(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x7fff => {
                if self.boot_overlaps(a) {
                    self.read_boot(a)
                } else {
                    self.cartridge.read(a)
                }
            }
            0x8000..=0x9fff => self.ppu.read(a),
            0xa000..=0xbfff => self.cartridge.read_ram(a),
            0xc000..=0xcfff => self.wram[a as usize & 0x0fff],
            0xd000..=0xdfff => self.wram[(a as usize & 0x0fff) + 0x1000 * self.wram_bank],
            0xe000..=0xefff => self.wram[a as usize & 0x0fff],
            0xf000..=0xfdff => self.wram[(a as usize & 0x0fff) + 0x1000 * self.wram_bank],
            0xfe00..=0xfe9f => self.ppu.read(a),
            0xfea0..=0xfeff => 0xff,
            0xff00 => self.joypad.read(a),
            0xff04..=0xff07 => self.timer.read(a),
            0xff0f => 0xe0 | self.intf.borrow().data,
            0xff10..=0xff3f => self.apu.read(a),
            0xff46 => self.oam_dma.register(),
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.read(a),
            0xff4c => self.key0,
            0xff4d => {
                if self.is_compat() {
                    return 0xff;
                }
                let a = if self.speed == Speed::Double { 0x80 } else { 0x00 };
                let b = u8::from(self.shift);
                0x7e | a | b
            }
            0xff4f => {
                if self.is_compat() {
                    0xff
                } else {
                    self.ppu.read(a)
                }
            }
            0xff50 => 0xfe | u8::from(!self.boot_mapped),
            0xff51..=0xff55 => {
                if self.is_compat() {
                    0xff
                } else {
                    self.hdma.read(a)
                }
            }
            0xff68..=0xff6c => {
                if self.is_compat() {
                    0xff
                } else {
                    self.ppu.read(a)
                }
            }
            0xff70 => {
                if self.is_compat() {
                    0xff
                } else {
                    0xf8 | self.wram_bank as u8
                }
            }
            0xff80..=0xfffe => self.hram[a as usize - 0xff80],
            0xffff => self.inte,
            _ => 0xff,
        }
    }
}

impl Memory for MainBus {
    fn read(&self, a: u16) -> u8 {
        // While the OAM DMA engine owns the bus, the cpu only reaches high ram.
        if self.oam_dma.active && !(0xff80..=0xfffe).contains(&a) {
            return 0xff;
        }
        self.read_raw(a)
    }

    fn write(&mut self, a: u16, v: u8) {
        match a {
            0x0000..=0x7fff => {
                if !self.boot_overlaps(a) {
                    self.cartridge.write(a, v);
                }
            }
            0x8000..=0x9fff => self.ppu.write(a, v),
            0xa000..=0xbfff => self.cartridge.write_ram(a, v),
            0xc000..=0xcfff => self.wram[a as usize & 0x0fff] = v,
            0xd000..=0xdfff => self.wram[(a as usize & 0x0fff) + 0x1000 * self.wram_bank] = v,
            0xe000..=0xefff => self.wram[a as usize & 0x0fff] = v,
            0xf000..=0xfdff => self.wram[(a as usize & 0x0fff) + 0x1000 * self.wram_bank] = v,
            0xfe00..=0xfe9f => self.ppu.write(a, v),
            0xfea0..=0xfeff => {}
            0xff00 => self.joypad.write(a, v),
            0xff04..=0xff07 => self.timer.write(a, v),
            0xff0f => self.intf.borrow_mut().data = v & 0x1f,
            0xff10..=0xff3f => self.apu.write(a, v),
            0xff46 => self.oam_dma.start(v),
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.write(a, v),
            0xff4c => {
                // Only the boot rom may latch the compatibility mode.
                if self.boot_mapped {
                    self.key0 = v;
                }
            }
            0xff4d => {
                if !self.is_compat() {
                    self.shift = v & 0x01 != 0x00;
                }
            }
            0xff4f => {
                if !self.is_compat() {
                    self.ppu.write(a, v);
                }
            }
            0xff50 => {
                // One-shot: once unmapped the overlay never comes back until reset.
                if self.boot_mapped && v & 0x01 != 0x00 {
                    self.boot_mapped = false;
                    self.boot_rom = Vec::new();
                }
            }
            0xff51..=0xff55 => {
                if !self.is_compat() {
                    self.hdma.write(a, v);
                    if a == 0xff55 && self.hdma.active && self.hdma.mode == HdmaMode::Gdma {
                        self.run_gdma();
                    }
                }
            }
            0xff68..=0xff6c => {
                if !self.is_compat() {
                    self.ppu.write(a, v);
                }
            }
            0xff70 => {
                if !self.is_compat() {
                    self.wram_bank = match v & 0x07 {
                        0 => 1,
                        n => n as usize,
                    };
                }
            }
            0xff80..=0xfffe => self.hram[a as usize - 0xff80] = v,
            0xffff => self.inte = v,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{build_cgb_rom, build_rom};

    fn bus() -> MainBus {
        MainBus::power_up(Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap(), 48000)
    }

    fn cgb_bus() -> MainBus {
        MainBus::power_up(Cartridge::from_bytes(build_cgb_rom(0x00, 0x00, 0x00)).unwrap(), 48000)
    }

    #[test]
    fn wram_echo_mirrors_low_banks() {
        let mut bus = bus();
        bus.write(0xc123, 0x55);
        assert_eq!(bus.read(0xe123), 0x55);
        bus.write(0xd456, 0x66);
        assert_eq!(bus.read(0xf456), 0x66);
    }

    #[test]
    fn unusable_area_reads_high() {
        let mut bus = bus();
        bus.write(0xfea5, 0x12);
        assert_eq!(bus.read(0xfea5), 0xff);
    }

    #[test]
    fn wram_bank_zero_selects_one() {
        let mut bus = cgb_bus();
        bus.write(0xd000, 0x11);
        bus.write(0xff70, 0x02);
        bus.write(0xd000, 0x22);
        bus.write(0xff70, 0x00);
        assert_eq!(bus.read(0xff70), 0xf9);
        assert_eq!(bus.read(0xd000), 0x11);
    }

    #[test]
    fn cgb_ports_hidden_in_compat_mode() {
        let mut bus = bus();
        assert_eq!(bus.read(0xff70), 0xff);
        assert_eq!(bus.read(0xff4d), 0xff);
        assert_eq!(bus.read(0xff4f), 0xff);
        assert_eq!(bus.read(0xff68), 0xff);
        bus.write(0xff70, 0x03);
        bus.write(0xd000, 0x5a);
        assert_eq!(bus.read(0xd000), 0x5a);
        bus.write(0xff70, 0x01);
        assert_eq!(bus.read(0xd000), 0x5a);
    }

    #[test]
    fn interrupt_flag_unused_bits_read_high() {
        let mut bus = bus();
        bus.write(0xff0f, 0x05);
        assert_eq!(bus.read(0xff0f), 0xe5);
    }

    #[test]
    fn boot_overlay_unmaps_once() {
        let cart = Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap();
        let mut bus = MainBus::power_up_with_bootstrap(cart, Term::GB, vec![0xaa; 0x100]);
        assert_eq!(bus.read(0x0000), 0xaa);
        // Header reads bypass the overlay window.
        assert_eq!(bus.read(0x0147), 0x00);
        bus.write(0xff50, 0x01);
        assert_eq!(bus.read(0x0000), 0x00);
        bus.write(0xff50, 0x01);
        assert_eq!(bus.read(0xff50), 0xff);
    }

    #[test]
    fn key0_writable_only_while_boot_mapped() {
        let cart = Cartridge::from_bytes(build_cgb_rom(0x00, 0x00, 0x00)).unwrap();
        let mut bus = MainBus::power_up_with_bootstrap(cart, Term::GBC, vec![0x00; 0x900]);
        bus.write(0xff4c, 0x80);
        assert_eq!(bus.read(0xff4c), 0x80);
        bus.write(0xff50, 0x01);
        bus.write(0xff4c, DISABLE_CGB_FUNCTIONS);
        assert_eq!(bus.read(0xff4c), 0x80);
    }

    #[test]
    fn oam_dma_copies_and_owns_the_bus() {
        let mut bus = bus();
        for i in 0..0xa0u16 {
            bus.write(0xc100 + i, i as u8 ^ 0x5a);
        }
        bus.write(0xff46, 0xc1);
        // Mid-transfer the cpu sees 0xff everywhere but high ram.
        bus.write(0xff80, 0x77);
        bus.tick(10);
        assert_eq!(bus.read(0xc100), 0xff);
        assert_eq!(bus.read(0xff80), 0x77);
        bus.tick(150);
        for i in 0..0xa0u16 {
            assert_eq!(bus.read(0xfe00 + i), i as u8 ^ 0x5a);
        }
    }

    #[test]
    fn gdma_copies_to_vram_immediately() {
        let mut bus = cgb_bus();
        for i in 0..0x20u16 {
            bus.write(0xc000 + i, 0x80 | i as u8);
        }
        bus.write(0xff51, 0xc0);
        bus.write(0xff52, 0x00);
        bus.write(0xff53, 0x00);
        bus.write(0xff54, 0x00);
        // Length 0x01 = two 16 byte blocks, general mode.
        bus.write(0xff55, 0x01);
        assert_eq!(bus.read(0xff55), 0xff);
        for i in 0..0x20u16 {
            assert_eq!(bus.read(0x8000 + i), 0x80 | i as u8);
        }
    }

    #[test]
    fn speed_switch_arms_and_flips() {
        let mut bus = cgb_bus();
        assert_eq!(bus.read(0xff4d), 0x7e);
        bus.write(0xff4d, 0x01);
        assert_eq!(bus.read(0xff4d), 0x7f);
        bus.switch_speed();
        assert_eq!(bus.speed, Speed::Double);
        assert_eq!(bus.read(0xff4d), 0xfe);
    }
}
