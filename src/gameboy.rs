// The host-facing driver: owns the bus and the cpu, and runs the machine in frame or cycle
// budgets. This is the only surface a frontend needs - framebuffer out, samples out, buttons in,
// battery ram in and out.
use super::apu::Apu;
use super::bus::MainBus;
use super::cartridge::Cartridge;
use super::convention::{Term, CYCLES_PER_FRAME};
use super::cpu::Cpu;
use super::error::CoreError;
use super::joypad::JoypadKey;
use super::memory::Memory;
use super::ppu::{SCREEN_H, SCREEN_W};
use std::sync::{Arc, Mutex};

pub struct GameBoy {
    pub bus: MainBus,
    pub cpu: Cpu,
}

impl GameBoy {
    // Starts right where the boot rom would hand over: PC at 0x0100 and the io registers holding
    // their post-boot values, so a game runs immediately without any boot image.
    pub fn power_up(cartridge: Cartridge) -> Self {
        let term = cartridge.header.term();
        let mut bus = MainBus::power_up(cartridge, 48000);
        // Audio power first: the channel registers ignore writes while NR52 bit 7 is clear.
        bus.write(0xff26, 0xf1);
        bus.write(0xff10, 0x80);
        bus.write(0xff11, 0xbf);
        bus.write(0xff12, 0xf3);
        bus.write(0xff14, 0xbf);
        bus.write(0xff16, 0x3f);
        bus.write(0xff17, 0x00);
        bus.write(0xff19, 0xbf);
        bus.write(0xff1a, 0x7f);
        bus.write(0xff1b, 0xff);
        bus.write(0xff1c, 0x9f);
        bus.write(0xff1e, 0xbf);
        bus.write(0xff20, 0xff);
        bus.write(0xff21, 0x00);
        bus.write(0xff22, 0x00);
        bus.write(0xff23, 0xbf);
        bus.write(0xff24, 0x77);
        bus.write(0xff25, 0xf3);
        bus.write(0xff05, 0x00);
        bus.write(0xff06, 0x00);
        bus.write(0xff07, 0x00);
        bus.write(0xff40, 0x91);
        bus.write(0xff42, 0x00);
        bus.write(0xff43, 0x00);
        bus.write(0xff45, 0x00);
        bus.write(0xff47, 0xfc);
        bus.write(0xff48, 0xff);
        bus.write(0xff49, 0xff);
        bus.write(0xff4a, 0x00);
        bus.write(0xff4b, 0x00);
        Self { bus, cpu: Cpu::power_up(term) }
    }

    // Starts cold with PC at 0x0000 and the boot image mapped; the image itself sets the machine
    // up and unmaps the overlay through 0xff50.
    pub fn power_up_with_bootstrap(cartridge: Cartridge, term: Term, boot_rom: Vec<u8>) -> Result<Self, CoreError> {
        let valid = match term {
            Term::GB => boot_rom.len() == 0x100,
            Term::GBC => boot_rom.len() == 0x800 || boot_rom.len() == 0x900,
        };
        if !valid {
            return Err(CoreError::BadBootImage { term, len: boot_rom.len() });
        }
        let bus = MainBus::power_up_with_bootstrap(cartridge, term, boot_rom);
        Ok(Self { bus, cpu: Cpu::power_up_with_bootstrap() })
    }

    // One instruction (or interrupt dispatch); every subcomponent is already caught up when this
    // returns. The return value is the m-cycle count.
    pub fn step(&mut self) -> u32 {
        self.cpu.step(&mut self.bus)
    }

    // Runs whole frames of 70224 base cycles; double speed spends twice the cpu cycles for the
    // same wall-clock frame. Returns early if the cpu entered STOP.
    pub fn run_for_frames(&mut self, frames: u32) {
        for _ in 0..frames {
            let target = self.bus.cycles + u64::from(CYCLES_PER_FRAME);
            while self.bus.cycles < target {
                if self.cpu.stopped {
                    return;
                }
                self.cpu.step(&mut self.bus);
            }
        }
    }

    // Runs at least the given number of base cycles, finishing the last instruction.
    pub fn run_for_cycles(&mut self, cycles: u64) {
        let target = self.bus.cycles + cycles;
        while self.bus.cycles < target && !self.cpu.stopped {
            self.cpu.step(&mut self.bus);
        }
    }

    pub fn framebuffer(&self) -> &[[[u8; 4]; SCREEN_W]; SCREEN_H] {
        &self.bus.ppu.data
    }

    // True once per completed frame; consuming it rearms the flag.
    pub fn check_and_reset_frame(&mut self) -> bool {
        let r = self.bus.ppu.updated;
        self.bus.ppu.updated = false;
        r
    }

    // The shared sample buffer the audio unit fills; the host's audio callback drains it.
    pub fn audio_buffer(&self) -> Arc<Mutex<Vec<(f32, f32)>>> {
        self.bus.apu.buffer.clone()
    }

    // Moves the queued stereo samples into the given sink.
    pub fn flush_audio(&mut self, sink: &mut Vec<(f32, f32)>) {
        let buffer = self.bus.apu.buffer.clone();
        let mut buffer = buffer.lock().unwrap();
        sink.append(&mut buffer);
    }

    // Rebuilds the audio unit for a different host sample rate. Channel state restarts silent.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.bus.apu = Apu::power_up(self.bus.term, sample_rate);
    }

    pub fn set_button(&mut self, key: JoypadKey, pressed: bool) {
        if pressed {
            self.bus.joypad.keydown(key);
        } else {
            self.bus.joypad.keyup(key);
        }
    }

    pub fn set_dmg_palette(&mut self, shades: [[u8; 4]; 4]) {
        self.bus.ppu.set_dmg_palette(shades);
    }

    pub fn save_sram(&self) -> Result<(), CoreError> {
        self.bus.cartridge.save_sram()
    }

    pub fn load_sram(&mut self) {
        self.bus.cartridge.load_sram()
    }

    pub fn title(&self) -> String {
        self.bus.cartridge.header.title.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{build_cgb_rom, build_rom};

    fn gameboy() -> GameBoy {
        GameBoy::power_up(Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap())
    }

    #[test]
    fn post_boot_register_state() {
        let gb = gameboy();
        assert_eq!(gb.cpu.reg.pc, 0x0100);
        assert_eq!(gb.cpu.reg.a, 0x01);
        assert_eq!(gb.cpu.reg.sp, 0xfffe);
        assert_eq!(gb.bus.read(0xff40), 0x91);
        assert_eq!(gb.bus.read(0xff47), 0xfc);
        assert_eq!(gb.bus.read(0xff26) & 0x80, 0x80);
    }

    #[test]
    fn cgb_rom_powers_up_in_color_mode() {
        let gb = GameBoy::power_up(Cartridge::from_bytes(build_cgb_rom(0x00, 0x00, 0x00)).unwrap());
        assert_eq!(gb.cpu.reg.a, 0x11);
        assert_ne!(gb.bus.read(0xff70), 0xff);
    }

    #[test]
    fn run_for_frames_meets_the_cycle_budget() {
        let mut gb = gameboy();
        gb.run_for_frames(2);
        let spent = gb.bus.cycles;
        assert!(spent >= 2 * u64::from(crate::convention::CYCLES_PER_FRAME));
        // Whole instructions only: the overshoot is at most one instruction per frame.
        assert!(spent < 2 * u64::from(crate::convention::CYCLES_PER_FRAME) + 48);
        assert!(gb.check_and_reset_frame());
        assert!(!gb.check_and_reset_frame());
    }

    #[test]
    fn boot_image_size_is_validated() {
        let cart = Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap();
        match GameBoy::power_up_with_bootstrap(cart, Term::GB, vec![0x00; 0x200]) {
            Err(CoreError::BadBootImage { len: 0x200, .. }) => {}
            _ => panic!("expected BadBootImage"),
        }
        let cart = Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap();
        let gb = GameBoy::power_up_with_bootstrap(cart, Term::GB, vec![0x00; 0x100]).unwrap();
        assert_eq!(gb.cpu.reg.pc, 0x0000);
    }

    #[test]
    fn frames_are_deterministic() {
        let mut a = gameboy();
        let mut b = gameboy();
        a.set_button(JoypadKey::Start, true);
        b.set_button(JoypadKey::Start, true);
        a.run_for_frames(2);
        b.run_for_frames(2);
        let fa = a.framebuffer();
        let fb = b.framebuffer();
        for y in 0..crate::ppu::SCREEN_H {
            for x in 0..crate::ppu::SCREEN_W {
                assert_eq!(fa[y][x], fb[y][x]);
            }
        }
    }

    #[test]
    fn buttons_reach_the_joypad_register() {
        let mut gb = gameboy();
        gb.bus.write(0xff00, 0x20); // select directions
        gb.set_button(JoypadKey::Down, true);
        assert_eq!(gb.bus.read(0xff00) & 0x0f, 0x07);
        gb.set_button(JoypadKey::Down, false);
        assert_eq!(gb.bus.read(0xff00) & 0x0f, 0x0f);
    }
}
