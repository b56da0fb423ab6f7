// The 16 bit address bus offers only limited space for ROM and RAM addressing, so most games carry a
// Memory Bank Controller (MBC) chip in the cartridge and switch banks through writes into the ROM
// area. The required controller is named by the byte at 0x0147 of the cartridge header.
//
// Reference:
//   - http://gbdev.gg8.se/wiki/articles/The_Cartridge_Header
//   - http://gbdev.gg8.se/wiki/articles/Memory_Bank_Controllers
use super::convention::{Term, CLOCK_FREQUENCY};
use super::error::CoreError;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// Fields extracted from the header area at 0x0100-0x014f. The header checksum must match or the
// rom is rejected; the global checksum is informational and mismatches are tolerated, like on
// hardware.
pub struct CartHeader {
    // Title in upper case ascii at 0x0134, truncated to 11 bytes on color-aware carts.
    pub title: String,
    // 0x80 permits dual mode, 0xc0 requires the color machine.
    pub cgb_support: u8,
    pub mapper: u8,
    pub rom_size: usize,
    pub ram_size: usize,
    pub version: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
    pub entry_point: [u8; 4],
}

impl CartHeader {
    fn parse(rom: &[u8]) -> Result<Self, CoreError> {
        if rom.len() < 0x0150 {
            return Err(CoreError::BadRom(format!("image of {} bytes has no header area", rom.len())));
        }
        let mut checksum: u8 = 0;
        for v in &rom[0x0134..0x014d] {
            checksum = checksum.wrapping_sub(*v).wrapping_sub(1);
        }
        if checksum != rom[0x014d] {
            return Err(CoreError::BadRom(format!(
                "header checksum 0x{:02x} does not match computed 0x{:02x}",
                rom[0x014d],
                checksum
            )));
        }
        let mut title = String::new();
        let oc = if rom[0x0143] & 0x80 != 0x00 { 0x013f } else { 0x0144 };
        for v in &rom[0x0134..oc] {
            match *v {
                0 => break,
                v => title.push(v as char),
            }
        }
        let mut entry_point = [0x00; 4];
        entry_point.copy_from_slice(&rom[0x0100..0x0104]);
        Ok(CartHeader {
            title,
            cgb_support: rom[0x0143],
            mapper: rom[0x0147],
            rom_size: rom_size(rom[0x0148])?,
            ram_size: ram_size(rom[0x0149])?,
            version: rom[0x014c],
            header_checksum: rom[0x014d],
            global_checksum: (u16::from(rom[0x014e]) << 8) | u16::from(rom[0x014f]),
            entry_point,
        })
    }

    pub fn term(&self) -> Term {
        Term::from_cgb_flag(self.cgb_support)
    }
}

// Specifies the ROM size of the cartridge, calculated as 32KB << n for the common classes.
fn rom_size(b: u8) -> Result<usize, CoreError> {
    let bank = 0x4000;
    match b {
        0x00..=0x08 => Ok(bank * (2 << b)),
        0x52 => Ok(bank * 72),
        0x53 => Ok(bank * 80),
        0x54 => Ok(bank * 96),
        n => Err(CoreError::BadRom(format!("unknown rom size class 0x{:02x}", n))),
    }
}

// Specifies the size of the external RAM in the cartridge (if any).
fn ram_size(b: u8) -> Result<usize, CoreError> {
    match b {
        0x00 => Ok(0),
        0x01 => Ok(1024 * 2),
        0x02 => Ok(1024 * 8),
        0x03 => Ok(1024 * 32),
        0x04 => Ok(1024 * 128),
        0x05 => Ok(1024 * 64),
        n => Err(CoreError::BadRom(format!("unknown ram size class 0x{:02x}", n))),
    }
}

// The MBC3's clock counts real time on hardware; here it counts emulated cycles, one second per
// 4194304 of them, so two runs of the same rom see the same clock. The program reads a latched
// shadow copy frozen by the 0x00 -> 0x01 write sequence, never the live counters.
//
//  0x08  RTC S   Seconds   0-59
//  0x09  RTC M   Minutes   0-59
//  0x0a  RTC H   Hours     0-23
//  0x0b  RTC DL  Lower 8 bits of Day Counter
//  0x0c  RTC DH  Bit 0: Day Counter bit 8, Bit 6: Halt, Bit 7: Day Counter Carry (sticky)
struct RealTimeClock {
    s: u8,
    m: u8,
    h: u8,
    dl: u8,
    dh: u8,
    latch: [u8; 5],
    latch_step: u8,
    cycles: u32,
}

impl RealTimeClock {
    fn power_up() -> Self {
        Self { s: 0, m: 0, h: 0, dl: 0, dh: 0, latch: [0x00; 5], latch_step: 0xff, cycles: 0 }
    }

    fn halted(&self) -> bool {
        self.dh & 0x40 != 0x00
    }

    fn tick(&mut self, cycles: u32) {
        if self.halted() {
            return;
        }
        self.cycles += cycles;
        while self.cycles >= CLOCK_FREQUENCY {
            self.cycles -= CLOCK_FREQUENCY;
            self.advance_seconds(1);
        }
    }

    fn advance_seconds(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        let days = u64::from(self.dl) | (u64::from(self.dh & 0x01) << 8);
        let total = u64::from(self.s % 60)
            + u64::from(self.m % 60) * 60
            + u64::from(self.h % 24) * 3600
            + days * 86400
            + n;
        self.s = (total % 60) as u8;
        self.m = (total / 60 % 60) as u8;
        self.h = (total / 3600 % 24) as u8;
        let days = total / 86400;
        self.dl = (days & 0xff) as u8;
        self.dh = (self.dh & 0xfe) | ((days >> 8) & 0x01) as u8;
        if days > 0x1ff {
            // The overflow bit stays set until the program clears it.
            self.dh |= 0x80;
        }
    }

    // Writing 0x00 then 0x01 to 0x6000-0x7fff freezes the shadow copy the program reads.
    fn set_latch(&mut self, v: u8) {
        if self.latch_step == 0x00 && v == 0x01 {
            self.latch = [self.s, self.m, self.h, self.dl, self.dh];
        }
        self.latch_step = v;
    }

    fn read(&self, r: u8) -> u8 {
        match r {
            0x08..=0x0c => self.latch[r as usize - 0x08],
            _ => 0xff,
        }
    }

    fn write(&mut self, r: u8, v: u8) {
        match r {
            0x08 => {
                self.s = v & 0x3f;
                // Seconds writes also restart the sub-second prescaler.
                self.cycles = 0;
            }
            0x09 => self.m = v & 0x3f,
            0x0a => self.h = v & 0x1f,
            0x0b => self.dl = v,
            0x0c => self.dh = v & 0xc1,
            _ => {}
        }
    }
}

// Mapper state only; the rom/ram images live on the cartridge so every variant shares them.
enum Mbc {
    // A plain 32KB image occupying 0x0000-0x7fff. Writes to the rom area are ignored.
    Rom,
    // 5 bit low bank select with the 0 -> 1 translation applied to the combined bank number, 2 bit
    // upper bits, and a mode flag routing those upper bits to either the low rom window or to ram
    // banking. Writing any value with 0xa in the low nibble to 0x0000-0x1fff enables ram.
    Mbc1 { low_bank: u8, upper_bits: u8, mode: bool, ram_enable: bool },
    // 512x4 bits of ram built into the controller itself. Bit 8 of the write address selects
    // between the ram enable and the 4 bit rom bank register.
    Mbc2 { rom_bank: usize, ram_enable: bool },
    // 7 bit rom bank select plus an optional real time clock mapped over the ram window when the
    // bank select holds 0x08-0x0c.
    Mbc3 { rom_bank: usize, select: u8, ram_enable: bool, rtc: Option<RealTimeClock> },
    // 9 bit rom bank select split over two registers. Unlike its ancestors, bank 0 is selectable
    // in the switchable window.
    Mbc5 { rom_bank: usize, ram_bank: usize, ram_enable: bool },
}

pub struct Cartridge {
    pub header: CartHeader,
    rom: Vec<u8>,
    ram: Vec<u8>,
    mbc: Mbc,
    sav_path: PathBuf,
}

impl Cartridge {
    // Builds a cartridge from an in-memory image. No sidecar save file is attached.
    pub fn from_bytes(mut rom: Vec<u8>) -> Result<Self, CoreError> {
        let header = CartHeader::parse(&rom)?;
        if rom.len() > header.rom_size {
            return Err(CoreError::BadRom(format!(
                "image of {} bytes exceeds the {} byte header class",
                rom.len(),
                header.rom_size
            )));
        }
        rom.resize(header.rom_size, 0xff);
        let (mbc, ram_len) = match header.mapper {
            0x00 => (Mbc::Rom, header.ram_size),
            0x01..=0x03 => (Mbc::Mbc1 { low_bank: 0x00, upper_bits: 0x00, mode: false, ram_enable: false }, header.ram_size),
            0x05..=0x06 => (Mbc::Mbc2 { rom_bank: 0x01, ram_enable: false }, 512),
            0x0f..=0x13 => {
                let rtc = match header.mapper {
                    0x0f | 0x10 => Some(RealTimeClock::power_up()),
                    _ => None,
                };
                (Mbc::Mbc3 { rom_bank: 0x01, select: 0x00, ram_enable: false, rtc }, header.ram_size)
            }
            0x19..=0x1e => (Mbc::Mbc5 { rom_bank: 0x01, ram_bank: 0x00, ram_enable: false }, header.ram_size),
            n => return Err(CoreError::UnsupportedMapper(n)),
        };
        Ok(Cartridge { header, rom, ram: vec![0x00; ram_len], mbc, sav_path: PathBuf::new() })
    }

    // Reads a rom image from disk and, for battery-backed carts, pulls the sidecar save keyed by
    // the rom path. A missing or truncated save simply leaves the ram zeroed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        rog::debugln!("Loading cartridge from {:?}", path.as_ref());
        let rom = std::fs::read(path.as_ref()).map_err(|e| CoreError::BadRom(format!("{}", e)))?;
        let mut cart = Self::from_bytes(rom)?;
        rog::debugln!("Cartridge name is {}", cart.header.title);
        if cart.has_battery() {
            cart.sav_path = path.as_ref().with_extension("sav");
            cart.load_sram();
        }
        Ok(cart)
    }

    pub fn has_battery(&self) -> bool {
        matches!(self.header.mapper, 0x03 | 0x06 | 0x0f | 0x10 | 0x13 | 0x1b | 0x1e)
    }

    fn rom_banks(&self) -> usize {
        self.rom.len() / 0x4000
    }

    fn read_rom_bank(&self, bank: usize, a: u16) -> u8 {
        self.rom[(bank % self.rom_banks()) * 0x4000 + (a as usize & 0x3fff)]
    }

    fn read_ram_bank(&self, bank: usize, a: u16) -> u8 {
        let i = bank * 0x2000 + (a as usize & 0x1fff);
        if i < self.ram.len() {
            self.ram[i]
        } else {
            0xff
        }
    }
}

impl Cartridge {
    // Reads over 0x0000-0x7fff.
    pub fn read(&self, a: u16) -> u8 {
        match &self.mbc {
            Mbc::Rom => self.rom[a as usize],
            Mbc::Mbc1 { low_bank, upper_bits, mode, .. } => match a {
                0x0000..=0x3fff => {
                    let bank = if *mode { usize::from(*upper_bits) << 5 } else { 0 };
                    self.read_rom_bank(bank, a)
                }
                _ => {
                    let bank = (usize::from(*upper_bits) << 5) | usize::from(*low_bank);
                    // Banks 0x00, 0x20, 0x40 and 0x60 are never addressable through the high
                    // window; the controller bumps them to the next bank.
                    let bank = if *low_bank == 0x00 { bank | 0x01 } else { bank };
                    self.read_rom_bank(bank, a)
                }
            },
            Mbc::Mbc2 { rom_bank, .. } => match a {
                0x0000..=0x3fff => self.rom[a as usize],
                _ => self.read_rom_bank(*rom_bank, a),
            },
            Mbc::Mbc3 { rom_bank, .. } => match a {
                0x0000..=0x3fff => self.rom[a as usize],
                _ => self.read_rom_bank(*rom_bank, a),
            },
            Mbc::Mbc5 { rom_bank, .. } => match a {
                0x0000..=0x3fff => self.rom[a as usize],
                _ => self.read_rom_bank(*rom_bank, a),
            },
        }
    }

    // Writes over 0x0000-0x7fff hit the controller's registers, never the rom.
    pub fn write(&mut self, a: u16, v: u8) {
        match &mut self.mbc {
            Mbc::Rom => {}
            Mbc::Mbc1 { low_bank, upper_bits, mode, ram_enable } => match a {
                0x0000..=0x1fff => *ram_enable = v & 0x0f == 0x0a,
                0x2000..=0x3fff => *low_bank = v & 0x1f,
                0x4000..=0x5fff => *upper_bits = v & 0x03,
                0x6000..=0x7fff => *mode = v & 0x01 != 0x00,
                _ => {}
            },
            Mbc::Mbc2 { rom_bank, ram_enable } => {
                if let 0x0000..=0x3fff = a {
                    // Bit 8 of the address picks the register.
                    if a & 0x0100 == 0x0000 {
                        *ram_enable = v & 0x0f == 0x0a;
                    } else {
                        *rom_bank = match v & 0x0f {
                            0x00 => 0x01,
                            n => n as usize,
                        };
                    }
                }
            }
            Mbc::Mbc3 { rom_bank, select, ram_enable, rtc } => match a {
                0x0000..=0x1fff => *ram_enable = v & 0x0f == 0x0a,
                0x2000..=0x3fff => {
                    *rom_bank = match v & 0x7f {
                        0x00 => 0x01,
                        n => n as usize,
                    };
                }
                0x4000..=0x5fff => *select = v & 0x0f,
                0x6000..=0x7fff => {
                    if let Some(rtc) = rtc {
                        rtc.set_latch(v);
                    }
                }
                _ => {}
            },
            Mbc::Mbc5 { rom_bank, ram_bank, ram_enable } => match a {
                0x0000..=0x1fff => *ram_enable = v & 0x0f == 0x0a,
                0x2000..=0x2fff => *rom_bank = (*rom_bank & 0x100) | usize::from(v),
                0x3000..=0x3fff => *rom_bank = (*rom_bank & 0x0ff) | (usize::from(v & 0x01) << 8),
                0x4000..=0x5fff => *ram_bank = usize::from(v & 0x0f),
                _ => {}
            },
        }
    }

    // External ram or RTC register reads over 0xa000-0xbfff. Disabled ram floats high.
    pub fn read_ram(&self, a: u16) -> u8 {
        match &self.mbc {
            Mbc::Rom => 0xff,
            Mbc::Mbc1 { upper_bits, mode, ram_enable, .. } => {
                if !*ram_enable {
                    return 0xff;
                }
                let bank = if *mode { usize::from(*upper_bits) } else { 0 };
                self.read_ram_bank(bank, a)
            }
            Mbc::Mbc2 { ram_enable, .. } => {
                if !*ram_enable {
                    return 0xff;
                }
                // Only the low nibble exists; the high one floats.
                self.ram[a as usize & 0x1ff] | 0xf0
            }
            Mbc::Mbc3 { select, ram_enable, rtc, .. } => {
                if !*ram_enable {
                    return 0xff;
                }
                match (*select, rtc) {
                    (0x00..=0x03, _) => self.read_ram_bank(usize::from(*select), a),
                    (0x08..=0x0c, Some(rtc)) => rtc.read(*select),
                    _ => 0xff,
                }
            }
            Mbc::Mbc5 { ram_bank, ram_enable, .. } => {
                if !*ram_enable {
                    return 0xff;
                }
                self.read_ram_bank(*ram_bank, a)
            }
        }
    }

    pub fn write_ram(&mut self, a: u16, v: u8) {
        let ram = &mut self.ram;
        let store = |ram: &mut Vec<u8>, bank: usize, v: u8| {
            let i = bank * 0x2000 + (a as usize & 0x1fff);
            if i < ram.len() {
                ram[i] = v;
            }
        };
        match &mut self.mbc {
            Mbc::Rom => {}
            Mbc::Mbc1 { upper_bits, mode, ram_enable, .. } => {
                if *ram_enable {
                    let bank = if *mode { usize::from(*upper_bits) } else { 0 };
                    store(ram, bank, v);
                }
            }
            Mbc::Mbc2 { ram_enable, .. } => {
                if *ram_enable {
                    ram[a as usize & 0x1ff] = v & 0x0f;
                }
            }
            Mbc::Mbc3 { select, ram_enable, rtc, .. } => {
                if !*ram_enable {
                    return;
                }
                match (*select, rtc) {
                    (0x00..=0x03, _) => store(ram, usize::from(*select), v),
                    (0x08..=0x0c, Some(rtc)) => rtc.write(*select, v),
                    _ => {}
                }
            }
            Mbc::Mbc5 { ram_bank, ram_enable, .. } => {
                if *ram_enable {
                    store(ram, *ram_bank, v);
                }
            }
        }
    }

    // Advances the MBC3 clock; a no-op for every other controller.
    pub fn tick(&mut self, cycles: u32) {
        if let Mbc::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc {
            rtc.tick(cycles);
        }
    }
}

impl Cartridge {
    // Persists battery ram to the sidecar file, with a 48 byte clock trailer on RTC carts: the
    // five live counters and five latched counters as little-endian u32, then the unix time of the
    // save as u64.
    pub fn save_sram(&self) -> Result<(), CoreError> {
        if !self.has_battery() || self.sav_path.as_os_str().is_empty() {
            return Ok(());
        }
        rog::debugln!("Ram is being persisted to {:?}", self.sav_path);
        let mut f = File::create(&self.sav_path)?;
        f.write_all(&self.ram)?;
        if let Mbc::Mbc3 { rtc: Some(rtc), .. } = &self.mbc {
            for v in &[rtc.s, rtc.m, rtc.h, rtc.dl, rtc.dh] {
                f.write_all(&u32::from(*v).to_le_bytes())?;
            }
            for v in &rtc.latch {
                f.write_all(&u32::from(*v).to_le_bytes())?;
            }
            let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            f.write_all(&now.to_le_bytes())?;
        }
        Ok(())
    }

    // Restores battery ram from the sidecar file. Missing or wrong-size saves are ignored and the
    // ram stays zeroed. A clock trailer advances the RTC by the wall time spent powered off.
    pub fn load_sram(&mut self) {
        if self.sav_path.as_os_str().is_empty() {
            return;
        }
        let data = match std::fs::read(&self.sav_path) {
            Ok(data) => data,
            Err(_) => return,
        };
        if data.len() < self.ram.len() {
            rog::debugln!("Ignoring save of {} bytes, expected {}", data.len(), self.ram.len());
            return;
        }
        let ram_len = self.ram.len();
        self.ram.copy_from_slice(&data[..ram_len]);
        if let Mbc::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc {
            if data.len() >= ram_len + 48 {
                let trailer = &data[ram_len..];
                let word = |i: usize| trailer[i * 4];
                rtc.s = word(0) & 0x3f;
                rtc.m = word(1) & 0x3f;
                rtc.h = word(2) & 0x1f;
                rtc.dl = word(3);
                rtc.dh = word(4) & 0xc1;
                for i in 0..5 {
                    rtc.latch[i] = word(5 + i);
                }
                let mut ts = [0x00; 8];
                ts.copy_from_slice(&trailer[40..48]);
                let saved = u64::from_le_bytes(ts);
                let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(saved);
                if !rtc.halted() {
                    rtc.advance_seconds(now.saturating_sub(saved));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::build_rom;

    #[test]
    fn parses_header() {
        let cart = Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap();
        assert_eq!(cart.header.title, "GAMEKID TEST");
        assert_eq!(cart.header.mapper, 0x00);
        assert_eq!(cart.header.rom_size, 0x8000);
        assert!(!cart.has_battery());
    }

    #[test]
    fn rejects_short_image() {
        match Cartridge::from_bytes(vec![0x00; 0x100]) {
            Err(CoreError::BadRom(_)) => {}
            _ => panic!("expected BadRom"),
        }
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let mut rom = build_rom(0x00, 0x00, 0x00);
        rom[0x0134] = rom[0x0134].wrapping_add(1);
        match Cartridge::from_bytes(rom) {
            Err(CoreError::BadRom(_)) => {}
            _ => panic!("expected BadRom"),
        }
    }

    #[test]
    fn rejects_unknown_mapper() {
        match Cartridge::from_bytes(build_rom(0x0b, 0x00, 0x00)) {
            Err(CoreError::UnsupportedMapper(0x0b)) => {}
            _ => panic!("expected UnsupportedMapper"),
        }
    }

    #[test]
    fn mbc1_zero_selects_bank_one() {
        let mut cart = Cartridge::from_bytes(build_rom(0x01, 0x05, 0x00)).unwrap();
        cart.write(0x2000, 0x00);
        assert_eq!(cart.read(0x4000), 0x01);
        cart.write(0x2000, 0x12);
        assert_eq!(cart.read(0x4000), 0x12);
    }

    #[test]
    fn mbc1_remaps_combined_zero_banks() {
        // With the low five bits zero, combined banks 0x20/0x40/0x60 bump to the next bank.
        let mut cart = Cartridge::from_bytes(build_rom(0x01, 0x06, 0x00)).unwrap();
        cart.write(0x2000, 0x00);
        for upper in 1..4u8 {
            cart.write(0x4000, upper);
            assert_eq!(cart.read(0x4000), (upper << 5) | 0x01);
        }
    }

    #[test]
    fn mbc1_mode_moves_upper_bits_to_low_window() {
        let mut cart = Cartridge::from_bytes(build_rom(0x01, 0x06, 0x00)).unwrap();
        cart.write(0x4000, 0x01);
        assert_eq!(cart.read(0x0000), 0x00);
        cart.write(0x6000, 0x01);
        assert_eq!(cart.read(0x0000), 0x20);
    }

    #[test]
    fn mbc1_ram_gate() {
        let mut cart = Cartridge::from_bytes(build_rom(0x03, 0x00, 0x02)).unwrap();
        cart.write_ram(0xa000, 0x55);
        assert_eq!(cart.read_ram(0xa000), 0xff);
        cart.write(0x0000, 0x0a);
        cart.write_ram(0xa000, 0x55);
        assert_eq!(cart.read_ram(0xa000), 0x55);
        cart.write(0x0000, 0x00);
        assert_eq!(cart.read_ram(0xa000), 0xff);
    }

    #[test]
    fn mbc2_ram_is_nibbles() {
        let mut cart = Cartridge::from_bytes(build_rom(0x06, 0x00, 0x00)).unwrap();
        // Address bit 8 clear hits the enable register.
        cart.write(0x0000, 0x0a);
        cart.write_ram(0xa000, 0xa5);
        assert_eq!(cart.read_ram(0xa000), 0xf5);
    }

    #[test]
    fn mbc2_bank_register_needs_address_bit_8() {
        let mut cart = Cartridge::from_bytes(build_rom(0x05, 0x02, 0x00)).unwrap();
        cart.write(0x2000, 0x03);
        assert_eq!(cart.read(0x4000), 0x01);
        cart.write(0x2100, 0x03);
        assert_eq!(cart.read(0x4000), 0x03);
    }

    #[test]
    fn mbc3_rtc_latch_and_tick() {
        let mut cart = Cartridge::from_bytes(build_rom(0x10, 0x00, 0x02)).unwrap();
        cart.write(0x0000, 0x0a);
        cart.write(0x4000, 0x08);
        cart.tick(CLOCK_FREQUENCY * 61);
        // Nothing visible until a latch edge freezes the shadow copy.
        assert_eq!(cart.read_ram(0xa000), 0x00);
        cart.write(0x6000, 0x00);
        cart.write(0x6000, 0x01);
        assert_eq!(cart.read_ram(0xa000), 0x01);
        cart.write(0x4000, 0x09);
        assert_eq!(cart.read_ram(0xa000), 0x01);
    }

    #[test]
    fn mbc3_rtc_halt_stops_counting() {
        let mut cart = Cartridge::from_bytes(build_rom(0x10, 0x00, 0x02)).unwrap();
        cart.write(0x0000, 0x0a);
        cart.write(0x4000, 0x0c);
        cart.write_ram(0xa000, 0x40);
        cart.tick(CLOCK_FREQUENCY * 10);
        cart.write(0x6000, 0x00);
        cart.write(0x6000, 0x01);
        cart.write(0x4000, 0x08);
        assert_eq!(cart.read_ram(0xa000), 0x00);
    }

    #[test]
    fn mbc5_nine_bit_bank_select() {
        let mut cart = Cartridge::from_bytes(build_rom(0x19, 0x07, 0x00)).unwrap();
        cart.write(0x2000, 0x42);
        assert_eq!(cart.read(0x4000), 0x42);
        // The ninth bit wraps past the 256 banks of this image, landing on bank 0x42 again.
        cart.write(0x3000, 0x01);
        assert_eq!(cart.read(0x4000), 0x42);
        // Unlike MBC1, bank 0 is reachable through the high window.
        cart.write(0x3000, 0x00);
        cart.write(0x2000, 0x00);
        assert_eq!(cart.read(0x4000), 0x00);
    }

    #[test]
    fn sram_round_trips_through_save_file() {
        let rom_path = std::env::temp_dir().join("gamekid_cartridge_test.gb");
        std::fs::write(&rom_path, build_rom(0x03, 0x00, 0x02)).unwrap();
        let sav_path = rom_path.with_extension("sav");
        let _ = std::fs::remove_file(&sav_path);

        let mut cart = Cartridge::from_file(&rom_path).unwrap();
        cart.write(0x0000, 0x0a);
        for i in 0..16 {
            cart.write_ram(0xa000 + i, (i * 3) as u8);
        }
        cart.save_sram().unwrap();

        let mut other = Cartridge::from_file(&rom_path).unwrap();
        other.write(0x0000, 0x0a);
        for i in 0..16 {
            assert_eq!(other.read_ram(0xa000 + i), (i * 3) as u8);
        }
        let _ = std::fs::remove_file(&rom_path);
        let _ = std::fs::remove_file(&sav_path);
    }
}
