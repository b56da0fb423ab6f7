// The SM83 interpreter. Execution is m-cycle accurate: every memory access first yields one
// m-cycle to the rest of the machine through the bus, and whatever the documented instruction
// length has left over is yielded as internal cycles after the opcode body. The per-instruction
// sum therefore always equals the tabled cycle count, taken and not-taken variants included.
use super::bus::MainBus;
use super::convention::Term;
use super::memory::Memory;
use super::register::Flag::{C, H, N, Z};
use super::register::Register;

//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
const OP_CYCLES: [u32; 256] = [
    1, 3, 2, 2, 1, 1, 2, 1, 5, 2, 2, 2, 1, 1, 2, 1, // 0
    1, 3, 2, 2, 1, 1, 2, 1, 3, 2, 2, 2, 1, 1, 2, 1, // 1
    2, 3, 2, 2, 1, 1, 2, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 2
    2, 3, 2, 2, 3, 3, 3, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 3
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 4
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 5
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 6
    2, 2, 2, 2, 2, 2, 1, 2, 1, 1, 1, 1, 1, 1, 2, 1, // 7
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 8
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 9
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // a
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // b
    2, 3, 3, 4, 3, 4, 2, 4, 2, 4, 3, 1, 3, 6, 2, 4, // c
    2, 3, 3, 1, 3, 4, 2, 4, 2, 4, 3, 1, 3, 1, 2, 4, // d
    3, 3, 2, 1, 1, 4, 2, 4, 4, 1, 4, 1, 1, 1, 2, 4, // e
    3, 3, 2, 1, 1, 4, 2, 4, 3, 2, 4, 1, 1, 1, 2, 4, // f
];

//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
const CB_CYCLES: [u32; 256] = [
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 0
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 1
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 2
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 3
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 4
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 5
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 6
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 7
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 8
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 9
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // a
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // b
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // c
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // d
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // e
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // f
];

pub struct Cpu {
    pub reg: Register,
    pub halted: bool,
    // Entered through STOP; only a reset leaves it. The driver breaks its run loop on this.
    pub stopped: bool,
    ime: bool,
    // Set by EI: the master enable only turns on after the following instruction.
    ei_pending: bool,
    // HALT with interrupts disabled but pending: the next instruction byte is fetched twice.
    halt_bug: bool,
    // M-cycles issued to the bus so far within the current instruction.
    ticks: u32,
}

impl Cpu {
    pub fn power_up(term: Term) -> Self {
        Self {
            reg: Register::power_up(term),
            halted: false,
            stopped: false,
            ime: false,
            ei_pending: false,
            halt_bug: false,
            ticks: 0,
        }
    }

    pub fn power_up_with_bootstrap() -> Self {
        Self {
            reg: Register::power_up_with_bootstrap(),
            halted: false,
            stopped: false,
            ime: false,
            ei_pending: false,
            halt_bug: false,
            ticks: 0,
        }
    }

    fn read_cycle(&mut self, bus: &mut MainBus, a: u16) -> u8 {
        bus.tick(1);
        self.ticks += 1;
        bus.read(a)
    }

    fn write_cycle(&mut self, bus: &mut MainBus, a: u16, v: u8) {
        bus.tick(1);
        self.ticks += 1;
        bus.write(a, v)
    }

    fn read_cycle_word(&mut self, bus: &mut MainBus, a: u16) -> u16 {
        u16::from(self.read_cycle(bus, a)) | (u16::from(self.read_cycle(bus, a.wrapping_add(1))) << 8)
    }

    fn write_cycle_word(&mut self, bus: &mut MainBus, a: u16, v: u16) {
        self.write_cycle(bus, a, (v & 0xff) as u8);
        self.write_cycle(bus, a.wrapping_add(1), (v >> 8) as u8);
    }

    fn imm(&mut self, bus: &mut MainBus) -> u8 {
        let v = self.read_cycle(bus, self.reg.pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.reg.pc = self.reg.pc.wrapping_add(1);
        }
        v
    }

    fn imm_word(&mut self, bus: &mut MainBus) -> u16 {
        let v = u16::from(self.imm(bus));
        v | (u16::from(self.imm(bus)) << 8)
    }

    fn stack_add(&mut self, bus: &mut MainBus, v: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(2);
        self.write_cycle_word(bus, self.reg.sp, v);
    }

    fn stack_pop(&mut self, bus: &mut MainBus) -> u16 {
        let r = self.read_cycle_word(bus, self.reg.sp);
        self.reg.sp = self.reg.sp.wrapping_add(2);
        r
    }
}

// The arithmetic/logic helpers. If 'flags affected' is not listed for an operation, none are.
impl Cpu {
    // Add n to A.
    // Z set on zero result, N reset, H on carry from bit 3, C on carry from bit 7.
    fn alu_add(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) > 0xff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Add n plus the carry flag to A.
    fn alu_adc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_add(n).wrapping_add(c);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) + u16::from(c) > 0xff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) + c > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Subtract n from A.
    // Z set on zero result, N set, H on borrow from bit 4, C on borrow.
    fn alu_sub(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_sub(n);
        self.reg.set_flag(C, u16::from(a) < u16::from(n));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f));
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Subtract n plus the carry flag from A.
    fn alu_sbc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_sub(n).wrapping_sub(c);
        self.reg.set_flag(C, u16::from(a) < u16::from(n) + u16::from(c));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f) + c);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Logical AND with A. Z on zero, N reset, H set, C reset.
    fn alu_and(&mut self, n: u8) {
        let r = self.reg.a & n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Logical OR with A. Z on zero, N/H/C reset.
    fn alu_or(&mut self, n: u8) {
        let r = self.reg.a | n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Logical exclusive OR with A. Z on zero, N/H/C reset.
    fn alu_xor(&mut self, n: u8) {
        let r = self.reg.a ^ n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Compare A with n: a subtraction whose result is thrown away.
    fn alu_cp(&mut self, n: u8) {
        let r = self.reg.a;
        self.alu_sub(n);
        self.reg.a = r;
    }

    // Increment. Z on zero, N reset, H on carry from bit 3, C unaffected.
    fn alu_inc(&mut self, a: u8) -> u8 {
        let r = a.wrapping_add(1);
        self.reg.set_flag(H, (a & 0x0f) + 0x01 > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Decrement. Z on zero, N set, H on borrow from bit 4, C unaffected.
    fn alu_dec(&mut self, a: u8) -> u8 {
        let r = a.wrapping_sub(1);
        self.reg.set_flag(H, a.trailing_zeros() >= 4);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0);
        r
    }

    // Add n to HL. Z unaffected, N reset, H on carry from bit 11, C on carry from bit 15.
    fn alu_add_hl(&mut self, n: u16) {
        let a = self.reg.get_hl();
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, a > 0xffff - n);
        self.reg.set_flag(H, (a & 0x07ff) + (n & 0x07ff) > 0x07ff);
        self.reg.set_flag(N, false);
        self.reg.set_hl(r);
    }

    // Add a signed immediate to SP. Z/N reset, H and C from the low byte addition.
    fn alu_add_sp(&mut self, b: u16) -> u16 {
        let a = self.reg.sp;
        self.reg.set_flag(C, (a & 0x00ff) + (b & 0x00ff) > 0x00ff);
        self.reg.set_flag(H, (a & 0x000f) + (b & 0x000f) > 0x000f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, false);
        a.wrapping_add(b)
    }

    // Swap nibbles. Z on zero, N/H/C reset.
    fn alu_swap(&mut self, a: u8) -> u8 {
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, a == 0x00);
        (a >> 4) | (a << 4)
    }

    // Decimal adjust A after a BCD add or subtract, steered by N, H and C.
    fn alu_daa(&mut self) {
        let mut a = self.reg.a;
        let mut adjust = if self.reg.get_flag(C) { 0x60 } else { 0x00 };
        if self.reg.get_flag(H) {
            adjust |= 0x06;
        }
        if !self.reg.get_flag(N) {
            if a & 0x0f > 0x09 {
                adjust |= 0x06;
            }
            if a > 0x99 {
                adjust |= 0x60;
            }
            a = a.wrapping_add(adjust);
        } else {
            a = a.wrapping_sub(adjust);
        }
        self.reg.set_flag(C, adjust >= 0x60);
        self.reg.set_flag(H, false);
        self.reg.set_flag(Z, a == 0x00);
        self.reg.a = a;
    }

    // Complement A. N and H set.
    fn alu_cpl(&mut self) {
        self.reg.a = !self.reg.a;
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, true);
    }

    // Complement the carry flag. N and H reset.
    fn alu_ccf(&mut self) {
        let v = !self.reg.get_flag(C);
        self.reg.set_flag(C, v);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
    }

    // Set the carry flag. N and H reset.
    fn alu_scf(&mut self) {
        self.reg.set_flag(C, true);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
    }

    // Rotate left, bit 7 to carry.
    fn alu_rlc(&mut self, a: u8) -> u8 {
        let c = (a & 0x80) >> 7 == 0x01;
        let r = (a << 1) | u8::from(c);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Rotate left through carry.
    fn alu_rl(&mut self, a: u8) -> u8 {
        let c = (a & 0x80) >> 7 == 0x01;
        let r = (a << 1) | u8::from(self.reg.get_flag(C));
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Rotate right, bit 0 to carry.
    fn alu_rrc(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = if c { 0x80 | (a >> 1) } else { a >> 1 };
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Rotate right through carry.
    fn alu_rr(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = if self.reg.get_flag(C) { 0x80 | (a >> 1) } else { a >> 1 };
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Shift left into carry, bit 0 cleared.
    fn alu_sla(&mut self, a: u8) -> u8 {
        let c = (a & 0x80) >> 7 == 0x01;
        let r = a << 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Shift right into carry, bit 7 preserved.
    fn alu_sra(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = (a >> 1) | (a & 0x80);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Shift right into carry, bit 7 cleared.
    fn alu_srl(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = a >> 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Test bit b. Z when clear, N reset, H set, C unaffected.
    fn alu_bit(&mut self, a: u8, b: u8) {
        let r = a & (1 << b) == 0x00;
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r);
    }

    fn alu_set(&mut self, a: u8, b: u8) -> u8 {
        a | (1 << b)
    }

    fn alu_res(&mut self, a: u8, b: u8) -> u8 {
        a & !(1 << b)
    }
}

impl Cpu {
    // One instruction or one interrupt dispatch; returns the m-cycles consumed, all of which have
    // already been ticked through the bus.
    pub fn step(&mut self, bus: &mut MainBus) -> u32 {
        if self.stopped {
            bus.tick(1);
            return 1;
        }
        let pending = bus.read_raw(0xff0f) & bus.read_raw(0xffff) & 0x1f;
        if self.halted {
            if pending != 0x00 {
                // Pending interrupts end HALT whether or not the master enable is set.
                self.halted = false;
            } else {
                bus.tick(1);
                return 1;
            }
        }
        if self.ime && pending != 0x00 {
            return self.dispatch_interrupt(bus, pending);
        }
        self.ex(bus)
    }

    // Service order is bit 0 first: V-Blank, LCD STAT, Timer, Serial, Joypad. Five m-cycles: two
    // idle, two pushing PC, one setting the vector.
    fn dispatch_interrupt(&mut self, bus: &mut MainBus, pending: u8) -> u32 {
        self.ime = false;
        self.ei_pending = false;
        let n = pending.trailing_zeros();
        let intf = bus.read_raw(0xff0f) & !(1 << n);
        bus.write(0xff0f, intf);
        self.ticks = 0;
        bus.tick(2);
        self.stack_add(bus, self.reg.pc);
        self.reg.pc = 0x0040 | ((n as u16) << 3);
        bus.tick(1);
        5
    }

    #[allow(clippy::cognitive_complexity)]
    fn ex(&mut self, bus: &mut MainBus) -> u32 {
        self.ticks = 0;
        let ei = self.ei_pending;
        let opcode = self.imm(bus);
        let mut cbcode: u8 = 0;
        match opcode {
            0x00 => {}
            0x01 => {
                let v = self.imm_word(bus);
                self.reg.set_bc(v);
            }
            0x02 => self.write_cycle(bus, self.reg.get_bc(), self.reg.a),
            0x03 => {
                let v = self.reg.get_bc().wrapping_add(1);
                self.reg.set_bc(v);
            }
            0x04 => self.reg.b = self.alu_inc(self.reg.b),
            0x05 => self.reg.b = self.alu_dec(self.reg.b),
            0x06 => self.reg.b = self.imm(bus),
            0x07 => {
                self.reg.a = self.alu_rlc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x08 => {
                let a = self.imm_word(bus);
                self.write_cycle_word(bus, a, self.reg.sp);
            }
            0x09 => self.alu_add_hl(self.reg.get_bc()),
            0x0a => self.reg.a = self.read_cycle(bus, self.reg.get_bc()),
            0x0b => {
                let v = self.reg.get_bc().wrapping_sub(1);
                self.reg.set_bc(v);
            }
            0x0c => self.reg.c = self.alu_inc(self.reg.c),
            0x0d => self.reg.c = self.alu_dec(self.reg.c),
            0x0e => self.reg.c = self.imm(bus),
            0x0f => {
                self.reg.a = self.alu_rrc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x10 => {
                // STOP: on the color machine an armed KEY1 turns it into the speed switch;
                // otherwise the cpu parks until reset.
                self.reg.pc = self.reg.pc.wrapping_add(1);
                if bus.term == Term::GBC && bus.speed_switch_armed() {
                    bus.switch_speed();
                } else {
                    self.stopped = true;
                }
            }
            0x11 => {
                let v = self.imm_word(bus);
                self.reg.set_de(v);
            }
            0x12 => self.write_cycle(bus, self.reg.get_de(), self.reg.a),
            0x13 => {
                let v = self.reg.get_de().wrapping_add(1);
                self.reg.set_de(v);
            }
            0x14 => self.reg.d = self.alu_inc(self.reg.d),
            0x15 => self.reg.d = self.alu_dec(self.reg.d),
            0x16 => self.reg.d = self.imm(bus),
            0x17 => {
                self.reg.a = self.alu_rl(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x18 => {
                let n = self.imm(bus) as i8;
                self.reg.pc = self.reg.pc.wrapping_add(n as u16);
            }
            0x19 => self.alu_add_hl(self.reg.get_de()),
            0x1a => self.reg.a = self.read_cycle(bus, self.reg.get_de()),
            0x1b => {
                let v = self.reg.get_de().wrapping_sub(1);
                self.reg.set_de(v);
            }
            0x1c => self.reg.e = self.alu_inc(self.reg.e),
            0x1d => self.reg.e = self.alu_dec(self.reg.e),
            0x1e => self.reg.e = self.imm(bus),
            0x1f => {
                self.reg.a = self.alu_rr(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x20 => {
                let n = self.imm(bus) as i8;
                if !self.reg.get_flag(Z) {
                    self.reg.pc = self.reg.pc.wrapping_add(n as u16);
                }
            }
            0x21 => {
                let v = self.imm_word(bus);
                self.reg.set_hl(v);
            }
            0x22 => {
                let a = self.reg.get_hl();
                self.write_cycle(bus, a, self.reg.a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            0x23 => {
                let v = self.reg.get_hl().wrapping_add(1);
                self.reg.set_hl(v);
            }
            0x24 => self.reg.h = self.alu_inc(self.reg.h),
            0x25 => self.reg.h = self.alu_dec(self.reg.h),
            0x26 => self.reg.h = self.imm(bus),
            0x27 => self.alu_daa(),
            0x28 => {
                let n = self.imm(bus) as i8;
                if self.reg.get_flag(Z) {
                    self.reg.pc = self.reg.pc.wrapping_add(n as u16);
                }
            }
            0x29 => self.alu_add_hl(self.reg.get_hl()),
            0x2a => {
                let a = self.reg.get_hl();
                self.reg.a = self.read_cycle(bus, a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            0x2b => {
                let v = self.reg.get_hl().wrapping_sub(1);
                self.reg.set_hl(v);
            }
            0x2c => self.reg.l = self.alu_inc(self.reg.l),
            0x2d => self.reg.l = self.alu_dec(self.reg.l),
            0x2e => self.reg.l = self.imm(bus),
            0x2f => self.alu_cpl(),
            0x30 => {
                let n = self.imm(bus) as i8;
                if !self.reg.get_flag(C) {
                    self.reg.pc = self.reg.pc.wrapping_add(n as u16);
                }
            }
            0x31 => self.reg.sp = self.imm_word(bus),
            0x32 => {
                let a = self.reg.get_hl();
                self.write_cycle(bus, a, self.reg.a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            0x33 => self.reg.sp = self.reg.sp.wrapping_add(1),
            0x34 => {
                let a = self.reg.get_hl();
                let v = self.read_cycle(bus, a);
                let v = self.alu_inc(v);
                self.write_cycle(bus, a, v);
            }
            0x35 => {
                let a = self.reg.get_hl();
                let v = self.read_cycle(bus, a);
                let v = self.alu_dec(v);
                self.write_cycle(bus, a, v);
            }
            0x36 => {
                let a = self.reg.get_hl();
                let v = self.imm(bus);
                self.write_cycle(bus, a, v);
            }
            0x37 => self.alu_scf(),
            0x38 => {
                let n = self.imm(bus) as i8;
                if self.reg.get_flag(C) {
                    self.reg.pc = self.reg.pc.wrapping_add(n as u16);
                }
            }
            0x39 => self.alu_add_hl(self.reg.sp),
            0x3a => {
                let a = self.reg.get_hl();
                self.reg.a = self.read_cycle(bus, a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            0x3b => self.reg.sp = self.reg.sp.wrapping_sub(1),
            0x3c => self.reg.a = self.alu_inc(self.reg.a),
            0x3d => self.reg.a = self.alu_dec(self.reg.a),
            0x3e => self.reg.a = self.imm(bus),
            0x3f => self.alu_ccf(),
            0x40 => {}
            0x41 => self.reg.b = self.reg.c,
            0x42 => self.reg.b = self.reg.d,
            0x43 => self.reg.b = self.reg.e,
            0x44 => self.reg.b = self.reg.h,
            0x45 => self.reg.b = self.reg.l,
            0x46 => self.reg.b = self.read_cycle(bus, self.reg.get_hl()),
            0x47 => self.reg.b = self.reg.a,
            0x48 => self.reg.c = self.reg.b,
            0x49 => {}
            0x4a => self.reg.c = self.reg.d,
            0x4b => self.reg.c = self.reg.e,
            0x4c => self.reg.c = self.reg.h,
            0x4d => self.reg.c = self.reg.l,
            0x4e => self.reg.c = self.read_cycle(bus, self.reg.get_hl()),
            0x4f => self.reg.c = self.reg.a,
            0x50 => self.reg.d = self.reg.b,
            0x51 => self.reg.d = self.reg.c,
            0x52 => {}
            0x53 => self.reg.d = self.reg.e,
            0x54 => self.reg.d = self.reg.h,
            0x55 => self.reg.d = self.reg.l,
            0x56 => self.reg.d = self.read_cycle(bus, self.reg.get_hl()),
            0x57 => self.reg.d = self.reg.a,
            0x58 => self.reg.e = self.reg.b,
            0x59 => self.reg.e = self.reg.c,
            0x5a => self.reg.e = self.reg.d,
            0x5b => {}
            0x5c => self.reg.e = self.reg.h,
            0x5d => self.reg.e = self.reg.l,
            0x5e => self.reg.e = self.read_cycle(bus, self.reg.get_hl()),
            0x5f => self.reg.e = self.reg.a,
            0x60 => self.reg.h = self.reg.b,
            0x61 => self.reg.h = self.reg.c,
            0x62 => self.reg.h = self.reg.d,
            0x63 => self.reg.h = self.reg.e,
            0x64 => {}
            0x65 => self.reg.h = self.reg.l,
            0x66 => self.reg.h = self.read_cycle(bus, self.reg.get_hl()),
            0x67 => self.reg.h = self.reg.a,
            0x68 => self.reg.l = self.reg.b,
            0x69 => self.reg.l = self.reg.c,
            0x6a => self.reg.l = self.reg.d,
            0x6b => self.reg.l = self.reg.e,
            0x6c => self.reg.l = self.reg.h,
            0x6d => {}
            0x6e => self.reg.l = self.read_cycle(bus, self.reg.get_hl()),
            0x6f => self.reg.l = self.reg.a,
            0x70 => self.write_cycle(bus, self.reg.get_hl(), self.reg.b),
            0x71 => self.write_cycle(bus, self.reg.get_hl(), self.reg.c),
            0x72 => self.write_cycle(bus, self.reg.get_hl(), self.reg.d),
            0x73 => self.write_cycle(bus, self.reg.get_hl(), self.reg.e),
            0x74 => self.write_cycle(bus, self.reg.get_hl(), self.reg.h),
            0x75 => self.write_cycle(bus, self.reg.get_hl(), self.reg.l),
            0x76 => {
                let pending = bus.read_raw(0xff0f) & bus.read_raw(0xffff) & 0x1f;
                if !self.ime && pending != 0x00 {
                    // The HALT bug: execution falls through and the next byte is fetched twice.
                    self.halt_bug = true;
                } else {
                    self.halted = true;
                }
            }
            0x77 => self.write_cycle(bus, self.reg.get_hl(), self.reg.a),
            0x78 => self.reg.a = self.reg.b,
            0x79 => self.reg.a = self.reg.c,
            0x7a => self.reg.a = self.reg.d,
            0x7b => self.reg.a = self.reg.e,
            0x7c => self.reg.a = self.reg.h,
            0x7d => self.reg.a = self.reg.l,
            0x7e => self.reg.a = self.read_cycle(bus, self.reg.get_hl()),
            0x7f => {}
            0x80 => self.alu_add(self.reg.b),
            0x81 => self.alu_add(self.reg.c),
            0x82 => self.alu_add(self.reg.d),
            0x83 => self.alu_add(self.reg.e),
            0x84 => self.alu_add(self.reg.h),
            0x85 => self.alu_add(self.reg.l),
            0x86 => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_add(v);
            }
            0x87 => self.alu_add(self.reg.a),
            0x88 => self.alu_adc(self.reg.b),
            0x89 => self.alu_adc(self.reg.c),
            0x8a => self.alu_adc(self.reg.d),
            0x8b => self.alu_adc(self.reg.e),
            0x8c => self.alu_adc(self.reg.h),
            0x8d => self.alu_adc(self.reg.l),
            0x8e => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_adc(v);
            }
            0x8f => self.alu_adc(self.reg.a),
            0x90 => self.alu_sub(self.reg.b),
            0x91 => self.alu_sub(self.reg.c),
            0x92 => self.alu_sub(self.reg.d),
            0x93 => self.alu_sub(self.reg.e),
            0x94 => self.alu_sub(self.reg.h),
            0x95 => self.alu_sub(self.reg.l),
            0x96 => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_sub(v);
            }
            0x97 => self.alu_sub(self.reg.a),
            0x98 => self.alu_sbc(self.reg.b),
            0x99 => self.alu_sbc(self.reg.c),
            0x9a => self.alu_sbc(self.reg.d),
            0x9b => self.alu_sbc(self.reg.e),
            0x9c => self.alu_sbc(self.reg.h),
            0x9d => self.alu_sbc(self.reg.l),
            0x9e => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_sbc(v);
            }
            0x9f => self.alu_sbc(self.reg.a),
            0xa0 => self.alu_and(self.reg.b),
            0xa1 => self.alu_and(self.reg.c),
            0xa2 => self.alu_and(self.reg.d),
            0xa3 => self.alu_and(self.reg.e),
            0xa4 => self.alu_and(self.reg.h),
            0xa5 => self.alu_and(self.reg.l),
            0xa6 => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_and(v);
            }
            0xa7 => self.alu_and(self.reg.a),
            0xa8 => self.alu_xor(self.reg.b),
            0xa9 => self.alu_xor(self.reg.c),
            0xaa => self.alu_xor(self.reg.d),
            0xab => self.alu_xor(self.reg.e),
            0xac => self.alu_xor(self.reg.h),
            0xad => self.alu_xor(self.reg.l),
            0xae => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_xor(v);
            }
            0xaf => self.alu_xor(self.reg.a),
            0xb0 => self.alu_or(self.reg.b),
            0xb1 => self.alu_or(self.reg.c),
            0xb2 => self.alu_or(self.reg.d),
            0xb3 => self.alu_or(self.reg.e),
            0xb4 => self.alu_or(self.reg.h),
            0xb5 => self.alu_or(self.reg.l),
            0xb6 => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_or(v);
            }
            0xb7 => self.alu_or(self.reg.a),
            0xb8 => self.alu_cp(self.reg.b),
            0xb9 => self.alu_cp(self.reg.c),
            0xba => self.alu_cp(self.reg.d),
            0xbb => self.alu_cp(self.reg.e),
            0xbc => self.alu_cp(self.reg.h),
            0xbd => self.alu_cp(self.reg.l),
            0xbe => {
                let v = self.read_cycle(bus, self.reg.get_hl());
                self.alu_cp(v);
            }
            0xbf => self.alu_cp(self.reg.a),
            0xc0 => {
                if !self.reg.get_flag(Z) {
                    self.reg.pc = self.stack_pop(bus);
                }
            }
            0xc1 => {
                let v = self.stack_pop(bus);
                self.reg.set_bc(v);
            }
            0xc2 => {
                let pc = self.imm_word(bus);
                if !self.reg.get_flag(Z) {
                    self.reg.pc = pc;
                }
            }
            0xc3 => self.reg.pc = self.imm_word(bus),
            0xc4 => {
                let pc = self.imm_word(bus);
                if !self.reg.get_flag(Z) {
                    self.stack_add(bus, self.reg.pc);
                    self.reg.pc = pc;
                }
            }
            0xc5 => self.stack_add(bus, self.reg.get_bc()),
            0xc6 => {
                let v = self.imm(bus);
                self.alu_add(v);
            }
            0xc7 => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x00;
            }
            0xc8 => {
                if self.reg.get_flag(Z) {
                    self.reg.pc = self.stack_pop(bus);
                }
            }
            0xc9 => self.reg.pc = self.stack_pop(bus),
            0xca => {
                let pc = self.imm_word(bus);
                if self.reg.get_flag(Z) {
                    self.reg.pc = pc;
                }
            }
            0xcb => {
                cbcode = self.imm(bus);
                match cbcode {
                    0x00 => self.reg.b = self.alu_rlc(self.reg.b),
                    0x01 => self.reg.c = self.alu_rlc(self.reg.c),
                    0x02 => self.reg.d = self.alu_rlc(self.reg.d),
                    0x03 => self.reg.e = self.alu_rlc(self.reg.e),
                    0x04 => self.reg.h = self.alu_rlc(self.reg.h),
                    0x05 => self.reg.l = self.alu_rlc(self.reg.l),
                    0x06 => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_rlc(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x07 => self.reg.a = self.alu_rlc(self.reg.a),
                    0x08 => self.reg.b = self.alu_rrc(self.reg.b),
                    0x09 => self.reg.c = self.alu_rrc(self.reg.c),
                    0x0a => self.reg.d = self.alu_rrc(self.reg.d),
                    0x0b => self.reg.e = self.alu_rrc(self.reg.e),
                    0x0c => self.reg.h = self.alu_rrc(self.reg.h),
                    0x0d => self.reg.l = self.alu_rrc(self.reg.l),
                    0x0e => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_rrc(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x0f => self.reg.a = self.alu_rrc(self.reg.a),
                    0x10 => self.reg.b = self.alu_rl(self.reg.b),
                    0x11 => self.reg.c = self.alu_rl(self.reg.c),
                    0x12 => self.reg.d = self.alu_rl(self.reg.d),
                    0x13 => self.reg.e = self.alu_rl(self.reg.e),
                    0x14 => self.reg.h = self.alu_rl(self.reg.h),
                    0x15 => self.reg.l = self.alu_rl(self.reg.l),
                    0x16 => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_rl(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x17 => self.reg.a = self.alu_rl(self.reg.a),
                    0x18 => self.reg.b = self.alu_rr(self.reg.b),
                    0x19 => self.reg.c = self.alu_rr(self.reg.c),
                    0x1a => self.reg.d = self.alu_rr(self.reg.d),
                    0x1b => self.reg.e = self.alu_rr(self.reg.e),
                    0x1c => self.reg.h = self.alu_rr(self.reg.h),
                    0x1d => self.reg.l = self.alu_rr(self.reg.l),
                    0x1e => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_rr(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x1f => self.reg.a = self.alu_rr(self.reg.a),
                    0x20 => self.reg.b = self.alu_sla(self.reg.b),
                    0x21 => self.reg.c = self.alu_sla(self.reg.c),
                    0x22 => self.reg.d = self.alu_sla(self.reg.d),
                    0x23 => self.reg.e = self.alu_sla(self.reg.e),
                    0x24 => self.reg.h = self.alu_sla(self.reg.h),
                    0x25 => self.reg.l = self.alu_sla(self.reg.l),
                    0x26 => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_sla(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x27 => self.reg.a = self.alu_sla(self.reg.a),
                    0x28 => self.reg.b = self.alu_sra(self.reg.b),
                    0x29 => self.reg.c = self.alu_sra(self.reg.c),
                    0x2a => self.reg.d = self.alu_sra(self.reg.d),
                    0x2b => self.reg.e = self.alu_sra(self.reg.e),
                    0x2c => self.reg.h = self.alu_sra(self.reg.h),
                    0x2d => self.reg.l = self.alu_sra(self.reg.l),
                    0x2e => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_sra(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x2f => self.reg.a = self.alu_sra(self.reg.a),
                    0x30 => self.reg.b = self.alu_swap(self.reg.b),
                    0x31 => self.reg.c = self.alu_swap(self.reg.c),
                    0x32 => self.reg.d = self.alu_swap(self.reg.d),
                    0x33 => self.reg.e = self.alu_swap(self.reg.e),
                    0x34 => self.reg.h = self.alu_swap(self.reg.h),
                    0x35 => self.reg.l = self.alu_swap(self.reg.l),
                    0x36 => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_swap(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x37 => self.reg.a = self.alu_swap(self.reg.a),
                    0x38 => self.reg.b = self.alu_srl(self.reg.b),
                    0x39 => self.reg.c = self.alu_srl(self.reg.c),
                    0x3a => self.reg.d = self.alu_srl(self.reg.d),
                    0x3b => self.reg.e = self.alu_srl(self.reg.e),
                    0x3c => self.reg.h = self.alu_srl(self.reg.h),
                    0x3d => self.reg.l = self.alu_srl(self.reg.l),
                    0x3e => {
                        let a = self.reg.get_hl();
                        let v = self.read_cycle(bus, a);
                        let v = self.alu_srl(v);
                        self.write_cycle(bus, a, v);
                    }
                    0x3f => self.reg.a = self.alu_srl(self.reg.a),
                    0x40..=0x7f => {
                        let b = (cbcode - 0x40) >> 3;
                        let v = match cbcode & 0x07 {
                            0x00 => self.reg.b,
                            0x01 => self.reg.c,
                            0x02 => self.reg.d,
                            0x03 => self.reg.e,
                            0x04 => self.reg.h,
                            0x05 => self.reg.l,
                            0x06 => self.read_cycle(bus, self.reg.get_hl()),
                            _ => self.reg.a,
                        };
                        self.alu_bit(v, b);
                    }
                    0x80..=0xbf => {
                        let b = (cbcode - 0x80) >> 3;
                        match cbcode & 0x07 {
                            0x00 => self.reg.b = self.alu_res(self.reg.b, b),
                            0x01 => self.reg.c = self.alu_res(self.reg.c, b),
                            0x02 => self.reg.d = self.alu_res(self.reg.d, b),
                            0x03 => self.reg.e = self.alu_res(self.reg.e, b),
                            0x04 => self.reg.h = self.alu_res(self.reg.h, b),
                            0x05 => self.reg.l = self.alu_res(self.reg.l, b),
                            0x06 => {
                                let a = self.reg.get_hl();
                                let v = self.read_cycle(bus, a);
                                let v = self.alu_res(v, b);
                                self.write_cycle(bus, a, v);
                            }
                            _ => self.reg.a = self.alu_res(self.reg.a, b),
                        }
                    }
                    0xc0..=0xff => {
                        let b = (cbcode - 0xc0) >> 3;
                        match cbcode & 0x07 {
                            0x00 => self.reg.b = self.alu_set(self.reg.b, b),
                            0x01 => self.reg.c = self.alu_set(self.reg.c, b),
                            0x02 => self.reg.d = self.alu_set(self.reg.d, b),
                            0x03 => self.reg.e = self.alu_set(self.reg.e, b),
                            0x04 => self.reg.h = self.alu_set(self.reg.h, b),
                            0x05 => self.reg.l = self.alu_set(self.reg.l, b),
                            0x06 => {
                                let a = self.reg.get_hl();
                                let v = self.read_cycle(bus, a);
                                let v = self.alu_set(v, b);
                                self.write_cycle(bus, a, v);
                            }
                            _ => self.reg.a = self.alu_set(self.reg.a, b),
                        }
                    }
                }
            }
            0xcc => {
                let pc = self.imm_word(bus);
                if self.reg.get_flag(Z) {
                    self.stack_add(bus, self.reg.pc);
                    self.reg.pc = pc;
                }
            }
            0xcd => {
                let pc = self.imm_word(bus);
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = pc;
            }
            0xce => {
                let v = self.imm(bus);
                self.alu_adc(v);
            }
            0xcf => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x08;
            }
            0xd0 => {
                if !self.reg.get_flag(C) {
                    self.reg.pc = self.stack_pop(bus);
                }
            }
            0xd1 => {
                let v = self.stack_pop(bus);
                self.reg.set_de(v);
            }
            0xd2 => {
                let pc = self.imm_word(bus);
                if !self.reg.get_flag(C) {
                    self.reg.pc = pc;
                }
            }
            0xd4 => {
                let pc = self.imm_word(bus);
                if !self.reg.get_flag(C) {
                    self.stack_add(bus, self.reg.pc);
                    self.reg.pc = pc;
                }
            }
            0xd5 => self.stack_add(bus, self.reg.get_de()),
            0xd6 => {
                let v = self.imm(bus);
                self.alu_sub(v);
            }
            0xd7 => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x10;
            }
            0xd8 => {
                if self.reg.get_flag(C) {
                    self.reg.pc = self.stack_pop(bus);
                }
            }
            0xd9 => {
                self.reg.pc = self.stack_pop(bus);
                self.ime = true;
            }
            0xda => {
                let pc = self.imm_word(bus);
                if self.reg.get_flag(C) {
                    self.reg.pc = pc;
                }
            }
            0xdc => {
                let pc = self.imm_word(bus);
                if self.reg.get_flag(C) {
                    self.stack_add(bus, self.reg.pc);
                    self.reg.pc = pc;
                }
            }
            0xde => {
                let v = self.imm(bus);
                self.alu_sbc(v);
            }
            0xdf => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x18;
            }
            0xe0 => {
                let a = 0xff00 | u16::from(self.imm(bus));
                self.write_cycle(bus, a, self.reg.a);
            }
            0xe1 => {
                let v = self.stack_pop(bus);
                self.reg.set_hl(v);
            }
            0xe2 => self.write_cycle(bus, 0xff00 | u16::from(self.reg.c), self.reg.a),
            0xe5 => self.stack_add(bus, self.reg.get_hl()),
            0xe6 => {
                let v = self.imm(bus);
                self.alu_and(v);
            }
            0xe7 => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x20;
            }
            0xe8 => {
                let b = i16::from(self.imm(bus) as i8) as u16;
                self.reg.sp = self.alu_add_sp(b);
            }
            0xe9 => self.reg.pc = self.reg.get_hl(),
            0xea => {
                let a = self.imm_word(bus);
                self.write_cycle(bus, a, self.reg.a);
            }
            0xee => {
                let v = self.imm(bus);
                self.alu_xor(v);
            }
            0xef => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x28;
            }
            0xf0 => {
                let a = 0xff00 | u16::from(self.imm(bus));
                self.reg.a = self.read_cycle(bus, a);
            }
            0xf1 => {
                let v = self.stack_pop(bus);
                self.reg.set_af(v);
            }
            0xf2 => self.reg.a = self.read_cycle(bus, 0xff00 | u16::from(self.reg.c)),
            0xf3 => {
                self.ime = false;
                self.ei_pending = false;
            }
            0xf5 => self.stack_add(bus, self.reg.get_af()),
            0xf6 => {
                let v = self.imm(bus);
                self.alu_or(v);
            }
            0xf7 => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x30;
            }
            0xf8 => {
                let b = i16::from(self.imm(bus) as i8) as u16;
                let v = self.alu_add_sp(b);
                self.reg.set_hl(v);
            }
            0xf9 => self.reg.sp = self.reg.get_hl(),
            0xfa => {
                let a = self.imm_word(bus);
                self.reg.a = self.read_cycle(bus, a);
            }
            0xfb => self.ei_pending = true,
            0xfe => {
                let v = self.imm(bus);
                self.alu_cp(v);
            }
            0xff => {
                self.stack_add(bus, self.reg.pc);
                self.reg.pc = 0x38;
            }
            // The unwired encodings. Real silicon locks up; the core parks the cpu instead of
            // crashing the host.
            0xd3 | 0xdb | 0xdd | 0xe3 | 0xe4 | 0xeb | 0xec | 0xed | 0xf4 | 0xfc | 0xfd => self.stopped = true,
        };

        let ecycle = match opcode {
            0x20 | 0xc2 => u32::from(!self.reg.get_flag(Z)),
            0x28 | 0xca => u32::from(self.reg.get_flag(Z)),
            0x30 | 0xd2 => u32::from(!self.reg.get_flag(C)),
            0x38 | 0xda => u32::from(self.reg.get_flag(C)),
            0xc0 | 0xc4 => 3 * u32::from(!self.reg.get_flag(Z)),
            0xc8 | 0xcc => 3 * u32::from(self.reg.get_flag(Z)),
            0xd0 | 0xd4 => 3 * u32::from(!self.reg.get_flag(C)),
            0xd8 | 0xdc => 3 * u32::from(self.reg.get_flag(C)),
            _ => 0,
        };
        let total = if opcode == 0xcb { CB_CYCLES[cbcode as usize] } else { OP_CYCLES[opcode as usize] + ecycle };
        let total = total.max(self.ticks);
        if total > self.ticks {
            bus.tick(total - self.ticks);
        }
        if ei && self.ei_pending {
            self.ime = true;
            self.ei_pending = false;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::test::build_rom;

    // A bus whose work ram at 0xc000 holds the given code, with the cpu pointed at it.
    fn machine(code: &[u8]) -> (Cpu, MainBus) {
        let mut bus = MainBus::power_up(Cartridge::from_bytes(build_rom(0x00, 0x00, 0x00)).unwrap(), 48000);
        for (i, v) in code.iter().enumerate() {
            bus.write(0xc000 + i as u16, *v);
        }
        let mut cpu = Cpu::power_up(Term::GB);
        cpu.reg.pc = 0xc000;
        (cpu, bus)
    }

    fn step_cycles(cpu: &mut Cpu, bus: &mut MainBus) -> u64 {
        let before = bus.cycles;
        cpu.step(bus);
        bus.cycles - before
    }

    #[test]
    fn documented_cycle_counts_reach_the_bus() {
        // (code, expected m-cycles of the first instruction)
        let cases: &[(&[u8], u64)] = &[
            (&[0x00], 1),                   // nop
            (&[0x06, 0x42], 2),             // ld b, d8
            (&[0x03], 2),                   // inc bc
            (&[0x21, 0x00, 0xc0], 3),       // ld hl, d16
            (&[0x34], 3),                   // inc (hl) -- hl points into work ram
            (&[0xc3, 0x00, 0xc0], 4),       // jp a16
            (&[0xcd, 0x00, 0xc0], 6),       // call a16
            (&[0xc5], 4),                   // push bc
            (&[0xc1], 3),                   // pop bc
            (&[0x08, 0x00, 0xd0], 5),       // ld (a16), sp
            (&[0xe8, 0x01], 4),             // add sp, d8
            (&[0xcb, 0x47], 2),             // bit 0, a
            (&[0xcb, 0x46], 3),             // bit 0, (hl)
            (&[0xcb, 0xc6], 4),             // set 0, (hl)
        ];
        for (code, want) in cases {
            let (mut cpu, mut bus) = machine(code);
            cpu.reg.sp = 0xdff0;
            cpu.reg.set_hl(0xc800);
            assert_eq!(step_cycles(&mut cpu, &mut bus), want * 4, "code {:02x?}", code);
        }
    }

    #[test]
    fn conditional_branches_cost_more_when_taken() {
        // jr nz takes 3 m-cycles when taken, 2 when not.
        let (mut cpu, mut bus) = machine(&[0x20, 0x02]);
        cpu.reg.set_flag(Z, false);
        assert_eq!(step_cycles(&mut cpu, &mut bus), 3 * 4);
        assert_eq!(cpu.reg.pc, 0xc004);

        let (mut cpu, mut bus) = machine(&[0x20, 0x02]);
        cpu.reg.set_flag(Z, true);
        assert_eq!(step_cycles(&mut cpu, &mut bus), 2 * 4);
        assert_eq!(cpu.reg.pc, 0xc002);
    }

    #[test]
    fn call_and_ret_round_trip() {
        let (mut cpu, mut bus) = machine(&[0xcd, 0x10, 0xc0]);
        bus.write(0xc010, 0xc9); // ret
        cpu.reg.sp = 0xdff0;
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.pc, 0xc010);
        assert_eq!(cpu.reg.sp, 0xdfee);
        assert_eq!(bus.read(0xdfee), 0x03);
        assert_eq!(bus.read(0xdfef), 0xc0);
        let cycles = step_cycles(&mut cpu, &mut bus);
        assert_eq!(cpu.reg.pc, 0xc003);
        assert_eq!(cpu.reg.sp, 0xdff0);
        assert_eq!(cycles, 4 * 4);
    }

    #[test]
    fn add_sets_half_carry() {
        let (mut cpu, mut bus) = machine(&[0xc6, 0x01]); // add a, 1
        cpu.reg.a = 0x0f;
        cpu.reg.f = 0x00;
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.a, 0x10);
        assert!(cpu.reg.get_flag(H));
        assert!(!cpu.reg.get_flag(C));
        assert!(!cpu.reg.get_flag(Z));
    }

    #[test]
    fn daa_adjusts_bcd_addition() {
        // 0x15 + 0x27 = 0x3c, daa corrects to 0x42.
        let (mut cpu, mut bus) = machine(&[0xc6, 0x27, 0x27]);
        cpu.reg.a = 0x15;
        cpu.reg.f = 0x00;
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.a, 0x42);
    }

    #[test]
    fn interrupt_dispatch_pushes_and_vectors() {
        let (mut cpu, mut bus) = machine(&[0x00]);
        cpu.reg.sp = 0xdff0;
        cpu.ime = true;
        bus.write(0xffff, 0x05); // v-blank and timer enabled
        bus.write(0xff0f, 0x04); // timer pending
        let cycles = step_cycles(&mut cpu, &mut bus);
        assert_eq!(cycles, 5 * 4);
        assert_eq!(cpu.reg.pc, 0x0050);
        assert_eq!(bus.read_raw(0xff0f) & 0x1f, 0x00);
        assert_eq!(bus.read(0xdfee), 0x00);
        assert_eq!(bus.read(0xdfef), 0xc0);
        assert!(!cpu.ime);
    }

    #[test]
    fn lower_bits_win_interrupt_priority() {
        let (mut cpu, mut bus) = machine(&[0x00]);
        cpu.reg.sp = 0xdff0;
        cpu.ime = true;
        bus.write(0xffff, 0x1f);
        bus.write(0xff0f, 0x14); // timer and joypad both pending
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.pc, 0x0050);
        assert_eq!(bus.read_raw(0xff0f) & 0x1f, 0x10);
    }

    #[test]
    fn ei_enables_after_the_next_instruction() {
        let (mut cpu, mut bus) = machine(&[0xfb, 0x00, 0x00]); // ei; nop; nop
        cpu.reg.sp = 0xdff0;
        bus.write(0xffff, 0x01);
        bus.write(0xff0f, 0x01);
        cpu.step(&mut bus); // ei
        assert!(!cpu.ime);
        cpu.step(&mut bus); // nop runs, then ime turns on
        assert!(cpu.ime);
        assert_eq!(cpu.reg.pc, 0xc002);
        cpu.step(&mut bus); // dispatch, not the second nop
        assert_eq!(cpu.reg.pc, 0x0040);
    }

    #[test]
    fn halt_wakes_without_ime() {
        let (mut cpu, mut bus) = machine(&[0x76, 0x3c]); // halt; inc a
        bus.write(0xffff, 0x04);
        cpu.step(&mut bus);
        assert!(cpu.halted);
        cpu.step(&mut bus);
        assert!(cpu.halted);
        bus.write(0xff0f, 0x04);
        cpu.step(&mut bus); // wakes and executes inc a, no dispatch
        assert!(!cpu.halted);
        assert_eq!(cpu.reg.a, 0x02);
        assert_eq!(cpu.reg.pc, 0xc002);
    }

    #[test]
    fn halt_bug_fetches_next_byte_twice() {
        let (mut cpu, mut bus) = machine(&[0x76, 0x3c, 0x00]); // halt; inc a
        cpu.reg.a = 0x00;
        bus.write(0xffff, 0x04);
        bus.write(0xff0f, 0x04); // pending with ime off: the bug case
        cpu.step(&mut bus); // halt falls through
        assert!(!cpu.halted);
        cpu.step(&mut bus); // inc a, pc stuck
        cpu.step(&mut bus); // inc a again
        assert_eq!(cpu.reg.a, 0x02);
        assert_eq!(cpu.reg.pc, 0xc002);
    }

    #[test]
    fn pc_advances_by_instruction_length() {
        let (mut cpu, mut bus) = machine(&[0x00, 0x06, 0x11, 0x21, 0x34, 0x12]);
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.pc, 0xc001);
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.pc, 0xc003);
        cpu.step(&mut bus);
        assert_eq!(cpu.reg.pc, 0xc006);
        assert_eq!(cpu.reg.get_hl(), 0x1234);
    }

    #[test]
    fn unwired_opcode_parks_the_cpu() {
        let (mut cpu, mut bus) = machine(&[0xd3]);
        cpu.step(&mut bus);
        assert!(cpu.stopped);
    }
}
