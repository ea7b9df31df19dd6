//! Instruction-execution core of a Sharp LR35902 (DMG Game Boy).
//!
//! The crate is organised the way the hardware is layered: a register file,
//! the instruction-family algorithms acting on it, an address-space router,
//! two opcode tables binding opcodes to those algorithms, and the
//! fetch-execute state machine that spends each instruction's cycle cost one
//! clock tick at a time.

pub mod types {
    pub type Byte = u8;
    pub type Word = u16;
    pub type SByte = i8;

    // register indices, in the order the opcodes' 3-bit register field uses
    pub const REG_B: usize = 0;
    pub const REG_C: usize = 1;
    pub const REG_D: usize = 2;
    pub const REG_E: usize = 3;
    pub const REG_H: usize = 4;
    pub const REG_L: usize = 5;
    pub const FLAGS: usize = 6;
    pub const REG_A: usize = 7;

    // the register field encodes (HL) where the flag register would sit
    pub const ADR_HL: usize = 6;

    // cpu flags
    pub const FL_Z: Byte = 1 << 7;
    pub const FL_N: Byte = 1 << 6;
    pub const FL_H: Byte = 1 << 5;
    pub const FL_C: Byte = 1 << 4;

    // bits 0-3 of F do not exist on hardware
    pub const FL_MASK: Byte = FL_Z | FL_N | FL_H | FL_C;
}

pub mod bits {
    use crate::types::{Byte, SByte, Word};

    pub const LOW_MASK: Word = 0x00FF;
    pub const LOW_MASK_NIB: Byte = 0x0F;

    pub const fn hi(reg: Word) -> Byte {
        (reg >> Byte::BITS) as Byte
    }

    pub const fn lo(reg: Word) -> Byte {
        (reg & LOW_MASK) as Byte
    }

    pub const fn combine(high: Byte, low: Byte) -> Word {
        (high as Word) << Byte::BITS | (low as Word)
    }

    pub const fn bit_test(idx: Byte, val: Byte) -> bool {
        (val >> idx) & 1 != 0
    }

    /// Reinterprets a displacement byte as two's complement.
    pub const fn signed(val: Byte) -> SByte {
        val as SByte
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_bit_test() {
            let x: Byte = 0b00000101;
            assert!(!bit_test(7, x));
            assert!(!bit_test(3, x));
            assert!(bit_test(2, x));
            assert!(!bit_test(1, x));
            assert!(bit_test(0, x));
        }

        #[test]
        fn test_combine_split() {
            let w = combine(0xBE, 0xEF);
            assert_eq!(w, 0xBEEF);
            assert_eq!(hi(w), 0xBE);
            assert_eq!(lo(w), 0xEF);
        }

        #[test]
        fn test_signed() {
            assert_eq!(signed(0xFE), -2);
            assert_eq!(signed(0x7F), 127);
            assert_eq!(signed(0x80), -128);
            // sign extension into a 16-bit pc offset
            assert_eq!(signed(0xFE) as Word, 0xFFFE);
        }
    }
}

pub mod error {
    use crate::types::{Byte, Word};
    use thiserror::Error;

    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// Opcode with no defined behavior. Ends the session.
        #[error("illegal opcode 0x{opcode:02X} at 0x{pc:04X}")]
        IllegalOpcode { opcode: Byte, pc: Word },
        #[error("{region} image is {len} bytes but the region holds {max}")]
        ImageTooLarge {
            region: &'static str,
            len: usize,
            max: usize,
        },
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

pub mod registers {
    use crate::bits::*;
    use crate::types::*;

    /// CPU-visible register file.
    ///
    /// BC, DE, HL and AF are views computed from their backing bytes on every
    /// access, high register first; nothing stores a pair separately.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Registers {
        //    B     C     D     E     H     L     F     A
        reg: [Byte; 8],
        pub sp: Word,
        pub pc: Word,
    }

    impl Registers {
        pub const fn new() -> Registers {
            Registers {
                reg: [0; 8],
                sp: 0,
                pc: 0,
            }
        }

        /// Reads a register by index (`REG_B`..`REG_A`, `FLAGS`)
        pub const fn get(&self, r: usize) -> Byte {
            self.reg[r]
        }

        /// Writes a register by index. The low nibble of F always reads back 0.
        pub fn set(&mut self, r: usize, val: Byte) {
            self.reg[r] = if r == FLAGS { val & FL_MASK } else { val };
        }

        pub const fn a(&self) -> Byte {
            self.reg[REG_A]
        }
        pub const fn b(&self) -> Byte {
            self.reg[REG_B]
        }
        pub const fn c(&self) -> Byte {
            self.reg[REG_C]
        }
        pub const fn d(&self) -> Byte {
            self.reg[REG_D]
        }
        pub const fn e(&self) -> Byte {
            self.reg[REG_E]
        }
        pub const fn h(&self) -> Byte {
            self.reg[REG_H]
        }
        pub const fn l(&self) -> Byte {
            self.reg[REG_L]
        }
        pub const fn f(&self) -> Byte {
            self.reg[FLAGS]
        }

        pub fn set_a(&mut self, val: Byte) {
            self.set(REG_A, val)
        }
        pub fn set_f(&mut self, val: Byte) {
            self.set(FLAGS, val)
        }

        pub const fn af(&self) -> Word {
            combine(self.reg[REG_A], self.reg[FLAGS])
        }
        pub const fn bc(&self) -> Word {
            combine(self.reg[REG_B], self.reg[REG_C])
        }
        pub const fn de(&self) -> Word {
            combine(self.reg[REG_D], self.reg[REG_E])
        }
        /// Commonly used for addresses
        pub const fn hl(&self) -> Word {
            combine(self.reg[REG_H], self.reg[REG_L])
        }

        fn set_pair(&mut self, high: usize, low: usize, val: Word) {
            self.set(high, hi(val));
            self.set(low, lo(val));
        }
        pub fn set_af(&mut self, val: Word) {
            self.set_pair(REG_A, FLAGS, val)
        }
        pub fn set_bc(&mut self, val: Word) {
            self.set_pair(REG_B, REG_C, val)
        }
        pub fn set_de(&mut self, val: Word) {
            self.set_pair(REG_D, REG_E, val)
        }
        pub fn set_hl(&mut self, val: Word) {
            self.set_pair(REG_H, REG_L, val)
        }

        /// 16-bit operand selected by the opcode's 2-bit pair field: BC, DE, HL, SP
        pub const fn rp(&self, p: usize) -> Word {
            match p {
                0 => self.bc(),
                1 => self.de(),
                2 => self.hl(),
                _ => self.sp,
            }
        }
        pub fn set_rp(&mut self, p: usize, val: Word) {
            match p {
                0 => self.set_bc(val),
                1 => self.set_de(val),
                2 => self.set_hl(val),
                _ => self.sp = val,
            }
        }

        /// Same field as `rp` for push/pop, where slot 3 is AF instead of SP
        pub const fn rp2(&self, p: usize) -> Word {
            match p {
                3 => self.af(),
                _ => self.rp(p),
            }
        }
        pub fn set_rp2(&mut self, p: usize, val: Word) {
            match p {
                3 => self.set_af(val),
                _ => self.set_rp(p, val),
            }
        }

        // flags
        // ------------------------------------------------------------------
        pub const fn flag(&self, mask: Byte) -> bool {
            self.reg[FLAGS] & mask != 0
        }
        pub const fn z(&self) -> bool {
            self.flag(FL_Z)
        }
        pub const fn n(&self) -> bool {
            self.flag(FL_N)
        }
        pub const fn hc(&self) -> bool {
            self.flag(FL_H)
        }
        pub const fn cy(&self) -> bool {
            self.flag(FL_C)
        }

        /// Carry flag as an operand for ADC/SBC/RL/RR
        pub const fn carry_in(&self) -> Byte {
            self.cy() as Byte
        }

        pub fn set_flag(&mut self, mask: Byte) {
            self.reg[FLAGS] |= mask & FL_MASK;
        }
        pub fn reset_flag(&mut self, mask: Byte) {
            self.reg[FLAGS] &= !mask;
        }
        pub fn assign_flag(&mut self, mask: Byte, on: bool) {
            if on {
                self.set_flag(mask)
            } else {
                self.reset_flag(mask)
            }
        }

        pub fn check_z(&mut self, result: Byte) {
            self.assign_flag(FL_Z, result == 0);
        }

        /// carry out of bit 3
        pub fn check_h_add8(&mut self, a: Byte, b: Byte, carry: Byte) {
            let h = (a & LOW_MASK_NIB) + (b & LOW_MASK_NIB) + carry > LOW_MASK_NIB;
            self.assign_flag(FL_H, h);
        }

        /// carry out of bit 11
        pub fn check_h_add16(&mut self, a: Word, b: Word) {
            self.assign_flag(FL_H, (a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF);
        }

        /// borrow into bit 4
        pub fn check_h_sub8(&mut self, a: Byte, b: Byte, carry: Byte) {
            self.assign_flag(FL_H, (a & LOW_MASK_NIB) < (b & LOW_MASK_NIB) + carry);
        }

        pub fn check_c_add8(&mut self, a: Byte, b: Byte, carry: Byte) {
            self.assign_flag(FL_C, a as Word + b as Word + carry as Word > 0xFF);
        }

        pub fn check_c_add16(&mut self, a: Word, b: Word) {
            self.assign_flag(FL_C, a as u32 + b as u32 > 0xFFFF);
        }

        pub fn check_c_sub8(&mut self, a: Byte, b: Byte, carry: Byte) {
            self.assign_flag(FL_C, (a as Word) < b as Word + carry as Word);
        }

        /// Left rotates and shifts move bit 7 into the carry
        pub fn check_c_rl(&mut self, operand: Byte) {
            self.assign_flag(FL_C, bit_test(7, operand));
        }

        /// Right rotates and shifts move bit 0 into the carry
        pub fn check_c_rr(&mut self, operand: Byte) {
            self.assign_flag(FL_C, bit_test(0, operand));
        }
    }

}

pub mod alu {
    //! One algorithm per instruction family. Every function takes its
    //! operands by value, updates exactly the flags the family documents and
    //! returns the result; the caller decides where the operand came from and
    //! where the result goes.
    use crate::bits::*;
    use crate::registers::Registers;
    use crate::types::*;

    //   add/adc  z0hc
    pub fn add(reg: &mut Registers, a: Byte, b: Byte, carry: bool) -> Byte {
        let cy = carry as Byte;
        let result = a.wrapping_add(b).wrapping_add(cy);
        reg.check_z(result);
        reg.reset_flag(FL_N);
        reg.check_h_add8(a, b, cy);
        reg.check_c_add8(a, b, cy);
        result
    }

    //   sub/sbc/cp  z1hc
    pub fn sub(reg: &mut Registers, a: Byte, b: Byte, carry: bool) -> Byte {
        let cy = carry as Byte;
        let result = a.wrapping_sub(b).wrapping_sub(cy);
        reg.check_z(result);
        reg.set_flag(FL_N);
        reg.check_h_sub8(a, b, cy);
        reg.check_c_sub8(a, b, cy);
        result
    }

    //   and  z010
    pub fn and(reg: &mut Registers, a: Byte, b: Byte) -> Byte {
        let result = a & b;
        reg.set_f(FL_H);
        reg.check_z(result);
        result
    }

    //   or  z000
    pub fn or(reg: &mut Registers, a: Byte, b: Byte) -> Byte {
        let result = a | b;
        reg.set_f(0);
        reg.check_z(result);
        result
    }

    //   xor  z000
    pub fn xor(reg: &mut Registers, a: Byte, b: Byte) -> Byte {
        let result = a ^ b;
        reg.set_f(0);
        reg.check_z(result);
        result
    }

    //   inc  z0h-
    pub fn inc(reg: &mut Registers, val: Byte) -> Byte {
        let result = val.wrapping_add(1);
        reg.check_z(result);
        reg.reset_flag(FL_N);
        reg.check_h_add8(val, 1, 0);
        result
    }

    //   dec  z1h-
    pub fn dec(reg: &mut Registers, val: Byte) -> Byte {
        let result = val.wrapping_sub(1);
        reg.check_z(result);
        reg.set_flag(FL_N);
        reg.check_h_sub8(val, 1, 0);
        result
    }

    //   add hl,rr  -0hc
    pub fn add16(reg: &mut Registers, a: Word, b: Word) -> Word {
        reg.reset_flag(FL_N);
        reg.check_h_add16(a, b);
        reg.check_c_add16(a, b);
        a.wrapping_add(b)
    }

    /// ADD SP,r8 and LD HL,SP+r8: 00hc, with H and C taken from the
    /// unsigned add of the displacement byte to SP's low byte.
    pub fn add_sp(reg: &mut Registers, sp: Word, d: SByte) -> Word {
        let offset = d as Byte;
        reg.reset_flag(FL_Z | FL_N);
        reg.check_h_add8(lo(sp), offset, 0);
        reg.check_c_add8(lo(sp), offset, 0);
        sp.wrapping_add(d as Word)
    }

    /// Rotations and shifts of the CB 00-3F block, in opcode order.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Shift {
        Rlc,
        Rrc,
        Rl,
        Rr,
        Sla,
        Sra,
        Swap,
        Srl,
    }

    impl Shift {
        pub const fn from_y(y: usize) -> Shift {
            match y & 0b111 {
                0 => Shift::Rlc,
                1 => Shift::Rrc,
                2 => Shift::Rl,
                3 => Shift::Rr,
                4 => Shift::Sla,
                5 => Shift::Sra,
                6 => Shift::Swap,
                _ => Shift::Srl,
            }
        }
    }

    //   rlc/rrc/rl/rr/sla/sra/srl  z00c
    //   swap                       z000
    pub fn shift(reg: &mut Registers, kind: Shift, val: Byte) -> Byte {
        let result = match kind {
            Shift::Rlc => val.rotate_left(1),
            Shift::Rrc => val.rotate_right(1),
            Shift::Rl => (val << 1) | reg.carry_in(),
            Shift::Rr => (val >> 1) | (reg.carry_in() << 7),
            Shift::Sla => val << 1,
            Shift::Sra => (val >> 1) | (val & 0x80),
            Shift::Swap => val.rotate_left(4),
            Shift::Srl => val >> 1,
        };
        match kind {
            Shift::Rlc | Shift::Rl | Shift::Sla => reg.check_c_rl(val),
            Shift::Rrc | Shift::Rr | Shift::Sra | Shift::Srl => reg.check_c_rr(val),
            Shift::Swap => reg.reset_flag(FL_C),
        }
        reg.reset_flag(FL_N | FL_H);
        reg.check_z(result);
        result
    }

    /// RLCA, RRCA, RLA, RRA: the CB rotation, except Z always ends up reset.
    pub fn rotate_a(reg: &mut Registers, kind: Shift, a: Byte) -> Byte {
        let result = shift(reg, kind, a);
        reg.reset_flag(FL_Z);
        result
    }

    //   bit  n,r  z01-
    pub fn bit(reg: &mut Registers, n: Byte, val: Byte) {
        reg.assign_flag(FL_Z, !bit_test(n, val));
        reg.reset_flag(FL_N);
        reg.set_flag(FL_H);
    }

    //   res  n,r  ----
    pub const fn res(n: Byte, val: Byte) -> Byte {
        val & !(1 << n)
    }

    //   set  n,r  ----
    pub const fn set(n: Byte, val: Byte) -> Byte {
        val | (1 << n)
    }

    //   cpl  -11-
    pub fn cpl(reg: &mut Registers, a: Byte) -> Byte {
        reg.set_flag(FL_N | FL_H);
        !a
    }

    /// Decimal-adjusts A after a BCD add or subtract, reading the N, H and C
    /// the previous instruction left behind. z-0c
    pub fn daa(reg: &mut Registers, a: Byte) -> Byte {
        let mut adjust: Byte = 0;
        let mut carry = reg.cy();
        let result = if reg.n() {
            if reg.hc() {
                adjust |= 0x06;
            }
            if carry {
                adjust |= 0x60;
            }
            a.wrapping_sub(adjust)
        } else {
            if reg.hc() || (a & LOW_MASK_NIB) > 0x09 {
                adjust |= 0x06;
            }
            if carry || a > 0x99 {
                adjust |= 0x60;
                carry = true;
            }
            a.wrapping_add(adjust)
        };
        reg.check_z(result);
        reg.reset_flag(FL_H);
        reg.assign_flag(FL_C, carry);
        result
    }

}

pub mod memory {
    //! Address-space router for the 16-bit bus.
    use crate::bits::*;
    use crate::error::{Error, Result};
    use crate::types::*;
    use log::{trace, warn};

    // memory map
    pub const MEM_BOOT: Word = 0x0000; // 0000 - 00FF, while the boot latch is active
    pub const MEM_BANK_00: Word = 0x0000; // 0000 - 3FFF
    pub const MEM_BANK_NN: Word = 0x4000; // 4000 - 7FFF
    pub const MEM_VRAM: Word = 0x8000; // 8000 - 9FFF
    pub const MEM_ERAM: Word = 0xA000; // A000 - BFFF
    pub const MEM_WRAM: Word = 0xC000; // C000 - DFFF
    pub const MEM_ECHO: Word = 0xE000; // E000 - FDFF, mirror of C000 - DDFF
    pub const MEM_OAM: Word = 0xFE00; // FE00 - FE9F
    pub const MEM_NOT_USABLE: Word = 0xFEA0; // FEA0 - FEFF
    pub const MEM_IO: Word = 0xFF00; // FF00 - FF7F
    pub const MEM_HRAM: Word = 0xFF80; // FF80 - FFFF

    pub const BOOT_SIZE: usize = 0x100;
    pub const ROM_SIZE: usize = 0x8000;
    pub const ERAM_SIZE: usize = 0x2000;
    pub const WRAM_SIZE: usize = 0x2000;
    pub const HRAM_SIZE: usize = 0x80;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Region {
        Boot,
        Rom,
        Vram,
        ExtRam,
        WorkRam,
        Oam,
        NotUsable,
        Io,
        HighRam,
    }

    impl Region {
        /// Unimplemented peripherals: reads return 0, writes are dropped.
        pub const fn is_stub(self) -> bool {
            matches!(
                self,
                Region::Vram | Region::Oam | Region::NotUsable | Region::Io
            )
        }
    }

    pub struct Memory {
        boot: Box<[Byte; BOOT_SIZE]>,
        rom: Box<[Byte; ROM_SIZE]>,
        eram: Box<[Byte; ERAM_SIZE]>,
        wram: Box<[Byte; WRAM_SIZE]>,
        hram: [Byte; HRAM_SIZE],
        boot_active: bool,
    }

    impl Default for Memory {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Memory {
        /// Zero-filled memory with the boot overlay mapped in.
        pub fn new() -> Memory {
            Memory {
                boot: Box::new([0; BOOT_SIZE]),
                rom: Box::new([0; ROM_SIZE]),
                eram: Box::new([0; ERAM_SIZE]),
                wram: Box::new([0; WRAM_SIZE]),
                hram: [0; HRAM_SIZE],
                boot_active: true,
            }
        }

        pub fn load_boot(&mut self, image: &[Byte]) -> Result<()> {
            if image.len() > BOOT_SIZE {
                return Err(Error::ImageTooLarge {
                    region: "boot",
                    len: image.len(),
                    max: BOOT_SIZE,
                });
            }
            self.boot[..image.len()].copy_from_slice(image);
            Ok(())
        }

        /// Copies the first 32K of a cartridge image; banks past that are not
        /// mapped.
        pub fn load_rom(&mut self, image: &[Byte]) {
            if image.len() > ROM_SIZE {
                warn!(
                    "cartridge is {} bytes, only the first {} are mapped",
                    image.len(),
                    ROM_SIZE
                );
            }
            let len = image.len().min(ROM_SIZE);
            self.rom[..len].copy_from_slice(&image[..len]);
        }

        /// Direct access to the cartridge bytes, bypassing the write filter.
        pub fn rom_mut(&mut self) -> &mut [Byte] {
            &mut self.rom[..]
        }

        pub fn boot_active(&self) -> bool {
            self.boot_active
        }

        pub fn disable_boot(&mut self) {
            if self.boot_active {
                trace!("boot overlay unmapped");
            }
            self.boot_active = false;
        }

        pub fn resolve(&self, addr: Word) -> Region {
            match addr {
                0x0000..=0x00FF if self.boot_active => Region::Boot,
                0x0000..=0x7FFF => Region::Rom,
                0x8000..=0x9FFF => Region::Vram,
                0xA000..=0xBFFF => Region::ExtRam,
                0xC000..=0xFDFF => Region::WorkRam,
                0xFE00..=0xFE9F => Region::Oam,
                0xFEA0..=0xFEFF => Region::NotUsable,
                0xFF00..=0xFF7F => Region::Io,
                0xFF80..=0xFFFF => Region::HighRam,
            }
        }

        fn cell(&self, region: Region, addr: Word) -> Byte {
            let a = addr as usize;
            match region {
                Region::Boot => self.boot[a],
                Region::Rom => self.rom[a],
                Region::ExtRam => self.eram[a - MEM_ERAM as usize],
                // the echo range folds onto the same backing store
                Region::WorkRam => self.wram[(a - MEM_WRAM as usize) % WRAM_SIZE],
                Region::HighRam => self.hram[a - MEM_HRAM as usize],
                Region::Vram | Region::Oam | Region::NotUsable | Region::Io => 0,
            }
        }

        /// Side-effect-free read, for tracing and disassembly.
        pub fn peek(&self, addr: Word) -> Byte {
            self.cell(self.resolve(addr), addr)
        }

        /// Bus read. The first read above the overlay unmaps the boot image
        /// for good.
        pub fn read_byte(&mut self, addr: Word) -> Byte {
            let val = self.peek(addr);
            if self.boot_active && addr as usize >= BOOT_SIZE {
                self.disable_boot();
            }
            val
        }

        pub fn read_word(&mut self, addr: Word) -> Word {
            let low = self.read_byte(addr);
            let high = self.read_byte(addr.wrapping_add(1));
            combine(high, low)
        }

        pub fn write_byte(&mut self, addr: Word, val: Byte) {
            let region = self.resolve(addr);
            let a = addr as usize;
            match region {
                Region::ExtRam => self.eram[a - MEM_ERAM as usize] = val,
                Region::WorkRam => self.wram[(a - MEM_WRAM as usize) % WRAM_SIZE] = val,
                Region::HighRam => self.hram[a - MEM_HRAM as usize] = val,
                // cartridge space is read-only to the cpu; writes there would
                // land on bank controller registers
                Region::Boot | Region::Rom => {
                    trace!("dropped write 0x{:02X} to read-only 0x{:04X}", val, addr)
                }
                Region::Vram | Region::Oam | Region::NotUsable | Region::Io => {}
            }
        }

        /// Little-endian: low byte at `addr`, high byte at `addr + 1`.
        pub fn write_word(&mut self, addr: Word, val: Word) {
            self.write_byte(addr, lo(val));
            self.write_byte(addr.wrapping_add(1), hi(val));
        }
    }

}

pub mod opcodes {
    //! The two dispatch tables and the handlers they point at.
    //!
    //! Handlers see the cpu with PC still on their own opcode byte, so
    //! immediates sit at PC+1. Control flow writes `destination - length`
    //! into PC and lets the uniform post-dispatch advance add the length back.
    use crate::alu::{self, Shift};
    use crate::bits::*;
    use crate::cpu::Cpu;
    use crate::error::{Error, Result};
    use crate::memory::Memory;
    use crate::types::*;
    use const_format::concatcp;
    use log::debug;

    pub type Handler = fn(&mut Cpu, &mut Memory, &Instruction) -> Result<()>;

    pub const CB_PREFIX: Byte = 0xCB;
    pub const ILLEGAL: &str = "ILLEGAL";

    #[derive(Copy, Clone, Debug)]
    pub struct Instruction {
        pub op: Byte,
        pub mnemonic: &'static str,
        /// bytes including the opcode (CB entries exclude the prefix byte)
        pub length: Word,
        pub cycles: u32,
        /// cost when a conditional's test fails; equals `cycles` elsewhere
        pub not_taken_cycles: u32,
        pub exec: Handler,
    }

    impl Instruction {
        pub fn is_placeholder(&self) -> bool {
            self.mnemonic == ILLEGAL
        }

        pub fn is_conditional(&self) -> bool {
            self.cycles != self.not_taken_cycles
        }

        /// Substitutes immediate operand bytes (little-endian) into the
        /// mnemonic, e.g. `JP a16` with `[0x50, 0x01]` becomes `JP $0150`.
        pub fn render(&self, args: &[Byte]) -> String {
            let arg = |i: usize| args.get(i).copied().unwrap_or(0);
            let m = self.mnemonic;
            if m.contains("a16") {
                m.replace("a16", &format!("${:04X}", combine(arg(1), arg(0))))
            } else if m.contains("d16") {
                m.replace("d16", &format!("${:04X}", combine(arg(1), arg(0))))
            } else if m.contains("d8") {
                m.replace("d8", &format!("${:02X}", arg(0)))
            } else if m.contains("a8") {
                m.replace("a8", &format!("${:02X}", arg(0)))
            } else if m.contains("r8") {
                m.replace("r8", &signed(arg(0)).to_string())
            } else {
                m.to_string()
            }
        }
    }

    // https://gb-archive.github.io/salvage/decoding_gbz80_opcodes/Decoding%20Gamboy%20Z80%20Opcodes.html
    // y = bits 5-3, z = bits 2-0, p = bits 5-4
    const fn y(op: Byte) -> usize {
        (op as usize >> 3) & 0b111
    }
    const fn z(op: Byte) -> usize {
        op as usize & 0b111
    }
    const fn p(op: Byte) -> usize {
        y(op) >> 1
    }

    // GMB 8bit-Loadcommands
    // ============================================================================
    // (BC), (DE), (HL+), (HL-)
    fn indirect(cpu: &mut Cpu, op: Byte) -> Word {
        let regs = &mut cpu.regs;
        match p(op) {
            0 => regs.bc(),
            1 => regs.de(),
            step => {
                let hl = regs.hl();
                regs.set_hl(if step == 2 {
                    hl.wrapping_add(1)
                } else {
                    hl.wrapping_sub(1)
                });
                hl
            }
        }
    }

    //   ld   r,r         xx         4 ---- r=r
    //   ld   r,(HL)      xx         8 ---- r=(HL)
    //   ld   (HL),r      7x         8 ---- (HL)=r
    // ----------------------------------------------------------------------------
    fn ld_r_r(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.operand(mem, z(ins.op));
        cpu.set_operand(mem, y(ins.op), val);
        Ok(())
    }

    //   ld   r,n         xx nn      8 ---- r=n
    //   ld   (HL),n      36 nn     12 ----
    // ----------------------------------------------------------------------------
    fn ld_r_d8(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.d8(mem);
        cpu.set_operand(mem, y(ins.op), val);
        Ok(())
    }

    //   ld   (rr),A      x2         8 ---- (BC)/(DE)/(HL+)/(HL-)=A
    // ----------------------------------------------------------------------------
    fn ld_ind_a(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let addr = indirect(cpu, ins.op);
        mem.write_byte(addr, cpu.regs.a());
        Ok(())
    }

    //   ld   A,(rr)      xA         8 ---- A=(BC)/(DE)/(HL+)/(HL-)
    // ----------------------------------------------------------------------------
    fn ld_a_ind(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let addr = indirect(cpu, ins.op);
        let val = mem.read_byte(addr);
        cpu.regs.set_a(val);
        Ok(())
    }

    //   ld   (nn),A      EA nn nn  16 ----
    fn ld_a16_a(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let addr = cpu.d16(mem);
        mem.write_byte(addr, cpu.regs.a());
        Ok(())
    }

    //   ld   A,(nn)      FA nn nn  16 ----
    fn ld_a_a16(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let addr = cpu.d16(mem);
        let val = mem.read_byte(addr);
        cpu.regs.set_a(val);
        Ok(())
    }

    //   ldh  (n),A       E0 nn     12 ---- (FF00+n)=A
    fn ldh_a8_a(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let addr = combine(0xFF, cpu.d8(mem));
        mem.write_byte(addr, cpu.regs.a());
        Ok(())
    }

    //   ldh  A,(n)       F0 nn     12 ---- A=(FF00+n)
    fn ldh_a_a8(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let addr = combine(0xFF, cpu.d8(mem));
        let val = mem.read_byte(addr);
        cpu.regs.set_a(val);
        Ok(())
    }

    //   ld   (C),A       E2         8 ---- (FF00+C)=A
    fn ld_c_a(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        mem.write_byte(combine(0xFF, cpu.regs.c()), cpu.regs.a());
        Ok(())
    }

    //   ld   A,(C)       F2         8 ---- A=(FF00+C)
    fn ld_a_c(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let val = mem.read_byte(combine(0xFF, cpu.regs.c()));
        cpu.regs.set_a(val);
        Ok(())
    }

    // GMB 16bit-Loadcommands
    // ============================================================================
    //   ld   rr,nn       x1 nn nn  12 ---- rr=nn (rr may be BC,DE,HL or SP)
    fn ld_rr_d16(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.d16(mem);
        cpu.regs.set_rp(p(ins.op), val);
        Ok(())
    }

    //   ld   (nn),SP     08 nn nn  20 ----
    fn ld_a16_sp(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let addr = cpu.d16(mem);
        mem.write_word(addr, cpu.regs.sp);
        Ok(())
    }

    //   ld   SP,HL       F9         8 ---- SP=HL
    fn ld_sp_hl(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        cpu.regs.sp = cpu.regs.hl();
        Ok(())
    }

    //   ld   HL,SP+dd    F8 dd     12 00hc
    fn ld_hl_sp_r8(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let d = signed(cpu.d8(mem));
        let sp = cpu.regs.sp;
        let hl = alu::add_sp(&mut cpu.regs, sp, d);
        cpu.regs.set_hl(hl);
        Ok(())
    }

    //   push rr          x5        16 ---- SP=SP-2  (SP)=rr   (rr may be BC,DE,HL,AF)
    fn push(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.regs.rp2(p(ins.op));
        cpu.push(mem, val);
        Ok(())
    }

    //   pop  rr          x1        12 (AF) rr=(SP)  SP=SP+2   (rr may be BC,DE,HL,AF)
    fn pop(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.pop(mem);
        cpu.regs.set_rp2(p(ins.op), val);
        Ok(())
    }

    // GMB 8bit-Arithmetic/logical Commands
    // ============================================================================
    // ADD ADC SUB SBC AND XOR OR CP, in opcode order
    fn apply_alu(cpu: &mut Cpu, kind: usize, val: Byte) {
        let regs = &mut cpu.regs;
        let a = regs.a();
        let carry = regs.cy();
        let result = match kind {
            0 => alu::add(regs, a, val, false),
            1 => alu::add(regs, a, val, carry),
            2 => alu::sub(regs, a, val, false),
            3 => alu::sub(regs, a, val, carry),
            4 => alu::and(regs, a, val),
            5 => alu::xor(regs, a, val),
            6 => alu::or(regs, a, val),
            _ => {
                // cp only keeps the flags
                alu::sub(regs, a, val, false);
                a
            }
        };
        regs.set_a(result);
    }

    //   alu  A,r         xx       4/8 z*hc
    fn alu_r(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.operand(mem, z(ins.op));
        apply_alu(cpu, y(ins.op), val);
        Ok(())
    }

    //   alu  A,n         xx nn      8 z*hc
    fn alu_d8(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.d8(mem);
        apply_alu(cpu, y(ins.op), val);
        Ok(())
    }

    //   inc  r           xx         4 z0h- r=r+1
    //   inc  (HL)        34        12 z0h- (HL)=(HL)+1
    fn inc_r(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let idx = y(ins.op);
        let val = cpu.operand(mem, idx);
        let result = alu::inc(&mut cpu.regs, val);
        cpu.set_operand(mem, idx, result);
        Ok(())
    }

    //   dec  r           xx         4 z1h- r=r-1
    //   dec  (HL)        35        12 z1h- (HL)=(HL)-1
    fn dec_r(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let idx = y(ins.op);
        let val = cpu.operand(mem, idx);
        let result = alu::dec(&mut cpu.regs, val);
        cpu.set_operand(mem, idx, result);
        Ok(())
    }

    //   daa              27         4 z-0x decimal adjust akku
    fn daa(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        let a = cpu.regs.a();
        let result = alu::daa(&mut cpu.regs, a);
        cpu.regs.set_a(result);
        Ok(())
    }

    //   cpl              2F         4 -11- A = A xor FF
    fn cpl(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        let a = cpu.regs.a();
        let result = alu::cpl(&mut cpu.regs, a);
        cpu.regs.set_a(result);
        Ok(())
    }

    // GMB 16bit-Arithmetic/logical Commands
    // ============================================================================
    //   add  HL,rr     x9           8 -0hc HL = HL+rr     ;rr may be BC,DE,HL,SP
    fn add_hl_rr(cpu: &mut Cpu, _: &mut Memory, ins: &Instruction) -> Result<()> {
        let hl = cpu.regs.hl();
        let rr = cpu.regs.rp(p(ins.op));
        let result = alu::add16(&mut cpu.regs, hl, rr);
        cpu.regs.set_hl(result);
        Ok(())
    }

    //   inc  rr        x3           8 ---- rr = rr+1      ;rr may be BC,DE,HL,SP
    fn inc_rr(cpu: &mut Cpu, _: &mut Memory, ins: &Instruction) -> Result<()> {
        let pair = p(ins.op);
        let val = cpu.regs.rp(pair).wrapping_add(1);
        cpu.regs.set_rp(pair, val);
        Ok(())
    }

    //   dec  rr        xB           8 ---- rr = rr-1      ;rr may be BC,DE,HL,SP
    fn dec_rr(cpu: &mut Cpu, _: &mut Memory, ins: &Instruction) -> Result<()> {
        let pair = p(ins.op);
        let val = cpu.regs.rp(pair).wrapping_sub(1);
        cpu.regs.set_rp(pair, val);
        Ok(())
    }

    //   add  SP,dd     E8 dd       16 00hc SP = SP +/- dd ;dd is 8bit signed number
    fn add_sp_r8(cpu: &mut Cpu, mem: &mut Memory, _: &Instruction) -> Result<()> {
        let d = signed(cpu.d8(mem));
        let sp = cpu.regs.sp;
        cpu.regs.sp = alu::add_sp(&mut cpu.regs, sp, d);
        Ok(())
    }

    // GMB Rotate- und Shift-Commands
    // ============================================================================
    //   rlca/rrca/rla/rra  xx       4 000c
    fn rot_a(cpu: &mut Cpu, _: &mut Memory, ins: &Instruction) -> Result<()> {
        let a = cpu.regs.a();
        let result = alu::rotate_a(&mut cpu.regs, Shift::from_y(y(ins.op)), a);
        cpu.regs.set_a(result);
        Ok(())
    }

    //   rlc rrc rl rr sla sra swap srl  r     CB xx   8 z00c
    //   rlc rrc rl rr sla sra swap srl  (HL)  CB xx  16 z00c
    fn cb_shift(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let idx = z(ins.op);
        let val = cpu.operand(mem, idx);
        let result = alu::shift(&mut cpu.regs, Shift::from_y(y(ins.op)), val);
        cpu.set_operand(mem, idx, result);
        Ok(())
    }

    // GMB Singlebit Operation Commands
    // ============================================================================
    //   bit  n,r       CB xx        8 z01- test bit n
    //   bit  n,(HL)    CB xx       12 z01- test bit n
    fn cb_bit(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let val = cpu.operand(mem, z(ins.op));
        alu::bit(&mut cpu.regs, y(ins.op) as Byte, val);
        Ok(())
    }

    //   res  n,r       CB xx        8 ---- reset bit n
    //   res  n,(HL)    CB xx       16 ---- reset bit n
    fn cb_res(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let idx = z(ins.op);
        let val = cpu.operand(mem, idx);
        cpu.set_operand(mem, idx, alu::res(y(ins.op) as Byte, val));
        Ok(())
    }

    //   set  n,r       CB xx        8 ---- set bit n
    //   set  n,(HL)    CB xx       16 ---- set bit n
    fn cb_set(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let idx = z(ins.op);
        let val = cpu.operand(mem, idx);
        cpu.set_operand(mem, idx, alu::set(y(ins.op) as Byte, val));
        Ok(())
    }

    // GMB CPU-Controlcommands
    // ============================================================================
    //   nop            00           4 ---- no operation
    fn nop(_: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        Ok(())
    }

    //   ccf            3F           4 -00c cy=cy xor 1
    fn ccf(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        let carry = cpu.regs.cy();
        cpu.regs.reset_flag(FL_N | FL_H);
        cpu.regs.assign_flag(FL_C, !carry);
        Ok(())
    }

    //   scf            37           4 -001 cy=1
    fn scf(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        cpu.regs.reset_flag(FL_N | FL_H);
        cpu.regs.set_flag(FL_C);
        Ok(())
    }

    //   halt           76         N*4 ---- halt until interrupt occurs (low power)
    fn halt(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        debug!("halt at 0x{:04X}", cpu.regs.pc);
        cpu.halted = true;
        Ok(())
    }

    //   stop           10 00        4 ---- low power standby mode (VERY low power)
    fn stop(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        debug!("stop at 0x{:04X}", cpu.regs.pc);
        cpu.stopped = true;
        Ok(())
    }

    //   di             F3           4 ---- disable interrupts, IME=0
    fn di(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        cpu.ime = false;
        Ok(())
    }

    //   ei             FB           4 ---- enable interrupts, IME=1
    fn ei(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        cpu.ime = true;
        Ok(())
    }

    //   CB             CB           4 ---- next fetch reads the extended table
    fn prefix_cb(cpu: &mut Cpu, _: &mut Memory, _: &Instruction) -> Result<()> {
        cpu.cb_prefix = true;
        Ok(())
    }

    fn illegal(cpu: &mut Cpu, _: &mut Memory, ins: &Instruction) -> Result<()> {
        Err(Error::IllegalOpcode {
            opcode: ins.op,
            pc: cpu.regs.pc,
        })
    }

    // GMB Jumpcommands
    // ============================================================================
    //   jp   nn        C3 nn nn    16 ---- jump to nn, PC=nn
    fn jp(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let dest = cpu.d16(mem);
        cpu.jump(ins, dest);
        Ok(())
    }

    //   jp   HL        E9           4 ---- jump to HL, PC=HL
    fn jp_hl(cpu: &mut Cpu, _: &mut Memory, ins: &Instruction) -> Result<()> {
        let dest = cpu.regs.hl();
        cpu.jump(ins, dest);
        Ok(())
    }

    //   jp   f,nn      xx nn nn 16;12 ---- conditional jump if nz,z,nc,c
    fn jp_cc(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        if cpu.condition(ins.op) {
            jp(cpu, mem, ins)
        } else {
            cpu.skip();
            Ok(())
        }
    }

    //   jr   PC+dd     18 dd       12 ---- relative jump to nn (PC=PC+8-bit signed)
    fn jr(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let d = signed(cpu.d8(mem));
        let dest = cpu.next_pc(ins).wrapping_add(d as Word);
        cpu.jump(ins, dest);
        Ok(())
    }

    //   jr   f,PC+dd   xx dd     12;8 ---- conditional relative jump if nz,z,nc,c
    fn jr_cc(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        if cpu.condition(ins.op) {
            jr(cpu, mem, ins)
        } else {
            cpu.skip();
            Ok(())
        }
    }

    //   call nn        CD nn nn    24 ---- call to nn, SP=SP-2, (SP)=PC, PC=nn
    fn call(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let dest = cpu.d16(mem);
        let ret = cpu.next_pc(ins);
        cpu.push(mem, ret);
        cpu.jump(ins, dest);
        Ok(())
    }

    //   call f,nn      xx nn nn 24;12 ---- conditional call if nz,z,nc,c
    fn call_cc(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        if cpu.condition(ins.op) {
            call(cpu, mem, ins)
        } else {
            cpu.skip();
            Ok(())
        }
    }

    //   ret            C9          16 ---- return, PC=(SP), SP=SP+2
    fn ret(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let dest = cpu.pop(mem);
        cpu.jump(ins, dest);
        Ok(())
    }

    //   ret  f         xx        20;8 ---- conditional return if nz,z,nc,c
    fn ret_cc(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        if cpu.condition(ins.op) {
            ret(cpu, mem, ins)
        } else {
            cpu.skip();
            Ok(())
        }
    }

    //   reti           D9          16 ---- return and enable interrupts (IME=1)
    fn reti(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        cpu.ime = true;
        ret(cpu, mem, ins)
    }

    //   rst  n         xx          16 ---- call to 00,08,10,18,20,28,30,38
    fn rst(cpu: &mut Cpu, mem: &mut Memory, ins: &Instruction) -> Result<()> {
        let dest = (ins.op & 0b0011_1000) as Word;
        let ret = cpu.next_pc(ins);
        cpu.push(mem, ret);
        cpu.jump(ins, dest);
        Ok(())
    }

    // tables
    // ============================================================================
    macro_rules! op {
        ($op:literal, $mnm:literal, $len:literal, $c:literal / $nt:literal, $exec:ident) => {
            Instruction {
                op: $op,
                mnemonic: $mnm,
                length: $len,
                cycles: $c,
                not_taken_cycles: $nt,
                exec: $exec,
            }
        };
        ($op:literal, $mnm:literal, $len:literal, $c:literal, $exec:ident) => {
            Instruction {
                op: $op,
                mnemonic: $mnm,
                length: $len,
                cycles: $c,
                not_taken_cycles: $c,
                exec: $exec,
            }
        };
    }

    // https://www.pastraiser.com/cpu/gameboy/gameboy_opcodes.html
    pub static PRIMARY: [Instruction; 256] = [
        // 0x00
        op!(0x00, "NOP", 1, 4, nop),
        op!(0x01, "LD BC,d16", 3, 12, ld_rr_d16),
        op!(0x02, "LD (BC),A", 1, 8, ld_ind_a),
        op!(0x03, "INC BC", 1, 8, inc_rr),
        op!(0x04, "INC B", 1, 4, inc_r),
        op!(0x05, "DEC B", 1, 4, dec_r),
        op!(0x06, "LD B,d8", 2, 8, ld_r_d8),
        op!(0x07, "RLCA", 1, 4, rot_a),
        op!(0x08, "LD (a16),SP", 3, 20, ld_a16_sp),
        op!(0x09, "ADD HL,BC", 1, 8, add_hl_rr),
        op!(0x0A, "LD A,(BC)", 1, 8, ld_a_ind),
        op!(0x0B, "DEC BC", 1, 8, dec_rr),
        op!(0x0C, "INC C", 1, 4, inc_r),
        op!(0x0D, "DEC C", 1, 4, dec_r),
        op!(0x0E, "LD C,d8", 2, 8, ld_r_d8),
        op!(0x0F, "RRCA", 1, 4, rot_a),
        // 0x10
        op!(0x10, "STOP 0", 2, 4, stop),
        op!(0x11, "LD DE,d16", 3, 12, ld_rr_d16),
        op!(0x12, "LD (DE),A", 1, 8, ld_ind_a),
        op!(0x13, "INC DE", 1, 8, inc_rr),
        op!(0x14, "INC D", 1, 4, inc_r),
        op!(0x15, "DEC D", 1, 4, dec_r),
        op!(0x16, "LD D,d8", 2, 8, ld_r_d8),
        op!(0x17, "RLA", 1, 4, rot_a),
        op!(0x18, "JR r8", 2, 12, jr),
        op!(0x19, "ADD HL,DE", 1, 8, add_hl_rr),
        op!(0x1A, "LD A,(DE)", 1, 8, ld_a_ind),
        op!(0x1B, "DEC DE", 1, 8, dec_rr),
        op!(0x1C, "INC E", 1, 4, inc_r),
        op!(0x1D, "DEC E", 1, 4, dec_r),
        op!(0x1E, "LD E,d8", 2, 8, ld_r_d8),
        op!(0x1F, "RRA", 1, 4, rot_a),
        // 0x20
        op!(0x20, "JR NZ,r8", 2, 12 / 8, jr_cc),
        op!(0x21, "LD HL,d16", 3, 12, ld_rr_d16),
        op!(0x22, "LD (HL+),A", 1, 8, ld_ind_a),
        op!(0x23, "INC HL", 1, 8, inc_rr),
        op!(0x24, "INC H", 1, 4, inc_r),
        op!(0x25, "DEC H", 1, 4, dec_r),
        op!(0x26, "LD H,d8", 2, 8, ld_r_d8),
        op!(0x27, "DAA", 1, 4, daa),
        op!(0x28, "JR Z,r8", 2, 12 / 8, jr_cc),
        op!(0x29, "ADD HL,HL", 1, 8, add_hl_rr),
        op!(0x2A, "LD A,(HL+)", 1, 8, ld_a_ind),
        op!(0x2B, "DEC HL", 1, 8, dec_rr),
        op!(0x2C, "INC L", 1, 4, inc_r),
        op!(0x2D, "DEC L", 1, 4, dec_r),
        op!(0x2E, "LD L,d8", 2, 8, ld_r_d8),
        op!(0x2F, "CPL", 1, 4, cpl),
        // 0x30
        op!(0x30, "JR NC,r8", 2, 12 / 8, jr_cc),
        op!(0x31, "LD SP,d16", 3, 12, ld_rr_d16),
        op!(0x32, "LD (HL-),A", 1, 8, ld_ind_a),
        op!(0x33, "INC SP", 1, 8, inc_rr),
        op!(0x34, "INC (HL)", 1, 12, inc_r),
        op!(0x35, "DEC (HL)", 1, 12, dec_r),
        op!(0x36, "LD (HL),d8", 2, 12, ld_r_d8),
        op!(0x37, "SCF", 1, 4, scf),
        op!(0x38, "JR C,r8", 2, 12 / 8, jr_cc),
        op!(0x39, "ADD HL,SP", 1, 8, add_hl_rr),
        op!(0x3A, "LD A,(HL-)", 1, 8, ld_a_ind),
        op!(0x3B, "DEC SP", 1, 8, dec_rr),
        op!(0x3C, "INC A", 1, 4, inc_r),
        op!(0x3D, "DEC A", 1, 4, dec_r),
        op!(0x3E, "LD A,d8", 2, 8, ld_r_d8),
        op!(0x3F, "CCF", 1, 4, ccf),
        // 0x40
        op!(0x40, "LD B,B", 1, 4, ld_r_r),
        op!(0x41, "LD B,C", 1, 4, ld_r_r),
        op!(0x42, "LD B,D", 1, 4, ld_r_r),
        op!(0x43, "LD B,E", 1, 4, ld_r_r),
        op!(0x44, "LD B,H", 1, 4, ld_r_r),
        op!(0x45, "LD B,L", 1, 4, ld_r_r),
        op!(0x46, "LD B,(HL)", 1, 8, ld_r_r),
        op!(0x47, "LD B,A", 1, 4, ld_r_r),
        op!(0x48, "LD C,B", 1, 4, ld_r_r),
        op!(0x49, "LD C,C", 1, 4, ld_r_r),
        op!(0x4A, "LD C,D", 1, 4, ld_r_r),
        op!(0x4B, "LD C,E", 1, 4, ld_r_r),
        op!(0x4C, "LD C,H", 1, 4, ld_r_r),
        op!(0x4D, "LD C,L", 1, 4, ld_r_r),
        op!(0x4E, "LD C,(HL)", 1, 8, ld_r_r),
        op!(0x4F, "LD C,A", 1, 4, ld_r_r),
        // 0x50
        op!(0x50, "LD D,B", 1, 4, ld_r_r),
        op!(0x51, "LD D,C", 1, 4, ld_r_r),
        op!(0x52, "LD D,D", 1, 4, ld_r_r),
        op!(0x53, "LD D,E", 1, 4, ld_r_r),
        op!(0x54, "LD D,H", 1, 4, ld_r_r),
        op!(0x55, "LD D,L", 1, 4, ld_r_r),
        op!(0x56, "LD D,(HL)", 1, 8, ld_r_r),
        op!(0x57, "LD D,A", 1, 4, ld_r_r),
        op!(0x58, "LD E,B", 1, 4, ld_r_r),
        op!(0x59, "LD E,C", 1, 4, ld_r_r),
        op!(0x5A, "LD E,D", 1, 4, ld_r_r),
        op!(0x5B, "LD E,E", 1, 4, ld_r_r),
        op!(0x5C, "LD E,H", 1, 4, ld_r_r),
        op!(0x5D, "LD E,L", 1, 4, ld_r_r),
        op!(0x5E, "LD E,(HL)", 1, 8, ld_r_r),
        op!(0x5F, "LD E,A", 1, 4, ld_r_r),
        // 0x60
        op!(0x60, "LD H,B", 1, 4, ld_r_r),
        op!(0x61, "LD H,C", 1, 4, ld_r_r),
        op!(0x62, "LD H,D", 1, 4, ld_r_r),
        op!(0x63, "LD H,E", 1, 4, ld_r_r),
        op!(0x64, "LD H,H", 1, 4, ld_r_r),
        op!(0x65, "LD H,L", 1, 4, ld_r_r),
        op!(0x66, "LD H,(HL)", 1, 8, ld_r_r),
        op!(0x67, "LD H,A", 1, 4, ld_r_r),
        op!(0x68, "LD L,B", 1, 4, ld_r_r),
        op!(0x69, "LD L,C", 1, 4, ld_r_r),
        op!(0x6A, "LD L,D", 1, 4, ld_r_r),
        op!(0x6B, "LD L,E", 1, 4, ld_r_r),
        op!(0x6C, "LD L,H", 1, 4, ld_r_r),
        op!(0x6D, "LD L,L", 1, 4, ld_r_r),
        op!(0x6E, "LD L,(HL)", 1, 8, ld_r_r),
        op!(0x6F, "LD L,A", 1, 4, ld_r_r),
        // 0x70
        op!(0x70, "LD (HL),B", 1, 8, ld_r_r),
        op!(0x71, "LD (HL),C", 1, 8, ld_r_r),
        op!(0x72, "LD (HL),D", 1, 8, ld_r_r),
        op!(0x73, "LD (HL),E", 1, 8, ld_r_r),
        op!(0x74, "LD (HL),H", 1, 8, ld_r_r),
        op!(0x75, "LD (HL),L", 1, 8, ld_r_r),
        op!(0x76, "HALT", 1, 4, halt),
        op!(0x77, "LD (HL),A", 1, 8, ld_r_r),
        op!(0x78, "LD A,B", 1, 4, ld_r_r),
        op!(0x79, "LD A,C", 1, 4, ld_r_r),
        op!(0x7A, "LD A,D", 1, 4, ld_r_r),
        op!(0x7B, "LD A,E", 1, 4, ld_r_r),
        op!(0x7C, "LD A,H", 1, 4, ld_r_r),
        op!(0x7D, "LD A,L", 1, 4, ld_r_r),
        op!(0x7E, "LD A,(HL)", 1, 8, ld_r_r),
        op!(0x7F, "LD A,A", 1, 4, ld_r_r),
        // 0x80
        op!(0x80, "ADD A,B", 1, 4, alu_r),
        op!(0x81, "ADD A,C", 1, 4, alu_r),
        op!(0x82, "ADD A,D", 1, 4, alu_r),
        op!(0x83, "ADD A,E", 1, 4, alu_r),
        op!(0x84, "ADD A,H", 1, 4, alu_r),
        op!(0x85, "ADD A,L", 1, 4, alu_r),
        op!(0x86, "ADD A,(HL)", 1, 8, alu_r),
        op!(0x87, "ADD A,A", 1, 4, alu_r),
        op!(0x88, "ADC A,B", 1, 4, alu_r),
        op!(0x89, "ADC A,C", 1, 4, alu_r),
        op!(0x8A, "ADC A,D", 1, 4, alu_r),
        op!(0x8B, "ADC A,E", 1, 4, alu_r),
        op!(0x8C, "ADC A,H", 1, 4, alu_r),
        op!(0x8D, "ADC A,L", 1, 4, alu_r),
        op!(0x8E, "ADC A,(HL)", 1, 8, alu_r),
        op!(0x8F, "ADC A,A", 1, 4, alu_r),
        // 0x90
        op!(0x90, "SUB B", 1, 4, alu_r),
        op!(0x91, "SUB C", 1, 4, alu_r),
        op!(0x92, "SUB D", 1, 4, alu_r),
        op!(0x93, "SUB E", 1, 4, alu_r),
        op!(0x94, "SUB H", 1, 4, alu_r),
        op!(0x95, "SUB L", 1, 4, alu_r),
        op!(0x96, "SUB (HL)", 1, 8, alu_r),
        op!(0x97, "SUB A", 1, 4, alu_r),
        op!(0x98, "SBC A,B", 1, 4, alu_r),
        op!(0x99, "SBC A,C", 1, 4, alu_r),
        op!(0x9A, "SBC A,D", 1, 4, alu_r),
        op!(0x9B, "SBC A,E", 1, 4, alu_r),
        op!(0x9C, "SBC A,H", 1, 4, alu_r),
        op!(0x9D, "SBC A,L", 1, 4, alu_r),
        op!(0x9E, "SBC A,(HL)", 1, 8, alu_r),
        op!(0x9F, "SBC A,A", 1, 4, alu_r),
        // 0xA0
        op!(0xA0, "AND B", 1, 4, alu_r),
        op!(0xA1, "AND C", 1, 4, alu_r),
        op!(0xA2, "AND D", 1, 4, alu_r),
        op!(0xA3, "AND E", 1, 4, alu_r),
        op!(0xA4, "AND H", 1, 4, alu_r),
        op!(0xA5, "AND L", 1, 4, alu_r),
        op!(0xA6, "AND (HL)", 1, 8, alu_r),
        op!(0xA7, "AND A", 1, 4, alu_r),
        op!(0xA8, "XOR B", 1, 4, alu_r),
        op!(0xA9, "XOR C", 1, 4, alu_r),
        op!(0xAA, "XOR D", 1, 4, alu_r),
        op!(0xAB, "XOR E", 1, 4, alu_r),
        op!(0xAC, "XOR H", 1, 4, alu_r),
        op!(0xAD, "XOR L", 1, 4, alu_r),
        op!(0xAE, "XOR (HL)", 1, 8, alu_r),
        op!(0xAF, "XOR A", 1, 4, alu_r),
        // 0xB0
        op!(0xB0, "OR B", 1, 4, alu_r),
        op!(0xB1, "OR C", 1, 4, alu_r),
        op!(0xB2, "OR D", 1, 4, alu_r),
        op!(0xB3, "OR E", 1, 4, alu_r),
        op!(0xB4, "OR H", 1, 4, alu_r),
        op!(0xB5, "OR L", 1, 4, alu_r),
        op!(0xB6, "OR (HL)", 1, 8, alu_r),
        op!(0xB7, "OR A", 1, 4, alu_r),
        op!(0xB8, "CP B", 1, 4, alu_r),
        op!(0xB9, "CP C", 1, 4, alu_r),
        op!(0xBA, "CP D", 1, 4, alu_r),
        op!(0xBB, "CP E", 1, 4, alu_r),
        op!(0xBC, "CP H", 1, 4, alu_r),
        op!(0xBD, "CP L", 1, 4, alu_r),
        op!(0xBE, "CP (HL)", 1, 8, alu_r),
        op!(0xBF, "CP A", 1, 4, alu_r),
        // 0xC0
        op!(0xC0, "RET NZ", 1, 20 / 8, ret_cc),
        op!(0xC1, "POP BC", 1, 12, pop),
        op!(0xC2, "JP NZ,a16", 3, 16 / 12, jp_cc),
        op!(0xC3, "JP a16", 3, 16, jp),
        op!(0xC4, "CALL NZ,a16", 3, 24 / 12, call_cc),
        op!(0xC5, "PUSH BC", 1, 16, push),
        op!(0xC6, "ADD A,d8", 2, 8, alu_d8),
        op!(0xC7, "RST 00H", 1, 16, rst),
        op!(0xC8, "RET Z", 1, 20 / 8, ret_cc),
        op!(0xC9, "RET", 1, 16, ret),
        op!(0xCA, "JP Z,a16", 3, 16 / 12, jp_cc),
        op!(0xCB, "PREFIX CB", 1, 4, prefix_cb),
        op!(0xCC, "CALL Z,a16", 3, 24 / 12, call_cc),
        op!(0xCD, "CALL a16", 3, 24, call),
        op!(0xCE, "ADC A,d8", 2, 8, alu_d8),
        op!(0xCF, "RST 08H", 1, 16, rst),
        // 0xD0
        op!(0xD0, "RET NC", 1, 20 / 8, ret_cc),
        op!(0xD1, "POP DE", 1, 12, pop),
        op!(0xD2, "JP NC,a16", 3, 16 / 12, jp_cc),
        op!(0xD3, "ILLEGAL", 1, 4, illegal),
        op!(0xD4, "CALL NC,a16", 3, 24 / 12, call_cc),
        op!(0xD5, "PUSH DE", 1, 16, push),
        op!(0xD6, "SUB d8", 2, 8, alu_d8),
        op!(0xD7, "RST 10H", 1, 16, rst),
        op!(0xD8, "RET C", 1, 20 / 8, ret_cc),
        op!(0xD9, "RETI", 1, 16, reti),
        op!(0xDA, "JP C,a16", 3, 16 / 12, jp_cc),
        op!(0xDB, "ILLEGAL", 1, 4, illegal),
        op!(0xDC, "CALL C,a16", 3, 24 / 12, call_cc),
        op!(0xDD, "ILLEGAL", 1, 4, illegal),
        op!(0xDE, "SBC A,d8", 2, 8, alu_d8),
        op!(0xDF, "RST 18H", 1, 16, rst),
        // 0xE0
        op!(0xE0, "LDH (a8),A", 2, 12, ldh_a8_a),
        op!(0xE1, "POP HL", 1, 12, pop),
        op!(0xE2, "LD (C),A", 1, 8, ld_c_a),
        op!(0xE3, "ILLEGAL", 1, 4, illegal),
        op!(0xE4, "ILLEGAL", 1, 4, illegal),
        op!(0xE5, "PUSH HL", 1, 16, push),
        op!(0xE6, "AND d8", 2, 8, alu_d8),
        op!(0xE7, "RST 20H", 1, 16, rst),
        op!(0xE8, "ADD SP,r8", 2, 16, add_sp_r8),
        op!(0xE9, "JP HL", 1, 4, jp_hl),
        op!(0xEA, "LD (a16),A", 3, 16, ld_a16_a),
        op!(0xEB, "ILLEGAL", 1, 4, illegal),
        op!(0xEC, "ILLEGAL", 1, 4, illegal),
        op!(0xED, "ILLEGAL", 1, 4, illegal),
        op!(0xEE, "XOR d8", 2, 8, alu_d8),
        op!(0xEF, "RST 28H", 1, 16, rst),
        // 0xF0
        op!(0xF0, "LDH A,(a8)", 2, 12, ldh_a_a8),
        op!(0xF1, "POP AF", 1, 12, pop),
        op!(0xF2, "LD A,(C)", 1, 8, ld_a_c),
        op!(0xF3, "DI", 1, 4, di),
        op!(0xF4, "ILLEGAL", 1, 4, illegal),
        op!(0xF5, "PUSH AF", 1, 16, push),
        op!(0xF6, "OR d8", 2, 8, alu_d8),
        op!(0xF7, "RST 30H", 1, 16, rst),
        op!(0xF8, "LD HL,SP+r8", 2, 12, ld_hl_sp_r8),
        op!(0xF9, "LD SP,HL", 1, 8, ld_sp_hl),
        op!(0xFA, "LD A,(a16)", 3, 16, ld_a_a16),
        op!(0xFB, "EI", 1, 4, ei),
        op!(0xFC, "ILLEGAL", 1, 4, illegal),
        op!(0xFD, "ILLEGAL", 1, 4, illegal),
        op!(0xFE, "CP d8", 2, 8, alu_d8),
        op!(0xFF, "RST 38H", 1, 16, rst),
    ];

    const fn cb(op: Byte, mnemonic: &'static str, cycles: u32, exec: Handler) -> Instruction {
        Instruction {
            op,
            mnemonic,
            length: 1,
            cycles,
            not_taken_cycles: cycles,
            exec,
        }
    }

    // one row per operation, expanded over B C D E H L (HL) A
    macro_rules! cb_block {
        ($(($base:tt, $name:tt, $cyc:tt, $hl:tt, $exec:ident)),* $(,)?) => {
            [$(
                cb($base, concatcp!($name, "B"), $cyc, $exec),
                cb($base + 1, concatcp!($name, "C"), $cyc, $exec),
                cb($base + 2, concatcp!($name, "D"), $cyc, $exec),
                cb($base + 3, concatcp!($name, "E"), $cyc, $exec),
                cb($base + 4, concatcp!($name, "H"), $cyc, $exec),
                cb($base + 5, concatcp!($name, "L"), $cyc, $exec),
                cb($base + 6, concatcp!($name, "(HL)"), $hl, $exec),
                cb($base + 7, concatcp!($name, "A"), $cyc, $exec),
            )*]
        };
    }

    // cycle counts exclude the 4 spent on the prefix
    pub static EXTENDED: [Instruction; 256] = cb_block![
        (0x00, "RLC ", 4, 12, cb_shift),
        (0x08, "RRC ", 4, 12, cb_shift),
        (0x10, "RL ", 4, 12, cb_shift),
        (0x18, "RR ", 4, 12, cb_shift),
        (0x20, "SLA ", 4, 12, cb_shift),
        (0x28, "SRA ", 4, 12, cb_shift),
        (0x30, "SWAP ", 4, 12, cb_shift),
        (0x38, "SRL ", 4, 12, cb_shift),
        (0x40, "BIT 0,", 4, 8, cb_bit),
        (0x48, "BIT 1,", 4, 8, cb_bit),
        (0x50, "BIT 2,", 4, 8, cb_bit),
        (0x58, "BIT 3,", 4, 8, cb_bit),
        (0x60, "BIT 4,", 4, 8, cb_bit),
        (0x68, "BIT 5,", 4, 8, cb_bit),
        (0x70, "BIT 6,", 4, 8, cb_bit),
        (0x78, "BIT 7,", 4, 8, cb_bit),
        (0x80, "RES 0,", 4, 12, cb_res),
        (0x88, "RES 1,", 4, 12, cb_res),
        (0x90, "RES 2,", 4, 12, cb_res),
        (0x98, "RES 3,", 4, 12, cb_res),
        (0xA0, "RES 4,", 4, 12, cb_res),
        (0xA8, "RES 5,", 4, 12, cb_res),
        (0xB0, "RES 6,", 4, 12, cb_res),
        (0xB8, "RES 7,", 4, 12, cb_res),
        (0xC0, "SET 0,", 4, 12, cb_set),
        (0xC8, "SET 1,", 4, 12, cb_set),
        (0xD0, "SET 2,", 4, 12, cb_set),
        (0xD8, "SET 3,", 4, 12, cb_set),
        (0xE0, "SET 4,", 4, 12, cb_set),
        (0xE8, "SET 5,", 4, 12, cb_set),
        (0xF0, "SET 6,", 4, 12, cb_set),
        (0xF8, "SET 7,", 4, 12, cb_set),
    ];

}

pub mod cpu {
    use crate::bits::*;
    use crate::error::{Error, Result};
    use crate::memory::Memory;
    use crate::opcodes::{Instruction, EXTENDED, PRIMARY};
    use crate::registers::Registers;
    use crate::types::*;
    use log::{debug, error, trace};

    pub const CLOCK_HZ: u64 = 4_194_304;

    // restart vectors
    pub const VEC_RST_00: Word = 0x0000;
    pub const VEC_RST_08: Word = 0x0008;
    pub const VEC_RST_10: Word = 0x0010;
    pub const VEC_RST_18: Word = 0x0018;
    pub const VEC_RST_20: Word = 0x0020;
    pub const VEC_RST_28: Word = 0x0028;
    pub const VEC_RST_30: Word = 0x0030;
    pub const VEC_RST_38: Word = 0x0038;

    /// Fetch-execute state machine.
    ///
    /// One call to [`Cpu::step`] is one clock tick. An instruction executes in
    /// full on the tick it is fetched and then occupies the following ticks
    /// until its declared cost has elapsed.
    #[derive(Clone, Debug)]
    pub struct Cpu {
        pub regs: Registers,
        pub(crate) ime: bool,
        pub(crate) halted: bool,
        pub(crate) stopped: bool,
        // next fetch decodes from the extended table
        pub(crate) cb_prefix: bool,
        // the last conditional's test failed; its reduced cost applies
        pub(crate) not_taken: bool,
        current: Option<&'static Instruction>,
        elapsed: u32,
        fault: Option<Error>,
        ticks: u64,
        retired: u64,
    }

    impl Default for Cpu {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Cpu {
        /// Power-on state: registers zeroed, PC at the boot overlay, IME set.
        pub fn new() -> Cpu {
            Cpu {
                regs: Registers::new(),
                ime: true,
                halted: false,
                stopped: false,
                cb_prefix: false,
                not_taken: false,
                current: None,
                elapsed: 0,
                fault: None,
                ticks: 0,
                retired: 0,
            }
        }

        /// Register state the boot program leaves behind at 0x0100.
        // https://gbdev.io/pandocs/Power_Up_Sequence.html#cpu-registers
        pub fn post_boot() -> Cpu {
            let mut cpu = Cpu::new();
            cpu.regs.set_af(0x01B0);
            cpu.regs.set_bc(0x0013);
            cpu.regs.set_de(0x00D8);
            cpu.regs.set_hl(0x014D);
            cpu.regs.sp = 0xFFFE;
            cpu.regs.pc = 0x0100;
            cpu
        }

        /// Advances one clock tick. `Ok(false)` once the cpu has stopped.
        pub fn step(&mut self, mem: &mut Memory) -> Result<bool> {
            if let Some(err) = self.fault {
                return Err(err);
            }
            let alive = self.tick(mem)?;
            self.ticks += 1;
            Ok(alive)
        }

        fn tick(&mut self, mem: &mut Memory) -> Result<bool> {
            if self.halted {
                return Ok(true);
            }
            if self.mid_instruction() {
                self.elapsed += 1;
                return Ok(true);
            }
            if self.stopped {
                return Ok(false);
            }

            let pc = self.regs.pc;
            let opcode = mem.read_byte(pc);
            let ins = if std::mem::take(&mut self.cb_prefix) {
                &EXTENDED[opcode as usize]
            } else {
                &PRIMARY[opcode as usize]
            };
            trace!("0x{:04X}: {:02X} {}", pc, opcode, ins.mnemonic);

            let not_taken = std::mem::replace(&mut self.not_taken, false);
            if let Err(err) = (ins.exec)(self, mem, ins) {
                error!("{}", err);
                self.not_taken = not_taken;
                self.fault = Some(err);
                return Err(err);
            }

            self.current = Some(ins);
            self.elapsed = 1;
            self.retired += 1;
            self.regs.pc = self.regs.pc.wrapping_add(ins.length);
            Ok(true)
        }

        pub fn pc(&self) -> Word {
            self.regs.pc
        }

        pub fn ime(&self) -> bool {
            self.ime
        }

        pub fn halted(&self) -> bool {
            self.halted
        }

        pub fn stopped(&self) -> bool {
            self.stopped
        }

        /// Leaves HALT; the interrupt-delivery side calls this.
        pub fn wake(&mut self) {
            if self.halted {
                debug!("wake at 0x{:04X}", self.regs.pc);
            }
            self.halted = false;
        }

        pub fn fault(&self) -> Option<Error> {
            self.fault
        }

        /// The current instruction still has cycles to spend.
        pub fn mid_instruction(&self) -> bool {
            match self.current {
                Some(ins) if !self.halted => {
                    let cost = if self.not_taken {
                        ins.not_taken_cycles
                    } else {
                        ins.cycles
                    };
                    self.elapsed < cost
                }
                _ => false,
            }
        }

        /// Ticks spent so far, halted and stopped ones included.
        pub fn ticks(&self) -> u64 {
            self.ticks
        }

        /// Instructions executed so far, counting a CB prefix on its own.
        pub fn retired(&self) -> u64 {
            self.retired
        }

        // operand access for handlers
        // ------------------------------------------------------------------

        /// Register by index, with `ADR_HL` meaning the byte at (HL).
        pub(crate) fn operand(&self, mem: &mut Memory, idx: usize) -> Byte {
            if idx == ADR_HL {
                mem.read_byte(self.regs.hl())
            } else {
                self.regs.get(idx)
            }
        }

        pub(crate) fn set_operand(&mut self, mem: &mut Memory, idx: usize, val: Byte) {
            if idx == ADR_HL {
                mem.write_byte(self.regs.hl(), val)
            } else {
                self.regs.set(idx, val)
            }
        }

        pub(crate) fn d8(&self, mem: &mut Memory) -> Byte {
            mem.read_byte(self.regs.pc.wrapping_add(1))
        }

        pub(crate) fn d16(&self, mem: &mut Memory) -> Word {
            mem.read_word(self.regs.pc.wrapping_add(1))
        }

        /// high byte at SP-1, low byte at SP-2
        pub(crate) fn push(&mut self, mem: &mut Memory, val: Word) {
            self.regs.sp = self.regs.sp.wrapping_sub(1);
            mem.write_byte(self.regs.sp, hi(val));
            self.regs.sp = self.regs.sp.wrapping_sub(1);
            mem.write_byte(self.regs.sp, lo(val));
        }

        pub(crate) fn pop(&mut self, mem: &mut Memory) -> Word {
            let low = mem.read_byte(self.regs.sp);
            let high = mem.read_byte(self.regs.sp.wrapping_add(1));
            self.regs.sp = self.regs.sp.wrapping_add(2);
            combine(high, low)
        }

        /// Address of the instruction following `ins`.
        pub(crate) fn next_pc(&self, ins: &Instruction) -> Word {
            self.regs.pc.wrapping_add(ins.length)
        }

        /// Sets PC so the post-dispatch advance lands on `dest`.
        pub(crate) fn jump(&mut self, ins: &Instruction, dest: Word) {
            self.regs.pc = dest.wrapping_sub(ins.length);
        }

        /// NZ, Z, NC, C from bits 4-3 of a conditional opcode
        pub(crate) fn condition(&self, op: Byte) -> bool {
            match (op >> 3) & 0b11 {
                0 => !self.regs.z(),
                1 => self.regs.z(),
                2 => !self.regs.cy(),
                _ => self.regs.cy(),
            }
        }

        pub(crate) fn skip(&mut self) {
            self.not_taken = true;
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const ORIGIN: Word = 0x0200;

        fn setup(program: &[Byte]) -> (Cpu, Memory) {
            let mut mem = Memory::new();
            mem.disable_boot();
            let start = ORIGIN as usize;
            mem.rom_mut()[start..start + program.len()].copy_from_slice(program);
            let mut cpu = Cpu::new();
            cpu.regs.pc = ORIGIN;
            cpu.regs.sp = 0xFFFE;
            (cpu, mem)
        }

        // runs one instruction to completion, returns the ticks it took
        fn execute(cpu: &mut Cpu, mem: &mut Memory) -> u32 {
            assert!(cpu.step(mem).unwrap());
            let mut ticks = 1;
            while cpu.mid_instruction() {
                assert!(cpu.step(mem).unwrap());
                ticks += 1;
            }
            ticks
        }

        #[test]
        fn test_inc_dec_rr_wrap() {
            let (mut cpu, mut mem) = setup(&[0x03, 0x0B]);
            cpu.regs.set_f(FL_Z | FL_N | FL_H | FL_C);
            cpu.regs.set_bc(0x00FF);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.bc(), 0x0100);
            cpu.regs.set_bc(0x0000);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.bc(), 0xFFFF);
            assert_eq!(cpu.regs.f(), FL_MASK);
        }

        #[test]
        fn test_jr_backwards() {
            let (mut cpu, mut mem) = setup(&[0x18, 0xFE]);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.pc(), ORIGIN);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.pc(), ORIGIN);
        }

        #[test]
        fn test_jr_nz() {
            let (mut cpu, mut mem) = setup(&[0x20, 0x05]);
            cpu.regs.set_f(FL_Z);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.pc(), ORIGIN + 2);

            let (mut cpu, mut mem) = setup(&[0x20, 0x05]);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.pc(), ORIGIN + 2 + 5);
        }

        #[test]
        fn test_not_taken_cost_does_not_leak() {
            // JR Z not taken, then an unconditional JR pays full price
            let (mut cpu, mut mem) = setup(&[0x28, 0x10, 0x18, 0x00]);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.pc(), ORIGIN + 4);
        }

        #[test]
        fn test_jp_and_jp_cc() {
            let (mut cpu, mut mem) = setup(&[0xC3, 0x00, 0x40]);
            assert_eq!(execute(&mut cpu, &mut mem), 16);
            assert_eq!(cpu.pc(), 0x4000);

            let (mut cpu, mut mem) = setup(&[0xDA, 0x00, 0x40]);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.pc(), ORIGIN + 3);
        }

        #[test]
        fn test_jp_hl() {
            let (mut cpu, mut mem) = setup(&[0xE9]);
            cpu.regs.set_hl(0x4000);
            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.pc(), 0x4000);
        }

        #[test]
        fn test_call_ret() {
            let (mut cpu, mut mem) = setup(&[0xCD, 0x00, 0x03]);
            mem.rom_mut()[0x0300] = 0xC9;

            assert_eq!(execute(&mut cpu, &mut mem), 24);
            assert_eq!(cpu.pc(), 0x0300);
            assert_eq!(cpu.regs.sp, 0xFFFC);
            assert_eq!(mem.read_byte(0xFFFD), 0x02);
            assert_eq!(mem.read_byte(0xFFFC), 0x03);

            assert_eq!(execute(&mut cpu, &mut mem), 16);
            assert_eq!(cpu.pc(), ORIGIN + 3);
            assert_eq!(cpu.regs.sp, 0xFFFE);
        }

        #[test]
        fn test_conditional_call_ret() {
            let (mut cpu, mut mem) = setup(&[0xCC, 0x00, 0x03, 0xC0]);
            cpu.regs.set_f(0);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.pc(), ORIGIN + 3);
            assert_eq!(cpu.regs.sp, 0xFFFE);

            cpu.regs.set_f(FL_Z);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.pc(), ORIGIN + 4);
            assert_eq!(cpu.regs.sp, 0xFFFE);
        }

        #[test]
        fn test_rst_n() {
            let vectors = [
                (0xC7, VEC_RST_00),
                (0xCF, VEC_RST_08),
                (0xD7, VEC_RST_10),
                (0xDF, VEC_RST_18),
                (0xE7, VEC_RST_20),
                (0xEF, VEC_RST_28),
                (0xF7, VEC_RST_30),
                (0xFF, VEC_RST_38),
            ];
            for (op, target) in vectors {
                let (mut cpu, mut mem) = setup(&[op]);
                assert_eq!(execute(&mut cpu, &mut mem), 16);
                assert_eq!(cpu.pc(), target);
                assert_eq!(cpu.pop(&mut mem), ORIGIN + 1);
            }
        }

        #[test]
        fn test_push_pop_af() {
            // PUSH AF, XOR A, POP AF
            let (mut cpu, mut mem) = setup(&[0xF5, 0xAF, 0xF1]);
            cpu.regs.set_af(0x12B0);
            assert_eq!(execute(&mut cpu, &mut mem), 16);
            assert_eq!(mem.read_byte(0xFFFD), 0x12);
            assert_eq!(mem.read_byte(0xFFFC), 0xB0);

            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.af(), 0x0080);

            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.regs.af(), 0x12B0);
            assert_eq!(cpu.regs.sp, 0xFFFE);
        }

        #[test]
        fn test_pop_af_masks_flags() {
            // PUSH BC, POP AF
            let (mut cpu, mut mem) = setup(&[0xC5, 0xF1]);
            cpu.regs.set_bc(0x34FF);
            execute(&mut cpu, &mut mem);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.af(), 0x34F0);
        }

        #[test]
        fn test_loads_through_hl() {
            // LD (HL+),A  LD A,(HL-)  LD B,(HL)  LD (HL),d8
            let (mut cpu, mut mem) = setup(&[0x22, 0x3A, 0x46, 0x36, 0x7E]);
            cpu.regs.set_a(0x42);
            cpu.regs.set_hl(0xC000);
            mem.write_byte(0xC001, 0x99);

            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(mem.read_byte(0xC000), 0x42);
            assert_eq!(cpu.regs.hl(), 0xC001);

            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.a(), 0x99);
            assert_eq!(cpu.regs.hl(), 0xC000);

            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.b(), 0x42);

            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(mem.read_byte(0xC000), 0x7E);
            assert_eq!(cpu.pc(), ORIGIN + 5);
        }

        #[test]
        fn test_high_page_loads() {
            // LDH (80),A  LDH A,(81)  LD (C),A  LD A,(C)
            let (mut cpu, mut mem) = setup(&[0xE0, 0x80, 0xF0, 0x81, 0xE2, 0xF2]);
            cpu.regs.set_a(0x77);
            mem.write_byte(0xFF81, 0x55);

            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(mem.read_byte(0xFF80), 0x77);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.regs.a(), 0x55);

            cpu.regs.set(REG_C, 0x82);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(mem.read_byte(0xFF82), 0x55);
            cpu.regs.set(REG_C, 0x80);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.a(), 0x77);
            assert_eq!(cpu.pc(), ORIGIN + 6);
        }

        #[test]
        fn test_sixteen_bit_loads() {
            // LD SP,d16  LD (a16),SP  LD HL,d16  LD SP,HL
            let (mut cpu, mut mem) =
                setup(&[0x31, 0xEF, 0xBE, 0x08, 0x00, 0xC0, 0x21, 0x34, 0x12, 0xF9]);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.regs.sp, 0xBEEF);
            assert_eq!(execute(&mut cpu, &mut mem), 20);
            assert_eq!(mem.read_word(0xC000), 0xBEEF);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.regs.hl(), 0x1234);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.sp, 0x1234);
        }

        #[test]
        fn test_sp_offsets() {
            // ADD SP,-2  LD HL,SP+2
            let (mut cpu, mut mem) = setup(&[0xE8, 0xFE, 0xF8, 0x02]);
            assert_eq!(execute(&mut cpu, &mut mem), 16);
            assert_eq!(cpu.regs.sp, 0xFFFC);
            assert_eq!(cpu.regs.f(), FL_H | FL_C);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(cpu.regs.hl(), 0xFFFE);
            assert_eq!(cpu.regs.f(), 0);
        }

        #[test]
        fn test_alu_operand_sources() {
            // ADD A,(HL)  ADC A,d8  CP B  SUB A
            let (mut cpu, mut mem) = setup(&[0x86, 0xCE, 0x01, 0xB8, 0x97]);
            cpu.regs.set_a(0x03);
            cpu.regs.set_hl(0xC000);
            cpu.regs.set(REG_B, 0x05);
            mem.write_byte(0xC000, 0xFD);

            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.a(), 0x00);
            assert_eq!(cpu.regs.f(), FL_Z | FL_H | FL_C);

            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.a(), 0x02);
            assert_eq!(cpu.regs.f(), 0);

            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.regs.a(), 0x02);
            assert_eq!(cpu.regs.f(), FL_N | FL_H | FL_C);

            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.regs.a(), 0x00);
            assert_eq!(cpu.regs.f(), FL_Z | FL_N);
        }

        #[test]
        fn test_inc_dec_hl_byte() {
            let (mut cpu, mut mem) = setup(&[0x34, 0x35, 0x35]);
            cpu.regs.set_hl(0xC000);
            mem.write_byte(0xC000, 0x0F);
            assert_eq!(execute(&mut cpu, &mut mem), 12);
            assert_eq!(mem.read_byte(0xC000), 0x10);
            assert_eq!(cpu.regs.f(), FL_H);
            execute(&mut cpu, &mut mem);
            execute(&mut cpu, &mut mem);
            assert_eq!(mem.read_byte(0xC000), 0x0E);
            assert_eq!(cpu.regs.f(), FL_N);
        }

        #[test]
        fn test_add_hl_rr() {
            let (mut cpu, mut mem) = setup(&[0x09, 0x39]);
            cpu.regs.set_f(FL_Z);
            cpu.regs.set_hl(0x0FFF);
            cpu.regs.set_bc(0x0001);
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.hl(), 0x1000);
            assert_eq!(cpu.regs.f(), FL_Z | FL_H);
            // ADD HL,SP
            assert_eq!(execute(&mut cpu, &mut mem), 8);
            assert_eq!(cpu.regs.hl(), 0x0FFE);
            assert_eq!(cpu.regs.f(), FL_Z | FL_C);
        }

        #[test]
        fn test_rlca_rrca_restore() {
            let (mut cpu, mut mem) = setup(&[0x07, 0x0F]);
            cpu.regs.set_a(0x85);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.a(), 0x0B);
            assert_eq!(cpu.regs.f(), FL_C);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.a(), 0x85);
            assert_eq!(cpu.regs.f(), FL_C);
        }

        #[test]
        fn test_daa_after_add() {
            // ADD A,27  DAA
            let (mut cpu, mut mem) = setup(&[0xC6, 0x27, 0x27]);
            cpu.regs.set_a(0x15);
            execute(&mut cpu, &mut mem);
            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.regs.a(), 0x42);
        }

        #[test]
        fn test_flag_control() {
            // SCF  CCF  CPL
            let (mut cpu, mut mem) = setup(&[0x37, 0x3F, 0x2F]);
            cpu.regs.set_f(FL_Z | FL_N | FL_H);
            cpu.regs.set_a(0xF0);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.f(), FL_Z | FL_C);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.f(), FL_Z);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.regs.a(), 0x0F);
            assert_eq!(cpu.regs.f(), FL_Z | FL_N | FL_H);
        }

        #[test]
        fn test_cb_dispatch() {
            // SWAP A
            let (mut cpu, mut mem) = setup(&[0xCB, 0x37, 0x00]);
            cpu.regs.set_a(0xF1);
            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.regs.a(), 0xF1);
            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.regs.a(), 0x1F);
            assert_eq!(cpu.pc(), ORIGIN + 2);
            // and back to the primary table
            assert_eq!(execute(&mut cpu, &mut mem), 4);
            assert_eq!(cpu.regs.a(), 0x1F);
            assert_eq!(cpu.retired(), 3);
        }

        #[test]
        fn test_cb_hl_forms() {
            // BIT 0,(HL)  RES 2,(HL)  SET 7,(HL)  RL (HL)
            let (mut cpu, mut mem) = setup(&[0xCB, 0x46, 0xCB, 0x96, 0xCB, 0xFE, 0xCB, 0x16]);
            cpu.regs.set_hl(0xC000);
            mem.write_byte(0xC000, 0x05);

            let prefix = execute(&mut cpu, &mut mem);
            assert_eq!(prefix + execute(&mut cpu, &mut mem), 12);
            assert!(!cpu.regs.z());
            assert!(cpu.regs.hc());

            let prefix = execute(&mut cpu, &mut mem);
            assert_eq!(prefix + execute(&mut cpu, &mut mem), 16);
            assert_eq!(mem.read_byte(0xC000), 0x01);

            execute(&mut cpu, &mut mem);
            execute(&mut cpu, &mut mem);
            assert_eq!(mem.read_byte(0xC000), 0x81);

            execute(&mut cpu, &mut mem);
            execute(&mut cpu, &mut mem);
            assert_eq!(mem.read_byte(0xC000), 0x02);
            assert!(cpu.regs.cy());
        }

        #[test]
        fn test_res_set_registers() {
            // RES 3,B  SET 0,E
            let (mut cpu, mut mem) = setup(&[0xCB, 0x98, 0xCB, 0xC3]);
            cpu.regs.set(REG_B, 0xFF);
            cpu.regs.set_f(FL_Z);
            for _ in 0..4 {
                execute(&mut cpu, &mut mem);
            }
            assert_eq!(cpu.regs.b(), 0xF7);
            assert_eq!(cpu.regs.e(), 0x01);
            assert_eq!(cpu.regs.f(), FL_Z);
        }

        #[test]
        fn test_halt_until_woken() {
            let (mut cpu, mut mem) = setup(&[0x76, 0x00]);
            assert_eq!(execute(&mut cpu, &mut mem), 1);
            assert!(cpu.halted());
            for _ in 0..10 {
                assert_eq!(cpu.step(&mut mem), Ok(true));
            }
            assert_eq!(cpu.pc(), ORIGIN + 1);
            assert_eq!(cpu.retired(), 1);

            cpu.wake();
            assert!(cpu.mid_instruction());
            for _ in 0..3 {
                cpu.step(&mut mem).unwrap();
            }
            assert_eq!(cpu.pc(), ORIGIN + 1);
            cpu.step(&mut mem).unwrap();
            assert_eq!(cpu.pc(), ORIGIN + 2);
            assert!(cpu.ime());
        }

        #[test]
        fn test_stop_ends_session() {
            let (mut cpu, mut mem) = setup(&[0xF3, 0x10, 0x00]);
            execute(&mut cpu, &mut mem);
            for _ in 0..4 {
                assert_eq!(cpu.step(&mut mem), Ok(true));
            }
            assert!(cpu.stopped());
            for _ in 0..4 {
                assert_eq!(cpu.step(&mut mem), Ok(false));
            }
            assert_eq!(cpu.pc(), ORIGIN + 3);
            assert!(!cpu.ime());
        }

        #[test]
        fn test_illegal_opcode_latches() {
            let (mut cpu, mut mem) = setup(&[0x00, 0xD3, 0x00]);
            execute(&mut cpu, &mut mem);
            cpu.regs.set_af(0x1230);
            let before = cpu.regs;
            let ticks = cpu.ticks();

            let expected = Error::IllegalOpcode {
                opcode: 0xD3,
                pc: ORIGIN + 1,
            };
            assert_eq!(cpu.step(&mut mem), Err(expected));
            assert_eq!(cpu.step(&mut mem), Err(expected));
            assert_eq!(cpu.fault(), Some(expected));
            assert_eq!(cpu.regs, before);
            assert_eq!(cpu.ticks(), ticks);
        }

        #[test]
        fn test_interrupt_master_enable() {
            // DI  EI  DI  RETI
            let (mut cpu, mut mem) = setup(&[0xF3, 0xFB, 0xF3, 0xD9]);
            assert!(cpu.ime());
            execute(&mut cpu, &mut mem);
            assert!(!cpu.ime());
            execute(&mut cpu, &mut mem);
            assert!(cpu.ime());
            execute(&mut cpu, &mut mem);
            assert!(!cpu.ime());

            cpu.push(&mut mem, 0x1234);
            assert_eq!(execute(&mut cpu, &mut mem), 16);
            assert!(cpu.ime());
            assert_eq!(cpu.pc(), 0x1234);
            assert_eq!(cpu.regs.sp, 0xFFFE);
        }

        #[test]
        fn test_tick_counter() {
            let (mut cpu, mut mem) = setup(&[0x00, 0x01, 0x00, 0x00]);
            execute(&mut cpu, &mut mem);
            execute(&mut cpu, &mut mem);
            assert_eq!(cpu.ticks(), 16);
            assert_eq!(cpu.retired(), 2);
        }

        #[test]
        fn test_post_boot_registers() {
            let cpu = Cpu::post_boot();
            assert_eq!(cpu.regs.af(), 0x01B0);
            assert_eq!(cpu.regs.bc(), 0x0013);
            assert_eq!(cpu.regs.de(), 0x00D8);
            assert_eq!(cpu.regs.hl(), 0x014D);
            assert_eq!(cpu.regs.sp, 0xFFFE);
            assert_eq!(cpu.pc(), 0x0100);
        }
    }
}

pub mod gameboy {
    use crate::cpu::Cpu;
    use crate::error::Result;
    use crate::memory::Memory;
    use crate::types::Word;

    /// The emulator context: one cpu and the address space it drives.
    #[derive(Default)]
    pub struct GameBoy {
        pub cpu: Cpu,
        pub mem: Memory,
    }

    impl GameBoy {
        pub fn new() -> GameBoy {
            GameBoy {
                cpu: Cpu::new(),
                mem: Memory::new(),
            }
        }

        /// Starts at 0x0100 as if the boot program had already run.
        pub fn post_boot() -> GameBoy {
            let mut mem = Memory::new();
            mem.disable_boot();
            GameBoy {
                cpu: Cpu::post_boot(),
                mem,
            }
        }

        pub fn step(&mut self) -> Result<bool> {
            self.cpu.step(&mut self.mem)
        }

        /// Steps up to `ticks` times; `Ok(false)` if the cpu stopped first.
        pub fn run(&mut self, ticks: u64) -> Result<bool> {
            for _ in 0..ticks {
                if !self.step()? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        pub fn pc(&self) -> Word {
            self.cpu.pc()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::error::Error;

        #[test]
        fn test_boot_overlay_hands_over() {
            let mut gb = GameBoy::new();
            // JP 0100
            gb.mem.load_boot(&[0xC3, 0x00, 0x01]).unwrap();
            let mut rom = vec![0xFF; 0x200];
            rom[0x100] = 0x00;
            gb.mem.load_rom(&rom);

            assert!(gb.run(16).unwrap());
            assert_eq!(gb.pc(), 0x0100);
            assert!(gb.mem.boot_active());

            gb.step().unwrap();
            assert!(!gb.mem.boot_active());
            assert_eq!(gb.pc(), 0x0101);
            assert_eq!(gb.mem.read_byte(0x0000), 0xFF);
        }

        #[test]
        fn test_run_until_stop() {
            let mut gb = GameBoy::post_boot();
            let mut rom = vec![0x00; 0x200];
            rom[0x104] = 0x10;
            gb.mem.load_rom(&rom);
            assert_eq!(gb.run(1000), Ok(false));
            assert_eq!(gb.pc(), 0x0106);
        }

        #[test]
        fn test_run_propagates_fault() {
            let mut gb = GameBoy::post_boot();
            let mut rom = vec![0x00; 0x200];
            rom[0x100] = 0xFD;
            gb.mem.load_rom(&rom);
            assert_eq!(
                gb.run(10),
                Err(Error::IllegalOpcode {
                    opcode: 0xFD,
                    pc: 0x0100
                })
            );
        }
    }
}

pub mod io {
    use crate::types::Byte;
    use std::path::Path;

    pub fn read_bytes<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<Byte>> {
        std::fs::read(path)
    }
}

pub mod dbg {
    use std::io::Write;

    use crate::memory::Memory;
    use crate::registers::Registers;

    /// One line of cpu state in the gameboy-doctor layout.
    pub fn trace_line(regs: &Registers, mem: &Memory) -> String {
        let pc = regs.pc;
        let at = |off: u16| mem.peek(pc.wrapping_add(off));
        format!(
            "A:{:02X} F:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X} PC:{:04X} PCMEM:{:02X},{:02X},{:02X},{:02X}",
            regs.a(),
            regs.f(),
            regs.b(),
            regs.c(),
            regs.d(),
            regs.e(),
            regs.h(),
            regs.l(),
            regs.sp,
            pc,
            at(0),
            at(1),
            at(2),
            at(3),
        )
    }

    pub fn log_cpu<W: Write>(out: &mut W, regs: &Registers, mem: &Memory) -> std::io::Result<()> {
        writeln!(out, "{}", trace_line(regs, mem))
    }

}
