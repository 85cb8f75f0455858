//! 65816 instruction core. One `step_cpu` call executes one instruction
//! (or services a pending interrupt) and returns the master-cycle cost.
//! Decode is a flat 256-entry table of (operation, addressing mode, base
//! cycles); the width flags pick 8- or 16-bit behavior at execution time.

use super::Snes;

pub(crate) const FLAG_C: u8 = 0x01;
pub(crate) const FLAG_Z: u8 = 0x02;
pub(crate) const FLAG_I: u8 = 0x04;
pub(crate) const FLAG_D: u8 = 0x08;
/// Index width in native mode; the B (break) bit on a pushed status byte
/// in emulation mode.
pub(crate) const FLAG_X: u8 = 0x10;
/// Memory/accumulator width in native mode.
pub(crate) const FLAG_M: u8 = 0x20;
pub(crate) const FLAG_V: u8 = 0x40;
pub(crate) const FLAG_N: u8 = 0x80;

pub(crate) const VECTOR_RESET: u16 = 0xFFFC;
const VECTOR_NMI_NATIVE: u16 = 0xFFEA;
const VECTOR_NMI_EMU: u16 = 0xFFFA;
const VECTOR_IRQ_NATIVE: u16 = 0xFFEE;
const VECTOR_IRQ_EMU: u16 = 0xFFFE;
const VECTOR_BRK_NATIVE: u16 = 0xFFE6;
const VECTOR_BRK_EMU: u16 = 0xFFFE;
const VECTOR_COP_NATIVE: u16 = 0xFFE4;
const VECTOR_COP_EMU: u16 = 0xFFF4;

/// Master cycles per CPU cycle (slow-ROM timing everywhere).
const MASTER_PER_CPU: u32 = 6;
const INTERRUPT_CPU_CYCLES: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddrMode {
    Implied,
    Acc,
    /// Immediate at accumulator width.
    ImmM,
    /// Immediate at index width.
    ImmX,
    Imm8,
    Imm16,
    Dp,
    DpX,
    DpY,
    DpInd,
    DpIndLong,
    DpXInd,
    DpIndY,
    DpIndLongY,
    Abs,
    AbsX,
    AbsY,
    AbsLong,
    AbsLongX,
    AbsInd,
    AbsIndLong,
    AbsXInd,
    StackRel,
    StackRelIndY,
    Rel8,
    Rel16,
    BlockMove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Bra, Brk, Brl, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cop, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny,
    Jml, Jmp, Jsl, Jsr, Lda, Ldx, Ldy, Lsr, Mvn, Mvp, Nop, Ora, Pea, Pei, Per,
    Pha, Phb, Phd, Phk, Php, Phx, Phy, Pla, Plb, Pld, Plp, Plx, Ply, Rep, Rol,
    Ror, Rti, Rtl, Rts, Sbc, Sec, Sed, Sei, Sep, Sta, Stp, Stx, Sty, Stz, Tax,
    Tay, Tcd, Tcs, Tdc, Trb, Tsb, Tsc, Tsx, Txa, Txs, Txy, Tya, Tyx, Wai, Wdm,
    Xba, Xce,
}

#[derive(Clone, Copy)]
pub(crate) struct OpEntry {
    pub op: Op,
    pub mode: AddrMode,
    pub cycles: u8,
}

const fn e(op: Op, mode: AddrMode, cycles: u8) -> OpEntry {
    OpEntry { op, mode, cycles }
}

use AddrMode as A;
use Op as O;

#[rustfmt::skip]
pub(crate) static OPCODE_TABLE: [OpEntry; 256] = [
    // 0x00
    e(O::Brk, A::Imm8, 8),        e(O::Ora, A::DpXInd, 6),      e(O::Cop, A::Imm8, 8),
    e(O::Ora, A::StackRel, 4),    e(O::Tsb, A::Dp, 5),          e(O::Ora, A::Dp, 3),
    e(O::Asl, A::Dp, 5),          e(O::Ora, A::DpIndLong, 6),   e(O::Php, A::Implied, 3),
    e(O::Ora, A::ImmM, 2),        e(O::Asl, A::Acc, 2),         e(O::Phd, A::Implied, 4),
    e(O::Tsb, A::Abs, 6),         e(O::Ora, A::Abs, 4),         e(O::Asl, A::Abs, 6),
    e(O::Ora, A::AbsLong, 5),
    // 0x10
    e(O::Bpl, A::Rel8, 2),        e(O::Ora, A::DpIndY, 5),      e(O::Ora, A::DpInd, 5),
    e(O::Ora, A::StackRelIndY, 7),e(O::Trb, A::Dp, 5),          e(O::Ora, A::DpX, 4),
    e(O::Asl, A::DpX, 6),         e(O::Ora, A::DpIndLongY, 6),  e(O::Clc, A::Implied, 2),
    e(O::Ora, A::AbsY, 4),        e(O::Inc, A::Acc, 2),         e(O::Tcs, A::Implied, 2),
    e(O::Trb, A::Abs, 6),         e(O::Ora, A::AbsX, 4),        e(O::Asl, A::AbsX, 7),
    e(O::Ora, A::AbsLongX, 5),
    // 0x20
    e(O::Jsr, A::Abs, 6),         e(O::And, A::DpXInd, 6),      e(O::Jsl, A::AbsLong, 8),
    e(O::And, A::StackRel, 4),    e(O::Bit, A::Dp, 3),          e(O::And, A::Dp, 3),
    e(O::Rol, A::Dp, 5),          e(O::And, A::DpIndLong, 6),   e(O::Plp, A::Implied, 4),
    e(O::And, A::ImmM, 2),        e(O::Rol, A::Acc, 2),         e(O::Pld, A::Implied, 5),
    e(O::Bit, A::Abs, 4),         e(O::And, A::Abs, 4),         e(O::Rol, A::Abs, 6),
    e(O::And, A::AbsLong, 5),
    // 0x30
    e(O::Bmi, A::Rel8, 2),        e(O::And, A::DpIndY, 5),      e(O::And, A::DpInd, 5),
    e(O::And, A::StackRelIndY, 7),e(O::Bit, A::DpX, 4),         e(O::And, A::DpX, 4),
    e(O::Rol, A::DpX, 6),         e(O::And, A::DpIndLongY, 6),  e(O::Sec, A::Implied, 2),
    e(O::And, A::AbsY, 4),        e(O::Dec, A::Acc, 2),         e(O::Tsc, A::Implied, 2),
    e(O::Bit, A::AbsX, 4),        e(O::And, A::AbsX, 4),        e(O::Rol, A::AbsX, 7),
    e(O::And, A::AbsLongX, 5),
    // 0x40
    e(O::Rti, A::Implied, 6),     e(O::Eor, A::DpXInd, 6),      e(O::Wdm, A::Imm8, 2),
    e(O::Eor, A::StackRel, 4),    e(O::Mvp, A::BlockMove, 7),   e(O::Eor, A::Dp, 3),
    e(O::Lsr, A::Dp, 5),          e(O::Eor, A::DpIndLong, 6),   e(O::Pha, A::Implied, 3),
    e(O::Eor, A::ImmM, 2),        e(O::Lsr, A::Acc, 2),         e(O::Phk, A::Implied, 3),
    e(O::Jmp, A::Abs, 3),         e(O::Eor, A::Abs, 4),         e(O::Lsr, A::Abs, 6),
    e(O::Eor, A::AbsLong, 5),
    // 0x50
    e(O::Bvc, A::Rel8, 2),        e(O::Eor, A::DpIndY, 5),      e(O::Eor, A::DpInd, 5),
    e(O::Eor, A::StackRelIndY, 7),e(O::Mvn, A::BlockMove, 7),   e(O::Eor, A::DpX, 4),
    e(O::Lsr, A::DpX, 6),         e(O::Eor, A::DpIndLongY, 6),  e(O::Cli, A::Implied, 2),
    e(O::Eor, A::AbsY, 4),        e(O::Phy, A::Implied, 3),     e(O::Tcd, A::Implied, 2),
    e(O::Jml, A::AbsLong, 4),     e(O::Eor, A::AbsX, 4),        e(O::Lsr, A::AbsX, 7),
    e(O::Eor, A::AbsLongX, 5),
    // 0x60
    e(O::Rts, A::Implied, 6),     e(O::Adc, A::DpXInd, 6),      e(O::Per, A::Rel16, 6),
    e(O::Adc, A::StackRel, 4),    e(O::Stz, A::Dp, 3),          e(O::Adc, A::Dp, 3),
    e(O::Ror, A::Dp, 5),          e(O::Adc, A::DpIndLong, 6),   e(O::Pla, A::Implied, 4),
    e(O::Adc, A::ImmM, 2),        e(O::Ror, A::Acc, 2),         e(O::Rtl, A::Implied, 6),
    e(O::Jmp, A::AbsInd, 5),      e(O::Adc, A::Abs, 4),         e(O::Ror, A::Abs, 6),
    e(O::Adc, A::AbsLong, 5),
    // 0x70
    e(O::Bvs, A::Rel8, 2),        e(O::Adc, A::DpIndY, 5),      e(O::Adc, A::DpInd, 5),
    e(O::Adc, A::StackRelIndY, 7),e(O::Stz, A::DpX, 4),         e(O::Adc, A::DpX, 4),
    e(O::Ror, A::DpX, 6),         e(O::Adc, A::DpIndLongY, 6),  e(O::Sei, A::Implied, 2),
    e(O::Adc, A::AbsY, 4),        e(O::Ply, A::Implied, 4),     e(O::Tdc, A::Implied, 2),
    e(O::Jmp, A::AbsXInd, 6),     e(O::Adc, A::AbsX, 4),        e(O::Ror, A::AbsX, 7),
    e(O::Adc, A::AbsLongX, 5),
    // 0x80
    e(O::Bra, A::Rel8, 3),        e(O::Sta, A::DpXInd, 6),      e(O::Brl, A::Rel16, 4),
    e(O::Sta, A::StackRel, 4),    e(O::Sty, A::Dp, 3),          e(O::Sta, A::Dp, 3),
    e(O::Stx, A::Dp, 3),          e(O::Sta, A::DpIndLong, 6),   e(O::Dey, A::Implied, 2),
    e(O::Bit, A::ImmM, 2),        e(O::Txa, A::Implied, 2),     e(O::Phb, A::Implied, 3),
    e(O::Sty, A::Abs, 4),         e(O::Sta, A::Abs, 4),         e(O::Stx, A::Abs, 4),
    e(O::Sta, A::AbsLong, 5),
    // 0x90
    e(O::Bcc, A::Rel8, 2),        e(O::Sta, A::DpIndY, 6),      e(O::Sta, A::DpInd, 5),
    e(O::Sta, A::StackRelIndY, 7),e(O::Sty, A::DpX, 4),         e(O::Sta, A::DpX, 4),
    e(O::Stx, A::DpY, 4),         e(O::Sta, A::DpIndLongY, 6),  e(O::Tya, A::Implied, 2),
    e(O::Sta, A::AbsY, 5),        e(O::Txs, A::Implied, 2),     e(O::Txy, A::Implied, 2),
    e(O::Stz, A::Abs, 4),         e(O::Sta, A::AbsX, 5),        e(O::Stz, A::AbsX, 5),
    e(O::Sta, A::AbsLongX, 5),
    // 0xA0
    e(O::Ldy, A::ImmX, 2),        e(O::Lda, A::DpXInd, 6),      e(O::Ldx, A::ImmX, 2),
    e(O::Lda, A::StackRel, 4),    e(O::Ldy, A::Dp, 3),          e(O::Lda, A::Dp, 3),
    e(O::Ldx, A::Dp, 3),          e(O::Lda, A::DpIndLong, 6),   e(O::Tay, A::Implied, 2),
    e(O::Lda, A::ImmM, 2),        e(O::Tax, A::Implied, 2),     e(O::Plb, A::Implied, 4),
    e(O::Ldy, A::Abs, 4),         e(O::Lda, A::Abs, 4),         e(O::Ldx, A::Abs, 4),
    e(O::Lda, A::AbsLong, 5),
    // 0xB0
    e(O::Bcs, A::Rel8, 2),        e(O::Lda, A::DpIndY, 5),      e(O::Lda, A::DpInd, 5),
    e(O::Lda, A::StackRelIndY, 7),e(O::Ldy, A::DpX, 4),         e(O::Lda, A::DpX, 4),
    e(O::Ldx, A::DpY, 4),         e(O::Lda, A::DpIndLongY, 6),  e(O::Clv, A::Implied, 2),
    e(O::Lda, A::AbsY, 4),        e(O::Tsx, A::Implied, 2),     e(O::Tyx, A::Implied, 2),
    e(O::Ldy, A::AbsX, 4),        e(O::Lda, A::AbsX, 4),        e(O::Ldx, A::AbsY, 4),
    e(O::Lda, A::AbsLongX, 5),
    // 0xC0
    e(O::Cpy, A::ImmX, 2),        e(O::Cmp, A::DpXInd, 6),      e(O::Rep, A::Imm8, 3),
    e(O::Cmp, A::StackRel, 4),    e(O::Cpy, A::Dp, 3),          e(O::Cmp, A::Dp, 3),
    e(O::Dec, A::Dp, 5),          e(O::Cmp, A::DpIndLong, 6),   e(O::Iny, A::Implied, 2),
    e(O::Cmp, A::ImmM, 2),        e(O::Dex, A::Implied, 2),     e(O::Wai, A::Implied, 3),
    e(O::Cpy, A::Abs, 4),         e(O::Cmp, A::Abs, 4),         e(O::Dec, A::Abs, 6),
    e(O::Cmp, A::AbsLong, 5),
    // 0xD0
    e(O::Bne, A::Rel8, 2),        e(O::Cmp, A::DpIndY, 5),      e(O::Cmp, A::DpInd, 5),
    e(O::Cmp, A::StackRelIndY, 7),e(O::Pei, A::Dp, 6),          e(O::Cmp, A::DpX, 4),
    e(O::Dec, A::DpX, 6),         e(O::Cmp, A::DpIndLongY, 6),  e(O::Cld, A::Implied, 2),
    e(O::Cmp, A::AbsY, 4),        e(O::Phx, A::Implied, 3),     e(O::Stp, A::Implied, 3),
    e(O::Jml, A::AbsIndLong, 6),  e(O::Cmp, A::AbsX, 4),        e(O::Dec, A::AbsX, 7),
    e(O::Cmp, A::AbsLongX, 5),
    // 0xE0
    e(O::Cpx, A::ImmX, 2),        e(O::Sbc, A::DpXInd, 6),      e(O::Sep, A::Imm8, 3),
    e(O::Sbc, A::StackRel, 4),    e(O::Cpx, A::Dp, 3),          e(O::Sbc, A::Dp, 3),
    e(O::Inc, A::Dp, 5),          e(O::Sbc, A::DpIndLong, 6),   e(O::Inx, A::Implied, 2),
    e(O::Sbc, A::ImmM, 2),        e(O::Nop, A::Implied, 2),     e(O::Xba, A::Implied, 3),
    e(O::Cpx, A::Abs, 4),         e(O::Sbc, A::Abs, 4),         e(O::Inc, A::Abs, 6),
    e(O::Sbc, A::AbsLong, 5),
    // 0xF0
    e(O::Beq, A::Rel8, 2),        e(O::Sbc, A::DpIndY, 5),      e(O::Sbc, A::DpInd, 5),
    e(O::Sbc, A::StackRelIndY, 7),e(O::Pea, A::Imm16, 5),       e(O::Sbc, A::DpX, 4),
    e(O::Inc, A::DpX, 6),         e(O::Sbc, A::DpIndLongY, 6),  e(O::Sed, A::Implied, 2),
    e(O::Sbc, A::AbsY, 4),        e(O::Plx, A::Implied, 4),     e(O::Xce, A::Implied, 2),
    e(O::Jsr, A::AbsXInd, 8),     e(O::Sbc, A::AbsX, 4),        e(O::Inc, A::AbsX, 7),
    e(O::Sbc, A::AbsLongX, 5),
];

#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Acc,
    Imm(u16),
    Addr(u32),
    Rel(i32),
    Move { dst: u8, src: u8 },
}

impl Snes {
    pub(crate) fn step_cpu(&mut self) -> u32 {
        if self.halted {
            return MASTER_PER_CPU;
        }

        if self.pending_nmi {
            self.pending_nmi = false;
            self.service_interrupt(VECTOR_NMI_NATIVE, VECTOR_NMI_EMU, false);
            self.debug.nmi_serviced = self.debug.nmi_serviced.wrapping_add(1);
            return INTERRUPT_CPU_CYCLES * MASTER_PER_CPU;
        }
        if self.pending_irq && !self.flag(FLAG_I) {
            self.pending_irq = false;
            self.service_interrupt(VECTOR_IRQ_NATIVE, VECTOR_IRQ_EMU, false);
            self.debug.irq_serviced = self.debug.irq_serviced.wrapping_add(1);
            return INTERRUPT_CPU_CYCLES * MASTER_PER_CPU;
        }
        if self.waiting {
            return MASTER_PER_CPU;
        }

        let opcode = self.fetch8();
        let entry = OPCODE_TABLE[opcode as usize];
        self.exec(entry) * MASTER_PER_CPU
    }

    // Width helpers: emulation mode pins both widths to 8 bits.

    pub(crate) fn m8(&self) -> bool {
        self.emulation || self.p & FLAG_M != 0
    }

    pub(crate) fn x8(&self) -> bool {
        self.emulation || self.p & FLAG_X != 0
    }

    pub(crate) fn flag(&self, flag: u8) -> bool {
        self.p & flag != 0
    }

    pub(crate) fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
    }

    fn set_nz(&mut self, value: u16, w8: bool) {
        let (mask, top) = if w8 { (0xFF, 0x80) } else { (0xFFFF, 0x8000) };
        let value = value & mask;
        self.set_flag(FLAG_Z, value == 0);
        self.set_flag(FLAG_N, value & top != 0);
    }

    /// Write the accumulator at memory width; 8-bit mode preserves B.
    fn set_a(&mut self, value: u16) {
        if self.m8() {
            self.a = (self.a & 0xFF00) | (value & 0x00FF);
        } else {
            self.a = value;
        }
    }

    fn set_x_reg(&mut self, value: u16) {
        self.x = if self.x8() { value & 0x00FF } else { value };
    }

    fn set_y_reg(&mut self, value: u16) {
        self.y = if self.x8() { value & 0x00FF } else { value };
    }

    fn xi(&self) -> u16 {
        if self.x8() { self.x & 0x00FF } else { self.x }
    }

    fn yi(&self) -> u16 {
        if self.x8() { self.y & 0x00FF } else { self.y }
    }

    fn acc(&self) -> u16 {
        if self.m8() { self.a & 0x00FF } else { self.a }
    }

    /// Status writes re-pin the forced bits and truncate the index
    /// registers when they narrow.
    fn set_p(&mut self, value: u8) {
        self.p = value;
        if self.emulation {
            self.p |= FLAG_M | FLAG_X;
        }
        if self.x8() {
            self.x &= 0x00FF;
            self.y &= 0x00FF;
        }
    }

    // Fetch and memory access helpers.

    fn pc_addr(&self) -> u32 {
        ((self.pbr as u32) << 16) | self.pc as u32
    }

    fn fetch8(&mut self) -> u8 {
        let value = self.bus_read(self.pc_addr());
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch16(&mut self) -> u16 {
        let lo = self.fetch8() as u16;
        let hi = self.fetch8() as u16;
        (hi << 8) | lo
    }

    fn fetch24(&mut self) -> u32 {
        let lo = self.fetch16() as u32;
        let bank = self.fetch8() as u32;
        (bank << 16) | lo
    }

    pub(crate) fn read16(&mut self, addr: u32) -> u16 {
        let lo = self.bus_read(addr) as u16;
        let hi = self.bus_read((addr + 1) & 0xFF_FFFF) as u16;
        (hi << 8) | lo
    }

    pub(crate) fn read16_bank0(&mut self, offset: u16) -> u16 {
        let lo = self.bus_read(offset as u32) as u16;
        let hi = self.bus_read(offset.wrapping_add(1) as u32) as u16;
        (hi << 8) | lo
    }

    fn read24_bank0(&mut self, offset: u16) -> u32 {
        let lo = self.read16_bank0(offset) as u32;
        let bank = self.bus_read(offset.wrapping_add(2) as u32) as u32;
        (bank << 16) | lo
    }

    fn read16_in_bank(&mut self, bank: u8, offset: u16) -> u16 {
        let base = (bank as u32) << 16;
        let lo = self.bus_read(base | offset as u32) as u16;
        let hi = self.bus_read(base | offset.wrapping_add(1) as u32) as u16;
        (hi << 8) | lo
    }

    // Stack. Pushes decrement, pulls increment; emulation mode pins the
    // pointer to page 0x01.

    fn push8(&mut self, value: u8) {
        self.bus_write(self.sp as u32, value);
        self.sp = self.sp.wrapping_sub(1);
        if self.emulation {
            self.sp = 0x0100 | (self.sp & 0x00FF);
        }
    }

    fn pull8(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        if self.emulation {
            self.sp = 0x0100 | (self.sp & 0x00FF);
        }
        self.bus_read(self.sp as u32)
    }

    fn push16(&mut self, value: u16) {
        self.push8((value >> 8) as u8);
        self.push8(value as u8);
    }

    fn pull16(&mut self) -> u16 {
        let lo = self.pull8() as u16;
        let hi = self.pull8() as u16;
        (hi << 8) | lo
    }

    /// Push state and jump through the right vector. Software interrupts
    /// (BRK/COP) set the B bit on the status byte pushed in emulation mode.
    pub(crate) fn service_interrupt(&mut self, native: u16, emu: u16, software: bool) {
        self.waiting = false;
        if self.emulation {
            self.push16(self.pc);
            let mut flags = self.p | FLAG_M;
            if software {
                flags |= FLAG_X;
            } else {
                flags &= !FLAG_X;
            }
            self.push8(flags);
            self.p |= FLAG_I;
            self.pbr = 0;
            self.pc = self.read16_bank0(emu);
        } else {
            self.push8(self.pbr);
            self.push16(self.pc);
            self.push8(self.p);
            self.p |= FLAG_I;
            self.p &= !FLAG_D;
            self.pbr = 0;
            self.pc = self.read16_bank0(native);
        }
    }

    fn note_decode_miss(&mut self, opcode: u8, at: u32) {
        self.debug.decode_misses = self.debug.decode_misses.wrapping_add(1);
        self.debug.last_decode_miss_opcode = opcode;
        self.debug.last_decode_miss_pc = at;
        self.push_debug_event(format!("decode miss ${opcode:02X} at ${at:06X}"));
    }

    // Addressing-mode resolution.

    fn resolve(&mut self, mode: AddrMode) -> Operand {
        match mode {
            A::Implied => Operand::None,
            A::Acc => Operand::Acc,
            A::ImmM => {
                let value = if self.m8() { self.fetch8() as u16 } else { self.fetch16() };
                Operand::Imm(value)
            }
            A::ImmX => {
                let value = if self.x8() { self.fetch8() as u16 } else { self.fetch16() };
                Operand::Imm(value)
            }
            A::Imm8 => Operand::Imm(self.fetch8() as u16),
            A::Imm16 => Operand::Imm(self.fetch16()),
            A::Dp => {
                let offset = self.fetch8() as u16;
                Operand::Addr(self.dp.wrapping_add(offset) as u32)
            }
            A::DpX => {
                let offset = self.fetch8() as u16;
                Operand::Addr(self.dp.wrapping_add(offset).wrapping_add(self.xi()) as u32)
            }
            A::DpY => {
                let offset = self.fetch8() as u16;
                Operand::Addr(self.dp.wrapping_add(offset).wrapping_add(self.yi()) as u32)
            }
            A::DpInd => {
                let pointer = self.dp.wrapping_add(self.fetch8() as u16);
                let target = self.read16_bank0(pointer);
                Operand::Addr(((self.dbr as u32) << 16) | target as u32)
            }
            A::DpIndLong => {
                let pointer = self.dp.wrapping_add(self.fetch8() as u16);
                Operand::Addr(self.read24_bank0(pointer))
            }
            A::DpXInd => {
                let pointer = self.dp.wrapping_add(self.fetch8() as u16).wrapping_add(self.xi());
                let target = self.read16_bank0(pointer);
                Operand::Addr(((self.dbr as u32) << 16) | target as u32)
            }
            A::DpIndY => {
                let pointer = self.dp.wrapping_add(self.fetch8() as u16);
                let base = ((self.dbr as u32) << 16) | self.read16_bank0(pointer) as u32;
                Operand::Addr((base + self.yi() as u32) & 0xFF_FFFF)
            }
            A::DpIndLongY => {
                let pointer = self.dp.wrapping_add(self.fetch8() as u16);
                let base = self.read24_bank0(pointer);
                Operand::Addr((base + self.yi() as u32) & 0xFF_FFFF)
            }
            A::Abs => {
                let offset = self.fetch16();
                Operand::Addr(((self.dbr as u32) << 16) | offset as u32)
            }
            A::AbsX => {
                let base = ((self.dbr as u32) << 16) | self.fetch16() as u32;
                Operand::Addr((base + self.xi() as u32) & 0xFF_FFFF)
            }
            A::AbsY => {
                let base = ((self.dbr as u32) << 16) | self.fetch16() as u32;
                Operand::Addr((base + self.yi() as u32) & 0xFF_FFFF)
            }
            A::AbsLong => Operand::Addr(self.fetch24()),
            A::AbsLongX => {
                let base = self.fetch24();
                Operand::Addr((base + self.xi() as u32) & 0xFF_FFFF)
            }
            A::AbsInd => {
                let pointer = self.fetch16();
                Operand::Addr(self.read16_bank0(pointer) as u32)
            }
            A::AbsIndLong => {
                let pointer = self.fetch16();
                Operand::Addr(self.read24_bank0(pointer))
            }
            A::AbsXInd => {
                let pointer = self.fetch16().wrapping_add(self.xi());
                let target = self.read16_in_bank(self.pbr, pointer);
                Operand::Addr(((self.pbr as u32) << 16) | target as u32)
            }
            A::StackRel => {
                let offset = self.fetch8() as u16;
                Operand::Addr(self.sp.wrapping_add(offset) as u32)
            }
            A::StackRelIndY => {
                let pointer = self.sp.wrapping_add(self.fetch8() as u16);
                let base = ((self.dbr as u32) << 16) | self.read16_bank0(pointer) as u32;
                Operand::Addr((base + self.yi() as u32) & 0xFF_FFFF)
            }
            A::Rel8 => Operand::Rel(self.fetch8() as i8 as i32),
            A::Rel16 => Operand::Rel(self.fetch16() as i16 as i32),
            A::BlockMove => {
                let dst = self.fetch8();
                let src = self.fetch8();
                Operand::Move { dst, src }
            }
        }
    }

    fn operand_value(&mut self, operand: Operand, w8: bool) -> u16 {
        match operand {
            Operand::Imm(value) => value,
            Operand::Addr(addr) => {
                if w8 {
                    self.bus_read(addr) as u16
                } else {
                    self.read16(addr)
                }
            }
            Operand::Acc => self.acc(),
            _ => 0,
        }
    }

    fn store_to(&mut self, operand: Operand, value: u16, w8: bool) {
        if let Operand::Addr(addr) = operand {
            self.bus_write(addr, value as u8);
            if !w8 {
                self.bus_write((addr + 1) & 0xFF_FFFF, (value >> 8) as u8);
            }
        }
    }

    /// Read-modify-write at accumulator width, on memory or on A.
    fn modify(&mut self, operand: Operand, f: fn(&mut Self, u16, bool) -> u16) {
        let w8 = self.m8();
        match operand {
            Operand::Acc => {
                let value = self.acc();
                let result = f(self, value, w8);
                self.set_a(result);
            }
            Operand::Addr(addr) => {
                let value = if w8 { self.bus_read(addr) as u16 } else { self.read16(addr) };
                let result = f(self, value, w8);
                self.store_to(Operand::Addr(addr), result, w8);
            }
            _ => {}
        }
    }

    // ALU.

    fn op_adc(&mut self, value: u16) {
        let w8 = self.m8();
        if self.flag(FLAG_D) {
            self.adc_bcd(value, w8);
            return;
        }
        let (mask, sign) = if w8 { (0xFFu32, 0x80u32) } else { (0xFFFF, 0x8000) };
        let acc = self.acc() as u32;
        let operand = value as u32 & mask;
        let sum = acc + operand + self.flag(FLAG_C) as u32;
        let result = sum & mask;
        self.set_flag(FLAG_C, sum > mask);
        self.set_flag(FLAG_V, (acc ^ result) & (operand ^ result) & sign != 0);
        self.set_a(result as u16);
        self.set_nz(result as u16, w8);
    }

    fn op_sbc(&mut self, value: u16) {
        let w8 = self.m8();
        if self.flag(FLAG_D) {
            self.sbc_bcd(value, w8);
            return;
        }
        // Binary subtraction is addition of the one's complement.
        let mask = if w8 { 0xFFu16 } else { 0xFFFF };
        self.op_adc(!value & mask);
    }

    fn adc_bcd(&mut self, value: u16, w8: bool) {
        let digits = if w8 { 2 } else { 4 };
        let acc = self.acc();
        let mut carry = self.flag(FLAG_C) as u16;
        let mut result = 0u16;
        for digit in 0..digits {
            let shift = digit * 4;
            let mut nibble = ((acc >> shift) & 0xF) + ((value >> shift) & 0xF) + carry;
            if nibble > 9 {
                nibble += 6;
            }
            carry = (nibble > 0xF) as u16;
            result |= (nibble & 0xF) << shift;
        }
        let sign = if w8 { 0x80 } else { 0x8000 };
        self.set_flag(FLAG_V, (acc ^ result) & (value ^ result) & sign != 0);
        self.set_flag(FLAG_C, carry != 0);
        self.set_a(result);
        self.set_nz(result, w8);
    }

    fn sbc_bcd(&mut self, value: u16, w8: bool) {
        let digits = if w8 { 2 } else { 4 };
        let acc = self.acc();
        let mut borrow = !self.flag(FLAG_C) as i32;
        let mut result = 0u16;
        for digit in 0..digits {
            let shift = digit * 4;
            let mut nibble =
                ((acc >> shift) & 0xF) as i32 - ((value >> shift) & 0xF) as i32 - borrow;
            if nibble < 0 {
                nibble += 10;
                borrow = 1;
            } else {
                borrow = 0;
            }
            result |= ((nibble as u16) & 0xF) << shift;
        }
        let sign = if w8 { 0x80 } else { 0x8000 };
        self.set_flag(FLAG_V, (acc ^ value) & (acc ^ result) & sign != 0);
        self.set_flag(FLAG_C, borrow == 0);
        self.set_a(result);
        self.set_nz(result, w8);
    }

    fn compare(&mut self, register: u16, value: u16, w8: bool) {
        let mask = if w8 { 0xFF } else { 0xFFFF };
        let register = register & mask;
        let value = value & mask;
        self.set_flag(FLAG_C, register >= value);
        self.set_nz(register.wrapping_sub(value), w8);
    }

    fn asl_value(&mut self, value: u16, w8: bool) -> u16 {
        let (mask, top) = if w8 { (0xFFu16, 0x80u16) } else { (0xFFFF, 0x8000) };
        self.set_flag(FLAG_C, value & top != 0);
        let result = (value << 1) & mask;
        self.set_nz(result, w8);
        result
    }

    fn lsr_value(&mut self, value: u16, w8: bool) -> u16 {
        let mask = if w8 { 0xFFu16 } else { 0xFFFF };
        let value = value & mask;
        self.set_flag(FLAG_C, value & 1 != 0);
        let result = value >> 1;
        self.set_nz(result, w8);
        result
    }

    fn rol_value(&mut self, value: u16, w8: bool) -> u16 {
        let (mask, top) = if w8 { (0xFFu16, 0x80u16) } else { (0xFFFF, 0x8000) };
        let carry_in = self.flag(FLAG_C) as u16;
        self.set_flag(FLAG_C, value & top != 0);
        let result = ((value << 1) | carry_in) & mask;
        self.set_nz(result, w8);
        result
    }

    fn ror_value(&mut self, value: u16, w8: bool) -> u16 {
        let (mask, top) = if w8 { (0xFFu16, 0x80u16) } else { (0xFFFF, 0x8000) };
        let carry_in = if self.flag(FLAG_C) { top } else { 0 };
        let value = value & mask;
        self.set_flag(FLAG_C, value & 1 != 0);
        let result = (value >> 1) | carry_in;
        self.set_nz(result, w8);
        result
    }

    fn branch(&mut self, taken: bool, operand: Operand) -> u32 {
        if let Operand::Rel(offset) = operand
            && taken
        {
            self.pc = (self.pc as i32).wrapping_add(offset) as u16;
            return 1;
        }
        0
    }

    // One instruction, already fetched and decoded. Returns CPU cycles.

    fn exec(&mut self, entry: OpEntry) -> u32 {
        let opcode_at = ((self.pbr as u32) << 16) | self.pc.wrapping_sub(1) as u32;
        let operand = self.resolve(entry.mode);
        let mut cycles = entry.cycles as u32;

        match entry.op {
            O::Lda => {
                let w8 = self.m8();
                let value = self.operand_value(operand, w8);
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Ldx => {
                let w8 = self.x8();
                let value = self.operand_value(operand, w8);
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Ldy => {
                let w8 = self.x8();
                let value = self.operand_value(operand, w8);
                self.set_y_reg(value);
                self.set_nz(value, w8);
            }
            O::Sta => {
                let w8 = self.m8();
                let value = self.acc();
                self.store_to(operand, value, w8);
            }
            O::Stx => {
                let w8 = self.x8();
                let value = self.xi();
                self.store_to(operand, value, w8);
            }
            O::Sty => {
                let w8 = self.x8();
                let value = self.yi();
                self.store_to(operand, value, w8);
            }
            O::Stz => {
                let w8 = self.m8();
                self.store_to(operand, 0, w8);
            }

            O::Adc => {
                let w8 = self.m8();
                let value = self.operand_value(operand, w8);
                self.op_adc(value);
            }
            O::Sbc => {
                let w8 = self.m8();
                let value = self.operand_value(operand, w8);
                self.op_sbc(value);
            }
            O::And => {
                let w8 = self.m8();
                let value = self.acc() & self.operand_value(operand, w8);
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Ora => {
                let w8 = self.m8();
                let value = self.acc() | self.operand_value(operand, w8);
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Eor => {
                let w8 = self.m8();
                let value = self.acc() ^ self.operand_value(operand, w8);
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Cmp => {
                let w8 = self.m8();
                let value = self.operand_value(operand, w8);
                self.compare(self.acc(), value, w8);
            }
            O::Cpx => {
                let w8 = self.x8();
                let value = self.operand_value(operand, w8);
                self.compare(self.xi(), value, w8);
            }
            O::Cpy => {
                let w8 = self.x8();
                let value = self.operand_value(operand, w8);
                self.compare(self.yi(), value, w8);
            }
            O::Bit => {
                let w8 = self.m8();
                let value = self.operand_value(operand, w8);
                self.set_flag(FLAG_Z, self.acc() & value == 0);
                if entry.mode != A::ImmM {
                    let (top, next) = if w8 { (0x80, 0x40) } else { (0x8000, 0x4000) };
                    self.set_flag(FLAG_N, value & top != 0);
                    self.set_flag(FLAG_V, value & next != 0);
                }
            }
            O::Tsb => {
                let w8 = self.m8();
                let acc = self.acc();
                if let Operand::Addr(addr) = operand {
                    let value = self.operand_value(operand, w8);
                    self.set_flag(FLAG_Z, acc & value == 0);
                    self.store_to(Operand::Addr(addr), value | acc, w8);
                }
            }
            O::Trb => {
                let w8 = self.m8();
                let acc = self.acc();
                if let Operand::Addr(addr) = operand {
                    let value = self.operand_value(operand, w8);
                    self.set_flag(FLAG_Z, acc & value == 0);
                    self.store_to(Operand::Addr(addr), value & !acc, w8);
                }
            }

            O::Asl => self.modify(operand, Self::asl_value),
            O::Lsr => self.modify(operand, Self::lsr_value),
            O::Rol => self.modify(operand, Self::rol_value),
            O::Ror => self.modify(operand, Self::ror_value),
            O::Inc => self.modify(operand, |cpu, value, w8| {
                let mask = if w8 { 0xFF } else { 0xFFFF };
                let result = value.wrapping_add(1) & mask;
                cpu.set_nz(result, w8);
                result
            }),
            O::Dec => self.modify(operand, |cpu, value, w8| {
                let mask = if w8 { 0xFF } else { 0xFFFF };
                let result = value.wrapping_sub(1) & mask;
                cpu.set_nz(result, w8);
                result
            }),
            O::Inx => {
                let w8 = self.x8();
                let value = self.xi().wrapping_add(1);
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Iny => {
                let w8 = self.x8();
                let value = self.yi().wrapping_add(1);
                self.set_y_reg(value);
                self.set_nz(value, w8);
            }
            O::Dex => {
                let w8 = self.x8();
                let value = self.xi().wrapping_sub(1);
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Dey => {
                let w8 = self.x8();
                let value = self.yi().wrapping_sub(1);
                self.set_y_reg(value);
                self.set_nz(value, w8);
            }

            O::Bpl => cycles += self.branch(!self.flag(FLAG_N), operand),
            O::Bmi => cycles += self.branch(self.flag(FLAG_N), operand),
            O::Bvc => cycles += self.branch(!self.flag(FLAG_V), operand),
            O::Bvs => cycles += self.branch(self.flag(FLAG_V), operand),
            O::Bcc => cycles += self.branch(!self.flag(FLAG_C), operand),
            O::Bcs => cycles += self.branch(self.flag(FLAG_C), operand),
            O::Bne => cycles += self.branch(!self.flag(FLAG_Z), operand),
            O::Beq => cycles += self.branch(self.flag(FLAG_Z), operand),
            O::Bra | O::Brl => {
                self.branch(true, operand);
            }

            O::Jmp => {
                if let Operand::Addr(addr) = operand {
                    self.pc = addr as u16;
                }
            }
            O::Jml => {
                if let Operand::Addr(addr) = operand {
                    self.pbr = (addr >> 16) as u8;
                    self.pc = addr as u16;
                }
            }
            O::Jsr => {
                if let Operand::Addr(addr) = operand {
                    let ret = self.pc.wrapping_sub(1);
                    self.push16(ret);
                    self.pc = addr as u16;
                }
            }
            O::Jsl => {
                if let Operand::Addr(addr) = operand {
                    let ret = self.pc.wrapping_sub(1);
                    self.push8(self.pbr);
                    self.push16(ret);
                    self.pbr = (addr >> 16) as u8;
                    self.pc = addr as u16;
                }
            }
            O::Rts => {
                self.pc = self.pull16().wrapping_add(1);
            }
            O::Rtl => {
                self.pc = self.pull16().wrapping_add(1);
                self.pbr = self.pull8();
            }
            O::Rti => {
                let flags = self.pull8();
                self.set_p(flags);
                self.pc = self.pull16();
                if !self.emulation {
                    self.pbr = self.pull8();
                }
            }

            O::Brk => self.service_interrupt(VECTOR_BRK_NATIVE, VECTOR_BRK_EMU, true),
            O::Cop => self.service_interrupt(VECTOR_COP_NATIVE, VECTOR_COP_EMU, true),

            O::Pha => {
                if self.m8() {
                    self.push8(self.a as u8);
                } else {
                    self.push16(self.a);
                }
            }
            O::Pla => {
                let w8 = self.m8();
                let value = if w8 { self.pull8() as u16 } else { self.pull16() };
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Phx => {
                if self.x8() {
                    self.push8(self.x as u8);
                } else {
                    self.push16(self.x);
                }
            }
            O::Plx => {
                let w8 = self.x8();
                let value = if w8 { self.pull8() as u16 } else { self.pull16() };
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Phy => {
                if self.x8() {
                    self.push8(self.y as u8);
                } else {
                    self.push16(self.y);
                }
            }
            O::Ply => {
                let w8 = self.x8();
                let value = if w8 { self.pull8() as u16 } else { self.pull16() };
                self.set_y_reg(value);
                self.set_nz(value, w8);
            }
            O::Php => self.push8(self.p),
            O::Plp => {
                let flags = self.pull8();
                self.set_p(flags);
            }
            O::Phb => self.push8(self.dbr),
            O::Plb => {
                self.dbr = self.pull8();
                self.set_nz(self.dbr as u16, true);
            }
            O::Phd => self.push16(self.dp),
            O::Pld => {
                self.dp = self.pull16();
                self.set_nz(self.dp, false);
            }
            O::Phk => self.push8(self.pbr),
            O::Pea => {
                if let Operand::Imm(value) = operand {
                    self.push16(value);
                }
            }
            O::Pei => {
                if let Operand::Addr(addr) = operand {
                    let value = self.read16(addr);
                    self.push16(value);
                }
            }
            O::Per => {
                if let Operand::Rel(offset) = operand {
                    let value = (self.pc as i32).wrapping_add(offset) as u16;
                    self.push16(value);
                }
            }

            O::Tax => {
                let w8 = self.x8();
                let value = if w8 { self.a & 0xFF } else { self.a };
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Tay => {
                let w8 = self.x8();
                let value = if w8 { self.a & 0xFF } else { self.a };
                self.set_y_reg(value);
                self.set_nz(value, w8);
            }
            O::Txa => {
                let w8 = self.m8();
                let value = self.xi();
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Tya => {
                let w8 = self.m8();
                let value = self.yi();
                self.set_a(value);
                self.set_nz(value, w8);
            }
            O::Txy => {
                let w8 = self.x8();
                let value = self.xi();
                self.set_y_reg(value);
                self.set_nz(value, w8);
            }
            O::Tyx => {
                let w8 = self.x8();
                let value = self.yi();
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Tsx => {
                let w8 = self.x8();
                let value = if w8 { self.sp & 0xFF } else { self.sp };
                self.set_x_reg(value);
                self.set_nz(value, w8);
            }
            O::Txs => {
                self.sp = if self.emulation {
                    0x0100 | (self.x & 0x00FF)
                } else {
                    self.xi()
                };
            }
            O::Tcd => {
                self.dp = self.a;
                self.set_nz(self.a, false);
            }
            O::Tdc => {
                self.a = self.dp;
                self.set_nz(self.a, false);
            }
            O::Tcs => {
                self.sp = if self.emulation { 0x0100 | (self.a & 0x00FF) } else { self.a };
            }
            O::Tsc => {
                self.a = self.sp;
                self.set_nz(self.a, false);
            }

            O::Clc => self.set_flag(FLAG_C, false),
            O::Sec => self.set_flag(FLAG_C, true),
            O::Cli => self.set_flag(FLAG_I, false),
            O::Sei => self.set_flag(FLAG_I, true),
            O::Cld => self.set_flag(FLAG_D, false),
            O::Sed => self.set_flag(FLAG_D, true),
            O::Clv => self.set_flag(FLAG_V, false),
            O::Rep => {
                if let Operand::Imm(value) = operand {
                    self.set_p(self.p & !(value as u8));
                }
            }
            O::Sep => {
                if let Operand::Imm(value) = operand {
                    self.set_p(self.p | value as u8);
                }
            }
            O::Xce => {
                let old_carry = self.flag(FLAG_C);
                self.set_flag(FLAG_C, self.emulation);
                self.emulation = old_carry;
                if self.emulation {
                    self.p |= FLAG_M | FLAG_X;
                    self.x &= 0x00FF;
                    self.y &= 0x00FF;
                    self.sp = 0x0100 | (self.sp & 0x00FF);
                }
            }
            O::Xba => {
                self.a = self.a.rotate_left(8);
                self.set_nz(self.a, true);
            }

            O::Mvn | O::Mvp => {
                if let Operand::Move { dst, src } = operand {
                    let count = self.a as u32 + 1;
                    let forward = entry.op == O::Mvn;
                    for _ in 0..count {
                        let from = ((src as u32) << 16) | self.xi() as u32;
                        let to = ((dst as u32) << 16) | self.yi() as u32;
                        let byte = self.bus_read(from);
                        self.bus_write(to, byte);
                        if forward {
                            self.set_x_reg(self.xi().wrapping_add(1));
                            self.set_y_reg(self.yi().wrapping_add(1));
                        } else {
                            self.set_x_reg(self.xi().wrapping_sub(1));
                            self.set_y_reg(self.yi().wrapping_sub(1));
                        }
                    }
                    self.a = 0xFFFF;
                    self.dbr = dst;
                    cycles = 7 * count;
                }
            }

            O::Nop => {}
            O::Wdm => self.note_decode_miss(0x42, opcode_at),
            O::Wai => self.waiting = true,
            O::Stp => {
                self.halted = true;
                self.push_debug_event(format!("STP at ${opcode_at:06X}"));
            }
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::super::testrom::*;
    use super::*;

    /// CLC; XCE: the canonical switch into native mode.
    const NATIVE: [u8; 2] = [0x18, 0xFB];

    fn run_until_stp(snes: &mut super::super::Snes, max_steps: usize) {
        for _ in 0..max_steps {
            if snes.halted {
                return;
            }
            snes.step_cpu();
        }
        panic!("program did not reach STP in {max_steps} steps");
    }

    fn snes_run(code: &[u8]) -> super::super::Snes {
        let mut snes = snes_with_code(code);
        run_until_stp(&mut snes, 10_000);
        snes
    }

    #[test]
    fn lda_sta_reach_display_register() {
        // S4: LDA #$42; STA $2100 leaves brightness 2, forced-blank off.
        let mut snes = snes_with_code(&[0xA9, 0x42, 0x8D, 0x00, 0x21]);
        step_n(&mut snes, 2);
        assert_eq!(snes.ppu.brightness(), 2);
        assert!(!snes.ppu.forced_blank());
    }

    #[test]
    fn sep_after_rep_truncates_store_width() {
        // S5: a 16-bit load then SEP #$20 stores only the low byte.
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x20, // REP #$20
            0xA9, 0x34, 0x12, // LDA #$1234
            0xE2, 0x20, // SEP #$20
            0x85, 0x10, // STA $10
            0xDB, // STP
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x10], 0x34);
        assert_eq!(snes.wram[0x11], 0x00);
    }

    #[test]
    fn index_width_narrowing_truncates() {
        // Property 4: REP widens, SEP narrows and truncates X.
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x10, // REP #$10
            0xA2, 0x34, 0x12, // LDX #$1234
            0xE2, 0x10, // SEP #$10
            0xDB, // STP
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.x, 0x0034);
    }

    #[test]
    fn sixteen_bit_arithmetic_after_rep() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x20, // REP #$20
            0x18, // CLC
            0xA9, 0xFF, 0x7F, // LDA #$7FFF
            0x69, 0x01, 0x00, // ADC #$0001
            0xDB, // STP
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.a, 0x8000);
        assert!(snes.flag(FLAG_N));
        assert!(snes.flag(FLAG_V));
        assert!(!snes.flag(FLAG_C));
    }

    #[test]
    fn eight_bit_arithmetic_preserves_high_accumulator() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x20, // REP #$20
            0xA9, 0x00, 0x12, // LDA #$1200
            0xE2, 0x20, // SEP #$20
            0x18, // CLC
            0x69, 0x05, // ADC #$05
            0xDB, // STP
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.a, 0x1205);
    }

    #[test]
    fn adc_sets_overflow_on_signed_wrap() {
        let snes = snes_run(&[0x18, 0xA9, 0x50, 0x69, 0x50, 0xDB]);
        assert_eq!(snes.a & 0xFF, 0xA0);
        assert!(snes.flag(FLAG_V));
        assert!(snes.flag(FLAG_N));
        assert!(!snes.flag(FLAG_C));
    }

    #[test]
    fn decimal_adc_in_emulation_mode() {
        // SED; CLC; LDA #$15; ADC #$27 -> BCD 42.
        let snes = snes_run(&[0xF8, 0x18, 0xA9, 0x15, 0x69, 0x27, 0xDB]);
        assert_eq!(snes.a & 0xFF, 0x42);
        assert!(!snes.flag(FLAG_C));
    }

    #[test]
    fn decimal_adc_carries_out() {
        let snes = snes_run(&[0xF8, 0x38, 0xA9, 0x99, 0x69, 0x00, 0xDB]);
        assert_eq!(snes.a & 0xFF, 0x00);
        assert!(snes.flag(FLAG_C));
    }

    #[test]
    fn decimal_sbc_borrows() {
        // SED; SEC; LDA #$42; SBC #$07 -> BCD 35.
        let snes = snes_run(&[0xF8, 0x38, 0xA9, 0x42, 0xE9, 0x07, 0xDB]);
        assert_eq!(snes.a & 0xFF, 0x35);
        assert!(snes.flag(FLAG_C));
    }

    #[test]
    fn binary_sbc_and_carry() {
        let snes = snes_run(&[0x38, 0xA9, 0x40, 0xE9, 0x41, 0xDB]);
        assert_eq!(snes.a & 0xFF, 0xFF);
        assert!(!snes.flag(FLAG_C));
    }

    #[test]
    fn emulation_stack_stays_in_page_one() {
        // Property 5: pushes and pulls wrap within 0x0100-0x01FF.
        let code = [
            0xA2, 0x02, // LDX #$02
            0x9A, // TXS (emulation: SP=$0102)
            0xA9, 0x11, // LDA #$11
            0x48, // PHA
            0x48, // PHA
            0x48, // PHA  (pointer wraps past 0x0100)
            0x68, // PLA
            0xDB, // STP
        ];
        let mut snes = snes_with_code(&code);
        run_until_stp(&mut snes, 100);
        // Pointer wrapped to the top of page one and the pull followed it
        // back down without ever leaving the page.
        assert_eq!(snes.sp & 0xFF00, 0x0100);
        assert_eq!(snes.wram[0x0100], 0x11);
        assert_eq!(snes.a & 0xFF, 0x11);
    }

    #[test]
    fn xce_swaps_carry_and_emulation() {
        let mut snes = snes_with_code(&[0x18, 0xFB, 0xDB]);
        assert!(snes.emulation);
        step_n(&mut snes, 2);
        assert!(!snes.emulation);
        // The old emulation flag landed in carry.
        assert!(snes.flag(FLAG_C));
    }

    #[test]
    fn xce_back_to_emulation_forces_widths_and_stack_page() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x30, // REP #$30
            0xA2, 0x34, 0x12, // LDX #$1234
            0x38, // SEC
            0xFB, // XCE (into emulation)
            0xDB, // STP
        ]);
        let snes = snes_run(&code);
        assert!(snes.emulation);
        assert_eq!(snes.x, 0x0034);
        assert_eq!(snes.sp & 0xFF00, 0x0100);
        assert_ne!(snes.p & (FLAG_M | FLAG_X), 0);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let mut code = vec![
            0x20, 0x10, 0x80, // JSR $8010
            0x8D, 0x40, 0x00, // STA $0040
            0xDB, // STP
        ];
        code.resize(0x10, 0xEA);
        code.extend_from_slice(&[
            0xA9, 0x77, // $8010: LDA #$77
            0x60, // RTS
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x40], 0x77);
    }

    #[test]
    fn jsl_rtl_round_trip() {
        let mut code = vec![
            0x22, 0x10, 0x80, 0x00, // JSL $00:8010
            0x8D, 0x41, 0x00, // STA $0041
            0xDB, // STP
        ];
        code.resize(0x10, 0xEA);
        code.extend_from_slice(&[0xA9, 0x66, 0x6B]); // LDA #$66; RTL
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x41], 0x66);
    }

    #[test]
    fn brk_uses_emulation_vector_and_sets_break_bit() {
        // The shared emulation IRQ/BRK vector points at 0x9000 = STP.
        let code = [0x00, 0x00]; // BRK + signature
        let mut snes = super::super::Snes::new();
        snes.load_cartridge(&super::super::testrom::lorom_with_code_and_nmi(&code, &[0xDB]))
            .unwrap();
        snes.step_cpu();
        assert_eq!(snes.pc, 0x9000);
        assert!(snes.flag(FLAG_I));
        // Pushed status carries the B bit; return address is the byte after
        // the signature.
        let flags = snes.wram[0x01FD];
        assert_ne!(flags & FLAG_X, 0);
        let ret = u16::from_le_bytes([snes.wram[0x01FE], snes.wram[0x01FF]]);
        assert_eq!(ret, 0x8002);
    }

    #[test]
    fn branches_follow_flags() {
        // BNE skips the marker store, BEQ takes it.
        let code = [
            0xA9, 0x01, // LDA #$01 (Z clear)
            0xD0, 0x02, // BNE +2
            0xA9, 0xFF, // skipped
            0x8D, 0x50, 0x00, // STA $0050
            0xA9, 0x00, // LDA #$00 (Z set)
            0xF0, 0x02, // BEQ +2
            0xA9, 0xEE, // skipped
            0x8D, 0x51, 0x00, // STA $0051
            0xDB, // STP
        ];
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x50], 0x01);
        assert_eq!(snes.wram[0x51], 0x00);
    }

    #[test]
    fn brl_and_bra_are_unconditional() {
        let mut code = vec![
            0x80, 0x01, // BRA +1
            0xDB, // skipped
            0x82, 0x02, 0x00, // BRL +2
            0xDB, 0xDB, // skipped
            0xA9, 0x21, // LDA #$21
            0x8D, 0x52, 0x00, // STA $0052
            0xDB,
        ];
        code.resize(0x20, 0xEA);
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x52], 0x21);
    }

    #[test]
    fn block_move_forward_copies_and_updates_registers() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x30, // REP #$30
            0xA9, 0x03, 0x00, // LDA #$0003 (4 bytes)
            0xA2, 0x00, 0x10, // LDX #$1000
            0xA0, 0x00, 0x20, // LDY #$2000
            0x54, 0x7E, 0x7E, // MVN $7E,$7E
            0xDB, // STP
        ]);
        let mut snes = snes_with_code(&code);
        for (index, byte) in [0xDE, 0xAD, 0xBE, 0xEF].iter().enumerate() {
            snes.wram[0x1000 + index] = *byte;
        }
        run_until_stp(&mut snes, 100);

        assert_eq!(&snes.wram[0x2000..0x2004], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(snes.a, 0xFFFF);
        assert_eq!(snes.x, 0x1004);
        assert_eq!(snes.y, 0x2004);
        assert_eq!(snes.dbr, 0x7E);
    }

    #[test]
    fn stack_relative_addressing_reads_below_frame() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xA9, 0x99, // LDA #$99 (8-bit A: M still set)
            0x48, // PHA
            0xA9, 0x00, // LDA #$00
            0xA3, 0x01, // LDA $01,S
            0x8D, 0x60, 0x00, // STA $0060
            0xDB,
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x60], 0x99);
    }

    #[test]
    fn direct_page_register_offsets_addressing() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x20, // REP #$20
            0xA9, 0x00, 0x03, // LDA #$0300
            0x5B, // TCD (DP=$0300)
            0xE2, 0x20, // SEP #$20
            0xA9, 0x7A, // LDA #$7A
            0x85, 0x10, // STA $10 -> $0310
            0xDB,
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x0310], 0x7A);
    }

    #[test]
    fn wdm_counts_a_decode_miss_and_continues() {
        let snes = snes_run(&[0x42, 0x00, 0xA9, 0x33, 0xDB]);
        assert_eq!(snes.debug_counters().decode_misses, 1);
        assert_eq!(snes.a & 0xFF, 0x33);
    }

    #[test]
    fn wai_resumes_on_interrupt() {
        let mut snes = snes_with_code(&[0xCB, 0xEA, 0xDB]); // WAI; NOP; STP
        snes.step_cpu();
        assert!(snes.waiting);
        let before = snes.pc;
        snes.step_cpu();
        assert_eq!(snes.pc, before);
        snes.pending_nmi = true;
        snes.step_cpu(); // services NMI, clears waiting
        assert!(!snes.waiting);
    }

    #[test]
    fn xba_swaps_accumulator_bytes() {
        let mut code = NATIVE.to_vec();
        code.extend_from_slice(&[
            0xC2, 0x20, 0xA9, 0x34, 0x12, // REP; LDA #$1234
            0xEB, // XBA
            0xDB,
        ]);
        let snes = snes_run(&code);
        assert_eq!(snes.a, 0x3412);
    }

    #[test]
    fn tsb_trb_set_and_clear_memory_bits() {
        let code = [
            0xA9, 0x0F, // LDA #$0F
            0x8D, 0x70, 0x00, // STA $0070
            0xA9, 0xF0, // LDA #$F0
            0x0C, 0x70, 0x00, // TSB $0070 -> $FF, Z set (no overlap)
            0xA9, 0x3C, // LDA #$3C
            0x1C, 0x70, 0x00, // TRB $0070 -> $C3
            0xDB,
        ];
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x70], 0xC3);
    }

    #[test]
    fn indexed_absolute_crosses_into_index() {
        let code = [
            0xA2, 0x04, // LDX #$04
            0xA9, 0x5C, // LDA #$5C
            0x9D, 0x80, 0x00, // STA $0080,X -> $0084
            0xDB,
        ];
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x84], 0x5C);
    }

    #[test]
    fn dp_indirect_pointers_use_bank_zero() {
        let code = [
            0xA9, 0x90, // LDA #$90
            0x85, 0x21, // STA $21 (pointer high)
            0xA9, 0x00, // LDA #$00
            0x85, 0x20, // STA $20 (pointer low -> $0090)
            0xA9, 0x6D, // LDA #$6D
            0x92, 0x20, // STA ($20)
            0xDB,
        ];
        let snes = snes_run(&code);
        assert_eq!(snes.wram[0x90], 0x6D);
    }

    #[test]
    fn every_opcode_has_a_table_entry() {
        // The dispatch table is total: decode cannot miss.
        for (index, entry) in OPCODE_TABLE.iter().enumerate() {
            assert!(entry.cycles >= 2, "opcode {index:#04X} has no cycle base");
        }
    }
}
