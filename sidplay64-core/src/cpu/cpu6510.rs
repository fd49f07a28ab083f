// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use core::fmt;
use log::{log_enabled, trace, Level};

use crate::factory::{Addressable, Cpu, Register};
use crate::util::{IoPort, IrqLine, Pin, Shared};

use super::uops::{decode_opcode, load_program, MicroOp, MicroOpPair, ProgramId};

// Design:
//   Each instruction is decomposed into a program of micro operations, one
//   pair per cycle, selected from a 256 entry dispatch table. Interrupts are
//   sampled while fetching the next opcode and replace the opcode program
//   with the IRQ/NMI sequence. The 6510 port registers at 0x0000/0x0001
//   control PLA configuration so they are handled here as well.

pub enum Flag {
    Carry = 1,
    Zero = 1 << 1,
    IntDisable = 1 << 2,
    Decimal = 1 << 3,
    Break = 1 << 4,
    Reserved = 1 << 5,
    Overflow = 1 << 6,
    Negative = 1 << 7,
}

pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub p: u8,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0,
            pc: 0,
            p: 0,
        }
    }

    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0;
        self.pc = 0;
        self.p = 0;
    }
}

pub struct Cpu6510 {
    // Dependencies
    mem: Shared<dyn Addressable>,
    // Runtime State
    regs: Registers,
    opcode: u8,
    uops: &'static [MicroOpPair],
    cycle: u8,
    address_lo: u8,
    address_hi: u8,
    data: u8,
    page_cross: bool,
    jammed: bool,
    // I/O
    ba_line: Shared<Pin>,
    io_port: Shared<IoPort>,
    irq_line: Shared<IrqLine>,
    nmi_line: Shared<IrqLine>,
}

impl Cpu6510 {
    pub fn new(
        mem: Shared<dyn Addressable>,
        io_port: Shared<IoPort>,
        ba_line: Shared<Pin>,
        irq_line: Shared<IrqLine>,
        nmi_line: Shared<IrqLine>,
    ) -> Self {
        Self {
            mem,
            regs: Registers::new(),
            opcode: 0,
            uops: load_program(ProgramId::Start),
            cycle: 0,
            address_lo: 0,
            address_hi: 0,
            data: 0,
            page_cross: false,
            jammed: false,
            ba_line,
            io_port,
            irq_line,
            nmi_line,
        }
    }

    fn execute(&mut self, op: MicroOp) {
        if log_enabled!(Level::Trace) {
            trace!(target: "cpu::uop", "0x{:04x}: {:02x} #{} {:<18}; {}", self.regs.pc, self.opcode, self.cycle, format!("{:?}", op), &self);
        }
        match op {
            MicroOp::FetchOpcode => self.load_next_program(),
            MicroOp::FetchOpcodeDiscard => self.fetch_opcode_discard(),
            MicroOp::FetchOperand => self.fetch_operand(),
            MicroOp::FetchAdl => self.fetch_adl(),
            MicroOp::FetchAdh => self.fetch_adh(),
            MicroOp::IncrementAdlX => self.increment_adl_x(),
            MicroOp::IncrementAdlY => self.increment_adl_y(),
            MicroOp::IndirectFetchAdl => self.indirect_fetch_adl(),
            MicroOp::IndirectFetchAdh => self.indirect_fetch_adh(),
            MicroOp::ReadData => self.read_data(),
            MicroOp::ReadDataOrFixAdh => self.read_data_or_fix_adh(),
            MicroOp::ReadDataFixAdh => self.read_data_fix_adh(),
            MicroOp::WriteData => self.write_data(),
            MicroOp::OpLDA => self.lda(),
            MicroOp::OpLDX => self.ldx(),
            MicroOp::OpLDY => self.ldy(),
            MicroOp::OpSTA => self.sta(),
            MicroOp::OpSTX => self.stx(),
            MicroOp::OpSTY => self.sty(),
            MicroOp::OpTAX => self.tax(),
            MicroOp::OpTXA => self.txa(),
            MicroOp::OpTAY => self.tay(),
            MicroOp::OpTYA => self.tya(),
            MicroOp::OpTSX => self.tsx(),
            MicroOp::OpTXS => self.txs(),
            MicroOp::OpPLA => self.pla(),
            MicroOp::OpPLP => self.plp(),
            MicroOp::OpPHA => self.pha(),
            MicroOp::OpPHP => self.php(),
            MicroOp::OpAND => self.and(),
            MicroOp::OpEOR => self.eor(),
            MicroOp::OpORA => self.ora(),
            MicroOp::OpADC => self.adc(),
            MicroOp::OpSBC => self.sbc(),
            MicroOp::OpBIT => self.bit(),
            MicroOp::OpCMP => self.cmp(),
            MicroOp::OpCPX => self.cpx(),
            MicroOp::OpCPY => self.cpy(),
            MicroOp::OpDEC => self.dec(),
            MicroOp::OpDEX => self.dex(),
            MicroOp::OpDEY => self.dey(),
            MicroOp::OpINC => self.inc(),
            MicroOp::OpINX => self.inx(),
            MicroOp::OpINY => self.iny(),
            MicroOp::OpASL => self.asl(),
            MicroOp::OpASLImplied => self.asl_implied(),
            MicroOp::OpLSR => self.lsr(),
            MicroOp::OpLSRImplied => self.lsr_implied(),
            MicroOp::OpROL => self.rol(),
            MicroOp::OpROLImplied => self.rol_implied(),
            MicroOp::OpROR => self.ror(),
            MicroOp::OpRORImplied => self.ror_implied(),
            MicroOp::OpJMP => self.jmp(),
            MicroOp::OpJSR => self.jsr(),
            MicroOp::OpRTS => self.rts(),
            MicroOp::OpBRK => self.brk(),
            MicroOp::OpRTI => self.rti(),
            MicroOp::OpBCC => self.branch(Flag::Carry, false),
            MicroOp::OpBCS => self.branch(Flag::Carry, true),
            MicroOp::OpBEQ => self.branch(Flag::Zero, true),
            MicroOp::OpBNE => self.branch(Flag::Zero, false),
            MicroOp::OpBMI => self.branch(Flag::Negative, true),
            MicroOp::OpBPL => self.branch(Flag::Negative, false),
            MicroOp::OpBVC => self.branch(Flag::Overflow, false),
            MicroOp::OpBVS => self.branch(Flag::Overflow, true),
            MicroOp::OpCLC => self.clear_flag(Flag::Carry),
            MicroOp::OpCLD => self.clear_flag(Flag::Decimal),
            MicroOp::OpCLI => self.clear_flag(Flag::IntDisable),
            MicroOp::OpCLV => self.clear_flag(Flag::Overflow),
            MicroOp::OpSEC => self.set_flag(Flag::Carry),
            MicroOp::OpSED => self.set_flag(Flag::Decimal),
            MicroOp::OpSEI => self.set_flag(Flag::IntDisable),
            MicroOp::OpNOP => self.nop(),
            MicroOp::OpSLO => self.slo(),
            MicroOp::OpRLA => self.rla(),
            MicroOp::OpSRE => self.sre(),
            MicroOp::OpRRA => self.rra(),
            MicroOp::OpSAX => self.sax(),
            MicroOp::OpLAX => self.lax(),
            MicroOp::OpDCP => self.dcp(),
            MicroOp::OpISC => self.isc(),
            MicroOp::OpANC => self.anc(),
            MicroOp::OpALR => self.alr(),
            MicroOp::OpARR => self.arr(),
            MicroOp::OpANE => self.ane(),
            MicroOp::OpANX => self.anx(),
            MicroOp::OpAXS => self.axs(),
            MicroOp::OpLAS => self.las(),
            MicroOp::OpSHA => self.sha(),
            MicroOp::OpSHX => self.shx(),
            MicroOp::OpSHY => self.shy(),
            MicroOp::OpTAS => self.tas(),
            MicroOp::OpHLT => self.hlt(),
            MicroOp::OpIRQ => self.irq(),
            MicroOp::OpNMI => self.nmi(),
            MicroOp::OpRST => self.rst(),
        }
    }

    fn load_next_program(&mut self) {
        if self.nmi_line.borrow().is_low() {
            if log_enabled!(Level::Trace) {
                trace!(target: "cpu::int", "NMI");
            }
            self.uops = load_program(ProgramId::Nmi);
        } else if self.irq_line.borrow().is_low() && !self.test_flag(Flag::IntDisable) {
            if log_enabled!(Level::Trace) {
                trace!(target: "cpu::int", "IRQ");
            }
            self.uops = load_program(ProgramId::Irq);
        } else {
            self.fetch_opcode();
        }
        self.cycle = 0;
    }

    fn fetch_opcode(&mut self) {
        self.opcode = self.read_mem(self.regs.pc);
        self.uops = decode_opcode(self.opcode);
        if log_enabled!(Level::Trace) {
            trace!(target: "cpu::ins", "0x{:04x}: {:02x}; {}", self.regs.pc, self.opcode, &self);
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fetch_opcode_discard(&mut self) {
        let _ = self.read_mem(self.regs.pc);
    }

    fn fetch_operand(&mut self) {
        self.data = self.read_mem(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fetch_adl(&mut self) {
        self.address_hi = 0;
        self.address_lo = self.read_mem(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fetch_adh(&mut self) {
        self.address_hi = self.read_mem(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn increment_adl_x(&mut self) {
        self.page_cross = self.address_lo.checked_add(self.regs.x).is_none();
        self.address_lo = self.address_lo.wrapping_add(self.regs.x);
    }

    fn increment_adl_y(&mut self) {
        self.page_cross = self.address_lo.checked_add(self.regs.y).is_none();
        self.address_lo = self.address_lo.wrapping_add(self.regs.y);
    }

    fn indirect_fetch_adl(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        let adl = self.read_mem(address);
        self.data = adl;
        self.address_lo = self.address_lo.wrapping_add(1);
    }

    fn indirect_fetch_adh(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        self.address_lo = self.data;
        self.address_hi = self.read_mem(address);
    }

    fn read_data_or_fix_adh(&mut self) {
        if self.page_cross {
            self.address_hi = self.address_hi.wrapping_add(1);
        } else {
            let address = make_address(self.address_hi, self.address_lo);
            self.data = self.read_mem(address);
            self.cycle += 1;
        }
    }

    fn read_data_fix_adh(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        let _ = self.read_mem(address);
        if self.page_cross {
            self.address_hi = self.address_hi.wrapping_add(1);
        }
    }

    fn read_data(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        self.data = self.read_mem(address);
    }

    fn write_data(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        self.write_mem(address, self.data);
    }

    fn lda(&mut self) {
        let data = self.data;
        self.regs.a = data;
        self.set_nz(data);
    }

    fn ldx(&mut self) {
        let data = self.data;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn ldy(&mut self) {
        let data = self.data;
        self.regs.y = data;
        self.set_nz(data);
    }

    fn sta(&mut self) {
        self.data = self.regs.a;
    }

    fn stx(&mut self) {
        self.data = self.regs.x;
    }

    fn sty(&mut self) {
        self.data = self.regs.y;
    }

    fn tax(&mut self) {
        let data = self.regs.a;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn txa(&mut self) {
        let data = self.regs.x;
        self.regs.a = data;
        self.set_nz(data);
    }

    fn tay(&mut self) {
        let data = self.regs.a;
        self.regs.y = data;
        self.set_nz(data);
    }

    fn tya(&mut self) {
        let data = self.regs.y;
        self.regs.a = data;
        self.set_nz(data);
    }

    fn tsx(&mut self) {
        let data = self.regs.sp;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn txs(&mut self) {
        // NOTE do not set nz
        self.regs.sp = self.regs.x;
    }

    fn pla(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                let data = self.read_mem(address);
                self.regs.a = data;
                self.set_nz(data);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn plp(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                self.regs.p = self.read_mem(address);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn pha(&mut self) {
        self.write_stack(self.regs.a);
    }

    fn php(&mut self) {
        // NOTE undocumented behavior
        self.write_stack(self.regs.p | (Flag::Break as u8) | (Flag::Reserved as u8));
    }

    fn and(&mut self) {
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn eor(&mut self) {
        let result = self.regs.a ^ self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn ora(&mut self) {
        let result = self.regs.a | self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn adc_value(&mut self, value: u8) {
        let ac = u16::from(self.regs.a);
        let value = u16::from(value);
        let carry = if self.test_flag(Flag::Carry) { 1 } else { 0 };
        let temp = if !self.test_flag(Flag::Decimal) {
            ac.wrapping_add(value).wrapping_add(carry)
        } else {
            let mut t = (ac & 0x0f) + (value & 0x0f) + carry;
            if t > 0x09 {
                t += 0x06;
            }
            t += (ac & 0xf0) + (value & 0xf0);
            if t & 0x01f0 > 0x90 {
                t += 0x60;
            }
            t
        };
        self.update_flag(
            Flag::Overflow,
            (ac ^ value) & 0x80 == 0 && (ac ^ temp) & 0x80 == 0x80,
        );
        self.update_flag(Flag::Carry, temp > 0xff);
        let result = (temp & 0xff) as u8;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn adc(&mut self) {
        let value = self.data;
        self.adc_value(value);
    }

    fn sbc_value(&mut self, value: u8) {
        let ac = u16::from(self.regs.a);
        let value = u16::from(value);
        let carry = if self.test_flag(Flag::Carry) { 0 } else { 1 };
        let temp = if !self.test_flag(Flag::Decimal) {
            ac.wrapping_sub(value).wrapping_sub(carry)
        } else {
            let mut t = (ac & 0x0f).wrapping_sub(value & 0x0f).wrapping_sub(carry);
            if t & 0x10 != 0 {
                t = (t.wrapping_sub(0x06) & 0x0f)
                    | ((ac & 0xf0).wrapping_sub(value & 0xf0).wrapping_sub(0x10));
            } else {
                t = (t & 0x0f) | ((ac & 0xf0).wrapping_sub(value & 0xf0));
            }
            if t & 0x0100 != 0 {
                t -= 0x60;
            }
            t
        };
        self.update_flag(
            Flag::Overflow,
            (ac ^ temp) & 0x80 != 0 && (ac ^ value) & 0x80 == 0x80,
        );
        self.update_flag(Flag::Carry, temp < 0x100);
        let result = (temp & 0xff) as u8;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn sbc(&mut self) {
        let value = self.data;
        self.sbc_value(value);
    }

    fn bit(&mut self) {
        let data = self.data;
        let a = self.regs.a;
        self.update_flag(Flag::Negative, data & 0x80 != 0);
        self.update_flag(Flag::Overflow, 0x40 & data != 0);
        self.update_flag(Flag::Zero, data & a == 0);
    }

    fn cmp_value(&mut self, register: u8, value: u8) {
        let result = u16::from(register).wrapping_sub(u16::from(value));
        self.update_flag(Flag::Carry, result < 0x100);
        self.set_nz((result & 0xff) as u8);
    }

    fn cmp(&mut self) {
        let value = self.data;
        self.cmp_value(self.regs.a, value);
    }

    fn cpx(&mut self) {
        let value = self.data;
        self.cmp_value(self.regs.x, value);
    }

    fn cpy(&mut self) {
        let value = self.data;
        self.cmp_value(self.regs.y, value);
    }

    fn dec(&mut self) {
        let result = self.data.wrapping_sub(1);
        self.data = result;
        self.set_nz(result);
    }

    fn dex(&mut self) {
        let result = self.regs.x.wrapping_sub(1);
        self.regs.x = result;
        self.set_nz(result);
    }

    fn dey(&mut self) {
        let result = self.regs.y.wrapping_sub(1);
        self.regs.y = result;
        self.set_nz(result);
    }

    fn inc(&mut self) {
        let result = self.data.wrapping_add(1);
        self.data = result;
        self.set_nz(result);
    }

    fn inx(&mut self) {
        let result = self.regs.x.wrapping_add(1);
        self.regs.x = result;
        self.set_nz(result);
    }

    fn iny(&mut self) {
        let result = self.regs.y.wrapping_add(1);
        self.regs.y = result;
        self.set_nz(result);
    }

    fn asl(&mut self) {
        let data = self.data;
        self.update_flag(Flag::Carry, data & 0x80 != 0);
        let result = data << 1;
        self.data = result;
        self.set_nz(result);
    }

    fn asl_implied(&mut self) {
        let data = self.regs.a;
        self.update_flag(Flag::Carry, data & 0x80 != 0);
        let result = data << 1;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn lsr(&mut self) {
        let data = self.data;
        self.update_flag(Flag::Carry, data & 0x01 != 0);
        let result = data >> 1;
        self.data = result;
        self.set_nz(result);
    }

    fn lsr_implied(&mut self) {
        let data = self.regs.a;
        self.update_flag(Flag::Carry, data & 0x01 != 0);
        let result = data >> 1;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn rol_value(&mut self, value: u8) -> u8 {
        let mut temp = u16::from(value) << 1;
        if self.test_flag(Flag::Carry) {
            temp |= 0x01
        };
        self.update_flag(Flag::Carry, temp > 0xff);
        let result = (temp & 0xff) as u8;
        self.set_nz(result);
        result
    }

    fn rol(&mut self) {
        let value = self.data;
        self.data = self.rol_value(value);
    }

    fn rol_implied(&mut self) {
        let value = self.regs.a;
        self.regs.a = self.rol_value(value);
    }

    fn ror_value(&mut self, value: u8) -> u8 {
        let mut temp = if self.test_flag(Flag::Carry) {
            u16::from(value) | 0x100
        } else {
            u16::from(value)
        };
        self.update_flag(Flag::Carry, temp & 0x01 != 0);
        temp >>= 1;
        let result = (temp & 0xff) as u8;
        self.set_nz(result);
        result
    }

    fn ror(&mut self) {
        let value = self.data;
        self.data = self.ror_value(value);
    }

    fn ror_implied(&mut self) {
        let value = self.regs.a;
        self.regs.a = self.ror_value(value);
    }

    fn jmp(&mut self) {
        self.regs.pc = make_address(self.address_hi, self.address_lo);
    }

    fn jsr(&mut self) {
        match self.cycle {
            2 => {
                // SP -> Address Bus
            }
            3 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            5 => {
                self.address_hi = self.read_mem(self.regs.pc);
                // Do not increment pc
            }
            6 => {
                self.regs.pc = make_address(self.address_hi, self.address_lo);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn rts(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                let pcl = self.read_mem(address);
                self.regs.pc = u16::from(pcl);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            4 => {
                let address = make_address(0x01, self.regs.sp);
                let pch = self.read_mem(address);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
            }
            5 => {
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn brk(&mut self) {
        match self.cycle {
            2 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            3 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(self.regs.p | (Flag::Break as u8) | (Flag::Reserved as u8));
            }
            5 => {
                let pcl = self.read_mem(0xfffe);
                self.regs.pc = u16::from(pcl);
            }
            6 => {
                let pch = self.read_mem(0xffff);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
                self.set_flag(Flag::IntDisable);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn rti(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                self.regs.p = self.read_mem(address);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            4 => {
                let address = make_address(0x01, self.regs.sp);
                let pcl = self.read_mem(address);
                self.regs.pc = u16::from(pcl);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            5 => {
                let address = make_address(0x01, self.regs.sp);
                let pch = self.read_mem(address);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn branch(&mut self, flag: Flag, value: bool) {
        match self.cycle {
            2 => {
                let cond = self.test_flag(flag) == value;
                if cond {
                    let offset = self.data as i8;
                    self.regs.pc = if offset < 0 {
                        self.regs.pc.wrapping_sub(u16::from(offset.unsigned_abs()))
                    } else {
                        self.regs.pc.wrapping_add(offset as u16)
                    };
                } else {
                    self.load_next_program();
                }
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn nop(&mut self) {}

    // -- Undocumented

    fn slo(&mut self) {
        let data = self.data;
        self.update_flag(Flag::Carry, data & 0x80 != 0);
        let result = data << 1;
        self.data = result;
        self.regs.a |= result;
        let a = self.regs.a;
        self.set_nz(a);
    }

    fn rla(&mut self) {
        let value = self.data;
        let result = self.rol_value(value);
        self.data = result;
        self.regs.a &= result;
        let a = self.regs.a;
        self.set_nz(a);
    }

    fn sre(&mut self) {
        let data = self.data;
        self.update_flag(Flag::Carry, data & 0x01 != 0);
        let result = data >> 1;
        self.data = result;
        self.regs.a ^= result;
        let a = self.regs.a;
        self.set_nz(a);
    }

    fn rra(&mut self) {
        let value = self.data;
        let result = self.ror_value(value);
        self.data = result;
        self.adc_value(result);
    }

    fn sax(&mut self) {
        self.data = self.regs.a & self.regs.x;
    }

    fn lax(&mut self) {
        let data = self.data;
        self.regs.a = data;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn dcp(&mut self) {
        let result = self.data.wrapping_sub(1);
        self.data = result;
        self.cmp_value(self.regs.a, result);
    }

    fn isc(&mut self) {
        let result = self.data.wrapping_add(1);
        self.data = result;
        self.sbc_value(result);
    }

    fn anc(&mut self) {
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.set_nz(result);
        self.update_flag(Flag::Carry, result & 0x80 != 0);
    }

    fn alr(&mut self) {
        let value = self.regs.a & self.data;
        self.update_flag(Flag::Carry, value & 0x01 != 0);
        let result = value >> 1;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn arr(&mut self) {
        let value = self.regs.a & self.data;
        let mut result = value >> 1;
        if self.test_flag(Flag::Carry) {
            result |= 0x80;
        }
        self.set_nz(result);
        if !self.test_flag(Flag::Decimal) {
            self.update_flag(Flag::Carry, result & 0x40 != 0);
            self.update_flag(
                Flag::Overflow,
                ((result & 0x40) ^ ((result & 0x20) << 1)) != 0,
            );
        } else {
            self.update_flag(Flag::Overflow, (result ^ value) & 0x40 != 0);
            if value & 0x0f >= 0x05 {
                result = (result & 0xf0) | (result.wrapping_add(0x06) & 0x0f);
            }
            let high_fixup = value & 0xf0 >= 0x50;
            self.update_flag(Flag::Carry, high_fixup);
            if high_fixup {
                result = result.wrapping_add(0x60);
            }
        }
        self.regs.a = result;
    }

    fn ane(&mut self) {
        let result = self.regs.a & self.regs.x & self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn anx(&mut self) {
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.regs.x = result;
        self.set_nz(result);
    }

    fn axs(&mut self) {
        let result = u16::from(self.regs.a & self.regs.x).wrapping_sub(u16::from(self.data));
        self.update_flag(Flag::Carry, result < 0x100);
        self.regs.x = (result & 0xff) as u8;
        self.set_nz((result & 0xff) as u8);
    }

    fn las(&mut self) {
        let result = self.data & self.regs.sp;
        self.regs.a = result;
        self.regs.x = result;
        self.regs.sp = result;
        self.set_nz(result);
    }

    fn sha(&mut self) {
        self.data = self.regs.a & self.regs.x & self.address_hi.wrapping_add(1);
    }

    fn shx(&mut self) {
        self.data = self.regs.x & self.address_hi.wrapping_add(1);
    }

    fn shy(&mut self) {
        self.data = self.regs.y & self.address_hi.wrapping_add(1);
    }

    fn tas(&mut self) {
        self.regs.sp = self.regs.a & self.regs.x;
        self.data = self.regs.sp & self.address_hi.wrapping_add(1);
    }

    fn hlt(&mut self) {
        self.jammed = true;
    }

    // -- Interrupts

    fn irq(&mut self) {
        match self.cycle {
            2 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            3 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(self.regs.p & 0xef);
            }
            5 => {
                let pcl = self.read_mem(0xfffe);
                self.regs.pc = u16::from(pcl);
            }
            6 => {
                let pch = self.read_mem(0xffff);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
                self.set_flag(Flag::IntDisable);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn nmi(&mut self) {
        match self.cycle {
            2 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            3 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(self.regs.p & 0xef);
            }
            5 => {
                let pcl = self.read_mem(0xfffa);
                self.regs.pc = u16::from(pcl);
            }
            6 => {
                let pch = self.read_mem(0xfffb);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
                self.set_flag(Flag::IntDisable);
                self.nmi_line.borrow_mut().reset();
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn rst(&mut self) {
        match self.cycle {
            2 => {}
            3 => {}
            4 => {
                let pcl = self.read_mem(0xfffc);
                self.regs.pc = u16::from(pcl);
            }
            5 => {
                let pch = self.read_mem(0xfffd);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    // -- Flag Ops

    #[inline]
    fn clear_flag(&mut self, flag: Flag) {
        self.regs.p &= !(flag as u8);
    }

    #[inline]
    fn set_flag(&mut self, flag: Flag) {
        self.regs.p |= flag as u8;
    }

    #[inline]
    fn set_nz(&mut self, value: u8) {
        self.update_flag(Flag::Negative, value & 0x80 != 0);
        self.update_flag(Flag::Zero, value == 0);
    }

    #[inline]
    fn update_flag(&mut self, flag: Flag, value: bool) {
        if value {
            self.regs.p |= flag as u8;
        } else {
            self.regs.p &= !(flag as u8);
        }
    }

    #[inline]
    fn test_flag(&self, flag: Flag) -> bool {
        self.regs.p & (flag as u8) != 0
    }

    /// True when this cycle performs a memory write; the CPU keeps running
    /// through write cycles while BA is low.
    fn is_write_cycle(&self) -> bool {
        let pair = self.uops[self.cycle as usize];
        let ops = [Some(pair.0), pair.1];
        for op in ops.iter().flatten() {
            let write = match op {
                MicroOp::WriteData | MicroOp::OpPHA | MicroOp::OpPHP => true,
                MicroOp::OpJSR => self.cycle == 3 || self.cycle == 4,
                MicroOp::OpBRK | MicroOp::OpIRQ | MicroOp::OpNMI => {
                    self.cycle >= 2 && self.cycle <= 4
                }
                _ => false,
            };
            if write {
                return true;
            }
        }
        false
    }

    // -- Memory Ops

    pub fn read_mem(&self, address: u16) -> u8 {
        match address {
            0x0000 => self.io_port.borrow().get_direction(),
            0x0001 => self.io_port.borrow().get_value() & 0x3f,
            _ => self.mem.borrow().read(address),
        }
    }

    pub fn write_mem(&mut self, address: u16, value: u8) {
        match address {
            0x0000 => self.io_port.borrow_mut().set_direction(value),
            0x0001 => self.io_port.borrow_mut().set_value(value),
            _ => {}
        }
        self.mem.borrow_mut().write(address, value);
    }

    #[inline]
    pub fn write_stack(&mut self, value: u8) {
        let address = make_address(0x01, self.regs.sp);
        self.write_mem(address, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }
}

impl Cpu for Cpu6510 {
    fn get_register(&self, reg: Register) -> u8 {
        match reg {
            Register::A => self.regs.a,
            Register::X => self.regs.x,
            Register::Y => self.regs.y,
            Register::SP => self.regs.sp,
            Register::PCL => self.regs.pc as u8,
            Register::PCH => (self.regs.pc >> 8) as u8,
            Register::P => self.regs.p,
        }
    }

    fn set_register(&mut self, reg: Register, value: u8) {
        match reg {
            Register::A => self.regs.a = value,
            Register::X => self.regs.x = value,
            Register::Y => self.regs.y = value,
            Register::SP => self.regs.sp = value,
            Register::PCL => self.regs.pc = (self.regs.pc & 0xff00) | u16::from(value),
            Register::PCH => self.regs.pc = (u16::from(value) << 8) | (self.regs.pc & 0xff),
            Register::P => self.regs.p = value,
        }
    }

    fn get_pc(&self) -> u16 {
        match self.cycle {
            1 => self.regs.pc.wrapping_sub(1),
            _ => self.regs.pc,
        }
    }

    fn set_pc(&mut self, value: u16) {
        self.regs.pc = value;
        self.uops = load_program(ProgramId::Start);
        self.cycle = 0;
    }

    fn is_cpu_jam(&self) -> bool {
        self.jammed
    }

    fn clock(&mut self) {
        if self.jammed {
            return;
        }
        if self.ba_line.borrow().is_low() && !self.is_write_cycle() {
            return;
        }
        let pair = self.uops[self.cycle as usize];
        self.execute(pair.0);
        if let Some(op1) = pair.1 {
            self.execute(op1);
        }
        self.cycle += 1;
    }

    fn reset(&mut self) {
        self.regs.reset();
        self.address_hi = 0;
        self.address_lo = 0;
        self.data = 0;
        self.page_cross = false;
        self.jammed = false;
        self.io_port.borrow_mut().set_value(0xff);
        self.irq_line.borrow_mut().reset();
        self.nmi_line.borrow_mut().reset();
        self.write(0x0000, 0b_0010_1111);
        self.write(0x0001, 0b_0001_1111);
        self.opcode = 0;
        self.uops = load_program(ProgramId::Reset);
        self.cycle = 0;
    }

    // -- I/O

    fn read(&self, address: u16) -> u8 {
        self.read_mem(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.write_mem(address, value);
    }
}

impl fmt::Display for Cpu6510 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:02x} {:02x} {}{}{}{}{}{}",
            self.regs.a,
            self.regs.x,
            self.regs.y,
            self.regs.sp,
            if self.regs.p & Flag::Negative as u8 != 0 {
                "N"
            } else {
                "n"
            },
            if self.regs.p & Flag::Overflow as u8 != 0 {
                "V"
            } else {
                "v"
            },
            if self.regs.p & Flag::Decimal as u8 != 0 {
                "D"
            } else {
                "d"
            },
            if self.regs.p & Flag::IntDisable as u8 != 0 {
                "I"
            } else {
                "i"
            },
            if self.regs.p & Flag::Zero as u8 != 0 {
                "Z"
            } else {
                "z"
            },
            if self.regs.p & Flag::Carry as u8 != 0 {
                "C"
            } else {
                "c"
            }
        )
    }
}

#[inline]
fn make_address(hi: u8, lo: u8) -> u16 {
    u16::from(hi) << 8 | u16::from(lo)
}

#[inline]
fn lo_byte(data: u16) -> u8 {
    data as u8
}

#[inline]
fn hi_byte(data: u16) -> u8 {
    (data >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{new_shared, Ram};

    struct MockMemory {
        ram: Ram,
    }

    impl Addressable for MockMemory {
        fn read(&self, address: u16) -> u8 {
            self.ram.read(address)
        }

        fn write(&mut self, address: u16, value: u8) {
            self.ram.write(address, value);
        }
    }

    fn setup_cpu() -> Cpu6510 {
        let ba_line = new_shared(Pin::new_high());
        let cpu_io_port = new_shared(IoPort::new(0x00, 0xff));
        let cpu_irq = new_shared(IrqLine::new("irq"));
        let cpu_nmi = new_shared(IrqLine::new("nmi"));
        let mut ram = Ram::new(0x10000);
        ram.fill(0x00);
        let mem = new_shared(MockMemory { ram });
        Cpu6510::new(mem, cpu_io_port, ba_line, cpu_irq, cpu_nmi)
    }

    fn load(cpu: &mut Cpu6510, code: &[u8], offset: u16) {
        let mut address = offset;
        for byte in code {
            cpu.write_mem(address, *byte);
            address = address.wrapping_add(1);
        }
        cpu.set_pc(offset);
        // Fetch the first opcode; later fetches overlap the previous
        // instruction's last cycle.
        cpu.clock();
    }

    /// Run until the current instruction has completed, returning the number
    /// of cycles it took.
    fn step(cpu: &mut Cpu6510) -> u32 {
        let mut cycles = 0;
        loop {
            cpu.clock();
            cycles += 1;
            if cpu.cycle == 1 || cpu.jammed {
                break;
            }
        }
        cycles
    }

    #[test]
    fn adc_80_16() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x69, 16], 0x1000);
        cpu.regs.a = 80;
        step(&mut cpu);
        assert_eq!(96, cpu.regs.a);
        assert!(!cpu.test_flag(Flag::Carry));
        assert!(!cpu.test_flag(Flag::Negative));
        assert!(!cpu.test_flag(Flag::Overflow));
    }

    #[test]
    fn adc_decimal_mode() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0xf8, 0x69, 0x19], 0x1000);
        cpu.regs.a = 0x28;
        step(&mut cpu);
        step(&mut cpu);
        assert_eq!(0x47, cpu.regs.a);
    }

    #[test]
    fn lda_immediate_takes_two_cycles() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0xa9, 0x42], 0x1000);
        let cycles = step(&mut cpu);
        assert_eq!(2, cycles);
        assert_eq!(0x42, cpu.regs.a);
    }

    #[test]
    fn lda_absolute_x_page_cross_takes_five_cycles() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x1102, 0x77);
        load(&mut cpu, &[0xbd, 0xff, 0x10], 0x1000);
        cpu.regs.x = 0x03;
        let cycles = step(&mut cpu);
        assert_eq!(5, cycles);
        assert_eq!(0x77, cpu.regs.a);
    }

    #[test]
    fn sta_absolute_x_always_five_cycles() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x9d, 0x00, 0x20], 0x1000);
        cpu.regs.a = 0x55;
        cpu.regs.x = 0x10;
        let cycles = step(&mut cpu);
        assert_eq!(5, cycles);
        assert_eq!(0x55, cpu.read_mem(0x2010));
    }

    #[test]
    fn inc_absolute_is_six_cycles() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x2000, 0x10);
        load(&mut cpu, &[0xee, 0x00, 0x20], 0x1000);
        let cycles = step(&mut cpu);
        assert_eq!(6, cycles);
        assert_eq!(0x11, cpu.read_mem(0x2000));
    }

    #[test]
    fn jsr_rts_roundtrip() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x20, 0x00, 0x20], 0x1000);
        cpu.write_mem(0x2000, 0x60); // RTS
        let jsr_cycles = step(&mut cpu);
        assert_eq!(6, jsr_cycles);
        assert_eq!(0x2000, cpu.get_pc());
        let rts_cycles = step(&mut cpu);
        assert_eq!(6, rts_cycles);
        assert_eq!(0x1003, cpu.get_pc());
    }

    #[test]
    fn branch_not_taken_two_cycles() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0xd0, 0x10], 0x1000); // BNE
        cpu.set_flag(Flag::Zero);
        let cycles = step(&mut cpu);
        assert_eq!(2, cycles);
        assert_eq!(0x1002, cpu.get_pc());
    }

    #[test]
    fn branch_taken_three_cycles() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0xd0, 0x10], 0x1000); // BNE
        cpu.clear_flag(Flag::Zero);
        let cycles = step(&mut cpu);
        assert_eq!(3, cycles);
        assert_eq!(0x1012, cpu.get_pc());
    }

    #[test]
    fn slo_shifts_and_ors() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x0040, 0x81);
        load(&mut cpu, &[0x07, 0x40], 0x1000); // SLO $40
        cpu.regs.a = 0x01;
        step(&mut cpu);
        assert_eq!(0x02, cpu.read_mem(0x0040));
        assert_eq!(0x03, cpu.regs.a);
        assert!(cpu.test_flag(Flag::Carry));
    }

    #[test]
    fn sre_shifts_and_eors() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x0040, 0x03);
        load(&mut cpu, &[0x47, 0x40], 0x1000); // SRE $40
        cpu.regs.a = 0x01;
        step(&mut cpu);
        assert_eq!(0x01, cpu.read_mem(0x0040));
        assert_eq!(0x00, cpu.regs.a);
        assert!(cpu.test_flag(Flag::Carry));
        assert!(cpu.test_flag(Flag::Zero));
    }

    #[test]
    fn dcp_decrements_and_compares() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x0040, 0x11);
        load(&mut cpu, &[0xc7, 0x40], 0x1000); // DCP $40
        cpu.regs.a = 0x10;
        step(&mut cpu);
        assert_eq!(0x10, cpu.read_mem(0x0040));
        assert!(cpu.test_flag(Flag::Zero));
        assert!(cpu.test_flag(Flag::Carry));
    }

    #[test]
    fn isc_increments_and_subtracts() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x0040, 0x0f);
        load(&mut cpu, &[0xe7, 0x40], 0x1000); // ISC $40
        cpu.regs.a = 0x20;
        cpu.set_flag(Flag::Carry);
        step(&mut cpu);
        assert_eq!(0x10, cpu.read_mem(0x0040));
        assert_eq!(0x10, cpu.regs.a);
    }

    #[test]
    fn lax_loads_both_registers() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x0040, 0x5f);
        load(&mut cpu, &[0xa7, 0x40], 0x1000); // LAX $40
        step(&mut cpu);
        assert_eq!(0x5f, cpu.regs.a);
        assert_eq!(0x5f, cpu.regs.x);
    }

    #[test]
    fn sax_stores_a_and_x() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x87, 0x40], 0x1000); // SAX $40
        cpu.regs.a = 0xf0;
        cpu.regs.x = 0x3c;
        step(&mut cpu);
        assert_eq!(0x30, cpu.read_mem(0x0040));
    }

    #[test]
    fn anc_copies_bit7_to_carry() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x0b, 0xff], 0x1000);
        cpu.regs.a = 0x80;
        step(&mut cpu);
        assert_eq!(0x80, cpu.regs.a);
        assert!(cpu.test_flag(Flag::Carry));
        assert!(cpu.test_flag(Flag::Negative));
    }

    #[test]
    fn arr_rotates_and_sets_flags() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x6b, 0xff], 0x1000);
        cpu.regs.a = 0xc0;
        cpu.set_flag(Flag::Carry);
        step(&mut cpu);
        assert_eq!(0xe0, cpu.regs.a);
        assert!(cpu.test_flag(Flag::Carry));
    }

    #[test]
    fn las_mixes_stack_pointer() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0x2000, 0x0f);
        load(&mut cpu, &[0xbb, 0x00, 0x20], 0x1000); // LAS $2000,Y
        cpu.regs.sp = 0xf3;
        cpu.regs.y = 0;
        step(&mut cpu);
        assert_eq!(0x03, cpu.regs.a);
        assert_eq!(0x03, cpu.regs.x);
        assert_eq!(0x03, cpu.regs.sp);
    }

    #[test]
    fn hlt_jams_the_cpu() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0x02], 0x1000);
        step(&mut cpu);
        assert!(cpu.is_cpu_jam());
        let pc = cpu.get_pc();
        for _ in 0..10 {
            cpu.clock();
        }
        assert_eq!(pc, cpu.get_pc());
    }

    #[test]
    fn irq_vectors_after_seven_cycles() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0xfffe, 0x00);
        cpu.write_mem(0xffff, 0x30);
        load(&mut cpu, &[0xea, 0xea], 0x1000); // NOP NOP
        step(&mut cpu);
        cpu.irq_line.borrow_mut().set_low(0, true);
        // The pending instruction finishes, then the 7-cycle sequence runs.
        let mut cycles = 0;
        while cpu.get_pc() != 0x3000 && cycles < 20 {
            cpu.clock();
            cycles += 1;
        }
        assert_eq!(0x3000, cpu.get_pc());
        assert!(cpu.test_flag(Flag::IntDisable));
    }

    #[test]
    fn irq_masked_by_interrupt_disable() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0xfffe, 0x00);
        cpu.write_mem(0xffff, 0x30);
        load(&mut cpu, &[0x78, 0xea, 0xea], 0x1000); // SEI NOP NOP
        step(&mut cpu);
        cpu.irq_line.borrow_mut().set_low(0, true);
        step(&mut cpu);
        step(&mut cpu);
        assert_ne!(0x3000, cpu.get_pc());
    }

    #[test]
    fn nmi_takes_priority_over_irq() {
        let mut cpu = setup_cpu();
        cpu.write_mem(0xfffa, 0x00);
        cpu.write_mem(0xfffb, 0x40);
        cpu.write_mem(0xfffe, 0x00);
        cpu.write_mem(0xffff, 0x30);
        load(&mut cpu, &[0xea, 0xea], 0x1000);
        step(&mut cpu);
        cpu.irq_line.borrow_mut().set_low(0, true);
        cpu.nmi_line.borrow_mut().set_low(0, true);
        let mut cycles = 0;
        while cpu.get_pc() != 0x4000 && cycles < 20 {
            cpu.clock();
            cycles += 1;
        }
        assert_eq!(0x4000, cpu.get_pc());
    }

    #[test]
    fn rdy_stalls_reads_but_not_writes() {
        let mut cpu = setup_cpu();
        load(&mut cpu, &[0xa9, 0x11, 0x8d, 0x00, 0x20], 0x1000); // LDA #$11; STA $2000
        step(&mut cpu);
        // Pull BA low at the start of the store: its address fetches are
        // reads and stall.
        cpu.ba_line.borrow_mut().set_active(false);
        for _ in 0..10 {
            cpu.clock();
        }
        assert_eq!(0x00, cpu.read_mem(0x2000));
        cpu.ba_line.borrow_mut().set_active(true);
        for _ in 0..10 {
            cpu.clock();
        }
        assert_eq!(0x11, cpu.read_mem(0x2000));
    }
}
