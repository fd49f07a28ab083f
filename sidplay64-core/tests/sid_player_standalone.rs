// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use sidplay64_core::cpu::Cpu6510;
use sidplay64_core::factory::{Addressable, Cpu, SidModel};
use sidplay64_core::sound::{SamplingMethod, Sid};
use sidplay64_core::util::{new_shared, IoPort, IrqLine, Pin, Ram, Shared};

// SimpleMemory permanently maps the SID into the memory map.

struct SimpleMemory {
    ram: Shared<Ram>,
    sid: Shared<Sid>,
}

impl Addressable for SimpleMemory {
    fn read(&self, address: u16) -> u8 {
        match address {
            0xd400..=0xd7ff => self.sid.borrow_mut().read((address & 0x001f) as u8),
            _ => self.ram.borrow().read(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0xd400..=0xd7ff => self.sid.borrow_mut().write((address & 0x001f) as u8, value),
            _ => self.ram.borrow_mut().write(address, value),
        }
    }
}

// A tiny register player: volume on, gate a pulse voice, spin.

static CODE: [u8; 26] = [
    0xa9, 0x0f, 0x8d, 0x18, 0xd4, // LDA #$0F; STA $D418
    0xa9, 0x08, 0x8d, 0x06, 0xd4, // LDA #$08; STA $D406
    0xa9, 0x25, 0x8d, 0x01, 0xd4, // LDA #$25; STA $D401
    0xa9, 0x08, 0x8d, 0x03, 0xd4, // LDA #$08; STA $D403
    0xa9, 0x41, 0x8d, 0x04, 0xd4, // LDA #$41; STA $D404
    0x4c, // JMP self
];
static CODE_OFFSET: u16 = 0x1000;

#[test]
fn exec_sid_player() {
    let cpu_freq = 985_248u32;
    let ba_line = new_shared(Pin::new_high());
    let cpu_io_port = new_shared(IoPort::new(0x00, 0xff));
    let irq_line = new_shared(IrqLine::new("irq"));
    let nmi_line = new_shared(IrqLine::new("nmi"));

    // Setup chipset
    let mut sid_chip = Sid::new(SidModel::Mos6581);
    sid_chip.set_sampling_parameters(f64::from(cpu_freq), SamplingMethod::Decimate, 44_100.0);
    let sid = new_shared(sid_chip);
    let ram = new_shared(Ram::new(0x10000));
    let mem = new_shared(SimpleMemory {
        ram: ram.clone(),
        sid: sid.clone(),
    });
    let mut cpu = Cpu6510::new(mem, cpu_io_port, ba_line, irq_line, nmi_line);

    // Load program
    {
        let mut code = CODE.to_vec();
        let jmp_self = CODE_OFFSET + CODE.len() as u16 - 1;
        code.push(jmp_self as u8);
        code.push((jmp_self >> 8) as u8);
        ram.borrow_mut().load(&code, CODE_OFFSET);
    }
    cpu.set_pc(CODE_OFFSET);

    // Run it: interleave CPU cycles and SID sample production per frame.
    let cycles_per_frame = 19_656u32;
    let mut buffer = [0i16; 4096];
    let mut total_samples = 0usize;
    let mut cycles_total = 0u64;
    for _frame in 0..50 {
        for _ in 0..cycles_per_frame {
            cpu.clock();
        }
        total_samples += sid.borrow_mut().clock(cycles_per_frame, &mut buffer);
        cycles_total += u64::from(cycles_per_frame);
    }

    let expected = cycles_total * 44_100 / u64::from(cpu_freq);
    let difference = (total_samples as i64 - expected as i64).abs();
    assert!(difference < 50, "{} samples vs {} expected", total_samples, expected);
    assert!(buffer.iter().any(|&sample| sample != 0));
}
