// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use sidplay64_core::factory::Chip;
use sidplay64_core::sched::EventScheduler;
use sidplay64_core::sound::Sid;
use sidplay64_core::util::Shared;

/// Per-chip sample buffer size; the player drains it every mixing chunk.
pub const OUTPUT_BUFFER_SIZE: usize = 8192;

/// A SID chip on the system bus. The chip core is clocked lazily: register
/// accesses and the mixer sync it up to the machine clock, producing samples
/// into the chip's buffer as a side effect.
pub struct SidDevice {
    sid: Sid,
    scheduler: Shared<EventScheduler>,
    cycles: u64,
    buffer: Vec<i16>,
    pos: usize,
}

impl SidDevice {
    pub fn new(sid: Sid, scheduler: Shared<EventScheduler>) -> Self {
        let cycles = scheduler.borrow().cycles();
        SidDevice {
            sid,
            scheduler,
            cycles,
            buffer: vec![0; OUTPUT_BUFFER_SIZE],
            pos: 0,
        }
    }

    pub fn sid_mut(&mut self) -> &mut Sid {
        &mut self.sid
    }

    /// Bring the chip up to the current machine time.
    pub fn sync(&mut self) {
        let now = self.scheduler.borrow().cycles();
        if now > self.cycles {
            let delta = (now - self.cycles) as u32;
            let produced = self.sid.clock(delta, &mut self.buffer[self.pos..]);
            self.pos += produced;
            self.cycles = now;
        }
    }

    pub fn buffer(&self) -> &[i16] {
        &self.buffer
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Move the unconsumed tail of the buffer to the front.
    pub fn shift_front(&mut self, consumed: usize, remaining: usize) {
        self.buffer.copy_within(consumed..consumed + remaining, 0);
        self.pos = remaining;
    }
}

impl Chip for SidDevice {
    fn clock(&mut self) {
        self.sync();
    }

    fn clock_delta(&mut self, _delta: u32) {
        self.sync();
    }

    fn reset(&mut self) {
        self.sid.reset();
        self.cycles = self.scheduler.borrow().cycles();
        self.pos = 0;
    }

    fn read(&mut self, reg: u8) -> u8 {
        self.sync();
        self.sid.read(reg)
    }

    fn write(&mut self, reg: u8, value: u8) {
        self.sync();
        self.sid.write(reg, value);
    }
}
