// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::factory::{Addressable, Bank, Mmu};
use crate::util::{Ram, Rom, Shared};

use super::Mmio;

// Spec: COMMODORE 64 MEMORY MAPS p. 263
// Design:
//   Zones map to banks through the PLA; writes always land in RAM except in
//   the I/O window. ROM images are optional: a mapped-in but absent ROM
//   reads through to the RAM underneath, so a machine without firmware
//   exposes the power-on pattern where ROM would be.

pub struct Memory {
    // Configuration
    mmu: Shared<dyn Mmu>,
    // Addressable
    basic: Option<Shared<Rom>>,
    charset: Option<Shared<Rom>>,
    kernal: Option<Shared<Rom>>,
    io: Mmio,
    ram: Shared<Ram>,
}

impl Memory {
    pub fn new(
        mmu: Shared<dyn Mmu>,
        io: Mmio,
        ram: Shared<Ram>,
        rom_basic: Option<Shared<Rom>>,
        rom_charset: Option<Shared<Rom>>,
        rom_kernal: Option<Shared<Rom>>,
    ) -> Self {
        Memory {
            mmu,
            basic: rom_basic,
            charset: rom_charset,
            kernal: rom_kernal,
            io,
            ram,
        }
    }

    pub fn set_roms(
        &mut self,
        rom_kernal: Option<Shared<Rom>>,
        rom_basic: Option<Shared<Rom>>,
        rom_charset: Option<Shared<Rom>>,
    ) {
        self.kernal = rom_kernal;
        self.basic = rom_basic;
        self.charset = rom_charset;
    }

    pub fn has_kernal(&self) -> bool {
        self.kernal.is_some()
    }

    pub fn has_basic(&self) -> bool {
        self.basic.is_some()
    }

    fn read_rom(&self, rom: &Option<Shared<Rom>>, address: u16) -> u8 {
        match rom {
            Some(rom) => rom.borrow().read(address),
            None => self.ram.borrow().read(address),
        }
    }
}

impl Addressable for Memory {
    fn read(&self, address: u16) -> u8 {
        match self.mmu.borrow().map(address) {
            Bank::Ram => self.ram.borrow().read(address),
            Bank::Basic => self.read_rom(&self.basic, address),
            Bank::Charset => self.read_rom(&self.charset, address),
            Bank::Kernal => self.read_rom(&self.kernal, address),
            Bank::Io => self.io.read(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match self.mmu.borrow().map(address) {
            Bank::Io => self.io.write(address, value),
            _ => self.ram.borrow_mut().write(address, value),
        }
    }
}
