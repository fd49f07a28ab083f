// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// SPEC: https://www.c64-wiki.com/index.php/Bank_Switching
//
// With EXROM/GAME tied high (no cartridge) only the LORAM/HIRAM/CHAREN lines
// select the configuration, leaving eight modes over the 4k zones.

use log::{log_enabled, trace, Level};

use crate::factory::{Bank, Mmu};

#[derive(Clone, Copy)]
struct Mode {
    banks: [Bank; 0x10],
}

impl Mode {
    fn new(config: [Bank; 7]) -> Self {
        let mut banks = [Bank::Ram; 0x10];
        for (i, bank) in banks.iter_mut().enumerate() {
            *bank = match i {
                0x00 => config[0],
                0x01..=0x07 => config[1],
                0x08..=0x09 => config[2],
                0x0a..=0x0b => config[3],
                0x0c => config[4],
                0x0d => config[5],
                0x0e..=0x0f => config[6],
                _ => unreachable!(),
            };
        }
        Mode { banks }
    }

    fn get(&self, zone: u8) -> Bank {
        self.banks[zone as usize]
    }
}

pub struct Pla {
    map: MemoryMap,
    mode: Mode,
}

impl Pla {
    pub fn new() -> Self {
        let map = MemoryMap::default();
        let mode = map.get(7);
        Pla { map, mode }
    }
}

impl Mmu for Pla {
    fn map(&self, address: u16) -> Bank {
        let zone = address >> 12;
        self.mode.get(zone as u8)
    }

    fn switch_banks(&mut self, mode: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "mem::banks", "Switching to {}", mode);
        }
        self.mode = self.map.get(mode & 0x07);
    }
}

struct MemoryMap {
    modes: [Mode; 8],
}

impl Default for MemoryMap {
    fn default() -> Self {
        let m0_4 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
        ];
        let m1 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Charset,
            Bank::Ram,
        ];
        let m2 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Charset,
            Bank::Kernal,
        ];
        let m3 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Basic,
            Bank::Ram,
            Bank::Charset,
            Bank::Kernal,
        ];
        let m5 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Io,
            Bank::Ram,
        ];
        let m6 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Io,
            Bank::Kernal,
        ];
        let m7 = [
            Bank::Ram,
            Bank::Ram,
            Bank::Ram,
            Bank::Basic,
            Bank::Ram,
            Bank::Io,
            Bank::Kernal,
        ];
        MemoryMap {
            modes: [
                Mode::new(m0_4),
                Mode::new(m1),
                Mode::new(m2),
                Mode::new(m3),
                Mode::new(m0_4),
                Mode::new(m5),
                Mode::new(m6),
                Mode::new(m7),
            ],
        }
    }
}

impl MemoryMap {
    fn get(&self, mode: u8) -> Mode {
        self.modes[(mode & 0x07) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_eq(a: Bank, b: Bank) -> bool {
        matches!(
            (a, b),
            (Bank::Ram, Bank::Ram)
                | (Bank::Basic, Bank::Basic)
                | (Bank::Charset, Bank::Charset)
                | (Bank::Kernal, Bank::Kernal)
                | (Bank::Io, Bank::Io)
        )
    }

    #[test]
    fn default_mode_maps_roms_and_io() {
        let pla = Pla::new();
        assert!(bank_eq(Bank::Ram, pla.map(0x0000)));
        assert!(bank_eq(Bank::Basic, pla.map(0xa000)));
        assert!(bank_eq(Bank::Io, pla.map(0xd400)));
        assert!(bank_eq(Bank::Kernal, pla.map(0xe000)));
    }

    #[test]
    fn mode_0_is_all_ram() {
        let mut pla = Pla::new();
        pla.switch_banks(0);
        assert!(bank_eq(Bank::Ram, pla.map(0xa000)));
        assert!(bank_eq(Bank::Ram, pla.map(0xd000)));
        assert!(bank_eq(Bank::Ram, pla.map(0xe000)));
    }

    #[test]
    fn mode_5_keeps_io_only() {
        let mut pla = Pla::new();
        pla.switch_banks(5);
        assert!(bank_eq(Bank::Ram, pla.map(0xa000)));
        assert!(bank_eq(Bank::Io, pla.map(0xd000)));
        assert!(bank_eq(Bank::Ram, pla.map(0xe000)));
    }

    #[test]
    fn mode_3_maps_charset() {
        let mut pla = Pla::new();
        pla.switch_banks(3);
        assert!(bank_eq(Bank::Charset, pla.map(0xd000)));
        assert!(bank_eq(Bank::Basic, pla.map(0xa000)));
        assert!(bank_eq(Bank::Kernal, pla.map(0xe000)));
    }
}
