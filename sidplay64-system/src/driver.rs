// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::info;
use sidplay64_loader::{Compatibility, SidTune, Speed};

use super::reloc65::{build_o65, reloc65};

// The tune driver: one page of 6502 code that performs the power-on delay,
// selects the memory bank, calls the tune's init routine and then services
// either a CIA or a raster interrupt, calling play each time. It is
// assembled here into an o65 object and placed into a free RAM page through
// the relocator.
//
// Entry layout (offsets into the page):
//   +0  cold start vector
//   +2  raw IRQ handler (hardware vector, kernal banked out or missing)
//   +4  kernal IRQ handler ($0314, chained from the kernal dispatcher)
// followed by the parameter block and the code.

#[derive(Debug, PartialEq)]
pub enum DriverError {
    NoSpace,
    BadDriverImage,
}

impl DriverError {
    pub fn message(&self) -> &'static str {
        match self {
            DriverError::NoSpace => "ERROR: No space to install driver in C64 ram",
            DriverError::BadDriverImage => "ERROR: Driver relocation failed",
        }
    }
}

struct Assembler {
    code: Vec<u8>,
    relocs: Vec<u16>,
}

impl Assembler {
    fn new() -> Self {
        Assembler {
            code: Vec::new(),
            relocs: Vec::new(),
        }
    }

    fn here(&self) -> u16 {
        self.code.len() as u16
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Emit an opcode with an absolute driver-internal operand; the operand
    /// gets a relocation entry.
    fn emit_abs_internal(&mut self, opcode: u8, target: u16) {
        self.code.push(opcode);
        self.relocs.push(self.here());
        self.emit(&target.to_le_bytes());
    }

    /// Emit an opcode with an absolute external operand (chip register or
    /// tune address); left alone by the relocator.
    fn emit_abs(&mut self, opcode: u8, target: u16) {
        self.code.push(opcode);
        self.emit(&target.to_le_bytes());
    }

    /// Reserve a word slot carrying a driver-internal address.
    fn emit_word_internal(&mut self, target: u16) {
        self.relocs.push(self.here());
        self.emit(&target.to_le_bytes());
    }

    fn patch_branch(&mut self, operand_at: u16, target: u16) {
        let next = operand_at + 1;
        self.code[operand_at as usize] = (target.wrapping_sub(next)) as u8;
    }
}

pub struct Driver {
    image: Vec<u8>,
    driver_addr: u16,
    // Offsets of the install-time patch slots within the image.
    song_at: usize,
    bank_init_at: usize,
    bank_play_at: usize,
    speed_at: usize,
    delay_at: usize,
    init_operand_at: usize,
    play_operand_at: usize,
    timer_lo_at: usize,
    timer_hi_at: usize,
    rts_stub: u16,
}

impl Driver {
    /// Assemble the driver and relocate it to a free page.
    pub fn build(tune: &SidTune, used_start: u16, used_end: u16) -> Result<Driver, DriverError> {
        let info = tune.info();
        let page = find_free_page(
            info.reloc_start_page,
            info.reloc_pages,
            used_start,
            used_end,
        )?;
        let driver_addr = u16::from(page) << 8;

        let mut asm = Assembler::new();

        // Entry vectors, filled in below.
        asm.emit_word_internal(0); // +0 cold
        asm.emit_word_internal(0); // +2 irq raw
        asm.emit_word_internal(0); // +4 irq kernal

        // Parameter block.
        let song_at = asm.here();
        asm.emit(&[0]);
        let bank_init_at = asm.here();
        asm.emit(&[0x37]);
        let bank_play_at = asm.here();
        asm.emit(&[0x37]);
        let speed_at = asm.here();
        asm.emit(&[0]);
        let delay_at = asm.here();
        asm.emit(&[0, 0]);

        // -- Cold start
        let cold = asm.here();
        asm.emit(&[0x78]); // SEI
        asm.emit_abs_internal(0xae, delay_at + 1); // LDX delay+1
        asm.emit_abs_internal(0xac, delay_at); // LDY delay
        let wait = asm.here();
        asm.emit(&[0xc0, 0x00]); // CPY #$00
        asm.emit(&[0xd0, 0x00]); // BNE count_y
        let bne_at = asm.here() - 1;
        asm.emit(&[0xe0, 0x00]); // CPX #$00
        asm.emit(&[0xf0, 0x00]); // BEQ go
        let beq_at = asm.here() - 1;
        asm.emit(&[0xca]); // DEX
        let count_y = asm.here();
        asm.emit(&[0x88]); // DEY
        asm.emit_abs_internal(0x4c, wait); // JMP wait
        let go = asm.here();
        asm.patch_branch(bne_at, count_y);
        asm.patch_branch(beq_at, go);

        asm.emit_abs_internal(0xad, bank_init_at); // LDA bank_init
        asm.emit(&[0x85, 0x01]); // STA $01
        asm.emit_abs_internal(0xad, song_at); // LDA song
        let init_operand_at = asm.here() + 1;
        asm.emit_abs(0x20, 0x0000); // JSR init
        asm.emit_abs_internal(0xad, speed_at); // LDA speed
        asm.emit(&[0xd0, 0x00]); // BNE cia_setup
        let speed_bne_at = asm.here() - 1;

        // VBI cadence: raster interrupt at line 0.
        asm.emit(&[0xa9, 0x00]); // LDA #$00
        asm.emit_abs(0x8d, 0xd012); // STA $D012
        asm.emit(&[0xa9, 0x1b]); // LDA #$1B
        asm.emit_abs(0x8d, 0xd011); // STA $D011
        asm.emit(&[0xa9, 0x01]); // LDA #$01
        asm.emit_abs(0x8d, 0xd01a); // STA $D01A
        asm.emit(&[0x4c, 0x00, 0x00]); // JMP idle
        let idle_jmp_at = asm.here() - 2;
        asm.relocs.push(idle_jmp_at);

        // CIA cadence: timer A at the frame rate.
        let cia_setup = asm.here();
        asm.patch_branch(speed_bne_at, cia_setup);
        let timer_lo_at = asm.here() + 1;
        asm.emit(&[0xa9, 0x00]); // LDA #<cycles_per_frame
        asm.emit_abs(0x8d, 0xdc04); // STA $DC04
        let timer_hi_at = asm.here() + 1;
        asm.emit(&[0xa9, 0x00]); // LDA #>cycles_per_frame
        asm.emit_abs(0x8d, 0xdc05); // STA $DC05
        asm.emit(&[0xa9, 0x81]); // LDA #$81
        asm.emit_abs(0x8d, 0xdc0d); // STA $DC0D
        asm.emit(&[0xa9, 0x01]); // LDA #$01
        asm.emit_abs(0x8d, 0xdc0e); // STA $DC0E

        let idle = asm.here();
        let idle_slot = idle_jmp_at as usize;
        asm.code[idle_slot] = idle as u8;
        asm.code[idle_slot + 1] = (idle >> 8) as u8;
        asm.emit(&[0x58]); // CLI
        let spin = asm.here();
        asm.emit_abs_internal(0x4c, spin); // JMP spin

        // -- Interrupt entries
        let irq_raw = asm.here();
        asm.emit(&[0x48, 0x8a, 0x48, 0x98, 0x48]); // PHA TXA PHA TYA PHA
        let raw_jsr_at = asm.here() + 1;
        asm.emit_abs(0x20, 0x0000); // JSR common
        asm.emit(&[0x68, 0xa8, 0x68, 0xaa, 0x68]); // PLA TAY PLA TAX PLA
        asm.emit(&[0x40]); // RTI

        let irq_kernal = asm.here();
        let kernal_jsr_at = asm.here() + 1;
        asm.emit_abs(0x20, 0x0000); // JSR common
        asm.emit_abs(0x4c, 0xea81); // JMP $EA81

        let common = asm.here();
        asm.code[raw_jsr_at as usize] = common as u8;
        asm.code[raw_jsr_at as usize + 1] = (common >> 8) as u8;
        asm.relocs.push(raw_jsr_at);
        asm.code[kernal_jsr_at as usize] = common as u8;
        asm.code[kernal_jsr_at as usize + 1] = (common >> 8) as u8;
        asm.relocs.push(kernal_jsr_at);

        asm.emit(&[0xa5, 0x01, 0x48]); // LDA $01; PHA
        asm.emit_abs_internal(0xad, bank_play_at); // LDA bank_play
        asm.emit(&[0x85, 0x01]); // STA $01
        asm.emit_abs(0xad, 0xdc0d); // LDA $DC0D (ack CIA)
        asm.emit_abs(0xad, 0xd019); // LDA $D019
        asm.emit_abs(0x8d, 0xd019); // STA $D019 (ack VIC)
        let play_operand_at = asm.here() + 1;
        asm.emit_abs(0x20, 0x0000); // JSR play
        asm.emit(&[0x68, 0x85, 0x01]); // PLA; STA $01
        asm.emit(&[0x60]); // RTS

        let rts_stub = asm.here();
        asm.emit(&[0x60]); // RTS

        // Fill the entry vectors.
        asm.code[0..2].copy_from_slice(&cold.to_le_bytes());
        asm.code[2..4].copy_from_slice(&irq_raw.to_le_bytes());
        asm.code[4..6].copy_from_slice(&irq_kernal.to_le_bytes());

        let object = build_o65(&asm.code, 0x0000, &asm.relocs);
        let image =
            reloc65(&object, driver_addr).map_err(|_| DriverError::BadDriverImage)?;

        info!(
            target: "driver",
            "Driver installed at 0x{:04x}, {} bytes",
            driver_addr,
            image.len()
        );

        Ok(Driver {
            image,
            driver_addr,
            song_at: song_at as usize,
            bank_init_at: bank_init_at as usize,
            bank_play_at: bank_play_at as usize,
            speed_at: speed_at as usize,
            delay_at: delay_at as usize,
            init_operand_at: init_operand_at as usize,
            play_operand_at: play_operand_at as usize,
            timer_lo_at: timer_lo_at as usize,
            timer_hi_at: timer_hi_at as usize,
            rts_stub,
        })
    }

    pub fn driver_addr(&self) -> u16 {
        self.driver_addr
    }

    /// Cold start address within the relocated image.
    pub fn cold_entry(&self) -> u16 {
        self.entry(0)
    }

    pub fn driver_length(&self) -> u16 {
        self.image.len() as u16
    }

    /// Patch the tune parameters and copy the driver into memory. `mem` is a
    /// plain RAM byte writer.
    pub fn install(
        &mut self,
        tune: &SidTune,
        power_on_delay: u16,
        cycles_per_frame: u32,
        video_pal: bool,
        mem: &mut dyn FnMut(u16, u8),
    ) {
        let info = tune.info();
        let song = info.current_song;

        self.image[self.song_at] = (song - 1) as u8;
        self.image[self.bank_init_at] = iomap(info.init_addr, info.compatibility);
        self.image[self.bank_play_at] = iomap(info.play_addr, info.compatibility);
        self.image[self.speed_at] = match info.song_speed(song) {
            Speed::Vbi => 0,
            Speed::Cia => 1,
        };
        // The delay loop spends roughly eight cycles per iteration.
        let delay = power_on_delay / 8;
        self.image[self.delay_at] = delay as u8;
        self.image[self.delay_at + 1] = (delay >> 8) as u8;

        let init = info.init_addr;
        self.image[self.init_operand_at] = init as u8;
        self.image[self.init_operand_at + 1] = (init >> 8) as u8;

        let play = if info.play_addr != 0 {
            info.play_addr
        } else {
            self.driver_addr + self.rts_stub
        };
        self.image[self.play_operand_at] = play as u8;
        self.image[self.play_operand_at + 1] = (play >> 8) as u8;

        self.image[self.timer_lo_at] = cycles_per_frame as u8;
        self.image[self.timer_hi_at] = (cycles_per_frame >> 8) as u8;

        for (offset, byte) in self.image.iter().enumerate() {
            mem(self.driver_addr.wrapping_add(offset as u16), *byte);
        }

        let cold = self.entry(0);
        let irq_raw = self.entry(2);
        let irq_kernal = self.entry(4);

        // Boot through the reset vector; IRQs through either the hardware
        // vector (RAM) or the kernal dispatcher.
        mem(0xfffc, cold as u8);
        mem(0xfffd, (cold >> 8) as u8);
        mem(0xfffe, irq_raw as u8);
        mem(0xffff, (irq_raw >> 8) as u8);
        mem(0x0314, irq_kernal as u8);
        mem(0x0315, (irq_kernal >> 8) as u8);

        // PAL/NTSC switch as the kernal would leave it.
        mem(0x02a6, video_pal as u8);
    }

    fn entry(&self, offset: usize) -> u16 {
        u16::from(self.image[offset]) | (u16::from(self.image[offset + 1]) << 8)
    }
}

/// Memory bank selection byte for running code at the given address.
fn iomap(addr: u16, compatibility: Compatibility) -> u8 {
    if compatibility == Compatibility::Rsid || compatibility == Compatibility::Basic {
        // Real C64 mode: banks as after power up.
        return 0x37;
    }
    if addr == 0 {
        return 0x37;
    }
    if addr < 0xa000 {
        0x37 // Basic-ROM, Kernal-ROM, I/O
    } else if addr < 0xd000 {
        0x36 // Kernal-ROM, I/O
    } else if addr >= 0xe000 {
        0x35 // I/O only
    } else {
        0x34 // RAM only
    }
}

/// Pick a free page for the driver honouring the tune's relocation hint and
/// staying clear of the loaded image, the zero/stack pages and the vectors.
fn find_free_page(
    reloc_start_page: u8,
    reloc_pages: u8,
    used_start: u16,
    used_end: u16,
) -> Result<u8, DriverError> {
    if reloc_start_page == 0xff {
        return Err(DriverError::NoSpace);
    }
    let used_first = (used_start >> 8) as u8;
    let used_last = (used_end >> 8) as u8;
    let free = |page: u8| page >= 0x04 && page < 0xd0 && (page < used_first || page > used_last);

    if reloc_start_page != 0 && reloc_pages != 0 {
        let last = reloc_start_page.saturating_add(reloc_pages - 1);
        for page in reloc_start_page..=last {
            if free(page) {
                return Ok(page);
            }
        }
        return Err(DriverError::NoSpace);
    }

    for page in 0x04..0xd0 {
        if free(page) {
            return Ok(page);
        }
    }
    Err(DriverError::NoSpace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidplay64_loader::SidTune;

    fn psid_tune(load: u16, reloc_start: u8, reloc_pages: u8) -> SidTune {
        let mut data = vec![0u8; 0x7c];
        data[0..4].copy_from_slice(b"PSID");
        data[5] = 0x02; // version
        data[7] = 0x7c; // data offset
        data[15] = 0x01; // songs
        data[120] = reloc_start;
        data[121] = reloc_pages;
        data.push(load as u8);
        data.push((load >> 8) as u8);
        data.extend_from_slice(&[0x60, 0x60, 0x60, 0x60]);
        SidTune::load(&data, None).unwrap()
    }

    #[test]
    fn driver_avoids_tune_pages() {
        let tune = psid_tune(0x0400, 0, 0);
        let driver = Driver::build(&tune, 0x0400, 0x0405).unwrap();
        assert_eq!(0x0500, driver.driver_addr());
    }

    #[test]
    fn driver_honours_reloc_hint() {
        let tune = psid_tune(0x1000, 0x20, 0x04);
        let driver = Driver::build(&tune, 0x1000, 0x1005).unwrap();
        assert_eq!(0x2000, driver.driver_addr());
    }

    #[test]
    fn reloc_hint_of_ff_means_no_space() {
        let tune = psid_tune(0x1000, 0xff, 0x00);
        // The loader voids the page count but the hint still forbids
        // installation anywhere.
        let result = Driver::build(&tune, 0x1000, 0x1005);
        assert!(result.is_err());
    }

    #[test]
    fn install_patches_vectors_and_parameters() {
        let tune = psid_tune(0x1000, 0, 0);
        let mut driver = Driver::build(&tune, 0x1000, 0x1005).unwrap();
        let mut ram = vec![0u8; 0x10000];
        driver.install(&tune, 0x100, 19656, true, &mut |addr, value| {
            ram[addr as usize] = value;
        });
        let base = driver.driver_addr();
        // Cold entry vector points into the driver page.
        let cold = u16::from(ram[0xfffc]) | (u16::from(ram[0xfffd]) << 8);
        assert_eq!(base & 0xff00, cold & 0xff00);
        // First cold instruction is SEI.
        assert_eq!(0x78, ram[cold as usize]);
        // The init call targets the tune.
        let init_at = base as usize + driver.init_operand_at;
        assert_eq!(0x1000u16.to_le_bytes(), [ram[init_at], ram[init_at + 1]]);
        // Play is zero, so the driver calls its own RTS stub.
        let play_at = base as usize + driver.play_operand_at;
        let stub = base + driver.rts_stub;
        assert_eq!(stub.to_le_bytes(), [ram[play_at], ram[play_at + 1]]);
        assert_eq!(0x60, ram[stub as usize]);
        assert_eq!(0x01, ram[0x02a6]);
    }

    #[test]
    fn driver_fits_in_one_page() {
        let tune = psid_tune(0x1000, 0, 0);
        let driver = Driver::build(&tune, 0x1000, 0x1005).unwrap();
        assert!(driver.driver_length() <= 0x100);
    }
}
