// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod info;
mod io;
mod md5;
mod mus;
mod p00;
mod prg;
mod psid;

use core::fmt;

pub use crate::info::{Clock, Compatibility, SidModel, SidTuneInfo, Speed};
pub use crate::md5::Md5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    UnsupportedPsidVersion,
    UnsupportedRsidVersion,
    InvalidData,
    BadAddress,
    UnknownFormat,
    Truncated,
    DataTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Error::UnsupportedPsidVersion => "Unsupported PSID version",
            Error::UnsupportedRsidVersion => "Unsupported RSID version",
            Error::InvalidData => "SIDTUNE ERROR: File contains invalid data",
            Error::BadAddress => "SIDTUNE ERROR: Bad address data",
            Error::UnknownFormat => "SIDTUNE ERROR: Could not determine file format",
            Error::Truncated => "SIDTUNE ERROR: File is incomplete or truncated",
            Error::DataTooLong => "SIDTUNE ERROR: Size of music data exceeds C64 memory",
        };
        write!(f, "{}", message)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// A loaded tune: the descriptor plus the 6502 payload ready to be copied
/// into C64 memory.
#[derive(Debug)]
pub struct SidTune {
    info: SidTuneInfo,
    data: Vec<u8>,
    file_offset: usize,
}

impl SidTune {
    /// Parse a tune image. Detection is magic-bytes first, falling back on
    /// the file extension hint for the headerless formats.
    pub fn load(buffer: &[u8], extension: Option<&str>) -> Result<SidTune> {
        if psid::is_psid(buffer) {
            return psid::load(buffer);
        }
        if p00::is_p00(buffer) {
            return p00::load(buffer);
        }
        match extension.map(str::to_ascii_lowercase).as_deref() {
            Some("mus") | Some("str") => mus::load(buffer),
            Some("prg") | Some("c64") => prg::load(buffer),
            _ => mus::load(buffer).map_err(|_| Error::UnknownFormat),
        }
    }

    pub(crate) fn new(info: SidTuneInfo, data: Vec<u8>, file_offset: usize) -> SidTune {
        SidTune {
            info,
            data,
            file_offset,
        }
    }

    pub fn info(&self) -> &SidTuneInfo {
        &self.info
    }

    /// Select a song; 0 or an out-of-range number selects the start song.
    /// Returns the active song number.
    pub fn select_song(&mut self, song: u16) -> u16 {
        let selected = if song == 0 || song > self.info.songs {
            self.info.start_song
        } else {
            song
        };
        self.info.current_song = selected;
        selected
    }

    /// The 6502 payload as it must appear at `load_addr`.
    pub fn c64_data(&self) -> &[u8] {
        &self.data[self.file_offset..]
    }

    /// Copy the payload into a 64 KiB memory image.
    pub fn place_in_c64_mem(&self, mem: &mut dyn FnMut(u16, u8)) {
        let mut address = self.info.load_addr;
        for byte in self.c64_data() {
            mem(address, *byte);
            address = address.wrapping_add(1);
        }
    }

    /// Fingerprint used by song length databases.
    pub fn create_md5(&self) -> [u8; 16] {
        let mut md5 = Md5::new();
        md5.update(self.c64_data());
        md5.update(&self.info.init_addr.to_le_bytes());
        md5.update(&self.info.play_addr.to_le_bytes());
        md5.update(&self.info.songs.to_le_bytes());
        for song in 1..=self.info.songs {
            let speed = match self.info.song_speed(song) {
                Speed::Vbi => 0u8,
                Speed::Cia => 60u8,
            };
            md5.update(&[speed]);
        }
        // Deal with PSID v2NG clock speed flags: only NTSC tunes differ.
        if self.info.clock_speed == Clock::Ntsc {
            md5.update(&[2]);
        }
        md5.finish()
    }

    /// Newer fingerprint over the whole file image.
    pub fn create_md5_new(&self) -> [u8; 16] {
        let mut md5 = Md5::new();
        md5.update(&self.data);
        md5.finish()
    }
}
