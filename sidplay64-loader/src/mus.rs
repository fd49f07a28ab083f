// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::LittleEndian;
use log::info;

use crate::info::{Compatibility, SidTuneInfo};
use crate::io::Reader;
use crate::{Error, Result, SidTune};

// Stereo Sidplayer (MUS/STR) format: three per-voice command streams with a
// credits text block at the end. Each voice stream must terminate in the
// player's HLT command; that check doubles as format detection since the
// container has no magic bytes.

/// Sidplayer HLT command, stored little endian as 0x01 0x4f.
const MUS_HLT_CMD: u16 = 0x4f01;

/// Load address of the music data.
pub const MUS_DATA_ADDR: u16 = 0x0900;
/// Install addresses of the built-in player.
pub const MUS_INIT_ADDR: u16 = 0xec60;
pub const MUS_PLAY_ADDR: u16 = 0xec80;

pub fn load(buffer: &[u8]) -> Result<SidTune> {
    let mut reader = Reader::new(buffer);
    let _load_addr = reader.read_u16::<LittleEndian>()?;

    let voice1_len = usize::from(reader.read_u16::<LittleEndian>()?);
    let voice2_len = usize::from(reader.read_u16::<LittleEndian>()?);
    let voice3_len = usize::from(reader.read_u16::<LittleEndian>()?);

    let voice1_index = 8usize;
    let voice2_index = voice1_index + voice1_len;
    let voice3_index = voice2_index + voice2_len;
    let data_end = voice3_index + voice3_len;
    if data_end > buffer.len() {
        return Err(Error::UnknownFormat);
    }

    // Each voice stream has to end with HLT.
    for index in [voice2_index, voice3_index, data_end] {
        if index < 2 {
            return Err(Error::UnknownFormat);
        }
        let mut hlt = Reader::new(buffer);
        hlt.seek(index - 2);
        if hlt.read_u16::<LittleEndian>()? != MUS_HLT_CMD {
            return Err(Error::UnknownFormat);
        }
    }

    let mut info = SidTuneInfo::new("MUS (Sidplayer)");
    info.load_addr = MUS_DATA_ADDR;
    info.init_addr = MUS_INIT_ADDR;
    info.play_addr = MUS_PLAY_ADDR;
    info.compatibility = Compatibility::Psid;
    info.mus_player = true;
    info.info_strings = read_credits(&buffer[data_end..]);

    info!(target: "loader", "Loaded MUS: {} data bytes", data_end - 8);

    // The whole image loads at the data address, the descriptor words
    // included, matching how the Sidplayer expects to find it.
    Ok(SidTune::new(info, buffer.to_vec(), 2))
}

/// The credits block is petscii-ish text lines separated by carriage
/// returns and closed by a NUL.
fn read_credits(text: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for byte in text {
        match byte {
            0x00 => break,
            0x0d => {
                lines.push(std::mem::take(&mut current));
            }
            b => {
                let ch = match b {
                    0x20..=0x5f => *b as char,
                    0xc1..=0xda => (b - 0x80) as char,
                    _ => ' ',
                };
                current.push(ch);
            }
        }
        if lines.len() == 5 {
            break;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICE1_LEN_LO: usize = 2;

    fn mus_buffer() -> Vec<u8> {
        vec![
            0x52, 0x53, // load address
            0x04, 0x00, // length of the data for voice 1
            0x04, 0x00, // length of the data for voice 2
            0x04, 0x00, // length of the data for voice 3
            0x00, 0x00, 0x01, 0x4f, // data for voice 1
            0x00, 0x00, 0x01, 0x4f, // data for voice 2
            0x00, 0x01, 0x01, 0x4f, // data for voice 3
            0x0d, 0x0d, 0x0d, 0x0d, 0x0d, 0x00, // text description
        ]
    }

    #[test]
    fn player_addresses() {
        let data = mus_buffer();
        let tune = SidTune::load(&data, Some("mus")).unwrap();
        assert_eq!(0xec60, tune.info().init_addr);
        assert_eq!(0xec80, tune.info().play_addr);
        assert!(tune.info().mus_player);
    }

    #[test]
    fn wrong_voice_length_is_rejected() {
        let mut data = mus_buffer();
        data[VOICE1_LEN_LO] = 0x76;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!(
            "SIDTUNE ERROR: Could not determine file format",
            err.to_string()
        );
    }

    #[test]
    fn detected_without_extension() {
        let data = mus_buffer();
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!("MUS (Sidplayer)", tune.info().format);
    }
}
