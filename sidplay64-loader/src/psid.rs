// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::{BigEndian, LittleEndian};
use log::{info, log_enabled, Level};

use crate::info::{Clock, Compatibility, SidModel, SidTuneInfo};
use crate::io::Reader;
use crate::{Error, Result, SidTune};

// PSID/RSID container, big-endian header followed by the 6502 payload.
// PSID is permissive; RSID enforces "runs on a real C64" invariants on the
// addresses, the speed bitmap and the data offset.

const MAX_SONGS: u16 = 256;

const PSID_MUS: u16 = 1 << 0;
const PSID_SPECIFIC: u16 = 1 << 1; // v2: PlaySID specific
const PSID_BASIC: u16 = 1 << 1; // RSID: C64 BASIC flag
const PSID_CLOCK_SHIFT: u16 = 2;
const PSID_SID1_SHIFT: u16 = 4;
const PSID_SID2_SHIFT: u16 = 6;
const PSID_SID3_SHIFT: u16 = 8;

pub fn is_psid(buffer: &[u8]) -> bool {
    buffer.len() >= 4 && (&buffer[0..4] == b"PSID" || &buffer[0..4] == b"RSID")
}

fn decode_model(bits: u16) -> SidModel {
    match bits & 0x3 {
        0x1 => SidModel::Mos6581,
        0x2 => SidModel::Mos8580,
        0x3 => SidModel::Any,
        _ => SidModel::Unknown,
    }
}

fn decode_clock(bits: u16) -> Clock {
    match bits & 0x3 {
        0x1 => Clock::Pal,
        0x2 => Clock::Ntsc,
        0x3 => Clock::Any,
        _ => Clock::Unknown,
    }
}

/// Only even offsets within $D420-$D7E0 and $DE00-$DFE0 name a valid extra
/// SID address; everything else collides with the base chip, color RAM or
/// the CIAs.
fn decode_sid_address(value: u8) -> u16 {
    let valid = value & 0x01 == 0
        && ((0x42..=0x7f).contains(&value) || (0xe0..=0xfe).contains(&value));
    if valid {
        0xd000 | (u16::from(value) << 4)
    } else {
        0
    }
}

pub fn load(buffer: &[u8]) -> Result<SidTune> {
    let mut reader = Reader::new(buffer);
    let magic = reader.read_bytes(4)?;
    let is_rsid = magic == b"RSID";

    let version = reader.read_u16::<BigEndian>()?;
    if is_rsid {
        if !(2..=4).contains(&version) {
            return Err(Error::UnsupportedRsidVersion);
        }
    } else if !(1..=4).contains(&version) {
        return Err(Error::UnsupportedPsidVersion);
    }

    let data_offset = reader.read_u16::<BigEndian>()?;
    let expected_offset = if version == 1 { 0x0076 } else { 0x007c };
    if data_offset != expected_offset {
        return Err(Error::BadAddress);
    }

    let load_addr = reader.read_u16::<BigEndian>()?;
    let init_addr = reader.read_u16::<BigEndian>()?;
    let play_addr = reader.read_u16::<BigEndian>()?;

    let mut songs = reader.read_u16::<BigEndian>()?;
    if songs == 0 {
        songs = 1;
    }
    if songs > MAX_SONGS {
        songs = MAX_SONGS;
    }
    let mut start_song = reader.read_u16::<BigEndian>()?;
    if start_song == 0 || start_song > songs {
        start_song = 1;
    }
    let speed = reader.read_u32::<BigEndian>()?;

    let mut info = SidTuneInfo::new(if is_rsid { "RSID (C64 native)" } else { "PSID" });
    info.songs = songs;
    info.start_song = start_song;
    info.current_song = start_song;
    info.speed = speed;
    info.info_strings.push(reader.read_string(32)?);
    info.info_strings.push(reader.read_string(32)?);
    info.info_strings.push(reader.read_string(32)?);

    let mut flags = 0u16;
    if version >= 2 {
        flags = reader.read_u16::<BigEndian>()?;
        info.reloc_start_page = reader.read_u8()?;
        info.reloc_pages = reader.read_u8()?;
        let second_sid = reader.read_u8()?;
        let third_sid = reader.read_u8()?;

        // A reloc hint of page 0x00 (not relocatable) or 0xff (no space)
        // voids the page count.
        if info.reloc_start_page == 0x00 || info.reloc_start_page == 0xff {
            info.reloc_pages = 0;
        }

        info.clock_speed = decode_clock(flags >> PSID_CLOCK_SHIFT);
        info.sid_models[0] = decode_model(flags >> PSID_SID1_SHIFT);

        if version >= 3 {
            info.sid_chip_bases[1] = decode_sid_address(second_sid);
            if info.sid_chip_bases[1] != 0 {
                info.sid_models[1] = decode_model(flags >> PSID_SID2_SHIFT);
            }
        }
        if version >= 4 {
            let third = decode_sid_address(third_sid);
            if third != 0 && third != info.sid_chip_bases[1] {
                info.sid_chip_bases[2] = third;
                info.sid_models[2] = decode_model(flags >> PSID_SID3_SHIFT);
            }
        }
    }

    info.compatibility = if is_rsid {
        if flags & PSID_BASIC != 0 {
            Compatibility::Basic
        } else {
            Compatibility::Rsid
        }
    } else if flags & PSID_SPECIFIC != 0 {
        Compatibility::Psid
    } else {
        Compatibility::C64
    };
    info.mus_player = !is_rsid && flags & PSID_MUS != 0;

    if is_rsid && (load_addr != 0 || play_addr != 0 || speed != 0) {
        return Err(Error::InvalidData);
    }

    // Resolve the load address: zero means the real address is embedded in
    // front of the payload.
    let mut file_offset = usize::from(data_offset);
    reader.seek(file_offset);
    let real_load_addr = if load_addr == 0 {
        let embedded = reader.read_u16::<LittleEndian>()?;
        file_offset += 2;
        embedded
    } else {
        load_addr
    };
    if reader.remaining() == 0 {
        return Err(Error::Truncated);
    }

    info.load_addr = real_load_addr;
    info.init_addr = if init_addr == 0 {
        real_load_addr
    } else {
        init_addr
    };
    info.play_addr = play_addr;

    let data_len = buffer.len() - file_offset;
    if usize::from(real_load_addr) + data_len - 1 > 0xffff {
        return Err(Error::DataTooLong);
    }

    if is_rsid {
        if real_load_addr < 0x07e8 {
            return Err(Error::BadAddress);
        }
        let init = info.init_addr;
        let in_rom = (0xa000..0xc000).contains(&init) || init >= 0xd000;
        if init < 0x07e8 || in_rom {
            return Err(Error::BadAddress);
        }
    }

    if log_enabled!(Level::Info) {
        info!(
            target: "loader",
            "Loaded {} v{}: load 0x{:04x}, init 0x{:04x}, play 0x{:04x}, {} song(s)",
            info.format, version, info.load_addr, info.init_addr, info.play_addr, info.songs
        );
    }

    Ok(SidTune::new(info, buffer.to_vec(), file_offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUFFER_SIZE: usize = 128;

    const VERSION_LO: usize = 5;
    const DATAOFFSET_LO: usize = 7;
    const LOADADDRESS_HI: usize = 8;
    const LOADADDRESS_LO: usize = 9;
    const INITADDRESS_HI: usize = 10;
    const INITADDRESS_LO: usize = 11;
    const PLAYADDRESS_LO: usize = 13;
    const SONGS_HI: usize = 14;
    const SONGS_LO: usize = 15;
    const SPEED_LO_LO: usize = 21;
    const STARTPAGE: usize = 120;
    const PAGELENGTH: usize = 121;
    const SECONDSIDADDRESS: usize = 122;
    const THIRDSIDADDRESS: usize = 123;

    fn rsid_buffer() -> [u8; BUFFER_SIZE] {
        let mut data = [0u8; BUFFER_SIZE];
        data[0..4].copy_from_slice(b"RSID");
        data[4] = 0x00;
        data[5] = 0x02; // version
        data[6] = 0x00;
        data[7] = 0x7c; // dataOffset
        data[15] = 0x01; // songs
        data[124] = 0xe8; // embedded load address 0x07e8
        data[125] = 0x07;
        data
    }

    #[test]
    fn load_ok() {
        let data = rsid_buffer();
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0x07e8, tune.info().load_addr);
        assert_eq!(0x07e8, tune.info().init_addr);
        assert_eq!(Compatibility::Rsid, tune.info().compatibility);
    }

    #[test]
    fn unsupported_rsid_version() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x01;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!("Unsupported RSID version", err.to_string());
    }

    #[test]
    fn wrong_load_address() {
        let mut data = rsid_buffer();
        data[LOADADDRESS_LO] = 0xff;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!(
            "SIDTUNE ERROR: File contains invalid data",
            err.to_string()
        );
    }

    #[test]
    fn wrong_actual_load_address() {
        let mut data = rsid_buffer();
        data[124] = 0xe7;
        data[125] = 0x07;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!("SIDTUNE ERROR: Bad address data", err.to_string());
    }

    #[test]
    fn wrong_play_address() {
        let mut data = rsid_buffer();
        data[PLAYADDRESS_LO] = 0xff;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!(
            "SIDTUNE ERROR: File contains invalid data",
            err.to_string()
        );
    }

    #[test]
    fn wrong_speed() {
        let mut data = rsid_buffer();
        data[SPEED_LO_LO] = 0xff;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!(
            "SIDTUNE ERROR: File contains invalid data",
            err.to_string()
        );
    }

    #[test]
    fn wrong_data_offset() {
        let mut data = rsid_buffer();
        data[DATAOFFSET_LO] = 0x76;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!("SIDTUNE ERROR: Bad address data", err.to_string());
    }

    #[test]
    fn wrong_init_address_in_rom() {
        let mut data = rsid_buffer();
        data[INITADDRESS_HI] = 0xb0;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!("SIDTUNE ERROR: Bad address data", err.to_string());
    }

    #[test]
    fn wrong_init_address_too_low() {
        let mut data = rsid_buffer();
        data[INITADDRESS_HI] = 0x07;
        data[INITADDRESS_LO] = 0xe7;
        let err = SidTune::load(&data, None).unwrap_err();
        assert_eq!("SIDTUNE ERROR: Bad address data", err.to_string());
    }

    #[test]
    fn too_many_songs_clamps_to_256() {
        let mut data = rsid_buffer();
        data[SONGS_HI] = 0x01;
        data[SONGS_LO] = 0x01;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(256, tune.info().songs);
    }

    #[test]
    fn default_start_song_is_one() {
        let data = rsid_buffer();
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(1, tune.info().start_song);
    }

    #[test]
    fn wrong_page_length_is_voided() {
        let mut data = rsid_buffer();
        data[STARTPAGE] = 0xff;
        data[PAGELENGTH] = 0x77;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0, tune.info().reloc_pages);
    }

    #[test]
    fn second_sid_address_ok() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x03;
        data[SECONDSIDADDRESS] = 0x42;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0xd420, tune.info().sid_chip_base(1));
    }

    #[test]
    fn second_sid_address_odd_is_invalid() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x03;
        data[SECONDSIDADDRESS] = 0x43;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0, tune.info().sid_chip_base(1));
    }

    #[test]
    fn second_sid_address_out_of_range_is_invalid() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x03;
        data[SECONDSIDADDRESS] = 0x80;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0, tune.info().sid_chip_base(1));
    }

    #[test]
    fn third_sid_address_ok() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x04;
        data[SECONDSIDADDRESS] = 0x42;
        data[THIRDSIDADDRESS] = 0x50;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0xd500, tune.info().sid_chip_base(2));
    }

    #[test]
    fn third_sid_address_odd_is_invalid() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x04;
        data[SECONDSIDADDRESS] = 0x42;
        data[THIRDSIDADDRESS] = 0x43;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0, tune.info().sid_chip_base(2));
    }

    #[test]
    fn third_sid_address_out_of_range_is_invalid() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x04;
        data[SECONDSIDADDRESS] = 0x42;
        data[THIRDSIDADDRESS] = 0x80;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0, tune.info().sid_chip_base(2));
    }

    #[test]
    fn third_sid_address_equal_to_second_is_invalid() {
        let mut data = rsid_buffer();
        data[VERSION_LO] = 0x04;
        data[SECONDSIDADDRESS] = 0x42;
        data[THIRDSIDADDRESS] = 0x42;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0, tune.info().sid_chip_base(2));
    }

    #[test]
    fn rsid_songs_always_use_cia() {
        let data = rsid_buffer();
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(crate::Speed::Cia, tune.info().song_speed(1));
    }

    #[test]
    fn speed_bitmap_wraps_after_32_songs() {
        let mut data = [0u8; 0x7c + 2 + 64];
        data[0..4].copy_from_slice(b"PSID");
        data[5] = 0x02;
        data[7] = 0x7c;
        data[15] = 64; // songs
        data[17] = 1; // start song
        data[21] = 0x01; // speed bit 0: song 1 (and 33) use CIA
        data[0x7c] = 0x00; // embedded load address 0x1000
        data[0x7d] = 0x10;
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(crate::Speed::Cia, tune.info().song_speed(1));
        assert_eq!(crate::Speed::Vbi, tune.info().song_speed(2));
        assert_eq!(crate::Speed::Cia, tune.info().song_speed(33));
    }

    #[test]
    fn md5_is_stable_and_sensitive() {
        let data = rsid_buffer();
        let tune = SidTune::load(&data, None).unwrap();
        let first = tune.create_md5();
        assert_eq!(first, tune.create_md5());
        let mut changed = rsid_buffer();
        changed[126] = 0xea;
        let other = SidTune::load(&changed, None).unwrap();
        assert_ne!(first, other.create_md5());
        assert_ne!(tune.create_md5_new(), other.create_md5_new());
    }

    #[test]
    fn select_song_clamps_to_start_song() {
        let mut data = rsid_buffer();
        data[SONGS_LO] = 3;
        let mut tune = SidTune::load(&data, None).unwrap();
        assert_eq!(2, tune.select_song(2));
        assert_eq!(1, tune.select_song(0));
        assert_eq!(1, tune.select_song(7));
    }
}
