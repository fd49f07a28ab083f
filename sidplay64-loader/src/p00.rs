// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::LittleEndian;
use log::info;

use crate::info::{Compatibility, SidTuneInfo};
use crate::io::Reader;
use crate::{Error, Result, SidTune};

// PC64 container: a "C64File" signature, the original PETSCII file name,
// and a plain PRG payload.

const HEADER_SIG: &[u8; 8] = b"C64File\0";
const HEADER_SIZE: usize = 26;

pub fn is_p00(buffer: &[u8]) -> bool {
    buffer.len() > HEADER_SIZE && &buffer[0..8] == HEADER_SIG
}

pub fn load(buffer: &[u8]) -> Result<SidTune> {
    let mut reader = Reader::new(buffer);
    let _signature = reader.read_bytes(8)?;
    let filename = reader.read_string(17)?;
    let _record_size = reader.read_u8()?;
    let load_addr = reader.read_u16::<LittleEndian>()?;
    if reader.remaining() == 0 {
        return Err(Error::Truncated);
    }

    let mut info = SidTuneInfo::new("P00 (PC64)");
    info.load_addr = load_addr;
    info.init_addr = load_addr;
    info.compatibility = Compatibility::Basic;
    info.info_strings.push(filename);

    info!(target: "loader", "Loaded P00: offset 0x{:04x}", load_addr);

    Ok(SidTune::new(info, buffer.to_vec(), HEADER_SIZE + 2))
}

#[cfg(test)]
mod tests {
    use crate::{Compatibility, SidTune};

    fn p00_buffer() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"C64File\0");
        let mut name = [0u8; 17];
        name[..4].copy_from_slice(b"TUNE");
        data.extend_from_slice(&name);
        data.push(0); // record size
        data.extend_from_slice(&[0x01, 0x08]); // load address
        data.extend_from_slice(&[0x0b, 0x08, 0x0a, 0x00]);
        data
    }

    #[test]
    fn parses_header_and_payload() {
        let data = p00_buffer();
        let tune = SidTune::load(&data, None).unwrap();
        assert_eq!(0x0801, tune.info().load_addr);
        assert_eq!(Compatibility::Basic, tune.info().compatibility);
        assert_eq!("TUNE", tune.info().info_strings[0]);
        assert_eq!(&[0x0b, 0x08, 0x0a, 0x00], tune.c64_data());
    }
}
