// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::LittleEndian;
use log::info;

use crate::info::{Compatibility, SidTuneInfo};
use crate::io::Reader;
use crate::{Error, Result, SidTune};

// Raw program image: little endian load address followed by data. Treated as
// a BASIC program started with RUN.

pub fn load(buffer: &[u8]) -> Result<SidTune> {
    let mut reader = Reader::new(buffer);
    let load_addr = reader.read_u16::<LittleEndian>()?;
    if reader.remaining() == 0 {
        return Err(Error::Truncated);
    }

    let mut info = SidTuneInfo::new("PRG");
    info.load_addr = load_addr;
    info.init_addr = load_addr;
    info.compatibility = Compatibility::Basic;

    info!(target: "loader", "Loaded PRG: offset 0x{:04x}", load_addr);

    Ok(SidTune::new(info, buffer.to_vec(), 2))
}

#[cfg(test)]
mod tests {
    use crate::SidTune;

    #[test]
    fn parses_load_address() {
        let data = [0x01, 0x08, 0xea, 0xea];
        let tune = SidTune::load(&data, Some("prg")).unwrap();
        assert_eq!(0x0801, tune.info().load_addr);
        assert_eq!(&[0xea, 0xea], tune.c64_data());
    }
}
