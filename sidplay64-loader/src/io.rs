// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::ByteOrder;

use super::{Error, Result};

/// Cursor over a tune image.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16<T: ByteOrder>(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(T::read_u16(bytes))
    }

    pub fn read_u32<T: ByteOrder>(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(T::read_u32(bytes))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(Error::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Read a fixed-size NUL-padded ASCII field.
    pub fn read_string(&mut self, count: usize) -> Result<String> {
        let bytes = self.read_bytes(count)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(count);
        Ok(bytes[..end]
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '?'
                }
            })
            .collect())
    }
}
