//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Specialised adapters for doing IO.
//!
//! `Sink` accumulates output and knows how to pad to an alignment and to
//! backfill a length once it is known. `Source` is a cursor over a byte
//! slice which never reads out of bounds and verifies that padding is zero.
//!
//! Offsets used for alignment are always relative to the start of the
//! underlying buffer, which for messages is the start of the message.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use de::{Error, Result};
use wire::{self, Endianness};

macro_rules! put_int {
    ($(#[$meta:meta])* fn $name:ident($t:ty, $n:expr) => $write:ident) => {
        $(#[$meta])*
        pub fn $name(&mut self, v: $t) {
            let mut b = [0u8; $n];
            match self.order {
                Endianness::Little => LittleEndian::$write(&mut b, v),
                Endianness::Big => BigEndian::$write(&mut b, v),
            }
            self.buf.extend_from_slice(&b);
        }
    }
}

macro_rules! get_int {
    ($(#[$meta:meta])* fn $name:ident() -> $t:ty, $n:expr, $read:ident) => {
        $(#[$meta])*
        pub fn $name(&mut self) -> Result<$t> {
            let b = self.take($n)?;
            Ok(match self.order {
                Endianness::Little => LittleEndian::$read(b),
                Endianness::Big => BigEndian::$read(b),
            })
        }
    }
}

/// An output buffer for encoding.
///
/// Multi-byte integers are written in the byte order given at construction.
/// None of the `put_*` methods align; callers call `pad_to` first.
#[derive(Debug, Clone)]
pub struct Sink {
    buf: Vec<u8>,
    order: Endianness,
}

impl Sink {
    /// Creates an empty sink writing in the given byte order.
    pub fn new(order: Endianness) -> Self {
        Sink { buf: Vec::new(), order: order }
    }

    /// Returns the byte order of this sink.
    pub fn order(&self) -> Endianness {
        self.order
    }

    /// Returns the number of bytes written so far.
    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    /// Writes zero bytes until the position is a multiple of `align`.
    pub fn pad_to(&mut self, align: usize) {
        let n = wire::padding(self.buf.len(), align);
        for _ in 0..n {
            self.buf.push(0);
        }
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    put_int!(
        /// Writes a 16-bit integer.
        fn put_u16(u16, 2) => write_u16);
    put_int!(
        /// Writes a 32-bit integer.
        fn put_u32(u32, 4) => write_u32);
    put_int!(
        /// Writes a 64-bit integer.
        fn put_u64(u64, 8) => write_u64);

    /// Writes raw bytes.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Writes a zeroed 32-bit placeholder and returns its offset, for use
    /// with `backfill_u32`.
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);
        at
    }

    /// Overwrites the 32-bit placeholder at `at` with `v`.
    ///
    /// Panics if `at` was not returned by `reserve_u32` on this sink.
    pub fn backfill_u32(&mut self, at: usize, v: u32) {
        let dst = &mut self.buf[at..at + 4];
        match self.order {
            Endianness::Little => LittleEndian::write_u32(dst, v),
            Endianness::Big => BigEndian::write_u32(dst, v),
        }
    }

    /// Returns the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Unwraps the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// A saved read limit, returned by `Source::enter_region`.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    limit: usize,
    nested: bool,
}

/// A bounds-checked cursor over encoded input.
///
/// Reads are restricted to the current limit, which starts at the end of
/// the data and is narrowed to the declared extent of each array being
/// decoded. Running past the end of the data is `Truncated`; running past
/// the end of an enclosing array is `Malformed`.
#[derive(Debug, Clone)]
pub struct Source<'a> {
    data: &'a [u8],
    pos: usize,
    limit: usize,
    nested: bool,
    order: Endianness,
}

impl<'a> Source<'a> {
    /// Creates a source reading `data` from the start.
    pub fn new(data: &'a [u8], order: Endianness) -> Self {
        Source::at(data, 0, order)
    }

    /// Creates a source reading `data` from offset `pos`, while still
    /// computing alignment relative to the start of `data`.
    ///
    /// An offset beyond the end of `data` is treated as the end.
    pub fn at(data: &'a [u8], pos: usize, order: Endianness) -> Self {
        Source {
            data: data,
            pos: pos.min(data.len()),
            limit: data.len(),
            nested: false,
            order: order,
        }
    }

    /// Returns the byte order of this source.
    pub fn order(&self) -> Endianness {
        self.order
    }

    /// Returns the current offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the number of bytes readable before the current limit.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    fn overrun(&self, n: usize) -> Error {
        if self.nested {
            Error::Malformed(self.pos, "value overruns the end of its array")
        } else {
            Error::Truncated(self.pos, n - self.remaining())
        }
    }

    /// Consumes and returns the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.overrun(n));
        }

        let b = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    /// Skips padding up to a multiple of `align`, failing if any padding
    /// byte is non-zero.
    pub fn align(&mut self, align: usize) -> Result<()> {
        let start = self.pos;
        let n = wire::padding(start, align);
        let pad = self.take(n)?;
        match pad.iter().position(|&b| 0 != b) {
            Some(i) => Err(Error::InvalidPadding(start + i)),
            None => Ok(()),
        }
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    get_int!(
        /// Reads a 16-bit integer.
        fn get_u16() -> u16, 2, read_u16);
    get_int!(
        /// Reads a 32-bit integer.
        fn get_u32() -> u32, 4, read_u32);
    get_int!(
        /// Reads a 64-bit integer.
        fn get_u64() -> u64, 8, read_u64);

    /// Restricts reads to the `len` bytes following the current position.
    ///
    /// Returns the previous limit, to be passed to `leave_region` once the
    /// region has been consumed.
    pub fn enter_region(&mut self, len: usize) -> Result<Region> {
        if len > self.remaining() {
            return Err(self.overrun(len));
        }

        let saved = Region { limit: self.limit, nested: self.nested };
        self.limit = self.pos + len;
        self.nested = true;
        Ok(saved)
    }

    /// Restores a limit saved by `enter_region`.
    pub fn leave_region(&mut self, saved: Region) {
        self.limit = saved.limit;
        self.nested = saved.nested;
    }
}

#[cfg(test)]
mod test {
    use de::Error;
    use test_helpers::parse;
    use wire::Endianness;
    use super::*;

    #[test]
    fn sink_pads_and_backfills() {
        let mut sink = Sink::new(Endianness::Little);
        sink.put_u8(1);
        sink.pad_to(4);
        let at = sink.reserve_u32();
        sink.put_u16(0x0102);
        sink.backfill_u32(at, 0xAABBCCDD);
        assert_eq!(parse("01 00 00 00 DD CC BB AA 02 01"), sink.into_bytes());

        let mut sink = Sink::new(Endianness::Big);
        sink.put_u16(0x0102);
        sink.pad_to(8);
        sink.put_u64(3);
        assert_eq!(parse("01 02 00 00 00 00 00 00 00 00 00 00 00 00 00 03"),
                   sink.into_bytes());
    }

    #[test]
    fn source_reads_in_order() {
        let data = parse("01 02 00 00 00 00 00 03");
        let mut src = Source::new(&data, Endianness::Big);
        assert_eq!(0x0102, src.get_u16().unwrap());
        src.align(4).unwrap();
        assert_eq!(3, src.get_u32().unwrap());
        assert_eq!(0, src.remaining());

        let mut src = Source::new(&data, Endianness::Little);
        assert_eq!(0x0201, src.get_u16().unwrap());
    }

    #[test]
    fn source_starting_past_the_end_is_empty() {
        let data = parse("01 02 03 04");
        let mut src = Source::at(&data, 10, Endianness::Little);
        assert_eq!(4, src.pos());
        assert_eq!(0, src.remaining());
        assert!(src.take(0).unwrap().is_empty());
        match src.get_u8() {
            Err(Error::Truncated(4, 1)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn source_rejects_nonzero_padding() {
        let data = parse("01 00 07 00 05 00 00 00");
        let mut src = Source::new(&data, Endianness::Little);
        src.get_u8().unwrap();
        match src.align(4) {
            Err(Error::InvalidPadding(2)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn source_reports_truncation() {
        let data = parse("01 02 03");
        let mut src = Source::new(&data, Endianness::Little);
        match src.get_u32() {
            Err(Error::Truncated(0, 1)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn source_regions_are_malformed_on_overrun() {
        let data = parse("01 02 03 04 05 06 07 08");
        let mut src = Source::at(&data, 2, Endianness::Little);
        let saved = src.enter_region(4).unwrap();
        assert_eq!(0x0403, src.get_u16().unwrap());
        match src.get_u32() {
            Err(Error::Malformed(4, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        src.leave_region(saved);
        assert_eq!(0x08070605, src.get_u32().unwrap());

        match src.enter_region(1) {
            Err(Error::Truncated(8, 1)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }
}
