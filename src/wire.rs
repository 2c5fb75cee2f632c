//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Low-level definitions for working with the wire format.
//!
//! This holds the byte-order selection and the protocol limits shared by the
//! signature grammar, the encoder and the decoder. External code generally
//! only needs `Endianness` from here.

/// The maximum length of a type signature, in bytes.
pub const MAX_SIGNATURE_LEN: usize = 255;
/// The maximum number of arrays nested within one signature.
pub const MAX_ARRAY_NESTING: usize = 32;
/// The maximum number of structs and dict entries nested within one
/// signature.
pub const MAX_STRUCT_NESTING: usize = 32;
/// The maximum depth of containers (arrays, structs, dict entries and
/// variants combined) in a value tree.
///
/// This is the sum of the two signature nesting limits, so any value whose
/// type is a valid signature can be nested this far, but unwinding variants
/// cannot be used to go further.
pub const MAX_DEPTH: usize = MAX_ARRAY_NESTING + MAX_STRUCT_NESTING;
/// The maximum length in bytes of the element region of an array.
pub const MAX_ARRAY_LEN: u32 = 1 << 26;
/// The maximum length of a whole message, including headers.
pub const MAX_MESSAGE_LEN: usize = 1 << 27;
/// The only protocol major version understood.
pub const PROTOCOL_VERSION: u8 = 1;

/// The byte order used for multi-byte scalars.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endianness {
    /// Little-endian, marked with `l` on the wire.
    Little,
    /// Big-endian, marked with `B` on the wire.
    Big,
}

impl Endianness {
    /// Returns the byte used to mark this order in a message header.
    pub fn marker(self) -> u8 {
        match self {
            Endianness::Little => b'l',
            Endianness::Big => b'B',
        }
    }

    /// Parses a byte-order marker.
    pub fn from_marker(b: u8) -> Option<Self> {
        match b {
            b'l' => Some(Endianness::Little),
            b'B' => Some(Endianness::Big),
            _ => None,
        }
    }

    /// Returns the byte order of the host.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

impl Default for Endianness {
    fn default() -> Self {
        Endianness::native()
    }
}

/// Returns the number of padding bytes needed to bring `pos` to a multiple
/// of `align`, which must be a power of two.
#[inline]
pub fn padding(pos: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (align - (pos & (align - 1))) & (align - 1)
}

/// Rounds `pos` up to a multiple of `align`.
#[inline]
pub fn align_up(pos: usize, align: usize) -> usize {
    pos + padding(pos, align)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn padding_arithmetic() {
        assert_eq!(0, padding(0, 8));
        assert_eq!(7, padding(1, 8));
        assert_eq!(1, padding(7, 8));
        assert_eq!(0, padding(16, 8));
        assert_eq!(1, padding(3, 4));
        assert_eq!(0, padding(5, 1));
        assert_eq!(16, align_up(12, 8));
        assert_eq!(12, align_up(12, 4));
    }

    #[test]
    fn markers() {
        assert_eq!(b'l', Endianness::Little.marker());
        assert_eq!(b'B', Endianness::Big.marker());
        assert_eq!(Some(Endianness::Big), Endianness::from_marker(b'B'));
        assert_eq!(Some(Endianness::Little), Endianness::from_marker(b'l'));
        assert_eq!(None, Endianness::from_marker(b'b'));
    }

    #[test]
    fn depth_limit_covers_both_nesting_kinds() {
        assert_eq!(64, MAX_DEPTH);
    }
}
