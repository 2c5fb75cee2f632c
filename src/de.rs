//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Decoding of values from the wire format.
//!
//! The decoder is driven by a type descriptor; the bytes themselves carry no
//! type information except inside variants. Input is treated as untrusted:
//! every read is bounds-checked, padding must be zero, strings must be valid
//! UTF-8, and nesting is limited by `Config::max_depth`.

use std::fmt;
use std::str;

use io::Source;
use message::ValidationError;
use signature::{self, Type};
use value::{self, Array, ObjectPath, Signature, Value};
use wire::{self, Endianness};

quick_error! {
    /// Errors that can be produced during decoding.
    ///
    /// Positions are byte offsets into the buffer being decoded.
    #[derive(Debug)]
    pub enum Error {
        /// The input ended before the value did.
        Truncated(pos: usize, needed: usize) {
            description("input truncated")
            display("input truncated at offset {}: {} more byte(s) needed",
                    pos, needed)
        }
        /// A padding byte was not zero.
        InvalidPadding(pos: usize) {
            description("non-zero padding")
            display("non-zero padding byte at offset {}", pos)
        }
        /// A string or object path is not valid UTF-8.
        InvalidUtf8(pos: usize, err: str::Utf8Error) {
            description("invalid UTF-8")
            display("invalid UTF-8 in string at offset {}: {}", pos, err)
            cause(err)
        }
        /// An object path does not satisfy the object path grammar.
        InvalidObjectPath(pos: usize, path: String) {
            description("invalid object path")
            display("invalid object path {:?} at offset {}", path, pos)
        }
        /// A signature is not valid, or does not contain the number of
        /// complete types required where it occurs.
        InvalidSignature(pos: usize, err: signature::Error) {
            description("invalid signature")
            display("invalid signature at offset {}: {}", pos, err)
            cause(err)
        }
        /// Containers are nested more deeply than `Config::max_depth`.
        TooDeep(pos: usize) {
            description("recursion limit exceeded")
            display("recursion limit exceeded at offset {}", pos)
        }
        /// The input is structurally invalid.
        Malformed(pos: usize, what: &'static str) {
            description("malformed input")
            display("malformed input at offset {}: {}", pos, what)
        }
        /// A message header field has an invalid code, the wrong type, or
        /// occurs more than once.
        InvalidHeaderField(code: u8, what: String) {
            description("invalid header field")
            display("invalid header field {}: {}", code, what)
        }
        /// A decoded message violates the rules for its message type.
        Invalid(err: ValidationError) {
            description("message failed validation")
            display("invalid message: {}", err)
            cause(err)
            from()
        }
    }
}

/// The general result type returned by decoding functions.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Run-time configuration for decoding.
#[derive(Debug, Clone)]
pub struct Config {
    /// The maximum nesting of arrays, structs, dict entries and variants.
    ///
    /// The default is `wire::MAX_DEPTH`.
    pub max_depth: usize,
    /// The maximum length in bytes of the element region of any array.
    ///
    /// Every decoded element is held as a `Value`, so an array of small
    /// scalars takes many times its wire length in memory; a maximal `ay`
    /// needs a few GiB. Lower this (and `max_message_len`) when decoding
    /// untrusted input under a tight memory budget.
    ///
    /// The default is `wire::MAX_ARRAY_LEN`.
    pub max_array_len: u32,
    /// The maximum size of a whole message.
    ///
    /// The default is `wire::MAX_MESSAGE_LEN`.
    pub max_message_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: wire::MAX_DEPTH,
            max_array_len: wire::MAX_ARRAY_LEN,
            max_message_len: wire::MAX_MESSAGE_LEN,
        }
    }
}

/// Tracks contextual information during decoding.
///
/// This is used for controlling recursion depth and for describing where in
/// the value tree the decoder is when tracing.
///
/// `Context` objects are constructed on the stack and passed to nested
/// containers by reference.
///
/// A `Context` can be formatted with `Display` to show the path to the
/// current location, including both container kinds and offsets.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    /// The context for the container enclosing this one, if any.
    pub next: Option<&'a Context<'a>>,
    /// The kind of container being decoded at this level.
    pub what: &'static str,
    /// The offset at which this container starts.
    pub pos: usize,
    /// The number of containers enclosing this level.
    pub depth: usize,
    /// The configuration in effect.
    pub config: &'a Config,
}

impl<'a> Context<'a> {
    /// Returns a top-level context referencing the given config.
    pub fn top(config: &'a Config) -> Self {
        Context {
            next: None,
            what: "",
            pos: 0,
            depth: 0,
            config: config,
        }
    }

    /// Creates a context for a container nested in this one, provided it
    /// does not exceed the recursion limit.
    pub fn push(&'a self, what: &'static str, pos: usize)
                -> Result<Context<'a>> {
        if self.depth >= self.config.max_depth {
            Err(Error::TooDeep(pos))
        } else {
            Ok(Context {
                next: Some(self),
                what: what,
                pos: pos,
                depth: self.depth + 1,
                config: self.config,
            })
        }
    }
}

impl<'a> fmt::Display for Context<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref next) = self.next {
            write!(f, "{}.{}{{{}}}", next, self.what, self.pos)
        } else {
            write!(f, "{{{}}}", self.pos)
        }
    }
}

/// Decodes exactly one value of type `ty` occupying all of `data`.
pub fn from_bytes(data: &[u8], ty: &Type, order: Endianness,
                  config: &Config) -> Result<Value> {
    let mut decoder = Decoder::new(data, order, config);
    let value = decoder.read(ty)?;
    decoder.finish()?;
    Ok(value)
}

/// Decodes a sequence of values, such as a message body, occupying all of
/// `data`.
pub fn from_bytes_seq(data: &[u8], types: &[Type], order: Endianness,
                      config: &Config) -> Result<Vec<Value>> {
    let mut decoder = Decoder::new(data, order, config);
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        values.push(decoder.read(ty)?);
    }
    decoder.finish()?;
    Ok(values)
}

/// A type-directed decoder over a byte slice.
///
/// On error, the position of the decoder is unspecified and it should be
/// discarded.
#[derive(Debug)]
pub struct Decoder<'a> {
    src: Source<'a>,
    config: &'a Config,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder reading `data` from the start.
    pub fn new(data: &'a [u8], order: Endianness, config: &'a Config)
               -> Self {
        Decoder::at(data, 0, order, config)
    }

    /// Creates a decoder reading `data` from offset `pos`. Alignment is
    /// still computed relative to the start of `data`.
    pub fn at(data: &'a [u8], pos: usize, order: Endianness,
              config: &'a Config) -> Self {
        Decoder {
            src: Source::at(data, pos, order),
            config: config,
        }
    }

    /// Returns the current offset.
    pub fn pos(&self) -> usize {
        self.src.pos()
    }

    /// Skips zero padding up to a multiple of `align`.
    pub fn align(&mut self, align: usize) -> Result<()> {
        self.src.align(align)
    }

    /// Fails unless all input has been consumed.
    pub fn finish(&self) -> Result<()> {
        if 0 == self.src.remaining() {
            Ok(())
        } else {
            Err(Error::Malformed(self.src.pos(), "trailing bytes after value"))
        }
    }

    /// Decodes one value of type `ty` at top level.
    pub fn read(&mut self, ty: &Type) -> Result<Value> {
        let config = self.config;
        self.read_value(ty, &Context::top(config))
    }

    fn read_value(&mut self, ty: &Type, ctx: &Context) -> Result<Value> {
        self.src.align(ty.alignment())?;
        let pos = self.src.pos();
        trace!("decoding {} at {}", ty, ctx);

        Ok(match *ty {
            Type::Byte => Value::Byte(self.src.get_u8()?),
            Type::Boolean => match self.src.get_u32()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => return Err(Error::Malformed(
                    pos, "boolean is neither 0 nor 1")),
            },
            Type::Int16 => Value::Int16(self.src.get_u16()? as i16),
            Type::UInt16 => Value::UInt16(self.src.get_u16()?),
            Type::Int32 => Value::Int32(self.src.get_u32()? as i32),
            Type::UInt32 => Value::UInt32(self.src.get_u32()?),
            Type::Int64 => Value::Int64(self.src.get_u64()? as i64),
            Type::UInt64 => Value::UInt64(self.src.get_u64()?),
            Type::Double => Value::Double(f64::from_bits(self.src.get_u64()?)),
            Type::UnixFd => Value::UnixFd(self.src.get_u32()?),
            Type::String => Value::String(self.read_str()?.to_owned()),
            Type::ObjectPath => {
                let s = self.read_str()?;
                Value::ObjectPath(ObjectPath::new(s).map_err(
                    |_| Error::InvalidObjectPath(pos, s.to_owned()))?)
            },
            Type::Signature => {
                let text = self.read_signature_text()?;
                Value::Signature(Signature::new(text).map_err(|e| match e {
                    value::Error::InvalidSignature(err) =>
                        Error::InvalidSignature(pos, err),
                    _ => Error::Malformed(pos, "invalid signature"),
                })?)
            },
            Type::Array(ref elem) => self.read_array(elem, pos, ctx)?,
            Type::Struct(ref members) => {
                let sub = ctx.push("struct", pos)?;
                let mut values = Vec::with_capacity(members.len());
                for member in members {
                    values.push(self.read_value(member, &sub)?);
                }
                Value::Struct(values)
            },
            Type::DictEntry(..) => return Err(Error::Malformed(
                pos, "dict entry outside of an array")),
            Type::Variant => {
                let sub = ctx.push("variant", pos)?;
                let text = self.read_signature_text()?;
                let inner = signature::parse_single(text)
                    .map_err(|e| Error::InvalidSignature(pos, e))?;
                Value::Variant(Box::new(self.read_value(&inner, &sub)?))
            },
        })
    }

    /// Reads the length, content and terminator of a string or object path.
    fn read_str(&mut self) -> Result<&'a str> {
        let len = self.src.get_u32()? as usize;
        let start = self.src.pos();
        let bytes = self.src.take(len)?;
        self.expect_nul()?;

        if let Some(i) = bytes.iter().position(|&b| 0 == b) {
            return Err(Error::Malformed(start + i, "string contains NUL"));
        }
        str::from_utf8(bytes).map_err(|e| Error::InvalidUtf8(start, e))
    }

    /// Reads the length, content and terminator of a signature, without
    /// parsing it.
    fn read_signature_text(&mut self) -> Result<&'a str> {
        let len = self.src.get_u8()? as usize;
        let start = self.src.pos();
        let bytes = self.src.take(len)?;
        self.expect_nul()?;

        str::from_utf8(bytes).map_err(|e| Error::InvalidSignature(
            start, signature::Error::Malformed(e.valid_up_to(),
                                               "unknown type code")))
    }

    fn expect_nul(&mut self) -> Result<()> {
        let pos = self.src.pos();
        if 0 == self.src.get_u8()? {
            Ok(())
        } else {
            Err(Error::Malformed(pos, "missing NUL terminator"))
        }
    }

    fn read_array(&mut self, elem: &Type, pos: usize, ctx: &Context)
                  -> Result<Value> {
        let len = self.src.get_u32()?;
        if len > self.config.max_array_len {
            return Err(Error::Malformed(pos, "array length exceeds the limit"));
        }
        let sub = ctx.push("array", pos)?;

        if let Some(size) = elem.fixed_size() {
            if 0 != len as usize % size {
                return Err(Error::Malformed(
                    pos, "array length is not a multiple of its element size"));
            }
        }

        // The length excludes the padding to the first element, which is
        // present even when the array is empty.
        self.src.align(elem.alignment())?;
        let saved = self.src.enter_region(len as usize)?;
        let items = self.read_elements(elem, &sub);
        self.src.leave_region(saved);

        Ok(Value::Array(Array::from_parts(elem.clone(), items?)))
    }

    /// Reads elements until the current region is exhausted. Alignment
    /// between elements is consumed from within the region.
    fn read_elements(&mut self, elem: &Type, ctx: &Context)
                     -> Result<Vec<Value>> {
        // The region is known to lie within the input, so this is bounded
        // by the input size.
        let mut items = match elem.fixed_size() {
            Some(size) => Vec::with_capacity(self.src.remaining() / size),
            None => Vec::new(),
        };
        while self.src.remaining() > 0 {
            let before = self.src.pos();
            let item = match *elem {
                Type::DictEntry(ref k, ref v) =>
                    self.read_dict_entry(k, v, ctx)?,
                _ => self.read_value(elem, ctx)?,
            };
            if self.src.pos() == before {
                return Err(Error::Malformed(
                    before, "array element occupies no space"));
            }
            items.push(item);
        }
        Ok(items)
    }

    fn read_dict_entry(&mut self, key: &Type, value: &Type, ctx: &Context)
                       -> Result<Value> {
        self.src.align(8)?;
        let pos = self.src.pos();
        let sub = ctx.push("dict_entry", pos)?;
        if !key.is_basic() {
            return Err(Error::Malformed(
                pos, "dict entry key is not a basic type"));
        }

        let k = self.read_value(key, &sub)?;
        let v = self.read_value(value, &sub)?;
        Ok(Value::dict_entry(k, v))
    }
}

#[cfg(test)]
mod test {
    use std::iter;

    use byteorder::{ByteOrder, LittleEndian};

    use signature::{parse, parse_single, Type};
    use test_helpers::{parse as hex, replace};
    use value::{Array, Value};
    use wire::Endianness;
    use super::*;

    fn decode(data: &[u8], sig: &str) -> Result<Value> {
        from_bytes(data, &parse_single(sig).unwrap(), Endianness::Little,
                   &Config::default())
    }

    #[test]
    fn decodes_scalars_in_both_orders() {
        let le = hex("2a 00 00 00 d4 ff ff ff 00 00 00 00 00 40 45 40");
        let be = hex("2a 00 00 00 ff ff ff d4 40 45 40 00 00 00 00 00");
        let types = parse("yid").unwrap();
        let expected = vec![Value::Byte(42), Value::Int32(-44),
                            Value::Double(42.5)];
        assert_eq!(expected, from_bytes_seq(&le, &types, Endianness::Little,
                                            &Config::default()).unwrap());
        assert_eq!(expected, from_bytes_seq(&be, &types, Endianness::Big,
                                            &Config::default()).unwrap());
    }

    #[test]
    fn decodes_tuple_body() {
        let data = hex("02 00 00 00 'hi' 00 00 \
                        d4 ff ff ff 00 00 00 00 \
                        00 00 00 00 00 40 45 40");
        assert_eq!(Value::Struct(vec!["hi".into(), Value::Int32(-44),
                                      Value::Double(42.5)]),
                   decode(&data, "(sid)").unwrap());
    }

    #[test]
    fn booleans_must_be_zero_or_one() {
        assert_eq!(Value::Boolean(true), decode(&hex("01 00 00 00"), "b")
                   .unwrap());
        match decode(&hex("02 00 00 00"), "b") {
            Err(Error::Malformed(0, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn padding_must_be_zero() {
        match decode(&hex("01 00 01 00 05 00 00 00"), "(yi)") {
            Err(Error::InvalidPadding(2)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn strings_are_validated() {
        match decode(&hex("02 00 00 00 'a' ff 00"), "s") {
            Err(Error::InvalidUtf8(4, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        match decode(&hex("02 00 00 00 'a' 00 00"), "s") {
            Err(Error::Malformed(5, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        match decode(&hex("02 00 00 00 'ab' 01"), "s") {
            Err(Error::Malformed(6, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        match decode(&hex("03 00 00 00 '/a ' 00"), "o") {
            Err(Error::InvalidObjectPath(0, ref p)) if "/a " == p => (),
            r => panic!("unexpected result {:?}", r),
        }
        match decode(&hex("02 'a{' 00"), "g") {
            Err(Error::InvalidSignature(0, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn huge_string_length_is_truncation() {
        match decode(&hex("ff ff ff ff 'abc'"), "s") {
            Err(Error::Truncated(4, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn variant_signature_must_be_one_complete_type() {
        for data in &[hex("00 00"), hex("02 'bb' 00 00 00 00 00 00 00 00 00"),
                      hex("04 'd' 00 00 'F' 00")] {
            match decode(data, "v") {
                Err(Error::InvalidSignature(..)) => (),
                r => panic!("unexpected result {:?}", r),
            }
        }

        assert_eq!(Value::variant(Value::Byte(0xcc)),
                   decode(&hex("01 'y' 00 cc"), "v").unwrap());
    }

    #[test]
    fn empty_arrays_still_consume_leading_padding() {
        // ax at offset 0: length, then padding to 8 for the (absent) first
        // element.
        assert_eq!(Value::Array(Array::new(Type::Int64).unwrap()),
                   decode(&hex("00 00 00 00 00 00 00 00"), "ax").unwrap());
        match decode(&hex("00 00 00 00"), "ax") {
            Err(Error::Truncated(4, 4)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn array_of_empty_arrays_counts_every_element() {
        let data = hex("14 00 00 00 \
                        00 00 00 00 \
                        00 00 00 00 00 00 00 00 \
                        00 00 00 00 00 00 00 00");
        match decode(&data, "aax").unwrap() {
            Value::Array(ref a) => {
                assert_eq!(3, a.len());
                let empty = Value::Array(Array::new(Type::Int64).unwrap());
                for item in a.items() {
                    assert_eq!(&empty, item);
                }
            },
            v => panic!("unexpected value {:?}", v),
        }
    }

    #[test]
    fn partial_element_at_array_end_is_malformed() {
        // Declares 6 bytes of int32 elements.
        match decode(&hex("06 00 00 00 00 00 00 00 01 00 00 00 02 00"),
                     "a(i)") {
            Err(Error::Malformed(..)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        // A string whose length runs past the end of its array.
        match decode(&hex("08 00 00 00 05 00 00 00 'abc' 00 00 00"), "as") {
            Err(Error::Malformed(..)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn fixed_size_array_length_must_divide() {
        match decode(&hex("03 00 00 00 01 00 00"), "ai") {
            Err(Error::Malformed(0, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn array_length_limit() {
        let config = Config { max_array_len: 4, .. Config::default() };
        let data = hex("08 00 00 00 01 00 00 00 02 00 00 00");
        match from_bytes(&data, &parse_single("ai").unwrap(),
                         Endianness::Little, &config) {
            Err(Error::Malformed(0, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn large_byte_arrays_respect_the_configured_limit() {
        let len = 1 << 20;
        let mut data = vec![0u8; 4 + len];
        LittleEndian::write_u32(&mut data[..4], len as u32);
        let ay = parse_single("ay").unwrap();

        match from_bytes(&data, &ay, Endianness::Little,
                         &Config::default()).unwrap() {
            Value::Array(ref a) => assert_eq!(len, a.len()),
            v => panic!("unexpected value {:?}", v),
        }

        let config = Config { max_array_len: 1 << 16, .. Config::default() };
        match from_bytes(&data, &ay, Endianness::Little, &config) {
            Err(Error::Malformed(0, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn decoder_starting_past_the_end() {
        let data = hex("01 02 03 04");
        let config = Config::default();
        let mut decoder = Decoder::at(&data, 100, Endianness::Little, &config);
        match decoder.read(&Type::Byte) {
            Err(Error::Truncated(4, 1)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        decoder.finish().unwrap();
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        match decode(&hex("01 02"), "y") {
            Err(Error::Malformed(1, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn zero_sized_elements_do_not_loop() {
        let ty = Type::array(Type::Struct(vec![]));
        match from_bytes(&hex("08 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00"),
                         &ty, Endianness::Little, &Config::default()) {
            Err(Error::Malformed(8, _)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    fn nested_variants(n: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..n {
            data.extend_from_slice(&hex("01 'v' 00"));
        }
        data.extend_from_slice(&hex("01 'y' 00 cc"));
        data
    }

    #[test]
    fn variant_depth_limit() {
        // The outermost variant comes from the type; the data holds the
        // signatures of each further level.
        let ok = decode(&nested_variants(wire::MAX_DEPTH - 1), "v").unwrap();
        let mut depth = 0;
        let mut v = &ok;
        while let Value::Variant(ref inner) = *v {
            depth += 1;
            v = inner;
        }
        assert_eq!(wire::MAX_DEPTH, depth);
        assert_eq!(&Value::Byte(0xcc), v);

        match decode(&nested_variants(wire::MAX_DEPTH), "v") {
            Err(Error::TooDeep(_)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn depth_limit_is_configurable() {
        let config = Config { max_depth: 2, .. Config::default() };
        let ty = parse_single("aai").unwrap();
        let data = hex("04 00 00 00 00 00 00 00");
        from_bytes(&data, &ty, Endianness::Little, &config).unwrap();

        let ty = parse_single("aaai").unwrap();
        let data = hex("08 00 00 00 04 00 00 00 00 00 00 00");
        match from_bytes(&data, &ty, Endianness::Little, &config) {
            Err(Error::TooDeep(8)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn over_long_variant_signature() {
        let mut data = vec![0xec];
        data.extend(iter::repeat(b'a').take(0xeb));
        data.push(b'v');
        data.push(0);
        match decode(&data, "v") {
            Err(Error::InvalidSignature(0, signature::Error::TooDeep)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn patched_strings_fail() {
        let mut data = hex("10 00 00 00 'this is valid...' 00");
        assert!(decode(&data, "s").is_ok());
        replace(&mut data, b"this is valid...", b"this is invalid\xff");
        match decode(&data, "s") {
            Err(Error::InvalidUtf8(..)) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn context_display() {
        let config = Config::default();
        let top = Context::top(&config);
        let a = top.push("array", 16).unwrap();
        let v = a.push("variant", 24).unwrap();
        assert_eq!("{0}.array{16}.variant{24}", v.to_string());
        assert_eq!(2, v.depth);
    }
}
