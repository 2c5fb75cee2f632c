//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Encoding of values into the wire format.
//!
//! Every value is preceded by zero padding up to its type's alignment,
//! measured from the start of the buffer being written. For messages that
//! is the start of the message, so the header and body are written through
//! one `Sink`.

use io::Sink;
use signature::{self, Type};
use value::{is_valid_object_path, Array, Value};
use wire::{self, Endianness};

quick_error! {
    /// Errors produced when a value cannot be encoded.
    ///
    /// These indicate a value which was constructed in violation of the
    /// wire format's invariants; they never arise from well-formed values
    /// built through the checked constructors in `value`.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Error {
        /// An array element does not have the array's element type.
        ElementTypeMismatch(expected: Type, found: Type) {
            description("array element type mismatch")
            display("array of {} cannot hold a value of type {}",
                    expected, found)
        }
        /// A dict entry occurs somewhere other than as an array element.
        DictEntryOutsideArray {
            description("dict entry outside of an array")
        }
        /// An array's element type would occupy no bytes on the wire.
        ZeroSizedElement(elem: Type) {
            description("array element type occupies no space")
            display("array element type {} occupies no space", elem)
        }
        /// An object path does not satisfy the object path grammar.
        InvalidObjectPath(path: String) {
            description("invalid object path")
            display("invalid object path {:?}", path)
        }
        /// A signature, or the type of a variant's content, is not a valid
        /// signature.
        InvalidSignature(err: signature::Error) {
            description("invalid signature")
            display("invalid signature: {}", err)
            cause(err)
            from()
        }
        /// A string contains a NUL character.
        InvalidString {
            description("string contains NUL")
        }
        /// Containers are nested more than `wire::MAX_DEPTH` levels deep.
        TooDeep {
            description("value nested too deeply")
        }
        /// A string, signature or array exceeds its length limit.
        TooLong(what: &'static str, len: usize) {
            description("value too long")
            display("{} of {} bytes exceeds the wire limit", what, len)
        }
    }
}

/// The result type for encoding.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Encodes `value`, or nothing if `None`, in the given byte order.
pub fn to_bytes(value: Option<&Value>, order: Endianness) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(order);
    if let Some(value) = value {
        encoder.write(value)?;
    }
    Ok(encoder.into_bytes())
}

/// Encodes each value in `values` consecutively, as for a message body.
pub fn to_bytes_seq(values: &[Value], order: Endianness) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(order);
    for value in values {
        encoder.write(value)?;
    }
    Ok(encoder.into_bytes())
}

/// Writes values into a `Sink`.
///
/// If an error is returned, the contents of the sink are unspecified.
#[derive(Debug, Clone)]
pub struct Encoder {
    sink: Sink,
}

impl Encoder {
    /// Creates an encoder writing into a new buffer.
    pub fn new(order: Endianness) -> Self {
        Encoder::from_sink(Sink::new(order))
    }

    /// Creates an encoder which appends to `sink`. Alignment continues to be
    /// computed from the start of the sink.
    pub fn from_sink(sink: Sink) -> Self {
        Encoder { sink: sink }
    }

    /// Writes `value` at top level.
    pub fn write(&mut self, value: &Value) -> Result<()> {
        self.write_value(value, 0)
    }

    /// Returns the underlying sink.
    pub fn into_sink(self) -> Sink {
        self.sink
    }

    /// Returns the bytes written.
    pub fn into_bytes(self) -> Vec<u8> {
        self.sink.into_bytes()
    }

    fn write_value(&mut self, value: &Value, depth: usize) -> Result<()> {
        self.sink.pad_to(alignment(value));

        match *value {
            Value::Byte(v) => self.sink.put_u8(v),
            Value::Boolean(v) => self.sink.put_u32(v as u32),
            Value::Int16(v) => self.sink.put_u16(v as u16),
            Value::UInt16(v) => self.sink.put_u16(v),
            Value::Int32(v) => self.sink.put_u32(v as u32),
            Value::UInt32(v) => self.sink.put_u32(v),
            Value::Int64(v) => self.sink.put_u64(v as u64),
            Value::UInt64(v) => self.sink.put_u64(v),
            Value::Double(v) => self.sink.put_u64(v.to_bits()),
            Value::UnixFd(v) => self.sink.put_u32(v),
            Value::String(ref s) => self.write_str(s)?,
            Value::ObjectPath(ref p) => {
                if !is_valid_object_path(p) {
                    return Err(Error::InvalidObjectPath(p.to_string()));
                }
                self.write_str(p)?;
            },
            Value::Signature(ref s) => {
                signature::parse(s)?;
                self.write_signature(s)?;
            },
            Value::Array(ref a) => self.write_array(a, enter(depth)?)?,
            Value::Struct(ref members) => {
                let depth = enter(depth)?;
                for m in members {
                    self.write_value(m, depth)?;
                }
            },
            Value::DictEntry(..) => return Err(Error::DictEntryOutsideArray),
            Value::Variant(ref inner) => {
                let depth = enter(depth)?;
                let sig = inner.value_type().signature();
                signature::parse_single(&sig)?;
                self.write_signature(&sig)?;
                self.write_value(inner, depth)?;
            },
        }

        Ok(())
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(Error::InvalidString);
        }
        if s.len() > wire::MAX_MESSAGE_LEN {
            return Err(Error::TooLong("string", s.len()));
        }

        self.sink.put_u32(s.len() as u32);
        self.sink.put_bytes(s.as_bytes());
        self.sink.put_u8(0);
        Ok(())
    }

    fn write_signature(&mut self, s: &str) -> Result<()> {
        if s.len() > wire::MAX_SIGNATURE_LEN {
            return Err(Error::TooLong("signature", s.len()));
        }

        self.sink.put_u8(s.len() as u8);
        self.sink.put_bytes(s.as_bytes());
        self.sink.put_u8(0);
        Ok(())
    }

    fn write_array(&mut self, array: &Array, depth: usize) -> Result<()> {
        let elem = array.element_type();
        if elem.is_zero_sized() {
            return Err(Error::ZeroSizedElement(elem.clone()));
        }
        signature::parse_single(&Type::array(elem.clone()).signature())?;

        let len_at = self.sink.reserve_u32();
        // The padding to the first element is not part of the length, but
        // is written even if there are no elements.
        self.sink.pad_to(elem.alignment());
        let start = self.sink.pos();

        for item in array.items() {
            let found = item.value_type();
            if *elem != found {
                return Err(Error::ElementTypeMismatch(elem.clone(), found));
            }

            if let Value::DictEntry(ref k, ref v) = *item {
                self.sink.pad_to(8);
                let depth = enter(depth)?;
                self.write_value(k, depth)?;
                self.write_value(v, depth)?;
            } else {
                self.write_value(item, depth)?;
            }
        }

        let len = self.sink.pos() - start;
        if len > wire::MAX_ARRAY_LEN as usize {
            return Err(Error::TooLong("array", len));
        }
        self.sink.backfill_u32(len_at, len as u32);
        Ok(())
    }
}

fn enter(depth: usize) -> Result<usize> {
    if depth >= wire::MAX_DEPTH {
        Err(Error::TooDeep)
    } else {
        Ok(depth + 1)
    }
}

fn alignment(value: &Value) -> usize {
    match *value {
        Value::Byte(_) | Value::Signature(_) | Value::Variant(_) => 1,
        Value::Int16(_) | Value::UInt16(_) => 2,
        Value::Boolean(_) | Value::Int32(_) | Value::UInt32(_) |
        Value::UnixFd(_) | Value::String(_) | Value::ObjectPath(_) |
        Value::Array(_) => 4,
        Value::Int64(_) | Value::UInt64(_) | Value::Double(_) |
        Value::Struct(_) | Value::DictEntry(..) => 8,
    }
}
