//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The type signature grammar.
//!
//! A signature is a string of single-character type codes, where `a`, `(`
//! ... `)` and `{` ... `}` introduce containers. A "complete type" is one
//! scalar code or one whole container; a signature is a concatenation of
//! zero or more complete types.

use std::fmt;
use std::str::FromStr;

use wire::{MAX_ARRAY_NESTING, MAX_SIGNATURE_LEN, MAX_STRUCT_NESTING};

quick_error! {
    /// Errors produced when a string is not a valid type signature.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// The signature is syntactically invalid at the given byte offset.
        Malformed(pos: usize, reason: &'static str) {
            description("malformed type signature")
            display("malformed type signature at offset {}: {}", pos, reason)
        }
        /// Arrays or structs are nested more deeply than the protocol
        /// permits.
        TooDeep {
            description("type signature nested too deeply")
            display("type signature nested too deeply")
        }
        /// The signature is longer than `MAX_SIGNATURE_LEN` bytes.
        TooLong(len: usize) {
            description("type signature too long")
            display("type signature of {} bytes exceeds the maximum of {}",
                    len, MAX_SIGNATURE_LEN)
        }
    }
}

/// The result type for signature parsing.
pub type Result<T> = ::std::result::Result<T, Error>;

/// A type descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Type {
    Byte,
    Boolean,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    /// An index into the out-of-band file descriptor array.
    UnixFd,
    String,
    ObjectPath,
    Signature,
    /// An array of values of the contained type.
    Array(Box<Type>),
    /// A struct (tuple) of the given member types. May be empty.
    Struct(Vec<Type>),
    /// A key/value pair. Only valid as the element type of an array, and
    /// the key must be a basic type.
    DictEntry(Box<Type>, Box<Type>),
    /// A value carrying its own type.
    Variant,
}

impl Type {
    /// Shorthand for `Type::Array(Box::new(elem))`.
    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    /// Shorthand for `Type::DictEntry(Box::new(key), Box::new(value))`.
    pub fn dict_entry(key: Type, value: Type) -> Type {
        Type::DictEntry(Box::new(key), Box::new(value))
    }

    /// Returns the alignment, in bytes, of values of this type.
    pub fn alignment(&self) -> usize {
        match *self {
            Type::Byte | Type::Signature | Type::Variant => 1,
            Type::Int16 | Type::UInt16 => 2,
            Type::Boolean | Type::Int32 | Type::UInt32 | Type::UnixFd |
            Type::String | Type::ObjectPath | Type::Array(_) => 4,
            Type::Int64 | Type::UInt64 | Type::Double |
            Type::Struct(_) | Type::DictEntry(..) => 8,
        }
    }

    /// If values of this type always occupy the same number of bytes
    /// (excluding alignment padding), returns that size.
    ///
    /// Containers are always considered variable-size, even structs of
    /// fixed-size members, since the padding within them depends on where
    /// they start.
    pub fn fixed_size(&self) -> Option<usize> {
        match *self {
            Type::Byte => Some(1),
            Type::Int16 | Type::UInt16 => Some(2),
            Type::Boolean | Type::Int32 | Type::UInt32 | Type::UnixFd =>
                Some(4),
            Type::Int64 | Type::UInt64 | Type::Double => Some(8),
            _ => None,
        }
    }

    /// Returns whether this is a basic (non-container) type, which includes
    /// the string-like types. Only basic types may be dict entry keys.
    pub fn is_basic(&self) -> bool {
        match *self {
            Type::Array(_) | Type::Struct(_) |
            Type::DictEntry(..) | Type::Variant => false,
            _ => true,
        }
    }

    /// Returns whether values of this type occupy no bytes at all once
    /// aligned, i.e., it is a struct containing only such structs.
    pub fn is_zero_sized(&self) -> bool {
        match *self {
            Type::Struct(ref members) =>
                members.iter().all(Type::is_zero_sized),
            _ => false,
        }
    }

    /// Renders this type as signature text.
    pub fn signature(&self) -> String {
        let mut s = String::new();
        self.write_signature(&mut s);
        s
    }

    fn write_signature(&self, out: &mut String) {
        match *self {
            Type::Byte => out.push('y'),
            Type::Boolean => out.push('b'),
            Type::Int16 => out.push('n'),
            Type::UInt16 => out.push('q'),
            Type::Int32 => out.push('i'),
            Type::UInt32 => out.push('u'),
            Type::Int64 => out.push('x'),
            Type::UInt64 => out.push('t'),
            Type::Double => out.push('d'),
            Type::UnixFd => out.push('h'),
            Type::String => out.push('s'),
            Type::ObjectPath => out.push('o'),
            Type::Signature => out.push('g'),
            Type::Variant => out.push('v'),
            Type::Array(ref elem) => {
                out.push('a');
                elem.write_signature(out);
            },
            Type::Struct(ref members) => {
                out.push('(');
                for m in members {
                    m.write_signature(out);
                }
                out.push(')');
            },
            Type::DictEntry(ref k, ref v) => {
                out.push('{');
                k.write_signature(out);
                v.write_signature(out);
                out.push('}');
            },
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

impl FromStr for Type {
    type Err = Error;

    fn from_str(s: &str) -> Result<Type> {
        parse_single(s)
    }
}

/// Renders a single type as signature text.
pub fn render(ty: &Type) -> String {
    ty.signature()
}

/// Renders a sequence of types as the concatenation of their signatures.
pub fn render_seq(types: &[Type]) -> String {
    let mut s = String::new();
    for ty in types {
        ty.write_signature(&mut s);
    }
    s
}

/// Parses `text` into the sequence of complete types it contains.
///
/// The empty string is valid and yields no types.
pub fn parse(text: &str) -> Result<Vec<Type>> {
    if text.len() > MAX_SIGNATURE_LEN {
        return Err(Error::TooLong(text.len()));
    }

    let mut parser = Parser {
        text: text.as_bytes(),
        pos: 0,
        arrays: 0,
        structs: 0,
    };
    let mut types = Vec::new();
    while parser.pos < parser.text.len() {
        types.push(parser.complete_type()?);
    }
    Ok(types)
}

/// Parses `text`, which must contain exactly one complete type.
pub fn parse_single(text: &str) -> Result<Type> {
    let mut types = parse(text)?;
    match types.len() {
        1 => Ok(types.remove(0)),
        0 => Err(Error::Malformed(0, "expected one complete type, found none")),
        _ => Err(Error::Malformed(
            0, "expected one complete type, found several")),
    }
}

struct Parser<'a> {
    text: &'a [u8],
    pos: usize,
    /// Arrays currently open.
    arrays: usize,
    /// Structs and dict entries currently open.
    structs: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).cloned()
    }

    fn complete_type(&mut self) -> Result<Type> {
        let start = self.pos;
        let c = match self.peek() {
            Some(c) => c,
            None => return Err(Error::Malformed(start, "incomplete type")),
        };
        self.pos += 1;

        Ok(match c {
            b'y' => Type::Byte,
            b'b' => Type::Boolean,
            b'n' => Type::Int16,
            b'q' => Type::UInt16,
            b'i' => Type::Int32,
            b'u' => Type::UInt32,
            b'x' => Type::Int64,
            b't' => Type::UInt64,
            b'd' => Type::Double,
            b'h' => Type::UnixFd,
            b's' => Type::String,
            b'o' => Type::ObjectPath,
            b'g' => Type::Signature,
            b'v' => Type::Variant,
            b'a' => {
                self.arrays += 1;
                if self.arrays > MAX_ARRAY_NESTING {
                    return Err(Error::TooDeep);
                }
                let elem = if Some(b'{') == self.peek() {
                    self.pos += 1;
                    self.dict_entry()?
                } else {
                    self.complete_type()?
                };
                self.arrays -= 1;

                if elem.is_zero_sized() {
                    return Err(Error::Malformed(
                        start, "array element type occupies no space"));
                }
                Type::Array(Box::new(elem))
            },
            b'(' => {
                self.enter_struct()?;
                let mut members = Vec::new();
                loop {
                    match self.peek() {
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        },
                        Some(_) => members.push(self.complete_type()?),
                        None => return Err(Error::Malformed(
                            start, "unterminated struct")),
                    }
                }
                self.structs -= 1;
                Type::Struct(members)
            },
            b'{' => return Err(Error::Malformed(
                start, "dict entry outside of an array")),
            b')' | b'}' => return Err(Error::Malformed(
                start, "unbalanced closing bracket")),
            _ => return Err(Error::Malformed(start, "unknown type code")),
        })
    }

    fn enter_struct(&mut self) -> Result<()> {
        self.structs += 1;
        if self.structs > MAX_STRUCT_NESTING {
            Err(Error::TooDeep)
        } else {
            Ok(())
        }
    }

    /// Parses the body of a dict entry; the `{` has already been consumed.
    fn dict_entry(&mut self) -> Result<Type> {
        let start = self.pos - 1;
        self.enter_struct()?;

        if Some(b'}') == self.peek() {
            return Err(Error::Malformed(
                start, "dict entry needs a key and a value"));
        }
        let key = self.complete_type()?;
        if !key.is_basic() {
            return Err(Error::Malformed(
                start, "dict entry key must be a basic type"));
        }

        if Some(b'}') == self.peek() {
            return Err(Error::Malformed(
                start, "dict entry needs a key and a value"));
        }
        let value = self.complete_type()?;

        match self.peek() {
            Some(b'}') => self.pos += 1,
            Some(_) => return Err(Error::Malformed(
                start, "dict entry must hold exactly two types")),
            None => return Err(Error::Malformed(
                start, "unterminated dict entry")),
        }

        self.structs -= 1;
        Ok(Type::dict_entry(key, value))
    }
}
