//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The in-memory value tree.
//!
//! A `Value` is always well-typed: the validated newtypes `ObjectPath` and
//! `Signature` can only hold text satisfying their grammars, and an `Array`
//! only accepts elements of its declared element type.

use std::fmt;
use std::ops::Deref;

use signature::{self, Type};

quick_error! {
    /// Errors produced when constructing a value that would not be
    /// well-typed.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// The text is not a valid object path.
        InvalidObjectPath(path: String) {
            description("invalid object path")
            display("invalid object path {:?}", path)
        }
        /// The text is not a valid type signature.
        InvalidSignature(err: signature::Error) {
            description("invalid type signature")
            display("{}", err)
            cause(err)
            from()
        }
        /// An element added to an array does not have the array's element
        /// type.
        ElementTypeMismatch(expected: Type, found: Type) {
            description("array element type mismatch")
            display("array of {} cannot hold a value of type {}",
                    expected, found)
        }
    }
}

/// The result type for value construction.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Returns whether `path` satisfies the object path grammar.
///
/// A path is either `/` alone, or one or more `/`-prefixed, non-empty
/// segments of ASCII letters, digits and underscores.
pub fn is_valid_object_path(path: &str) -> bool {
    if "/" == path {
        return true;
    }
    if !path.starts_with('/') {
        return false;
    }

    path[1..].split('/').all(|seg| {
        !seg.is_empty() &&
            seg.bytes().all(|b| b.is_ascii_alphanumeric() || b'_' == b)
    })
}

/// A string known to satisfy the object path grammar.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validates `path` and wraps it.
    pub fn new<S : Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        if is_valid_object_path(&path) {
            Ok(ObjectPath(path))
        } else {
            Err(Error::InvalidObjectPath(path))
        }
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the path into a `String`.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for ObjectPath {
    type Target = str;
    fn deref(&self) -> &str { &self.0 }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A string known to be a valid signature, i.e., a concatenation of zero or
/// more complete types within the length and nesting limits.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature(String);

impl Signature {
    /// Validates `sig` and wraps it.
    pub fn new<S : Into<String>>(sig: S) -> Result<Self> {
        let sig = sig.into();
        signature::parse(&sig)?;
        Ok(Signature(sig))
    }

    /// Builds the signature of the given sequence of types.
    ///
    /// Fails if the concatenation exceeds the signature length limit.
    pub fn from_types(types: &[Type]) -> Result<Self> {
        Signature::new(signature::render_seq(types))
    }

    /// Wraps text already known to be a valid signature.
    pub(crate) fn from_trusted(sig: &str) -> Self {
        Signature(sig.to_owned())
    }

    /// Returns the empty signature.
    pub fn empty() -> Self {
        Signature(String::new())
    }

    /// Parses this signature into its complete types.
    ///
    /// This cannot fail, since the text was validated on construction.
    pub fn types(&self) -> Vec<Type> {
        signature::parse(&self.0).unwrap_or_default()
    }

    /// Returns the signature as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Signature {
    type Target = str;
    fn deref(&self) -> &str { &self.0 }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A homogeneous array with an explicit element type, so that empty arrays
/// still know their type.
#[derive(Clone, Debug)]
pub struct Array {
    elem: Type,
    items: Vec<Value>,
}

impl Array {
    /// Creates an empty array of the given element type.
    ///
    /// Fails if an array of `elem` would not have a valid signature, e.g.
    /// because `elem` is a dict entry with a non-basic key, occupies no
    /// space, or is nested too deeply.
    pub fn new(elem: Type) -> Result<Self> {
        check_element_type(&elem)?;
        Ok(Array { elem: elem, items: Vec::new() })
    }

    /// Creates an array from the given items, all of which must have type
    /// `elem`.
    pub fn from_values(elem: Type, items: Vec<Value>) -> Result<Self> {
        check_element_type(&elem)?;
        for item in &items {
            check_element(&elem, item)?;
        }
        Ok(Array { elem: elem, items: items })
    }

    /// Wraps items already known to have type `elem`.
    pub(crate) fn from_parts(elem: Type, items: Vec<Value>) -> Self {
        Array { elem: elem, items: items }
    }

    /// Appends `item`, which must have the element type of this array.
    pub fn push(&mut self, item: Value) -> Result<()> {
        check_element(&self.elem, &item)?;
        self.items.push(item);
        Ok(())
    }

    /// Returns the declared element type.
    pub fn element_type(&self) -> &Type {
        &self.elem
    }

    /// Returns the elements.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Unwraps the elements.
    pub fn into_values(self) -> Vec<Value> {
        self.items
    }
}

fn check_element_type(elem: &Type) -> Result<()> {
    signature::parse_single(&Type::array(elem.clone()).signature())?;
    Ok(())
}

fn check_element(elem: &Type, item: &Value) -> Result<()> {
    let found = item.value_type();
    if *elem == found {
        Ok(())
    } else {
        Err(Error::ElementTypeMismatch(elem.clone(), found))
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Array) -> bool {
        self.elem == other.elem && self.items == other.items
    }
}

/// A typed value.
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    /// An index into the out-of-band file descriptor array.
    UnixFd(u32),
    /// A string. Must not contain NUL.
    String(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    Array(Array),
    /// A struct (tuple) of the given members.
    Struct(Vec<Value>),
    /// A key/value pair; only meaningful as an array element.
    DictEntry(Box<Value>, Box<Value>),
    /// A value carrying its own type.
    Variant(Box<Value>),
}

impl Value {
    /// Shorthand for `Value::DictEntry(Box::new(key), Box::new(value))`.
    pub fn dict_entry(key: Value, value: Value) -> Value {
        Value::DictEntry(Box::new(key), Box::new(value))
    }

    /// Shorthand for `Value::Variant(Box::new(inner))`.
    pub fn variant(inner: Value) -> Value {
        Value::Variant(Box::new(inner))
    }

    /// Validates `path` and wraps it in a value.
    pub fn object_path<S : Into<String>>(path: S) -> Result<Value> {
        ObjectPath::new(path).map(Value::ObjectPath)
    }

    /// Validates `sig` and wraps it in a value.
    pub fn signature<S : Into<String>>(sig: S) -> Result<Value> {
        Signature::new(sig).map(Value::Signature)
    }

    /// Returns the type of this value.
    pub fn value_type(&self) -> Type {
        match *self {
            Value::Byte(_) => Type::Byte,
            Value::Boolean(_) => Type::Boolean,
            Value::Int16(_) => Type::Int16,
            Value::UInt16(_) => Type::UInt16,
            Value::Int32(_) => Type::Int32,
            Value::UInt32(_) => Type::UInt32,
            Value::Int64(_) => Type::Int64,
            Value::UInt64(_) => Type::UInt64,
            Value::Double(_) => Type::Double,
            Value::UnixFd(_) => Type::UnixFd,
            Value::String(_) => Type::String,
            Value::ObjectPath(_) => Type::ObjectPath,
            Value::Signature(_) => Type::Signature,
            Value::Array(ref a) => Type::array(a.elem.clone()),
            Value::Struct(ref members) =>
                Type::Struct(members.iter().map(Value::value_type).collect()),
            Value::DictEntry(ref k, ref v) =>
                Type::dict_entry(k.value_type(), v.value_type()),
            Value::Variant(_) => Type::Variant,
        }
    }

    /// Returns the content if this is a string, object path or signature.
    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::String(ref s) => Some(s),
            Value::ObjectPath(ref p) => Some(p.as_str()),
            Value::Signature(ref s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the content if this is a `UInt32`.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::UInt32(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the members if this is a struct.
    pub fn as_struct(&self) -> Option<&[Value]> {
        match *self {
            Value::Struct(ref members) => Some(members),
            _ => None,
        }
    }
}

/// Structural equality. Doubles are compared by bit pattern, so a NaN is
/// equal to an identical NaN and `0.0` differs from `-0.0`.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use self::Value::*;

        match (self, other) {
            (&Byte(a), &Byte(b)) => a == b,
            (&Boolean(a), &Boolean(b)) => a == b,
            (&Int16(a), &Int16(b)) => a == b,
            (&UInt16(a), &UInt16(b)) => a == b,
            (&Int32(a), &Int32(b)) => a == b,
            (&UInt32(a), &UInt32(b)) => a == b,
            (&Int64(a), &Int64(b)) => a == b,
            (&UInt64(a), &UInt64(b)) => a == b,
            (&Double(a), &Double(b)) => a.to_bits() == b.to_bits(),
            (&UnixFd(a), &UnixFd(b)) => a == b,
            (&String(ref a), &String(ref b)) => a == b,
            (&ObjectPath(ref a), &ObjectPath(ref b)) => a == b,
            (&Signature(ref a), &Signature(ref b)) => a == b,
            (&Array(ref a), &Array(ref b)) => a == b,
            (&Struct(ref a), &Struct(ref b)) => a == b,
            (&DictEntry(ref ak, ref av), &DictEntry(ref bk, ref bv)) =>
                ak == bk && av == bv,
            (&Variant(ref a), &Variant(ref b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! from_scalar {
    ($($t:ty => $variant:ident,)*) => { $(
        impl From<$t> for Value {
            fn from(v: $t) -> Value { Value::$variant(v) }
        }
    )* }
}

from_scalar! {
    u8 => Byte,
    bool => Boolean,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f64 => Double,
    String => String,
    ObjectPath => ObjectPath,
    Signature => Signature,
    Array => Array,
}

impl<'a> From<&'a str> for Value {
    fn from(v: &'a str) -> Value { Value::String(v.to_owned()) }
}

/// Renders values in a compact, GVariant-like text form for diagnostics.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Byte(v) => write!(f, "0x{:02x}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "int16 {}", v),
            Value::UInt16(v) => write!(f, "uint16 {}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "uint32 {}", v),
            Value::Int64(v) => write!(f, "int64 {}", v),
            Value::UInt64(v) => write!(f, "uint64 {}", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::UnixFd(v) => write!(f, "handle {}", v),
            Value::String(ref s) => write!(f, "{:?}", s),
            Value::ObjectPath(ref p) => write!(f, "objectpath {:?}", p.as_str()),
            Value::Signature(ref s) => write!(f, "signature {:?}", s.as_str()),
            Value::Array(ref a) => {
                if a.is_empty() {
                    return write!(f, "@{} []", Type::array(a.elem.clone()));
                }
                f.write_str("[")?;
                for (i, item) in a.items.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            },
            Value::Struct(ref members) => {
                f.write_str("(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{}", m)?;
                }
                if 1 == members.len() { f.write_str(",")?; }
                f.write_str(")")
            },
            Value::DictEntry(ref k, ref v) => write!(f, "{{{}: {}}}", k, v),
            Value::Variant(ref inner) => write!(f, "<{}>", inner),
        }
    }
}
