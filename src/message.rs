//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Whole messages: the fixed header, the header field array and the body.
//!
//! On the wire a message is
//!
//! ```text
//! byte    order marker ('l' or 'B')
//! byte    message type
//! byte    flags
//! byte    protocol version (1)
//! uint32  body length
//! uint32  serial
//! a{yv}   header fields
//!         zero padding to a multiple of 8
//!         body, `body length` bytes
//! ```
//!
//! The body is the concatenation of the members of a tuple whose signature is
//! carried in the `SIGNATURE` header field.

use std::fmt;
use std::ops::BitOr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use de::{self, Config, Decoder};
use io::{Sink, Source};
use ser::{self, Encoder};
use signature::{self, Type};
use value::{self, Array, Signature, Value};
use wire::{self, Endianness};

/// The interface reserved for messages generated within a local
/// implementation, which may not appear in a signal on the wire.
pub const LOCAL_INTERFACE: &'static str = "org.freedesktop.DBus.Local";
/// The object path reserved for local use, which may not appear in a signal
/// on the wire.
pub const LOCAL_PATH: &'static str = "/org/freedesktop/DBus/Local";

const FIXED_HEADER_LEN: usize = 16;

/// The kind of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Not a valid message type. Messages of this type cannot be encoded.
    Invalid = 0,
    /// A method call.
    MethodCall = 1,
    /// A successful reply to a method call.
    MethodReturn = 2,
    /// An error reply to a method call.
    Error = 3,
    /// A signal emission.
    Signal = 4,
}

impl MessageType {
    /// Returns the code for this type on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a message type by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => MessageType::Invalid,
            1 => MessageType::MethodCall,
            2 => MessageType::MethodReturn,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            MessageType::Invalid => "INVALID",
            MessageType::MethodCall => "METHOD_CALL",
            MessageType::MethodReturn => "METHOD_RETURN",
            MessageType::Error => "ERROR",
            MessageType::Signal => "SIGNAL",
        })
    }
}

/// The flags byte of a message.
///
/// Bits without a defined meaning are preserved as-is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// The sender does not expect a reply.
    pub const NO_REPLY_EXPECTED: Flags = Flags(0x1);
    /// The bus should not start an owner for the destination name.
    pub const NO_AUTO_START: Flags = Flags(0x2);
    /// The sender is prepared to wait for interactive authorisation.
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Flags = Flags(0x4);

    /// Returns flags with no bits set.
    pub fn empty() -> Self {
        Flags(0)
    }

    /// Wraps a raw flags byte.
    pub fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    /// Returns the raw flags byte.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns whether all bits of `other` are set in `self`.
    pub fn contains(self, other: Flags) -> bool {
        other.0 == self.0 & other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

/// Identifies a header field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum HeaderField {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

impl HeaderField {
    /// Every header field, in ascending code order.
    pub const ALL: [HeaderField; 9] = [
        HeaderField::Path, HeaderField::Interface, HeaderField::Member,
        HeaderField::ErrorName, HeaderField::ReplySerial,
        HeaderField::Destination, HeaderField::Sender,
        HeaderField::Signature, HeaderField::UnixFds,
    ];

    /// Returns the code for this field on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a header field by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        if code >= 1 && code as usize <= HeaderField::ALL.len() {
            Some(HeaderField::ALL[code as usize - 1])
        } else {
            None
        }
    }

    /// Returns the type which values of this field must have.
    pub fn expected_type(self) -> Type {
        match self {
            HeaderField::Path => Type::ObjectPath,
            HeaderField::Interface | HeaderField::Member |
            HeaderField::ErrorName | HeaderField::Destination |
            HeaderField::Sender => Type::String,
            HeaderField::ReplySerial | HeaderField::UnixFds => Type::UInt32,
            HeaderField::Signature => Type::Signature,
        }
    }

    /// Returns the conventional upper-case name of this field.
    pub fn name(self) -> &'static str {
        match self {
            HeaderField::Path => "PATH",
            HeaderField::Interface => "INTERFACE",
            HeaderField::Member => "MEMBER",
            HeaderField::ErrorName => "ERROR_NAME",
            HeaderField::ReplySerial => "REPLY_SERIAL",
            HeaderField::Destination => "DESTINATION",
            HeaderField::Sender => "SENDER",
            HeaderField::Signature => "SIGNATURE",
            HeaderField::UnixFds => "UNIX_FDS",
        }
    }

    fn index(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Formats field names as "A", "A or B", "A, B or C".
fn join_fields(fields: &[HeaderField]) -> String {
    let mut s = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            s.push_str(if i + 1 == fields.len() { " or " } else { ", " });
        }
        s.push_str(field.name());
    }
    s
}

quick_error! {
    /// Ways in which a message can violate the rules for its type.
    #[derive(Debug, Clone, PartialEq)]
    pub enum ValidationError {
        /// The message type is `Invalid`.
        InvalidMessageType {
            description("type is INVALID")
            display("type is INVALID")
        }
        /// A field required by the message type is absent. Carries the full
        /// set of fields required for the type.
        MissingRequiredField(kind: MessageType,
                             required: &'static [HeaderField]) {
            description("required header field is missing")
            display("{} message: {} header field is missing",
                    kind, join_fields(required))
        }
        /// A field holds a value reserved for local use.
        ReservedValue(kind: MessageType, field: HeaderField, value: String) {
            description("header field uses a reserved value")
            display("{} message: The {} header field is using the reserved \
                     value {}", kind, field, value)
        }
        /// The `SIGNATURE` field holds something other than a signature.
        WrongSignatureHeaderType {
            description("signature header is not a signature")
            display("Signature header found but is not of type signature")
        }
        /// A header field other than `SIGNATURE` holds a value of the wrong
        /// type.
        WrongHeaderFieldType(field: HeaderField) {
            description("header field has the wrong type")
            display("{} header field is not of type {}",
                    field, field.expected_type())
        }
        /// The `SIGNATURE` field does not describe the body.
        SignatureMismatch(header: String, body: String) {
            description("signature header does not match the body")
            display("signature header {:?} does not match body signature {:?}",
                    header, body)
        }
        /// The body is not a struct.
        BodyNotTuple(found: Type) {
            description("message body is not a tuple")
            display("message body must be a tuple, not {}", found)
        }
        /// The member types of the body do not form a valid signature.
        InvalidBodySignature(err: value::Error) {
            description("message body has no valid signature")
            display("message body has no valid signature: {}", err)
            cause(err)
        }
    }
}

quick_error! {
    /// Errors produced when encoding a message.
    #[derive(Debug)]
    pub enum Error {
        /// The message violates the rules for its type.
        Validation(err: ValidationError) {
            description("invalid message")
            display("Cannot serialize message: {}", err)
            cause(err)
            from()
        }
        /// A header field or body value could not be encoded.
        Encode(err: ser::Error) {
            description("failed to encode message")
            display("Cannot serialize message: {}", err)
            cause(err)
            from()
        }
        /// The encoded message would exceed `wire::MAX_MESSAGE_LEN`.
        TooLarge(len: usize) {
            description("message too large")
            display("message of {} bytes exceeds the maximum of {}",
                    len, wire::MAX_MESSAGE_LEN)
        }
    }
}

/// A message.
///
/// Header fields are held in a table indexed by field; the `SIGNATURE`
/// field is maintained by `set_body`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    message_type: MessageType,
    flags: Flags,
    serial: u32,
    headers: [Option<Value>; 9],
    body: Option<Value>,
}

impl Default for Message {
    fn default() -> Self {
        Message::new()
    }
}

impl Message {
    /// Creates an empty message of type `Invalid`.
    pub fn new() -> Self {
        Message {
            message_type: MessageType::Invalid,
            flags: Flags::empty(),
            serial: 0,
            headers: Default::default(),
            body: None,
        }
    }

    /// Creates a method call.
    ///
    /// Fails if `path` is not a valid object path.
    pub fn method_call(destination: Option<&str>, path: &str,
                       interface: Option<&str>, member: &str)
                       -> value::Result<Self> {
        let mut message = Message::new();
        message.message_type = MessageType::MethodCall;
        message.set_destination(destination);
        message.set_path(Some(path))?;
        message.set_interface(interface);
        message.set_member(Some(member));
        Ok(message)
    }

    /// Creates a signal emission.
    ///
    /// Fails if `path` is not a valid object path.
    pub fn signal(path: &str, interface: &str, member: &str)
                  -> value::Result<Self> {
        let mut message = Message::new();
        message.message_type = MessageType::Signal;
        message.flags = Flags::NO_REPLY_EXPECTED;
        message.set_path(Some(path))?;
        message.set_interface(Some(interface));
        message.set_member(Some(member));
        Ok(message)
    }

    /// Creates an empty successful reply to `call`.
    pub fn method_return(call: &Message) -> Self {
        Message::reply_to(call, MessageType::MethodReturn)
    }

    /// Creates an error reply to `call` whose body is the single string
    /// `text`.
    pub fn error(call: &Message, name: &str, text: &str) -> Self {
        let mut message = Message::reply_to(call, MessageType::Error);
        message.set_error_name(Some(name));
        message.body = Some(Value::Struct(vec![text.into()]));
        message.set_header(HeaderField::Signature, Some(Value::Signature(
            Signature::from_trusted("s"))));
        message
    }

    fn reply_to(call: &Message, message_type: MessageType) -> Self {
        let mut message = Message::new();
        message.message_type = message_type;
        message.flags = Flags::NO_REPLY_EXPECTED;
        message.set_reply_serial(Some(call.serial));
        message.set_header(HeaderField::Destination,
                           call.header(HeaderField::Sender).cloned());
        message
    }

    /// Returns the message type.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Sets the message type.
    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_type = message_type;
    }

    /// Returns the flags.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Sets the flags.
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Returns the serial. Zero means no serial has been assigned yet.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Sets the serial.
    pub fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    /// Returns the value of the given header field, if set.
    pub fn header(&self, field: HeaderField) -> Option<&Value> {
        self.headers[field.index()].as_ref()
    }

    /// Sets or clears a header field.
    ///
    /// No type checking is done here; a value of the wrong type is reported
    /// by `validate`.
    pub fn set_header(&mut self, field: HeaderField, value: Option<Value>) {
        self.headers[field.index()] = value;
    }

    fn header_str(&self, field: HeaderField) -> Option<&str> {
        self.header(field).and_then(Value::as_str)
    }

    fn set_header_str(&mut self, field: HeaderField, s: Option<&str>) {
        self.set_header(field, s.map(Value::from));
    }

    /// Returns the `PATH` header.
    pub fn path(&self) -> Option<&str> {
        self.header_str(HeaderField::Path)
    }

    /// Sets the `PATH` header, failing if it is not a valid object path.
    pub fn set_path(&mut self, path: Option<&str>) -> value::Result<()> {
        let value = match path {
            Some(path) => Some(Value::object_path(path)?),
            None => None,
        };
        self.set_header(HeaderField::Path, value);
        Ok(())
    }

    /// Returns the `INTERFACE` header.
    pub fn interface(&self) -> Option<&str> {
        self.header_str(HeaderField::Interface)
    }

    /// Sets the `INTERFACE` header.
    pub fn set_interface(&mut self, interface: Option<&str>) {
        self.set_header_str(HeaderField::Interface, interface);
    }

    /// Returns the `MEMBER` header.
    pub fn member(&self) -> Option<&str> {
        self.header_str(HeaderField::Member)
    }

    /// Sets the `MEMBER` header.
    pub fn set_member(&mut self, member: Option<&str>) {
        self.set_header_str(HeaderField::Member, member);
    }

    /// Returns the `ERROR_NAME` header.
    pub fn error_name(&self) -> Option<&str> {
        self.header_str(HeaderField::ErrorName)
    }

    /// Sets the `ERROR_NAME` header.
    pub fn set_error_name(&mut self, name: Option<&str>) {
        self.set_header_str(HeaderField::ErrorName, name);
    }

    /// Returns the `REPLY_SERIAL` header.
    pub fn reply_serial(&self) -> Option<u32> {
        self.header(HeaderField::ReplySerial).and_then(Value::as_u32)
    }

    /// Sets the `REPLY_SERIAL` header.
    pub fn set_reply_serial(&mut self, serial: Option<u32>) {
        self.set_header(HeaderField::ReplySerial, serial.map(Value::UInt32));
    }

    /// Returns the `DESTINATION` header.
    pub fn destination(&self) -> Option<&str> {
        self.header_str(HeaderField::Destination)
    }

    /// Sets the `DESTINATION` header.
    pub fn set_destination(&mut self, destination: Option<&str>) {
        self.set_header_str(HeaderField::Destination, destination);
    }

    /// Returns the `SENDER` header.
    pub fn sender(&self) -> Option<&str> {
        self.header_str(HeaderField::Sender)
    }

    /// Sets the `SENDER` header.
    pub fn set_sender(&mut self, sender: Option<&str>) {
        self.set_header_str(HeaderField::Sender, sender);
    }

    /// Returns the `SIGNATURE` header, if set to a signature.
    pub fn signature(&self) -> Option<&str> {
        match self.header(HeaderField::Signature) {
            Some(&Value::Signature(ref sig)) => Some(sig.as_str()),
            _ => None,
        }
    }

    /// Returns the `UNIX_FDS` header.
    pub fn unix_fds(&self) -> Option<u32> {
        self.header(HeaderField::UnixFds).and_then(Value::as_u32)
    }

    /// Sets the `UNIX_FDS` header.
    pub fn set_unix_fds(&mut self, count: Option<u32>) {
        self.set_header(HeaderField::UnixFds, count.map(Value::UInt32));
    }

    /// Returns the body, which is always a non-empty struct if present.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Sets the body and the `SIGNATURE` header to match.
    ///
    /// The body must be a struct. An empty struct is the same as no body,
    /// and leaves no `SIGNATURE` header.
    pub fn set_body(&mut self, body: Option<Value>)
                    -> Result<(), ValidationError> {
        let members = match body {
            None => Vec::new(),
            Some(Value::Struct(members)) => members,
            Some(other) =>
                return Err(ValidationError::BodyNotTuple(other.value_type())),
        };

        if members.is_empty() {
            self.body = None;
            self.set_header(HeaderField::Signature, None);
        } else {
            let types: Vec<Type> =
                members.iter().map(Value::value_type).collect();
            let sig = Signature::from_types(&types)
                .map_err(ValidationError::InvalidBodySignature)?;
            self.body = Some(Value::Struct(members));
            self.set_header(HeaderField::Signature,
                            Some(Value::Signature(sig)));
        }
        Ok(())
    }

    fn body_members(&self) -> &[Value] {
        self.body.as_ref().and_then(Value::as_struct).unwrap_or(&[])
    }

    /// Checks that this message satisfies the rules for its type.
    ///
    /// | Type          | Required fields               |
    /// |---------------|-------------------------------|
    /// | METHOD_CALL   | PATH, MEMBER                  |
    /// | METHOD_RETURN | REPLY_SERIAL                  |
    /// | ERROR         | REPLY_SERIAL, ERROR_NAME      |
    /// | SIGNAL        | PATH, INTERFACE, MEMBER       |
    ///
    /// Signals may not use `LOCAL_INTERFACE` or `LOCAL_PATH`. Every field
    /// must have its expected type, and `SIGNATURE` must describe the body.
    pub fn validate(&self) -> Result<(), ValidationError> {
        const METHOD_CALL: &'static [HeaderField] =
            &[HeaderField::Path, HeaderField::Member];
        const METHOD_RETURN: &'static [HeaderField] =
            &[HeaderField::ReplySerial];
        const ERROR: &'static [HeaderField] =
            &[HeaderField::ReplySerial, HeaderField::ErrorName];
        const SIGNAL: &'static [HeaderField] =
            &[HeaderField::Path, HeaderField::Interface, HeaderField::Member];

        let required = match self.message_type {
            MessageType::Invalid =>
                return Err(ValidationError::InvalidMessageType),
            MessageType::MethodCall => METHOD_CALL,
            MessageType::MethodReturn => METHOD_RETURN,
            MessageType::Error => ERROR,
            MessageType::Signal => SIGNAL,
        };

        for &field in &HeaderField::ALL {
            if let Some(value) = self.header(field) {
                if value.value_type() != field.expected_type() {
                    return Err(if HeaderField::Signature == field {
                        ValidationError::WrongSignatureHeaderType
                    } else {
                        ValidationError::WrongHeaderFieldType(field)
                    });
                }
            }
        }

        if required.iter().any(|&field| self.header(field).is_none()) {
            return Err(ValidationError::MissingRequiredField(
                self.message_type, required));
        }

        if MessageType::Signal == self.message_type {
            if Some(LOCAL_INTERFACE) == self.interface() {
                return Err(ValidationError::ReservedValue(
                    self.message_type, HeaderField::Interface,
                    LOCAL_INTERFACE.to_owned()));
            }
            if Some(LOCAL_PATH) == self.path() {
                return Err(ValidationError::ReservedValue(
                    self.message_type, HeaderField::Path,
                    LOCAL_PATH.to_owned()));
            }
        }

        let header_sig = self.signature().unwrap_or("");
        let types: Vec<Type> =
            self.body_members().iter().map(Value::value_type).collect();
        let body_sig = signature::render_seq(&types);
        if header_sig != body_sig {
            return Err(ValidationError::SignatureMismatch(
                header_sig.to_owned(), body_sig));
        }

        Ok(())
    }

    /// Validates this message and encodes it in the given byte order.
    pub fn to_bytes(&self, order: Endianness) -> Result<Vec<u8>, Error> {
        let result = self.encode(order);
        if let Err(ref err) = result {
            debug!("refusing to encode {} message {}: {}",
                   self.message_type, self.serial, err);
        }
        result
    }

    fn encode(&self, order: Endianness) -> Result<Vec<u8>, Error> {
        self.validate()?;

        // The body starts 8-aligned, so encoding it separately yields the
        // same padding as encoding it in place.
        let body = ser::to_bytes_seq(self.body_members(), order)?;
        if body.len() > wire::MAX_MESSAGE_LEN {
            return Err(Error::TooLarge(body.len()));
        }

        let mut sink = Sink::new(order);
        sink.put_u8(order.marker());
        sink.put_u8(self.message_type.code());
        sink.put_u8(self.flags.bits());
        sink.put_u8(wire::PROTOCOL_VERSION);
        sink.put_u32(body.len() as u32);
        sink.put_u32(self.serial);

        let mut fields = Array::from_parts(
            Type::dict_entry(Type::Byte, Type::Variant), Vec::new());
        for &field in &HeaderField::ALL {
            if let Some(value) = self.header(field) {
                fields.push(Value::dict_entry(
                    Value::Byte(field.code()), Value::variant(value.clone())))
                    .map_err(|_| ValidationError::WrongHeaderFieldType(field))?;
            }
        }
        let mut encoder = Encoder::from_sink(sink);
        encoder.write(&Value::Array(fields))?;

        let mut sink = encoder.into_sink();
        sink.pad_to(8);
        sink.put_bytes(&body);

        let len = sink.pos();
        if len > wire::MAX_MESSAGE_LEN {
            return Err(Error::TooLarge(len));
        }
        trace!("encoded {} message {} in {} bytes",
               self.message_type, self.serial, len);
        Ok(sink.into_bytes())
    }

    /// Decodes a message with the default configuration.
    pub fn from_bytes(data: &[u8]) -> de::Result<Self> {
        Message::from_bytes_with_config(data, &Config::default())
    }

    /// Decodes a message which must occupy exactly all of `data`.
    ///
    /// The byte order is taken from the message itself. Header fields with
    /// unknown codes are skipped. The decoded message is checked with
    /// `validate`, failures being reported as `de::Error::Invalid`.
    pub fn from_bytes_with_config(data: &[u8], config: &Config)
                                  -> de::Result<Self> {
        let result = decode(data, config);
        if let Err(ref err) = result {
            debug!("rejecting message of {} bytes: {}", data.len(), err);
        }
        result
    }
}

/// Given at least the first 16 bytes of a message, returns the total size
/// of the message in bytes.
///
/// This allows a transport to determine how much to read before calling
/// `Message::from_bytes`.
pub fn bytes_needed(data: &[u8]) -> de::Result<usize> {
    if data.len() < FIXED_HEADER_LEN {
        return Err(de::Error::Truncated(
            data.len(), FIXED_HEADER_LEN - data.len()));
    }

    let (body_len, fields_len) = match Endianness::from_marker(data[0]) {
        Some(Endianness::Little) => (LittleEndian::read_u32(&data[4..8]),
                                     LittleEndian::read_u32(&data[12..16])),
        Some(Endianness::Big) => (BigEndian::read_u32(&data[4..8]),
                                  BigEndian::read_u32(&data[12..16])),
        None => return Err(de::Error::Malformed(0, "invalid byte order marker")),
    };

    let header_len = (FIXED_HEADER_LEN as u64 + fields_len as u64 + 7) & !7;
    let total = header_len + body_len as u64;
    if total > wire::MAX_MESSAGE_LEN as u64 {
        return Err(de::Error::Malformed(4, "message exceeds the maximum size"));
    }
    Ok(total as usize)
}

fn decode(data: &[u8], config: &Config) -> de::Result<Message> {
    let total = bytes_needed(data)?;
    if total > config.max_message_len {
        return Err(de::Error::Malformed(4, "message exceeds the maximum size"));
    }
    if data.len() < total {
        return Err(de::Error::Truncated(data.len(), total - data.len()));
    }
    if data.len() > total {
        return Err(de::Error::Malformed(total, "trailing bytes after message"));
    }

    let order = Endianness::from_marker(data[0]).ok_or(
        de::Error::Malformed(0, "invalid byte order marker"))?;
    let message_type = MessageType::from_code(data[1]).ok_or(
        de::Error::Malformed(1, "unknown message type"))?;
    let flags = Flags::from_bits(data[2]);
    if wire::PROTOCOL_VERSION != data[3] {
        return Err(de::Error::Malformed(3, "unsupported protocol version"));
    }

    let mut fixed = Source::at(&data[..FIXED_HEADER_LEN], 4, order);
    let body_len = fixed.get_u32()? as usize;
    let serial = fixed.get_u32()?;
    let body_start = total - body_len;

    let field_type = Type::array(Type::dict_entry(Type::Byte, Type::Variant));
    let mut decoder = Decoder::at(&data[..body_start], 12, order, config);
    let fields = decoder.read(&field_type)?;
    decoder.align(8)?;
    decoder.finish()?;

    let mut message = Message::new();
    message.message_type = message_type;
    message.flags = flags;
    message.serial = serial;

    let fields = match fields {
        Value::Array(fields) => fields.into_values(),
        _ => return Err(de::Error::Malformed(12, "header fields not an array")),
    };
    for entry in fields {
        let (code, value) = match entry {
            Value::DictEntry(k, v) => match (*k, *v) {
                (Value::Byte(code), Value::Variant(value)) => (code, *value),
                _ => return Err(de::Error::Malformed(
                    12, "header field is not a (byte, variant) pair")),
            },
            _ => return Err(de::Error::Malformed(
                12, "header field is not a (byte, variant) pair")),
        };
        store_header(&mut message, code, value)?;
    }

    let types = match message.header(HeaderField::Signature) {
        Some(&Value::Signature(ref sig)) => sig.types(),
        _ => Vec::new(),
    };
    if types.is_empty() && body_len > 0 {
        return Err(de::Error::Malformed(
            body_start, "message has a body but no signature"));
    }

    let mut decoder = Decoder::at(data, body_start, order, config);
    let mut members = Vec::with_capacity(types.len());
    for ty in &types {
        members.push(decoder.read(ty)?);
    }
    decoder.finish()?;
    if !members.is_empty() {
        message.body = Some(Value::Struct(members));
    }

    message.validate()?;
    trace!("decoded {} message {} of {} bytes",
           message.message_type, message.serial, total);
    Ok(message)
}

fn store_header(message: &mut Message, code: u8, value: Value)
                -> de::Result<()> {
    if 0 == code {
        return Err(de::Error::InvalidHeaderField(
            code, "field code 0 is invalid".to_owned()));
    }
    let field = match HeaderField::from_code(code) {
        Some(field) => field,
        None => {
            trace!("skipping unknown header field {}", code);
            return Ok(());
        },
    };

    let found = value.value_type();
    if found != field.expected_type() {
        return Err(de::Error::InvalidHeaderField(code, format!(
            "{} must be of type {}, not {}",
            field, field.expected_type(), found)));
    }
    if message.header(field).is_some() {
        return Err(de::Error::InvalidHeaderField(
            code, format!("{} occurs more than once", field)));
    }

    message.set_header(field, Some(value));
    Ok(())
}
