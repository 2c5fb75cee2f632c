//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An encoder and decoder for the D-Bus wire format.
//!
//! Values are dynamically typed trees (`Value`) described by type signatures
//! (`Type`). `ser` turns values into bytes and `de` turns bytes back into
//! values given the expected type. `message` builds on both to assemble and
//! parse whole messages.
//!
//! ```
//! use dbus_wire::{Endianness, Message, Value};
//!
//! let mut msg = Message::signal("/org/example", "org.example.Iface",
//!                               "Changed").unwrap();
//! msg.set_serial(1);
//! msg.set_body(Some(Value::Struct(vec!["hi".into(), Value::Int32(-44)])))
//!     .unwrap();
//!
//! let bytes = msg.to_bytes(Endianness::Little).unwrap();
//! assert_eq!(msg, Message::from_bytes(&bytes).unwrap());
//! ```
//!
//! Decoding treats its input as untrusted. Malformed input of any kind
//! results in an error rather than a panic, and the resources spent on any
//! input are bounded by the limits in `wire` and `de::Config`.

#![deny(missing_docs)]

extern crate byteorder;
#[macro_use] extern crate log;
#[macro_use] extern crate quick_error;

#[cfg(test)] mod test_helpers;

pub mod wire;
pub mod io;
pub mod signature;
pub mod value;
pub mod ser;
pub mod de;
pub mod message;

pub use message::{bytes_needed, Flags, HeaderField, Message, MessageType};
pub use signature::Type;
pub use value::{Array, ObjectPath, Signature, Value};
pub use wire::Endianness;
