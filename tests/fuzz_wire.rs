//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#[macro_use] extern crate proptest;
extern crate dbus_wire;

use proptest::prelude::*;

use dbus_wire::de::{self, Config};
use dbus_wire::{ser, Array, Endianness, Message, Type, Value};

const SIGNATURES: &'static [&'static str] = &[
    "y", "b", "n", "q", "i", "u", "x", "t", "d", "h", "s", "o", "g", "v",
    "ay", "ax", "as", "a{sv}", "a{oa{sa{sv}}}", "(ybnqiuxtd)", "aaax",
    "a(aa{sv}as)", "(sa{sv}as)", "av", "()",
];

fn order() -> impl Strategy<Value = Endianness> {
    prop_oneof![Just(Endianness::Little), Just(Endianness::Big)]
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<u8>().prop_map(Value::Byte),
        any::<bool>().prop_map(Value::Boolean),
        any::<i16>().prop_map(Value::Int16),
        any::<u16>().prop_map(Value::UInt16),
        any::<i32>().prop_map(Value::Int32),
        any::<u32>().prop_map(Value::UInt32),
        any::<i64>().prop_map(Value::Int64),
        any::<u64>().prop_map(Value::UInt64),
        any::<u64>().prop_map(|bits| Value::Double(f64::from_bits(bits))),
        any::<u32>().prop_map(Value::UnixFd),
        "[^\\x00]{0,12}".prop_map(Value::String),
        "(/[A-Za-z0-9_]{1,6}){0,3}".prop_map(|path| {
            let path = if path.is_empty() { "/".to_owned() } else { path };
            Value::object_path(path).unwrap()
        }),
        prop::sample::select(SIGNATURES.to_vec())
            .prop_map(|sig| Value::signature(sig).unwrap()),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(5, 48, 4, |inner| prop_oneof![
        prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Struct),
        inner.clone().prop_map(Value::variant),
        (inner.clone(), 0usize..4).prop_filter_map(
            "array element type not valid", |(elem, n)| {
                let ty = elem.value_type();
                Array::from_values(ty, vec![elem; n]).ok().map(Value::Array)
            }),
        (leaf(), inner).prop_filter_map(
            "dict entry type too large", |(k, v)| {
                let ty = Type::dict_entry(k.value_type(), v.value_type());
                Array::from_values(ty, vec![Value::dict_entry(k, v)])
                    .ok().map(Value::Array)
            }),
    ])
}

fn message_bytes() -> impl Strategy<Value = Vec<u8>> {
    (prop::collection::vec(value(), 0..4), any::<u32>(), order())
        .prop_map(|(body, serial, order)| {
            let mut message = Message::signal(
                "/org/example/Obj", "org.example.Iface", "Changed").unwrap();
            message.set_serial(serial);
            message.set_body(Some(Value::Struct(body))).unwrap();
            message.to_bytes(order).unwrap()
        })
}

proptest! {
    #[test]
    fn values_round_trip(v in value(), order in order()) {
        let ty = v.value_type();
        let bytes = ser::to_bytes(Some(&v), order).unwrap();
        let decoded = de::from_bytes(&bytes, &ty, order, &Config::default());
        prop_assert_eq!(Some(v), decoded.ok());
    }

    #[test]
    fn messages_round_trip(bytes in message_bytes()) {
        let message = Message::from_bytes(&bytes).unwrap();
        let order = Endianness::from_marker(bytes[0]).unwrap();
        prop_assert_eq!(bytes, message.to_bytes(order).unwrap());
    }

    #[test]
    fn random_bytes_never_panic(
        bytes in prop::collection::vec(any::<u8>(), 0..512),
        sig in prop::sample::select(SIGNATURES.to_vec()),
        order in order(),
    ) {
        let _ = Message::from_bytes(&bytes);
        let ty: Type = sig.parse().unwrap();
        let _ = de::from_bytes(&bytes, &ty, order, &Config::default());
    }

    #[test]
    fn random_header_never_panics(
        kind in 0u8..6,
        flags in any::<u8>(),
        body_len in 0u32..64,
        fields_len in 0u32..256,
        rest in prop::collection::vec(any::<u8>(), 0..320),
    ) {
        // A plausible fixed header followed by garbage.
        let mut bytes = vec![b'l', kind, flags, 1];
        bytes.extend_from_slice(&[body_len as u8, 0, 0, 0]);
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        bytes.extend_from_slice(&[fields_len as u8, 0, 0, 0]);
        bytes.extend_from_slice(&rest);
        let _ = Message::from_bytes(&bytes);
    }

    #[test]
    fn truncated_messages_are_rejected(
        bytes in message_bytes(), cut in any::<prop::sample::Index>()
    ) {
        let n = cut.index(bytes.len());
        match Message::from_bytes(&bytes[..n]) {
            Err(de::Error::Truncated(..)) => (),
            r => prop_assert!(false, "unexpected result {:?}", r),
        }
    }

    #[test]
    fn corrupted_messages_never_panic(
        bytes in message_bytes(),
        at in any::<prop::sample::Index>(),
        xor in 1u8..,
    ) {
        let mut bytes = bytes;
        let i = at.index(bytes.len());
        bytes[i] ^= xor;
        let _ = Message::from_bytes(&bytes);
    }
}
