//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Parse the given text into a binary value.
///
/// Whitespace is ignored, and `#` starts a comment running to the end of the
/// line, so wire layouts can be annotated field by field. Bytes are given in
/// hexadecimal. A single-quote causes all characters up through the next
/// single quote to be added verbatim as ASCII bytes.
pub fn parse(text: &str) -> Vec<u8> {
    fn hexit(c: char) -> u8 {
        match c.to_digit(16) {
            Some(n) => n as u8,
            None => panic!("Invalid hexit {:?}", c),
        }
    }

    let mut data = Vec::new();
    let mut chars = text.chars();
    while let Some(first) = chars.next() {
        if first.is_whitespace() {
            continue;
        } else if '#' == first {
            while let Some(c) = chars.next() {
                if '\n' == c { break; }
            }
        } else if '\'' == first {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(c) => data.push(c as u8),
                    None => panic!("Unterminated quote in {:?}", text),
                }
            }
        } else {
            let second = chars.next().expect("odd number of hexits");
            data.push((hexit(first) << 4) | hexit(second));
        }
    }

    data
}

/// Replaces every occurrence of `before` in `blob` with `after`, which must
/// have the same length.
pub fn replace(blob: &mut [u8], before: &[u8], after: &[u8]) {
    assert_eq!(before.len(), after.len());
    if blob.len() < before.len() {
        return;
    }

    for i in 0..(blob.len() - before.len() + 1) {
        if &blob[i..i + before.len()] == before {
            blob[i..i + before.len()].copy_from_slice(after);
        }
    }
}
