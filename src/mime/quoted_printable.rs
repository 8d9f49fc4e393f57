//-
// Copyright (c) 2026, the Mailsink authors
//
// This file is part of Mailsink.
//
// Mailsink is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailsink is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailsink. If not, see <http://www.gnu.org/licenses/>.

use std::borrow::Cow;

/// Decodes quoted-printable content, as described by RFC 2045.
///
/// Encoded bytes and soft line breaks are both handled, the latter by
/// discarding. UNIX line endings are accepted as well as DOS line endings.
///
/// This never fails. Invalid or truncated escapes are passed through
/// untransformed, as are 8-bit bytes.
pub fn qp_decode(s: &[u8]) -> Cow<'_, [u8]> {
    if !s.contains(&b'=') {
        return Cow::Borrowed(s);
    }

    let mut decoded = Vec::with_capacity(s.len());
    let mut ix = 0;
    while ix < s.len() {
        if b'=' != s[ix] {
            decoded.push(s[ix]);
            ix += 1;
            continue;
        }

        let escape = &s[ix + 1..];
        if escape.starts_with(b"\r\n") {
            ix += 3;
        } else if escape.starts_with(b"\n") {
            ix += 2;
        } else if let Some(byte) = escape.get(..2).and_then(hex_pair) {
            decoded.push(byte);
            ix += 3;
        } else {
            decoded.push(b'=');
            ix += 1;
        }
    }

    Cow::Owned(decoded)
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    Some(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?)
}

fn hex_digit(b: u8) -> Option<u8> {
    char::from(b).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn assert_qp(expected: &[u8], input: &[u8]) {
        assert_eq!(expected, &qp_decode(input)[..]);
    }

    #[test]
    fn test_qp_decode() {
        assert_qp(b"hello world", b"hello world");
        assert_qp(b"\xabfoo", b"=ABfoo");
        assert_qp(b"fo\xabo", b"fo=ABo");
        assert_qp(b"foo\xab", b"foo=ab");
        assert_qp(b"foo\xab\xcdbar", b"foo=AB=CDbar");

        assert_qp(b"foo", b"foo=\n");
        assert_qp(b"foobar", b"foo=\nbar");
        assert_qp(b"foobar", b"foo=\r\nbar");
        assert_qp(b"line\r\nnext", b"line\r\nnext");

        assert_qp(b"foo=()bar", b"foo=()bar");
        assert_qp(b"foo=\xabbar", b"foo==ABbar");
        assert_qp(b"foo=A\xabbar", b"foo=A=ABbar");
        assert_qp("foo=ゑbar".as_bytes(), "foo=ゑbar".as_bytes());

        assert_qp(b"foo=", b"foo=");
        assert_qp(b"foo=A", b"foo=A");
        assert_qp(b"foo=\r", b"foo=\r");
    }

    proptest! {
        #[test]
        fn qp_decode_never_fails(
            s in prop::collection::vec(prop::num::u8::ANY, 0..64)
        ) {
            qp_decode(&s);
        }

        #[test]
        fn qp_decode_is_identity_without_escapes(s in "[^=]*") {
            prop_assert_eq!(s.as_bytes(), &qp_decode(s.as_bytes())[..]);
        }
    }
}
