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

//! RFC 2047 "encoded words" in unstructured header fields such as `Subject`.

use std::borrow::Cow;

use encoding_rs::Encoding;
use lazy_static::lazy_static;
use regex::Regex;

use super::quoted_printable::qp_decode;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"^=\?([!->@-~]*)\?([!->@-~]*)\?([!->@-~]*)\?=$").unwrap();
}

/// Decode an unstructured header value, expanding any encoded words in it.
///
/// Whitespace between two adjacent encoded words is dropped, as RFC 2047
/// requires; all other whitespace is preserved. Words which look encoded but
/// cannot be decoded are left alone.
pub fn decode_unstructured(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    // Whitespace seen since the last word, held back in case the next word is
    // also an encoded word.
    let mut pending_space = String::new();
    let mut last_was_encoded = false;

    for token in split_keeping_whitespace(value) {
        if token.starts_with(char::is_whitespace) {
            pending_space.push_str(token);
            continue;
        }

        match ew_decode(token) {
            Some(text) => {
                if !last_was_encoded {
                    decoded.push_str(&pending_space);
                }
                decoded.push_str(&text);
                last_was_encoded = true;
            },
            None => {
                decoded.push_str(&pending_space);
                decoded.push_str(token);
                last_was_encoded = false;
            },
        }
        pending_space.clear();
    }

    decoded.push_str(&pending_space);
    decoded
}

/// Test if `word` (in its entirety) is an RFC 2047 encoded word, and decode
/// it if so.
///
/// Returns `None` if it is not an encoded word or could not be decoded. Words
/// longer than the 75 characters RFC 2047 allows are still accepted since
/// common clients produce and interpret them.
pub fn ew_decode(word: &str) -> Option<Cow<'_, str>> {
    let captures = ENCODED_WORD.captures(word)?;
    let charset = captures.get(1)?.as_str();
    let transfer_encoding = captures.get(2)?.as_str();
    let content = captures.get(3)?.as_str();

    let bytes: Vec<u8> = if transfer_encoding.eq_ignore_ascii_case("q") {
        // `_` stands for ASCII space regardless of charset
        let content = content.replace('_', " ");
        qp_decode(content.as_bytes()).into_owned()
    } else if transfer_encoding.eq_ignore_ascii_case("b") {
        base64::decode(content).ok()?
    } else {
        return None;
    };

    // RFC 2231 allows a language suffix on the charset, as in `utf-8*en`
    let charset = charset.split('*').next().unwrap_or(charset);
    let (text, _) = Encoding::for_label_no_replacement(charset.as_bytes())?
        .decode_with_bom_removal(&bytes);
    Some(Cow::Owned(text.into_owned()))
}

fn split_keeping_whitespace(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let want_space = first.is_whitespace();
        let end = rest
            .char_indices()
            .find(|&(_, c)| c.is_whitespace() != want_space)
            .map(|(ix, _)| ix)
            .unwrap_or(rest.len());
        let (token, tail) = rest.split_at(end);
        rest = tail;
        Some(token)
    })
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_ew_decode() {
        assert_eq!(None, ew_decode("hello world"));
        assert_eq!(None, ew_decode("=?utf-8?X?abc?="));
        assert_eq!(None, ew_decode("=?no-such-charset?Q?abc?="));

        // Examples from RFC 2047
        assert_eq!(
            "Keith Moore",
            ew_decode("=?US-ASCII?Q?Keith_Moore?=").unwrap()
        );
        assert_eq!(
            "Keld Jørn Simonsen",
            ew_decode("=?ISO-8859-1?Q?Keld_J=F8rn_Simonsen?=").unwrap()
        );
        assert_eq!("André", ew_decode("=?ISO-8859-1?Q?Andr=E9?=").unwrap());
        assert_eq!(
            "If you can read this yo",
            ew_decode("=?ISO-8859-1?B?SWYgeW91IGNhbiByZWFkIHRoaXMgeW8=?=")
                .unwrap()
        );
        assert_eq!("Grüße", ew_decode("=?utf-8*de?B?R3LDvMOfZQ==?=").unwrap());
    }

    #[test]
    fn test_decode_unstructured() {
        assert_eq!("Hi there", decode_unstructured("Hi there"));
        assert_eq!(
            "Re: André  x",
            decode_unstructured("Re: =?ISO-8859-1?Q?Andr=E9?=  x"),
        );
        // RFC 2047 section 8: space between encoded words disappears
        assert_eq!(
            "ab",
            decode_unstructured("=?ISO-8859-1?Q?a?= =?ISO-8859-1?Q?b?="),
        );
        assert_eq!(
            "a b",
            decode_unstructured("=?ISO-8859-1?Q?a_b?="),
        );
        assert_eq!(
            "=?bogus?Q?x?= y",
            decode_unstructured("=?bogus?Q?x?= y"),
        );
    }

    proptest! {
        #[test]
        fn ew_decode_never_panics(s in r"=\?.*\?.*\?.*\?=") {
            ew_decode(&s);
        }

        #[test]
        fn plain_text_is_unchanged(s in "[a-zA-Z0-9 ,.!]*") {
            prop_assert_eq!(s.clone(), decode_unstructured(&s));
        }
    }
}
