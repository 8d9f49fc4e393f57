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

//! Utilities for working with RFC 5322 header blocks and the MIME headers
//! which control how a body is interpreted.

use crate::support::error::Error;

/// One header field, after unfolding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A header block split away from the body that follows it.
#[derive(Clone, Debug)]
pub struct HeaderBlock<'a> {
    pub headers: Vec<Header>,
    pub body: &'a [u8],
}

impl HeaderBlock<'_> {
    /// Returns the value of the first header named `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Split `data` into its header block and body.
///
/// The header block ends at the first empty line; if there is none, the whole
/// input is headers and the body is empty. Folded header lines are joined by
/// dropping the line ending, per RFC 5322 section 2.2.3. Either DOS or UNIX
/// line endings are accepted.
///
/// Fails if a line in the header block is neither a field nor a continuation
/// of one.
pub fn split_header_block(data: &[u8]) -> Result<HeaderBlock<'_>, Error> {
    let mut headers = Vec::<Header>::new();
    let mut rest = data;

    while !rest.is_empty() {
        let line_len = memchr::memchr(b'\n', rest)
            .map(|ix| ix + 1)
            .unwrap_or(rest.len());
        let (line, tail) = rest.split_at(line_len);
        rest = tail;

        let line = strip_line_ending(line);
        if line.is_empty() {
            break;
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with([' ', '\t']) {
            let Some(last) = headers.last_mut() else {
                return Err(Error::MalformedMessage(
                    "continuation line before first header".to_owned(),
                ));
            };
            last.value.push_str(&line);
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::MalformedMessage(format!(
                "invalid header line {:?}",
                truncate(&line),
            )));
        };

        if !is_field_name(name) {
            return Err(Error::MalformedMessage(format!(
                "invalid header name {:?}",
                truncate(name),
            )));
        }

        headers.push(Header {
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    for header in &mut headers {
        let trimmed = header.value.trim();
        if trimmed.len() != header.value.len() {
            header.value = trimmed.to_owned();
        }
    }

    Ok(HeaderBlock {
        headers,
        body: rest,
    })
}

pub(super) fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// RFC 5322 3.6.8 "ftext": printable US-ASCII except colon
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b))
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(64) {
        Some((ix, _)) => &s[..ix],
        None => s,
    }
}

/// A parsed `Content-Type` header.
///
/// Type, subtype, and parameter names are all lower-cased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    pub typ: String,
    pub subtype: String,
    pub parms: Vec<(String, String)>,
}

impl ContentType {
    /// The RFC 2045 default for entities without a `Content-Type`.
    pub fn text_plain() -> Self {
        Self {
            typ: "text".to_owned(),
            subtype: "plain".to_owned(),
            parms: vec![("charset".to_owned(), "us-ascii".to_owned())],
        }
    }

    /// Parse a `Content-Type` value.
    ///
    /// Returns `None` if the value does not start with `type/subtype`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = split_parameters(value).into_iter();
        let media_type = segments.next()?;
        let (typ, subtype) = media_type.split_once('/')?;
        let (typ, subtype) = (typ.trim(), subtype.trim());
        if typ.is_empty()
            || subtype.is_empty()
            || typ.contains(char::is_whitespace)
            || subtype.contains(char::is_whitespace)
        {
            return None;
        }

        Some(Self {
            typ: typ.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parms: segments.filter_map(|s| parse_parameter(&s)).collect(),
        })
    }

    pub fn is_type(&self, typ: &str) -> bool {
        self.typ.eq_ignore_ascii_case(typ)
    }

    pub fn is_subtype(&self, subtype: &str) -> bool {
        self.subtype.eq_ignore_ascii_case(subtype)
    }

    /// `type/subtype`
    pub fn essence(&self) -> String {
        format!("{}/{}", self.typ, self.subtype)
    }

    pub fn parm(&self, name: &str) -> Option<&str> {
        self.parms
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }
}

/// Whether a `Content-Disposition` value marks its entity as an attachment.
pub fn is_attachment_disposition(value: &str) -> bool {
    split_parameters(value)
        .first()
        .is_some_and(|d| d.trim().eq_ignore_ascii_case("attachment"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentTransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
}

impl ContentTransferEncoding {
    /// Parse a `Content-Transfer-Encoding` value.
    ///
    /// Unknown encodings are treated as identity encodings, which amounts to
    /// passing the content through untouched.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("base64") {
            ContentTransferEncoding::Base64
        } else if value.eq_ignore_ascii_case("quoted-printable") {
            ContentTransferEncoding::QuotedPrintable
        } else if value.eq_ignore_ascii_case("8bit") {
            ContentTransferEncoding::EightBit
        } else if value.eq_ignore_ascii_case("binary") {
            ContentTransferEncoding::Binary
        } else {
            ContentTransferEncoding::SevenBit
        }
    }
}

/// Split a header value on `;`, except where the `;` is inside a quoted
/// string.
fn split_parameters(value: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            },
            '"' => {
                current.push(ch);
                in_quotes = !in_quotes;
            },
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    segments.push(current);
    segments
}

fn parse_parameter(segment: &str) -> Option<(String, String)> {
    let (name, value) = segment.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let value = value.trim();
    let value = match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(quoted) => {
            let mut unquoted = String::with_capacity(quoted.len());
            let mut chars = quoted.chars();
            while let Some(ch) = chars.next() {
                if '\\' == ch {
                    unquoted.extend(chars.next());
                } else {
                    unquoted.push(ch);
                }
            }
            unquoted
        },
        None => value.to_owned(),
    };

    Some((name.to_ascii_lowercase(), value))
}
