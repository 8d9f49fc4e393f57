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

//! Reduction of a raw RFC 5322 message to the fields Mailsink stores.
//!
//! The message is walked as a tree of entities. Multipart entities are split
//! on their boundaries and recursed into; every leaf becomes a `Part`. Of the
//! inline leaves, the last `text/plain` and the last `text/html` are kept.

use std::borrow::Cow;

use encoding_rs::Encoding;

use super::encoded_word::decode_unstructured;
use super::header::{
    is_attachment_disposition, split_header_block, strip_line_ending,
    ContentTransferEncoding, ContentType, HeaderBlock,
};
use super::html::strip_html;
use super::quoted_printable::qp_decode;
use crate::support::error::Error;

/// Subject recorded for messages which do not have one.
pub const NO_SUBJECT: &str = "No Subject";

/// Multipart entities may not nest deeper than this.
const MAX_DEPTH: u32 = 16;

/// The fields extracted from one message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    pub subject: String,
    /// The plain-text body.
    ///
    /// If the message had no non-empty plain-text part, this is derived from
    /// the HTML body, or is empty if there is none.
    pub text_body: String,
    /// The HTML body, if the message had a non-empty HTML part.
    pub html_body: Option<String>,
}

/// A leaf entity of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    /// A part meant to be displayed as part of the message, with its content
    /// transfer-decoded and converted to UTF-8.
    Inline {
        content_type: ContentType,
        body: String,
    },
    /// A part with `Content-Disposition: attachment`. Its content is not
    /// retained.
    Attachment,
}

/// Decode the complete message in `raw`.
///
/// Fails with `Error::MalformedMessage` if the header block cannot be parsed
/// or a multipart entity is not properly delimited.
pub fn decode(raw: &[u8]) -> Result<DecodedMessage, Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::MalformedMessage("empty message".to_owned()));
    }

    let top = split_header_block(raw)?;
    let subject = top
        .get("Subject")
        .map(decode_unstructured)
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_owned());

    let mut parts = Vec::new();
    collect_parts(&top, 0, &mut parts)?;

    let mut text_body = None::<String>;
    let mut html_body = None::<String>;
    for part in parts {
        let Part::Inline { content_type, body } = part else {
            continue;
        };

        let essence = content_type.essence();
        if essence.starts_with("text/plain") {
            text_body = Some(body);
        } else if essence.starts_with("text/html") {
            html_body = Some(body);
        }
    }

    let html_body = html_body.filter(|h| !h.is_empty());
    let text_body = match text_body {
        Some(text) if !text.is_empty() => text,
        _ => html_body.as_deref().map(strip_html).unwrap_or_default(),
    };

    Ok(DecodedMessage {
        subject,
        text_body,
        html_body,
    })
}

/// Flatten the entity in `block` into its leaf parts, in document order.
pub fn collect_parts(
    block: &HeaderBlock<'_>,
    depth: u32,
    parts: &mut Vec<Part>,
) -> Result<(), Error> {
    let content_type = block
        .get("Content-Type")
        .and_then(ContentType::parse)
        .unwrap_or_else(ContentType::text_plain);

    if content_type.is_type("multipart") {
        if depth >= MAX_DEPTH {
            return Err(Error::MalformedMessage(
                "multipart entities nested too deeply".to_owned(),
            ));
        }

        let boundary = content_type
            .parm("boundary")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                Error::MalformedMessage(format!(
                    "{} without boundary",
                    content_type.essence(),
                ))
            })?;

        for child in split_multipart(block.body, boundary)? {
            let child = split_header_block(child)?;
            collect_parts(&child, depth + 1, parts)?;
        }

        return Ok(());
    }

    if block
        .get("Content-Disposition")
        .is_some_and(is_attachment_disposition)
    {
        parts.push(Part::Attachment);
        return Ok(());
    }

    let transfer_encoding = block
        .get("Content-Transfer-Encoding")
        .map(ContentTransferEncoding::parse)
        .unwrap_or(ContentTransferEncoding::SevenBit);
    let content = transfer_decode(block.body, transfer_encoding);
    let body = decode_charset(&content, content_type.parm("charset"));
    parts.push(Part::Inline { content_type, body });
    Ok(())
}

/// Split the body of a multipart entity into the raw bodies of its children.
///
/// Per RFC 2046, the line ending before each delimiter line belongs to the
/// delimiter. Anything before the first delimiter or after the closing one
/// is discarded. Fails if the closing delimiter never appears.
fn split_multipart<'a>(
    body: &'a [u8],
    boundary: &str,
) -> Result<Vec<&'a [u8]>, Error> {
    let delimiter = format!("--{boundary}");
    let mut children = Vec::new();
    let mut child_start = None::<usize>;
    let mut offset = 0;

    while offset < body.len() {
        let line_end = memchr::memchr(b'\n', &body[offset..])
            .map(|ix| offset + ix + 1)
            .unwrap_or(body.len());
        let line = strip_line_ending(&body[offset..line_end]);

        if let Some(after) = line.strip_prefix(delimiter.as_bytes()) {
            let (closing, padding) = match after.strip_prefix(b"--") {
                Some(padding) => (true, padding),
                None => (false, after),
            };

            // Anything other than transport padding after the boundary means
            // this line is content which merely starts like a delimiter.
            if padding.iter().all(|&b| b' ' == b || b'\t' == b) {
                if let Some(start) = child_start.take() {
                    children.push(strip_line_ending(&body[start..offset]));
                }

                if closing {
                    return Ok(children);
                }

                child_start = Some(line_end);
            }
        }

        offset = line_end;
    }

    Err(Error::MalformedMessage(format!(
        "missing closing boundary {delimiter:?}--",
    )))
}

/// Undo the content transfer encoding of `content`.
///
/// Base64 that cannot be decoded is passed through as-is rather than losing
/// the part entirely.
fn transfer_decode(
    content: &[u8],
    encoding: ContentTransferEncoding,
) -> Cow<'_, [u8]> {
    match encoding {
        ContentTransferEncoding::Base64 => {
            let compact = content
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect::<Vec<u8>>();
            match base64::decode(&compact) {
                Ok(decoded) => Cow::Owned(decoded),
                Err(_) => Cow::Borrowed(content),
            }
        },
        ContentTransferEncoding::QuotedPrintable => qp_decode(content),
        ContentTransferEncoding::SevenBit
        | ContentTransferEncoding::EightBit
        | ContentTransferEncoding::Binary => Cow::Borrowed(content),
    }
}

/// Convert `content` to UTF-8 according to `charset`.
///
/// ASCII, unknown, and missing charsets are read as UTF-8, replacing invalid
/// sequences.
fn decode_charset(content: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .map(str::trim)
        .filter(|c| {
            !c.eq_ignore_ascii_case("us-ascii") && !c.eq_ignore_ascii_case("ascii")
        })
        .and_then(|c| Encoding::for_label_no_replacement(c.as_bytes()));

    match encoding {
        Some(encoding) => encoding.decode_with_bom_removal(content).0.into_owned(),
        None => String::from_utf8_lossy(content).into_owned(),
    }
}
