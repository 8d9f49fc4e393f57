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

//! Best-effort conversion of an HTML body into plain text.
//!
//! This is not an HTML parser. It exists so that messages which only carry an
//! HTML part still have something readable in their plain-text body.

/// Strip markup from `html`.
///
/// `<br>`, `<br/>`, and `<br />` become line feeds, then every `<...>` span
/// is removed, scanning from the left. A `<` with no `>` anywhere after it
/// ends the scan and is kept, along with everything following it. The result
/// is trimmed of surrounding whitespace.
pub fn strip_html(html: &str) -> String {
    let mut text = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");

    let mut search_from = 0;
    while let Some(start) = text[search_from..].find('<').map(|s| s + search_from)
    {
        let Some(len) = text[start..].find('>') else {
            break;
        };

        text.replace_range(start..=start + len, "");
        search_from = start;
    }

    text.trim().to_owned()
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_strip_html() {
        assert_eq!("hello", strip_html("<p>hello</p>"));
        assert_eq!(
            "line one\nline two\nline three\nfour",
            strip_html("line one<br>line two<br/>line three<br />four"),
        );
        assert_eq!(
            "Bold and italic",
            strip_html("  <html><body><b>Bold</b> and <i>italic</i></body></html>\r\n"),
        );
        assert_eq!("a < b", strip_html("a < b"));
        assert_eq!("x y", strip_html("x <a href=\"#\">y"));
        assert_eq!("", strip_html("<><>"));
        // A span runs from a `<` to the first `>` after it
        assert_eq!("c>", strip_html("<a<b>c>"));
    }

    #[test]
    fn br_is_only_recognised_in_lower_case() {
        assert_eq!("ab", strip_html("a<BR>b"));
    }

    proptest! {
        #[test]
        fn text_without_angle_brackets_is_only_trimmed(s in "[^<>]*") {
            prop_assert_eq!(s.trim(), strip_html(&s));
        }

        #[test]
        fn output_never_contains_complete_tags(s in ".*") {
            let stripped = strip_html(&s);
            if let Some(start) = stripped.find('<') {
                prop_assert!(!stripped[start..].contains('>'));
            }
        }
    }
}
