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

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// (HELO|EHLO) origin-host ignored...
    Helo(String, String),
    /// AUTH mechanism [initial-response]
    Auth(String, Option<String>),
    /// MAIL FROM:<return-path> [SIZE=sz] [BODY=encoding] [SMTPUTF8]
    /// The final element is a list of warnings.
    MailFrom(String, Option<u64>, Vec<String>),
    /// RCPT TO:<ignored...:email>
    /// The final element is a list of warnings.
    Recipient(String, Vec<String>),
    /// DATA
    Data,
    /// RSET
    Reset,
    /// VRFY ignored...
    Verify,
    /// EXPN ignored...
    Expand,
    /// HELP ignored...
    Help,
    /// NOOP ignored...
    Noop,
    /// QUIT
    Quit,
    /// STARTTLS
    StartTls,
    /// Anything that looks like a common HTTP command.
    Http,
}

const MAX_WARNINGS: usize = 4;

/// Commands without interesting arguments, and whether anything may follow
/// the command word.
static SIMPLE_COMMANDS: &[(&str, Command, bool)] = &[
    ("DATA", Command::Data, false),
    ("RSET", Command::Reset, false),
    ("VRFY ", Command::Verify, true),
    ("EXPN ", Command::Expand, true),
    ("HELP", Command::Help, true),
    // RFC 5321 permits an ignored parameter on NOOP
    ("NOOP", Command::Noop, true),
    ("QUIT", Command::Quit, false),
    ("STARTTLS", Command::StartTls, false),
    ("GET ", Command::Http, true),
    ("HEAD ", Command::Http, true),
    ("PUT ", Command::Http, true),
    ("POST ", Command::Http, true),
    ("DELETE ", Command::Http, true),
    ("OPTIONS ", Command::Http, true),
];

lazy_static! {
    static ref RX_HELO: Regex =
        Regex::new("^(?i)(HELO|EHLO) ([^ ]+)").unwrap();
    static ref RX_MAIL: Regex =
        Regex::new("^(?i)MAIL FROM: ?<([^>]*)>(.*)$").unwrap();
    static ref RX_MAIL_KNOWN_PARM: Regex =
        Regex::new("^(?i)(BODY=(7BIT|8BITMIME)|SMTPUTF8)$").unwrap();
    static ref RX_MAIL_SIZE_PARM: Regex =
        Regex::new("^(?i)SIZE=(.*)$").unwrap();
    static ref RX_RCPT: Regex =
        Regex::new("^(?i)RCPT TO: ?<(?:@[^:]+:)?([^>]+)>(.*)$").unwrap();
    static ref RX_AUTH: Regex =
        Regex::new("^(?i)AUTH ([A-Z0-9_-]+)(?: ([0-9A-Za-z+/=]+|\\*))?$")
            .unwrap();
    static ref RX_KNOWN_COMMANDS: Regex = Regex::new(
        "^(?i)(DATA|RSET|VRFY|EXPN|HELP|NOOP|QUIT|\
         STARTTLS|MAIL|RCPT|HELO|EHLO|AUTH)( .*)?$"
    )
    .unwrap();
}

/// Whether `s` starts with a command word we know, even though the command
/// as a whole could not be parsed.
pub fn looks_like_known_command(s: &str) -> bool {
    RX_KNOWN_COMMANDS.is_match(s)
}

fn truncate_for_warning(s: &str) -> &str {
    &s[..s.char_indices().nth(64).map(|(ix, _)| ix).unwrap_or(s.len())]
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let mut warnings = Vec::<String>::new();
        let mut add_warning = |w: String| {
            if warnings.len() < MAX_WARNINGS {
                warnings.push(w);
            }
        };

        for &(prefix, ref cmd, allow_trailing_garbage) in SIMPLE_COMMANDS {
            if s.len() >= prefix.len()
                && (allow_trailing_garbage || s.len() == prefix.len())
                && s.get(0..prefix.len())
                    .is_some_and(|sp| prefix.eq_ignore_ascii_case(sp))
            {
                return Ok(cmd.clone());
            }
        }

        if let Some(cap) = RX_HELO.captures(s) {
            Ok(Command::Helo(cap[1].to_owned(), cap[2].to_owned()))
        } else if let Some(cap) = RX_MAIL.captures(s) {
            let mut size = None::<u64>;
            for parm in cap[2].split(' ').filter(|s| !s.is_empty()) {
                if let Some(size_cap) = RX_MAIL_SIZE_PARM.captures(parm) {
                    match size_cap[1].parse::<u64>() {
                        Ok(s) => size = Some(s),
                        Err(_) => add_warning(format!(
                            "Ignoring invalid MAIL FROM parameter {:?}",
                            truncate_for_warning(parm),
                        )),
                    }
                } else if !RX_MAIL_KNOWN_PARM.is_match(parm) {
                    add_warning(format!(
                        "Ignoring unknown MAIL FROM parameter {:?}",
                        truncate_for_warning(parm),
                    ));
                }
            }

            Ok(Command::MailFrom(cap[1].to_owned(), size, warnings))
        } else if let Some(cap) = RX_RCPT.captures(s) {
            let extra = cap[2].trim();
            if !extra.is_empty() {
                add_warning(format!(
                    "Ignoring extraneous RCPT TO parameters: {:?}",
                    truncate_for_warning(extra),
                ));
            }

            Ok(Command::Recipient(cap[1].to_owned(), warnings))
        } else if let Some(cap) = RX_AUTH.captures(s) {
            Ok(Command::Auth(
                cap[1].to_owned(),
                cap.get(2).map(|data| data.as_str().to_owned()),
            ))
        } else {
            Err(())
        }
    }
}
