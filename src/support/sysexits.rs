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

//! Exit codes from `sysexits.h`, as used by sendmail-style MDAs.
#![allow(dead_code)]

use super::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_NOUSER: Sysexit = Sysexit(67);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_OSERR: Sysexit = Sysexit(71);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }

    /// The exit code a command-line tool should use after failing with
    /// `error`.
    pub fn for_error(error: &Error) -> Self {
        match *error {
            Error::MalformedMessage(..) => EX_DATAERR,
            Error::NxAccount | Error::NxMessage => EX_NOUSER,
            Error::Bind { .. } => EX_UNAVAILABLE,
            Error::Io(..) => EX_IOERR,
            // SQLite errors are almost always lock contention or a full disk,
            // both of which may resolve themselves.
            Error::Sqlite(..) | Error::DuplicateMessageId => EX_TEMPFAIL,
            Error::NoSender
            | Error::SenderAlreadySet
            | Error::NoRecipients
            | Error::BodyInProgress
            | Error::NotAwaitingBody
            | Error::SessionClosed
            | Error::DeliveryWorkerLost => EX_SOFTWARE,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_mapping() {
        assert_eq!(
            EX_DATAERR,
            Sysexit::for_error(&Error::MalformedMessage("x".to_owned())),
        );
        assert_eq!(EX_NOUSER, Sysexit::for_error(&Error::NxAccount));
        assert_eq!(EX_SOFTWARE, Sysexit::for_error(&Error::NoSender));
        assert_eq!(
            EX_IOERR,
            Sysexit::for_error(&Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "boom",
            ))),
        );
    }
}
