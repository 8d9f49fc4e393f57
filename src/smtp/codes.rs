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

//! Reply codes from RFC 5321 and enhanced status codes from RFC 3463.
//!
//! Only the codes Mailsink actually sends are defined. The module is designed
//! to be wildcard-imported; the `pc`, `cc` and `sc` submodules give short
//! names to the enum values.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum PrimaryCode {
    HelpMessage = 214,
    ServiceReady = 220,
    ServiceClosing = 221,
    AuthenticationSucceeded = 235,
    Ok = 250,
    CannotVerify = 252,
    ServerChallenge = 334,
    StartMailInput = 354,
    ServiceNotAvailableClosing = 421,
    ActionAborted = 451,
    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadSequenceOfCommands = 503,
    CommandParameterNotImplemented = 504,
    ActionNotTakenPermanent = 550,
    ExceededStorageAllocation = 552,
    TransactionFailed = 554,
}

pub mod pc {
    pub use super::PrimaryCode::*;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClassCode {
    Success = 2,
    TempFail = 4,
    PermFail = 5,
}

pub mod cc {
    pub use super::ClassCode::*;
}

/// The subject and detail of an enhanced status code, written as one number.
///
/// E.g. `x.5.4` is `54`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SubjectCode {
    Undefined = 0,
    DestinationAddressValid = 15,
    OtherMailSystem = 30,
    SystemNotCapableOfSelectedFeatures = 33,
    MessageTooBigForSystem = 34,
    BadConnection = 42,
    OtherProtocolStatus = 50,
    InvalidCommand = 51,
    SyntaxError = 52,
    InvalidCommandArguments = 54,
    AuthenticationExchangeLineTooLong = 56,
    OtherMediaError = 60,
    OtherSecurity = 70,
}

pub mod sc {
    pub use super::SubjectCode::*;
}
