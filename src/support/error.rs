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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("MAIL FROM required before this command")]
    NoSender,
    #[error("Sender already specified")]
    SenderAlreadySet,
    #[error("No recipients")]
    NoRecipients,
    #[error("Message body transfer already in progress")]
    BodyInProgress,
    #[error("Not expecting a message body")]
    NotAwaitingBody,
    #[error("Session already closed")]
    SessionClosed,
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Message ID already in use")]
    DuplicateMessageId,
    #[error("No such message")]
    NxMessage,
    #[error("No such account")]
    NxAccount,
    #[error("Delivery worker disappeared")]
    DeliveryWorkerLost,
    #[error("Unable to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error indicates the peer issued a command out of order.
    ///
    /// These errors never change the state of the session they came from.
    pub fn is_ordering(&self) -> bool {
        matches!(
            *self,
            Error::NoSender
                | Error::SenderAlreadySet
                | Error::NoRecipients
                | Error::BodyInProgress
                | Error::NotAwaitingBody
                | Error::SessionClosed,
        )
    }
}
