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

//! Persistent storage of accounts and the messages delivered to them.

pub mod sqlite;
pub mod types;

pub use self::sqlite::SqliteStore;
pub use self::types::{Account, AccountId, Message, NewMessage};

use crate::support::error::Error;

/// The operations the rest of Mailsink needs from a message store.
///
/// Email addresses passed in are expected to already be normalised; the
/// store compares them exactly.
pub trait MailStore: Send + Sync {
    /// Look up the account for `email`, creating it with the given display
    /// fields if it does not exist.
    ///
    /// An existing account is returned unchanged; its display fields are
    /// never overwritten. Concurrent calls for the same new address all
    /// return the same account.
    fn resolve_or_create_account(
        &self,
        email: &str,
        name: &str,
        picture: Option<&str>,
    ) -> Result<Account, Error>;

    /// Look up the account for `email` without creating it.
    fn find_account(&self, email: &str) -> Result<Option<Account>, Error>;

    /// Store a new message, stamped with the current time.
    ///
    /// Fails with `Error::DuplicateMessageId` if `message.message_id` is
    /// already in use and `Error::NxAccount` if the owning account does not
    /// exist.
    fn insert_message(&self, message: &NewMessage<'_>) -> Result<Message, Error>;

    /// All messages of the account which have not been deleted, newest
    /// first.
    fn list_messages(&self, account: AccountId) -> Result<Vec<Message>, Error>;

    /// Fetch one message of the account by its message identifier.
    ///
    /// Deleted messages and messages of other accounts are reported as
    /// `Error::NxMessage`.
    fn get_message(
        &self,
        message_id: &str,
        account: AccountId,
    ) -> Result<Message, Error>;

    /// Mark one message of the account as deleted.
    fn soft_delete_message(
        &self,
        message_id: &str,
        account: AccountId,
    ) -> Result<(), Error>;

    /// The number of messages of the account which have not been deleted.
    fn count_messages(&self, account: AccountId) -> Result<u64, Error>;
}
