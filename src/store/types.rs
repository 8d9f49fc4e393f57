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

//! Bindings for the storage model types to `rusqlite`.

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef,
};

macro_rules! transparent_to_sql {
    ($t:ident) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }
    };
}

macro_rules! transparent_from_sql {
    ($t:ident) => {
        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                FromSql::column_result(value).map(Self)
            }
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub i64);
transparent_to_sql!(AccountId);
transparent_from_sql!(AccountId);

/// A point in time, stored as milliseconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub DateTime<Utc>);

impl UnixTimestamp {
    /// The current time, truncated to the precision that is stored.
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(3))
    }
}

impl ToSql for UnixTimestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.timestamp_millis()))
    }
}

impl FromSql for UnixTimestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let millis = i64::column_result(value)?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(FromSqlError::OutOfRange(millis))
            .map(Self)
    }
}

/// A mailbox owner, identified by a normalised email address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub created_at: UnixTimestamp,
}

impl FromRow for Account {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            name: row.get("name")?,
            picture: row.get("picture")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// One stored copy of a received message, owned by exactly one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub received_at: UnixTimestamp,
    pub deleted: bool,
    pub account_id: AccountId,
}

impl FromRow for Message {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            from: row.get("from_address")?,
            to: row.get("to_address")?,
            subject: row.get("subject")?,
            text_body: row.get("text_body")?,
            html_body: row.get("html_body")?,
            received_at: row.get("received_at")?,
            deleted: row.get("deleted")?,
            account_id: row.get("account_id")?,
        })
    }
}

/// The content of a message about to be stored.
#[derive(Clone, Copy, Debug)]
pub struct NewMessage<'a> {
    pub message_id: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    pub text_body: &'a str,
    pub html_body: Option<&'a str>,
    pub account_id: AccountId,
}

pub trait FromRow: Sized {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

pub fn from_row<T: FromRow>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    T::from_row(row)
}

pub fn from_single<T: FromSql>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    row.get(0)
}

pub trait ConnectionExt {
    /// Start a transaction which takes the write lock immediately.
    fn write_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>>;
}

impl ConnectionExt for rusqlite::Connection {
    fn write_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>> {
        self.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
    }
}
