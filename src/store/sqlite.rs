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

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::info;
use rusqlite::OptionalExtension as _;

use super::types::*;
use super::MailStore;
use crate::support::error::Error;

/// A `MailStore` backed by one SQLite database file.
///
/// Several processes may have the same database open; writers are serialised
/// by SQLite's own locking.
pub struct SqliteStore {
    cxn: Mutex<rusqlite::Connection>,
}

static MIGRATIONS: &[&str] = &[include_str!("v1.sql")];

impl SqliteStore {
    /// Open or create the database at `path`, bringing its schema up to
    /// date.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut cxn = rusqlite::Connection::open(path)?;

        cxn.pragma_update(None, "foreign_keys", true)?;
        cxn.pragma_update(None, "journal_mode", "WAL")?;
        cxn.busy_timeout(Duration::from_secs(10))?;

        apply_migrations(&mut cxn, path)?;

        Ok(Self {
            cxn: Mutex::new(cxn),
        })
    }

    fn cxn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        // A panic while holding the lock leaves at worst an open transaction,
        // which is rolled back when it is dropped during unwinding.
        self.cxn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply_migrations(
    cxn: &mut rusqlite::Connection,
    path: &Path,
) -> Result<(), Error> {
    let txn = cxn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Exclusive)?;
    txn.execute(
        "CREATE TABLE IF NOT EXISTS `migration` (\
         `version` INTEGER NOT NULL PRIMARY KEY, \
         `applied_at` INTEGER NOT NULL\
         ) STRICT",
        (),
    )?;

    let current_version = txn
        .query_row(
            "SELECT MAX(`version`) FROM `migration`",
            (),
            from_single::<Option<usize>>,
        )?
        .unwrap_or(0);

    for (version, migration) in MIGRATIONS
        .iter()
        .copied()
        .enumerate()
        .map(|(ix, migration)| (ix + 1, migration))
        .skip(current_version)
    {
        info!(
            "Applying #{version} migration to database {}",
            path.display(),
        );
        txn.execute_batch(migration)?;
        txn.execute(
            "INSERT INTO `migration` (`version`, `applied_at`) \
             VALUES (?, ?)",
            (version, UnixTimestamp::now()),
        )?;
    }

    txn.commit()?;
    Ok(())
}

fn constraint_violation(e: &rusqlite::Error, extended_code: i32) -> bool {
    matches!(
        *e,
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.extended_code == extended_code,
    )
}

impl MailStore for SqliteStore {
    fn resolve_or_create_account(
        &self,
        email: &str,
        name: &str,
        picture: Option<&str>,
    ) -> Result<Account, Error> {
        let mut cxn = self.cxn();
        let txn = cxn.write_tx()?;

        // If another connection created the account first, this does nothing
        // and the SELECT reads back the winner.
        let created = txn.execute(
            "INSERT INTO `account` (`email`, `name`, `picture`, `created_at`) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (`email`) DO NOTHING",
            (email, name, picture, UnixTimestamp::now()),
        )?;

        let account = txn.query_row(
            "SELECT * FROM `account` WHERE `email` = ?",
            (email,),
            from_row::<Account>,
        )?;
        txn.commit()?;

        if 0 != created {
            info!("Created account {} for {}", account.id.0, account.email);
        }

        Ok(account)
    }

    fn find_account(&self, email: &str) -> Result<Option<Account>, Error> {
        self.cxn()
            .query_row(
                "SELECT * FROM `account` WHERE `email` = ?",
                (email,),
                from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    fn insert_message(&self, message: &NewMessage<'_>) -> Result<Message, Error> {
        let cxn = self.cxn();
        let received_at = UnixTimestamp::now();

        let result = cxn.execute(
            "INSERT INTO `message` (\
             `message_id`, `from_address`, `to_address`, `subject`, \
             `text_body`, `html_body`, `received_at`, `account_id`\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                message.message_id,
                message.from,
                message.to,
                message.subject,
                message.text_body,
                message.html_body,
                received_at,
                message.account_id,
            ),
        );

        match result {
            Ok(_) => (),
            Err(e)
                if constraint_violation(
                    &e,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                ) =>
            {
                return Err(Error::DuplicateMessageId)
            },
            Err(e)
                if constraint_violation(
                    &e,
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                ) =>
            {
                return Err(Error::NxAccount)
            },
            Err(e) => return Err(e.into()),
        }

        Ok(Message {
            id: cxn.last_insert_rowid(),
            message_id: message.message_id.to_owned(),
            from: message.from.to_owned(),
            to: message.to.to_owned(),
            subject: message.subject.to_owned(),
            text_body: message.text_body.to_owned(),
            html_body: message.html_body.map(str::to_owned),
            received_at,
            deleted: false,
            account_id: message.account_id,
        })
    }

    fn list_messages(&self, account: AccountId) -> Result<Vec<Message>, Error> {
        self.cxn()
            .prepare(
                "SELECT * FROM `message` \
                 WHERE `account_id` = ? AND NOT `deleted` \
                 ORDER BY `received_at` DESC, `id` DESC",
            )?
            .query_map((account,), from_row)?
            .collect::<Result<Vec<Message>, _>>()
            .map_err(Into::into)
    }

    fn get_message(
        &self,
        message_id: &str,
        account: AccountId,
    ) -> Result<Message, Error> {
        self.cxn()
            .query_row(
                "SELECT * FROM `message` \
                 WHERE `message_id` = ? AND `account_id` = ? \
                 AND NOT `deleted`",
                (message_id, account),
                from_row,
            )
            .optional()?
            .ok_or(Error::NxMessage)
    }

    fn soft_delete_message(
        &self,
        message_id: &str,
        account: AccountId,
    ) -> Result<(), Error> {
        let updated = self.cxn().execute(
            "UPDATE `message` SET `deleted` = 1 \
             WHERE `message_id` = ? AND `account_id` = ? AND NOT `deleted`",
            (message_id, account),
        )?;

        if 0 == updated {
            return Err(Error::NxMessage);
        }

        Ok(())
    }

    fn count_messages(&self, account: AccountId) -> Result<u64, Error> {
        let count = self.cxn().query_row(
            "SELECT COUNT(*) FROM `message` \
             WHERE `account_id` = ? AND NOT `deleted`",
            (account,),
            from_single::<i64>,
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Barrier};

    use tempfile::TempDir;

    use super::*;

    struct Setup {
        _tmpdir: TempDir,
        path: std::path::PathBuf,
        store: SqliteStore,
    }

    fn set_up() -> Setup {
        crate::init_test_log();

        let tmpdir = TempDir::new().unwrap();
        let path = tmpdir.path().join("mailsink.sqlite");
        let store = SqliteStore::open(&path).unwrap();
        Setup {
            _tmpdir: tmpdir,
            path,
            store,
        }
    }

    fn new_message<'a>(
        message_id: &'a str,
        account: &'a Account,
    ) -> NewMessage<'a> {
        NewMessage {
            message_id,
            from: "gir@example.com",
            to: &account.email,
            subject: "Doom song",
            text_body: "doom doom doom",
            html_body: Some("<p>doom doom doom</p>"),
            account_id: account.id,
        }
    }

    #[test]
    fn account_resolution() {
        let setup = set_up();
        assert_eq!(None, setup.store.find_account("zim@irk").unwrap());

        let created = setup
            .store
            .resolve_or_create_account("zim@irk", "Invader Zim", Some("zim.png"))
            .unwrap();
        assert_eq!("zim@irk", created.email);
        assert_eq!("Invader Zim", created.name);
        assert_eq!(Some("zim.png"), created.picture.as_deref());

        // Resolving again never touches the display fields
        let resolved = setup
            .store
            .resolve_or_create_account("zim@irk", "zim@irk", None)
            .unwrap();
        assert_eq!(created, resolved);
        assert_eq!(
            Some(created.clone()),
            setup.store.find_account("zim@irk").unwrap(),
        );

        let other = setup
            .store
            .resolve_or_create_account("dib@earth", "dib@earth", None)
            .unwrap();
        assert_ne!(created.id, other.id);
        assert_eq!(None, other.picture);
    }

    #[test]
    fn inserted_message_matches_stored_row() {
        let setup = set_up();
        let gir = setup
            .store
            .resolve_or_create_account("gir@irk", "gir@irk", None)
            .unwrap();

        for n in 0..20 {
            let message_id = format!("{n}@roundtrip");
            let inserted = setup
                .store
                .insert_message(&new_message(&message_id, &gir))
                .unwrap();
            assert_eq!(
                inserted,
                setup.store.get_message(&message_id, gir.id).unwrap()
            );
        }
    }

    #[test]
    fn message_lifecycle() {
        let setup = set_up();
        let zim = setup
            .store
            .resolve_or_create_account("zim@irk", "zim@irk", None)
            .unwrap();
        let dib = setup
            .store
            .resolve_or_create_account("dib@earth", "dib@earth", None)
            .unwrap();

        let first = setup
            .store
            .insert_message(&new_message("1@localhost", &zim))
            .unwrap();
        let second = setup
            .store
            .insert_message(&NewMessage {
                html_body: None,
                ..new_message("2@localhost", &zim)
            })
            .unwrap();
        setup
            .store
            .insert_message(&new_message("3@localhost", &dib))
            .unwrap();

        assert_eq!(zim.id, first.account_id);
        assert_eq!("zim@irk", first.to);
        assert_eq!(None, second.html_body);
        assert!(!first.deleted);

        let listed = setup.store.list_messages(zim.id).unwrap();
        assert_eq!(vec![second.clone(), first.clone()], listed);
        assert_eq!(2, setup.store.count_messages(zim.id).unwrap());
        assert_eq!(1, setup.store.count_messages(dib.id).unwrap());

        assert_eq!(
            first,
            setup.store.get_message("1@localhost", zim.id).unwrap()
        );
        assert_matches!(
            Err(Error::NxMessage),
            setup.store.get_message("1@localhost", dib.id)
        );
        assert_matches!(
            Err(Error::NxMessage),
            setup.store.get_message("nx@localhost", zim.id)
        );

        assert_matches!(
            Err(Error::NxMessage),
            setup.store.soft_delete_message("1@localhost", dib.id)
        );
        setup
            .store
            .soft_delete_message("1@localhost", zim.id)
            .unwrap();
        assert_matches!(
            Err(Error::NxMessage),
            setup.store.soft_delete_message("1@localhost", zim.id)
        );
        assert_matches!(
            Err(Error::NxMessage),
            setup.store.get_message("1@localhost", zim.id)
        );
        assert_eq!(vec![second], setup.store.list_messages(zim.id).unwrap());
        assert_eq!(1, setup.store.count_messages(zim.id).unwrap());
    }

    #[test]
    fn insert_failures() {
        let setup = set_up();
        let zim = setup
            .store
            .resolve_or_create_account("zim@irk", "zim@irk", None)
            .unwrap();

        setup
            .store
            .insert_message(&new_message("dup@localhost", &zim))
            .unwrap();
        assert_matches!(
            Err(Error::DuplicateMessageId),
            setup.store.insert_message(&new_message("dup@localhost", &zim))
        );

        let ghost = Account {
            id: AccountId(9999),
            ..zim.clone()
        };
        assert_matches!(
            Err(Error::NxAccount),
            setup
                .store
                .insert_message(&new_message("ghost@localhost", &ghost))
        );
        assert_eq!(1, setup.store.count_messages(zim.id).unwrap());
    }

    #[test]
    fn reopening_keeps_data() {
        let setup = set_up();
        let zim = setup
            .store
            .resolve_or_create_account("zim@irk", "zim@irk", None)
            .unwrap();
        setup
            .store
            .insert_message(&new_message("1@localhost", &zim))
            .unwrap();

        let reopened = SqliteStore::open(&setup.path).unwrap();
        assert_eq!(Some(zim.clone()), reopened.find_account("zim@irk").unwrap());
        assert_eq!(1, reopened.count_messages(zim.id).unwrap());
    }

    #[test]
    fn concurrent_first_resolution_creates_one_account() {
        let setup = set_up();
        let barrier = Arc::new(Barrier::new(8));

        let accounts = (0..8)
            .map(|_| {
                let path = setup.path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    // Separate connections so that SQLite itself arbitrates
                    let store = SqliteStore::open(&path).unwrap();
                    barrier.wait();
                    store
                        .resolve_or_create_account("gaz@irk", "gaz@irk", None)
                        .unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect::<Vec<_>>();

        for account in &accounts {
            assert_eq!(accounts[0].id, account.id);
        }
        assert_eq!(
            Some(accounts[0].clone()),
            setup.store.find_account("gaz@irk").unwrap(),
        );
    }
}
