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

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::error;

use super::main::{open_store, DeliverSubcommand};
use crate::delivery::Bridge;
use crate::mime;
use crate::store::Message;
use crate::support::{
    error::Error, log_prefix::LogPrefix, sysexits::*,
    system_config::SystemConfig,
};

pub(super) fn deliver(
    system_config: SystemConfig,
    cmd: DeliverSubcommand,
    root: PathBuf,
) {
    let max_size = system_config.smtp.max_message_size;
    let data = match read_input(&cmd.input, max_size) {
        Ok(Some(data)) => data,
        Ok(None) => die!(
            EX_DATAERR,
            "{}: Message exceeds the maximum size of {} bytes",
            cmd.input.display(),
            max_size
        ),
        Err(e) => die!(EX_NOINPUT, "{}: {}", cmd.input.display(), e),
    };

    let store = open_store(&system_config, &root);
    let bridge = Bridge::new(store, system_config.delivery);
    let log_prefix = LogPrefix::new("deliver".to_owned());

    match run_delivery(&bridge, &log_prefix, &cmd.from, &cmd.to, &data) {
        Ok(stored) => {
            for message in stored {
                println!("{}\t{}", message.to, message.message_id);
            }
        },
        Err(e) => {
            error!("{} Delivery failed: {}", log_prefix, e);
            Sysexit::for_error(&e).exit()
        },
    }
}

/// Read the whole message from `path`, or from stdin if `path` is `-`.
///
/// Returns `None` if the input is longer than `max_size`.
fn read_input(path: &Path, max_size: u64) -> io::Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    if Path::new("-") == path {
        io::stdin()
            .lock()
            .take(max_size.saturating_add(1))
            .read_to_end(&mut data)?;
    } else {
        fs::File::open(path)?
            .take(max_size.saturating_add(1))
            .read_to_end(&mut data)?;
    }

    if data.len() as u64 > max_size {
        Ok(None)
    } else {
        Ok(Some(data))
    }
}

fn run_delivery(
    bridge: &Bridge,
    log_prefix: &LogPrefix,
    sender: &str,
    recipients: &[String],
    data: &[u8],
) -> Result<Vec<Message>, Error> {
    let message = mime::decode(data)?;
    bridge.deliver_all(log_prefix, sender, recipients, &message)
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::store::SqliteStore;
    use crate::support::system_config::DeliveryConfig;

    fn bridge(dir: &TempDir) -> Bridge {
        let store =
            SqliteStore::open(&dir.path().join("mailsink.sqlite")).unwrap();
        Bridge::new(Arc::new(store), DeliveryConfig::default())
    }

    #[test]
    fn delivers_unix_formatted_message() {
        crate::init_test_log();

        let dir = TempDir::new().unwrap();
        let bridge = bridge(&dir);
        let log_prefix = LogPrefix::new("deliver".to_owned());

        let stored = run_delivery(
            &bridge,
            &log_prefix,
            "zim@irk.com",
            &["Gir@Irk.com".to_owned(), "dib@earth.com".to_owned()],
            b"Subject: Doom song\nFrom: zim@irk.com\n\ndoom doom doom\n",
        )
        .unwrap();

        assert_eq!(2, stored.len());
        assert_eq!("gir@irk.com", stored[0].to);
        assert_eq!("dib@earth.com", stored[1].to);

        let account = bridge
            .store()
            .find_account("gir@irk.com")
            .unwrap()
            .unwrap();
        let messages = bridge.store().list_messages(account.id).unwrap();
        assert_eq!(1, messages.len());
        assert_eq!("Doom song", messages[0].subject);
        assert_eq!("zim@irk.com", messages[0].from);
        assert_eq!("doom doom doom\n", messages[0].text_body);
    }

    #[test]
    fn malformed_input_stores_nothing() {
        crate::init_test_log();

        let dir = TempDir::new().unwrap();
        let bridge = bridge(&dir);
        let log_prefix = LogPrefix::new("deliver".to_owned());

        let result = run_delivery(
            &bridge,
            &log_prefix,
            "",
            &["gir@irk.com".to_owned()],
            b"this is not a header\n\nbody\n",
        );
        assert_matches!(Err(Error::MalformedMessage(..)), result);
        assert!(bridge.store().find_account("gir@irk.com").unwrap().is_none());
    }

    #[test]
    fn oversized_input_is_refused() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"Subject: x\r\n\r\n0123456789").unwrap();

        assert!(read_input(file.path(), 64).unwrap().is_some());
        assert!(read_input(file.path(), 8).unwrap().is_none());
        assert!(read_input(Path::new("/nonexistent/mail"), 64).is_err());
    }
}
