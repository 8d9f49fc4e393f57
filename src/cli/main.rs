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
use std::io::Read;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use structopt::StructOpt;

use crate::store::SqliteStore;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Accept mail over SMTP until interrupted.
    ///
    /// Every message received is stored in the SQLite database named by the
    /// configuration, with one copy per recipient.
    Serve(ServeSubcommand),
    /// Deliver a message from a file or standard input.
    ///
    /// The message is decoded and stored exactly as if it had been received
    /// over SMTP.
    Deliver(DeliverSubcommand),
    /// List the messages stored for an address.
    List(ListSubcommand),
    /// Print one stored message.
    Show(MessageSubcommand),
    /// Delete one stored message.
    ///
    /// The message is only hidden; it remains in the database.
    Delete(MessageSubcommand),
}

impl Command {
    fn common_options(&mut self) -> CommonOptions {
        match *self {
            Command::Serve(ref mut c) => mem::take(&mut c.common),
            Command::Deliver(ref mut c) => mem::take(&mut c.common),
            Command::List(ref mut c) => mem::take(&mut c.common),
            Command::Show(ref mut c) | Command::Delete(ref mut c) => {
                mem::take(&mut c.common)
            },
        }
    }
}

#[derive(StructOpt, Default)]
pub(super) struct CommonOptions {
    /// The directory containing `mailsink.toml` etc
    /// [default: /etc/mailsink or /usr/local/etc/mailsink]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,
}

#[derive(StructOpt)]
pub(super) struct ServeSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Listen on this port instead of the configured one.
    #[structopt(long, short)]
    pub(super) port: Option<u16>,
}

#[derive(StructOpt)]
pub(super) struct DeliverSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// The envelope sender to record.
    #[structopt(long, short, default_value = "")]
    pub(super) from: String,

    /// Deliver a copy to this address. Can be passed multiple times.
    #[structopt(long, short, required = true, number_of_values(1))]
    pub(super) to: Vec<String>,

    /// The file containing the message. "-" will read from stdin.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) input: PathBuf,
}

#[derive(StructOpt)]
pub(super) struct ListSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// The address whose messages to list.
    pub(super) email: String,
}

#[derive(StructOpt)]
pub(super) struct MessageSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// The address the message was delivered to.
    pub(super) email: String,

    /// The message identifier, as shown by `list`.
    pub(super) message_id: String,
}

pub fn main() {
    let mut cmd = Command::from_clap(&match Command::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let common = cmd.common_options();
    let root = common.root.unwrap_or_else(|| {
        if Path::new("/etc/mailsink/mailsink.toml").is_file() {
            "/etc/mailsink".to_owned().into()
        } else if Path::new("/usr/local/etc/mailsink/mailsink.toml").is_file()
        {
            "/usr/local/etc/mailsink".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/mailsink nor /usr/local/etc/mailsink looks\n\
                 like the Mailsink root; use --root=/path/to/mailsink if\n\
                 your installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let system_config = load_config(&root);
    init_logging(&root);

    match cmd {
        Command::Serve(cmd) => {
            super::serve::serve(system_config, cmd, root);
        },
        Command::Deliver(cmd) => {
            super::deliver::deliver(system_config, cmd, root);
        },
        Command::List(cmd) => {
            super::inspect::list(system_config, cmd, root);
        },
        Command::Show(cmd) => {
            super::inspect::show(system_config, cmd, root);
        },
        Command::Delete(cmd) => {
            super::inspect::delete(system_config, cmd, root);
        },
    }
}

fn load_config(root: &Path) -> SystemConfig {
    let system_config_path = root.join("mailsink.toml");
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&system_config_path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        eprintln!("Error reading '{}': {}", system_config_path.display(), e);
        EX_CONFIG.exit();
    }

    match toml::from_slice(&system_config_toml) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error in config file at '{}': {}",
                system_config_path.display(),
                e
            );
            EX_CONFIG.exit()
        },
    }
}

fn init_logging(root: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // log4rs and syslog are mutually exclusive; there is no maintained
    // log4rs appender for syslog.
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::config::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger = match syslog::unix(formatter) {
            Ok(logger) => logger,
            Err(e) => die!(EX_OSERR, "Failed to connect to syslog: {}", e),
        };
        if let Err(e) =
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
        {
            die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
        }
    }
}

/// Open the configured message store, creating it if needed.
///
/// Exits the process if the database cannot be opened.
pub(super) fn open_store(
    system_config: &SystemConfig,
    root: &Path,
) -> Arc<SqliteStore> {
    let path = system_config.storage.resolve(root);
    match SqliteStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(e) => fatal!(
            EX_CANTCREAT,
            "Unable to open message store '{}': {}",
            path.display(),
            e
        ),
    }
}
