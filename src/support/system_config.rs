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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Mailsink.
///
/// This is stored in a file named `mailsink.toml` under the Mailsink system
/// root, which is typically `/usr/local/etc/mailsink` or `/etc/mailsink`.
/// Every section may be omitted; the defaults are a server listening on port
/// 25 of all interfaces which stores mail in `mailsink.sqlite` next to the
/// configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Configuration for the SMTP listener.
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Where received mail is kept.
    #[serde(default)]
    pub storage: StorageConfig,

    /// How received mail is turned into stored messages.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// The address to listen on.
    pub listen: String,

    /// The TCP port to listen on.
    pub port: u16,

    /// The host name to report as.
    ///
    /// If unset, the system host name is used.
    pub host_name: String,

    /// How long, in seconds, a connection may sit idle between commands
    /// before it is dropped.
    pub idle_timeout_secs: u64,

    /// How long, in seconds, the peer has to transfer the content of one
    /// message after `DATA`.
    pub data_timeout_secs: u64,

    /// The largest message, in bytes, that will be accepted.
    ///
    /// This is advertised through the `SIZE` extension.
    pub max_message_size: u64,

    /// The number of consecutive commands which do not advance a mail
    /// transaction that a peer may issue before being disconnected.
    pub max_ineffective_commands: u32,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_owned(),
            port: 25,
            host_name: String::new(),
            idle_timeout_secs: 60,
            data_timeout_secs: 1800,
            max_message_size: 64 * 1024 * 1024,
            max_ineffective_commands: 30,
        }
    }
}

impl SmtpConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The path to the SQLite database.
    ///
    /// Relative paths are resolved against the system root.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "mailsink.sqlite".into(),
        }
    }
}

impl StorageConfig {
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// The domain placed after the `@` of generated message identifiers.
    pub message_id_domain: String,

    /// If true, the local part of recipient addresses keeps its case.
    ///
    /// By default, `Zim@Example.com` and `zim@example.com` are the same
    /// account. The domain part is always lower-cased.
    pub verbatim_local_part: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            message_id_domain: "localhost".to_owned(),
            verbatim_local_part: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert_eq!("0.0.0.0", config.smtp.listen);
        assert_eq!(25, config.smtp.port);
        assert_eq!(60, config.smtp.idle_timeout_secs);
        assert_eq!(PathBuf::from("mailsink.sqlite"), config.storage.path);
        assert_eq!("localhost", config.delivery.message_id_domain);
        assert!(!config.delivery.verbatim_local_part);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: SystemConfig = toml::from_str(
            "[smtp]\n\
             port = 2525\n\
             \n\
             [storage]\n\
             path = \"/var/db/mail.sqlite\"\n",
        )
        .unwrap();
        assert_eq!(2525, config.smtp.port);
        assert_eq!(1800, config.smtp.data_timeout_secs);
        assert_eq!(
            PathBuf::from("/var/db/mail.sqlite"),
            config.storage.resolve(Path::new("/etc/mailsink")),
        );
        assert_eq!(
            PathBuf::from("/etc/mailsink/mailsink.sqlite"),
            StorageConfig::default().resolve(Path::new("/etc/mailsink")),
        );
    }
}
