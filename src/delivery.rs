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

//! The bridge between decoded messages and the message store.
//!
//! Every recipient of a transaction receives its own copy of the message,
//! owned by the account of that recipient. Accounts spring into existence on
//! first delivery.

use std::fmt::Write as _;
use std::sync::Arc;

use log::info;
use rand::{rngs::OsRng, Rng};

use crate::mime::DecodedMessage;
use crate::store::{MailStore, Message, NewMessage};
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::DeliveryConfig;

pub struct Bridge {
    store: Arc<dyn MailStore>,
    config: DeliveryConfig,
}

impl Bridge {
    pub fn new(store: Arc<dyn MailStore>, config: DeliveryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &dyn MailStore {
        &*self.store
    }

    /// Normalise an email address the way accounts are keyed.
    ///
    /// The domain is always folded to lower case. The local part is too
    /// unless the configuration asks for it to be kept verbatim.
    pub fn normalise_address(&self, address: &str) -> String {
        let address = address.trim();
        match address.rsplit_once('@') {
            Some((local, domain)) => {
                if self.config.verbatim_local_part {
                    format!("{}@{}", local, domain.to_lowercase())
                } else {
                    format!(
                        "{}@{}",
                        local.to_lowercase(),
                        domain.to_lowercase()
                    )
                }
            },
            None if self.config.verbatim_local_part => address.to_owned(),
            None => address.to_lowercase(),
        }
    }

    /// Generate a fresh globally unique message identifier.
    pub fn generate_message_id(&self) -> String {
        let bytes: [u8; 16] = OsRng.gen();
        let mut id =
            String::with_capacity(33 + self.config.message_id_domain.len());
        for b in bytes {
            let _ = write!(id, "{:02x}", b);
        }
        id.push('@');
        id.push_str(&self.config.message_id_domain);
        id
    }

    /// Store one copy of `message` for `recipient`.
    pub fn deliver(
        &self,
        log_prefix: &LogPrefix,
        sender: &str,
        recipient: &str,
        message: &DecodedMessage,
    ) -> Result<Message, Error> {
        let recipient = self.normalise_address(recipient);
        let account =
            self.store
                .resolve_or_create_account(&recipient, &recipient, None)?;
        let message_id = self.generate_message_id();

        let stored = self.store.insert_message(&NewMessage {
            message_id: &message_id,
            from: sender,
            to: &recipient,
            subject: &message.subject,
            text_body: &message.text_body,
            html_body: message.html_body.as_deref(),
            account_id: account.id,
        })?;

        info!(
            "{} Email saved: from={}, to={}, subject={}",
            log_prefix, sender, recipient, message.subject,
        );
        Ok(stored)
    }

    /// Deliver `message` to each recipient in turn.
    ///
    /// Stops at the first failure. Copies already stored for earlier
    /// recipients remain.
    pub fn deliver_all(
        &self,
        log_prefix: &LogPrefix,
        sender: &str,
        recipients: &[String],
        message: &DecodedMessage,
    ) -> Result<Vec<Message>, Error> {
        recipients
            .iter()
            .map(|recipient| {
                self.deliver(log_prefix, sender, recipient, message)
            })
            .collect()
    }
}
