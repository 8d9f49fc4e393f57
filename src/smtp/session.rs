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

//! The mail transaction state of one SMTP connection.
//!
//! The session knows nothing about the wire protocol. It enforces the order
//! of envelope operations and hands completed messages to the delivery
//! bridge.

use std::mem;
use std::sync::Arc;

use log::{debug, info};

use crate::delivery::Bridge;
use crate::mime;
use crate::store::Message;
use crate::support::{error::Error, log_prefix::LogPrefix};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// No transaction in progress.
    Idle,
    SenderSet {
        sender: String,
    },
    /// At least one recipient has been accepted.
    Recipients {
        sender: String,
        recipients: Vec<String>,
    },
    AwaitingBody {
        sender: String,
        recipients: Vec<String>,
    },
    /// The peer has disconnected. Nothing more can happen.
    Closed,
}

pub struct Session {
    state: State,
    bridge: Arc<Bridge>,
    log_prefix: LogPrefix,
}

impl Session {
    pub fn new(bridge: Arc<Bridge>, log_prefix: LogPrefix) -> Self {
        Self {
            state: State::Idle,
            bridge,
            log_prefix,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Start a transaction from `sender`.
    ///
    /// The address is recorded verbatim; the null sender is an empty string.
    pub fn set_sender(&mut self, sender: String) -> Result<(), Error> {
        match self.state {
            State::Idle => {
                info!(
                    "{} Start mail transaction from <{}>",
                    self.log_prefix, sender,
                );
                self.state = State::SenderSet { sender };
                Ok(())
            },
            State::SenderSet { .. } | State::Recipients { .. } => {
                Err(Error::SenderAlreadySet)
            },
            State::AwaitingBody { .. } => Err(Error::BodyInProgress),
            State::Closed => Err(Error::SessionClosed),
        }
    }

    /// Add `recipient` to the current transaction.
    ///
    /// The same recipient may be added more than once; each addition gets its
    /// own copy of the message.
    pub fn add_recipient(&mut self, recipient: String) -> Result<(), Error> {
        match self.state {
            State::Idle => return Err(Error::NoSender),
            State::AwaitingBody { .. } => return Err(Error::BodyInProgress),
            State::Closed => return Err(Error::SessionClosed),
            State::SenderSet { .. } | State::Recipients { .. } => (),
        }

        debug!("{} Add recipient <{}>", self.log_prefix, recipient);
        self.state = match mem::replace(&mut self.state, State::Idle) {
            State::SenderSet { sender } => State::Recipients {
                sender,
                recipients: vec![recipient],
            },
            State::Recipients {
                sender,
                mut recipients,
            } => {
                recipients.push(recipient);
                State::Recipients { sender, recipients }
            },
            // Excluded above
            other => other,
        };
        Ok(())
    }

    /// Move to awaiting the message body.
    pub fn begin_body(&mut self) -> Result<(), Error> {
        match mem::replace(&mut self.state, State::Idle) {
            State::Recipients { sender, recipients } => {
                self.state = State::AwaitingBody { sender, recipients };
                Ok(())
            },
            other => {
                let error = match other {
                    State::Idle => Error::NoSender,
                    State::SenderSet { .. } => Error::NoRecipients,
                    State::Closed => Error::SessionClosed,
                    _ => Error::BodyInProgress,
                };
                self.state = other;
                Err(error)
            },
        }
    }

    /// Decode `raw` and deliver it to every recipient of the transaction.
    ///
    /// The session is back to `Idle` when this returns, whether or not
    /// delivery succeeded. On failure, copies already stored for earlier
    /// recipients remain.
    pub async fn complete_body(
        &mut self,
        raw: Vec<u8>,
    ) -> Result<Vec<Message>, Error> {
        let (sender, recipients) =
            match mem::replace(&mut self.state, State::Idle) {
                State::AwaitingBody { sender, recipients } => {
                    (sender, recipients)
                },
                State::Closed => {
                    self.state = State::Closed;
                    return Err(Error::SessionClosed);
                },
                other => {
                    self.state = other;
                    return Err(Error::NotAwaitingBody);
                },
            };

        let bridge = Arc::clone(&self.bridge);
        let log_prefix = self.log_prefix.clone();
        tokio::task::spawn_blocking(move || {
            let decoded = mime::decode(&raw)?;
            bridge.deliver_all(&log_prefix, &sender, &recipients, &decoded)
        })
        .await
        .map_err(|_| Error::DeliveryWorkerLost)?
    }

    /// Abandon any transaction in progress.
    pub fn reset(&mut self) {
        if State::Closed != self.state {
            self.state = State::Idle;
        }
    }

    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Accept the given authentication identity. Any credentials are fine.
    pub fn auth_plain(&mut self, identity: &str) -> Result<(), Error> {
        if State::Closed == self.state {
            return Err(Error::SessionClosed);
        }

        if !identity.is_empty() {
            self.log_prefix.set_user(identity.to_owned());
        }
        info!("{} Authenticated", self.log_prefix);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::future::Future;

    use tempfile::TempDir;

    use super::*;
    use crate::store::{MailStore, SqliteStore};
    use crate::support::system_config::DeliveryConfig;

    struct Setup {
        _tmpdir: TempDir,
        store: Arc<SqliteStore>,
        session: Session,
    }

    fn set_up() -> Setup {
        crate::init_test_log();

        let tmpdir = TempDir::new().unwrap();
        let store =
            Arc::new(SqliteStore::open(&tmpdir.path().join("db")).unwrap());
        let bridge = Arc::new(Bridge::new(
            Arc::clone(&store) as Arc<dyn MailStore>,
            DeliveryConfig::default(),
        ));
        Setup {
            _tmpdir: tmpdir,
            store,
            session: Session::new(bridge, LogPrefix::new("test".to_owned())),
        }
    }

    fn block_on<F: Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    const SIMPLE_MESSAGE: &[u8] = b"Subject: Hi\r\n\r\nhello\r\n";

    #[test]
    fn recipient_before_sender_is_rejected() {
        let mut setup = set_up();
        assert_matches!(
            Err(Error::NoSender),
            setup.session.add_recipient("u@local".to_owned())
        );
        assert_eq!(&State::Idle, setup.session.state());
    }

    #[test]
    fn ordering_errors_leave_state_alone() {
        let mut setup = set_up();
        assert_matches!(Err(Error::NoSender), setup.session.begin_body());
        assert_eq!(&State::Idle, setup.session.state());

        setup.session.set_sender("a@ex.com".to_owned()).unwrap();
        let sender_set = setup.session.state().clone();
        assert_matches!(
            Err(Error::SenderAlreadySet),
            setup.session.set_sender("b@ex.com".to_owned())
        );
        assert_matches!(Err(Error::NoRecipients), setup.session.begin_body());
        assert_eq!(&sender_set, setup.session.state());

        setup.session.add_recipient("u@local".to_owned()).unwrap();
        setup.session.add_recipient("u@local".to_owned()).unwrap();
        assert_eq!(
            &State::Recipients {
                sender: "a@ex.com".to_owned(),
                recipients: vec!["u@local".to_owned(), "u@local".to_owned()],
            },
            setup.session.state()
        );

        setup.session.begin_body().unwrap();
        let awaiting = setup.session.state().clone();
        assert_matches!(
            Err(Error::BodyInProgress),
            setup.session.set_sender("b@ex.com".to_owned())
        );
        assert_matches!(
            Err(Error::BodyInProgress),
            setup.session.add_recipient("v@local".to_owned())
        );
        assert_matches!(Err(Error::BodyInProgress), setup.session.begin_body());
        assert_eq!(&awaiting, setup.session.state());
    }

    #[test]
    fn body_before_data_is_rejected() {
        let mut setup = set_up();
        setup.session.set_sender("a@ex.com".to_owned()).unwrap();
        setup.session.add_recipient("u@local".to_owned()).unwrap();
        let before = setup.session.state().clone();

        assert_matches!(
            Err(Error::NotAwaitingBody),
            block_on(setup.session.complete_body(SIMPLE_MESSAGE.to_vec()))
        );
        assert_eq!(&before, setup.session.state());
    }

    #[test]
    fn complete_transaction() {
        let mut setup = set_up();
        setup.session.set_sender("a@ex.com".to_owned()).unwrap();
        setup.session.add_recipient("u@local".to_owned()).unwrap();
        setup.session.add_recipient("v@local".to_owned()).unwrap();
        setup.session.begin_body().unwrap();

        let messages =
            block_on(setup.session.complete_body(SIMPLE_MESSAGE.to_vec()))
                .unwrap();
        assert_eq!(2, messages.len());
        assert_eq!("u@local", messages[0].to);
        assert_eq!("v@local", messages[1].to);
        assert_eq!("hello\r\n", messages[0].text_body);
        assert_eq!(&State::Idle, setup.session.state());

        // A second transaction on the same session
        setup.session.set_sender("".to_owned()).unwrap();
        setup.session.add_recipient("u@local".to_owned()).unwrap();
        setup.session.begin_body().unwrap();
        let messages =
            block_on(setup.session.complete_body(SIMPLE_MESSAGE.to_vec()))
                .unwrap();
        assert_eq!("", messages[0].from);

        let account = setup.store.find_account("u@local").unwrap().unwrap();
        assert_eq!(2, setup.store.count_messages(account.id).unwrap());
    }

    #[test]
    fn failed_body_still_resets() {
        let mut setup = set_up();
        setup.session.set_sender("a@ex.com".to_owned()).unwrap();
        setup.session.add_recipient("u@local".to_owned()).unwrap();
        setup.session.begin_body().unwrap();

        let truncated = b"Content-Type: multipart/mixed; boundary=b\r\n\
                          \r\n\
                          --b\r\n\
                          \r\n\
                          hel"
        .to_vec();
        assert_matches!(
            Err(Error::MalformedMessage(_)),
            block_on(setup.session.complete_body(truncated))
        );
        assert_eq!(&State::Idle, setup.session.state());
        assert_eq!(None, setup.store.find_account("u@local").unwrap());
    }

    #[test]
    fn reset_and_close() {
        let mut setup = set_up();
        setup.session.set_sender("a@ex.com".to_owned()).unwrap();
        setup.session.add_recipient("u@local".to_owned()).unwrap();
        setup.session.reset();
        assert_eq!(&State::Idle, setup.session.state());
        setup.session.reset();
        assert_eq!(&State::Idle, setup.session.state());

        setup.session.auth_plain("zim").unwrap();

        setup.session.close();
        setup.session.reset();
        assert_eq!(&State::Closed, setup.session.state());
        assert_matches!(
            Err(Error::SessionClosed),
            setup.session.set_sender("a@ex.com".to_owned())
        );
        assert_matches!(
            Err(Error::SessionClosed),
            setup.session.add_recipient("u@local".to_owned())
        );
        assert_matches!(Err(Error::SessionClosed), setup.session.begin_body());
        assert_matches!(
            Err(Error::SessionClosed),
            setup.session.auth_plain("zim")
        );
        assert_matches!(
            Err(Error::SessionClosed),
            block_on(setup.session.complete_body(SIMPLE_MESSAGE.to_vec()))
        );
    }
}
