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

//! Accepting SMTP connections.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};

use super::server::{self, Service};
use crate::support::{error::Error, log_prefix::LogPrefix};

/// Bind the configured address and serve SMTP on it.
///
/// Only returns if binding fails.
pub async fn serve(service: Arc<Service>) -> Result<(), Error> {
    let address =
        format!("{}:{}", service.config.listen, service.config.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| Error::Bind {
            address: address.clone(),
            source,
        })?;

    info!("Accepting SMTP connections on {}", address);
    serve_listener(listener, service).await
}

/// Serve SMTP on every connection `listener` accepts.
///
/// Each connection runs in its own task; a slow or stuck client never holds
/// up the others. Runs until the task is dropped.
pub async fn serve_listener(
    listener: TcpListener,
    service: Arc<Service>,
) -> Result<(), Error> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                match accept_backoff(&e) {
                    None => {
                        warn!("Transient error accepting connection: {}", e)
                    },
                    Some(delay) => {
                        error!(
                            "Error accepting connection, \
                             pausing for {:?}: {}",
                            delay, e
                        );
                        tokio::time::sleep(delay).await;
                    },
                }
                continue;
            },
        };

        let log_prefix = LogPrefix::new("smtp".to_owned());
        log_prefix.set_peer(peer.to_string());
        tokio::spawn(handle_connection(
            socket,
            log_prefix,
            Arc::clone(&service),
        ));
    }
}

/// How long to wait before accepting again after `e`.
///
/// Errors which only concern the one connection being accepted are retried
/// immediately. Anything else, such as running out of file descriptors, is
/// given time to clear up.
fn accept_backoff(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(Duration::from_secs(1)),
    }
}

async fn handle_connection(
    socket: TcpStream,
    log_prefix: LogPrefix,
    service: Arc<Service>,
) {
    info!("{} Connection established", log_prefix);
    if let Err(e) = socket.set_nodelay(true) {
        warn!("{} Failed to set TCP_NODELAY: {}", log_prefix, e);
    }

    match server::run(socket, log_prefix.clone(), service).await {
        Ok(()) => info!("{} Normal client disconnect", log_prefix),
        Err(Error::Io(e)) if io::ErrorKind::UnexpectedEof == e.kind() => {
            info!("{} Client hung up", log_prefix)
        },
        Err(e) => warn!("{} Abnormal client disconnect: {}", log_prefix, e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accept_error_backoff() {
        assert_eq!(
            None,
            accept_backoff(&io::Error::from(io::ErrorKind::ConnectionAborted))
        );
        assert_eq!(
            None,
            accept_backoff(&io::Error::from(io::ErrorKind::Interrupted))
        );
        assert_eq!(
            Some(Duration::from_secs(1)),
            accept_backoff(&io::Error::from_raw_os_error(nix::libc::EMFILE))
        );
        assert_eq!(
            Some(Duration::from_secs(1)),
            accept_backoff(&io::Error::from_raw_os_error(nix::libc::ENFILE))
        );
    }
}
