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

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use super::main::{open_store, ServeSubcommand};
use crate::delivery::Bridge;
use crate::smtp::{acceptor, Service};
use crate::support::{error::Error, system_config::SystemConfig};

pub(super) fn serve(
    mut system_config: SystemConfig,
    cmd: ServeSubcommand,
    root: PathBuf,
) {
    if let Some(port) = cmd.port {
        system_config.smtp.port = port;
    }

    let host_name = if system_config.smtp.host_name.is_empty() {
        let host_name = nix::unistd::gethostname().unwrap_or_else(|e| {
            fatal!(
                EX_OSERR,
                "Failed to determine host name; you may \
                 need to explicitly configure it: {}",
                e
            )
        });
        host_name.into_string().unwrap_or_else(|_| {
            fatal!(EX_OSERR, "System host name is not UTF-8")
        })
    } else {
        system_config.smtp.host_name.clone()
    };

    let store = open_store(&system_config, &root);
    let bridge = Arc::new(Bridge::new(store, system_config.delivery.clone()));
    let service = Arc::new(Service {
        host_name,
        config: system_config.smtp.clone(),
        bridge,
    });

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => fatal!(EX_OSERR, "Failed to start tokio runtime: {}", e),
    };

    let result = runtime.block_on(async move {
        tokio::select! {
            result = acceptor::serve(service) => result,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("Interrupted, shutting down");
                    Ok(())
                },
                Err(e) => Err(Error::Io(e)),
            },
        }
    });

    match result {
        Ok(()) => (),
        Err(e @ Error::Bind { .. }) => fatal!(EX_UNAVAILABLE, "{}", e),
        Err(e) => fatal!(EX_OSERR, "SMTP server failed: {}", e),
    }
}
