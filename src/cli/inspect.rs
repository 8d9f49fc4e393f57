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

//! Commands for looking at what has been received.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::prelude::*;

use super::main::{open_store, ListSubcommand, MessageSubcommand};
use crate::delivery::Bridge;
use crate::store::{Account, Message};
use crate::support::{error::Error, sysexits::*, system_config::SystemConfig};

pub(super) fn list(
    system_config: SystemConfig,
    cmd: ListSubcommand,
    root: PathBuf,
) {
    let bridge = open_bridge(system_config, root);
    let account = find_account(&bridge, &cmd.email);

    let (count, messages) = match bridge
        .store()
        .count_messages(account.id)
        .and_then(|count| {
            Ok((count, bridge.store().list_messages(account.id)?))
        }) {
        Ok(r) => r,
        Err(e) => fail(&cmd.email, e),
    };

    println!("{} message(s) for {}", count, account.email);
    for message in &messages {
        println!("{}", format_summary(message));
    }
}

pub(super) fn show(
    system_config: SystemConfig,
    cmd: MessageSubcommand,
    root: PathBuf,
) {
    let bridge = open_bridge(system_config, root);
    let account = find_account(&bridge, &cmd.email);

    match bridge.store().get_message(&cmd.message_id, account.id) {
        Ok(message) => print!("{}", format_message(&message)),
        Err(e) => fail(&cmd.message_id, e),
    }
}

pub(super) fn delete(
    system_config: SystemConfig,
    cmd: MessageSubcommand,
    root: PathBuf,
) {
    let bridge = open_bridge(system_config, root);
    let account = find_account(&bridge, &cmd.email);

    if let Err(e) = bridge
        .store()
        .soft_delete_message(&cmd.message_id, account.id)
    {
        fail(&cmd.message_id, e);
    }
}

fn open_bridge(system_config: SystemConfig, root: PathBuf) -> Bridge {
    let store = open_store(&system_config, &root);
    Bridge::new(store, system_config.delivery)
}

fn find_account(bridge: &Bridge, email: &str) -> Account {
    let email = bridge.normalise_address(email);
    match bridge.store().find_account(&email) {
        Ok(Some(account)) => account,
        Ok(None) => die!(EX_NOUSER, "{}: No such account", email),
        Err(e) => fail(&email, e),
    }
}

fn fail(what: &str, e: Error) -> ! {
    eprintln!("{}: {}", what, e);
    Sysexit::for_error(&e).exit()
}

fn format_summary(message: &Message) -> String {
    format!(
        "{}  {}  {:<32}  {}",
        message.message_id,
        message
            .received_at
            .0
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M"),
        message.from,
        message.subject,
    )
}

fn format_message(message: &Message) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "Message-ID: {}", message.message_id);
    let _ = writeln!(s, "Date: {}", message.received_at.0.to_rfc2822());
    let _ = writeln!(s, "From: {}", message.from);
    let _ = writeln!(s, "To: {}", message.to);
    let _ = writeln!(s, "Subject: {}", message.subject);
    if message.html_body.is_some() {
        let _ = writeln!(s, "X-Has-HTML: yes");
    }
    s.push('\n');
    s.push_str(&message.text_body);
    if !message.text_body.ends_with('\n') {
        s.push('\n');
    }
    s
}
