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

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Text included at the start of every log line for one connection.
///
/// Clones of a `LogPrefix` share the same underlying data, so the protocol
/// server and the session it drives always agree on what is known about the
/// peer.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    protocol: String,
    peer: Option<String>,
    helo: Option<String>,
    user: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: None,
                helo: None,
                user: None,
            })),
        }
    }

    pub fn set_peer(&self, peer: String) {
        self.lock().peer = Some(sanitise(peer));
    }

    pub fn set_helo(&self, helo: String) {
        self.lock().helo = Some(sanitise(helo));
    }

    pub fn set_user(&self, user: String) {
        self.lock().user = Some(sanitise(user));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing can leave `Inner` inconsistent, so a poisoned lock is still
        // fine to use.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.lock();
        write!(f, "{}", inner.protocol)?;
        if let Some(ref peer) = inner.peer {
            write!(f, ":{peer}")?;
        }

        let mut extras = Vec::new();
        if let Some(ref user) = inner.user {
            extras.push(user.clone());
        }
        if let Some(ref helo) = inner.helo {
            extras.push(format!("helo={helo}"));
        }

        if !extras.is_empty() {
            write!(f, "[{}]", extras.join(" "))?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting() {
        let prefix = LogPrefix::new("smtp".to_owned());
        assert_eq!("smtp", prefix.to_string());

        prefix.set_peer("127.0.0.1:2525".to_owned());
        assert_eq!("smtp:127.0.0.1:2525", prefix.to_string());

        let shared = prefix.clone();
        shared.set_helo("mx.example.com".to_owned());
        assert_eq!("smtp:127.0.0.1:2525[helo=mx.example.com]", prefix.to_string());

        prefix.set_user("zim".to_owned());
        assert_eq!(
            "smtp:127.0.0.1:2525[zim helo=mx.example.com]",
            shared.to_string(),
        );
    }

    #[test]
    fn control_characters_and_long_values_are_sanitised() {
        let prefix = LogPrefix::new("smtp".to_owned());
        prefix.set_helo(format!("evil\r\n{}", "x".repeat(100)));
        let s = prefix.to_string();
        assert!(!s.contains('\r'));
        assert!(!s.contains('\n'));
        assert_eq!("smtp[helo=evil".len() + 60 + 1, s.len());
    }
}
