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

use std::borrow::Cow;
use std::io;
use std::pin::Pin;
use std::str;
use std::sync::Arc;
use std::task;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufStream,
};
use tokio::sync::mpsc;

use super::{codes::*, session::*, syntax::*};
use crate::delivery::Bridge;
use crate::support::{
    error::Error, log_prefix::LogPrefix, system_config::SmtpConfig,
};

/// Everything connections share.
pub struct Service {
    /// The name we report as our host name.
    pub host_name: String,
    pub config: SmtpConfig,
    pub bridge: Arc<Bridge>,
}

struct Server<S> {
    io: BufStream<S>,
    log_prefix: LogPrefix,
    service: Arc<Service>,
    session: Session,

    ineffective_commands: u32,
    /// The next deadline of the idle timer; `None` suspends it.
    deadline_tx: mpsc::Sender<Option<Instant>>,
    quit: bool,
    has_helo: bool,

    /// Whether any UNIX newlines have been seen in commands.
    unix_newlines: bool,
}

/// Run the SMTP protocol over `io` until the peer quits or the connection
/// fails.
///
/// If the connection goes idle for too long, the peer is told so (best
/// effort) and an error of kind `TimedOut` is returned.
pub async fn run<S: AsyncRead + AsyncWrite + Unpin>(
    io: S,
    log_prefix: LogPrefix,
    service: Arc<Service>,
) -> Result<(), Error> {
    let (deadline_tx, deadline_rx) = mpsc::channel(1);
    let idle_timeout = service.config.idle_timeout();

    let mut server = Server {
        io: BufStream::new(io),
        session: Session::new(Arc::clone(&service.bridge), log_prefix.clone()),
        log_prefix,
        service,

        ineffective_commands: 0,
        deadline_tx,
        quit: false,
        has_helo: false,
        unix_newlines: false,
    };

    let result = tokio::select! {
        r = server.run() => r,
        _ = idle_timer(deadline_rx, idle_timeout) => {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "Connection idle timer expired",
            )))
        },
    };

    // Any envelope still in progress is dropped here
    server.session.close();

    if matches!(
        result,
        Err(Error::Io(ref e)) if io::ErrorKind::TimedOut == e.kind(),
    ) {
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            server.send_response(
                Final,
                pc::ServiceNotAvailableClosing,
                Some((cc::TempFail, sc::BadConnection)),
                Cow::Borrowed("Idle timeout, closing connection"),
            ),
        )
        .await;
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseKind {
    /// The last in a series of responses.
    ///
    /// Indicates no continuation and forces a flush.
    Final,
    /// A non-final response that is safe to buffer.
    Delayable,
}

impl ResponseKind {
    fn or_final(self, phinal: bool) -> Self {
        if phinal {
            ResponseKind::Final
        } else {
            self
        }
    }

    fn indicator(self) -> char {
        match self {
            Final => ' ',
            Delayable => '-',
        }
    }
}

use self::ResponseKind::*;

macro_rules! require {
    ($this:expr, $($fns:ident = $arg:expr),*) => {
        $(if let Some(r) = $this.$fns($arg).await { return r; })*
    };
}

const MAX_LINE: usize = 1024;

impl<S: AsyncRead + AsyncWrite + Unpin> Server<S> {
    async fn run(&mut self) -> Result<(), Error> {
        self.send_greeting().await?;

        let mut buffer = Vec::new();
        while !self.quit {
            self.run_command(&mut buffer).await?;
        }

        Ok(())
    }

    async fn run_command(&mut self, buffer: &mut Vec<u8>) -> Result<(), Error> {
        let _ = self
            .deadline_tx
            .send(Some(Instant::now() + self.service.config.idle_timeout()))
            .await;
        buffer.clear();

        (&mut self.io)
            .take(MAX_LINE as u64)
            .read_until(b'\n', buffer)
            .await?;
        if buffer.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached at start of command",
            )));
        }

        if !buffer.ends_with(b"\n") {
            if buffer.len() < MAX_LINE {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reached within command",
                )));
            }

            self.send_response(
                Final,
                pc::CommandSyntaxError,
                Some((cc::PermFail, sc::OtherProtocolStatus)),
                Cow::Borrowed("Command line too long"),
            )
            .await?;

            // Discard the remainder of the line
            while !buffer.is_empty() && !buffer.ends_with(b"\n") {
                buffer.clear();
                (&mut self.io)
                    .take(MAX_LINE as u64)
                    .read_until(b'\n', buffer)
                    .await?;
            }

            return Ok(());
        }

        self.ineffective_commands += 1;
        if self.ineffective_commands > self.service.config.max_ineffective_commands
        {
            warn!(
                "{} Terminating connection after too many non-mail commands",
                self.log_prefix,
            );
            return self
                .send_response(
                    Final,
                    pc::ServiceNotAvailableClosing,
                    None,
                    Cow::Borrowed(
                        "Too many commands issued without sending mail",
                    ),
                )
                .await;
        }

        let line_ending_len = if buffer.ends_with(b"\r\n") {
            2
        } else {
            self.unix_newlines = true;
            1
        };

        let command_line = &buffer[..buffer.len() - line_ending_len];
        if command_line.contains(&0) {
            warn!(
                "{} Remote is speaking binary, closing connection",
                self.log_prefix,
            );
            self.quit = true;
            return Ok(());
        }

        let Ok(command_line) = str::from_utf8(command_line) else {
            warn!("{} Non-UTF-8 command received", self.log_prefix);
            return self
                .send_response(
                    Final,
                    pc::CommandSyntaxError,
                    Some((cc::PermFail, sc::OtherProtocolStatus)),
                    Cow::Borrowed("Malformed UTF-8"),
                )
                .await;
        };

        let command = match command_line.parse::<Command>() {
            Ok(c) => c,
            Err(()) => {
                let mut debug_line = command_line;
                if let Some((truncate_len, _)) =
                    debug_line.char_indices().nth(64)
                {
                    debug_line = &debug_line[..truncate_len];
                }

                warn!(
                    "{} Received bad command {debug_line:?}",
                    self.log_prefix
                );

                return if looks_like_known_command(command_line) {
                    self.send_response(
                        Final,
                        pc::ParameterSyntaxError,
                        Some((cc::PermFail, sc::InvalidCommandArguments)),
                        Cow::Borrowed("Unknown command syntax"),
                    )
                    .await
                } else {
                    self.send_response(
                        Final,
                        pc::CommandSyntaxError,
                        Some((cc::PermFail, sc::InvalidCommand)),
                        Cow::Borrowed("Unrecognised command"),
                    )
                    .await
                };
            },
        };

        match command {
            Command::Helo(command, origin) => {
                self.cmd_helo(command, origin).await
            },
            Command::Auth(mechanism, data) => {
                self.cmd_auth(mechanism, data).await
            },
            Command::MailFrom(email, size, warnings) => {
                for warning in warnings {
                    warn!("{} {}", self.log_prefix, warning);
                }
                self.cmd_mail_from(email, size).await
            },
            Command::Recipient(email, warnings) => {
                for warning in warnings {
                    warn!("{} {}", self.log_prefix, warning);
                }
                self.cmd_recipient(email).await
            },
            Command::Data => self.cmd_data().await,
            Command::Reset => self.cmd_reset().await,
            Command::Verify => self.cmd_verify().await,
            Command::Expand => self.cmd_expand().await,
            Command::Help => self.cmd_help().await,
            Command::Noop => self.cmd_noop().await,
            Command::Quit => self.cmd_quit().await,
            Command::StartTls => self.cmd_start_tls().await,
            Command::Http => self.cmd_http().await,
        }
    }

    async fn cmd_helo(
        &mut self,
        command: String,
        origin: String,
    ) -> Result<(), Error> {
        require!(self, need_helo = false);

        let extended = !"HELO".eq_ignore_ascii_case(&command);
        self.log_prefix.set_helo(origin.clone());
        info!("{} SMTP {}", self.log_prefix, command.to_ascii_uppercase());

        self.send_response(
            Delayable.or_final(!extended),
            pc::Ok,
            None,
            Cow::Owned(format!(
                "{} salutations, {}",
                self.service.host_name, origin
            )),
        )
        .await?;
        self.has_helo = true;

        if extended {
            let extensions = [
                Cow::Borrowed("8BITMIME"),
                Cow::Borrowed("AUTH PLAIN LOGIN"),
                Cow::Borrowed("ENHANCEDSTATUSCODES"),
                Cow::Borrowed("PIPELINING"),
                Cow::Owned(format!(
                    "SIZE {}",
                    self.service.config.max_message_size
                )),
                Cow::Borrowed("SMTPUTF8"),
                Cow::Borrowed("HELP"),
            ];
            let count = extensions.len();

            for (ix, ext) in extensions.into_iter().enumerate() {
                self.send_response(
                    Delayable.or_final(ix + 1 == count),
                    pc::Ok,
                    None,
                    ext,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn cmd_auth(
        &mut self,
        mechanism: String,
        data: Option<String>,
    ) -> Result<(), Error> {
        require!(self, need_helo = true, need_idle = true);

        let identity = if mechanism.eq_ignore_ascii_case("PLAIN") {
            // RFC 4616: [authzid] NUL authcid NUL passwd
            let Some(response) = self.sasl_response(data, "").await? else {
                return Ok(());
            };
            decode_sasl(&response)
                .and_then(|s| s.split('\0').nth(1).map(str::to_owned))
                .unwrap_or_default()
        } else if mechanism.eq_ignore_ascii_case("LOGIN") {
            let Some(user) = self.sasl_response(data, "VXNlcm5hbWU6").await?
            else {
                return Ok(());
            };
            // The password is read and ignored
            if self.sasl_response(None, "UGFzc3dvcmQ6").await?.is_none() {
                return Ok(());
            }
            decode_sasl(&user).unwrap_or_default()
        } else {
            warn!(
                "{} Rejected attempt to auth with method {mechanism:?}",
                self.log_prefix,
            );
            return self
                .send_response(
                    Final,
                    pc::CommandParameterNotImplemented,
                    Some((cc::PermFail, sc::InvalidCommandArguments)),
                    Cow::Borrowed("Unsupported AUTH mechanism"),
                )
                .await;
        };

        if let Err(e) = self.session.auth_plain(&identity) {
            return self.send_session_error(e).await;
        }

        self.send_response(
            Final,
            pc::AuthenticationSucceeded,
            Some((cc::Success, sc::OtherSecurity)),
            Cow::Borrowed("Authentication succeeded"),
        )
        .await
    }

    /// Obtain one SASL response from the client.
    ///
    /// If `initial` is given, it is used directly. Otherwise, `challenge` is
    /// sent and the client's reply line is read.
    ///
    /// Returns `None` if the client cancelled the exchange, in which case
    /// the response to the AUTH command has already been sent.
    async fn sasl_response(
        &mut self,
        initial: Option<String>,
        challenge: &str,
    ) -> Result<Option<String>, Error> {
        let data = match initial {
            Some(data) => data,
            None => {
                self.send_response(
                    Final,
                    pc::ServerChallenge,
                    None,
                    Cow::Borrowed(challenge),
                )
                .await?;

                let mut buffer = Vec::new();
                (&mut self.io)
                    .take(MAX_LINE as u64)
                    .read_until(b'\n', &mut buffer)
                    .await?;

                if !buffer.ends_with(b"\n") {
                    if buffer.len() < MAX_LINE {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "EOF reached during authentication",
                        )));
                    }

                    self.send_response(
                        Final,
                        pc::CommandSyntaxError,
                        Some((
                            cc::PermFail,
                            sc::AuthenticationExchangeLineTooLong,
                        )),
                        Cow::Borrowed("Line too long"),
                    )
                    .await?;
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Authentication line too long",
                    )));
                }

                let _ = buffer.pop();
                if Some(&b'\r') == buffer.last() {
                    let _ = buffer.pop();
                }

                String::from_utf8_lossy(&buffer).into_owned()
            },
        };

        if "*" == data {
            self.send_response(
                Final,
                pc::ParameterSyntaxError,
                None,
                Cow::Borrowed("SASL aborted"),
            )
            .await?;
            return Ok(None);
        }

        Ok(Some(data))
    }

    async fn cmd_mail_from(
        &mut self,
        return_path: String,
        approx_size: Option<u64>,
    ) -> Result<(), Error> {
        require!(self, need_helo = true);

        let max_size = self.service.config.max_message_size;
        if approx_size.unwrap_or(0) > max_size {
            return self
                .send_response(
                    Final,
                    pc::ExceededStorageAllocation,
                    Some((cc::PermFail, sc::MessageTooBigForSystem)),
                    Cow::Owned(format!(
                        "Maximum message size is {max_size} bytes"
                    )),
                )
                .await;
        }

        if let Err(e) = self.session.set_sender(return_path) {
            return self.send_session_error(e).await;
        }

        self.ineffective_commands = 0;
        self.send_response(
            Final,
            pc::Ok,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("OK"),
        )
        .await
    }

    async fn cmd_recipient(
        &mut self,
        forward_path: String,
    ) -> Result<(), Error> {
        require!(self, need_helo = true);

        if let Err(e) = self.session.add_recipient(forward_path) {
            return self.send_session_error(e).await;
        }

        self.ineffective_commands = 0;
        self.send_response(
            Final,
            pc::Ok,
            Some((cc::Success, sc::DestinationAddressValid)),
            Cow::Borrowed("OK"),
        )
        .await
    }

    async fn cmd_data(&mut self) -> Result<(), Error> {
        require!(self, need_helo = true);

        if let Err(e) = self.session.begin_body() {
            return self.send_session_error(e).await;
        }

        self.ineffective_commands = 0;
        self.send_response(
            Final,
            pc::StartMailInput,
            None,
            Cow::Borrowed("Go ahead"),
        )
        .await?;

        info!("{} Begin data transfer", self.log_prefix);

        let _ = self
            .deadline_tx
            .send(Some(Instant::now() + self.service.config.data_timeout()))
            .await;

        let max_size = self.service.config.max_message_size;
        let mut sink = LimitedSink::new(max_size);
        copy_with_dot_stuffing(
            Pin::new(&mut sink),
            Pin::new(&mut self.io),
            // If the client sends commands with UNIX newlines, the message
            // may well use them too, or at least end with a UNIX-delimited
            // '.'.
            self.unix_newlines,
            true,
        )
        .await?;

        let Some(raw) = sink.into_data() else {
            warn!(
                "{} Rejected message exceeding {max_size} bytes",
                self.log_prefix,
            );
            self.session.reset();
            return self
                .send_response(
                    Final,
                    pc::ExceededStorageAllocation,
                    Some((cc::PermFail, sc::MessageTooBigForSystem)),
                    Cow::Owned(format!(
                        "Maximum message size is {max_size} bytes"
                    )),
                )
                .await;
        };

        // The idle timer stays suspended while the message is stored
        let _ = self.deadline_tx.send(None).await;

        match self.session.complete_body(raw).await {
            Ok(messages) => {
                info!(
                    "{} Completed data transfer successfully, \
                     stored {} message(s)",
                    self.log_prefix,
                    messages.len(),
                );
                self.send_response(
                    Final,
                    pc::Ok,
                    Some((cc::Success, sc::Undefined)),
                    Cow::Borrowed("OK"),
                )
                .await
            },

            Err(Error::MalformedMessage(reason)) => {
                warn!(
                    "{} Rejected malformed message: {}",
                    self.log_prefix, reason,
                );
                self.send_response(
                    Final,
                    pc::TransactionFailed,
                    Some((cc::PermFail, sc::OtherMediaError)),
                    Cow::Owned(format!("Malformed message: {reason}")),
                )
                .await
            },

            Err(e) => {
                error!("{} Failed to store message: {}", self.log_prefix, e);
                self.send_response(
                    Final,
                    pc::ActionAborted,
                    Some((cc::TempFail, sc::OtherMailSystem)),
                    Cow::Borrowed("Internal error storing message"),
                )
                .await
            },
        }
    }

    async fn cmd_reset(&mut self) -> Result<(), Error> {
        self.session.reset();
        self.send_response(
            Final,
            pc::Ok,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("OK"),
        )
        .await
    }

    async fn cmd_verify(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::CannotVerify,
            Some((cc::Success, sc::OtherSecurity)),
            Cow::Borrowed("VRFY not supported; send mail and see"),
        )
        .await
    }

    async fn cmd_expand(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::ActionNotTakenPermanent,
            Some((cc::PermFail, sc::SystemNotCapableOfSelectedFeatures)),
            Cow::Borrowed("There are no mailing lists here"),
        )
        .await
    }

    async fn cmd_help(&mut self) -> Result<(), Error> {
        for line in [
            "This is the Mailsink SMTP server.",
            "Every message sent here is kept, for any recipient at all.",
            "Nothing is ever relayed.",
        ] {
            self.send_response(
                Delayable,
                pc::HelpMessage,
                Some((cc::Success, sc::Undefined)),
                Cow::Borrowed(line),
            )
            .await?;
        }

        self.send_response(
            Final,
            pc::HelpMessage,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("End of HELP"),
        )
        .await
    }

    async fn cmd_noop(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::Ok,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("OK"),
        )
        .await
    }

    async fn cmd_quit(&mut self) -> Result<(), Error> {
        self.session.close();
        self.quit = true;
        let _ = self
            .send_response(
                Final,
                pc::ServiceClosing,
                Some((cc::Success, sc::Undefined)),
                Cow::Borrowed("Bye"),
            )
            .await;
        Ok(())
    }

    async fn cmd_start_tls(&mut self) -> Result<(), Error> {
        require!(self, need_helo = true);

        self.send_response(
            Final,
            pc::CommandNotImplemented,
            Some((cc::PermFail, sc::InvalidCommand)),
            Cow::Borrowed("TLS not available"),
        )
        .await
    }

    async fn cmd_http(&mut self) -> Result<(), Error> {
        warn!(
            "{} Remote is speaking HTTP, closing connection",
            self.log_prefix,
        );
        self.quit = true;
        self.send_response(
            Final,
            pc::CommandSyntaxError,
            Some((cc::PermFail, sc::InvalidCommand)),
            Cow::Borrowed("This is an SMTP server"),
        )
        .await
    }

    /// Report an envelope ordering error from the session to the client.
    ///
    /// Other errors are returned as is.
    async fn send_session_error(&mut self, e: Error) -> Result<(), Error> {
        if !e.is_ordering() {
            return Err(e);
        }

        self.send_response(
            Final,
            pc::BadSequenceOfCommands,
            Some((cc::PermFail, sc::InvalidCommand)),
            Cow::Owned(e.to_string()),
        )
        .await
    }

    async fn need_helo(&mut self, present: bool) -> Option<Result<(), Error>> {
        self.check_need(
            self.has_helo,
            present,
            "Already got HELO",
            "Still waiting for HELO",
        )
        .await
    }

    /// Require that no mail transaction be in progress.
    async fn need_idle(&mut self, idle: bool) -> Option<Result<(), Error>> {
        self.check_need(
            State::Idle == *self.session.state(),
            idle,
            "No mail transaction in progress",
            "Mail transaction in progress",
        )
        .await
    }

    async fn check_need(
        &mut self,
        current_status: bool,
        desired_status: bool,
        message_if_already_present: &str,
        message_if_missing: &str,
    ) -> Option<Result<(), Error>> {
        if current_status != desired_status {
            Some(
                self.send_response(
                    Final,
                    pc::BadSequenceOfCommands,
                    Some((cc::PermFail, sc::InvalidCommand)),
                    Cow::Borrowed(if current_status {
                        message_if_already_present
                    } else {
                        message_if_missing
                    }),
                )
                .await,
            )
        } else {
            None
        }
    }

    async fn send_greeting(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::ServiceReady,
            None,
            Cow::Owned(format!(
                "{} ESMTP {} {}.{}.{} ready",
                self.service.host_name,
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION_MAJOR"),
                env!("CARGO_PKG_VERSION_MINOR"),
                env!("CARGO_PKG_VERSION_PATCH"),
            )),
        )
        .await
    }

    async fn send_response(
        &mut self,
        kind: ResponseKind,
        primary_code: PrimaryCode,
        secondary_code: Option<(ClassCode, SubjectCode)>,
        quip: Cow<'_, str>,
    ) -> Result<(), Error> {
        self.io
            .write_all(
                format_response(kind, primary_code, secondary_code, &quip)
                    .as_bytes(),
            )
            .await?;

        if primary_code == pc::ServiceClosing
            || primary_code == pc::ServiceNotAvailableClosing
        {
            self.quit = true;
        }

        match kind {
            Final => self.io.flush().await?,
            Delayable => (),
        }

        Ok(())
    }
}

fn format_response(
    kind: ResponseKind,
    primary_code: PrimaryCode,
    secondary_code: Option<(ClassCode, SubjectCode)>,
    quip: &str,
) -> String {
    use std::fmt::Write as _;

    let mut s = String::new();
    let _ = write!(s, "{}{}", primary_code as u16, kind.indicator());
    if let Some((class, subject)) = secondary_code {
        let subject = subject as u16;
        let split = if subject >= 100 { 100 } else { 10 };

        let _ = write!(
            s,
            "{}.{}.{} ",
            class as u8,
            subject / split,
            subject % split
        );
    }

    let _ = write!(s, "{}\r\n", quip);
    s
}

/// Decode a base64 SASL response into a string.
///
/// `=` stands for the empty response.
fn decode_sasl(data: &str) -> Option<String> {
    if "=" == data {
        return Some(String::new());
    }

    base64::decode(data)
        .ok()
        .and_then(|d| String::from_utf8(d).ok())
}

/// Collects a message body in memory up to a size limit.
///
/// Writes past the limit still succeed so that the rest of the transfer can
/// be consumed, but the data is dropped and the sink remembers that it
/// overflowed.
struct LimitedSink {
    data: Vec<u8>,
    limit: u64,
    overflowed: bool,
}

impl LimitedSink {
    fn new(limit: u64) -> Self {
        Self {
            data: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    /// The collected data, or `None` if the limit was exceeded.
    fn into_data(self) -> Option<Vec<u8>> {
        if self.overflowed {
            None
        } else {
            Some(self.data)
        }
    }
}

impl AsyncWrite for LimitedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.overflowed {
            if (this.data.len() + buf.len()) as u64 > this.limit {
                this.overflowed = true;
                this.data = Vec::new();
            } else {
                this.data.extend_from_slice(buf);
            }
        }

        task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }
}

/// Copies `src` to `dst`, undoing dot stuffing, consuming up to and including
/// the line consisting of just `.`.
///
/// If `unix_lines` is true, bare LF line endings are accepted and converted
/// to CRLF. Unless `detect_line_endings` is false, `unix_lines` is switched
/// on when the first line ending seen is a bare LF.
///
/// While `unix_lines` is false, only CRLF ends a line, which keeps arbitrary
/// binary content intact.
async fn copy_with_dot_stuffing(
    mut dst: Pin<&mut impl AsyncWriteExt>,
    mut src: Pin<&mut impl AsyncBufReadExt>,
    mut unix_lines: bool,
    mut detect_line_endings: bool,
) -> io::Result<()> {
    /// Write `data` to `dst`, converting a trailing bare LF to CRLF if
    /// `unix_lines` is set.
    ///
    /// `data` is either a partial line or the end of a line.
    /// `has_trailing_cr` tells whether the previous write ended with a CR,
    /// in which case a lone LF completes a CRLF.
    async fn write_with_line_conversion(
        mut dst: Pin<&mut impl AsyncWriteExt>,
        data: &[u8],
        has_trailing_cr: bool,
        unix_lines: bool,
    ) -> io::Result<()> {
        if unix_lines
            && data.ends_with(b"\n")
            && !data.ends_with(b"\r\n")
            && (!has_trailing_cr || b"\n" != data)
        {
            dst.as_mut().write_all(&data[..data.len() - 1]).await?;
            dst.as_mut().write_all(b"\r\n").await?;
        } else {
            dst.write_all(data).await?;
        }

        Ok(())
    }

    // The content ends at a line which is exactly ".\r\n". Any other line
    // starting with '.' loses that first '.'. The CRLF before the terminator
    // belongs to the content.
    //
    // A bare LF is not a line ending in binary mode, so e.g. "\n.\n" inside
    // the content passes through untouched.

    // Whether the next read starts a new line.
    let mut start_of_line = true;
    // Whether the last read ended with CR, so that a following lone LF still
    // completes a line ending.
    let mut has_trailing_cr = false;

    loop {
        let mut src_buffer = src.as_mut();
        let mut buffer = src_buffer.fill_buf().await?;

        if buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF encountered in DATA payload",
            ));
        }

        if let Some(eol) = memchr::memchr(b'\n', buffer) {
            buffer = &buffer[..=eol];

            if detect_line_endings {
                if !buffer.ends_with(b"\r\n") && !has_trailing_cr {
                    unix_lines = true;
                }

                detect_line_endings = false;
            }
        }

        let buffer_len = buffer.len();

        if start_of_line {
            // ".\n" is not a valid line in binary mode, but it can only mean
            // the end of the content.
            if b".\r\n" == buffer || b".\n" == buffer {
                src.as_mut().consume(buffer_len);
                break;
            }

            if b".\r" == buffer {
                // End of content if an LF follows.
                src.as_mut().consume(buffer_len);

                let mut extra = [0u8; 1];
                src.as_mut().read_exact(&mut extra).await?;
                if b'\n' == extra[0] {
                    break;
                }

                // The lone '.' was invalid anyway, so dropping it is fine.
                dst.write_all(b"\r").await?;
                dst.write_all(&extra).await?;
                has_trailing_cr = b'\r' == extra[0];
                start_of_line = false;
                continue;
            }

            if b"." == buffer {
                // Either the terminator or a stuffed dot; the next bytes
                // decide.
                src.as_mut().consume(buffer_len);

                let mut extra = [0u8; 2];
                src.as_mut().read_exact(&mut extra[..1]).await?;

                if b'\n' == extra[0] {
                    break;
                }

                src.as_mut().read_exact(&mut extra[1..]).await?;

                if b"\r\n" == &extra {
                    break;
                }

                // extra[0] is not LF, so a line ending can only be at the
                // end of `extra`.
                write_with_line_conversion(
                    dst.as_mut(),
                    &extra,
                    false,
                    unix_lines,
                )
                .await?;
                has_trailing_cr = extra.ends_with(b"\r");
                start_of_line = unix_lines && extra.ends_with(b"\n");
                continue;
            }
        }

        let line_contents = if b'.' == buffer[0] && start_of_line {
            &buffer[1..]
        } else {
            buffer
        };
        write_with_line_conversion(
            dst.as_mut(),
            line_contents,
            has_trailing_cr,
            unix_lines,
        )
        .await?;

        start_of_line = buffer.ends_with(b"\r\n")
            || (b"\n" == buffer && has_trailing_cr)
            || (unix_lines && buffer.ends_with(b"\n"));
        has_trailing_cr = buffer.ends_with(b"\r");
        src.as_mut().consume(buffer_len);
    }

    Ok(())
}

/// Runs until either the deadline channel is closed or the current deadline
/// has passed.
///
/// Receiving `None` suspends the timer until the next deadline arrives.
async fn idle_timer(
    mut deadline_rx: mpsc::Receiver<Option<Instant>>,
    initial: Duration,
) {
    let mut deadline = Some(Instant::now() + initial);

    loop {
        let received = match deadline {
            Some(d) => {
                match tokio::time::timeout_at(d.into(), deadline_rx.recv())
                    .await
                {
                    Err(_) => return, // Timed out
                    Ok(r) => r,
                }
            },
            None => deadline_rx.recv().await,
        };

        match received {
            None => return, // Done
            Some(d) => deadline = d,
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn copy_with_dot_stuffing_sync(
        stuffed: &[u8],
        buffer_size: usize,
        unix_lines: bool,
        detect_line_endings: bool,
    ) -> Vec<u8> {
        let mut decoded_bytes = Vec::<u8>::new();
        let mut reader =
            tokio::io::BufReader::with_capacity(buffer_size, stuffed);
        futures::executor::block_on(copy_with_dot_stuffing(
            Pin::new(&mut decoded_bytes),
            Pin::new(&mut reader),
            unix_lines,
            detect_line_endings,
        ))
        .unwrap();

        decoded_bytes
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 4096,
            ..ProptestConfig::default()
        })]

        #[test]
        fn binary_dot_stuffing_decodes_properly(
            content in "[x.\r\n]{0,100}\r\n",
            buffer_size in 1usize..=32,
        ) {
            let mut stuffed = content.replace("\r\n.", "\r\n..");
            if stuffed.starts_with('.') {
                stuffed = format!(".{}", stuffed);
            }
            stuffed.push_str(".\r\n");

            let decoded_bytes = copy_with_dot_stuffing_sync(
                stuffed.as_bytes(),
                buffer_size,
                false,
                false,
            );

            prop_assert_eq!(content, str::from_utf8(&decoded_bytes).unwrap());
        }

        #[test]
        fn text_dot_stuffing_decodes_properly(
            content in "[x.\r\n]{0,100}\r\n",
            buffer_size in 1usize..=32,
        ) {
            let mut stuffed = content.replace("\n.", "\n..");
            if stuffed.starts_with('.') {
                stuffed = format!(".{}", stuffed);
            }
            stuffed.push_str(".\n");

            let decoded_bytes = copy_with_dot_stuffing_sync(
                stuffed.as_bytes(),
                buffer_size,
                true,
                false,
            );

            let converted_content = content.replace("\r\n", "\n")
                .replace('\n', "\r\n");
            prop_assert_eq!(
                converted_content,
                str::from_utf8(&decoded_bytes).unwrap(),
            );
        }
    }

    #[test]
    fn dot_stuffing_line_ending_detection() {
        assert_eq!(
            b"foo\r\nbar\n.\r\n".to_vec(),
            copy_with_dot_stuffing_sync(
                b"foo\r\nbar\n.\r\n.\r\n",
                64,
                false,
                true,
            ),
        );
        assert_eq!(
            b"foo\r\nbar\r\nbaz\r\n".to_vec(),
            copy_with_dot_stuffing_sync(
                b"foo\nbar\r\nbaz\n.\n",
                64,
                false,
                true,
            ),
        );
    }

    #[test]
    fn dot_stuffing_rejects_truncated_payload() {
        let mut decoded_bytes = Vec::<u8>::new();
        let mut reader = tokio::io::BufReader::new(&b"foo\r\nbar\r\n"[..]);
        let result = futures::executor::block_on(copy_with_dot_stuffing(
            Pin::new(&mut decoded_bytes),
            Pin::new(&mut reader),
            false,
            true,
        ));
        assert_eq!(
            io::ErrorKind::UnexpectedEof,
            result.unwrap_err().kind()
        );
    }

    #[test]
    fn limited_sink_discards_oversized_data() {
        futures::executor::block_on(async {
            let mut sink = LimitedSink::new(8);
            sink.write_all(b"0123").await.unwrap();
            sink.write_all(b"4567").await.unwrap();
            assert_eq!(Some(b"01234567".to_vec()), sink.into_data());

            let mut sink = LimitedSink::new(8);
            sink.write_all(b"0123").await.unwrap();
            sink.write_all(b"45678").await.unwrap();
            sink.write_all(b"9").await.unwrap();
            assert_eq!(None, sink.into_data());
        });
    }

    #[test]
    fn response_formatting() {
        assert_eq!(
            "250 2.1.5 OK\r\n",
            format_response(
                Final,
                pc::Ok,
                Some((cc::Success, sc::DestinationAddressValid)),
                "OK",
            ),
        );
        assert_eq!(
            "250-PIPELINING\r\n",
            format_response(Delayable, pc::Ok, None, "PIPELINING"),
        );
        assert_eq!(
            "503 5.5.1 No recipients\r\n",
            format_response(
                Final,
                pc::BadSequenceOfCommands,
                Some((cc::PermFail, sc::InvalidCommand)),
                "No recipients",
            ),
        );
        assert_eq!(
            "334 \r\n",
            format_response(Final, pc::ServerChallenge, None, ""),
        );
    }

    #[test]
    fn sasl_decoding() {
        assert_eq!(Some(String::new()), decode_sasl("="));
        assert_eq!(
            Some("\0zim\0hunter2".to_owned()),
            decode_sasl(&base64::encode("\0zim\0hunter2")),
        );
        assert_eq!(None, decode_sasl("not base64!"));
    }
}
