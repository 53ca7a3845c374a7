/*
 * petrel mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::{
    auth::{self, AuthError},
    command::{
        AcceptArgs, AuthArgs, BdatArgs, EhloArgs, HeloArgs, MailFromArgs, RcptToArgs, XclientArgs,
    },
    handler::{BoxedSink, SessionHandler, SinkDisposition},
    negotiator,
    outcome::{
        args_error_reply, static_reply, ConnectOutcome, DataStartOutcome, HelloOutcome,
        RecipientOutcome, SenderOutcome,
    },
    reader::{parse_command_line, Reader, COMMAND_LINE_MAX, COMMAND_LINE_MAX_UTF8},
    writer::ReplyWriter,
    Error, UnparsedArgs, Verb,
};
use petrel_common::{
    auth::Mechanism, BodyType, ClientName, ConnectionKind, ConnectionMetadata, Domain, Envelope,
    HoldRequest, Recipient, Reply, SaslProps, Stage, TlsProps,
};
use petrel_config::Config;
use tokio_rustls::rustls;
use tokio_stream::StreamExt;

/// How a message exchange is transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageMode {
    /// DATA with dot-stuffing and the `CRLF.CRLF` terminator.
    Data,
    /// BDAT with exactly-counted opaque chunks.
    Bdat { size: u64, last: bool },
}

enum HandshakeOutcome {
    Message(MessageMode),
    UpgradeTls,
    Authenticate {
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    },
    Quit,
}

/// How one message exchange ended.
enum MessageEnd {
    /// End-of-data accepted; the stream yields one item.
    Accepted,
    /// The exchange finished with a rejection; the session continues.
    Rejected,
    /// The connection is over (disconnect, timeout or QUIT inside BDAT).
    Closed,
}

/// Single-slot outcome a command dispatch can arm; the command loop returns
/// it to the session driver once the window's replies are out.
#[derive(Default)]
struct ReceiverContext {
    outcome: Option<HandshakeOutcome>,
}

impl ReceiverContext {
    fn deny(&mut self) {
        self.outcome = Some(HandshakeOutcome::Quit);
    }

    fn message(&mut self, mode: MessageMode) {
        self.outcome = Some(HandshakeOutcome::Message(mode));
    }

    fn upgrade_tls(&mut self) {
        self.outcome = Some(HandshakeOutcome::UpgradeTls);
    }

    fn authenticate(&mut self, mechanism: Mechanism, initial_response: Option<Vec<u8>>) {
        self.outcome = Some(HandshakeOutcome::Authenticate {
            mechanism,
            initial_response,
        });
    }

    const fn is_armed(&self) -> bool {
        self.outcome.is_some()
    }

    fn take(&mut self) -> Option<HandshakeOutcome> {
        self.outcome.take()
    }
}

/// Running count of 4xx/5xx replies and the thresholds that escalate them.
struct ErrorCounter {
    seen: i64,
    soft_threshold: i64,
    hard_threshold: i64,
}

/// The per-connection SMTP session engine.
///
/// Owns the connection metadata and the transaction envelope exclusively; the
/// application only ever sees read-only views through the
/// [`SessionHandler`] callbacks, and answers with outcome enums the engine
/// maps onto the wire.
pub struct Receiver<
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
> {
    sink: ReplyWriter<W>,
    stream: Reader<R>,
    metadata: ConnectionMetadata,
    envelope: Option<Envelope>,
    stage: Stage,
    message_sink: Option<BoxedSink>,
    error_counter: ErrorCounter,
    auth_attempts: i64,
    context: ReceiverContext,
    config: std::sync::Arc<Config>,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    xclient_allowed: bool,
}

impl Receiver<tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf> {
    /// Create a new [`Receiver`] from a TCP/IP stream.
    #[inline]
    #[must_use]
    pub fn new(
        tcp_stream: tokio::net::TcpStream,
        args: AcceptArgs,
        config: std::sync::Arc<Config>,
        tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
        xclient_allowed: bool,
    ) -> Self {
        let (read, write) = tcp_stream.into_split();
        let pipelining = config.server.esmtp.pipelining;
        Self {
            sink: ReplyWriter::new(write),
            stream: Reader::new(read, pipelining),
            metadata: ConnectionMetadata::new(
                args.client_addr,
                args.server_addr,
                args.kind,
                args.timestamp,
                args.uuid,
            ),
            envelope: None,
            stage: Stage::Connect,
            message_sink: None,
            error_counter: ErrorCounter {
                seen: 0,
                soft_threshold: config.server.smtp.error.soft_count,
                hard_threshold: config.server.smtp.error.hard_count,
            },
            auth_attempts: 0,
            context: ReceiverContext::default(),
            config,
            tls_config,
            xclient_allowed,
        }
    }

    /// Drive the session; each item is one successfully completed
    /// transaction. Errors have already been logged.
    #[inline]
    pub fn into_stream<H: SessionHandler>(
        self,
        handler: H,
    ) -> impl tokio_stream::Stream<Item = Result<(), ()>> {
        self.into_stream_with_error(handler).map(|item| match item {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(?e);
                Err(())
            }
        })
    }

    fn into_stream_with_error<H: SessionHandler>(
        mut self,
        mut handler: H,
    ) -> impl tokio_stream::Stream<Item = Result<(), Error>> {
        async_stream::try_stream! {
            match handler.on_connect(&self.metadata).await {
                ConnectOutcome::Accept => (),
                ConnectOutcome::Deny => {
                    self.sink
                        .direct_send(&static_reply("554 5.7.1 Connection refused\r\n"))
                        .await?;
                    return;
                }
                ConnectOutcome::TempFail => {
                    self.sink
                        .direct_send(&static_reply("421 4.3.2 Service not available\r\n"))
                        .await?;
                    return;
                }
            }

            if self.metadata.kind == ConnectionKind::Tunneled {
                if self.tls_config.is_none() {
                    tracing::warn!("tunneled connection without a TLS configuration, closing");
                    return;
                }
                for await item in self.upgrade_tls(handler) {
                    yield item?;
                }
                return;
            }

            self.sink.direct_send(&self.banner()).await?;

            loop {
                match self.command_loop(&mut handler).await? {
                    HandshakeOutcome::Message(mode) => {
                        match self.receive_message(&mut handler, mode).await? {
                            MessageEnd::Accepted => yield (),
                            MessageEnd::Rejected => (),
                            MessageEnd::Closed => return,
                        }
                        if matches!(self.context.take(), Some(HandshakeOutcome::Quit)) {
                            return;
                        }
                    }
                    HandshakeOutcome::UpgradeTls => {
                        for await item in self.upgrade_tls(handler) {
                            yield item?;
                        }
                        return;
                    }
                    HandshakeOutcome::Authenticate { mechanism, initial_response } => {
                        self.handle_authenticate(&mut handler, mechanism, initial_response).await?;
                        if matches!(self.context.take(), Some(HandshakeOutcome::Quit)) {
                            return;
                        }
                    }
                    HandshakeOutcome::Quit => break,
                }
            }
        }
    }

    /// STARTTLS (or the tunneled pre-banner handshake): negotiate, then run
    /// the session again on the secured transport with the ESMTP state reset
    /// (RFC 3207 §4.2). A failed handshake ends the stream with nothing
    /// further sent in clear.
    fn upgrade_tls<H: SessionHandler>(
        self,
        handler: H,
    ) -> impl tokio_stream::Stream<Item = Result<(), Error>> {
        async_stream::try_stream! {
            #[allow(clippy::expect_used)]
            let tls_config = self.tls_config.clone().expect("caller checked TLS availability");
            let handshake_timeout = self
                .config
                .server
                .tls
                .as_ref()
                .map_or(std::time::Duration::from_secs(2), |tls| tls.handshake_timeout);

            #[allow(clippy::expect_used)]
            let tcp_stream = self
                .sink
                .into_inner()
                .reunite(self.stream.into_inner())
                .expect("the halves come from one stream");

            let (tls_stream, tls) =
                negotiate_tls(tcp_stream, tls_config, handshake_timeout).await?;
            let (read, write) = tokio::io::split(tls_stream);

            let mut metadata = self.metadata;
            metadata.tls = Some(tls);
            metadata.reset_esmtp_state();

            let pipelining = self.config.server.esmtp.pipelining;
            let secured = Receiver {
                sink: ReplyWriter::new(write),
                stream: Reader::new(read, pipelining),
                metadata,
                envelope: None,
                stage: Stage::Connect,
                message_sink: None,
                error_counter: self.error_counter,
                auth_attempts: self.auth_attempts,
                context: ReceiverContext::default(),
                config: self.config,
                tls_config: self.tls_config,
                xclient_allowed: self.xclient_allowed,
            };

            for await item in secured.into_secured_stream(handler) {
                yield item?;
            }
        }
    }
}

/// Run the server side of a TLS handshake and describe what was negotiated.
async fn negotiate_tls(
    tcp_stream: tokio::net::TcpStream,
    tls_config: std::sync::Arc<rustls::ServerConfig>,
    handshake_timeout: std::time::Duration,
) -> Result<
    (
        tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
        TlsProps,
    ),
    Error,
> {
    let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
    let tls_stream = tokio::time::timeout(handshake_timeout, acceptor.accept(tcp_stream))
        .await
        .map_err(|_elapsed| Error::Timeout {
            after: handshake_timeout,
            reason: "tls handshake",
        })??;

    let negotiated = tls_stream.get_ref().1;
    #[allow(clippy::expect_used)]
    let tls = TlsProps {
        server_name: negotiated.sni_hostname().map(str::to_string),
        protocol_version: negotiated
            .protocol_version()
            .expect("version is set once the handshake is over"),
        cipher_suite: negotiated
            .negotiated_cipher_suite()
            .expect("cipher suite is set once the handshake is over")
            .suite(),
        peer_certificates: negotiated
            .peer_certificates()
            .map(<[rustls::Certificate]>::to_vec),
    };
    Ok((tls_stream, tls))
}

impl<W: tokio::io::AsyncWrite + Unpin + Send, R: tokio::io::AsyncRead + Unpin + Send>
    Receiver<W, R>
{
    /// The session loop on an already-secured transport. STARTTLS cannot
    /// occur here: the negotiator stops advertising it and the command is
    /// answered with 502 before an outcome can be armed.
    fn into_secured_stream<H: SessionHandler>(
        mut self,
        mut handler: H,
    ) -> impl tokio_stream::Stream<Item = Result<(), Error>> {
        async_stream::try_stream! {
            if self.metadata.kind == ConnectionKind::Tunneled {
                self.sink.direct_send(&self.banner()).await?;
            }

            loop {
                match self.command_loop(&mut handler).await? {
                    HandshakeOutcome::Message(mode) => {
                        match self.receive_message(&mut handler, mode).await? {
                            MessageEnd::Accepted => yield (),
                            MessageEnd::Rejected => (),
                            MessageEnd::Closed => return,
                        }
                        if matches!(self.context.take(), Some(HandshakeOutcome::Quit)) {
                            return;
                        }
                    }
                    HandshakeOutcome::UpgradeTls => {
                        tracing::error!("STARTTLS armed on a secured transport, closing");
                        return;
                    }
                    HandshakeOutcome::Authenticate { mechanism, initial_response } => {
                        self.handle_authenticate(&mut handler, mechanism, initial_response).await?;
                        if matches!(self.context.take(), Some(HandshakeOutcome::Quit)) {
                            return;
                        }
                    }
                    HandshakeOutcome::Quit => break,
                }
            }
        }
    }

    fn banner(&self) -> Reply {
        static_reply(&format!(
            "220 {} ESMTP {}\r\n",
            self.config.server.name, self.config.server.product
        ))
    }

    /// Read windows and dispatch their commands until an outcome is armed or
    /// the client goes away.
    async fn command_loop<H: SessionHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<HandshakeOutcome, Error> {
        loop {
            let window = tokio::time::timeout(
                self.config.server.smtp.timeout_client.command,
                self.stream.read_window(),
            )
            .await;

            let batch = match window {
                // the idle timeout closes with no reply
                Err(_elapsed) => {
                    tracing::warn!("no command within the idle timeout, closing");
                    self.cancel_transaction(handler).await;
                    return Ok(HandshakeOutcome::Quit);
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(batch)) if batch.is_empty() => {
                    self.cancel_transaction(handler).await;
                    return Ok(HandshakeOutcome::Quit);
                }
                Ok(Ok(batch)) => batch,
            };

            for command in batch {
                self.dispatch(handler, command).await?;
                if self.context.is_armed() {
                    break;
                }
            }

            if !self.sink.is_empty() {
                self.sink.flush().await?;
            }
            if let Some(outcome) = self.context.take() {
                return Ok(outcome);
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn dispatch<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        command: Result<(Verb, UnparsedArgs), Error>,
    ) -> Result<(), Error> {
        let (verb, args) = match command {
            Ok(command) => command,
            Err(e) => {
                if let Some(parse_error) = e.as_args_error() {
                    let reply = args_error_reply(parse_error, Verb::Unknown);
                    return self.send_reply(reply, Verb::Unknown).await;
                }
                tracing::error!(?e);
                return Err(e);
            }
        };
        tracing::trace!(?verb, args = ?std::str::from_utf8(&args.0));

        let reply = match (verb, self.stage) {
            (Verb::Helo, _) => match HeloArgs::try_from(args) {
                Ok(args) => Some(
                    self.hello(handler, false, ClientName::Domain(args.client_name))
                        .await,
                ),
                Err(e) => Some(args_error_reply(&e, verb)),
            },
            (Verb::Ehlo, _) => match EhloArgs::try_from(args) {
                Ok(args) => Some(self.hello(handler, true, args.client_name).await),
                Err(e) => Some(args_error_reply(&e, verb)),
            },
            (Verb::Noop, _) => Some(static_reply("250 2.0.0 OK\r\n")),
            (Verb::Help, _) => Some(static_reply(
                "214 2.0.0 Commands: EHLO HELO MAIL RCPT DATA BDAT RSET NOOP QUIT VRFY EXPN STARTTLS AUTH\r\n",
            )),
            (Verb::Rset, _) => Some(self.reset(handler).await),
            (Verb::Quit, _) => {
                self.context.deny();
                Some(static_reply(
                    "221 2.0.0 Service closing transmission channel\r\n",
                ))
            }
            (Verb::StartTls, Stage::Helo) => Some(self.starttls()),
            (Verb::Auth, Stage::Helo) => self.auth_command(handler, args),
            (Verb::MailFrom, Stage::Helo) => Some(self.mail_from(handler, args).await),
            (Verb::RcptTo, Stage::MailFrom | Stage::RcptTo) => {
                Some(self.rcpt_to(handler, args).await)
            }
            (Verb::Data, Stage::RcptTo) => Some(self.data_start(handler).await),
            (Verb::Bdat, Stage::RcptTo) => self.bdat_start(handler, args).await?,
            (Verb::Vrfy, _) => Some(self.verify(handler, args).await),
            (Verb::Expn, _) => Some(self.expand(handler, args).await),
            (Verb::Xclient, _) => Some(self.xclient(args)),
            (Verb::Unknown, _) => Some(static_reply("500 5.5.2 Command unrecognized\r\n")),
            (Verb::MailFrom, Stage::Connect) => {
                Some(static_reply("503 5.5.1 EHLO/HELO required\r\n"))
            }
            _otherwise => Some(static_reply("503 5.5.1 Bad sequence of commands\r\n")),
        };

        if let Some(reply) = reply {
            self.send_reply(reply, verb).await?;
        }
        Ok(())
    }

    /// Count errors and escalate: past the soft threshold every error reply
    /// is delayed, past the hard threshold the connection closes.
    async fn escalate(&mut self, reply: Reply) -> Reply {
        if !reply.code().is_error() {
            return reply;
        }
        let counter = &mut self.error_counter;
        counter.seen += 1;

        if counter.hard_threshold != -1 && counter.seen >= counter.hard_threshold {
            self.context.deny();
            return reply.extended(&static_reply(
                "451 4.7.0 Too many errors from the client\r\n",
            ));
        }
        if counter.soft_threshold != -1 && counter.seen >= counter.soft_threshold {
            tokio::time::sleep(self.config.server.smtp.error.delay).await;
        }
        reply
    }

    async fn send_reply(&mut self, reply: Reply, verb: Verb) -> Result<(), Error> {
        let reply = self.escalate(reply).await;
        self.sink.send(reply, verb).await.map_err(Error::from)
    }

    async fn direct_send_reply(&mut self, reply: Reply) -> Result<(), Error> {
        let reply = self.escalate(reply).await;
        self.sink.direct_send(&reply).await.map_err(Error::from)
    }

    /// Discard an open transaction (disconnect or timeout) and tell the
    /// handler about it.
    async fn cancel_transaction<H: SessionHandler>(&mut self, handler: &mut H) {
        if self.envelope.take().is_some() {
            handler.on_reset().await;
        }
        self.stage = self.greeted_stage();
    }

    fn greeted_stage(&self) -> Stage {
        if self.metadata.client_name.is_some() {
            Stage::Helo
        } else {
            Stage::Connect
        }
    }

    async fn hello<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        extended: bool,
        client_name: ClientName,
    ) -> Reply {
        match handler.on_hello(extended, &client_name).await {
            HelloOutcome::Accept => {
                // a greeting discards any open transaction (RFC 5321 §4.1.4)
                if self.envelope.take().is_some() {
                    handler.on_reset().await;
                }
                self.metadata.client_name = Some(client_name);
                self.metadata.extended = extended;
                self.stage = Stage::Helo;

                if extended && self.config.server.esmtp.smtputf8 {
                    self.stream.set_line_size_max(COMMAND_LINE_MAX_UTF8);
                } else {
                    self.stream.set_line_size_max(COMMAND_LINE_MAX);
                }

                if extended {
                    negotiator::ehlo_reply(
                        &self.config,
                        &self.metadata,
                        self.tls_config.is_some(),
                        self.xclient_allowed,
                    )
                } else {
                    #[allow(clippy::expect_used)]
                    let client = self.metadata.client_name.as_ref().expect("set above");
                    static_reply(&format!(
                        "250 {} Hello {client}\r\n",
                        self.config.server.name
                    ))
                }
            }
            HelloOutcome::ShutDown => {
                self.context.deny();
                #[allow(clippy::expect_used)]
                let reply = HelloOutcome::ShutDown
                    .to_reply()
                    .expect("shutdown maps to a reply");
                reply
            }
            #[allow(clippy::expect_used)]
            otherwise => otherwise.to_reply().expect("rejections map to a reply"),
        }
    }

    async fn reset<H: SessionHandler>(&mut self, handler: &mut H) -> Reply {
        self.envelope = None;
        self.message_sink = None;
        handler.on_reset().await;
        self.stage = self.greeted_stage();
        static_reply("250 2.0.0 Reset state\r\n")
    }

    fn starttls(&mut self) -> Reply {
        if self.metadata.is_secured() {
            return static_reply("502 5.5.1 Already under TLS\r\n");
        }
        match &self.tls_config {
            None => static_reply("454 4.7.0 TLS not available due to temporary reason\r\n"),
            Some(_config) => {
                // pipelining across STARTTLS is forbidden (RFC 3207 §4.2)
                self.stream.discard_pending();
                self.context.upgrade_tls();
                static_reply("220 Ready to start TLS\r\n")
            }
        }
    }

    fn auth_command<H: SessionHandler>(
        &mut self,
        handler: &H,
        args: UnparsedArgs,
    ) -> Option<Reply> {
        let Some(auth_config) = self.config.server.smtp.auth.as_ref() else {
            return Some(static_reply("502 5.5.1 Command not implemented\r\n"));
        };
        if self.metadata.is_authenticated() {
            return Some(static_reply("503 5.5.1 Already authenticated\r\n"));
        }

        let args = match AuthArgs::try_from(args) {
            Ok(args) => args,
            Err(e) => return Some(args_error_reply(&e, Verb::Auth)),
        };

        if !auth_config.mechanisms.contains(&args.mechanism) {
            return Some(static_reply("504 5.5.4 Mechanism is not supported\r\n"));
        }
        if args.mechanism.must_be_under_tls()
            && !self.metadata.is_secured()
            && !auth_config.enable_dangerous_mechanism_in_clair
        {
            return Some(static_reply(
                "538 5.7.11 Encryption required for requested authentication mechanism\r\n",
            ));
        }
        if handler.sasl_callback().is_none() {
            tracing::error!("AUTH configured but the handler provides no SASL callback");
            return Some(static_reply("454 4.7.0 Temporary authentication failure\r\n"));
        }

        self.context
            .authenticate(args.mechanism, args.initial_response);
        None
    }

    async fn handle_authenticate<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        let result = match handler.sasl_callback() {
            Some(callback) => {
                auth::authenticate(
                    &mut self.sink,
                    &mut self.stream,
                    callback,
                    mechanism,
                    initial_response,
                )
                .await
            }
            None => Err(AuthError::ConfigError(
                rsasl::prelude::SASLError::NoSharedMechanism,
            )),
        };

        let reply = match result {
            Ok(identity) => {
                self.metadata.sasl = Some(SaslProps {
                    mechanism: Some(mechanism),
                    identity: identity.clone(),
                });
                handler.on_authenticated(&identity, mechanism).await;
                static_reply("235 2.7.0 Authentication successful\r\n")
            }
            Err(AuthError::Connection(e)) => return Err(e),
            Err(error) => {
                tracing::warn!(%error, "SASL exchange failed");
                self.auth_attempts += 1;
                let attempt_count_max = self
                    .config
                    .server
                    .smtp
                    .auth
                    .as_ref()
                    .map_or(-1, |auth| auth.attempt_count_max);
                if attempt_count_max != -1 && self.auth_attempts >= attempt_count_max {
                    self.context.deny();
                }

                match error {
                    AuthError::ClientMustNotStart => {
                        static_reply("501 5.7.0 Client must not start with this mechanism\r\n")
                    }
                    AuthError::Canceled => {
                        static_reply("501 5.0.0 Authentication canceled by client\r\n")
                    }
                    AuthError::Base64(_) => static_reply("501 5.5.2 Invalid base64 payload\r\n"),
                    AuthError::InvalidCredentials => {
                        static_reply("535 5.7.8 Authentication credentials invalid\r\n")
                    }
                    AuthError::ConfigError(rsasl::prelude::SASLError::NoSharedMechanism) => {
                        static_reply("504 5.5.4 Mechanism is not supported\r\n")
                    }
                    AuthError::SessionError(_) | AuthError::ConfigError(_) => {
                        static_reply("454 4.7.0 Temporary authentication failure\r\n")
                    }
                    AuthError::Connection(_) => unreachable!("returned above"),
                }
            }
        };

        self.direct_send_reply(reply).await
    }

    #[allow(clippy::too_many_lines)]
    async fn mail_from<H: SessionHandler>(&mut self, handler: &mut H, args: UnparsedArgs) -> Reply {
        let args = match MailFromArgs::try_from(args) {
            Ok(args) => args,
            Err(e) => return args_error_reply(&e, Verb::MailFrom),
        };

        let smtp = &self.config.server.smtp;
        let esmtp = &self.config.server.esmtp;

        if smtp.auth_required && !self.metadata.is_authenticated() {
            return static_reply("530 5.7.0 Authentication required\r\n");
        }
        if smtp.transaction_count_max != 0
            && self.metadata.transaction_count >= smtp.transaction_count_max
        {
            self.context.deny();
            return static_reply("421 4.4.5 Too many transactions for this session\r\n");
        }

        let unavailable =
            |key: &str| static_reply(&format!("555 5.5.4 {key} is not available here\r\n"));

        if args.use_smtputf8 && !esmtp.smtputf8 {
            return unavailable("SMTPUTF8");
        }
        if matches!(args.body_type, Some(BodyType::BinaryMime))
            && !(esmtp.chunking && esmtp.binarymime)
        {
            return unavailable("BODY=BINARYMIME");
        }
        if args.require_tls && !(esmtp.requiretls && self.metadata.is_secured()) {
            return unavailable("REQUIRETLS");
        }
        if args.priority.is_some() && !esmtp.mt_priority {
            return unavailable("MT-PRIORITY");
        }
        if (args.ret.is_some() || args.envelope_id.is_some()) && !esmtp.dsn {
            return unavailable("DSN");
        }
        if let Some(hold) = args.hold {
            let Some(max_hold) = esmtp.future_release else {
                return unavailable("FUTURERELEASE");
            };
            let over = match hold {
                HoldRequest::For(duration) => duration > max_hold,
                HoldRequest::Until(release) => {
                    release > time::OffsetDateTime::now_utc() + max_hold
                }
            };
            if over {
                return static_reply("552 5.3.4 Requested hold time exceeds the maximum\r\n");
            }
        }
        if let Some(by) = args.deliver_by {
            let Some(min_by) = esmtp.deliver_by else {
                return unavailable("DELIVERBY");
            };
            let min = i64::try_from(min_by.as_secs()).unwrap_or(i64::MAX);
            if by.mode == petrel_common::DeliverByMode::Return && by.seconds < min {
                return static_reply("555 5.5.4 BY deadline below the supported minimum\r\n");
            }
        }
        if let Some(size) = args.size {
            if size > self.config.server.message_size_limit as u64 {
                return static_reply("552 5.3.4 Message too big for system\r\n");
            }
        }

        let mut envelope = Envelope::new(args.reverse_path);
        envelope.body_type = args.body_type.unwrap_or_default();
        envelope.utf8 = args.use_smtputf8;
        envelope.declared_size = args.size;
        envelope.envelope_id = args.envelope_id;
        envelope.ret = args.ret;
        envelope.auth_mailbox = args.auth_mailbox;
        envelope.require_tls = args.require_tls;
        envelope.priority = args.priority;
        envelope.hold = args.hold;
        envelope.deliver_by = args.deliver_by;

        match handler.on_mail_from(&envelope).await {
            SenderOutcome::Accept => {
                self.metadata.transaction_count += 1;
                self.envelope = Some(envelope);
                self.stage = Stage::MailFrom;
                SenderOutcome::Accept.to_reply()
            }
            SenderOutcome::ShutDown => {
                self.context.deny();
                SenderOutcome::ShutDown.to_reply()
            }
            otherwise => otherwise.to_reply(),
        }
    }

    async fn rcpt_to<H: SessionHandler>(&mut self, handler: &mut H, args: UnparsedArgs) -> Reply {
        let args = match RcptToArgs::try_from(args) {
            Ok(args) => args,
            Err(e) => return args_error_reply(&e, Verb::RcptTo),
        };

        #[allow(clippy::expect_used)]
        let envelope = self.envelope.as_ref().expect("transaction open at this stage");

        if envelope.recipients.len() >= self.config.server.smtp.rcpt_count_max {
            return static_reply("452 4.5.3 Too many recipients\r\n");
        }
        if !envelope.utf8 && !args.forward_path.is_ascii() {
            return static_reply("553 5.6.7 The mailbox requires SMTPUTF8\r\n");
        }
        if args.original_forward_path.is_some() && !self.config.server.esmtp.dsn {
            return static_reply("555 5.5.4 DSN parameters are not available here\r\n");
        }

        let recipient = Recipient {
            forward_path: args.forward_path,
            original_forward_path: args.original_forward_path,
            notify_on: args.notify_on,
        };

        match handler.on_rcpt_to(envelope, &recipient).await {
            RecipientOutcome::Accept => {
                #[allow(clippy::expect_used)]
                self.envelope
                    .as_mut()
                    .expect("transaction open at this stage")
                    .recipients
                    .push(recipient);
                self.stage = Stage::RcptTo;
                RecipientOutcome::Accept.to_reply()
            }
            otherwise => otherwise.to_reply(),
        }
    }

    async fn data_start<H: SessionHandler>(&mut self, handler: &mut H) -> Reply {
        #[allow(clippy::expect_used)]
        let envelope = self.envelope.as_ref().expect("transaction open at this stage");

        if envelope.body_type == BodyType::BinaryMime {
            return static_reply("503 5.5.1 BODY=BINARYMIME requires BDAT\r\n");
        }

        match handler.on_data_start(envelope).await {
            DataStartOutcome::Accept { sink } => {
                self.message_sink = Some(sink);
                self.context.message(MessageMode::Data);
                static_reply("354 Enter mail, end with \".\" on a line by itself\r\n")
            }
            otherwise => otherwise.to_reply(),
        }
    }

    /// First BDAT command of a transaction. An accepting handler arms the
    /// chunked receive loop; the reply for the chunk is emitted there, once
    /// its octets have been consumed. On a refusal the pending chunk octets
    /// are drained so the command stream stays synchronized (RFC 3030 §4.2).
    async fn bdat_start<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        args: UnparsedArgs,
    ) -> Result<Option<Reply>, Error> {
        if !self.config.server.esmtp.chunking {
            return Ok(Some(static_reply("500 5.5.2 Command unrecognized\r\n")));
        }
        let args = match BdatArgs::try_from(args) {
            Ok(args) => args,
            Err(e) => return Ok(Some(args_error_reply(&e, Verb::Bdat))),
        };

        #[allow(clippy::expect_used)]
        let envelope = self.envelope.as_ref().expect("transaction open at this stage");

        match handler.on_data_start(envelope).await {
            DataStartOutcome::Accept { sink } => {
                self.message_sink = Some(sink);
                self.context.message(MessageMode::Bdat {
                    size: args.size,
                    last: args.last,
                });
                Ok(None)
            }
            otherwise => {
                self.drain_octets(args.size).await?;
                Ok(Some(otherwise.to_reply()))
            }
        }
    }

    async fn drain_octets(&mut self, mut remaining: u64) -> Result<(), Error> {
        while remaining > 0 {
            let chunk = self
                .stream
                .read_chunk(usize::try_from(remaining).unwrap_or(usize::MAX))
                .await?;
            remaining -= chunk.len() as u64;
        }
        Ok(())
    }

    async fn verify<H: SessionHandler>(&mut self, handler: &mut H, args: UnparsedArgs) -> Reply {
        match String::from_utf8(args.0)
            .ok()
            .and_then(|q| q.strip_suffix("\r\n").map(str::to_owned))
        {
            Some(query) => handler.on_verify(&query).await.to_reply(),
            None => static_reply("501 5.5.2 Syntax error in parameters\r\n"),
        }
    }

    async fn expand<H: SessionHandler>(&mut self, handler: &mut H, args: UnparsedArgs) -> Reply {
        match String::from_utf8(args.0)
            .ok()
            .and_then(|q| q.strip_suffix("\r\n").map(str::to_owned))
        {
            Some(list) => handler.on_expand(&list).await.to_reply(),
            None => static_reply("501 5.5.2 Syntax error in parameters\r\n"),
        }
    }

    /// XCLIENT from an authorized frontend: apply the attribute overrides and
    /// restart the session as if the forwarded client had just connected.
    fn xclient(&mut self, args: UnparsedArgs) -> Reply {
        if !self.xclient_allowed {
            return static_reply("550 5.7.0 Insufficient authorization\r\n");
        }
        let args = match XclientArgs::try_from(args) {
            Ok(args) => args,
            Err(e) => return args_error_reply(&e, Verb::Xclient),
        };

        if let Some(addr) = args.addr {
            let port = args.port.unwrap_or_else(|| self.metadata.client_addr.port());
            self.metadata.client_addr = std::net::SocketAddr::new(addr, port);
        } else if let Some(port) = args.port {
            self.metadata.client_addr.set_port(port);
        }
        self.metadata.client_name = args
            .helo
            .as_deref()
            .and_then(|helo| Domain::from_utf8(helo).ok())
            .map(ClientName::Domain);
        self.metadata.sasl = args.login.map(|identity| SaslProps {
            mechanism: None,
            identity,
        });
        if let Some(name) = args.name {
            tracing::debug!(%name, "XCLIENT forwarded client name");
        }

        self.envelope = None;
        self.message_sink = None;
        self.stage = Stage::Connect;
        self.banner()
    }

    async fn receive_message<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        mode: MessageMode,
    ) -> Result<MessageEnd, Error> {
        match mode {
            MessageMode::Data => self.receive_data(handler).await,
            MessageMode::Bdat { size, last } => self.receive_bdat(handler, size, last).await,
        }
    }

    fn size_limit(&self) -> u64 {
        #[allow(clippy::expect_used)]
        let declared = self
            .envelope
            .as_ref()
            .expect("transaction open at this stage")
            .declared_size
            .unwrap_or(u64::MAX);
        declared.min(self.config.server.message_size_limit as u64)
    }

    /// End a message exchange in failure: abort the pipeline channel, notify
    /// the handler and clear the transaction.
    async fn abort_message<H: SessionHandler>(&mut self, handler: &mut H, sink: &mut BoxedSink) {
        sink.close(SinkDisposition::Aborted).await;
        self.envelope = None;
        handler.on_reset().await;
        self.stage = self.greeted_stage();
    }

    #[allow(clippy::too_many_lines)]
    async fn receive_data<H: SessionHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<MessageEnd, Error> {
        #[allow(clippy::expect_used)]
        let mut sink = self.message_sink.take().expect("sink armed with the outcome");
        let size_limit = self.size_limit();

        let mut received: u64 = 0;
        let mut overflowed = false;
        let mut write_failed = false;
        let mut closed = false;

        {
            let message_stream = self
                .stream
                .as_message_stream()
                .timeout(self.config.server.smtp.timeout_client.message);
            tokio::pin!(message_stream);

            loop {
                let line = match message_stream.next().await {
                    None => break,
                    Some(Err(_elapsed)) => {
                        tracing::warn!("no message octets within the timeout, closing");
                        closed = true;
                        break;
                    }
                    Some(Ok(Err(e))) => {
                        tracing::warn!(error = %e, "connection lost inside DATA");
                        closed = true;
                        break;
                    }
                    Some(Ok(Ok(line))) => line,
                };

                received += line.len() as u64;
                if overflowed || received > size_limit {
                    // keep draining to the terminator, reply once at the end
                    overflowed = true;
                    continue;
                }
                if write_failed {
                    continue;
                }
                if let Err(e) = sink.write(&line).await {
                    tracing::warn!(error = %e, "pipeline channel write failed");
                    write_failed = true;
                }
            }
        }

        if closed {
            self.abort_message(handler, &mut sink).await;
            return Ok(MessageEnd::Closed);
        }

        if overflowed {
            self.abort_message(handler, &mut sink).await;
            self.direct_send_reply(static_reply("552 5.3.4 Message too big for system\r\n"))
                .await?;
            return Ok(MessageEnd::Rejected);
        }

        if write_failed {
            self.abort_message(handler, &mut sink).await;
            self.direct_send_reply(static_reply("451 4.3.0 Local error in processing\r\n"))
                .await?;
            return Ok(MessageEnd::Rejected);
        }

        sink.close(SinkDisposition::Complete).await;
        #[allow(clippy::expect_used)]
        let mut envelope = self.envelope.take().expect("transaction open at this stage");
        envelope.data_octets = received;
        self.stage = self.greeted_stage();

        let outcome = handler.on_data_end(&envelope).await;
        let accepted = outcome == crate::outcome::DataEndOutcome::Accept;
        self.direct_send_reply(outcome.to_reply()).await?;

        Ok(if accepted {
            MessageEnd::Accepted
        } else {
            MessageEnd::Rejected
        })
    }

    #[allow(clippy::too_many_lines)]
    async fn receive_bdat<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        mut chunk_size: u64,
        mut last: bool,
    ) -> Result<MessageEnd, Error> {
        #[allow(clippy::expect_used)]
        let mut sink = self.message_sink.take().expect("sink armed with the outcome");
        let size_limit = self.size_limit();
        let message_timeout = self.config.server.smtp.timeout_client.message;

        let mut received: u64 = 0;
        let mut write_failed = false;

        loop {
            // consume exactly the declared chunk, opaquely
            let mut remaining = chunk_size;
            while remaining > 0 {
                let chunk = match tokio::time::timeout(
                    message_timeout,
                    self.stream
                        .read_chunk(usize::try_from(remaining).unwrap_or(usize::MAX)),
                )
                .await
                {
                    Err(_elapsed) => {
                        tracing::warn!("no chunk octets within the timeout, closing");
                        self.abort_message(handler, &mut sink).await;
                        return Ok(MessageEnd::Closed);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "connection lost inside BDAT");
                        self.abort_message(handler, &mut sink).await;
                        return Ok(MessageEnd::Closed);
                    }
                    Ok(Ok(chunk)) => chunk,
                };
                remaining -= chunk.len() as u64;
                received += chunk.len() as u64;

                if received > size_limit || write_failed {
                    continue;
                }
                if let Err(e) = sink.write(&chunk).await {
                    tracing::warn!(error = %e, "pipeline channel write failed");
                    write_failed = true;
                }
            }

            if received > size_limit {
                self.abort_message(handler, &mut sink).await;
                self.direct_send_reply(static_reply("552 5.3.4 Message too big for system\r\n"))
                    .await?;
                return Ok(MessageEnd::Rejected);
            }

            if last {
                if write_failed {
                    self.abort_message(handler, &mut sink).await;
                    self.direct_send_reply(static_reply("451 4.3.0 Local error in processing\r\n"))
                        .await?;
                    return Ok(MessageEnd::Rejected);
                }
                sink.close(SinkDisposition::Complete).await;
                #[allow(clippy::expect_used)]
                let mut envelope = self.envelope.take().expect("transaction open at this stage");
                envelope.data_octets = received;
                self.stage = self.greeted_stage();

                let outcome = handler.on_data_end(&envelope).await;
                let accepted = outcome == crate::outcome::DataEndOutcome::Accept;
                self.direct_send_reply(outcome.to_reply()).await?;
                return Ok(if accepted {
                    MessageEnd::Accepted
                } else {
                    MessageEnd::Rejected
                });
            }

            self.direct_send_reply(static_reply(&format!(
                "250 2.0.0 Message OK, {chunk_size} octets received\r\n"
            )))
            .await?;

            // between chunks only BDAT, RSET, NOOP and QUIT make sense
            loop {
                let line = match tokio::time::timeout(
                    self.config.server.smtp.timeout_client.command,
                    self.stream.read_line(COMMAND_LINE_MAX_UTF8),
                )
                .await
                {
                    Err(_elapsed) => {
                        tracing::warn!("no command within the idle timeout, closing");
                        self.abort_message(handler, &mut sink).await;
                        return Ok(MessageEnd::Closed);
                    }
                    Ok(Err(e)) => {
                        self.abort_message(handler, &mut sink).await;
                        return Err(e);
                    }
                    Ok(Ok(None)) => {
                        self.abort_message(handler, &mut sink).await;
                        return Ok(MessageEnd::Closed);
                    }
                    Ok(Ok(Some(line))) => line,
                };

                match parse_command_line(&line, COMMAND_LINE_MAX_UTF8) {
                    Ok((Verb::Bdat, args)) => match BdatArgs::try_from(args) {
                        Ok(args) => {
                            chunk_size = args.size;
                            last = args.last;
                            break;
                        }
                        Err(e) => {
                            let reply = args_error_reply(&e, Verb::Bdat);
                            self.direct_send_reply(reply).await?;
                        }
                    },
                    Ok((Verb::Rset, _args)) => {
                        self.abort_message(handler, &mut sink).await;
                        self.direct_send_reply(static_reply("250 2.0.0 Reset state\r\n"))
                            .await?;
                        return Ok(MessageEnd::Rejected);
                    }
                    Ok((Verb::Quit, _args)) => {
                        self.abort_message(handler, &mut sink).await;
                        self.direct_send_reply(static_reply(
                            "221 2.0.0 Service closing transmission channel\r\n",
                        ))
                        .await?;
                        return Ok(MessageEnd::Closed);
                    }
                    Ok((Verb::Noop, _args)) => {
                        self.direct_send_reply(static_reply("250 2.0.0 OK\r\n")).await?;
                    }
                    Ok((Verb::Data, _args)) => {
                        self.direct_send_reply(static_reply(
                            "503 5.5.1 BDAT and DATA cannot be mixed\r\n",
                        ))
                        .await?;
                    }
                    Ok((Verb::Unknown, _args)) => {
                        self.direct_send_reply(static_reply("500 5.5.2 Command unrecognized\r\n"))
                            .await?;
                    }
                    Ok((_verb, _args)) => {
                        self.direct_send_reply(static_reply(
                            "503 5.5.1 Bad sequence of commands\r\n",
                        ))
                        .await?;
                    }
                    Err(e) => {
                        let reply = e.as_args_error().map_or_else(
                            || static_reply("500 5.5.2 Command unrecognized\r\n"),
                            |parse_error| args_error_reply(parse_error, Verb::Bdat),
                        );
                        self.direct_send_reply(reply).await?;
                    }
                }

                if matches!(self.context.outcome, Some(HandshakeOutcome::Quit)) {
                    // the error escalation decided to close
                    self.abort_message(handler, &mut sink).await;
                    self.context.take();
                    return Ok(MessageEnd::Closed);
                }
            }
        }
    }
}
