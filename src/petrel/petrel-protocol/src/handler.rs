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

use crate::outcome::{
    ConnectOutcome, DataEndOutcome, DataStartOutcome, ExpandOutcome, HelloOutcome,
    RecipientOutcome, SenderOutcome, VerifyOutcome,
};
use petrel_common::{auth::Mechanism, ClientName, ConnectionMetadata, Envelope, Recipient};

/// Why the session closes a pipeline channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SinkDisposition {
    /// The message was received completely.
    Complete,
    /// The transaction died mid-message: disconnect, timeout, size overflow
    /// or reset. Nothing received so far may be delivered.
    Aborted,
}

/// Writable channel a handler returns when it accepts a DATA/BDAT exchange.
/// The session owns the streaming: it pushes the (dot-unstuffed) message
/// octets in buffer-sized units and closes the channel exactly once, at
/// end-of-data or on abort. The channel lives for one transaction only.
#[async_trait::async_trait]
pub trait MessageSink: Send {
    /// Append message octets.
    ///
    /// # Errors
    ///
    /// A failed write is reported to the client as a transient local error at
    /// end-of-data; the session stops writing but keeps draining the client.
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()>;

    /// Close the channel. Called exactly once.
    async fn close(&mut self, disposition: SinkDisposition);
}

/// Boxed [`MessageSink`], the form handlers return it in.
pub type BoxedSink = Box<dyn MessageSink>;

/// Wrapper around a rsasl callback so that handlers can hand one out without
/// naming the concrete callback type.
pub struct CallbackWrap(pub Box<dyn rsasl::callback::SessionCallback + Send + Sync>);

impl rsasl::callback::SessionCallback for CallbackWrap {
    #[inline]
    fn callback(
        &self,
        session_data: &rsasl::callback::SessionData,
        context: &rsasl::callback::Context<'_>,
        request: &mut rsasl::callback::Request<'_>,
    ) -> Result<(), rsasl::prelude::SessionError> {
        self.0.callback(session_data, context, request)
    }

    #[inline]
    fn validate(
        &self,
        session_data: &rsasl::callback::SessionData,
        context: &rsasl::callback::Context<'_>,
        validate: &mut rsasl::validate::Validate<'_>,
    ) -> Result<(), rsasl::validate::ValidationError> {
        self.0.validate(session_data, context, validate)
    }
}

/// The staged contract between the session and the application.
///
/// The state machine guarantees that each method is only invoked when the
/// protocol allows the corresponding command, with the session's own checks
/// (ordering, limits, parameter gating) already passed. Methods return closed
/// outcome enums; the session translates them to wire replies and never
/// emits a reply outside that mapping. Returning an outcome consumes the
/// stage, so a double or out-of-order response is unrepresentable.
///
/// Every method is async: implementations are free to resolve the outcome on
/// another thread or executor, the session simply awaits the future on its
/// own connection task.
#[async_trait::async_trait]
pub trait SessionHandler: Send {
    /// A connection was accepted, the banner has not been sent yet.
    async fn on_connect(&mut self, _metadata: &ConnectionMetadata) -> ConnectOutcome {
        ConnectOutcome::Accept
    }

    /// The client greeted with HELO (`extended` false) or EHLO.
    async fn on_hello(&mut self, extended: bool, client_name: &ClientName) -> HelloOutcome;

    /// MAIL FROM passed the session checks; the envelope carries the sender
    /// and every accepted parameter.
    async fn on_mail_from(&mut self, envelope: &Envelope) -> SenderOutcome;

    /// RCPT TO passed the session checks. The recipient is appended to the
    /// envelope only when the outcome accepts it.
    async fn on_rcpt_to(&mut self, envelope: &Envelope, recipient: &Recipient) -> RecipientOutcome;

    /// DATA or a first BDAT chunk is about to start; an accepting outcome
    /// carries the pipeline channel the message octets go to.
    async fn on_data_start(&mut self, envelope: &Envelope) -> DataStartOutcome;

    /// End-of-data was seen and the pipeline channel closed successfully;
    /// `envelope.data_octets` holds the received size.
    async fn on_data_end(&mut self, envelope: &Envelope) -> DataEndOutcome;

    /// VRFY query; the default declines to verify without refusing.
    async fn on_verify(&mut self, _query: &str) -> VerifyOutcome {
        VerifyOutcome::CannotVerify
    }

    /// EXPN query; disabled unless the application opts in.
    async fn on_expand(&mut self, _list: &str) -> ExpandOutcome {
        ExpandOutcome::Disabled
    }

    /// The transaction state was discarded: RSET, HELO/EHLO mid-session, a
    /// failed transaction or a disconnect with one pending.
    async fn on_reset(&mut self) {}

    /// A SASL exchange completed and the identity was recorded.
    async fn on_authenticated(&mut self, _identity: &str, _mechanism: Mechanism) {}

    /// Callback validating SASL exchanges, usually backed by the realm's
    /// authenticator. `None` disables the AUTH command.
    fn sasl_callback(&self) -> Option<CallbackWrap> {
        None
    }
}

#[async_trait::async_trait]
impl<T: SessionHandler + ?Sized> SessionHandler for Box<T> {
    async fn on_connect(&mut self, metadata: &ConnectionMetadata) -> ConnectOutcome {
        (**self).on_connect(metadata).await
    }

    async fn on_hello(&mut self, extended: bool, client_name: &ClientName) -> HelloOutcome {
        (**self).on_hello(extended, client_name).await
    }

    async fn on_mail_from(&mut self, envelope: &Envelope) -> SenderOutcome {
        (**self).on_mail_from(envelope).await
    }

    async fn on_rcpt_to(&mut self, envelope: &Envelope, recipient: &Recipient) -> RecipientOutcome {
        (**self).on_rcpt_to(envelope, recipient).await
    }

    async fn on_data_start(&mut self, envelope: &Envelope) -> DataStartOutcome {
        (**self).on_data_start(envelope).await
    }

    async fn on_data_end(&mut self, envelope: &Envelope) -> DataEndOutcome {
        (**self).on_data_end(envelope).await
    }

    async fn on_verify(&mut self, query: &str) -> VerifyOutcome {
        (**self).on_verify(query).await
    }

    async fn on_expand(&mut self, list: &str) -> ExpandOutcome {
        (**self).on_expand(list).await
    }

    async fn on_reset(&mut self) {
        (**self).on_reset().await;
    }

    async fn on_authenticated(&mut self, identity: &str, mechanism: Mechanism) {
        (**self).on_authenticated(identity, mechanism).await;
    }

    fn sasl_callback(&self) -> Option<CallbackWrap> {
        (**self).sasl_callback()
    }
}
