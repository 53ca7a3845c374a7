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

use crate::store::MailboxFactory;
use petrel_common::{auth::Credentials, ClientName, ConnectionMetadata, Envelope, Recipient};
use petrel_protocol::{
    rsasl, AuthIdentity, CallbackWrap, DataEndOutcome, DataStartOutcome, HelloOutcome, MessageSink,
    RecipientOutcome, SenderOutcome, SessionHandler, SinkDisposition,
};

/// Verifies the credentials a SASL exchange produced. Implementations are
/// shared between connections and must be thread-safe.
pub trait Authenticator: Send + Sync {
    /// Is this identity who it claims to be?
    fn verify(&self, credentials: &Credentials) -> bool;
}

/// The authentication domain of an endpoint: the authenticator behind the
/// mechanisms the configuration advertises.
pub struct Realm {
    authenticator: std::sync::Arc<dyn Authenticator>,
}

impl Realm {
    /// Create a realm from its authenticator.
    #[must_use]
    #[inline]
    pub fn new(authenticator: std::sync::Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    /// The SASL callback handed to the session engine.
    #[must_use]
    #[inline]
    pub fn callback(&self) -> CallbackWrap {
        CallbackWrap(Box::new(RealmSessionCallback {
            authenticator: self.authenticator.clone(),
        }))
    }
}

struct RealmSessionCallback {
    authenticator: std::sync::Arc<dyn Authenticator>,
}

impl rsasl::callback::SessionCallback for RealmSessionCallback {
    fn callback(
        &self,
        _session_data: &rsasl::callback::SessionData,
        _context: &rsasl::callback::Context<'_>,
        _request: &mut rsasl::callback::Request<'_>,
    ) -> Result<(), rsasl::prelude::SessionError> {
        Ok(())
    }

    fn validate(
        &self,
        session_data: &rsasl::callback::SessionData,
        context: &rsasl::callback::Context<'_>,
        validate: &mut rsasl::validate::Validate<'_>,
    ) -> Result<(), rsasl::validate::ValidationError> {
        let credentials = match Credentials::try_from((session_data, context)) {
            Ok(credentials) => credentials,
            Err(petrel_common::auth::Error::MissingField) => {
                return Err(rsasl::validate::ValidationError::MissingRequiredProperty)
            }
            Err(otherwise) => {
                return Err(rsasl::validate::ValidationError::Boxed(Box::new(otherwise)))
            }
        };

        // `Some(identity)` on success, `None` when the realm says no; the
        // dispatcher turns the latter into a 535
        validate.with::<AuthIdentity, _>(|| {
            Ok(self
                .authenticator
                .verify(&credentials)
                .then(|| credentials.identity().to_owned()))
        })?;

        Ok(())
    }
}

/// Builds one handler per accepted connection, before the banner. Returning
/// `None` selects the default accept-all behavior, which is appropriate for
/// MTA testing and little else.
pub trait HandlerFactory: Send + Sync {
    /// Create the handler for this connection.
    fn create(&self, metadata: &ConnectionMetadata) -> Option<Box<dyn SessionHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&ConnectionMetadata) -> Option<Box<dyn SessionHandler>> + Send + Sync,
{
    #[inline]
    fn create(&self, metadata: &ConnectionMetadata) -> Option<Box<dyn SessionHandler>> {
        self(metadata)
    }
}

type SharedBuffer = std::sync::Arc<std::sync::Mutex<Vec<u8>>>;

/// Pipeline channel accumulating the message in memory.
struct BufferSink {
    buffer: SharedBuffer,
}

#[async_trait::async_trait]
impl MessageSink for BufferSink {
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        #[allow(clippy::expect_used)]
        self.buffer
            .lock()
            .expect("body buffer poisoned")
            .extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self, disposition: SinkDisposition) {
        if disposition == SinkDisposition::Aborted {
            #[allow(clippy::expect_used)]
            self.buffer.lock().expect("body buffer poisoned").clear();
        }
    }
}

/// Sink discarding every octet, for endpoints that only exercise the
/// protocol.
struct NullSink;

#[async_trait::async_trait]
impl MessageSink for NullSink {
    async fn write(&mut self, _chunk: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    async fn close(&mut self, _disposition: SinkDisposition) {}
}

/// Accept-all handler used when no factory is installed (or the factory
/// returns `None`). Messages go to the mailbox factory when one is present
/// and are discarded otherwise.
pub struct DefaultHandler {
    realm: Option<std::sync::Arc<Realm>>,
    mailboxes: Option<std::sync::Arc<dyn MailboxFactory>>,
    body: Option<SharedBuffer>,
}

impl DefaultHandler {
    /// Create the handler; both collaborators are optional.
    #[must_use]
    #[inline]
    pub const fn new(
        realm: Option<std::sync::Arc<Realm>>,
        mailboxes: Option<std::sync::Arc<dyn MailboxFactory>>,
    ) -> Self {
        Self {
            realm,
            mailboxes,
            body: None,
        }
    }
}

#[async_trait::async_trait]
impl SessionHandler for DefaultHandler {
    async fn on_hello(&mut self, _extended: bool, _client_name: &ClientName) -> HelloOutcome {
        HelloOutcome::Accept
    }

    async fn on_mail_from(&mut self, _envelope: &Envelope) -> SenderOutcome {
        SenderOutcome::Accept
    }

    async fn on_rcpt_to(
        &mut self,
        _envelope: &Envelope,
        _recipient: &Recipient,
    ) -> RecipientOutcome {
        RecipientOutcome::Accept
    }

    async fn on_data_start(&mut self, _envelope: &Envelope) -> DataStartOutcome {
        if self.mailboxes.is_some() {
            let buffer = SharedBuffer::default();
            self.body = Some(buffer.clone());
            DataStartOutcome::Accept {
                sink: Box::new(BufferSink { buffer }),
            }
        } else {
            DataStartOutcome::Accept {
                sink: Box::new(NullSink),
            }
        }
    }

    async fn on_data_end(&mut self, envelope: &Envelope) -> DataEndOutcome {
        let Some(mailboxes) = self.mailboxes.clone() else {
            return DataEndOutcome::Accept;
        };
        #[allow(clippy::expect_used)]
        let body = self
            .body
            .take()
            .expect("a buffer was installed at data start")
            .lock()
            .expect("body buffer poisoned")
            .clone();

        for recipient in &envelope.recipients {
            let mut store = match mailboxes.create_store(&recipient.forward_path) {
                Ok(store) => store,
                Err(error) => {
                    tracing::error!(%error, "no store for {}", recipient.forward_path);
                    return DataEndOutcome::TempRejectLocalError;
                }
            };
            if let Err(error) = store.deliver(envelope, &body).await {
                tracing::error!(%error, "delivery failed for {}", recipient.forward_path);
                return DataEndOutcome::TempRejectLocalError;
            }
        }
        DataEndOutcome::Accept
    }

    async fn on_reset(&mut self) {
        self.body = None;
    }

    fn sasl_callback(&self) -> Option<CallbackWrap> {
        self.realm.as_ref().map(|realm| realm.callback())
    }
}
