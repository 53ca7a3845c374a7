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

use petrel_common::{Envelope, Mailbox};

/// One delivery target. A store is scoped to a single delivery and never
/// shared between connections.
#[async_trait::async_trait]
pub trait MessageStore: Send {
    /// Persist a received message for the store's mailbox.
    ///
    /// # Errors
    ///
    /// Any storage failure; the session reports it to the client as a
    /// transient local error.
    async fn deliver(&mut self, envelope: &Envelope, body: &[u8]) -> anyhow::Result<()>;
}

/// Hands out per-recipient stores. Shared between connections, so it must be
/// thread-safe; the stores it creates need not be.
pub trait MailboxFactory: Send + Sync {
    /// Open the store responsible for this recipient.
    ///
    /// # Errors
    ///
    /// * the recipient has no local mailbox
    fn create_store(&self, recipient: &Mailbox) -> anyhow::Result<Box<dyn MessageStore>>;
}

/// In-memory mailboxes, enough to exercise an endpoint end to end without a
/// storage backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryMailboxes {
    messages: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, Vec<Vec<u8>>>>>,
}

impl MemoryMailboxes {
    /// Create an empty set of mailboxes.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The messages delivered to a mailbox so far.
    #[must_use]
    #[inline]
    pub fn messages(&self, mailbox: &str) -> Vec<Vec<u8>> {
        #[allow(clippy::expect_used)]
        self.messages
            .lock()
            .expect("mailboxes poisoned")
            .get(mailbox)
            .cloned()
            .unwrap_or_default()
    }
}

struct MemoryStore {
    mailbox: String,
    messages: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, Vec<Vec<u8>>>>>,
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn deliver(&mut self, _envelope: &Envelope, body: &[u8]) -> anyhow::Result<()> {
        #[allow(clippy::expect_used)]
        self.messages
            .lock()
            .expect("mailboxes poisoned")
            .entry(self.mailbox.clone())
            .or_default()
            .push(body.to_vec());
        Ok(())
    }
}

impl MailboxFactory for MemoryMailboxes {
    #[inline]
    fn create_store(&self, recipient: &Mailbox) -> anyhow::Result<Box<dyn MessageStore>> {
        Ok(Box::new(MemoryStore {
            mailbox: recipient.to_string(),
            messages: self.messages.clone(),
        }))
    }
}
