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

use crate::Verb;
use petrel_common::Reply;
use tokio::io::AsyncWriteExt;

/// Sink for the replies of one session. Replies to pipelinable commands are
/// held back and written as one buffer at the end of the window, so the wire
/// always carries them in command order (RFC 2920).
pub struct ReplyWriter<W: tokio::io::AsyncWrite + Unpin + Send> {
    inner: W,
    buffer: Vec<Reply>,
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> ReplyWriter<W> {
    /// Create a new writer.
    #[inline]
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::<Reply>::new(),
        }
    }

    /// Consume the instance and return the underlying writer.
    #[inline]
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Are there held-back replies waiting for a flush?
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Send the buffer to the client.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn write_all(&mut self, buffer: &str) -> std::io::Result<()> {
        tracing::trace!(">> {:?}", buffer);
        self.inner.write_all(buffer.as_bytes()).await
    }

    /// Write a reply immediately, after flushing anything held back so the
    /// wire order stays equal to the command order.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn direct_send(&mut self, reply: &Reply) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            self.flush().await?;
        }
        self.write_all(&reply.to_string()).await
    }

    /// Queue or write the reply to a command, depending on whether the verb
    /// is a synchronization point.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn send(&mut self, reply: Reply, verb: Verb) -> std::io::Result<()> {
        if verb.is_pipelinable() {
            self.buffer.push(reply);
            Ok(())
        } else {
            self.direct_send(&reply).await
        }
    }

    /// Write every held-back reply in one buffer.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn flush(&mut self) -> std::io::Result<()> {
        use std::fmt::Write as _;

        let mut window = String::new();
        for reply in self.buffer.drain(..) {
            let _infallible = write!(window, "{reply}");
        }
        self.write_all(&window).await
    }
}
