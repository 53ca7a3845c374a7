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

use crate::{command::Batch, Error, ParseArgsError, UnparsedArgs, Verb};
use tokio::io::AsyncReadExt;

/// Maximum size of a command line, including the CRLF (RFC 5321 §4.5.3.1.4).
pub const COMMAND_LINE_MAX: usize = 512;

/// Command line ceiling once SMTPUTF8 has been negotiated (RFC 6531 §3.4).
pub const COMMAND_LINE_MAX_UTF8: usize = 1000;

/// How much to grow the buffer per read.
const READ_AHEAD: usize = 256;

/// A line still unterminated at this size closes the connection; nothing
/// legitimate sends such a command line.
const UNTERMINATED_LINE_MAX: usize = 16 * 1024;

fn crlf(buffer: &[u8]) -> Option<usize> {
    memchr::memmem::find(buffer, b"\r\n")
}

pub(crate) fn parse_command_line(
    line: &[u8],
    size_max: usize,
) -> Result<(Verb, UnparsedArgs), Error> {
    if line.len() > size_max {
        return Err(ParseArgsError::LineTooLong {
            limit: size_max,
            got: line.len(),
        }
        .into());
    }
    let body = match line.strip_suffix(b"\r\n") {
        Some(body) => body,
        None => return Err(ParseArgsError::MissingLineTerminator.into()),
    };
    if memchr::memchr2(b'\r', b'\n', body).is_some() {
        return Err(ParseArgsError::BareLineBreak.into());
    }
    Ok(Verb::lookup(line))
}

/// Buffered reader over the client half of the connection. One instance lives
/// for the whole session; bytes pipelined past a command stay buffered here
/// until the state machine is ready for them.
pub struct Reader<R: tokio::io::AsyncRead + Unpin + Send> {
    inner: R,
    buffer: bytes::BytesMut,
    pipelining_enabled: bool,
    line_size_max: usize,
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Reader<R> {
    /// Create a new reader.
    #[must_use]
    #[inline]
    pub fn new(tcp_stream: R, enable_pipelining: bool) -> Self {
        Self {
            inner: tcp_stream,
            buffer: bytes::BytesMut::with_capacity(READ_AHEAD),
            pipelining_enabled: enable_pipelining,
            line_size_max: COMMAND_LINE_MAX,
        }
    }

    /// Consume the instance and return the underlying reader.
    #[must_use]
    #[inline]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Raise or lower the command line ceiling (SMTPUTF8 negotiation).
    #[inline]
    pub fn set_line_size_max(&mut self, size_max: usize) {
        self.line_size_max = size_max;
    }

    /// Drop every byte the client pipelined past the current command.
    /// Mandatory after STARTTLS (RFC 3207 §4.2).
    #[inline]
    pub fn discard_pending(&mut self) {
        self.buffer.clear();
    }

    /// Pull more bytes off the transport into the buffer; `Ok(false)` means
    /// a clean end of stream.
    async fn fill(&mut self) -> Result<bool, Error> {
        self.buffer.reserve(READ_AHEAD);
        Ok(self.inner.read_buf(&mut self.buffer).await? != 0)
    }

    /// Read the commands of one TCP window. Returns an empty batch on a clean
    /// disconnect. The batch ends early at a synchronization-point command so
    /// that the bytes following it (message data, SASL responses) stay
    /// buffered untouched.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] from the underlying transport
    /// * [`ParseArgsError::LineTooLong`] when a line never terminates
    #[inline]
    pub async fn read_window(&mut self) -> Result<Batch, Error> {
        let mut batch: Batch = vec![];
        loop {
            let Some(terminator) = crlf(&self.buffer) else {
                if self.buffer.len() > UNTERMINATED_LINE_MAX {
                    return Err(ParseArgsError::LineTooLong {
                        limit: UNTERMINATED_LINE_MAX,
                        got: self.buffer.len(),
                    }
                    .into());
                }
                if self.fill().await? {
                    continue;
                }
                // disconnected; a ragged last line still deserves a report
                if !self.buffer.is_empty() {
                    let rest = self.buffer.split_to(self.buffer.len());
                    batch.push(parse_command_line(&rest, self.line_size_max));
                }
                return Ok(batch);
            };

            let line = self.buffer.split_to(terminator + 2);
            let command = parse_command_line(&line, self.line_size_max);
            let keep_going = self.pipelining_enabled
                && command
                    .as_ref()
                    .map_or(false, |(verb, _args)| verb.is_pipelinable());
            batch.push(command);
            if !keep_going || self.buffer.is_empty() {
                return Ok(batch);
            }
        }
    }

    /// Read one "\r\n" terminated line of at most `size_max` bytes. `None`
    /// on a clean disconnect.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] from the underlying transport
    /// * [`ParseArgsError::LineTooLong`] past the ceiling
    pub(crate) async fn read_line(&mut self, size_max: usize) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if let Some(terminator) = crlf(&self.buffer) {
                if terminator + 2 > size_max {
                    return Err(ParseArgsError::LineTooLong {
                        limit: size_max,
                        got: terminator + 2,
                    }
                    .into());
                }
                return Ok(Some(Vec::<u8>::from(self.buffer.split_to(terminator + 2))));
            }
            if self.buffer.len() > size_max {
                return Err(ParseArgsError::LineTooLong {
                    limit: size_max,
                    got: self.buffer.len(),
                }
                .into());
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Produce the stream of message lines of a DATA exchange: dot-unstuffed,
    /// ending (without yielding it) at the `CRLF.CRLF` terminator. A lone
    /// `CRLF.` stays pending until the following octets disambiguate it.
    #[inline]
    pub fn as_message_stream(
        &mut self,
    ) -> impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + '_ {
        async_stream::stream! {
            loop {
                let line = match self.read_line(usize::MAX).await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        yield Err(Error::Disconnected);
                        return;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                tracing::trace!("<< {:?}", std::str::from_utf8(&line));

                match line.as_slice() {
                    b".\r\n" => return,
                    // dot-unstuffing (RFC 5321 §4.5.2)
                    [b'.', unstuffed @ ..] => yield Ok(unstuffed.to_vec()),
                    _ => yield Ok(line),
                }
            }
        }
    }

    /// Read up to `max` raw octets, at least one. Used by the BDAT receiver,
    /// which knows the exact chunk length in advance.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] from the underlying transport
    /// * [`Error::Disconnected`] before the chunk completed
    #[inline]
    pub async fn read_chunk(&mut self, max: usize) -> Result<bytes::Bytes, Error> {
        if self.buffer.is_empty() && !self.fill().await? {
            return Err(Error::Disconnected);
        }
        let take = self.buffer.len().min(max);
        Ok(self.buffer.split_to(take).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn reader(input: &str, pipelining: bool) -> Reader<std::io::Cursor<Vec<u8>>> {
        Reader::new(std::io::Cursor::new(input.as_bytes().to_vec()), pipelining)
    }

    fn verbs(batch: &Batch) -> Vec<Verb> {
        batch
            .iter()
            .map(|i| i.as_ref().map_or(Verb::Unknown, |(verb, _)| *verb))
            .collect()
    }

    #[tokio::test]
    async fn window_batches_pipelined_commands() {
        let mut session = reader(
            "MAIL FROM:<alice@source.test>\r\n\
             RCPT TO:<one@sink.test>\r\n\
             RCPT TO:<two@sink.test>\r\n",
            true,
        );
        let batch = session.read_window().await.unwrap();
        assert_eq!(verbs(&batch), [Verb::MailFrom, Verb::RcptTo, Verb::RcptTo]);
        assert_eq!(
            batch[0].as_ref().unwrap().1,
            UnparsedArgs(b"<alice@source.test>\r\n".to_vec())
        );

        // nothing left
        assert!(session.read_window().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_without_pipelining_stops_at_the_first_command() {
        let mut session = reader("NOOP\r\nQUIT\r\n", false);
        assert_eq!(verbs(&session.read_window().await.unwrap()), [Verb::Noop]);
        assert_eq!(verbs(&session.read_window().await.unwrap()), [Verb::Quit]);
    }

    #[tokio::test]
    async fn window_stops_at_a_sync_point() {
        let mut session = reader(
            "MAIL FROM:<a@x.org>\r\nRCPT TO:<b@y.org>\r\nDATA\r\nbody line\r\n.\r\n",
            true,
        );
        let batch = session.read_window().await.unwrap();
        assert_eq!(verbs(&batch), [Verb::MailFrom, Verb::RcptTo, Verb::Data]);

        // the message body was left untouched for the data receiver
        let body: Vec<Vec<u8>> = session
            .as_message_stream()
            .collect::<Result<_, _>>()
            .await
            .unwrap();
        assert_eq!(body, [b"body line\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn window_with_a_ragged_last_line() {
        let mut session = reader("MAIL FROM:<a@x.org>\r\nRCPT TO:<b@y.org>", true);
        let batch = session.read_window().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_ok());
        // EOF without CRLF surfaces as a parse error, not a command
        assert!(matches!(
            batch[1].as_ref().unwrap_err().as_args_error(),
            Some(ParseArgsError::MissingLineTerminator)
        ));
    }

    #[tokio::test]
    async fn no_input_yields_an_empty_window() {
        let mut session = reader("", true);
        assert!(session.read_window().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_command_line_is_an_error_item() {
        let input = format!("MAIL FROM:<{}@x.org>\r\n", "a".repeat(600));
        let mut session = reader(&input, true);
        let batch = session.read_window().await.unwrap();
        assert!(matches!(
            batch[0].as_ref().unwrap_err().as_args_error(),
            Some(ParseArgsError::LineTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn utf8_ceiling_applies_once_raised() {
        let input = format!("MAIL FROM:<{}@x.org>\r\n", "a".repeat(600));
        let mut session = reader(&input, true);
        session.set_line_size_max(COMMAND_LINE_MAX_UTF8);
        let batch = session.read_window().await.unwrap();
        assert!(batch[0].is_ok());
    }

    #[tokio::test]
    async fn bare_line_breaks_are_rejected() {
        let mut bare_cr = reader("NOOP bare\rcarriage\r\n", true);
        assert!(matches!(
            bare_cr.read_window().await.unwrap()[0]
                .as_ref()
                .unwrap_err()
                .as_args_error(),
            Some(ParseArgsError::BareLineBreak)
        ));

        // a bare LF inside an otherwise terminated line
        let mut bare_lf = reader("HELO a\nb\r\n", true);
        assert!(bare_lf.read_window().await.unwrap()[0].is_err());
    }

    #[tokio::test]
    async fn message_stream_unstuffs_leading_dots() {
        let mut session = reader("Subject: hi\r\n\r\n..hello\r\n.\r\nQUIT\r\n", true);
        let body: Vec<Vec<u8>> = session
            .as_message_stream()
            .collect::<Result<_, _>>()
            .await
            .unwrap();
        assert_eq!(
            body,
            [
                b"Subject: hi\r\n".to_vec(),
                b"\r\n".to_vec(),
                b".hello\r\n".to_vec(),
            ]
        );

        // the terminator was consumed, pipelined commands are still there
        assert_eq!(verbs(&session.read_window().await.unwrap()), [Verb::Quit]);
    }

    #[tokio::test]
    async fn message_stream_handles_a_pending_dot() {
        // "\r\n." alone is not a terminator; the next octets decide
        let mut session = reader("a\r\n.b\r\n.\r\n", true);
        let body: Vec<Vec<u8>> = session
            .as_message_stream()
            .collect::<Result<_, _>>()
            .await
            .unwrap();
        assert_eq!(body, [b"a\r\n".to_vec(), b"b\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn message_stream_reports_a_disconnect() {
        let mut session = reader("no terminator", true);
        let out: Vec<Result<Vec<u8>, Error>> = session.as_message_stream().collect().await;
        assert!(matches!(out.last(), Some(Err(Error::Disconnected))));
    }

    #[tokio::test]
    async fn chunk_reads_are_exact() {
        let mut session = reader("hello world", true);
        let mut collected = vec![];
        let mut remaining = 11;
        while remaining > 0 {
            let chunk = session.read_chunk(remaining).await.unwrap();
            remaining -= chunk.len();
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn discard_pending_drops_pipelined_bytes() {
        let mut session = reader("STARTTLS\r\nMAIL FROM:<a@x.org>\r\n", true);
        assert_eq!(
            verbs(&session.read_window().await.unwrap()),
            [Verb::StartTls]
        );
        session.discard_pending();
        assert!(session.read_window().await.unwrap().is_empty());
    }
}
