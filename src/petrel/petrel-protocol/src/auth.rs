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

//! The AUTH command envelope: mechanism startup, the 334 challenge/response
//! loop, cancellation and the final verdict. The cryptographic mechanism
//! itself runs inside [`rsasl`]; this module only moves base64 lines.

use crate::{handler::CallbackWrap, reader::Reader, writer::ReplyWriter};
use base64::Engine;
use petrel_common::auth::Mechanism;

/// Ceiling for one AUTH response line (RFC 4954 §4).
const AUTH_LINE_MAX: usize = 12_288;

/// Validation marker extracting the authenticated identity from the SASL
/// exchange. `Some(identity)` when the realm's authenticator accepted the
/// credentials, `None` when it turned them down.
pub struct AuthIdentity;

impl rsasl::validate::Validation for AuthIdentity {
    type Value = Option<String>;
}

/// Ways a SASL exchange can fail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The mechanism expects the server to speak first, but the client sent
    /// an initial response.
    #[error("the client must not start with this mechanism")]
    ClientMustNotStart,
    /// A response line is not valid base64.
    #[error("{0}")]
    Base64(#[from] base64::DecodeError),
    /// The client canceled the exchange with `*`.
    #[error("authentication canceled by the client")]
    Canceled,
    /// The exchange completed but the credentials were refused.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The mechanism itself failed.
    #[error("{0}")]
    SessionError(#[from] rsasl::prelude::SessionError),
    /// The SASL provider could not start the requested mechanism.
    #[error("{0}")]
    ConfigError(rsasl::prelude::SASLError),
    /// The connection broke during the exchange.
    #[error("{0}")]
    Connection(#[from] crate::Error),
}

impl From<std::io::Error> for AuthError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Connection(crate::Error::Io(e))
    }
}

fn decode_base64(input: &[u8]) -> Result<Vec<u8>, AuthError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(input)?)
}

async fn read_response<R: tokio::io::AsyncRead + Unpin + Send>(
    stream: &mut Reader<R>,
) -> Result<Vec<u8>, AuthError> {
    let line = stream
        .read_line(AUTH_LINE_MAX)
        .await?
        .ok_or(AuthError::Connection(crate::Error::Disconnected))?;
    let line = line.strip_suffix(b"\r\n").unwrap_or(&line);
    if line == b"*" {
        return Err(AuthError::Canceled);
    }
    decode_base64(line)
}

/// Run one complete AUTH exchange and return the authenticated identity.
///
/// # Errors
///
/// Any [`AuthError`]; the caller maps them to wire replies.
pub(crate) async fn authenticate<W, R>(
    sink: &mut ReplyWriter<W>,
    stream: &mut Reader<R>,
    callback: CallbackWrap,
    mechanism: Mechanism,
    initial_response: Option<Vec<u8>>,
) -> Result<String, AuthError>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let config = rsasl::config::SASLConfig::builder()
        .with_defaults()
        .with_callback(callback)
        .map_err(AuthError::ConfigError)?;
    let server = rsasl::prelude::SASLServer::<AuthIdentity>::new(config);

    #[allow(clippy::expect_used)]
    let selected = rsasl::prelude::Mechname::parse(mechanism.as_ref().as_bytes())
        .expect("mechanism names are valid");
    let mut session = server
        .start_suggested(selected)
        .map_err(AuthError::ConfigError)?;

    // "=" denotes a present-but-empty initial response (RFC 4954 §4).
    let mut input = match initial_response {
        Some(ir) if ir == b"=" => Some(vec![]),
        Some(ir) => Some(decode_base64(&ir)?),
        None => None,
    };

    if session.are_we_first() && input.is_some() {
        return Err(AuthError::ClientMustNotStart);
    }
    if !session.are_we_first() && input.is_none() {
        // client-first mechanism without an initial response: empty challenge
        sink.write_all("334 \r\n").await?;
        input = Some(read_response(stream).await?);
    }

    loop {
        let mut out = std::io::Cursor::new(Vec::new());
        let state = session.step(input.take().as_deref(), &mut out)?;

        match state {
            rsasl::prelude::State::Running => {
                let challenge =
                    base64::engine::general_purpose::STANDARD.encode(out.get_ref());
                sink.write_all(&format!("334 {challenge}\r\n")).await?;
                input = Some(read_response(stream).await?);
            }
            rsasl::prelude::State::Finished(_) => break,
        }
    }

    match session.validation() {
        Some(Some(identity)) => Ok(identity),
        _ => Err(AuthError::InvalidCredentials),
    }
}
