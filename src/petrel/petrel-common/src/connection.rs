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

use crate::{auth::Mechanism, ClientName};

/// Kind of SMTP service bound to a socket, selecting the default port and the
/// pre-banner behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[non_exhaustive]
pub enum ConnectionKind {
    /// Mail transfer between agents, port 25.
    #[strum(serialize = "relay")]
    Relay,
    /// Message submission, port 587, usually with mandatory authentication.
    #[strum(serialize = "submission")]
    Submission,
    /// Implicit TLS submission, port 465: the handshake runs before the banner.
    #[strum(serialize = "tunneled")]
    Tunneled,
}

/// Properties negotiated by a completed TLS handshake.
#[derive(Debug, Clone)]
pub struct TlsProps {
    /// Server name requested through SNI, if any.
    pub server_name: Option<String>,
    /// Negotiated protocol version.
    pub protocol_version: rustls::ProtocolVersion,
    /// Negotiated cipher suite.
    pub cipher_suite: rustls::CipherSuite,
    /// Certificate chain presented by the peer, if client auth happened.
    pub peer_certificates: Option<Vec<rustls::Certificate>>,
}

/// Identity recorded by a successful SASL exchange, or asserted by a trusted
/// frontend through XCLIENT LOGIN (no mechanism in that case).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslProps {
    /// Mechanism that ran, if the identity comes from a SASL exchange.
    pub mechanism: Option<Mechanism>,
    /// Authenticated identity.
    pub identity: String,
}

/// Everything the session knows about the TCP connection itself. Lives for
/// the whole connection and is only ever mutated by the session.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectionMetadata {
    /// Peer address of the connection.
    pub client_addr: std::net::SocketAddr,
    /// Address of the listener which accepted the connection.
    pub server_addr: std::net::SocketAddr,
    /// Kind of service the listener provides.
    pub kind: ConnectionKind,
    /// Instant the connection was accepted.
    pub timestamp: time::OffsetDateTime,
    /// Universal unique identifier of the connection.
    pub uuid: uuid::Uuid,
    /// Name the client claimed in HELO/EHLO, once greeted.
    pub client_name: Option<ClientName>,
    /// Did the client greet with EHLO rather than HELO?
    pub extended: bool,
    /// TLS properties, once the connection is secured.
    pub tls: Option<TlsProps>,
    /// SASL identity, once authenticated.
    pub sasl: Option<SaslProps>,
    /// Number of accepted MAIL FROM commands on this connection.
    pub transaction_count: usize,
}

impl ConnectionMetadata {
    /// Fresh metadata for a just-accepted connection.
    #[must_use]
    #[inline]
    pub const fn new(
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
        kind: ConnectionKind,
        timestamp: time::OffsetDateTime,
        uuid: uuid::Uuid,
    ) -> Self {
        Self {
            client_addr,
            server_addr,
            kind,
            timestamp,
            uuid,
            client_name: None,
            extended: false,
            tls: None,
            sasl: None,
            transaction_count: 0,
        }
    }

    /// Is the connection under TLS?
    #[must_use]
    #[inline]
    pub const fn is_secured(&self) -> bool {
        self.tls.is_some()
    }

    /// Has a SASL exchange completed successfully?
    #[must_use]
    #[inline]
    pub const fn is_authenticated(&self) -> bool {
        self.sasl.is_some()
    }

    /// Forget the ESMTP state a STARTTLS upgrade invalidates: the client must
    /// greet and authenticate again on the secured channel (RFC 3207).
    #[inline]
    pub fn reset_esmtp_state(&mut self) {
        self.client_name = None;
        self.extended = false;
        self.sasl = None;
    }
}
