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

//! Failure taxonomy of the session engine. Two layers exist on purpose:
//! [`ParseArgsError`] describes client input the session can still answer on
//! the wire (every variant has a 5xx mapping), while [`Error`] describes
//! conditions that interrupt or end the session itself.

/// A condition that interrupts the session: the transport broke, the peer
/// vanished, or a deadline passed. Malformed-but-answerable input is not an
/// [`Error`]; it travels through the command batch as a [`ParseArgsError`]
/// and turns into a 5xx reply.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport failed underneath the session.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the connection in the middle of an exchange.
    #[error("the client closed the connection mid-exchange")]
    Disconnected,
    /// An exchange outran its deadline.
    #[error("{reason} timed out after {}", humantime::format_duration(*.after))]
    Timeout {
        /// The deadline that passed.
        after: std::time::Duration,
        /// What the session was waiting for.
        reason: &'static str,
    },
    /// A command line the session refuses to interpret. Carried inside the
    /// batch so the dispatcher can map it onto a reply; it only escapes as a
    /// session error when no reply is possible anymore.
    #[error("unusable command line: {0}")]
    Args(#[from] ParseArgsError),
}

impl Error {
    /// The parse failure behind this error, when there is one to answer.
    #[inline]
    #[must_use]
    pub const fn as_args_error(&self) -> Option<&ParseArgsError> {
        match self {
            Self::Args(e) => Some(e),
            _ => None,
        }
    }
}

/// Client input the session refuses, each variant mapping to one wire reply.
#[allow(clippy::module_name_repetitions)]
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ParseArgsError {
    /// The buffer holds bytes that are not UTF-8 where text is required.
    #[error("the arguments are not valid UTF-8")]
    NotUtf8,
    /// An address literal does not parse as an IP address.
    #[error("invalid address literal")]
    BadAddressLiteral,
    /// The command line ran past the negotiated ceiling.
    #[error("command line of {got} octets exceeds the {limit} octet ceiling")]
    LineTooLong {
        /// ceiling in force, CRLF included
        limit: usize,
        /// what the client sent
        got: usize,
    },
    /// A CR or LF appeared outside the CRLF terminator.
    #[error("bare CR or LF in command line")]
    BareLineBreak,
    /// The connection ended before the line did.
    #[error("command line without a CRLF terminator")]
    MissingLineTerminator,
    /// A reverse-path or forward-path that is not a usable mailbox.
    #[error("the address <{mailbox}> is not a valid RFC 5321 mailbox")]
    BadMailbox {
        /// the offending path
        mailbox: String,
    },
    /// An internationalized mailbox was used without the SMTPUTF8 parameter.
    #[error("the mailbox requires SMTPUTF8")]
    RequiresSmtpUtf8,
    /// The same ESMTP keyword appeared twice.
    #[error("duplicated parameter '{key}'")]
    DuplicatedParameter {
        /// offending keyword
        key: String,
    },
    /// The keyword is not one the endpoint advertises.
    #[error("unrecognized parameter '{key}'")]
    UnrecognizedParameter {
        /// offending keyword
        key: String,
    },
    /// The keyword is known but its value does not parse.
    #[error("invalid value '{value}' for parameter '{key}'")]
    InvalidParameterValue {
        /// offending keyword
        key: String,
        /// offending value
        value: String,
    },
    /// The AUTH argument does not name a supported mechanism.
    #[error("unknown mechanism '{mechanism}'")]
    UnknownMechanism {
        /// offending mechanism name
        mechanism: String,
    },
    /// Ill-formed xtext (RFC 3461 §4).
    #[error("invalid xtext encoding")]
    InvalidXtext,
    /// The arguments do not follow the command's grammar.
    #[error("malformed arguments")]
    MalformedArguments,
}

impl From<std::string::FromUtf8Error> for ParseArgsError {
    #[inline]
    fn from(_: std::string::FromUtf8Error) -> Self {
        Self::NotUtf8
    }
}

impl From<std::str::Utf8Error> for ParseArgsError {
    #[inline]
    fn from(_: std::str::Utf8Error) -> Self {
        Self::NotUtf8
    }
}

impl From<std::net::AddrParseError> for ParseArgsError {
    #[inline]
    fn from(_: std::net::AddrParseError) -> Self {
        Self::BadAddressLiteral
    }
}
