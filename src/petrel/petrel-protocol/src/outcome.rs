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

//! The closed outcome enums handlers answer with, and their mapping to wire
//! replies. The session never invents a reply outside these mappings.

use crate::handler::BoxedSink;
use crate::{ParseArgsError, Verb};
use petrel_common::{Mailbox, Reply};

macro_rules! reply {
    ($text:expr) => {{
        #[allow(clippy::expect_used)]
        let reply = $text.parse::<Reply>().expect("valid reply literal");
        reply
    }};
}

/// Parse a reply the engine itself composes. Only ever called on literals
/// and templates that are valid by construction.
pub(crate) fn static_reply(text: &str) -> Reply {
    reply!(text)
}

/// Verdict on a freshly accepted connection, before the banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectOutcome {
    /// Send the banner and run the session.
    Accept,
    /// Refuse permanently and close.
    Deny,
    /// Refuse transiently (load, rate limit) and close.
    TempFail,
}

/// Verdict on a HELO/EHLO greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HelloOutcome {
    /// Greet back; on EHLO the session appends the capability list.
    Accept,
    /// The name is syntactically acceptable but refused by policy.
    RejectBadDomain,
    /// The greeting is not permitted here (e.g. forged local name).
    RejectNotPermitted,
    /// Close the session with a transient failure.
    ShutDown,
}

impl HelloOutcome {
    pub(crate) fn to_reply(self) -> Option<Reply> {
        match self {
            Self::Accept => None,
            Self::RejectBadDomain => Some(reply!("501 5.5.2 Invalid domain name\r\n")),
            Self::RejectNotPermitted => {
                Some(reply!("504 5.5.1 Command parameter not permitted\r\n"))
            }
            Self::ShutDown => Some(reply!("421 4.3.2 Service not available\r\n")),
        }
    }
}

/// Verdict on a MAIL FROM command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SenderOutcome {
    /// Open the transaction.
    Accept,
    /// The sender is refused by policy.
    RejectSenderDenied,
    /// The sender address is unusable.
    RejectBadSenderSyntax,
    /// The declared message is too big for this system.
    RejectSizeExceeded,
    /// The whole transaction is refused.
    RejectTransactionFailed,
    /// Transient refusal, the client should retry later.
    TempReject,
    /// Transient refusal for lack of storage.
    TempRejectInsufficientStorage,
    /// Close the session with a transient failure.
    ShutDown,
}

impl SenderOutcome {
    pub(crate) fn to_reply(self) -> Reply {
        match self {
            Self::Accept => reply!("250 2.1.0 Sender OK\r\n"),
            Self::RejectSenderDenied => reply!("550 5.7.1 Sender address rejected\r\n"),
            Self::RejectBadSenderSyntax => reply!("553 5.1.7 Bad sender address syntax\r\n"),
            Self::RejectSizeExceeded => reply!("552 5.3.4 Message too big for system\r\n"),
            Self::RejectTransactionFailed => reply!("554 5.0.0 Transaction failed\r\n"),
            Self::TempReject => reply!("450 4.3.2 Try again later\r\n"),
            Self::TempRejectInsufficientStorage => {
                reply!("452 4.3.1 Insufficient system storage\r\n")
            }
            Self::ShutDown => reply!("421 4.3.2 Service not available\r\n"),
        }
    }
}

/// Verdict on a RCPT TO command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecipientOutcome {
    /// Add the recipient to the envelope.
    Accept,
    /// The endpoint does not relay for this destination.
    RejectRelayDenied,
    /// No such mailbox here.
    RejectMailboxUnavailable,
    /// The user is not local and no forwarding is offered.
    RejectUserNotLocal,
    /// The mailbox cannot take more mail.
    RejectExceededStorage,
    /// The mailbox name is not allowed.
    RejectBadMailboxSyntax,
    /// The whole transaction is refused.
    RejectTransactionFailed,
    /// The mailbox is transiently busy.
    TempReject,
    /// Transient refusal for lack of storage.
    TempRejectInsufficientStorage,
}

impl RecipientOutcome {
    pub(crate) fn to_reply(self) -> Reply {
        match self {
            Self::Accept => reply!("250 2.1.5 Recipient OK\r\n"),
            Self::RejectRelayDenied => reply!("550 5.7.1 Relaying denied\r\n"),
            Self::RejectMailboxUnavailable => reply!("550 5.1.1 Mailbox unavailable\r\n"),
            Self::RejectUserNotLocal => reply!("551 5.1.6 User not local\r\n"),
            Self::RejectExceededStorage => reply!("552 5.2.2 Mailbox full\r\n"),
            Self::RejectBadMailboxSyntax => reply!("553 5.1.3 Bad recipient address syntax\r\n"),
            Self::RejectTransactionFailed => reply!("554 5.0.0 Transaction failed\r\n"),
            Self::TempReject => reply!("450 4.2.0 Mailbox busy\r\n"),
            Self::TempRejectInsufficientStorage => {
                reply!("452 4.3.1 Insufficient system storage\r\n")
            }
        }
    }
}

/// Verdict on DATA (or the first BDAT chunk). Acceptance carries the
/// pipeline channel the message octets will be written to.
#[non_exhaustive]
pub enum DataStartOutcome {
    /// Start the exchange, stream the octets into `sink`.
    Accept {
        /// Pipeline channel for this transaction's octets.
        sink: BoxedSink,
    },
    /// The message is refused by policy.
    RejectPolicy,
    /// The message is refused for size reasons.
    RejectExceededStorage,
    /// The whole transaction is refused.
    RejectTransactionFailed,
    /// Transient local error.
    TempRejectLocalError,
    /// Transient refusal for lack of storage.
    TempRejectInsufficientStorage,
}

impl std::fmt::Debug for DataStartOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::pattern_type_mismatch)]
        match self {
            Self::Accept { .. } => f.write_str("Accept"),
            Self::RejectPolicy => f.write_str("RejectPolicy"),
            Self::RejectExceededStorage => f.write_str("RejectExceededStorage"),
            Self::RejectTransactionFailed => f.write_str("RejectTransactionFailed"),
            Self::TempRejectLocalError => f.write_str("TempRejectLocalError"),
            Self::TempRejectInsufficientStorage => f.write_str("TempRejectInsufficientStorage"),
        }
    }
}

impl DataStartOutcome {
    pub(crate) fn to_reply(&self) -> Reply {
        match self {
            Self::Accept { .. } => {
                reply!("354 Enter mail, end with \".\" on a line by itself\r\n")
            }
            Self::RejectPolicy => reply!("550 5.7.1 Message refused\r\n"),
            Self::RejectExceededStorage => reply!("552 5.3.4 Message too big for system\r\n"),
            Self::RejectTransactionFailed => reply!("554 5.0.0 Transaction failed\r\n"),
            Self::TempRejectLocalError => reply!("451 4.3.0 Local error in processing\r\n"),
            Self::TempRejectInsufficientStorage => {
                reply!("452 4.3.1 Insufficient system storage\r\n")
            }
        }
    }
}

/// Verdict once the complete message body has been received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataEndOutcome {
    /// Take responsibility for the message.
    Accept,
    /// The message content is refused by policy.
    RejectPolicy,
    /// The whole transaction is refused.
    RejectTransactionFailed,
    /// Transient local error, the client should retry.
    TempRejectLocalError,
    /// Transient refusal for lack of storage.
    TempRejectInsufficientStorage,
}

impl DataEndOutcome {
    pub(crate) fn to_reply(self) -> Reply {
        match self {
            Self::Accept => reply!("250 2.0.0 Message accepted for delivery\r\n"),
            Self::RejectPolicy => reply!("554 5.7.1 Message refused\r\n"),
            Self::RejectTransactionFailed => reply!("554 5.0.0 Transaction failed\r\n"),
            Self::TempRejectLocalError => reply!("451 4.3.0 Local error in processing\r\n"),
            Self::TempRejectInsufficientStorage => {
                reply!("452 4.3.1 Insufficient system storage\r\n")
            }
        }
    }
}

/// Verdict on a VRFY query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyOutcome {
    /// Decline to verify without refusing delivery (the usual answer).
    CannotVerify,
    /// The argument identifies exactly this mailbox.
    Found(Mailbox),
    /// No such user.
    NotFound,
    /// VRFY is administratively disabled.
    Disabled,
}

impl VerifyOutcome {
    pub(crate) fn to_reply(&self) -> Reply {
        #[allow(clippy::pattern_type_mismatch)]
        match self {
            Self::CannotVerify => reply!("252 2.0.0 Cannot verify, will attempt delivery\r\n"),
            Self::Found(mailbox) => reply!(format!("250 2.0.0 <{mailbox}>\r\n")),
            Self::NotFound => reply!("550 5.1.1 Mailbox unavailable\r\n"),
            Self::Disabled => reply!("502 5.5.1 Command not implemented\r\n"),
        }
    }
}

/// Verdict on an EXPN query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExpandOutcome {
    /// The argument names this list of mailboxes.
    Expansion(Vec<Mailbox>),
    /// The argument is not a mailing list.
    NotAList,
    /// EXPN is administratively disabled.
    Disabled,
}

impl ExpandOutcome {
    pub(crate) fn to_reply(&self) -> Reply {
        #[allow(clippy::pattern_type_mismatch)]
        match self {
            Self::Expansion(mailboxes) => reply!(mailboxes
                .iter()
                .enumerate()
                .map(|(i, mailbox)| {
                    let sep = if i + 1 == mailboxes.len() { ' ' } else { '-' };
                    format!("250{sep}2.0.0 <{mailbox}>\r\n")
                })
                .collect::<String>()),
            Self::NotAList => reply!("550 5.1.1 Not a mailing list\r\n"),
            Self::Disabled => reply!("502 5.5.1 Command not implemented\r\n"),
        }
    }
}

/// The reply for an argument-parsing failure, refined by the verb so that
/// sender and recipient addresses report their own enhanced codes.
pub(crate) fn args_error_reply(error: &ParseArgsError, verb: Verb) -> Reply {
    match error {
        ParseArgsError::LineTooLong { .. } => reply!("500 5.5.6 Line too long\r\n"),
        ParseArgsError::BareLineBreak | ParseArgsError::MissingLineTerminator => {
            reply!("500 5.5.2 Bare CR or LF is not allowed\r\n")
        }
        ParseArgsError::BadMailbox { mailbox } => {
            let enhanced = if verb == Verb::RcptTo { "5.1.3" } else { "5.1.7" };
            reply!(format!(
                "553 {enhanced} The address <{mailbox}> is not a valid RFC 5321 address\r\n"
            ))
        }
        ParseArgsError::RequiresSmtpUtf8 => {
            reply!("553 5.6.7 The mailbox requires SMTPUTF8\r\n")
        }
        ParseArgsError::DuplicatedParameter { .. } => {
            reply!("501 5.5.4 Duplicated parameter\r\n")
        }
        ParseArgsError::UnrecognizedParameter { .. } => {
            reply!("555 5.5.4 Parameter not recognized or not implemented\r\n")
        }
        ParseArgsError::InvalidParameterValue { .. } => {
            reply!("501 5.5.2 Invalid parameter value\r\n")
        }
        ParseArgsError::UnknownMechanism { .. } => {
            reply!("504 5.5.4 Mechanism is not supported\r\n")
        }
        ParseArgsError::InvalidXtext => reply!("501 5.5.2 Invalid xtext encoding\r\n"),
        ParseArgsError::NotUtf8
        | ParseArgsError::BadAddressLiteral
        | ParseArgsError::MalformedArguments => {
            reply!("501 5.5.2 Syntax error in parameters\r\n")
        }
    }
}
