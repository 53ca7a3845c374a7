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

use crate::Mailbox;

/// Body transport encoding declared by the `BODY` parameter, see RFC 6152 and
/// RFC 3030.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[non_exhaustive]
pub enum BodyType {
    /// Plain 7-bit ASCII body.
    #[default]
    #[strum(serialize = "7BIT")]
    SevenBit,
    /// 8-bit MIME body.
    #[strum(serialize = "8BITMIME")]
    EightBitMime,
    /// Binary body, only transferable with BDAT.
    #[strum(serialize = "BINARYMIME")]
    BinaryMime,
}

/// How much of a failed message a delivery status notification carries back
/// (`RET` parameter, RFC 3461 §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DsnReturn {
    /// Echo the whole message.
    Full,
    /// Echo the headers only.
    Headers,
}

/// When a recipient wants delivery status notifications (`NOTIFY` parameter,
/// RFC 3461 §4.1). `NEVER` excludes every other value, so it gets its own
/// variant.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NotifyOn {
    /// Suppress DSNs for this recipient entirely.
    Never,
    /// Notify on the named events.
    When {
        /// The message reached the recipient.
        success: bool,
        /// The message could not be delivered.
        failure: bool,
        /// Delivery is taking longer than expected.
        delay: bool,
    },
}

/// The address the message was first submitted to, before any rewriting
/// (`ORCPT` parameter, RFC 3461 §4.2).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OriginalRecipient {
    /// Address type tag, `rfc822` in practice.
    pub addr_type: String,
    /// The original recipient address, already xtext-decoded.
    pub mailbox: Mailbox,
}

/// An accepted forward-path with its per-recipient DSN parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Recipient address.
    pub forward_path: Mailbox,
    /// `ORCPT` argument of the `RCPT TO` command.
    pub original_forward_path: Option<OriginalRecipient>,
    /// `NOTIFY` argument of the `RCPT TO` command.
    pub notify_on: NotifyOn,
}

/// Deferred-delivery request carried by `HOLDFOR`/`HOLDUNTIL`, see RFC 4865.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldRequest {
    /// Hold the message for a duration after its acceptance.
    For(std::time::Duration),
    /// Hold the message until an absolute release date.
    Until(time::OffsetDateTime),
}

/// What to do when a `BY` deadline cannot be met, see RFC 2852.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverByMode {
    /// Issue a "delayed" DSN and keep trying.
    Notify,
    /// Return the message to the sender.
    Return,
}

/// Delivery deadline carried by the `BY` parameter, see RFC 2852.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverBy {
    /// Seconds until the deadline; may be negative in notify mode.
    pub seconds: i64,
    /// Behavior when the deadline passes.
    pub mode: DeliverByMode,
    /// The client requested trace information in the DSN.
    pub trace: bool,
}

/// The envelope of one mail transaction. Created when MAIL FROM is accepted,
/// destroyed by RSET, QUIT, HELO/EHLO or a completed DATA/BDAT exchange.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Envelope {
    /// Sender address, empty for delivery status notifications.
    pub reverse_path: Option<Mailbox>,
    /// Declared body transport encoding.
    pub body_type: BodyType,
    /// The transaction uses internationalized addresses (SMTPUTF8).
    pub utf8: bool,
    /// Size the client declared with `SIZE=`, in octets.
    pub declared_size: Option<u64>,
    /// Client-defined envelope identifier (`ENVID`), xtext-decoded.
    pub envelope_id: Option<String>,
    /// `RET` argument of the MAIL FROM command.
    pub ret: Option<DsnReturn>,
    /// Identity the client claims submitted this message (`AUTH=` parameter).
    pub auth_mailbox: Option<String>,
    /// The message must only be relayed over TLS (REQUIRETLS).
    pub require_tls: bool,
    /// Transfer priority in -9..=9 (MT-PRIORITY).
    pub priority: Option<i8>,
    /// Deferred-delivery request (FUTURERELEASE).
    pub hold: Option<HoldRequest>,
    /// Delivery deadline (DELIVERBY).
    pub deliver_by: Option<DeliverBy>,
    /// Accepted recipients, in acceptance order.
    pub recipients: Vec<Recipient>,
    /// Octets received so far in the data phase.
    pub data_octets: u64,
}

impl Envelope {
    /// A fresh envelope for the given reverse-path.
    #[must_use]
    #[inline]
    pub const fn new(reverse_path: Option<Mailbox>) -> Self {
        Self {
            reverse_path,
            body_type: BodyType::SevenBit,
            utf8: false,
            declared_size: None,
            envelope_id: None,
            ret: None,
            auth_mailbox: None,
            require_tls: false,
            priority: None,
            hold: None,
            deliver_by: None,
            recipients: vec![],
            data_octets: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox;

    #[test]
    fn fresh_envelope_is_empty() {
        let envelope = Envelope::new(Some(mailbox!("a@example.com")));
        assert_eq!(envelope.body_type, BodyType::SevenBit);
        assert!(envelope.recipients.is_empty());
        assert_eq!(envelope.data_octets, 0);
    }

    #[test]
    fn body_type_wire_names() {
        assert_eq!("8BITMIME".parse::<BodyType>().unwrap(), BodyType::EightBitMime);
        assert_eq!(BodyType::BinaryMime.to_string(), "BINARYMIME");
    }
}
