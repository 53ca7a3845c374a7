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

//! Value types shared by every petrel crate: wire replies, mailboxes, the
//! per-connection metadata and the per-transaction envelope.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::multiple_crate_versions)]

/// SASL mechanisms and the credentials they produce.
pub mod auth;

mod connection;
mod envelope;
mod extension;
mod reply;
mod stage;
mod types {
    pub mod address;
    pub mod client_name;
}

pub use connection::{ConnectionKind, ConnectionMetadata, SaslProps, TlsProps};
pub use envelope::{
    BodyType, DeliverBy, DeliverByMode, DsnReturn, Envelope, HoldRequest, NotifyOn,
    OriginalRecipient, Recipient,
};
pub use extension::Extension;
pub use reply::{EnhancedCode, Reply, ReplyCode, ReplyParseError};
pub use stage::Stage;
pub use types::address::{Mailbox, MailboxParseError};
pub use types::client_name::{ClientName, Domain};
