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

//! The per-connection SMTP session engine: command parsing, the protocol
//! state machine, extension negotiation, TLS upgrade sequencing, SASL
//! dispatch, DATA/BDAT reception and the staged handler contract
//! applications implement to make accept/reject decisions.

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

mod auth;
mod command;
mod error;
mod handler;
mod negotiator;
mod outcome;
mod reader;
mod receiver;
mod writer;

/// xtext codec of RFC 3461.
pub mod xtext;

pub use auth::{AuthError, AuthIdentity};
pub use command::{
    AcceptArgs, AuthArgs, Batch, BdatArgs, EhloArgs, HeloArgs, MailFromArgs, RcptToArgs,
    UnparsedArgs, Verb, XclientArgs,
};
pub use error::{Error, ParseArgsError};
pub use handler::{BoxedSink, CallbackWrap, MessageSink, SessionHandler, SinkDisposition};
pub use outcome::{
    ConnectOutcome, DataEndOutcome, DataStartOutcome, ExpandOutcome, HelloOutcome,
    RecipientOutcome, SenderOutcome, VerifyOutcome,
};
pub use reader::{Reader, COMMAND_LINE_MAX, COMMAND_LINE_MAX_UTF8};
pub use receiver::Receiver;
pub use writer::ReplyWriter;

pub use rsasl;
pub use tokio_rustls::rustls;
