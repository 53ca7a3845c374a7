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

//! Verb recognition and the typed argument parsers behind each command.
//! Parsing is strict about grammar but leaves policy alone: whether a
//! parameter is welcome on this endpoint is the session's decision.

use crate::{xtext, Error, ParseArgsError};
use petrel_common::{
    auth::Mechanism, BodyType, ClientName, ConnectionKind, DeliverBy, DeliverByMode, Domain,
    DsnReturn, HoldRequest, Mailbox, NotifyOn, OriginalRecipient,
};

/// Bytes following a recognized verb, CRLF still attached.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct UnparsedArgs(pub Vec<u8>);

/// The commands read from one TCP window.
pub type Batch = Vec<Result<(Verb, UnparsedArgs), Error>>;

/// SMTP command verbs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Verb {
    /// Legacy greeting (RFC 5321 §4.1.1.1).
    Helo,
    /// Greeting that also requests the extension list.
    Ehlo,
    /// Opens a mail transaction with the reverse-path.
    MailFrom,
    /// Adds one forward-path to the open transaction.
    RcptTo,
    /// Starts a dot-stuffed message transfer.
    Data,
    /// One exactly-counted chunk of message data (RFC 3030).
    Bdat,
    /// Ends the session after a 221.
    Quit,
    /// Discards the open transaction.
    Rset,
    /// Asks for a command summary.
    Help,
    /// Does nothing, successfully.
    Noop,
    /// Asks whether the argument names a mailbox.
    Vrfy,
    /// Asks to expand a mailing list.
    Expn,
    /// Upgrades the connection to TLS (RFC 3207).
    StartTls,
    /// Starts a SASL exchange (RFC 4954).
    Auth,
    /// Attribute forwarding from a trusted frontend (Postfix convention).
    Xclient,
    /// Anything the table below does not recognize.
    Unknown,
}

impl Verb {
    /// Wire prefix selecting each verb, argument separator included. The
    /// CRLF entries are the verbs that take no arguments at all.
    const PREFIXES: [(&'static str, Self); 15] = [
        ("HELO ", Self::Helo),
        ("EHLO ", Self::Ehlo),
        ("MAIL FROM:", Self::MailFrom),
        ("RCPT TO:", Self::RcptTo),
        ("DATA\r\n", Self::Data),
        ("BDAT ", Self::Bdat),
        ("QUIT\r\n", Self::Quit),
        ("RSET\r\n", Self::Rset),
        ("HELP", Self::Help),
        ("NOOP\r\n", Self::Noop),
        ("VRFY ", Self::Vrfy),
        ("EXPN ", Self::Expn),
        ("STARTTLS\r\n", Self::StartTls),
        ("AUTH ", Self::Auth),
        ("XCLIENT ", Self::Xclient),
    ];

    pub(crate) fn lookup(line: &[u8]) -> (Self, UnparsedArgs) {
        for (prefix, verb) in &Self::PREFIXES {
            if line.len() >= prefix.len()
                && line[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            {
                return (*verb, UnparsedArgs(line[prefix.len()..].to_vec()));
            }
        }
        (Self::Unknown, UnparsedArgs(line.to_vec()))
    }

    /// May the client send further commands while the reply to this one is
    /// still pending? (RFC 2920 §3.1; DATA, STARTTLS, AUTH, VRFY and EXPN
    /// are synchronization points.)
    #[inline]
    #[must_use]
    pub const fn is_pipelinable(self) -> bool {
        matches!(
            self,
            Self::Helo
                | Self::Ehlo
                | Self::MailFrom
                | Self::RcptTo
                | Self::Rset
                | Self::Noop
                | Self::Quit
        )
    }
}

/// What the acceptor knows about a connection when it hands it over.
#[non_exhaustive]
pub struct AcceptArgs {
    /// Peer address.
    pub client_addr: std::net::SocketAddr,
    /// Address of the listener that accepted.
    pub server_addr: std::net::SocketAddr,
    /// Accept time.
    pub timestamp: time::OffsetDateTime,
    /// Connection identifier, unique across restarts.
    pub uuid: uuid::Uuid,
    /// Service kind of the listener.
    pub kind: ConnectionKind,
}

impl AcceptArgs {
    /// Create a new instance.
    #[inline]
    #[must_use]
    pub const fn new(
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
        timestamp: time::OffsetDateTime,
        uuid: uuid::Uuid,
        kind: ConnectionKind,
    ) -> Self {
        Self {
            client_addr,
            server_addr,
            timestamp,
            uuid,
            kind,
        }
    }
}

/// Argument of a HELO command.
#[non_exhaustive]
pub struct HeloArgs {
    /// Name the client claims.
    pub client_name: Domain,
}

/// Argument of an EHLO command.
#[non_exhaustive]
pub struct EhloArgs {
    /// Name the client claims, possibly an address literal.
    pub client_name: ClientName,
}

/// Arguments of a MAIL FROM command.
#[non_exhaustive]
pub struct MailFromArgs {
    /// Sender address, `None` for the null reverse-path.
    pub reverse_path: Option<Mailbox>,
    /// (`BODY`) declared transport encoding.
    pub body_type: Option<BodyType>,
    /// (`SIZE`) declared message size in octets.
    pub size: Option<u64>,
    /// (`SMTPUTF8`) the transaction uses internationalized addresses.
    pub use_smtputf8: bool,
    /// (`ENVID`) client-defined envelope identifier, xtext-decoded.
    pub envelope_id: Option<String>,
    /// (`RET`) how much of the message to return in failure DSNs.
    pub ret: Option<DsnReturn>,
    /// (`AUTH`) identity the client claims submitted this message.
    pub auth_mailbox: Option<String>,
    /// (`REQUIRETLS`) the message must only be relayed over TLS.
    pub require_tls: bool,
    /// (`MT-PRIORITY`) transfer priority.
    pub priority: Option<i8>,
    /// (`HOLDFOR`/`HOLDUNTIL`) deferred-delivery request.
    pub hold: Option<HoldRequest>,
    /// (`BY`) delivery deadline.
    pub deliver_by: Option<DeliverBy>,
}

/// Arguments of a RCPT TO command.
#[non_exhaustive]
pub struct RcptToArgs {
    /// Recipient address.
    pub forward_path: Mailbox,
    /// (`ORCPT`) pre-rewriting recipient.
    pub original_forward_path: Option<OriginalRecipient>,
    /// (`NOTIFY`) DSN request for this recipient.
    pub notify_on: NotifyOn,
}

/// Arguments of an AUTH command.
#[non_exhaustive]
pub struct AuthArgs {
    /// Requested mechanism.
    pub mechanism: Mechanism,
    /// Base64 initial response, `=` standing for an empty one.
    pub initial_response: Option<Vec<u8>>,
}

/// Arguments of a BDAT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct BdatArgs {
    /// Exact octet count of the chunk that follows the command.
    pub size: u64,
    /// This chunk terminates the message.
    pub last: bool,
}

/// Attribute overrides received from a trusted frontend with XCLIENT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct XclientArgs {
    /// `NAME`: reverse DNS name of the original client.
    pub name: Option<String>,
    /// `ADDR`: address of the original client.
    pub addr: Option<std::net::IpAddr>,
    /// `PORT`: source port of the original client.
    pub port: Option<u16>,
    /// `PROTO`: `SMTP` or `ESMTP`.
    pub proto: Option<String>,
    /// `HELO`: hello name the original client used.
    pub helo: Option<String>,
    /// `LOGIN`: identity the frontend authenticated.
    pub login: Option<String>,
}

fn strip_crlf(args: &UnparsedArgs) -> Result<&[u8], ParseArgsError> {
    args.0
        .strip_suffix(b"\r\n")
        .ok_or(ParseArgsError::MalformedArguments)
}

fn tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(u8::is_ascii_whitespace).filter(|t| !t.is_empty())
}

/// Split one `KEYWORD[=value]` parameter token.
fn key_value(parameter: &[u8]) -> (&[u8], Option<&[u8]>) {
    match memchr::memchr(b'=', parameter) {
        Some(eq) => (&parameter[..eq], Some(&parameter[eq + 1..])),
        None => (parameter, None),
    }
}

fn key_of(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

fn value_of(raw: Option<&[u8]>) -> String {
    raw.map_or_else(String::new, |raw| String::from_utf8_lossy(raw).into_owned())
}

/// `"<" [ A-d-l ":" ] Mailbox ">"`. The source route is obsolete syntax,
/// accepted and discarded (RFC 5321 §4.1.1.3); `None` is the null
/// reverse-path, legal on MAIL FROM only.
fn parse_path(token: &[u8], allow_null: bool) -> Result<Option<String>, ParseArgsError> {
    let inner = token
        .strip_prefix(b"<")
        .and_then(|rest| rest.strip_suffix(b">"))
        .ok_or(ParseArgsError::MalformedArguments)?;

    let inner = if inner.first() == Some(&b'@') {
        match memchr::memchr(b':', inner) {
            Some(colon) => &inner[colon + 1..],
            None => return Err(ParseArgsError::MalformedArguments),
        }
    } else {
        inner
    };

    if inner.is_empty() {
        if allow_null {
            Ok(None)
        } else {
            Err(ParseArgsError::MalformedArguments)
        }
    } else {
        Ok(Some(String::from_utf8(inner.to_vec())?))
    }
}

fn parse_domain(name: &str) -> Result<Domain, ParseArgsError> {
    let checked =
        addr::parse_domain_name(name).map_err(|_e| ParseArgsError::MalformedArguments)?;
    Domain::from_utf8(checked.as_str()).map_err(|_e| ParseArgsError::MalformedArguments)
}

/// An EHLO argument: a domain, or an address literal in brackets.
fn parse_client_name(value: &str) -> Result<ClientName, ParseArgsError> {
    if let Some(literal) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        if literal.len() >= 5 && literal[..5].eq_ignore_ascii_case("IPv6:") {
            return Ok(ClientName::Ip6(literal[5..].parse()?));
        }
        return Ok(ClientName::Ip4(literal.parse()?));
    }
    Ok(ClientName::Domain(parse_domain(value)?))
}

impl TryFrom<UnparsedArgs> for HeloArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let name = String::from_utf8(strip_crlf(&value)?.to_vec())?;
        Ok(Self {
            client_name: parse_domain(&name)?,
        })
    }
}

impl TryFrom<UnparsedArgs> for EhloArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let name = String::from_utf8(strip_crlf(&value)?.to_vec())?;
        if !name.is_ascii() {
            return Err(ParseArgsError::MalformedArguments);
        }
        Ok(Self {
            client_name: parse_client_name(&name)?,
        })
    }
}

impl TryFrom<UnparsedArgs> for AuthArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let line = strip_crlf(&value)?;

        let (mechanism, initial_response) = match line.iter().position(u8::is_ascii_whitespace) {
            Some(space) => (&line[..space], Some(line[space + 1..].to_vec())),
            None => (line, None),
        };

        let mechanism = std::str::from_utf8(mechanism)?;
        let mechanism = mechanism.to_ascii_uppercase().parse().map_err(|_e| {
            ParseArgsError::UnknownMechanism {
                mechanism: mechanism.to_owned(),
            }
        })?;

        Ok(Self {
            mechanism,
            initial_response,
        })
    }
}

impl MailFromArgs {
    /// Fold one ESMTP parameter into the arguments. Keywords compare
    /// case-insensitively, values keep their case.
    fn apply(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), ParseArgsError> {
        let duplicated = || ParseArgsError::DuplicatedParameter { key: key_of(key) };
        let invalid = || ParseArgsError::InvalidParameterValue {
            key: key_of(key),
            value: value_of(value),
        };

        match (key, value) {
            (key, Some(value)) if key.eq_ignore_ascii_case(b"BODY") => {
                if self.body_type.is_some() {
                    return Err(duplicated());
                }
                self.body_type = Some(
                    std::str::from_utf8(value)?
                        .to_ascii_uppercase()
                        .parse()
                        .map_err(|_e| invalid())?,
                );
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"SIZE") => {
                if self.size.is_some() {
                    return Err(duplicated());
                }
                self.size = Some(std::str::from_utf8(value)?.parse().map_err(|_e| invalid())?);
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"RET") => {
                if self.ret.is_some() {
                    return Err(duplicated());
                }
                self.ret = if value.eq_ignore_ascii_case(b"FULL") {
                    Some(DsnReturn::Full)
                } else if value.eq_ignore_ascii_case(b"HDRS") {
                    Some(DsnReturn::Headers)
                } else {
                    return Err(invalid());
                };
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"ENVID") => {
                if self.envelope_id.is_some() {
                    return Err(duplicated());
                }
                self.envelope_id =
                    Some(String::from_utf8(xtext::decode(value)?).map_err(|_e| invalid())?);
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"AUTH") => {
                if self.auth_mailbox.is_some() {
                    return Err(duplicated());
                }
                self.auth_mailbox =
                    Some(String::from_utf8(xtext::decode(value)?).map_err(|_e| invalid())?);
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"MT-PRIORITY") => {
                if self.priority.is_some() {
                    return Err(duplicated());
                }
                let priority: i8 =
                    std::str::from_utf8(value)?.parse().map_err(|_e| invalid())?;
                if !(-9..=9).contains(&priority) {
                    return Err(invalid());
                }
                self.priority = Some(priority);
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"HOLDFOR") => {
                if self.hold.is_some() {
                    return Err(duplicated());
                }
                let seconds: u64 =
                    std::str::from_utf8(value)?.parse().map_err(|_e| invalid())?;
                self.hold = Some(HoldRequest::For(std::time::Duration::from_secs(seconds)));
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"HOLDUNTIL") => {
                if self.hold.is_some() {
                    return Err(duplicated());
                }
                self.hold = Some(HoldRequest::Until(
                    time::OffsetDateTime::parse(
                        std::str::from_utf8(value)?,
                        &time::format_description::well_known::Rfc3339,
                    )
                    .map_err(|_e| invalid())?,
                ));
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"BY") => {
                if self.deliver_by.is_some() {
                    return Err(duplicated());
                }
                let value = std::str::from_utf8(value)?;
                let (seconds, mode) = value.split_once(';').ok_or_else(invalid)?;
                let seconds: i64 = seconds.parse().map_err(|_e| invalid())?;
                let (mode, trace) = match mode.to_ascii_uppercase().as_str() {
                    "N" => (DeliverByMode::Notify, false),
                    "NT" => (DeliverByMode::Notify, true),
                    "R" => (DeliverByMode::Return, false),
                    "RT" => (DeliverByMode::Return, true),
                    _ => return Err(invalid()),
                };
                self.deliver_by = Some(DeliverBy {
                    seconds,
                    mode,
                    trace,
                });
            }
            (key, None) if key.eq_ignore_ascii_case(b"SMTPUTF8") => {
                if self.use_smtputf8 {
                    return Err(duplicated());
                }
                self.use_smtputf8 = true;
            }
            (key, None) if key.eq_ignore_ascii_case(b"REQUIRETLS") => {
                if self.require_tls {
                    return Err(duplicated());
                }
                self.require_tls = true;
            }
            (key, _) => {
                return Err(ParseArgsError::UnrecognizedParameter { key: key_of(key) });
            }
        }
        Ok(())
    }
}

impl TryFrom<UnparsedArgs> for MailFromArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let line = strip_crlf(&value)?;
        let mut tokens = tokens(line);

        let path = parse_path(
            tokens.next().ok_or(ParseArgsError::MalformedArguments)?,
            true,
        )?;

        let mut result = Self {
            reverse_path: None,
            body_type: None,
            size: None,
            use_smtputf8: false,
            envelope_id: None,
            ret: None,
            auth_mailbox: None,
            require_tls: false,
            priority: None,
            hold: None,
            deliver_by: None,
        };

        for parameter in tokens {
            let (key, value) = key_value(parameter);
            result.apply(key, value)?;
        }

        result.reverse_path = match path {
            Some(mailbox) => {
                if !result.use_smtputf8 && !mailbox.is_ascii() {
                    return Err(ParseArgsError::RequiresSmtpUtf8);
                }
                match mailbox.parse() {
                    Ok(mailbox) => Some(mailbox),
                    Err(_e) => return Err(ParseArgsError::BadMailbox { mailbox }),
                }
            }
            None => None,
        };
        Ok(result)
    }
}

impl RcptToArgs {
    fn apply(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), ParseArgsError> {
        let duplicated = || ParseArgsError::DuplicatedParameter { key: key_of(key) };
        let invalid = || ParseArgsError::InvalidParameterValue {
            key: key_of(key),
            value: value_of(value),
        };

        match (key, value) {
            (key, Some(value)) if key.eq_ignore_ascii_case(b"ORCPT") => {
                if self.original_forward_path.is_some() {
                    return Err(duplicated());
                }
                let (addr_type, encoded) = match memchr::memchr(b';', value) {
                    Some(semi) => (&value[..semi], &value[semi + 1..]),
                    None => return Err(invalid()),
                };
                let decoded =
                    String::from_utf8(xtext::decode(encoded)?).map_err(|_e| invalid())?;
                self.original_forward_path = match decoded.parse() {
                    Ok(mailbox) => Some(OriginalRecipient {
                        addr_type: std::str::from_utf8(addr_type)?.to_owned(),
                        mailbox,
                    }),
                    Err(_e) => return Err(ParseArgsError::BadMailbox { mailbox: decoded }),
                };
            }
            (key, Some(value)) if key.eq_ignore_ascii_case(b"NOTIFY") => {
                let (mut success, mut failure, mut delay, mut never) =
                    (false, false, false, false);
                for item in value.split(|c| *c == b',') {
                    if item.eq_ignore_ascii_case(b"NEVER") {
                        never = true;
                    } else if item.eq_ignore_ascii_case(b"SUCCESS") {
                        success = true;
                    } else if item.eq_ignore_ascii_case(b"FAILURE") {
                        failure = true;
                    } else if item.eq_ignore_ascii_case(b"DELAY") {
                        delay = true;
                    } else {
                        return Err(invalid());
                    }
                }
                self.notify_on = match (never, success || failure || delay) {
                    (true, false) => NotifyOn::Never,
                    (false, true) => NotifyOn::When {
                        success,
                        failure,
                        delay,
                    },
                    // NEVER mixed with events, or an empty list
                    _ => return Err(invalid()),
                };
            }
            (key, _) => {
                return Err(ParseArgsError::UnrecognizedParameter { key: key_of(key) });
            }
        }
        Ok(())
    }
}

impl TryFrom<UnparsedArgs> for RcptToArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let line = strip_crlf(&value)?;
        let mut tokens = tokens(line);

        #[allow(clippy::expect_used)]
        let mailbox = parse_path(
            tokens.next().ok_or(ParseArgsError::MalformedArguments)?,
            false,
        )?
        .expect("a non-null path always holds a mailbox");

        let mut result = Self {
            forward_path: match mailbox.parse() {
                Ok(forward_path) => forward_path,
                Err(_e) => return Err(ParseArgsError::BadMailbox { mailbox }),
            },
            original_forward_path: None,
            // RFC 3461 §4.1: without NOTIFY, notify on failure only
            notify_on: NotifyOn::When {
                success: false,
                failure: true,
                delay: false,
            },
        };

        for parameter in tokens {
            let (key, value) = key_value(parameter);
            result.apply(key, value)?;
        }

        Ok(result)
    }
}

impl TryFrom<UnparsedArgs> for BdatArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let line = strip_crlf(&value)?;
        let mut tokens = tokens(line);

        let size = tokens.next().ok_or(ParseArgsError::MalformedArguments)?;
        let size = std::str::from_utf8(size)?.parse().map_err(|_e| {
            ParseArgsError::InvalidParameterValue {
                key: "BDAT".to_owned(),
                value: value_of(Some(size)),
            }
        })?;

        let last = match tokens.next() {
            None => false,
            Some(last) if last.eq_ignore_ascii_case(b"LAST") => true,
            Some(_otherwise) => return Err(ParseArgsError::MalformedArguments),
        };
        if tokens.next().is_some() {
            return Err(ParseArgsError::MalformedArguments);
        }

        Ok(Self { size, last })
    }
}

impl XclientArgs {
    fn is_unavailable(value: &[u8]) -> bool {
        value.eq_ignore_ascii_case(b"[UNAVAILABLE]") || value.eq_ignore_ascii_case(b"[TEMPUNAVAIL]")
    }
}

impl TryFrom<UnparsedArgs> for XclientArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let line = strip_crlf(&value)?;

        let mut result = Self::default();
        let mut seen_any = false;

        for attribute in tokens(line) {
            let (key, value) = key_value(attribute);
            let value = value.ok_or(ParseArgsError::MalformedArguments)?;
            let invalid = || ParseArgsError::InvalidParameterValue {
                key: key_of(key),
                value: value_of(Some(value)),
            };
            seen_any = true;

            if Self::is_unavailable(value) {
                continue;
            }
            match key {
                key if key.eq_ignore_ascii_case(b"NAME") => {
                    result.name = Some(String::from_utf8(value.to_vec())?);
                }
                key if key.eq_ignore_ascii_case(b"ADDR") => {
                    let value = std::str::from_utf8(value)?;
                    let value = if value.len() >= 5 && value[..5].eq_ignore_ascii_case("IPV6:") {
                        &value[5..]
                    } else {
                        value
                    };
                    result.addr = Some(value.parse().map_err(|_e| invalid())?);
                }
                key if key.eq_ignore_ascii_case(b"PORT") => {
                    result.port =
                        Some(std::str::from_utf8(value)?.parse().map_err(|_e| invalid())?);
                }
                key if key.eq_ignore_ascii_case(b"PROTO") => {
                    result.proto = Some(String::from_utf8(value.to_vec())?);
                }
                key if key.eq_ignore_ascii_case(b"HELO") => {
                    result.helo = Some(String::from_utf8(value.to_vec())?);
                }
                key if key.eq_ignore_ascii_case(b"LOGIN") => {
                    result.login = Some(String::from_utf8(value.to_vec())?);
                }
                key => {
                    return Err(ParseArgsError::UnrecognizedParameter { key: key_of(key) });
                }
            }
        }

        if seen_any {
            Ok(result)
        } else {
            Err(ParseArgsError::MalformedArguments)
        }
    }
}
