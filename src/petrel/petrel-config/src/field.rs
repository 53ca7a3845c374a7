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

use crate::network::FieldServerNetworks;
use petrel_common::auth::Mechanism;

/// Root of the endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server-wide fields.
    #[serde(default)]
    pub server: FieldServer,
    /// Path the configuration was loaded from, if any.
    #[serde(skip)]
    pub path: Option<std::path::PathBuf>,
}

/// Server-wide configuration fields.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServer {
    /// Hostname announced in the banner and the EHLO greeting.
    #[serde(default = "FieldServer::hostname")]
    pub name: String,
    /// Product token appended to the banner.
    #[serde(default = "FieldServer::default_product")]
    pub product: String,
    /// Maximum concurrent client connections, `-1` for unlimited.
    #[serde(default = "FieldServer::default_client_count_max")]
    pub client_count_max: i64,
    /// Hard ceiling on message sizes in octets, also advertised with `SIZE`.
    #[serde(default = "FieldServer::default_message_size_limit")]
    pub message_size_limit: usize,
    /// Sockets to listen on, per connection kind.
    #[serde(default)]
    pub interfaces: FieldServerInterfaces,
    /// CIDR screening applied before the handler factory runs.
    #[serde(default)]
    pub networks: FieldServerNetworks,
    /// Peers trusted to rewrite their own identity with XCLIENT.
    #[serde(default)]
    pub xclient: FieldServerXclient,
    /// Protocol limits and timeouts.
    #[serde(default)]
    pub smtp: FieldServerSMTP,
    /// Extension toggles, each gating advertisement and parameter acceptance.
    #[serde(default)]
    pub esmtp: FieldServerESMTP,
    /// TLS material; STARTTLS and the submissions port need it.
    #[serde(default)]
    pub tls: Option<FieldServerTls>,
}

/// Sockets to listen on, by connection kind.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerInterfaces {
    /// Relay (MTA to MTA) listeners, port 25 by default.
    #[serde(default = "FieldServerInterfaces::default_addr")]
    pub addr: Vec<std::net::SocketAddr>,
    /// Submission listeners, port 587 by default.
    #[serde(default = "FieldServerInterfaces::default_addr_submission")]
    pub addr_submission: Vec<std::net::SocketAddr>,
    /// Implicit-TLS submission listeners, port 465 by default.
    #[serde(default = "FieldServerInterfaces::default_addr_submissions")]
    pub addr_submissions: Vec<std::net::SocketAddr>,
}

/// Peers trusted to use the XCLIENT command.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerXclient {
    /// Networks whose members may override connection attributes.
    #[serde(default)]
    pub trusted: Vec<ipnet::IpNet>,
}

/// Protocol limits, error thresholds and client timeouts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerSMTP {
    /// Maximum number of accepted recipients per transaction. Values below
    /// 100 are rejected at load time to preserve RFC 5321 compliance.
    #[serde(default = "FieldServerSMTP::default_rcpt_count_max")]
    pub rcpt_count_max: usize,
    /// Maximum number of transactions per session, `0` for unlimited.
    #[serde(default)]
    pub transaction_count_max: usize,
    /// Reject MAIL FROM until the client has authenticated.
    #[serde(default)]
    pub auth_required: bool,
    /// Error-rate escalation thresholds.
    #[serde(default)]
    pub error: FieldServerSMTPError,
    /// Client inactivity timeouts.
    #[serde(default)]
    pub timeout_client: FieldServerSMTPTimeoutClient,
    /// SASL settings; `None` disables the AUTH command entirely.
    #[serde(default)]
    pub auth: Option<FieldServerSMTPAuth>,
}

/// Escalation thresholds for clients accumulating 4xx/5xx replies.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerSMTPError {
    /// After this many errors every further error reply is delayed. `-1`
    /// disables the soft threshold.
    #[serde(default = "FieldServerSMTPError::default_soft_count")]
    pub soft_count: i64,
    /// After this many errors the connection is closed. `-1` disables the
    /// hard threshold.
    #[serde(default = "FieldServerSMTPError::default_hard_count")]
    pub hard_count: i64,
    /// Delay applied once the soft threshold is crossed.
    #[serde(
        default = "FieldServerSMTPError::default_delay",
        with = "humantime_serde"
    )]
    pub delay: std::time::Duration,
}

/// Client inactivity timeouts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerSMTPTimeoutClient {
    /// Waiting for the next command line; expiry closes with no reply.
    #[serde(
        default = "FieldServerSMTPTimeoutClient::default_command",
        with = "humantime_serde"
    )]
    pub command: std::time::Duration,
    /// Waiting for message octets during DATA/BDAT; expiry aborts the
    /// transaction and closes with no reply.
    #[serde(
        default = "FieldServerSMTPTimeoutClient::default_message",
        with = "humantime_serde"
    )]
    pub message: std::time::Duration,
}

/// SASL settings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerSMTPAuth {
    /// Mechanisms offered to clients, in advertisement order.
    #[serde(default = "FieldServerSMTPAuth::default_mechanisms")]
    pub mechanisms: Vec<Mechanism>,
    /// Failed or canceled exchanges tolerated before the connection is
    /// closed. `-1` disables the limit.
    #[serde(default = "FieldServerSMTPAuth::default_attempt_count_max")]
    pub attempt_count_max: i64,
    /// Advertise clear-text mechanisms on unsecured connections.
    #[serde(default)]
    pub enable_dangerous_mechanism_in_clair: bool,
}

/// Extension toggles. Disabling one removes it from the EHLO capability list
/// and makes the session refuse its parameters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerESMTP {
    /// RFC 2920 command pipelining.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub pipelining: bool,
    /// RFC 3030 BDAT transfers.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub chunking: bool,
    /// RFC 3030 binary bodies (requires chunking).
    #[serde(default = "FieldServerESMTP::enabled")]
    pub binarymime: bool,
    /// RFC 6531 internationalized addresses.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub smtputf8: bool,
    /// RFC 3461 delivery status notifications.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub dsn: bool,
    /// RFC 9422 limit advertisement.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub limits: bool,
    /// RFC 6710 transfer priorities.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub mt_priority: bool,
    /// RFC 8689 REQUIRETLS.
    #[serde(default = "FieldServerESMTP::enabled")]
    pub requiretls: bool,
    /// RFC 4865 deferred delivery, with the maximum hold interval.
    #[serde(default, with = "humantime_serde")]
    pub future_release: Option<std::time::Duration>,
    /// RFC 2852 delivery deadlines, with the minimum acceptable by-time.
    #[serde(default, with = "humantime_serde")]
    pub deliver_by: Option<std::time::Duration>,
}

/// TLS material and handshake policy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerTls {
    /// PEM certificate chain.
    pub certificate: std::path::PathBuf,
    /// PEM private key (PKCS#8 or RSA).
    pub private_key: std::path::PathBuf,
    /// Time allowed for the TLS handshake itself.
    #[serde(
        default = "FieldServerTls::default_handshake_timeout",
        with = "humantime_serde"
    )]
    pub handshake_timeout: std::time::Duration,
}
