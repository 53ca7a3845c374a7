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

use crate::field::{
    Config, FieldServer, FieldServerESMTP, FieldServerInterfaces, FieldServerSMTP,
    FieldServerSMTPAuth, FieldServerSMTPError, FieldServerSMTPTimeoutClient, FieldServerTls,
    FieldServerXclient,
};
use petrel_common::auth::Mechanism;

impl Default for Config {
    fn default() -> Self {
        Self {
            server: FieldServer::default(),
            path: None,
        }
    }
}

impl Default for FieldServer {
    fn default() -> Self {
        Self {
            name: Self::hostname(),
            product: Self::default_product(),
            client_count_max: Self::default_client_count_max(),
            message_size_limit: Self::default_message_size_limit(),
            interfaces: FieldServerInterfaces::default(),
            networks: crate::network::FieldServerNetworks::default(),
            xclient: FieldServerXclient::default(),
            smtp: FieldServerSMTP::default(),
            esmtp: FieldServerESMTP::default(),
            tls: None,
        }
    }
}

impl FieldServer {
    pub(crate) fn hostname() -> String {
        hostname::get().map_or_else(
            |_error| "localhost".to_owned(),
            |name| name.to_string_lossy().into_owned(),
        )
    }

    pub(crate) fn default_product() -> String {
        "petrel".to_owned()
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        16
    }

    /// Default of RFC 1870: 10KB per header + 25MB for the body.
    pub(crate) const fn default_message_size_limit() -> usize {
        35_882_577
    }
}

impl Default for FieldServerInterfaces {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            addr_submission: Self::default_addr_submission(),
            addr_submissions: Self::default_addr_submissions(),
        }
    }
}

impl FieldServerInterfaces {
    #[allow(clippy::expect_used)]
    fn any(port: u16) -> Vec<std::net::SocketAddr> {
        vec![format!("0.0.0.0:{port}")
            .parse()
            .expect("valid socket address")]
    }

    pub(crate) fn default_addr() -> Vec<std::net::SocketAddr> {
        Self::any(25)
    }

    pub(crate) fn default_addr_submission() -> Vec<std::net::SocketAddr> {
        Self::any(587)
    }

    pub(crate) fn default_addr_submissions() -> Vec<std::net::SocketAddr> {
        Self::any(465)
    }
}

impl Default for FieldServerSMTP {
    fn default() -> Self {
        Self {
            rcpt_count_max: Self::default_rcpt_count_max(),
            transaction_count_max: 0,
            auth_required: false,
            error: FieldServerSMTPError::default(),
            timeout_client: FieldServerSMTPTimeoutClient::default(),
            auth: None,
        }
    }
}

impl FieldServerSMTP {
    /// The floor mandated by RFC 5321 section 4.5.3.1.8.
    pub(crate) const fn default_rcpt_count_max() -> usize {
        100
    }
}

impl Default for FieldServerSMTPError {
    fn default() -> Self {
        Self {
            soft_count: Self::default_soft_count(),
            hard_count: Self::default_hard_count(),
            delay: Self::default_delay(),
        }
    }
}

impl FieldServerSMTPError {
    pub(crate) const fn default_soft_count() -> i64 {
        10
    }

    pub(crate) const fn default_hard_count() -> i64 {
        20
    }

    pub(crate) const fn default_delay() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }
}

impl Default for FieldServerSMTPTimeoutClient {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            message: Self::default_message(),
        }
    }
}

impl FieldServerSMTPTimeoutClient {
    pub(crate) const fn default_command() -> std::time::Duration {
        std::time::Duration::from_secs(5 * 60)
    }

    pub(crate) const fn default_message() -> std::time::Duration {
        std::time::Duration::from_secs(10 * 60)
    }
}

impl Default for FieldServerSMTPAuth {
    fn default() -> Self {
        Self {
            mechanisms: Self::default_mechanisms(),
            attempt_count_max: Self::default_attempt_count_max(),
            enable_dangerous_mechanism_in_clair: false,
        }
    }
}

impl FieldServerSMTPAuth {
    pub(crate) fn default_mechanisms() -> Vec<Mechanism> {
        vec![Mechanism::Plain, Mechanism::Login]
    }

    pub(crate) const fn default_attempt_count_max() -> i64 {
        -1
    }
}

impl Default for FieldServerESMTP {
    fn default() -> Self {
        Self {
            pipelining: true,
            chunking: true,
            binarymime: true,
            smtputf8: true,
            dsn: true,
            limits: true,
            mt_priority: true,
            requiretls: true,
            future_release: None,
            deliver_by: None,
        }
    }
}

impl FieldServerESMTP {
    pub(crate) const fn enabled() -> bool {
        true
    }
}

impl FieldServerTls {
    pub(crate) const fn default_handshake_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.message_size_limit, 35_882_577);
        assert_eq!(config.server.smtp.rcpt_count_max, 100);
        assert_eq!(config.server.smtp.transaction_count_max, 0);
        assert!(!config.server.smtp.auth_required);
        assert!(config.server.esmtp.pipelining);
        assert_eq!(config.server.interfaces.addr[0].port(), 25);
        assert_eq!(config.server.interfaces.addr_submission[0].port(), 587);
        assert_eq!(config.server.interfaces.addr_submissions[0].port(), 465);
    }

    #[test]
    fn empty_document_is_the_default_config() {
        let parsed = serde_json::from_str::<Config>("{}").unwrap();
        assert_eq!(parsed, Config::default());
    }
}
