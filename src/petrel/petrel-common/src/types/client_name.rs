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

/// A domain name.
pub type Domain = trust_dns_resolver::Name;

/// The identity a client claims in its HELO/EHLO argument: a domain, or an
/// address literal when it has none.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum ClientName {
    /// A fully qualified domain name.
    Domain(Domain),
    /// An IPv4 address literal, `[192.0.2.1]` on the wire.
    Ip4(std::net::Ipv4Addr),
    /// An IPv6 address literal, `[IPv6:2001:db8::1]` on the wire.
    Ip6(std::net::Ipv6Addr),
}

impl std::fmt::Display for ClientName {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::pattern_type_mismatch)]
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "[{ip}]"),
            Self::Ip6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            ClientName::Domain(Domain::from_utf8("client.test").unwrap()).to_string(),
            "client.test"
        );
        assert_eq!(
            ClientName::Ip4("192.0.2.1".parse().unwrap()).to_string(),
            "[192.0.2.1]"
        );
        assert_eq!(
            ClientName::Ip6("2001:db8::1".parse().unwrap()).to_string(),
            "[IPv6:2001:db8::1]"
        );
    }
}
