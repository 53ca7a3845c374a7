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

/// Network screening lists. A peer is admitted when it is in none of the
/// `deny` networks and, if `allow` is non-empty, in at least one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldServerNetworks {
    /// Networks allowed to connect; empty means everyone.
    #[serde(default)]
    pub allow: Vec<ipnet::IpNet>,
    /// Networks turned away before the handler factory runs.
    #[serde(default)]
    pub deny: Vec<ipnet::IpNet>,
}

/// Prefix sets compiled from [`FieldServerNetworks`] for per-connection
/// lookups.
#[derive(Debug, Clone)]
pub struct NetworkScreen {
    allow4: iprange::IpRange<ipnet::Ipv4Net>,
    allow6: iprange::IpRange<ipnet::Ipv6Net>,
    deny4: iprange::IpRange<ipnet::Ipv4Net>,
    deny6: iprange::IpRange<ipnet::Ipv6Net>,
    allow_all: bool,
}

fn split(
    nets: &[ipnet::IpNet],
) -> (
    iprange::IpRange<ipnet::Ipv4Net>,
    iprange::IpRange<ipnet::Ipv6Net>,
) {
    let mut v4 = iprange::IpRange::new();
    let mut v6 = iprange::IpRange::new();
    for net in nets {
        match net {
            ipnet::IpNet::V4(net) => {
                v4.add(*net);
            }
            ipnet::IpNet::V6(net) => {
                v6.add(*net);
            }
        }
    }
    v4.simplify();
    v6.simplify();
    (v4, v6)
}

impl FieldServerNetworks {
    /// Compile the lists into a screen usable on the accept path.
    #[must_use]
    #[inline]
    pub fn to_screen(&self) -> NetworkScreen {
        let (allow4, allow6) = split(&self.allow);
        let (deny4, deny6) = split(&self.deny);
        NetworkScreen {
            allow4,
            allow6,
            deny4,
            deny6,
            allow_all: self.allow.is_empty(),
        }
    }
}

impl NetworkScreen {
    /// Is a peer with this address admitted?
    #[must_use]
    #[inline]
    pub fn permits(&self, addr: std::net::IpAddr) -> bool {
        match addr {
            std::net::IpAddr::V4(ip) => {
                !self.deny4.contains(&ip) && (self.allow_all || self.allow4.contains(&ip))
            }
            std::net::IpAddr::V6(ip) => {
                !self.deny6.contains(&ip) && (self.allow_all || self.allow6.contains(&ip))
            }
        }
    }
}
