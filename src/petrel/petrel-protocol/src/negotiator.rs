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

//! Computes the EHLO capability list from the endpoint configuration and the
//! current connection state. The order is deterministic: SIZE, 8BITMIME,
//! SMTPUTF8, PIPELINING, CHUNKING, BINARYMIME, ENHANCEDSTATUSCODES, DSN,
//! LIMITS, STARTTLS, AUTH, REQUIRETLS, MT-PRIORITY, FUTURERELEASE, DELIVERBY,
//! XCLIENT.

use petrel_common::{auth::Mechanism, ConnectionMetadata, Extension, Reply};
use petrel_config::Config;

fn auth_capability(config: &Config, metadata: &ConnectionMetadata) -> Option<String> {
    let auth = config.server.smtp.auth.as_ref()?;

    // RFC 4954 §4: with mandatory authentication, keep the offer off the
    // table until the channel can protect the credentials.
    if config.server.smtp.auth_required && !metadata.is_secured() {
        return None;
    }

    let mechanisms = auth
        .mechanisms
        .iter()
        .filter(|m| {
            metadata.is_secured()
                || auth.enable_dangerous_mechanism_in_clair
                || !m.must_be_under_tls()
        })
        .map(Mechanism::to_string)
        .collect::<Vec<_>>();

    if mechanisms.is_empty() {
        None
    } else {
        Some(format!("{} {}", Extension::Auth, mechanisms.join(" ")))
    }
}

pub(crate) fn capabilities(
    config: &Config,
    metadata: &ConnectionMetadata,
    tls_available: bool,
    xclient_allowed: bool,
) -> Vec<String> {
    let esmtp = &config.server.esmtp;
    let smtp = &config.server.smtp;

    let limits = {
        let mut limits = format!("{} RCPTMAX={}", Extension::Limits, smtp.rcpt_count_max);
        if smtp.transaction_count_max != 0 {
            limits.push_str(&format!(" MAILMAX={}", smtp.transaction_count_max));
        }
        limits
    };

    [
        Some(format!(
            "{} {}",
            Extension::Size,
            config.server.message_size_limit
        )),
        Some(Extension::EightBitMime.to_string()),
        esmtp.smtputf8.then(|| Extension::SmtpUtf8.to_string()),
        esmtp.pipelining.then(|| Extension::Pipelining.to_string()),
        esmtp.chunking.then(|| Extension::Chunking.to_string()),
        (esmtp.chunking && esmtp.binarymime).then(|| Extension::BinaryMime.to_string()),
        Some(Extension::EnhancedStatusCodes.to_string()),
        esmtp.dsn.then(|| Extension::Dsn.to_string()),
        esmtp.limits.then_some(limits),
        (tls_available && !metadata.is_secured()).then(|| Extension::StartTls.to_string()),
        auth_capability(config, metadata),
        (esmtp.requiretls && metadata.is_secured()).then(|| Extension::RequireTls.to_string()),
        esmtp.mt_priority.then(|| Extension::MtPriority.to_string()),
        esmtp.future_release.map(|max| {
            let latest = time::OffsetDateTime::now_utc() + max;
            format!(
                "{} {} {}",
                Extension::FutureRelease,
                max.as_secs(),
                latest
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_else(|_e| latest.to_string()),
            )
        }),
        esmtp
            .deliver_by
            .map(|min| format!("{} {}", Extension::DeliverBy, min.as_secs())),
        xclient_allowed.then(|| format!("{} NAME ADDR PORT PROTO HELO LOGIN", Extension::Xclient)),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// The complete EHLO reply: greeting line plus capability lines.
pub(crate) fn ehlo_reply(
    config: &Config,
    metadata: &ConnectionMetadata,
    tls_available: bool,
    xclient_allowed: bool,
) -> Reply {
    let client = metadata
        .client_name
        .as_ref()
        .map_or_else(String::new, |name| format!(" Hello {name}"));

    let capabilities = capabilities(config, metadata, tls_available, xclient_allowed);
    let last = capabilities.len() - 1;

    let raw = std::iter::once(format!("250-{}{client}\r\n", config.server.name))
        .chain(capabilities.into_iter().enumerate().map(|(i, capability)| {
            let sep = if i == last { ' ' } else { '-' };
            format!("250{sep}{capability}\r\n")
        }))
        .collect::<String>();
    #[allow(clippy::expect_used)]
    let reply = raw.parse::<Reply>().expect("EHLO reply must be valid");
    reply
}
