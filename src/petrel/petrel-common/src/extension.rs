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

/// ESMTP extension keywords advertised in the EHLO response, in the order the
/// negotiator emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
#[non_exhaustive]
pub enum Extension {
    /// Message size declaration, RFC 1870.
    #[strum(serialize = "SIZE")]
    Size,
    /// 8-bit MIME transport, RFC 6152.
    #[strum(serialize = "8BITMIME")]
    EightBitMime,
    /// Internationalized email, RFC 6531.
    #[strum(serialize = "SMTPUTF8")]
    SmtpUtf8,
    /// Command pipelining, RFC 2920.
    #[strum(serialize = "PIPELINING")]
    Pipelining,
    /// BDAT chunked transfer, RFC 3030.
    #[strum(serialize = "CHUNKING")]
    Chunking,
    /// Binary MIME bodies, RFC 3030.
    #[strum(serialize = "BINARYMIME")]
    BinaryMime,
    /// Enhanced status codes, RFC 2034.
    #[strum(serialize = "ENHANCEDSTATUSCODES")]
    EnhancedStatusCodes,
    /// Delivery status notifications, RFC 3461.
    #[strum(serialize = "DSN")]
    Dsn,
    /// Server limit advertisement, RFC 9422.
    #[strum(serialize = "LIMITS")]
    Limits,
    /// Transport layer security upgrade, RFC 3207.
    #[strum(serialize = "STARTTLS")]
    StartTls,
    /// SASL authentication, RFC 4954.
    #[strum(serialize = "AUTH")]
    Auth,
    /// Require TLS for onward relay, RFC 8689.
    #[strum(serialize = "REQUIRETLS")]
    RequireTls,
    /// Message transfer priorities, RFC 6710.
    #[strum(serialize = "MT-PRIORITY")]
    MtPriority,
    /// Deferred delivery, RFC 4865.
    #[strum(serialize = "FUTURERELEASE")]
    FutureRelease,
    /// Delivery deadlines, RFC 2852.
    #[strum(serialize = "DELIVERBY")]
    DeliverBy,
    /// Attribute forwarding from a trusted frontend (Postfix convention).
    #[strum(serialize = "XCLIENT")]
    Xclient,
}

#[cfg(test)]
mod tests {
    use super::Extension;

    #[test]
    fn wire_names() {
        assert_eq!(Extension::EightBitMime.to_string(), "8BITMIME");
        assert_eq!(Extension::MtPriority.to_string(), "MT-PRIORITY");
        assert_eq!(
            "ENHANCEDSTATUSCODES".parse::<Extension>().unwrap(),
            Extension::EnhancedStatusCodes
        );
    }
}
