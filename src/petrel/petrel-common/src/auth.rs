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

/// SASL mechanisms the server can advertise, see RFC 4954.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
#[non_exhaustive]
pub enum Mechanism {
    /// Single round-trip, clear credentials, RFC 4616.
    #[strum(serialize = "PLAIN")]
    Plain,
    /// Two challenge/response round-trips, clear credentials.
    #[strum(serialize = "LOGIN")]
    Login,
    /// Anonymous access with an optional trace token, RFC 4505.
    #[strum(serialize = "ANONYMOUS")]
    Anonymous,
}

impl Mechanism {
    /// Does the exchange carry credentials in clear text? Such mechanisms are
    /// only advertised once the connection is under TLS, unless the endpoint
    /// explicitly opts out.
    #[must_use]
    #[inline]
    pub const fn must_be_under_tls(self) -> bool {
        match self {
            Self::Plain | Self::Login => true,
            Self::Anonymous => false,
        }
    }
}

/// Identity material produced by a completed SASL exchange, handed to the
/// realm's authenticator for the final verdict.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum Credentials {
    /// An authentication identity with its secret.
    Verify {
        /// Authentication identity (`authcid`).
        authid: String,
        /// Secret proving the identity.
        authpass: String,
    },
    /// Anonymous access, carrying the client-supplied trace token.
    AnonymousToken {
        /// Freeform trace information, usually an email address.
        token: String,
    },
}

impl Credentials {
    /// The identity recorded in the connection metadata on success.
    #[must_use]
    #[inline]
    pub fn identity(&self) -> &str {
        match self {
            Self::Verify { authid, .. } => authid,
            Self::AnonymousToken { token } => token,
        }
    }
}

/// Error while extracting [`Credentials`] from a SASL session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The mechanism did not provide a property the conversion needs.
    #[error("a required property is missing")]
    MissingField,
    /// A property is not valid UTF-8.
    #[error("{0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// The mechanism is not one the server hands out credentials for.
    #[error("mechanism '{0}' is not supported")]
    UnsupportedMechanism(String),
}

impl
    TryFrom<(
        &rsasl::callback::SessionData,
        &rsasl::callback::Context<'_>,
    )> for Credentials
{
    type Error = Error;

    #[inline]
    fn try_from(
        (session_data, context): (
            &rsasl::callback::SessionData,
            &rsasl::callback::Context<'_>,
        ),
    ) -> Result<Self, Self::Error> {
        match session_data.mechanism().to_string().as_str() {
            "PLAIN" | "LOGIN" => Ok(Self::Verify {
                authid: context
                    .get_ref::<rsasl::property::AuthId>()
                    .ok_or(Error::MissingField)?
                    .to_owned(),
                authpass: std::str::from_utf8(
                    context
                        .get_ref::<rsasl::property::Password>()
                        .ok_or(Error::MissingField)?,
                )?
                .to_owned(),
            }),
            "ANONYMOUS" => Ok(Self::AnonymousToken {
                token: context
                    .get_ref::<rsasl::mechanisms::anonymous::AnonymousToken>()
                    .ok_or(Error::MissingField)?
                    .to_owned(),
            }),
            otherwise => Err(Error::UnsupportedMechanism(otherwise.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Mechanism;

    #[test]
    fn clear_text_mechanisms_require_tls() {
        assert!(Mechanism::Plain.must_be_under_tls());
        assert!(Mechanism::Login.must_be_under_tls());
        assert!(!Mechanism::Anonymous.must_be_under_tls());
    }

    #[test]
    fn wire_names() {
        assert_eq!(Mechanism::Plain.to_string(), "PLAIN");
        assert_eq!("LOGIN".parse::<Mechanism>().unwrap(), Mechanism::Login);
        assert!("SCRAM-SHA-1".parse::<Mechanism>().is_err());
    }
}
