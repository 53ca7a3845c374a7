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

use crate::Domain;

/// An envelope mailbox: the payload of the reverse-path and forward-paths.
///
/// Construction runs the Mailbox grammar of RFC 5321 §4.1.2: the local part
/// is a Dot-string or a Quoted-string (kept as written, quotes and escapes
/// included), the domain a name the resolver will accept. Unicode is allowed
/// in the local part (RFC 6531 extends atext); whether it is legal for a
/// given transaction is the session's call, not this type's.
///
/// Equality follows the RFC: domains compare case-insensitively, local parts
/// do not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Mailbox {
    local_part: String,
    domain: Domain,
}

/// Syntax sugar to build a [`Mailbox`] from a literal.
///
/// # Panics
///
/// if the argument is not a valid mailbox
#[macro_export]
macro_rules! mailbox {
    ($e:expr) => {
        $e.parse::<$crate::Mailbox>().unwrap()
    };
}

/// Why a string is not a [`Mailbox`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MailboxParseError {
    /// No `@` separates the local part from the domain.
    #[error("no '@' between local part and domain")]
    MissingAtSign,
    /// The local part has no characters.
    #[error("empty local part")]
    EmptyLocalPart,
    /// A Dot-string atom has no characters (leading, trailing or doubled dot).
    #[error("empty atom in the local part")]
    EmptyAtom,
    /// The character is neither atext nor a legal quoted character.
    #[error("character {0:?} is not allowed here")]
    ForbiddenCharacter(char),
    /// A Quoted-string local part never closes.
    #[error("unterminated quoted local part")]
    UnterminatedQuote,
    /// A backslash escape covers a character outside %d32-126.
    #[error("invalid escape in quoted local part")]
    BadEscape,
    /// The local part runs past the 64 octet ceiling of RFC 5321 §4.5.3.1.1.
    #[error("local part longer than 64 octets")]
    LocalPartTooLong,
    /// The domain is missing or not a usable name.
    #[error("'{domain}' is not a valid domain")]
    InvalidDomain {
        /// What came after the `@`.
        domain: String,
    },
}

/// atext of RFC 5321 §4.1.2, plus any non-ASCII character (RFC 6531 §3.3).
const fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
        || !c.is_ascii()
}

/// qtextSMTP: anything printable except the quote and the backslash, plus
/// non-ASCII under the UTF-8 extension.
const fn is_quoted_char(c: char) -> bool {
    matches!(c, ' ' | '!' | '#'..='[' | ']'..='~') || !c.is_ascii()
}

/// Length in bytes of the Dot-string starting the input, stopping at `@`.
fn measure_dot_string(input: &str) -> Result<usize, MailboxParseError> {
    let mut len = 0;
    let mut atom_open = false;
    for c in input.chars() {
        match c {
            '@' => break,
            '.' if atom_open => {
                atom_open = false;
                len += 1;
            }
            '.' => return Err(MailboxParseError::EmptyAtom),
            c if is_atom_char(c) => {
                atom_open = true;
                len += c.len_utf8();
            }
            c => return Err(MailboxParseError::ForbiddenCharacter(c)),
        }
    }
    if len == 0 {
        Err(MailboxParseError::EmptyLocalPart)
    } else if atom_open {
        Ok(len)
    } else {
        // the string ended on a dot
        Err(MailboxParseError::EmptyAtom)
    }
}

/// Length in bytes of the Quoted-string starting the input, both quotes
/// included.
fn measure_quoted_string(input: &str) -> Result<usize, MailboxParseError> {
    let mut escaped = false;
    for (i, c) in input.char_indices().skip(1) {
        if escaped {
            // quoted-pairSMTP covers %d32-126 only
            if c.is_ascii_graphic() || c == ' ' {
                escaped = false;
            } else {
                return Err(MailboxParseError::BadEscape);
            }
        } else {
            match c {
                '\\' => escaped = true,
                '"' => return Ok(i + 1),
                c if is_quoted_char(c) => (),
                c => return Err(MailboxParseError::ForbiddenCharacter(c)),
            }
        }
    }
    Err(MailboxParseError::UnterminatedQuote)
}

impl std::str::FromStr for Mailbox {
    type Err = MailboxParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let local_len = if s.starts_with('"') {
            measure_quoted_string(s)?
        } else {
            measure_dot_string(s)?
        };
        if local_len > 64 {
            return Err(MailboxParseError::LocalPartTooLong);
        }

        let domain = match s[local_len..].strip_prefix('@') {
            Some(domain) if !domain.is_empty() => domain,
            _ => return Err(MailboxParseError::MissingAtSign),
        };
        let invalid = || MailboxParseError::InvalidDomain {
            domain: domain.to_owned(),
        };
        let domain = addr::parse_domain_name(domain).map_err(|_e| invalid())?;
        let domain = Domain::from_utf8(domain.as_str()).map_err(|_e| invalid())?;

        Ok(Self {
            local_part: s[..local_len].to_owned(),
            domain,
        })
    }
}

impl std::fmt::Display for Mailbox {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl Mailbox {
    /// the part before the `@` sign, exactly as the client wrote it.
    #[must_use]
    #[inline]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// the domain the mailbox belongs to.
    #[must_use]
    #[inline]
    pub fn domain(&self) -> Domain {
        self.domain.clone()
    }

    /// Can this mailbox travel without SMTPUTF8? The domain is always ASCII
    /// once parsed, so only the local part decides.
    #[must_use]
    #[inline]
    pub fn is_ascii(&self) -> bool {
        self.local_part.is_ascii()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dot_string_local_part() {
        let parsed = "jean.du.pont@example.com".parse::<Mailbox>().unwrap();
        assert_eq!(parsed.local_part(), "jean.du.pont");
        assert_eq!(parsed.domain().to_string(), "example.com");
        assert_eq!(parsed.to_string(), "jean.du.pont@example.com");
    }

    #[test]
    fn quoted_local_part_keeps_its_quotes() {
        let parsed = r#""john doe"@example.com"#.parse::<Mailbox>().unwrap();
        assert_eq!(parsed.local_part(), r#""john doe""#);
        assert_eq!(parsed.to_string(), r#""john doe"@example.com"#);

        let escaped = r#""tricky\"\\quote"@example.com"#.parse::<Mailbox>().unwrap();
        assert_eq!(escaped.local_part(), r#""tricky\"\\quote""#);
    }

    #[test]
    fn domains_compare_case_insensitively() {
        assert_eq!(mailbox!("a@EXAMPLE.com"), mailbox!("a@example.COM"));
        // local parts do not
        assert_ne!(mailbox!("Alice@example.com"), mailbox!("alice@example.com"));
    }

    #[test]
    fn dots_must_separate_atoms() {
        assert_eq!(
            ".a@example.com".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::EmptyAtom
        );
        assert_eq!(
            "a.@example.com".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::EmptyAtom
        );
        assert_eq!(
            "a..b@example.com".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::EmptyAtom
        );
    }

    #[test]
    fn missing_pieces() {
        assert_eq!(
            "no-at-sign".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::MissingAtSign
        );
        assert_eq!(
            "trailing@".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::MissingAtSign
        );
        assert_eq!(
            "@nolocal.com".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::EmptyLocalPart
        );
        assert_eq!(
            r#""open@example.com"#.parse::<Mailbox>().unwrap_err(),
            MailboxParseError::UnterminatedQuote
        );
    }

    #[test]
    fn forbidden_characters() {
        assert!(matches!(
            "a b@example.com".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::ForbiddenCharacter(' ')
        ));
        assert!(matches!(
            "a(b)@example.com".parse::<Mailbox>().unwrap_err(),
            MailboxParseError::ForbiddenCharacter('(')
        ));
    }

    #[test]
    fn local_part_ceiling() {
        let long = format!("{}@example.com", "x".repeat(65));
        assert_eq!(
            long.parse::<Mailbox>().unwrap_err(),
            MailboxParseError::LocalPartTooLong
        );
        assert!(format!("{}@example.com", "x".repeat(64))
            .parse::<Mailbox>()
            .is_ok());
    }

    #[test]
    fn utf8_local_parts_are_accepted_here() {
        let parsed = "andré@example.com".parse::<Mailbox>().unwrap();
        assert_eq!(parsed.local_part(), "andré");
        assert!(!parsed.is_ascii());
        assert!(mailbox!("plain@example.com").is_ascii());
    }

    #[test]
    fn serde_uses_the_wire_form() {
        let parsed: Mailbox = serde_json::from_str(r#""hello@domain.com""#).unwrap();
        assert_eq!(parsed, mailbox!("hello@domain.com"));
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#""hello@domain.com""#
        );
    }
}
