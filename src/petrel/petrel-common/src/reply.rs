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

/// Enhanced mail system status code, see RFC 3463.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)]
pub struct EnhancedCode {
    /// Success (2), persistent transient failure (4) or permanent failure (5).
    pub class: u8,
    /// Subject sub-code.
    pub subject: u16,
    /// Detail sub-code.
    pub detail: u16,
}

impl std::fmt::Display for EnhancedCode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

impl std::str::FromStr for EnhancedCode {
    type Err = ReplyParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split('.');
        let (class, subject, detail) = match (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) {
            (Some(class), Some(subject), Some(detail), None) => (class, subject, detail),
            _ => return Err(ReplyParseError::InvalidEnhancedCode),
        };
        Ok(Self {
            class: class
                .parse()
                .map_err(|_e| ReplyParseError::InvalidEnhancedCode)?,
            subject: subject
                .parse()
                .map_err(|_e| ReplyParseError::InvalidEnhancedCode)?,
            detail: detail
                .parse()
                .map_err(|_e| ReplyParseError::InvalidEnhancedCode)?,
        })
    }
}

/// Numeric reply code, optionally paired with an enhanced status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyCode {
    value: u16,
    enhanced: Option<EnhancedCode>,
}

impl ReplyCode {
    /// Create a code without an enhanced status part.
    #[must_use]
    #[inline]
    pub const fn new(value: u16) -> Self {
        Self {
            value,
            enhanced: None,
        }
    }

    /// The 3-digit value sent on the wire.
    #[must_use]
    #[inline]
    pub const fn value(&self) -> u16 {
        self.value
    }

    /// The enhanced status code, if the reply carries one.
    #[must_use]
    #[inline]
    pub const fn enhanced(&self) -> Option<EnhancedCode> {
        self.enhanced
    }

    /// Is this a 4xx or 5xx reply?
    #[must_use]
    #[inline]
    pub const fn is_error(&self) -> bool {
        self.value >= 400
    }

    /// Does the enhanced class digit agree with the reply class digit?
    /// Replies without an enhanced code are trivially consistent.
    #[must_use]
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.enhanced
            .map_or(true, |e| u16::from(e.class) == self.value / 100)
    }
}

/// A complete SMTP reply: code, enhanced status and one or more text lines.
///
/// The usual way to build one is the parse idiom:
///
/// ```
/// let reply = "250 2.1.0 Sender OK\r\n".parse::<petrel_common::Reply>().unwrap();
/// assert_eq!(reply.code().value(), 250);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Reply {
    code: ReplyCode,
    lines: Vec<String>,
}

/// Error while parsing a wire reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ReplyParseError {
    /// The input contains no reply line.
    #[error("empty reply")]
    Empty,
    /// A line is shorter than `NNN `.
    #[error("reply line is too short")]
    LineTooShort,
    /// The 3 first characters are not a valid reply code.
    #[error("invalid reply code")]
    InvalidCode,
    /// The 4th character is neither a space nor a dash.
    #[error("invalid line separator")]
    InvalidSeparator,
    /// The lines of a multi-line reply do not carry the same code.
    #[error("code mismatch in multi-line reply")]
    CodeMismatch,
    /// Malformed `class.subject.detail` triple.
    #[error("invalid enhanced status code")]
    InvalidEnhancedCode,
}

impl Reply {
    /// Create a single-line reply.
    #[must_use]
    #[inline]
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// The reply code.
    #[must_use]
    #[inline]
    pub const fn code(&self) -> &ReplyCode {
        &self.code
    }

    /// The text lines, without code prefixes.
    #[must_use]
    #[inline]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Fold `self` and `other` into one reply carrying `other`'s code.
    /// Used when a reply must be escalated (e.g. too many errors).
    #[must_use]
    #[inline]
    pub fn extended(&self, other: &Self) -> Self {
        Self {
            code: other.code,
            lines: self
                .lines
                .iter()
                .chain(other.lines.iter())
                .cloned()
                .collect(),
        }
    }
}

impl std::fmt::Display for Reply {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            match self.code.enhanced {
                Some(enhanced) if line.is_empty() => {
                    write!(f, "{}{sep}{enhanced}\r\n", self.code.value)?;
                }
                Some(enhanced) => {
                    write!(f, "{}{sep}{enhanced} {line}\r\n", self.code.value)?;
                }
                None => write!(f, "{}{sep}{line}\r\n", self.code.value)?,
            }
        }
        Ok(())
    }
}

fn parse_line(line: &str) -> Result<(u16, char, &str), ReplyParseError> {
    if line.len() < 4 {
        return Err(ReplyParseError::LineTooShort);
    }
    let (code, rest) = line.split_at(3);
    let code = code
        .parse::<u16>()
        .map_err(|_e| ReplyParseError::InvalidCode)?;
    if !(200..=599).contains(&code) {
        return Err(ReplyParseError::InvalidCode);
    }
    let sep = rest.chars().next().ok_or(ReplyParseError::LineTooShort)?;
    if sep != ' ' && sep != '-' {
        return Err(ReplyParseError::InvalidSeparator);
    }
    Ok((code, sep, &line[4..]))
}

impl std::str::FromStr for Reply {
    type Err = ReplyParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut value = None;
        let mut enhanced = None;
        let mut lines = vec![];

        for raw in s.split("\r\n").filter(|l| !l.is_empty()) {
            let (code, _sep, text) = parse_line(raw)?;
            match value {
                None => value = Some(code),
                Some(value) if value == code => (),
                Some(_mismatch) => return Err(ReplyParseError::CodeMismatch),
            }

            let text = match text.split_once(' ') {
                Some((first, rest)) if first.parse::<EnhancedCode>().is_ok() => {
                    if lines.is_empty() {
                        enhanced = first.parse::<EnhancedCode>().ok();
                    }
                    rest
                }
                _ if lines.is_empty() && text.parse::<EnhancedCode>().is_ok() => {
                    enhanced = text.parse::<EnhancedCode>().ok();
                    ""
                }
                _ => text,
            };
            lines.push(text.to_owned());
        }

        Ok(Self {
            code: ReplyCode {
                value: value.ok_or(ReplyParseError::Empty)?,
                enhanced,
            },
            lines,
        })
    }
}

impl ReplyCode {
    /// Attach an enhanced status code.
    #[must_use]
    #[inline]
    pub const fn with_enhanced(value: u16, enhanced: EnhancedCode) -> Self {
        Self {
            value,
            enhanced: Some(enhanced),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_line() {
        let reply = "250 2.1.0 Sender OK\r\n".parse::<Reply>().unwrap();
        assert_eq!(reply.code().value(), 250);
        assert_eq!(
            reply.code().enhanced(),
            Some(EnhancedCode {
                class: 2,
                subject: 1,
                detail: 0
            })
        );
        assert_eq!(reply.lines(), ["Sender OK"]);
        assert_eq!(reply.to_string(), "250 2.1.0 Sender OK\r\n");
    }

    #[test]
    fn no_enhanced_code() {
        let reply = "354 Enter mail, end with \".\" on a line by itself\r\n"
            .parse::<Reply>()
            .unwrap();
        assert_eq!(reply.code().enhanced(), None);
        assert_eq!(
            reply.to_string(),
            "354 Enter mail, end with \".\" on a line by itself\r\n"
        );
    }

    #[test]
    fn banner_hostname_is_not_an_enhanced_code() {
        let reply = "220 mail.example.com ESMTP petrel\r\n"
            .parse::<Reply>()
            .unwrap();
        assert_eq!(reply.code().enhanced(), None);
        assert_eq!(reply.lines(), ["mail.example.com ESMTP petrel"]);
    }

    #[test]
    fn multi_line() {
        let input = "250-mail.example.com Hello client.test\r\n\
                     250-SIZE 35882577\r\n\
                     250-8BITMIME\r\n\
                     250 ENHANCEDSTATUSCODES\r\n";
        let reply = input.parse::<Reply>().unwrap();
        assert_eq!(reply.lines().len(), 4);
        assert_eq!(reply.to_string(), input);
    }

    #[test]
    fn code_mismatch() {
        assert_eq!(
            "250-Ok\r\n550 No\r\n".parse::<Reply>().unwrap_err(),
            ReplyParseError::CodeMismatch
        );
    }

    #[test]
    fn garbage() {
        assert_eq!("".parse::<Reply>().unwrap_err(), ReplyParseError::Empty);
        assert_eq!(
            "25\r\n".parse::<Reply>().unwrap_err(),
            ReplyParseError::LineTooShort
        );
        assert_eq!(
            "abc d\r\n".parse::<Reply>().unwrap_err(),
            ReplyParseError::InvalidCode
        );
        assert_eq!(
            "100 too low\r\n".parse::<Reply>().unwrap_err(),
            ReplyParseError::InvalidCode
        );
    }

    #[test]
    fn error_class_consistency() {
        for raw in [
            "500 5.5.2 Command unrecognized\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "452 4.5.3 Too many recipients\r\n",
            "421 4.3.2 Service not available\r\n",
            "552 5.3.4 Message too big for system\r\n",
        ] {
            let reply = raw.parse::<Reply>().unwrap();
            assert!(reply.code().is_error());
            assert!(reply.code().is_consistent(), "{raw}");
        }
    }

    #[test]
    fn extended_takes_the_other_code() {
        let base = "502 5.5.1 Command not implemented\r\n"
            .parse::<Reply>()
            .unwrap();
        let escalation = "451 4.7.0 Too many errors from the client\r\n"
            .parse::<Reply>()
            .unwrap();
        let folded = base.extended(&escalation);
        assert_eq!(folded.code().value(), 451);
        assert_eq!(folded.lines().len(), 2);
    }
}
