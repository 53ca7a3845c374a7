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

//! xtext codec of RFC 3461 §4, used by the `ENVID`, `ORCPT` and `AUTH`
//! parameters. Any byte can be carried; bytes outside the printable US-ASCII
//! range, `+` and `=` travel as `+HH` with two uppercase hexadecimal digits.

use crate::ParseArgsError;

const fn is_xchar(byte: u8) -> bool {
    matches!(byte, 33..=42 | 44..=60 | 62..=126)
}

/// Encode a byte string as xtext.
#[must_use]
#[inline]
pub fn encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input {
        if is_xchar(byte) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("+{byte:02X}"));
        }
    }
    out
}

/// Decode an xtext byte string.
///
/// # Errors
///
/// * a `+` is not followed by two uppercase hexadecimal digits
/// * the input contains a byte that is not an xchar
#[inline]
pub fn decode(input: &[u8]) -> Result<Vec<u8>, ParseArgsError> {
    const fn hex_digit(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied();
    while let Some(byte) = bytes.next() {
        match byte {
            b'+' => {
                let (high, low) = match (bytes.next().and_then(hex_digit), bytes.next().and_then(hex_digit)) {
                    (Some(high), Some(low)) => (high, low),
                    _ => return Err(ParseArgsError::InvalidXtext),
                };
                out.push((high << 4) | low);
            }
            byte if is_xchar(byte) => out.push(byte),
            _ => return Err(ParseArgsError::InvalidXtext),
        }
    }
    Ok(out)
}
