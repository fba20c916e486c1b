// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ticket code generator.
//!
//! Codes are six base-36 digits (`0-9A-Z`) rendered as two groups of three,
//! `"000 000"` through `"ZZZ ZZZ"`. Numbering is global and sequential: every
//! batch continues from the last code issued anywhere in the system.
//!
//! # Example
//!
//! ```
//! use boleteria_rs::generate_next;
//!
//! assert_eq!(generate_next(None).unwrap(), "000 000");
//! assert_eq!(generate_next(Some("000 009")).unwrap(), "000 00A");
//! assert_eq!(generate_next(Some("000 0ZZ")).unwrap(), "000 100");
//! ```

use crate::error::CodeError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const DIGITS: usize = 6;
const SEPARATOR_AT: usize = 3;

/// A fixed-width base-36 ticket code.
///
/// Digits are stored as ASCII, so the derived ordering matches numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketCode([u8; DIGITS]);

impl TicketCode {
    pub const FIRST: TicketCode = TicketCode(*b"000000");
    pub const LAST: TicketCode = TicketCode(*b"ZZZZZZ");

    /// Adds one, rightmost digit first, carrying into the digit on the left.
    ///
    /// # Errors
    ///
    /// [`CodeError::CapacityExhausted`] when called on [`TicketCode::LAST`].
    pub fn next(&self) -> Result<TicketCode, CodeError> {
        let mut digits = self.0;
        for digit in digits.iter_mut().rev() {
            match *digit {
                b'Z' => *digit = b'0',
                b'9' => {
                    *digit = b'A';
                    return Ok(TicketCode(digits));
                }
                _ => {
                    *digit += 1;
                    return Ok(TicketCode(digits));
                }
            }
        }
        Err(CodeError::CapacityExhausted)
    }

    /// Returns the code that follows `previous`, or [`TicketCode::FIRST`] when
    /// nothing has been issued yet.
    pub fn successor(previous: Option<&TicketCode>) -> Result<TicketCode, CodeError> {
        match previous {
            Some(code) => code.next(),
            None => Ok(TicketCode::FIRST),
        }
    }
}

impl FromStr for TicketCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != DIGITS + 1 || chars[SEPARATOR_AT] != ' ' {
            return Err(CodeError::Format);
        }

        let mut digits = [0u8; DIGITS];
        let content = chars
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != SEPARATOR_AT)
            .map(|(_, c)| *c);
        for (slot, c) in digits.iter_mut().zip(content) {
            if !(c.is_ascii_digit() || c.is_ascii_uppercase()) {
                return Err(CodeError::InvalidCharacter(c));
            }
            *slot = c as u8;
        }
        Ok(TicketCode(digits))
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, digit) in self.0.iter().enumerate() {
            if i == SEPARATOR_AT {
                f.write_str(" ")?;
            }
            write!(f, "{}", *digit as char)?;
        }
        Ok(())
    }
}

impl Serialize for TicketCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TicketCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// String-level successor function.
///
/// `None` or an empty string yields `"000 000"`; anything else must be a
/// well-formed code and yields the next one.
///
/// # Errors
///
/// - [`CodeError::Format`] - wrong length or separator position.
/// - [`CodeError::InvalidCharacter`] - a digit outside `[0-9A-Z]`.
/// - [`CodeError::CapacityExhausted`] - `previous` was `"ZZZ ZZZ"`.
pub fn generate_next(previous: Option<&str>) -> Result<String, CodeError> {
    let next = match previous {
        None | Some("") => TicketCode::FIRST,
        Some(code) => code.parse::<TicketCode>()?.next()?,
    };
    Ok(next.to_string())
}
