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

/// How far into the protocol a session has advanced. The engine checks every
/// command against the current stage before anything else runs; the ordering
/// of the variants mirrors the order in which the commands become legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Stage {
    /// Banner sent, no greeting seen yet.
    Connect,
    /// Greeted with HELO or EHLO; MAIL, AUTH and STARTTLS become legal.
    Helo,
    /// A transaction is open; RCPT becomes legal.
    MailFrom,
    /// At least one recipient is on the envelope; DATA and BDAT become legal.
    RcptTo,
}

#[cfg(test)]
mod tests {
    use super::Stage;

    #[test]
    fn ordering_follows_the_protocol() {
        assert!(Stage::Connect < Stage::Helo);
        assert!(Stage::Helo < Stage::MailFrom);
        assert!(Stage::MailFrom < Stage::RcptTo);
    }
}
