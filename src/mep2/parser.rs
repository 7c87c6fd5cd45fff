// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Streaming PDU parser
//!
//! One instance per session. Lines arrive exactly as framed off the wire,
//! CR/LF included, because the checksum must see the same bytes the sender
//! hashed.

use crate::mep2::checksum::Checksum;
use crate::mep2::error::Mep2Error;
use crate::mep2::proto::{Pdu, PduKind};
use crate::mep2::strip_pdu_crlf;
use crate::util;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Parsing,
    Complete,
}

#[derive(Debug, Default)]
pub struct PduParser {
    state: State,
    kind: Option<PduKind>,
    pdu: Option<Pdu>,
    checksum: Checksum,
    /// Content error held back until the end line proves the PDU arrived
    /// intact. A checksum mismatch outranks it.
    deferred: Option<Mep2Error>,
}

/// Structural checks shared by start and end lines. The shortest possible
/// valid PDU line is `/ENV\r`.
fn validate_pdu_line(line: &[u8]) -> Result<(), Mep2Error> {
    if line.len() < 5 {
        return Err(Mep2Error::syntax("PDU invalid: too short"));
    }

    if !line.starts_with(b"/") {
        return Err(Mep2Error::syntax("PDU invalid: doesn't start with a '/'"));
    }

    if line.iter().filter(|&&c| c == b'*').count() > 1 {
        return Err(Mep2Error::syntax("Stray '*' in PDU"));
    }

    if line.iter().filter(|&&c| c == b'/').count() > 1 {
        return Err(Mep2Error::syntax("Stray '/' in PDU"));
    }

    Ok(())
}

impl PduParser {
    pub fn parse_line(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        match self.state {
            State::Idle => self.parse_first_line(line),
            State::Parsing => self.parse_information_line(line),
            State::Complete => Err(Mep2Error::syntax("Unexpected data after Pdu")),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    pub fn current_kind(&self) -> Option<PduKind> {
        self.kind
    }

    /// Hand over the completed PDU and return to idle. `None` until
    /// `is_complete`.
    pub fn extract_pdu(&mut self) -> Option<Pdu> {
        if self.state != State::Complete {
            return None;
        }

        let pdu = self.pdu.take();
        self.reset();
        pdu
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.kind = None;
        self.pdu = None;
        self.checksum = Checksum::default();
        self.deferred = None;
    }

    /// First line of a PDU, in one of two forms:
    ///
    /// ```text
    /// /<pdu type> [<options>]*XXXX\r\n   single-line PDUs
    /// /<pdu type> [<options>]\r\n        multi-line PDUs
    /// ```
    fn parse_first_line(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        validate_pdu_line(line)?;
        let line_strip = strip_pdu_crlf(line)?;

        let (kind, after_name) = PduKind::lookup(&line_strip[1..])
            .ok_or_else(|| Mep2Error::syntax("Unknown PDU type"))?;

        let mut pdu = Pdu::new(kind)?;
        self.kind = Some(kind);

        // Eat optional whitespace between the pdu type and any options
        let mut options = util::lstrip(after_name);

        if kind.is_single_line() {
            self.validate_checksum(line_strip)?;

            // Done with the checksum
            if let Some(star) = options.iter().position(|&c| c == b'*') {
                options = &options[..star];
            }
        } else {
            // Multi-line PDUs must not have a '*' at all on the first line
            if line.contains(&b'*') {
                return Err(Mep2Error::syntax("Unexpected checksum for multi-line PDU"));
            }

            // Trailing whitespace and the line terminator are part of the
            // checksum for a multi-line PDU
            self.checksum.add_line(line);
        }

        pdu.parse_options(util::rstrip(options))?;
        self.pdu = Some(pdu);

        self.state = if kind.is_single_line() { State::Complete } else { State::Parsing };

        Ok(())
    }

    fn parse_information_line(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        if line.is_empty() {
            return Ok(());
        }

        if line[0] == b'/' {
            self.parse_end_line(line)?;

            // Content errors surface only now, for a structurally intact PDU
            if let Some(error) = self.deferred.take() {
                return Err(error);
            }

            // Let the PDU do a semantic check, if necessary
            if let Some(pdu) = self.pdu.as_mut() {
                pdu.finalize()?;
            }

            return Ok(());
        }

        self.checksum.add_line(line);

        // Once the content is known bad there is no point parsing further
        // lines; the checksum still has to cover them
        if self.deferred.is_none() {
            if let Some(pdu) = self.pdu.as_mut() {
                if let Err(error) = pdu.parse_line(line) {
                    self.deferred = Some(error);
                }
            }
        }

        Ok(())
    }

    /// The end line: `/end <pdu type>*<checksum>\r`
    fn parse_end_line(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        validate_pdu_line(line)?;
        let line_strip = strip_pdu_crlf(line)?;

        let (kind, after_name) = PduKind::lookup(&line_strip[1..])
            .ok_or_else(|| Mep2Error::syntax("Unknown PDU type"))?;

        if kind != PduKind::End {
            return Err(Mep2Error::syntax("Unexpected PDU, expected end"));
        }

        self.validate_checksum(line_strip)?;

        // Done with the checksum; what remains must name the open PDU
        let mut name = after_name;
        if let Some(star) = name.iter().position(|&c| c == b'*') {
            name = &name[..star];
        }
        let name = util::lstrip(name);

        let expected = match self.pdu.as_ref() {
            Some(pdu) => pdu.kind(),
            None => return Err(Mep2Error::syntax("No PDU in progress")),
        };

        let trailing = match PduKind::lookup(name) {
            Some((end_kind, trailing)) if end_kind == expected => trailing,
            _ => {
                return Err(Mep2Error::Syntax(format!(
                    "Unexpected PDU, expected end {}",
                    expected.name(),
                )));
            }
        };

        // There should be no more data left except optional whitespace
        let trailing = util::lstrip(trailing);
        if !trailing.is_empty() {
            return Err(Mep2Error::Syntax(format!(
                "Unexpected data after end type: '{}'",
                String::from_utf8_lossy(trailing),
            )));
        }

        self.state = State::Complete;

        Ok(())
    }

    /// Fold the `.....*` portion of the line into the running checksum and
    /// compare against the sender's 4 hex digits (or the ZZZZ skip sentinel).
    fn validate_checksum(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        let star = match line.iter().position(|&c| c == b'*') {
            Some(star) => star,
            None => return Err(Mep2Error::syntax("PDU line does not have a *")),
        };

        // The * must appear here, or there's no space for a checksum
        if star != line.len() - 5 {
            return Err(Mep2Error::syntax("Checksum too short"));
        }

        self.checksum.add_line(&line[..star + 1]);

        let sender = &line[star + 1..];

        // The ZZZZ hash asks the server to skip verification; it is meant
        // for manual testing
        if sender.eq_ignore_ascii_case(b"zzzz") {
            return Ok(());
        }

        let sender = Checksum::parse(sender)
            .ok_or_else(|| Mep2Error::syntax("Checksum has invalid characters"))?;

        if sender != self.checksum {
            return Err(Mep2Error::Checksum(format!(
                "Wanted: {:04X}, actual: {:04X}",
                sender.value(),
                self.checksum.value(),
            )));
        }

        Ok(())
    }
}
