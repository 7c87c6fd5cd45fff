// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! The MEP2 protocol: PDU types, stream parser, codec and session

use crate::util;

pub mod checksum;
pub mod error;
pub mod parser;
pub mod proto;
pub mod server;
pub mod text;

pub use self::error::Mep2Error;
pub use self::parser::PduParser;
pub use self::proto::{Pdu, PduKind};

/// Cut a PDU line at its CR terminator and drop trailing whitespace.
///
/// Every structural PDU line must carry a CR; the optional LF and anything
/// else after the CR never reaches the grammar.
pub(crate) fn strip_pdu_crlf(line: &[u8]) -> Result<&[u8], Mep2Error> {
    match memchr::memchr(b'\r', line) {
        Some(cr) => Ok(util::rstrip(&line[..cr])),
        None => Err(Mep2Error::syntax("No carriage return in PDU")),
    }
}
