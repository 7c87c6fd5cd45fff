// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! The MEP2 on-wire text encoding
//!
//! 7-bit text with `%HH` escapes, a `%CRLF` transparent line fold, and a
//! handful of in-band editing controls (kill-line, delete, tab fill) left over
//! from the protocol's terminal days.

use thiserror::Error;

use crate::util;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Stray / in data")]
    StraySlash,
    #[error("Invalid % code: too little space")]
    TruncatedEscape,
    #[error("Invalid % code: not a hex digit")]
    InvalidHex,
}

const TAB_WIDTH: usize = 4;

fn tab_fill(out: &mut String) {
    let fill = TAB_WIDTH - out.len() % TAB_WIDTH;
    for _ in 0..fill {
        out.push(' ');
    }
}

fn decode_percent(escape: &[u8]) -> Result<u8, DecodeError> {
    let high = util::hex_value(escape[1]).ok_or(DecodeError::InvalidHex)?;
    let low = util::hex_value(escape[2]).ok_or(DecodeError::InvalidHex)?;
    Ok(high << 4 | low)
}

/// Decode one line's worth of wire bytes into logical text.
///
/// Decoding happens in two phases: raw bytes are interpreted first, and a
/// byte produced by a `%HH` escape is interpreted again. The two phases are
/// similar but not the same: escaped bytes bypass the editing controls, which
/// is what lets `%25`, `%2F` and friends survive into the output.
pub fn decode(input: &[u8]) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        // The top bit must never survive into decoded data
        let c = input[i] & 0x7F;

        // It is always illegal for a / to appear unescaped
        if c == b'/' {
            return Err(DecodeError::StraySlash);
        }

        if c == b'%' {
            if i + 2 >= input.len() {
                return Err(DecodeError::TruncatedEscape);
            }

            // A %CRLF fold is not part of the text at all
            if input[i + 1] == b'\r' && input[i + 2] == b'\n' {
                i += 3;
                continue;
            }

            let decoded = decode_percent(&input[i..i + 3])? & 0x7F;
            i += 3;

            match decoded {
                // An escaped CR survives only when an escaped LF follows
                0x0D => {
                    if i + 2 < input.len() && input[i] == b'%' {
                        if let Ok(lf) = decode_percent(&input[i..i + 3]) {
                            if lf & 0x7F == 0x0A {
                                out.push_str("\r\n");
                                i += 3;
                            }
                        }
                    }
                }
                0x0A | 0x0B | 0x0C => {}
                _ => out.push(decoded as char),
            }

            continue;
        }

        i += 1;

        match c {
            0x09 => tab_fill(&mut out),

            // A bare CR survives only as part of a CR LF pair
            0x0D => {
                if i < input.len() && input[i] == 0x0A {
                    out.push_str("\r\n");
                    i += 1;
                }
            }

            // These values just get lost
            0x0A | 0x0B | 0x0C | 0x0F | 0x11 | 0x12 | 0x13 => {}

            // Kill-line and cancel discard everything before them
            0x15 | 0x18 => out.clear(),

            // Delete
            0x7F => {
                out.pop();
            }

            _ => out.push(c as char),
        }
    }

    Ok(out)
}

/// Maximum run of emitted bytes before the encoder folds the line.
const FOLD_LIMIT: usize = 200;

fn must_escape(byte: u8) -> bool {
    matches!(byte, b'%' | b'/' | 0x00 | 0x0F | 0x11 | 0x12 | 0x13 | 0x15 | 0x18) || byte >= 0x80
}

/// Encode logical bytes into the wire form `decode` accepts.
pub fn encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut since_cr = 0;

    for &byte in input {
        if must_escape(byte) {
            out.push_str(&format!("%{byte:02X}"));
            since_cr += 3;
        } else {
            out.push(byte as char);
            since_cr = if byte == b'\r' { 0 } else { since_cr + 1 };
        }

        if since_cr >= FOLD_LIMIT {
            out.push_str("%\r\n");
            since_cr = 0;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_valid() {
        let cases: &[(&[u8], &str)] = &[
            (b"Simple ASCII string", "Simple ASCII string"),
            (b"Simple ASCII string with newline\r\n", "Simple ASCII string with newline\r\n"),
            (b"Percent sign %25", "Percent sign %"),
            (b"MCI Address: Gandalf%2F111-1111", "MCI Address: Gandalf/111-1111"),
            (b"Lost characters\x0b\x0c\x11\x12\x13", "Lost characters"),
            (b"Delete characterX\x7f", "Delete character"),
            (b"Tab fill\x09tab", "Tab fill    tab"),
            (b"Tab fill2\x09tabby\x09tabby\x09tab", "Tab fill2   tabby   tabby   tab"),
            (b"This will be entirely deleted\x15Not this", "Not this"),
            (b"Single linefeed will be deleted\n", "Single linefeed will be deleted"),
            (b"Single carriage return will be deleted\r", "Single carriage return will be deleted"),
            (b"Strip top bits: \xc1\xd3\xc3\xc9\xc9", "Strip top bits: ASCII"),
            (b"Transparent%\r\n crlf are removed", "Transparent crlf are removed"),
            (b"Escaped pair%0D%0Asurvives", "Escaped pair\r\nsurvives"),
            (b"Escaped lone CR%0D is dropped", "Escaped lone CR is dropped"),
        ];

        for &(input, expected) in cases {
            assert_eq!(decode(input).as_deref(), Ok(expected));
        }
    }

    #[test]
    fn decode_invalid() {
        assert_eq!(decode(b"Invalid % code"), Err(DecodeError::InvalidHex));
        assert_eq!(decode(b"Invalid percent code %a"), Err(DecodeError::TruncatedEscape));
        assert_eq!(decode(b"Stray / in data"), Err(DecodeError::StraySlash));
        assert_eq!(decode(b"Masked stray \xaf too"), Err(DecodeError::StraySlash));
    }

    #[test]
    fn encode_escapes() {
        assert_eq!(encode(b"100% legit"), "100%25 legit");
        assert_eq!(encode(b"Gandalf/111-1111"), "Gandalf%2F111-1111");
        assert_eq!(encode(b"\x00\x0f\x11\x12\x13\x15\x18"), "%00%0F%11%12%13%15%18");
        assert_eq!(encode(b"\xc1\xd3"), "%C1%D3");
        assert_eq!(encode(b"plain text\r\n"), "plain text\r\n");
    }

    #[test]
    fn encode_folds_long_lines() {
        let input = vec![b'a'; 500];
        let encoded = encode(&input);

        assert!(encoded.contains("%\r\n"));
        for run in encoded.split("\r\n") {
            assert!(run.len() <= FOLD_LIMIT + 1, "run of {} bytes", run.len());
        }

        assert_eq!(decode(encoded.as_bytes()).unwrap(), String::from_utf8(input).unwrap());
    }

    #[test]
    fn round_trip() {
        // Bytes the decoder strips on the raw path (tab, delete, bare
        // CR/LF/VT/FF) cannot round-trip; everything the encoder escapes must.
        let cases: &[&[u8]] = &[
            b"Simple ASCII string",
            b"100% of / characters\x15survive\x18encoding",
            b"line one\r\nline two\r\n",
            b"top bits \xc1\xd3\xc3 get escaped",
        ];

        for &case in cases {
            let logical: Vec<u8> = case.iter().map(|&b| b & 0x7F).collect();
            assert_eq!(decode(encode(case).as_bytes()).unwrap().as_bytes(), &logical[..]);
        }
    }
}
