//! MEP2 PDU types and their option grammars

use crate::envelope::Envelope;
use crate::mep2::error::Mep2Error;
use crate::mep2::text;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Busy,
    Comment,
    Create,
    End,
    Env,
    Hdr,
    Init,
    Reply,
    Reset,
    Scan,
    Send,
    Term,
    Text,
    Turn,
    Verify,
}

const KINDS: [PduKind; 15] = [
    PduKind::Busy,
    PduKind::Comment,
    PduKind::Create,
    PduKind::End,
    PduKind::Env,
    PduKind::Hdr,
    PduKind::Init,
    PduKind::Reply,
    PduKind::Reset,
    PduKind::Scan,
    PduKind::Send,
    PduKind::Term,
    PduKind::Text,
    PduKind::Turn,
    PduKind::Verify,
];

impl PduKind {
    pub const fn name(self) -> &'static str {
        match self {
            PduKind::Busy => "BUSY",
            PduKind::Comment => "COMMENT",
            PduKind::Create => "CREATE",
            PduKind::End => "END",
            PduKind::Env => "ENV",
            PduKind::Hdr => "HDR",
            PduKind::Init => "INIT",
            PduKind::Reply => "REPLY",
            PduKind::Reset => "RESET",
            PduKind::Scan => "SCAN",
            PduKind::Send => "SEND",
            PduKind::Term => "TERM",
            PduKind::Text => "TEXT",
            PduKind::Turn => "TURN",
            PduKind::Verify => "VERIFY",
        }
    }

    /// A single-line PDU is sealed by its own trailing checksum instead of an
    /// `/END` line.
    pub const fn is_single_line(self) -> bool {
        matches!(
            self,
            PduKind::Create
                | PduKind::Send
                | PduKind::Scan
                | PduKind::Busy
                | PduKind::Turn
                | PduKind::Term,
        )
    }

    pub const fn has_options(self) -> bool {
        matches!(
            self,
            PduKind::Verify | PduKind::Text | PduKind::Scan | PduKind::Turn | PduKind::Reply,
        )
    }

    /// Name lookup: consume the maximal run of ASCII letters and match it
    /// case-insensitively. Returns the kind and whatever followed the name.
    pub fn lookup(text: &[u8]) -> Option<(PduKind, &[u8])> {
        let length = text.iter().take_while(|c| c.is_ascii_alphabetic()).count();
        let (name, rest) = text.split_at(length);

        KINDS
            .iter()
            .find(|kind| name.eq_ignore_ascii_case(kind.name().as_bytes()))
            .map(|&kind| (kind, rest))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Outbox,
    #[default]
    Inbox,
    Desk,
    Trash,
}

/// Mailbox query carried by Scan and Turn.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Query {
    pub folder: Folder,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub priority: bool,
}

impl Query {
    /// Comma-separated `KEYWORD=(VALUE)` tokens, plus bare `PRIORITY`.
    /// Repeated keywords last-writer-win.
    pub fn parse_options(&mut self, mut options: &[u8]) -> Result<(), Mep2Error> {
        while !options.is_empty() {
            let option = match options.iter().position(|&c| c == b',') {
                Some(delim) => {
                    let option = &options[..delim];
                    options = &options[delim + 1..];
                    option
                }
                None => {
                    let option = options;
                    options = b"";
                    option
                }
            };

            let (keyword, value) = match option.iter().position(|&c| c == b'=') {
                Some(equals) => {
                    let value = &option[equals + 1..];

                    // The minimal value is '(x)'; zero length is only valid
                    // when there was no '=' at all
                    if value.len() <= 3 {
                        return Err(Mep2Error::syntax("Value length invalid"));
                    }

                    (&option[..equals], value)
                }
                None => (option, &b""[..]),
            };

            if value.is_empty() {
                if keyword == b"PRIORITY" {
                    self.priority = true;
                    continue;
                }
                return Err(Mep2Error::syntax("Missing value"));
            }

            // Values must be enclosed in a '()'
            if !(value.starts_with(b"(") && value.ends_with(b")")) {
                return Err(Mep2Error::syntax("Value must be enclosed in parenthesis"));
            }
            let value = &value[1..value.len() - 1];

            if value.iter().any(|&c| c == b'(' || c == b')') {
                return Err(Mep2Error::syntax("Value cannot contain parenthesis"));
            }

            match keyword {
                b"FOLDER" => {
                    self.folder = match value {
                        b"OUTBOX" => Folder::Outbox,
                        b"INBOX" => Folder::Inbox,
                        b"DESK" => Folder::Desk,
                        b"TRASH" => Folder::Trash,
                        _ => {
                            return Err(Mep2Error::malformed("Unknown folder type in folder query"));
                        }
                    };
                }
                b"SUBJECT" => {
                    let subject = text::decode(value)
                        .map_err(|_| Mep2Error::malformed("Invalid % code in subject query"))?;
                    if !util::is_printable(&subject) {
                        return Err(Mep2Error::malformed("Invalid characters in subject query"));
                    }
                    self.subject = Some(subject);
                }
                b"FROM" => {
                    let from = text::decode(value)
                        .map_err(|_| Mep2Error::malformed("Invalid % code in from query"))?;
                    if !util::is_printable(&from) {
                        return Err(Mep2Error::malformed("Invalid characters in from query"));
                    }
                    self.from = Some(from);
                }
                // Parsed but not acted on
                b"MAXSIZE" | b"MINSIZE" | b"BEFORE" | b"AFTER" => {}
                _ => return Err(Mep2Error::syntax("Unknown keyword")),
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    #[default]
    Ascii,
    Printable,
    Env,
    Binary,
    G3fax,
    Tlx,
    Voice,
    Tif0,
    Tif1,
    Ttx,
    Videotex,
    Encrypted,
    Sfd,
    Racal,
}

/// How the server treats the body, derived from the declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlingType {
    Ascii,
    Env,
    Binary,
}

impl ContentType {
    fn parse(token: &[u8]) -> Option<ContentType> {
        const TYPES: [(&[u8], ContentType); 14] = [
            (b"ascii", ContentType::Ascii),
            (b"printable", ContentType::Printable),
            (b"env", ContentType::Env),
            (b"binary", ContentType::Binary),
            (b"g3fax", ContentType::G3fax),
            (b"tlx", ContentType::Tlx),
            (b"voice", ContentType::Voice),
            (b"tif0", ContentType::Tif0),
            (b"tif1", ContentType::Tif1),
            (b"ttx", ContentType::Ttx),
            (b"videotex", ContentType::Videotex),
            (b"encrypted", ContentType::Encrypted),
            (b"sfd", ContentType::Sfd),
            (b"racal", ContentType::Racal),
        ];

        TYPES
            .iter()
            .find(|(name, _)| token.eq_ignore_ascii_case(name))
            .map(|&(_, content_type)| content_type)
    }

    pub const fn handling(self) -> HandlingType {
        match self {
            ContentType::Ascii | ContentType::Printable => HandlingType::Ascii,
            ContentType::Env => HandlingType::Env,
            _ => HandlingType::Binary,
        }
    }
}

/// Options of a Text PDU: a content type and an optional description.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextOptions {
    pub content_type: ContentType,
    pub description: Option<String>,
}

impl TextOptions {
    pub fn parse_options(&mut self, options: &[u8]) -> Result<(), Mep2Error> {
        // No options defaults to ascii
        if options.is_empty() {
            return Ok(());
        }

        let (token, description) = match options.iter().position(|&c| c == b':') {
            Some(colon) => (&options[..colon], Some(&options[colon + 1..])),
            None => (options, None),
        };

        self.content_type = ContentType::parse(util::strip(token))
            .ok_or_else(|| Mep2Error::malformed("Unknown text type"))?;

        if let Some(description) = description {
            let description = util::strip(description);
            if !description.is_empty() {
                let decoded = text::decode(description)
                    .map_err(|err| Mep2Error::MalformedData(err.to_string()))?;
                self.description = Some(decoded);
            }
        }

        Ok(())
    }
}

/// One parsed protocol data unit.
#[derive(Debug)]
pub enum Pdu {
    Busy,
    Create,
    Term,
    Send,
    Scan(Query),
    Turn(Query),
    Comment,
    Verify(Envelope),
    Env(Envelope),
    Text(TextOptions),
}

impl Pdu {
    /// Open a fresh PDU of the named kind. Kinds the client may not send
    /// (END and the server-to-client set) cannot open one.
    pub fn new(kind: PduKind) -> Result<Pdu, Mep2Error> {
        match kind {
            PduKind::Busy => Ok(Pdu::Busy),
            PduKind::Create => Ok(Pdu::Create),
            PduKind::Term => Ok(Pdu::Term),
            PduKind::Send => Ok(Pdu::Send),
            PduKind::Scan => Ok(Pdu::Scan(Query::default())),
            PduKind::Turn => Ok(Pdu::Turn(Query::default())),
            PduKind::Comment => Ok(Pdu::Comment),
            PduKind::Verify => Ok(Pdu::Verify(Envelope::new(true))),
            PduKind::Env => Ok(Pdu::Env(Envelope::new(false))),
            PduKind::Text => Ok(Pdu::Text(TextOptions::default())),
            PduKind::End | PduKind::Hdr | PduKind::Init | PduKind::Reply | PduKind::Reset => {
                Err(Mep2Error::syntax("Unhandled PDU type"))
            }
        }
    }

    pub fn kind(&self) -> PduKind {
        match self {
            Pdu::Busy => PduKind::Busy,
            Pdu::Create => PduKind::Create,
            Pdu::Term => PduKind::Term,
            Pdu::Send => PduKind::Send,
            Pdu::Scan(_) => PduKind::Scan,
            Pdu::Turn(_) => PduKind::Turn,
            Pdu::Comment => PduKind::Comment,
            Pdu::Verify(_) => PduKind::Verify,
            Pdu::Env(_) => PduKind::Env,
            Pdu::Text(_) => PduKind::Text,
        }
    }

    /// Route the stripped start-line options segment to the variant.
    pub fn parse_options(&mut self, options: &[u8]) -> Result<(), Mep2Error> {
        match self {
            Pdu::Scan(query) | Pdu::Turn(query) => query.parse_options(options),
            Pdu::Verify(envelope) | Pdu::Env(envelope) => envelope.parse_options(options),
            Pdu::Text(text_options) => text_options.parse_options(options),
            _ => {
                if options.is_empty() {
                    Ok(())
                } else {
                    Err(Mep2Error::syntax("Option for non-option PDU"))
                }
            }
        }
    }

    /// Route one raw information line (terminator included) to the variant.
    pub fn parse_line(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        match self {
            Pdu::Verify(envelope) | Pdu::Env(envelope) => envelope.parse_line(line),

            // The content is not kept, but it must still decode cleanly
            Pdu::Comment => match text::decode(line) {
                Ok(_) => Ok(()),
                Err(err) => Err(Mep2Error::MalformedData(err.to_string())),
            },

            // Body lines are streamed to storage by the session
            Pdu::Text(_) => Ok(()),

            _ => Err(Mep2Error::syntax("Parse line called on single-line PDU")),
        }
    }

    /// Semantic check run once the end line has validated.
    pub fn finalize(&mut self) -> Result<(), Mep2Error> {
        match self {
            Pdu::Verify(envelope) | Pdu::Env(envelope) => envelope.finalize(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        let expected = [
            (PduKind::Busy, "BUSY"),
            (PduKind::Comment, "COMMENT"),
            (PduKind::Create, "CREATE"),
            (PduKind::End, "END"),
            (PduKind::Env, "ENV"),
            (PduKind::Hdr, "HDR"),
            (PduKind::Init, "INIT"),
            (PduKind::Reply, "REPLY"),
            (PduKind::Reset, "RESET"),
            (PduKind::Scan, "SCAN"),
            (PduKind::Send, "SEND"),
            (PduKind::Term, "TERM"),
            (PduKind::Text, "TEXT"),
            (PduKind::Turn, "TURN"),
            (PduKind::Verify, "VERIFY"),
        ];

        for (kind, name) in expected {
            assert_eq!(kind.name(), name);
        }
    }

    #[test]
    fn lookup() {
        assert_eq!(PduKind::lookup(b"create*ZZZZ"), Some((PduKind::Create, &b"*ZZZZ"[..])));
        assert_eq!(PduKind::lookup(b"CrEaTe"), Some((PduKind::Create, &b""[..])));
        assert_eq!(PduKind::lookup(b"end verify"), Some((PduKind::End, &b" verify"[..])));
        assert_eq!(PduKind::lookup(b"creat"), None);
        assert_eq!(PduKind::lookup(b"createx"), None);
        assert_eq!(PduKind::lookup(b""), None);
        assert_eq!(PduKind::lookup(b"     "), None);
    }

    #[test]
    fn predicates() {
        for kind in [
            PduKind::Create,
            PduKind::Send,
            PduKind::Scan,
            PduKind::Busy,
            PduKind::Turn,
            PduKind::Term,
        ] {
            assert!(kind.is_single_line());
        }

        for kind in [PduKind::Comment, PduKind::Verify, PduKind::Env, PduKind::Text] {
            assert!(!kind.is_single_line());
        }

        assert!(PduKind::Scan.has_options());
        assert!(PduKind::Reply.has_options());
        assert!(!PduKind::Create.has_options());
    }

    #[test]
    fn content_type_handling() {
        assert_eq!(ContentType::Ascii.handling(), HandlingType::Ascii);
        assert_eq!(ContentType::Printable.handling(), HandlingType::Ascii);
        assert_eq!(ContentType::Env.handling(), HandlingType::Env);

        for content_type in [
            ContentType::Binary,
            ContentType::G3fax,
            ContentType::Tlx,
            ContentType::Voice,
            ContentType::Tif0,
            ContentType::Tif1,
            ContentType::Ttx,
            ContentType::Videotex,
            ContentType::Encrypted,
            ContentType::Sfd,
            ContentType::Racal,
        ] {
            assert_eq!(content_type.handling(), HandlingType::Binary);
        }
    }

    #[test]
    fn request_pdus_only() {
        for kind in [PduKind::End, PduKind::Hdr, PduKind::Init, PduKind::Reply, PduKind::Reset] {
            assert_eq!(Pdu::new(kind).unwrap_err().code(), 301);
        }
    }
}
