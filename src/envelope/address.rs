// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Recipient addresses and the MCI-ID forms

use std::fmt;

use crate::mep2::error::Mep2Error;
use crate::util;

/// MCI IDs come in four shapes: 123-4567, 123-456-7890, 1234567, 1234567890.
pub fn is_mciid(line: &str) -> bool {
    fn digits(b: &[u8]) -> bool {
        b.iter().all(u8::is_ascii_digit)
    }

    let b = line.as_bytes();
    match b.len() {
        7 | 10 => digits(b),
        8 => digits(&b[..3]) && b[3] == b'-' && digits(&b[4..]),
        12 => digits(&b[..3]) && b[3] == b'-' && digits(&b[4..7]) && b[7] == b'-' && digits(&b[8..]),
        _ => false,
    }
}

/// Recognise an MCI ID, with or without the explicit `MCI ID:` prefix.
///
/// A prefix followed by something that is not an MCI ID is an error rather
/// than a plain name.
pub fn parse_mciid(line: &str) -> Result<Option<&str>, Mep2Error> {
    let (line, explicit) = match line.strip_prefix("MCI ID:") {
        Some(rest) => (util::lstrip_str(rest), true),
        None => (line, false),
    };

    if is_mciid(line) {
        return Ok(Some(line));
    }

    if explicit {
        return Err(Mep2Error::malformed("Invalid MCI ID after MCI ID:"));
    }

    Ok(None)
}

/// Reduce a valid MCI ID to its canonical dashed form.
pub fn canonicalize_mciid(id: &str) -> String {
    debug_assert!(is_mciid(id));

    // Already in the form 123-4567. A 12-char ID cannot exit early here: an
    // ID in the form 000-123-4567 is not canonical yet.
    if id.len() == 8 {
        return id.to_owned();
    }

    // Strip off any leading 000 or 000-
    let id = if id.len() >= 10 && id.starts_with("000") {
        if id.as_bytes()[3] == b'-' { &id[4..] } else { &id[3..] }
    } else {
        id
    };

    match id.len() {
        // Either 123-4567 or 123-456-7890 at this point
        8 | 12 => id.to_owned(),
        7 => format!("{}-{}", &id[..3], &id[3..]),
        _ => format!("{}-{}-{}", &id[..3], &id[3..6], &id[6..]),
    }
}

/// One envelope recipient, accumulated from a `To:`/`Cc:`/`From:` line and
/// its continuation lines.
///
/// Empty strings mean the field was never supplied; the first-line grammar
/// guarantees at least one of `name` and `id` ends up set.
#[derive(Debug, Default, Clone)]
pub struct RawAddress {
    pub name: String,
    pub id: String,
    pub organization: String,
    pub location: String,
    pub unresolved_org_loc_1: String,
    pub unresolved_org_loc_2: String,

    pub ems: String,
    pub mbx: Vec<String>,

    pub has_options: bool,
    pub board: bool,
    pub instant: bool,
    pub list: bool,
    pub owner: bool,
    pub onite: bool,
    pub print: bool,
    pub receipt: bool,
    pub no_receipt: bool,
}

/// Aggregate limit on MBX routing data for one recipient.
const MBX_LIMIT: usize = 305;

impl RawAddress {
    /// Parse the `To:`/`Cc:`/`From:` line itself: name and/or ID, up to two
    /// organisation-or-location fields, and an optional trailing options
    /// clause.
    pub fn parse_first_line(&mut self, line: &str) -> Result<(), Mep2Error> {
        let num_slashes = line.matches('/').count();
        if num_slashes > 2 {
            return Err(Mep2Error::malformed("Too many fields"));
        }

        let line = util::rstrip_str(line);
        if line.is_empty() {
            return Err(Mep2Error::malformed("Empty address"));
        }

        let line = self.parse_recipient_options(line)?;

        // No slashes, must just be a name or id
        if num_slashes == 0 {
            match parse_mciid(line)? {
                Some(id) => self.id = canonicalize_mciid(id),
                None => {
                    if line.is_empty() {
                        return Err(Mep2Error::malformed("Name cannot be empty"));
                    }
                    self.name = line.to_owned();
                }
            }

            return Ok(());
        }

        let (first_part, rest) = line.split_once('/').unwrap_or((line, ""));
        let first_part = util::rstrip_str(first_part);
        if first_part.is_empty() {
            return Err(Mep2Error::malformed("Name/ID field invalid"));
        }

        match parse_mciid(first_part)? {
            // Handle "MCI ID / Org or Loc"
            Some(id) => self.id = canonicalize_mciid(id),
            // Handle "Name / MCI ID" or "Name / Org or Loc"
            None => self.name = first_part.to_owned(),
        }

        if rest.is_empty() {
            return Err(Mep2Error::malformed("First Organization/Location field invalid"));
        }

        if num_slashes == 1 {
            let rest = util::strip_str(rest);

            // Deal with "User name / MCI ID"
            if self.id.is_empty() {
                if let Some(id) = parse_mciid(rest)? {
                    self.id = canonicalize_mciid(id);
                    return Ok(());
                }
            }

            return self.parse_org_or_loc(rest);
        }

        // Deal with "Name or ID / Org or Loc / Org or Loc"
        let (second_part, third_part) = rest.split_once('/').unwrap_or((rest, ""));
        let second_part = util::strip_str(second_part);
        let third_part = util::strip_str(third_part);

        if is_mciid(second_part) || is_mciid(third_part) {
            return Err(Mep2Error::malformed("Organization/Location cannot be an MCI ID"));
        }

        self.parse_org_or_loc(second_part)?;
        self.parse_org_or_loc(third_part)
    }

    /// Strip and apply a trailing `(OPT, OPT, ...)` clause, returning the
    /// line without it.
    fn parse_recipient_options<'a>(&mut self, line: &'a str) -> Result<&'a str, Mep2Error> {
        // The line is rstripped, so the last character is a ')' if this has
        // options
        if !line.ends_with(')') {
            return Ok(line);
        }

        if line.matches('(').count() != 1 || line.matches(')').count() != 1 {
            return Err(Mep2Error::malformed("Malformed options, too many parenthesis"));
        }

        let open = line.find('(').unwrap();
        let mut options = util::strip_str(&line[open + 1..line.len() - 1]);
        let line = util::rstrip_str(&line[..open]);

        while !options.is_empty() {
            let option = match options.find(',') {
                Some(delim) if delim == options.len() - 1 => {
                    return Err(Mep2Error::malformed("Malformed options, trailing comma"));
                }
                Some(delim) => {
                    let option = &options[..delim];
                    options = &options[delim + 1..];
                    option
                }
                None => {
                    let option = options;
                    options = "";
                    option
                }
            };

            if option.is_empty() {
                return Err(Mep2Error::malformed("Malformed options, empty option"));
            }

            match util::strip_str(option) {
                "BOARD" => self.board = true,
                "INSTANT" => self.instant = true,
                "LIST" => self.list = true,
                "OWNER" => self.owner = true,
                "ONITE" => self.onite = true,
                "PRINT" => self.print = true,
                "RECEIPT" => self.receipt = true,
                "NO RECEIPT" => self.no_receipt = true,
                other => {
                    return Err(Mep2Error::malformed(
                        format!("Malformed options, unknown option '{other}'"),
                    ));
                }
            }

            self.has_options = true;
        }

        Ok(line)
    }

    fn parse_org_or_loc(&mut self, field: &str) -> Result<(), Mep2Error> {
        if is_mciid(field) {
            return Err(Mep2Error::malformed("Location/Organization cannot be an MCI ID"));
        }

        if let Some(rest) = field.strip_prefix("Loc:") {
            let rest = util::strip_str(rest);
            if rest.is_empty() {
                return Err(Mep2Error::malformed("Location cannot be empty"));
            }
            self.location = rest.to_owned();
        } else if let Some(rest) = field.strip_prefix("Org:") {
            let rest = util::strip_str(rest);
            if rest.is_empty() {
                return Err(Mep2Error::malformed("Organization cannot be empty"));
            }
            self.organization = rest.to_owned();
        } else {
            if field.is_empty() {
                return Err(Mep2Error::malformed("Organization/Location cannot be empty"));
            }

            if self.unresolved_org_loc_1.is_empty() {
                self.unresolved_org_loc_1 = field.to_owned();
            } else {
                self.unresolved_org_loc_2 = field.to_owned();
            }
        }

        Ok(())
    }

    /// Parse an `EMS:`/`MBX:` routing continuation line.
    pub fn parse_field(&mut self, field: &str, information: &str) -> Result<(), Mep2Error> {
        // Shortest possible field is MBX:
        if field.len() < 4 {
            return Err(Mep2Error::malformed("Unknown field type"));
        }

        if util::starts_with_ignore_case(field.as_bytes(), b"ems:") {
            if !self.ems.is_empty() {
                return Err(Mep2Error::malformed("Multiple EMS directive in address"));
            }

            if information.is_empty() {
                return Err(Mep2Error::malformed("EMS cannot be empty"));
            }

            self.ems = information.to_owned();
        } else if util::starts_with_ignore_case(field.as_bytes(), b"mbx:") {
            if self.ems.is_empty() {
                return Err(Mep2Error::malformed("MBX without EMS"));
            }

            if information.is_empty() {
                return Err(Mep2Error::malformed("MBX cannot be empty"));
            }

            self.mbx.push(information.to_owned());

            let total: usize = self.mbx.iter().map(String::len).sum();
            if total > MBX_LIMIT {
                return Err(Mep2Error::malformed("MBX routing info larger than 305 characters"));
            }
        } else {
            return Err(Mep2Error::malformed(format!("Unknown address field {field}")));
        }

        Ok(())
    }
}

impl PartialEq for RawAddress {
    /// Routing equivalence: the delivery options beyond the primary four do
    /// not distinguish recipients.
    fn eq(&self, rhs: &RawAddress) -> bool {
        self.name == rhs.name
            && self.id == rhs.id
            && self.organization == rhs.organization
            && self.location == rhs.location
            && self.unresolved_org_loc_1 == rhs.unresolved_org_loc_1
            && self.unresolved_org_loc_2 == rhs.unresolved_org_loc_2
            && self.ems == rhs.ems
            && self.mbx == rhs.mbx
            && self.board == rhs.board
            && self.instant == rhs.instant
            && self.list == rhs.list
            && self.owner == rhs.owner
    }
}

impl Eq for RawAddress {}

impl fmt::Display for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.id)?;
        } else {
            f.write_str(&self.name)?;

            if !self.id.is_empty() {
                write!(f, " / {}", self.id)?;
            } else {
                if !self.location.is_empty() {
                    write!(f, " / Loc: {}", self.location)?;
                }
                if !self.organization.is_empty() {
                    write!(f, " / Org: {}", self.organization)?;
                }
                if !self.unresolved_org_loc_1.is_empty() {
                    write!(f, " / {}", self.unresolved_org_loc_1)?;
                }
                if !self.unresolved_org_loc_2.is_empty() {
                    write!(f, " / {}", self.unresolved_org_loc_2)?;
                }
            }
        }

        if self.has_options {
            let flags = [
                (self.board, "BOARD"),
                (self.instant, "INSTANT"),
                (self.list, "LIST"),
                (self.owner, "OWNER"),
                (self.onite, "ONITE"),
                (self.print, "PRINT"),
                (self.receipt, "RECEIPT"),
                (self.no_receipt, "NO RECEIPT"),
            ];

            f.write_str(" (")?;
            let mut first = true;
            for (set, name) in flags {
                if set {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    f.write_str(name)?;
                }
            }
            f.write_str(")")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mciid_invalid() {
        assert!(!is_mciid(""));
        assert!(!is_mciid("111-111-"));
        assert!(!is_mciid("111-111-111"));
        assert!(!is_mciid("111-1111111"));
        assert!(!is_mciid("111--1111111"));
        assert!(!is_mciid("1111-111"));
        assert!(!is_mciid("NOT-REAL"));
        assert!(!is_mciid("NOT-VAL-IDSE"));
    }

    #[test]
    fn mciid_valid() {
        assert!(is_mciid("111-1111"));
        assert!(is_mciid("111-111-1111"));
        assert!(is_mciid("000-111-1111"));
        assert!(is_mciid("0001111111"));
        assert!(is_mciid("1111111"));
        assert!(is_mciid("1111111111"));
    }

    #[test]
    fn mciid_canonical_form() {
        assert_eq!(canonicalize_mciid("111-1111"), "111-1111");
        assert_eq!(canonicalize_mciid("1111111"), "111-1111");
        assert_eq!(canonicalize_mciid("0001111111"), "111-1111");
        assert_eq!(canonicalize_mciid("000-111-1111"), "111-1111");
        assert_eq!(canonicalize_mciid("000-1111"), "000-1111");
        assert_eq!(canonicalize_mciid("111-111-1111"), "111-111-1111");
        assert_eq!(canonicalize_mciid("1111111111"), "111-111-1111");
        assert_eq!(canonicalize_mciid("0011111111"), "001-111-1111");
    }

    #[test]
    fn mciid_canonical_is_idempotent() {
        for id in ["111-1111", "1111111", "0001111111", "000-111-1111", "1111111111"] {
            let canonical = canonicalize_mciid(id);
            assert_eq!(canonicalize_mciid(&canonical), canonical);
        }
    }

    #[test]
    fn mciid_prefix() {
        assert_eq!(parse_mciid("MCI ID: 111-1111").unwrap(), Some("111-1111"));
        assert_eq!(parse_mciid("MCI ID:111-1111").unwrap(), Some("111-1111"));
        assert_eq!(parse_mciid("Gandalf").unwrap(), None);
        assert!(parse_mciid("MCI ID: Gandalf").is_err());
    }

    fn parsed(line: &str) -> RawAddress {
        let mut address = RawAddress::default();
        address.parse_first_line(line).unwrap();
        address
    }

    #[test]
    fn first_line_throws() {
        let cases = [
            "",
            "NAME/",
            "NAME/ORG/",
            "NAME/ORG/LOC/",
            "NAME/Org:/Loc:",
            "NAME/Org:ORG/Loc:",
            "NAME/Org:/Loc:LOC",
            "NAME/Org:org/Loc:loc/",
            "111-1111/222-2222",
            "NAME/222-2222/stuff",
            "NAME/stuff/222-2222",
            "///",
            "       /     /     /      ",
            "NAME (CRAP)",
            "NAME (BOARD,)",
            "NAME (BOARD,,PRINT)",
            "NAME (,)",
            "NAME (,BOARD)",
        ];

        for line in cases {
            let mut address = RawAddress::default();
            let err = address.parse_first_line(line).unwrap_err();
            assert_eq!(err.code(), 303, "expected malformed data for {line:?}");
        }
    }

    #[test]
    fn first_line_fields() {
        let cases: Vec<(&str, RawAddress)> = vec![
            ("111-1111 ", RawAddress { id: "111-1111".into(), ..Default::default() }),
            ("1111111 ", RawAddress { id: "111-1111".into(), ..Default::default() }),
            ("0001111111 ", RawAddress { id: "111-1111".into(), ..Default::default() }),
            ("000-111-1111 ", RawAddress { id: "111-1111".into(), ..Default::default() }),
            ("000-1111 ", RawAddress { id: "000-1111".into(), ..Default::default() }),
            ("111-111-1111 ", RawAddress { id: "111-111-1111".into(), ..Default::default() }),
            ("1111111111 ", RawAddress { id: "111-111-1111".into(), ..Default::default() }),
            ("0011111111 ", RawAddress { id: "001-111-1111".into(), ..Default::default() }),
            ("MCI ID: 111-1111", RawAddress { id: "111-1111".into(), ..Default::default() }),
            ("Gandalf the Gray / MCI ID: 111-1111", RawAddress {
                name: "Gandalf the Gray".into(),
                id: "111-1111".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray  ", RawAddress {
                name: "Gandalf the Gray".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray/111-1111", RawAddress {
                name: "Gandalf the Gray".into(),
                id: "111-1111".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray / 111-1111 ", RawAddress {
                name: "Gandalf the Gray".into(),
                id: "111-1111".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray / Org: The Good Guys ", RawAddress {
                name: "Gandalf the Gray".into(),
                organization: "The Good Guys".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray / Org: The Good Guys / Loc: Hobbiton ", RawAddress {
                name: "Gandalf the Gray".into(),
                organization: "The Good Guys".into(),
                location: "Hobbiton".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray / The Good Guys / Loc: Hobbiton ", RawAddress {
                name: "Gandalf the Gray".into(),
                location: "Hobbiton".into(),
                unresolved_org_loc_1: "The Good Guys".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray / Org: The Good Guys / Hobbiton ", RawAddress {
                name: "Gandalf the Gray".into(),
                organization: "The Good Guys".into(),
                unresolved_org_loc_1: "Hobbiton".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray / The Good Guys / Hobbiton ", RawAddress {
                name: "Gandalf the Gray".into(),
                unresolved_org_loc_1: "The Good Guys".into(),
                unresolved_org_loc_2: "Hobbiton".into(),
                ..Default::default()
            }),
            ("Gandalf the Gray ( BOARD )", RawAddress {
                name: "Gandalf the Gray".into(),
                board: true,
                ..Default::default()
            }),
            ("Gandalf the Gray (       BOARD)", RawAddress {
                name: "Gandalf the Gray".into(),
                board: true,
                ..Default::default()
            }),
            ("Gandalf the Gray (INSTANT)", RawAddress {
                name: "Gandalf the Gray".into(),
                instant: true,
                ..Default::default()
            }),
            ("Gandalf the Gray (LIST)", RawAddress {
                name: "Gandalf the Gray".into(),
                list: true,
                ..Default::default()
            }),
            ("Gandalf the Gray (OWNER)", RawAddress {
                name: "Gandalf the Gray".into(),
                owner: true,
                ..Default::default()
            }),
            ("Gandalf the Gray (BOARD, INSTANT, LIST, OWNER, ONITE, PRINT, RECEIPT, NO RECEIPT)", RawAddress {
                name: "Gandalf the Gray".into(),
                board: true,
                instant: true,
                list: true,
                owner: true,
                onite: true,
                print: true,
                receipt: true,
                no_receipt: true,
                ..Default::default()
            }),
        ];

        for (line, expected) in cases {
            assert_eq!(parsed(line), expected, "parsing {line:?}");
        }
    }

    #[test]
    fn secondary_options_do_not_distinguish() {
        // ONITE, PRINT, RECEIPT and NO RECEIPT are outside the equality
        let plain = parsed("Gandalf");
        assert_eq!(parsed("Gandalf (ONITE)"), plain);
        assert_eq!(parsed("Gandalf (PRINT)"), plain);
        assert_eq!(parsed("Gandalf (RECEIPT)"), plain);
        assert_eq!(parsed("Gandalf (NO RECEIPT)"), plain);
        assert_ne!(parsed("Gandalf (BOARD)"), plain);
    }

    #[test]
    fn continuation_invalid() {
        let mut address = parsed("Gandalf the Gray");
        assert!(address.parse_field("ems", "").is_err());
        assert!(address.parse_field("MBX", "lama").is_err());

        let mut address = parsed("Gandalf the Gray");
        assert!(address.parse_field("ems:", "").is_err());

        let mut address = parsed("Gandalf the Gray");
        assert!(address.parse_field("MBX:", "lama").is_err());

        let mut address = parsed("Gandalf the Gray");
        address.parse_field("EMS:", "Some EMS").unwrap();
        assert!(address.parse_field("MBX:", "").is_err());

        let mut address = parsed("Gandalf the Gray");
        address.parse_field("EMS:", "Some EMS").unwrap();
        assert!(address.parse_field("EMS:", "Another EMS").is_err());
    }

    #[test]
    fn continuation_valid() {
        let mut address = parsed("Gandalf the Gray");
        address.parse_field("EMS:", "INTERNET").unwrap();
        address.parse_field("MBX:", "gandalf@hobbiton.org").unwrap();
        assert_eq!(address.name, "Gandalf the Gray");
        assert_eq!(address.ems, "INTERNET");
        assert_eq!(address.mbx[0], "gandalf@hobbiton.org");

        let mut address = parsed("Gandalf the Gray");
        address.parse_field("EMS:", "CompuServe").unwrap();
        address.parse_field("MBX:", "CSI:GANDALF").unwrap();
        assert_eq!(address.ems, "CompuServe");
        assert_eq!(address.mbx[0], "CSI:GANDALF");

        let mut address = parsed("Gandalf the Gray");
        address.parse_field("EMS:", "HOBBITONMAIL").unwrap();
        address.parse_field("MBX:", "OR=Hobbiton").unwrap();
        address.parse_field("MBX:", "UN=DT").unwrap();
        address.parse_field("MBX:", "GI=Gandalf").unwrap();
        assert_eq!(address.mbx, ["OR=Hobbiton", "UN=DT", "GI=Gandalf"]);
    }

    #[test]
    fn mbx_aggregate_limit() {
        let mut address = parsed("Gandalf the Gray");
        address.parse_field("EMS:", "HOBBITONMAIL").unwrap();
        address.parse_field("MBX:", &"x".repeat(300)).unwrap();
        assert!(address.parse_field("MBX:", &"y".repeat(10)).is_err());
    }

    #[test]
    fn rendering() {
        assert_eq!(parsed("111-1111").to_string(), "111-1111");
        assert_eq!(
            parsed("Gandalf the Gray / 111-1111").to_string(),
            "Gandalf the Gray / 111-1111",
        );
        assert_eq!(
            parsed("Gandalf / Org: The Good Guys / Loc: Hobbiton").to_string(),
            "Gandalf / Loc: Hobbiton / Org: The Good Guys",
        );
        assert_eq!(
            parsed("Gandalf (NO RECEIPT, BOARD)").to_string(),
            "Gandalf (BOARD, NO RECEIPT)",
        );
    }
}
